//! STEP Physical File (ISO 10303-21) reader.
//!
//! Deliberately scoped: it materializes only the entity types the pipeline
//! consumes (project, site, building, storey, postal address), resolving
//! their positional attributes to the named optional values of
//! [`ParsedModel`]. Every other instance in the file is skipped without
//! being interpreted, so exotic geometry payloads cannot break a read.

use std::collections::HashMap;
use std::path::Path;

use crate::error::ExtractionError;
use crate::parser::{AttrValue, Entity, ModelParser, ParsedModel};

/// Positional attribute schemas for the entity types we materialize.
/// Order follows the IFC EXPRESS definitions.
const SCHEMAS: &[(&str, &str, &[&str])] = &[
    (
        "IFCPROJECT",
        "IfcProject",
        &[
            "GlobalId",
            "OwnerHistory",
            "Name",
            "Description",
            "ObjectType",
            "LongName",
            "Phase",
            "RepresentationContexts",
            "UnitsInContext",
        ],
    ),
    (
        "IFCSITE",
        "IfcSite",
        &[
            "GlobalId",
            "OwnerHistory",
            "Name",
            "Description",
            "ObjectType",
            "ObjectPlacement",
            "Representation",
            "LongName",
            "CompositionType",
            "RefLatitude",
            "RefLongitude",
            "RefElevation",
            "LandTitleNumber",
            "SiteAddress",
        ],
    ),
    (
        "IFCBUILDING",
        "IfcBuilding",
        &[
            "GlobalId",
            "OwnerHistory",
            "Name",
            "Description",
            "ObjectType",
            "ObjectPlacement",
            "Representation",
            "LongName",
            "CompositionType",
            "ElevationOfRefHeight",
            "ElevationOfTerrain",
            "BuildingAddress",
        ],
    ),
    (
        "IFCBUILDINGSTOREY",
        "IfcBuildingStorey",
        &[
            "GlobalId",
            "OwnerHistory",
            "Name",
            "Description",
            "ObjectType",
            "ObjectPlacement",
            "Representation",
            "LongName",
            "CompositionType",
            "Elevation",
        ],
    ),
    (
        "IFCPOSTALADDRESS",
        "IfcPostalAddress",
        &[
            "Purpose",
            "Description",
            "UserDefinedPurpose",
            "InternalLocation",
            "AddressLines",
            "PostalBox",
            "Town",
            "Region",
            "PostalCode",
            "Country",
        ],
    ),
];

fn schema_for(type_name: &str) -> Option<(&'static str, &'static [&'static str])> {
    SCHEMAS
        .iter()
        .find(|(upper, _, _)| *upper == type_name)
        .map(|(_, canonical, names)| (*canonical, *names))
}

/// One raw instance parameter as written in the file.
#[derive(Debug, Clone, PartialEq)]
enum Param {
    Null,
    Number(f64),
    Text(String),
    Enum(String),
    Ref(u64),
    List(Vec<Param>),
}

/// Reads STEP physical files from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepParser;

impl StepParser {
    pub fn new() -> Self {
        Self
    }
}

impl ModelParser for StepParser {
    fn open(&self, path: &Path) -> Result<ParsedModel, ExtractionError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ExtractionError::UnreadableFile(format!("{}: {e}", path.display())))?;
        parse_str(&text)
    }
}

/// Parses STEP file content into a [`ParsedModel`].
pub fn parse_str(text: &str) -> Result<ParsedModel, ExtractionError> {
    if !text.trim_start().starts_with("ISO-10303-21") {
        return Err(ExtractionError::UnreadableFile(
            "not a STEP physical file (missing ISO-10303-21 header)".to_string(),
        ));
    }

    // First pass: collect the raw parameters of every instance whose type we
    // materialize. The map is needed afterwards to chase sub-record
    // references (postal addresses).
    let mut instances: Vec<(u64, &'static str, &'static [&'static str], Vec<Param>)> = Vec::new();
    let mut by_id: HashMap<u64, usize> = HashMap::new();

    for statement in split_statements(text) {
        let Some((id, type_name, body)) = instance_header(&statement) else {
            continue;
        };
        let Some((canonical, names)) = schema_for(&type_name) else {
            continue;
        };
        let params = parse_params(&body).map_err(|msg| {
            ExtractionError::UnreadableFile(format!("malformed instance #{id}: {msg}"))
        })?;
        by_id.insert(id, instances.len());
        instances.push((id, canonical, names, params));
    }

    let mut model = ParsedModel::new();
    for (_, canonical, names, params) in &instances {
        let entity = build_entity(names, params, &instances, &by_id, 0);
        model.push(*canonical, entity);
    }
    Ok(model)
}

/// Splits file content into `;`-terminated statements, ignoring `;` inside
/// quoted strings and `/* */` comments.
fn split_statements(text: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            current.push(c);
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    // Escaped quote inside the string.
                    current.push(chars.next().unwrap());
                } else {
                    in_string = false;
                }
            }
            continue;
        }
        match c {
            '\'' => {
                in_string = true;
                current.push(c);
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            }
            ';' => {
                let stmt = current.trim().to_string();
                if !stmt.is_empty() {
                    statements.push(stmt);
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    statements
}

/// Parses `#<id> = <TYPE>(<body>)`, returning `None` for statements that are
/// not entity instances (header records, section markers).
fn instance_header(statement: &str) -> Option<(u64, String, String)> {
    let rest = statement.strip_prefix('#')?;
    let digits_end = rest.find(|c: char| !c.is_ascii_digit())?;
    let id: u64 = rest[..digits_end].parse().ok()?;
    let rest = rest[digits_end..].trim_start().strip_prefix('=')?.trim_start();

    let name_end = rest.find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))?;
    let type_name = rest[..name_end].to_ascii_uppercase();
    let rest = rest[name_end..].trim_start();

    let body = rest.strip_prefix('(')?;
    let close = body.rfind(')')?;
    Some((id, type_name, body[..close].to_string()))
}

/// Recursive-descent parser for an instance's parameter list.
struct ParamParser {
    chars: Vec<char>,
    pos: usize,
}

impl ParamParser {
    fn new(body: &str) -> Self {
        Self {
            chars: body.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn parse_all(&mut self) -> Result<Vec<Param>, String> {
        let mut params = Vec::new();
        self.skip_ws();
        if self.peek().is_none() {
            return Ok(params);
        }
        loop {
            params.push(self.parse_param()?);
            self.skip_ws();
            match self.bump() {
                Some(',') => self.skip_ws(),
                None => break,
                Some(c) => return Err(format!("expected ',' but found '{c}'")),
            }
        }
        Ok(params)
    }

    fn parse_param(&mut self) -> Result<Param, String> {
        self.skip_ws();
        match self.peek() {
            Some('$') | Some('*') => {
                self.bump();
                Ok(Param::Null)
            }
            Some('\'') => self.parse_string(),
            Some('.') => self.parse_enum(),
            Some('#') => self.parse_ref(),
            Some('(') => self.parse_list(),
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' => self.parse_number(),
            Some(c) if c.is_ascii_alphabetic() || c == '_' => self.parse_typed(),
            Some(c) => Err(format!("unexpected character '{c}'")),
            None => Err("unexpected end of parameters".to_string()),
        }
    }

    fn parse_string(&mut self) -> Result<Param, String> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('\'') => {
                    if self.peek() == Some('\'') {
                        self.bump();
                        out.push('\'');
                    } else {
                        return Ok(Param::Text(out));
                    }
                }
                Some(c) => out.push(c),
                None => return Err("unterminated string".to_string()),
            }
        }
    }

    fn parse_enum(&mut self) -> Result<Param, String> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('.') => return Ok(Param::Enum(out)),
                Some(c) => out.push(c),
                None => return Err("unterminated enumeration".to_string()),
            }
        }
    }

    fn parse_ref(&mut self) -> Result<Param, String> {
        self.bump();
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err("reference without an id".to_string());
        }
        let digits: String = self.chars[start..self.pos].iter().collect();
        digits
            .parse()
            .map(Param::Ref)
            .map_err(|e| format!("bad reference id: {e}"))
    }

    fn parse_list(&mut self) -> Result<Param, String> {
        self.bump();
        let mut items = Vec::new();
        self.skip_ws();
        if self.peek() == Some(')') {
            self.bump();
            return Ok(Param::List(items));
        }
        loop {
            items.push(self.parse_param()?);
            self.skip_ws();
            match self.bump() {
                Some(',') => self.skip_ws(),
                Some(')') => return Ok(Param::List(items)),
                Some(c) => return Err(format!("expected ',' or ')' but found '{c}'")),
                None => return Err("unterminated list".to_string()),
            }
        }
    }

    fn parse_number(&mut self) -> Result<Param, String> {
        let start = self.pos;
        while matches!(
            self.peek(),
            Some(c) if c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E')
        ) {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse()
            .map(Param::Number)
            .map_err(|_| format!("bad number literal '{text}'"))
    }

    /// A typed parameter such as `IFCLENGTHMEASURE(3.5)`; the wrapper type is
    /// discarded and the inner value kept.
    fn parse_typed(&mut self) -> Result<Param, String> {
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        self.skip_ws();
        if self.peek() != Some('(') {
            return Err("expected '(' after type name".to_string());
        }
        match self.parse_list()? {
            Param::List(mut inner) if inner.len() == 1 => Ok(inner.remove(0)),
            list => Ok(list),
        }
    }
}

fn parse_params(body: &str) -> Result<Vec<Param>, String> {
    ParamParser::new(body).parse_all()
}

/// Maps positional parameters onto the schema's attribute names. References
/// to materialized instances become nested records; nulls, enumerations, and
/// references to skipped instances are simply absent.
fn build_entity(
    names: &[&str],
    params: &[Param],
    instances: &[(u64, &'static str, &'static [&'static str], Vec<Param>)],
    by_id: &HashMap<u64, usize>,
    depth: usize,
) -> Entity {
    let mut entity = Entity::new();
    for (name, param) in names.iter().zip(params.iter()) {
        match param {
            Param::Text(s) => entity.set(*name, AttrValue::Text(s.clone())),
            Param::Number(v) => entity.set(*name, AttrValue::Real(*v)),
            Param::List(items) if !items.is_empty() => {
                if items.iter().all(|p| matches!(p, Param::Number(_))) {
                    let numbers = items
                        .iter()
                        .filter_map(|p| match p {
                            Param::Number(v) => Some(*v),
                            _ => None,
                        })
                        .collect();
                    entity.set(*name, AttrValue::RealList(numbers));
                } else if items.iter().all(|p| matches!(p, Param::Text(_))) {
                    let texts = items
                        .iter()
                        .filter_map(|p| match p {
                            Param::Text(s) => Some(s.clone()),
                            _ => None,
                        })
                        .collect();
                    entity.set(*name, AttrValue::TextList(texts));
                }
            }
            Param::Ref(id) if depth < 2 => {
                if let Some(&idx) = by_id.get(id) {
                    let (_, _, ref_names, ref_params) = &instances[idx];
                    let nested = build_entity(ref_names, ref_params, instances, by_id, depth + 1);
                    entity.set(*name, AttrValue::Record(Box::new(nested)));
                }
            }
            _ => {}
        }
    }
    entity
}
