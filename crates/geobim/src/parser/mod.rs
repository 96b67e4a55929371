//! Capability interface over parsed building models.
//!
//! The pipeline never touches a model format directly: it asks a
//! [`ModelParser`] to open a file and then reads named, optional attributes
//! off the returned [`ParsedModel`]. Absent attributes yield `None` rather
//! than erroring, which mirrors how building models are populated in
//! practice (most descriptive fields are optional).

pub mod spf;

use std::collections::HashMap;
use std::path::Path;

use crate::error::ExtractionError;

pub use spf::StepParser;

/// A geographic angle as found in the source model: either decimal degrees
/// or a sexagesimal compound of `(degrees, minutes, seconds[, millionths of
/// a second])`. The sign lives on the degrees component; the remaining
/// components are magnitudes.
#[derive(Debug, Clone, PartialEq)]
pub enum GeoAngle {
    Degrees(f64),
    Sexagesimal(Vec<f64>),
}

/// A single attribute value on a model entity.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Real(f64),
    RealList(Vec<f64>),
    TextList(Vec<String>),
    /// A nested sub-record, e.g. a postal address attached to a building.
    Record(Box<Entity>),
}

/// An entity with named, optional attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entity {
    attributes: HashMap<String, AttrValue>,
}

impl Entity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: AttrValue) {
        self.attributes.insert(name.into(), value);
    }

    /// Builder-style variant of [`Entity::set`].
    pub fn with(mut self, name: impl Into<String>, value: AttrValue) -> Self {
        self.set(name, value);
        self
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.attributes.get(name) {
            Some(AttrValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn real(&self, name: &str) -> Option<f64> {
        match self.attributes.get(name) {
            Some(AttrValue::Real(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn text_list(&self, name: &str) -> Option<&[String]> {
        match self.attributes.get(name) {
            Some(AttrValue::TextList(items)) => Some(items.as_slice()),
            _ => None,
        }
    }

    pub fn record(&self, name: &str) -> Option<&Entity> {
        match self.attributes.get(name) {
            Some(AttrValue::Record(entity)) => Some(entity),
            _ => None,
        }
    }

    /// Reads an attribute as a geographic angle. Scalars are decimal
    /// degrees; numeric lists are sexagesimal compounds.
    pub fn angle(&self, name: &str) -> Option<GeoAngle> {
        match self.attributes.get(name) {
            Some(AttrValue::Real(v)) => Some(GeoAngle::Degrees(*v)),
            Some(AttrValue::RealList(parts)) => Some(GeoAngle::Sexagesimal(parts.clone())),
            _ => None,
        }
    }
}

/// An opened model: entities in file order, queryable by type name.
#[derive(Debug, Clone, Default)]
pub struct ParsedModel {
    entities: Vec<(String, Entity)>,
}

impl ParsedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, type_name: impl Into<String>, entity: Entity) {
        self.entities.push((type_name.into(), entity));
    }

    /// All entities of the given type, in file order.
    pub fn entities_of_type<'a>(
        &'a self,
        type_name: &'a str,
    ) -> impl Iterator<Item = &'a Entity> + 'a {
        self.entities
            .iter()
            .filter(move |(name, _)| name == type_name)
            .map(|(_, entity)| entity)
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Opens a model file from disk.
pub trait ModelParser: Send + Sync {
    fn open(&self, path: &Path) -> Result<ParsedModel, ExtractionError>;
}
