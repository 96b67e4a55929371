//! Descriptive metadata resolution with priority-ordered fallbacks.
//!
//! Resolution is total: whatever the model looks like, the caller gets a
//! usable record back — at minimum a name derived from the storage key.

use crate::parser::{Entity, ParsedModel};

/// Name candidates that carry no information. Authoring tools write these
/// when the user never filled the field in.
const PLACEHOLDER_NAMES: &[&str] = &["default", "site", "project", "environment - site"];

/// Prefixes commonly left on uploaded file names by tooling.
const NOISE_PREFIXES: &[&str] = &["tmp", "temp", "ifc", "file"];

/// Generic fallback when nothing better can be derived.
const FALLBACK_NAME: &str = "Building";

/// The descriptive record for a processed building.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildingMetadata {
    /// Never empty: the resolver guarantees a fallback.
    pub name: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    /// Difference between the highest and lowest storey elevation; absent
    /// when fewer than two storeys carry an elevation.
    pub height: Option<f64>,
    pub floor_count: Option<u32>,
}

/// Resolves the building's descriptive record from the model, falling back
/// to a name derived from `storage_key` when the model offers nothing.
pub fn resolve(model: &ParsedModel, storage_key: &str) -> BuildingMetadata {
    let building = model.entities_of_type("IfcBuilding").next();
    let site = model.entities_of_type("IfcSite").next();
    let project = model.entities_of_type("IfcProject").next();

    let name = building
        .and_then(|b| named_from(b, true))
        .or_else(|| site.and_then(|s| named_from(s, true)))
        .or_else(|| project.and_then(|p| named_from(p, false)))
        .unwrap_or_else(|| name_from_storage_key(storage_key));

    // Address is all-or-nothing per source: the building's postal record
    // wins outright, the site's is consulted only when the building has
    // none. Fields from the two records are never merged.
    let address_record = building
        .and_then(|b| b.record("BuildingAddress"))
        .or_else(|| site.and_then(|s| s.record("SiteAddress")));
    let (address, city, country) = match address_record {
        Some(record) => resolve_address(record),
        None => (None, None, None),
    };

    let storeys: Vec<&Entity> = model.entities_of_type("IfcBuildingStorey").collect();
    let floor_count = Some(storeys.len() as u32);
    let height = height_from_storeys(&storeys);

    BuildingMetadata {
        name,
        address,
        city,
        country,
        height,
        floor_count,
    }
}

/// First usable name on an entity: long-form name, then short name, then
/// (when `allow_description`) the free-text description.
fn named_from(entity: &Entity, allow_description: bool) -> Option<String> {
    let mut candidates = vec![entity.text("LongName"), entity.text("Name")];
    if allow_description {
        candidates.push(entity.text("Description"));
    }
    candidates
        .into_iter()
        .flatten()
        .find(|candidate| !is_placeholder(candidate))
        .map(|s| s.to_string())
}

fn is_placeholder(candidate: &str) -> bool {
    let trimmed = candidate.trim();
    trimmed.is_empty()
        || PLACEHOLDER_NAMES
            .iter()
            .any(|p| trimmed.eq_ignore_ascii_case(p))
}

/// Derives a display name from the storage key's base file name: drop the
/// extension, turn separators into spaces, strip known noise prefixes.
fn name_from_storage_key(storage_key: &str) -> String {
    let base = storage_key.rsplit('/').next().unwrap_or(storage_key);
    let stem = match base.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => base,
    };

    let mut name = stem.replace(['_', '-'], " ");
    for prefix in NOISE_PREFIXES {
        if name.to_lowercase().starts_with(prefix) {
            name = name[prefix.len()..].trim().to_string();
        }
    }

    if name.chars().count() > 3 {
        name
    } else {
        FALLBACK_NAME.to_string()
    }
}

fn resolve_address(record: &Entity) -> (Option<String>, Option<String>, Option<String>) {
    let address = record.text_list("AddressLines").and_then(|lines| {
        let kept: Vec<&str> = lines
            .iter()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .collect();
        if kept.is_empty() {
            None
        } else {
            Some(kept.join(", "))
        }
    });
    let city = record.text("Town").map(|s| s.to_string());
    let country = record.text("Country").map(|s| s.to_string());
    (address, city, country)
}

/// Height is the spread of storey elevations. An elevation of exactly 0.0
/// still counts toward min/max; only absent elevations are excluded.
fn height_from_storeys(storeys: &[&Entity]) -> Option<f64> {
    let elevations: Vec<f64> = storeys
        .iter()
        .filter_map(|storey| storey.real("Elevation"))
        .collect();
    if elevations.len() < 2 {
        return None;
    }
    let min = elevations.iter().copied().fold(f64::INFINITY, f64::min);
    let max = elevations.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some(((max - min) * 100.0).round() / 100.0)
}
