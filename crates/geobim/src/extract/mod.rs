//! Extraction of geolocation and descriptive metadata from a parsed model.

pub mod geo;
pub mod metadata;

pub use geo::{Axis, Coordinate};
pub use metadata::{resolve, BuildingMetadata};

use crate::error::ExtractionError;
use crate::extract::geo::to_decimal_degrees;
use crate::parser::ParsedModel;

/// Extracts the site's geographic reference as a validated coordinate.
///
/// The first site in file order wins. A model without a site, or a site
/// without both reference angles, has no usable geolocation.
pub fn extract_location(model: &ParsedModel) -> Result<Coordinate, ExtractionError> {
    let site = model
        .entities_of_type("IfcSite")
        .next()
        .ok_or(ExtractionError::NoGeoReference)?;

    let latitude = site
        .angle("RefLatitude")
        .ok_or(ExtractionError::NoGeoReference)?;
    let longitude = site
        .angle("RefLongitude")
        .ok_or(ExtractionError::NoGeoReference)?;

    Coordinate::new(
        to_decimal_degrees(&latitude, Axis::Latitude)?,
        to_decimal_degrees(&longitude, Axis::Longitude)?,
    )
}
