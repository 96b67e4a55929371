//! Geographic angle normalization and coordinate validation.

use std::fmt;

use crate::error::ExtractionError;
use crate::parser::GeoAngle;

/// Which coordinate axis a value belongs to. Carried on errors so a failure
/// message names the offending axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Latitude,
    Longitude,
}

impl Axis {
    pub fn lower_bound(self) -> f64 {
        match self {
            Axis::Latitude => -90.0,
            Axis::Longitude => -180.0,
        }
    }

    pub fn upper_bound(self) -> f64 {
        match self {
            Axis::Latitude => 90.0,
            Axis::Longitude => 180.0,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Latitude => write!(f, "latitude"),
            Axis::Longitude => write!(f, "longitude"),
        }
    }
}

/// A validated geographic coordinate in decimal degrees.
///
/// Construction is the only way to obtain one, so a `Coordinate` that
/// reaches persistence is always inside the valid range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ExtractionError> {
        for (axis, value) in [(Axis::Latitude, latitude), (Axis::Longitude, longitude)] {
            if value < axis.lower_bound() || value > axis.upper_bound() {
                return Err(ExtractionError::CoordinateOutOfRange { axis, value });
            }
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

/// Converts a source angle to signed decimal degrees.
///
/// Scalars are already decimal degrees and pass through unchanged. A
/// sexagesimal compound of `(degrees, minutes, seconds[, millionths of a
/// second])` is folded into a magnitude and given the sign of the degrees
/// component. When degrees is exactly zero the sign cannot be recovered from
/// the magnitude components, so the result is positive; the source format
/// does not disambiguate hemisphere at zero degrees.
pub fn to_decimal_degrees(angle: &GeoAngle, axis: Axis) -> Result<f64, ExtractionError> {
    match angle {
        GeoAngle::Degrees(value) => Ok(*value),
        GeoAngle::Sexagesimal(parts) => {
            if parts.len() < 3 {
                return Err(ExtractionError::InvalidFormat {
                    axis,
                    detail: format!(
                        "sexagesimal angle needs at least 3 components, got {}",
                        parts.len()
                    ),
                });
            }
            let degrees = parts[0];
            let minutes = parts[1];
            let seconds = parts[2];
            // Fourth component is millionths of a second.
            let subseconds = parts.get(3).copied().unwrap_or(0.0);

            let magnitude = degrees.abs()
                + minutes / 60.0
                + seconds / 3600.0
                + subseconds / 3_600_000_000.0;

            Ok(if degrees < 0.0 { -magnitude } else { magnitude })
        }
    }
}
