//! GPS location embedded in uploaded photos, used when the client sends no
//! coordinates.

use std::io::Cursor;

use ::exif::{Exif, In, Reader, Tag, Value};

use crate::models::record::Location;

/// GPS coordinates from the EXIF block of `data`. Missing or malformed tags
/// yield `None` for that coordinate.
pub fn gps_location(data: &[u8]) -> Location {
    let exif = match Reader::new().read_from_container(&mut Cursor::new(data)) {
        Ok(exif) => exif,
        Err(e) => {
            tracing::debug!(error = %e, "No EXIF data in upload");
            return Location::default();
        }
    };

    Location::new(
        coordinate(&exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, "S", 90.0),
        coordinate(&exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, "W", 180.0),
    )
}

fn coordinate(exif: &Exif, tag: Tag, ref_tag: Tag, negative_ref: &str, limit: f64) -> Option<f64> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let degrees = match &field.value {
        Value::Rational(parts) => dms_to_degrees(&parts.iter().map(|r| r.to_f64()).collect::<Vec<_>>())?,
        _ => return None,
    };

    let negative = exif
        .get_field(ref_tag, In::PRIMARY)
        .map(|f| f.display_value().to_string().trim_matches('"').trim() == negative_ref)
        .unwrap_or(false);

    let value = if negative { -degrees } else { degrees };
    (value.abs() <= limit).then_some(value)
}

/// Degrees, minutes and seconds to decimal degrees. Minutes and seconds are
/// optional.
fn dms_to_degrees(parts: &[f64]) -> Option<f64> {
    let (&deg, rest) = parts.split_first()?;
    let min = rest.first().copied().unwrap_or(0.0);
    let sec = rest.get(1).copied().unwrap_or(0.0);
    let value = deg + min / 60.0 + sec / 3600.0;
    value.is_finite().then_some(value)
}
