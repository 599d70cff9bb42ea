use geo::Simplify;
use geo_types::{Coord, LineString};
use thiserror::Error;

use super::Position;

/// Decimal digits carried by encoded polylines.
pub const PRECISION: u32 = 5;

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("invalid polyline character at byte {0}")]
    InvalidCharacter(usize),
    #[error("polyline ends in the middle of a value")]
    Truncated,
}

/// Ramer–Douglas–Peucker simplification of a `[lon, lat]` path.
///
/// Paths of fewer than three vertices are returned unchanged; both endpoints are
/// always kept.
pub fn simplify(coordinates: &[Position], tolerance: f64) -> Vec<Position> {
    let line: LineString<f64> = coordinates
        .iter()
        .map(|p| Coord { x: p[0], y: p[1] })
        .collect();
    line.simplify(&tolerance)
        .coords()
        .map(|c| [c.x, c.y])
        .collect()
}

/// Simplifies a path then encodes it, the form stored in `routes.json`.
pub fn encode_simplified(coordinates: &[Position], tolerance: f64) -> String {
    encode(&simplify(coordinates, tolerance))
}

/// Encodes a `[lon, lat]` path with the Google polyline algorithm.
///
/// Values are written latitude first, as the format requires.
pub fn encode(coordinates: &[Position]) -> String {
    let factor = 10f64.powi(PRECISION as i32);
    let mut output = String::new();
    let mut previous = (0i64, 0i64);
    for position in coordinates {
        let lat = round_half_away(position[1] * factor);
        let lon = round_half_away(position[0] * factor);
        encode_value(lat - previous.0, &mut output);
        encode_value(lon - previous.1, &mut output);
        previous = (lat, lon);
    }
    output
}

/// Decodes a polyline back to `[lon, lat]` positions.
pub fn decode(encoded: &str) -> Result<Vec<Position>, Error> {
    let factor = 10f64.powi(PRECISION as i32);
    let bytes = encoded.as_bytes();
    let mut index = 0;
    let mut lat = 0i64;
    let mut lon = 0i64;
    let mut positions = Vec::new();
    while index < bytes.len() {
        lat += decode_value(bytes, &mut index)?;
        lon += decode_value(bytes, &mut index)?;
        positions.push([lon as f64 / factor, lat as f64 / factor]);
    }
    Ok(positions)
}

fn round_half_away(value: f64) -> i64 {
    (value.abs() + 0.5).floor().copysign(value) as i64
}

fn encode_value(delta: i64, output: &mut String) {
    let mut value = if delta < 0 { !(delta << 1) } else { delta << 1 };
    while value >= 0x20 {
        output.push(char::from((((value & 0x1f) | 0x20) + 63) as u8));
        value >>= 5;
    }
    output.push(char::from((value + 63) as u8));
}

fn decode_value(bytes: &[u8], index: &mut usize) -> Result<i64, Error> {
    let mut result = 0i64;
    let mut shift = 0;
    loop {
        let byte = *bytes.get(*index).ok_or(Error::Truncated)?;
        if !(63..=126).contains(&byte) {
            return Err(Error::InvalidCharacter(*index));
        }
        *index += 1;
        let chunk = (byte - 63) as i64;
        result |= (chunk & 0x1f) << shift;
        shift += 5;
        if chunk < 0x20 {
            break;
        }
    }
    Ok(if result & 1 == 1 { !(result >> 1) } else { result >> 1 })
}
