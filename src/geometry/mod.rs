pub mod features;
pub mod polyline;
pub mod stitch;

/// A `[longitude, latitude]` vertex, in the order GeoJSON uses.
pub type Position = [f64; 2];

/// Rounds a value to a fixed number of decimal digits.
pub fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}

/// Whether a position lies within valid WGS84 bounds.
pub fn is_valid_position(position: &Position) -> bool {
    (-180.0..=180.0).contains(&position[0]) && (-90.0..=90.0).contains(&position[1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rounds_to_precision() {
        assert_relative_eq!(round_to(103.8475693, 5), 103.84757);
        assert_relative_eq!(round_to(1.2966591, 5), 1.29666);
        assert_relative_eq!(round_to(-0.000004, 5), 0.0);
    }

    #[test]
    fn validates_bounds() {
        assert!(is_valid_position(&[103.8, 1.3]));
        assert!(!is_valid_position(&[1.3, 103.8]));
        assert!(!is_valid_position(&[-181.0, 0.0]));
    }
}
