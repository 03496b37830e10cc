//! Base-32 geohash encoding for spatial indexing.
//!
//! A geohash interleaves latitude and longitude bisection bits, starting
//! with longitude, and packs five bits per output character. Strings that
//! share a prefix denote nearby cells; the converse does not hold near
//! cell edges, which is an accepted limitation of the scheme.

use thiserror::Error;

/// The 32-character geohash alphabet (digits and lowercase letters,
/// excluding `a`, `i`, `l` and `o`).
pub const ALPHABET: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Precision used when callers do not specify one.
pub const DEFAULT_PRECISION: usize = 8;

/// Errors returned by [`encode`] for out-of-domain input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidCoordinate {
    /// Latitude was outside the valid range.
    #[error("latitude {0} is outside [-90, 90]")]
    Latitude(f64),
    /// Longitude was outside the valid range.
    #[error("longitude {0} is outside [-180, 180]")]
    Longitude(f64),
    /// A zero-length geohash is meaningless.
    #[error("precision must be at least 1")]
    Precision,
}

/// Encode a coordinate pair as a geohash of `precision` characters.
///
/// The encoding is deterministic and pure: identical inputs always yield
/// identical output, and the function holds no shared state, so concurrent
/// calls never interfere. Coordinates exactly on a cell midpoint resolve
/// into the upper half, matching canonical encoders.
///
/// # Errors
///
/// Returns [`InvalidCoordinate`] when the latitude is outside `[-90, 90]`,
/// the longitude is outside `[-180, 180]` (both rejected for NaN too), or
/// `precision` is zero.
///
/// # Examples
///
/// ```
/// use strandline_core::geohash;
///
/// let hash = geohash::encode(42.605, -5.603, 5)?;
/// assert_eq!(hash, "ezs42");
/// # Ok::<(), strandline_core::geohash::InvalidCoordinate>(())
/// ```
pub fn encode(latitude: f64, longitude: f64, precision: usize) -> Result<String, InvalidCoordinate> {
    if precision == 0 {
        return Err(InvalidCoordinate::Precision);
    }
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(InvalidCoordinate::Latitude(latitude));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(InvalidCoordinate::Longitude(longitude));
    }

    let mut lat_range = (-90.0_f64, 90.0_f64);
    let mut lon_range = (-180.0_f64, 180.0_f64);
    let mut hash = String::with_capacity(precision);
    let mut bits_pending = 0_u8;
    let mut current = 0_usize;
    let mut bisect_longitude = true;

    while hash.len() < precision {
        let (range, coordinate) = if bisect_longitude {
            (&mut lon_range, longitude)
        } else {
            (&mut lat_range, latitude)
        };
        let midpoint = (range.0 + range.1) / 2.0;
        current <<= 1;
        if coordinate >= midpoint {
            current |= 1;
            range.0 = midpoint;
        } else {
            range.1 = midpoint;
        }
        bisect_longitude = !bisect_longitude;

        bits_pending += 1;
        if bits_pending == 5 {
            hash.push(char::from(ALPHABET[current]));
            bits_pending = 0;
            current = 0;
        }
    }

    Ok(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn common_prefix_len(a: &str, b: &str) -> usize {
        a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count()
    }

    #[rstest]
    #[case(42.605, -5.603, 5, "ezs42")]
    #[case(57.64911, 10.40744, 11, "u4pruydqqvj")]
    #[case(0.0, 0.0, 6, "s00000")]
    fn encodes_known_vectors(
        #[case] lat: f64,
        #[case] lon: f64,
        #[case] precision: usize,
        #[case] expected: &str,
    ) {
        assert_eq!(encode(lat, lon, precision).unwrap(), expected);
    }

    #[rstest]
    #[case(1)]
    #[case(4)]
    #[case(8)]
    #[case(12)]
    fn output_has_requested_length_and_alphabet(#[case] precision: usize) {
        let hash = encode(-33.8915, 151.2767, precision).unwrap();
        assert_eq!(hash.chars().count(), precision);
        assert!(
            hash.bytes().all(|b| ALPHABET.contains(&b)),
            "unexpected character in {hash}"
        );
    }

    #[rstest]
    fn encoding_is_deterministic() {
        let first = encode(-33.8915, 151.2767, 8).unwrap();
        let second = encode(-33.8915, 151.2767, 8).unwrap();
        assert_eq!(first, second);
    }

    #[rstest]
    fn nearby_points_share_longer_prefixes_than_distant_ones() {
        let origin = encode(0.0, 0.0, 6).unwrap();
        let near = encode(0.0001, 0.0001, 6).unwrap();
        let far = encode(50.0, 50.0, 6).unwrap();
        assert!(common_prefix_len(&origin, &near) > common_prefix_len(&origin, &far));
    }

    #[rstest]
    #[case(90.0001, 0.0)]
    #[case(-90.0001, 0.0)]
    #[case(f64::NAN, 0.0)]
    fn rejects_invalid_latitude(#[case] lat: f64, #[case] lon: f64) {
        assert!(matches!(
            encode(lat, lon, 8),
            Err(InvalidCoordinate::Latitude(_))
        ));
    }

    #[rstest]
    #[case(0.0, 180.0001)]
    #[case(0.0, -200.0)]
    fn rejects_invalid_longitude(#[case] lat: f64, #[case] lon: f64) {
        assert!(matches!(
            encode(lat, lon, 8),
            Err(InvalidCoordinate::Longitude(_))
        ));
    }

    #[rstest]
    fn rejects_zero_precision() {
        assert_eq!(encode(0.0, 0.0, 0), Err(InvalidCoordinate::Precision));
    }

    #[rstest]
    fn accepts_boundary_coordinates() {
        let hash = encode(90.0, 180.0, 8).unwrap();
        assert_eq!(hash.len(), 8);
        let hash = encode(-90.0, -180.0, 8).unwrap();
        assert_eq!(hash.len(), 8);
    }
}
