//! Unit-sphere geometry for positional matching.
//!
//! Sky positions are embedded on the unit sphere so that "within an angle"
//! becomes "within a chord", which an ordinary Euclidean index can answer.

use ndarray::{Array2, ArrayView2};

use crate::crossmatch::CrossmatchError;

/// Convert (RA, Dec) in radians to a unit vector `[x, y, z]`.
pub fn radec_to_xyz(ra: f64, dec: f64) -> [f64; 3] {
    let cos_dec = dec.cos();
    [cos_dec * ra.cos(), cos_dec * ra.sin(), dec.sin()]
}

/// Convert (RA, Dec) in degrees to a unit vector.
pub fn radec_deg_to_xyz(ra_deg: f64, dec_deg: f64) -> [f64; 3] {
    radec_to_xyz(ra_deg.to_radians(), dec_deg.to_radians())
}

/// Project an N x 2 array of (RA, Dec) degrees onto the unit sphere (N x 3).
///
/// NaN inputs yield NaN vectors; those never satisfy a distance bound, so a
/// source with an unknown position simply has no matches.
pub fn project_radec(points: ArrayView2<'_, f64>) -> Result<Array2<f64>, CrossmatchError> {
    if points.ncols() != 2 {
        return Err(CrossmatchError::NotRaDec {
            columns: points.ncols(),
        });
    }
    let mut out = Array2::zeros((points.nrows(), 3));
    for (row, mut xyz) in points.rows().into_iter().zip(out.rows_mut()) {
        let v = radec_deg_to_xyz(row[0], row[1]);
        xyz[0] = v[0];
        xyz[1] = v[1];
        xyz[2] = v[2];
    }
    Ok(out)
}

/// Chord length on the unit sphere subtending `angle_deg`.
///
/// Equal to `sqrt(2 - 2 cos(theta))` from the law of cosines, evaluated as
/// `2 sin(theta / 2)` so arcsecond radii keep full precision. Angles of 180
/// degrees or more cover the whole sphere and map to infinity.
pub fn chord_from_angle(angle_deg: f64) -> f64 {
    if angle_deg >= 180.0 {
        return f64::INFINITY;
    }
    let theta = angle_deg.to_radians();
    2.0 * (0.5 * theta).sin()
}

/// Angular separation in degrees subtended by a unit-sphere chord.
///
/// The `max(0, ..)` clamp keeps the square root defined when coincident
/// points produce a half-chord marginally above one.
pub fn angle_from_chord(chord: f64) -> f64 {
    let half = 0.5 * chord;
    let adjacent = (1.0 - half * half).max(0.0).sqrt();
    (2.0 * half.atan2(adjacent)).to_degrees()
}

/// Great-circle angular distance between two unit vectors, in radians.
pub fn angular_distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    let dot = a[0] * b[0] + a[1] * b[1] + a[2] * b[2];
    dot.clamp(-1.0, 1.0).acos()
}

/// Euclidean distance between two 3-vectors.
pub fn chord_distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    (dx * dx + dy * dy + dz * dz).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use std::f64::consts::{FRAC_PI_2, PI};

    const EPS: f64 = 1e-12;

    #[test]
    fn known_positions() {
        let cases = [
            ((0.0, 0.0), [1.0, 0.0, 0.0]),
            ((90.0, 0.0), [0.0, 1.0, 0.0]),
            ((0.0, 90.0), [0.0, 0.0, 1.0]),
            ((123.0, -90.0), [0.0, 0.0, -1.0]),
        ];
        for ((ra, dec), expected) in cases {
            let v = radec_deg_to_xyz(ra, dec);
            for i in 0..3 {
                assert_abs_diff_eq!(v[i], expected[i], epsilon = EPS);
            }
        }
    }

    #[test]
    fn projection_lands_on_unit_sphere() {
        let pts = array![[10.0, 20.0], [359.9, -89.5], [180.0, 0.0]];
        let xyz = project_radec(pts.view()).unwrap();
        assert_eq!(xyz.dim(), (3, 3));
        for row in xyz.rows() {
            let norm = (row[0] * row[0] + row[1] * row[1] + row[2] * row[2]).sqrt();
            assert_abs_diff_eq!(norm, 1.0, epsilon = EPS);
        }
    }

    #[test]
    fn projection_of_empty_set() {
        let pts = Array2::<f64>::zeros((0, 2));
        let xyz = project_radec(pts.view()).unwrap();
        assert_eq!(xyz.dim(), (0, 3));
    }

    #[test]
    fn projection_rejects_wrong_width() {
        let pts = Array2::<f64>::zeros((4, 3));
        let err = project_radec(pts.view()).unwrap_err();
        assert!(matches!(err, CrossmatchError::NotRaDec { columns: 3 }));
    }

    #[test]
    fn nan_position_projects_to_nan() {
        let pts = array![[f64::NAN, 10.0]];
        let xyz = project_radec(pts.view()).unwrap();
        assert!(xyz[[0, 0]].is_nan());
    }

    #[test]
    fn chord_angle_round_trip() {
        for angle in [0.0, 1e-7, 1.0 / 3600.0, 0.5, 10.0, 90.0, 135.0, 179.0] {
            let chord = chord_from_angle(angle);
            assert_abs_diff_eq!(angle_from_chord(chord), angle, epsilon = 1e-9);
        }
    }

    #[test]
    fn chord_agrees_with_law_of_cosines() {
        for angle in [0.5, 10.0, 90.0, 170.0] {
            let theta: f64 = f64::to_radians(angle);
            let law = (2.0 - 2.0 * theta.cos()).sqrt();
            assert_abs_diff_eq!(chord_from_angle(angle), law, epsilon = 1e-12);
        }
    }

    #[test]
    fn whole_sphere_radius_is_infinite() {
        assert!(chord_from_angle(180.0).is_infinite());
        assert!(chord_from_angle(f64::INFINITY).is_infinite());
        assert_abs_diff_eq!(chord_from_angle(90.0), 2f64.sqrt(), epsilon = EPS);
    }

    #[test]
    fn overshooting_chord_is_clamped() {
        // half-chord slightly above one must not yield NaN
        let angle = angle_from_chord(2.0 + 1e-12);
        assert!(angle.is_finite());
        assert_abs_diff_eq!(angle, 180.0, epsilon = 1e-4);
    }

    #[test]
    fn resolved_separation_matches_great_circle() {
        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut rng = || -> f64 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state as f64) / (u64::MAX as f64)
        };

        for _ in 0..500 {
            let a = radec_to_xyz(rng() * 2.0 * PI, (rng() - 0.5) * PI);
            let b = radec_to_xyz(rng() * 2.0 * PI, (rng() - 0.5) * PI);
            let truth = angular_distance(a, b).to_degrees();
            let resolved = angle_from_chord(chord_distance(a, b));
            assert_abs_diff_eq!(resolved, truth, epsilon = 1e-6);
        }
    }

    #[test]
    fn angular_distance_known() {
        let a = radec_to_xyz(0.0, 0.0);
        let b = radec_to_xyz(FRAC_PI_2, 0.0);
        assert_abs_diff_eq!(angular_distance(a, b), FRAC_PI_2, epsilon = EPS);
        assert_abs_diff_eq!(angular_distance(a, a), 0.0, epsilon = EPS);
        let np = radec_to_xyz(0.0, FRAC_PI_2);
        let sp = radec_to_xyz(0.0, -FRAC_PI_2);
        assert_abs_diff_eq!(angular_distance(np, sp), PI, epsilon = EPS);
    }
}
