//! Camera calibration model.
//!
//! A [`CalibrationProfile`] bundles the camera intrinsic matrix `K`, the
//! Brown–Conrady lens distortion coefficients and the fixed rigid transform
//! (`R`, `T`) from the camera frame to the robot base frame.  It is
//! validated once at construction and immutable afterwards.
//!
//! The pixel → base conversion is kept as three separate stages so that each
//! can be tested on its own and a non-zero distortion profile needs no
//! structural change:
//!
//! ```text
//! (u, v) ──undistort──▶ (u', v') ──K⁻¹·depth──▶ camera ──R·p + T──▶ base
//! ```
//!
//! # Example
//!
//! ```rust
//! use armlink_perception::calibration::{CalibrationProfile, Distortion, Mat3, Vec3};
//!
//! let profile = CalibrationProfile::new(
//!     Mat3::new([[900.0, 0.0, 640.0], [0.0, 900.0, 360.0], [0.0, 0.0, 1.0]]),
//!     Distortion::none(),
//!     Mat3::diag(1.0, -1.0, -1.0),
//!     Vec3::new(0.16, 1.03, 0.416),
//! )
//! .unwrap();
//!
//! // The principal point projects straight down the optical axis.
//! let p = profile.pixel_to_base(640.0, 360.0, 0.42).unwrap();
//! assert!((p.x - 0.16).abs() < 1e-9);
//! assert!((p.y - 1.03).abs() < 1e-9);
//! assert!((p.z + 0.004).abs() < 1e-9);
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Fixed-point iterations used to invert the distortion model.
const UNDISTORT_ITERATIONS: usize = 5;

/// Largest tolerated deviation of `R·Rᵀ` from the identity.
const ORTHONORMAL_TOLERANCE: f64 = 1e-6;

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("intrinsic matrix is not invertible (determinant {determinant})")]
    SingularIntrinsics { determinant: f64 },

    #[error("{0} contains a non-finite value")]
    NonFinite(&'static str),

    #[error("rotation matrix is not orthonormal (max |R·Rᵀ − I| = {deviation})")]
    RotationNotOrthonormal { deviation: f64 },

    #[error("depth must be finite, got {0}")]
    NonFiniteDepth(f64),
}

// ────────────────────────────────────────────────────────────────────────────
// Primitive types
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D vector.  Serialized as `[x, y, z]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 3]", into = "[f64; 3]")]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn scale(self, k: f64) -> Self {
        Self::new(self.x * k, self.y * k, self.z * k)
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl From<[f64; 3]> for Vec3 {
    fn from([x, y, z]: [f64; 3]) -> Self {
        Self::new(x, y, z)
    }
}

impl From<Vec3> for [f64; 3] {
    fn from(v: Vec3) -> Self {
        v.to_array()
    }
}

/// A row-major 3×3 matrix.  Serialized as three rows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mat3 {
    pub rows: [[f64; 3]; 3],
}

impl Mat3 {
    pub fn new(rows: [[f64; 3]; 3]) -> Self {
        Self { rows }
    }

    pub fn identity() -> Self {
        Self::diag(1.0, 1.0, 1.0)
    }

    pub fn diag(a: f64, b: f64, c: f64) -> Self {
        Self::new([[a, 0.0, 0.0], [0.0, b, 0.0], [0.0, 0.0, c]])
    }

    /// Matrix–vector product `self · v`.
    pub fn mul_vec(&self, v: Vec3) -> Vec3 {
        let r = &self.rows;
        Vec3::new(
            r[0][0] * v.x + r[0][1] * v.y + r[0][2] * v.z,
            r[1][0] * v.x + r[1][1] * v.y + r[1][2] * v.z,
            r[2][0] * v.x + r[2][1] * v.y + r[2][2] * v.z,
        )
    }

    /// Matrix product `self · rhs`.
    pub fn mul(&self, rhs: &Self) -> Self {
        let mut out = [[0.0; 3]; 3];
        for (i, row) in out.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = (0..3).map(|k| self.rows[i][k] * rhs.rows[k][j]).sum();
            }
        }
        Self::new(out)
    }

    pub fn transpose(&self) -> Self {
        let r = &self.rows;
        Self::new([
            [r[0][0], r[1][0], r[2][0]],
            [r[0][1], r[1][1], r[2][1]],
            [r[0][2], r[1][2], r[2][2]],
        ])
    }

    pub fn determinant(&self) -> f64 {
        let r = &self.rows;
        r[0][0] * (r[1][1] * r[2][2] - r[1][2] * r[2][1])
            - r[0][1] * (r[1][0] * r[2][2] - r[1][2] * r[2][0])
            + r[0][2] * (r[1][0] * r[2][1] - r[1][1] * r[2][0])
    }

    /// Inverse via the adjugate.  Returns `None` for a singular matrix.
    pub fn inverse(&self) -> Option<Self> {
        let det = self.determinant();
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let r = &self.rows;
        let cof = |a: usize, b: usize, c: usize, d: usize| r[a][b] * r[c][d] - r[a][d] * r[c][b];
        let adj = [
            [cof(1, 1, 2, 2), -cof(0, 1, 2, 2), cof(0, 1, 1, 2)],
            [-cof(1, 0, 2, 2), cof(0, 0, 2, 2), -cof(0, 0, 1, 2)],
            [cof(1, 0, 2, 1), -cof(0, 0, 2, 1), cof(0, 0, 1, 1)],
        ];
        Some(Self::new(std::array::from_fn(|i| {
            std::array::from_fn(|j| adj[i][j] / det)
        })))
    }

    fn is_finite(&self) -> bool {
        self.rows.iter().flatten().all(|v| v.is_finite())
    }

    fn max_abs_diff(&self, other: &Self) -> f64 {
        self.rows
            .iter()
            .flatten()
            .zip(other.rows.iter().flatten())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}

/// Lens distortion coefficients in OpenCV order `[k1, k2, p1, p2, k3]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Distortion(pub [f64; 5]);

impl Distortion {
    /// A perfect pinhole lens.
    pub fn none() -> Self {
        Self([0.0; 5])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|c| *c == 0.0)
    }

    /// Apply the forward distortion model to normalized coordinates.
    pub fn distort(&self, x: f64, y: f64) -> (f64, f64) {
        let [k1, k2, p1, p2, k3] = self.0;
        let r2 = x * x + y * y;
        let radial = 1.0 + ((k3 * r2 + k2) * r2 + k1) * r2;
        (
            x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x),
            y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y,
        )
    }
}

// ────────────────────────────────────────────────────────────────────────────
// CalibrationProfile
// ────────────────────────────────────────────────────────────────────────────

/// On-disk shape of a profile, validated into a [`CalibrationProfile`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProfileFields {
    intrinsics: Mat3,
    #[serde(default)]
    distortion: Distortion,
    rotation: Mat3,
    translation: Vec3,
}

/// Camera intrinsics, distortion and camera→base extrinsics.
///
/// Construct with [`CalibrationProfile::new`] (or deserialize); both paths
/// reject singular intrinsics, non-finite entries and a non-orthonormal
/// rotation, so a profile that exists is always able to serve transforms.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "ProfileFields", into = "ProfileFields")]
pub struct CalibrationProfile {
    intrinsics: Mat3,
    intrinsics_inv: Mat3,
    distortion: Distortion,
    rotation: Mat3,
    translation: Vec3,
}

impl CalibrationProfile {
    /// Validate and build a profile.
    ///
    /// # Errors
    ///
    /// - [`CalibrationError::NonFinite`] if any input contains NaN/∞.
    /// - [`CalibrationError::SingularIntrinsics`] if `K` has no inverse.
    /// - [`CalibrationError::RotationNotOrthonormal`] if `R·Rᵀ` is not the
    ///   identity.
    pub fn new(
        intrinsics: Mat3,
        distortion: Distortion,
        rotation: Mat3,
        translation: Vec3,
    ) -> Result<Self, CalibrationError> {
        if !intrinsics.is_finite() {
            return Err(CalibrationError::NonFinite("intrinsic matrix"));
        }
        if !distortion.0.iter().all(|c| c.is_finite()) {
            return Err(CalibrationError::NonFinite("distortion coefficients"));
        }
        if !rotation.is_finite() {
            return Err(CalibrationError::NonFinite("rotation matrix"));
        }
        if !translation.is_finite() {
            return Err(CalibrationError::NonFinite("translation vector"));
        }

        let intrinsics_inv = intrinsics
            .inverse()
            .ok_or(CalibrationError::SingularIntrinsics {
                determinant: intrinsics.determinant(),
            })?;

        let deviation = rotation
            .mul(&rotation.transpose())
            .max_abs_diff(&Mat3::identity());
        if deviation > ORTHONORMAL_TOLERANCE {
            return Err(CalibrationError::RotationNotOrthonormal { deviation });
        }

        debug!(
            fx = intrinsics.rows[0][0],
            fy = intrinsics.rows[1][1],
            cx = intrinsics.rows[0][2],
            cy = intrinsics.rows[1][2],
            distorted = !distortion.is_zero(),
            "calibration profile validated"
        );

        Ok(Self {
            intrinsics,
            intrinsics_inv,
            distortion,
            rotation,
            translation,
        })
    }

    pub fn intrinsics(&self) -> &Mat3 {
        &self.intrinsics
    }

    pub fn distortion(&self) -> &Distortion {
        &self.distortion
    }

    pub fn rotation(&self) -> &Mat3 {
        &self.rotation
    }

    pub fn translation(&self) -> Vec3 {
        self.translation
    }

    /// Remove lens distortion from a pixel, returning the pixel an ideal
    /// pinhole camera with the same `K` would have observed.
    ///
    /// With all coefficients zero the input is returned unchanged, bit for
    /// bit.
    pub fn undistort(&self, u: f64, v: f64) -> (f64, f64) {
        if self.distortion.is_zero() {
            return (u, v);
        }

        let n = self.intrinsics_inv.mul_vec(Vec3::new(u, v, 1.0));
        let (x0, y0) = (n.x / n.z, n.y / n.z);
        let [k1, k2, p1, p2, k3] = self.distortion.0;

        let (mut x, mut y) = (x0, y0);
        for _ in 0..UNDISTORT_ITERATIONS {
            let r2 = x * x + y * y;
            let radial = 1.0 + ((k3 * r2 + k2) * r2 + k1) * r2;
            let dx = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
            let dy = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
            x = (x0 - dx) / radial;
            y = (y0 - dy) / radial;
        }

        let p = self.intrinsics.mul_vec(Vec3::new(x, y, 1.0));
        (p.x / p.z, p.y / p.z)
    }

    /// Back-project a pixel at the given depth into the camera frame:
    /// `K⁻¹ · [u, v, 1]ᵀ · depth`.
    ///
    /// # Errors
    ///
    /// Returns [`CalibrationError::NonFiniteDepth`] for a NaN/∞ depth.
    pub fn pixel_to_camera(&self, u: f64, v: f64, depth: f64) -> Result<Vec3, CalibrationError> {
        if !depth.is_finite() {
            return Err(CalibrationError::NonFiniteDepth(depth));
        }
        Ok(self.intrinsics_inv.mul_vec(Vec3::new(u, v, 1.0)).scale(depth))
    }

    /// Map a camera-frame point into the base frame: `R · p + T`.
    pub fn camera_to_base(&self, point: Vec3) -> Vec3 {
        self.rotation.mul_vec(point).add(self.translation)
    }

    /// Full pipeline: undistort, back-project at `depth`, move to the base
    /// frame.
    pub fn pixel_to_base(&self, u: f64, v: f64, depth: f64) -> Result<Vec3, CalibrationError> {
        let (u, v) = self.undistort(u, v);
        let camera = self.pixel_to_camera(u, v, depth)?;
        Ok(self.camera_to_base(camera))
    }
}

impl Default for CalibrationProfile {
    /// The deployed wrist camera (1280×720) on the real robot: zero
    /// distortion, camera axes flipped in Y and Z relative to the base.
    fn default() -> Self {
        Self {
            intrinsics: Mat3::new([
                [912.339721679688, 0.0, 655.437561035156],
                [0.0, 911.811584472656, 370.901947021484],
                [0.0, 0.0, 1.0],
            ]),
            intrinsics_inv: Mat3::new([
                [1.0 / 912.339721679688, 0.0, -655.437561035156 / 912.339721679688],
                [0.0, 1.0 / 911.811584472656, -370.901947021484 / 911.811584472656],
                [0.0, 0.0, 1.0],
            ]),
            distortion: Distortion::none(),
            rotation: Mat3::diag(1.0, -1.0, -1.0),
            translation: Vec3::new(0.160, 1.030, 0.416),
        }
    }
}

// The cached inverse is derived state and may differ in the last bit
// depending on how it was computed.
impl PartialEq for CalibrationProfile {
    fn eq(&self, other: &Self) -> bool {
        self.intrinsics == other.intrinsics
            && self.distortion == other.distortion
            && self.rotation == other.rotation
            && self.translation == other.translation
    }
}

impl TryFrom<ProfileFields> for CalibrationProfile {
    type Error = CalibrationError;

    fn try_from(f: ProfileFields) -> Result<Self, Self::Error> {
        Self::new(f.intrinsics, f.distortion, f.rotation, f.translation)
    }
}

impl From<CalibrationProfile> for ProfileFields {
    fn from(p: CalibrationProfile) -> Self {
        Self {
            intrinsics: p.intrinsics,
            distortion: p.distortion,
            rotation: p.rotation,
            translation: p.translation,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_profile(distortion: Distortion) -> CalibrationProfile {
        CalibrationProfile::new(
            Mat3::new([[900.0, 0.0, 640.0], [0.0, 900.0, 360.0], [0.0, 0.0, 1.0]]),
            distortion,
            Mat3::diag(1.0, -1.0, -1.0),
            Vec3::new(0.16, 1.03, 0.416),
        )
        .unwrap()
    }

    fn assert_close(actual: Vec3, expected: [f64; 3]) {
        let a = actual.to_array();
        for i in 0..3 {
            assert!(
                (a[i] - expected[i]).abs() < 1e-9,
                "component {i}: got {}, expected {}",
                a[i],
                expected[i]
            );
        }
    }

    // ── Mat3 ────────────────────────────────────────────────────────────────

    #[test]
    fn inverse_times_matrix_is_identity() {
        let k = Mat3::new([[912.3, 0.5, 655.4], [0.0, 911.8, 370.9], [0.0, 0.0, 1.0]]);
        let inv = k.inverse().unwrap();
        assert!(k.mul(&inv).max_abs_diff(&Mat3::identity()) < 1e-12);
    }

    #[test]
    fn singular_matrix_has_no_inverse() {
        let m = Mat3::new([[1.0, 2.0, 3.0], [2.0, 4.0, 6.0], [0.0, 0.0, 1.0]]);
        assert!(m.inverse().is_none());
    }

    // ── Validation ──────────────────────────────────────────────────────────

    #[test]
    fn singular_intrinsics_are_rejected() {
        let err = CalibrationProfile::new(
            Mat3::new([[0.0, 0.0, 640.0], [0.0, 900.0, 360.0], [0.0, 0.0, 1.0]]),
            Distortion::none(),
            Mat3::identity(),
            Vec3::zero(),
        )
        .unwrap_err();
        assert!(matches!(err, CalibrationError::SingularIntrinsics { .. }));
    }

    #[test]
    fn non_orthonormal_rotation_is_rejected() {
        let err = CalibrationProfile::new(
            Mat3::identity(),
            Distortion::none(),
            Mat3::diag(2.0, 1.0, 1.0),
            Vec3::zero(),
        )
        .unwrap_err();
        assert!(matches!(err, CalibrationError::RotationNotOrthonormal { .. }));
    }

    #[test]
    fn nan_translation_is_rejected() {
        let err = CalibrationProfile::new(
            Mat3::identity(),
            Distortion::none(),
            Mat3::identity(),
            Vec3::new(f64::NAN, 0.0, 0.0),
        )
        .unwrap_err();
        assert_eq!(err, CalibrationError::NonFinite("translation vector"));
    }

    #[test]
    fn default_profile_passes_validation() {
        let d = CalibrationProfile::default();
        let rebuilt =
            CalibrationProfile::new(*d.intrinsics(), *d.distortion(), *d.rotation(), d.translation())
                .unwrap();
        assert!(rebuilt.intrinsics_inv.max_abs_diff(&d.intrinsics_inv) < 1e-12);
    }

    // ── Stages ──────────────────────────────────────────────────────────────

    #[test]
    fn zero_distortion_undistort_is_exact_identity() {
        let profile = reference_profile(Distortion::none());
        for (u, v) in [(0.0, 0.0), (640.0, 360.0), (123.456, 789.012), (1279.9, 0.25)] {
            assert_eq!(profile.undistort(u, v), (u, v));
        }
    }

    #[test]
    fn undistort_inverts_forward_distortion() {
        let distortion = Distortion([-0.12, 0.03, 0.001, -0.0005, 0.0]);
        let profile = reference_profile(distortion);

        // Ideal normalized point → distorted pixel → undistort → ideal pixel.
        let (x, y) = (0.2, -0.15);
        let (xd, yd) = distortion.distort(x, y);
        let (u_d, v_d) = (900.0 * xd + 640.0, 900.0 * yd + 360.0);
        let (u, v) = profile.undistort(u_d, v_d);

        assert!((u - (900.0 * x + 640.0)).abs() < 1e-3, "u = {u}");
        assert!((v - (900.0 * y + 360.0)).abs() < 1e-3, "v = {v}");
    }

    #[test]
    fn principal_point_back_projects_onto_optical_axis() {
        let profile = reference_profile(Distortion::none());
        let cam = profile.pixel_to_camera(640.0, 360.0, 0.42).unwrap();
        assert_close(cam, [0.0, 0.0, 0.42]);
    }

    #[test]
    fn pixel_to_camera_honours_sub_pixel_offsets() {
        let profile = reference_profile(Distortion::none());
        let cam = profile.pixel_to_camera(640.5, 360.0, 1.0).unwrap();
        assert_close(cam, [0.5 / 900.0, 0.0, 1.0]);
    }

    #[test]
    fn non_finite_depth_is_rejected() {
        let profile = reference_profile(Distortion::none());
        assert!(matches!(
            profile.pixel_to_camera(0.0, 0.0, f64::INFINITY),
            Err(CalibrationError::NonFiniteDepth(_))
        ));
    }

    #[test]
    fn camera_to_base_applies_rotation_then_translation() {
        let profile = reference_profile(Distortion::none());
        let base = profile.camera_to_base(Vec3::new(0.1, 0.2, 0.3));
        assert_close(base, [0.26, 0.83, 0.116]);
    }

    // ── Composition ─────────────────────────────────────────────────────────

    #[test]
    fn pixel_to_base_at_principal_point() {
        let profile = reference_profile(Distortion::none());
        let base = profile.pixel_to_base(640.0, 360.0, 0.42).unwrap();
        assert_close(base, [0.16, 1.03, -0.004]);
    }

    #[test]
    fn pixel_to_base_is_deterministic() {
        let profile = CalibrationProfile::default();
        let a = profile.pixel_to_base(812.25, 401.75, 0.42).unwrap();
        let b = profile.pixel_to_base(812.25, 401.75, 0.42).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn pixel_to_base_matches_composed_stages() {
        let profile = reference_profile(Distortion([0.05, 0.0, 0.0, 0.0, 0.0]));
        let (u, v) = profile.undistort(700.0, 300.0);
        let staged = profile.camera_to_base(profile.pixel_to_camera(u, v, 0.5).unwrap());
        assert_eq!(profile.pixel_to_base(700.0, 300.0, 0.5).unwrap(), staged);
    }

    // ── Serde ───────────────────────────────────────────────────────────────

    #[test]
    fn profile_loads_from_toml() {
        let text = r#"
            intrinsics = [[900.0, 0.0, 640.0], [0.0, 900.0, 360.0], [0.0, 0.0, 1.0]]
            rotation = [[1.0, 0.0, 0.0], [0.0, -1.0, 0.0], [0.0, 0.0, -1.0]]
            translation = [0.16, 1.03, 0.416]
        "#;
        let profile: CalibrationProfile = toml::from_str(text).unwrap();
        assert!(profile.distortion().is_zero());
        assert_eq!(profile, reference_profile(Distortion::none()));
    }

    #[test]
    fn invalid_profile_fails_to_deserialize() {
        let text = r#"
            intrinsics = [[0.0, 0.0, 0.0], [0.0, 0.0, 0.0], [0.0, 0.0, 0.0]]
            rotation = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]
            translation = [0.0, 0.0, 0.0]
        "#;
        let err = toml::from_str::<CalibrationProfile>(text).unwrap_err();
        assert!(err.to_string().contains("not invertible"));
    }
}
