//! `armlink-perception` – camera geometry for the relay.
//!
//! Turns 2-D image detections into 3-D points in the robot base frame.
//!
//! # Modules
//!
//! - [`calibration`] – [`CalibrationProfile`][calibration::CalibrationProfile]:
//!   immutable camera intrinsics, lens distortion and camera→base extrinsics,
//!   exposing the stage-separated `undistort → pixel_to_camera →
//!   camera_to_base` pipeline and its composition
//!   [`pixel_to_base`][calibration::CalibrationProfile::pixel_to_base].

pub mod calibration;

pub use calibration::{CalibrationError, CalibrationProfile, Distortion, Mat3, Vec3};
