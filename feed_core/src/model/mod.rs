//! # Feed Data Model
//!
//! Wire-compatible records exchanged with the detection backend.

/// The detection record, its vehicle classification and plate corrections.
pub mod detection;

pub use detection::{Detection, PlateCorrection, VehicleType};
