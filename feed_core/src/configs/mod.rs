//! # Configuration Modules
//!
//! Runtime configuration of the feed controller.

/// Controller settings with serde defaults and validation.
pub mod controller_config;
