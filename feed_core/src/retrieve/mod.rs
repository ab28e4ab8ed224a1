//! # Data Retrieval Module
//!
//! HTTP access to the detection backend.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: A generic `ApiClient` built on `reqwest` and
//!   `reqwest-middleware`, with automatic retries and exponential backoff.
//! - **`vehicles_api`**: The two vehicle endpoints the controller uses: the
//!   start-up snapshot and the plate correction.

/// Generic HTTP API client with retry middleware for resilient network requests.
pub mod ky_http;
/// Typed access to `/api/vehicles`.
pub mod vehicles_api;

pub use vehicles_api::VehiclesApi;
