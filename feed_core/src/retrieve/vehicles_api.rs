//! # Vehicles API
//!
//! `GET /api/vehicles?limit=N` returns the newest detections first and seeds
//! the store on start-up. `PATCH /api/vehicles/{id}/plate` stores an operator's
//! plate correction and answers with the updated detection.

use reqwest::Method;

use super::ky_http::ApiClient;
use crate::configs::controller_config::HttpOptions;
use crate::error::{CorrectionError, InitialFetchError};
use crate::model::detection::{Detection, PlateCorrection};

pub struct VehiclesApi {
    client: ApiClient,
}

impl VehiclesApi {
    pub fn new(api_url: &str, options: &HttpOptions) -> anyhow::Result<Self> {
        Ok(Self {
            client: ApiClient::new(api_url, options)?,
        })
    }

    pub fn base_url(&self) -> &str {
        self.client.base_url().as_str()
    }

    /// Fetches up to `limit` detections, newest first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<Detection>, InitialFetchError> {
        let mut url = self
            .client
            .endpoint(&["api", "vehicles"])
            .map_err(|e| InitialFetchError::Request(format!("{e:#}")))?;
        url.query_pairs_mut().append_pair("limit", &limit.to_string());

        let response = self
            .client
            .request_at::<Vec<Detection>, ()>(Method::GET, url, None)
            .await
            .map_err(|e| InitialFetchError::Request(format!("{e:#}")))?;

        match response.data {
            Some(items) if response.success => {
                log::info!("Fetched {} recent detections", items.len());
                Ok(items)
            }
            _ => Err(InitialFetchError::Rejected {
                status: response.status,
            }),
        }
    }

    /// Submits a plate correction and returns the detection as the backend
    /// now stores it. A 404 means the backend has no such detection.
    pub async fn correct_plate(
        &self,
        id: &str,
        correction: &PlateCorrection,
    ) -> Result<Detection, CorrectionError> {
        let url = self
            .client
            .endpoint(&["api", "vehicles", id, "plate"])
            .map_err(|e| CorrectionError::Request(format!("{e:#}")))?;

        let response = self
            .client
            .request_at::<Detection, _>(Method::PATCH, url, Some(correction))
            .await
            .map_err(|e| CorrectionError::Request(format!("{e:#}")))?;

        match response.data {
            Some(updated) if response.success => {
                log::info!("Plate for {} updated to {}", id, updated.plate_label());
                Ok(updated)
            }
            _ if response.status == 404 => Err(CorrectionError::UnknownDetection(id.to_string())),
            _ => Err(CorrectionError::Rejected {
                status: response.status,
                body: response.error_body.unwrap_or_default(),
            }),
        }
    }
}
