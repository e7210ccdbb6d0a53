//! Security labeling client.

use std::time::Duration;

use async_trait::async_trait;
use ces_core::ClinicalResponse;
use reqwest::header::ACCEPT;

#[derive(Debug, thiserror::Error)]
pub enum LabelingError {
    #[error("Labeling service unreachable: {0}")]
    Transport(String),

    #[error("Labeling service returned status {0}")]
    Status(u16),

    #[error("Labeling service returned an unreadable body: {0}")]
    Body(String),
}

impl From<reqwest::Error> for LabelingError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Annotates a resource or bundle with security labels.
///
/// The result must keep the input's shape: a resource stays a resource, a
/// bundle stays a bundle with the same entry positions.
#[async_trait]
pub trait Labeler: Send + Sync {
    async fn label(&self, response: ClinicalResponse) -> Result<ClinicalResponse, LabelingError>;
}

/// Returns its input unchanged. Installed when labeling is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughLabeler;

#[async_trait]
impl Labeler for PassthroughLabeler {
    async fn label(&self, response: ClinicalResponse) -> Result<ClinicalResponse, LabelingError> {
        Ok(response)
    }
}

/// POSTs the response to a security labeling service.
#[derive(Debug, Clone)]
pub struct SlsLabeler {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl SlsLabeler {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Labeler for SlsLabeler {
    async fn label(&self, response: ClinicalResponse) -> Result<ClinicalResponse, LabelingError> {
        let reply = self
            .client
            .post(&self.endpoint)
            .header(ACCEPT, "application/json")
            .json(&response)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = reply.status();
        if !status.is_success() {
            return Err(LabelingError::Status(status.as_u16()));
        }

        let bytes = reply.bytes().await?;
        ClinicalResponse::from_slice(&bytes).map_err(|e| LabelingError::Body(e.to_string()))
    }
}
