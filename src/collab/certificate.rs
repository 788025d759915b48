use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::files::{FileStore, FileStoreError};
use crate::model::RequestSubmission;

#[derive(Debug, thiserror::Error)]
pub enum CertificateError {
    #[error("certificate could not be stored: {0}")]
    Storage(#[from] FileStoreError),
    #[error("certificate could not be rendered: {0}")]
    Render(String),
}

/// Produces the certificate document of an approved submission and returns where it
/// was stored.
#[async_trait]
pub trait CertificateGenerator: Send + Sync {
    async fn generate(&self, submission: &RequestSubmission) -> Result<String, CertificateError>;
}

/// Writes a JSON manifest that the certificate renderer picks up.
pub struct ManifestCertificateGenerator {
    files: Arc<dyn FileStore>,
}

impl ManifestCertificateGenerator {
    pub fn new(files: Arc<dyn FileStore>) -> Self {
        Self { files }
    }
}

#[async_trait]
impl CertificateGenerator for ManifestCertificateGenerator {
    async fn generate(&self, submission: &RequestSubmission) -> Result<String, CertificateError> {
        let manifest = json!({
            "reference_code": submission.reference_code,
            "request_type_id": submission.request_type_id,
            "requester_id": submission.requester_id,
            "status": submission.status,
            "form_data": submission.form_data,
            "leave": submission.leave,
            "issued_at": submission.updated_at,
        });
        let bytes = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| CertificateError::Render(e.to_string()))?;

        let filename = format!("certificate-{}.json", submission.reference_code);
        Ok(self.files.store(&bytes, &filename).await?)
    }
}
