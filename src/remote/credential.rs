//! Service-account credential staging.
//!
//! The credential JSON is checked for the fields a service account key must carry and
//! copied to a private temporary file for the OAuth library to read. The copy is removed
//! when the [`CredentialFile`] is dropped.

use crate::error::SheetPushError;
use serde::Deserialize;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

#[derive(Deserialize)]
struct ServiceAccountShape {
    #[serde(rename = "type")]
    kind: Option<String>,
    client_email: Option<String>,
    private_key: Option<String>,
    token_uri: Option<String>,
}

pub struct CredentialFile {
    file: NamedTempFile,
    client_email: String,
}

impl CredentialFile {
    /// Validates credential JSON and stages it on local storage.
    pub fn stage(bytes: &[u8]) -> Result<CredentialFile, SheetPushError> {
        let shape: ServiceAccountShape = serde_json::from_slice(bytes)
            .map_err(|e| SheetPushError::Validation(format!("credential is not valid JSON: {e}")))?;
        if shape.kind.as_deref() != Some("service_account") {
            return Err(SheetPushError::Validation(
                "credential must be a service account key (\"type\": \"service_account\")".to_owned(),
            ));
        }
        let missing: Vec<&str> = [
            ("client_email", &shape.client_email),
            ("private_key", &shape.private_key),
            ("token_uri", &shape.token_uri),
        ]
        .into_iter()
        .filter(|(_, value)| value.as_deref().map(str::is_empty).unwrap_or(true))
        .map(|(name, _)| name)
        .collect();
        if !missing.is_empty() {
            return Err(SheetPushError::Validation(format!(
                "credential is missing {}",
                missing.join(", ")
            )));
        }

        let mut file = tempfile::Builder::new()
            .prefix("sheet-push-credential-")
            .suffix(".json")
            .tempfile()?;
        file.write_all(bytes)?;
        file.flush()?;
        let client_email = shape.client_email.unwrap_or_default();
        debug!(account = client_email.as_str(), path = ?file.path(), "Staged credential");
        Ok(CredentialFile { file, client_email })
    }

    /// Reads, validates and stages a credential file.
    pub fn from_path(path: &Path) -> Result<CredentialFile, SheetPushError> {
        let bytes = std::fs::read(path)
            .map_err(|e| SheetPushError::Validation(format!("cannot read credential '{}': {e}", path.display())))?;
        CredentialFile::stage(&bytes)
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Service account the uploads will be owned by
    pub fn client_email(&self) -> &str {
        &self.client_email
    }
}
