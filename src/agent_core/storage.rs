//! Binary-object storage collaborator.
//!
//! Tool outputs such as screenshots are uploaded here and referenced by URL
//! in events and in the text fed back to the model.

use std::path::PathBuf;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::errors::AgentError;

/// Upload bytes and get back a public URL.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    async fn upload(
        &self,
        bytes: &[u8],
        mime_type: &str,
        session_id: &str,
        message_id: &str,
    ) -> Result<String, AgentError>;
}

// ─── LocalBlobStorage ───────────────────────────────────────────────────────

/// Writes blobs to `<dir>/<session>/<message>/<sha256>.<ext>`.
///
/// Content-addressed, so uploading the same bytes twice is a no-op that
/// returns the same URL.
pub struct LocalBlobStorage {
    dir: PathBuf,
    public_base_url: String,
}

impl LocalBlobStorage {
    pub fn new(dir: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl BlobStorage for LocalBlobStorage {
    async fn upload(
        &self,
        bytes: &[u8],
        mime_type: &str,
        session_id: &str,
        message_id: &str,
    ) -> Result<String, AgentError> {
        let session = path_segment(session_id)?;
        let message = path_segment(message_id)?;

        let hash = Sha256::digest(bytes);
        let file_name = format!("{hash:x}.{}", extension_for(mime_type));

        let target_dir = self.dir.join(session).join(message);
        tokio::fs::create_dir_all(&target_dir).await?;

        let path = target_dir.join(&file_name);
        if !tokio::fs::try_exists(&path).await? {
            // Unique temp name: identical uploads may race on the same target
            let tmp_name = format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4());
            let tmp_path = target_dir.join(tmp_name);
            tokio::fs::write(&tmp_path, bytes).await?;
            tokio::fs::rename(&tmp_path, &path).await?;
        }

        tracing::debug!(
            path = %path.display(),
            bytes = bytes.len(),
            mime_type = %mime_type,
            "stored blob"
        );
        Ok(format!(
            "{}/{session}/{message}/{file_name}",
            self.public_base_url
        ))
    }
}

/// Reject ids that would escape the storage directory.
fn path_segment(id: &str) -> Result<&str, AgentError> {
    let valid = !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(id)
    } else {
        Err(AgentError::StorageError {
            reason: format!("invalid path segment '{id}'"),
        })
    }
}

/// File extension for a mime type; `bin` when unknown.
fn extension_for(mime_type: &str) -> &'static str {
    let essence = mime_type.split(';').next().unwrap_or_default().trim();
    match essence.to_ascii_lowercase().as_str() {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/ogg" => "ogg",
        "application/pdf" => "pdf",
        "application/json" => "json",
        "text/plain" => "txt",
        _ => "bin",
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
