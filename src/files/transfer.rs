//! Progress-tracked file upload
//!
//! The file part streams through a byte counter, so progress events
//! reflect bytes actually handed to the transport rather than a guess.
//! Both the per-host file session upload and the dispatcher's fan-out
//! push build their multipart file part here.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::TryStreamExt;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::types::Ack;
use crate::api::ApiClient;
use crate::error::{ConsoleError, Result};
use crate::events::{ConsoleEvent, EventBus};

/// A multipart file part wired to emit `UploadProgress` as the
/// transport consumes it.
#[derive(Debug)]
pub(crate) struct TrackedPart {
    pub transfer_id: String,
    pub file_name: String,
    pub total: u64,
    pub part: reqwest::multipart::Part,
}

/// Open a local file as a counting multipart part.
pub(crate) async fn tracked_file_part(
    events: &EventBus,
    local_path: &Path,
) -> Result<TrackedPart> {
    let file_name = local_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ConsoleError::Validation("invalid file name".to_string()))?
        .to_string();

    let file = tokio::fs::File::open(local_path).await?;
    let total = file.metadata().await?.len();
    let transfer_id = Uuid::new_v4().to_string();

    let loaded = Arc::new(AtomicU64::new(0));
    let counter = loaded.clone();
    let progress_events = events.clone();
    let progress_id = transfer_id.clone();

    let stream = ReaderStream::new(file).inspect_ok(move |chunk| {
        let loaded = counter.fetch_add(chunk.len() as u64, Ordering::AcqRel) + chunk.len() as u64;
        progress_events.emit(ConsoleEvent::UploadProgress {
            transfer_id: progress_id.clone(),
            loaded,
            total,
        });
    });

    let mime = mime_guess::from_path(local_path)
        .first_or_octet_stream()
        .to_string();
    let part = reqwest::multipart::Part::stream_with_length(
        reqwest::Body::wrap_stream(stream),
        total,
    )
    .file_name(file_name.clone())
    .mime_str(&mime)?;

    Ok(TrackedPart {
        transfer_id,
        file_name,
        total,
        part,
    })
}

pub(super) async fn upload_with_progress(
    api: &ApiClient,
    events: &EventBus,
    host_id: i64,
    remote_dir: &str,
    local_path: &Path,
) -> Result<()> {
    let tracked = tracked_file_part(events, local_path).await?;

    let form = reqwest::multipart::Form::new()
        .part("file", tracked.part)
        .text("path", remote_dir.to_string());

    info!(
        "uploading {} ({} bytes) to host {} at {}",
        tracked.file_name, tracked.total, host_id, remote_dir
    );

    let outcome = async {
        let response = api
            .post(&format!("/api/sftp/{}/upload", host_id))
            .multipart(form)
            .send()
            .await?;
        let ack: Ack = api.handle(response).await?;
        if !ack.success {
            return Err(ConsoleError::Api {
                status: 200,
                message: ack.message,
            });
        }
        Ok(())
    }
    .await;

    match outcome {
        Ok(()) => {
            events.emit(ConsoleEvent::UploadFinished {
                transfer_id: tracked.transfer_id,
                error: None,
            });
            Ok(())
        }
        Err(e) => {
            warn!("upload of {} failed: {}", tracked.file_name, e);
            events.emit(ConsoleEvent::UploadFinished {
                transfer_id: tracked.transfer_id,
                error: Some(e.to_string()),
            });
            Err(e)
        }
    }
}

/// Completion ratio as an integer percentage, clamped to 100.
pub fn percentage(loaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((loaded.saturating_mul(100) / total).min(100)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage() {
        assert_eq!(percentage(0, 200), 0);
        assert_eq!(percentage(50, 200), 25);
        assert_eq!(percentage(200, 200), 100);
        // Overshoot (trailing multipart bytes) clamps
        assert_eq!(percentage(250, 200), 100);
        // Empty files complete immediately
        assert_eq!(percentage(0, 0), 100);
    }

    #[tokio::test]
    async fn test_tracked_part_sizes_from_file_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        tokio::fs::write(&path, vec![0u8; 10_000]).await.unwrap();

        let events = EventBus::new();
        let mut rx = events.subscribe();
        let tracked = tracked_file_part(&events, &path).await.unwrap();

        assert_eq!(tracked.total, 10_000);
        assert_eq!(tracked.file_name, "payload.bin");
        // Progress only flows once the transport consumes the stream
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_tracked_part_rejects_nameless_path() {
        let events = EventBus::new();
        let err = tracked_file_part(&events, Path::new("/")).await.unwrap_err();
        assert!(matches!(err, ConsoleError::Validation(_)));
    }
}
