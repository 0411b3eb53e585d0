//! Remote file session
//!
//! One session per host, scoped to a current remote path. Listings are
//! fetched fresh on every navigation (including to the same path),
//! sorted directories-first, and get a synthetic ".." entry outside the
//! root. Entry activation is debounced: rapid duplicate triggers of the
//! panel or of a directory entry collapse to the last one, which
//! resolves its target only after the wait ends.

mod editor;
pub(crate) mod transfer;

pub use editor::{language_for_path, EditorBuffer};
pub use transfer::percentage;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::api::types::{DirEntry, EntryKind};
use crate::api::ApiClient;
use crate::error::{ConsoleError, Result};
use crate::events::{EventBus, Severity};

/// Session root: the remote user's home directory.
pub const ROOT_PATH: &str = ".";

pub fn is_root(path: &str) -> bool {
    path == ROOT_PATH || path == "/"
}

/// Join a name onto a remote directory path.
pub fn join_remote_path(base: &str, name: &str) -> String {
    if name.starts_with('/') {
        return name.to_string();
    }
    let base = base.trim_end_matches('/');
    if base.is_empty() || base == "." {
        name.to_string()
    } else {
        format!("{}/{}", base, name)
    }
}

/// Parent of a remote path, clamped at the root.
pub fn parent_path(path: &str) -> String {
    if is_root(path) {
        return path.to_string();
    }
    match path.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) => "/".to_string(),
        Some((parent, _)) => parent.to_string(),
        None => ROOT_PATH.to_string(),
    }
}

/// Directories before files, each group ascending by name.
fn sort_entries(entries: &mut [DirEntry]) {
    entries.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.name.cmp(&b.name)));
}

pub struct FileSession {
    host_id: i64,
    api: Arc<ApiClient>,
    events: EventBus,
    debounce: Duration,
    current_path: RwLock<String>,
    entries: RwLock<Vec<DirEntry>>,
    /// Bumped on every activation; a debounce sleep only proceeds if
    /// its generation is still current when it wakes.
    activation_gen: AtomicU64,
}

impl FileSession {
    pub fn new(api: Arc<ApiClient>, events: EventBus, host_id: i64, debounce_ms: u64) -> Self {
        Self {
            host_id,
            api,
            events,
            debounce: Duration::from_millis(debounce_ms),
            current_path: RwLock::new(ROOT_PATH.to_string()),
            entries: RwLock::new(Vec::new()),
            activation_gen: AtomicU64::new(0),
        }
    }

    pub fn host_id(&self) -> i64 {
        self.host_id
    }

    pub fn current_path(&self) -> String {
        self.current_path.read().clone()
    }

    /// Last fetched listing, synthetic ".." included.
    pub fn entries(&self) -> Vec<DirEntry> {
        self.entries.read().clone()
    }

    /// Debounced activation: waits out the debounce window, then lists
    /// the current path. Returns `Ok(false)` when a newer activation
    /// superseded this one during the wait.
    pub async fn activate(&self) -> Result<bool> {
        let generation = self.activation_gen.fetch_add(1, Ordering::AcqRel) + 1;
        tokio::time::sleep(self.debounce).await;
        if self.activation_gen.load(Ordering::Acquire) != generation {
            debug!("activation superseded, skipping listing");
            return Ok(false);
        }
        let path = self.current_path();
        self.list(&path).await?;
        Ok(true)
    }

    /// Fetch and store the listing for `path`. Always hits the backend,
    /// even when `path` equals the current path.
    pub async fn list(&self, path: &str) -> Result<Vec<DirEntry>> {
        let mut entries = self.api.file_list(self.host_id, path).await?;
        sort_entries(&mut entries);
        if !is_root(path) {
            entries.insert(
                0,
                DirEntry {
                    name: "..".to_string(),
                    kind: EntryKind::Directory,
                },
            );
        }
        *self.current_path.write() = path.to_string();
        *self.entries.write() = entries.clone();
        Ok(entries)
    }

    /// Follow a listed entry: ".." goes up, directories descend. The
    /// debounce runs before the target is computed, so a double trigger
    /// of the same entry collapses to one navigation instead of
    /// descending twice. Returns `Ok(None)` when a newer activation
    /// superseded this one during the wait.
    pub async fn enter(&self, name: &str) -> Result<Option<Vec<DirEntry>>> {
        let generation = self.activation_gen.fetch_add(1, Ordering::AcqRel) + 1;
        tokio::time::sleep(self.debounce).await;
        if self.activation_gen.load(Ordering::Acquire) != generation {
            debug!("entry activation superseded, skipping");
            return Ok(None);
        }
        let target = if name == ".." {
            parent_path(&self.current_path())
        } else {
            join_remote_path(&self.current_path(), name)
        };
        self.list(&target).await.map(Some)
    }

    async fn refresh(&self) -> Result<()> {
        let path = self.current_path();
        self.list(&path).await?;
        Ok(())
    }

    /// Load a file into an editor buffer.
    pub async fn read(&self, name: &str) -> Result<EditorBuffer> {
        let path = join_remote_path(&self.current_path(), name);
        let content = self.api.file_read(self.host_id, &path).await?;
        Ok(EditorBuffer::new(path, content))
    }

    /// Write an editor buffer back. On success the buffer goes clean;
    /// on failure it stays open and dirty so nothing is lost.
    pub async fn write(&self, buffer: &mut EditorBuffer) -> Result<()> {
        let ack = self
            .api
            .file_write(self.host_id, &buffer.path, &buffer.content)
            .await?;
        if !ack.success {
            self.events
                .notify(Severity::Error, format!("Save failed: {}", ack.message));
            return Err(ConsoleError::Api {
                status: 200,
                message: ack.message,
            });
        }
        buffer.mark_clean();
        self.events.notify(Severity::Success, "File saved");
        Ok(())
    }

    pub async fn mkdir(&self, name: &str) -> Result<()> {
        let path = join_remote_path(&self.current_path(), name);
        self.crud(self.api.file_mkdir(self.host_id, &path).await, "Create folder")
            .await
    }

    /// Create an empty file, then open it in the editor.
    pub async fn touch(&self, name: &str) -> Result<EditorBuffer> {
        let path = join_remote_path(&self.current_path(), name);
        self.crud(self.api.file_touch(self.host_id, &path).await, "Create file")
            .await?;
        Ok(EditorBuffer::new(path, String::new()))
    }

    pub async fn delete(&self, entry: &DirEntry) -> Result<()> {
        let path = join_remote_path(&self.current_path(), &entry.name);
        let is_dir = entry.kind == EntryKind::Directory;
        self.crud(
            self.api.file_delete(self.host_id, &path, is_dir).await,
            "Delete",
        )
        .await
    }

    pub async fn rename(&self, old_name: &str, new_name: &str) -> Result<()> {
        let current = self.current_path();
        let old_path = join_remote_path(&current, old_name);
        let new_path = join_remote_path(&current, new_name);
        self.crud(
            self.api.file_rename(self.host_id, &old_path, &new_path).await,
            "Rename",
        )
        .await
    }

    /// Common tail for single request/response mutations: a failed ack
    /// surfaces the server message and leaves the listing untouched; a
    /// success refreshes it.
    async fn crud(
        &self,
        result: Result<crate::api::types::Ack>,
        what: &str,
    ) -> Result<()> {
        match result {
            Ok(ack) if ack.success => {
                info!("{} ok on host {}", what, self.host_id);
                self.refresh().await?;
                Ok(())
            }
            Ok(ack) => {
                self.events
                    .notify(Severity::Error, format!("{} failed: {}", what, ack.message));
                Err(ConsoleError::Api {
                    status: 200,
                    message: ack.message,
                })
            }
            Err(e) => {
                self.events
                    .notify(Severity::Error, format!("{} failed: {}", what, e));
                Err(e)
            }
        }
    }

    /// Push a local file into the current remote directory, publishing
    /// byte-level progress. Success refreshes the listing.
    pub async fn upload(&self, local_path: &Path) -> Result<()> {
        let remote_dir = self.current_path();
        transfer::upload_with_progress(
            &self.api,
            &self.events,
            self.host_id,
            &remote_dir,
            local_path,
        )
        .await?;
        self.refresh().await
    }

    /// Direct resource URL for downloading a listed file.
    pub fn download_url(&self, name: &str) -> String {
        let path = join_remote_path(&self.current_path(), name);
        self.api.file_download_url(self.host_id, &path)
    }
}
