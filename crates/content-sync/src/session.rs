//! Transport session: version lookups and archive downloads.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, info, warn};
use ulid::Ulid;

use content_core::{
    CatalogSource, ContentConfig, ContentError, InstallPriority, Result, Transport,
};

use crate::extract::extract_archive;

/// Fractional progress callback, called with values in `[0, 1]`.
pub type Progress = Arc<dyn Fn(f32) + Send + Sync>;

/// Index field holding the current catalog version.
const VERSION_FIELD: &str = "catalogVersion";

/// Name of the directory inside a download's scratch dir holding the
/// extracted archive.
const EXTRACTED_DIR: &str = "extracted";

struct Registration {
    progress: Progress,
    last: f32,
}

/// An extracted archive in scratch space.
///
/// The scratch directory is removed when this value is dropped, whether or
/// not its contents were moved into place.
#[derive(Debug)]
pub struct DownloadedArchive {
    scratch: TempDir,
    expected_file: String,
}

impl DownloadedArchive {
    /// Directory holding the extracted entries.
    pub fn contents_dir(&self) -> PathBuf {
        self.scratch.path().join(EXTRACTED_DIR)
    }

    /// The well-known file verified to exist after extraction.
    pub fn file_path(&self) -> PathBuf {
        self.contents_dir().join(&self.expected_file)
    }
}

/// Tracks one unit of in-flight work until dropped.
pub struct WorkGuard<'a> {
    session: &'a Session,
}

impl Drop for WorkGuard<'_> {
    fn drop(&mut self) {
        if self.session.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.session.idle.notify_waiters();
        }
    }
}

/// Shared entry point for all network work.
///
/// Each transfer registers its progress callback under a fresh request id,
/// so concurrent transfers never report into each other's callbacks. The
/// registration is removed when the transfer ends.
pub struct Session {
    transport: Arc<dyn Transport>,
    index_path: String,
    scratch_dir: PathBuf,
    registry: Mutex<HashMap<Ulid, Registration>>,
    download_slots: Semaphore,
    in_flight: AtomicUsize,
    idle: Notify,
}

impl Session {
    pub fn new(transport: Arc<dyn Transport>, config: &ContentConfig, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            transport,
            index_path: config.remote.index_path.clone(),
            scratch_dir: scratch_dir.into(),
            registry: Mutex::new(HashMap::new()),
            download_slots: Semaphore::new(config.transfer.max_concurrent_downloads.max(1)),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    /// Count a unit of work as in flight until the guard is dropped.
    pub fn track(&self) -> WorkGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        WorkGuard { session: self }
    }

    /// Number of units of work currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Resolve once no work is in flight.
    ///
    /// Must not be awaited from inside tracked work; it would wait on itself.
    pub async fn wait_until_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Number of progress registrations currently held.
    pub fn active_registrations(&self) -> usize {
        self.registry.lock().map(|registry| registry.len()).unwrap_or(0)
    }

    /// Ask a source which catalog version is current.
    pub async fn fetch_version(&self, source: &CatalogSource) -> Result<i64> {
        let _work = self.track();

        let url = source.resource_url(&self.index_path);
        let body = self.transport.get(&url).await?;

        let index: serde_json::Value = serde_json::from_slice(&body)
            .map_err(|e| ContentError::decode(format!("Malformed index at {}: {}", url, e)))?;

        let version = index
            .get(VERSION_FIELD)
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| {
                ContentError::decode(format!("Index at {} has no integer {}", url, VERSION_FIELD))
            })?;

        debug!("Source {} reports catalog version {}", source.name, version);
        Ok(version)
    }

    /// Download the archive at `url` and extract it into fresh scratch space.
    ///
    /// Fails unless `expected_file` exists at the top of the archive. Default
    /// priority downloads wait for a free slot; high priority ones start
    /// immediately.
    pub async fn download_archive(
        &self,
        url: &str,
        expected_file: &str,
        priority: InstallPriority,
        progress: Option<Progress>,
    ) -> Result<DownloadedArchive> {
        let _work = self.track();

        let _permit = match priority {
            InstallPriority::High => None,
            InstallPriority::Default => Some(
                self.download_slots
                    .acquire()
                    .await
                    .map_err(|e| ContentError::internal(e.to_string()))?,
            ),
        };

        std::fs::create_dir_all(&self.scratch_dir)?;
        let scratch = tempfile::Builder::new()
            .prefix("download-")
            .tempdir_in(&self.scratch_dir)?;
        let archive_path = scratch.path().join("archive.zip");

        let request_id = self.register(progress);
        info!("Downloading {} (request {})", url, request_id);

        let transferred = self
            .transport
            .download(url, &archive_path, &|written, total| {
                self.report_bytes(request_id, written, total)
            })
            .await;

        if transferred.is_ok() {
            self.report(request_id, 1.0);
        }
        self.unregister(request_id);
        transferred?;

        let contents = scratch.path().join(EXTRACTED_DIR);
        let source = archive_path.clone();
        let target = contents.clone();
        tokio::task::spawn_blocking(move || extract_archive(&source, &target))
            .await
            .map_err(|e| ContentError::internal(format!("Extraction task failed: {}", e)))??;

        if let Err(e) = std::fs::remove_file(&archive_path) {
            warn!("Failed to remove archive {:?}: {}", archive_path, e);
        }

        let expected = contents.join(expected_file);
        if !expected.is_file() {
            return Err(ContentError::missing_file(expected));
        }

        debug!("Extracted {} into {:?}", url, contents);
        Ok(DownloadedArchive {
            scratch,
            expected_file: expected_file.to_string(),
        })
    }

    fn register(&self, progress: Option<Progress>) -> Ulid {
        let id = Ulid::new();
        if let Some(progress) = progress {
            if let Ok(mut registry) = self.registry.lock() {
                registry.insert(id, Registration { progress, last: 0.0 });
            }
        }
        id
    }

    fn unregister(&self, id: Ulid) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.remove(&id);
        }
    }

    fn report_bytes(&self, id: Ulid, written: u64, total: Option<u64>) {
        if let Some(total) = total.filter(|total| *total > 0) {
            self.report(id, written as f32 / total as f32);
        }
    }

    /// Forward a fraction to the request's callback, clamped into `[0, 1]`
    /// and never lower than a value already reported.
    fn report(&self, id: Ulid, fraction: f32) {
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };

        let callback = {
            let Ok(mut registry) = self.registry.lock() else {
                return;
            };
            match registry.get_mut(&id) {
                Some(registration) if fraction > registration.last => {
                    registration.last = fraction;
                    Some(registration.progress.clone())
                }
                _ => None,
            }
        };

        // Call outside the lock so callbacks may re-enter the session
        if let Some(callback) = callback {
            callback(fraction);
        }
    }

    /// Scratch directory used for downloads.
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }
}
