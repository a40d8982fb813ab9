// * Bounded-concurrency download stage.
// * Each record is fetched through the owning engine (its session may carry
// * cookies the asset host requires), validated, and written atomically.
// * Failures stay local to their item; the pool keeps draining.

use crate::config::constants::RETRY_BACKOFF_MS;
use crate::config::DownloadSettings;
use crate::engine::{FetchEngine, FetchedContent, ImageRecord};
use crate::pipeline::retry::{retry_with_backoff, RetryPolicy};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
enum ItemError {
    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("fetch timed out")]
    Timeout,

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

// * Commutative accumulation: totals are independent of completion order
#[derive(Debug, Clone, Default)]
pub struct DownloadReport {
    pub success_count: u64,
    pub failure_count: u64,
    pub total_bytes: u64,
    // * Records that made it to disk, with size, format, and the final
    // * (possibly suffixed) filename filled in
    pub completed: Vec<ImageRecord>,
}

pub struct Downloader {
    max_concurrent: usize,
    delay: Duration,
    retry: RetryPolicy,
    fetch_timeout: Duration,
    min_bytes: u64,
}

impl Downloader {
    pub fn from_settings(settings: &DownloadSettings) -> Self {
        Self {
            max_concurrent: settings.max_concurrent_downloads.max(1),
            delay: Duration::from_secs_f64(settings.delay.max(0.0)),
            retry: RetryPolicy::new(
                settings.max_retries,
                Duration::from_millis(RETRY_BACKOFF_MS),
            ),
            fetch_timeout: Duration::from_secs(settings.timeout.max(1)),
            min_bytes: settings.min_file_bytes,
        }
    }

    pub async fn download_all(
        &self,
        engine: Arc<dyn FetchEngine>,
        records: Vec<ImageRecord>,
        dest_dir: &Path,
    ) -> Result<DownloadReport, std::io::Error> {
        tokio::fs::create_dir_all(dest_dir).await?;
        sweep_stale_partials(dest_dir).await;

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        // * Claimed names prevent two workers racing to the same free path
        let claimed: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
        let mut tasks: JoinSet<Option<ImageRecord>> = JoinSet::new();

        info!(
            "downloading {} images with concurrency {}",
            records.len(),
            self.max_concurrent
        );

        for record in records {
            let engine = Arc::clone(&engine);
            let semaphore = Arc::clone(&semaphore);
            let claimed = Arc::clone(&claimed);
            let dest = dest_dir.to_path_buf();
            let delay = self.delay;
            let retry = self.retry;
            let fetch_timeout = self.fetch_timeout;
            let min_bytes = self.min_bytes;

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return None;
                };

                let source = record.source_url.clone();
                match download_one(
                    engine.as_ref(),
                    record,
                    &dest,
                    &claimed,
                    delay,
                    &retry,
                    fetch_timeout,
                    min_bytes,
                )
                .await
                {
                    Ok(done) => {
                        debug!(
                            "downloaded {} ({} bytes as {})",
                            source,
                            done.size_bytes.unwrap_or(0),
                            done.suggested_filename
                        );
                        Some(done)
                    }
                    Err(e) => {
                        warn!("download failed for {}: {}", source, e);
                        None
                    }
                }
            });
        }

        let mut report = DownloadReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(done)) => {
                    report.success_count += 1;
                    report.total_bytes += done.size_bytes.unwrap_or(0);
                    report.completed.push(done);
                }
                Ok(None) => report.failure_count += 1,
                Err(e) => {
                    warn!("download worker panicked: {}", e);
                    report.failure_count += 1;
                }
            }
        }

        info!(
            "download stage done: {} ok, {} failed, {} bytes",
            report.success_count, report.failure_count, report.total_bytes
        );
        Ok(report)
    }
}

#[allow(clippy::too_many_arguments)]
async fn download_one(
    engine: &dyn FetchEngine,
    mut record: ImageRecord,
    dest_dir: &Path,
    claimed: &Mutex<HashSet<String>>,
    delay: Duration,
    retry: &RetryPolicy,
    fetch_timeout: Duration,
    min_bytes: u64,
) -> Result<ImageRecord, ItemError> {
    // * Politeness delay between requests
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let content = retry_with_backoff(retry, record.source_url.as_str(), || async {
        match tokio::time::timeout(fetch_timeout, engine.fetch_bytes(&record)).await {
            Ok(Ok(content)) => Ok(content),
            Ok(Err(e)) => Err(ItemError::Fetch(e.to_string())),
            Err(_) => Err(ItemError::Timeout),
        }
    })
    .await?;

    validate_content(&content, min_bytes)?;

    let path = claim_unique_path(dest_dir, &record.suggested_filename, claimed).await;
    write_atomic(&path, &content.bytes).await?;

    record.size_bytes = Some(content.bytes.len() as u64);
    record.content_format = content.content_type;
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        record.suggested_filename = name.to_string();
    }

    Ok(record)
}

// * An aborted earlier run (cancelled mid-write) may have stranded sidecar
// * files under the destination; clear them before new workers start.
async fn sweep_stale_partials(dest_dir: &Path) {
    let Ok(mut entries) = tokio::fs::read_dir(dest_dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_name().to_string_lossy().ends_with(".part") {
            debug!("removing stale partial {}", entry.path().display());
            let _ = tokio::fs::remove_file(entry.path()).await;
        }
    }
}

// * A zero-byte or suspiciously small body is an error page, not an image;
// * it must never be left on disk
fn validate_content(content: &FetchedContent, min_bytes: u64) -> Result<(), ItemError> {
    if content.bytes.is_empty() {
        return Err(ItemError::Integrity("empty response body".to_string()));
    }
    if (content.bytes.len() as u64) < min_bytes {
        return Err(ItemError::Integrity(format!(
            "{} bytes is below the {} byte floor",
            content.bytes.len(),
            min_bytes
        )));
    }
    if let Some(content_type) = &content.content_type {
        let lowered = content_type.to_ascii_lowercase();
        if lowered.starts_with("text/") || lowered.contains("html") {
            return Err(ItemError::Integrity(format!(
                "content type '{}' is not an image",
                content_type
            )));
        }
    }
    Ok(())
}

// * Appends a numeric suffix before the extension until the name is free,
// * both on disk and among names claimed by in-flight workers.
async fn claim_unique_path(
    dest_dir: &Path,
    suggested: &str,
    claimed: &Mutex<HashSet<String>>,
) -> PathBuf {
    let name = Path::new(suggested);
    let stem = name
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image");
    let extension = name.extension().and_then(|e| e.to_str());

    let mut guard = claimed.lock().await;
    let mut counter = 0_u32;
    loop {
        let candidate = if counter == 0 {
            suggested.to_string()
        } else {
            match extension {
                Some(ext) => format!("{}_{}.{}", stem, counter, ext),
                None => format!("{}_{}", stem, counter),
            }
        };

        let path = dest_dir.join(&candidate);
        let on_disk = tokio::fs::try_exists(&path).await.unwrap_or(false);
        if !on_disk && guard.insert(candidate) {
            return path;
        }
        counter += 1;
    }
}

// * Write to a sidecar .part file and rename, so a crashed or failed write
// * never leaves a corrupt artifact under the final name.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ItemError> {
    let mut part = path.as_os_str().to_owned();
    part.push(".part");
    let part = PathBuf::from(part);

    if let Err(e) = tokio::fs::write(&part, bytes).await {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(e.into());
    }
    if let Err(e) = tokio::fs::rename(&part, path).await {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(e.into());
    }
    Ok(())
}
