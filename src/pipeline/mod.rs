// * The composition root: select engine -> initialize -> extract ->
// * download -> teardown, aggregating statistics. Thin by design; the
// * complexity lives in the engines and the download stage.

pub mod downloader;
pub mod retry;

pub use downloader::{DownloadReport, Downloader};

use crate::config::Config;
use crate::engine::{
    EngineChoice, EngineFactory, EngineKind, EngineSelector, EngineStats, FetchEngine,
    RuntimeEngineFactory,
};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no engine could be initialized: {0}")]
    Init(String),

    #[error("extraction produced no images")]
    NoImages,

    #[error("run exceeded its {0:?} time budget")]
    Timeout(Duration),

    #[error("destination directory error: {0}")]
    Io(#[from] std::io::Error),
}

// * Summary of one pipeline run
#[derive(Debug, Clone, Copy)]
pub struct RunStats {
    pub engine: EngineKind,
    pub fallback_used: bool,
    pub stats: EngineStats,
    pub elapsed: Duration,
}

struct DriveOutcome {
    kind: EngineKind,
    fallback_used: bool,
    stats: EngineStats,
}

pub struct Pipeline {
    config: Config,
    factory: Arc<dyn EngineFactory>,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Self::with_factory(config, Arc::new(RuntimeEngineFactory))
    }

    // * Factory injection point for tests
    pub fn with_factory(config: Config, factory: Arc<dyn EngineFactory>) -> Self {
        Self { config, factory }
    }

    pub async fn run(
        &self,
        url: &str,
        dest_dir: &Path,
        override_choice: Option<EngineChoice>,
    ) -> Result<RunStats, PipelineError> {
        let started = Instant::now();
        let kind = EngineSelector::resolve(override_choice, &self.config);

        // * The active engine is parked here so teardown happens on every
        // * exit path, including a run-level timeout cancelling the work.
        let active: Arc<Mutex<Option<Arc<dyn FetchEngine>>>> = Arc::new(Mutex::new(None));

        let budget = self.config.run_timeout_seconds.map(Duration::from_secs);
        let result = match budget {
            Some(limit) => {
                match tokio::time::timeout(limit, self.drive(kind, url, dest_dir, &active)).await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(PipelineError::Timeout(limit)),
                }
            }
            None => self.drive(kind, url, dest_dir, &active).await,
        };

        // * Resource release is unconditional
        if let Some(engine) = active.lock().await.take() {
            engine.teardown().await;
        }

        let outcome = result?;
        Ok(RunStats {
            engine: outcome.kind,
            fallback_used: outcome.fallback_used,
            stats: outcome.stats,
            elapsed: started.elapsed(),
        })
    }

    async fn drive(
        &self,
        initial_kind: EngineKind,
        url: &str,
        dest_dir: &Path,
        active: &Mutex<Option<Arc<dyn FetchEngine>>>,
    ) -> Result<DriveOutcome, PipelineError> {
        let mut kind = initial_kind;
        let mut fallback_used = false;

        let mut engine = self.factory.create(kind);
        *active.lock().await = Some(Arc::clone(&engine));

        if let Err(e) = engine.initialize(&self.config).await {
            warn!("{} engine failed to initialize: {}", kind.as_str(), e);
            let Some(fallback) = EngineSelector::fallback(kind, &self.config) else {
                return Err(PipelineError::Init(e.to_string()));
            };

            // * Single-shot downgrade, never a retry loop
            engine.teardown().await;
            info!("falling back to {} engine", fallback.as_str());
            fallback_used = true;
            kind = fallback;
            engine = self.factory.create(kind);
            *active.lock().await = Some(Arc::clone(&engine));

            if let Err(e) = engine.initialize(&self.config).await {
                return Err(PipelineError::Init(e.to_string()));
            }
        }

        let mut records = engine.extract_images(url).await;

        if records.is_empty() && !fallback_used {
            if let Some(fallback) = EngineSelector::fallback(kind, &self.config) {
                warn!(
                    "{} engine found no images; retrying once with {} engine",
                    kind.as_str(),
                    fallback.as_str()
                );
                engine.teardown().await;
                fallback_used = true;
                kind = fallback;
                engine = self.factory.create(kind);
                *active.lock().await = Some(Arc::clone(&engine));

                if let Err(e) = engine.initialize(&self.config).await {
                    return Err(PipelineError::Init(e.to_string()));
                }
                records = engine.extract_images(url).await;
            }
        }

        if records.is_empty() {
            return Err(PipelineError::NoImages);
        }

        let downloader = Downloader::from_settings(&self.config.download_settings);
        let report = downloader
            .download_all(Arc::clone(&engine), records, dest_dir)
            .await?;

        // * Merge the download report into the engine's discovery counters
        let mut stats = engine.stats();
        stats.downloaded = report.success_count;
        stats.failed = report.failure_count;
        stats.total_bytes = report.total_bytes;

        Ok(DriveOutcome {
            kind,
            fallback_used,
            stats,
        })
    }
}
