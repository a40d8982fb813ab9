// * The extraction engines.
// * `FetchEngine` is the capability contract both variants satisfy; the
// * pipeline depends only on this trait, never on a concrete engine.

pub mod automated;
pub mod convergence;
pub mod fingerprint;
pub mod selector;
pub mod simple;

pub use automated::AutomatedEngine;
pub use selector::{EngineChoice, EngineFactory, EngineSelector, RuntimeEngineFactory};
pub use simple::SimpleEngine;

use crate::config::Config;
use crate::network::errors::NetworkError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;
use url::Url;

// * Which engine variant is behind the trait object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    Automated,
    Simple,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Automated => "automated",
            EngineKind::Simple => "simple",
        }
    }
}

// * Per-instance lifecycle: Uninitialized -> Ready -> TornDown, no way back.
// * A failed initialize parks the engine in a terminal Failed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Ready,
    TornDown,
    Failed,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine initialization failed: {0}")]
    Init(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("image fetch failed: {0}")]
    Fetch(String),

    #[error("content failed integrity validation: {0}")]
    Integrity(String),

    #[error("engine session unavailable: {0}")]
    Session(String),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

// * One discovered image candidate. Created during extraction; the download
// * stage fills in size/format and rewrites the filename on collision.
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub source_url: Url,
    pub suggested_filename: String,
    pub metadata: BTreeMap<String, String>,
    // * Populated only after a successful download
    pub size_bytes: Option<u64>,
    pub content_format: Option<String>,
}

impl ImageRecord {
    pub fn from_discovery(
        source_url: Url,
        index: usize,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        let suggested_filename = derive_filename(&source_url, index);
        Self {
            source_url,
            suggested_filename,
            metadata,
            size_bytes: None,
            content_format: None,
        }
    }
}

// * Derives a filename from the URL path, falling back to an indexed name
// * when the path carries no usable basename.
pub fn derive_filename(url: &Url, index: usize) -> String {
    let basename = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .unwrap_or("");

    if !basename.is_empty() && basename.contains('.') {
        basename.to_string()
    } else {
        format!("image_{:03}.jpg", index)
    }
}

// * Raw content for one fetched image
#[derive(Debug)]
pub struct FetchedContent {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

// * Counter set owned by one engine/pipeline run; merged by explicit
// * addition at phase boundaries, never shared across worker tasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineStats {
    pub found: u64,
    pub downloaded: u64,
    pub failed: u64,
    pub total_bytes: u64,
}

impl EngineStats {
    pub fn merge(&mut self, other: &EngineStats) {
        self.found += other.found;
        self.downloaded += other.downloaded;
        self.failed += other.failed;
        self.total_bytes += other.total_bytes;
    }
}

// * The capability contract. Methods take &self so one Arc'd engine can be
// * shared with the download worker pool; variants use interior locking.
#[async_trait]
pub trait FetchEngine: Send + Sync {
    fn kind(&self) -> EngineKind;

    // * One-shot session setup. Failure is terminal for this instance and
    // * triggers the pipeline-level fallback.
    async fn initialize(&self, config: &Config) -> Result<(), EngineError>;

    // * Fails soft: any error is logged and yields an empty list, never a
    // * pipeline-aborting error.
    async fn extract_images(&self, url: &str) -> Vec<ImageRecord>;

    // * Retrieves one image through whatever transport/session the engine
    // * owns (the automated engine needs its browser session cookies).
    async fn fetch_bytes(&self, record: &ImageRecord) -> Result<FetchedContent, EngineError>;

    // * Idempotent; safe to call after a partial initialize.
    async fn teardown(&self);

    fn stats(&self) -> EngineStats;
}
