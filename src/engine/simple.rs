// * SimpleEngine: one GET plus a static parse of the document.
// * No script execution, so it only sees images present in the raw HTML -
// * src attributes, lazy-load data attributes, srcset candidates, and CSS
// * background url() functions. Anything injected after load needs the
// * automated engine.

use crate::config::constants::RETRY_BACKOFF_MS;
use crate::config::Config;
use crate::engine::fingerprint::Fingerprint;
use crate::engine::{
    EngineError, EngineKind, EngineState, EngineStats, FetchEngine, FetchedContent, ImageRecord,
};
use crate::network::client::PageClient;
use crate::pipeline::retry::{retry_with_backoff, RetryPolicy};
use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::{BTreeMap, HashSet};
use std::sync::{LazyLock, Mutex};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

static IMG_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img").expect("! CRITICAL: invalid img selector"));

static STYLED_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("[style]").expect("! CRITICAL: invalid [style] selector"));

static STYLE_BLOCK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("style").expect("! CRITICAL: invalid style selector"));

// * Matches url(...) functions in CSS, with or without quotes
static CSS_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"url\(\s*['"]?([^'")\s]+)['"]?\s*\)"#)
        .expect("! CRITICAL: failed to compile CSS url regex")
});

// * Lazy-load attribute names checked in priority order after src
const LAZY_SRC_ATTRIBUTES: &[&str] = &["data-src", "data-original", "data-lazy-src"];

struct SimpleSession {
    client: PageClient,
    retry: RetryPolicy,
}

pub struct SimpleEngine {
    state: Mutex<EngineState>,
    session: Mutex<Option<SimpleSession>>,
    stats: Mutex<EngineStats>,
}

impl SimpleEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EngineState::Uninitialized),
            session: Mutex::new(None),
            stats: Mutex::new(EngineStats::default()),
        }
    }

    fn session_client(&self) -> Option<(PageClient, RetryPolicy)> {
        self.session
            .lock()
            .ok()?
            .as_ref()
            .map(|s| (s.client.clone(), s.retry))
    }

    fn set_state(&self, next: EngineState) {
        if let Ok(mut state) = self.state.lock() {
            *state = next;
        }
    }

    fn current_state(&self) -> EngineState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(EngineState::Failed)
    }
}

impl Default for SimpleEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FetchEngine for SimpleEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Simple
    }

    async fn initialize(&self, config: &Config) -> Result<(), EngineError> {
        if self.current_state() != EngineState::Uninitialized {
            return Err(EngineError::Init(
                "engine already initialized or torn down".to_string(),
            ));
        }

        let mut rng = config.rng();
        let fingerprint = Fingerprint::sample(&mut rng);
        let timeout = Duration::from_secs(config.download_settings.timeout.max(1));
        let proxy = config.proxy_settings.proxy_url();

        let client = PageClient::new(&fingerprint, timeout, proxy.as_deref()).map_err(|e| {
            self.set_state(EngineState::Failed);
            EngineError::Init(e.to_string())
        })?;

        let retry = RetryPolicy::new(
            config.download_settings.max_retries,
            Duration::from_millis(RETRY_BACKOFF_MS),
        );

        if let Ok(mut session) = self.session.lock() {
            *session = Some(SimpleSession { client, retry });
        }
        self.set_state(EngineState::Ready);
        info!("simple engine initialized");
        Ok(())
    }

    async fn extract_images(&self, url: &str) -> Vec<ImageRecord> {
        let Some((client, retry)) = self.session_client() else {
            warn!("simple engine asked to extract before initialization");
            return Vec::new();
        };

        let page_url = match Url::parse(url) {
            Ok(u) => u,
            Err(e) => {
                warn!("invalid page URL '{}': {}", url, e);
                return Vec::new();
            }
        };

        info!("analyzing page: {}", url);
        let html = match retry_with_backoff(&retry, "page fetch", || client.fetch_page(url)).await
        {
            Ok(body) => body,
            Err(e) => {
                warn!("page fetch failed for {}: {}", url, e);
                return Vec::new();
            }
        };

        let records = collect_image_records(&html, &page_url);
        if let Ok(mut stats) = self.stats.lock() {
            stats.found += records.len() as u64;
        }
        info!("found {} image candidates on {}", records.len(), url);
        records
    }

    async fn fetch_bytes(&self, record: &ImageRecord) -> Result<FetchedContent, EngineError> {
        let Some((client, _)) = self.session_client() else {
            return Err(EngineError::Session(
                "simple engine not initialized".to_string(),
            ));
        };

        let (bytes, content_type) = client.fetch_bytes(record.source_url.as_str()).await?;
        Ok(FetchedContent {
            bytes,
            content_type,
        })
    }

    async fn teardown(&self) {
        if let Ok(mut session) = self.session.lock() {
            session.take();
        }
        self.set_state(EngineState::TornDown);
    }

    fn stats(&self) -> EngineStats {
        self.stats
            .lock()
            .map(|s| *s)
            .unwrap_or_default()
    }
}

// * Static harvest: every image-reference attribute in the document,
// * absolutized against the page URL and deduplicated by resolved URL.
pub(crate) fn collect_image_records(html: &str, page_url: &Url) -> Vec<ImageRecord> {
    let document = Html::parse_document(html);
    let mut seen: HashSet<String> = HashSet::new();
    let mut records: Vec<ImageRecord> = Vec::new();

    for element in document.select(&IMG_SELECTOR) {
        let candidate = element
            .value()
            .attr("src")
            .filter(|v| !v.trim().is_empty())
            .or_else(|| {
                LAZY_SRC_ATTRIBUTES
                    .iter()
                    .find_map(|attr| element.value().attr(attr))
                    .filter(|v| !v.trim().is_empty())
            })
            .map(|v| v.to_string())
            .or_else(|| {
                element
                    .value()
                    .attr("srcset")
                    .or_else(|| element.value().attr("data-srcset"))
                    .and_then(first_srcset_candidate)
            });

        let Some(raw) = candidate else { continue };

        let mut metadata = BTreeMap::new();
        for attr in ["alt", "title", "width", "height"] {
            if let Some(value) = element.value().attr(attr) {
                if !value.is_empty() {
                    metadata.insert(attr.to_string(), value.to_string());
                }
            }
        }

        push_candidate(&raw, page_url, &mut seen, &mut records, metadata);
    }

    // * CSS background images: inline style attributes first
    for element in document.select(&STYLED_SELECTOR) {
        if let Some(style) = element.value().attr("style") {
            for capture in CSS_URL_REGEX.captures_iter(style) {
                push_candidate(&capture[1], page_url, &mut seen, &mut records, BTreeMap::new());
            }
        }
    }

    // * ...then <style> blocks
    for element in document.select(&STYLE_BLOCK_SELECTOR) {
        let css: String = element.text().collect();
        for capture in CSS_URL_REGEX.captures_iter(&css) {
            push_candidate(&capture[1], page_url, &mut seen, &mut records, BTreeMap::new());
        }
    }

    records
}

// * Extracts the first URL out of a srcset attribute
fn first_srcset_candidate(srcset: &str) -> Option<String> {
    srcset
        .split(',')
        .next()
        .and_then(|entry| entry.split_whitespace().next())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

fn push_candidate(
    raw: &str,
    page_url: &Url,
    seen: &mut HashSet<String>,
    records: &mut Vec<ImageRecord>,
    metadata: BTreeMap<String, String>,
) {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with("data:") || trimmed.starts_with("blob:") {
        return;
    }

    let Ok(resolved) = page_url.join(trimmed) else {
        return;
    };

    if !seen.insert(resolved.to_string()) {
        return;
    }

    let index = records.len() + 1;
    records.push(ImageRecord::from_discovery(resolved, index, metadata));
}
