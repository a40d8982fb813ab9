// * AutomatedEngine: full script-executing rendering context via CDP.
// * Drives a page until lazy-loaded images are materialized, then harvests
// * the effective (post-responsive-selection) sources. Byte fetches reuse
// * the page's own session so cookie-bound/anti-hotlink assets resolve.

use crate::config::constants::{
    CONSENT_WAIT_MS, HARVEST_MIN_DIMENSION_PX, NAVIGATION_TIMEOUT_MS, QUIESCENCE_MAX_WAIT_MS,
    QUIESCENCE_POLL_MS, READINESS_LOADED_FRACTION, READINESS_MAX_WAIT_MS, READINESS_POLL_MS,
    READINESS_SOURCED_FRACTION,
};
use crate::config::Config;
use crate::engine::convergence::{run_convergence, ScrollPlan, ScrollSurface};
use crate::engine::fingerprint::Fingerprint;
use crate::engine::{
    EngineError, EngineKind, EngineState, EngineStats, FetchEngine, FetchedContent, ImageRecord,
};
use async_trait::async_trait;
use base64::Engine as _;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::Page;
use futures::StreamExt;
use rand::rngs::StdRng;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

// * Masks headless automation signals. Injected via
// * Page.addScriptToEvaluateOnNewDocument so it runs before any page script
// * can observe them; `__LANGS__` is filled from the fingerprint.
const STEALTH_PAYLOAD_TEMPLATE: &str = r#"
(() => {
    Object.defineProperty(navigator, 'webdriver', {
        get: () => undefined,
        configurable: true
    });

    Object.defineProperty(navigator, 'plugins', {
        get: () => {
            const plugins = [
                { name: 'Chrome PDF Plugin', filename: 'internal-pdf-viewer' },
                { name: 'Chrome PDF Viewer', filename: 'mhjfbmdgcfjbbpaeojofohoefgiehjai' },
                { name: 'Native Client', filename: 'internal-nacl-plugin' }
            ];
            plugins.item = (i) => plugins[i];
            plugins.namedItem = (name) => plugins.find(p => p.name === name);
            plugins.refresh = () => {};
            return plugins;
        },
        configurable: true
    });

    Object.defineProperty(navigator, 'languages', {
        get: () => __LANGS__,
        configurable: true
    });

    Object.defineProperty(navigator, 'hardwareConcurrency', {
        get: () => 4,
        configurable: true
    });

    const originalQuery = window.navigator.permissions.query;
    window.navigator.permissions.query = (parameters) => (
        parameters.name === 'notifications' ?
            Promise.resolve({ state: Notification.permission }) :
            originalQuery(parameters)
    );

    delete window.cdc_adoQpoasnfa76pfcZLmcfl_Array;
    delete window.cdc_adoQpoasnfa76pfcZLmcfl_Promise;
    delete window.cdc_adoQpoasnfa76pfcZLmcfl_Symbol;
})();
"#;

// * Browser launch arguments that suppress automation fingerprints
const STEALTH_LAUNCH_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-infobars",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--no-first-run",
    "--disable-background-timer-throttling",
    "--disable-backgrounding-occluded-windows",
    "--disable-renderer-backgrounding",
];

// * HTTP status of the main document, via the Navigation Timing API.
// * Returns 0 where the engine does not expose responseStatus.
const NAV_STATUS_SCRIPT: &str = r#"
(() => {
    const entries = performance.getEntriesByType('navigation');
    if (!entries.length) return 0;
    return entries[0].responseStatus || 0;
})()
"#;

// * Clicks the first visible consent/cookie affordance, if any
const CONSENT_SCRIPT: &str = r#"
(() => {
    const selectors = [
        '.cookie-accept', '#cookie-accept', '[data-testid="cookie-accept"]',
        '[id*="consent"] button', '[class*="consent"] button',
        '[id*="cookie"] button', '[class*="cookie-banner"] button'
    ];
    for (const selector of selectors) {
        const el = document.querySelector(selector);
        if (el && el.offsetParent !== null) {
            el.click();
            return true;
        }
    }
    const accepts = ['accept', 'accept all', 'agree', 'ok', 'got it'];
    for (const button of document.querySelectorAll('button, [role="button"]')) {
        const text = (button.textContent || '').trim().toLowerCase();
        if (accepts.includes(text) && button.offsetParent !== null) {
            button.click();
            return true;
        }
    }
    return false;
})()
"#;

// * Fraction of images rendered and carrying a real (non-placeholder) source
const READINESS_SCRIPT: &str = r#"
(() => {
    const imgs = Array.from(document.querySelectorAll('img'));
    if (!imgs.length) return { total: 0, loaded: 0, sourced: 0 };
    let loaded = 0, sourced = 0;
    for (const img of imgs) {
        const src = img.currentSrc || img.src || '';
        if (src && !src.startsWith('data:')) sourced += 1;
        if (img.complete && img.naturalWidth > 0) loaded += 1;
    }
    return { total: imgs.length, loaded: loaded, sourced: sourced };
})()
"#;

const RESOURCE_COUNT_SCRIPT: &str = "performance.getEntriesByType('resource').length";

// * Reads every rendered image's effective source plus advisory metadata
const HARVEST_SCRIPT: &str = r#"
(() => {
    const out = [];
    for (const img of document.querySelectorAll('img')) {
        out.push({
            src: img.currentSrc || img.src || '',
            alt: img.alt || '',
            title: img.title || '',
            width: img.width || 0,
            height: img.height || 0,
            naturalWidth: img.naturalWidth || 0,
            naturalHeight: img.naturalHeight || 0
        });
    }
    return out;
})()
"#;

#[derive(Debug, Deserialize)]
struct ReadinessSample {
    total: u32,
    loaded: u32,
    sourced: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HarvestedImage {
    pub src: String,
    #[serde(default)]
    pub alt: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub natural_width: u32,
    #[serde(default)]
    pub natural_height: u32,
}

struct Session {
    browser: Browser,
    handler_task: tokio::task::JoinHandle<()>,
    page: Page,
}

pub struct AutomatedEngine {
    state: StdMutex<EngineState>,
    session: Mutex<Option<Session>>,
    plan: StdMutex<ScrollPlan>,
    rng: Mutex<StdRng>,
    stats: StdMutex<EngineStats>,
}

impl AutomatedEngine {
    pub fn new() -> Self {
        Self {
            state: StdMutex::new(EngineState::Uninitialized),
            session: Mutex::new(None),
            plan: StdMutex::new(ScrollPlan::immediate(10)),
            rng: Mutex::new(rand::SeedableRng::seed_from_u64(0)),
            stats: StdMutex::new(EngineStats::default()),
        }
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

    fn scroll_plan(&self) -> ScrollPlan {
        self.plan
            .lock()
            .map(|p| p.clone())
            .unwrap_or_else(|_| ScrollPlan::immediate(10))
    }

    async fn launch_session(
        &self,
        config: &Config,
        fingerprint: &Fingerprint,
    ) -> Result<Session, EngineError> {
        let (width, height) = fingerprint.viewport;
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .viewport(Viewport {
                width,
                height,
                device_scale_factor: None,
                emulating_mobile: false,
                is_landscape: false,
                has_touch: false,
            });

        if !config.engine_settings.headless {
            builder = builder.with_head();
        }
        if config.engine_settings.stealth_mode {
            for arg in STEALTH_LAUNCH_ARGS {
                builder = builder.arg(*arg);
            }
        }
        if let Some(proxy) = config.proxy_settings.proxy_url() {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }

        let browser_config = builder
            .build()
            .map_err(EngineError::Init)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| EngineError::Init(format!("browser launch failed: {}", e)))?;

        let handler_task = tokio::spawn(async move {
            while let Some(_event) = handler.next().await {
                // * Drain browser events
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler_task.abort();
                return Err(EngineError::Init(format!("page creation failed: {}", e)));
            }
        };

        // * Identity override before any navigation
        let ua_params = SetUserAgentOverrideParams::builder()
            .user_agent(fingerprint.user_agent)
            .accept_language(fingerprint.accept_language)
            .build()
            .map_err(EngineError::Init)?;
        if let Err(e) = page.execute(ua_params).await {
            warn!("user-agent override failed: {}", e);
        }

        if config.engine_settings.stealth_mode {
            let langs = serde_json::json!([fingerprint.locale, "en"]).to_string();
            let payload = STEALTH_PAYLOAD_TEMPLATE.replace("__LANGS__", &langs);
            match AddScriptToEvaluateOnNewDocumentParams::builder()
                .source(payload)
                .build()
            {
                Ok(params) => {
                    if let Err(e) = page.execute(params).await {
                        warn!("stealth script injection failed: {}", e);
                    }
                }
                Err(e) => warn!("stealth script build failed: {}", e),
            }
        }

        Ok(Session {
            browser,
            handler_task,
            page,
        })
    }

    // * Best-effort consent dismissal, bounded in time
    async fn dismiss_consent(&self, page: &Page) {
        let wait = Duration::from_millis(CONSENT_WAIT_MS);
        let clicked = tokio::time::timeout(wait, eval_json::<bool>(page, CONSENT_SCRIPT))
            .await
            .ok()
            .flatten()
            .unwrap_or(false);
        if clicked {
            info!("dismissed a consent affordance");
            tokio::time::sleep(Duration::from_millis(1000)).await;
        }
    }

    // * Polls image readiness until thresholds are met or the budget elapses
    async fn wait_for_images(&self, page: &Page) {
        let deadline = Instant::now() + Duration::from_millis(READINESS_MAX_WAIT_MS);
        loop {
            if let Some(sample) = eval_json::<ReadinessSample>(page, READINESS_SCRIPT).await {
                if sample.total == 0 {
                    break;
                }
                let total = sample.total as f64;
                let loaded = sample.loaded as f64 / total;
                let sourced = sample.sourced as f64 / total;
                if loaded >= READINESS_LOADED_FRACTION && sourced >= READINESS_SOURCED_FRACTION {
                    debug!(
                        "image readiness met: {:.0}% loaded, {:.0}% sourced",
                        loaded * 100.0,
                        sourced * 100.0
                    );
                    break;
                }
            }
            if Instant::now() >= deadline {
                debug!("image readiness budget elapsed");
                break;
            }
            tokio::time::sleep(Duration::from_millis(READINESS_POLL_MS)).await;
        }

        // * One network-quiescence pass: resource count stable across samples
        let deadline = Instant::now() + Duration::from_millis(QUIESCENCE_MAX_WAIT_MS);
        let mut last_count: Option<u64> = None;
        while Instant::now() < deadline {
            let count = eval_json::<u64>(page, RESOURCE_COUNT_SCRIPT).await;
            if count.is_some() && count == last_count {
                break;
            }
            last_count = count;
            tokio::time::sleep(Duration::from_millis(QUIESCENCE_POLL_MS)).await;
        }
    }
}

impl Default for AutomatedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AutomatedEngine {
    fn drop(&mut self) {
        // * Cannot await in drop; abort the event drain at minimum
        if let Ok(mut session) = self.session.try_lock() {
            if let Some(session) = session.take() {
                session.handler_task.abort();
            }
        }
    }
}

#[async_trait]
impl FetchEngine for AutomatedEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Automated
    }

    async fn initialize(&self, config: &Config) -> Result<(), EngineError> {
        if self.current_state() != EngineState::Uninitialized {
            return Err(EngineError::Init(
                "engine already initialized or torn down".to_string(),
            ));
        }

        {
            let mut rng = self.rng.lock().await;
            *rng = config.rng();
        }
        let fingerprint = {
            let mut rng = self.rng.lock().await;
            Fingerprint::sample(&mut rng)
        };
        if let Ok(mut plan) = self.plan.lock() {
            *plan = ScrollPlan::from(&config.scroll_settings);
        }

        match self.launch_session(config, &fingerprint).await {
            Ok(session) => {
                *self.session.lock().await = Some(session);
                self.set_state(EngineState::Ready);
                info!(
                    "automated engine initialized (viewport {}x{})",
                    fingerprint.viewport.0, fingerprint.viewport.1
                );
                Ok(())
            }
            Err(e) => {
                self.set_state(EngineState::Failed);
                Err(e)
            }
        }
    }

    async fn extract_images(&self, url: &str) -> Vec<ImageRecord> {
        let session = self.session.lock().await;
        let Some(session) = session.as_ref() else {
            warn!("automated engine asked to extract before initialization");
            return Vec::new();
        };
        let page = &session.page;

        info!("navigating to {}", url);
        let nav_timeout = Duration::from_millis(NAVIGATION_TIMEOUT_MS);
        match tokio::time::timeout(nav_timeout, page.goto(url)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!("navigation failed for {}: {}", url, e);
                return Vec::new();
            }
            Err(_) => {
                warn!("navigation timed out after {:?} for {}", nav_timeout, url);
                return Vec::new();
            }
        }

        // * 0 means the engine does not report a status; only a concrete
        // * error status is a hard navigation failure
        let status = eval_json::<u16>(page, NAV_STATUS_SCRIPT).await.unwrap_or(0);
        if status >= 400 {
            warn!("page responded with HTTP {} for {}", status, url);
            return Vec::new();
        }

        self.dismiss_consent(page).await;

        let plan = self.scroll_plan();
        let surface = PageSurface { page };
        {
            let mut rng = self.rng.lock().await;
            match run_convergence(&surface, &plan, &mut rng).await {
                Ok(report) => debug!(
                    "convergence: {} sweep + {} verify steps, height {:.0}, converged={}",
                    report.sweep_steps, report.verify_steps, report.final_height, report.converged
                ),
                // * Degradation, not failure: harvest whatever did render
                Err(e) => warn!("convergence scroll degraded: {}", e),
            }
        }

        self.wait_for_images(page).await;

        let harvested = eval_json::<Vec<HarvestedImage>>(page, HARVEST_SCRIPT)
            .await
            .unwrap_or_default();

        let base = match page.url().await {
            Ok(Some(current)) => Url::parse(&current).ok(),
            _ => None,
        }
        .or_else(|| Url::parse(url).ok());

        let Some(base) = base else {
            warn!("could not establish a base URL for {}", url);
            return Vec::new();
        };

        let records = build_records(harvested, &base);
        if let Ok(mut stats) = self.stats.lock() {
            stats.found += records.len() as u64;
        }
        info!("harvested {} image candidates from {}", records.len(), url);
        records
    }

    async fn fetch_bytes(&self, record: &ImageRecord) -> Result<FetchedContent, EngineError> {
        let session = self.session.lock().await;
        let Some(session) = session.as_ref() else {
            return Err(EngineError::Session(
                "automated engine not initialized".to_string(),
            ));
        };

        // * In-session fetch: shares the page's cookies and origin, which
        // * anti-hotlink sites require
        let escaped = serde_json::to_string(record.source_url.as_str())
            .map_err(|e| EngineError::Fetch(e.to_string()))?;
        let script = format!(
            r#"
            (async () => {{
                try {{
                    const response = await fetch({url}, {{
                        method: 'GET',
                        credentials: 'include',
                        headers: {{ 'Accept': 'image/*, */*' }}
                    }});
                    if (!response.ok) {{
                        return {{ error: 'HTTP ' + response.status, status: response.status }};
                    }}
                    const contentType = response.headers.get('content-type') || '';
                    const buffer = await response.arrayBuffer();
                    const bytes = new Uint8Array(buffer);
                    let binary = '';
                    const chunk = 0x8000;
                    for (let i = 0; i < bytes.length; i += chunk) {{
                        binary += String.fromCharCode.apply(null, bytes.subarray(i, i + chunk));
                    }}
                    return {{ status: response.status, contentType: contentType, data: btoa(binary) }};
                }} catch (e) {{
                    return {{ error: e.toString() }};
                }}
            }})()
            "#,
            url = escaped
        );

        let value = session
            .page
            .evaluate(script)
            .await
            .map_err(|e| EngineError::Fetch(e.to_string()))?
            .into_value::<serde_json::Value>()
            .map_err(|e| EngineError::Fetch(e.to_string()))?;

        if let Some(error) = value.get("error").and_then(|e| e.as_str()) {
            return Err(EngineError::Fetch(format!(
                "in-session fetch of {} failed: {}",
                record.source_url, error
            )));
        }

        let data = value.get("data").and_then(|d| d.as_str()).unwrap_or("");
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| EngineError::Integrity(format!("base64 decode failed: {}", e)))?;

        let content_type = value
            .get("contentType")
            .and_then(|c| c.as_str())
            .filter(|c| !c.is_empty())
            .map(|c| c.to_string());

        Ok(FetchedContent {
            bytes,
            content_type,
        })
    }

    async fn teardown(&self) {
        let session = self.session.lock().await.take();
        if let Some(mut session) = session {
            let _ = session.page.close().await;
            let _ = session.browser.close().await;
            session.handler_task.abort();
            info!("automated engine torn down");
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

// * The page as a scroll surface for the convergence loop
struct PageSurface<'a> {
    page: &'a Page,
}

#[async_trait]
impl ScrollSurface for PageSurface<'_> {
    async fn document_height(&self) -> Result<f64, EngineError> {
        self.page
            .evaluate(
                "Math.max(document.body.scrollHeight, document.documentElement.scrollHeight)",
            )
            .await
            .map_err(|e| EngineError::Session(e.to_string()))?
            .into_value::<f64>()
            .map_err(|e| EngineError::Session(e.to_string()))
    }

    async fn viewport_height(&self) -> Result<f64, EngineError> {
        self.page
            .evaluate("window.innerHeight")
            .await
            .map_err(|e| EngineError::Session(e.to_string()))?
            .into_value::<f64>()
            .map_err(|e| EngineError::Session(e.to_string()))
    }

    async fn scroll_to(&self, y: f64) -> Result<(), EngineError> {
        self.page
            .evaluate(format!("window.scrollTo(0, {:.0})", y))
            .await
            .map_err(|e| EngineError::Session(e.to_string()))?;
        Ok(())
    }
}

// * Evaluates a script, returning None (with a debug log) on any failure.
// * Extraction steps are best-effort; a failed probe must not abort the run.
async fn eval_json<T: serde::de::DeserializeOwned>(page: &Page, script: &str) -> Option<T> {
    match page.evaluate(script).await {
        Ok(result) => match result.into_value::<T>() {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("script result decode failed: {}", e);
                None
            }
        },
        Err(e) => {
            debug!("script evaluation failed: {}", e);
            None
        }
    }
}

// * Filters harvested elements (placeholders, tracking pixels, icons),
// * absolutizes and deduplicates by resolved URL.
pub(crate) fn build_records(harvested: Vec<HarvestedImage>, base: &Url) -> Vec<ImageRecord> {
    let floor = HARVEST_MIN_DIMENSION_PX;
    let mut seen: HashSet<String> = HashSet::new();
    let mut records: Vec<ImageRecord> = Vec::new();

    for image in harvested {
        let src = image.src.trim();
        if src.is_empty() || src.starts_with("data:") || src.starts_with("blob:") {
            continue;
        }

        // * Any known axis under the floor marks a tracking pixel, icon, or
        // * tracking strip; an unknown (0) axis does not count against it
        let effective_w = image.natural_width.max(image.width);
        let effective_h = image.natural_height.max(image.height);
        let under_floor = |d: u32| d > 0 && d < floor;
        if under_floor(effective_w) || under_floor(effective_h) {
            continue;
        }

        let Ok(resolved) = base.join(src) else {
            continue;
        };
        if !seen.insert(resolved.to_string()) {
            continue;
        }

        let mut metadata = BTreeMap::new();
        if !image.alt.is_empty() {
            metadata.insert("alt".to_string(), image.alt);
        }
        if !image.title.is_empty() {
            metadata.insert("title".to_string(), image.title);
        }
        if image.natural_width > 0 {
            metadata.insert(
                "natural_width".to_string(),
                image.natural_width.to_string(),
            );
        }
        if image.natural_height > 0 {
            metadata.insert(
                "natural_height".to_string(),
                image.natural_height.to_string(),
            );
        }

        let index = records.len() + 1;
        records.push(ImageRecord::from_discovery(resolved, index, metadata));
    }

    records
}
