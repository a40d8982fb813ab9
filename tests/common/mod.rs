// * Shared test doubles: a scriptable FetchEngine and an engine factory
// * that hands out pre-built mocks while counting instantiations.

#![allow(dead_code)]

use async_trait::async_trait;
use pixel_flow::config::Config;
use pixel_flow::engine::{
    EngineError, EngineFactory, EngineKind, EngineStats, FetchEngine, FetchedContent, ImageRecord,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

pub fn record(url: &str) -> ImageRecord {
    ImageRecord::from_discovery(Url::parse(url).unwrap(), 1, BTreeMap::new())
}

pub fn records(urls: &[&str]) -> Vec<ImageRecord> {
    urls.iter().map(|u| record(u)).collect()
}

// * Per-URL fetch scripting
pub enum FetchBehavior {
    Bytes(Vec<u8>),
    Empty,
    Fail,
}

pub struct MockEngine {
    kind: EngineKind,
    records: Vec<ImageRecord>,
    behaviors: Mutex<HashMap<String, FetchBehavior>>,
    init_fails: bool,
    fetch_delay: Duration,
    extract_delay: Duration,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub extract_calls: AtomicUsize,
    pub torn_down: AtomicBool,
}

impl MockEngine {
    pub fn with_records(kind: EngineKind, records: Vec<ImageRecord>) -> Self {
        Self {
            kind,
            records,
            behaviors: Mutex::new(HashMap::new()),
            init_fails: false,
            fetch_delay: Duration::ZERO,
            extract_delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            extract_calls: AtomicUsize::new(0),
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn failing_init(kind: EngineKind) -> Self {
        let mut engine = Self::with_records(kind, Vec::new());
        engine.init_fails = true;
        engine
    }

    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    pub fn with_extract_delay(mut self, delay: Duration) -> Self {
        self.extract_delay = delay;
        self
    }

    pub fn script(self, url: &str, behavior: FetchBehavior) -> Self {
        self.behaviors
            .lock()
            .unwrap()
            .insert(url.to_string(), behavior);
        self
    }

    pub fn max_observed_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FetchEngine for MockEngine {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    async fn initialize(&self, _config: &Config) -> Result<(), EngineError> {
        if self.init_fails {
            Err(EngineError::Init("mock engine configured to fail".into()))
        } else {
            Ok(())
        }
    }

    async fn extract_images(&self, _url: &str) -> Vec<ImageRecord> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        if !self.extract_delay.is_zero() {
            tokio::time::sleep(self.extract_delay).await;
        }
        self.records.clone()
    }

    async fn fetch_bytes(&self, record: &ImageRecord) -> Result<FetchedContent, EngineError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }

        let result = {
            let behaviors = self.behaviors.lock().unwrap();
            match behaviors.get(record.source_url.as_str()) {
                Some(FetchBehavior::Fail) => {
                    Err(EngineError::Fetch("scripted failure".to_string()))
                }
                Some(FetchBehavior::Empty) => Ok(FetchedContent {
                    bytes: Vec::new(),
                    content_type: Some("image/png".to_string()),
                }),
                Some(FetchBehavior::Bytes(bytes)) => Ok(FetchedContent {
                    bytes: bytes.clone(),
                    content_type: Some("image/png".to_string()),
                }),
                None => Ok(FetchedContent {
                    bytes: vec![0xAB; 1024],
                    content_type: Some("image/png".to_string()),
                }),
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn teardown(&self) {
        self.torn_down.store(true, Ordering::SeqCst);
    }

    fn stats(&self) -> EngineStats {
        EngineStats {
            found: self.records.len() as u64,
            ..Default::default()
        }
    }
}

// * Hands out pre-built engines per kind, counting how many were requested
pub struct MockFactory {
    automated: Mutex<Vec<Arc<MockEngine>>>,
    simple: Mutex<Vec<Arc<MockEngine>>>,
    pub automated_created: AtomicUsize,
    pub simple_created: AtomicUsize,
}

impl MockFactory {
    pub fn new(automated: Vec<Arc<MockEngine>>, simple: Vec<Arc<MockEngine>>) -> Self {
        Self {
            automated: Mutex::new(automated),
            simple: Mutex::new(simple),
            automated_created: AtomicUsize::new(0),
            simple_created: AtomicUsize::new(0),
        }
    }
}

impl EngineFactory for MockFactory {
    fn create(&self, kind: EngineKind) -> Arc<dyn FetchEngine> {
        match kind {
            EngineKind::Automated => {
                self.automated_created.fetch_add(1, Ordering::SeqCst);
                self.automated
                    .lock()
                    .unwrap()
                    .pop()
                    .map(|e| e as Arc<dyn FetchEngine>)
                    .unwrap_or_else(|| {
                        Arc::new(MockEngine::with_records(kind, Vec::new()))
                    })
            }
            EngineKind::Simple => {
                self.simple_created.fetch_add(1, Ordering::SeqCst);
                self.simple
                    .lock()
                    .unwrap()
                    .pop()
                    .map(|e| e as Arc<dyn FetchEngine>)
                    .unwrap_or_else(|| {
                        Arc::new(MockEngine::with_records(kind, Vec::new()))
                    })
            }
        }
    }
}
