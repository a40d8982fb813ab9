// * Engine selection policy.
// * Explicit override wins; "auto" prefers the automated engine and relies
// * on the pipeline's single-shot fallback to degrade when the browser
// * runtime is unavailable on the host.

use crate::config::Config;
use crate::engine::automated::AutomatedEngine;
use crate::engine::simple::SimpleEngine;
use crate::engine::{EngineKind, FetchEngine};
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

// * What a config file or CLI flag may ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineChoice {
    #[default]
    Auto,
    Automated,
    Simple,
}

impl FromStr for EngineChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(EngineChoice::Auto),
            "automated" => Ok(EngineChoice::Automated),
            "simple" => Ok(EngineChoice::Simple),
            other => Err(format!(
                "unknown engine '{}' (expected auto, automated, or simple)",
                other
            )),
        }
    }
}

pub struct EngineSelector;

impl EngineSelector {
    // * Resolves the engine to run first: explicit override, then the
    // * configured default, with "auto" preferring the automated engine.
    pub fn resolve(override_choice: Option<EngineChoice>, config: &Config) -> EngineKind {
        let choice = override_choice.unwrap_or(config.engine_settings.default_engine);
        let kind = match choice {
            EngineChoice::Automated => EngineKind::Automated,
            EngineChoice::Simple => EngineKind::Simple,
            EngineChoice::Auto => EngineKind::Automated,
        };
        debug!("engine selection: {:?} -> {}", choice, kind.as_str());
        kind
    }

    // * The one-time downgrade target after a hard failure, if any.
    // * Returns None when no distinct fallback is configured.
    pub fn fallback(active: EngineKind, config: &Config) -> Option<EngineKind> {
        let configured = config.engine_settings.fallback_engine?;
        let kind = match configured {
            EngineChoice::Automated => EngineKind::Automated,
            EngineChoice::Simple => EngineKind::Simple,
            // * Auto as a fallback means "the other one"
            EngineChoice::Auto => match active {
                EngineKind::Automated => EngineKind::Simple,
                EngineKind::Simple => EngineKind::Automated,
            },
        };
        (kind != active).then_some(kind)
    }
}

// * Constructs engine instances. A seam rather than a plain function so
// * tests can substitute mock engines for the whole pipeline.
pub trait EngineFactory: Send + Sync {
    fn create(&self, kind: EngineKind) -> Arc<dyn FetchEngine>;
}

pub struct RuntimeEngineFactory;

impl EngineFactory for RuntimeEngineFactory {
    fn create(&self, kind: EngineKind) -> Arc<dyn FetchEngine> {
        match kind {
            EngineKind::Automated => Arc::new(AutomatedEngine::new()),
            EngineKind::Simple => Arc::new(SimpleEngine::new()),
        }
    }
}
