// * Lazy-load convergence scroll.
// * Drives a scrollable rendering surface until lazy-loaded content stops
// * appearing, in three phases:
// *   A - progressive sweep downward in overlapping steps, re-measuring
// *       document height after each step (it grows as content loads)
// *   B - bottom settle, letting end-of-page triggers (infinite scroll) fire
// *   C - verification sweep from the top in smaller, faster steps, for
// *       lazy-load libraries that only fire on a second intersection check
// *
// * Termination is a heuristic, not a proof: the stability counter resets
// * whenever the document grows, so the sweep also carries a hard step
// * ceiling for documents that never stop growing.

use crate::config::constants::{
    SWEEP_STEP_CEILING_FACTOR, SWEEP_STEP_FRACTION, VERIFY_STEP_FRACTION,
};
use crate::config::ScrollSettings;
use crate::engine::EngineError;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::Rng;
use std::time::Duration;
use tracing::debug;

// * The minimal scroll control surface the algorithm needs. Implemented by
// * the automated engine's page and by mock surfaces in tests.
#[async_trait]
pub trait ScrollSurface: Send + Sync {
    async fn document_height(&self) -> Result<f64, EngineError>;
    async fn viewport_height(&self) -> Result<f64, EngineError>;
    async fn scroll_to(&self, y: f64) -> Result<(), EngineError>;
}

#[derive(Debug, Clone)]
pub struct ScrollPlan {
    // * Consecutive no-growth steps before the sweep is considered converged
    pub max_stable_attempts: u32,
    pub pause: Duration,
    pub random_pause: bool,
    // * Additional jitter bounds in seconds
    pub pause_range: (f64, f64),
}

impl From<&ScrollSettings> for ScrollPlan {
    fn from(settings: &ScrollSettings) -> Self {
        Self {
            max_stable_attempts: settings.max_attempts.max(1),
            pause: Duration::from_secs_f64(settings.pause_time_seconds.max(0.0)),
            random_pause: settings.random_pause,
            pause_range: settings.pause_range,
        }
    }
}

impl ScrollPlan {
    // * Zero-wait plan for tests and already-settled documents
    pub fn immediate(max_stable_attempts: u32) -> Self {
        Self {
            max_stable_attempts: max_stable_attempts.max(1),
            pause: Duration::ZERO,
            random_pause: false,
            pause_range: (0.0, 0.0),
        }
    }

    fn step_ceiling(&self) -> u32 {
        self.max_stable_attempts.saturating_mul(SWEEP_STEP_CEILING_FACTOR)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConvergenceReport {
    pub sweep_steps: u32,
    pub verify_steps: u32,
    pub final_height: f64,
    // * false when the hard step ceiling cut the sweep short
    pub converged: bool,
}

// * Runs the full three-phase scroll against a surface. The RNG is the
// * run's single randomness source, so jitter reproduces under a fixed seed.
pub async fn run_convergence<S: ScrollSurface + ?Sized>(
    surface: &S,
    plan: &ScrollPlan,
    rng: &mut StdRng,
) -> Result<ConvergenceReport, EngineError> {
    let viewport = surface.viewport_height().await?.max(1.0);
    let step = (viewport * SWEEP_STEP_FRACTION).max(1.0);
    let ceiling = plan.step_ceiling();

    // --- Phase A: progressive sweep ---
    let mut height = surface.document_height().await?;
    let mut last_height = height;
    let mut position = 0.0_f64;
    let mut stable = 0_u32;
    let mut sweep_steps = 0_u32;

    while stable < plan.max_stable_attempts && sweep_steps < ceiling {
        position += step;
        surface.scroll_to(position).await?;
        sweep_steps += 1;
        pause_with_jitter(plan, rng).await;

        height = surface.document_height().await?;
        if height > last_height {
            // * Growth extends the budget
            stable = 0;
        } else {
            stable += 1;
        }
        last_height = height;
    }

    let converged = stable >= plan.max_stable_attempts;
    if !converged {
        debug!(
            steps = sweep_steps,
            height, "sweep hit hard step ceiling before height stabilized"
        );
    }

    // --- Phase B: bottom settle ---
    surface.scroll_to(height).await?;
    pause_with_jitter(plan, rng).await;
    height = surface.document_height().await?;

    // --- Phase C: verification sweep, smaller steps, faster pacing ---
    surface.scroll_to(0.0).await?;
    let verify_step = (viewport * VERIFY_STEP_FRACTION).max(1.0);
    let verify_pause = plan.pause / 2;
    let mut verify_steps = 0_u32;
    let mut verify_position = 0.0_f64;

    while verify_position < height && verify_steps < ceiling {
        verify_position += verify_step;
        surface.scroll_to(verify_position.min(height)).await?;
        verify_steps += 1;
        if !verify_pause.is_zero() {
            tokio::time::sleep(verify_pause).await;
        }
    }

    debug!(
        sweep_steps,
        verify_steps, final_height = height, converged, "convergence scroll finished"
    );

    Ok(ConvergenceReport {
        sweep_steps,
        verify_steps,
        final_height: height,
        converged,
    })
}

async fn pause_with_jitter(plan: &ScrollPlan, rng: &mut StdRng) {
    let mut wait = plan.pause;
    if plan.random_pause {
        let (lo, hi) = plan.pause_range;
        if hi > lo && hi > 0.0 {
            wait += Duration::from_secs_f64(rng.gen_range(lo.max(0.0)..hi));
        }
    }
    if !wait.is_zero() {
        tokio::time::sleep(wait).await;
    }
}
