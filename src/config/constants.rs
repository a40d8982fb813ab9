// * Configuration Constants
// * Central location for all configurable thresholds and timeouts

// * Page navigation timeout in milliseconds
pub const NAVIGATION_TIMEOUT_MS: u64 = 60_000;

// * Maximum time spent probing for a consent/cookie affordance
pub const CONSENT_WAIT_MS: u64 = 3_000;

// * Image readiness polling interval and total budget
pub const READINESS_POLL_MS: u64 = 500;
pub const READINESS_MAX_WAIT_MS: u64 = 10_000;

// * Readiness thresholds: fraction of images fully rendered / carrying a real source
pub const READINESS_LOADED_FRACTION: f64 = 0.8;
pub const READINESS_SOURCED_FRACTION: f64 = 0.9;

// * Network quiescence sampling (resource count stable between two samples)
pub const QUIESCENCE_POLL_MS: u64 = 500;
pub const QUIESCENCE_MAX_WAIT_MS: u64 = 5_000;

// * Harvest floor: any known dimension under this marks a tracking
// * pixel, icon, or tracking strip; unknown (zero) dimensions are exempt
pub const HARVEST_MIN_DIMENSION_PX: u32 = 32;

// * Progressive sweep advances by this fraction of a viewport per step.
// * Deliberate overlap so a lazy-load trigger at a step boundary is not skipped.
pub const SWEEP_STEP_FRACTION: f64 = 0.8;

// * Verification sweep uses smaller steps at faster pacing
pub const VERIFY_STEP_FRACTION: f64 = 0.4;

// * Hard ceiling on total scroll steps, as a multiple of max_attempts.
// * A document that grows on every step keeps resetting the stability
// * counter, so the sweep needs an absolute bound too.
pub const SWEEP_STEP_CEILING_FACTOR: u32 = 8;

// * Downloads smaller than this are treated as error pages, not images
pub const MIN_DOWNLOAD_BYTES: u64 = 128;

// * Initial backoff between per-item download retries, in milliseconds
pub const RETRY_BACKOFF_MS: u64 = 500;
