// * Pixel-Flow: image discovery and retrieval pipeline.
// * Two engines behind one contract: a static HTTP engine (fast, no scripts)
// * and a browser-automated engine for pages that only reveal their images
// * after JavaScript execution.

pub mod config;
pub mod engine;
pub mod network;
pub mod pipeline;
