//! # ntrview: NTR / HzMod screen stream client
//!
//! Connects to a 3DS running NTR (or HzMod) custom firmware, starts the
//! screen stream and hands completed frames to whatever consumes them.
//! Rendering is left to the consumer; this binary reports frame rates.

pub mod config;
pub mod meter;
