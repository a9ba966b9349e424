//! Real-time voice capture pipeline for streaming speech sessions.
//!
//! Microphone audio is captured with a pre-roll ring, gated by a voice
//! activity detector, spliced at speech onset, and pushed through a bounded
//! send queue to a remote session. A small state machine sequences keyword
//! detection, conversation turns and the silence timeout.

pub mod audio;
pub mod config;
pub mod keyword;
mod lock;
pub mod offload;
pub mod realtime;
pub mod telemetry;

pub(crate) use lock::lock_or_recover;
