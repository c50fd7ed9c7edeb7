//! Platform-agnostic bridge between a host application and a native N64
//! emulation engine.
//!
//! This crate owns the lifecycle state machine, the audio streaming pipeline,
//! the controller digitizer and the configuration call-ins the engine issues.
//! The engine itself sits behind the [`engine::Engine`] trait; the real native
//! implementation lives in `ultra-engine`, frontends live in separate crates.

/// Audio device negotiation, the dedicated audio thread and the frame writer.
pub mod audio;

/// Session facade implementing the engine call-in surface.
pub mod bridge;

/// Read-only configuration snapshot queried by the engine.
pub mod config;

/// Engine call-out/call-in interfaces and an in-process stub engine.
pub mod engine;

/// Error types and the last-error slot.
pub mod error;

/// Analog/digital input digitization and rumble.
pub mod input;

/// Engine lifecycle state machine and state-callback delivery.
pub mod lifecycle;

/// ROM archive extraction and header CRC helpers.
pub mod rom;

/// Frame-rate estimation driven by buffer swaps.
pub mod telemetry;
