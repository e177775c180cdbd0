//! Slideplay Core - Playback arbitration for vertical video feeds
//!
//! This crate decides which media element plays, with which source, and
//! whether it actually plays:
//! - Quality-variant source resolution from network and viewport signals
//! - Reference-counted source cache with delayed disposal
//! - Deterministic play with muted fallback and progress verification
//! - Single-writer, token-arbitrated playback control per scope
//! - Lifecycle guards for platforms with media quirks
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Slideplay Core                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐               ┌──────────────┐                │
//! │  │   Platform   │               │   Playback   │                │
//! │  │    Guard     │               │ Coordinator  │                │
//! │  └──────┬───────┘               └──┬────────┬──┘                │
//! │         │ reset/replay   attach/   │        │ play/reset        │
//! │         │                detach    │        │                   │
//! │         │         ┌────────────────┘        │                   │
//! │         │         ▼                         ▼                   │
//! │         │  ┌──────────────┐          ┌──────────────┐           │
//! │         │  │    Source    │          │   Playback   │           │
//! │         │  │    Cache     │          │  Controller  │◀──────┐   │
//! │         │  └──────┬───────┘          └──────┬───────┘       │   │
//! │         │         │                         │               │   │
//! │         │  ┌──────┴───────┐          ┌──────┴───────┐       │   │
//! │         │  │    Source    │          │ Deterministic│       │   │
//! │         │  │   Resolver   │          │ Play Engine  │       │   │
//! │         │  └──────────────┘          └──────────────┘       │   │
//! │         └───────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Media elements, stream engines and network signals are supplied by the
//! host through the traits in [`media`]. The [`sim`] module provides
//! deterministic implementations driven by the tokio clock.

pub mod error;
pub mod types;
pub mod config;
pub mod media;
pub mod resolver;
pub mod cache;
pub mod engine;
pub mod controller;
pub mod coordinator;
pub mod platform;
pub mod sim;

pub use error::{Error, Result};
pub use types::*;
pub use config::{ArbiterConfig, CacheConfig, EngineConfig, ResolverConfig, ScopePolicy, StreamConfig};
pub use media::{
    MediaElement, MediaEvent, MediaHandle, NetworkSignals, PlayRejection, ReadyState,
    SignalProvider, StaticSignals, StreamEngine, StreamHandle,
};
pub use resolver::{resolve, SourceResolver};
pub use cache::{CacheStats, SourceCache};
pub use engine::{attempt_deterministic_play, DeterministicPlayEngine, PlayReport, ProbeStrategy};
pub use controller::{PlayRequest, PlaybackController, SessionEvent};
pub use coordinator::{Affordance, PlaybackCoordinator};
pub use platform::{AudioUnlocker, LifecycleEvent, Platform, PlatformGuard, UnlockLatch};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the library
pub fn init() {
    tracing::info!(version = VERSION, "Slideplay Core initialized");
}
