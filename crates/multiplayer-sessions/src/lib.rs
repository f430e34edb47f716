//! Session lifecycle orchestration for multiplayer matchmaking.
//!
//! Provides:
//! - `SessionOrchestrator` - Single-flight create/find/join/destroy/start
//! - `SessionsConfig` - Orchestrator configuration
//! - Provider implementations (local LAN backend, scriptable test double)

pub mod config;
pub mod lifecycle;
pub mod orchestrator;
pub mod provider;

pub use config::{ConfigError, SessionsConfig};
pub use lifecycle::SessionPhase;
pub use orchestrator::SessionOrchestrator;
