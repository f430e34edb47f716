//! Session provider implementations.

#[cfg(feature = "local")]
pub mod local;
pub mod manual;

#[cfg(feature = "local")]
pub use local::{LocalNetwork, LocalSessionProvider, LocalSubsystem};
pub use manual::{ManualProvider, ProviderCall};
