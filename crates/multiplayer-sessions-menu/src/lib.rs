//! Host/join menu over a session orchestrator.
//!
//! Provides:
//! - The menu adapter (buttons, match-type selection, travel)
//! - Wire protocol (JSON + base64)
//! - WebSocket surface (feature: websocket)

pub mod menu;
pub mod protocol;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use menu::{
    ButtonState, LoggingTravel, MenuConfig, MenuError, MenuUpdate, SessionsMenu, Travel,
    TravelTarget, select_session,
};
pub use protocol::{ClientMessage, ServerMessage, SessionSummary, TravelMode};
