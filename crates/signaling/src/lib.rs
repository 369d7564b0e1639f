//! tandem-signaling – Verbindung zum Relay
//!
//! Dieser Crate kapselt die beiden Netzwerk-Grenzen des Clients:
//!
//! ```text
//! Orchestrator
//!     |
//!     +-- SignalingBridge (WebSocket, JSON)   room_ready, key_exchange, webrtc_offer ...
//!     |       ^
//!     |       +-- BridgeEvent (mpsc)          Verbunden / Getrennt / Nachricht
//!     |
//!     +-- RoomDirectory (HTTP, JSON)          create / accept / pending / get / delete
//! ```

pub mod bridge;
pub mod error;
pub mod rooms;
pub mod websocket;

// Bequeme Re-Exporte
pub use bridge::{BridgeEvent, SignalingBridge};
pub use error::{SignalingError, SignalingResult};
pub use rooms::{HttpRoomDirectory, MemoryRoomDirectory, PendingStatus, RoomDirectory, RoomInfo};
pub use websocket::{WebSocketBridge, WebSocketConfig};
