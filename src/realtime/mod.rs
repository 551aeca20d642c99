//! Realtime chat gateway.
//!
//! # Data Flow
//! ```text
//! GET /ws (http/websocket.rs)
//!     → gateway.register()          (refused with 503 once closing)
//!     → reader: text frame → protocol.rs parse → gateway.handle_text
//!     → writer: Outbound queue → text / Close frames
//!     → socket ends → gateway.unregister()
//!
//! Shutdown:
//!     graceful_shutdown(timeout)
//!         → closing = true
//!         → server-shutdown event + Close to every client
//!         → wait for unregister of all clients or timeout
//! ```

pub mod gateway;
pub mod protocol;

pub use gateway::{ChatGateway, Outbound};
pub use protocol::{ClientEvent, ServerEvent};
