//! Session management for the Parley voice pipeline.
//!
//! Owns the mapping from signaling connections to live voice sessions:
//! SFU negotiation, media bridge wiring, pipeline provider construction,
//! and the forwarding of pipeline events back onto the signaling
//! channel.

pub mod error;
pub mod manager;
pub mod providers;
pub mod router;
pub mod session;

pub use error::SessionError;
pub use manager::SessionManager;
pub use providers::ProviderSettings;
pub use router::LocalRouter;
pub use session::Session;
