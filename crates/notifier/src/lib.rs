//! Outbound messaging channel.
//!
//! The pipeline talks to a stateful, session-based messaging provider through
//! [`MessagingProvider`]. Providers are looked up per shop through a
//! [`SessionManager`] instead of a process-wide singleton, so a deployment can
//! start with one shared session and move to per-shop sessions later.

pub mod bridge;
pub mod error;
pub mod mock;
pub mod provider;
pub mod session;

pub use bridge::HttpBridgeProvider;
pub use error::ProviderError;
pub use mock::{MockProvider, SentMessage};
pub use provider::{MessagingProvider, ProviderEvent, SendMeta, SendReceipt};
pub use session::{SessionManager, SharedSessionManager, ShopSessionManager};
