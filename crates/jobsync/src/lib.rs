//! Job synchronization client for the contrax analysis service.
//!
//! Keeps a local registry of a user's background jobs (contract analysis,
//! image processing, document OCR, full pipeline runs) in step with the
//! server.
//! Updates arrive over a persistent WebSocket channel; job creation,
//! lookup, listing, and cancellation go through the REST API.

pub mod api;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod messages;
pub mod reconnect;
pub mod registry;
pub mod router;
pub mod store;
pub mod subscriptions;

pub use client::JobSyncClient;
pub use config::SyncConfig;
pub use connection::{ConnectionState, ConnectionStatus};
pub use error::{ApiError, ChannelError, ConfigError, RegistryError};
pub use registry::{JobRegistry, PendingOverride};
pub use store::JobStore;
