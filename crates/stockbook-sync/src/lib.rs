//! # stockbook-sync: Offline Reconciliation for Stockbook
//!
//! Lets a register keep selling while the server is away: every mutation is
//! applied locally, queued, and replayed in order once the server answers.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Client Device                                    │
//! │                                                                         │
//! │  ┌────────────────┐   local apply    ┌───────────────────────────────┐  │
//! │  │ OfflineClient  │ ───────────────► │ client database (stockbook-db)│  │
//! │  │                │   + enqueue      │                               │  │
//! │  │ checkout,      │                  │  sync_queue   (intent log)    │  │
//! │  │ restock, ...   │                  │  mirror       (last pull)     │  │
//! │  └────────────────┘                  │  local_transactions           │  │
//! │                                      └───────────────┬───────────────┘  │
//! │  ┌────────────────┐   run_cycle      ┌───────────────▼───────────────┐  │
//! │  │ SyncAgent      │ ───────────────► │ QueueDrainer                  │  │
//! │  │ start / timer /│                  │ drain → sweep → pull          │  │
//! │  │ online / manual│                  └───────────────┬───────────────┘  │
//! │  └────────────────┘                                  │                  │
//! └──────────────────────────────────────────────────────┼──────────────────┘
//!                                                        │ SyncServer
//!                                        ┌───────────────▼───────────────┐
//!                                        │ EmbeddedServer                │
//!                                        │ (server database engines)     │
//!                                        └───────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`agent`] - Background `SyncAgent`, status and events
//! - [`client`] - `OfflineClient`: local apply and enqueue
//! - [`config`] - Sync configuration (mode, device, store, intervals)
//! - [`drain`] - FIFO queue replay, unsynced sweep, pull refresh
//! - [`error`] - Sync and remote error types
//! - [`server`] - The `SyncServer` boundary and its in-process implementation
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stockbook_db::{Database, DbConfig};
//! use stockbook_sync::{EmbeddedServer, OfflineClient, SyncAgent, SyncConfig, SyncTrigger};
//!
//! let config = Arc::new(SyncConfig::load_or_default(None));
//! let local = Database::new(DbConfig::new("register.db")).await?;
//! let server = Arc::new(EmbeddedServer::new(server_db));
//!
//! let client = OfflineClient::new(local.clone(), config.clone());
//! let agent = SyncAgent::new(config, local, server).spawn();
//!
//! let sale = client.checkout(lines).await?;
//! agent.trigger(SyncTrigger::Online).await?;
//! println!("Pending: {}", agent.status().await.pending);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod client;
pub mod config;
pub mod drain;
pub mod error;
pub mod server;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{NoOpEmitter, SyncAgent, SyncAgentHandle, SyncEventEmitter, SyncStatus, SyncTrigger};
pub use client::OfflineClient;
pub use config::{SyncConfig, SyncMode};
pub use drain::{CycleReport, DrainReport, QueueDrainer, SweepReport};
pub use error::{RemoteError, SyncError, SyncResult};
pub use server::{Ack, EmbeddedServer, SyncServer};
