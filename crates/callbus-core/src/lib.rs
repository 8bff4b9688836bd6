//! # callbus-core — Typed Call-Control Message Bus
//!
//! This crate is the call-control layer between an application and an
//! external native telephony engine: commands go in, indications come
//! out, correlated by call token. The engine itself (signaling, media,
//! NAT traversal) is an external collaborator behind the
//! [`EngineAdapter`] trait; the bus never assumes anything about it
//! beyond its four-operation contract.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use callbus_core::{
//!     Command, EngineManager, EngineOptions, LoopbackAdapter, SetUpCallParams,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = EngineManager::new(Arc::new(LoopbackAdapter::new()));
//!     manager.initialise(&EngineOptions::default()).await?;
//!
//!     // Place a call; the acknowledgment carries the engine's token.
//!     let dispatcher = manager.dispatcher().await?;
//!     let ack = dispatcher
//!         .dispatch(Command::SetUpCall(SetUpCallParams::to("sip:500@example.com")))
//!         .await?;
//!     println!("placed call {:?}", ack.party_b()?);
//!
//!     // The outcome arrives later as indications.
//!     let channel = manager.channel().await?;
//!     while let Some(indication) = channel.poll(Duration::from_secs(1)).await? {
//!         println!("<- {}", indication.kind());
//!     }
//!
//!     manager.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`envelope`] — `Command` and `Indication` as proper tagged variants;
//!   the engine's flat wire record is confined to `envelope::wire`.
//! - [`dispatch`] — validates and forwards commands, bounded by the
//!   dispatch timeout; acknowledgment and asynchronous outcome are kept
//!   strictly separate.
//! - [`correlation`] — pending operations keyed by call token or
//!   registration identifier, with cancellation and timeout sweep.
//! - [`channel`] — one ordered indication stream per engine session, with
//!   push (`subscribe`) and pull (`poll`) consumption and stale-traffic
//!   suppression.
//! - [`manager`] — owns the engine handle, the single consumer task, and
//!   shutdown.

#![warn(missing_docs)]

pub mod adapter;
pub mod call;
pub mod channel;
pub mod config;
pub mod correlation;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod manager;

// Re-export main types
pub use adapter::{EngineAdapter, LoopbackAdapter};
pub use call::{CallState, CallStateTracker, CallToken};
pub use channel::{IndicationChannel, IndicationListener, IndicationPublisher};
pub use config::{BusConfig, EngineOptions};
pub use correlation::{CorrelationRegistry, CorrelationTicket, PendingOperation};
pub use dispatch::CommandDispatcher;
pub use envelope::{
    Command, CommandKind, Indication, IndicationKind, MediaState, RegistrationParams,
    RegistrationState, SetUpCallParams, TransferParams, WireMessage,
};
pub use error::{BusError, BusResult};
pub use manager::{EngineHandle, EngineManager};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
