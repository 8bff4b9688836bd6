//! Engine adapter boundary
//!
//! The native telephony engine is an external collaborator consumed
//! through exactly four operations: initialise, shutdown, get a message,
//! send a message. All four are treated as opaque, blocking-capable and
//! potentially slow; nothing in the bus assumes engine behavior beyond
//! this contract.
//!
//! Adapters exchange [`WireMessage`] records — the flat shape the native
//! boundary marshals — and the bus converts to and from typed envelopes at
//! this seam only.

pub mod loopback;

pub use loopback::LoopbackAdapter;

use std::time::Duration;

use async_trait::async_trait;

use crate::envelope::WireMessage;
use crate::error::BusResult;

/// The four-operation contract the native engine is consumed through
#[async_trait]
pub trait EngineAdapter: Send + Sync {
    /// Initialise the engine with an opaque options string
    async fn initialise(&self, options: &str) -> BusResult<()>;

    /// Release the engine session
    async fn shutdown(&self) -> BusResult<()>;

    /// Wait up to `timeout` for the engine's next asynchronous message
    ///
    /// Returns `Ok(None)` when no message arrived within the timeout.
    /// Transport errors are fatal to the engine handle.
    async fn get_message(&self, timeout: Duration) -> BusResult<Option<WireMessage>>;

    /// Send a command message and wait for the engine's acknowledgment
    ///
    /// The acknowledgment is either an echo of the command with
    /// engine-assigned fields filled in, or a command-error record.
    async fn send_message(&self, message: WireMessage) -> BusResult<WireMessage>;
}
