//! Command dispatch
//!
//! The dispatcher is the synchronous half of the bus contract: it
//! validates a command, forwards it to the engine adapter, and returns the
//! engine's acknowledgment within a bounded timeout. The acknowledgment is
//! not the outcome — call establishment, registration results and the like
//! arrive later as indications on the channel.
//!
//! Commands whose outcome is correlated (registrations by identifier,
//! placed calls by their engine-assigned token) leave a pending operation
//! in the correlation registry; the indication consumer resolves it when
//! the matching indication arrives.

use std::sync::Arc;
use std::time::Duration;

use crate::correlation::{CorrelationRegistry, CorrelationTicket, PendingOperation};
use crate::envelope::{wire, Command, CommandKind};
use crate::error::{BusError, BusResult};
use crate::manager::EngineHandle;

/// Validates and forwards commands to the engine adapter
///
/// Cheap to share; all methods take `&self` and may be called concurrently
/// from any number of tasks.
pub struct CommandDispatcher {
    handle: Arc<EngineHandle>,
    registry: Arc<CorrelationRegistry>,
    dispatch_timeout: Duration,
}

impl CommandDispatcher {
    pub(crate) fn new(
        handle: Arc<EngineHandle>,
        registry: Arc<CorrelationRegistry>,
        dispatch_timeout: Duration,
    ) -> Self {
        Self {
            handle,
            registry,
            dispatch_timeout,
        }
    }

    /// The correlation registry shared with the indication consumer
    ///
    /// Exposed so callers can abandon a pending operation with
    /// [`CorrelationRegistry::cancel`]; the late indication is then
    /// delivered stale instead of resolving against it.
    pub fn correlations(&self) -> &Arc<CorrelationRegistry> {
        &self.registry
    }

    /// Dispatch a command and return the engine's acknowledgment
    ///
    /// Fails with `InvalidCommand` before any engine interaction when a
    /// required field is missing, `EngineNotInitialised` when no live
    /// handle exists, `Timeout` when the adapter does not acknowledge
    /// within the dispatch timeout, and `Rejected` when the engine reports
    /// a command error.
    pub async fn dispatch(&self, command: Command) -> BusResult<Command> {
        let (ack, _) = self.dispatch_inner(command, false).await?;
        Ok(ack)
    }

    /// Dispatch a command and also return a ticket for its first
    /// correlated indication
    ///
    /// The ticket is `None` for commands with no correlation semantics
    /// (parameter changes). For `SetUpCall` the pending operation is keyed
    /// by the engine-assigned token, so it is registered only after the
    /// acknowledgment arrives.
    pub async fn dispatch_tracked(
        &self,
        command: Command,
    ) -> BusResult<(Command, Option<CorrelationTicket>)> {
        self.dispatch_inner(command, true).await
    }

    async fn dispatch_inner(
        &self,
        command: Command,
        tracked: bool,
    ) -> BusResult<(Command, Option<CorrelationTicket>)> {
        command.validate()?;
        if !self.handle.is_alive() {
            return Err(BusError::EngineNotInitialised);
        }

        // Register pending operations whose key is known before dispatch.
        // SetUpCall is keyed by the token the engine assigns, so it is
        // registered after the acknowledgment instead.
        let mut ticket = None;
        let pre_key = match &command {
            Command::Register(params) => {
                let key = params.registration_id();
                if tracked {
                    let (operation, t) =
                        PendingOperation::with_ticket(CommandKind::Register, key.clone());
                    self.registry.register(operation)?;
                    ticket = Some(t);
                } else {
                    self.registry
                        .register(PendingOperation::new(CommandKind::Register, key.clone()))?;
                }
                Some(key)
            }
            Command::SetUpCall(_) => None,
            other if tracked => match other.call_token() {
                Ok(token) => {
                    let (operation, t) = PendingOperation::with_ticket(other.kind(), token);
                    let key = token.to_string();
                    self.registry.register(operation)?;
                    ticket = Some(t);
                    Some(key)
                }
                Err(_) => None,
            },
            _ => None,
        };

        tracing::debug!(kind = %command.kind(), "dispatching command");
        let message = wire::encode_command(&command);
        let outcome = tokio::time::timeout(
            self.dispatch_timeout,
            self.handle.adapter().send_message(message),
        )
        .await;

        let response = match outcome {
            Err(_) => {
                self.rollback(pre_key.as_deref());
                tracing::warn!(kind = %command.kind(), "dispatch timed out waiting for acknowledgment");
                return Err(BusError::timeout(self.dispatch_timeout));
            }
            Ok(Err(err)) => {
                self.rollback(pre_key.as_deref());
                if err.is_fatal() {
                    tracing::error!(error = %err, "engine transport failure, marking handle dead");
                    self.handle.mark_dead();
                }
                return Err(err);
            }
            Ok(Ok(response)) => response,
        };

        let ack = match wire::decode_ack(response) {
            Ok(ack) => ack,
            Err(err) => {
                self.rollback(pre_key.as_deref());
                if err.is_fatal() {
                    tracing::error!(error = %err, "malformed acknowledgment, marking handle dead");
                    self.handle.mark_dead();
                }
                return Err(err);
            }
        };

        if let Command::SetUpCall(params) = &ack {
            if let Some(token) = &params.call_token {
                let registered = if tracked {
                    let (operation, t) =
                        PendingOperation::with_ticket(CommandKind::SetUpCall, token.clone());
                    let result = self.registry.register(operation);
                    if result.is_ok() {
                        ticket = Some(t);
                    }
                    result
                } else {
                    self.registry
                        .register(PendingOperation::new(CommandKind::SetUpCall, token.clone()))
                };
                if let Err(err) = registered {
                    // A token colliding with a live entry means the engine
                    // reused it; the ack itself is still valid.
                    tracing::warn!(token = %token, error = %err, "could not register pending call");
                }
            }
        }

        Ok((ack, ticket))
    }

    fn rollback(&self, key: Option<&str>) {
        if let Some(key) = key {
            let _ = self.registry.resolve(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::EngineAdapter;
    use crate::envelope::{RegistrationParams, SetUpCallParams, WireMessage};
    use async_trait::async_trait;

    struct EchoAdapter;

    #[async_trait]
    impl EngineAdapter for EchoAdapter {
        async fn initialise(&self, _options: &str) -> BusResult<()> {
            Ok(())
        }
        async fn shutdown(&self) -> BusResult<()> {
            Ok(())
        }
        async fn get_message(&self, timeout: Duration) -> BusResult<Option<WireMessage>> {
            tokio::time::sleep(timeout).await;
            Ok(None)
        }
        async fn send_message(&self, message: WireMessage) -> BusResult<WireMessage> {
            Ok(message)
        }
    }

    struct SilentAdapter;

    #[async_trait]
    impl EngineAdapter for SilentAdapter {
        async fn initialise(&self, _options: &str) -> BusResult<()> {
            Ok(())
        }
        async fn shutdown(&self) -> BusResult<()> {
            Ok(())
        }
        async fn get_message(&self, timeout: Duration) -> BusResult<Option<WireMessage>> {
            tokio::time::sleep(timeout).await;
            Ok(None)
        }
        async fn send_message(&self, _message: WireMessage) -> BusResult<WireMessage> {
            // Never acknowledges.
            std::future::pending().await
        }
    }

    fn dispatcher_over(adapter: Arc<dyn EngineAdapter>, timeout: Duration) -> CommandDispatcher {
        let handle = Arc::new(EngineHandle::new(adapter));
        CommandDispatcher::new(handle, Arc::new(CorrelationRegistry::new()), timeout)
    }

    #[tokio::test]
    async fn validation_failures_never_reach_the_adapter() {
        let dispatcher = dispatcher_over(Arc::new(EchoAdapter), Duration::from_secs(1));
        let err = dispatcher
            .dispatch(Command::SetUpCall(SetUpCallParams::to("")))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::InvalidCommand { field: "party_b", .. }));
        assert!(dispatcher.correlations().is_empty());
    }

    #[tokio::test]
    async fn dead_handle_fails_fast_without_registering() {
        let dispatcher = dispatcher_over(Arc::new(EchoAdapter), Duration::from_secs(1));
        dispatcher.handle.mark_dead();
        let err = dispatcher
            .dispatch(Command::Register(RegistrationParams::new("sip", "a@b")))
            .await
            .unwrap_err();
        assert_eq!(err, BusError::EngineNotInitialised);
        assert!(dispatcher.correlations().is_empty());
    }

    #[tokio::test]
    async fn unacknowledged_register_times_out_and_leaves_no_entry() {
        let timeout = Duration::from_millis(100);
        let dispatcher = dispatcher_over(Arc::new(SilentAdapter), timeout);

        let started = std::time::Instant::now();
        let err = dispatcher
            .dispatch(Command::Register(RegistrationParams::new("sip", "a@b")))
            .await
            .unwrap_err();
        assert_eq!(err, BusError::timeout(timeout));
        // Bounded by the dispatch timeout plus a small epsilon.
        assert!(started.elapsed() < timeout + Duration::from_millis(200));
        assert!(dispatcher.correlations().is_empty());
    }

    #[tokio::test]
    async fn register_leaves_a_pending_entry_on_success() {
        let dispatcher = dispatcher_over(Arc::new(EchoAdapter), Duration::from_secs(1));
        dispatcher
            .dispatch(Command::Register(RegistrationParams::new("sip", "a@b")))
            .await
            .unwrap();
        assert!(dispatcher.correlations().contains("sip:a@b"));
    }
}
