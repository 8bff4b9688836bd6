//! Engine lifecycle management
//!
//! The [`EngineManager`] is the sole authority over the engine session: it
//! creates the [`EngineHandle`] on `initialise`, runs the single consumer
//! task that pumps adapter messages into the indication channel, and tears
//! everything down on `shutdown`. No component owns the handle besides the
//! manager; the dispatcher and channel hold shared references.
//!
//! A transport failure in the adapter marks the handle dead: the consumer
//! exits, the channel closes, and every subsequent dispatch fails fast
//! with `EngineNotInitialised` until the caller shuts down and
//! re-initialises.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::adapter::EngineAdapter;
use crate::channel::{IndicationChannel, IndicationPublisher};
use crate::config::{BusConfig, EngineOptions};
use crate::correlation::CorrelationRegistry;
use crate::dispatch::CommandDispatcher;
use crate::envelope::wire;
use crate::error::{BusError, BusResult};

/// Process-wide handle for one initialized engine session
///
/// Holds the adapter and the liveness flag. Created and destroyed only by
/// the [`EngineManager`]; everything else borrows it.
pub struct EngineHandle {
    adapter: Arc<dyn EngineAdapter>,
    alive: AtomicBool,
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("alive", &self.alive.load(Ordering::Relaxed))
            .finish()
    }
}

impl EngineHandle {
    pub(crate) fn new(adapter: Arc<dyn EngineAdapter>) -> Self {
        Self {
            adapter,
            alive: AtomicBool::new(true),
        }
    }

    /// Whether commands and indications are still valid on this handle
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_dead(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub(crate) fn adapter(&self) -> &Arc<dyn EngineAdapter> {
        &self.adapter
    }
}

struct EngineSession {
    handle: Arc<EngineHandle>,
    channel: Arc<IndicationChannel>,
    dispatcher: Arc<CommandDispatcher>,
    stop_tx: watch::Sender<bool>,
    consumer: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

/// Owns engine initialization, the indication consumer, and shutdown
pub struct EngineManager {
    adapter: Arc<dyn EngineAdapter>,
    config: BusConfig,
    session: tokio::sync::Mutex<Option<EngineSession>>,
}

impl EngineManager {
    /// Create a manager over an engine adapter with default timing
    pub fn new(adapter: Arc<dyn EngineAdapter>) -> Self {
        Self::with_config(adapter, BusConfig::default())
    }

    /// Create a manager with explicit timing configuration
    pub fn with_config(adapter: Arc<dyn EngineAdapter>, config: BusConfig) -> Self {
        Self {
            adapter,
            config,
            session: tokio::sync::Mutex::new(None),
        }
    }

    /// Initialise the engine and start the indication consumer
    ///
    /// Fails with `AlreadyInitialised` if a session exists; the options
    /// string is validated only for non-emptiness, everything else is
    /// opaque to the bus.
    pub async fn initialise(&self, options: &EngineOptions) -> BusResult<Arc<EngineHandle>> {
        let rendered = options.render();
        if rendered.trim().is_empty() {
            return Err(BusError::invalid("options", "must not be empty"));
        }

        let mut session = self.session.lock().await;
        if session.is_some() {
            return Err(BusError::AlreadyInitialised);
        }

        self.adapter.initialise(&rendered).await?;
        tracing::info!(options = %rendered, "engine initialised");

        let handle = Arc::new(EngineHandle::new(self.adapter.clone()));
        let registry = Arc::new(CorrelationRegistry::with_timeout(
            self.config.correlation_timeout,
        ));
        let (channel, publisher) = IndicationChannel::new();
        let channel = Arc::new(channel);
        let dispatcher = Arc::new(CommandDispatcher::new(
            handle.clone(),
            registry.clone(),
            self.config.dispatch_timeout,
        ));

        let (stop_tx, stop_rx) = watch::channel(false);
        let consumer = tokio::spawn(consumer_loop(
            handle.clone(),
            registry.clone(),
            publisher,
            stop_rx,
            self.config.message_poll_interval,
        ));
        let sweeper = tokio::spawn(sweep_loop(registry, self.config.correlation_timeout / 2));

        *session = Some(EngineSession {
            handle: handle.clone(),
            channel,
            dispatcher,
            stop_tx,
            consumer,
            sweeper,
        });
        Ok(handle)
    }

    /// Whether an engine session currently exists
    pub async fn is_initialised(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// The dispatcher for the current session
    pub async fn dispatcher(&self) -> BusResult<Arc<CommandDispatcher>> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| session.dispatcher.clone())
            .ok_or(BusError::EngineNotInitialised)
    }

    /// The indication channel for the current session
    pub async fn channel(&self) -> BusResult<Arc<IndicationChannel>> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| session.channel.clone())
            .ok_or(BusError::EngineNotInitialised)
    }

    /// Stop the consumer and release the engine
    ///
    /// Safe to call repeatedly; calls after the first are no-ops. Fails
    /// with `ShutdownTimeout` if the consumer does not exit within the
    /// configured bound — a stuck consumer means a misbehaving adapter, so
    /// the handle is marked dead and the consumer aborted rather than
    /// silently ignored.
    pub async fn shutdown(&self) -> BusResult<()> {
        let session = self.session.lock().await.take();
        let Some(mut session) = session else {
            return Ok(());
        };

        tracing::info!("shutting down engine session");
        let _ = session.stop_tx.send(true);
        session.sweeper.abort();

        let waited = tokio::time::timeout(self.config.shutdown_timeout, &mut session.consumer).await;
        session.handle.mark_dead();

        match waited {
            Ok(_) => {
                self.adapter.shutdown().await?;
                tracing::info!("engine session shut down");
                Ok(())
            }
            Err(_) => {
                session.consumer.abort();
                // Best effort; the adapter is already misbehaving.
                if let Err(err) = self.adapter.shutdown().await {
                    tracing::warn!(error = %err, "engine shutdown failed after consumer timeout");
                }
                tracing::error!("indication consumer did not exit in time");
                Err(BusError::ShutdownTimeout {
                    millis: self.config.shutdown_timeout.as_millis() as u64,
                })
            }
        }
    }
}

/// The single consumer: pumps adapter messages into the channel
///
/// Decodes each wire message, resolves any pending operation correlated to
/// it, and publishes it in production order. Exits on the stop signal, on
/// adapter closure, or on a transport failure (which also kills the
/// handle). Dropping the publisher on exit closes the channel, so
/// listeners observe end-of-stream and pollers get `None`.
async fn consumer_loop(
    handle: Arc<EngineHandle>,
    registry: Arc<CorrelationRegistry>,
    publisher: IndicationPublisher,
    mut stop_rx: watch::Receiver<bool>,
    poll_interval: std::time::Duration,
) {
    tracing::debug!("indication consumer started");
    loop {
        if *stop_rx.borrow() {
            break;
        }
        let message = tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
                continue;
            }
            message = handle.adapter().get_message(poll_interval) => message,
        };

        match message {
            Err(err) => {
                tracing::error!(error = %err, "engine transport failure, stopping consumer");
                handle.mark_dead();
                break;
            }
            Ok(None) => continue,
            Ok(Some(message)) => {
                let indication = match wire::decode_indication(message) {
                    Ok(indication) => indication,
                    Err(err) => {
                        tracing::warn!(error = %err, "discarding malformed engine message");
                        continue;
                    }
                };

                let mut cancelled = false;
                if let Some(key) = indication.correlation_key() {
                    match registry.resolve(&key) {
                        Ok(operation) => {
                            if operation.is_cancelled() {
                                cancelled = true;
                            } else {
                                tracing::debug!(key = %key, "resolved pending operation");
                                operation.complete(indication.clone());
                            }
                        }
                        Err(_) => {} // nothing pending on this key
                    }
                }

                let delivered = if cancelled {
                    publisher.publish_stale(indication)
                } else {
                    publisher.publish(indication)
                };
                if !delivered {
                    tracing::debug!("indication channel closed, stopping consumer");
                    break;
                }
            }
        }
    }
    tracing::debug!("indication consumer exited");
}

async fn sweep_loop(registry: Arc<CorrelationRegistry>, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval.max(std::time::Duration::from_millis(10)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let swept = registry.sweep(Instant::now());
        if !swept.is_empty() {
            tracing::warn!(count = swept.len(), "swept expired pending operations");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::LoopbackAdapter;
    use std::time::Duration;

    #[tokio::test]
    async fn initialise_twice_fails() {
        let manager = EngineManager::new(Arc::new(LoopbackAdapter::new()));
        manager.initialise(&EngineOptions::default()).await.unwrap();
        let err = manager
            .initialise(&EngineOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, BusError::AlreadyInitialised);
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let manager = EngineManager::new(Arc::new(LoopbackAdapter::new()));
        manager.initialise(&EngineOptions::default()).await.unwrap();
        manager.shutdown().await.unwrap();
        manager.shutdown().await.unwrap();
        assert!(!manager.is_initialised().await);
    }

    #[tokio::test]
    async fn shutdown_then_initialise_again() {
        let manager = EngineManager::new(Arc::new(LoopbackAdapter::new()));
        let first = manager.initialise(&EngineOptions::default()).await.unwrap();
        manager.shutdown().await.unwrap();
        assert!(!first.is_alive());

        let second = manager.initialise(&EngineOptions::default()).await.unwrap();
        assert!(second.is_alive());
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn empty_options_are_rejected() {
        let manager = EngineManager::new(Arc::new(LoopbackAdapter::new()));
        let err = manager.initialise(&EngineOptions::empty()).await.unwrap_err();
        assert!(matches!(err, BusError::InvalidCommand { field: "options", .. }));
    }

    #[tokio::test]
    async fn channel_closes_after_shutdown() {
        let manager = EngineManager::new(Arc::new(LoopbackAdapter::new()));
        manager.initialise(&EngineOptions::default()).await.unwrap();
        let channel = manager.channel().await.unwrap();
        manager.shutdown().await.unwrap();

        // The consumer is gone and the publisher dropped; polling drains
        // to end-of-stream instead of blocking.
        let polled = channel.poll(Duration::from_millis(100)).await.unwrap();
        assert_eq!(polled, None);
        assert!(matches!(
            manager.dispatcher().await,
            Err(BusError::EngineNotInitialised)
        ));
    }
}
