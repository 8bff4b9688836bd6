//! Ordered delivery of engine indications
//!
//! Each engine session has one indication channel: a single ordered
//! sequence of everything the engine reported, in the order the adapter
//! produced it. Consumers choose push or pull:
//!
//! - [`IndicationChannel::subscribe`] registers an async listener invoked
//!   once per indication, in order, until unsubscribed or shutdown.
//! - [`IndicationChannel::poll`] pulls the next indication, for callers
//!   that want a plain message loop.
//!
//! The two modes do not mix on one channel: the first `subscribe` pins the
//! channel to push delivery and the first `poll` pins it to pull delivery;
//! crossing over fails with `ModeConflict`, and nothing is lost in the
//! attempt — queued indications stay with the mode that owns them.
//!
//! Staleness is decided at publish time against the per-token call state
//! machine; stale items are suppressed from normal delivery and surface
//! only through [`IndicationListener::on_stale`].

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::call::{CallState, CallStateTracker};
use crate::envelope::Indication;
use crate::error::{BusError, BusResult};

/// One queued item: the indication plus its staleness tag
#[derive(Debug, Clone)]
struct Delivery {
    indication: Indication,
    stale: bool,
}

/// Receives indications pushed through a subscription
///
/// `on_stale` has a default implementation that only logs; override it to
/// observe late indications against cleared or abandoned calls.
#[async_trait]
pub trait IndicationListener: Send + Sync {
    /// Handle the next in-order indication
    async fn on_indication(&self, indication: Indication);

    /// Handle an indication that arrived after its call was cleared or its
    /// pending operation cancelled
    async fn on_stale(&self, indication: Indication) {
        tracing::warn!(kind = %indication.kind(), "suppressed stale indication");
    }
}

#[derive(Clone)]
struct Subscription {
    id: Uuid,
    listener: Arc<dyn IndicationListener>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeliveryMode {
    Idle,
    Push,
    Pull,
}

/// Feeds indications into a channel, in production order
///
/// Held by the lifecycle consumer, which is the only writer. Publishing
/// updates the call state machine and tags anything referencing a cleared
/// token as stale.
pub struct IndicationPublisher {
    tx: mpsc::UnboundedSender<Delivery>,
    calls: Arc<CallStateTracker>,
}

impl IndicationPublisher {
    /// Publish `indication`, deciding staleness from the call state
    /// machine
    ///
    /// Returns `false` once the channel is gone (all consumers dropped).
    pub fn publish(&self, indication: Indication) -> bool {
        let fresh = self.calls.observe(&indication);
        if !fresh {
            let error = BusError::StaleIndication {
                token: indication.call_token().unwrap_or("-").to_string(),
            };
            tracing::warn!(kind = %indication.kind(), %error, "stale indication for cleared call");
        }
        self.tx
            .send(Delivery {
                stale: !fresh,
                indication,
            })
            .is_ok()
    }

    /// Publish `indication` already known to be stale
    ///
    /// Used when the correlation registry reports the pending operation
    /// was cancelled before the indication arrived. The state machine is
    /// still updated so the token's history stays consistent.
    pub fn publish_stale(&self, indication: Indication) -> bool {
        let _ = self.calls.observe(&indication);
        let error = BusError::StaleIndication {
            token: indication.call_token().unwrap_or("-").to_string(),
        };
        tracing::warn!(kind = %indication.kind(), %error, "stale indication for cancelled operation");
        self.tx
            .send(Delivery {
                stale: true,
                indication,
            })
            .is_ok()
    }
}

/// Ordered, mode-checked consumer side of the indication stream
pub struct IndicationChannel {
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Delivery>>>,
    mode: Mutex<DeliveryMode>,
    listeners: Arc<std::sync::RwLock<Vec<Subscription>>>,
    calls: Arc<CallStateTracker>,
}

impl IndicationChannel {
    /// Create a channel and the publisher that feeds it
    pub fn new() -> (Self, IndicationPublisher) {
        let (tx, rx) = mpsc::unbounded_channel();
        let calls = Arc::new(CallStateTracker::new());
        let channel = Self {
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            mode: Mutex::new(DeliveryMode::Idle),
            listeners: Arc::new(std::sync::RwLock::new(Vec::new())),
            calls: calls.clone(),
        };
        (channel, IndicationPublisher { tx, calls })
    }

    /// Register a push listener; pins the channel to push delivery
    ///
    /// Fails with `ModeConflict` if the channel is already being polled.
    /// Returns a subscription id for [`unsubscribe`](Self::unsubscribe).
    pub fn subscribe(&self, listener: Arc<dyn IndicationListener>) -> BusResult<Uuid> {
        let mut mode = self.mode.lock();
        match *mode {
            DeliveryMode::Pull => return Err(BusError::ModeConflict),
            DeliveryMode::Push => {}
            DeliveryMode::Idle => {
                let rx = self
                    .rx
                    .clone()
                    .try_lock_owned()
                    .map_err(|_| BusError::ModeConflict)?;
                *mode = DeliveryMode::Push;
                // The listener is registered before the delivery task
                // starts, so indications already queued are not missed.
                let id = Uuid::new_v4();
                self.listeners
                    .write()
                    .unwrap()
                    .push(Subscription { id, listener });
                tokio::spawn(push_loop(rx, self.listeners.clone()));
                return Ok(id);
            }
        }
        let id = Uuid::new_v4();
        self.listeners
            .write()
            .unwrap()
            .push(Subscription { id, listener });
        Ok(id)
    }

    /// Remove a push listener
    ///
    /// Returns `true` if the subscription existed.
    pub fn unsubscribe(&self, id: Uuid) -> bool {
        let mut listeners = self.listeners.write().unwrap();
        if let Some(position) = listeners.iter().position(|sub| sub.id == id) {
            listeners.remove(position);
            true
        } else {
            false
        }
    }

    /// Number of active push listeners
    pub fn subscriber_count(&self) -> usize {
        self.listeners.read().unwrap().len()
    }

    /// Pull the next fresh indication, waiting up to `timeout`
    ///
    /// Returns `Ok(None)` on timeout or when the engine session ended.
    /// Fails with `ModeConflict` if the channel has push listeners or
    /// another caller is already polling; queued indications are untouched
    /// by the failed attempt.
    pub async fn poll(&self, timeout: std::time::Duration) -> BusResult<Option<Indication>> {
        {
            let mut mode = self.mode.lock();
            match *mode {
                DeliveryMode::Push => return Err(BusError::ModeConflict),
                DeliveryMode::Idle => *mode = DeliveryMode::Pull,
                DeliveryMode::Pull => {}
            }
        }
        let mut rx = self
            .rx
            .clone()
            .try_lock_owned()
            .map_err(|_| BusError::ModeConflict)?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            match tokio::time::timeout(deadline - now, rx.recv()).await {
                Err(_) => return Ok(None),
                Ok(None) => return Ok(None),
                Ok(Some(delivery)) => {
                    if delivery.stale {
                        // Logged at publish time; pull consumers never see
                        // stale traffic.
                        continue;
                    }
                    return Ok(Some(delivery.indication));
                }
            }
        }
    }

    /// Observed state of a call token, if the bus has seen it
    pub fn call_state(&self, token: &str) -> Option<CallState> {
        self.calls.state(token)
    }
}

async fn push_loop(
    mut rx: tokio::sync::OwnedMutexGuard<mpsc::UnboundedReceiver<Delivery>>,
    listeners: Arc<std::sync::RwLock<Vec<Subscription>>>,
) {
    while let Some(delivery) = rx.recv().await {
        let snapshot: Vec<Subscription> = listeners.read().unwrap().clone();
        for subscription in snapshot {
            if delivery.stale {
                subscription.listener.on_stale(delivery.indication.clone()).await;
            } else {
                subscription
                    .listener
                    .on_indication(delivery.indication.clone())
                    .await;
            }
        }
    }
    tracing::debug!("indication delivery task exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{CallClearedInfo, CallProgressInfo};
    use std::time::Duration;

    struct Recorder {
        seen: Arc<Mutex<Vec<(Indication, bool)>>>,
    }

    #[async_trait]
    impl IndicationListener for Recorder {
        async fn on_indication(&self, indication: Indication) {
            self.seen.lock().push((indication, false));
        }
        async fn on_stale(&self, indication: Indication) {
            self.seen.lock().push((indication, true));
        }
    }

    fn proceeding(token: &str) -> Indication {
        Indication::Proceeding {
            call_token: token.to_string(),
        }
    }

    fn established(token: &str) -> Indication {
        Indication::Established(CallProgressInfo {
            call_token: token.to_string(),
            party_a: None,
            party_b: None,
        })
    }

    fn cleared(token: &str) -> Indication {
        Indication::CallCleared(CallClearedInfo {
            call_token: token.to_string(),
            reason: None,
        })
    }

    #[tokio::test]
    async fn listeners_see_indications_in_publish_order() {
        let (channel, publisher) = IndicationChannel::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        channel
            .subscribe(Arc::new(Recorder { seen: seen.clone() }))
            .unwrap();

        publisher.publish(proceeding("t1"));
        publisher.publish(established("t1"));
        publisher.publish(cleared("t1"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let order: Vec<_> = seen.lock().iter().map(|(i, _)| i.kind()).collect();
        assert_eq!(
            order,
            vec![
                crate::envelope::IndicationKind::Proceeding,
                crate::envelope::IndicationKind::Established,
                crate::envelope::IndicationKind::CallCleared,
            ]
        );
    }

    #[tokio::test]
    async fn indications_queued_before_subscribe_are_not_lost() {
        let (channel, publisher) = IndicationChannel::new();
        publisher.publish(proceeding("t1"));
        publisher.publish(established("t1"));

        let seen = Arc::new(Mutex::new(Vec::new()));
        channel
            .subscribe(Arc::new(Recorder { seen: seen.clone() }))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn poll_on_subscribed_channel_is_mode_conflict() {
        let (channel, _publisher) = IndicationChannel::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        channel.subscribe(Arc::new(Recorder { seen })).unwrap();

        let err = channel.poll(Duration::from_millis(10)).await.unwrap_err();
        assert_eq!(err, BusError::ModeConflict);
    }

    #[tokio::test]
    async fn subscribe_on_polled_channel_is_mode_conflict() {
        let (channel, publisher) = IndicationChannel::new();
        publisher.publish(proceeding("t1"));
        assert!(channel
            .poll(Duration::from_millis(10))
            .await
            .unwrap()
            .is_some());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let err = channel.subscribe(Arc::new(Recorder { seen })).unwrap_err();
        assert_eq!(err, BusError::ModeConflict);
    }

    #[tokio::test]
    async fn poll_suppresses_stale_indications() {
        let (channel, publisher) = IndicationChannel::new();
        publisher.publish(cleared("t1"));
        publisher.publish(established("t1")); // stale: t1 already cleared
        publisher.publish(proceeding("t2"));

        let first = channel.poll(Duration::from_millis(50)).await.unwrap();
        assert_eq!(
            first.map(|i| i.kind()),
            Some(crate::envelope::IndicationKind::CallCleared)
        );
        let second = channel.poll(Duration::from_millis(50)).await.unwrap();
        assert_eq!(
            second.map(|i| i.kind()),
            Some(crate::envelope::IndicationKind::Proceeding)
        );
    }

    #[tokio::test]
    async fn stale_indications_surface_through_on_stale() {
        let (channel, publisher) = IndicationChannel::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        channel
            .subscribe(Arc::new(Recorder { seen: seen.clone() }))
            .unwrap();

        publisher.publish(cleared("t1"));
        publisher.publish(established("t1"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let tagged: Vec<_> = seen.lock().iter().map(|(i, stale)| (i.kind(), *stale)).collect();
        assert_eq!(
            tagged,
            vec![
                (crate::envelope::IndicationKind::CallCleared, false),
                (crate::envelope::IndicationKind::Established, true),
            ]
        );
    }

    #[tokio::test]
    async fn unsubscribe_removes_the_listener() {
        let (channel, _publisher) = IndicationChannel::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let id = channel.subscribe(Arc::new(Recorder { seen })).unwrap();
        assert_eq!(channel.subscriber_count(), 1);
        assert!(channel.unsubscribe(id));
        assert_eq!(channel.subscriber_count(), 0);
        assert!(!channel.unsubscribe(id));
    }
}
