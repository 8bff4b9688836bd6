//! Correlation of outstanding commands with their resolving indications
//!
//! The dispatcher registers a [`PendingOperation`] for every command whose
//! outcome arrives later as an indication; the indication consumer resolves
//! it when the matching indication shows up. Entries the engine never
//! answers are reclaimed by a periodic sweep so a lost indication cannot
//! leak registry entries forever.
//!
//! The dispatcher is the only writer on the `register` path and the
//! consumer the only writer on the `resolve` path; both synchronize on the
//! per-key map entry, so a command registered concurrently with its
//! resolving indication cannot race.

use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::envelope::{CommandKind, Indication};
use crate::error::{BusError, BusResult};

/// Default age after which unresolved entries are swept
pub const DEFAULT_CORRELATION_TIMEOUT: Duration = Duration::from_secs(30);

/// One outstanding command awaiting its correlated indication
#[derive(Debug)]
pub struct PendingOperation {
    kind: CommandKind,
    key: String,
    registered_at: Instant,
    cancelled: bool,
    notify: Option<oneshot::Sender<Indication>>,
}

impl PendingOperation {
    /// Create a pending operation for `kind`, keyed by a call token or
    /// registration identifier
    pub fn new(kind: CommandKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
            registered_at: Instant::now(),
            cancelled: false,
            notify: None,
        }
    }

    /// Create a pending operation plus a ticket resolved by the first
    /// correlated indication
    pub fn with_ticket(kind: CommandKind, key: impl Into<String>) -> (Self, CorrelationTicket) {
        let (tx, rx) = oneshot::channel();
        let mut op = Self::new(kind, key);
        op.notify = Some(tx);
        (op, CorrelationTicket { rx })
    }

    /// The command kind that created this entry
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// The call token or registration identifier this entry resolves
    /// against
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether the caller abandoned this operation
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Age of this entry relative to `now`
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.registered_at)
    }

    /// Hand the resolving indication to an awaiting ticket, if any
    pub(crate) fn complete(mut self, indication: Indication) {
        if let Some(tx) = self.notify.take() {
            // The ticket may have been dropped; that is not an error.
            let _ = tx.send(indication);
        }
    }
}

/// Awaits the first indication correlated to a dispatched command
///
/// The ticket resolves with `None` if the entry is cancelled, swept, or the
/// engine shuts down before an indication arrives. Callers bound the wait
/// themselves (`tokio::time::timeout`).
#[derive(Debug)]
pub struct CorrelationTicket {
    rx: oneshot::Receiver<Indication>,
}

impl CorrelationTicket {
    /// Wait for the correlated indication
    pub async fn outcome(self) -> Option<Indication> {
        self.rx.await.ok()
    }
}

/// Maps call tokens and registration identifiers to pending operations
#[derive(Debug)]
pub struct CorrelationRegistry {
    entries: DashMap<String, PendingOperation>,
    timeout: Duration,
}

impl Default for CorrelationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationRegistry {
    /// Create a registry with the default entry timeout
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_CORRELATION_TIMEOUT)
    }

    /// Create a registry whose entries expire after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            timeout,
        }
    }

    /// The configured entry timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register a pending operation under its key
    ///
    /// Fails with `DuplicateKey` if an entry for the key already exists.
    pub fn register(&self, operation: PendingOperation) -> BusResult<()> {
        match self.entries.entry(operation.key.clone()) {
            Entry::Occupied(_) => Err(BusError::DuplicateKey {
                key: operation.key.clone(),
            }),
            Entry::Vacant(slot) => {
                tracing::debug!(key = %operation.key, kind = %operation.kind, "registered pending operation");
                slot.insert(operation);
                Ok(())
            }
        }
    }

    /// Remove and return the entry for `key`
    ///
    /// Fails with `NotFound` if no entry exists. Removal is atomic with
    /// respect to concurrent `register` and `sweep` calls on the same key.
    pub fn resolve(&self, key: &str) -> BusResult<PendingOperation> {
        self.entries
            .remove(key)
            .map(|(_, operation)| operation)
            .ok_or_else(|| BusError::NotFound {
                key: key.to_string(),
            })
    }

    /// Abandon the entry for `key` without removing it
    ///
    /// The underlying engine operation is not stopped; the entry stays as
    /// a cancellation marker so the late indication is recognized as stale
    /// when it finally arrives.
    pub fn cancel(&self, key: &str) -> BusResult<()> {
        let mut entry = self.entries.get_mut(key).ok_or_else(|| BusError::NotFound {
            key: key.to_string(),
        })?;
        entry.cancelled = true;
        entry.notify = None;
        tracing::debug!(key = %key, "cancelled pending operation");
        Ok(())
    }

    /// Whether an entry exists for `key`
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of outstanding entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry has no outstanding entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove and return every entry older than the configured timeout
    ///
    /// Guards against indications the engine lost: an entry nobody ever
    /// resolves would otherwise live forever.
    pub fn sweep(&self, now: Instant) -> Vec<PendingOperation> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.age(now) >= self.timeout)
            .map(|entry| entry.key().clone())
            .collect();

        let mut swept = Vec::with_capacity(expired.len());
        for key in expired {
            // Re-check the age under the entry lock; the consumer may have
            // resolved and re-registered the key since the scan.
            if let Some((_, operation)) = self
                .entries
                .remove_if(&key, |_, operation| operation.age(now) >= self.timeout)
            {
                tracing::warn!(
                    key = %operation.key,
                    kind = %operation.kind,
                    age_ms = operation.age(now).as_millis() as u64,
                    "swept unresolved pending operation"
                );
                swept.push(operation);
            }
        }
        swept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{CallClearedInfo, Indication};

    #[test]
    fn register_rejects_duplicate_keys() {
        let registry = CorrelationRegistry::new();
        registry
            .register(PendingOperation::new(CommandKind::SetUpCall, "t1"))
            .unwrap();
        let err = registry
            .register(PendingOperation::new(CommandKind::ClearCall, "t1"))
            .unwrap_err();
        assert_eq!(
            err,
            BusError::DuplicateKey {
                key: "t1".to_string()
            }
        );
    }

    #[test]
    fn resolve_removes_the_entry() {
        let registry = CorrelationRegistry::new();
        registry
            .register(PendingOperation::new(CommandKind::Register, "sip:a@b"))
            .unwrap();
        let operation = registry.resolve("sip:a@b").unwrap();
        assert_eq!(operation.kind(), CommandKind::Register);
        assert!(!registry.contains("sip:a@b"));
        assert!(matches!(
            registry.resolve("sip:a@b"),
            Err(BusError::NotFound { .. })
        ));
    }

    #[test]
    fn cancel_marks_without_removing() {
        let registry = CorrelationRegistry::new();
        registry
            .register(PendingOperation::new(CommandKind::SetUpCall, "t1"))
            .unwrap();
        registry.cancel("t1").unwrap();
        assert!(registry.contains("t1"));
        let operation = registry.resolve("t1").unwrap();
        assert!(operation.is_cancelled());
    }

    #[test]
    fn sweep_removes_only_expired_entries() {
        let registry = CorrelationRegistry::with_timeout(Duration::from_millis(50));
        registry
            .register(PendingOperation::new(CommandKind::Register, "old"))
            .unwrap();
        let later = Instant::now() + Duration::from_millis(100);
        registry
            .register(PendingOperation {
                kind: CommandKind::Register,
                key: "young".to_string(),
                registered_at: later,
                cancelled: false,
                notify: None,
            })
            .unwrap();

        let swept = registry.sweep(later);
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].key(), "old");
        assert!(registry.contains("young"));
    }

    #[tokio::test]
    async fn ticket_resolves_with_the_indication() {
        let registry = CorrelationRegistry::new();
        let (operation, ticket) = PendingOperation::with_ticket(CommandKind::SetUpCall, "t1");
        registry.register(operation).unwrap();

        let cleared = Indication::CallCleared(CallClearedInfo {
            call_token: "t1".to_string(),
            reason: None,
        });
        registry.resolve("t1").unwrap().complete(cleared.clone());

        assert_eq!(ticket.outcome().await, Some(cleared));
    }

    #[tokio::test]
    async fn cancelled_ticket_resolves_none() {
        let registry = CorrelationRegistry::new();
        let (operation, ticket) = PendingOperation::with_ticket(CommandKind::SetUpCall, "t1");
        registry.register(operation).unwrap();
        registry.cancel("t1").unwrap();
        assert_eq!(ticket.outcome().await, None);
    }
}
