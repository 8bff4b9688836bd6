//! End-to-end properties of the message bus
//!
//! These tests drive the full stack (manager, dispatcher, correlation,
//! channel) against scripted adapters emitting known sequences, the same
//! way an application would drive a real engine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use callbus_core::envelope::wire;
use callbus_core::envelope::{
    CallClearedInfo, CallProgressInfo, Command, CommandKind, Indication, IndicationKind,
    RegistrationParams, SetUpCallParams, WireMessage,
};
use callbus_core::{
    BusError, BusResult, EngineAdapter, EngineManager, EngineOptions, IndicationListener,
    LoopbackAdapter, PendingOperation,
};

/// Adapter that acknowledges every command by echoing it and emits only
/// the indications a test scripts into it.
struct ScriptedAdapter {
    tx: mpsc::UnboundedSender<WireMessage>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<WireMessage>>,
}

impl ScriptedAdapter {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    fn emit(&self, indication: Indication) {
        self.tx
            .send(wire::encode_indication(&indication))
            .expect("scripted channel closed");
    }
}

#[async_trait]
impl EngineAdapter for ScriptedAdapter {
    async fn initialise(&self, _options: &str) -> BusResult<()> {
        Ok(())
    }
    async fn shutdown(&self) -> BusResult<()> {
        Ok(())
    }
    async fn get_message(&self, timeout: Duration) -> BusResult<Option<WireMessage>> {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(message) => Ok(message),
            Err(_) => Ok(None),
        }
    }
    async fn send_message(&self, message: WireMessage) -> BusResult<WireMessage> {
        Ok(message)
    }
}

/// Listener recording fresh and stale deliveries separately.
#[derive(Default)]
struct Recorder {
    fresh: Mutex<Vec<Indication>>,
    stale: Mutex<Vec<Indication>>,
}

#[async_trait]
impl IndicationListener for Recorder {
    async fn on_indication(&self, indication: Indication) {
        self.fresh.lock().push(indication);
    }
    async fn on_stale(&self, indication: Indication) {
        self.stale.lock().push(indication);
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("callbus_core=debug")
        .try_init();
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 2s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn proceeding(token: &str) -> Indication {
    Indication::Proceeding {
        call_token: token.to_string(),
    }
}

fn progress(token: &str) -> CallProgressInfo {
    CallProgressInfo {
        call_token: token.to_string(),
        party_a: None,
        party_b: None,
    }
}

fn cleared(token: &str) -> Indication {
    Indication::CallCleared(CallClearedInfo {
        call_token: token.to_string(),
        reason: None,
    })
}

#[tokio::test]
async fn dispatch_without_live_handle_fails_and_registers_nothing() {
    init_logging();
    let manager = EngineManager::new(Arc::new(ScriptedAdapter::new()));
    manager.initialise(&EngineOptions::default()).await.unwrap();
    let dispatcher = manager.dispatcher().await.unwrap();
    manager.shutdown().await.unwrap();

    let err = dispatcher
        .dispatch(Command::Register(RegistrationParams::new("sip", "a@b")))
        .await
        .unwrap_err();
    assert_eq!(err, BusError::EngineNotInitialised);
    assert!(dispatcher.correlations().is_empty());
}

#[tokio::test]
async fn indications_for_a_token_are_delivered_in_production_order() {
    let adapter = Arc::new(ScriptedAdapter::new());
    let manager = EngineManager::new(adapter.clone());
    manager.initialise(&EngineOptions::default()).await.unwrap();
    let channel = manager.channel().await.unwrap();

    let recorder = Arc::new(Recorder::default());
    channel.subscribe(recorder.clone()).unwrap();

    adapter.emit(proceeding("T"));
    adapter.emit(Indication::Alerting(progress("T")));
    adapter.emit(Indication::Established(progress("T")));
    adapter.emit(cleared("T"));

    wait_until(|| recorder.fresh.lock().len() == 4).await;
    let order: Vec<IndicationKind> = recorder.fresh.lock().iter().map(|i| i.kind()).collect();
    assert_eq!(
        order,
        vec![
            IndicationKind::Proceeding,
            IndicationKind::Alerting,
            IndicationKind::Established,
            IndicationKind::CallCleared,
        ]
    );
    assert!(recorder.stale.lock().is_empty());

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn cancelled_operation_turns_late_indication_stale() {
    init_logging();
    let adapter = Arc::new(ScriptedAdapter::new());
    let manager = EngineManager::new(adapter.clone());
    manager.initialise(&EngineOptions::default()).await.unwrap();
    let dispatcher = manager.dispatcher().await.unwrap();
    let channel = manager.channel().await.unwrap();

    let recorder = Arc::new(Recorder::default());
    channel.subscribe(recorder.clone()).unwrap();

    let registry = dispatcher.correlations();
    registry
        .register(PendingOperation::new(CommandKind::ClearCall, "T1"))
        .unwrap();
    registry.cancel("T1").unwrap();

    adapter.emit(cleared("T1"));

    wait_until(|| recorder.stale.lock().len() == 1).await;
    assert_eq!(recorder.stale.lock()[0].kind(), IndicationKind::CallCleared);
    assert!(recorder.fresh.lock().is_empty());
    // The cancelled entry was consumed by the late indication.
    assert!(!registry.contains("T1"));

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn poll_against_subscribed_channel_conflicts_without_losing_traffic() {
    let adapter = Arc::new(ScriptedAdapter::new());
    let manager = EngineManager::new(adapter.clone());
    manager.initialise(&EngineOptions::default()).await.unwrap();
    let channel = manager.channel().await.unwrap();

    let recorder = Arc::new(Recorder::default());
    channel.subscribe(recorder.clone()).unwrap();

    adapter.emit(proceeding("T2"));
    adapter.emit(Indication::Established(progress("T2")));

    let err = channel.poll(Duration::from_millis(20)).await.unwrap_err();
    assert_eq!(err, BusError::ModeConflict);

    // The failed poll dropped nothing; the subscriber still sees both.
    wait_until(|| recorder.fresh.lock().len() == 2).await;

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn loopback_call_acknowledges_with_token_then_progresses_in_order() {
    let manager = EngineManager::new(Arc::new(LoopbackAdapter::new()));
    manager.initialise(&EngineOptions::default()).await.unwrap();
    let dispatcher = manager.dispatcher().await.unwrap();
    let channel = manager.channel().await.unwrap();

    let recorder = Arc::new(Recorder::default());
    channel.subscribe(recorder.clone()).unwrap();

    let (ack, ticket) = dispatcher
        .dispatch_tracked(Command::SetUpCall(SetUpCallParams::to("sip:500@example.com")))
        .await
        .unwrap();
    let token = match &ack {
        Command::SetUpCall(params) => params.call_token.clone().expect("token in ack"),
        other => panic!("unexpected ack {:?}", other),
    };

    // The first correlated indication resolves the ticket.
    let outcome = tokio::time::timeout(Duration::from_secs(2), ticket.unwrap().outcome())
        .await
        .unwrap();
    assert_eq!(outcome.map(|i| i.kind()), Some(IndicationKind::Proceeding));

    wait_until(|| {
        recorder
            .fresh
            .lock()
            .iter()
            .filter(|i| i.call_token().map(|t| t == token).unwrap_or(false))
            .count()
            >= 3
    })
    .await;
    let kinds: Vec<IndicationKind> = recorder
        .fresh
        .lock()
        .iter()
        .filter(|i| i.call_token().map(|t| t == token).unwrap_or(false))
        .map(|i| i.kind())
        .collect();
    assert_eq!(
        kinds[..3].to_vec(),
        vec![
            IndicationKind::Proceeding,
            IndicationKind::Alerting,
            IndicationKind::Established,
        ]
    );

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_drains_pollers_and_allows_reinitialise() {
    let adapter = Arc::new(ScriptedAdapter::new());
    let manager = EngineManager::new(adapter.clone());
    manager.initialise(&EngineOptions::default()).await.unwrap();
    let channel = manager.channel().await.unwrap();

    adapter.emit(proceeding("T3"));
    let first = channel.poll(Duration::from_secs(1)).await.unwrap();
    assert_eq!(first.map(|i| i.kind()), Some(IndicationKind::Proceeding));

    manager.shutdown().await.unwrap();
    assert_eq!(channel.poll(Duration::from_millis(100)).await.unwrap(), None);

    manager.initialise(&EngineOptions::default()).await.unwrap();
    assert!(manager.is_initialised().await);
    manager.shutdown().await.unwrap();
}
