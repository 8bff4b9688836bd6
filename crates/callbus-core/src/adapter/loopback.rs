//! Loopback engine adapter
//!
//! Simulates a well-behaved engine without any native library: commands
//! are acknowledged immediately and the asynchronous indications a real
//! engine would produce are emitted shortly after, in the right order for
//! each call token. The console dialer and the examples run against this
//! adapter; tests use it where a full engine conversation is wanted.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::sleep;

use super::EngineAdapter;
use crate::envelope::wire::{self, WireKind};
use crate::envelope::{
    CallClearedInfo, CallProgressInfo, Command, CompletedIvrInfo, Indication, MediaStreamStatusInfo,
    RegistrationState, RegistrationStatusInfo, TransferResult, TransferStatusInfo, UserInputInfo,
    WireMessage,
};
use crate::error::{BusError, BusResult};

/// Delay between consecutive simulated indications
const STEP: Duration = Duration::from_millis(25);

struct Inner {
    tx: mpsc::UnboundedSender<WireMessage>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<WireMessage>>,
    next_token: AtomicU64,
    initialised: AtomicBool,
    closed: AtomicBool,
}

/// An in-process engine simulation
#[derive(Clone)]
pub struct LoopbackAdapter {
    inner: Arc<Inner>,
}

impl Default for LoopbackAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackAdapter {
    /// Create a fresh loopback engine
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                tx,
                rx: tokio::sync::Mutex::new(rx),
                next_token: AtomicU64::new(1),
                initialised: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }

    fn assign_token(&self) -> String {
        format!("loop-{}", self.inner.next_token.fetch_add(1, Ordering::Relaxed))
    }

    fn emit_later(&self, indications: Vec<Indication>) {
        let tx = self.inner.tx.clone();
        tokio::spawn(async move {
            for indication in indications {
                sleep(STEP).await;
                if tx.send(wire::encode_indication(&indication)).is_err() {
                    break;
                }
            }
        });
    }

    fn handle_command(&self, command: &Command) -> WireMessage {
        match command {
            Command::SetUpCall(params) => {
                let token = self.assign_token();
                let party_a = params
                    .party_a
                    .clone()
                    .unwrap_or_else(|| "pc:*".to_string());
                self.emit_later(vec![
                    Indication::Proceeding {
                        call_token: token.clone(),
                    },
                    Indication::Alerting(CallProgressInfo {
                        call_token: token.clone(),
                        party_a: Some(party_a.clone()),
                        party_b: Some(params.party_b.clone()),
                    }),
                    Indication::Established(CallProgressInfo {
                        call_token: token.clone(),
                        party_a: Some(party_a),
                        party_b: Some(params.party_b.clone()),
                    }),
                ]);
                let mut ack = params.clone();
                ack.call_token = Some(token);
                wire::encode_command(&Command::SetUpCall(ack))
            }
            Command::Register(params) => {
                let state = if params.time_to_live == 0 {
                    RegistrationState::Removed
                } else {
                    RegistrationState::Successful
                };
                self.emit_later(vec![Indication::RegistrationStatus(RegistrationStatusInfo {
                    registration_id: params.registration_id(),
                    protocol: params.protocol.clone(),
                    server_name: params
                        .host_name
                        .clone()
                        .unwrap_or_else(|| "loopback".to_string()),
                    error: None,
                    state,
                })]);
                wire::encode_command(command)
            }
            Command::ClearCall(params) => {
                self.emit_later(vec![Indication::CallCleared(CallClearedInfo {
                    call_token: params.call_token.clone(),
                    reason: params.reason.clone(),
                })]);
                wire::encode_command(command)
            }
            Command::TransferCall(params) => {
                let mut emissions = vec![Indication::TransferStatus(TransferStatusInfo {
                    call_token: params.call_token.clone(),
                    result: TransferResult::Success,
                    info: Some(format!("transferred to {}", params.party_b)),
                })];
                if params.party_b.starts_with("ivr:") {
                    emissions.push(Indication::CompletedIvr(CompletedIvrInfo {
                        call_token: params.call_token.clone(),
                        variables: Default::default(),
                    }));
                }
                emissions.push(Indication::CallCleared(CallClearedInfo {
                    call_token: params.call_token.clone(),
                    reason: Some("EndedByCallForwarded".to_string()),
                }));
                self.emit_later(emissions);
                wire::encode_command(command)
            }
            Command::SendUserInput(params) => {
                // Echo the digits back as if the far end replayed them.
                self.emit_later(vec![Indication::UserInput(UserInputInfo {
                    call_token: params.call_token.clone(),
                    input: params.input.clone(),
                    duration_ms: params.duration_ms,
                })]);
                wire::encode_command(command)
            }
            Command::SetMediaStreamState(params) => {
                self.emit_later(vec![Indication::MediaStreamStatus(MediaStreamStatusInfo {
                    call_token: params.call_token.clone(),
                    identifier: "1".to_string(),
                    stream_type: params.stream_type.clone(),
                    state: params.state,
                    format: Some("PCM-16".to_string()),
                })]);
                wire::encode_command(command)
            }
            // Settings, hold/retrieve, recording and user data are
            // acknowledged without follow-up traffic.
            other => wire::encode_command(other),
        }
    }
}

#[async_trait]
impl EngineAdapter for LoopbackAdapter {
    async fn initialise(&self, options: &str) -> BusResult<()> {
        if options.trim().is_empty() {
            return Err(BusError::transport("empty engine options"));
        }
        self.inner.closed.store(false, Ordering::SeqCst);
        self.inner.initialised.store(true, Ordering::SeqCst);
        tracing::debug!(options = %options, "loopback engine initialised");
        Ok(())
    }

    async fn shutdown(&self) -> BusResult<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.initialised.store(false, Ordering::SeqCst);
        tracing::debug!("loopback engine shut down");
        Ok(())
    }

    async fn get_message(&self, timeout: Duration) -> BusResult<Option<WireMessage>> {
        if self.inner.closed.load(Ordering::SeqCst) {
            sleep(timeout.min(Duration::from_millis(10))).await;
            return Ok(None);
        }
        let mut rx = self.inner.rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(message)) => Ok(Some(message)),
            Ok(None) => Ok(None),
            Err(_) => Ok(None),
        }
    }

    async fn send_message(&self, message: WireMessage) -> BusResult<WireMessage> {
        if !self.inner.initialised.load(Ordering::SeqCst) {
            return Err(BusError::transport("loopback engine not initialised"));
        }
        if message.kind == WireKind::IndCommandError {
            return Err(BusError::transport("indication sent on the command path"));
        }
        let command = wire::decode_command(message)?;
        Ok(self.handle_command(&command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::SetUpCallParams;

    #[tokio::test]
    async fn set_up_call_is_acknowledged_with_a_token() {
        let adapter = LoopbackAdapter::new();
        adapter.initialise("sip pc").await.unwrap();

        let command = Command::SetUpCall(SetUpCallParams::to("sip:500@example.com"));
        let ack = adapter
            .send_message(wire::encode_command(&command))
            .await
            .unwrap();
        let ack = wire::decode_ack(ack).unwrap();
        match ack {
            Command::SetUpCall(params) => assert!(params.call_token.is_some()),
            other => panic!("unexpected ack: {:?}", other),
        }
    }

    #[tokio::test]
    async fn call_progress_arrives_in_order() {
        let adapter = LoopbackAdapter::new();
        adapter.initialise("sip pc").await.unwrap();

        let command = Command::SetUpCall(SetUpCallParams::to("sip:500@example.com"));
        adapter
            .send_message(wire::encode_command(&command))
            .await
            .unwrap();

        let mut kinds = Vec::new();
        for _ in 0..3 {
            let message = adapter
                .get_message(Duration::from_secs(1))
                .await
                .unwrap()
                .expect("expected an indication");
            kinds.push(wire::decode_indication(message).unwrap().kind());
        }
        assert_eq!(
            kinds,
            vec![
                crate::envelope::IndicationKind::Proceeding,
                crate::envelope::IndicationKind::Alerting,
                crate::envelope::IndicationKind::Established,
            ]
        );
    }

    #[tokio::test]
    async fn send_before_initialise_fails() {
        let adapter = LoopbackAdapter::new();
        let command = Command::SetUpCall(SetUpCallParams::to("sip:500@example.com"));
        let err = adapter
            .send_message(wire::encode_command(&command))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
