//! Engine-originated indications
//!
//! An [`Indication`] describes an asynchronous state change reported by the
//! engine: registration progress, call progress, media stream changes, user
//! input, call clearance. Indications are produced only by the engine
//! adapter and consumed only through the indication channel.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MediaState;
use crate::error::{BusError, BusResult};

/// Outcome states of a registration or subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistrationState {
    /// Successfully registered
    Successful,
    /// Successfully unregistered; no more retries are made
    Removed,
    /// Registration failed; the error field carries detail
    Failed,
    /// Registrar went offline and a retry failed
    Retrying,
    /// Registration restored after a successful retry
    Restored,
}

impl std::fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RegistrationState::Successful => "successful",
            RegistrationState::Removed => "removed",
            RegistrationState::Failed => "failed",
            RegistrationState::Retrying => "retrying",
            RegistrationState::Restored => "restored",
        };
        write!(f, "{}", s)
    }
}

/// Status of one registration or subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationStatusInfo {
    /// Identifier the registration correlates against
    pub registration_id: String,
    /// Protocol prefix, e.g. "sip" or "h323"
    pub protocol: String,
    /// Name of the registration server
    pub server_name: String,
    /// Error detail when the state is `Failed` or `Retrying`
    pub error: Option<String>,
    /// Current state of the registration
    pub state: RegistrationState,
}

/// Details of an incoming call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingCallInfo {
    /// Engine-assigned token for the new call
    pub call_token: String,
    /// Local endpoint handling the call
    pub local_address: String,
    /// Address of the calling party
    pub remote_address: String,
    /// Display name of the calling party, if supplied
    pub remote_display_name: Option<String>,
    /// Address the caller dialed
    pub called_address: Option<String>,
    /// When the indication was received
    pub received_at: DateTime<Utc>,
}

/// Call progress details carried by alerting and established indications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallProgressInfo {
    /// Token of the call in progress
    pub call_token: String,
    /// Originating party, as the engine resolved it
    pub party_a: Option<String>,
    /// Destination party, as the engine resolved it
    pub party_b: Option<String>,
}

/// User input received from the remote party
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInputInfo {
    /// Token of the call the input arrived on
    pub call_token: String,
    /// The received input
    pub input: String,
    /// Tone duration in milliseconds, where applicable
    pub duration_ms: Option<u32>,
}

/// Message waiting notification from a subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageWaitingInfo {
    /// Party the messages are waiting for
    pub party: String,
    /// Kind of message waiting, e.g. "voice"
    pub kind: String,
    /// Extra detail, e.g. waiting counts
    pub extra_info: Option<String>,
}

/// States a monitored line appearance can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LineState {
    /// Line is available
    Idle,
    /// Line is in use
    Trying,
    /// Line is dialing
    Proceeding,
    /// Line is ringing
    Ringing,
    /// Line is connected
    Connected,
    /// Line appearance subscription succeeded
    Subscribed,
    /// Line appearance subscription removed
    Unsubscribed,
}

/// Line appearance change from a subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAppearanceInfo {
    /// URI of the monitored line
    pub line: String,
    /// Reported state of the line
    pub state: LineState,
    /// Appearance instance number, when the notifier provides one
    pub appearance: Option<i32>,
}

/// Media stream opened/closed/paused/resumed on a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaStreamStatusInfo {
    /// Token of the call the stream belongs to
    pub call_token: String,
    /// Engine identifier for the stream instance
    pub identifier: String,
    /// Stream selector, e.g. "audio out"
    pub stream_type: String,
    /// State the stream moved to
    pub state: MediaState,
    /// Media format in use, e.g. "PCM-16"
    pub format: Option<String>,
}

/// Call clearance report; terminal for the token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallClearedInfo {
    /// Token of the cleared call
    pub call_token: String,
    /// Reason for clearance, when the engine reports one
    pub reason: Option<String>,
}

/// Result of a transfer attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferResult {
    /// Transfer is progressing
    Progress,
    /// Transfer completed
    Success,
    /// Transfer failed
    Failed,
}

/// Progress of a call transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStatusInfo {
    /// Token of the call being transferred
    pub call_token: String,
    /// Transfer outcome so far
    pub result: TransferResult,
    /// Additional engine-supplied detail
    pub info: Option<String>,
}

/// Variables collected by a completed IVR script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedIvrInfo {
    /// Token of the call the script ran on
    pub call_token: String,
    /// Variables set during the script
    pub variables: HashMap<String, String>,
}

/// Copyable discriminant for [`Indication`] variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndicationKind {
    /// A command failed inside the engine
    CommandError,
    /// Registration or subscription status changed
    RegistrationStatus,
    /// An incoming call arrived
    IncomingCall,
    /// An outgoing call is proceeding
    Proceeding,
    /// The remote party is alerting
    Alerting,
    /// The call is established
    Established,
    /// User input arrived from the remote party
    UserInput,
    /// Messages are waiting
    MessageWaiting,
    /// A monitored line appearance changed
    LineAppearance,
    /// A media stream changed state
    MediaStreamStatus,
    /// A call was cleared
    CallCleared,
    /// A transfer progressed
    TransferStatus,
    /// An IVR script completed
    CompletedIvr,
}

impl IndicationKind {
    /// Stable name for logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            IndicationKind::CommandError => "CommandError",
            IndicationKind::RegistrationStatus => "RegistrationStatus",
            IndicationKind::IncomingCall => "IncomingCall",
            IndicationKind::Proceeding => "Proceeding",
            IndicationKind::Alerting => "Alerting",
            IndicationKind::Established => "Established",
            IndicationKind::UserInput => "UserInput",
            IndicationKind::MessageWaiting => "MessageWaiting",
            IndicationKind::LineAppearance => "LineAppearance",
            IndicationKind::MediaStreamStatus => "MediaStreamStatus",
            IndicationKind::CallCleared => "CallCleared",
            IndicationKind::TransferStatus => "TransferStatus",
            IndicationKind::CompletedIvr => "CompletedIvr",
        }
    }
}

impl std::fmt::Display for IndicationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// An asynchronous, engine-originated event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Indication {
    /// A command failed inside the engine
    CommandError {
        /// Engine-supplied failure reason
        reason: String,
    },
    /// Registration or subscription status changed
    RegistrationStatus(RegistrationStatusInfo),
    /// An incoming call arrived
    IncomingCall(IncomingCallInfo),
    /// An outgoing call is proceeding
    Proceeding {
        /// Token of the proceeding call
        call_token: String,
    },
    /// The remote party is alerting
    Alerting(CallProgressInfo),
    /// The call is established
    Established(CallProgressInfo),
    /// User input arrived from the remote party
    UserInput(UserInputInfo),
    /// Messages are waiting
    MessageWaiting(MessageWaitingInfo),
    /// A monitored line appearance changed
    LineAppearance(LineAppearanceInfo),
    /// A media stream changed state
    MediaStreamStatus(MediaStreamStatusInfo),
    /// A call was cleared
    CallCleared(CallClearedInfo),
    /// A transfer progressed
    TransferStatus(TransferStatusInfo),
    /// An IVR script completed
    CompletedIvr(CompletedIvrInfo),
}

impl Indication {
    /// Get this indication's discriminant
    pub fn kind(&self) -> IndicationKind {
        match self {
            Indication::CommandError { .. } => IndicationKind::CommandError,
            Indication::RegistrationStatus(_) => IndicationKind::RegistrationStatus,
            Indication::IncomingCall(_) => IndicationKind::IncomingCall,
            Indication::Proceeding { .. } => IndicationKind::Proceeding,
            Indication::Alerting(_) => IndicationKind::Alerting,
            Indication::Established(_) => IndicationKind::Established,
            Indication::UserInput(_) => IndicationKind::UserInput,
            Indication::MessageWaiting(_) => IndicationKind::MessageWaiting,
            Indication::LineAppearance(_) => IndicationKind::LineAppearance,
            Indication::MediaStreamStatus(_) => IndicationKind::MediaStreamStatus,
            Indication::CallCleared(_) => IndicationKind::CallCleared,
            Indication::TransferStatus(_) => IndicationKind::TransferStatus,
            Indication::CompletedIvr(_) => IndicationKind::CompletedIvr,
        }
    }

    /// The call token this indication references
    ///
    /// Fails with `WrongVariant` for indications not tied to a call
    /// (command errors, registration status, message waiting, line
    /// appearances).
    pub fn call_token(&self) -> BusResult<&str> {
        match self {
            Indication::IncomingCall(info) => Ok(&info.call_token),
            Indication::Proceeding { call_token } => Ok(call_token),
            Indication::Alerting(info) => Ok(&info.call_token),
            Indication::Established(info) => Ok(&info.call_token),
            Indication::UserInput(info) => Ok(&info.call_token),
            Indication::MediaStreamStatus(info) => Ok(&info.call_token),
            Indication::CallCleared(info) => Ok(&info.call_token),
            Indication::TransferStatus(info) => Ok(&info.call_token),
            Indication::CompletedIvr(info) => Ok(&info.call_token),
            other => Err(BusError::wrong_variant(other.kind().name(), "call_token")),
        }
    }

    /// The key this indication resolves pending operations against
    ///
    /// Call indications correlate by token; registration status correlates
    /// by registration identifier. Indications with no correlation
    /// semantics return `None`.
    pub fn correlation_key(&self) -> Option<String> {
        match self {
            Indication::RegistrationStatus(info) => Some(info.registration_id.clone()),
            other => other.call_token().ok().map(str::to_string),
        }
    }
}
