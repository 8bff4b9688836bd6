//! Flat wire representation exchanged with the engine adapter
//!
//! The native engine speaks a flat, union-shaped record: one kind tag plus
//! a superset of optional fields, of which only the fields for the current
//! kind are meaningful. This module is the only place that shape exists;
//! everything above the adapter boundary works with the typed
//! [`Command`](super::Command) and [`Indication`](super::Indication)
//! envelopes.
//!
//! Decoding validates that the fields required by the kind tag are present
//! and reports anything malformed as a transport error.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::command::{
    AnswerCallParams, ClearCallParams, Command, GeneralParams, MediaStreamParams, ProtocolParams,
    RecordingParams, RegistrationParams, SetUpCallParams, SetUserDataParams, TransferParams,
    UserInputParams,
};
use super::indication::{
    CallClearedInfo, CallProgressInfo, CompletedIvrInfo, Indication, IncomingCallInfo,
    LineAppearanceInfo, LineState, MediaStreamStatusInfo, MessageWaitingInfo, RegistrationState,
    RegistrationStatusInfo, TransferResult, TransferStatusInfo, UserInputInfo,
};
use super::MediaState;
use crate::error::{BusError, BusResult};

/// Kind tag of a wire message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WireKind {
    /// Command: apply global engine settings
    CmdSetGeneralParameters,
    /// Command: apply per-protocol settings
    CmdSetProtocolParameters,
    /// Command: register or subscribe
    CmdRegister,
    /// Command: place an outgoing call
    CmdSetUpCall,
    /// Command: answer an incoming call
    CmdAnswerCall,
    /// Command: hang up a call
    CmdClearCall,
    /// Command: hold a call
    CmdHoldCall,
    /// Command: retrieve a held call
    CmdRetrieveCall,
    /// Command: transfer a call
    CmdTransferCall,
    /// Command: send user input
    CmdSendUserInput,
    /// Command: change a media stream's state
    CmdSetMediaStreamState,
    /// Command: start recording
    CmdStartRecording,
    /// Command: stop recording
    CmdStopRecording,
    /// Command: attach user data
    CmdSetUserData,
    /// Indication: command failed inside the engine
    IndCommandError,
    /// Indication: registration status changed
    IndRegistrationStatus,
    /// Indication: incoming call
    IndIncomingCall,
    /// Indication: call proceeding
    IndProceeding,
    /// Indication: remote party alerting
    IndAlerting,
    /// Indication: call established
    IndEstablished,
    /// Indication: user input received
    IndUserInput,
    /// Indication: messages waiting
    IndMessageWaiting,
    /// Indication: line appearance changed
    IndLineAppearance,
    /// Indication: media stream changed state
    IndMediaStreamStatus,
    /// Indication: call cleared
    IndCallCleared,
    /// Indication: transfer progressed
    IndTransferStatus,
    /// Indication: IVR script completed
    IndCompletedIvr,
}

impl Default for WireKind {
    fn default() -> Self {
        WireKind::IndCommandError
    }
}

/// The engine's flat message record
///
/// Only the fields belonging to `kind` are meaningful; all others stay
/// `None`. This is the shape that would be marshalled across the native
/// boundary, kept behind the adapter trait.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Kind tag selecting which fields are meaningful
    pub kind: WireKind,

    // Shared call fields
    /// Call token
    pub call_token: Option<String>,
    /// Originating party
    pub party_a: Option<String>,
    /// Destination party
    pub party_b: Option<String>,
    /// Failure or clearance reason
    pub reason: Option<String>,

    // General parameter fields
    /// Auto-receive media types
    pub auto_rx_media: Option<String>,
    /// Auto-transmit media types
    pub auto_tx_media: Option<String>,
    /// NAT router address
    pub nat_router: Option<String>,
    /// STUN server host
    pub stun_server: Option<String>,
    /// Media format exclusion mask
    pub media_mask: Option<String>,
    /// Audio capture device
    pub audio_record_device: Option<String>,
    /// Audio playback device
    pub audio_play_device: Option<String>,

    // Protocol parameter fields
    /// Protocol prefix
    pub prefix: Option<String>,
    /// Local user name
    pub user_name: Option<String>,
    /// Display name
    pub display_name: Option<String>,
    /// Listen interface addresses
    pub interface_addresses: Option<String>,
    /// Newline-separated protocol options
    pub default_options: Option<String>,

    // Registration fields
    /// Registration protocol prefix
    pub protocol: Option<String>,
    /// Registered identifier
    pub identifier: Option<String>,
    /// Registrar host name
    pub host_name: Option<String>,
    /// Authentication user name
    pub auth_user_name: Option<String>,
    /// Authentication password
    pub password: Option<String>,
    /// Administrative entity
    pub admin_entity: Option<String>,
    /// Seconds between refreshes; zero unregisters
    pub time_to_live: Option<u32>,
    /// Seconds between restore attempts
    pub restore_time: Option<u32>,
    /// Subscription event package
    pub event_package: Option<String>,
    /// Correlation identifier for registration status
    pub registration_id: Option<String>,
    /// Registration server name
    pub server_name: Option<String>,
    /// Registration error detail
    pub error: Option<String>,
    /// Registration state
    pub registration_state: Option<RegistrationState>,

    // Incoming call fields
    /// Local endpoint handling the call
    pub local_address: Option<String>,
    /// Calling party address
    pub remote_address: Option<String>,
    /// Calling party display name
    pub remote_display_name: Option<String>,
    /// Address the caller dialed
    pub called_address: Option<String>,
    /// When the indication was produced
    pub received_at: Option<DateTime<Utc>>,

    // User input fields
    /// Input digits or text
    pub input: Option<String>,
    /// Tone duration in milliseconds
    pub duration_ms: Option<u32>,

    // Media stream fields
    /// Stream selector, e.g. "audio out"
    pub stream_type: Option<String>,
    /// Stream state
    pub media_state: Option<MediaState>,
    /// Stream instance identifier
    pub stream_identifier: Option<String>,
    /// Media format in use
    pub format: Option<String>,

    // Recording fields
    /// Recording file
    pub file: Option<String>,
    /// Recording channel count
    pub channels: Option<u32>,

    // User data field
    /// Opaque caller data
    pub user_data: Option<String>,

    // Message waiting fields
    /// Party the messages wait for
    pub party: Option<String>,
    /// Kind of waiting message
    pub message_kind: Option<String>,
    /// Extra message waiting detail
    pub extra_info: Option<String>,

    // Line appearance fields
    /// Monitored line URI
    pub line: Option<String>,
    /// Line state
    pub line_state: Option<LineState>,
    /// Appearance instance number
    pub appearance: Option<i32>,

    // Transfer fields
    /// Transfer outcome
    pub transfer_result: Option<TransferResult>,
    /// Transfer detail
    pub transfer_info: Option<String>,

    // IVR fields
    /// Variables set by a completed IVR script
    pub ivr_variables: Option<HashMap<String, String>>,
}

fn missing(kind: WireKind, field: &'static str) -> BusError {
    BusError::transport(format!("wire message {:?} is missing field {}", kind, field))
}

fn take(value: Option<String>, kind: WireKind, field: &'static str) -> BusResult<String> {
    value.ok_or_else(|| missing(kind, field))
}

/// Encode a command into the flat wire record
pub fn encode_command(command: &Command) -> WireMessage {
    match command {
        Command::SetGeneralParameters(p) => WireMessage {
            kind: WireKind::CmdSetGeneralParameters,
            auto_rx_media: p.auto_rx_media.clone(),
            auto_tx_media: p.auto_tx_media.clone(),
            nat_router: p.nat_router.clone(),
            stun_server: p.stun_server.clone(),
            media_mask: p.media_mask.clone(),
            audio_record_device: p.audio_record_device.clone(),
            audio_play_device: p.audio_play_device.clone(),
            ..Default::default()
        },
        Command::SetProtocolParameters(p) => WireMessage {
            kind: WireKind::CmdSetProtocolParameters,
            prefix: p.prefix.clone(),
            user_name: p.user_name.clone(),
            display_name: p.display_name.clone(),
            interface_addresses: p.interface_addresses.clone(),
            default_options: p.default_options.clone(),
            ..Default::default()
        },
        Command::Register(p) => WireMessage {
            kind: WireKind::CmdRegister,
            protocol: Some(p.protocol.clone()),
            identifier: p.identifier.clone(),
            host_name: p.host_name.clone(),
            auth_user_name: p.auth_user_name.clone(),
            password: p.password.clone(),
            admin_entity: p.admin_entity.clone(),
            time_to_live: Some(p.time_to_live),
            restore_time: p.restore_time,
            event_package: p.event_package.clone(),
            ..Default::default()
        },
        Command::SetUpCall(p) => WireMessage {
            kind: WireKind::CmdSetUpCall,
            party_a: p.party_a.clone(),
            party_b: Some(p.party_b.clone()),
            call_token: p.call_token.clone(),
            ..Default::default()
        },
        Command::AnswerCall(p) => {
            let overrides = p.overrides.clone().unwrap_or_default();
            WireMessage {
                kind: WireKind::CmdAnswerCall,
                call_token: Some(p.call_token.clone()),
                prefix: overrides.prefix,
                user_name: overrides.user_name,
                display_name: overrides.display_name,
                interface_addresses: overrides.interface_addresses,
                default_options: overrides.default_options,
                ..Default::default()
            }
        }
        Command::ClearCall(p) => WireMessage {
            kind: WireKind::CmdClearCall,
            call_token: Some(p.call_token.clone()),
            reason: p.reason.clone(),
            ..Default::default()
        },
        Command::HoldCall { call_token } => WireMessage {
            kind: WireKind::CmdHoldCall,
            call_token: Some(call_token.clone()),
            ..Default::default()
        },
        Command::RetrieveCall { call_token } => WireMessage {
            kind: WireKind::CmdRetrieveCall,
            call_token: Some(call_token.clone()),
            ..Default::default()
        },
        Command::TransferCall(p) => WireMessage {
            kind: WireKind::CmdTransferCall,
            call_token: Some(p.call_token.clone()),
            party_a: p.party_a.clone(),
            party_b: Some(p.party_b.clone()),
            ..Default::default()
        },
        Command::SendUserInput(p) => WireMessage {
            kind: WireKind::CmdSendUserInput,
            call_token: Some(p.call_token.clone()),
            input: Some(p.input.clone()),
            duration_ms: p.duration_ms,
            ..Default::default()
        },
        Command::SetMediaStreamState(p) => WireMessage {
            kind: WireKind::CmdSetMediaStreamState,
            call_token: Some(p.call_token.clone()),
            stream_type: Some(p.stream_type.clone()),
            media_state: Some(p.state),
            ..Default::default()
        },
        Command::StartRecording(p) => WireMessage {
            kind: WireKind::CmdStartRecording,
            call_token: Some(p.call_token.clone()),
            file: Some(p.file.clone()),
            channels: p.channels,
            ..Default::default()
        },
        Command::StopRecording { call_token } => WireMessage {
            kind: WireKind::CmdStopRecording,
            call_token: Some(call_token.clone()),
            ..Default::default()
        },
        Command::SetUserData(p) => WireMessage {
            kind: WireKind::CmdSetUserData,
            call_token: Some(p.call_token.clone()),
            user_data: Some(p.user_data.clone()),
            ..Default::default()
        },
    }
}

/// Decode a command from the flat wire record
pub fn decode_command(message: WireMessage) -> BusResult<Command> {
    let kind = message.kind;
    let command = match kind {
        WireKind::CmdSetGeneralParameters => Command::SetGeneralParameters(GeneralParams {
            auto_rx_media: message.auto_rx_media,
            auto_tx_media: message.auto_tx_media,
            nat_router: message.nat_router,
            stun_server: message.stun_server,
            media_mask: message.media_mask,
            audio_record_device: message.audio_record_device,
            audio_play_device: message.audio_play_device,
        }),
        WireKind::CmdSetProtocolParameters => Command::SetProtocolParameters(ProtocolParams {
            prefix: message.prefix,
            user_name: message.user_name,
            display_name: message.display_name,
            interface_addresses: message.interface_addresses,
            default_options: message.default_options,
        }),
        WireKind::CmdRegister => Command::Register(RegistrationParams {
            protocol: take(message.protocol, kind, "protocol")?,
            identifier: message.identifier,
            host_name: message.host_name,
            auth_user_name: message.auth_user_name,
            password: message.password,
            admin_entity: message.admin_entity,
            time_to_live: message.time_to_live.unwrap_or(0),
            restore_time: message.restore_time,
            event_package: message.event_package,
        }),
        WireKind::CmdSetUpCall => Command::SetUpCall(SetUpCallParams {
            party_a: message.party_a,
            party_b: take(message.party_b, kind, "party_b")?,
            call_token: message.call_token,
        }),
        WireKind::CmdAnswerCall => {
            let overrides = ProtocolParams {
                prefix: message.prefix,
                user_name: message.user_name,
                display_name: message.display_name,
                interface_addresses: message.interface_addresses,
                default_options: message.default_options,
            };
            // A flat record cannot distinguish empty overrides from none.
            let overrides = if overrides == ProtocolParams::default() {
                None
            } else {
                Some(overrides)
            };
            Command::AnswerCall(AnswerCallParams {
                call_token: take(message.call_token, kind, "call_token")?,
                overrides,
            })
        }
        WireKind::CmdClearCall => Command::ClearCall(ClearCallParams {
            call_token: take(message.call_token, kind, "call_token")?,
            reason: message.reason,
        }),
        WireKind::CmdHoldCall => Command::HoldCall {
            call_token: take(message.call_token, kind, "call_token")?,
        },
        WireKind::CmdRetrieveCall => Command::RetrieveCall {
            call_token: take(message.call_token, kind, "call_token")?,
        },
        WireKind::CmdTransferCall => Command::TransferCall(TransferParams {
            call_token: take(message.call_token, kind, "call_token")?,
            party_a: message.party_a,
            party_b: take(message.party_b, kind, "party_b")?,
        }),
        WireKind::CmdSendUserInput => Command::SendUserInput(UserInputParams {
            call_token: take(message.call_token, kind, "call_token")?,
            input: take(message.input, kind, "input")?,
            duration_ms: message.duration_ms,
        }),
        WireKind::CmdSetMediaStreamState => Command::SetMediaStreamState(MediaStreamParams {
            call_token: take(message.call_token, kind, "call_token")?,
            stream_type: take(message.stream_type, kind, "stream_type")?,
            state: message.media_state.ok_or_else(|| missing(kind, "media_state"))?,
        }),
        WireKind::CmdStartRecording => Command::StartRecording(RecordingParams {
            call_token: take(message.call_token, kind, "call_token")?,
            file: take(message.file, kind, "file")?,
            channels: message.channels,
        }),
        WireKind::CmdStopRecording => Command::StopRecording {
            call_token: take(message.call_token, kind, "call_token")?,
        },
        WireKind::CmdSetUserData => Command::SetUserData(SetUserDataParams {
            call_token: take(message.call_token, kind, "call_token")?,
            user_data: take(message.user_data, kind, "user_data")?,
        }),
        other => {
            return Err(BusError::transport(format!(
                "expected a command wire message, got {:?}",
                other
            )))
        }
    };
    Ok(command)
}

/// Encode an indication into the flat wire record
pub fn encode_indication(indication: &Indication) -> WireMessage {
    match indication {
        Indication::CommandError { reason } => WireMessage {
            kind: WireKind::IndCommandError,
            reason: Some(reason.clone()),
            ..Default::default()
        },
        Indication::RegistrationStatus(info) => WireMessage {
            kind: WireKind::IndRegistrationStatus,
            registration_id: Some(info.registration_id.clone()),
            protocol: Some(info.protocol.clone()),
            server_name: Some(info.server_name.clone()),
            error: info.error.clone(),
            registration_state: Some(info.state),
            ..Default::default()
        },
        Indication::IncomingCall(info) => WireMessage {
            kind: WireKind::IndIncomingCall,
            call_token: Some(info.call_token.clone()),
            local_address: Some(info.local_address.clone()),
            remote_address: Some(info.remote_address.clone()),
            remote_display_name: info.remote_display_name.clone(),
            called_address: info.called_address.clone(),
            received_at: Some(info.received_at),
            ..Default::default()
        },
        Indication::Proceeding { call_token } => WireMessage {
            kind: WireKind::IndProceeding,
            call_token: Some(call_token.clone()),
            ..Default::default()
        },
        Indication::Alerting(info) => WireMessage {
            kind: WireKind::IndAlerting,
            call_token: Some(info.call_token.clone()),
            party_a: info.party_a.clone(),
            party_b: info.party_b.clone(),
            ..Default::default()
        },
        Indication::Established(info) => WireMessage {
            kind: WireKind::IndEstablished,
            call_token: Some(info.call_token.clone()),
            party_a: info.party_a.clone(),
            party_b: info.party_b.clone(),
            ..Default::default()
        },
        Indication::UserInput(info) => WireMessage {
            kind: WireKind::IndUserInput,
            call_token: Some(info.call_token.clone()),
            input: Some(info.input.clone()),
            duration_ms: info.duration_ms,
            ..Default::default()
        },
        Indication::MessageWaiting(info) => WireMessage {
            kind: WireKind::IndMessageWaiting,
            party: Some(info.party.clone()),
            message_kind: Some(info.kind.clone()),
            extra_info: info.extra_info.clone(),
            ..Default::default()
        },
        Indication::LineAppearance(info) => WireMessage {
            kind: WireKind::IndLineAppearance,
            line: Some(info.line.clone()),
            line_state: Some(info.state),
            appearance: info.appearance,
            ..Default::default()
        },
        Indication::MediaStreamStatus(info) => WireMessage {
            kind: WireKind::IndMediaStreamStatus,
            call_token: Some(info.call_token.clone()),
            stream_identifier: Some(info.identifier.clone()),
            stream_type: Some(info.stream_type.clone()),
            media_state: Some(info.state),
            format: info.format.clone(),
            ..Default::default()
        },
        Indication::CallCleared(info) => WireMessage {
            kind: WireKind::IndCallCleared,
            call_token: Some(info.call_token.clone()),
            reason: info.reason.clone(),
            ..Default::default()
        },
        Indication::TransferStatus(info) => WireMessage {
            kind: WireKind::IndTransferStatus,
            call_token: Some(info.call_token.clone()),
            transfer_result: Some(info.result),
            transfer_info: info.info.clone(),
            ..Default::default()
        },
        Indication::CompletedIvr(info) => WireMessage {
            kind: WireKind::IndCompletedIvr,
            call_token: Some(info.call_token.clone()),
            ivr_variables: Some(info.variables.clone()),
            ..Default::default()
        },
    }
}

/// Decode an indication from the flat wire record
pub fn decode_indication(message: WireMessage) -> BusResult<Indication> {
    let kind = message.kind;
    let indication = match kind {
        WireKind::IndCommandError => Indication::CommandError {
            reason: message.reason.unwrap_or_else(|| "unspecified".to_string()),
        },
        WireKind::IndRegistrationStatus => Indication::RegistrationStatus(RegistrationStatusInfo {
            registration_id: take(message.registration_id, kind, "registration_id")?,
            protocol: take(message.protocol, kind, "protocol")?,
            server_name: take(message.server_name, kind, "server_name")?,
            error: message.error,
            state: message
                .registration_state
                .ok_or_else(|| missing(kind, "registration_state"))?,
        }),
        WireKind::IndIncomingCall => Indication::IncomingCall(IncomingCallInfo {
            call_token: take(message.call_token, kind, "call_token")?,
            local_address: take(message.local_address, kind, "local_address")?,
            remote_address: take(message.remote_address, kind, "remote_address")?,
            remote_display_name: message.remote_display_name,
            called_address: message.called_address,
            received_at: message.received_at.unwrap_or_else(Utc::now),
        }),
        WireKind::IndProceeding => Indication::Proceeding {
            call_token: take(message.call_token, kind, "call_token")?,
        },
        WireKind::IndAlerting => Indication::Alerting(CallProgressInfo {
            call_token: take(message.call_token, kind, "call_token")?,
            party_a: message.party_a,
            party_b: message.party_b,
        }),
        WireKind::IndEstablished => Indication::Established(CallProgressInfo {
            call_token: take(message.call_token, kind, "call_token")?,
            party_a: message.party_a,
            party_b: message.party_b,
        }),
        WireKind::IndUserInput => Indication::UserInput(UserInputInfo {
            call_token: take(message.call_token, kind, "call_token")?,
            input: take(message.input, kind, "input")?,
            duration_ms: message.duration_ms,
        }),
        WireKind::IndMessageWaiting => Indication::MessageWaiting(MessageWaitingInfo {
            party: take(message.party, kind, "party")?,
            kind: take(message.message_kind, kind, "message_kind")?,
            extra_info: message.extra_info,
        }),
        WireKind::IndLineAppearance => Indication::LineAppearance(LineAppearanceInfo {
            line: take(message.line, kind, "line")?,
            state: message.line_state.ok_or_else(|| missing(kind, "line_state"))?,
            appearance: message.appearance,
        }),
        WireKind::IndMediaStreamStatus => Indication::MediaStreamStatus(MediaStreamStatusInfo {
            call_token: take(message.call_token, kind, "call_token")?,
            identifier: take(message.stream_identifier, kind, "stream_identifier")?,
            stream_type: take(message.stream_type, kind, "stream_type")?,
            state: message.media_state.ok_or_else(|| missing(kind, "media_state"))?,
            format: message.format,
        }),
        WireKind::IndCallCleared => Indication::CallCleared(CallClearedInfo {
            call_token: take(message.call_token, kind, "call_token")?,
            reason: message.reason,
        }),
        WireKind::IndTransferStatus => Indication::TransferStatus(TransferStatusInfo {
            call_token: take(message.call_token, kind, "call_token")?,
            result: message
                .transfer_result
                .ok_or_else(|| missing(kind, "transfer_result"))?,
            info: message.transfer_info,
        }),
        WireKind::IndCompletedIvr => Indication::CompletedIvr(CompletedIvrInfo {
            call_token: take(message.call_token, kind, "call_token")?,
            variables: message.ivr_variables.unwrap_or_default(),
        }),
        other => {
            return Err(BusError::transport(format!(
                "expected an indication wire message, got {:?}",
                other
            )))
        }
    };
    Ok(indication)
}

/// Decode an engine acknowledgment
///
/// The engine answers a command with either an echo of the command (fields
/// filled in, e.g. the call token for a placed call) or a command-error
/// record carrying the rejection reason.
pub fn decode_ack(message: WireMessage) -> BusResult<Command> {
    if message.kind == WireKind::IndCommandError {
        return Err(BusError::rejected(
            message.reason.unwrap_or_else(|| "unspecified".to_string()),
        ));
    }
    decode_command(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_round_trip() {
        let samples = vec![
            Command::SetUpCall(SetUpCallParams::to("sip:500@example.com").from("pc:*")),
            Command::Register(
                RegistrationParams::new("sip", "alice@example.com")
                    .with_password("secret")
                    .with_time_to_live(300),
            ),
            Command::clear("tok-1", Some("done".to_string())),
            Command::TransferCall(TransferParams {
                call_token: "tok-1".to_string(),
                party_a: None,
                party_b: "sip:bob@example.com".to_string(),
            }),
            Command::SetMediaStreamState(MediaStreamParams {
                call_token: "tok-1".to_string(),
                stream_type: "audio out".to_string(),
                state: MediaState::Pause,
            }),
            Command::StartRecording(RecordingParams {
                call_token: "tok-1".to_string(),
                file: "call.wav".to_string(),
                channels: Some(2),
            }),
        ];
        for command in samples {
            let decoded = decode_command(encode_command(&command)).unwrap();
            assert_eq!(decoded, command);
        }
    }

    #[test]
    fn indications_round_trip() {
        let samples = vec![
            Indication::Proceeding {
                call_token: "tok-1".to_string(),
            },
            Indication::Established(CallProgressInfo {
                call_token: "tok-1".to_string(),
                party_a: Some("pc:*".to_string()),
                party_b: Some("sip:500@example.com".to_string()),
            }),
            Indication::RegistrationStatus(RegistrationStatusInfo {
                registration_id: "sip:alice@example.com".to_string(),
                protocol: "sip".to_string(),
                server_name: "example.com".to_string(),
                error: None,
                state: RegistrationState::Successful,
            }),
            Indication::CallCleared(CallClearedInfo {
                call_token: "tok-1".to_string(),
                reason: Some("EndedByRemoteUser".to_string()),
            }),
            Indication::CommandError {
                reason: "bad command".to_string(),
            },
        ];
        for indication in samples {
            let decoded = decode_indication(encode_indication(&indication)).unwrap();
            assert_eq!(decoded, indication);
        }
    }

    #[test]
    fn wire_messages_survive_json_serialization() {
        let message = encode_command(&Command::SetUpCall(SetUpCallParams::to(
            "sip:500@example.com",
        )));
        let json = serde_json::to_string(&message).unwrap();
        let back: WireMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn decode_rejects_missing_required_fields() {
        let message = WireMessage {
            kind: WireKind::IndCallCleared,
            ..Default::default()
        };
        assert!(matches!(
            decode_indication(message),
            Err(BusError::Transport { .. })
        ));
    }

    #[test]
    fn ack_error_becomes_rejection() {
        let message = WireMessage {
            kind: WireKind::IndCommandError,
            reason: Some("no such party".to_string()),
            ..Default::default()
        };
        assert_eq!(
            decode_ack(message).unwrap_err(),
            BusError::rejected("no such party")
        );
    }
}
