//! Caller-originated commands
//!
//! A [`Command`] asks the engine to perform one action. Each variant carries
//! only the fields relevant to that kind of request, and the variant tag is
//! immutable after construction.
//!
//! # Examples
//!
//! ```rust
//! use callbus_core::envelope::{Command, SetUpCallParams};
//!
//! let command = Command::SetUpCall(SetUpCallParams::to("sip:500@example.com"));
//! assert_eq!(command.party_b().unwrap(), "sip:500@example.com");
//!
//! // Reading a field the variant does not carry is an error, not garbage.
//! let clear = Command::clear("tok-1", None);
//! assert!(clear.party_a().is_err());
//! ```

use serde::{Deserialize, Serialize};

use super::MediaState;
use crate::error::{BusError, BusResult};

/// Global engine settings, applied across all protocols
///
/// All fields are optional; unset fields leave the engine's current value
/// untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralParams {
    /// Media types the engine may automatically receive (e.g. "audio")
    pub auto_rx_media: Option<String>,
    /// Media types the engine may automatically transmit
    pub auto_tx_media: Option<String>,
    /// Address of a NAT router the engine sits behind
    pub nat_router: Option<String>,
    /// STUN server host name
    pub stun_server: Option<String>,
    /// Wildcard mask of media formats to exclude
    pub media_mask: Option<String>,
    /// Recording device for audio capture
    pub audio_record_device: Option<String>,
    /// Playback device for audio output
    pub audio_play_device: Option<String>,
}

/// Per-protocol settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolParams {
    /// Protocol prefix this applies to (e.g. "sip"); `None` applies to all
    pub prefix: Option<String>,
    /// Local user name
    pub user_name: Option<String>,
    /// Display name presented to remote parties
    pub display_name: Option<String>,
    /// Interface addresses to listen on; "*" for all
    pub interface_addresses: Option<String>,
    /// Newline-separated `key=value` protocol options
    pub default_options: Option<String>,
}

/// Registration or event subscription request
///
/// A non-empty `event_package` turns the request into a subscription; a
/// `time_to_live` of zero unregisters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationParams {
    /// Protocol prefix, e.g. "sip" or "h323"; required
    pub protocol: String,
    /// Name to register at the server; defaults to the protocol user name
    pub identifier: Option<String>,
    /// Host or domain name of the registrar
    pub host_name: Option<String>,
    /// User name for authentication
    pub auth_user_name: Option<String>,
    /// Password for authentication
    pub password: Option<String>,
    /// Administrative entity (gatekeeper identifier or auth realm)
    pub admin_entity: Option<String>,
    /// Seconds between registration refreshes; zero unregisters
    pub time_to_live: u32,
    /// Seconds between restore attempts after the registrar goes offline
    pub restore_time: Option<u32>,
    /// Event package to subscribe to instead of registering
    pub event_package: Option<String>,
}

impl RegistrationParams {
    /// Create a registration for `identifier` over `protocol`
    pub fn new(protocol: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            identifier: Some(identifier.into()),
            host_name: None,
            auth_user_name: None,
            password: None,
            admin_entity: None,
            time_to_live: 300,
            restore_time: None,
            event_package: None,
        }
    }

    /// Set the authentication password
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the registrar host name
    pub fn with_host(mut self, host_name: impl Into<String>) -> Self {
        self.host_name = Some(host_name.into());
        self
    }

    /// Set the event package, making this a subscription
    pub fn with_event_package(mut self, package: impl Into<String>) -> Self {
        self.event_package = Some(package.into());
        self
    }

    /// Set the refresh interval; zero unregisters
    pub fn with_time_to_live(mut self, seconds: u32) -> Self {
        self.time_to_live = seconds;
        self
    }

    /// The identifier this registration correlates against
    ///
    /// Pending registrations are keyed by this before dispatch, since the
    /// engine echoes the same identity in its registration status
    /// indications.
    pub fn registration_id(&self) -> String {
        match &self.identifier {
            Some(id) => format!("{}:{}", self.protocol, id),
            None => self.protocol.clone(),
        }
    }
}

/// Parameters for placing an outgoing call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetUpCallParams {
    /// Originating endpoint; `None` lets the engine pick its local endpoint
    pub party_a: Option<String>,
    /// Destination address; required
    pub party_b: String,
    /// Engine-assigned token, filled in the acknowledgment
    pub call_token: Option<String>,
}

impl SetUpCallParams {
    /// Call `party_b` from the engine's default local endpoint
    pub fn to(party_b: impl Into<String>) -> Self {
        Self {
            party_a: None,
            party_b: party_b.into(),
            call_token: None,
        }
    }

    /// Set the originating endpoint
    pub fn from(mut self, party_a: impl Into<String>) -> Self {
        self.party_a = Some(party_a.into());
        self
    }
}

/// Parameters for answering an incoming call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerCallParams {
    /// Token from the incoming call indication
    pub call_token: String,
    /// Protocol settings overriding the defaults for this call only
    pub overrides: Option<ProtocolParams>,
}

/// Parameters for hanging up a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearCallParams {
    /// Token of the call to clear
    pub call_token: String,
    /// Reason reported to the remote party
    pub reason: Option<String>,
}

/// Parameters for transferring a call to another party
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferParams {
    /// Token of the call being transferred
    pub call_token: String,
    /// Connection to transfer; used for consultation transfer to a held
    /// call, otherwise the engine picks the remote connection
    pub party_a: Option<String>,
    /// Party to transfer to; required
    pub party_b: String,
}

/// Parameters for sending user input (DTMF or text) on a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInputParams {
    /// Token of the call to send on
    pub call_token: String,
    /// The input to send; required
    pub input: String,
    /// Tone duration in milliseconds, where applicable
    pub duration_ms: Option<u32>,
}

/// Parameters for changing a media stream's state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaStreamParams {
    /// Token of the call the stream belongs to
    pub call_token: String,
    /// Stream selector, e.g. "audio out"
    pub stream_type: String,
    /// State to move the stream to
    pub state: MediaState,
}

/// Parameters for starting a call recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingParams {
    /// Token of the call to record
    pub call_token: String,
    /// File to record into; required
    pub file: String,
    /// Channel count; `None` uses the engine default
    pub channels: Option<u32>,
}

/// Parameters for attaching opaque user data to a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetUserDataParams {
    /// Token of the call to annotate
    pub call_token: String,
    /// Caller-defined data carried with the call
    pub user_data: String,
}

/// Copyable discriminant for [`Command`] variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    /// Apply global engine settings
    SetGeneralParameters,
    /// Apply per-protocol settings
    SetProtocolParameters,
    /// Register or subscribe with a server
    Register,
    /// Place an outgoing call
    SetUpCall,
    /// Answer an incoming call
    AnswerCall,
    /// Hang up a call
    ClearCall,
    /// Put a call on hold
    HoldCall,
    /// Retrieve a held call
    RetrieveCall,
    /// Transfer a call to another party
    TransferCall,
    /// Send user input on a call
    SendUserInput,
    /// Change a media stream's state
    SetMediaStreamState,
    /// Start recording a call
    StartRecording,
    /// Stop recording a call
    StopRecording,
    /// Attach user data to a call
    SetUserData,
}

impl CommandKind {
    /// Stable name for logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::SetGeneralParameters => "SetGeneralParameters",
            CommandKind::SetProtocolParameters => "SetProtocolParameters",
            CommandKind::Register => "Register",
            CommandKind::SetUpCall => "SetUpCall",
            CommandKind::AnswerCall => "AnswerCall",
            CommandKind::ClearCall => "ClearCall",
            CommandKind::HoldCall => "HoldCall",
            CommandKind::RetrieveCall => "RetrieveCall",
            CommandKind::TransferCall => "TransferCall",
            CommandKind::SendUserInput => "SendUserInput",
            CommandKind::SetMediaStreamState => "SetMediaStreamState",
            CommandKind::StartRecording => "StartRecording",
            CommandKind::StopRecording => "StopRecording",
            CommandKind::SetUserData => "SetUserData",
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A caller-originated request for the engine to perform an action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Apply global engine settings
    SetGeneralParameters(GeneralParams),
    /// Apply per-protocol settings
    SetProtocolParameters(ProtocolParams),
    /// Register with, or subscribe to, a server
    Register(RegistrationParams),
    /// Place an outgoing call
    SetUpCall(SetUpCallParams),
    /// Answer an incoming call
    AnswerCall(AnswerCallParams),
    /// Hang up a call
    ClearCall(ClearCallParams),
    /// Put a call on hold
    HoldCall {
        /// Token of the call to hold
        call_token: String,
    },
    /// Retrieve a held call
    RetrieveCall {
        /// Token of the held call
        call_token: String,
    },
    /// Transfer a call to another party
    TransferCall(TransferParams),
    /// Send user input on a call
    SendUserInput(UserInputParams),
    /// Change a media stream's state
    SetMediaStreamState(MediaStreamParams),
    /// Start recording a call
    StartRecording(RecordingParams),
    /// Stop recording a call
    StopRecording {
        /// Token of the call being recorded
        call_token: String,
    },
    /// Attach user data to a call
    SetUserData(SetUserDataParams),
}

impl Command {
    /// Hang up `call_token`, optionally with a reason
    pub fn clear(call_token: impl Into<String>, reason: Option<String>) -> Self {
        Command::ClearCall(ClearCallParams {
            call_token: call_token.into(),
            reason,
        })
    }

    /// Put `call_token` on hold
    pub fn hold(call_token: impl Into<String>) -> Self {
        Command::HoldCall {
            call_token: call_token.into(),
        }
    }

    /// Retrieve held `call_token`
    pub fn retrieve(call_token: impl Into<String>) -> Self {
        Command::RetrieveCall {
            call_token: call_token.into(),
        }
    }

    /// Get this command's discriminant
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::SetGeneralParameters(_) => CommandKind::SetGeneralParameters,
            Command::SetProtocolParameters(_) => CommandKind::SetProtocolParameters,
            Command::Register(_) => CommandKind::Register,
            Command::SetUpCall(_) => CommandKind::SetUpCall,
            Command::AnswerCall(_) => CommandKind::AnswerCall,
            Command::ClearCall(_) => CommandKind::ClearCall,
            Command::HoldCall { .. } => CommandKind::HoldCall,
            Command::RetrieveCall { .. } => CommandKind::RetrieveCall,
            Command::TransferCall(_) => CommandKind::TransferCall,
            Command::SendUserInput(_) => CommandKind::SendUserInput,
            Command::SetMediaStreamState(_) => CommandKind::SetMediaStreamState,
            Command::StartRecording(_) => CommandKind::StartRecording,
            Command::StopRecording { .. } => CommandKind::StopRecording,
            Command::SetUserData(_) => CommandKind::SetUserData,
        }
    }

    /// The call token this command targets
    ///
    /// Fails with `WrongVariant` for commands that do not target an
    /// existing call (`SetUpCall`'s token field is engine-filled, not a
    /// target).
    pub fn call_token(&self) -> BusResult<&str> {
        match self {
            Command::AnswerCall(p) => Ok(&p.call_token),
            Command::ClearCall(p) => Ok(&p.call_token),
            Command::HoldCall { call_token } => Ok(call_token),
            Command::RetrieveCall { call_token } => Ok(call_token),
            Command::TransferCall(p) => Ok(&p.call_token),
            Command::SendUserInput(p) => Ok(&p.call_token),
            Command::SetMediaStreamState(p) => Ok(&p.call_token),
            Command::StartRecording(p) => Ok(&p.call_token),
            Command::StopRecording { call_token } => Ok(call_token),
            Command::SetUserData(p) => Ok(&p.call_token),
            other => Err(BusError::wrong_variant(other.kind().name(), "call_token")),
        }
    }

    /// The originating party, where the variant carries one
    pub fn party_a(&self) -> BusResult<Option<&str>> {
        match self {
            Command::SetUpCall(p) => Ok(p.party_a.as_deref()),
            Command::TransferCall(p) => Ok(p.party_a.as_deref()),
            other => Err(BusError::wrong_variant(other.kind().name(), "party_a")),
        }
    }

    /// The destination party, where the variant carries one
    pub fn party_b(&self) -> BusResult<&str> {
        match self {
            Command::SetUpCall(p) => Ok(&p.party_b),
            Command::TransferCall(p) => Ok(&p.party_b),
            other => Err(BusError::wrong_variant(other.kind().name(), "party_b")),
        }
    }

    /// Validate required fields for this variant
    ///
    /// Called by the dispatcher before any engine interaction; failures
    /// surface synchronously and never reach the adapter.
    pub fn validate(&self) -> BusResult<()> {
        fn required(field: &'static str, value: &str) -> BusResult<()> {
            if value.trim().is_empty() {
                Err(BusError::invalid(field, "must not be empty"))
            } else {
                Ok(())
            }
        }

        match self {
            Command::SetGeneralParameters(_) | Command::SetProtocolParameters(_) => Ok(()),
            Command::Register(p) => required("protocol", &p.protocol),
            Command::SetUpCall(p) => required("party_b", &p.party_b),
            Command::AnswerCall(p) => required("call_token", &p.call_token),
            Command::ClearCall(p) => required("call_token", &p.call_token),
            Command::HoldCall { call_token } | Command::RetrieveCall { call_token } => {
                required("call_token", call_token)
            }
            Command::TransferCall(p) => {
                required("call_token", &p.call_token)?;
                required("party_b", &p.party_b)
            }
            Command::SendUserInput(p) => {
                required("call_token", &p.call_token)?;
                required("input", &p.input)
            }
            Command::SetMediaStreamState(p) => {
                required("call_token", &p.call_token)?;
                required("stream_type", &p.stream_type)
            }
            Command::StartRecording(p) => {
                required("call_token", &p.call_token)?;
                required("file", &p.file)
            }
            Command::StopRecording { call_token } => required("call_token", call_token),
            Command::SetUserData(p) => required("call_token", &p.call_token),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn party_b_reads_back_exactly() {
        let command = Command::SetUpCall(SetUpCallParams::to("sip:500@example.com"));
        assert_eq!(command.party_b().unwrap(), "sip:500@example.com");
    }

    #[test]
    fn party_a_on_clear_call_is_wrong_variant() {
        let command = Command::clear("tok-1", None);
        assert_eq!(
            command.party_a().unwrap_err(),
            BusError::wrong_variant("ClearCall", "party_a")
        );
    }

    #[test]
    fn call_token_accessor_covers_token_bearing_variants() {
        assert_eq!(Command::hold("tok-2").call_token().unwrap(), "tok-2");
        assert_eq!(Command::retrieve("tok-3").call_token().unwrap(), "tok-3");
        assert!(Command::SetUpCall(SetUpCallParams::to("sip:a@b"))
            .call_token()
            .is_err());
    }

    #[test]
    fn validation_rejects_empty_required_fields() {
        let no_party = Command::SetUpCall(SetUpCallParams::to(""));
        assert!(matches!(
            no_party.validate(),
            Err(BusError::InvalidCommand { field: "party_b", .. })
        ));

        let no_protocol = Command::Register(RegistrationParams {
            protocol: String::new(),
            identifier: None,
            host_name: None,
            auth_user_name: None,
            password: None,
            admin_entity: None,
            time_to_live: 300,
            restore_time: None,
            event_package: None,
        });
        assert!(matches!(
            no_protocol.validate(),
            Err(BusError::InvalidCommand { field: "protocol", .. })
        ));

        let no_input = Command::SendUserInput(UserInputParams {
            call_token: "tok-4".to_string(),
            input: String::new(),
            duration_ms: None,
        });
        assert!(no_input.validate().is_err());
    }

    #[test]
    fn registration_id_combines_protocol_and_identifier() {
        let params = RegistrationParams::new("sip", "alice@example.com");
        assert_eq!(params.registration_id(), "sip:alice@example.com");
    }
}
