//! Message envelopes for the call-control bus
//!
//! Commands and indications are proper tagged variants: each message is one
//! concrete variant and no uninitialized or overlapping fields are ever
//! observable. Reading a field that does not belong to the current variant
//! fails with [`BusError::WrongVariant`](crate::error::BusError) instead of
//! returning garbage.
//!
//! The engine's flat wire structure is handled exclusively in the [`wire`]
//! module; nothing outside the adapter boundary touches it.

pub mod command;
pub mod indication;
pub mod wire;

pub use command::{
    AnswerCallParams, ClearCallParams, Command, CommandKind, GeneralParams, MediaStreamParams,
    ProtocolParams, RecordingParams, RegistrationParams, SetUpCallParams, SetUserDataParams,
    TransferParams, UserInputParams,
};
pub use indication::{
    CallClearedInfo, CallProgressInfo, CompletedIvrInfo, Indication, IndicationKind,
    IncomingCallInfo, LineAppearanceInfo, LineState, MediaStreamStatusInfo, MessageWaitingInfo,
    RegistrationState, RegistrationStatusInfo, TransferResult, TransferStatusInfo, UserInputInfo,
};
pub use wire::WireMessage;

use serde::{Deserialize, Serialize};

/// Media stream state, used both to command a state change
/// (`SetMediaStreamState`) and to report one (`MediaStreamStatus`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaState {
    /// No change requested
    NoChange,
    /// Stream opened
    Open,
    /// Stream closed
    Close,
    /// Stream paused; pausing the outbound audio stream mutes a call
    Pause,
    /// Stream resumed
    Resume,
}

impl std::fmt::Display for MediaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MediaState::NoChange => "no-change",
            MediaState::Open => "open",
            MediaState::Close => "close",
            MediaState::Pause => "pause",
            MediaState::Resume => "resume",
        };
        write!(f, "{}", s)
    }
}
