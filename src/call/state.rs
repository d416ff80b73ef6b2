use serde::Serialize;

use super::devices::CaptureError;

/// Where the call is in its turn-taking loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Idle,
    Listening,
    Processing,
    Speaking,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Listening => "listening",
            CallState::Processing => "processing",
            CallState::Speaking => "speaking",
        }
    }
}

/// Identifies one recognition attempt or one utterance.
///
/// `generation` changes whenever a call starts or ends, `seq` on every new
/// attempt, so a device callback from a superseded cycle never matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket {
    pub generation: u64,
    pub seq: u64,
}

#[derive(Debug)]
pub enum CallEvent {
    /// Start a call; ignored while one is active.
    Start,
    /// Hang up; safe to send when no call is active.
    End,
    /// Final transcript of a recognition attempt.
    RecognitionResult { ticket: Ticket, transcript: String },
    /// The recognition attempt finished, with or without a transcript.
    RecognitionEnd { ticket: Ticket },
    RecognitionError { ticket: Ticket, error: CaptureError },
    /// An utterance finished playing or failed.
    SpeechFinished { ticket: Ticket },
    /// The message handler resolved for the call `generation`.
    ReplyReady {
        generation: u64,
        reply: Result<Option<String>, String>,
    },
    /// A delayed restart of the listening cycle came due.
    RestartListening { generation: u64 },
}
