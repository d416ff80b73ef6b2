//! Seams between the call controller and the outside world.

use async_trait::async_trait;
use thiserror::Error;

use super::state::Ticket;

/// Why a speech capture attempt failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("microphone permission denied")]
    PermissionDenied,

    #[error("no speech detected")]
    NoSpeech,

    #[error("recognition aborted")]
    Aborted,

    #[error("speech device error: {0}")]
    Device(String),
}

impl CaptureError {
    /// Map a recognizer error code such as `"not-allowed"` or `"no-speech"`.
    pub fn from_code(code: &str) -> Self {
        match code {
            "not-allowed" | "service-not-allowed" | "permission-denied" => {
                CaptureError::PermissionDenied
            }
            "no-speech" => CaptureError::NoSpeech,
            "aborted" => CaptureError::Aborted,
            other => CaptureError::Device(other.to_string()),
        }
    }

    /// Permission denial is terminal for the call; everything else is retried.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, CaptureError::PermissionDenied)
    }
}

/// Single-utterance, final-result-only speech recognition.
///
/// Results are reported back as `CallEvent`s stamped with `ticket`.
#[async_trait]
pub trait SpeechCapture: Send + Sync {
    async fn start(&self, ticket: Ticket) -> Result<(), CaptureError>;
    async fn abort(&self, ticket: Ticket);
}

/// Text-to-speech playback. Completion is reported as
/// `CallEvent::SpeechFinished`.
#[async_trait]
pub trait SpeechOutput: Send + Sync {
    async fn speak(&self, ticket: Ticket, text: &str) -> anyhow::Result<()>;
    async fn cancel(&self);
}

/// Produces the assistant reply for a finalized user transcript.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle_user_message(&self, text: &str) -> anyhow::Result<Option<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_map_to_kinds() {
        assert!(CaptureError::from_code("not-allowed").is_permission_denied());
        assert!(CaptureError::from_code("service-not-allowed").is_permission_denied());
        assert_eq!(CaptureError::from_code("no-speech"), CaptureError::NoSpeech);
        assert_eq!(
            CaptureError::from_code("network"),
            CaptureError::Device("network".into())
        );
        assert!(!CaptureError::from_code("network").is_permission_denied());
    }
}
