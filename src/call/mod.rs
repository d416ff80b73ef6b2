//! call - Voice call turn-taking
//!
//! Greeting, then listen, process, speak and listen again until the user
//! hangs up. Speech devices and the reply source sit behind traits.

pub mod controller;
pub mod devices;
pub mod state;

pub use controller::{CallController, CallHandle, CallSettings};
pub use devices::{CaptureError, MessageHandler, SpeechCapture, SpeechOutput};
pub use state::{CallEvent, CallState, Ticket};
