//! chat - Companion conversation backed by the remote reply and emotion
//! services

pub mod client;
pub mod conversation;
pub mod emotion;
pub mod sse;
pub mod style;
#[cfg(test)]
mod test_server;

pub use client::{ChatClient, endpoint};
pub use conversation::{ChatMessage, Companion, CompanionEvent};
pub use emotion::{EmotionClient, EmotionResult};
pub use style::SupportStyle;
