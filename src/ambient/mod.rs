//! ambient - Procedural ambient sound engine
//!
//! Synthesizes ocean, rain, bird and chime textures from noise and sine
//! sources in a small software audio graph, scheduled by jittered timers
//! and rendered to ALSA on a dedicated thread.

#[cfg(feature = "alsa")]
mod alsa_device;
pub mod context;
pub mod generators;
pub mod node;
pub mod output;
pub mod param;
pub mod rng;
pub mod schedule;
pub mod session;
pub mod tracks;

pub use session::{AmbientConfig, AmbientPlayer, AmbientStatus};
pub use tracks::SoundProfile;
