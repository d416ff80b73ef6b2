//! The playback session manager: at most one live session, fully torn down
//! before the next one is built.

use anyhow::Result;
use serde::Serialize;

use super::context::{AudioContext, SharedContext};
use super::generators::{self, SynthEnv};
use super::node::NodeId;
use super::output::{OutputStream, OutputTarget, StreamParams};
use super::rng::SharedRandom;
use super::schedule::CleanupRegistry;
use super::tracks::{self, SoundProfile};
use crate::config::Config;
use crate::sync::lock;

#[derive(Debug, Clone)]
pub struct AmbientConfig {
    pub output: OutputTarget,
    pub sample_rate: u32,
    pub channels: u32,
    pub period_size: usize,
    pub default_volume: f32,
    /// Length of the shared noise buffer.
    pub noise_seconds: f32,
}

impl Default for AmbientConfig {
    fn default() -> Self {
        Self {
            output: OutputTarget::Manual,
            sample_rate: 48000,
            channels: 2,
            period_size: 1024,
            default_volume: 0.5,
            noise_seconds: 2.0,
        }
    }
}

impl From<&Config> for AmbientConfig {
    fn from(config: &Config) -> Self {
        Self {
            output: OutputTarget::from_device_name(config.playback_device),
            sample_rate: config.sample_rate,
            channels: config.channels,
            period_size: config.period_size,
            default_volume: config.default_volume.clamp(0.0, 1.0),
            noise_seconds: config.noise_seconds as f32,
        }
    }
}

/// One "now playing" instance: its own context, master gain, generators,
/// timers and render thread.
pub struct PlaybackSession {
    profile: &'static SoundProfile,
    ctx: SharedContext,
    master: NodeId,
    registry: CleanupRegistry,
    output: Option<OutputStream>,
    torn_down: bool,
}

impl PlaybackSession {
    fn open(
        profile: &'static SoundProfile,
        config: &AmbientConfig,
        volume: f32,
        rng: SharedRandom,
    ) -> Result<Self> {
        let ctx = AudioContext::shared(config.sample_rate);
        let master = {
            let mut guard = lock(&ctx);
            let master = guard.create_gain(volume);
            let destination = guard.destination();
            guard.connect(master, destination);
            master
        };
        let registry = CleanupRegistry::new();
        registry.register_nodes(&[master]);

        let env = SynthEnv {
            ctx: ctx.clone(),
            master,
            noise: generators::noise_buffer(config.sample_rate, config.noise_seconds, &rng),
            rng,
            registry: registry.clone(),
        };
        generators::build(profile.category, &env);

        let mut session = Self {
            profile,
            ctx: ctx.clone(),
            master,
            registry,
            output: None,
            torn_down: false,
        };
        let params = StreamParams {
            sample_rate: config.sample_rate,
            channels: config.channels,
            period_size: config.period_size,
        };
        // on error the session drops here and tears itself down
        session.output = Some(OutputStream::start(&config.output, ctx, params)?);

        log::info!("Ambient session opened: {} ({})", profile.title, profile.category);
        Ok(session)
    }

    /// The render thread is still pulling blocks from an open context.
    pub fn is_alive(&self) -> bool {
        self.output.as_ref().is_some_and(OutputStream::is_running)
            && !lock(&self.ctx).is_closed()
    }

    /// Cancel timers, disconnect nodes, close the context, then stop the
    /// render thread. Safe to call more than once.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        let cancelled = self.registry.cancel_timers();
        let nodes = self.registry.take_nodes();
        {
            let mut ctx = lock(&self.ctx);
            for id in &nodes {
                ctx.disconnect(*id);
            }
            ctx.close();
        }
        if let Some(mut output) = self.output.take() {
            output.stop();
        }
        log::info!(
            "Ambient session closed: {} ({} timers cancelled, {} nodes released)",
            self.profile.title,
            cancelled,
            nodes.len()
        );
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AmbientStats {
    pub live_nodes: usize,
    pub pending_timers: usize,
    pub context_open: bool,
    pub sessions_opened: u64,
}

/// What the UI needs to render the player.
#[derive(Debug, Clone, Serialize)]
pub struct AmbientStatus {
    pub track: Option<SoundProfile>,
    pub playing: bool,
    pub volume: f32,
}

pub struct AmbientPlayer {
    config: AmbientConfig,
    rng: SharedRandom,
    session: Option<PlaybackSession>,
    current: Option<&'static SoundProfile>,
    volume: f32,
    sessions_opened: u64,
}

impl AmbientPlayer {
    pub fn new(config: AmbientConfig) -> Self {
        Self::with_random(config, SharedRandom::thread())
    }

    pub fn with_random(config: AmbientConfig, rng: SharedRandom) -> Self {
        let volume = config.default_volume.clamp(0.0, 1.0);
        Self {
            config,
            rng,
            session: None,
            current: None,
            volume,
            sessions_opened: 0,
        }
    }

    pub fn tracks(&self) -> &'static [SoundProfile] {
        &tracks::TRACKS
    }

    pub fn current(&self) -> Option<&'static SoundProfile> {
        self.current
    }

    pub fn is_playing(&self) -> bool {
        self.session.as_ref().is_some_and(PlaybackSession::is_alive)
    }

    /// Select `profile`. Selecting the profile that is already playing pauses
    /// it; anything else replaces the live session with a fresh one.
    pub fn play(&mut self, profile: &'static SoundProfile) -> Result<()> {
        self.reap();
        if self.is_playing() && self.current.is_some_and(|c| c.id == profile.id) {
            log::debug!("Toggling {} off", profile.title);
            self.pause();
            return Ok(());
        }
        self.teardown();
        self.current = Some(profile);
        self.open_session(profile)
    }

    pub fn play_by_id(&mut self, id: &str) -> Result<()> {
        let profile =
            tracks::find(id).ok_or_else(|| anyhow::anyhow!("Unknown ambient track '{}'", id))?;
        self.play(profile)
    }

    /// Tear the live session down, keeping the current profile.
    pub fn pause(&mut self) {
        self.teardown();
    }

    /// Start a fresh session for the current profile. No-op while playing
    /// or when nothing was selected.
    pub fn resume(&mut self) -> Result<()> {
        self.reap();
        match self.current {
            Some(profile) if !self.is_playing() => self.open_session(profile),
            _ => Ok(()),
        }
    }

    /// Tear down and forget the current profile.
    pub fn stop(&mut self) {
        self.teardown();
        self.current = None;
    }

    /// Clamp to `[0, 1]` and apply to the live master gain if any. NaN is
    /// ignored. Returns the stored volume.
    pub fn set_volume(&mut self, level: f32) -> f32 {
        if level.is_nan() {
            return self.volume;
        }
        self.volume = level.clamp(0.0, 1.0);
        self.reap();
        if let Some(session) = &self.session {
            let mut ctx = lock(&session.ctx);
            if let Some(gain) = ctx.gain_param(session.master) {
                gain.set_value(self.volume);
            }
        }
        self.volume
    }

    pub fn status(&self) -> AmbientStatus {
        AmbientStatus {
            track: self.current.copied(),
            playing: self.is_playing(),
            volume: self.volume,
        }
    }

    pub fn stats(&self) -> AmbientStats {
        match &self.session {
            Some(session) => {
                let ctx = lock(&session.ctx);
                AmbientStats {
                    live_nodes: ctx.node_count(),
                    pending_timers: session.registry.pending_timers(),
                    context_open: !ctx.is_closed(),
                    sessions_opened: self.sessions_opened,
                }
            }
            None => AmbientStats {
                sessions_opened: self.sessions_opened,
                ..AmbientStats::default()
            },
        }
    }

    /// The live session's context, for driving a manual output.
    #[cfg(test)]
    pub fn context(&self) -> Option<SharedContext> {
        self.session.as_ref().map(|s| s.ctx.clone())
    }

    fn open_session(&mut self, profile: &'static SoundProfile) -> Result<()> {
        let session = PlaybackSession::open(profile, &self.config, self.volume, self.rng.clone())?;
        self.session = Some(session);
        self.sessions_opened += 1;
        Ok(())
    }

    fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.teardown();
        }
    }

    /// Drop a session whose render thread died underneath it.
    fn reap(&mut self) {
        if self.session.as_ref().is_some_and(|s| !s.is_alive()) {
            log::warn!("Ambient output stopped unexpectedly, releasing session");
            self.teardown();
        }
    }

    #[cfg(test)]
    fn registry(&self) -> Option<CleanupRegistry> {
        self.session.as_ref().map(|s| s.registry.clone())
    }
}

impl Drop for AmbientPlayer {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::ambient::node::{FilterType, NodeKind};
    use crate::ambient::rng::SequenceRandom;

    fn player() -> AmbientPlayer {
        let config = AmbientConfig {
            sample_rate: 8000,
            noise_seconds: 0.1,
            ..AmbientConfig::default()
        };
        AmbientPlayer::with_random(config, SharedRandom::new(SequenceRandom::constant(0.99)))
    }

    fn track(id: &str) -> &'static SoundProfile {
        tracks::find(id).unwrap()
    }

    fn filters(ctx: &SharedContext, kind: FilterType) -> usize {
        lock(ctx)
            .nodes()
            .filter(|(_, n)| matches!(&n.kind, NodeKind::Filter(b) if b.kind == kind))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn pause_leaves_nothing_alive_for_every_category() {
        for profile in tracks::TRACKS.iter() {
            let mut player = player();
            player.play(profile).unwrap();
            let ctx = player.context().unwrap();
            let registry = player.registry().unwrap();
            assert!(player.stats().pending_timers > 0);

            player.pause();
            assert_eq!(registry.pending_timers(), 0);
            assert_eq!(registry.node_count(), 0);
            assert!(lock(&ctx).is_closed());
            assert_eq!(lock(&ctx).node_count(), 0);
            assert_eq!(player.stats(), AmbientStats {
                sessions_opened: 1,
                ..AmbientStats::default()
            });

            // nothing resurrects later
            tokio::time::sleep(Duration::from_secs(10)).await;
            assert_eq!(lock(&ctx).node_count(), 0);
            assert_eq!(player.current().map(|t| t.id), Some(profile.id));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn same_profile_toggles() {
        let mut player = player();
        player.play(track("3")).unwrap();
        assert!(player.is_playing());
        player.play(track("3")).unwrap();
        assert!(!player.is_playing());
        assert_eq!(player.current().map(|t| t.id), Some("3"));

        player.play(track("3")).unwrap();
        assert!(player.is_playing());
        assert_eq!(player.stats().sessions_opened, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn volume_is_clamped_and_applied_live() {
        let mut player = player();
        assert_eq!(player.set_volume(1.7), 1.0);
        assert_eq!(player.set_volume(-0.3), 0.0);
        assert_eq!(player.set_volume(f32::NAN), 0.0);

        player.play(track("1")).unwrap();
        assert_eq!(player.set_volume(0.8), 0.8);
        let ctx = player.context().unwrap();
        let session = player.session.as_ref().unwrap();
        let applied = lock(&ctx)
            .gain_param(session.master)
            .map(|p| p.value_at(0.0));
        assert_eq!(applied, Some(0.8));
    }

    #[tokio::test(start_paused = true)]
    async fn switching_profiles_keeps_one_context_open() {
        let mut player = player();
        player.play(track("1")).unwrap();
        let ocean = player.context().unwrap();

        player.play(track("2")).unwrap();
        let rain = player.context().unwrap();
        assert!(lock(&ocean).is_closed());
        assert!(!lock(&rain).is_closed());
        assert_eq!(player.current().map(|t| t.id), Some("2"));

        // the ocean session's delayed waves must not land anywhere
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(lock(&ocean).node_count(), 0);
        assert_eq!(filters(&rain, FilterType::Highpass), 1);
        assert_eq!(filters(&rain, FilterType::Lowpass), 1);
        let noise_sources = lock(&rain)
            .nodes()
            .filter(|(_, n)| matches!(n.kind, NodeKind::Noise { .. }))
            .count();
        assert_eq!(noise_sources, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resume_builds_a_fresh_session() {
        let mut player = player();
        player.resume().unwrap();
        assert!(!player.is_playing());

        player.play(track("4")).unwrap();
        let first = player.context().unwrap();
        player.pause();
        player.pause();
        player.resume().unwrap();
        let second = player.context().unwrap();
        assert!(!std::sync::Arc::ptr_eq(&first, &second));
        assert!(player.is_playing());

        // resume while playing does nothing
        player.resume().unwrap();
        assert_eq!(player.stats().sessions_opened, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_device_fails_play_and_leaves_player_idle() {
        let config = AmbientConfig {
            output: OutputTarget::Alsa("serenity-missing-device".into()),
            sample_rate: 8000,
            noise_seconds: 0.1,
            ..AmbientConfig::default()
        };
        let mut player =
            AmbientPlayer::with_random(config, SharedRandom::new(SequenceRandom::constant(0.99)));
        assert!(player.play(track("2")).is_err());
        assert!(!player.is_playing());
        assert!(!player.status().playing);
        assert_eq!(player.stats(), AmbientStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn dead_render_thread_is_not_reported_as_playing() {
        let config = AmbientConfig {
            output: OutputTarget::Null,
            sample_rate: 8000,
            period_size: 80,
            noise_seconds: 0.1,
            ..AmbientConfig::default()
        };
        let mut player =
            AmbientPlayer::with_random(config, SharedRandom::new(SequenceRandom::constant(0.99)));
        player.play(track("1")).unwrap();
        assert!(player.is_playing());

        let first = player.context().unwrap();
        lock(&first).close();
        std::thread::sleep(Duration::from_millis(100));
        assert!(!player.is_playing());
        assert!(!player.status().playing);

        player.resume().unwrap();
        let second = player.context().unwrap();
        assert!(!std::sync::Arc::ptr_eq(&first, &second));
        assert!(player.is_playing());
        assert_eq!(player.stats().sessions_opened, 2);
        player.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_forgets_profile_and_unknown_ids_fail() {
        let mut player = player();
        player.play_by_id("2").unwrap();
        player.stop();
        player.stop();
        assert!(player.current().is_none());
        assert!(!player.is_playing());
        assert!(player.play_by_id("42").is_err());
    }
}
