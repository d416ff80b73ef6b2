//! Render thread pulling blocks out of a session's audio context.
//!
//! Rendering runs on a dedicated `std::thread`, not a tokio task, so the
//! audio clock never competes with network work.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{SyncSender, sync_channel};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;

use super::context::SharedContext;
use crate::sync::lock;

/// Where a session's samples go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// ALSA playback device name, e.g. `"default"` or `"plughw:0,0"`.
    Alsa(String),
    /// Render at real-time pace and discard the samples.
    Null,
    /// No thread; the owner calls `AudioContext::render` itself.
    Manual,
}

impl OutputTarget {
    /// `"null"` and `"manual"` select the device-less targets; anything else
    /// names an ALSA device.
    pub fn from_device_name(name: &str) -> Self {
        match name {
            "null" => OutputTarget::Null,
            "manual" => OutputTarget::Manual,
            device => OutputTarget::Alsa(device.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub channels: u32,
    pub period_size: usize,
}

/// A running render thread. Dropping it stops the thread.
pub struct OutputStream {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl OutputStream {
    pub fn start(target: &OutputTarget, ctx: SharedContext, params: StreamParams) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let handle = match target {
            OutputTarget::Manual => None,
            OutputTarget::Null => {
                let running = running.clone();
                Some(
                    thread::Builder::new()
                        .name("ambient-null".into())
                        .spawn(move || null_thread(ctx, params, &running))?,
                )
            }
            OutputTarget::Alsa(device) => {
                let thread_running = running.clone();
                let name = device.clone();
                let (ready_tx, ready_rx) = sync_channel::<Result<()>>(1);
                let handle = thread::Builder::new()
                    .name("ambient-play".into())
                    .spawn(move || {
                        let result =
                            play_thread(&name, ctx.clone(), params, &thread_running, &ready_tx);
                        // A dead render thread must not leave timers feeding the graph.
                        lock(&ctx).close();
                        thread_running.store(false, Ordering::SeqCst);
                        if let Err(e) = result {
                            log::error!("Ambient playback thread error: {}", e);
                            let _ = ready_tx.try_send(Err(e));
                        }
                    })?;
                // Block until the device is open or the thread gave up.
                match ready_rx.recv() {
                    Ok(Ok(())) => Some(handle),
                    Ok(Err(e)) => {
                        let _ = handle.join();
                        return Err(e);
                    }
                    Err(_) => {
                        let _ = handle.join();
                        anyhow::bail!("Ambient playback thread exited before opening '{}'", device);
                    }
                }
            }
        };
        Ok(Self { running, handle })
    }

    /// False once the render thread has exited. A manual stream runs until
    /// stopped.
    pub fn is_running(&self) -> bool {
        match &self.handle {
            Some(h) => !h.is_finished(),
            None => self.running.load(Ordering::SeqCst),
        }
    }

    /// Signal the render thread and wait for it; it exits within one period.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Mono f32 to interleaved S16, duplicating the sample across channels.
pub fn interleave_i16(mono: &[f32], channels: usize, out: &mut Vec<i16>) {
    out.clear();
    for sample in mono {
        let s = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        for _ in 0..channels {
            out.push(s);
        }
    }
}

fn null_thread(ctx: SharedContext, params: StreamParams, running: &AtomicBool) {
    let mut block = vec![0.0f32; params.period_size.max(1)];
    let pace = Duration::from_secs_f64(block.len() as f64 / params.sample_rate.max(1) as f64);
    while running.load(Ordering::Relaxed) {
        if !lock(&ctx).render(&mut block) {
            break;
        }
        thread::sleep(pace);
    }
    log::debug!("Null ambient output stopped");
}

#[cfg(feature = "alsa")]
fn play_thread(
    device: &str,
    ctx: SharedContext,
    params: StreamParams,
    running: &AtomicBool,
    ready: &SyncSender<Result<()>>,
) -> Result<()> {
    let period = (params.period_size > 0).then_some(params.period_size);
    let (pcm, negotiated) =
        super::alsa_device::open_playback(device, params.sample_rate, params.channels, period)?;
    let channels = negotiated.channels as usize;
    let io = pcm.io_i16()?;
    let _ = ready.send(Ok(()));

    let mut block = vec![0.0f32; negotiated.period_size.max(1)];
    let mut pcm_data: Vec<i16> = Vec::with_capacity(block.len() * channels);

    log::info!(
        "Ambient playback started: rate={}, ch={}, period={}",
        negotiated.sample_rate,
        channels,
        negotiated.period_size,
    );

    'render: while running.load(Ordering::Relaxed) {
        if !lock(&ctx).render(&mut block) {
            break;
        }
        interleave_i16(&block, channels, &mut pcm_data);

        // Retry short writes and recover from XRUN without dropping frames.
        let total_frames = block.len();
        let mut frames_written = 0;
        while frames_written < total_frames {
            let offset = frames_written * channels;
            match io.writei(&pcm_data[offset..]) {
                Ok(n) => frames_written += n,
                Err(e) => {
                    log::warn!("ALSA playback error: {}, recovering...", e);
                    if let Err(e2) = pcm.prepare() {
                        log::error!("Failed to recover PCM playback: {}", e2);
                        break 'render;
                    }
                }
            }
        }
    }

    log::info!("Ambient playback stopped");
    Ok(())
}

#[cfg(not(feature = "alsa"))]
fn play_thread(
    device: &str,
    _ctx: SharedContext,
    _params: StreamParams,
    _running: &AtomicBool,
    _ready: &SyncSender<Result<()>>,
) -> Result<()> {
    anyhow::bail!("ALSA support not compiled in, cannot open '{}'", device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ambient::context::AudioContext;

    #[test]
    fn device_names_map_to_targets() {
        assert_eq!(OutputTarget::from_device_name("null"), OutputTarget::Null);
        assert_eq!(OutputTarget::from_device_name("manual"), OutputTarget::Manual);
        assert_eq!(
            OutputTarget::from_device_name("plughw:0,0"),
            OutputTarget::Alsa("plughw:0,0".into())
        );
    }

    #[test]
    fn interleave_clamps_and_duplicates() {
        let mut out = Vec::new();
        interleave_i16(&[2.0, -2.0, 0.0], 2, &mut out);
        assert_eq!(out, vec![i16::MAX, i16::MAX, -i16::MAX, -i16::MAX, 0, 0]);
    }

    #[test]
    fn null_stream_advances_clock_and_exits_on_close() {
        let ctx = AudioContext::shared(8000);
        let params = StreamParams {
            sample_rate: 8000,
            channels: 1,
            period_size: 80,
        };
        let mut stream = OutputStream::start(&OutputTarget::Null, ctx.clone(), params).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert!(lock(&ctx).current_time() > 0.0);

        lock(&ctx).close();
        thread::sleep(Duration::from_millis(50));
        assert!(!stream.is_running());
        stream.stop();
    }

    #[test]
    fn missing_device_fails_start_and_closes_context() {
        let ctx = AudioContext::shared(8000);
        let params = StreamParams {
            sample_rate: 8000,
            channels: 1,
            period_size: 80,
        };
        let target = OutputTarget::Alsa("serenity-missing-device".into());
        assert!(OutputStream::start(&target, ctx.clone(), params).is_err());
        assert!(lock(&ctx).is_closed());
    }

    #[test]
    fn manual_stream_runs_until_stopped() {
        let ctx = AudioContext::shared(8000);
        let params = StreamParams {
            sample_rate: 8000,
            channels: 1,
            period_size: 80,
        };
        let mut stream = OutputStream::start(&OutputTarget::Manual, ctx, params).unwrap();
        assert!(stream.is_running());
        stream.stop();
        assert!(!stream.is_running());
    }
}
