use crate::call::{CallEvent, CaptureError, SpeechCapture, SpeechOutput, Ticket};
use crate::config::Config;
use crate::protocol::{SpeechChannel, SpeechCommand, SpeechMessage};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct Voice {
    pub lang: String,
    pub rate: f32,
    pub pitch: f32,
    /// Rate for reading chat messages aloud.
    pub read_rate: f32,
}

impl From<&Config> for Voice {
    fn from(config: &Config) -> Self {
        Self {
            lang: config.speech_lang.to_string(),
            rate: config.speech_rate,
            pitch: config.speech_pitch,
            read_rate: config.speech_read_rate,
        }
    }
}

/// Chat-side speech outside a call: dictation into the input box and
/// reading messages aloud. `seq` echoes the request it answers.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatSpeechEvent {
    Transcript {
        seq: u64,
        text: String,
        is_final: bool,
    },
    DictationEnded {
        seq: u64,
        error: Option<CaptureError>,
    },
    ReadAloudFinished {
        seq: u64,
    },
}

/// UDP link to the speech process, which owns the microphone recognizer and
/// the synthesizer. Replies are stamped with the ticket of the request.
pub struct SpeechBridge {
    socket: Arc<UdpSocket>,
    target_addr: String,
    buffer_size: usize,
    voice: Voice,
    tx: mpsc::Sender<CallEvent>,
    chat_tx: mpsc::Sender<ChatSpeechEvent>,
}

impl SpeechBridge {
    pub async fn new(
        config: &Config,
        tx: mpsc::Sender<CallEvent>,
        chat_tx: mpsc::Sender<ChatSpeechEvent>,
    ) -> anyhow::Result<Self> {
        Self::bind(
            &format!("{}:{}", config.speech_local_ip, config.speech_local_port),
            format!("{}:{}", config.speech_remote_ip, config.speech_remote_port),
            config.speech_buffer_size,
            Voice::from(config),
            tx,
            chat_tx,
        )
        .await
    }

    pub async fn bind(
        local_addr: &str,
        target_addr: String,
        buffer_size: usize,
        voice: Voice,
        tx: mpsc::Sender<CallEvent>,
        chat_tx: mpsc::Sender<ChatSpeechEvent>,
    ) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(local_addr).await?;
        log::info!(
            "SpeechBridge listening on {}, speech process at {}",
            socket.local_addr()?,
            target_addr
        );
        Ok(Self {
            socket: Arc::new(socket),
            target_addr,
            buffer_size,
            voice,
            tx,
            chat_tx,
        })
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> anyhow::Result<std::net::SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            let (len, _) = self.socket.recv_from(&mut buf).await?;
            let msg: SpeechMessage = match serde_json::from_slice(&buf[..len]) {
                Ok(msg) => msg,
                Err(e) => {
                    log::warn!("Unparseable speech message: {}", e);
                    continue;
                }
            };
            log::debug!("Speech message: {:?}", msg);
            let channel = msg.channel;
            let delivered = match channel {
                SpeechChannel::Call => match msg.into_call_event() {
                    Some(event) => self.tx.send(event).await.is_ok(),
                    None => true,
                },
                SpeechChannel::Chat => match msg.into_chat_event() {
                    Some(event) => self.chat_tx.send(event).await.is_ok(),
                    None => true,
                },
            };
            if !delivered {
                log::error!("Speech event receiver closed");
                break;
            }
        }
        Ok(())
    }

    /// Start dictation with interim results. The speech process stops on
    /// its own after one utterance.
    pub async fn start_dictation(&self, seq: u64) -> anyhow::Result<()> {
        self.send_command(&SpeechCommand::DictateStart {
            seq,
            lang: &self.voice.lang,
            interim: true,
        })
        .await
    }

    pub async fn stop_dictation(&self, seq: u64) -> anyhow::Result<()> {
        self.send_command(&SpeechCommand::DictateStop { seq }).await
    }

    /// Read `text` aloud, replacing anything the chat side was reading.
    pub async fn read_aloud(&self, seq: u64, text: &str) -> anyhow::Result<()> {
        self.send_command(&SpeechCommand::ReadStart {
            seq,
            text,
            lang: &self.voice.lang,
            rate: self.voice.read_rate,
            pitch: self.voice.pitch,
        })
        .await
    }

    pub async fn cancel_read(&self, seq: u64) -> anyhow::Result<()> {
        self.send_command(&SpeechCommand::ReadCancel { seq }).await
    }

    async fn send_command(&self, cmd: &SpeechCommand<'_>) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(cmd)?;
        self.socket.send_to(&payload, &self.target_addr).await?;
        Ok(())
    }
}

#[async_trait]
impl SpeechCapture for SpeechBridge {
    async fn start(&self, ticket: Ticket) -> Result<(), CaptureError> {
        self.send_command(&SpeechCommand::ListenStart {
            generation: ticket.generation,
            seq: ticket.seq,
            lang: &self.voice.lang,
        })
        .await
        .map_err(|e| CaptureError::Device(e.to_string()))
    }

    async fn abort(&self, ticket: Ticket) {
        let cmd = SpeechCommand::ListenAbort {
            generation: ticket.generation,
            seq: ticket.seq,
        };
        if let Err(e) = self.send_command(&cmd).await {
            log::warn!("Failed to abort recognition: {}", e);
        }
    }
}

#[async_trait]
impl SpeechOutput for SpeechBridge {
    async fn speak(&self, ticket: Ticket, text: &str) -> anyhow::Result<()> {
        self.send_command(&SpeechCommand::TtsStart {
            generation: ticket.generation,
            seq: ticket.seq,
            text,
            lang: &self.voice.lang,
            rate: self.voice.rate,
            pitch: self.voice.pitch,
        })
        .await
    }

    async fn cancel(&self) {
        if let Err(e) = self.send_command(&SpeechCommand::TtsCancel).await {
            log::warn!("Failed to cancel speech: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn voice() -> Voice {
        Voice {
            lang: "en-US".into(),
            rate: 0.95,
            pitch: 1.0,
            read_rate: 0.9,
        }
    }

    async fn recv_json(socket: &UdpSocket) -> serde_json::Value {
        let mut buf = [0u8; 1024];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        serde_json::from_slice(&buf[..len]).unwrap()
    }

    async fn bridge_for(
        peer: &UdpSocket,
    ) -> (
        Arc<SpeechBridge>,
        mpsc::Receiver<CallEvent>,
        mpsc::Receiver<ChatSpeechEvent>,
    ) {
        let (tx, rx) = mpsc::channel(8);
        let (chat_tx, chat_rx) = mpsc::channel(8);
        let bridge = SpeechBridge::bind(
            "127.0.0.1:0",
            peer.local_addr().unwrap().to_string(),
            1024,
            voice(),
            tx,
            chat_tx,
        )
        .await
        .unwrap();
        (Arc::new(bridge), rx, chat_rx)
    }

    #[tokio::test]
    async fn commands_carry_ticket_and_voice() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (bridge, _rx, _chat_rx) = bridge_for(&peer).await;

        let ticket = Ticket {
            generation: 4,
            seq: 9,
        };
        SpeechCapture::start(bridge.as_ref(), ticket).await.unwrap();
        let sent = recv_json(&peer).await;
        assert_eq!(sent["type"], "listen_start");
        assert_eq!(sent["generation"], 4);
        assert_eq!(sent["seq"], 9);
        assert_eq!(sent["lang"], "en-US");

        bridge.speak(ticket, "Take a slow breath.").await.unwrap();
        let sent = recv_json(&peer).await;
        assert_eq!(sent["type"], "tts_start");
        assert_eq!(sent["text"], "Take a slow breath.");
        assert_eq!(sent["pitch"], 1.0);
    }

    #[tokio::test]
    async fn read_aloud_uses_the_reading_rate() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (bridge, _rx, _chat_rx) = bridge_for(&peer).await;

        bridge.read_aloud(3, "You are doing well.").await.unwrap();
        let sent = recv_json(&peer).await;
        assert_eq!(sent["type"], "read_start");
        assert_eq!(sent["seq"], 3);
        assert_eq!(sent["rate"].as_f64().map(|r| (r * 100.0).round()), Some(90.0));

        bridge.start_dictation(4).await.unwrap();
        let sent = recv_json(&peer).await;
        assert_eq!(sent["type"], "dictate_start");
        assert_eq!(sent["interim"], true);
    }

    #[tokio::test]
    async fn replies_become_call_events() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (bridge, mut rx, _chat_rx) = bridge_for(&peer).await;
        let runner = bridge.clone();
        tokio::spawn(async move { runner.run().await });
        let addr = bridge.local_addr().unwrap();

        peer.send_to(b"not json", addr).await.unwrap();
        peer.send_to(
            br#"{"type":"tts","state":"stop","generation":1,"seq":3}"#,
            addr,
        )
        .await
        .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        match event {
            Some(CallEvent::SpeechFinished { ticket }) => {
                assert_eq!(ticket, Ticket { generation: 1, seq: 3 });
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn chat_channel_replies_skip_the_call() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (bridge, mut rx, mut chat_rx) = bridge_for(&peer).await;
        let runner = bridge.clone();
        tokio::spawn(async move { runner.run().await });
        let addr = bridge.local_addr().unwrap();

        peer.send_to(
            br#"{"type":"stt","state":"result","channel":"chat","seq":2,"text":"I feel","interim":true}"#,
            addr,
        )
        .await
        .unwrap();
        let event = tokio::time::timeout(Duration::from_secs(2), chat_rx.recv())
            .await
            .unwrap();
        assert_eq!(
            event,
            Some(ChatSpeechEvent::Transcript {
                seq: 2,
                text: "I feel".into(),
                is_final: false
            })
        );
        assert!(rx.try_recv().is_err());
    }
}
