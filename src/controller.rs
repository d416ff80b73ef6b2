use crate::ambient::AmbientPlayer;
use crate::call::{CallHandle, CallState};
use crate::chat::{Companion, CompanionEvent};
use crate::gui_bridge::{GuiBridge, GuiEvent};
use crate::protocol::{AmbientAction, CallAction, DictateAction, GuiCommand, GuiNotice};
use crate::speech_bridge::{ChatSpeechEvent, SpeechBridge};
use std::sync::Arc;

pub struct CoreController {
    ambient: AmbientPlayer,
    call: CallHandle,
    companion: Arc<Companion>,
    gui_bridge: Arc<GuiBridge>,
    speech: Arc<SpeechBridge>,
    // 聊天侧朗读/听写的请求序号，过期的回复直接丢弃
    voice_seq: u64,
    reading: Option<u64>,
    dictating: Option<u64>,
    last_dictation: u64,
}

impl CoreController {
    pub fn new(
        ambient: AmbientPlayer,
        call: CallHandle,
        companion: Arc<Companion>,
        gui_bridge: Arc<GuiBridge>,
        speech: Arc<SpeechBridge>,
    ) -> Self {
        Self {
            ambient,
            call,
            companion,
            gui_bridge,
            speech,
            voice_seq: 0,
            reading: None,
            dictating: None,
            last_dictation: 0,
        }
    }

    pub fn ambient(&self) -> &AmbientPlayer {
        &self.ambient
    }

    pub async fn handle_gui_event(&mut self, event: GuiEvent) {
        let GuiEvent::Message(msg) = event;
        log::debug!("Received Message from GUI: {}", msg);
        match serde_json::from_str::<GuiCommand>(&msg) {
            Ok(cmd) => self.handle_command(cmd).await,
            Err(e) => {
                log::warn!("Unrecognized GUI message: {}", e);
                self.notify(GuiNotice::toast("Unrecognized command")).await;
            }
        }
    }

    pub async fn handle_command(&mut self, cmd: GuiCommand) {
        match cmd {
            GuiCommand::Chat { text } => {
                if self.companion.is_busy() {
                    log::debug!("Companion busy, dropping chat message");
                    return;
                }
                // 回复是流式的，放到独立任务里，进度通过 CompanionEvent 回到主循环
                let companion = self.companion.clone();
                tokio::spawn(async move {
                    companion.send_message(&text).await;
                });
            }
            GuiCommand::Ambient { action, track } => {
                let result = match (action, track) {
                    (AmbientAction::Play, Some(id)) => self.ambient.play_by_id(&id),
                    (AmbientAction::Play, None) | (AmbientAction::Resume, _) => {
                        self.ambient.resume()
                    }
                    (AmbientAction::Pause, _) => {
                        self.ambient.pause();
                        Ok(())
                    }
                    (AmbientAction::Stop, _) => {
                        self.ambient.stop();
                        Ok(())
                    }
                };
                if let Err(e) = result {
                    log::error!("Ambient playback failed: {}", e);
                    self.notify(GuiNotice::toast(format!("Playback failed: {}", e)))
                        .await;
                }
                self.publish_ambient().await;
            }
            GuiCommand::Volume { level } => {
                self.ambient.set_volume(level);
                self.publish_ambient().await;
            }
            GuiCommand::Call { action } => {
                if action == CallAction::Start {
                    // 通话独占语音进程
                    self.stop_reading().await;
                    self.stop_dictation().await;
                }
                let result = match action {
                    CallAction::Start => self.call.start().await,
                    CallAction::End => self.call.end().await,
                };
                if let Err(e) = result {
                    log::error!("Call controller unreachable: {}", e);
                    self.notify(GuiNotice::toast("Voice call unavailable")).await;
                }
            }
            GuiCommand::SupportStyle { style } => {
                self.companion.set_support_style(style);
            }
            GuiCommand::Tracks => {
                let tracks = self.ambient.tracks().to_vec();
                self.notify(GuiNotice::Tracks { tracks }).await;
                self.publish_ambient().await;
            }
            GuiCommand::Speak { text } => {
                if self.reading.is_some() {
                    self.stop_reading().await;
                } else {
                    self.read_aloud(&text).await;
                }
            }
            GuiCommand::StopSpeaking => self.stop_reading().await,
            GuiCommand::Dictate { action } => match action {
                DictateAction::Start => self.start_dictation().await,
                DictateAction::Stop => self.stop_dictation().await,
            },
        }
    }

    pub async fn handle_chat_speech_event(&mut self, event: ChatSpeechEvent) {
        match event {
            ChatSpeechEvent::Transcript {
                seq,
                text,
                is_final,
            } => {
                // stop 之后仍可能收到最终结果，按序号而不是状态判断
                if seq == self.last_dictation {
                    self.notify(GuiNotice::Dictation { text, is_final }).await;
                }
            }
            ChatSpeechEvent::DictationEnded { seq, error } => {
                if self.dictating != Some(seq) {
                    return;
                }
                self.dictating = None;
                if let Some(e) = error {
                    log::warn!("Dictation failed: {}", e);
                    if e.is_permission_denied() {
                        self.notify(GuiNotice::toast("Microphone access denied")).await;
                    }
                }
                self.notify(GuiNotice::Listening { active: false }).await;
            }
            ChatSpeechEvent::ReadAloudFinished { seq } => {
                if self.reading == Some(seq) {
                    self.reading = None;
                    self.notify(GuiNotice::Speaking { active: false }).await;
                }
            }
        }
    }

    pub async fn handle_companion_event(&mut self, event: CompanionEvent) {
        let notice = match event {
            CompanionEvent::Emotion(result) => GuiNotice::Emotion { result },
            CompanionEvent::Delta(text) => GuiNotice::ChatDelta { text },
            CompanionEvent::Reply(message) => GuiNotice::ChatReply { message },
            CompanionEvent::Unavailable(reason) => GuiNotice::toast(reason),
        };
        self.notify(notice).await;
    }

    pub async fn handle_call_state(&mut self, state: CallState) {
        log::info!("Call state: {}", state.as_str());
        self.notify(GuiNotice::CallState { state }).await;
    }

    /// Stop ambient playback, silence chat speech and hang up before exit.
    pub async fn shutdown(&mut self) {
        self.ambient.stop();
        self.stop_reading().await;
        self.stop_dictation().await;
        if let Err(e) = self.call.end().await {
            log::warn!("Failed to end call on shutdown: {}", e);
        }
    }

    fn next_voice_seq(&mut self) -> u64 {
        self.voice_seq += 1;
        self.voice_seq
    }

    fn call_busy(&self) -> bool {
        self.call.state() != CallState::Idle
    }

    async fn read_aloud(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if self.call_busy() {
            self.notify(GuiNotice::toast("Voice call in progress")).await;
            return;
        }
        let seq = self.next_voice_seq();
        match self.speech.read_aloud(seq, text).await {
            Ok(()) => {
                self.reading = Some(seq);
                self.notify(GuiNotice::Speaking { active: true }).await;
            }
            Err(e) => {
                log::error!("Read aloud failed: {}", e);
                self.notify(GuiNotice::toast("Speech unavailable")).await;
            }
        }
    }

    async fn stop_reading(&mut self) {
        let Some(seq) = self.reading.take() else {
            return;
        };
        if let Err(e) = self.speech.cancel_read(seq).await {
            log::warn!("Failed to cancel read aloud: {}", e);
        }
        self.notify(GuiNotice::Speaking { active: false }).await;
    }

    async fn start_dictation(&mut self) {
        if self.dictating.is_some() {
            return;
        }
        if self.call_busy() {
            self.notify(GuiNotice::toast("Voice call in progress")).await;
            return;
        }
        let seq = self.next_voice_seq();
        match self.speech.start_dictation(seq).await {
            Ok(()) => {
                self.dictating = Some(seq);
                self.last_dictation = seq;
                self.notify(GuiNotice::Listening { active: true }).await;
            }
            Err(e) => {
                log::error!("Dictation start failed: {}", e);
                self.notify(GuiNotice::toast("Speech unavailable")).await;
            }
        }
    }

    async fn stop_dictation(&mut self) {
        let Some(seq) = self.dictating.take() else {
            return;
        };
        if let Err(e) = self.speech.stop_dictation(seq).await {
            log::warn!("Failed to stop dictation: {}", e);
        }
        self.notify(GuiNotice::Listening { active: false }).await;
    }

    async fn publish_ambient(&self) {
        log::debug!("Ambient stats: {:?}", self.ambient.stats());
        let status = self.ambient.status();
        self.notify(GuiNotice::Ambient { status }).await;
    }

    async fn notify(&self, notice: GuiNotice) {
        if let Err(e) = self.gui_bridge.send_notice(&notice).await {
            log::error!("Failed to send to GUI: {}", e);
        }
    }
}
