use serde::{Deserialize, Serialize};

use crate::ambient::{AmbientStatus, SoundProfile};
use crate::call::{CallEvent, CallState, CaptureError, Ticket};
use crate::chat::{ChatMessage, EmotionResult, SupportStyle};
use crate::speech_bridge::ChatSpeechEvent;

// UI进程发来的命令
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GuiCommand {
    Chat {
        text: String,
    },
    Ambient {
        action: AmbientAction,
        #[serde(default)]
        track: Option<String>,
    },
    Volume {
        level: f32,
    },
    Call {
        action: CallAction,
    },
    SupportStyle {
        style: SupportStyle,
    },
    Tracks,
    // 朗读聊天消息，正在朗读时再次发送则停止
    Speak {
        text: String,
    },
    StopSpeaking,
    // 按住说话的听写，结果填入输入框
    Dictate {
        action: DictateAction,
    },
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AmbientAction {
    Play,
    Pause,
    Resume,
    Stop,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CallAction {
    Start,
    End,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DictateAction {
    Start,
    Stop,
}

// 发给UI进程的通知
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GuiNotice {
    ChatDelta {
        text: String,
    },
    ChatReply {
        message: ChatMessage,
    },
    Emotion {
        #[serde(flatten)]
        result: EmotionResult,
    },
    CallState {
        state: CallState,
    },
    Ambient {
        #[serde(flatten)]
        status: AmbientStatus,
    },
    Tracks {
        tracks: Vec<SoundProfile>,
    },
    Dictation {
        text: String,
        is_final: bool,
    },
    Listening {
        active: bool,
    },
    Speaking {
        active: bool,
    },
    Toast {
        text: String,
    },
}

impl GuiNotice {
    pub fn toast(text: impl Into<String>) -> Self {
        GuiNotice::Toast { text: text.into() }
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SpeechKind {
    Stt,
    Tts,
}

// 通话和聊天共用语音进程，用 channel 区分
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpeechChannel {
    #[default]
    Call,
    Chat,
}

// 语音进程发来的消息，generation/seq 原样带回发起请求时的票据
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct SpeechMessage {
    #[serde(rename = "type")]
    pub kind: SpeechKind,
    pub state: String,
    #[serde(default)]
    pub channel: SpeechChannel,
    #[serde(default)]
    pub generation: u64,
    #[serde(default)]
    pub seq: u64,
    pub text: Option<String>,
    pub error: Option<String>,
    /// Interim recognition results precede the final one.
    #[serde(default)]
    pub interim: bool,
}

impl SpeechMessage {
    pub fn ticket(&self) -> Ticket {
        Ticket {
            generation: self.generation,
            seq: self.seq,
        }
    }

    /// Translate into the call event it reports, if any.
    pub fn into_call_event(self) -> Option<CallEvent> {
        let ticket = self.ticket();
        match (self.kind, self.state.as_str()) {
            // 通话只要最终结果
            (SpeechKind::Stt, "result") if self.interim => None,
            (SpeechKind::Stt, "result") => Some(CallEvent::RecognitionResult {
                ticket,
                transcript: self.text.unwrap_or_default(),
            }),
            (SpeechKind::Stt, "end") => Some(CallEvent::RecognitionEnd { ticket }),
            (SpeechKind::Stt, "error") => Some(CallEvent::RecognitionError {
                ticket,
                error: CaptureError::from_code(self.error.as_deref().unwrap_or("unknown")),
            }),
            // 播放失败与播放完成同样推进对话
            (SpeechKind::Tts, "stop" | "error") => Some(CallEvent::SpeechFinished { ticket }),
            _ => None,
        }
    }

    /// Translate a chat-channel message into the dictation or read-aloud
    /// event it reports, if any.
    pub fn into_chat_event(self) -> Option<ChatSpeechEvent> {
        let seq = self.seq;
        match (self.kind, self.state.as_str()) {
            (SpeechKind::Stt, "result") => Some(ChatSpeechEvent::Transcript {
                seq,
                text: self.text.unwrap_or_default(),
                is_final: !self.interim,
            }),
            (SpeechKind::Stt, "end") => Some(ChatSpeechEvent::DictationEnded { seq, error: None }),
            (SpeechKind::Stt, "error") => Some(ChatSpeechEvent::DictationEnded {
                seq,
                error: Some(CaptureError::from_code(
                    self.error.as_deref().unwrap_or("unknown"),
                )),
            }),
            (SpeechKind::Tts, "stop" | "error") => Some(ChatSpeechEvent::ReadAloudFinished { seq }),
            _ => None,
        }
    }
}

// 发给语音进程的命令
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpeechCommand<'a> {
    ListenStart {
        generation: u64,
        seq: u64,
        lang: &'a str,
    },
    ListenAbort {
        generation: u64,
        seq: u64,
    },
    TtsStart {
        generation: u64,
        seq: u64,
        text: &'a str,
        lang: &'a str,
        rate: f32,
        pitch: f32,
    },
    TtsCancel,
    DictateStart {
        seq: u64,
        lang: &'a str,
        interim: bool,
    },
    DictateStop {
        seq: u64,
    },
    ReadStart {
        seq: u64,
        text: &'a str,
        lang: &'a str,
        rate: f32,
        pitch: f32,
    },
    ReadCancel {
        seq: u64,
    },
}
