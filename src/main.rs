mod ambient;
mod call;
mod chat;
mod config;
mod controller;
mod gui_bridge;
mod protocol;
mod speech_bridge;
mod sync;

use ambient::{AmbientConfig, AmbientPlayer};
use call::{CallController, CallEvent, CallHandle, CallSettings};
use chat::{ChatClient, Companion, CompanionEvent, EmotionClient};
use config::Config;
use controller::CoreController;
use gui_bridge::{GuiBridge, GuiEvent};
use speech_bridge::{ChatSpeechEvent, SpeechBridge};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载配置
    let mut config = Config::new().map_err(anyhow::Error::msg)?;
    if let Ok(key) = std::env::var("SERENITY_API_KEY") {
        config.api_key = key;
    }
    if config.api_key.is_empty() {
        log::warn!("No API key configured; the chat service may reject requests");
    }
    log::info!("{} {} starting", config.app_name, config.app_version);

    // 远端服务客户端
    let timeout = Duration::from_secs(config.request_timeout_secs);
    let chat_url = chat::endpoint(config.base_url, config.chat_path)?;
    let emotion_url = chat::endpoint(config.base_url, config.emotion_path)?;
    let replies = Arc::new(ChatClient::new(chat_url, config.api_key.clone(), timeout)?);
    let emotions = Arc::new(EmotionClient::new(emotion_url, config.api_key.clone(), timeout)?);

    // 创建通道，用于组件间通信
    let (tx_gui_event, mut rx_gui_event) = mpsc::channel::<GuiEvent>(100);
    let (tx_call_event, rx_call_event) = mpsc::channel::<CallEvent>(100);
    let (tx_companion, mut rx_companion) = mpsc::unbounded_channel::<CompanionEvent>();
    let (tx_chat_speech, mut rx_chat_speech) = mpsc::channel::<ChatSpeechEvent>(100);

    let companion = Arc::new(Companion::new(replies, emotions).with_events(tx_companion));

    // 启动GUI桥，与UI进程通信
    let gui_bridge = Arc::new(GuiBridge::new(&config, tx_gui_event).await?);
    let gui_bridge_clone = gui_bridge.clone();
    tokio::spawn(async move {
        if let Err(e) = gui_bridge_clone.run().await {
            log::error!("GuiBridge error: {}", e);
        }
    });

    // 启动语音桥，识别结果和播放状态转成通话事件或聊天语音事件
    let speech_bridge =
        Arc::new(SpeechBridge::new(&config, tx_call_event.clone(), tx_chat_speech).await?);
    let speech_bridge_clone = speech_bridge.clone();
    tokio::spawn(async move {
        if let Err(e) = speech_bridge_clone.run().await {
            log::error!("SpeechBridge error: {}", e);
        }
    });

    // 通话状态机在独立任务中运行
    let call_controller = CallController::new(
        CallSettings::from(&config),
        speech_bridge.clone(),
        speech_bridge.clone(),
        companion.clone(),
        &tx_call_event,
    );
    let call = CallHandle::spawn(call_controller, tx_call_event, rx_call_event);
    let mut call_status = call.subscribe();

    let ambient = AmbientPlayer::new(AmbientConfig::from(&config));
    let mut controller = CoreController::new(ambient, call, companion, gui_bridge, speech_bridge);

    log::info!("Serenity Core Started");

    // 主事件循环
    loop {
        tokio::select! {
            // 监听 Ctrl+C 信号
            _ = signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                controller.shutdown().await;
                break;
            }

            Some(event) = rx_gui_event.recv() => {
                controller.handle_gui_event(event).await;
            }

            Some(event) = rx_companion.recv() => {
                controller.handle_companion_event(event).await;
            }

            Some(event) = rx_chat_speech.recv() => {
                controller.handle_chat_speech_event(event).await;
            }

            Ok(()) = call_status.changed() => {
                let state = *call_status.borrow_and_update();
                controller.handle_call_state(state).await;
            }
        }
    }
    Ok(())
}
