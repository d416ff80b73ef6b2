use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    application: Application,
    gui: Endpoint,
    speech: Speech,
    network: Network,
    ambient: Ambient,
    call: Call,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Endpoint {
    local_ip: String,
    local_port: u16,
    remote_ip: String,
    remote_port: u16,
    buffer_size: usize,
}

#[derive(Deserialize)]
struct Speech {
    local_ip: String,
    local_port: u16,
    remote_ip: String,
    remote_port: u16,
    buffer_size: usize,
    lang: String,
    rate: f32,
    pitch: f32,
    read_rate: f32,
}

#[derive(Deserialize)]
struct Network {
    base_url: String,
    chat_path: String,
    emotion_path: String,
    api_key: String,
    request_timeout_secs: u64,
}

#[derive(Deserialize)]
struct Ambient {
    playback_device: String,
    sample_rate: u32,
    channels: u32,
    period_size: usize,
    default_volume: f32,
    noise_seconds: u32,
}

#[derive(Deserialize)]
struct Call {
    greeting: String,
    silence_restart_ms: u64,
    error_restart_ms: u64,
    resume_after_reply_ms: u64,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    // GUI 配置
    println!("cargo:rustc-env=GUI_LOCAL_IP={}", config.gui.local_ip);
    println!("cargo:rustc-env=GUI_LOCAL_PORT={}", config.gui.local_port);
    println!("cargo:rustc-env=GUI_REMOTE_IP={}", config.gui.remote_ip);
    println!("cargo:rustc-env=GUI_REMOTE_PORT={}", config.gui.remote_port);
    println!("cargo:rustc-env=GUI_BUFFER_SIZE={}", config.gui.buffer_size);

    // Speech process
    println!("cargo:rustc-env=SPEECH_LOCAL_IP={}", config.speech.local_ip);
    println!("cargo:rustc-env=SPEECH_LOCAL_PORT={}", config.speech.local_port);
    println!("cargo:rustc-env=SPEECH_REMOTE_IP={}", config.speech.remote_ip);
    println!("cargo:rustc-env=SPEECH_REMOTE_PORT={}", config.speech.remote_port);
    println!("cargo:rustc-env=SPEECH_BUFFER_SIZE={}", config.speech.buffer_size);
    println!("cargo:rustc-env=SPEECH_LANG={}", config.speech.lang);
    println!("cargo:rustc-env=SPEECH_RATE={}", config.speech.rate);
    println!("cargo:rustc-env=SPEECH_PITCH={}", config.speech.pitch);
    println!("cargo:rustc-env=SPEECH_READ_RATE={}", config.speech.read_rate);

    // 网络配置
    println!("cargo:rustc-env=NETWORK_BASE_URL={}", config.network.base_url);
    println!("cargo:rustc-env=NETWORK_CHAT_PATH={}", config.network.chat_path);
    println!("cargo:rustc-env=NETWORK_EMOTION_PATH={}", config.network.emotion_path);
    println!("cargo:rustc-env=NETWORK_API_KEY={}", config.network.api_key);
    println!(
        "cargo:rustc-env=NETWORK_REQUEST_TIMEOUT_SECS={}",
        config.network.request_timeout_secs
    );

    // Ambient engine
    println!("cargo:rustc-env=AMBIENT_PLAYBACK_DEVICE={}", config.ambient.playback_device);
    println!("cargo:rustc-env=AMBIENT_SAMPLE_RATE={}", config.ambient.sample_rate);
    println!("cargo:rustc-env=AMBIENT_CHANNELS={}", config.ambient.channels);
    println!("cargo:rustc-env=AMBIENT_PERIOD_SIZE={}", config.ambient.period_size);
    println!("cargo:rustc-env=AMBIENT_DEFAULT_VOLUME={}", config.ambient.default_volume);
    println!("cargo:rustc-env=AMBIENT_NOISE_SECONDS={}", config.ambient.noise_seconds);

    // Voice call
    println!("cargo:rustc-env=CALL_GREETING={}", config.call.greeting);
    println!("cargo:rustc-env=CALL_SILENCE_RESTART_MS={}", config.call.silence_restart_ms);
    println!("cargo:rustc-env=CALL_ERROR_RESTART_MS={}", config.call.error_restart_ms);
    println!(
        "cargo:rustc-env=CALL_RESUME_AFTER_REPLY_MS={}",
        config.call.resume_after_reply_ms
    );
}
