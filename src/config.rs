#[derive(Debug, Clone)]
pub struct Config {
    // 应用信息
    pub app_name: &'static str,
    pub app_version: &'static str,

    // GUI进程配置
    pub gui_local_ip: &'static str,
    pub gui_local_port: u16,
    pub gui_remote_ip: &'static str,
    pub gui_remote_port: u16,
    pub gui_buffer_size: usize,

    // 语音进程配置（识别 + 合成）
    pub speech_local_ip: &'static str,
    pub speech_local_port: u16,
    pub speech_remote_ip: &'static str,
    pub speech_remote_port: u16,
    pub speech_buffer_size: usize,
    pub speech_lang: &'static str,
    pub speech_rate: f32,
    pub speech_pitch: f32,
    pub speech_read_rate: f32,

    // 网络配置
    pub base_url: &'static str,
    pub chat_path: &'static str,
    pub emotion_path: &'static str,
    pub request_timeout_secs: u64,
    // 可在运行时通过环境变量覆盖
    pub api_key: String,

    // 环境音引擎
    pub playback_device: &'static str,
    pub sample_rate: u32,
    pub channels: u32,
    pub period_size: usize,
    pub default_volume: f32,
    pub noise_seconds: u32,

    // 语音通话
    pub greeting: &'static str,
    pub silence_restart_ms: u64,
    pub error_restart_ms: u64,
    pub resume_after_reply_ms: u64,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            app_name: env!("APP_NAME"),
            app_version: env!("APP_VERSION"),

            gui_local_ip: env!("GUI_LOCAL_IP"),
            gui_local_port: env!("GUI_LOCAL_PORT").parse()
                .map_err(|_| "Failed to parse GUI_LOCAL_PORT")?,
            gui_remote_ip: env!("GUI_REMOTE_IP"),
            gui_remote_port: env!("GUI_REMOTE_PORT").parse()
                .map_err(|_| "Failed to parse GUI_REMOTE_PORT")?,
            gui_buffer_size: env!("GUI_BUFFER_SIZE").parse()
                .map_err(|_| "Failed to parse GUI_BUFFER_SIZE")?,

            speech_local_ip: env!("SPEECH_LOCAL_IP"),
            speech_local_port: env!("SPEECH_LOCAL_PORT").parse()
                .map_err(|_| "Failed to parse SPEECH_LOCAL_PORT")?,
            speech_remote_ip: env!("SPEECH_REMOTE_IP"),
            speech_remote_port: env!("SPEECH_REMOTE_PORT").parse()
                .map_err(|_| "Failed to parse SPEECH_REMOTE_PORT")?,
            speech_buffer_size: env!("SPEECH_BUFFER_SIZE").parse()
                .map_err(|_| "Failed to parse SPEECH_BUFFER_SIZE")?,
            speech_lang: env!("SPEECH_LANG"),
            speech_rate: env!("SPEECH_RATE").parse()
                .map_err(|_| "Failed to parse SPEECH_RATE")?,
            speech_pitch: env!("SPEECH_PITCH").parse()
                .map_err(|_| "Failed to parse SPEECH_PITCH")?,
            speech_read_rate: env!("SPEECH_READ_RATE").parse()
                .map_err(|_| "Failed to parse SPEECH_READ_RATE")?,

            base_url: env!("NETWORK_BASE_URL"),
            chat_path: env!("NETWORK_CHAT_PATH"),
            emotion_path: env!("NETWORK_EMOTION_PATH"),
            request_timeout_secs: env!("NETWORK_REQUEST_TIMEOUT_SECS").parse()
                .map_err(|_| "Failed to parse NETWORK_REQUEST_TIMEOUT_SECS")?,
            api_key: env!("NETWORK_API_KEY").to_string(),

            playback_device: env!("AMBIENT_PLAYBACK_DEVICE"),
            sample_rate: env!("AMBIENT_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse AMBIENT_SAMPLE_RATE")?,
            channels: env!("AMBIENT_CHANNELS").parse()
                .map_err(|_| "Failed to parse AMBIENT_CHANNELS")?,
            period_size: env!("AMBIENT_PERIOD_SIZE").parse()
                .map_err(|_| "Failed to parse AMBIENT_PERIOD_SIZE")?,
            default_volume: env!("AMBIENT_DEFAULT_VOLUME").parse()
                .map_err(|_| "Failed to parse AMBIENT_DEFAULT_VOLUME")?,
            noise_seconds: env!("AMBIENT_NOISE_SECONDS").parse()
                .map_err(|_| "Failed to parse AMBIENT_NOISE_SECONDS")?,

            greeting: env!("CALL_GREETING"),
            silence_restart_ms: env!("CALL_SILENCE_RESTART_MS").parse()
                .map_err(|_| "Failed to parse CALL_SILENCE_RESTART_MS")?,
            error_restart_ms: env!("CALL_ERROR_RESTART_MS").parse()
                .map_err(|_| "Failed to parse CALL_ERROR_RESTART_MS")?,
            resume_after_reply_ms: env!("CALL_RESUME_AFTER_REPLY_MS").parse()
                .map_err(|_| "Failed to parse CALL_RESUME_AFTER_REPLY_MS")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_time_config_parses() {
        let config = Config::new().unwrap();
        assert!(config.sample_rate > 0);
        assert!((0.0..=1.0).contains(&config.default_volume));
        assert!(!config.greeting.is_empty());
        assert!(config.silence_restart_ms < config.error_restart_ms);
        assert!(config.speech_read_rate > 0.0);
    }
}
