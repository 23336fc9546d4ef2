use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// 采集音频（ALSA）配置，device 为空时不创建音频轨道
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct AudioSettings {
    /// ALSA capture device name (e.g. "hw:1,0")
    pub device: String,
    pub sample_rate: u32,
    pub channels: u32,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            device: String::new(),
            sample_rate: 44100,
            channels: 1,
        }
    }
}

impl AudioSettings {
    pub fn enabled(&self) -> bool {
        !self.device.is_empty()
    }
}

/// 未配置时使用的公共 STUN，STUN_URLS="" 可关闭
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    // 视频输入：/dev/ 开头走 v4l2，否则当作文件或 URL
    pub input: String,
    pub use_nvenc: bool,
    pub hls_dir: PathBuf,
    pub record_dir: PathBuf,
    // ffmpeg 推 MPEG-TS 的本地 UDP 端口
    pub udp_port: u16,
    pub video_scale: String,

    // 信令服务
    pub http_bind: SocketAddr,
    pub stun_urls: Vec<String>,

    // ffmpeg 进程
    pub ffmpeg_bin: String,
    pub ffmpeg_restart_delay_secs: u64,
    pub startup_delay_secs: u64,

    pub audio: AudioSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input: "/dev/video0".to_string(),
            use_nvenc: false,
            hls_dir: PathBuf::from("/hls"),
            record_dir: PathBuf::from("/recordings"),
            udp_port: 10000,
            video_scale: "1280:720".to_string(),
            http_bind: SocketAddr::from(([0, 0, 0, 0], 8081)),
            stun_urls: vec![DEFAULT_STUN_URL.to_string()],
            ffmpeg_bin: "ffmpeg".to_string(),
            ffmpeg_restart_delay_secs: 2,
            startup_delay_secs: 2,
            audio: AudioSettings::default(),
        }
    }
}

impl Config {
    /// 加载顺序：默认值 -> TOML 文件（可选）-> 环境变量
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Override fields from environment-style lookups.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("INPUT") {
            self.input = v;
        }
        if let Some(v) = lookup("USE_NVENC") {
            self.use_nvenc = parse_flag(&v);
        }
        if let Some(v) = lookup("HLS_DIR") {
            self.hls_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("RECORD_DIR") {
            self.record_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("UDP_PORT") {
            self.udp_port = parse_var("UDP_PORT", &v)?;
        }
        if let Some(v) = lookup("VIDEO_SCALE") {
            self.video_scale = v;
        }
        if let Some(v) = lookup("HTTP_BIND") {
            self.http_bind = parse_var("HTTP_BIND", &v)?;
        }
        if let Some(v) = lookup("STUN_URLS") {
            self.stun_urls = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup("FFMPEG_BIN") {
            self.ffmpeg_bin = v;
        }
        if let Some(v) = lookup("FFMPEG_RESTART_DELAY_SECS") {
            self.ffmpeg_restart_delay_secs = parse_var("FFMPEG_RESTART_DELAY_SECS", &v)?;
        }
        if let Some(v) = lookup("STARTUP_DELAY_SECS") {
            self.startup_delay_secs = parse_var("STARTUP_DELAY_SECS", &v)?;
        }
        if let Some(v) = lookup("AUDIO_DEVICE") {
            self.audio.device = v.trim().to_string();
        }
        if let Some(v) = lookup("AUDIO_SAMPLE_RATE") {
            self.audio.sample_rate = parse_var("AUDIO_SAMPLE_RATE", &v)?;
        }
        if let Some(v) = lookup("AUDIO_CHANNELS") {
            self.audio.channels = parse_var("AUDIO_CHANNELS", &v)?;
        }
        Ok(())
    }

    /// 创建 HLS 和录像目录（已存在则忽略）
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.hls_dir, &self.record_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn hls_playlist(&self) -> PathBuf {
        self.hls_dir.join("index.m3u8")
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes")
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Failed to parse {}={:?}", name, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_container_layout() {
        let config = Config::default();
        assert_eq!(config.input, "/dev/video0");
        assert!(!config.use_nvenc);
        assert_eq!(config.hls_dir, PathBuf::from("/hls"));
        assert_eq!(config.record_dir, PathBuf::from("/recordings"));
        assert_eq!(config.udp_port, 10000);
        assert_eq!(config.video_scale, "1280:720");
        assert_eq!(config.http_bind.port(), 8081);
        assert_eq!(config.ffmpeg_restart_delay_secs, 2);
        assert_eq!(config.stun_urls, vec![DEFAULT_STUN_URL]);
        assert!(!config.audio.enabled());
    }

    #[test]
    fn env_overrides_fields() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("INPUT", "rtsp://cam/stream"),
                ("USE_NVENC", "YES"),
                ("UDP_PORT", "12000"),
                ("VIDEO_SCALE", "640:360"),
                ("STUN_URLS", "stun:a:3478, ,stun:b:3478"),
                ("AUDIO_DEVICE", "hw:1,0"),
            ]))
            .unwrap();

        assert_eq!(config.input, "rtsp://cam/stream");
        assert!(config.use_nvenc);
        assert_eq!(config.udp_port, 12000);
        assert_eq!(config.video_scale, "640:360");
        assert_eq!(config.stun_urls, vec!["stun:a:3478", "stun:b:3478"]);
        assert!(config.audio.enabled());
        assert_eq!(config.audio.device, "hw:1,0");
    }

    #[test]
    fn nvenc_flag_accepts_only_truthy_words() {
        for (value, expected) in [("1", true), ("True", true), ("yes", true), ("0", false), ("on", false), ("", false)] {
            let mut config = Config::default();
            config.apply_env(env(&[("USE_NVENC", value)])).unwrap();
            assert_eq!(config.use_nvenc, expected, "USE_NVENC={value:?}");
        }
    }

    #[test]
    fn empty_stun_urls_disables_stun() {
        let mut config = Config::default();
        config.apply_env(env(&[("STUN_URLS", "")])).unwrap();
        assert!(config.stun_urls.is_empty());
    }

    #[test]
    fn bad_number_names_the_variable() {
        let mut config = Config::default();
        let err = config.apply_env(env(&[("UDP_PORT", "abc")])).unwrap_err();
        assert!(err.to_string().contains("UDP_PORT"));
    }

    #[test]
    fn toml_file_is_partial_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("streamer.toml");
        std::fs::write(
            &path,
            "input = \"/data/sample.mp4\"\nudp_port = 10500\n\n[audio]\ndevice = \"hw:1,0\"\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.input, "/data/sample.mp4");
        assert_eq!(config.udp_port, 10500);
        assert_eq!(config.audio.device, "hw:1,0");
        assert_eq!(config.audio.sample_rate, 44100);
        assert_eq!(config.video_scale, "1280:720");
    }

    #[test]
    fn ensure_dirs_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            hls_dir: dir.path().join("hls"),
            record_dir: dir.path().join("rec/nested"),
            ..Config::default()
        };
        config.ensure_dirs().unwrap();
        config.ensure_dirs().unwrap();
        assert!(config.hls_dir.is_dir());
        assert!(config.record_dir.is_dir());
        assert_eq!(config.hls_playlist(), dir.path().join("hls/index.m3u8"));
    }
}
