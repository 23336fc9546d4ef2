//! ffmpeg command construction and the restart loop around the child process.
//!
//! A single ffmpeg process encodes the input once and tees the result into
//! an HLS playlist and an MPEG-TS stream on a local UDP port. The UDP side
//! feeds the WebRTC relay (see `ingest`).

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::watch;

use crate::config::Config;

/// Size of a TS datagram on the UDP leg: 7 × 188-byte packets.
pub const UDP_PKT_SIZE: usize = 1316;

/// Video encoder settings passed to ffmpeg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderProfile {
    pub codec: &'static str,
    pub pix_fmt: &'static str,
    /// Name of the scale filter (`scale=<w>:<h>`)
    pub scale: &'static str,
    pub extra: Vec<&'static str>,
}

// baseline 没有 B 帧，浏览器端 H.264 解码兼容性最好
pub fn pick_encoder(use_nvenc: bool) -> EncoderProfile {
    if use_nvenc {
        return EncoderProfile {
            codec: "h264_nvenc",
            pix_fmt: "yuv420p",
            scale: "scale",
            extra: vec!["-profile:v", "baseline"],
        };
    }
    EncoderProfile {
        codec: "libx264",
        pix_fmt: "yuv420p",
        scale: "scale",
        extra: vec!["-tune", "zerolatency", "-profile:v", "baseline"],
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// V4L2 capture device, e.g. `/dev/video0`
    V4l2 { device: String },
    /// File path or network URL, read at native rate
    Media { uri: String },
}

impl InputSource {
    pub fn from_input(input: &str) -> Self {
        if input.starts_with("/dev/") {
            InputSource::V4l2 {
                device: input.to_string(),
            }
        } else {
            InputSource::Media {
                uri: input.to_string(),
            }
        }
    }

    pub fn args(&self) -> Vec<String> {
        match self {
            InputSource::V4l2 { device } => [
                "-f",
                "v4l2",
                "-input_format",
                "yuyv422",
                "-video_size",
                "1280x720",
                "-framerate",
                "10",
                "-i",
                device,
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            InputSource::Media { uri } => vec!["-re".into(), "-i".into(), uri.clone()],
        }
    }
}

pub fn udp_target(port: u16) -> String {
    format!("udp://127.0.0.1:{}?pkt_size={}", port, UDP_PKT_SIZE)
}

/// tee 输出：HLS（2 秒切片，保留 5 片）+ 本地 UDP MPEG-TS
pub fn tee_outputs(config: &Config) -> String {
    format!(
        "[f=hls:hls_time=2:hls_list_size=5:hls_flags=delete_segments]{}|[f=mpegts]{}",
        config.hls_playlist().display(),
        udp_target(config.udp_port)
    )
}

/// Full ffmpeg argument vector (program name excluded).
pub fn build_args(config: &Config) -> Vec<String> {
    let enc = pick_encoder(config.use_nvenc);
    let input = InputSource::from_input(&config.input);

    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-y"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.extend(input.args());
    args.push("-vf".into());
    args.push(format!("{}={}", enc.scale, config.video_scale));
    args.push("-pix_fmt".into());
    args.push(enc.pix_fmt.into());
    args.push("-c:v".into());
    args.push(enc.codec.into());
    args.extend(enc.extra.iter().map(|s| s.to_string()));
    for s in ["-preset", "veryfast", "-g", "50", "-b:v", "4000k", "-f", "tee", "-map", "0:v"] {
        args.push(s.into());
    }
    args.push(tee_outputs(config));
    args
}

/// Render a command for logs, quoting arguments the way a POSIX shell would need.
pub fn render_command(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .map(quote_arg)
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote_arg(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Keeps ffmpeg running until shutdown is signalled.
pub struct FfmpegSupervisor {
    program: String,
    args: Vec<String>,
    restart_delay: Duration,
}

impl FfmpegSupervisor {
    pub fn new(program: impl Into<String>, args: Vec<String>, restart_delay: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            restart_delay,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.ffmpeg_bin.clone(),
            build_args(config),
            Duration::from_secs(config.ffmpeg_restart_delay_secs),
        )
    }

    pub fn command_line(&self) -> String {
        render_command(&self.program, &self.args)
    }

    /// Returns the number of times the process was launched.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut launches = 0u64;
        let command_line = self.command_line();

        loop {
            if *shutdown.borrow() {
                break;
            }

            log::info!("Launching ffmpeg:");
            log::info!("{}", command_line);
            launches += 1;

            let spawned = Command::new(&self.program)
                .args(&self.args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .spawn();

            let outcome = match spawned {
                Ok(mut child) => {
                    tokio::select! {
                        status = child.wait() => match status {
                            Ok(status) => match status.code() {
                                Some(code) => code.to_string(),
                                None => status.to_string(),
                            },
                            Err(e) => format!("wait failed: {}", e),
                        },
                        _ = shutdown.changed() => {
                            // 退出前结束子进程，避免残留 ffmpeg
                            if let Err(e) = child.kill().await {
                                log::warn!("Failed to kill ffmpeg: {}", e);
                            }
                            log::info!("ffmpeg stopped");
                            break;
                        }
                    }
                }
                Err(e) => {
                    log::error!("Failed to spawn {}: {}", self.program, e);
                    "spawn failed".to_string()
                }
            };

            log::warn!(
                "ffmpeg exited ({}), restarting in {}s",
                outcome,
                self.restart_delay.as_secs_f32()
            );

            tokio::select! {
                _ = tokio::time::sleep(self.restart_delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        launches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config_with(input: &str, nvenc: bool) -> Config {
        Config {
            input: input.to_string(),
            use_nvenc: nvenc,
            hls_dir: PathBuf::from("/hls"),
            udp_port: 10000,
            video_scale: "1280:720".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn device_paths_use_v4l2() {
        assert_eq!(
            InputSource::from_input("/dev/video2"),
            InputSource::V4l2 {
                device: "/dev/video2".into()
            }
        );
        assert_eq!(
            InputSource::from_input("rtsp://10.0.0.2/live"),
            InputSource::Media {
                uri: "rtsp://10.0.0.2/live".into()
            }
        );
    }

    #[test]
    fn v4l2_command_line() {
        let args = build_args(&config_with("/dev/video0", false));
        let expected: Vec<String> = [
            "-hide_banner", "-loglevel", "error", "-y",
            "-f", "v4l2", "-input_format", "yuyv422", "-video_size", "1280x720",
            "-framerate", "10", "-i", "/dev/video0",
            "-vf", "scale=1280:720", "-pix_fmt", "yuv420p",
            "-c:v", "libx264", "-tune", "zerolatency", "-profile:v", "baseline",
            "-preset", "veryfast", "-g", "50", "-b:v", "4000k",
            "-f", "tee", "-map", "0:v",
            "[f=hls:hls_time=2:hls_list_size=5:hls_flags=delete_segments]/hls/index.m3u8|[f=mpegts]udp://127.0.0.1:10000?pkt_size=1316",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(args, expected);
    }

    #[test]
    fn file_input_reads_at_native_rate_with_nvenc() {
        let args = build_args(&config_with("/media/clip one.mp4", true));
        assert_eq!(&args[4..7], &["-re", "-i", "/media/clip one.mp4"]);
        let codec = args.iter().position(|a| a == "-c:v").unwrap();
        assert_eq!(args[codec + 1], "h264_nvenc");
    }

    #[test]
    fn rendered_command_quotes_special_args() {
        let rendered = render_command(
            "ffmpeg",
            &["-i".into(), "/media/it's here.mp4".into(), "-vf".into(), "scale=640:360".into()],
        );
        assert_eq!(
            rendered,
            r"ffmpeg -i '/media/it'\''s here.mp4' -vf scale=640:360"
        );
    }

    #[tokio::test]
    async fn restarts_after_exit_until_shutdown() {
        let (tx, rx) = watch::channel(false);
        let supervisor = FfmpegSupervisor::new("true", Vec::new(), Duration::from_millis(10));
        let handle = tokio::spawn(supervisor.run(rx));

        tokio::time::sleep(Duration::from_millis(300)).await;
        tx.send(true).unwrap();

        let launches = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(launches >= 2, "launched {launches} times");
    }

    #[tokio::test]
    async fn shutdown_kills_running_child() {
        let (tx, rx) = watch::channel(false);
        let supervisor =
            FfmpegSupervisor::new("sleep", vec!["30".into()], Duration::from_secs(2));
        let handle = tokio::spawn(supervisor.run(rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();

        let launches = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(launches, 1);
    }

    #[tokio::test]
    async fn missing_binary_is_retried() {
        let (tx, rx) = watch::channel(false);
        let supervisor = FfmpegSupervisor::new(
            "/nonexistent/ffmpeg-binary",
            Vec::new(),
            Duration::from_millis(10),
        );
        let handle = tokio::spawn(supervisor.run(rx));
        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();
        let launches = handle.await.unwrap();
        assert!(launches >= 2);
    }
}
