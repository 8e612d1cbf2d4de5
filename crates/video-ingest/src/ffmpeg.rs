use std::{
    io::{ErrorKind, Read},
    process::{Child, Command, Stdio},
    sync::{Arc, Mutex, PoisonError},
    thread,
};

use anyhow::{Result, anyhow};
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::debug;

use crate::types::{CaptureError, Frame, FrameFormat};

/// Running FFmpeg child, shared with the thread reading its stdout.
///
/// Dropping the last owner kills the process and waits for it, so the
/// capture device is free again once the drop returns.
pub struct FfmpegProcess {
    child: Arc<Mutex<Child>>,
    pid: u32,
}

impl FfmpegProcess {
    pub fn id(&self) -> u32 {
        self.pid
    }
}

impl Drop for FfmpegProcess {
    fn drop(&mut self) {
        terminate(&self.child);
        debug!("ffmpeg pid {} terminated", self.pid);
    }
}

/// Frames decoded by an FFmpeg child plus the handle that owns the child.
pub struct FfmpegCapture {
    pub frames: Receiver<Result<Frame, CaptureError>>,
    pub process: FfmpegProcess,
}

/// Capture a V4L2 device (`0`, `/dev/video0`) through FFmpeg, scaled to
/// `target_size` and converted to BGR8.
pub fn spawn_device_reader(
    device: &str,
    target_size: (i32, i32),
) -> Result<FfmpegCapture> {
    let device_path = match parse_device_index(device) {
        Some(index) => format!("/dev/video{index}"),
        None => device.to_string(),
    };

    let mut cmd = ffmpeg_command();
    cmd.arg("-f")
        .arg("video4linux2")
        .arg("-i")
        .arg(&device_path);
    push_output_args(&mut cmd, target_size);

    spawn_ffmpeg_reader(cmd, target_size, 2)
}

pub fn spawn_rtsp_reader(
    uri: &str,
    target_size: (i32, i32),
) -> Result<FfmpegCapture> {
    let mut cmd = ffmpeg_command();
    cmd.arg("-rtsp_transport")
        .arg("tcp")
        .arg("-fflags")
        .arg("nobuffer")
        .arg("-flags")
        .arg("low_delay")
        .arg("-max_delay")
        .arg("0")
        .arg("-i")
        .arg(uri);
    push_output_args(&mut cmd, target_size);

    spawn_ffmpeg_reader(cmd, target_size, 4)
}

/// Decode a local video file. With `realtime` FFmpeg paces output at the
/// file's native frame rate instead of decoding as fast as possible.
pub fn spawn_file_reader(
    path: &str,
    target_size: (i32, i32),
    realtime: bool,
) -> Result<FfmpegCapture> {
    let mut cmd = ffmpeg_command();
    if realtime {
        cmd.arg("-re");
    }
    cmd.arg("-i").arg(path).arg("-an");
    push_output_args(&mut cmd, target_size);

    spawn_ffmpeg_reader(cmd, target_size, 2)
}

/// Parse a `0` or `/dev/videoX` style URI and return the device index.
pub(crate) fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    if let Some(stripped) = uri.strip_prefix("/dev/video") {
        if !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit()) {
            return stripped.parse::<i32>().ok();
        }
    }
    None
}

fn ffmpeg_command() -> Command {
    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-hide_banner").arg("-loglevel").arg("error");
    cmd
}

fn push_output_args(cmd: &mut Command, target_size: (i32, i32)) {
    let scale_arg = format!("scale={}:{}", target_size.0, target_size.1);
    cmd.arg("-vf")
        .arg(&scale_arg)
        .arg("-pix_fmt")
        .arg("bgr24")
        .arg("-f")
        .arg("rawvideo")
        .arg("-");
}

fn spawn_ffmpeg_reader(
    mut cmd: Command,
    target_size: (i32, i32),
    queue_size: usize,
) -> Result<FfmpegCapture> {
    let (tx, rx) = bounded(queue_size);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());

    let mut child = cmd
        .spawn()
        .map_err(|err| anyhow!("failed to spawn ffmpeg: {err}"))?;
    let pid = child.id();
    let stdout = child.stdout.take();
    let child = Arc::new(Mutex::new(child));
    // Built before any early return so a failed setup still reaps the child.
    let process = FfmpegProcess {
        child: child.clone(),
        pid,
    };
    let stdout = stdout.ok_or_else(|| anyhow!("failed to capture ffmpeg stdout"))?;

    thread::Builder::new()
        .name("video-ingest-ffmpeg".into())
        .spawn(move || {
            let result = ffmpeg_loop(stdout, target_size, &tx);
            terminate(&child);
            if let Err(err) = result {
                let _ = tx.send(Err(err));
            }
        })?;

    Ok(FfmpegCapture {
        frames: rx,
        process,
    })
}

fn terminate(child: &Mutex<Child>) {
    let mut child = child.lock().unwrap_or_else(PoisonError::into_inner);
    let _ = child.kill();
    let _ = child.wait();
}

/// Read fixed-size BGR frames from FFmpeg's stdout until the stream ends or
/// the receiving side goes away.
fn ffmpeg_loop(
    mut stdout: impl Read,
    target_size: (i32, i32),
    tx: &Sender<Result<Frame, CaptureError>>,
) -> Result<(), CaptureError> {
    let frame_bytes = Frame::bgr_len(target_size.0, target_size.1);
    let mut buffer = vec![0u8; frame_bytes];
    let mut result = Ok(());

    loop {
        match stdout.read_exact(&mut buffer) {
            Ok(()) => {
                let timestamp_ms = Utc::now().timestamp_millis();
                if tx
                    .send(Ok(Frame {
                        data: buffer.clone(),
                        width: target_size.0,
                        height: target_size.1,
                        timestamp_ms,
                        format: FrameFormat::Bgr8,
                    }))
                    .is_err()
                {
                    debug!("frame receiver dropped; stopping ffmpeg");
                    break;
                }
            }
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => break,
            Err(err) => {
                result = Err(CaptureError::Other(err.into()));
                break;
            }
        }
    }

    result
}
