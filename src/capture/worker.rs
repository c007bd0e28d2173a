//! Isolated capture workers.
//!
//! The still-capture program leaks memory when driven repeatedly from one
//! long-lived process, so every exposure runs in a freshly spawned child
//! process with a hard deadline. Results come back through the output file
//! and the exit status only.

use crate::calibration::SensorGain;
use crate::settings::{Resolution, WhiteBalanceGains};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors from a capture worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The worker process could not be started.
    #[error("could not start capture worker {program}: {source}")]
    Spawn {
        /// Program that failed to start.
        program: PathBuf,
        /// Underlying spawn error.
        #[source]
        source: std::io::Error,
    },
    /// The worker ran past its deadline and was killed.
    #[error("capture worker exceeded {timeout:?}")]
    Timeout {
        /// Deadline the worker exceeded.
        timeout: Duration,
    },
    /// The worker exited unsuccessfully.
    #[error("capture worker exited with {status}")]
    Failed {
        /// Exit status of the worker.
        status: ExitStatus,
    },
    /// Polling the worker failed; it was killed.
    #[error("failed to wait for capture worker: {0}")]
    Wait(#[source] std::io::Error),
}

/// Fully manual exposure parameters baked into one capture invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureInvocation {
    /// Output resolution.
    pub resolution: Resolution,
    /// Shutter speed in microseconds.
    pub shutter_speed_us: u32,
    /// Manual white-balance gains.
    pub white_balance: WhiteBalanceGains,
    /// Analog and digital gain to apply.
    pub gain: SensorGain,
    /// Preview time before the still is taken, in milliseconds.
    pub preview_ms: u32,
}

impl CaptureInvocation {
    /// Command-line arguments writing a BMP still to `output`.
    pub fn args(&self, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "-e".to_string(),
            "bmp".to_string(),
            "-w".to_string(),
            self.resolution.width.to_string(),
            "-h".to_string(),
            self.resolution.height.to_string(),
            "-ss".to_string(),
            self.shutter_speed_us.to_string(),
            "-t".to_string(),
            self.preview_ms.to_string(),
            "-awb".to_string(),
            "off".to_string(),
            "-awbg".to_string(),
            format!("{},{}", self.white_balance.red, self.white_balance.blue),
            "-ag".to_string(),
            self.gain.analog.to_string(),
            "-dg".to_string(),
            self.gain.digital.to_string(),
        ]
        .into_iter()
        .map(OsString::from)
        .collect();
        args.push("-o".into());
        args.push(output.as_os_str().to_os_string());
        args
    }
}

/// Runs one capture invocation to completion.
pub trait CaptureWorker {
    /// Captures a still to `output`, blocking until the worker is done.
    fn capture(&mut self, invocation: &CaptureInvocation, output: &Path) -> Result<(), WorkerError>;
}

/// Runs the external capture program in a throwaway child process.
#[derive(Debug, Clone)]
pub struct ProcessWorker {
    program: PathBuf,
    timeout: Duration,
    poll_interval: Duration,
}

impl ProcessWorker {
    /// Creates a worker running `program` with a per-capture `timeout`.
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
            poll_interval: Duration::from_millis(50),
        }
    }

    /// The capture program.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Runs `command` as an isolated worker under this worker's timeout.
    pub fn run(&self, mut command: Command) -> Result<(), WorkerError> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let started = Instant::now();
        let mut child = command.spawn().map_err(|source| WorkerError::Spawn {
            program: PathBuf::from(command.get_program()),
            source,
        })?;
        // An unrepresentable deadline means the worker is never timed out.
        let deadline = started.checked_add(self.timeout);

        loop {
            match child.try_wait() {
                Ok(Some(status)) if status.success() => {
                    tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "Capture worker finished");
                    return Ok(());
                }
                Ok(Some(status)) => return Err(WorkerError::Failed { status }),
                Ok(None) => {
                    let now = Instant::now();
                    let remaining = deadline.map(|d| d.saturating_duration_since(now));
                    if remaining == Some(Duration::ZERO) {
                        if let Err(e) = child.kill() {
                            tracing::error!(error = %e, "Failed to kill timed out capture worker");
                        }
                        let _ = child.wait();
                        return Err(WorkerError::Timeout {
                            timeout: self.timeout,
                        });
                    }
                    std::thread::sleep(remaining.map_or(self.poll_interval, |r| self.poll_interval.min(r)));
                }
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(WorkerError::Wait(e));
                }
            }
        }
    }
}

impl CaptureWorker for ProcessWorker {
    fn capture(&mut self, invocation: &CaptureInvocation, output: &Path) -> Result<(), WorkerError> {
        let mut command = Command::new(&self.program);
        command.args(invocation.args(output));
        tracing::debug!(program = %self.program.display(), output = %output.display(), "Starting capture worker");
        self.run(command)
    }
}
