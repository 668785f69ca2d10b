#![forbid(unsafe_code)]

use super::{Computation, ComputationInput};
use base64::Engine as _;
use serde_json::{Value, json};
use std::io::{Read, Write as _};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const MAX_OUTPUT_BYTES: u64 = 8 * 1024 * 1024;
const MAX_STDERR_TAIL: usize = 400;
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runs an external program per job.
///
/// stdin receives `{"job_id", "payload_base64", "extra_input"}`; stdout must be one JSON
/// document, which becomes the job result. A non-zero exit, a timeout or unparseable output
/// fails the job.
#[derive(Clone, Debug)]
pub struct CommandComputation {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandComputation {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    fn request_json(input: &ComputationInput) -> Value {
        json!({
            "job_id": input.job_id.as_str(),
            "payload_base64": base64::engine::general_purpose::STANDARD.encode(&input.payload),
            "extra_input": input.extra_input.clone().unwrap_or(Value::Null),
        })
    }
}

impl Computation for CommandComputation {
    fn run(&self, input: &ComputationInput) -> Result<Value, String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("failed to spawn {}: {e}", self.program.display()))?;

        // Pipes are drained and fed off-thread so a child that echoes while reading cannot
        // wedge both sides; the deadline below covers the write as well.
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);
        let stdin = child.stdin.take().map(|mut pipe| {
            let request = Self::request_json(input).to_string();
            std::thread::spawn(move || pipe.write_all(request.as_bytes()))
        });

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(format!("wait for computation failed: {e}"));
                }
            }
            if started.elapsed() >= self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(format!(
                    "computation timed out after {}s",
                    self.timeout.as_secs()
                ));
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        // The child has exited, so its end of stdin is closed and the writer cannot block.
        if let Some(Ok(Err(e))) = stdin.map(|handle| handle.join()) {
            tracing::debug!(error = %e, "computation closed stdin before reading the request");
        }
        let stdout = stdout
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        let stderr = stderr
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if !status.success() {
            let tail = String::from_utf8_lossy(&stderr);
            let tail = tail.trim();
            let start = tail.len().saturating_sub(MAX_STDERR_TAIL);
            let start = (start..=tail.len())
                .find(|i| tail.is_char_boundary(*i))
                .unwrap_or(tail.len());
            return Err(format!(
                "computation exited with {status}: {}",
                &tail[start..]
            ));
        }
        serde_json::from_slice(&stdout).map_err(|e| format!("computation output is not JSON: {e}"))
    }
}

fn drain(pipe: impl Read + Send + 'static) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let mut pipe = pipe.take(MAX_OUTPUT_BYTES);
        let _ = pipe.read_to_end(&mut buf);
        // Keep reading past the cap so the child never blocks on a full pipe.
        let _ = std::io::copy(pipe.get_mut(), &mut std::io::sink());
        buf
    })
}

/// Stand-in when no computation is configured: the agent reports itself unavailable and any job
/// that still reaches `running` fails with an explanation.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnconfiguredComputation;

impl Computation for UnconfiguredComputation {
    fn run(&self, _input: &ComputationInput) -> Result<Value, String> {
        Err("no computation backend is configured".to_string())
    }

    fn is_available(&self) -> bool {
        false
    }
}
