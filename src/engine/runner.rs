//! External downloader execution
//!
//! Runs one command to completion while draining stdout and stderr
//! concurrently into bounded tail buffers (and optionally echoing them to the
//! terminal). Three things can end a run early:
//!
//! - the shared cancellation token (Ctrl-C): reported as interrupted, exit 130
//! - the configured timeout: reported as timed out, exit 124
//! - the rate-limit watchdog: a failure with exit 1, *not* an interrupt
//!
//! Early termination kills the whole process group, since downloaders fork
//! helpers (ffmpeg, yt-dlp) that would otherwise outlive them.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::classify::{DefaultClassifier, OutputClassifier};

pub const DEFAULT_TAIL_BYTES: usize = 64 * 1024;

pub const EXIT_NOT_FOUND: i32 = 127;
pub const EXIT_TIMED_OUT: i32 = 124;
pub const EXIT_INTERRUPTED: i32 = 130;

/// How long to wait for output pumps after the process group was killed
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// One command invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecSpec {
    pub bin: String,
    pub args: Vec<String>,
    pub dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
    /// Arguments as shown to the user, with secrets masked
    pub display_args: Option<Vec<String>>,
}

impl ExecSpec {
    pub fn new(bin: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            bin: bin.into(),
            args,
            ..Default::default()
        }
    }

    /// Shell-ish rendering for logs and dry runs
    pub fn display_command(&self) -> String {
        let args = self.display_args.as_ref().unwrap_or(&self.args);
        std::iter::once(self.bin.as_str())
            .chain(args.iter().map(String::as_str))
            .map(|part| {
                if part.is_empty() || part.contains(char::is_whitespace) {
                    format!("{:?}", part)
                } else {
                    part.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    pub exit_code: i32,
    pub duration: Duration,
    pub stdout_tail: String,
    pub stderr_tail: String,
    /// Cancelled through the shared token
    pub interrupted: bool,
    pub timed_out: bool,
    /// Cancelled by the rate-limit watchdog
    pub rate_limited: bool,
    /// Spawn or wait error, if any
    pub error: Option<String>,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.interrupted && !self.timed_out
    }

    /// Both tails, for signature matching
    pub fn combined_output(&self) -> String {
        format!("{}\n{}", self.stdout_tail, self.stderr_tail)
    }
}

#[async_trait]
pub trait ExecRunner: Send + Sync {
    async fn run(&self, spec: &ExecSpec, cancel: &CancellationToken) -> ExecResult;
}

/// Fixed-capacity buffer keeping the most recent bytes written
#[derive(Debug, Clone)]
pub struct TailBuffer {
    buf: Vec<u8>,
    max: usize,
}

impl TailBuffer {
    pub fn new(max: usize) -> Self {
        let max = if max == 0 { DEFAULT_TAIL_BYTES } else { max };
        Self {
            buf: Vec::with_capacity(max.min(DEFAULT_TAIL_BYTES)),
            max,
        }
    }

    pub fn write(&mut self, data: &[u8]) {
        if data.len() >= self.max {
            self.buf.clear();
            self.buf.extend_from_slice(&data[data.len() - self.max..]);
            return;
        }
        let overflow = (self.buf.len() + data.len()).saturating_sub(self.max);
        if overflow > 0 {
            self.buf.drain(..overflow);
        }
        self.buf.extend_from_slice(data);
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }
}

/// Splits a byte stream into trimmed lines on `\n` or `\r`
///
/// Progress bars redraw with bare carriage returns, so both count as breaks.
#[derive(Debug, Default)]
pub struct LineObserver {
    pending: Vec<u8>,
}

impl LineObserver {
    pub fn feed(&mut self, chunk: &[u8], mut on_line: impl FnMut(&str)) {
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                let line = String::from_utf8_lossy(&self.pending);
                let line = line.trim();
                if !line.is_empty() {
                    on_line(line);
                }
                self.pending.clear();
            } else {
                self.pending.push(byte);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdinMode {
    /// Child shares our terminal (interactive prompts from the downloader work)
    Inherit,
    Null,
}

/// Where child output is mirrored while it is captured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Echo {
    Off,
    /// stdout to stdout, stderr to stderr
    Passthrough,
    /// Both streams to stderr, keeping our stdout clean for JSON events
    Stderr,
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    Interrupted,
    TimedOut,
    RateLimited,
}

/// Runs commands as real child processes
pub struct SubprocessRunner {
    stdin: StdinMode,
    echo: Echo,
    tail_bytes: usize,
    classifier: Arc<dyn OutputClassifier>,
}

impl SubprocessRunner {
    pub fn new(stdin: StdinMode, echo: Echo) -> Self {
        Self {
            stdin,
            echo,
            tail_bytes: DEFAULT_TAIL_BYTES,
            classifier: Arc::new(DefaultClassifier),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn OutputClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    fn spawn_pump<R>(
        &self,
        reader: Option<R>,
        stream: Stream,
        watchdog: &CancellationToken,
        tripped: &Arc<AtomicBool>,
    ) -> Option<JoinHandle<TailBuffer>>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let reader = reader?;
        let echo: Option<Box<dyn AsyncWrite + Unpin + Send>> = match (self.echo, stream) {
            (Echo::Off, _) => None,
            (Echo::Passthrough, Stream::Stdout) => Some(Box::new(tokio::io::stdout())),
            (Echo::Passthrough, Stream::Stderr) | (Echo::Stderr, _) => {
                Some(Box::new(tokio::io::stderr()))
            }
        };
        Some(tokio::spawn(pump(
            reader,
            echo,
            self.tail_bytes,
            Arc::clone(&self.classifier),
            watchdog.clone(),
            Arc::clone(tripped),
        )))
    }
}

#[async_trait]
impl ExecRunner for SubprocessRunner {
    async fn run(&self, spec: &ExecSpec, cancel: &CancellationToken) -> ExecResult {
        let start = Instant::now();
        let mut result = ExecResult::default();

        if spec.bin.trim().is_empty() {
            result.exit_code = 1;
            result.error = Some("missing binary".to_string());
            return result;
        }

        let mut command = Command::new(&spec.bin);
        command
            .args(&spec.args)
            .stdin(match self.stdin {
                StdinMode::Inherit => Stdio::inherit(),
                StdinMode::Null => Stdio::null(),
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.dir {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        command.process_group(0);

        debug!("Running: {}", spec.display_command());
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                result.exit_code = if e.kind() == std::io::ErrorKind::NotFound {
                    EXIT_NOT_FOUND
                } else {
                    1
                };
                result.error = Some(format!("failed to start {}: {}", spec.bin, e));
                result.duration = start.elapsed();
                return result;
            }
        };
        let pid = child.id();

        let watchdog = CancellationToken::new();
        let tripped = Arc::new(AtomicBool::new(false));
        let stdout_pump = self.spawn_pump(child.stdout.take(), Stream::Stdout, &watchdog, &tripped);
        let stderr_pump = self.spawn_pump(child.stderr.take(), Stream::Stderr, &watchdog, &tripped);

        let deadline = async {
            match spec.timeout {
                Some(limit) if !limit.is_zero() => tokio::time::sleep(limit).await,
                _ => std::future::pending::<()>().await,
            }
        };

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = cancel.cancelled() => Outcome::Interrupted,
            _ = watchdog.cancelled() => Outcome::RateLimited,
            _ = deadline => Outcome::TimedOut,
        };

        let early = !matches!(outcome, Outcome::Exited(_));
        if early {
            kill_process_group(pid);
            if let Err(e) = child.kill().await {
                debug!("Kill after early stop failed: {}", e);
            }
        }

        let stdout = join_pump(stdout_pump, early, self.tail_bytes).await;
        let stderr = join_pump(stderr_pump, early, self.tail_bytes).await;
        result.stdout_tail = stdout.to_string_lossy();
        result.stderr_tail = stderr.to_string_lossy();
        result.duration = start.elapsed();

        match outcome {
            Outcome::Exited(Ok(status)) => result.exit_code = exit_code(status),
            Outcome::Exited(Err(e)) => {
                result.exit_code = 1;
                result.error = Some(format!("failed waiting for {}: {}", spec.bin, e));
            }
            Outcome::Interrupted => {
                result.interrupted = true;
                result.exit_code = EXIT_INTERRUPTED;
            }
            Outcome::TimedOut => {
                warn!("{} timed out after {:?}", spec.bin, spec.timeout.unwrap_or_default());
                result.timed_out = true;
                result.exit_code = EXIT_TIMED_OUT;
                result.error = Some("command timed out".to_string());
            }
            Outcome::RateLimited => {
                result.rate_limited = true;
                result.exit_code = 1;
                result.error = Some("aborted on long rate-limit wait".to_string());
            }
        }

        debug!(
            "{} finished: exit={} in {:.1}s",
            spec.bin,
            result.exit_code,
            result.duration.as_secs_f64()
        );
        result
    }
}

async fn pump<R>(
    mut reader: R,
    mut echo: Option<Box<dyn AsyncWrite + Unpin + Send>>,
    tail_bytes: usize,
    classifier: Arc<dyn OutputClassifier>,
    watchdog: CancellationToken,
    tripped: Arc<AtomicBool>,
) -> TailBuffer
where
    R: AsyncRead + Unpin,
{
    let mut tail = TailBuffer::new(tail_bytes);
    let mut lines = LineObserver::default();
    let mut chunk = vec![0u8; 8 * 1024];

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("Output pump stopped: {}", e);
                break;
            }
        };
        let data = &chunk[..n];

        if let Some(out) = echo.as_mut() {
            if out.write_all(data).await.is_err() || out.flush().await.is_err() {
                echo = None;
            }
        }
        tail.write(data);
        lines.feed(data, |line| {
            let Some(seconds) = classifier.rate_limit_wait(line) else {
                return;
            };
            if classifier.should_abort_wait(seconds) && !tripped.swap(true, Ordering::SeqCst) {
                warn!("Downloader asked to wait {}s for a rate limit; aborting", seconds);
                watchdog.cancel();
            }
        });
    }
    tail
}

async fn join_pump(handle: Option<JoinHandle<TailBuffer>>, early: bool, tail_bytes: usize) -> TailBuffer {
    let Some(mut handle) = handle else {
        return TailBuffer::new(tail_bytes);
    };
    let joined = if early {
        match tokio::time::timeout(DRAIN_GRACE, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                // A detached grandchild still holds the pipe
                handle.abort();
                return TailBuffer::new(tail_bytes);
            }
        }
    } else {
        handle.await
    };
    joined.unwrap_or_else(|_| TailBuffer::new(tail_bytes))
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        debug!("killpg({}) failed: {}", pid, e);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}
