//! Process execution engine.
//!
//! Runs a shell command with its standard input fed from a [`ByteStream`] and
//! exposes its standard output as another lazy stream. All three pipes are
//! multiplexed on a single thread, so a child that fills its output pipe while
//! we are still writing its input never deadlocks: each call to `next()` waits
//! for whichever pipe becomes ready first.
//!
//! Input is written in chunks no larger than [`PIPE_BUF`] so that a single
//! write never blocks for long. Standard error is kept as a bounded tail used
//! when the command fails.

use crate::stream::{ByteStream, Chunk, Releasable, StreamError};
use std::fmt;
use std::io;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

/// Largest input write issued at once.
#[cfg(target_os = "linux")]
pub const PIPE_BUF: usize = 4096;
#[cfg(not(target_os = "linux"))]
pub const PIPE_BUF: usize = 512;

/// Default size of a single read from the child's output.
pub const OUTPUT_CHUNK_SIZE: usize = 8192;

/// Default number of trailing stderr bytes kept for diagnostics.
pub const STDERR_TAIL_SIZE: usize = 4096;

/// An external command that exited unsuccessfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessFailure {
    /// The command line as given to the shell
    pub command: String,
    /// Exit code, or `None` when terminated by a signal
    pub exit_code: Option<i32>,
    /// Trailing standard error output
    pub stderr: String,
}

impl fmt::Display for ProcessFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit_code {
            Some(code) => write!(f, "`{}` exited with status {}", self.command, code)?,
            None => write!(f, "`{}` was terminated by a signal", self.command)?,
        }
        let tail = self.stderr.trim();
        if !tail.is_empty() {
            write!(f, ":\n{}", tail)?;
        }
        Ok(())
    }
}

impl std::error::Error for ProcessFailure {}

/// Keeps the last `limit` bytes written to it.
#[derive(Debug)]
struct TailBuffer {
    bytes: Vec<u8>,
    limit: usize,
}

impl TailBuffer {
    fn new(limit: usize) -> Self {
        Self { bytes: Vec::new(), limit }
    }

    fn push(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
        if self.bytes.len() > self.limit {
            let excess = self.bytes.len() - self.limit;
            self.bytes.drain(..excess);
        }
    }

    fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Builder for a streamed external command.
///
/// ```ignore
/// let output = ProcessRunner::new("cat | grep TEST1")
///     .stdin_bytes("TEST1\nTEST2\nTEST1\n")
///     .run_to_end()?;
/// ```
pub struct ProcessRunner {
    command: String,
    input: Option<ByteStream>,
    release: Vec<Releasable>,
    chunk_size: usize,
    stderr_limit: usize,
}

impl ProcessRunner {
    /// Run `command` through the platform shell.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            input: None,
            release: Vec::new(),
            chunk_size: OUTPUT_CHUNK_SIZE,
            stderr_limit: STDERR_TAIL_SIZE,
        }
    }

    /// Feed the child's standard input from a stream.
    pub fn stdin(mut self, input: ByteStream) -> Self {
        self.input = Some(input);
        self
    }

    /// Feed the child's standard input from a single buffer.
    pub fn stdin_bytes(self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin(ByteStream::from_bytes(bytes))
    }

    /// Release `resource` once the child has exited, whatever the outcome.
    pub fn release_on_exit(mut self, resource: Releasable) -> Self {
        self.release.push(resource);
        self
    }

    /// Maximum size of a single output chunk.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Number of trailing stderr bytes kept for the failure report.
    pub fn stderr_limit(mut self, limit: usize) -> Self {
        self.stderr_limit = limit;
        self
    }

    /// The command line.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Start the child process.
    pub fn spawn(self) -> Result<ProcessStream, StreamError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|source| StreamError::Spawn { command: self.command.clone(), source })?;

        let mut command = shell_command(&self.command);
        command
            .stdin(if self.input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // The child's pipes register with the reactor of the runtime that spawned it.
        let spawned = {
            let _guard = runtime.enter();
            command.spawn()
        };
        let mut child = spawned
            .map_err(|source| StreamError::Spawn { command: self.command.clone(), source })?;

        debug!(command = %self.command, pid = ?child.id(), "spawned process");

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        Ok(ProcessStream {
            command: self.command,
            runtime,
            child,
            stdin,
            stdout,
            stderr,
            input: self.input,
            pending: Vec::with_capacity(PIPE_BUF),
            out_buf: vec![0u8; self.chunk_size],
            err_buf: vec![0u8; STDERR_READ_SIZE],
            stderr_tail: TailBuffer::new(self.stderr_limit),
            release: self.release,
            done: false,
        })
    }

    /// Run the command and collect all of its output.
    pub fn run_to_end(self) -> Result<Vec<u8>, StreamError> {
        ByteStream::new(self.spawn()?).into_bytes()
    }
}

impl fmt::Debug for ProcessRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessRunner")
            .field("command", &self.command)
            .field("has_input", &self.input.is_some())
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

const STDERR_READ_SIZE: usize = 4096;

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

/// A running child process whose standard output is consumed chunk by chunk.
///
/// Iteration ends after the child exits. A non-zero exit is reported as a
/// final `Err(StreamError::Process(..))` item.
pub struct ProcessStream {
    command: String,
    runtime: Runtime,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    input: Option<ByteStream>,
    /// Input pulled from upstream but not yet accepted by the child
    pending: Vec<u8>,
    out_buf: Vec<u8>,
    err_buf: Vec<u8>,
    stderr_tail: TailBuffer,
    release: Vec<Releasable>,
    done: bool,
}

enum PipeEvent {
    Written(io::Result<usize>),
    Stdout(io::Result<usize>),
    Stderr(io::Result<usize>),
}

impl ProcessStream {
    /// The command line.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// OS process id, while the child is running.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Top up `pending` from upstream. Closes stdin once input is exhausted.
    fn fill_pending(&mut self) -> Result<(), StreamError> {
        if self.stdin.is_none() {
            return Ok(());
        }
        while self.pending.len() < PIPE_BUF {
            let Some(input) = self.input.as_mut() else {
                break;
            };
            match input.next() {
                Some(Ok(chunk)) => self.pending.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(e),
                None => self.input = None,
            }
        }
        if self.pending.is_empty() && self.input.is_none() {
            // Dropping the handle signals end of input to the child.
            self.stdin = None;
        }
        Ok(())
    }

    /// Wait for one pipe to become ready and perform a single operation on it.
    fn poll_pipes(&mut self) -> PipeEvent {
        let Self { runtime, stdin, stdout, stderr, pending, out_buf, err_buf, .. } = self;
        let write_len = pending.len().min(PIPE_BUF);
        runtime.block_on(async {
            tokio::select! {
                res = write_some(stdin.as_mut(), &pending[..write_len]) => PipeEvent::Written(res),
                res = read_some(stdout.as_mut(), out_buf) => PipeEvent::Stdout(res),
                res = read_some(stderr.as_mut(), err_buf) => PipeEvent::Stderr(res),
            }
        })
    }

    /// Reap the child once every pipe is closed.
    fn finish(&mut self) -> Result<(), StreamError> {
        self.done = true;
        let status = self.runtime.block_on(self.child.wait());
        self.release.clear();
        let status = status?;
        debug!(command = %self.command, ?status, "process exited");

        if status.success() {
            Ok(())
        } else {
            Err(StreamError::Process(ProcessFailure {
                command: self.command.clone(),
                exit_code: status.code(),
                stderr: self.stderr_tail.to_string_lossy(),
            }))
        }
    }

    /// Kill the child and release resources after an error.
    fn abort(&mut self, error: StreamError) -> StreamError {
        debug!(command = %self.command, %error, "aborting process");
        self.done = true;
        self.input = None;
        self.stdin = None;
        self.stdout = None;
        self.stderr = None;
        let _ = self.child.start_kill();
        let _ = self.runtime.block_on(self.child.wait());
        self.release.clear();
        error
    }
}

impl Iterator for ProcessStream {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.done {
            return None;
        }

        loop {
            if let Err(e) = self.fill_pending() {
                return Some(Err(self.abort(e)));
            }

            if self.stdin.is_none() && self.stdout.is_none() && self.stderr.is_none() {
                return self.finish().err().map(Err);
            }

            match self.poll_pipes() {
                PipeEvent::Written(Ok(0)) => {
                    let err = io::Error::new(io::ErrorKind::WriteZero, "child accepted no input");
                    return Some(Err(self.abort(err.into())));
                }
                PipeEvent::Written(Ok(n)) => {
                    self.pending.drain(..n);
                }
                PipeEvent::Written(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {
                    // The child stopped reading; its exit status decides the outcome.
                    debug!(command = %self.command, "child closed its input early");
                    self.stdin = None;
                    self.input = None;
                    self.pending.clear();
                }
                PipeEvent::Stdout(Ok(0)) => self.stdout = None,
                PipeEvent::Stdout(Ok(n)) => return Some(Ok(self.out_buf[..n].to_vec())),
                PipeEvent::Stderr(Ok(0)) => self.stderr = None,
                PipeEvent::Stderr(Ok(n)) => self.stderr_tail.push(&self.err_buf[..n]),
                PipeEvent::Written(Err(e)) | PipeEvent::Stdout(Err(e)) | PipeEvent::Stderr(Err(e)) => {
                    if e.kind() == io::ErrorKind::Interrupted {
                        continue;
                    }
                    return Some(Err(self.abort(e.into())));
                }
            }
        }
    }
}

impl Drop for ProcessStream {
    fn drop(&mut self) {
        if !self.done {
            debug!(command = %self.command, "process stream dropped before exit, killing child");
            self.stdin = None;
            let _ = self.child.start_kill();
            let _ = self.runtime.block_on(self.child.wait());
        }
    }
}

impl fmt::Debug for ProcessStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessStream")
            .field("command", &self.command)
            .field("pending", &self.pending.len())
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

async fn write_some(stdin: Option<&mut ChildStdin>, buf: &[u8]) -> io::Result<usize> {
    match stdin {
        Some(stdin) => stdin.write(buf).await,
        None => std::future::pending().await,
    }
}

async fn read_some<R: AsyncRead + Unpin>(reader: Option<&mut R>, buf: &mut [u8]) -> io::Result<usize> {
    match reader {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn chunked(parts: &[&str]) -> ByteStream {
        let owned: Vec<Chunk> = parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        ByteStream::new(owned.into_iter())
    }

    #[test]
    fn test_cat_echoes_input() {
        let output = ProcessRunner::new("cat").stdin_bytes("TEST1\nTEST2\n").run_to_end().unwrap();
        assert_eq!(output, b"TEST1\nTEST2\n");
    }

    #[test]
    fn test_piped_shell_command() {
        let output = ProcessRunner::new("cat | grep TEST1")
            .stdin_bytes("TEST1\nTEST2\nTEST1\n")
            .run_to_end()
            .unwrap();
        assert_eq!(String::from_utf8(output).unwrap(), "TEST1\nTEST1\n");
    }

    #[test]
    fn test_chunked_input_stream() {
        let output = ProcessRunner::new("cat")
            .stdin(chunked(&["TES", "T1\n", "", "TEST2\n"]))
            .run_to_end()
            .unwrap();
        assert_eq!(output, b"TEST1\nTEST2\n");
    }

    #[test]
    fn test_no_input_command() {
        let output = ProcessRunner::new("printf hello").run_to_end().unwrap();
        assert_eq!(output, b"hello");
    }

    #[test]
    fn test_non_zero_exit_reports_code_and_stderr() {
        let err = ProcessRunner::new("echo partial; echo oops >&2; exit 3")
            .run_to_end()
            .unwrap_err();
        let failure = err.process_failure().expect("should be a process failure");
        assert_eq!(failure.exit_code, Some(3));
        assert_eq!(failure.stderr.trim(), "oops");
        assert!(err.to_string().contains("exited with status 3"));
    }

    #[test]
    fn test_output_before_failure_is_yielded() {
        let mut stream = ProcessRunner::new("printf data; exit 1").spawn().unwrap();
        let mut output = Vec::new();
        let mut failed = false;
        for chunk in &mut stream {
            match chunk {
                Ok(bytes) => output.extend(bytes),
                Err(_) => failed = true,
            }
        }
        assert_eq!(output, b"data");
        assert!(failed);
        assert!(stream.next().is_none(), "stream should be fused after exit");
    }

    #[test]
    fn test_stderr_tail_is_bounded() {
        let err = ProcessRunner::new("yes err | head -n 5000 >&2; exit 1")
            .stderr_limit(64)
            .run_to_end()
            .unwrap_err();
        let failure = err.process_failure().unwrap();
        assert!(failure.stderr.len() <= 64);
        assert!(failure.stderr.ends_with("err\n"));
    }

    #[test]
    fn test_release_on_success() {
        let token = Arc::new(());
        let output = ProcessRunner::new("cat")
            .stdin_bytes("x")
            .release_on_exit(Box::new(Arc::clone(&token)))
            .run_to_end()
            .unwrap();
        assert_eq!(output, b"x");
        assert_eq!(Arc::strong_count(&token), 1);
    }

    #[test]
    fn test_release_on_failure() {
        let token = Arc::new(());
        let result = ProcessRunner::new("exit 2")
            .release_on_exit(Box::new(Arc::clone(&token)))
            .run_to_end();
        assert!(result.is_err());
        assert_eq!(Arc::strong_count(&token), 1);
    }

    #[test]
    fn test_release_on_early_drop() {
        let token = Arc::new(());
        let mut stream = ProcessRunner::new("yes")
            .release_on_exit(Box::new(Arc::clone(&token)))
            .spawn()
            .unwrap();
        assert!(stream.next().unwrap().is_ok());
        assert_eq!(Arc::strong_count(&token), 2);
        drop(stream);
        assert_eq!(Arc::strong_count(&token), 1);
    }

    #[test]
    fn test_upstream_error_aborts_child() {
        let input = ByteStream::new(
            vec![
                Ok(b"first\n".to_vec()),
                Err(StreamError::Transform { processor: "up".into(), message: "boom".into() }),
            ]
            .into_iter(),
        );
        let results: Vec<Chunk> = ProcessRunner::new("cat").stdin(input).spawn().unwrap().collect();
        let err = results.into_iter().find_map(|r| r.err()).expect("error should surface");
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_child_ignoring_input_still_succeeds() {
        let big = vec![b'a'; 1 << 20];
        let output = ProcessRunner::new("echo done").stdin_bytes(big).run_to_end().unwrap();
        assert_eq!(output, b"done\n");
    }

    #[test]
    fn test_spawn_missing_program_fails_with_exit_code() {
        let err = ProcessRunner::new("definitely-not-a-real-program-xyz")
            .run_to_end()
            .unwrap_err();
        assert_eq!(err.process_failure().and_then(|f| f.exit_code), Some(127));
    }

    #[test]
    fn test_chunk_size_limits_output_chunks() {
        let stream = ProcessRunner::new("cat").stdin_bytes("abcdefgh").chunk_size(3).spawn().unwrap();
        for chunk in stream {
            assert!(chunk.unwrap().len() <= 3);
        }
    }

    #[test]
    fn test_tail_buffer_keeps_last_bytes() {
        let mut tail = TailBuffer::new(4);
        tail.push(b"abc");
        tail.push(b"defg");
        assert_eq!(tail.to_string_lossy(), "defg");
    }
}
