use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command as TokioCommand};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};

/// Failure reported by a line callback. Never aborts the run.
pub type LineError = Box<dyn std::error::Error + Send + Sync>;

/// Captured result of a successful run.
#[derive(Debug, Clone)]
pub struct Output {
    pub status: ExitStatus,
    /// Empty for streamed runs, where stdout went to the line callback.
    pub stdout: String,
    pub stderr: String,
}

/// An external program invocation.
///
/// The working directory is set per invocation and the child is killed when the
/// run is cancelled, times out, or the run future is dropped.
#[derive(Debug)]
pub struct Command {
    inner: TokioCommand,
    program: String,
    timeout: Option<Duration>,
}

impl Command {
    pub fn new(program: impl Into<String>) -> Self {
        let program = program.into();
        let mut inner = TokioCommand::new(&program);
        inner
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Self {
            inner,
            program,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.inner.arg(arg);
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.inner.args(args);
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.inner.current_dir(dir);
        self
    }

    pub fn env<K, V>(mut self, key: K, val: V) -> Self
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.inner.env(key, val);
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> Vec<String> {
        self.inner
            .as_std()
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    pub fn get_current_dir(&self) -> Option<&Path> {
        self.inner.as_std().get_current_dir()
    }

    fn spawn(&mut self) -> Result<Child> {
        debug!(
            cmd = %self.program,
            args = ?self.get_args(),
            cwd = ?self.get_current_dir(),
            "spawning external tool"
        );
        self.inner.spawn().map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => Error::NotFound {
                cmd: self.program.clone(),
            },
            _ => Error::Spawn {
                cmd: self.program.clone(),
                source,
            },
        })
    }

    /// Run to completion, buffering stdout and stderr.
    pub async fn output(mut self, cancel: &CancellationToken) -> Result<Output> {
        let child = self.spawn()?;
        let timeout = self.timeout;
        let program = self.program;

        let output = tokio::select! {
            output = child.wait_with_output() => output?,
            _ = cancel.cancelled() => {
                debug!(cmd = %program, "cancelled, child killed");
                return Err(Error::Cancelled { cmd: program });
            }
            elapsed = deadline(timeout) => {
                debug!(cmd = %program, "deadline reached, child killed");
                return Err(Error::TimedOut { cmd: program, timeout: elapsed });
            }
        };

        finish(
            program,
            output.status,
            lossy(&output.stdout),
            lossy(&output.stderr),
        )
    }

    /// Run to completion, feeding each stdout line to `on_line` while stderr is
    /// buffered. Callback failures are logged and skipped.
    pub async fn stream_lines<F>(mut self, cancel: &CancellationToken, mut on_line: F) -> Result<Output>
    where
        F: FnMut(&str) -> std::result::Result<(), LineError>,
    {
        let mut child = self.spawn()?;
        let timeout = self.timeout;
        let program = self.program;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("stderr was not captured"))?;

        let run = async {
            let (pumped, stderr) =
                tokio::join!(pump_lines(stdout, &program, &mut on_line), read_all(stderr));
            pumped?;
            let status = child.wait().await?;
            Ok::<_, Error>((status, stderr?))
        };

        let (status, stderr) = tokio::select! {
            res = run => res?,
            _ = cancel.cancelled() => {
                debug!(cmd = %program, "cancelled, child killed");
                return Err(Error::Cancelled { cmd: program.clone() });
            }
            elapsed = deadline(timeout) => {
                debug!(cmd = %program, "deadline reached, child killed");
                return Err(Error::TimedOut { cmd: program.clone(), timeout: elapsed });
            }
        };

        finish(program, status, String::new(), stderr)
    }
}

fn finish(cmd: String, status: ExitStatus, stdout: String, stderr: String) -> Result<Output> {
    if status.success() {
        Ok(Output {
            status,
            stdout,
            stderr,
        })
    } else {
        Err(Error::Failed {
            cmd,
            status,
            stderr: stderr.trim().to_string(),
        })
    }
}

async fn deadline(timeout: Option<Duration>) -> Duration {
    match timeout {
        Some(timeout) => {
            tokio::time::sleep(timeout).await;
            timeout
        }
        None => std::future::pending().await,
    }
}

// Lines are split on raw bytes so non UTF-8 file names do not end the stream.
async fn pump_lines<R, F>(reader: R, program: &str, on_line: &mut F) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    F: FnMut(&str) -> std::result::Result<(), LineError>,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']);
        if let Err(err) = on_line(line) {
            debug!(cmd = program, line, error = %err, "skipping output line");
        }
    }
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> io::Result<String> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(lossy(&buf))
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_command_new() {
        let cmd = Command::new("echo");
        assert_eq!(cmd.program(), "echo");
    }

    #[test]
    fn test_command_args() {
        let cmd = Command::new("echo").arg("hello").args(["a", "b"]);
        assert_eq!(cmd.get_args(), vec!["hello", "a", "b"]);
    }

    #[test]
    fn test_command_current_dir() {
        let cmd = Command::new("pwd").current_dir("/tmp");
        assert_eq!(cmd.get_current_dir(), Some(Path::new("/tmp")));
    }

    #[tokio::test]
    async fn test_output_captures_stdout() {
        let out = Command::new("echo")
            .arg("hello")
            .output(&CancellationToken::new())
            .await
            .unwrap();
        assert!(out.status.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_output_failure_keeps_stderr() {
        let err = Command::new("sh")
            .args(["-c", "echo oops >&2; exit 3"])
            .output(&CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            Error::Failed { status, stderr, .. } => {
                assert_eq!(status.code(), Some(3));
                assert_eq!(stderr, "oops");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = Command::new("duopane_nonexistent_binary_12345")
            .output(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_current_dir_is_per_invocation() {
        let dir = tempfile::tempdir().unwrap();
        let before = std::env::current_dir().unwrap();
        let out = Command::new("pwd")
            .current_dir(dir.path())
            .output(&CancellationToken::new())
            .await
            .unwrap();
        let reported = std::fs::canonicalize(out.stdout.trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
        assert_eq!(std::env::current_dir().unwrap(), before);
    }

    #[tokio::test]
    async fn test_stream_lines_in_order() {
        let mut lines = Vec::new();
        let out = Command::new("sh")
            .args(["-c", "printf 'one\\ntwo\\nthree\\n'; echo warn >&2"])
            .stream_lines(&CancellationToken::new(), |line| {
                lines.push(line.to_string());
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(lines, vec!["one", "two", "three"]);
        assert!(out.stdout.is_empty());
        assert_eq!(out.stderr.trim(), "warn");
    }

    #[tokio::test]
    async fn test_stream_callback_failure_is_swallowed() {
        let mut seen = 0;
        let out = Command::new("sh")
            .args(["-c", "printf 'bad\\ngood\\n'"])
            .stream_lines(&CancellationToken::new(), |line| {
                seen += 1;
                if line == "bad" {
                    return Err("malformed".into());
                }
                Ok(())
            })
            .await;
        assert!(out.is_ok());
        assert_eq!(seen, 2);
    }

    #[tokio::test]
    async fn test_cancel_kills_process() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = Command::new("sleep")
            .arg("30")
            .output(&cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_cancel_streamed_run() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = Command::new("sleep")
            .arg("30")
            .stream_lines(&cancel, |_| Ok(()))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let err = Command::new("sleep")
            .arg("30")
            .timeout(Some(Duration::from_millis(50)))
            .output(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TimedOut { .. }));
        assert!(err.is_cancelled());
    }
}
