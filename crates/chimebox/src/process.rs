//! Running the external player and transcoder.
//!
//! Both tools are driven the same way: optional bytes on stdin, stdout
//! collected, every stderr line logged at debug and kept for inspection.

use bytes::Bytes;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    /// Diagnostic lines, lossily decoded.
    pub stderr: Vec<String>,
}

/// Run `program` to completion, killing it if `limit` elapses first.
///
/// A timeout surfaces as [`io::ErrorKind::TimedOut`]. A child that exits
/// before consuming all of `input` is not an error; its exit status decides.
pub async fn run(
    program: &str,
    args: &[String],
    input: Option<Bytes>,
    limit: Duration,
) -> io::Result<ProcessOutput> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let name = program.to_string();

    let feed = async move {
        if let (Some(mut stdin), Some(input)) = (stdin, input) {
            match stdin.write_all(&input).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    tracing::debug!(program = %name, "stdin closed early");
                }
                Err(e) => return Err(e),
            }
            // stdin dropped here so the child sees EOF
        }
        Ok::<_, io::Error>(())
    };

    let collect = async move {
        let mut buf = Vec::new();
        if let Some(mut stdout) = stdout {
            stdout.read_to_end(&mut buf).await?;
        }
        Ok::<_, io::Error>(buf)
    };

    let label = program.to_string();
    let diagnostics = async move {
        let mut lines = Vec::new();
        if let Some(stderr) = stderr {
            let mut segments = BufReader::new(stderr).split(b'\n');
            while let Some(segment) = segments.next_segment().await? {
                let line = String::from_utf8_lossy(&segment).trim_end().to_string();
                if line.is_empty() {
                    continue;
                }
                tracing::debug!(program = %label, "{line}");
                lines.push(line);
            }
        }
        Ok::<_, io::Error>(lines)
    };

    let completion = async {
        let (fed, stdout, stderr) = tokio::join!(feed, collect, diagnostics);
        fed?;
        let status = child.wait().await?;
        Ok(ProcessOutput {
            status,
            stdout: stdout?,
            stderr: stderr?,
        })
    };

    let outcome = tokio::time::timeout(limit, completion).await;
    match outcome {
        Ok(result) => result,
        Err(_) => {
            if let Err(e) = child.start_kill() {
                tracing::warn!(program, error = %e, "failed to kill timed out process");
            }
            Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("{program} did not finish within {}s", limit.as_secs()),
            ))
        }
    }
}
