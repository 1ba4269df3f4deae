//! Remote execution inside a node agent's container.

use std::{future::Future, io, process::Stdio};

use log::{debug, warn};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, Command},
};
use tokio_util::sync::CancellationToken;

use super::output::OutputSink;
use crate::error::{Result, RollerError};

/// A command to run inside an agent's control container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub namespace: String,
    /// Agent instance to exec into
    pub agent: String,
    /// Node the agent runs on, used to label output
    pub node: String,
    pub container: String,
    pub command: Vec<String>,
    pub tty: bool,
}

/// An exec channel into node agents.
///
/// Implementations stream every stdout and stderr line to `sink` while the
/// command runs. A non-zero exit, a failure to open the channel or a broken
/// stream is reported as `RollerError::ExecutionFailure`; firing `cancel`
/// stops the command and yields `RollerError::Cancelled`.
pub trait AgentExec: Send + Sync {
    fn exec(
        &self,
        request: &ExecRequest,
        sink: &mut dyn OutputSink,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Exec channel backed by a `kubectl`-compatible binary:
/// `PROGRAM exec -n NS AGENT -c CONTAINER [-t] -- COMMAND...`.
#[derive(Debug, Clone)]
pub struct KubectlExec {
    program: String,
}

impl KubectlExec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Arguments passed to the program for `request`.
    pub fn args(&self, request: &ExecRequest) -> Vec<String> {
        let mut args = vec![
            "exec".to_string(),
            "-n".to_string(),
            request.namespace.clone(),
            request.agent.clone(),
            "-c".to_string(),
            request.container.clone(),
        ];
        if request.tty {
            args.push("-t".to_string());
        }
        args.push("--".to_string());
        args.extend(request.command.iter().cloned());
        args
    }

    fn failure(request: &ExecRequest, reason: impl Into<String>) -> RollerError {
        RollerError::ExecutionFailure {
            node: request.node.clone(),
            reason: reason.into(),
        }
    }

    async fn kill(child: &mut Child, request: &ExecRequest) {
        if let Err(e) = child.kill().await {
            warn!("Failed to stop exec into {}: {e}", request.agent);
        }
    }
}

impl Default for KubectlExec {
    fn default() -> Self {
        Self::new("kubectl")
    }
}

impl AgentExec for KubectlExec {
    async fn exec(
        &self,
        request: &ExecRequest,
        sink: &mut dyn OutputSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let args = self.args(request);
        debug!("Running {} {}", self.program, args.join(" "));

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Self::failure(request, format!("failed to start {}: {e}", self.program)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Self::failure(request, "stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Self::failure(request, "stderr was not captured"))?;
        let mut stdout = LossyLines::new(stdout);
        let mut stderr = LossyLines::new(stderr);
        let (mut stdout_open, mut stderr_open) = (true, true);

        while stdout_open || stderr_open {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    Self::kill(&mut child, request).await;
                    return Err(RollerError::Cancelled);
                }
                line = stdout.next_line(), if stdout_open => match line {
                    Ok(Some(line)) => sink.write_line(&request.node, &line),
                    Ok(None) => stdout_open = false,
                    Err(e) => {
                        Self::kill(&mut child, request).await;
                        return Err(Self::failure(request, format!("output stream broke: {e}")));
                    }
                },
                line = stderr.next_line(), if stderr_open => match line {
                    Ok(Some(line)) => sink.write_line(&request.node, &line),
                    Ok(None) => stderr_open = false,
                    Err(e) => {
                        Self::kill(&mut child, request).await;
                        return Err(Self::failure(request, format!("error stream broke: {e}")));
                    }
                },
            }
        }

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                Self::kill(&mut child, request).await;
                return Err(RollerError::Cancelled);
            }
            status = child.wait() => status
                .map_err(|e| Self::failure(request, format!("failed to wait for command: {e}")))?,
        };

        if status.success() {
            Ok(())
        } else {
            Err(Self::failure(request, format!("agent command exited with {status}")))
        }
    }
}

/// Splits a byte stream into lines. Bytes that are not valid UTF-8 are
/// replaced rather than treated as a broken stream.
struct LossyLines<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LossyLines<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    /// Next line without its terminator, `None` at end of stream.
    ///
    /// Cancel safe: a partially read line stays in the buffer for the next
    /// call.
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        let read = self.reader.read_until(b'\n', &mut self.buf).await?;
        if read == 0 && self.buf.is_empty() {
            return Ok(None);
        }
        let line = String::from_utf8_lossy(&self.buf)
            .trim_end_matches(['\n', '\r'])
            .to_string();
        self.buf.clear();
        Ok(Some(line))
    }
}
