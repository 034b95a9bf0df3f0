//! Kernel reached through a child process speaking line-delimited JSON.
//!
//! Requests (one object per line on stdin):
//! ```text
//! {"op":"evaluate","expr":"1+1"}
//! {"op":"image","expr":"MathMate`lastOutput","width":0,"height":0}
//! {"op":"quit"}
//! ```
//! Replies (one object per line on stdout), keyed by `type`: `ready` ends the
//! startup banner; `text` and `message` carry notification text; `return`
//! carries the value as an [`Expr`]; `image` carries base64 `data` or null;
//! `error` carries a `message`. Any other type is forwarded as an ignored
//! notification.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use super::{Kernel, KernelConnector, KernelError, NotificationSender, Packet, PacketKind};
use crate::config::KernelConfig;
use crate::expr::Expr;

const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Launches a [`ProcessKernel`] per connection.
#[derive(Debug, Clone)]
pub struct ProcessConnector {
    program: String,
    args: Vec<String>,
}

impl ProcessConnector {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &KernelConfig) -> Self {
        Self::new(config.command.clone(), config.args.clone())
    }
}

#[async_trait]
impl KernelConnector for ProcessConnector {
    async fn connect(
        &self,
        notifications: NotificationSender,
    ) -> Result<Box<dyn Kernel>, KernelError> {
        let kernel = ProcessKernel::spawn(&self.program, &self.args, notifications)?;
        Ok(Box::new(kernel))
    }
}

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request<'a> {
    Evaluate {
        expr: &'a str,
    },
    Image {
        expr: &'a str,
        width: u32,
        height: u32,
    },
    Quit,
}

#[derive(Debug, PartialEq)]
enum Reply {
    Ready,
    Packet(Packet),
    Return(Expr),
    Image(Option<Vec<u8>>),
    Error(String),
}

fn malformed(detail: impl Into<String>) -> KernelError {
    KernelError::MalformedPacket {
        detail: detail.into(),
    }
}

fn text_field(value: &serde_json::Value, field: &str) -> Result<String, KernelError> {
    value
        .get(field)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| malformed(format!("missing string field '{field}'")))
}

/// Parse a single reply line.
fn parse_reply(line: &str) -> Result<Reply, KernelError> {
    let value: serde_json::Value =
        serde_json::from_str(line).map_err(|e| malformed(format!("{e}: {line}")))?;
    let kind = value
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| malformed(format!("reply without type: {line}")))?;

    let reply = match kind {
        "ready" => Reply::Ready,
        "text" => Reply::Packet(Packet::Text(text_field(&value, "text")?)),
        "message" => Reply::Packet(Packet::Message(text_field(&value, "text")?)),
        "return" => {
            let expr = value
                .get("expr")
                .cloned()
                .ok_or_else(|| malformed("return reply without expr"))?;
            Reply::Return(serde_json::from_value(expr).map_err(|e| malformed(e.to_string()))?)
        }
        "image" => match value.get("data").and_then(|v| v.as_str()) {
            Some(encoded) => Reply::Image(Some(
                base64::engine::general_purpose::STANDARD
                    .decode(encoded)
                    .map_err(|e| malformed(format!("image data: {e}")))?,
            )),
            None => Reply::Image(None),
        },
        "error" => Reply::Error(text_field(&value, "message")?),
        other => Reply::Packet(Packet::Other(PacketKind::from_name(other))),
    };
    Ok(reply)
}

pub struct ProcessKernel {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    notifications: NotificationSender,
}

impl ProcessKernel {
    pub fn spawn(
        program: &str,
        args: &[String],
        notifications: NotificationSender,
    ) -> Result<Self, KernelError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| KernelError::SpawnFailed {
                command: program.to_string(),
                source: e,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| KernelError::Io(std::io::Error::other("stdin not captured")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| KernelError::Io(std::io::Error::other("stdout not captured")))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(line = %line, "kernel stderr");
                }
            });
        }

        info!(program, pid = child.id().unwrap_or(0), "kernel process started");
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            notifications,
        })
    }

    async fn send(&mut self, request: &Request<'_>) -> Result<(), KernelError> {
        let mut line =
            serde_json::to_string(request).map_err(|e| KernelError::Io(std::io::Error::other(e)))?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Read replies, forwarding notifications, until a terminal reply arrives.
    async fn next_answer(&mut self) -> Result<Reply, KernelError> {
        loop {
            let Some(line) = self.stdout.next_line().await? else {
                return Err(KernelError::ConnectionClosed);
            };
            if line.trim().is_empty() {
                continue;
            }
            match parse_reply(&line)? {
                Reply::Packet(packet) => self.notifications.deliver(packet).await,
                answer => return Ok(answer),
            }
        }
    }
}

#[async_trait]
impl Kernel for ProcessKernel {
    async fn evaluate(&mut self, expression: &str) -> Result<Expr, KernelError> {
        self.send(&Request::Evaluate { expr: expression }).await?;
        loop {
            match self.next_answer().await? {
                Reply::Return(expr) => return Ok(expr),
                Reply::Error(message) => return Err(KernelError::Remote { message }),
                Reply::Ready => debug!("ignoring late ready reply"),
                other => return Err(malformed(format!("unexpected reply {other:?}"))),
            }
        }
    }

    async fn evaluate_to_image(
        &mut self,
        expression: &str,
        width: u32,
        height: u32,
    ) -> Result<Option<Vec<u8>>, KernelError> {
        self.send(&Request::Image {
            expr: expression,
            width,
            height,
        })
        .await?;
        loop {
            match self.next_answer().await? {
                Reply::Image(data) => return Ok(data),
                Reply::Error(message) => {
                    warn!(%message, "kernel failed to render image");
                    return Ok(None);
                }
                Reply::Ready => debug!("ignoring late ready reply"),
                other => return Err(malformed(format!("unexpected reply {other:?}"))),
            }
        }
    }

    async fn discard_answer(&mut self) -> Result<(), KernelError> {
        loop {
            let Some(line) = self.stdout.next_line().await? else {
                return Err(KernelError::ConnectionClosed);
            };
            if line.trim().is_empty() {
                continue;
            }
            match parse_reply(&line)? {
                Reply::Ready | Reply::Return(_) => return Ok(()),
                discarded => debug!(?discarded, "discarding banner reply"),
            }
        }
    }

    async fn new_packet(&mut self) -> Result<(), KernelError> {
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.send(&Request::Quit).await {
            debug!(error = %e, "kernel did not accept quit request");
        }
        match tokio::time::timeout(CLOSE_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => debug!(?status, "kernel process exited"),
            _ => {
                warn!("kernel process did not exit, killing");
                let _ = self.child.kill().await;
            }
        }
    }
}
