pub mod mock;
pub mod process;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::expr::Expr;

pub use mock::{ScriptedConnector, ScriptedKernel, ScriptedReply};
pub use process::{ProcessConnector, ProcessKernel};

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("failed to launch kernel '{command}': {source}")]
    SpawnFailed {
        command: String,
        source: std::io::Error,
    },

    #[error("kernel I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed kernel packet: {detail}")]
    MalformedPacket { detail: String },

    #[error("kernel reported an error: {message}")]
    Remote { message: String },

    #[error("kernel did not answer within {seconds}s")]
    TimedOut { seconds: u64 },

    #[error("kernel connection closed")]
    ConnectionClosed,
}

/// Kernel packet kinds, named for logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketKind {
    Text,
    Message,
    Display,
    DisplayEnd,
    Return,
    ReturnText,
    ReturnExpression,
    Input,
    InputString,
    InputName,
    OutputName,
    Menu,
    Syntax,
    Suspend,
    Resume,
    BeginDialog,
    EndDialog,
    Call,
    Evaluate,
    Unknown(String),
}

impl PacketKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "text" => PacketKind::Text,
            "message" => PacketKind::Message,
            "display" => PacketKind::Display,
            "display_end" => PacketKind::DisplayEnd,
            "return" => PacketKind::Return,
            "return_text" => PacketKind::ReturnText,
            "return_expression" => PacketKind::ReturnExpression,
            "input" => PacketKind::Input,
            "input_string" => PacketKind::InputString,
            "input_name" => PacketKind::InputName,
            "output_name" => PacketKind::OutputName,
            "menu" => PacketKind::Menu,
            "syntax" => PacketKind::Syntax,
            "suspend" => PacketKind::Suspend,
            "resume" => PacketKind::Resume,
            "begin_dialog" => PacketKind::BeginDialog,
            "end_dialog" => PacketKind::EndDialog,
            "call" => PacketKind::Call,
            "evaluate" => PacketKind::Evaluate,
            other => PacketKind::Unknown(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            PacketKind::Text => "text",
            PacketKind::Message => "message",
            PacketKind::Display => "display",
            PacketKind::DisplayEnd => "display_end",
            PacketKind::Return => "return",
            PacketKind::ReturnText => "return_text",
            PacketKind::ReturnExpression => "return_expression",
            PacketKind::Input => "input",
            PacketKind::InputString => "input_string",
            PacketKind::InputName => "input_name",
            PacketKind::OutputName => "output_name",
            PacketKind::Menu => "menu",
            PacketKind::Syntax => "syntax",
            PacketKind::Suspend => "suspend",
            PacketKind::Resume => "resume",
            PacketKind::BeginDialog => "begin_dialog",
            PacketKind::EndDialog => "end_dialog",
            PacketKind::Call => "call",
            PacketKind::Evaluate => "evaluate",
            PacketKind::Unknown(name) => name,
        }
    }
}

/// Out-of-band packet delivered while an evaluation is in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Text(String),
    Message(String),
    /// Kernel chatter the transcript does not record.
    Other(PacketKind),
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Text(_) => PacketKind::Text,
            Packet::Message(_) => PacketKind::Message,
            Packet::Other(kind) => kind.clone(),
        }
    }
}

/// Sending half of a session's bounded notification queue.
#[derive(Debug, Clone)]
pub struct NotificationSender {
    tx: mpsc::Sender<Packet>,
}

impl NotificationSender {
    /// Create a queue holding at most `capacity` undrained packets.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Packet>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queue a packet, waiting for room when the queue is full.
    ///
    /// The session drains the queue while a request is in flight, so a full
    /// queue slows the transport down instead of losing packets.
    pub async fn deliver(&self, packet: Packet) {
        let kind = packet.kind();
        debug!(kind = kind.name(), "received kernel packet");
        if self.tx.send(packet).await.is_err() {
            debug!(kind = kind.name(), "notification queue closed, dropping packet");
        }
    }
}

/// Capability to evaluate expressions on a symbolic-computation kernel.
///
/// Text and message packets produced while a request is in flight are
/// delivered through the [`NotificationSender`] handed to the connector,
/// strictly before the request's direct answer is returned.
#[async_trait]
pub trait Kernel: Send {
    /// Evaluate `expression` and return its value.
    async fn evaluate(&mut self, expression: &str) -> Result<Expr, KernelError>;

    /// Render `expression` as image bytes. `None` when rendering failed.
    async fn evaluate_to_image(
        &mut self,
        expression: &str,
        width: u32,
        height: u32,
    ) -> Result<Option<Vec<u8>>, KernelError>;

    /// Discard the pending answer, e.g. the startup banner.
    async fn discard_answer(&mut self) -> Result<(), KernelError>;

    /// Acknowledge the end of the current request.
    async fn new_packet(&mut self) -> Result<(), KernelError>;

    async fn close(&mut self);
}

/// Establishes kernel links. Called on open and on every reconnect.
#[async_trait]
pub trait KernelConnector: Send + Sync {
    async fn connect(
        &self,
        notifications: NotificationSender,
    ) -> Result<Box<dyn Kernel>, KernelError>;
}
