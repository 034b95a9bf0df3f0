//! In-memory kernel with scripted replies, for tests and embedders without
//! a real kernel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::{Kernel, KernelConnector, KernelError, NotificationSender, Packet};
use crate::expr::Expr;

/// Scripted answer for one expression.
#[derive(Debug, Clone, Default)]
pub struct ScriptedReply {
    /// Delivered as notifications before the answer.
    pub packets: Vec<Packet>,
    pub value: Option<Expr>,
    pub error: Option<String>,
    pub image: Option<Vec<u8>>,
    pub delay: Option<Duration>,
}

impl ScriptedReply {
    pub fn value(expr: Expr) -> Self {
        Self {
            value: Some(expr),
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_packet(mut self, packet: Packet) -> Self {
        self.packets.push(packet);
        self
    }

    pub fn with_image(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.image = Some(data.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Observable counters shared by a connector and every kernel it creates.
#[derive(Debug, Default, Clone)]
pub struct ScriptStats {
    pub connects: usize,
    pub closes: usize,
    pub banners_discarded: usize,
    pub acknowledgements: usize,
    /// Every request in arrival order; image requests are prefixed `image:`.
    pub requests: Vec<String>,
}

#[derive(Debug, Default)]
struct Shared {
    stats: ScriptStats,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Connector producing [`ScriptedKernel`]s that share one script.
#[derive(Debug, Clone, Default)]
pub struct ScriptedConnector {
    script: Arc<HashMap<String, ScriptedReply>>,
    banner: Vec<Packet>,
    unreachable: bool,
    shared: Arc<Mutex<Shared>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A connector whose every connection attempt fails.
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    pub fn reply(mut self, expression: impl Into<String>, reply: ScriptedReply) -> Self {
        Arc::make_mut(&mut self.script).insert(expression.into(), reply);
        self
    }

    /// Packets the kernel emits on startup, before its first answer.
    pub fn with_banner(mut self, packets: Vec<Packet>) -> Self {
        self.banner = packets;
        self
    }

    pub fn stats(&self) -> ScriptStats {
        lock(&self.shared).stats.clone()
    }
}

#[async_trait]
impl KernelConnector for ScriptedConnector {
    async fn connect(
        &self,
        notifications: NotificationSender,
    ) -> Result<Box<dyn Kernel>, KernelError> {
        if self.unreachable {
            return Err(KernelError::ConnectionClosed);
        }
        lock(&self.shared).stats.connects += 1;
        Ok(Box::new(ScriptedKernel {
            script: Arc::clone(&self.script),
            banner: self.banner.clone(),
            bindings: HashMap::new(),
            notifications,
            shared: Arc::clone(&self.shared),
        }))
    }
}

/// Kernel answering from a fixed script.
///
/// Assignments of the form `symbol = expr` are understood: the reply scripted
/// for `expr` is bound to `symbol`, so a later image request for `symbol`
/// returns that reply's image. Unscripted expressions evaluate to themselves
/// as a symbol.
pub struct ScriptedKernel {
    script: Arc<HashMap<String, ScriptedReply>>,
    banner: Vec<Packet>,
    bindings: HashMap<String, ScriptedReply>,
    notifications: NotificationSender,
    shared: Arc<Mutex<Shared>>,
}

impl ScriptedKernel {
    fn lookup(&self, expression: &str) -> Option<&ScriptedReply> {
        self.bindings
            .get(expression)
            .or_else(|| self.script.get(expression))
    }
}

fn split_assignment(request: &str) -> (Option<&str>, &str) {
    match request.split_once(" = ") {
        Some((target, expr)) if !target.trim().is_empty() => (Some(target.trim()), expr.trim()),
        _ => (None, request.trim()),
    }
}

#[async_trait]
impl Kernel for ScriptedKernel {
    async fn evaluate(&mut self, expression: &str) -> Result<Expr, KernelError> {
        lock(&self.shared).stats.requests.push(expression.to_string());

        // A banner nobody discarded arrives ahead of the first answer.
        for packet in std::mem::take(&mut self.banner) {
            self.notifications.deliver(packet).await;
        }

        let (target, expr) = split_assignment(expression);
        let reply = self
            .lookup(expr)
            .cloned()
            .unwrap_or_else(|| ScriptedReply::value(Expr::symbol(expr)));

        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }
        for packet in &reply.packets {
            self.notifications.deliver(packet.clone()).await;
        }
        if let Some(message) = &reply.error {
            return Err(KernelError::Remote {
                message: message.clone(),
            });
        }

        let value = reply
            .value
            .clone()
            .unwrap_or_else(|| Expr::symbol("Null"));
        if let Some(target) = target {
            self.bindings.insert(target.to_string(), reply);
        }
        Ok(value)
    }

    async fn evaluate_to_image(
        &mut self,
        expression: &str,
        _width: u32,
        _height: u32,
    ) -> Result<Option<Vec<u8>>, KernelError> {
        lock(&self.shared)
            .stats
            .requests
            .push(format!("image:{expression}"));
        Ok(self
            .lookup(expression.trim())
            .and_then(|reply| reply.image.clone()))
    }

    async fn discard_answer(&mut self) -> Result<(), KernelError> {
        self.banner.clear();
        lock(&self.shared).stats.banners_discarded += 1;
        Ok(())
    }

    async fn new_packet(&mut self) -> Result<(), KernelError> {
        lock(&self.shared).stats.acknowledgements += 1;
        Ok(())
    }

    async fn close(&mut self) {
        lock(&self.shared).stats.closes += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn assignment_binds_reply_for_image_requests() {
        let connector = ScriptedConnector::new().reply(
            "Plot[x, {x, 0, 1}]",
            ScriptedReply::value(Expr::normal("Graphics", vec![])).with_image(b"gif".to_vec()),
        );
        let (tx, _rx) = NotificationSender::channel(8);
        let mut kernel = connector.connect(tx).await.unwrap();

        let value = kernel.evaluate("last = Plot[x, {x, 0, 1}]").await.unwrap();
        assert_eq!(value.head_name(), "Graphics");
        let image = kernel.evaluate_to_image("last", 0, 0).await.unwrap();
        assert_eq!(image.as_deref(), Some(&b"gif"[..]));

        let stats = connector.stats();
        assert_eq!(stats.connects, 1);
        assert_eq!(
            stats.requests,
            vec!["last = Plot[x, {x, 0, 1}]", "image:last"]
        );
    }

    #[tokio::test]
    async fn packets_are_delivered_before_answer() {
        let connector = ScriptedConnector::new().reply(
            "Print[1]",
            ScriptedReply::value(Expr::symbol("Null")).with_packet(Packet::Text("1".into())),
        );
        let (tx, mut rx) = NotificationSender::channel(8);
        let mut kernel = connector.connect(tx).await.unwrap();

        kernel.evaluate("Print[1]").await.unwrap();
        assert_eq!(rx.try_recv().unwrap(), Packet::Text("1".into()));
    }

    #[tokio::test]
    async fn unscripted_expressions_echo() {
        let connector = ScriptedConnector::new();
        let (tx, _rx) = NotificationSender::channel(8);
        let mut kernel = connector.connect(tx).await.unwrap();
        assert_eq!(kernel.evaluate("x").await.unwrap(), Expr::symbol("x"));
    }

    #[tokio::test]
    async fn unreachable_connector_fails() {
        let (tx, _rx) = NotificationSender::channel(8);
        assert!(ScriptedConnector::unreachable().connect(tx).await.is_err());
    }
}
