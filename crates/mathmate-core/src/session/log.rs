use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::artifact::Artifact;
use crate::kernel::{Packet, PacketKind};

/// Ordered, append-only record of a session's artifacts.
///
/// `group` is the evaluation counter; it only advances between evaluations.
#[derive(Debug, Default)]
pub struct ArtifactLog {
    artifacts: Vec<Artifact>,
    group: u32,
}

impl ArtifactLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group(&self) -> u32 {
        self.group
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn push(&mut self, artifact: Artifact) {
        debug_assert_eq!(artifact.group(), self.group);
        debug!(group = self.group, kind = ?artifact.kind(), "appending artifact");
        self.artifacts.push(artifact);
    }

    /// Close the current group.
    pub fn advance(&mut self) {
        self.group += 1;
    }

    /// Append a notification to the current group. Chatter is logged and dropped.
    pub fn record(&mut self, packet: Packet) {
        match packet {
            Packet::Text(text) => self.push(Artifact::text(self.group, text)),
            Packet::Message(text) => self.push(Artifact::message(self.group, text)),
            Packet::Other(PacketKind::Unknown(name)) => {
                warn!(kind = %name, "dropping unrecognized kernel packet");
            }
            Packet::Other(kind) => debug!(kind = kind.name(), "ignoring kernel packet"),
        }
    }

    /// Append every queued notification, in arrival order, to the current group.
    pub fn absorb(&mut self, packets: &mut mpsc::Receiver<Packet>) {
        while let Ok(packet) = packets.try_recv() {
            self.record(packet);
        }
    }

    /// Remove every artifact, handing ownership to the caller.
    pub fn take_all(&mut self) -> Vec<Artifact> {
        std::mem::take(&mut self.artifacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::NotificationSender;

    #[tokio::test]
    async fn absorb_keeps_arrival_order_and_drops_chatter() {
        let (tx, mut rx) = NotificationSender::channel(8);
        tx.deliver(Packet::Message("Power::infy".into())).await;
        tx.deliver(Packet::Other(PacketKind::InputName)).await;
        tx.deliver(Packet::Text("Infinite expression encountered".into()))
            .await;
        tx.deliver(Packet::Other(PacketKind::Unknown("mystery".into())))
            .await;

        let mut log = ArtifactLog::new();
        log.absorb(&mut rx);

        let kinds: Vec<_> = log.artifacts().iter().map(|a| a.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                crate::artifact::ArtifactKind::Message,
                crate::artifact::ArtifactKind::Text
            ]
        );
    }

    #[test]
    fn advance_tags_later_artifacts() {
        let mut log = ArtifactLog::new();
        log.push(Artifact::input(log.group(), "a"));
        log.advance();
        log.push(Artifact::input(log.group(), "b"));
        let groups: Vec<_> = log.artifacts().iter().map(|a| a.group()).collect();
        assert_eq!(groups, vec![0, 1]);

        assert_eq!(log.take_all().len(), 2);
        assert!(log.is_empty());
        assert_eq!(log.group(), 1);
    }
}
