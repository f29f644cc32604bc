//! Punishment sink
//!
//! Governors and exploit checks only *enqueue* punishments; a separate
//! consumer (persistence, ban tables) enforces them. Kicks are the one
//! exception and are applied directly by closing the session.
//!
//! The sink is a plain unbounded channel: enqueueing must never block a
//! packet handler, and a dead consumer must never wedge a governor.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Who a punishment applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PunishTarget {
    /// Whole account, by account name.
    Account(String),
    /// Single character.
    Character { id: u32, name: String },
    /// Hardware id (HWID bans).
    Hardware(String),
}

/// Enforced punishment kind. Kick is immediate and never enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PunishKind {
    Ban,
    Jail,
}

/// One queued punishment.
#[derive(Debug, Clone)]
pub struct PunishmentOrder {
    pub target: PunishTarget,
    pub kind: PunishKind,
    /// `None` means permanent.
    pub expires_at: Option<DateTime<Utc>>,
    pub reason: String,
    /// Subsystem that raised the order, e.g. `flood:transaction`.
    pub source: String,
}

/// Expiry stamp for a duration in seconds; zero or negative is permanent.
pub fn expiry_from_seconds(seconds: i64) -> Option<DateTime<Utc>> {
    if seconds <= 0 {
        None
    } else {
        Some(Utc::now() + chrono::Duration::seconds(seconds))
    }
}

/// Cloneable enqueue handle handed to every governor.
#[derive(Clone)]
pub struct PunishmentSink {
    tx: UnboundedSender<PunishmentOrder>,
}

impl PunishmentSink {
    /// Create a sink and the receiver its consumer drains.
    pub fn channel() -> (Self, UnboundedReceiver<PunishmentOrder>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueue an order. Returns false (after logging) if the consumer is
    /// gone; callers treat that the same as success.
    pub fn enqueue(&self, order: PunishmentOrder) -> bool {
        tracing::info!(
            "[punish] [enqueue] target={:?} kind={:?} expires={:?} source={}",
            order.target,
            order.kind,
            order.expires_at,
            order.source,
        );
        if self.tx.send(order).is_err() {
            tracing::error!("[punish] [dropped] consumer is gone");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_permanent_for_nonpositive() {
        assert_eq!(expiry_from_seconds(0), None);
        assert_eq!(expiry_from_seconds(-60), None);
    }

    #[test]
    fn test_expiry_in_the_future() {
        let expiry = expiry_from_seconds(3600).unwrap();
        assert!(expiry > Utc::now());
    }

    #[tokio::test]
    async fn test_enqueue_delivers_order() {
        let (sink, mut rx) = PunishmentSink::channel();
        assert!(sink.enqueue(PunishmentOrder {
            target: PunishTarget::Account("bob".into()),
            kind: PunishKind::Ban,
            expires_at: None,
            reason: "flooding".into(),
            source: "flood:transaction".into(),
        }));

        let order = rx.recv().await.unwrap();
        assert_eq!(order.target, PunishTarget::Account("bob".into()));
        assert_eq!(order.kind, PunishKind::Ban);
    }

    #[tokio::test]
    async fn test_enqueue_survives_closed_receiver() {
        let (sink, rx) = PunishmentSink::channel();
        drop(rx);
        assert!(!sink.enqueue(PunishmentOrder {
            target: PunishTarget::Hardware("hwid".into()),
            kind: PunishKind::Jail,
            expires_at: expiry_from_seconds(60),
            reason: "test".into(),
            source: "test".into(),
        }));
    }
}
