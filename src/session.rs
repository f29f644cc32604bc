//! Client sessions
//!
//! One [`Session`] per client connection. It carries connection state,
//! the identity used in protection logs, the fire-and-forget outbound
//! packet channel, and the per-connection [`FloodProtectors`] bundle.
//!
//! The socket itself lives in the (out-of-scope) listener loop; this type
//! is what packet handlers and governors see.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::config::FloodConfig;
use crate::core::GameClock;
use crate::network::flood::{FloodAction, FloodProtectors};
use crate::network::punish::PunishmentSink;

/// Connection lifecycle, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket accepted, nothing proven yet.
    Connected,
    /// Account credentials accepted.
    Authenticated,
    /// Character selected, world entry in progress.
    Entering,
    /// Playing.
    InGame,
}

/// One client connection.
pub struct Session {
    id: u32,
    ip: IpAddr,
    state: Mutex<ConnectionState>,
    account: Mutex<Option<String>>,
    /// Character name and object id once in game.
    character: Mutex<Option<(String, u32)>>,
    gm: AtomicBool,
    closed: AtomicBool,
    outbound: UnboundedSender<Bytes>,
    /// Per-connection governor bundle; dies with the session.
    pub flood: FloodProtectors,
}

impl Session {
    /// Create a session and the receiver the socket writer drains.
    pub fn new(
        id: u32,
        ip: IpAddr,
        config: &FloodConfig,
        clock: &Arc<GameClock>,
        punishments: &PunishmentSink,
    ) -> (Arc<Self>, UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            id,
            ip,
            state: Mutex::new(ConnectionState::Connected),
            account: Mutex::new(None),
            character: Mutex::new(None),
            gm: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            outbound: tx,
            flood: FloodProtectors::new(config, clock, punishments),
        });
        (session, rx)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    pub fn is_gm(&self) -> bool {
        self.gm.load(Ordering::Acquire)
    }

    pub fn set_gm(&self, gm: bool) {
        self.gm.store(gm, Ordering::Release);
    }

    pub fn account(&self) -> Option<String> {
        self.account.lock().unwrap().clone()
    }

    /// Mark the account as authenticated.
    pub fn set_account(&self, account: &str) {
        *self.account.lock().unwrap() = Some(account.to_string());
        let mut state = self.state.lock().unwrap();
        if *state == ConnectionState::Connected {
            *state = ConnectionState::Authenticated;
        }
    }

    pub fn character(&self) -> Option<(String, u32)> {
        self.character.lock().unwrap().clone()
    }

    /// World entry completed for the named character.
    pub fn enter_game(&self, name: &str, char_id: u32) {
        *self.character.lock().unwrap() = Some((name.to_string(), char_id));
        *self.state.lock().unwrap() = ConnectionState::InGame;
    }

    pub fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = state;
    }

    /// Logging identity: character if in game, account if authenticated,
    /// bare IP otherwise.
    pub fn identity(&self) -> String {
        if let Some((name, id)) = self.character() {
            return format!("{}({}) ip={}", name, id, self.ip);
        }
        if let Some(account) = self.account() {
            return format!("account={} ip={}", account, self.ip);
        }
        format!("ip={}", self.ip)
    }

    /// Fire-and-forget packet send. Failures are logged, never retried.
    pub fn send(&self, packet: Bytes) {
        if self.closed.load(Ordering::Acquire) {
            tracing::debug!("[session] [send_after_close] session={}", self.id);
            return;
        }
        if self.outbound.send(packet).is_err() {
            tracing::warn!("[session] [send_failed] session={} who={}", self.id, self.identity());
        }
    }

    /// Disconnect. Idempotent; the writer side observes the dropped channel.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::info!("[session] [closed] session={} who={}", self.id, self.identity());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Convenience forwarder; see [`FloodProtectors::can_perform`].
    pub fn can_perform(&self, action: FloodAction) -> bool {
        self.flood.can_perform(action, self)
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::bare_session;
    use super::*;

    #[test]
    fn test_identity_progression() {
        let (session, _rx) = bare_session(1);
        assert_eq!(session.identity(), "ip=127.0.0.1");
        assert_eq!(session.state(), ConnectionState::Connected);

        session.set_account("steve");
        assert_eq!(session.identity(), "account=steve ip=127.0.0.1");
        assert_eq!(session.state(), ConnectionState::Authenticated);

        session.enter_game("Chara", 99);
        assert_eq!(session.identity(), "Chara(99) ip=127.0.0.1");
        assert_eq!(session.state(), ConnectionState::InGame);
    }

    #[test]
    fn test_send_delivers_frames() {
        let (session, mut rx) = bare_session(2);
        session.send(Bytes::from_static(&[0xAA, 0x01]));

        let frame = rx.try_recv().unwrap();
        assert_eq!(&frame[..], &[0xAA, 0x01]);
    }

    #[test]
    fn test_send_after_close_is_dropped() {
        let (session, mut rx) = bare_session(3);
        session.close();
        assert!(session.is_closed());

        session.send(Bytes::from_static(&[0x01]));
        assert!(rx.try_recv().is_err());

        // close is idempotent
        session.close();
        assert!(session.is_closed());
    }
}
