//! Players and the world registry
//!
//! A [`Player`] ties a session to an inventory and the per-player request
//! slots. The [`World`] registry resolves partner ids for two-party flows
//! and owns the disconnect path, which must detach every live request so
//! no partner is left with a dangling half of a flow.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::core::GameClock;
use crate::game::item::Inventory;
use crate::game::request::{RequestPayload, RequestSlots};
use crate::game::{invite, trade};
use crate::session::Session;

/// An in-game character bound to a live session.
pub struct Player {
    id: u32,
    name: String,
    pub session: Arc<Session>,
    pub inventory: Inventory,
    pub requests: RequestSlots,
    /// Private store / manufacture mode blocks transactional flows.
    private_store: AtomicBool,
    party: Mutex<Option<u32>>,
    pledge: Mutex<Option<u32>>,
}

impl Player {
    /// Create a player and mark its session in-game.
    pub fn new(id: u32, name: &str, session: Arc<Session>) -> Arc<Self> {
        session.enter_game(name, id);
        Arc::new(Self {
            id,
            name: name.to_string(),
            session,
            inventory: Inventory::new(id),
            requests: RequestSlots::new(),
            private_store: AtomicBool::new(false),
            party: Mutex::new(None),
            pledge: Mutex::new(None),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn in_private_store(&self) -> bool {
        self.private_store.load(Ordering::Acquire)
    }

    pub fn set_private_store(&self, active: bool) {
        self.private_store.store(active, Ordering::Release);
    }

    pub fn party(&self) -> Option<u32> {
        *self.party.lock().unwrap()
    }

    pub fn set_party(&self, party_id: Option<u32>) {
        *self.party.lock().unwrap() = party_id;
    }

    pub fn pledge(&self) -> Option<u32> {
        *self.pledge.lock().unwrap()
    }

    pub fn set_pledge(&self, pledge_id: Option<u32>) {
        *self.pledge.lock().unwrap() = pledge_id;
    }

    /// Busy players cannot enter a new transactional flow.
    pub fn is_busy(&self) -> bool {
        self.in_private_store()
            || self
                .requests
                .get(crate::game::request::RequestKind::Trade)
                .is_some()
    }
}

/// Registry of online players, sharing the server's game clock.
pub struct World {
    players: RwLock<HashMap<u32, Arc<Player>>>,
    clock: Arc<GameClock>,
}

impl World {
    pub fn new(clock: Arc<GameClock>) -> Arc<Self> {
        Arc::new(Self {
            players: RwLock::new(HashMap::new()),
            clock,
        })
    }

    pub fn clock(&self) -> &Arc<GameClock> {
        &self.clock
    }

    pub fn add(&self, player: &Arc<Player>) {
        self.players
            .write()
            .unwrap()
            .insert(player.id(), Arc::clone(player));
    }

    pub fn player(&self, id: u32) -> Option<Arc<Player>> {
        self.players.read().unwrap().get(&id).cloned()
    }

    pub fn remove(&self, id: u32) -> Option<Arc<Player>> {
        self.players.write().unwrap().remove(&id)
    }

    pub fn online(&self) -> usize {
        self.players.read().unwrap().len()
    }

    /// Player logout/disconnect. Every live request is detached; partners
    /// of two-party flows see a symmetric cancellation.
    pub fn disconnect(&self, player: &Arc<Player>) {
        tracing::info!(
            "[world] [disconnect] player={}({})",
            player.name(),
            player.id()
        );

        for request in player.requests.drain() {
            request.resolve();
            match &request.payload {
                RequestPayload::Trade(t) => {
                    trade::disconnect_cancel(self, t);
                }
                RequestPayload::Invite(inv) => {
                    invite::disconnect_cancel(self, inv);
                }
                // single-party flows die with the player
                RequestPayload::EnchantItem(_) | RequestPayload::EnchantAttribute(_) => {}
            }
        }

        player.session.close();
        self.remove(player.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testutil::bare_session;

    #[test]
    fn test_world_add_lookup_remove() {
        let world = World::new(crate::core::GameClock::new());
        let (session, _rx) = bare_session(1);
        let player = Player::new(10, "Aria", session);

        world.add(&player);
        assert_eq!(world.online(), 1);
        assert!(world.player(10).is_some());

        world.remove(10);
        assert!(world.player(10).is_none());
    }

    #[test]
    fn test_new_player_marks_session_in_game() {
        let (session, _rx) = bare_session(2);
        let player = Player::new(11, "Bran", Arc::clone(&session));

        assert_eq!(session.character(), Some(("Bran".to_string(), 11)));
        assert!(!player.is_busy());

        player.set_private_store(true);
        assert!(player.is_busy());
    }

    #[test]
    fn test_disconnect_closes_session_and_unregisters() {
        let world = World::new(crate::core::GameClock::new());
        let (session, _rx) = bare_session(3);
        let player = Player::new(12, "Cale", Arc::clone(&session));
        world.add(&player);

        world.disconnect(&player);
        assert!(session.is_closed());
        assert!(world.player(12).is_none());
        assert!(player.requests.is_empty());
    }
}
