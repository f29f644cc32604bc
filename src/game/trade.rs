//! Player-to-player trading
//!
//! Two-party flow: request → partner accept → both sides add items/adena →
//! both confirm → commit. Nothing moves until the commit, which locks every
//! offered item in ascending object-id order, re-validates inside the locks,
//! and only then transfers. Both parties always see the same outcome packet.
//!
//! A cancellation from either side — explicit, validation failure, or
//! disconnect — cancels both sides. Once a commit has begun, the committing
//! thread owns the outcome and outside cancellations back off.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::{BufMut, Bytes, BytesMut};

use crate::game::item::{Item, ItemLocation, ItemState};
use crate::game::player::{Player, World};
use crate::game::request::{ActiveRequest, RequestError, RequestKind, RequestPayload};
use crate::network::flood::FloodAction;

pub const OP_TRADE_REQUEST: u8 = 0x70;
pub const OP_TRADE_START: u8 = 0x71;
pub const OP_TRADE_ITEM: u8 = 0x72;
pub const OP_TRADE_DONE: u8 = 0x73;

/// Ask the target whether they accept a trade with `from_id`.
pub fn build_trade_request(from_id: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(5);
    buf.put_u8(OP_TRADE_REQUEST);
    buf.put_u32_le(from_id);
    buf.freeze()
}

/// Trade window opened with `partner_id`.
pub fn build_trade_start(partner_id: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(5);
    buf.put_u8(OP_TRADE_START);
    buf.put_u32_le(partner_id);
    buf.freeze()
}

/// An item placed on the table by `owner_id`.
pub fn build_trade_item(owner_id: u32, object_id: u32, count: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(17);
    buf.put_u8(OP_TRADE_ITEM);
    buf.put_u32_le(owner_id);
    buf.put_u32_le(object_id);
    buf.put_u64_le(count);
    buf.freeze()
}

/// Final outcome, identical for both parties.
pub fn build_trade_done(ok: bool) -> Bytes {
    Bytes::from(vec![OP_TRADE_DONE, ok as u8])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TradePhase {
    /// Waiting for the partner to accept the trade window.
    Pending,
    /// Both sides are filling the table.
    Open,
    /// A commit is running; late packets are dropped.
    Committing,
    Committed,
    Cancelled,
}

struct TradeInner {
    phase: TradePhase,
    /// player id → offered (object id, count), insertion-ordered.
    offers: HashMap<u32, Vec<(u32, u64)>>,
    adena: HashMap<u32, u64>,
    confirmed: HashSet<u32>,
}

/// Shared state of one trade; both players' requests reference the same
/// `Arc<Trade>`.
pub struct Trade {
    initiator: u32,
    partner: u32,
    inner: Mutex<TradeInner>,
}

impl Trade {
    fn new(initiator: u32, partner: u32) -> Arc<Self> {
        Arc::new(Self {
            initiator,
            partner,
            inner: Mutex::new(TradeInner {
                phase: TradePhase::Pending,
                offers: HashMap::new(),
                adena: HashMap::new(),
                confirmed: HashSet::new(),
            }),
        })
    }

    pub fn initiator(&self) -> u32 {
        self.initiator
    }

    pub fn partner(&self) -> u32 {
        self.partner
    }

    fn involves(&self, player_id: u32) -> bool {
        self.initiator == player_id || self.partner == player_id
    }

    fn other(&self, player_id: u32) -> u32 {
        if player_id == self.initiator {
            self.partner
        } else {
            self.initiator
        }
    }
}

/// The player's live trade request, checked against the expected trade.
fn live_request(player: &Player, trade: &Arc<Trade>) -> Option<Arc<ActiveRequest>> {
    let request = player.requests.get(RequestKind::Trade)?;
    match request.trade() {
        Some(t) if Arc::ptr_eq(t, trade) => Some(request),
        _ => None,
    }
}

/// Start a trade with `target_id`. Rate limited under the transaction
/// category; a denied packet is dropped without any effect.
pub fn request_trade(world: &World, me: &Arc<Player>, target_id: u32) -> Result<(), RequestError> {
    if !me.session.can_perform(FloodAction::Transaction) {
        return Ok(());
    }
    if target_id == me.id() {
        return Err(RequestError::SelfTarget);
    }
    let target = world
        .player(target_id)
        .ok_or(RequestError::TargetNotFound(target_id))?;

    if me.is_busy() {
        return Err(RequestError::AlreadyBusy(RequestKind::Trade));
    }
    if target.is_busy() || target.session.is_closed() {
        return Err(RequestError::TargetBusy(target_id));
    }

    let trade = Trade::new(me.id(), target_id);
    let now = world.clock().now();

    let my_request = ActiveRequest::new(
        RequestKind::Trade,
        now,
        Some(target_id),
        RequestPayload::Trade(Arc::clone(&trade)),
    );
    me.requests.attach_if_absent(&my_request)?;

    let their_request = ActiveRequest::new(
        RequestKind::Trade,
        now,
        Some(me.id()),
        RequestPayload::Trade(Arc::clone(&trade)),
    );
    if target.requests.attach_if_absent(&their_request).is_err() {
        // lost the race for the partner's slot; roll back our side
        my_request.resolve();
        me.requests.detach(&my_request);
        return Err(RequestError::TargetBusy(target_id));
    }

    tracing::debug!(
        "[trade] [requested] from={}({}) to={}",
        me.name(),
        me.id(),
        target_id
    );
    target.session.send(build_trade_request(me.id()));
    Ok(())
}

/// Partner's answer to the trade window.
pub fn answer_trade(world: &World, me: &Arc<Player>, accept: bool) -> Result<(), RequestError> {
    let request = me
        .requests
        .get(RequestKind::Trade)
        .ok_or(RequestError::NoRequest(RequestKind::Trade))?;
    let trade = request
        .trade()
        .ok_or(RequestError::NoRequest(RequestKind::Trade))?;

    // only the invited side answers
    if me.id() != trade.partner() {
        return Err(RequestError::Invalid("initiator cannot answer own trade"));
    }

    if !accept {
        cancel(world, trade, "declined");
        return Ok(());
    }

    {
        let mut inner = trade.inner.lock().unwrap();
        if inner.phase != TradePhase::Pending {
            return Err(RequestError::Invalid("trade is not awaiting an answer"));
        }
        inner.phase = TradePhase::Open;
    }

    for id in [trade.initiator(), trade.partner()] {
        if let Some(p) = world.player(id) {
            p.session.send(build_trade_start(trade.other(id)));
        }
    }
    Ok(())
}

/// Put `count` of an owned item on the table. First validation only; the
/// committing check happens under the item lock at confirm time.
pub fn add_trade_item(
    world: &World,
    me: &Arc<Player>,
    object_id: u32,
    count: u64,
) -> Result<(), RequestError> {
    let request = me
        .requests
        .get(RequestKind::Trade)
        .ok_or(RequestError::NoRequest(RequestKind::Trade))?;
    let trade = request
        .trade()
        .ok_or(RequestError::NoRequest(RequestKind::Trade))?;

    if count == 0 {
        audit(me, "trade item with zero count");
        return Err(RequestError::Invalid("zero count"));
    }

    let item = me
        .inventory
        .item(object_id)
        .ok_or(RequestError::Invalid("item not found in own inventory"))?;
    {
        let st = item.state();
        if st.owner_id != me.id() || st.location != ItemLocation::Inventory {
            audit(me, "trade item outside own inventory");
            return Err(RequestError::Invalid("item not tradable"));
        }
        if st.count < count {
            return Err(RequestError::Invalid("not enough of that item"));
        }
    }

    {
        let mut inner = trade.inner.lock().unwrap();
        if inner.phase != TradePhase::Open {
            return Err(RequestError::Invalid("trade is not open"));
        }
        if !inner.confirmed.is_empty() {
            return Err(RequestError::Invalid("offers are locked after a confirm"));
        }
        let offer = inner.offers.entry(me.id()).or_default();
        if offer.iter().any(|(oid, _)| *oid == object_id) {
            audit(me, "duplicate item in trade offer");
            return Err(RequestError::Invalid("item already offered"));
        }
        offer.push((object_id, count));
    }

    let frame = build_trade_item(me.id(), object_id, count);
    for id in [trade.initiator(), trade.partner()] {
        if let Some(p) = world.player(id) {
            p.session.send(frame.clone());
        }
    }
    Ok(())
}

/// Offer adena alongside the items.
pub fn set_trade_adena(me: &Arc<Player>, amount: u64) -> Result<(), RequestError> {
    let request = me
        .requests
        .get(RequestKind::Trade)
        .ok_or(RequestError::NoRequest(RequestKind::Trade))?;
    let trade = request
        .trade()
        .ok_or(RequestError::NoRequest(RequestKind::Trade))?;

    if me.inventory.adena() < amount {
        return Err(RequestError::Invalid("not enough adena"));
    }

    let mut inner = trade.inner.lock().unwrap();
    if inner.phase != TradePhase::Open {
        return Err(RequestError::Invalid("trade is not open"));
    }
    if !inner.confirmed.is_empty() {
        return Err(RequestError::Invalid("offers are locked after a confirm"));
    }
    inner.adena.insert(me.id(), amount);
    Ok(())
}

/// Confirm the table. The second confirmation runs the commit.
pub fn confirm_trade(world: &World, me: &Arc<Player>) -> Result<(), RequestError> {
    let request = me
        .requests
        .get(RequestKind::Trade)
        .ok_or(RequestError::NoRequest(RequestKind::Trade))?;
    let trade = request
        .trade()
        .ok_or(RequestError::NoRequest(RequestKind::Trade))?;

    let both_confirmed = {
        let mut inner = trade.inner.lock().unwrap();
        if inner.phase != TradePhase::Open {
            return Err(RequestError::Invalid("trade is not open"));
        }
        inner.confirmed.insert(me.id());
        if inner.confirmed.len() == 2 {
            // first thread to see both confirms owns the commit
            inner.phase = TradePhase::Committing;
            true
        } else {
            false
        }
    };

    if !both_confirmed {
        return Ok(());
    }

    // duplicate/replayed confirm packets die here
    if !request.begin_processing() {
        return Err(RequestError::AlreadyProcessing);
    }

    commit(world, trade);
    Ok(())
}

/// Explicit cancellation from either side.
pub fn cancel_trade(world: &World, me: &Arc<Player>) -> Result<(), RequestError> {
    let request = me
        .requests
        .get(RequestKind::Trade)
        .ok_or(RequestError::NoRequest(RequestKind::Trade))?;
    let trade = request
        .trade()
        .ok_or(RequestError::NoRequest(RequestKind::Trade))?;
    cancel(world, trade, "cancelled by player");
    Ok(())
}

/// One offered entry resolved for the commit.
struct CommitEntry {
    item: Arc<Item>,
    count: u64,
    from: u32,
    to: u32,
}

fn commit(world: &World, trade: &Arc<Trade>) {
    let (offers, adena) = {
        let inner = trade.inner.lock().unwrap();
        (inner.offers.clone(), inner.adena.clone())
    };

    let (a, b) = match (world.player(trade.initiator()), world.player(trade.partner())) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            cancel_from(world, trade, "partner missing at commit", true);
            return;
        }
    };

    // resolve every offered object id before taking any lock
    let mut entries: Vec<CommitEntry> = Vec::new();
    for (owner, other) in [(&a, &b), (&b, &a)] {
        for (object_id, count) in offers.get(&owner.id()).map(Vec::as_slice).unwrap_or(&[]) {
            match owner.inventory.item(*object_id) {
                Some(item) => entries.push(CommitEntry {
                    item,
                    count: *count,
                    from: owner.id(),
                    to: other.id(),
                }),
                None => {
                    cancel_from(world, trade, "offered item vanished", true);
                    return;
                }
            }
        }
    }

    // fine-grained item locks, ascending object id across both inventories
    entries.sort_by_key(|e| e.item.object_id());
    let mut guards: Vec<MutexGuard<'_, ItemState>> =
        entries.iter().map(|e| e.item.state()).collect();

    // last validation, inside the locks, before anything mutates
    for (entry, st) in entries.iter().zip(guards.iter()) {
        if st.owner_id != entry.from
            || st.location != ItemLocation::Inventory
            || st.count < entry.count
        {
            drop(guards);
            cancel_from(world, trade, "offer failed final validation", true);
            return;
        }
    }

    let incoming_a = entries.iter().filter(|e| e.to == a.id()).count();
    let incoming_b = entries.iter().filter(|e| e.to == b.id()).count();
    if !a.inventory.validate_capacity(incoming_a) || !b.inventory.validate_capacity(incoming_b) {
        drop(guards);
        cancel_from(world, trade, "no room for incoming items", true);
        return;
    }

    // adena first, debit before credit, with compensation if the second
    // debit fails
    let adena_a = adena.get(&a.id()).copied().unwrap_or(0);
    let adena_b = adena.get(&b.id()).copied().unwrap_or(0);
    if a.inventory.reduce_adena(adena_a).is_err() {
        drop(guards);
        cancel_from(world, trade, "initiator adena vanished", true);
        return;
    }
    if b.inventory.reduce_adena(adena_b).is_err() {
        a.inventory.add_adena(adena_a);
        drop(guards);
        cancel_from(world, trade, "partner adena vanished", true);
        return;
    }

    // the point of no return: item moves
    for (entry, st) in entries.iter().zip(guards.iter_mut()) {
        let (from, to) = if entry.from == a.id() { (&a, &b) } else { (&b, &a) };
        if let Err(err) = from
            .inventory
            .transfer_locked(&entry.item, &mut *st, entry.count, &to.inventory)
        {
            // validated above; any remaining failure is abandoned, not
            // rolled back (debit-before-credit keeps it non-duplicating)
            tracing::warn!(
                "[trade] [transfer_failed] item={} from={} to={} err={}",
                entry.item.object_id(),
                entry.from,
                entry.to,
                err
            );
        }
    }
    drop(guards);

    b.inventory.add_adena(adena_a);
    a.inventory.add_adena(adena_b);

    {
        let mut inner = trade.inner.lock().unwrap();
        inner.phase = TradePhase::Committed;
    }

    for p in [&a, &b] {
        if let Some(request) = live_request(p, trade) {
            request.resolve();
            p.requests.detach(&request);
        }
        p.session.send(build_trade_done(true));
    }

    tracing::info!(
        "[trade] [committed] initiator={} partner={} items={} adena_a={} adena_b={}",
        trade.initiator(),
        trade.partner(),
        entries.len(),
        adena_a,
        adena_b
    );
}

/// Cancel both sides. Idempotent; the first caller wins and later callers
/// (including the other party's disconnect path) are no-ops.
fn cancel(world: &World, trade: &Arc<Trade>, reason: &str) {
    cancel_from(world, trade, reason, false);
}

/// `own_commit` is set only by the committing thread's failure paths. Once
/// the phase is `Committing` that thread owns the outcome: a cancel landing
/// from anywhere else backs off, so both sides see exactly one result
/// instead of a cancel racing the item moves.
fn cancel_from(world: &World, trade: &Arc<Trade>, reason: &str, own_commit: bool) {
    {
        let mut inner = trade.inner.lock().unwrap();
        match inner.phase {
            TradePhase::Committed | TradePhase::Cancelled => return,
            TradePhase::Committing if !own_commit => return,
            _ => inner.phase = TradePhase::Cancelled,
        }
    }

    tracing::debug!(
        "[trade] [cancelled] initiator={} partner={} reason={}",
        trade.initiator(),
        trade.partner(),
        reason
    );

    for id in [trade.initiator(), trade.partner()] {
        if let Some(p) = world.player(id) {
            if let Some(request) = live_request(&p, trade) {
                request.resolve();
                p.requests.detach(&request);
            }
            p.session.send(build_trade_done(false));
        }
    }
}

/// Disconnect path entry; the caller has already drained its own slots.
pub(crate) fn disconnect_cancel(world: &World, trade: &Arc<Trade>) {
    cancel(world, trade, "partner disconnected");
}

/// Exploit-shaped input; rejected and recorded as a cheat signal.
fn audit(player: &Player, what: &str) {
    tracing::warn!(
        "[audit] [trade] player={}({}) {}",
        player.name(),
        player.id(),
        what
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::testutil::{drain_frames, online_player, test_world};

    fn open_trade(world: &Arc<World>, a: &Arc<Player>, b: &Arc<Player>) {
        request_trade(world, a, b.id()).unwrap();
        answer_trade(world, b, true).unwrap();
    }

    #[test]
    fn test_request_attaches_both_sides() {
        let world = test_world();
        let (a, _ar) = online_player(&world, 1, "Aria");
        let (b, _br) = online_player(&world, 2, "Bran");

        request_trade(&world, &a, b.id()).unwrap();

        assert!(a.requests.get(RequestKind::Trade).is_some());
        assert!(b.requests.get(RequestKind::Trade).is_some());
    }

    #[test]
    fn test_request_rejects_self_and_unknown() {
        let world = test_world();
        let (a, _ar) = online_player(&world, 1, "Aria");

        assert!(matches!(
            request_trade(&world, &a, 1),
            Err(RequestError::SelfTarget)
        ));
        // step past the transaction window so the gate lets the next try in
        world.clock().advance(20);
        assert!(matches!(
            request_trade(&world, &a, 99),
            Err(RequestError::TargetNotFound(99))
        ));
    }

    #[test]
    fn test_busy_target_rolls_back_initiator_slot() {
        let world = test_world();
        let (a, _ar) = online_player(&world, 1, "Aria");
        let (b, _br) = online_player(&world, 2, "Bran");
        let (c, _cr) = online_player(&world, 3, "Cale");

        // b is already trading with c
        request_trade(&world, &b, c.id()).unwrap();

        let err = request_trade(&world, &a, b.id()).unwrap_err();
        assert!(matches!(err, RequestError::TargetBusy(2)));
        assert!(
            a.requests.get(RequestKind::Trade).is_none(),
            "failed request must not leave a dangling slot"
        );
    }

    #[test]
    fn test_happy_path_commit_moves_items_and_adena() {
        let world = test_world();
        let (a, mut ar) = online_player(&world, 1, "Aria");
        let (b, mut br) = online_player(&world, 2, "Bran");

        let sword = a.inventory.deposit(Item::equipment(3000, a.id())).unwrap();
        let arrows = b.inventory.grant(2000, 500).unwrap();
        a.inventory.add_adena(100);
        b.inventory.add_adena(30);

        open_trade(&world, &a, &b);
        add_trade_item(&world, &a, sword.object_id(), 1).unwrap();
        add_trade_item(&world, &b, arrows.object_id(), 200).unwrap();
        set_trade_adena(&a, 50).unwrap();
        confirm_trade(&world, &a).unwrap();
        confirm_trade(&world, &b).unwrap();

        // sword moved whole, arrows split
        assert!(a.inventory.item(sword.object_id()).is_none());
        assert_eq!(
            b.inventory.item(sword.object_id()).unwrap().state().owner_id,
            b.id()
        );
        assert_eq!(arrows.state().count, 300);
        assert_eq!(a.inventory.adena(), 50);
        assert_eq!(b.inventory.adena(), 80);

        // both slots cleared, both told success
        assert!(a.requests.get(RequestKind::Trade).is_none());
        assert!(b.requests.get(RequestKind::Trade).is_none());
        let done = build_trade_done(true);
        assert!(drain_frames(&mut ar).contains(&done));
        assert!(drain_frames(&mut br).contains(&done));
    }

    #[test]
    fn test_decline_cancels_both_sides() {
        let world = test_world();
        let (a, mut ar) = online_player(&world, 1, "Aria");
        let (b, _br) = online_player(&world, 2, "Bran");

        request_trade(&world, &a, b.id()).unwrap();
        answer_trade(&world, &b, false).unwrap();

        assert!(a.requests.get(RequestKind::Trade).is_none());
        assert!(b.requests.get(RequestKind::Trade).is_none());
        assert!(drain_frames(&mut ar).contains(&build_trade_done(false)));
    }

    #[test]
    fn test_item_destroyed_between_add_and_confirm_cancels() {
        let world = test_world();
        let (a, _ar) = online_player(&world, 1, "Aria");
        let (b, mut br) = online_player(&world, 2, "Bran");

        let potions = a.inventory.grant(1000, 10).unwrap();

        open_trade(&world, &a, &b);
        add_trade_item(&world, &a, potions.object_id(), 10).unwrap();

        // the offered stack shrinks out from under the trade
        a.inventory.destroy_item(potions.object_id(), 8).unwrap();

        confirm_trade(&world, &a).unwrap();
        confirm_trade(&world, &b).unwrap();

        // last validation caught it; nothing moved, both cancelled
        assert_eq!(potions.state().count, 2);
        assert!(b.inventory.item(potions.object_id()).is_none());
        assert!(a.requests.get(RequestKind::Trade).is_none());
        assert!(drain_frames(&mut br).contains(&build_trade_done(false)));
    }

    #[test]
    fn test_partner_disconnect_cancels_symmetrically() {
        let world = test_world();
        let (a, mut ar) = online_player(&world, 1, "Aria");
        let (b, _br) = online_player(&world, 2, "Bran");

        let gems = a.inventory.grant(4000, 3).unwrap();
        open_trade(&world, &a, &b);
        add_trade_item(&world, &a, gems.object_id(), 3).unwrap();

        world.disconnect(&b);

        assert!(a.requests.get(RequestKind::Trade).is_none());
        assert!(b.requests.get(RequestKind::Trade).is_none());
        assert_eq!(gems.state().count, 3, "nothing committed");
        assert!(drain_frames(&mut ar).contains(&build_trade_done(false)));
    }

    #[test]
    fn test_offers_locked_after_first_confirm() {
        let world = test_world();
        let (a, _ar) = online_player(&world, 1, "Aria");
        let (b, _br) = online_player(&world, 2, "Bran");

        let potions = a.inventory.grant(1000, 5).unwrap();
        open_trade(&world, &a, &b);
        confirm_trade(&world, &b).unwrap();

        let err = add_trade_item(&world, &a, potions.object_id(), 5).unwrap_err();
        assert!(matches!(err, RequestError::Invalid(_)));
    }

    #[test]
    fn test_zero_count_offer_is_audited_reject() {
        let world = test_world();
        let (a, _ar) = online_player(&world, 1, "Aria");
        let (b, _br) = online_player(&world, 2, "Bran");

        let potions = a.inventory.grant(1000, 5).unwrap();
        open_trade(&world, &a, &b);

        assert!(add_trade_item(&world, &a, potions.object_id(), 0).is_err());
        assert!(add_trade_item(&world, &a, potions.object_id(), 5).is_ok());
        // duplicate object id in the same offer is exploit-shaped
        assert!(add_trade_item(&world, &a, potions.object_id(), 5).is_err());
    }

    #[test]
    fn test_governor_denial_is_silent_noop() {
        let world = test_world();
        let (a, _ar) = online_player(&world, 1, "Aria");
        let (b, _br) = online_player(&world, 2, "Bran");

        // burn the transaction window
        assert!(a.session.can_perform(FloodAction::Transaction));

        request_trade(&world, &a, b.id()).unwrap();
        assert!(
            a.requests.get(RequestKind::Trade).is_none(),
            "denied request must change nothing"
        );
        assert!(b.requests.get(RequestKind::Trade).is_none());
    }

    #[test]
    fn test_cancel_backs_off_while_commit_is_running() {
        let world = test_world();
        let (a, mut ar) = online_player(&world, 1, "Aria");
        let (b, _br) = online_player(&world, 2, "Bran");

        let gems = a.inventory.grant(4000, 3).unwrap();
        open_trade(&world, &a, &b);
        add_trade_item(&world, &a, gems.object_id(), 3).unwrap();

        let request = a.requests.get(RequestKind::Trade).unwrap();
        let trade = Arc::clone(request.trade().unwrap());
        // a commit is in flight on another thread
        trade.inner.lock().unwrap().phase = TradePhase::Committing;

        // an explicit cancel must not race the committer
        cancel_trade(&world, &a).unwrap();
        assert_eq!(trade.inner.lock().unwrap().phase, TradePhase::Committing);
        assert!(a.requests.get(RequestKind::Trade).is_some());
        assert!(b.requests.get(RequestKind::Trade).is_some());
        assert!(!drain_frames(&mut ar).contains(&build_trade_done(false)));

        // neither must the partner's disconnect path
        world.disconnect(&b);
        assert_eq!(trade.inner.lock().unwrap().phase, TradePhase::Committing);
        assert!(a.requests.get(RequestKind::Trade).is_some());
        assert!(!drain_frames(&mut ar).contains(&build_trade_done(false)));
    }
}
