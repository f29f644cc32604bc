//! Enchant flows
//!
//! Two single-party transactional flows: item enchantment (scroll) and
//! attribute enchantment (soulstone). Both follow the same skeleton:
//! select target → select consumable → commit. The commit re-validates
//! everything under the item locks, consumes the scroll/stone first, and
//! only then rolls the outcome — a failed roll can never refund.
//!
//! The client aborts either flow by selecting [`CANCEL_SENTINEL`] as the
//! target object id.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use rand::RngExt;

use crate::game::item::{Element, Item, ItemLocation, ItemState};
use crate::game::player::{Player, World};
use crate::game::request::{
    ActiveRequest, RequestError, RequestKind, RequestPayload, CANCEL_SENTINEL,
};
use crate::network::flood::FloodAction;

pub const OP_ENCHANT_RESULT: u8 = 0x81;
pub const OP_ATTRIBUTE_RESULT: u8 = 0x82;

/// Result codes shared by both enchant result packets.
pub const ENCHANT_SUCCESS: u8 = 0;
pub const ENCHANT_FAILED: u8 = 1;
pub const ENCHANT_BROKEN: u8 = 2;
pub const ENCHANT_CANCELLED: u8 = 3;

pub fn build_enchant_result(code: u8) -> Bytes {
    Bytes::from(vec![OP_ENCHANT_RESULT, code])
}

pub fn build_attribute_result(code: u8) -> Bytes {
    Bytes::from(vec![OP_ATTRIBUTE_RESULT, code])
}

/// Enchants up to this level never fail.
pub const SAFE_ENCHANT_LEVEL: u32 = 3;

/// Success chance above the safe level, in basis points.
const ENCHANT_CHANCE_BPS: u32 = 6_667;

/// Crystals credited when a normal-scroll enchant breaks the item.
pub const CRYSTAL_TEMPLATE: u32 = 1458;

// Scroll templates understood by the item-enchant flow.
pub const SCROLL_ENCHANT_WEAPON: u32 = 729;
pub const SCROLL_ENCHANT_ARMOR: u32 = 947;
pub const BLESSED_SCROLL_ENCHANT_WEAPON: u32 = 6569;
pub const BLESSED_SCROLL_ENCHANT_ARMOR: u32 = 6570;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollKind {
    /// Failure above the safe level destroys the item.
    Normal,
    /// Failure resets the enchant to zero but keeps the item.
    Blessed,
}

fn scroll_kind(template_id: u32) -> Option<ScrollKind> {
    match template_id {
        SCROLL_ENCHANT_WEAPON | SCROLL_ENCHANT_ARMOR => Some(ScrollKind::Normal),
        BLESSED_SCROLL_ENCHANT_WEAPON | BLESSED_SCROLL_ENCHANT_ARMOR => Some(ScrollKind::Blessed),
        _ => None,
    }
}

// Soulstone templates for the attribute flow.
pub const STONE_FIRE: u32 = 9546;
pub const STONE_WATER: u32 = 9547;
pub const STONE_WIND: u32 = 9548;
pub const STONE_EARTH: u32 = 9549;
pub const STONE_HOLY: u32 = 9550;
pub const STONE_DARK: u32 = 9551;

fn stone_element(template_id: u32) -> Option<Element> {
    match template_id {
        STONE_FIRE => Some(Element::Fire),
        STONE_WATER => Some(Element::Water),
        STONE_WIND => Some(Element::Wind),
        STONE_EARTH => Some(Element::Earth),
        STONE_HOLY => Some(Element::Holy),
        STONE_DARK => Some(Element::Dark),
        _ => None,
    }
}

/// Attribute power gained per successful stone.
pub const ATTRIBUTE_STEP: u16 = 5;
/// Attribute power cap.
pub const ATTRIBUTE_CAP: u16 = 150;
const ATTRIBUTE_CHANCE_BPS: u32 = 5_000;

/// Outcome of one enchant roll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnchantOutcome {
    Success,
    /// Blessed-scroll failure: enchant resets, item survives.
    Failure,
    /// Normal-scroll failure: item is destroyed, crystals refunded.
    Break,
}

/// Pure outcome decision; `roll_bps` is uniform in `0..10_000`.
fn decide_outcome(roll_bps: u32, level: u32, kind: ScrollKind) -> EnchantOutcome {
    if level < SAFE_ENCHANT_LEVEL || roll_bps < ENCHANT_CHANCE_BPS {
        return EnchantOutcome::Success;
    }
    match kind {
        ScrollKind::Blessed => EnchantOutcome::Failure,
        ScrollKind::Normal => EnchantOutcome::Break,
    }
}

/// Crystals refunded when an item breaks at `level`.
fn crystal_refund(level: u32) -> u64 {
    (level as u64 + 1) * 10
}

/// Payload of a live item-enchant request.
pub struct EnchantItemState {
    pub item_oid: u32,
    pub scroll_oid: Option<u32>,
}

impl EnchantItemState {
    pub fn new(item_oid: u32) -> Self {
        Self {
            item_oid,
            scroll_oid: None,
        }
    }
}

/// Payload of a live attribute-enchant request.
pub struct EnchantAttributeState {
    pub item_oid: u32,
    pub stone_oid: Option<u32>,
}

impl EnchantAttributeState {
    pub fn new(item_oid: u32) -> Self {
        Self {
            item_oid,
            stone_oid: None,
        }
    }
}

fn audit(player: &Player, what: &str) {
    tracing::warn!(
        "[audit] [enchant] player={}({}) {}",
        player.name(),
        player.id(),
        what
    );
}

/// First step: the client selects the item to enchant. The sentinel id
/// cancels any live flow instead.
pub fn start_enchant(world: &World, me: &Arc<Player>, item_oid: u32) -> Result<(), RequestError> {
    if item_oid == CANCEL_SENTINEL {
        return cancel_enchant(me);
    }
    if !me.session.can_perform(FloodAction::UseItem) {
        return Ok(());
    }
    if me.is_busy() {
        return Err(RequestError::Invalid("busy with another transaction"));
    }

    let item = match me.inventory.item(item_oid) {
        Some(item) => item,
        None => {
            audit(me, "enchant target not in own inventory");
            return Err(RequestError::Invalid("item not found"));
        }
    };
    if !item.is_enchantable() {
        return Err(RequestError::Invalid("item cannot be enchanted"));
    }

    let request = ActiveRequest::new(
        RequestKind::EnchantItem,
        world.clock().now(),
        None,
        RequestPayload::EnchantItem(Mutex::new(EnchantItemState::new(item_oid))),
    );
    me.requests.attach_if_absent(&request)?;
    Ok(())
}

/// Second step: the client selects the scroll.
pub fn set_enchant_scroll(me: &Arc<Player>, scroll_oid: u32) -> Result<(), RequestError> {
    let request = me
        .requests
        .get(RequestKind::EnchantItem)
        .ok_or(RequestError::NoRequest(RequestKind::EnchantItem))?;
    let state = request
        .enchant_item()
        .ok_or(RequestError::NoRequest(RequestKind::EnchantItem))?;

    let scroll = me
        .inventory
        .item(scroll_oid)
        .ok_or(RequestError::Invalid("scroll not found"))?;
    if scroll_kind(scroll.template_id()).is_none() {
        audit(me, "non-scroll item selected as enchant scroll");
        return Err(RequestError::Invalid("not an enchant scroll"));
    }

    state.lock().unwrap().scroll_oid = Some(scroll_oid);
    Ok(())
}

/// Commit: consume the scroll, roll, apply. Duplicate commit packets are
/// silently dropped by the processing guard.
pub fn try_enchant(me: &Arc<Player>) -> Result<(), RequestError> {
    let request = me
        .requests
        .get(RequestKind::EnchantItem)
        .ok_or(RequestError::NoRequest(RequestKind::EnchantItem))?;
    if !request.begin_processing() {
        return Ok(());
    }

    let (item_oid, scroll_oid) = {
        let state = request
            .enchant_item()
            .ok_or(RequestError::NoRequest(RequestKind::EnchantItem))?
            .lock()
            .unwrap();
        match state.scroll_oid {
            Some(scroll_oid) => (state.item_oid, scroll_oid),
            None => {
                drop(state);
                request.end_processing();
                return Err(RequestError::Invalid("no scroll selected"));
            }
        }
    };

    let (item, scroll) = match (me.inventory.item(item_oid), me.inventory.item(scroll_oid)) {
        (Some(item), Some(scroll)) => (item, scroll),
        _ => {
            finish(me, &request, build_enchant_result(ENCHANT_CANCELLED));
            return Err(RequestError::Invalid("enchant items vanished"));
        }
    };
    let kind = match scroll_kind(scroll.template_id()) {
        Some(kind) => kind,
        None => {
            finish(me, &request, build_enchant_result(ENCHANT_CANCELLED));
            return Err(RequestError::Invalid("not an enchant scroll"));
        }
    };

    // item-identity locks, ascending object id
    let (mut item_st, mut scroll_st) = lock_pair(&item, &scroll);

    // last validation, inside the locks
    if item_st.owner_id != me.id()
        || (item_st.location != ItemLocation::Inventory
            && item_st.location != ItemLocation::Equipped)
    {
        drop((item_st, scroll_st));
        finish(me, &request, build_enchant_result(ENCHANT_CANCELLED));
        return Err(RequestError::Invalid("item no longer enchantable"));
    }

    // debit first: the scroll burns whatever the roll says
    if let Err(err) = me.inventory.destroy_locked(&scroll, &mut scroll_st, 1) {
        drop((item_st, scroll_st));
        finish(me, &request, build_enchant_result(ENCHANT_CANCELLED));
        return Err(err.into());
    }

    let roll = rand::rng().random_range(0..10_000u32);
    let level = item_st.enchant_level;
    let outcome = decide_outcome(roll, level, kind);

    let mut refund = 0;
    let result = match outcome {
        EnchantOutcome::Success => {
            item_st.enchant_level += 1;
            tracing::info!(
                "[enchant] [success] player={}({}) item={} level={}",
                me.name(),
                me.id(),
                item_oid,
                item_st.enchant_level
            );
            ENCHANT_SUCCESS
        }
        EnchantOutcome::Failure => {
            item_st.enchant_level = 0;
            ENCHANT_FAILED
        }
        EnchantOutcome::Break => {
            let count = item_st.count;
            refund = crystal_refund(level);
            if let Err(err) = me.inventory.destroy_locked(&item, &mut item_st, count) {
                tracing::warn!(
                    "[enchant] [break_destroy_failed] player={} item={} err={}",
                    me.id(),
                    item_oid,
                    err
                );
            }
            ENCHANT_BROKEN
        }
    };
    drop((item_st, scroll_st));

    // credit after debit; a full inventory just loses the refund
    if refund > 0 {
        if let Err(err) = me.inventory.grant(CRYSTAL_TEMPLATE, refund) {
            tracing::warn!(
                "[enchant] [refund_failed] player={} crystals={} err={}",
                me.id(),
                refund,
                err
            );
        }
    }

    finish(me, &request, build_enchant_result(result));
    Ok(())
}

/// Explicit cancel (sentinel or UI close).
pub fn cancel_enchant(me: &Arc<Player>) -> Result<(), RequestError> {
    let request = me
        .requests
        .get(RequestKind::EnchantItem)
        .ok_or(RequestError::NoRequest(RequestKind::EnchantItem))?;
    finish(me, &request, build_enchant_result(ENCHANT_CANCELLED));
    Ok(())
}

/// First step of the attribute flow; the sentinel id cancels.
pub fn start_attribute_enchant(
    world: &World,
    me: &Arc<Player>,
    item_oid: u32,
) -> Result<(), RequestError> {
    if item_oid == CANCEL_SENTINEL {
        return cancel_attribute_enchant(me);
    }
    if !me.session.can_perform(FloodAction::UseItem) {
        return Ok(());
    }
    if me.is_busy() {
        return Err(RequestError::Invalid("busy with another transaction"));
    }

    let item = me
        .inventory
        .item(item_oid)
        .ok_or(RequestError::Invalid("item not found"))?;
    if !item.is_enchantable() {
        return Err(RequestError::Invalid("item cannot take an attribute"));
    }

    let request = ActiveRequest::new(
        RequestKind::EnchantAttribute,
        world.clock().now(),
        None,
        RequestPayload::EnchantAttribute(Mutex::new(EnchantAttributeState::new(item_oid))),
    );
    me.requests.attach_if_absent(&request)?;
    Ok(())
}

/// Second step: select the soulstone.
pub fn set_attribute_stone(me: &Arc<Player>, stone_oid: u32) -> Result<(), RequestError> {
    let request = me
        .requests
        .get(RequestKind::EnchantAttribute)
        .ok_or(RequestError::NoRequest(RequestKind::EnchantAttribute))?;
    let state = request
        .enchant_attribute()
        .ok_or(RequestError::NoRequest(RequestKind::EnchantAttribute))?;

    let stone = me
        .inventory
        .item(stone_oid)
        .ok_or(RequestError::Invalid("stone not found"))?;
    if stone_element(stone.template_id()).is_none() {
        audit(me, "non-stone item selected as soulstone");
        return Err(RequestError::Invalid("not a soulstone"));
    }

    state.lock().unwrap().stone_oid = Some(stone_oid);
    Ok(())
}

/// Attribute commit: consume the stone, roll, raise the element power.
pub fn try_attribute_enchant(me: &Arc<Player>) -> Result<(), RequestError> {
    let request = me
        .requests
        .get(RequestKind::EnchantAttribute)
        .ok_or(RequestError::NoRequest(RequestKind::EnchantAttribute))?;
    if !request.begin_processing() {
        return Ok(());
    }

    let (item_oid, stone_oid) = {
        let state = request
            .enchant_attribute()
            .ok_or(RequestError::NoRequest(RequestKind::EnchantAttribute))?
            .lock()
            .unwrap();
        match state.stone_oid {
            Some(stone_oid) => (state.item_oid, stone_oid),
            None => {
                drop(state);
                request.end_processing();
                return Err(RequestError::Invalid("no stone selected"));
            }
        }
    };

    let (item, stone) = match (me.inventory.item(item_oid), me.inventory.item(stone_oid)) {
        (Some(item), Some(stone)) => (item, stone),
        _ => {
            finish(me, &request, build_attribute_result(ENCHANT_CANCELLED));
            return Err(RequestError::Invalid("attribute items vanished"));
        }
    };
    let element = match stone_element(stone.template_id()) {
        Some(element) => element,
        None => {
            finish(me, &request, build_attribute_result(ENCHANT_CANCELLED));
            return Err(RequestError::Invalid("not a soulstone"));
        }
    };

    let (mut item_st, mut stone_st) = lock_pair(&item, &stone);

    if item_st.owner_id != me.id() || item_st.location != ItemLocation::Inventory {
        drop((item_st, stone_st));
        finish(me, &request, build_attribute_result(ENCHANT_CANCELLED));
        return Err(RequestError::Invalid("item no longer eligible"));
    }
    if matches!(item_st.element, Some((existing, _)) if existing != element) {
        drop((item_st, stone_st));
        finish(me, &request, build_attribute_result(ENCHANT_CANCELLED));
        return Err(RequestError::Invalid("item already holds another element"));
    }

    if let Err(err) = me.inventory.destroy_locked(&stone, &mut stone_st, 1) {
        drop((item_st, stone_st));
        finish(me, &request, build_attribute_result(ENCHANT_CANCELLED));
        return Err(err.into());
    }

    let roll = rand::rng().random_range(0..10_000u32);
    let result = if roll < ATTRIBUTE_CHANCE_BPS {
        let power = match item_st.element {
            Some((_, power)) => (power + ATTRIBUTE_STEP).min(ATTRIBUTE_CAP),
            None => ATTRIBUTE_STEP,
        };
        item_st.element = Some((element, power));
        tracing::info!(
            "[enchant] [attribute_success] player={}({}) item={} element={:?} power={}",
            me.name(),
            me.id(),
            item_oid,
            element,
            power
        );
        ENCHANT_SUCCESS
    } else {
        ENCHANT_FAILED
    };
    drop((item_st, stone_st));

    finish(me, &request, build_attribute_result(result));
    Ok(())
}

/// Explicit cancel of the attribute flow.
pub fn cancel_attribute_enchant(me: &Arc<Player>) -> Result<(), RequestError> {
    let request = me
        .requests
        .get(RequestKind::EnchantAttribute)
        .ok_or(RequestError::NoRequest(RequestKind::EnchantAttribute))?;
    finish(me, &request, build_attribute_result(ENCHANT_CANCELLED));
    Ok(())
}

/// Lock two items in ascending object-id order, returning (first, second)
/// guards matched back to the argument order.
fn lock_pair<'a>(
    a: &'a Arc<Item>,
    b: &'a Arc<Item>,
) -> (
    std::sync::MutexGuard<'a, ItemState>,
    std::sync::MutexGuard<'a, ItemState>,
) {
    if a.object_id() <= b.object_id() {
        let ga = a.state();
        let gb = b.state();
        (ga, gb)
    } else {
        let gb = b.state();
        let ga = a.state();
        (ga, gb)
    }
}

/// Resolve, detach, notify.
fn finish(me: &Arc<Player>, request: &Arc<ActiveRequest>, result: Bytes) {
    request.resolve();
    me.requests.detach(request);
    me.session.send(result);
}
