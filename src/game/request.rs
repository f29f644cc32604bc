//! Transactional requests
//!
//! A request is a multi-step, stateful flow attached to a player: trade,
//! enchant, join invitation. The slot map enforces the core invariant at
//! the data-structure level: at most one live request per kind per player.
//! Attach is set-if-absent; detach only removes the exact request object it
//! is given, so a stale timeout can never knock out a newer request that
//! reused the slot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::game::enchant::{EnchantAttributeState, EnchantItemState};
use crate::game::invite::Invite;
use crate::game::item::InventoryError;
use crate::game::trade::Trade;

/// Client-side cancellation sentinel: an object id of all ones in the
/// select packet means "abort the flow".
pub const CANCEL_SENTINEL: u32 = 0xFFFF_FFFF;

/// Invitation-style requests auto-decline after this long.
pub const INVITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Request kinds. One live request per kind per player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Trade,
    EnchantItem,
    EnchantAttribute,
    PartyInvite,
    PledgeInvite,
}

/// Flow failures surfaced to the actor. Governor denials are *not* errors;
/// a denied packet is silently dropped before any of this is reached.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("a {0:?} request is already in progress")]
    AlreadyBusy(RequestKind),

    #[error("no live {0:?} request")]
    NoRequest(RequestKind),

    #[error("request is already being processed")]
    AlreadyProcessing,

    #[error("target player {0} not found")]
    TargetNotFound(u32),

    #[error("target player {0} is busy")]
    TargetBusy(u32),

    #[error("cannot target yourself")]
    SelfTarget,

    #[error("partner is gone")]
    PartnerGone,

    #[error("invalid request input: {0}")]
    Invalid(&'static str),

    #[error(transparent)]
    Inventory(#[from] InventoryError),
}

/// Kind-specific request payload.
pub enum RequestPayload {
    Trade(Arc<Trade>),
    EnchantItem(Mutex<EnchantItemState>),
    EnchantAttribute(Mutex<EnchantAttributeState>),
    Invite(Invite),
}

/// One live request attached to a player.
pub struct ActiveRequest {
    kind: RequestKind,
    created_tick: u64,
    /// Partner player id for two-party flows.
    partner: Option<u32>,
    /// Commit-phase re-entrancy guard; duplicate commit packets are dropped.
    processing: AtomicBool,
    /// Set once by whichever path resolves the request first.
    resolved: AtomicBool,
    pub payload: RequestPayload,
    /// Pending auto-decline task, if any. Aborted on resolution.
    timeout: Mutex<Option<JoinHandle<()>>>,
}

impl ActiveRequest {
    pub fn new(
        kind: RequestKind,
        created_tick: u64,
        partner: Option<u32>,
        payload: RequestPayload,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind,
            created_tick,
            partner,
            processing: AtomicBool::new(false),
            resolved: AtomicBool::new(false),
            payload,
            timeout: Mutex::new(None),
        })
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn created_tick(&self) -> u64 {
        self.created_tick
    }

    pub fn partner(&self) -> Option<u32> {
        self.partner
    }

    /// Enter the commit phase. Returns false if a commit is already running
    /// (duplicate or replayed packet) — the caller drops the packet.
    pub fn begin_processing(&self) -> bool {
        !self.processing.swap(true, Ordering::AcqRel)
    }

    /// Leave the commit phase without resolving (validation failed but the
    /// request stays live, e.g. scroll not selected yet).
    pub fn end_processing(&self) {
        self.processing.store(false, Ordering::Release);
    }

    /// Mark resolved. The first caller wins and the pending timeout task,
    /// if any, is aborted. Returns false if already resolved.
    pub fn resolve(&self) -> bool {
        if self.resolved.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.abort_timeout();
        true
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }

    /// Store the auto-decline task handle for this request.
    pub fn set_timeout(&self, handle: JoinHandle<()>) {
        let mut slot = self.timeout.lock().unwrap();
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    fn abort_timeout(&self) {
        if let Some(handle) = self.timeout.lock().unwrap().take() {
            handle.abort();
        }
    }

    pub fn trade(&self) -> Option<&Arc<Trade>> {
        match &self.payload {
            RequestPayload::Trade(t) => Some(t),
            _ => None,
        }
    }

    pub fn enchant_item(&self) -> Option<&Mutex<EnchantItemState>> {
        match &self.payload {
            RequestPayload::EnchantItem(s) => Some(s),
            _ => None,
        }
    }

    pub fn enchant_attribute(&self) -> Option<&Mutex<EnchantAttributeState>> {
        match &self.payload {
            RequestPayload::EnchantAttribute(s) => Some(s),
            _ => None,
        }
    }

    pub fn invite(&self) -> Option<&Invite> {
        match &self.payload {
            RequestPayload::Invite(i) => Some(i),
            _ => None,
        }
    }
}

/// Per-player request slots: kind → live request.
pub struct RequestSlots {
    slots: Mutex<HashMap<RequestKind, Arc<ActiveRequest>>>,
}

impl RequestSlots {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Set-if-absent attach. Rejects when a request of the same kind is
    /// already live; it never silently replaces one.
    pub fn attach_if_absent(&self, request: &Arc<ActiveRequest>) -> Result<(), RequestError> {
        let mut slots = self.slots.lock().unwrap();
        match slots.entry(request.kind()) {
            std::collections::hash_map::Entry::Occupied(_) => {
                Err(RequestError::AlreadyBusy(request.kind()))
            }
            std::collections::hash_map::Entry::Vacant(v) => {
                v.insert(Arc::clone(request));
                Ok(())
            }
        }
    }

    pub fn get(&self, kind: RequestKind) -> Option<Arc<ActiveRequest>> {
        self.slots.lock().unwrap().get(&kind).cloned()
    }

    /// Detach exactly this request object. Returns false when the slot is
    /// empty or holds a *different* request of the same kind — a fired
    /// timeout whose request was superseded must become a no-op.
    pub fn detach(&self, request: &Arc<ActiveRequest>) -> bool {
        let mut slots = self.slots.lock().unwrap();
        match slots.get(&request.kind()) {
            Some(live) if Arc::ptr_eq(live, request) => {
                slots.remove(&request.kind());
                request.abort_timeout();
                true
            }
            _ => false,
        }
    }

    /// Remove every live request (disconnect path).
    pub fn drain(&self) -> Vec<Arc<ActiveRequest>> {
        let mut slots = self.slots.lock().unwrap();
        let drained: Vec<_> = slots.drain().map(|(_, r)| r).collect();
        for request in &drained {
            request.abort_timeout();
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().unwrap().is_empty()
    }
}

impl Default for RequestSlots {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enchant_request() -> Arc<ActiveRequest> {
        ActiveRequest::new(
            RequestKind::EnchantItem,
            0,
            None,
            RequestPayload::EnchantItem(Mutex::new(EnchantItemState::new(123))),
        )
    }

    #[test]
    fn test_attach_is_set_if_absent() {
        let slots = RequestSlots::new();
        let first = enchant_request();
        let second = enchant_request();

        slots.attach_if_absent(&first).unwrap();
        let err = slots.attach_if_absent(&second).unwrap_err();
        assert!(matches!(err, RequestError::AlreadyBusy(RequestKind::EnchantItem)));

        // exactly one request reachable
        assert_eq!(slots.len(), 1);
        assert!(Arc::ptr_eq(&slots.get(RequestKind::EnchantItem).unwrap(), &first));
    }

    #[test]
    fn test_detach_requires_same_object() {
        let slots = RequestSlots::new();
        let first = enchant_request();
        slots.attach_if_absent(&first).unwrap();

        // a different object of the same kind cannot detach it
        let imposter = enchant_request();
        assert!(!slots.detach(&imposter));
        assert_eq!(slots.len(), 1);

        assert!(slots.detach(&first));
        assert!(slots.is_empty());
        // second detach of the same object is a no-op
        assert!(!slots.detach(&first));
    }

    #[test]
    fn test_superseded_request_detach_is_noop() {
        let slots = RequestSlots::new();
        let old = enchant_request();
        slots.attach_if_absent(&old).unwrap();
        assert!(slots.detach(&old));

        let newer = enchant_request();
        slots.attach_if_absent(&newer).unwrap();

        // the old request's (e.g. timeout) detach must not touch the newer one
        assert!(!slots.detach(&old));
        assert!(Arc::ptr_eq(&slots.get(RequestKind::EnchantItem).unwrap(), &newer));
    }

    #[test]
    fn test_begin_processing_single_entry() {
        let request = enchant_request();
        assert!(request.begin_processing());
        assert!(!request.begin_processing(), "duplicate commit dropped");

        request.end_processing();
        assert!(request.begin_processing(), "reusable after end_processing");
    }

    #[test]
    fn test_resolve_first_caller_wins() {
        let request = enchant_request();
        assert!(!request.is_resolved());
        assert!(request.resolve());
        assert!(!request.resolve());
        assert!(request.is_resolved());
    }

    #[test]
    fn test_drain_empties_all_kinds() {
        let slots = RequestSlots::new();
        slots.attach_if_absent(&enchant_request()).unwrap();
        let attr = ActiveRequest::new(
            RequestKind::EnchantAttribute,
            0,
            None,
            RequestPayload::EnchantAttribute(Mutex::new(EnchantAttributeState::new(5))),
        );
        slots.attach_if_absent(&attr).unwrap();

        let drained = slots.drain();
        assert_eq!(drained.len(), 2);
        assert!(slots.is_empty());
    }
}
