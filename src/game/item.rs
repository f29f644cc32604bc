//! Items and inventories
//!
//! Every item is `Arc`-shared and carries its own state mutex — the
//! item-identity lock. Compound operations (trade commit, enchant) hold
//! that lock for the whole read-validate-mutate span, and re-validate
//! ownership/location *inside* it; the cheap check done before locking is
//! an optimization, never a substitute.
//!
//! Lock order: when several items are involved, lock in ascending object-id
//! order. The inventory map mutex and the adena mutex are leaf locks — they
//! are taken briefly and never held while acquiring an item-state lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Default inventory slot capacity.
pub const INVENTORY_CAPACITY: usize = 80;

static NEXT_OBJECT_ID: AtomicU32 = AtomicU32::new(0x1000_0000);

/// Allocate a world-unique item object id.
pub fn next_object_id() -> u32 {
    NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Where an item currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemLocation {
    Inventory,
    Equipped,
    Warehouse,
    /// Destroyed; the entry is gone from every container.
    Void,
}

/// Attribute elements for the attribute-enchant flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Element {
    Fire,
    Water,
    Wind,
    Earth,
    Holy,
    Dark,
}

/// Mutable item state, guarded by the item-identity lock.
#[derive(Debug)]
pub struct ItemState {
    pub count: u64,
    pub enchant_level: u32,
    pub element: Option<(Element, u16)>,
    pub owner_id: u32,
    pub location: ItemLocation,
}

/// A world item. Identity fields are immutable; everything mutable sits
/// behind [`Item::state`].
#[derive(Debug)]
pub struct Item {
    object_id: u32,
    template_id: u32,
    stackable: bool,
    enchantable: bool,
    state: Mutex<ItemState>,
}

impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        self.object_id == other.object_id
    }
}

impl Eq for Item {}

impl Item {
    fn create(
        template_id: u32,
        count: u64,
        owner_id: u32,
        stackable: bool,
        enchantable: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            object_id: next_object_id(),
            template_id,
            stackable,
            enchantable,
            state: Mutex::new(ItemState {
                count,
                enchant_level: 0,
                element: None,
                owner_id,
                location: ItemLocation::Inventory,
            }),
        })
    }

    /// A stackable item (consumables, currency-like materials).
    pub fn stackable(template_id: u32, count: u64, owner_id: u32) -> Arc<Self> {
        Self::create(template_id, count, owner_id, true, false)
    }

    /// A single enchantable equipment piece.
    pub fn equipment(template_id: u32, owner_id: u32) -> Arc<Self> {
        Self::create(template_id, 1, owner_id, false, true)
    }

    pub fn object_id(&self) -> u32 {
        self.object_id
    }

    pub fn template_id(&self) -> u32 {
        self.template_id
    }

    pub fn is_stackable(&self) -> bool {
        self.stackable
    }

    pub fn is_enchantable(&self) -> bool {
        self.enchantable
    }

    /// Acquire the item-identity lock.
    pub fn state(&self) -> MutexGuard<'_, ItemState> {
        self.state.lock().unwrap()
    }
}

/// Inventory operation failures. Reported to the actor; state unchanged.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InventoryError {
    #[error("item {object_id} not found")]
    ItemNotFound { object_id: u32 },

    #[error("item {object_id} not owned by this player")]
    NotOwner { object_id: u32 },

    #[error("item {object_id} is not in a usable location")]
    BadLocation { object_id: u32 },

    #[error("item {object_id} has {have}, wanted {want}")]
    InsufficientCount { object_id: u32, have: u64, want: u64 },

    #[error("illegal count {0}")]
    IllegalCount(u64),

    #[error("inventory is full")]
    InventoryFull,

    #[error("not enough adena: have {have}, wanted {want}")]
    InsufficientAdena { have: u64, want: u64 },
}

/// A player's item container.
///
/// The container owns its items for their whole life; requests only ever
/// hold `Arc` references, never ownership.
pub struct Inventory {
    owner_id: u32,
    capacity: usize,
    items: Mutex<HashMap<u32, Arc<Item>>>,
    adena: Mutex<u64>,
}

impl Inventory {
    pub fn new(owner_id: u32) -> Self {
        Self::with_capacity(owner_id, INVENTORY_CAPACITY)
    }

    pub fn with_capacity(owner_id: u32, capacity: usize) -> Self {
        Self {
            owner_id,
            capacity,
            items: Mutex::new(HashMap::new()),
            adena: Mutex::new(0),
        }
    }

    pub fn owner_id(&self) -> u32 {
        self.owner_id
    }

    /// Item lookup by object id.
    pub fn item(&self, object_id: u32) -> Option<Arc<Item>> {
        self.items.lock().unwrap().get(&object_id).cloned()
    }

    pub fn slots_used(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    /// Room for `incoming` more item entries?
    pub fn validate_capacity(&self, incoming: usize) -> bool {
        self.slots_used() + incoming <= self.capacity
    }

    /// Add an existing item to this container.
    ///
    /// Merges stackables into an existing stack of the same template.
    /// Callers must not hold any item-state lock (the merge takes one).
    pub fn deposit(&self, item: Arc<Item>) -> Result<Arc<Item>, InventoryError> {
        if item.is_stackable() {
            let existing = {
                let items = self.items.lock().unwrap();
                items
                    .values()
                    .find(|i| i.template_id() == item.template_id())
                    .cloned()
            };
            if let Some(stack) = existing {
                let add = item.state().count;
                let mut st = stack.state();
                st.count += add;
                let mut gone = item.state();
                gone.count = 0;
                gone.location = ItemLocation::Void;
                drop(st);
                drop(gone);
                return Ok(stack);
            }
        }

        if !self.validate_capacity(1) {
            return Err(InventoryError::InventoryFull);
        }

        {
            let mut st = item.state();
            st.owner_id = self.owner_id;
            st.location = ItemLocation::Inventory;
        }
        self.items
            .lock()
            .unwrap()
            .insert(item.object_id(), Arc::clone(&item));
        Ok(item)
    }

    /// Create `count` of a stackable template in this container.
    pub fn grant(&self, template_id: u32, count: u64) -> Result<Arc<Item>, InventoryError> {
        if count == 0 {
            return Err(InventoryError::IllegalCount(0));
        }
        self.deposit(Item::stackable(template_id, count, self.owner_id))
    }

    /// Destroy `count` of an item, taking the item lock internally.
    /// Returns the remaining count.
    pub fn destroy_item(&self, object_id: u32, count: u64) -> Result<u64, InventoryError> {
        let item = self
            .item(object_id)
            .ok_or(InventoryError::ItemNotFound { object_id })?;
        let mut st = item.state();
        self.destroy_locked(&item, &mut st, count)
    }

    /// Destroy under an already-held item lock (last validation included).
    pub fn destroy_locked(
        &self,
        item: &Arc<Item>,
        st: &mut ItemState,
        count: u64,
    ) -> Result<u64, InventoryError> {
        let object_id = item.object_id();
        if count == 0 {
            return Err(InventoryError::IllegalCount(0));
        }
        if st.owner_id != self.owner_id {
            return Err(InventoryError::NotOwner { object_id });
        }
        if st.location != ItemLocation::Inventory && st.location != ItemLocation::Equipped {
            return Err(InventoryError::BadLocation { object_id });
        }
        if st.count < count {
            return Err(InventoryError::InsufficientCount {
                object_id,
                have: st.count,
                want: count,
            });
        }

        st.count -= count;
        if st.count == 0 {
            st.location = ItemLocation::Void;
            self.items.lock().unwrap().remove(&object_id);
        }
        Ok(st.count)
    }

    /// Move `count` of an item into `to`, under an already-held item lock.
    ///
    /// Whole-count moves re-home the same object; partial moves split off a
    /// new stack. No merging here — that would need a second item lock
    /// while one is already held.
    pub fn transfer_locked(
        &self,
        item: &Arc<Item>,
        st: &mut ItemState,
        count: u64,
        to: &Inventory,
    ) -> Result<Arc<Item>, InventoryError> {
        let object_id = item.object_id();
        if count == 0 {
            return Err(InventoryError::IllegalCount(0));
        }
        if st.owner_id != self.owner_id {
            return Err(InventoryError::NotOwner { object_id });
        }
        if st.location != ItemLocation::Inventory {
            return Err(InventoryError::BadLocation { object_id });
        }
        if st.count < count {
            return Err(InventoryError::InsufficientCount {
                object_id,
                have: st.count,
                want: count,
            });
        }
        if !to.validate_capacity(1) {
            return Err(InventoryError::InventoryFull);
        }

        if st.count == count {
            self.items.lock().unwrap().remove(&object_id);
            st.owner_id = to.owner_id;
            to.items
                .lock()
                .unwrap()
                .insert(object_id, Arc::clone(item));
            Ok(Arc::clone(item))
        } else {
            st.count -= count;
            let split = Item::stackable(item.template_id(), count, to.owner_id);
            to.items
                .lock()
                .unwrap()
                .insert(split.object_id(), Arc::clone(&split));
            Ok(split)
        }
    }

    pub fn adena(&self) -> u64 {
        *self.adena.lock().unwrap()
    }

    pub fn add_adena(&self, amount: u64) {
        *self.adena.lock().unwrap() += amount;
    }

    /// Debit adena; fails without mutation when short.
    pub fn reduce_adena(&self, amount: u64) -> Result<(), InventoryError> {
        let mut adena = self.adena.lock().unwrap();
        if *adena < amount {
            return Err(InventoryError::InsufficientAdena {
                have: *adena,
                want: amount,
            });
        }
        *adena -= amount;
        Ok(())
    }
}
