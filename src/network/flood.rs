//! Flood protection
//!
//! One [`FloodProtector`] per (connection, action category) pair tracks the
//! next allowed game tick and a violation counter, and escalates to a
//! configured punishment when a client keeps hammering a category.
//!
//! Denial is deliberately silent: a rate-limited packet is dropped without
//! any response, so automated clients cannot probe for the limit. Callers
//! treat `false` as "do nothing", never as an error.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::{FloodConfig, FloodSettings, Punishment};
use crate::core::{GameClock, TICK_MS};
use crate::network::punish::{
    expiry_from_seconds, PunishKind, PunishTarget, PunishmentOrder, PunishmentSink,
};
use crate::session::Session;

/// Rate-limited action categories. Closed set, known at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloodAction {
    UseItem,
    DropItem,
    Transaction,
    Manufacture,
    ServerBypass,
    Multisell,
    SendMail,
    RollDice,
    CharacterSelect,
    ItemAuction,
    PlayerAction,
    GlobalChat,
    HeroVoice,
    SubclassChange,
    PetSummonItem,
}

impl FloodAction {
    /// Number of categories; sizes the per-connection governor array.
    pub const COUNT: usize = 15;

    /// All categories, in array-index order.
    pub const ALL: [FloodAction; Self::COUNT] = [
        FloodAction::UseItem,
        FloodAction::DropItem,
        FloodAction::Transaction,
        FloodAction::Manufacture,
        FloodAction::ServerBypass,
        FloodAction::Multisell,
        FloodAction::SendMail,
        FloodAction::RollDice,
        FloodAction::CharacterSelect,
        FloodAction::ItemAuction,
        FloodAction::PlayerAction,
        FloodAction::GlobalChat,
        FloodAction::HeroVoice,
        FloodAction::SubclassChange,
        FloodAction::PetSummonItem,
    ];

    /// Stable lowercase key used in config files and log lines.
    pub fn key(self) -> &'static str {
        match self {
            FloodAction::UseItem => "use_item",
            FloodAction::DropItem => "drop_item",
            FloodAction::Transaction => "transaction",
            FloodAction::Manufacture => "manufacture",
            FloodAction::ServerBypass => "server_bypass",
            FloodAction::Multisell => "multisell",
            FloodAction::SendMail => "send_mail",
            FloodAction::RollDice => "roll_dice",
            FloodAction::CharacterSelect => "character_select",
            FloodAction::ItemAuction => "item_auction",
            FloodAction::PlayerAction => "player_action",
            FloodAction::GlobalChat => "global_chat",
            FloodAction::HeroVoice => "hero_voice",
            FloodAction::SubclassChange => "subclass_change",
            FloodAction::PetSummonItem => "pet_summon_item",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Per-(connection, category) request governor.
///
/// Never shared across connections; concurrent calls from the owning
/// connection's handler threads are expected, so all state is atomic.
pub struct FloodProtector {
    action: FloodAction,
    settings: FloodSettings,
    clock: Arc<GameClock>,
    punishments: PunishmentSink,
    /// First tick at which the next action is accepted.
    next_allowed_tick: AtomicU64,
    /// Violations since the last accepted action.
    violations: AtomicU32,
    /// Set while a punishment is being applied.
    punishing: AtomicBool,
    /// One warning line per violation episode.
    logged: AtomicBool,
}

impl FloodProtector {
    pub fn new(
        action: FloodAction,
        settings: FloodSettings,
        clock: Arc<GameClock>,
        punishments: PunishmentSink,
    ) -> Self {
        Self {
            action,
            settings,
            clock,
            punishments,
            next_allowed_tick: AtomicU64::new(0),
            violations: AtomicU32::new(0),
            punishing: AtomicBool::new(false),
            logged: AtomicBool::new(false),
        }
    }

    /// The boolean gate. `true` means the action may proceed; `false`
    /// means the caller must drop the packet without any state change.
    pub fn can_perform(&self, session: &Session) -> bool {
        // Privileged actors are never throttled.
        if session.is_gm() {
            return true;
        }

        let now = self.clock.now();

        // The window is claimed with a CAS, so two same-tick packets
        // cannot both slip through one interval.
        loop {
            let next = self.next_allowed_tick.load(Ordering::Acquire);

            if now < next || self.punishing.load(Ordering::Acquire) {
                if self.settings.log_flooding && !self.logged.swap(true, Ordering::AcqRel) {
                    tracing::warn!(
                        "[flood] [{}] [denied] who={} after={}ms min_interval={}ms",
                        self.action.key(),
                        session.identity(),
                        ticks_since_accept(self.settings.interval, next, now) * TICK_MS,
                        self.settings.interval * TICK_MS,
                    );
                }

                // fetch_add hands out unique counts, so exactly one caller
                // observes the configured limit.
                let count = self.violations.fetch_add(1, Ordering::AcqRel) + 1;
                if self.settings.punishment_limit > 0
                    && count == self.settings.punishment_limit
                    && !self.punishing.swap(true, Ordering::AcqRel)
                {
                    self.apply_punishment(session);
                    // Whatever happened above, the governor must not stay locked.
                    self.punishing.store(false, Ordering::Release);
                }

                return false;
            }

            if self
                .next_allowed_tick
                .compare_exchange(
                    next,
                    now + self.settings.interval,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                break;
            }
            // lost the claim race; re-evaluate against the new window
        }

        let flooded = self.violations.swap(0, Ordering::AcqRel);
        if self.settings.log_flooding && flooded > 0 {
            tracing::warn!(
                "[flood] [{}] [summary] who={} extra={} within={}ms",
                self.action.key(),
                session.identity(),
                flooded,
                self.settings.interval * TICK_MS,
            );
        }

        self.logged.store(false, Ordering::Release);
        true
    }

    fn apply_punishment(&self, session: &Session) {
        let source = format!("flood:{}", self.action.key());
        let reason = "flood protection limit exceeded".to_string();

        match self.settings.punishment {
            Punishment::None => {}
            Punishment::Kick => {
                tracing::warn!(
                    "[flood] [{}] [kick] who={}",
                    self.action.key(),
                    session.identity()
                );
                session.close();
            }
            Punishment::Ban => match session.account() {
                Some(account) => {
                    self.punishments.enqueue(PunishmentOrder {
                        target: PunishTarget::Account(account),
                        kind: PunishKind::Ban,
                        expires_at: expiry_from_seconds(self.settings.punishment_seconds),
                        reason,
                        source,
                    });
                    session.close();
                }
                // Not authenticated yet; nothing to ban, so just drop them.
                None => {
                    tracing::warn!(
                        "[flood] [{}] [ban_fallback_kick] who={}",
                        self.action.key(),
                        session.identity()
                    );
                    session.close();
                }
            },
            Punishment::Jail => match session.character() {
                Some((name, id)) => {
                    self.punishments.enqueue(PunishmentOrder {
                        target: PunishTarget::Character { id, name },
                        kind: PunishKind::Jail,
                        expires_at: expiry_from_seconds(self.settings.punishment_seconds),
                        reason,
                        source,
                    });
                }
                None => {
                    tracing::warn!(
                        "[flood] [{}] [jail_fallback_kick] who={}",
                        self.action.key(),
                        session.identity()
                    );
                    session.close();
                }
            },
        }
    }

    #[cfg(test)]
    pub(crate) fn violation_count(&self) -> u32 {
        self.violations.load(Ordering::Acquire)
    }
}

/// Ticks elapsed since the last accepted action, reconstructed from the end
/// of its window (`next = accepted + interval`).
fn ticks_since_accept(interval: u64, next: u64, now: u64) -> u64 {
    interval.saturating_sub(next.saturating_sub(now))
}

/// Per-connection bundle: exactly one governor per category.
pub struct FloodProtectors {
    protectors: [FloodProtector; FloodAction::COUNT],
}

impl FloodProtectors {
    pub fn new(
        config: &FloodConfig,
        clock: &Arc<GameClock>,
        punishments: &PunishmentSink,
    ) -> Self {
        Self {
            protectors: FloodAction::ALL.map(|action| {
                FloodProtector::new(
                    action,
                    config.settings(action).clone(),
                    Arc::clone(clock),
                    punishments.clone(),
                )
            }),
        }
    }

    /// Gate for an explicit category.
    pub fn can_perform(&self, action: FloodAction, session: &Session) -> bool {
        self.protectors[action.index()].can_perform(session)
    }

    pub fn can_use_item(&self, session: &Session) -> bool {
        self.can_perform(FloodAction::UseItem, session)
    }

    pub fn can_drop_item(&self, session: &Session) -> bool {
        self.can_perform(FloodAction::DropItem, session)
    }

    pub fn can_perform_transaction(&self, session: &Session) -> bool {
        self.can_perform(FloodAction::Transaction, session)
    }

    pub fn can_manufacture(&self, session: &Session) -> bool {
        self.can_perform(FloodAction::Manufacture, session)
    }

    pub fn can_use_server_bypass(&self, session: &Session) -> bool {
        self.can_perform(FloodAction::ServerBypass, session)
    }

    pub fn can_use_multisell(&self, session: &Session) -> bool {
        self.can_perform(FloodAction::Multisell, session)
    }

    pub fn can_send_mail(&self, session: &Session) -> bool {
        self.can_perform(FloodAction::SendMail, session)
    }

    pub fn can_roll_dice(&self, session: &Session) -> bool {
        self.can_perform(FloodAction::RollDice, session)
    }

    pub fn can_select_character(&self, session: &Session) -> bool {
        self.can_perform(FloodAction::CharacterSelect, session)
    }

    pub fn can_use_item_auction(&self, session: &Session) -> bool {
        self.can_perform(FloodAction::ItemAuction, session)
    }

    pub fn can_perform_player_action(&self, session: &Session) -> bool {
        self.can_perform(FloodAction::PlayerAction, session)
    }

    pub fn can_use_global_chat(&self, session: &Session) -> bool {
        self.can_perform(FloodAction::GlobalChat, session)
    }

    pub fn can_use_hero_voice(&self, session: &Session) -> bool {
        self.can_perform(FloodAction::HeroVoice, session)
    }

    pub fn can_change_subclass(&self, session: &Session) -> bool {
        self.can_perform(FloodAction::SubclassChange, session)
    }

    pub fn can_use_pet_summon_item(&self, session: &Session) -> bool {
        self.can_perform(FloodAction::PetSummonItem, session)
    }
}
