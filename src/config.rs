//! Flood-protection configuration
//!
//! One [`FloodSettings`] record per rate-limited action category, collected
//! in a [`FloodConfig`] table parsed from YAML. The table is loaded once at
//! server start, validated, and shared by `Arc` across every connection;
//! it is never mutated afterwards.
//!
//! serde does all the parsing — each category falls back to a production
//! default when the YAML omits it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::network::flood::FloodAction;

/// Punishment applied when a category's violation limit is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Punishment {
    /// Count violations but never punish.
    None,
    /// Disconnect the offending session immediately.
    Kick,
    /// Enqueue an account-level ban.
    Ban,
    /// Enqueue a character-level jail.
    Jail,
}

/// Per-category governor settings. Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloodSettings {
    /// Minimum ticks between two accepted actions.
    pub interval: u64,
    /// Emit a warning line per violation episode.
    #[serde(default)]
    pub log_flooding: bool,
    /// Violations before punishment fires. 0 disables punishment.
    #[serde(default)]
    pub punishment_limit: u32,
    /// What to do when the limit is reached.
    #[serde(default = "default_punishment")]
    pub punishment: Punishment,
    /// Ban/jail duration in seconds. Zero or negative means permanent.
    #[serde(default)]
    pub punishment_seconds: i64,
}

fn default_punishment() -> Punishment {
    Punishment::None
}

impl FloodSettings {
    /// A plain interval-only record (no logging, no punishment).
    pub fn interval_only(interval: u64) -> Self {
        Self {
            interval,
            log_flooding: false,
            punishment_limit: 0,
            punishment: Punishment::None,
            punishment_seconds: 0,
        }
    }
}

/// The full flood-protection table, one entry per [`FloodAction`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloodConfig {
    #[serde(default = "default_use_item")]
    pub use_item: FloodSettings,
    #[serde(default = "default_drop_item")]
    pub drop_item: FloodSettings,
    #[serde(default = "default_transaction")]
    pub transaction: FloodSettings,
    #[serde(default = "default_manufacture")]
    pub manufacture: FloodSettings,
    #[serde(default = "default_server_bypass")]
    pub server_bypass: FloodSettings,
    #[serde(default = "default_multisell")]
    pub multisell: FloodSettings,
    #[serde(default = "default_send_mail")]
    pub send_mail: FloodSettings,
    #[serde(default = "default_roll_dice")]
    pub roll_dice: FloodSettings,
    #[serde(default = "default_character_select")]
    pub character_select: FloodSettings,
    #[serde(default = "default_item_auction")]
    pub item_auction: FloodSettings,
    #[serde(default = "default_player_action")]
    pub player_action: FloodSettings,
    #[serde(default = "default_global_chat")]
    pub global_chat: FloodSettings,
    #[serde(default = "default_hero_voice")]
    pub hero_voice: FloodSettings,
    #[serde(default = "default_subclass_change")]
    pub subclass_change: FloodSettings,
    #[serde(default = "default_pet_summon_item")]
    pub pet_summon_item: FloodSettings,
}

// ============================================
// Default value functions
// Intervals are in game ticks (100ms each).
// ============================================

fn default_use_item() -> FloodSettings {
    FloodSettings::interval_only(4)
}

fn default_drop_item() -> FloodSettings {
    FloodSettings::interval_only(10)
}

fn default_transaction() -> FloodSettings {
    FloodSettings {
        log_flooding: true,
        ..FloodSettings::interval_only(10)
    }
}

fn default_manufacture() -> FloodSettings {
    FloodSettings::interval_only(3)
}

fn default_server_bypass() -> FloodSettings {
    FloodSettings::interval_only(5)
}

fn default_multisell() -> FloodSettings {
    FloodSettings::interval_only(1)
}

fn default_send_mail() -> FloodSettings {
    FloodSettings::interval_only(100)
}

fn default_roll_dice() -> FloodSettings {
    FloodSettings::interval_only(42)
}

fn default_character_select() -> FloodSettings {
    FloodSettings {
        log_flooding: true,
        ..FloodSettings::interval_only(30)
    }
}

fn default_item_auction() -> FloodSettings {
    FloodSettings::interval_only(9)
}

fn default_player_action() -> FloodSettings {
    FloodSettings::interval_only(3)
}

fn default_global_chat() -> FloodSettings {
    FloodSettings::interval_only(5)
}

fn default_hero_voice() -> FloodSettings {
    FloodSettings::interval_only(100)
}

fn default_subclass_change() -> FloodSettings {
    FloodSettings::interval_only(20)
}

fn default_pet_summon_item() -> FloodSettings {
    FloodSettings::interval_only(16)
}

impl Default for FloodConfig {
    fn default() -> Self {
        // same default functions serde falls back to for an empty mapping
        Self {
            use_item: default_use_item(),
            drop_item: default_drop_item(),
            transaction: default_transaction(),
            manufacture: default_manufacture(),
            server_bypass: default_server_bypass(),
            multisell: default_multisell(),
            send_mail: default_send_mail(),
            roll_dice: default_roll_dice(),
            character_select: default_character_select(),
            item_auction: default_item_auction(),
            player_action: default_player_action(),
            global_chat: default_global_chat(),
            hero_voice: default_hero_voice(),
            subclass_change: default_subclass_change(),
            pet_summon_item: default_pet_summon_item(),
        }
    }
}

impl FloodConfig {
    /// Load the table from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read flood config: {}", path.display()))?;

        Self::from_str(&contents)
            .with_context(|| format!("Failed to parse flood config: {}", path.display()))
    }

    /// Parse the table from a YAML string. Useful for testing.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self> {
        let config: FloodConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML")?;

        config.validate()?;

        Ok(config)
    }

    /// Save the table to a YAML file (template generation).
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml =
            serde_yaml::to_string(&self).context("Failed to serialize flood config")?;

        fs::write(path.as_ref(), yaml)
            .with_context(|| format!("Failed to write {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Settings for one action category.
    pub fn settings(&self, action: FloodAction) -> &FloodSettings {
        match action {
            FloodAction::UseItem => &self.use_item,
            FloodAction::DropItem => &self.drop_item,
            FloodAction::Transaction => &self.transaction,
            FloodAction::Manufacture => &self.manufacture,
            FloodAction::ServerBypass => &self.server_bypass,
            FloodAction::Multisell => &self.multisell,
            FloodAction::SendMail => &self.send_mail,
            FloodAction::CharacterSelect => &self.character_select,
            FloodAction::RollDice => &self.roll_dice,
            FloodAction::ItemAuction => &self.item_auction,
            FloodAction::PlayerAction => &self.player_action,
            FloodAction::GlobalChat => &self.global_chat,
            FloodAction::HeroVoice => &self.hero_voice,
            FloodAction::SubclassChange => &self.subclass_change,
            FloodAction::PetSummonItem => &self.pet_summon_item,
        }
    }

    fn validate(&self) -> Result<()> {
        for action in FloodAction::ALL {
            let s = self.settings(action);
            anyhow::ensure!(
                s.punishment == Punishment::None || s.punishment_limit > 0,
                "{}: punishment {:?} configured but punishment_limit is 0",
                action.key(),
                s.punishment
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_gives_defaults() {
        let config = FloodConfig::from_str("{}").unwrap();
        assert_eq!(config.use_item.interval, 4);
        assert_eq!(config.roll_dice.interval, 42);
        assert!(config.transaction.log_flooding);
        assert_eq!(config.transaction.punishment, Punishment::None);
    }

    #[test]
    fn test_default_matches_empty_parse() {
        let built = FloodConfig::default();
        let parsed = FloodConfig::from_str("{}").unwrap();
        for action in FloodAction::ALL {
            let (b, p) = (built.settings(action), parsed.settings(action));
            assert_eq!(b.interval, p.interval, "{}", action.key());
            assert_eq!(b.log_flooding, p.log_flooding, "{}", action.key());
            assert_eq!(b.punishment_limit, p.punishment_limit, "{}", action.key());
            assert_eq!(b.punishment, p.punishment, "{}", action.key());
            assert_eq!(b.punishment_seconds, p.punishment_seconds, "{}", action.key());
        }
        assert_eq!(built.hero_voice.interval, 100);
        assert_eq!(built.pet_summon_item.interval, 16);
    }

    #[test]
    fn test_partial_override() {
        let yaml = r#"
transaction:
  interval: 20
  log_flooding: true
  punishment_limit: 5
  punishment: kick
"#;
        let config = FloodConfig::from_str(yaml).unwrap();
        assert_eq!(config.transaction.interval, 20);
        assert_eq!(config.transaction.punishment_limit, 5);
        assert_eq!(config.transaction.punishment, Punishment::Kick);
        // untouched categories keep their defaults
        assert_eq!(config.use_item.interval, 4);
    }

    #[test]
    fn test_punishment_without_limit_rejected() {
        let yaml = r#"
use_item:
  interval: 4
  punishment: ban
"#;
        let result = FloodConfig::from_str(yaml);
        assert!(result.is_err());

        let msg = format!("{}", result.unwrap_err());
        assert!(msg.contains("punishment_limit"));
    }

    #[test]
    fn test_unknown_punishment_kind_rejected() {
        let yaml = r#"
use_item:
  interval: 4
  punishment: flog
  punishment_limit: 1
"#;
        assert!(FloodConfig::from_str(yaml).is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let config = FloodConfig::default();
        let temp = std::env::temp_dir().join("test_flood_config.yaml");

        config.save(&temp).unwrap();
        let loaded = FloodConfig::from_file(&temp).unwrap();

        assert_eq!(loaded.use_item.interval, config.use_item.interval);
        assert_eq!(loaded.send_mail.interval, config.send_mail.interval);

        std::fs::remove_file(temp).ok();
    }

    #[test]
    fn test_permanent_ban_seconds() {
        let yaml = r#"
global_chat:
  interval: 5
  punishment_limit: 3
  punishment: ban
  punishment_seconds: -1
"#;
        let config = FloodConfig::from_str(yaml).unwrap();
        assert_eq!(config.global_chat.punishment_seconds, -1);
    }
}
