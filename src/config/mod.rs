//! Configuration management for midi-red
//!
//! Handles loading, validation and hot-reloading of the YAML configuration:
//! device selection, routing policy and the initial rule set. Rules edited
//! at runtime are never written back.

pub mod watcher;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::warn;

use crate::midi::{MAX_CHANNEL, MAX_DATA};
use crate::router::NonNotePolicy;
use crate::rules::RuleStore;

pub use watcher::ConfigWatcher;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub midi: MidiConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

/// MIDI port selection (index or case-insensitive name substring)
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct MidiConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_port: Option<String>,
}

/// Routing behaviour
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RoutingConfig {
    /// Non-note messages: `drop` or `pass_through`
    #[serde(default)]
    pub non_note: NonNotePolicy,
    /// Remember the last looked-up rule
    #[serde(default = "default_true")]
    pub lookup_cache: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            non_note: NonNotePolicy::default(),
            lookup_cache: default_true(),
        }
    }
}

/// One rewrite rule. Channels are 0-15.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RuleConfig {
    pub channel: u8,
    pub note: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace_channel: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace_note: Option<u8>,
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_yaml(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Load configuration, falling back to defaults when the file is missing
    pub async fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !fs::try_exists(path).await.unwrap_or(false) {
            warn!(
                "Config file {} not found, starting with no rules",
                path.display()
            );
            return Ok(Self::default());
        }
        Self::load(path).await
    }

    /// Parse and validate YAML
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration for correctness
    pub fn validate(&self) -> Result<()> {
        for (field, port) in [
            ("input_port", &self.midi.input_port),
            ("output_port", &self.midi.output_port),
        ] {
            if port.as_deref().is_some_and(|p| p.trim().is_empty()) {
                anyhow::bail!("MIDI {} cannot be empty (omit it instead)", field);
            }
        }

        for (idx, rule) in self.rules.iter().enumerate() {
            rule.validate()
                .with_context(|| format!("Invalid rule #{}", idx + 1))?;
        }

        Ok(())
    }

    /// Apply the configured rules through the editing path.
    ///
    /// Existing rules are overwritten, rules missing from the file are kept.
    pub fn apply_rules(&self, store: &mut RuleStore) -> usize {
        for rule in &self.rules {
            let target = store.get_or_create_note_config(rule.channel, rule.note);
            target.replace_channel = rule.replace_channel;
            target.replace_note = rule.replace_note;
        }
        self.rules.len()
    }
}

impl RuleConfig {
    fn validate(&self) -> Result<()> {
        if self.channel > MAX_CHANNEL {
            anyhow::bail!("channel {} is invalid (must be 0-15)", self.channel);
        }
        if self.note > MAX_DATA {
            anyhow::bail!("note {} is invalid (must be 0-127)", self.note);
        }
        if let Some(channel) = self.replace_channel {
            if channel > MAX_CHANNEL {
                anyhow::bail!("replace_channel {} is invalid (must be 0-15)", channel);
            }
        }
        if let Some(note) = self.replace_note {
            if note > MAX_DATA {
                anyhow::bail!("replace_note {} is invalid (must be 0-127)", note);
            }
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}
