//! Rewrite rule storage
//!
//! Rules are stored in a two-level mapping, channel → note → [`Rule`]. The
//! real-time path reads through [`RuleStore::get_note_config`], which never
//! creates entries; the editing path creates them through
//! [`RuleStore::get_or_create_note_config`].
//!
//! The store remembers the last resolved channel and the last resolved
//! (channel, note) pair. Sustained notes and repeated hits on the same pad
//! resolve without walking either map. Cached values are slot indices, not
//! copies, so a rule edited in place is never served stale.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Store shared between the real-time path and the editor
pub type SharedRuleStore = Arc<Mutex<RuleStore>>;

/// Rewrite configuration for one (channel, note) pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rule {
    /// Output channel (0-15), `None` keeps the incoming channel
    pub replace_channel: Option<u8>,
    /// Output note (0-127), `None` keeps the incoming note
    pub replace_note: Option<u8>,
}

impl Rule {
    pub fn new(replace_channel: Option<u8>, replace_note: Option<u8>) -> Self {
        Self {
            replace_channel,
            replace_note,
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.replace_channel {
            Some(channel) => write!(f, "channel → {}", channel)?,
            None => write!(f, "channel → keep")?,
        }
        match self.replace_note {
            Some(note) => write!(f, ", note → {}", note),
            None => write!(f, ", note → keep"),
        }
    }
}

/// Rules configured under one channel, keyed by note number
#[derive(Debug, Default)]
pub struct NoteMap {
    index: BTreeMap<u8, usize>,
    rules: Vec<Rule>,
}

impl NoteMap {
    pub fn contains(&self, note: u8) -> bool {
        self.index.contains_key(&note)
    }

    pub fn get(&self, note: u8) -> Option<&Rule> {
        self.index.get(&note).map(|&slot| &self.rules[slot])
    }

    /// Rules in note order
    pub fn iter(&self) -> impl Iterator<Item = (u8, &Rule)> + '_ {
        self.index
            .iter()
            .map(move |(&note, &slot)| (note, &self.rules[slot]))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn slot_or_insert(&mut self, note: u8) -> usize {
        if let Some(&slot) = self.index.get(&note) {
            return slot;
        }
        let slot = self.rules.len();
        self.rules.push(Rule::default());
        self.index.insert(note, slot);
        slot
    }
}

/// Location of a rule: (note map slot, rule slot within that map)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RuleRef {
    map: usize,
    rule: usize,
}

/// Two-level rule mapping with a single-slot lookup cache per level
#[derive(Debug)]
pub struct RuleStore {
    channels: BTreeMap<u8, usize>,
    note_maps: Vec<NoteMap>,
    cache_enabled: bool,
    channel_cache: Option<(u8, Option<usize>)>,
    note_cache: Option<((u8, u8), Option<RuleRef>)>,
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleStore {
    /// Create an empty store with the lookup cache enabled
    pub fn new() -> Self {
        Self::with_cache(true)
    }

    /// Create an empty store that always walks the maps
    pub fn without_cache() -> Self {
        Self::with_cache(false)
    }

    pub fn with_cache(cache_enabled: bool) -> Self {
        Self {
            channels: BTreeMap::new(),
            note_maps: Vec::new(),
            cache_enabled,
            channel_cache: None,
            note_cache: None,
        }
    }

    /// Wrap the store for sharing between the router and the editor
    pub fn into_shared(self) -> SharedRuleStore {
        Arc::new(Mutex::new(self))
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache_enabled
    }

    /// True if any note is configured under `channel`
    pub fn has(&self, channel: u8) -> bool {
        self.channels.contains_key(&channel)
    }

    /// Note map of `channel`, without creating one
    pub fn get(&mut self, channel: u8) -> Option<&NoteMap> {
        self.resolve_channel(channel)
            .map(|slot| &self.note_maps[slot])
    }

    /// Note map of `channel`, created empty when missing
    pub fn get_or_create(&mut self, channel: u8) -> &mut NoteMap {
        let slot = self.channel_slot_or_create(channel);
        &mut self.note_maps[slot]
    }

    /// True if a rule exists for (`channel`, `note`). Bypasses the cache.
    pub fn has_note_config(&self, channel: u8, note: u8) -> bool {
        self.channels
            .get(&channel)
            .is_some_and(|&slot| self.note_maps[slot].contains(note))
    }

    /// Rule for (`channel`, `note`), without creating anything.
    ///
    /// This is the real-time lookup. The note cache is refreshed on hits and
    /// misses alike, including when the channel has no rules at all.
    pub fn get_note_config(&mut self, channel: u8, note: u8) -> Option<&Rule> {
        let found = match self.cached_rule(channel, note) {
            Some(cached) => cached,
            None => {
                let found = self.resolve_channel(channel).and_then(|map| {
                    self.note_maps[map]
                        .index
                        .get(&note)
                        .map(|&rule| RuleRef { map, rule })
                });
                if self.cache_enabled {
                    self.note_cache = Some(((channel, note), found));
                }
                found
            }
        };

        found.map(|r| &self.note_maps[r.map].rules[r.rule])
    }

    /// Rule for (`channel`, `note`), created with "keep" defaults when
    /// missing. Repeated calls for the same key return the same rule, so
    /// edits made through the returned reference stick.
    pub fn get_or_create_note_config(&mut self, channel: u8, note: u8) -> &mut Rule {
        if let Some(Some(r)) = self.cached_rule(channel, note) {
            return &mut self.note_maps[r.map].rules[r.rule];
        }

        let map = self.channel_slot_or_create(channel);
        let rule = self.note_maps[map].slot_or_insert(note);
        if self.cache_enabled {
            self.note_cache = Some(((channel, note), Some(RuleRef { map, rule })));
        }

        &mut self.note_maps[map].rules[rule]
    }

    /// Configured channels in channel order
    pub fn channels(&self) -> impl Iterator<Item = (u8, &NoteMap)> + '_ {
        self.channels
            .iter()
            .map(move |(&channel, &slot)| (channel, &self.note_maps[slot]))
    }

    /// Number of configured rules across all channels
    pub fn len(&self) -> usize {
        self.note_maps.iter().map(NoteMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached result for exactly (`channel`, `note`), if any.
    /// The outer `Option` is the cache hit, the inner one the lookup result.
    fn cached_rule(&self, channel: u8, note: u8) -> Option<Option<RuleRef>> {
        if !self.cache_enabled {
            return None;
        }
        match self.note_cache {
            Some((key, found)) if key == (channel, note) => Some(found),
            _ => None,
        }
    }

    fn resolve_channel(&mut self, channel: u8) -> Option<usize> {
        if self.cache_enabled {
            if let Some((cached, slot)) = self.channel_cache {
                if cached == channel {
                    return slot;
                }
            }
        }

        let slot = self.channels.get(&channel).copied();
        if self.cache_enabled {
            self.channel_cache = Some((channel, slot));
        }
        slot
    }

    fn channel_slot_or_create(&mut self, channel: u8) -> usize {
        let slot = match self.resolve_channel(channel) {
            Some(slot) => slot,
            None => {
                let slot = self.note_maps.len();
                self.note_maps.push(NoteMap::default());
                self.channels.insert(channel, slot);
                slot
            }
        };
        if self.cache_enabled {
            self.channel_cache = Some((channel, Some(slot)));
        }
        slot
    }
}
