//! midi-red - redirect MIDI notes between devices
//!
//! Incoming note-on/off messages are looked up in a [`RuleStore`] by
//! (channel, note) and either rewritten to a new channel and/or note, or
//! dropped when no rule is configured.

pub mod config;
pub mod devices;
pub mod editor;
pub mod error;
pub mod midi;
pub mod router;
pub mod rules;

pub use error::{DeviceError, EditError};
pub use router::{DropReason, MessageRouter, MessageSink, MessageSource, NonNotePolicy, Route};
pub use rules::{NoteMap, Rule, RuleStore, SharedRuleStore};
