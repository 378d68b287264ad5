//! Byte-level note rewrite
//!
//! Pure part of the routing decision: classify an incoming message and, for
//! configured notes, build the outgoing bytes. Dispatch lives in the router.

use crate::midi::{is_note_status, ShortMessage};
use crate::rules::{Rule, RuleStore};

use super::{DropReason, NonNotePolicy};

/// What to do with one incoming message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision<'a> {
    /// Send the rewritten note message
    Forward(ShortMessage),
    /// Send the incoming bytes unchanged (non-note traffic under
    /// [`NonNotePolicy::PassThrough`])
    PassThrough(&'a [u8]),
    Drop(DropReason),
}

/// Apply `rule` to a note message. Velocity is never touched.
pub fn rewrite(message: ShortMessage, rule: &Rule) -> ShortMessage {
    let message = match rule.replace_channel {
        Some(channel) => message.with_channel(channel),
        None => message,
    };
    match rule.replace_note {
        Some(note) => message.with_data1(note),
        None => message,
    }
}

/// Classify `data` and look up its rule
pub fn decide<'a>(data: &'a [u8], rules: &mut RuleStore, non_note: NonNotePolicy) -> Decision<'a> {
    let Some(&status) = data.first() else {
        return Decision::Drop(DropReason::Malformed);
    };

    let message = match ShortMessage::from_bytes(data) {
        Some(message) if message.is_note_event() => message,
        _ if is_note_status(status) => return Decision::Drop(DropReason::Malformed),
        _ => {
            return match non_note {
                NonNotePolicy::Drop => Decision::Drop(DropReason::NotNote),
                NonNotePolicy::PassThrough => Decision::PassThrough(data),
            }
        }
    };

    let channel = message.channel();
    let note = message.data1();
    match rules.get_note_config(channel, note) {
        Some(rule) => Decision::Forward(rewrite(message, rule)),
        None => Decision::Drop(DropReason::Unconfigured { channel, note }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(channel: u8, note: u8, rule: Rule) -> RuleStore {
        let mut store = RuleStore::new();
        *store.get_or_create_note_config(channel, note) = rule;
        store
    }

    #[test]
    fn test_replace_note_keeps_channel_and_velocity() {
        let mut store = store_with(9, 40, Rule::new(None, Some(69)));

        let decision = decide(&[0x99, 40, 100], &mut store, NonNotePolicy::Drop);
        assert_eq!(decision, Decision::Forward(ShortMessage::new(0x99, 69, 100)));
    }

    #[test]
    fn test_replace_channel_keeps_note() {
        let mut store = store_with(1, 50, Rule::new(Some(3), None));

        let decision = decide(&[0x91, 50, 64], &mut store, NonNotePolicy::Drop);
        assert_eq!(decision, Decision::Forward(ShortMessage::new(0x93, 50, 64)));
    }

    #[test]
    fn test_default_rule_forwards_unchanged() {
        let mut store = store_with(0, 60, Rule::default());

        let decision = decide(&[0x90, 60, 0], &mut store, NonNotePolicy::Drop);
        assert_eq!(decision, Decision::Forward(ShortMessage::new(0x90, 60, 0)));
    }

    #[test]
    fn test_unconfigured_note_is_dropped() {
        let mut store = store_with(5, 11, Rule::default());

        let decision = decide(&[0x95, 10, 80], &mut store, NonNotePolicy::Drop);
        assert_eq!(
            decision,
            Decision::Drop(DropReason::Unconfigured { channel: 5, note: 10 })
        );
    }

    #[test]
    fn test_non_note_policy() {
        let mut store = store_with(0, 7, Rule::new(Some(1), Some(8)));
        let cc = [0xB0, 7, 100];

        assert_eq!(
            decide(&cc, &mut store, NonNotePolicy::Drop),
            Decision::Drop(DropReason::NotNote)
        );
        assert_eq!(
            decide(&cc, &mut store, NonNotePolicy::PassThrough),
            Decision::PassThrough(&cc[..])
        );

        // Note-off (0x8n) is outside the rewritten family
        assert_eq!(
            decide(&[0x80, 7, 0], &mut store, NonNotePolicy::Drop),
            Decision::Drop(DropReason::NotNote)
        );
    }

    #[test]
    fn test_short_messages_are_malformed() {
        let mut store = RuleStore::new();

        assert_eq!(
            decide(&[], &mut store, NonNotePolicy::Drop),
            Decision::Drop(DropReason::Malformed)
        );
        assert_eq!(
            decide(&[0x90, 60], &mut store, NonNotePolicy::PassThrough),
            Decision::Drop(DropReason::Malformed)
        );
    }

    #[test]
    fn test_short_non_note_messages_follow_policy() {
        let mut store = RuleStore::new();
        let program_change = [0xC0, 5];

        assert_eq!(
            decide(&program_change, &mut store, NonNotePolicy::Drop),
            Decision::Drop(DropReason::NotNote)
        );
        assert_eq!(
            decide(&program_change, &mut store, NonNotePolicy::PassThrough),
            Decision::PassThrough(&program_change[..])
        );
        assert_eq!(
            decide(&[0xF8], &mut store, NonNotePolicy::PassThrough),
            Decision::PassThrough(&[0xF8][..])
        );
    }
}
