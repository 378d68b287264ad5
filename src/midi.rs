//! MIDI short message helpers
//!
//! Provides the 3-byte short message view used by the router, plus formatting
//! helpers for logs and the editor.

use std::fmt;

/// Status byte of a note-off on channel 0
pub const NOTE_OFF: u8 = 0x80;

/// Status byte of a note-on on channel 0
pub const NOTE_ON: u8 = 0x90;

/// Highest MIDI channel id (channels are 0-15 internally)
pub const MAX_CHANNEL: u8 = 0x0F;

/// Highest 7-bit data value (note numbers, velocities)
pub const MAX_DATA: u8 = 0x7F;

/// A MIDI short message: `[status, data1, data2]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortMessage([u8; 3]);

impl ShortMessage {
    /// Build a message from its three bytes
    pub const fn new(status: u8, data1: u8, data2: u8) -> Self {
        Self([status, data1, data2])
    }

    /// View the first three bytes of `data` as a short message.
    ///
    /// Returns `None` when fewer than three bytes are available. Extra bytes
    /// are ignored.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        match data {
            [status, data1, data2, ..] => Some(Self([*status, *data1, *data2])),
            _ => None,
        }
    }

    pub fn status(&self) -> u8 {
        self.0[0]
    }

    pub fn data1(&self) -> u8 {
        self.0[1]
    }

    pub fn data2(&self) -> u8 {
        self.0[2]
    }

    /// Channel nibble of the status byte (0-15)
    pub fn channel(&self) -> u8 {
        self.status() & 0x0F
    }

    /// True for the note-on/off family handled by the rewrite engine:
    /// status bytes `0x90..=0x9F`.
    pub fn is_note_event(&self) -> bool {
        is_note_status(self.status())
    }

    /// Replace the channel nibble, keeping the message type
    pub fn with_channel(self, channel: u8) -> Self {
        let [status, data1, data2] = self.0;
        Self([(status & 0xF0) | (channel & MAX_CHANNEL), data1, data2])
    }

    /// Replace the first data byte (the note number for note events)
    pub fn with_data1(self, value: u8) -> Self {
        let [status, _, data2] = self.0;
        Self([status, value & MAX_DATA, data2])
    }

    pub fn as_bytes(&self) -> &[u8; 3] {
        &self.0
    }
}

impl fmt::Display for ShortMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status() & 0xF0 {
            NOTE_ON if self.data2() == 0 => {
                write!(f, "NoteOff ch:{} n:{} v:0", self.channel(), self.data1())
            }
            NOTE_ON => write!(
                f,
                "NoteOn ch:{} n:{} v:{}",
                self.channel(),
                self.data1(),
                self.data2()
            ),
            NOTE_OFF => write!(
                f,
                "NoteOff ch:{} n:{} v:{}",
                self.channel(),
                self.data1(),
                self.data2()
            ),
            _ => write!(f, "{}", format_hex(&self.0)),
        }
    }
}

/// True for note-on status bytes on any channel
pub fn is_note_status(status: u8) -> bool {
    status & 0xF0 == NOTE_ON
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Conventional name of a MIDI note number (60 = C4)
pub fn note_name(note: u8) -> String {
    const NAMES: [&str; 12] = [
        "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
    ];
    let octave = (note / 12) as i8 - 1;
    format!("{}{}", NAMES[(note % 12) as usize], octave)
}
