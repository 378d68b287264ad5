//! Router module - real-time note rewriting between one input and one output
//!
//! The router owns the active device binding and evaluates every incoming
//! short message against the shared [`RuleStore`](crate::rules::RuleStore):
//! - Configured (channel, note) pairs are rewritten and forwarded
//! - Unconfigured notes are dropped (allowlist policy)
//! - Non-note traffic follows the configured [`NonNotePolicy`]

mod rewrite;


pub use rewrite::{decide, rewrite, Decision};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::error::DeviceError;
use crate::midi::format_hex;
use crate::rules::SharedRuleStore;

thread_local! {
    /// Set while a router listener runs on the input's callback thread
    static IN_LISTENER: Cell<bool> = const { Cell::new(false) };
}

/// Callback receiving raw MIDI bytes from an input
pub type Listener = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// A device that delivers MIDI messages to one replaceable listener
pub trait MessageSource: Send {
    fn name(&self) -> &str;

    /// Start delivering messages to `listener`
    fn attach(&mut self, listener: Listener) -> Result<(), DeviceError>;

    /// Stop delivering messages. Once this returns the previous listener is
    /// never invoked again.
    fn detach(&mut self);
}

/// A device that accepts outgoing MIDI messages
pub trait MessageSink: Send {
    fn name(&self) -> &str;

    fn send(&mut self, message: &[u8]) -> Result<(), DeviceError>;
}

/// What happens to messages outside the note-on/off family
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NonNotePolicy {
    #[default]
    Drop,
    PassThrough,
}

/// Why a message produced no output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No output bound yet
    NoOutput,
    /// Empty message, or a note status with fewer than 3 bytes
    Malformed,
    /// Status outside `0x90..=0x9F` with [`NonNotePolicy::Drop`]
    NotNote,
    /// No rule configured for this (channel, note)
    Unconfigured { channel: u8, note: u8 },
}

/// Outcome of [`MessageRouter::handle_message`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Rewritten note sent to the output
    Forwarded([u8; 3]),
    /// Non-note message sent unchanged
    PassedThrough,
    Dropped(DropReason),
    /// The output rejected the message
    SendFailed,
}

/// Routes note messages from the bound input to the bound output
pub struct MessageRouter {
    /// Rewrite rules, shared with the editor
    rules: SharedRuleStore,
    /// Policy for non-note status bytes
    non_note: Mutex<NonNotePolicy>,
    /// Currently bound input (listener attached)
    input: Mutex<Option<Box<dyn MessageSource>>>,
    /// Currently bound output
    output: Mutex<Option<Box<dyn MessageSink>>>,
}

impl MessageRouter {
    pub fn new(rules: SharedRuleStore, non_note: NonNotePolicy) -> Self {
        Self {
            rules,
            non_note: Mutex::new(non_note),
            input: Mutex::new(None),
            output: Mutex::new(None),
        }
    }

    /// Shared rule store
    pub fn rules(&self) -> &SharedRuleStore {
        &self.rules
    }

    pub fn non_note_policy(&self) -> NonNotePolicy {
        *self.non_note.lock()
    }

    pub fn set_non_note_policy(&self, policy: NonNotePolicy) {
        *self.non_note.lock() = policy;
    }

    /// Bind a new input, detaching the previous one first.
    ///
    /// The router's handler is attached through a weak reference so that an
    /// input never keeps the router alive. If attaching fails the router is
    /// left without an input.
    pub fn bind_input(self: &Arc<Self>, mut source: Box<dyn MessageSource>) -> Result<(), DeviceError> {
        let mut current = self.input.lock();

        if let Some(mut previous) = current.take() {
            previous.detach();
            debug!("Detached input '{}'", previous.name());
        }

        let router = Arc::downgrade(self);
        source.attach(Box::new(move |data: &[u8]| {
            IN_LISTENER.with(|flag| flag.set(true));
            if let Some(router) = router.upgrade() {
                router.handle_message(data);
            }
            IN_LISTENER.with(|flag| flag.set(false));
        }))?;

        info!("🎹 Input bound: {}", source.name());
        *current = Some(source);
        Ok(())
    }

    /// Bind a new output, replacing the previous one
    pub fn bind_output(&self, sink: Box<dyn MessageSink>) {
        info!("🔊 Output bound: {}", sink.name());
        *self.output.lock() = Some(sink);
    }

    /// Detach and forget the current input
    pub fn unbind_input(&self) {
        if let Some(mut previous) = self.input.lock().take() {
            previous.detach();
            info!("Input unbound: {}", previous.name());
        }
    }

    /// Forget the current output. Messages are discarded until a new one
    /// is bound.
    pub fn unbind_output(&self) {
        if let Some(previous) = self.output.lock().take() {
            info!("Output unbound: {}", previous.name());
        }
    }

    pub fn input_name(&self) -> Option<String> {
        self.input.lock().as_ref().map(|s| s.name().to_string())
    }

    pub fn output_name(&self) -> Option<String> {
        self.output.lock().as_ref().map(|s| s.name().to_string())
    }

    /// Real-time entry point, called once per incoming message.
    ///
    /// Sends at most one message and never fails: every non-match is
    /// reported through the returned [`Route`].
    pub fn handle_message(&self, data: &[u8]) -> Route {
        let mut output = self.output.lock();
        let Some(sink) = output.as_mut() else {
            return Route::Dropped(DropReason::NoOutput);
        };

        let non_note = self.non_note_policy();
        let decision = {
            let mut rules = self.rules.lock();
            decide(data, &mut rules, non_note)
        };

        let sent = match decision {
            Decision::Forward(message) => sink.send(message.as_bytes()).map(|()| {
                trace!("{} → {} ({})", format_hex(data), message, sink.name());
                Route::Forwarded(*message.as_bytes())
            }),
            Decision::PassThrough(bytes) => sink.send(bytes).map(|()| {
                trace!("{} passed through ({})", format_hex(bytes), sink.name());
                Route::PassedThrough
            }),
            Decision::Drop(reason) => {
                if let DropReason::Unconfigured { channel, note } = reason {
                    debug!("ignoring note {}:{}", channel, note);
                } else {
                    trace!("Dropped {:?}: {}", reason, format_hex(data));
                }
                return Route::Dropped(reason);
            }
        };

        sent.unwrap_or_else(|e| {
            warn!("Failed to forward {}: {}", format_hex(data), e);
            Route::SendFailed
        })
    }
}

/// Detaches the bound input.
///
/// When the last handle is released from inside the input's own callback
/// (the listener's temporary upgrade outlived every other `Arc`), detaching
/// would wait for that callback to finish. The input is leaked instead.
/// Call [`MessageRouter::unbind_input`] before dropping to avoid this.
impl Drop for MessageRouter {
    fn drop(&mut self) {
        let Some(mut input) = self.input.get_mut().take() else {
            return;
        };
        if IN_LISTENER.with(Cell::get) {
            warn!("Router released from its input callback, leaving '{}' open", input.name());
            std::mem::forget(input);
        } else {
            input.detach();
        }
    }
}
