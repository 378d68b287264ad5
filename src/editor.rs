//! Interactive rule editor and device selection
//!
//! The REPL runs on its own thread and only parses lines; parsed
//! [`Command`]s are sent to the main loop, which owns device access and
//! executes them with [`execute`].

use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::fmt::Write as _;
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::MidiConfig;
use crate::devices::{self, DeviceAccess};
use crate::error::EditError;
use crate::midi::{note_name, MAX_CHANNEL, MAX_DATA};
use crate::router::MessageRouter;
use crate::rules::{Rule, RuleStore};

const SET_USAGE: &str = "set <channel> <note> [channel <0-15|keep>] [note <0-127|keep>]";

const HELP: &str = "\
Commands:
  show                      list configured rules
  set <ch> <note> [channel <0-15|keep>] [note <0-127|keep>]
                            create or edit the rule for a note
  ports                     list MIDI ports
  input <index|name|none>   select the input device
  output <index|name|none>  select the output device
  status                    show bindings and rule count
  help                      this text
  quit                      exit";

/// New value for one rule field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replace {
    Keep,
    With(u8),
}

impl Replace {
    fn value(self) -> Option<u8> {
        match self {
            Replace::Keep => None,
            Replace::With(v) => Some(v),
        }
    }
}

/// Device selection; `None` unbinds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Port(String),
    None,
}

/// A parsed editor command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Show,
    Set {
        channel: u8,
        note: u8,
        replace_channel: Option<Replace>,
        replace_note: Option<Replace>,
    },
    Ports,
    Input(Selection),
    Output(Selection),
    Status,
    Help,
    Quit,
}

/// Whether the main loop keeps running after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

impl Command {
    /// Parse one input line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, EditError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((&head, args)) = tokens.split_first() else {
            return Ok(None);
        };

        let command = match head.to_lowercase().as_str() {
            "show" | "ls" => Command::Show,
            "set" => parse_set(args)?,
            "ports" => Command::Ports,
            "input" | "in" => Command::Input(parse_selection(args, "input <index|name|none>")?),
            "output" | "out" => {
                Command::Output(parse_selection(args, "output <index|name|none>")?)
            }
            "status" => Command::Status,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => return Err(EditError::UnknownCommand(other.to_string())),
        };
        Ok(Some(command))
    }
}

fn parse_set(args: &[&str]) -> Result<Command, EditError> {
    let [channel, note, rest @ ..] = args else {
        return Err(EditError::Usage(SET_USAGE));
    };
    let channel = parse_channel(channel)?;
    let note = parse_note(note)?;

    let mut replace_channel = None;
    let mut replace_note = None;
    for pair in rest.chunks(2) {
        match pair {
            [field, value] if field.eq_ignore_ascii_case("channel") => {
                replace_channel = Some(parse_replace(value, parse_channel)?);
            }
            [field, value] if field.eq_ignore_ascii_case("note") => {
                replace_note = Some(parse_replace(value, parse_note)?);
            }
            _ => return Err(EditError::Usage(SET_USAGE)),
        }
    }

    Ok(Command::Set {
        channel,
        note,
        replace_channel,
        replace_note,
    })
}

fn parse_selection(args: &[&str], usage: &'static str) -> Result<Selection, EditError> {
    if args.is_empty() {
        return Err(EditError::Usage(usage));
    }
    let selector = args.join(" ");
    if selector.eq_ignore_ascii_case("none") {
        Ok(Selection::None)
    } else {
        Ok(Selection::Port(selector))
    }
}

fn parse_replace(
    value: &str,
    parse: fn(&str) -> Result<u8, EditError>,
) -> Result<Replace, EditError> {
    // -1 is accepted as "keep" too
    if value.eq_ignore_ascii_case("keep") || value == "-1" {
        Ok(Replace::Keep)
    } else {
        parse(value).map(Replace::With)
    }
}

fn parse_channel(value: &str) -> Result<u8, EditError> {
    value
        .parse::<u8>()
        .ok()
        .filter(|&c| c <= MAX_CHANNEL)
        .ok_or_else(|| EditError::InvalidChannel(value.to_string()))
}

fn parse_note(value: &str) -> Result<u8, EditError> {
    value
        .parse::<u8>()
        .ok()
        .filter(|&n| n <= MAX_DATA)
        .ok_or_else(|| EditError::InvalidNote(value.to_string()))
}

/// Create or edit a rule and return its new value
pub fn apply_set(
    store: &mut RuleStore,
    channel: u8,
    note: u8,
    replace_channel: Option<Replace>,
    replace_note: Option<Replace>,
) -> Rule {
    let rule = store.get_or_create_note_config(channel, note);
    if let Some(replace) = replace_channel {
        rule.replace_channel = replace.value();
    }
    if let Some(replace) = replace_note {
        rule.replace_note = replace.value();
    }
    *rule
}

/// Render all rules, grouped by channel
pub fn render_rules(store: &RuleStore) -> String {
    let mut out = String::new();
    if store.is_empty() {
        let _ = writeln!(out, "  {}", "(no rules, every note is dropped)".dimmed());
        return out;
    }

    for (channel, notes) in store.channels() {
        if notes.is_empty() {
            continue;
        }
        let _ = writeln!(out, "{}", format!("Channel {}", channel).bold());
        for (note, rule) in notes.iter() {
            let label = format!("Note {} ({})", note, note_name(note));
            let _ = writeln!(out, "  {:<16} {}", label.yellow(), rule.to_string().green());
        }
    }
    out
}

/// Execute a command against the router and device access
/// Device commands that move the bindings from `old` to `new`.
///
/// Only directions whose selection changed are touched, so a port picked in
/// the editor survives reloads that leave that direction alone. A removed
/// selection unbinds.
pub fn port_commands(old: &MidiConfig, new: &MidiConfig) -> Vec<Command> {
    let selection = |port: &Option<String>| match port {
        Some(selector) => Selection::Port(selector.clone()),
        None => Selection::None,
    };

    let mut commands = Vec::new();
    if new.output_port != old.output_port {
        commands.push(Command::Output(selection(&new.output_port)));
    }
    if new.input_port != old.input_port {
        commands.push(Command::Input(selection(&new.input_port)));
    }
    commands
}

pub fn execute(command: Command, router: &Arc<MessageRouter>, access: &DeviceAccess) -> Flow {
    match command {
        Command::Show => print!("{}", render_rules(&router.rules().lock())),
        Command::Set {
            channel,
            note,
            replace_channel,
            replace_note,
        } => {
            let rule = apply_set(
                &mut router.rules().lock(),
                channel,
                note,
                replace_channel,
                replace_note,
            );
            info!("Rule {}:{} set to {}", channel, note, rule);
            println!("  {}:{} {}", channel, note, rule.to_string().green());
        }
        Command::Ports => match devices::discover_ports() {
            Ok(ports) => ports.print(),
            Err(e) => println!("{} {}", "✗".red(), e),
        },
        Command::Input(Selection::None) => router.unbind_input(),
        Command::Input(Selection::Port(selector)) => {
            let bound = access
                .open_input(&selector)
                .and_then(|input| router.bind_input(Box::new(input)));
            if let Err(e) = bound {
                warn!("Failed to select input '{}': {}", selector, e);
                println!("{} {}", "✗".red(), e);
            }
        }
        Command::Output(Selection::None) => router.unbind_output(),
        Command::Output(Selection::Port(selector)) => match access.open_output(&selector) {
            Ok(output) => router.bind_output(Box::new(output)),
            Err(e) => {
                warn!("Failed to select output '{}': {}", selector, e);
                println!("{} {}", "✗".red(), e);
            }
        },
        Command::Status => {
            let none = || "none".dimmed().to_string();
            println!("  input:  {}", router.input_name().unwrap_or_else(none));
            println!("  output: {}", router.output_name().unwrap_or_else(none));
            {
                let rules = router.rules().lock();
                let cache = if rules.cache_enabled() { "on" } else { "off" };
                println!("  rules:  {} (lookup cache {})", rules.len(), cache);
            }
            println!("  non-note messages: {:?}", router.non_note_policy());
        }
        Command::Help => println!("{}", HELP),
        Command::Quit => return Flow::Quit,
    }
    Flow::Continue
}

/// Run the REPL on a dedicated thread, sending parsed commands to `tx`.
///
/// EOF and Ctrl-C send [`Command::Quit`]. The thread ends when the receiver
/// is dropped.
pub fn spawn_repl(tx: mpsc::Sender<Command>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                warn!("Editor unavailable: {}", e);
                return;
            }
        };
        println!("Type {} for commands", "help".cyan());

        loop {
            let command = match rl.readline("midi-red> ") {
                Ok(line) => {
                    let _ = rl.add_history_entry(line.as_str());
                    match Command::parse(&line) {
                        Ok(Some(command)) => command,
                        Ok(None) => continue,
                        Err(e) => {
                            println!("{} {}", "✗".red(), e);
                            continue;
                        }
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => Command::Quit,
                Err(e) => {
                    warn!("Editor error: {}", e);
                    Command::Quit
                }
            };

            let quit = command == Command::Quit;
            if tx.blocking_send(command).is_err() || quit {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeviceError;
    use crate::router::{MessageSink, NonNotePolicy};

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(Command::parse("   "), Ok(None));
        assert_eq!(Command::parse("show"), Ok(Some(Command::Show)));
        assert_eq!(Command::parse("QUIT"), Ok(Some(Command::Quit)));
        assert_eq!(Command::parse("status"), Ok(Some(Command::Status)));
        assert_eq!(
            Command::parse("frobnicate"),
            Err(EditError::UnknownCommand("frobnicate".to_string()))
        );
    }

    #[test]
    fn test_parse_set() {
        assert_eq!(
            Command::parse("set 9 36 channel 0 note 69"),
            Ok(Some(Command::Set {
                channel: 9,
                note: 36,
                replace_channel: Some(Replace::With(0)),
                replace_note: Some(Replace::With(69)),
            }))
        );
        assert_eq!(
            Command::parse("set 1 50 channel keep"),
            Ok(Some(Command::Set {
                channel: 1,
                note: 50,
                replace_channel: Some(Replace::Keep),
                replace_note: None,
            }))
        );
        assert_eq!(
            Command::parse("set 1 50 note -1"),
            Ok(Some(Command::Set {
                channel: 1,
                note: 50,
                replace_channel: None,
                replace_note: Some(Replace::Keep),
            }))
        );
    }

    #[test]
    fn test_parse_set_rejects_bad_values() {
        assert_eq!(
            Command::parse("set 16 1"),
            Err(EditError::InvalidChannel("16".to_string()))
        );
        assert_eq!(
            Command::parse("set 0 200"),
            Err(EditError::InvalidNote("200".to_string()))
        );
        assert_eq!(
            Command::parse("set 0 1 channel 99"),
            Err(EditError::InvalidChannel("99".to_string()))
        );
        assert_eq!(Command::parse("set 0"), Err(EditError::Usage(SET_USAGE)));
        assert_eq!(Command::parse("set 0 1 velocity 3"), Err(EditError::Usage(SET_USAGE)));
        assert_eq!(Command::parse("set 0 1 note"), Err(EditError::Usage(SET_USAGE)));
    }

    #[test]
    fn test_parse_selection() {
        assert_eq!(
            Command::parse("input Drum Pad"),
            Ok(Some(Command::Input(Selection::Port("Drum Pad".to_string()))))
        );
        assert_eq!(Command::parse("out none"), Ok(Some(Command::Output(Selection::None))));
        assert!(Command::parse("input").is_err());
    }

    #[test]
    fn test_apply_set_edits_in_place() {
        let mut store = RuleStore::new();

        let rule = apply_set(&mut store, 9, 36, None, Some(Replace::With(69)));
        assert_eq!(rule, Rule::new(None, Some(69)));

        // Only the named field changes
        let rule = apply_set(&mut store, 9, 36, Some(Replace::With(2)), None);
        assert_eq!(rule, Rule::new(Some(2), Some(69)));

        let rule = apply_set(&mut store, 9, 36, None, Some(Replace::Keep));
        assert_eq!(rule, Rule::new(Some(2), None));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_render_rules() {
        colored::control::set_override(false);
        let mut store = RuleStore::new();
        assert!(render_rules(&store).contains("no rules"));

        apply_set(&mut store, 9, 36, Some(Replace::With(0)), Some(Replace::With(69)));
        apply_set(&mut store, 9, 37, None, None);

        let text = render_rules(&store);
        assert!(text.contains("Channel 9"));
        assert!(text.contains("Note 36 (C2)"));
        assert!(text.contains("channel → 0, note → 69"));
        assert!(text.contains("channel → keep, note → keep"));
    }

    #[test]
    fn test_execute_set_and_quit() {
        let router = Arc::new(MessageRouter::new(
            RuleStore::new().into_shared(),
            NonNotePolicy::Drop,
        ));
        let access = DeviceAccess::new();

        let flow = execute(
            Command::Set {
                channel: 4,
                note: 60,
                replace_channel: None,
                replace_note: Some(Replace::With(72)),
            },
            &router,
            &access,
        );
        assert_eq!(flow, Flow::Continue);
        assert_eq!(
            router.rules().lock().get_note_config(4, 60),
            Some(&Rule::new(None, Some(72)))
        );

        // Device selection before access is initialized reports and continues
        let flow = execute(Command::Input(Selection::Port("0".to_string())), &router, &access);
        assert_eq!(flow, Flow::Continue);
        assert!(router.input_name().is_none());

        assert_eq!(execute(Command::Quit, &router, &access), Flow::Quit);
    }

    fn midi(input: Option<&str>, output: Option<&str>) -> MidiConfig {
        MidiConfig {
            input_port: input.map(str::to_string),
            output_port: output.map(str::to_string),
        }
    }

    #[test]
    fn test_port_commands_only_touch_changed_directions() {
        let old = midi(Some("Pads"), Some("Synth"));

        assert!(port_commands(&old, &old).is_empty());
        assert_eq!(
            port_commands(&old, &midi(Some("Keys"), Some("Synth"))),
            vec![Command::Input(Selection::Port("Keys".to_string()))]
        );
        assert_eq!(
            port_commands(&MidiConfig::default(), &old),
            vec![
                Command::Output(Selection::Port("Synth".to_string())),
                Command::Input(Selection::Port("Pads".to_string())),
            ]
        );
    }

    #[test]
    fn test_removed_port_unbinds() {
        let old = midi(Some("Pads"), Some("Synth"));
        assert_eq!(
            port_commands(&old, &MidiConfig::default()),
            vec![
                Command::Output(Selection::None),
                Command::Input(Selection::None),
            ]
        );

        struct NullSink;

        impl MessageSink for NullSink {
            fn name(&self) -> &str {
                "synth"
            }

            fn send(&mut self, _message: &[u8]) -> Result<(), DeviceError> {
                Ok(())
            }
        }

        let router = Arc::new(MessageRouter::new(
            RuleStore::new().into_shared(),
            NonNotePolicy::Drop,
        ));
        router.bind_output(Box::new(NullSink));
        let access = DeviceAccess::new();

        for command in port_commands(&old, &MidiConfig::default()) {
            assert_eq!(execute(command, &router, &access), Flow::Continue);
        }
        assert!(router.output_name().is_none());
    }
}
