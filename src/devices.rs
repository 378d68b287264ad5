//! MIDI device access backed by midir
//!
//! Access is initialized once ([`DeviceAccess::try_init`]) before any device
//! can be opened. Opened ports implement the router's
//! [`MessageSource`]/[`MessageSink`] traits.

use colored::*;
use midir::{MidiInput, MidiInputConnection, MidiInputPort, MidiOutput, MidiOutputConnection};
use tracing::{debug, info};

use crate::error::DeviceError;
use crate::router::{Listener, MessageSink, MessageSource};

const CLIENT_NAME: &str = "midi-red";

/// Information about a MIDI port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub index: usize,
    pub name: String,
    pub is_virtual: bool,
}

impl PortInfo {
    fn new(index: usize, name: String) -> Self {
        let is_virtual =
            name.contains("Virtual") || name.contains("loopMIDI") || name.contains("IAC");
        Self {
            index,
            name,
            is_virtual,
        }
    }
}

/// Ports seen when access was initialized
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortList {
    pub inputs: Vec<PortInfo>,
    pub outputs: Vec<PortInfo>,
}

impl PortList {
    pub fn print(&self) {
        println!("\n{}", "=== MIDI Input Ports ===".bold().cyan());
        print_port_group(&self.inputs);
        println!("\n{}", "=== MIDI Output Ports ===".bold().cyan());
        print_port_group(&self.outputs);
        println!();
    }
}

fn print_port_group(ports: &[PortInfo]) {
    if ports.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for port in ports {
        let virtual_tag = if port.is_virtual { " [VIRTUAL]" } else { "" };
        println!("  {}: {}{}", port.index.to_string().yellow(), port.name, virtual_tag.dimmed());
    }
}

/// Enumerate the ports currently visible to midir
pub fn discover_ports() -> Result<PortList, DeviceError> {
    let midi_in =
        MidiInput::new(CLIENT_NAME).map_err(|e| DeviceError::AccessDenied(e.to_string()))?;
    let midi_out =
        MidiOutput::new(CLIENT_NAME).map_err(|e| DeviceError::AccessDenied(e.to_string()))?;

    let inputs = midi_in
        .ports()
        .iter()
        .enumerate()
        .filter_map(|(i, port)| midi_in.port_name(port).ok().map(|name| PortInfo::new(i, name)))
        .collect();
    let outputs = midi_out
        .ports()
        .iter()
        .enumerate()
        .filter_map(|(i, port)| midi_out.port_name(port).ok().map(|name| PortInfo::new(i, name)))
        .collect();

    Ok(PortList { inputs, outputs })
}

/// Resolve a port selector: a numeric index, or a case-insensitive
/// substring of the port name (first match wins)
pub fn select_port(names: &[String], selector: &str) -> Option<usize> {
    let selector = selector.trim();
    if let Ok(index) = selector.parse::<usize>() {
        if index < names.len() {
            return Some(index);
        }
    }

    let pattern = selector.to_lowercase();
    if pattern.is_empty() {
        return None;
    }
    names
        .iter()
        .position(|name| name.to_lowercase().contains(&pattern))
}

/// One-shot device access
#[derive(Debug, Default)]
pub struct DeviceAccess {
    ports: Option<PortList>,
}

impl DeviceAccess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.ports.is_some()
    }

    /// Initialize access by scanning midir ports.
    ///
    /// Fails with [`DeviceError::AlreadyInitialized`] on a second call; the
    /// existing access stays valid.
    pub async fn try_init(&mut self) -> Result<&PortList, DeviceError> {
        self.try_init_with(discover_ports).await
    }

    /// Initialize access with a custom port scan
    pub async fn try_init_with<F>(&mut self, scan: F) -> Result<&PortList, DeviceError>
    where
        F: FnOnce() -> Result<PortList, DeviceError> + Send + 'static,
    {
        if self.ports.is_some() {
            return Err(DeviceError::AlreadyInitialized);
        }

        let ports = tokio::task::spawn_blocking(scan)
            .await
            .map_err(|e| DeviceError::AccessDenied(format!("port scan failed: {}", e)))??;

        info!(
            "MIDI access ready: {} input(s), {} output(s)",
            ports.inputs.len(),
            ports.outputs.len()
        );
        Ok(self.ports.insert(ports))
    }

    /// Open the input matching `selector` (index or name substring)
    pub fn open_input(&self, selector: &str) -> Result<MidirInput, DeviceError> {
        if !self.is_initialized() {
            return Err(DeviceError::NotInitialized);
        }

        let client =
            MidiInput::new(CLIENT_NAME).map_err(|e| DeviceError::AccessDenied(e.to_string()))?;
        let ports = client.ports();
        let names: Vec<String> = ports
            .iter()
            .map(|port| client.port_name(port).unwrap_or_default())
            .collect();

        let index = select_port(&names, selector).ok_or_else(|| DeviceError::PortNotFound {
            direction: "input",
            selector: selector.to_string(),
        })?;
        debug!("Found port '{}' matching pattern '{}'", names[index], selector);

        Ok(MidirInput {
            name: names[index].clone(),
            port: ports[index].clone(),
            client: Some(client),
            connection: None,
        })
    }

    /// Open and connect the output matching `selector`
    pub fn open_output(&self, selector: &str) -> Result<MidirOutput, DeviceError> {
        if !self.is_initialized() {
            return Err(DeviceError::NotInitialized);
        }

        let client =
            MidiOutput::new(CLIENT_NAME).map_err(|e| DeviceError::AccessDenied(e.to_string()))?;
        let ports = client.ports();
        let names: Vec<String> = ports
            .iter()
            .map(|port| client.port_name(port).unwrap_or_default())
            .collect();

        let index = select_port(&names, selector).ok_or_else(|| DeviceError::PortNotFound {
            direction: "output",
            selector: selector.to_string(),
        })?;
        let name = names[index].clone();
        debug!("Found port '{}' matching pattern '{}'", name, selector);

        let connection = client
            .connect(&ports[index], "midi-red-out")
            .map_err(|e| DeviceError::Connect {
                port: name.clone(),
                reason: e.to_string(),
            })?;

        Ok(MidirOutput { name, connection })
    }
}

/// Input port; connected while a listener is attached
pub struct MidirInput {
    name: String,
    port: MidiInputPort,
    /// Client kept between connections (midir consumes it on connect)
    client: Option<MidiInput>,
    connection: Option<MidiInputConnection<()>>,
}

// midir handles are only touched behind the router's mutexes
unsafe impl Send for MidirInput {}

impl MessageSource for MidirInput {
    fn name(&self) -> &str {
        &self.name
    }

    fn attach(&mut self, mut listener: Listener) -> Result<(), DeviceError> {
        if self.connection.is_some() {
            return Err(DeviceError::AlreadyAttached(self.name.clone()));
        }

        let client = match self.client.take() {
            Some(client) => client,
            None => MidiInput::new(CLIENT_NAME)
                .map_err(|e| DeviceError::AccessDenied(e.to_string()))?,
        };

        match client.connect(
            &self.port,
            "midi-red-in",
            move |_timestamp, data, _| listener(data),
            (),
        ) {
            Ok(connection) => {
                self.connection = Some(connection);
                debug!("Listening on '{}'", self.name);
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                self.client = Some(e.into_inner());
                Err(DeviceError::Connect {
                    port: self.name.clone(),
                    reason,
                })
            }
        }
    }

    fn detach(&mut self) {
        // Closing joins midir's callback thread, so the listener is gone
        // once this returns
        if let Some(connection) = self.connection.take() {
            let (client, ()) = connection.close();
            self.client = Some(client);
            debug!("Stopped listening on '{}'", self.name);
        }
    }
}

/// Connected output port
pub struct MidirOutput {
    name: String,
    connection: MidiOutputConnection,
}

unsafe impl Send for MidirOutput {}

impl MessageSink for MidirOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, message: &[u8]) -> Result<(), DeviceError> {
        self.connection.send(message).map_err(|e| DeviceError::Send {
            port: self.name.clone(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn fake_ports() -> Result<PortList, DeviceError> {
        Ok(PortList {
            inputs: vec![PortInfo::new(0, "Drum Pad".to_string())],
            outputs: vec![PortInfo::new(0, "loopMIDI Port".to_string())],
        })
    }

    #[test]
    fn test_select_port_by_index_and_name() {
        let ports = names(&["Midi Through", "Drum Pad MIDI 1", "Synth"]);

        assert_eq!(select_port(&ports, "2"), Some(2));
        assert_eq!(select_port(&ports, "drum"), Some(1));
        assert_eq!(select_port(&ports, " SYNTH "), Some(2));
        assert_eq!(select_port(&ports, "piano"), None);
        assert_eq!(select_port(&ports, ""), None);
        // Out of range indexes fall back to name matching
        assert_eq!(select_port(&ports, "7"), None);
        assert_eq!(select_port(&names(&["Port 7"]), "7"), Some(0));
    }

    #[test]
    fn test_virtual_port_detection() {
        assert!(PortInfo::new(0, "loopMIDI Port".to_string()).is_virtual);
        assert!(PortInfo::new(0, "IAC Driver Bus 1".to_string()).is_virtual);
        assert!(!PortInfo::new(0, "X-Touch".to_string()).is_virtual);
    }

    #[tokio::test]
    async fn test_init_only_once() {
        let mut access = DeviceAccess::new();
        assert!(!access.is_initialized());

        let ports = access.try_init_with(fake_ports).await.unwrap();
        assert_eq!(ports.inputs[0].name, "Drum Pad");
        assert!(ports.outputs[0].is_virtual);

        let second = access.try_init_with(fake_ports).await;
        assert!(matches!(second, Err(DeviceError::AlreadyInitialized)));

        // The first scan stays in effect
        assert!(access.is_initialized());
    }

    #[tokio::test]
    async fn test_init_failure_is_reported() {
        let mut access = DeviceAccess::new();

        let result = access
            .try_init_with(|| Err(DeviceError::AccessDenied("no sequencer".to_string())))
            .await;
        assert!(matches!(result, Err(DeviceError::AccessDenied(_))));
        assert!(!access.is_initialized());
    }

    #[test]
    fn test_open_requires_init() {
        let access = DeviceAccess::new();

        assert!(matches!(access.open_input("0"), Err(DeviceError::NotInitialized)));
        assert!(matches!(access.open_output("0"), Err(DeviceError::NotInitialized)));
    }
}
