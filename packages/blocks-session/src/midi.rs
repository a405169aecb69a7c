//! A [`Transport`] over a pair of system MIDI ports.
//!
//! BLOCKS devices show up as a MIDI input and output with the same name, for
//! example `Lightpad BLOCK` or `Lightpad BLOCK 2`. Ports are matched by a
//! case-insensitive fragment of that name.

use std::collections::VecDeque;

use log::{debug, trace};
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

use crate::{
    protocol::sysex::{SysExAssembler, SYSEX_START},
    Transport,
};

const CLIENT_NAME: &str = "blocks-session";

#[derive(Error, Debug)]
pub enum MidiError {
    #[error("MIDI backend error: {0}")]
    Backend(String),
    #[error("No MIDI {direction} port matches {name:?}")]
    PortNotFound {
        direction: &'static str,
        name: String,
    },
    #[error("Failed to send MIDI data: {0}")]
    Send(#[from] midir::SendError),
    #[error("The MIDI input port was closed")]
    Disconnected,
}

fn backend<E: std::fmt::Display>(err: E) -> MidiError {
    MidiError::Backend(err.to_string())
}

fn matches_name(port_name: &str, fragment: &str) -> bool {
    port_name.to_lowercase().contains(&fragment.to_lowercase())
}

/// Names of the MIDI input ports that have a matching output port.
pub fn find_ports() -> Result<Vec<String>, MidiError> {
    let input = MidiInput::new(CLIENT_NAME).map_err(backend)?;
    let output = MidiOutput::new(CLIENT_NAME).map_err(backend)?;

    let outputs: Vec<String> = output
        .ports()
        .iter()
        .filter_map(|port| output.port_name(port).ok())
        .collect();

    Ok(input
        .ports()
        .iter()
        .filter_map(|port| input.port_name(port).ok())
        .filter(|name| outputs.contains(name))
        .collect())
}

/// An open MIDI connection to a BLOCKS device.
pub struct MidiTransport {
    name: String,
    _input: MidiInputConnection<()>,
    output: MidiOutputConnection,
    incoming: UnboundedReceiver<Vec<u8>>,
    assembler: SysExAssembler,
    frames: VecDeque<Vec<u8>>,
}

impl MidiTransport {
    /// Opens the first input and output ports whose names contain `name`.
    pub fn open(name: &str) -> Result<Self, MidiError> {
        let mut input = MidiInput::new(CLIENT_NAME).map_err(backend)?;
        input.ignore(Ignore::None);

        let in_port = input
            .ports()
            .into_iter()
            .find(|port| {
                input
                    .port_name(port)
                    .is_ok_and(|port_name| matches_name(&port_name, name))
            })
            .ok_or_else(|| MidiError::PortNotFound {
                direction: "input",
                name: name.to_string(),
            })?;
        let port_name = input.port_name(&in_port).map_err(backend)?;

        let output = MidiOutput::new(CLIENT_NAME).map_err(backend)?;
        let out_port = output
            .ports()
            .into_iter()
            .find(|port| {
                output
                    .port_name(port)
                    .is_ok_and(|port_name| matches_name(&port_name, name))
            })
            .ok_or_else(|| MidiError::PortNotFound {
                direction: "output",
                name: name.to_string(),
            })?;

        let (tx, incoming) = unbounded_channel();
        let input = input
            .connect(
                &in_port,
                CLIENT_NAME,
                move |_, message, _| {
                    // Channel messages are never part of a SysEx frame.
                    if message
                        .first()
                        .is_some_and(|status| (0x80..SYSEX_START).contains(status))
                    {
                        return;
                    }
                    let _ = tx.send(message.to_vec());
                },
                (),
            )
            .map_err(backend)?;
        let output = output.connect(&out_port, CLIENT_NAME).map_err(backend)?;

        debug!("Opened MIDI ports for {port_name:?}");

        Ok(Self {
            name: port_name,
            _input: input,
            output,
            incoming,
            assembler: SysExAssembler::new(),
            frames: VecDeque::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Transport for MidiTransport {
    type Error = MidiError;

    async fn send(&mut self, frame: &[u8]) -> Result<(), MidiError> {
        trace!("sent MIDI: {:x?}", frame);
        Ok(self.output.send(frame)?)
    }

    async fn recv(&mut self) -> Result<Vec<u8>, MidiError> {
        loop {
            if let Some(frame) = self.frames.pop_front() {
                trace!("received MIDI: {:x?}", frame);
                return Ok(frame);
            }

            let chunk = self.incoming.recv().await.ok_or(MidiError::Disconnected)?;

            // Backends may split long SysEx messages across callbacks.
            self.frames.extend(self.assembler.extend(&chunk));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::matches_name;

    #[test]
    fn port_names_match_case_insensitively() {
        assert!(matches_name("Lightpad BLOCK 2", "lightpad"));
        assert!(matches_name("Lightpad BLOCK", "Lightpad BLOCK"));
        assert!(!matches_name("Seaboard BLOCK", "lightpad"));
    }
}
