//! Hardware MIDI port enumeration and open/close via `midir`.
//!
//! Opening goes through [`MidiBackend`] so the lifecycle controller can be
//! exercised without real devices.

use std::sync::mpsc::{self, Receiver};

use log::{debug, info};
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput};

use crate::error::{BridgeError, Result};
use crate::transport::MidiSink;

const CLIENT_NAME: &str = "e_oscmidi";

/// One message from a hardware input, with the backend's microsecond stamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMidi {
    pub stamp_us: u64,
    pub bytes: Vec<u8>,
}

/// An open input. Dropping the receiver side ends the listener; closing the
/// connection disconnects the sender.
pub trait InputConnection {
    fn name(&self) -> &str;
    fn close(self: Box<Self>);
}

pub trait MidiBackend {
    fn input_ports(&self) -> Result<Vec<String>>;
    fn output_ports(&self) -> Result<Vec<String>>;
    fn open_input(&self, name: &str) -> Result<(Box<dyn InputConnection>, Receiver<RawMidi>)>;
    fn open_output(&self, name: &str) -> Result<Box<dyn MidiSink>>;
}

/// Names of all MIDI inputs, in backend order.
pub fn list_input_ports() -> Result<Vec<String>> {
    MidirBackend.input_ports()
}

/// Names of all MIDI outputs, in backend order.
pub fn list_output_ports() -> Result<Vec<String>> {
    MidirBackend.output_ports()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MidirBackend;

fn device_err(context: &str, e: impl std::fmt::Display) -> BridgeError {
    BridgeError::Device(format!("{}: {}", context, e))
}

fn new_input() -> Result<MidiInput> {
    MidiInput::new(CLIENT_NAME).map_err(|e| device_err("Cannot create MIDI input client", e))
}

fn new_output() -> Result<MidiOutput> {
    MidiOutput::new(CLIENT_NAME).map_err(|e| device_err("Cannot create MIDI output client", e))
}

impl MidiBackend for MidirBackend {
    fn input_ports(&self) -> Result<Vec<String>> {
        let midi_in = new_input()?;
        Ok(midi_in
            .ports()
            .iter()
            .filter_map(|p| midi_in.port_name(p).ok())
            .collect())
    }

    fn output_ports(&self) -> Result<Vec<String>> {
        let midi_out = new_output()?;
        Ok(midi_out
            .ports()
            .iter()
            .filter_map(|p| midi_out.port_name(p).ok())
            .collect())
    }

    fn open_input(&self, name: &str) -> Result<(Box<dyn InputConnection>, Receiver<RawMidi>)> {
        let mut midi_in = new_input()?;
        midi_in.ignore(Ignore::None);
        let port = midi_in
            .ports()
            .into_iter()
            .find(|p| midi_in.port_name(p).map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| BridgeError::Device(format!("MIDI input '{}' not found", name)))?;

        let (tx, rx) = mpsc::channel();
        let conn = midi_in
            .connect(
                &port,
                "e_oscmidi-in",
                move |stamp_us, bytes, _| {
                    // Receiver gone means the listener has exited.
                    let _ = tx.send(RawMidi {
                        stamp_us,
                        bytes: bytes.to_vec(),
                    });
                },
                (),
            )
            .map_err(|e| device_err(&format!("Cannot open MIDI input '{}'", name), e))?;
        info!("🔌 Opened MIDI input: {}", name);
        Ok((
            Box::new(MidirInput {
                name: name.to_string(),
                conn,
            }),
            rx,
        ))
    }

    fn open_output(&self, name: &str) -> Result<Box<dyn MidiSink>> {
        let midi_out = new_output()?;
        let port = midi_out
            .ports()
            .into_iter()
            .find(|p| midi_out.port_name(p).map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| BridgeError::Device(format!("MIDI output '{}' not found", name)))?;
        let conn = midi_out
            .connect(&port, "e_oscmidi-out")
            .map_err(|e| device_err(&format!("Cannot open MIDI output '{}'", name), e))?;
        info!("🔌 Opened MIDI output: {}", name);
        Ok(Box::new(conn))
    }
}

struct MidirInput {
    name: String,
    conn: MidiInputConnection<()>,
}

impl InputConnection for MidirInput {
    fn name(&self) -> &str {
        &self.name
    }

    fn close(self: Box<Self>) {
        let MidirInput { name, conn } = *self;
        conn.close();
        debug!("Closed MIDI input {}", name);
    }
}
