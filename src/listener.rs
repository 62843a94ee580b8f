//! Hardware input -> OSC.
//!
//! One thread drains the receiver fed by the MIDI input callback and
//! forwards every channel-voice message over the network client.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, trace};

use crate::bridge::Bridge;
use crate::cancel::{join_bounded, CancellationToken};
use crate::codec::MusicalEvent;
use crate::error::Result;
use crate::ports::RawMidi;

/// Cancellation is checked at least this often while the input is idle.
pub const RECV_TIMEOUT: Duration = Duration::from_millis(100);

pub struct InboundListener {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl InboundListener {
    pub fn spawn(source: Receiver<RawMidi>, bridge: Arc<Bridge>) -> Result<Self> {
        let token = CancellationToken::new();
        let run_token = token.clone();
        let handle = thread::Builder::new()
            .name("e_oscmidi-listener".into())
            .spawn(move || run(source, &bridge, &run_token))?;
        Ok(InboundListener {
            token,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Cancel and wait up to `timeout`. Returns whether the thread exited.
    pub fn stop(mut self, timeout: Duration) -> bool {
        self.token.cancel();
        match self.handle.take() {
            Some(handle) => join_bounded(handle, timeout).is_some(),
            None => true,
        }
    }
}

impl Drop for InboundListener {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

fn run(source: Receiver<RawMidi>, bridge: &Bridge, token: &CancellationToken) {
    debug!("listener started");
    loop {
        if token.is_cancelled() {
            break;
        }
        match source.recv_timeout(RECV_TIMEOUT) {
            Ok(raw) => {
                if token.is_cancelled() {
                    break;
                }
                forward(bridge, &raw);
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("MIDI input closed");
                break;
            }
        }
    }
    debug!("listener stopped");
}

fn forward(bridge: &Bridge, raw: &RawMidi) {
    let Some(event) = MusicalEvent::from_midi_bytes(&raw.bytes) else {
        trace!("ignored MIDI {:02X?}", raw.bytes);
        return;
    };
    match bridge.emit(&event.at(bridge.now())) {
        Ok(Some(message)) => bridge
            .log()
            .info(format!("MIDI->OSC {} {}", event.outbound_kind(), message)),
        Ok(None) => bridge.log().warn("⚠️  OSC client not initialized."),
        Err(e) => bridge.log().error(format!("❌ MIDI->OSC failed: {}", e)),
    }
}
