//! Shared state behind the session lock.
//!
//! Every thread (listener, dispatcher workers, player, sweeper) touches
//! mutable state only through [`Bridge::lock`]. The lock is never held
//! across a sleep, a join or a network send.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::trace;
use parking_lot::{Mutex, MutexGuard};

use crate::clock::Clock;
use crate::codec::{self, EventKind, MusicalEvent, NetworkMessage};
use crate::error::Result;
use crate::history::HistoryBuffer;
use crate::playlist::Playlist;
use crate::routes::ChannelMode;
use crate::status::StatusLog;
use crate::tempo::TempoSetting;
use crate::transport::{MidiSink, OscSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackState::Stopped => "stopped",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
        };
        f.write_str(name)
    }
}

#[derive(Default)]
pub struct BridgeState {
    pub osc_out: Option<Arc<dyn OscSink>>,
    pub midi_out: Option<Box<dyn MidiSink>>,
    pub history: HistoryBuffer,
    pub playback: PlaybackState,
    pub tempo: TempoSetting,
    pub playlist: Playlist,
    pub channel_mode: ChannelMode,
}

impl fmt::Debug for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeState")
            .field("osc_out", &self.osc_out.is_some())
            .field("midi_out", &self.midi_out.is_some())
            .field("history", &self.history.len())
            .field("playback", &self.playback)
            .field("tempo", &self.tempo)
            .field("playlist", &self.playlist.len())
            .field("channel_mode", &self.channel_mode)
            .finish()
    }
}

pub struct Bridge {
    state: Mutex<BridgeState>,
    clock: Arc<dyn Clock>,
    log: StatusLog,
}

impl Bridge {
    pub fn new(clock: Arc<dyn Clock>, log: StatusLog) -> Arc<Self> {
        Arc::new(Bridge {
            state: Mutex::new(BridgeState::default()),
            clock,
            log,
        })
    }

    pub fn lock(&self) -> MutexGuard<'_, BridgeState> {
        self.state.lock()
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    pub fn log(&self) -> &StatusLog {
        &self.log
    }

    pub fn is_paused(&self) -> bool {
        self.lock().playback == PlaybackState::Paused
    }

    pub fn tempo(&self) -> TempoSetting {
        self.lock().tempo
    }

    /// Encode and send one event over the network client, then record it.
    /// Returns `None` when no client is configured.
    pub fn emit(&self, event: &MusicalEvent) -> Result<Option<NetworkMessage>> {
        let message = codec::encode(event);
        let sent = self.send_osc(&message, event.outbound_kind())?;
        Ok(sent.then_some(message))
    }

    /// Send an already-built message and record it under `kind`.
    pub fn send_osc(&self, message: &NetworkMessage, kind: EventKind) -> Result<bool> {
        let Some(client) = self.lock().osc_out.clone() else {
            return Ok(false);
        };
        client.send(message)?;
        let now = self.clock.now();
        self.lock().history.record(message, kind, now);
        trace!("sent {} ({})", message, kind);
        Ok(true)
    }

    /// Evict history entries that fell out of the window.
    pub fn sweep_history(&self) -> usize {
        let now = self.clock.now();
        self.lock().history.evict_stale(now)
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge").field("state", &*self.lock()).finish()
    }
}
