//! Bidirectional MIDI <-> OSC bridge.
//!
//! Hardware MIDI input is forwarded as OSC messages addressed
//! `/ch<N><cmd>`, inbound OSC commands are routed to a MIDI output, and
//! Standard MIDI Files can be played out over OSC with live tempo control.

use std::sync::atomic::{AtomicBool, Ordering};

// Global shutdown flag for graceful Ctrl+C handling
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

pub fn set_shutdown_flag() {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

pub fn should_shutdown() -> bool {
    SHUTDOWN.load(Ordering::Relaxed)
}

pub mod bridge;
pub mod cancel;
pub mod cli;
pub mod clock;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod history;
pub mod listener;
pub mod player;
pub mod playlist;
pub mod ports;
pub mod routes;
pub mod session;
pub mod status;
pub mod tempo;
pub mod transport;

pub use bridge::{Bridge, PlaybackState};
pub use cancel::CancellationToken;
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{decode, encode, Decoded, EventKind, MusicalEvent, NetworkMessage};
pub use config::{BridgeSettings, Config};
pub use error::{BridgeError, Result};
pub use history::HistoryBuffer;
pub use player::Player;
pub use playlist::Playlist;
pub use ports::{list_input_ports, list_output_ports};
pub use routes::{ChannelMode, RouteKey, RouteTable};
pub use session::BridgeController;
pub use status::StatusLog;
pub use tempo::TempoSetting;
