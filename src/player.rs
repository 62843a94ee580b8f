//! Tempo-aware Standard MIDI File player driving the playlist.
//!
//! All tracks of a file are merged into one tick-ordered schedule. Delays
//! are computed from the bridge tempo at the moment of sleeping, so a live
//! tempo change affects the file in flight. Sleeps go through the bridge
//! clock in short slices so cancellation is observed promptly.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, trace};
use midly::{MetaMessage, Smf, Timing, TrackEventKind};

use crate::bridge::{Bridge, PlaybackState};
use crate::cancel::{join_bounded, CancellationToken};
use crate::clock::Clock;
use crate::codec::MusicalEvent;
use crate::error::{BridgeError, Result};
use crate::tempo::TempoSetting;

/// Poll interval while paused.
pub const PAUSE_POLL: Duration = Duration::from_millis(10);
/// Longest single sleep between cancellation checks.
pub const SLEEP_SLICE: Duration = Duration::from_millis(10);
/// How long skip and stop wait for the previous run to exit.
pub const SKIP_JOIN_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledEvent {
    pub tick: u64,
    /// `None` for meta and non-translatable events. They still take part in
    /// pacing but are never transmitted.
    pub event: Option<MusicalEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub ticks_per_beat: u32,
    pub events: Vec<ScheduledEvent>,
}

fn ticks_per_beat(timing: Timing) -> u32 {
    match timing {
        Timing::Metrical(ticks) => ticks.as_int() as u32,
        Timing::Timecode(fps, subframes) => fps.as_int() as u32 * subframes as u32,
    }
}

impl Schedule {
    pub fn from_smf(smf: &Smf) -> Self {
        let mut events = Vec::new();
        for track in &smf.tracks {
            let mut tick = 0u64;
            for event in track {
                tick += event.delta.as_int() as u64;
                let musical = match &event.kind {
                    TrackEventKind::Midi { channel, message } => {
                        MusicalEvent::from_midi_message(*channel, message)
                    }
                    _ => None,
                };
                events.push(ScheduledEvent {
                    tick,
                    event: musical,
                });
            }
        }
        // Stable: equal ticks keep track encounter order.
        events.sort_by_key(|e| e.tick);
        Schedule {
            ticks_per_beat: ticks_per_beat(smf.header.timing),
            events,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path).map_err(|e| BridgeError::file(path, e))?;
        let smf = Smf::parse(&data).map_err(|e| BridgeError::file(path, e))?;
        Ok(Self::from_smf(&smf))
    }
}

/// First tempo meta event, scanning tracks in order.
pub fn first_tempo(smf: &Smf) -> Option<u32> {
    smf.tracks.iter().flatten().find_map(|event| match &event.kind {
        TrackEventKind::Meta(MetaMessage::Tempo(tempo)) => Some(tempo.as_int()),
        _ => None,
    })
}

pub fn read_first_tempo(path: &Path) -> Result<Option<u32>> {
    let data = fs::read(path).map_err(|e| BridgeError::file(path, e))?;
    let smf = Smf::parse(&data).map_err(|e| BridgeError::file(path, e))?;
    Ok(first_tempo(&smf))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn wait_while_paused(bridge: &Bridge, token: &CancellationToken) {
    while !token.is_cancelled() && bridge.is_paused() {
        bridge.clock().sleep(PAUSE_POLL);
    }
}

/// Sleep `total` in slices, holding the remaining delay while paused.
/// Returns `false` if cancelled first.
///
/// `total` is fixed when the sleep starts. A tempo change made during the
/// sleep applies from the next event on.
fn sleep_paced(bridge: &Bridge, total: Duration, token: &CancellationToken) -> bool {
    let mut remaining = total;
    loop {
        wait_while_paused(bridge, token);
        if token.is_cancelled() {
            return false;
        }
        if remaining.is_zero() {
            return true;
        }
        let slice = remaining.min(SLEEP_SLICE);
        bridge.clock().sleep(slice);
        remaining -= slice;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Completed,
    Cancelled,
}

/// Play one file to completion or cancellation.
pub fn play_file(bridge: &Bridge, path: &Path, token: &CancellationToken) -> Result<FileOutcome> {
    let schedule = Schedule::load(path)?;
    let name = file_name(path);
    bridge.log().info(format!("▶️  Playing: {}", name));

    let mut previous = 0u64;
    for scheduled in &schedule.events {
        if token.is_cancelled() {
            bridge.log().info("⏹️  Playback aborted.");
            return Ok(FileOutcome::Cancelled);
        }
        let delay = bridge
            .tempo()
            .ticks_to_duration(scheduled.tick - previous, schedule.ticks_per_beat);
        if !sleep_paced(bridge, delay, token) {
            bridge.log().info("⏹️  Playback aborted.");
            return Ok(FileOutcome::Cancelled);
        }
        previous = scheduled.tick;

        let Some(event) = scheduled.event else {
            continue;
        };
        match bridge.emit(&event.at(bridge.now())) {
            Ok(Some(message)) => trace!("File->OSC {}", message),
            Ok(None) => {}
            Err(e) => bridge.log().warn(format!("⚠️  Send failed: {}", e)),
        }
    }
    debug!("Finished {}", name);
    Ok(FileOutcome::Completed)
}

/// Play the playlist from its cursor until exhausted or cancelled.
///
/// A cancelled run leaves the cursor and playback state to whoever
/// cancelled it. A run that ends on its own resets the cursor to 0 and the
/// state to `Stopped`.
pub fn run_playlist(bridge: &Bridge, token: &CancellationToken) {
    let mut failures = 0usize;
    loop {
        if token.is_cancelled() {
            return;
        }
        let (next, len) = {
            let mut state = bridge.lock();
            let next = state.playlist.resolve();
            (next, state.playlist.len())
        };
        let Some(path) = next else {
            bridge.log().info("🏁 Reached end of playlist.");
            break;
        };

        match play_file(bridge, &path, token) {
            Ok(FileOutcome::Completed) => failures = 0,
            Ok(FileOutcome::Cancelled) => return,
            Err(e) => {
                bridge
                    .log()
                    .error(format!("❌ Error playing {}: {}", file_name(&path), e));
                failures += 1;
                if failures >= len {
                    bridge.log().error("❌ No playable files in the playlist.");
                    break;
                }
            }
        }

        let mut state = bridge.lock();
        if token.is_cancelled() {
            return;
        }
        state.playlist.advance();
    }

    let mut state = bridge.lock();
    if !token.is_cancelled() {
        state.playlist.reset_index();
        state.playback = PlaybackState::Stopped;
        drop(state);
        bridge.log().info("Playlist playback ended.");
    }
}

struct PlayerTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the single playback thread.
pub struct Player {
    bridge: Arc<Bridge>,
    task: Option<PlayerTask>,
}

impl Player {
    pub fn new(bridge: Arc<Bridge>) -> Self {
        Player { bridge, task: None }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .as_ref()
            .map(|task| !task.handle.is_finished())
            .unwrap_or(false)
    }

    /// Start playing from the cursor. Returns whether a run is active
    /// afterwards.
    pub fn play(&mut self) -> bool {
        if self.is_running() {
            self.bridge.log().info("Playback already in progress.");
            return true;
        }
        {
            let mut state = self.bridge.lock();
            if state.playlist.is_empty() {
                drop(state);
                self.bridge.log().warn("No files in the playlist to play.");
                return false;
            }
            state.playback = PlaybackState::Playing;
        }

        let token = CancellationToken::new();
        let bridge = Arc::clone(&self.bridge);
        let run_token = token.clone();
        let spawned = thread::Builder::new()
            .name("e_oscmidi-player".into())
            .spawn(move || run_playlist(&bridge, &run_token));
        match spawned {
            Ok(handle) => {
                self.task = Some(PlayerTask { token, handle });
                self.bridge.log().info("▶️  Playback started.");
                true
            }
            Err(e) => {
                self.bridge.lock().playback = PlaybackState::Stopped;
                self.bridge
                    .log()
                    .error(format!("❌ Cannot start player thread: {}", e));
                false
            }
        }
    }

    /// Cancel the active run and wait up to `timeout` for it to exit.
    fn cancel_run(&mut self, timeout: Duration) -> bool {
        let Some(task) = self.task.take() else {
            return false;
        };
        task.token.cancel();
        if join_bounded(task.handle, timeout).is_none() {
            debug!("player thread did not exit within {:?}", timeout);
        }
        true
    }

    pub fn skip_forward(&mut self) {
        self.skip(1, "forward");
    }

    pub fn skip_back(&mut self) {
        self.skip(-1, "back");
    }

    fn skip(&mut self, delta: isize, direction: &str) {
        if self.bridge.lock().playlist.is_empty() {
            self.bridge
                .log()
                .info(format!("No files to skip {}.", direction));
            return;
        }
        self.cancel_run(SKIP_JOIN_TIMEOUT);
        let index = {
            let mut state = self.bridge.lock();
            state.playback = PlaybackState::Stopped;
            state.playlist.step(delta)
        };
        if let Some(index) = index {
            self.bridge
                .log()
                .info(format!("⏭️  Skipping {} to index {}", direction, index));
        }
        self.play();
    }

    /// Stop playback and clear the whole playlist.
    pub fn stop(&mut self) {
        let was_running = self.is_running();
        self.cancel_run(SKIP_JOIN_TIMEOUT);
        {
            let mut state = self.bridge.lock();
            state.playlist.clear();
            state.playback = PlaybackState::Stopped;
        }
        if was_running {
            self.bridge.log().info("⏹️  Playback stopped.");
        } else {
            self.bridge.log().info("Playback not running.");
        }
    }

    /// Flip between playing and paused. Does nothing while stopped.
    pub fn toggle_pause(&self) -> PlaybackState {
        let mut state = self.bridge.lock();
        state.playback = match state.playback {
            PlaybackState::Playing => PlaybackState::Paused,
            PlaybackState::Paused => PlaybackState::Playing,
            PlaybackState::Stopped => PlaybackState::Stopped,
        };
        let now = state.playback;
        drop(state);
        match now {
            PlaybackState::Paused => self.bridge.log().info("⏸️  Playback paused."),
            PlaybackState::Playing => self.bridge.log().info("▶️  Playback resumed."),
            PlaybackState::Stopped => self.bridge.log().info("Playback not running."),
        }
        now
    }

    pub fn set_looping(&self, looping: bool) {
        self.bridge.lock().playlist.set_looping(looping);
        self.bridge.log().info(format!(
            "🔄 Playlist looping: {}",
            if looping { "ON" } else { "OFF" }
        ));
    }

    pub fn set_tempo(&self, bpm: u32) -> Result<TempoSetting> {
        let tempo = TempoSetting::from_bpm(bpm)?;
        self.bridge.lock().tempo = tempo;
        self.bridge
            .log()
            .info(format!("⏱️  Tempo changed to {} BPM.", tempo.bpm()));
        Ok(tempo)
    }

    /// Adopt the first tempo event of the first playlist file, or 120 BPM
    /// when it has none. `Ok(None)` when the playlist is empty; errors leave
    /// the tempo unchanged.
    pub fn reset_tempo(&self) -> Result<Option<TempoSetting>> {
        let first: Option<PathBuf> = self.bridge.lock().playlist.first().map(Path::to_path_buf);
        let Some(first) = first else {
            self.bridge
                .log()
                .info("No playlist loaded to reset tempo from.");
            return Ok(None);
        };

        let found = match read_first_tempo(&first) {
            Ok(found) => found,
            Err(e) => {
                self.bridge
                    .log()
                    .error(format!("❌ Error resetting tempo: {}", e));
                return Err(e);
            }
        };
        let tempo = match found {
            Some(micros) => {
                let tempo = TempoSetting::from_micros_per_beat(micros);
                self.bridge.log().info(format!(
                    "⏱️  Tempo reset to {} BPM from {}.",
                    tempo.bpm(),
                    file_name(&first)
                ));
                tempo
            }
            None => {
                self.bridge
                    .log()
                    .info("No tempo event found. Using default 120 BPM.");
                TempoSetting::default()
            }
        };
        self.bridge.lock().tempo = tempo;
        Ok(Some(tempo))
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.token.cancel();
        }
    }
}
