//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, OnceLock, Weak};
use std::thread;
use std::time::{Duration, Instant};

use midly::num::{u15, u24, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use parking_lot::Mutex;

use e_oscmidi::bridge::{Bridge, PlaybackState};
use e_oscmidi::clock::{Clock, ManualClock};
use e_oscmidi::codec::NetworkMessage;
use e_oscmidi::error::{BridgeError, Result};
use e_oscmidi::ports::{InputConnection, MidiBackend, RawMidi};
use e_oscmidi::tempo::TempoSetting;
use e_oscmidi::transport::{MidiSink, OscSink};

pub const TPB: u16 = 480;

pub fn note_on(delta: u32, channel: u8, key: u8) -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::from(delta),
        kind: TrackEventKind::Midi {
            channel: u4::from(channel),
            message: MidiMessage::NoteOn {
                key: u7::from(key),
                vel: u7::from(100u8),
            },
        },
    }
}

pub fn note_off(delta: u32, channel: u8, key: u8) -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::from(delta),
        kind: TrackEventKind::Midi {
            channel: u4::from(channel),
            message: MidiMessage::NoteOff {
                key: u7::from(key),
                vel: u7::from(0u8),
            },
        },
    }
}

pub fn tempo(delta: u32, micros_per_beat: u32) -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::from(delta),
        kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::from(micros_per_beat))),
    }
}

fn end_of_track() -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::from(0u32),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    }
}

/// Write a metrical SMF with the given tracks to `dir/name`.
pub fn write_smf(dir: &Path, name: &str, tracks: Vec<Vec<TrackEvent<'static>>>) -> PathBuf {
    let format = if tracks.len() > 1 {
        Format::Parallel
    } else {
        Format::SingleTrack
    };
    let smf = Smf {
        header: Header::new(format, Timing::Metrical(u15::from(TPB))),
        tracks: tracks
            .into_iter()
            .map(|mut track| {
                track.push(end_of_track());
                track
            })
            .collect(),
    };
    let path = dir.join(name);
    smf.save(&path).unwrap();
    path
}

/// One beat of `key` on channel 0: on at tick 0, off one beat later.
pub fn write_single_note(dir: &Path, name: &str, key: u8) -> PathBuf {
    write_smf(dir, name, vec![vec![note_on(0, 0, key), note_off(u32::from(TPB), 0, key)]])
}

/// OSC sink that remembers every message with the clock time it was sent.
pub struct RecordingOsc {
    clock: Arc<dyn Clock>,
    sent: Mutex<Vec<(Duration, NetworkMessage)>>,
}

impl RecordingOsc {
    pub fn new(clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(RecordingOsc {
            clock,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<(Duration, NetworkMessage)> {
        self.sent.lock().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(_, m)| m.to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }
}

impl OscSink for RecordingOsc {
    fn send(&self, message: &NetworkMessage) -> Result<()> {
        let now = self.clock.now();
        self.sent.lock().push((now, message.clone()));
        Ok(())
    }
}

/// MIDI sink collecting raw bytes.
#[derive(Clone, Default)]
pub struct RecordingMidi {
    pub bytes: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MidiSink for RecordingMidi {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.bytes.lock().push(bytes.to_vec());
        Ok(())
    }
}

/// Manual clock that pauses the bridge once time reaches `pause_at` and
/// resumes it `pause_for` later.
pub struct PausingClock {
    inner: ManualClock,
    pause_at: Duration,
    pause_for: Duration,
    bridge: OnceLock<Weak<Bridge>>,
    paused_once: Mutex<bool>,
}

impl PausingClock {
    pub fn new(pause_at: Duration, pause_for: Duration) -> Arc<Self> {
        Arc::new(PausingClock {
            inner: ManualClock::new(),
            pause_at,
            pause_for,
            bridge: OnceLock::new(),
            paused_once: Mutex::new(false),
        })
    }

    pub fn attach(&self, bridge: &Arc<Bridge>) {
        let _ = self.bridge.set(Arc::downgrade(bridge));
    }
}

impl Clock for PausingClock {
    fn now(&self) -> Duration {
        self.inner.now()
    }

    fn sleep(&self, duration: Duration) {
        self.inner.sleep(duration);
        let Some(bridge) = self.bridge.get().and_then(Weak::upgrade) else {
            return;
        };
        let now = self.inner.now();
        let mut paused_once = self.paused_once.lock();
        let mut state = bridge.lock();
        if !*paused_once && now >= self.pause_at {
            *paused_once = true;
            state.playback = PlaybackState::Paused;
        } else if *paused_once
            && state.playback == PlaybackState::Paused
            && now >= self.pause_at + self.pause_for
        {
            state.playback = PlaybackState::Playing;
        }
    }
}

/// Manual clock that sets the bridge tempo once time reaches `change_at`.
pub struct TempoChangeClock {
    inner: ManualClock,
    change_at: Duration,
    tempo: TempoSetting,
    bridge: OnceLock<Weak<Bridge>>,
    changed: Mutex<bool>,
}

impl TempoChangeClock {
    pub fn new(change_at: Duration, bpm: u32) -> Arc<Self> {
        Arc::new(TempoChangeClock {
            inner: ManualClock::new(),
            change_at,
            tempo: TempoSetting::from_bpm(bpm).unwrap(),
            bridge: OnceLock::new(),
            changed: Mutex::new(false),
        })
    }

    pub fn attach(&self, bridge: &Arc<Bridge>) {
        let _ = self.bridge.set(Arc::downgrade(bridge));
    }
}

impl Clock for TempoChangeClock {
    fn now(&self) -> Duration {
        self.inner.now()
    }

    fn sleep(&self, duration: Duration) {
        self.inner.sleep(duration);
        let Some(bridge) = self.bridge.get().and_then(Weak::upgrade) else {
            return;
        };
        let mut changed = self.changed.lock();
        if !*changed && self.inner.now() >= self.change_at {
            *changed = true;
            bridge.lock().tempo = self.tempo;
        }
    }
}

/// Poll `condition` in real time until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Device stand-in for the lifecycle tests.
#[derive(Clone, Default)]
pub struct FakeBackend {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    /// Sender side of the most recently opened input.
    pub feed: Arc<Mutex<Option<Sender<RawMidi>>>>,
    pub midi_out: RecordingMidi,
    pub opened_inputs: Arc<Mutex<Vec<String>>>,
    pub closed_inputs: Arc<Mutex<Vec<String>>>,
}

impl FakeBackend {
    pub fn new(inputs: &[&str], outputs: &[&str]) -> Self {
        FakeBackend {
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Push raw bytes as if the hardware sent them.
    pub fn play(&self, bytes: &[u8]) -> bool {
        match self.feed.lock().as_ref() {
            Some(tx) => tx
                .send(RawMidi {
                    stamp_us: 0,
                    bytes: bytes.to_vec(),
                })
                .is_ok(),
            None => false,
        }
    }
}

struct FakeInput {
    name: String,
    feed: Arc<Mutex<Option<Sender<RawMidi>>>>,
    closed: Arc<Mutex<Vec<String>>>,
}

impl InputConnection for FakeInput {
    fn name(&self) -> &str {
        &self.name
    }

    fn close(self: Box<Self>) {
        self.feed.lock().take();
        self.closed.lock().push(self.name.clone());
    }
}

impl MidiBackend for FakeBackend {
    fn input_ports(&self) -> Result<Vec<String>> {
        Ok(self.inputs.clone())
    }

    fn output_ports(&self) -> Result<Vec<String>> {
        Ok(self.outputs.clone())
    }

    fn open_input(&self, name: &str) -> Result<(Box<dyn InputConnection>, Receiver<RawMidi>)> {
        if !self.inputs.iter().any(|n| n == name) {
            return Err(BridgeError::Device(format!("MIDI input '{}' not found", name)));
        }
        let (tx, rx) = mpsc::channel();
        *self.feed.lock() = Some(tx);
        self.opened_inputs.lock().push(name.to_string());
        Ok((
            Box::new(FakeInput {
                name: name.to_string(),
                feed: Arc::clone(&self.feed),
                closed: Arc::clone(&self.closed_inputs),
            }),
            rx,
        ))
    }

    fn open_output(&self, name: &str) -> Result<Box<dyn MidiSink>> {
        if !self.outputs.iter().any(|n| n == name) {
            return Err(BridgeError::Device(format!("MIDI output '{}' not found", name)));
        }
        Ok(Box::new(self.midi_out.clone()))
    }
}
