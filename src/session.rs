//! Lifecycle controller: owns the devices, the background threads and the
//! start/stop ordering of a bridge session.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use crate::bridge::{Bridge, PlaybackState};
use crate::cancel::{join_bounded, CancellationToken};
use crate::clock::{Clock, SystemClock};
use crate::codec::{EventKind, NetworkMessage};
use crate::config::{BridgeSettings, Config, ValidatedSettings};
use crate::dispatcher::{self, Dispatcher, DEFAULT_WORKERS};
use crate::error::Result;
use crate::history::SWEEP_INTERVAL;
use crate::listener::InboundListener;
use crate::player::Player;
use crate::ports::{InputConnection, MidiBackend, MidirBackend, RawMidi};
use crate::routes::{ChannelMode, Command, RouteKey, RouteTable};
use crate::status::StatusLog;
use crate::tempo::TempoSetting;
use crate::transport::UdpOscClient;

/// Bound on each join during stop.
pub const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(1);
pub const TEST_NOTE: i32 = 60;

/// An open MIDI input. The receiver is handed to the listener when one
/// starts.
struct InputHandle {
    conn: Box<dyn InputConnection>,
    source: Option<Receiver<RawMidi>>,
}

impl InputHandle {
    fn close(self) {
        debug!("closing MIDI input {}", self.conn.name());
        self.conn.close();
    }
}

/// Periodic history eviction so stale entries go even when idle.
struct Sweeper {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Sweeper {
    fn spawn(bridge: Arc<Bridge>) -> Result<Self> {
        let token = CancellationToken::new();
        let run_token = token.clone();
        let handle = thread::Builder::new()
            .name("e_oscmidi-sweeper".into())
            .spawn(move || {
                while !run_token.wait_timeout(SWEEP_INTERVAL) {
                    bridge.sweep_history();
                }
            })?;
        Ok(Sweeper { token, handle })
    }

    fn stop(self, timeout: Duration) -> bool {
        self.token.cancel();
        join_bounded(self.handle, timeout).is_some()
    }
}

struct Session {
    settings: BridgeSettings,
    dispatcher: Dispatcher,
    listener: Option<InboundListener>,
    sweeper: Sweeper,
}

pub struct BridgeController {
    bridge: Arc<Bridge>,
    config: Config,
    config_path: Option<PathBuf>,
    backend: Box<dyn MidiBackend>,
    midi_in: Option<InputHandle>,
    session: Option<Session>,
    player: Player,
    workers: usize,
}

impl BridgeController {
    pub fn new(
        config: Config,
        config_path: Option<PathBuf>,
        backend: Box<dyn MidiBackend>,
        clock: Arc<dyn Clock>,
        log: StatusLog,
    ) -> Self {
        let bridge = Bridge::new(clock, log);
        bridge.lock().channel_mode = config.settings().channel_mode;
        let player = Player::new(Arc::clone(&bridge));
        BridgeController {
            bridge,
            config,
            config_path,
            backend,
            midi_in: None,
            session: None,
            player,
            workers: DEFAULT_WORKERS,
        }
    }

    /// Controller on real MIDI hardware and the wall clock, with settings
    /// loaded from `config_path`.
    pub fn open<P: AsRef<Path>>(config_path: P, log: StatusLog) -> Result<Self> {
        let path = config_path.as_ref().to_path_buf();
        let config = Config::load(&path)?;
        Ok(Self::new(
            config,
            Some(path),
            Box::new(MidirBackend),
            Arc::new(SystemClock::new()),
            log,
        ))
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    pub fn log(&self) -> &StatusLog {
        self.bridge.log()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    /// Settings of the running session, or those the config would start
    /// with.
    pub fn current_settings(&self) -> BridgeSettings {
        match &self.session {
            Some(session) => session.settings.clone(),
            None => {
                let mut settings = self.config.settings();
                settings.channel_mode = self.bridge.lock().channel_mode;
                settings
            }
        }
    }

    pub fn inbound_addr(&self) -> Option<SocketAddr> {
        self.session.as_ref().map(|s| s.dispatcher.local_addr())
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.bridge.lock().playback
    }

    pub fn tempo(&self) -> TempoSetting {
        self.bridge.tempo()
    }

    pub fn history_len(&self) -> usize {
        self.bridge.lock().history.len()
    }

    pub fn channel_mode(&self) -> ChannelMode {
        self.bridge.lock().channel_mode
    }

    /// Validate, open everything, then start the threads. Validation
    /// failures open nothing; later failures release whatever this attempt
    /// opened.
    pub fn start(&mut self, settings: &BridgeSettings) -> Result<()> {
        if self.session.is_some() {
            self.log().info("Server already running.");
            return Ok(());
        }
        let validated = match settings.validate() {
            Ok(v) => v,
            Err(e) => {
                self.log().error(format!("❌ {}", e));
                return Err(e);
            }
        };
        match self.start_validated(settings, &validated) {
            Ok(()) => {
                self.remember(&validated);
                Ok(())
            }
            Err(e) => {
                self.log().error(format!("❌ Error starting server: {}", e));
                Err(e)
            }
        }
    }

    fn start_validated(&mut self, settings: &BridgeSettings, v: &ValidatedSettings) -> Result<()> {
        let socket = dispatcher::bind_inbound(v.osc_in_port)?;
        let routes = RouteTable::for_mode(v.channel_mode);
        let client = UdpOscClient::connect(&v.osc_out_ip, v.osc_out_port)?;

        let needs_output = self.bridge.lock().midi_out.is_none();
        let new_output = if needs_output {
            Some(self.backend.open_output(&v.midi_output)?)
        } else {
            None
        };
        // A fresh receiver is needed for the listener; reopen if the current
        // handle already gave its away.
        if self
            .midi_in
            .as_ref()
            .map(|h| h.source.is_none())
            .unwrap_or(false)
        {
            if let Some(stale) = self.midi_in.take() {
                stale.close();
            }
        }
        let opened_input = self.midi_in.is_none();
        if opened_input {
            // `new_output` is dropped, and so closed, on error.
            let (conn, source) = self.backend.open_input(&v.midi_input)?;
            self.midi_in = Some(InputHandle {
                conn,
                source: Some(source),
            });
        }

        {
            let mut state = self.bridge.lock();
            state.osc_out = Some(Arc::new(client));
            if let Some(output) = new_output {
                state.midi_out = Some(output);
            }
            state.channel_mode = v.channel_mode;
        }

        let release = |this: &mut Self| {
            let mut state = this.bridge.lock();
            state.osc_out = None;
            if needs_output {
                state.midi_out = None;
            }
            drop(state);
            if opened_input {
                if let Some(handle) = this.midi_in.take() {
                    handle.close();
                }
            }
        };

        let dispatcher = match Dispatcher::start(socket, routes, Arc::clone(&self.bridge), self.workers)
        {
            Ok(d) => d,
            Err(e) => {
                release(self);
                return Err(e);
            }
        };
        self.log()
            .info(format!("🌐 OSC Server started on port {}", dispatcher.local_addr().port()));
        self.log()
            .info(format!("📡 OSC Client set to {}:{}", v.osc_out_ip, v.osc_out_port));

        let source = self.midi_in.as_mut().and_then(|h| h.source.take());
        let listener = match source.map(|rx| InboundListener::spawn(rx, Arc::clone(&self.bridge))) {
            Some(Ok(listener)) => Some(listener),
            Some(Err(e)) => {
                dispatcher.shutdown(STOP_JOIN_TIMEOUT);
                release(self);
                return Err(e);
            }
            None => None,
        };
        if listener.is_some() {
            self.log().info("🎹 MIDI input thread started.");
        }

        let sweeper = match Sweeper::spawn(Arc::clone(&self.bridge)) {
            Ok(s) => s,
            Err(e) => {
                if let Some(listener) = listener {
                    listener.stop(STOP_JOIN_TIMEOUT);
                }
                dispatcher.shutdown(STOP_JOIN_TIMEOUT);
                release(self);
                return Err(e);
            }
        };

        self.session = Some(Session {
            settings: settings.clone(),
            dispatcher,
            listener,
            sweeper,
        });
        info!(
            "bridge started: in {} -> out {}:{} ({})",
            v.osc_in_port, v.osc_out_ip, v.osc_out_port, v.channel_mode
        );
        Ok(())
    }

    fn remember(&mut self, validated: &ValidatedSettings) {
        self.config.apply(validated);
        if let Some(path) = &self.config_path {
            if let Err(e) = self.config.save(path) {
                self.bridge
                    .log()
                    .warn(format!("⚠️  Could not save {}: {}", path.display(), e));
            }
        }
    }

    /// Stop the session. Safe to call when not running. Returns whether a
    /// session was stopped.
    pub fn stop(&mut self) -> bool {
        let Some(session) = self.session.take() else {
            return false;
        };
        self.log().info("Stopping OSC server...");

        // Detach everything under the lock; join and close outside it.
        let (osc_out, midi_out) = {
            let mut state = self.bridge.lock();
            (state.osc_out.take(), state.midi_out.take())
        };
        let midi_in = self.midi_in.take();

        let Session {
            dispatcher,
            listener,
            sweeper,
            ..
        } = session;
        if dispatcher.shutdown(STOP_JOIN_TIMEOUT) {
            self.log().info("OSC server stopped.");
        }
        if let Some(listener) = listener {
            if listener.stop(STOP_JOIN_TIMEOUT) {
                self.log().info("MIDI input thread joined.");
            }
        }
        if !sweeper.stop(STOP_JOIN_TIMEOUT) {
            warn!("history sweeper did not stop in time");
        }
        if midi_out.is_some() {
            drop(midi_out);
            self.log().info("MIDI output closed.");
        }
        if let Some(handle) = midi_in {
            handle.close();
            self.log().info("MIDI input closed.");
        }
        drop(osc_out);
        true
    }

    /// Changing the channel mode re-registers routes, so a running session
    /// is stopped and started again.
    pub fn restart_with_mode(&mut self, mode: ChannelMode) -> Result<()> {
        let mut settings = self.current_settings();
        settings.channel_mode = mode;
        match mode {
            ChannelMode::All16 => self.log().info("16 Channel Mode Enabled."),
            ChannelMode::Single(_) => self.log().info("16 Channel Mode Disabled."),
        }
        if !self.stop() {
            self.bridge.lock().channel_mode = mode;
            return Ok(());
        }
        self.start(&settings)
    }

    /// Emit `/ch<selected>note [60]`.
    pub fn send_test_note(&self) -> Result<bool> {
        let channel = self.bridge.lock().channel_mode.primary_channel();
        let message = NetworkMessage::new(
            RouteKey::new(channel, Command::Note).address(),
            vec![TEST_NOTE],
        );
        let sent = self.bridge.send_osc(&message, EventKind::NoteOn)?;
        if sent {
            self.log()
                .info(format!("Test note_on -> {} {}", message.address, TEST_NOTE));
        } else {
            self.log()
                .warn("OSC client not initialized. Start the server first.");
        }
        Ok(sent)
    }

    /// Replace the MIDI input. The old port is closed first; on failure the
    /// input is left unset. A running listener is restarted on the new port.
    pub fn change_midi_input(&mut self, name: &str) -> Result<()> {
        if let Some(listener) = self.session.as_mut().and_then(|s| s.listener.take()) {
            listener.stop(STOP_JOIN_TIMEOUT);
        }

        let (closed, opened) = {
            let _guard = self.bridge.lock();
            let closed = match self.midi_in.take() {
                Some(old) => {
                    old.close();
                    true
                }
                None => false,
            };
            let opened = (!name.is_empty()).then(|| self.backend.open_input(name));
            (closed, opened)
        };
        if closed {
            self.log().info("Previous MIDI input closed.");
        }
        let Some(opened) = opened else {
            debug!("MIDI input cleared");
            return Ok(());
        };

        let (conn, source) = match opened {
            Ok(pair) => pair,
            Err(e) => {
                self.log().error(format!("❌ Error changing MIDI input: {}", e));
                return Err(e);
            }
        };
        self.log().info(format!("MIDI Input changed to: {}", name));
        self.select_device(|settings| settings.midi_input = name.to_string());
        if let ChannelMode::Single(ch) = self.channel_mode() {
            self.log().info(format!("OSC channel set to {}", ch));
        }

        let mut handle = InputHandle {
            conn,
            source: Some(source),
        };
        if let Some(session) = self.session.as_mut() {
            if let Some(rx) = handle.source.take() {
                session.listener = Some(InboundListener::spawn(rx, Arc::clone(&self.bridge))?);
            }
        }
        self.midi_in = Some(handle);
        Ok(())
    }

    /// Replace the MIDI output under the session lock.
    pub fn change_midi_output(&mut self, name: &str) -> Result<()> {
        let mut state = self.bridge.lock();
        let had_output = state.midi_out.take().is_some();
        if name.is_empty() {
            return Ok(());
        }
        let opened = self.backend.open_output(name);
        match opened {
            Ok(output) => {
                state.midi_out = Some(output);
                drop(state);
                self.select_device(|settings| settings.midi_output = name.to_string());
                if had_output {
                    self.log().info("Previous MIDI output closed.");
                }
                self.log().info(format!("MIDI Output changed to: {}", name));
                Ok(())
            }
            Err(e) => {
                drop(state);
                self.log().error(format!("❌ Error changing MIDI output: {}", e));
                Err(e)
            }
        }
    }

    /// Make a device change stick across restarts: the running session's
    /// settings and the config are both updated.
    fn select_device(&mut self, apply: impl Fn(&mut BridgeSettings)) {
        if let Some(session) = self.session.as_mut() {
            apply(&mut session.settings);
        }
        let mut selected = self.config.settings();
        apply(&mut selected);
        self.config.midi_input_port = selected.midi_input;
        self.config.midi_output_port = selected.midi_output;
    }

    pub fn input_ports(&self) -> Result<Vec<String>> {
        self.backend.input_ports()
    }

    pub fn output_ports(&self) -> Result<Vec<String>> {
        self.backend.output_ports()
    }

    // Playlist and playback delegations.

    pub fn add_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.bridge.lock().playlist.add_file(path)?;
        self.log().info(format!("✅ Added: {}", path.display()));
        Ok(())
    }

    pub fn add_directory<P: AsRef<Path>>(&self, dir: P) -> Result<usize> {
        let dir = dir.as_ref();
        let added = self.bridge.lock().playlist.add_directory(dir)?;
        self.log()
            .info(format!("🎵 Added {} files from {}", added, dir.display()));
        Ok(added)
    }

    /// Path-list intake. Returns how many were accepted.
    pub fn add_paths<I, P>(&self, paths: I) -> usize
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let (added, rejected) = self.bridge.lock().playlist.add_paths(paths);
        for path in &added {
            self.log()
                .info(format!("Added via drag-drop: {}", path.display()));
        }
        for path in &rejected {
            self.log()
                .warn(format!("Invalid file type: {}", path.display()));
        }
        added.len()
    }

    pub fn remove_file(&self, index: usize) -> Option<PathBuf> {
        let removed = self.bridge.lock().playlist.remove(index);
        if let Some(path) = &removed {
            self.log().info(format!("🧹 Removed: {}", path.display()));
        }
        removed
    }

    pub fn describe_playlist(&self) -> String {
        self.bridge.lock().playlist.describe()
    }

    pub fn play(&mut self) -> bool {
        self.player.play()
    }

    pub fn is_playing(&self) -> bool {
        self.player.is_running()
    }

    pub fn skip_forward(&mut self) {
        self.player.skip_forward();
    }

    pub fn skip_back(&mut self) {
        self.player.skip_back();
    }

    pub fn stop_playback(&mut self) {
        self.player.stop();
    }

    pub fn toggle_pause(&self) -> PlaybackState {
        self.player.toggle_pause()
    }

    pub fn set_looping(&self, looping: bool) {
        self.player.set_looping(looping);
    }

    pub fn looping(&self) -> bool {
        self.bridge.lock().playlist.looping()
    }

    pub fn set_tempo(&self, bpm: u32) -> Result<TempoSetting> {
        self.player.set_tempo(bpm)
    }

    pub fn reset_tempo(&self) -> Result<Option<TempoSetting>> {
        self.player.reset_tempo()
    }
}

impl Drop for BridgeController {
    fn drop(&mut self) {
        self.stop();
    }
}
