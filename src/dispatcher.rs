//! OSC -> MIDI command dispatcher.
//!
//! A receive thread reads datagrams from the bound socket and hands them to
//! a small worker pool. Each worker decodes the packet, flattens bundles and
//! routes every message through the session's static [`RouteTable`].

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, trace, warn};
use parking_lot::Mutex;
use rosc::{decoder, OscMessage, OscPacket};

use crate::bridge::{Bridge, PlaybackState};
use crate::cancel::{join_bounded, CancellationToken};
use crate::codec::{self, Decoded, MusicalEvent, NetworkMessage, Unrecognized};
use crate::error::{BridgeError, Result};
use crate::routes::RouteTable;

pub const READ_TIMEOUT: Duration = Duration::from_millis(100);
pub const DEFAULT_WORKERS: usize = 4;
const MAX_DATAGRAM: usize = 8192;

/// Bind the inbound socket on all interfaces.
pub fn bind_inbound(port: u16) -> Result<UdpSocket> {
    UdpSocket::bind(("0.0.0.0", port)).map_err(|e| match e.kind() {
        io::ErrorKind::AddrInUse => {
            BridgeError::Configuration(format!("OSC In port {} is already in use.", port))
        }
        _ => BridgeError::Io(e),
    })
}

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Delivered(MusicalEvent),
    /// Dropped because playback is paused.
    Paused,
    /// Address not in the route table.
    Unrouted,
    Rejected(Unrecognized),
    /// No MIDI output open, or the device refused the bytes.
    NoOutput,
}

/// Route one message to the MIDI output.
pub fn route_message(bridge: &Bridge, routes: &RouteTable, message: &OscMessage) -> Dispatch {
    if routes.lookup(&message.addr).is_none() {
        bridge
            .log()
            .warn(format!("⚠️  Invalid OSC address: {}", message.addr));
        return Dispatch::Unrouted;
    }

    let now = bridge.now();
    let mut state = bridge.lock();
    state.history.evict_stale(now);
    if state.playback == PlaybackState::Paused {
        trace!("paused, dropping {}", message.addr);
        return Dispatch::Paused;
    }

    let event = match codec::decode(&message.addr, &message.args) {
        Decoded::Event(event) => event.at(now),
        Decoded::Unrecognized(reason) => {
            drop(state);
            bridge.log().warn(format!(
                "⚠️  Error handling OSC message {}: {}",
                message.addr, reason
            ));
            return Dispatch::Rejected(reason);
        }
    };

    let sent = state
        .midi_out
        .as_mut()
        .map(|out| out.send(&event.to_midi_bytes()));
    match sent {
        Some(Ok(())) => {}
        Some(Err(e)) => {
            drop(state);
            bridge.log().error(format!("❌ OSC->MIDI failed: {}", e));
            return Dispatch::NoOutput;
        }
        None => {
            drop(state);
            bridge.log().warn("⚠️  MIDI Out not initialized.");
            return Dispatch::NoOutput;
        }
    }
    let record = NetworkMessage::new(
        message.addr.clone(),
        message.args.iter().filter_map(codec::osc_int).collect(),
    );
    state.history.record(&record, event.kind, now);
    drop(state);

    bridge.log().info(format!(
        "OSC->MIDI {} channel={} data={} {}",
        event.kind, event.channel, event.primary, event.secondary
    ));
    Dispatch::Delivered(event)
}

/// Messages of a packet in order, with bundles flattened.
pub fn flatten(packet: OscPacket) -> Vec<OscMessage> {
    match packet {
        OscPacket::Message(message) => vec![message],
        OscPacket::Bundle(bundle) => bundle.content.into_iter().flat_map(flatten).collect(),
    }
}

/// Decode one datagram and route everything in it.
pub fn handle_datagram(bridge: &Bridge, routes: &RouteTable, datagram: &[u8]) -> Vec<Dispatch> {
    match decoder::decode_udp(datagram) {
        Ok((_, packet)) => flatten(packet)
            .iter()
            .map(|message| route_message(bridge, routes, message))
            .collect(),
        Err(e) => {
            let err = BridgeError::Protocol(format!("unparsable OSC packet: {:?}", e));
            bridge.log().warn(format!("⚠️  {}", err));
            Vec::new()
        }
    }
}

pub struct Dispatcher {
    token: CancellationToken,
    local_addr: SocketAddr,
    receiver: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn start(
        socket: UdpSocket,
        routes: RouteTable,
        bridge: Arc<Bridge>,
        workers: usize,
    ) -> Result<Self> {
        socket.set_read_timeout(Some(READ_TIMEOUT))?;
        let local_addr = socket.local_addr()?;
        let token = CancellationToken::new();
        let routes = Arc::new(routes);
        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let rx = Arc::new(Mutex::new(rx));

        let mut dispatcher = Dispatcher {
            token: token.clone(),
            local_addr,
            receiver: None,
            workers: Vec::new(),
        };

        for id in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            let bridge = Arc::clone(&bridge);
            let routes = Arc::clone(&routes);
            let token = token.clone();
            let handle = thread::Builder::new()
                .name(format!("e_oscmidi-osc-worker-{}", id))
                .spawn(move || work(&rx, &bridge, &routes, &token));
            match handle {
                Ok(handle) => dispatcher.workers.push(handle),
                Err(e) => {
                    dispatcher.token.cancel();
                    return Err(e.into());
                }
            }
        }

        let receive_token = token.clone();
        let receiver = thread::Builder::new()
            .name("e_oscmidi-osc-recv".into())
            .spawn(move || receive(socket, tx, &receive_token));
        match receiver {
            Ok(handle) => dispatcher.receiver = Some(handle),
            Err(e) => {
                dispatcher.token.cancel();
                return Err(e.into());
            }
        }

        debug!("OSC dispatcher listening on {}", local_addr);
        Ok(dispatcher)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.receiver
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Cancel and join every thread, each bounded by `timeout`. Returns
    /// whether all of them exited.
    pub fn shutdown(mut self, timeout: Duration) -> bool {
        self.token.cancel();
        let mut clean = true;
        if let Some(handle) = self.receiver.take() {
            clean &= join_bounded(handle, timeout).is_some();
        }
        for handle in self.workers.drain(..) {
            clean &= join_bounded(handle, timeout).is_some();
        }
        if !clean {
            warn!("OSC dispatcher did not stop within {:?}", timeout);
        }
        clean
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

fn receive(socket: UdpSocket, tx: Sender<Vec<u8>>, token: &CancellationToken) {
    let mut buf = [0u8; MAX_DATAGRAM];
    while !token.is_cancelled() {
        match socket.recv_from(&mut buf) {
            Ok((len, from)) => {
                trace!("OSC <- {} ({} bytes)", from, len);
                if tx.send(buf[..len].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            Err(e) => {
                warn!("OSC receive error: {}", e);
                token.wait_timeout(READ_TIMEOUT);
            }
        }
    }
    debug!("OSC receive thread stopped");
}

fn work(
    rx: &Mutex<Receiver<Vec<u8>>>,
    bridge: &Bridge,
    routes: &RouteTable,
    token: &CancellationToken,
) {
    loop {
        let next = rx.lock().recv_timeout(READ_TIMEOUT);
        match next {
            Ok(datagram) => {
                if token.is_cancelled() {
                    break;
                }
                handle_datagram(bridge, routes, &datagram);
            }
            Err(RecvTimeoutError::Timeout) => {
                if token.is_cancelled() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
