//! Outbound transports: OSC over UDP and the MIDI output sink.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use log::trace;
use rosc::{encoder, OscPacket};

use crate::codec::NetworkMessage;
use crate::error::{BridgeError, Result};

/// Network-out. Shared between the listener, the player and test emission.
pub trait OscSink: Send + Sync {
    fn send(&self, message: &NetworkMessage) -> Result<()>;
}

/// Musical-out: a MIDI output port or anything that accepts raw bytes.
pub trait MidiSink: Send {
    fn send(&mut self, bytes: &[u8]) -> Result<()>;
}

impl MidiSink for midir::MidiOutputConnection {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        midir::MidiOutputConnection::send(self, bytes)
            .map_err(|e| BridgeError::Device(format!("MIDI send failed: {}", e)))
    }
}

/// Fire-and-forget UDP client sending OSC 1.0 packets to one target.
#[derive(Debug)]
pub struct UdpOscClient {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpOscClient {
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let target = (host, port)
            .to_socket_addrs()
            .map_err(|e| {
                BridgeError::Configuration(format!("Cannot resolve OSC target {}:{}: {}", host, port, e))
            })?
            .find(|addr| addr.is_ipv4())
            .ok_or_else(|| {
                BridgeError::Configuration(format!("No IPv4 address for OSC target {}", host))
            })?;
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        Ok(UdpOscClient { socket, target })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

impl OscSink for UdpOscClient {
    fn send(&self, message: &NetworkMessage) -> Result<()> {
        let packet = OscPacket::Message(message.to_osc());
        let buf = encoder::encode(&packet)
            .map_err(|e| BridgeError::Protocol(format!("OSC encode failed: {:?}", e)))?;
        self.socket.send_to(&buf, self.target)?;
        trace!("OSC -> {} {}", self.target, message);
        Ok(())
    }
}
