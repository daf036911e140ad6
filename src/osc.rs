use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};

use rosc::{OscMessage, OscPacket, OscType};

use crate::config::TransportConfig;
use crate::error::OscError;


/// A value the hub sends over OSC.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OscValue {
    Bool(bool),
    Float(f64),
}

impl OscValue {
    /// OSC has no portable boolean tag, so flags go out as int 1/0.
    fn to_osc(self) -> OscType {
        match self {
            OscValue::Bool(flag) => OscType::Int(i32::from(flag)),
            OscValue::Float(value) => OscType::Float(value as f32),
        }
    }
}

impl fmt::Display for OscValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OscValue::Bool(flag) => write!(f, "{}", i32::from(*flag)),
            OscValue::Float(value) => write!(f, "{value}"),
        }
    }
}

pub fn encode_message(path: &str, value: OscValue) -> Result<Vec<u8>, OscError> {
    let packet = OscPacket::Message(OscMessage {
        addr: path.to_string(),
        args: vec![value.to_osc()],
    });
    rosc::encoder::encode(&packet).map_err(OscError::Encode)
}


/// Opens datagram clients for an endpoint.
pub trait Connector: Send {
    type Client: Datagram;

    fn connect(&self, host: &str, port: u16) -> Result<Self::Client, OscError>;
}

/// A client bound to one peer. `send` must not block.
pub trait Datagram: Send {
    fn send(&self, datagram: &[u8]) -> Result<(), OscError>;
}

/// Resolves the OSC peer. IP literals are parsed in place; a hostname costs one
/// blocking lookup, paid only when the endpoint changes.
pub fn peer_addr(host: &str, port: u16) -> Result<SocketAddr, OscError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| OscError::Resolve {
            host: host.to_string(),
            port,
        })
}

/// Connects non-blocking UDP sockets.
#[derive(Debug, Default, Clone, Copy)]
pub struct UdpConnector;

impl Connector for UdpConnector {
    type Client = UdpSocket;

    fn connect(&self, host: &str, port: u16) -> Result<UdpSocket, OscError> {
        let peer = peer_addr(host, port)?;

        let local: SocketAddr = if peer.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(local)?;
        socket.connect(peer)?;
        socket.set_nonblocking(true)?;
        tracing::info!("OSC client bound to {peer}");
        Ok(socket)
    }
}

impl Datagram for UdpSocket {
    fn send(&self, datagram: &[u8]) -> Result<(), OscError> {
        UdpSocket::send(self, datagram)?;
        Ok(())
    }
}


/// Best-effort OSC output. Owns the one live client, if any.
pub struct OscSink<C: Connector> {
    connector: C,
    binding: Option<C::Client>,
}

impl<C: Connector> OscSink<C> {
    pub fn new(connector: C) -> Self {
        OscSink {
            connector,
            binding: None,
        }
    }

    /// Drops the client so the next send reconnects.
    pub fn invalidate(&mut self) {
        if self.binding.take().is_some() {
            tracing::debug!("OSC client invalidated");
        }
    }

    /// Sends one message to the endpoint in `config`. Failures are logged, never returned.
    pub fn send(&mut self, config: &TransportConfig, path: &str, value: OscValue) {
        if let Err(e) = self.try_send(config, path, value) {
            tracing::warn!("Error sending OSC message {path} {value}: {e}");
        }
    }

    fn try_send(&mut self, config: &TransportConfig, path: &str, value: OscValue) -> Result<(), OscError> {
        let datagram = encode_message(path, value)?;

        let client = match self.binding.take() {
            Some(client) => client,
            None => self.connector.connect(&config.host, config.port)?,
        };

        let sent = client.send(&datagram);
        self.binding = Some(client);
        sent?;
        tracing::debug!("OSC message sent: {path} {value}");
        Ok(())
    }
}
