//! The single TCP connection to the FPGA.
use std::{io, net::SocketAddr};

use futures::SinkExt;
use tokio::net::{
    TcpListener, TcpStream, ToSocketAddrs,
    tcp::{OwnedReadHalf, OwnedWriteHalf},
};
use tokio_util::codec::{FramedRead, FramedWrite};
use zynq_protocol::{
    Frame,
    framed::{FrameEncoder, InboundDecoder},
};

use crate::error::BridgeError;

/// Everything received from the device, until it disconnects or the socket fails.
pub type ReceiveStream = FramedRead<OwnedReadHalf, InboundDecoder>;

/// Owns the socket to the device.
///
/// The write half stays with the session; the read half is handed out once
/// through [`Session::receive_stream`]. Dropping the session releases the socket.
#[derive(Debug)]
pub struct Session {
    peer: SocketAddr,
    writer: Option<FramedWrite<OwnedWriteHalf, FrameEncoder>>,
    reader: Option<OwnedReadHalf>,
}

impl Session {
    /// Listens on `addr` and waits for the device to connect.
    pub async fn accept(addr: impl ToSocketAddrs) -> io::Result<Session> {
        let listener = TcpListener::bind(addr).await?;
        log::info!("Listening for the device on {}", listener.local_addr()?);
        let (stream, peer) = listener.accept().await?;
        log::info!("Accepted connection from {}", peer);
        Session::from_stream(stream)
    }

    /// Connects to a device listening on `addr`.
    pub async fn connect(addr: impl ToSocketAddrs) -> io::Result<Session> {
        let stream = TcpStream::connect(addr).await?;
        log::info!("Connected to {}", stream.peer_addr()?);
        Session::from_stream(stream)
    }

    pub fn from_stream(stream: TcpStream) -> io::Result<Session> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();
        Ok(Session {
            peer,
            writer: Some(FramedWrite::new(writer, FrameEncoder)),
            reader: Some(reader),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Writes one frame and flushes it.
    pub async fn send(&mut self, frame: Frame) -> Result<(), BridgeError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| BridgeError::Send(io::ErrorKind::NotConnected.into()))?;
        log::trace!("Sending frame: {:02x?}", frame.as_bytes());
        writer.send(frame).await.map_err(BridgeError::Send)
    }

    /// The inbound side of the connection. Only the first call returns a stream.
    pub fn receive_stream(&mut self) -> Option<ReceiveStream> {
        self.reader
            .take()
            .map(|reader| FramedRead::new(reader, InboundDecoder))
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }

    /// Flushes pending bytes and shuts down the write half. Calling it again does nothing.
    pub async fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.close().await {
                log::warn!("Error while closing the connection to {}: {}", self.peer, e);
            }
            log::info!("Connection to {} closed", self.peer);
        }
        self.reader = None;
    }
}
