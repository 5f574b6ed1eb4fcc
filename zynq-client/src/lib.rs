//! # Zynq Device Client
//!
//! The device side of the Zynq bridge protocol. The FPGA application
//! connects to the bridge, reads command frames and answers with reply
//! frames; [`DeviceClient`] does the same over a plain blocking socket so
//! the bridge can be exercised without hardware.
//!
//! ## Basic Usage
//!
//! ```ignore
//! use zynq_client::DeviceClient;
//! use zynq_protocol::{ProtocolConfig, codec::DeviceFrame};
//!
//! let mut device = DeviceClient::connect("127.0.0.1:16384", ProtocolConfig::default())?;
//!
//! // The bridge identifies the device first
//! let frame = device.read_frame()?;
//! assert_eq!(frame, DeviceFrame::Identify);
//! device.ack(&frame, 0)?;
//!
//! // Receive a whole file loaded by the operator
//! let (pointer, data) = device.receive_transfer()?;
//!
//! // End the session from the device side
//! device.disconnect()?;
//! ```
//!
//! ## Related Crates
//!
//! - `zynq-server` - the bridge this client talks to
//! - `zynq-protocol` - frame encoding and decoding
use std::{
    io::{self, Read, Write},
    net::{Shutdown, TcpStream, ToSocketAddrs},
};

use bytes::BytesMut;
use zynq_protocol::{
    DISCONNECT, Pointer, ProtocolConfig,
    codec::{DeviceDecoder, DeviceFrame},
    error::DecodeError,
};

/// Emulated FPGA application.
pub struct DeviceClient {
    tcp: TcpStream,
    decoder: DeviceDecoder,
}

impl DeviceClient {
    pub fn connect(addr: impl ToSocketAddrs, config: ProtocolConfig) -> io::Result<DeviceClient> {
        let tcp = TcpStream::connect(addr)?;
        tcp.set_nodelay(true)?;
        Ok(DeviceClient {
            tcp,
            decoder: DeviceDecoder::new(config),
        })
    }

    pub fn config(&self) -> &ProtocolConfig {
        self.decoder.config()
    }

    /// Blocks until the bridge sends the next frame.
    pub fn read_frame(&mut self) -> Result<DeviceFrame, DecodeError> {
        self.decoder.read_frame(&mut self.tcp)
    }

    /// Reads exactly `len` bytes. Custom frames carry no opcode and can only be read this way.
    pub fn read_raw(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0; len];
        self.tcp.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Reads load frames until the end of transfer marker and returns the file contents.
    pub fn receive_transfer(&mut self) -> Result<(Pointer, Vec<u8>), DecodeError> {
        let mut contents = BytesMut::new();
        let mut target = None;
        loop {
            match self.read_frame()? {
                DeviceFrame::LoadChunk {
                    pointer,
                    data,
                    last,
                    ..
                } if target.is_none_or(|p| p == pointer) => {
                    target = Some(pointer);
                    contents.extend_from_slice(&data);
                    if last {
                        return Ok((pointer, contents.to_vec()));
                    }
                }
                other => {
                    return Err(DecodeError::UnexpectedFrame {
                        expected: "a load chunk",
                        received: format!("{:?}", other),
                    });
                }
            }
        }
    }

    /// Sends a reply frame: `header` followed by `payload`.
    pub fn reply(&mut self, header: u8, payload: &[u8]) -> io::Result<()> {
        let mut frame = Vec::with_capacity(payload.len() + 1);
        frame.push(header);
        frame.extend_from_slice(payload);
        self.send_raw(&frame)
    }

    /// Answers `frame` with a decimal status code, `0` meaning success.
    pub fn ack(&mut self, frame: &DeviceFrame, code: i64) -> io::Result<()> {
        let header = frame
            .reply_header(&self.config().opcodes)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "nothing to acknowledge"))?;
        self.reply(header, code.to_string().as_bytes())
    }

    pub fn send_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.tcp.write_all(bytes)?;
        self.tcp.flush()
    }

    /// Sends the disconnect byte. The bridge closes the connection in response.
    pub fn disconnect(&mut self) -> io::Result<()> {
        self.send_raw(&[DISCONNECT])
    }

    /// Reads until the bridge closes the connection and returns whatever arrived before.
    pub fn wait_closed(&mut self) -> io::Result<Vec<u8>> {
        let mut rest = Vec::new();
        self.tcp.read_to_end(&mut rest)?;
        Ok(rest)
    }

    /// Closes the connection without the disconnect byte.
    pub fn hang_up(self) -> io::Result<()> {
        self.tcp.shutdown(Shutdown::Both)
    }
}
