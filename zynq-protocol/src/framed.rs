//! [`tokio_util::codec`] adapters for the bridge side of the connection.
use std::io;

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::protocol::{DISCONNECT, Frame, Inbound, InboundRecord};

/// Writes frames as they are, without additional framing.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameEncoder;

impl Encoder<Frame> for FrameEncoder {
    type Error = io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(frame.as_bytes());
        Ok(())
    }
}

/// Turns whatever the device sent into timestamped records.
///
/// The device has no framing of its own, so every read becomes one record.
/// Only a read made of the single byte [`DISCONNECT`] is the device's
/// disconnect notice. Replies may end in `0xFF` and are delivered whole.
#[derive(Clone, Copy, Debug, Default)]
pub struct InboundDecoder;

impl Decoder for InboundDecoder {
    type Item = Inbound;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Inbound>, Self::Error> {
        match src.as_ref() {
            [] => Ok(None),
            [DISCONNECT] => {
                src.advance(1);
                Ok(Some(Inbound::Disconnect))
            }
            _ => {
                let data = src.split().freeze();
                Ok(Some(Inbound::Data(InboundRecord::new(data))))
            }
        }
    }
}
