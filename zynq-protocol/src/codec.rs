//! Conversion between commands and the bytes exchanged with the device
use std::{
    fmt::Display,
    io::{self, Read},
};

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    chunker::{Chunk, Chunks, FileChunker},
    error::{ConfigError, DecodeError, EncodeError, FileError},
    protocol::{
        Command, DISCONNECT, END_OF_TRANSFER, Frame, InboundRecord, MORE_CHUNKS, OpcodeTable,
        Pointer, PointerTarget, ProtocolConfig,
    },
};

/// Result of encoding one command.
#[derive(Debug)]
pub enum Encoded {
    /// The command is a single frame.
    Single(Frame),
    /// The command streams a file, one frame per chunk.
    Transfer(Transfer),
    /// The command only affects the bridge and sends nothing.
    Local,
}

/// Encodes commands into frames and stamps bytes received from the device.
#[derive(Clone, Debug, Default)]
pub struct FrameCodec {
    config: ProtocolConfig,
}

impl FrameCodec {
    pub fn new(config: ProtocolConfig) -> FrameCodec {
        FrameCodec { config }
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn encode(&self, command: &Command) -> Result<Encoded, EncodeError> {
        let opcodes = &self.config.opcodes;
        let frame = match command {
            Command::Identify => Frame::opcode(opcodes.identify),
            Command::Load { pointer, path } => {
                let id = self.pointer_byte(*pointer)?;
                let chunker = FileChunker::new(path, self.config.chunk_size)?;
                if self.config.use_length_prefix && self.config.chunk_size > u16::MAX as usize {
                    return Err(ConfigError::ChunkSize(self.config.chunk_size).into());
                }
                return Ok(Encoded::Transfer(Transfer::new(
                    *pointer,
                    id,
                    chunker.chunks()?,
                    opcodes.load,
                    self.config.use_length_prefix,
                )?));
            }
            Command::ResetPointer(PointerTarget::One(pointer)) => {
                Frame::with_payload(opcodes.reset_pointer, &[self.pointer_byte(*pointer)?])
            }
            Command::ResetPointer(PointerTarget::All) => {
                Frame::with_payload(opcodes.reset_pointer, &[opcodes.all_pointers])
            }
            Command::Status => Frame::opcode(opcodes.status),
            Command::Route { pointer } => {
                Frame::with_payload(opcodes.route, &[self.pointer_byte(*pointer)?])
            }
            Command::ResetFifo => Frame::opcode(opcodes.reset_fifo),
            Command::ResetFpga => Frame::opcode(opcodes.reset_fpga),
            Command::Custom { payload, binary } => {
                let bytes = if *binary {
                    parse_bit_string(payload)?
                } else {
                    payload.as_bytes().to_vec()
                };
                if bytes == [DISCONNECT] {
                    return Err(EncodeError::DisconnectByte);
                }
                Frame::raw(bytes)
            }
            Command::Abort => return Ok(Encoded::Local),
            Command::Disconnect => Frame::disconnect(),
        };
        Ok(Encoded::Single(frame))
    }

    /// Stamps raw bytes received from the device with the current time.
    pub fn decode(&self, raw: Bytes) -> InboundRecord {
        InboundRecord::new(raw)
    }

    /// Interprets the reply header of a received record.
    pub fn reply(&self, record: &InboundRecord) -> Option<Reply> {
        Reply::parse(record.bytes(), &self.config.opcodes)
    }

    /// The wire byte of `pointer`, if the device accepts it.
    fn pointer_byte(&self, pointer: Pointer) -> Result<u8, EncodeError> {
        match pointer.byte() {
            Some(id) if self.config.pointers.contains(pointer) => Ok(id),
            _ => Err(EncodeError::InvalidPointer {
                pointer,
                valid: self.config.pointers.clone(),
            }),
        }
    }
}

/// Packs a string of `0` and `1` characters into bytes, most significant bit first.
pub fn parse_bit_string(literal: &str) -> Result<Vec<u8>, EncodeError> {
    let invalid = |reason| EncodeError::InvalidBitString {
        literal: literal.to_string(),
        reason,
    };
    if literal.is_empty() {
        return Err(invalid("no bits given"));
    }
    if literal.bytes().any(|b| b != b'0' && b != b'1') {
        return Err(invalid("only '0' and '1' are allowed"));
    }
    if literal.len() % 8 != 0 {
        return Err(invalid("length must be a multiple of 8"));
    }
    Ok(literal
        .as_bytes()
        .chunks(8)
        .map(|bits| bits.iter().fold(0u8, |acc, bit| (acc << 1) | (bit - b'0')))
        .collect())
}

/// Load frames of one file, produced lazily from its chunks.
///
/// Frame layout, with `marker` being [`MORE_CHUNKS`] or [`END_OF_TRANSFER`]:
///
/// - length prefix policy: `[load][pointer][marker][chunk length: u16 BE][chunk]`
/// - total length policy: `[load][pointer][marker][file length: u32 BE][chunk]` for the
///   first frame and `[load][pointer][marker][chunk]` for the following ones
#[derive(Debug)]
pub struct Transfer {
    pointer: Pointer,
    id: u8,
    chunks: Chunks,
    opcode: u8,
    use_length_prefix: bool,
}

/// One frame of a [`Transfer`].
#[derive(Clone, Debug)]
pub struct TransferFrame {
    pub frame: Frame,
    /// Number of file bytes in the frame.
    pub payload_len: usize,
    pub last: bool,
}

impl Transfer {
    fn new(
        pointer: Pointer,
        id: u8,
        chunks: Chunks,
        opcode: u8,
        use_length_prefix: bool,
    ) -> Result<Transfer, FileError> {
        let total = chunks.total_bytes();
        if total == 0 {
            return Err(FileError::Empty {
                path: chunks.path().to_path_buf(),
            });
        }
        if !use_length_prefix && total > u32::MAX as u64 {
            return Err(FileError::TooLarge {
                path: chunks.path().to_path_buf(),
                size: total,
                max: u32::MAX as u64,
            });
        }
        Ok(Transfer {
            pointer,
            id,
            chunks,
            opcode,
            use_length_prefix,
        })
    }

    pub fn pointer(&self) -> Pointer {
        self.pointer
    }

    pub fn total_bytes(&self) -> u64 {
        self.chunks.total_bytes()
    }

    fn frame(&self, chunk: &Chunk) -> Result<Frame, EncodeError> {
        let mut buf = BytesMut::with_capacity(chunk.len() + 7);
        buf.put_u8(self.opcode);
        buf.put_u8(self.id);
        buf.put_u8(if chunk.is_last() {
            END_OF_TRANSFER
        } else {
            MORE_CHUNKS
        });
        if self.use_length_prefix {
            let len =
                u16::try_from(chunk.len()).map_err(|_| ConfigError::ChunkSize(chunk.len()))?;
            buf.put_u16(len);
        } else if chunk.seq() == 0 {
            buf.put_u32(self.total_bytes() as u32);
        }
        buf.put_slice(chunk.data());
        Ok(Frame::raw(buf.freeze()))
    }
}

impl Iterator for Transfer {
    type Item = Result<TransferFrame, EncodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk = match self.chunks.next()? {
            Ok(chunk) => chunk,
            Err(e) => return Some(Err(e.into())),
        };
        let frame = match self.frame(&chunk) {
            Ok(frame) => frame,
            Err(e) => return Some(Err(e)),
        };
        Some(Ok(TransferFrame {
            frame,
            payload_len: chunk.len(),
            last: chunk.is_last(),
        }))
    }
}

/// The command a device reply refers to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReplyKind {
    Identify,
    Load(Pointer),
    ResetPointer(PointerTarget),
    Status,
    Route(Pointer),
    ResetFifo,
    ResetFpga,
}

impl Display for ReplyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplyKind::Identify => write!(f, "id"),
            ReplyKind::Load(pointer) => write!(f, "load {}", pointer),
            ReplyKind::ResetPointer(target) => write!(f, "rstptr {}", target),
            ReplyKind::Status => write!(f, "status"),
            ReplyKind::Route(pointer) => write!(f, "route {}", pointer),
            ReplyKind::ResetFifo => write!(f, "rstfifo"),
            ReplyKind::ResetFpga => write!(f, "rstfpga"),
        }
    }
}

/// A device reply: the header byte echoes the command, pointer commands
/// carry the pointer in the low nibble, and the remaining bytes are
/// either a decimal status code or free text.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Reply {
    kind: ReplyKind,
    payload: Bytes,
}

impl Reply {
    pub fn parse(bytes: &Bytes, opcodes: &OpcodeTable) -> Option<Reply> {
        let (&header, _) = bytes.split_first()?;
        let kind = if header == opcodes.identify {
            ReplyKind::Identify
        } else if header == opcodes.status {
            ReplyKind::Status
        } else if header == opcodes.reset_fifo {
            ReplyKind::ResetFifo
        } else if header == opcodes.reset_fpga {
            ReplyKind::ResetFpga
        } else {
            let family = |opcode: u8| opcode & 0x0F == 0 && header & 0xF0 == opcode;
            let pointer = Pointer::new(header & 0x0F);
            if family(opcodes.load) {
                ReplyKind::Load(pointer)
            } else if family(opcodes.route) {
                ReplyKind::Route(pointer)
            } else if family(opcodes.reset_pointer) {
                if header & 0x0F == opcodes.all_pointers {
                    ReplyKind::ResetPointer(PointerTarget::All)
                } else {
                    ReplyKind::ResetPointer(PointerTarget::One(pointer))
                }
            } else {
                return None;
            }
        };
        Some(Reply {
            kind,
            payload: bytes.slice(1..),
        })
    }

    pub fn kind(&self) -> ReplyKind {
        self.kind
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// The status code carried by the reply, if the payload is a number.
    pub fn code(&self) -> Option<i64> {
        std::str::from_utf8(&self.payload).ok()?.trim().parse().ok()
    }
}

impl Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;
        if self.payload.is_empty() {
            return Ok(());
        }
        match (self.code(), std::str::from_utf8(&self.payload)) {
            (Some(0), _) => write!(f, " OK"),
            (Some(code), _) => write!(f, " ERROR {}", code),
            (None, Ok(text)) => write!(f, " {:?}", text),
            (None, Err(_)) => write!(f, " {:02x?}", &self.payload[..]),
        }
    }
}

/// A frame as the device sees it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DeviceFrame {
    Identify,
    LoadChunk {
        pointer: Pointer,
        /// File length, present in the first frame of a total length transfer.
        total: Option<u32>,
        data: Bytes,
        last: bool,
    },
    ResetPointer(PointerTarget),
    Status,
    Route(Pointer),
    ResetFifo,
    ResetFpga,
    Disconnect,
}

impl DeviceFrame {
    /// Header byte of the reply the device sends for this frame.
    pub fn reply_header(&self, opcodes: &OpcodeTable) -> Option<u8> {
        Some(match self {
            DeviceFrame::Identify => opcodes.identify,
            DeviceFrame::LoadChunk { pointer, .. } => opcodes.load | pointer.byte()?,
            DeviceFrame::ResetPointer(PointerTarget::One(pointer)) => {
                opcodes.reset_pointer | pointer.byte()?
            }
            DeviceFrame::ResetPointer(PointerTarget::All) => {
                opcodes.reset_pointer | opcodes.all_pointers
            }
            DeviceFrame::Status => opcodes.status,
            DeviceFrame::Route(pointer) => opcodes.route | pointer.byte()?,
            DeviceFrame::ResetFifo => opcodes.reset_fifo,
            DeviceFrame::ResetFpga => opcodes.reset_fpga,
            DeviceFrame::Disconnect => return None,
        })
    }
}

/// Reads frames sent by the bridge, the inverse of [`FrameCodec::encode`].
///
/// Custom frames have no opcode and cannot be told apart from other frames.
#[derive(Clone, Debug)]
pub struct DeviceDecoder {
    config: ProtocolConfig,
    /// Bytes still expected from a total length transfer.
    remaining: Option<u64>,
}

impl DeviceDecoder {
    pub fn new(config: ProtocolConfig) -> DeviceDecoder {
        DeviceDecoder {
            config,
            remaining: None,
        }
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn read_frame(&mut self, reader: &mut impl Read) -> Result<DeviceFrame, DecodeError> {
        let opcodes = &self.config.opcodes;
        let opcode = read_u8(reader)?;
        let frame = if opcode == DISCONNECT {
            DeviceFrame::Disconnect
        } else if opcode == opcodes.identify {
            DeviceFrame::Identify
        } else if opcode == opcodes.status {
            DeviceFrame::Status
        } else if opcode == opcodes.reset_fifo {
            DeviceFrame::ResetFifo
        } else if opcode == opcodes.reset_fpga {
            DeviceFrame::ResetFpga
        } else if opcode == opcodes.route {
            DeviceFrame::Route(Pointer::new(read_u8(reader)?))
        } else if opcode == opcodes.reset_pointer {
            let id = read_u8(reader)?;
            if id == opcodes.all_pointers {
                DeviceFrame::ResetPointer(PointerTarget::All)
            } else {
                DeviceFrame::ResetPointer(PointerTarget::One(Pointer::new(id)))
            }
        } else if opcode == opcodes.load {
            return self.read_load(reader);
        } else {
            return Err(DecodeError::UnknownOpcode(opcode));
        };
        Ok(frame)
    }

    fn read_load(&mut self, reader: &mut impl Read) -> Result<DeviceFrame, DecodeError> {
        let pointer = Pointer::new(read_u8(reader)?);
        let last = match read_u8(reader)? {
            END_OF_TRANSFER => true,
            MORE_CHUNKS => false,
            other => return Err(DecodeError::InvalidMarker(other)),
        };

        let mut total = None;
        let len = if self.config.use_length_prefix {
            let mut buf = [0u8; 2];
            reader.read_exact(&mut buf)?;
            u16::from_be_bytes(buf) as usize
        } else {
            let remaining = match self.remaining {
                Some(remaining) => remaining,
                None => {
                    let mut buf = [0u8; 4];
                    reader.read_exact(&mut buf)?;
                    let length = u32::from_be_bytes(buf);
                    total = Some(length);
                    length as u64
                }
            };
            let len = remaining.min(self.config.chunk_size as u64);
            self.remaining = Some(remaining - len);
            len as usize
        };
        if last {
            self.remaining = None;
        }

        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        Ok(DeviceFrame::LoadChunk {
            pointer,
            total,
            data: data.into(),
            last,
        })
    }
}

fn read_u8(reader: &mut impl Read) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}
