use std::{collections::BTreeSet, fmt::Display, path::PathBuf};

use bytes::Bytes;
use chrono::{DateTime, Local};

use crate::error::ConfigError;

/// Byte sent by either side to announce the end of the session.
pub const DISCONNECT: u8 = 0xFF;

/// Default number of file bytes carried by one load frame.
/// The device reads 512 byte buffers, one of which is the command byte.
pub const CHUNK_SIZE: usize = 511;

/// Whether each load frame carries its own chunk length (`true`) or the
/// first frame of a transfer carries the total file length (`false`).
pub const USE_LENGTH_PREFIX: bool = true;

/// Marker byte of a load frame that is followed by more chunks.
pub const MORE_CHUNKS: u8 = 0x00;

/// Marker byte of the final load frame of a transfer.
pub const END_OF_TRANSFER: u8 = 0x01;

/// Identifier of an addressable memory region on the FPGA.
///
/// Holds any number the operator typed. Only pointers that fit in one byte go on the wire.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Pointer(u32);

impl Pointer {
    pub const fn new(id: u8) -> Pointer {
        Pointer(id as u32)
    }

    pub fn number(&self) -> u32 {
        self.0
    }

    /// The pointer byte, `None` when the number does not fit in one.
    pub fn byte(&self) -> Option<u8> {
        u8::try_from(self.0).ok()
    }
}

impl From<u32> for Pointer {
    fn from(number: u32) -> Pointer {
        Pointer(number)
    }
}

impl Display for Pointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The pointers the device accepts.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PointerSet {
    ids: BTreeSet<u8>,
}

impl PointerSet {
    pub fn new(ids: impl IntoIterator<Item = u8>) -> PointerSet {
        PointerSet {
            ids: ids.into_iter().collect(),
        }
    }

    pub fn contains(&self, pointer: Pointer) -> bool {
        pointer.byte().is_some_and(|id| self.ids.contains(&id))
    }

    pub fn iter(&self) -> impl Iterator<Item = Pointer> + '_ {
        self.ids.iter().copied().map(Pointer::new)
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl Default for PointerSet {
    /// Pointers 0 to 7, the range addressable by the 4 bit info field.
    fn default() -> Self {
        PointerSet::new(0..=7)
    }
}

impl Display for PointerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, pointer) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", pointer)?;
        }
        write!(f, "}}")
    }
}

/// Target of a pointer reset.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PointerTarget {
    One(Pointer),
    /// Every pointer at once. Encoded with [`OpcodeTable::all_pointers`].
    All,
}

impl Display for PointerTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PointerTarget::One(pointer) => write!(f, "{}", pointer),
            PointerTarget::All => write!(f, "all"),
        }
    }
}

/// A command entered by the operator.
/// Each command is parsed from one input line and dispatched exactly once.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    /// Asks the device to identify itself.
    Identify,
    /// Streams a binary file to the memory region behind `pointer`.
    Load { pointer: Pointer, path: PathBuf },
    /// Rewinds one pointer, or all of them.
    ResetPointer(PointerTarget),
    /// Queries the FPGA status.
    Status,
    /// Configures which region feeds the FPGA data block output.
    Route { pointer: Pointer },
    /// Clears the FPGA fifo.
    ResetFifo,
    /// Resets the programmable logic.
    ResetFpga,
    /// Sends operator supplied bytes. With `binary` set, `payload` is a bit string.
    Custom { payload: String, binary: bool },
    /// Cancels the transfer in progress. Has no wire representation.
    Abort,
    /// Ends the session.
    Disconnect,
}

impl Command {
    /// The grammar word of this command.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Identify => "id",
            Command::Load { .. } => "load",
            Command::ResetPointer(_) => "rstptr",
            Command::Status => "status",
            Command::Route { .. } => "route",
            Command::ResetFifo => "rstfifo",
            Command::ResetFpga => "rstfpga",
            Command::Custom { .. } => "custom",
            Command::Abort => "abort",
            Command::Disconnect => "exit",
        }
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Load { pointer, path } => write!(f, "load {} {}", pointer, path.display()),
            Command::ResetPointer(target) => write!(f, "rstptr {}", target),
            Command::Route { pointer } => write!(f, "route {}", pointer),
            Command::Custom {
                payload,
                binary: true,
            } => write!(f, "custom -b {}", payload),
            Command::Custom {
                payload,
                binary: false,
            } => write!(f, "custom {}", payload),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// Opcode byte of each command frame.
///
/// The device integration owns these values. The defaults follow the
/// `[target: 1 bit | command: 3 bits | info: 4 bits]` header the FPGA
/// application decodes, with the info nibble left at zero.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OpcodeTable {
    pub identify: u8,
    pub load: u8,
    pub reset_pointer: u8,
    pub status: u8,
    pub route: u8,
    pub reset_fifo: u8,
    pub reset_fpga: u8,
    /// Pointer byte meaning "all pointers" in a reset.
    pub all_pointers: u8,
}

impl OpcodeTable {
    fn named(&self) -> [(&'static str, u8); 7] {
        [
            ("id", self.identify),
            ("load", self.load),
            ("rstptr", self.reset_pointer),
            ("status", self.status),
            ("route", self.route),
            ("rstfifo", self.reset_fifo),
            ("rstfpga", self.reset_fpga),
        ]
    }
}

impl Default for OpcodeTable {
    fn default() -> Self {
        OpcodeTable {
            identify: 0x00,
            load: 0x10,
            reset_pointer: 0x20,
            status: 0x80,
            route: 0x90,
            reset_fifo: 0xA0,
            reset_fpga: 0xA1,
            all_pointers: 0x08,
        }
    }
}

/// Everything the codec needs to know about the device protocol.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProtocolConfig {
    pub opcodes: OpcodeTable,
    pub pointers: PointerSet,
    /// Number of file bytes per load frame.
    pub chunk_size: usize,
    /// See [`USE_LENGTH_PREFIX`].
    pub use_length_prefix: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        ProtocolConfig {
            opcodes: OpcodeTable::default(),
            pointers: PointerSet::default(),
            chunk_size: CHUNK_SIZE,
            use_length_prefix: USE_LENGTH_PREFIX,
        }
    }
}

impl ProtocolConfig {
    /// Checks that opcodes are distinct, that no opcode is the disconnect
    /// byte and that the "all pointers" byte is not a real pointer.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let named = self.opcodes.named();
        for (i, &(name, opcode)) in named.iter().enumerate() {
            if opcode == DISCONNECT {
                return Err(ConfigError::ReservedOpcode(name));
            }
            if let Some(&(other, _)) = named[i + 1..].iter().find(|(_, o)| *o == opcode) {
                return Err(ConfigError::DuplicateOpcode {
                    first: name,
                    second: other,
                    opcode,
                });
            }
        }
        if self
            .pointers
            .contains(Pointer::new(self.opcodes.all_pointers))
        {
            return Err(ConfigError::SentinelCollision(self.opcodes.all_pointers));
        }
        if self.pointers.is_empty() {
            return Err(ConfigError::NoPointers);
        }
        if self.chunk_size == 0 || self.chunk_size > u16::MAX as usize {
            return Err(ConfigError::ChunkSize(self.chunk_size));
        }
        Ok(())
    }
}

#[test]
fn default_config_is_valid() {
    assert!(ProtocolConfig::default().validate().is_ok());
}

#[test]
fn sentinel_must_not_be_a_pointer() {
    let config = ProtocolConfig {
        pointers: PointerSet::new(0..=8),
        ..Default::default()
    };
    assert!(matches!(
        config.validate(),
        Err(ConfigError::SentinelCollision(0x08))
    ));
}

#[test]
fn duplicate_opcodes_are_rejected() {
    let mut config = ProtocolConfig::default();
    config.opcodes.reset_fpga = config.opcodes.status;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::DuplicateOpcode {
            first: "status",
            second: "rstfpga",
            ..
        })
    ));
}

/// The wire level unit sent to the device: an opcode byte followed by its payload.
/// Custom frames carry operator bytes verbatim and have no opcode.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    bytes: Bytes,
}

impl Frame {
    /// A frame with an opcode and no payload.
    pub fn opcode(opcode: u8) -> Frame {
        Frame {
            bytes: Bytes::copy_from_slice(&[opcode]),
        }
    }

    pub fn with_payload(opcode: u8, payload: &[u8]) -> Frame {
        let mut bytes = Vec::with_capacity(payload.len() + 1);
        bytes.push(opcode);
        bytes.extend_from_slice(payload);
        Frame {
            bytes: bytes.into(),
        }
    }

    /// A frame made of exactly `bytes`.
    pub fn raw(bytes: impl Into<Bytes>) -> Frame {
        Frame {
            bytes: bytes.into(),
        }
    }

    pub fn disconnect() -> Frame {
        Frame::opcode(DISCONNECT)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Bytes received from the device, stamped with their arrival time.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InboundRecord {
    received_at: DateTime<Local>,
    bytes: Bytes,
}

impl InboundRecord {
    pub fn new(bytes: Bytes) -> InboundRecord {
        InboundRecord::at(Local::now(), bytes)
    }

    pub fn at(received_at: DateTime<Local>, bytes: Bytes) -> InboundRecord {
        InboundRecord { received_at, bytes }
    }

    pub fn received_at(&self) -> DateTime<Local> {
        self.received_at
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }
}

/// One unit read from the device connection.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Inbound {
    Data(InboundRecord),
    /// The device sent the disconnect byte.
    Disconnect,
}
