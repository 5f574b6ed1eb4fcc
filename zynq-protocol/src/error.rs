use std::{io, path::PathBuf};

use crate::protocol::{Pointer, PointerSet};

/// Errors that may occur when parsing an operator command line.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Empty command")]
    Empty,
    #[error("Command \"{0}\" unknown")]
    UnknownCommand(String),
    #[error("`{command}` expects {expected}")]
    MissingArgument {
        command: &'static str,
        expected: &'static str,
    },
    #[error("`{value}` is not a pointer number")]
    InvalidNumber { value: String },
    #[error("Unexpected argument `{argument}` for `{command}`")]
    UnexpectedArgument {
        command: &'static str,
        argument: String,
    },
}

/// Errors that may occur when turning a command into frames.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("Pointer {pointer} is out of range, valid pointers are {valid}")]
    InvalidPointer { pointer: Pointer, valid: PointerSet },
    #[error("Invalid bit string `{literal}`: {reason}")]
    InvalidBitString {
        literal: String,
        reason: &'static str,
    },
    #[error("A custom frame of only 0xff is the disconnect byte, use `exit` instead")]
    DisconnectByte,
    #[error(transparent)]
    File(#[from] FileError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors that may occur when reading a file for a transfer.
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("{} is not a file. Nothing was sent", .path.display())]
    NotFound { path: PathBuf },
    #[error("Could not read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} is empty. Nothing was sent", .path.display())]
    Empty { path: PathBuf },
    #[error("{} is {size} bytes, the transfer length field holds at most {max}", .path.display())]
    TooLarge { path: PathBuf, size: u64, max: u64 },
}

/// Errors that may occur when the device side reads frames from a stream.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("Received unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),
    #[error("Received invalid end-of-transfer marker 0x{0:02x}")]
    InvalidMarker(u8),
    #[error("Expected {expected}, received {received}")]
    UnexpectedFrame {
        expected: &'static str,
        received: String,
    },
}

/// Inconsistent protocol configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("`{first}` and `{second}` share opcode 0x{opcode:02x}")]
    DuplicateOpcode {
        first: &'static str,
        second: &'static str,
        opcode: u8,
    },
    #[error("`{0}` uses the reserved disconnect byte 0xff")]
    ReservedOpcode(&'static str),
    #[error("The all-pointers byte 0x{0:02x} is also a valid pointer")]
    SentinelCollision(u8),
    #[error("At least one pointer must be valid")]
    NoPointers,
    #[error("Chunk size {0} is outside 1..=65535")]
    ChunkSize(usize),
}
