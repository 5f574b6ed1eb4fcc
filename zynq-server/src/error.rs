use std::io;

use zynq_protocol::{
    Pointer, PointerSet,
    error::{ConfigError, EncodeError, FileError, ParseError},
};

/// Everything that can go wrong while serving the operator.
///
/// Only transport errors end the session, see [`BridgeError::is_fatal`].
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("Pointer {pointer} is out of range, valid pointers are {valid}")]
    InvalidPointer { pointer: Pointer, valid: PointerSet },
    #[error(
        "Transfer to pointer {pointer} in progress ({sent}/{total} bytes), `{command}` rejected. Use `abort` or `exit`"
    )]
    Busy {
        command: &'static str,
        pointer: Pointer,
        sent: u64,
        total: u64,
    },
    #[error(transparent)]
    FileRead(#[from] FileError),
    #[error("Could not encode the command: {0}")]
    Encoding(String),
    #[error("The session is disconnecting")]
    Disconnecting,
    #[error("Could not send to the device: {0}")]
    Send(#[source] io::Error),
    #[error("Could not receive from the device: {0}")]
    Receive(#[source] io::Error),
    #[error("Could not wait for the device: {0}")]
    Listen(#[source] io::Error),
}

impl BridgeError {
    /// Transport errors end the session, everything else is reported and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::Send(_) | BridgeError::Receive(_) | BridgeError::Listen(_)
        )
    }
}

impl From<EncodeError> for BridgeError {
    fn from(value: EncodeError) -> Self {
        match value {
            EncodeError::InvalidPointer { pointer, valid } => {
                BridgeError::InvalidPointer { pointer, valid }
            }
            EncodeError::File(error) => BridgeError::FileRead(error),
            other @ (EncodeError::InvalidBitString { .. }
            | EncodeError::DisconnectByte
            | EncodeError::Config(_)) => BridgeError::Encoding(other.to_string()),
        }
    }
}

#[test]
fn only_transport_errors_are_fatal() {
    assert!(BridgeError::Send(io::ErrorKind::BrokenPipe.into()).is_fatal());
    assert!(BridgeError::Receive(io::ErrorKind::ConnectionReset.into()).is_fatal());
    assert!(BridgeError::Listen(io::ErrorKind::AddrInUse.into()).is_fatal());
    assert!(!BridgeError::Parse(ParseError::Empty).is_fatal());
    assert!(!BridgeError::Disconnecting.is_fatal());
}

#[test]
fn encode_errors_keep_their_category() {
    let error: BridgeError = EncodeError::InvalidPointer {
        pointer: Pointer::new(99),
        valid: PointerSet::new(0..=2),
    }
    .into();
    assert_eq!(
        error.to_string(),
        "Pointer 99 is out of range, valid pointers are {0, 1, 2}"
    );

    let error: BridgeError = zynq_protocol::codec::parse_bit_string("101").unwrap_err().into();
    assert!(matches!(error, BridgeError::Encoding(_)));

    let error: BridgeError = EncodeError::Config(ConfigError::ChunkSize(70_000)).into();
    assert_eq!(
        error.to_string(),
        "Could not encode the command: Chunk size 70000 is outside 1..=65535"
    );
}
