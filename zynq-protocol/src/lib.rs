//! # Zynq Bridge Protocol
//!
//! This crate implements the wire protocol spoken between the PC-side bridge
//! and the application running on a Zynq FPGA board, together with the
//! command grammar the operator types.
//!
//! ## Overview
//!
//! The bridge turns short text commands into binary frames:
//!
//! - **Command grammar** ([`command`]): `id`, `load`, `rstptr`, `status`,
//!   `route`, `rstfifo`, `rstfpga`, `custom`, `abort`, `exit`
//! - **Frame codec** ([`codec::FrameCodec`]): one opcode byte per command,
//!   followed by the command payload
//! - **File chunker** ([`chunker`]): lazy, fixed size reading of binaries
//!   streamed to a memory pointer of the device
//! - **Device decoder** ([`codec::DeviceDecoder`]): the device's view of the
//!   stream, used to emulate the FPGA and to test the encoder
//!
//! ## Basic Usage
//!
//! ### Encoding an Operator Command
//!
//! ```
//! use zynq_protocol::{Command, ProtocolConfig};
//! use zynq_protocol::codec::{Encoded, FrameCodec};
//!
//! let codec = FrameCodec::new(ProtocolConfig::default());
//! let command: Command = "route 3".parse().expect("valid command");
//! match codec.encode(&command).expect("pointer 3 is valid") {
//!     Encoded::Single(frame) => assert_eq!(frame.as_bytes(), &[0x90, 3]),
//!     _ => unreachable!(),
//! }
//! ```
//!
//! ### Reading Frames on the Device Side
//!
//! ```
//! use zynq_protocol::{Pointer, PointerTarget, ProtocolConfig};
//! use zynq_protocol::codec::{DeviceDecoder, DeviceFrame};
//! use std::io::Cursor;
//!
//! let mut decoder = DeviceDecoder::new(ProtocolConfig::default());
//! let mut wire = Cursor::new(vec![0x20, 0x08, 0x20, 0x01]);
//! assert_eq!(
//!     decoder.read_frame(&mut wire).expect("frame should parse"),
//!     DeviceFrame::ResetPointer(PointerTarget::All)
//! );
//! assert_eq!(
//!     decoder.read_frame(&mut wire).expect("frame should parse"),
//!     DeviceFrame::ResetPointer(PointerTarget::One(Pointer::new(1)))
//! );
//! ```
//!
//! ## Message Format
//!
//! With the default [`OpcodeTable`]:
//!
//! - **id**: `0x00`
//! - **load**: `0x10 <pointer> <marker> <len: u16 BE> <chunk>` per chunk,
//!   `marker` is `0x01` on the final chunk
//! - **rstptr**: `0x20 <pointer>`, `0x20 0x08` for all pointers
//! - **status**: `0x80`
//! - **route**: `0x90 <pointer>`
//! - **rstfifo**: `0xA0`
//! - **rstfpga**: `0xA1`
//! - **custom**: the payload bytes, no opcode
//! - **disconnect**: `0xFF`, sent by either side
//!
//! When [`ProtocolConfig::use_length_prefix`] is off, the first load frame
//! carries the file length as `u32 BE` instead and later frames carry no
//! length at all.
//!
//! ## Features
//!
//! - `tokio`: [`tokio_util::codec`] encoder and decoder for the bridge side
//!   of the connection
pub mod protocol;
pub use protocol::*;
pub mod chunker;
pub mod codec;
pub mod command;
pub mod error;
#[cfg(feature = "tokio")]
pub mod framed;
