//! # Zynq Bridge Server Library
//!
//! This crate connects an operator console to an application running on a
//! Zynq FPGA board. The PC is the TCP server; the board connects once and
//! the session lasts until either side disconnects.
//!
//! ## Architecture
//!
//! - **[`session::Session`]**: owns the socket, sends frames, hands out the
//!   inbound stream once
//! - **[`dispatcher::Dispatcher`]**: parses operator lines, applies the
//!   session state machine and hands out load frames one chunk at a time
//! - **[`multiplexer::Multiplexer`]**: one loop over one ordered channel fed
//!   by the operator and by the device
//! - **[`sink::Sink`]**: receives the transcript, see [`sink::Terminal`] and
//!   [`sink::Transcript`]
//! - **[`server::Server`]**: ties the above together from a [`server::Config`]
//!
//! ## How It Works
//!
//! 1. The server accepts the device and, unless disabled, sends `id`
//! 2. Operator lines come from an [`InputProvider`] on a dedicated thread
//! 3. Device bytes come from a reader task; both post events to one channel
//! 4. While a file is loading, one chunk is sent whenever no event is
//!    pending, so neither source waits longer than one frame
//! 5. `exit`, the end of operator input, or the device's disconnect byte ends
//!    the session
//!
//! ## Starting the Server
//!
//! ```ignore
//! use zynq_server::server::Builder;
//! use zynq_server::sink::{Terminal, Transcript};
//!
//! let server = Builder::new().verbose(true).build()?;
//! let outcome = server
//!     .listen(
//!         ("192.168.1.1", 16384),
//!         Terminal::stdout(true),
//!         Transcript::daily("logs")?,
//!         console,
//!     )
//!     .await?;
//! ```
//!
//! ## Error Handling
//!
//! Operator mistakes (unknown commands, invalid pointers, unreadable files,
//! commands while a file is loading) are reported to both sinks and the
//! session continues. Transport failures end the session with an error, see
//! [`error::BridgeError::is_fatal`].
//!
//! ## Logging
//!
//! This crate uses the `log` crate for diagnostics, separately from the
//! operator transcript. Frames are dumped at `trace` level.
pub mod dispatcher;
pub mod error;
pub mod multiplexer;
pub mod server;
pub mod session;
pub mod sink;

/// Source of operator input lines.
///
/// Polled on a dedicated thread, so implementations may block.
/// Returning `None` ends the session like `exit`.
pub trait InputProvider: Send + 'static {
    fn next_line(&mut self) -> Option<String>;
}

impl InputProvider for std::sync::mpsc::Receiver<String> {
    fn next_line(&mut self) -> Option<String> {
        self.recv().ok()
    }
}
