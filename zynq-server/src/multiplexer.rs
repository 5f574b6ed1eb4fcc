//! The session loop: operator lines and device bytes on one ordered channel.
use std::io;

use futures::StreamExt;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};
use zynq_protocol::{Command, Frame, Inbound, codec::FrameCodec};

use crate::{
    InputProvider,
    dispatcher::{Action, Dispatcher},
    error::BridgeError,
    server::Config,
    session::{ReceiveStream, Session},
    sink::{EntryKind, LogEntry, Sink},
};

/// Something that happened on either side of the bridge.
#[derive(Debug)]
pub enum Event {
    Operator(String),
    /// The operator input ended.
    InputClosed,
    Inbound(Inbound),
    ReceiveFailed(io::Error),
    /// The device closed the connection without sending the disconnect byte.
    PeerClosed,
}

/// How a session ended.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// The operator typed `exit`.
    LocalDisconnect,
    /// The operator input ended. Handled like `exit`.
    InputClosed,
    /// The device sent the disconnect byte.
    RemoteDisconnect,
}

/// Runs one session until either side disconnects.
///
/// The multiplexer is the only writer of the display and log sinks, so
/// their entries appear in the order the events were posted.
pub struct Multiplexer<D: Sink, L: Sink> {
    session: Session,
    dispatcher: Dispatcher,
    display: D,
    log: L,
    identify_on_connect: bool,
}

impl<D: Sink, L: Sink> Multiplexer<D, L> {
    pub fn new(session: Session, config: &Config, display: D, log: L) -> Multiplexer<D, L> {
        Multiplexer {
            session,
            dispatcher: Dispatcher::new(FrameCodec::new(config.protocol.clone())),
            display,
            log,
            identify_on_connect: config.identify_on_connect,
        }
    }

    /// Serves the operator until the session ends. The socket is closed on every path.
    ///
    /// Returns `Err` only for transport failures, after reporting them to both sinks.
    pub async fn run(mut self, input: impl InputProvider) -> Result<Outcome, BridgeError> {
        let Some(stream) = self.session.receive_stream() else {
            return Err(BridgeError::Receive(io::ErrorKind::NotConnected.into()));
        };
        let (events, mut rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(receive(stream, events.clone()));
        read_input(input, events);

        let result = self.serve(&mut rx).await;
        if let Err(e) = &result {
            log::error!("Session with {} failed: {}", self.session.peer_addr(), e);
            self.emit(LogEntry::error(e.to_string()));
        }
        reader.abort();
        self.session.close().await;
        result
    }

    async fn serve(&mut self, rx: &mut UnboundedReceiver<Event>) -> Result<Outcome, BridgeError> {
        if self.identify_on_connect {
            let action = self.dispatcher.dispatch(Command::Identify);
            self.apply(action).await?;
        }
        loop {
            let event = if self.dispatcher.is_transferring() {
                match rx.try_recv() {
                    Ok(event) => event,
                    Err(TryRecvError::Empty | TryRecvError::Disconnected) => {
                        self.send_chunk().await?;
                        continue;
                    }
                }
            } else {
                rx.recv().await.unwrap_or(Event::InputClosed)
            };
            if let Some(outcome) = self.handle(event).await? {
                return Ok(outcome);
            }
        }
    }

    async fn handle(&mut self, event: Event) -> Result<Option<Outcome>, BridgeError> {
        match event {
            Event::Operator(line) => {
                if line.trim().is_empty() {
                    return Ok(None);
                }
                let action = self.dispatcher.dispatch_line(&line);
                self.apply(action).await
            }
            Event::InputClosed => {
                log::info!("Operator input closed, disconnecting");
                let action = self.dispatcher.dispatch(Command::Disconnect);
                Ok(self.apply(action).await?.map(|_| Outcome::InputClosed))
            }
            Event::Inbound(Inbound::Data(record)) => {
                let reply = self.dispatcher.codec().reply(&record);
                self.emit(LogEntry::received(record, reply));
                Ok(None)
            }
            Event::Inbound(Inbound::Disconnect) => {
                log::info!("{} sent the disconnect byte", self.session.peer_addr());
                self.dispatcher.fail();
                self.emit(LogEntry::notice("The device disconnected"));
                Ok(Some(Outcome::RemoteDisconnect))
            }
            Event::ReceiveFailed(e) => Err(BridgeError::Receive(e)),
            Event::PeerClosed => Err(BridgeError::Receive(
                io::ErrorKind::UnexpectedEof.into(),
            )),
        }
    }

    async fn apply(
        &mut self,
        action: Result<Action, BridgeError>,
    ) -> Result<Option<Outcome>, BridgeError> {
        let action = match action {
            Ok(action) => action,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                log::debug!("Command rejected: {}", e);
                self.emit(LogEntry::error(e.to_string()));
                return Ok(None);
            }
        };
        match action {
            Action::Send { frame, summary } => {
                let bytes = frame.len();
                self.send(frame).await?;
                self.emit(LogEntry::now(EntryKind::Sent { summary, bytes }));
            }
            Action::TransferStarted {
                pointer,
                total_bytes,
            } => self.emit(LogEntry::notice(format!(
                "Loading {} bytes to pointer {}",
                total_bytes, pointer
            ))),
            Action::Aborted {
                pointer,
                bytes_sent,
                total_bytes,
            } => self.emit(LogEntry::notice(format!(
                "Transfer to pointer {} aborted after {}/{} bytes",
                pointer, bytes_sent, total_bytes
            ))),
            Action::NothingToAbort => self.emit(LogEntry::notice("No transfer in progress")),
            Action::Disconnect(frame) => {
                self.send(frame).await?;
                self.emit(LogEntry::notice("Disconnected"));
                return Ok(Some(Outcome::LocalDisconnect));
            }
        }
        Ok(None)
    }

    async fn send_chunk(&mut self) -> Result<(), BridgeError> {
        match self.dispatcher.next_frame() {
            Some(Ok(step)) => {
                self.send(step.frame).await?;
                if let Some((pointer, bytes)) = step.completed {
                    self.emit(LogEntry::notice(format!(
                        "Loaded {} bytes to pointer {}",
                        bytes, pointer
                    )));
                }
            }
            Some(Err(e)) => self.emit(LogEntry::error(e.to_string())),
            None => {}
        }
        Ok(())
    }

    async fn send(&mut self, frame: Frame) -> Result<(), BridgeError> {
        let result = self.session.send(frame).await;
        if result.is_err() {
            self.dispatcher.fail();
        }
        result
    }

    fn emit(&mut self, entry: LogEntry) {
        if let Err(e) = self.display.emit(&entry) {
            log::warn!("Could not write to the display: {}", e);
        }
        if let Err(e) = self.log.emit(&entry) {
            log::warn!("Could not write to the log: {}", e);
        }
    }
}

async fn receive(mut stream: ReceiveStream, events: UnboundedSender<Event>) {
    loop {
        let (event, last) = match stream.next().await {
            Some(Ok(Inbound::Disconnect)) => (Event::Inbound(Inbound::Disconnect), true),
            Some(Ok(inbound)) => (Event::Inbound(inbound), false),
            Some(Err(e)) => (Event::ReceiveFailed(e), true),
            None => (Event::PeerClosed, true),
        };
        if events.send(event).is_err() || last {
            return;
        }
    }
}

fn read_input(mut input: impl InputProvider, events: UnboundedSender<Event>) {
    std::thread::spawn(move || {
        while let Some(line) = input.next_line() {
            if events.send(Event::Operator(line)).is_err() {
                return;
            }
        }
        let _ = events.send(Event::InputClosed);
    });
}
