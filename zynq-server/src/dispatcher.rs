//! Maps operator commands to frames and tracks the transfer in progress.
use zynq_protocol::{
    Command, Frame, Pointer, PointerTarget,
    codec::{Encoded, FrameCodec, Transfer},
};

use crate::error::BridgeError;

/// What the session is currently doing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SessionState {
    Idle,
    Transferring {
        pointer: Pointer,
        bytes_sent: u64,
        total_bytes: u64,
    },
    Disconnecting,
}

/// What the caller has to do after a command was accepted.
#[derive(Debug)]
pub enum Action {
    /// Send one frame.
    Send { frame: Frame, summary: String },
    /// A transfer began. Its frames come from [`Dispatcher::next_frame`].
    TransferStarted { pointer: Pointer, total_bytes: u64 },
    /// The transfer in progress was cancelled. Chunks already sent stay sent.
    Aborted {
        pointer: Pointer,
        bytes_sent: u64,
        total_bytes: u64,
    },
    /// `abort` while no transfer was running.
    NothingToAbort,
    /// Send the disconnect frame, then close the session.
    Disconnect(Frame),
}

/// One load frame handed out by [`Dispatcher::next_frame`].
#[derive(Debug)]
pub struct TransferStep {
    pub frame: Frame,
    /// Set once the final chunk is handed out.
    pub completed: Option<(Pointer, u64)>,
}

/// Applies the session state machine to incoming commands.
#[derive(Debug)]
pub struct Dispatcher {
    codec: FrameCodec,
    state: SessionState,
    transfer: Option<Transfer>,
}

impl Dispatcher {
    pub fn new(codec: FrameCodec) -> Dispatcher {
        Dispatcher {
            codec,
            state: SessionState::Idle,
            transfer: None,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    pub fn is_transferring(&self) -> bool {
        matches!(self.state, SessionState::Transferring { .. })
    }

    /// Parses and dispatches one operator line.
    pub fn dispatch_line(&mut self, line: &str) -> Result<Action, BridgeError> {
        let command: Command = line.parse()?;
        self.dispatch(command)
    }

    pub fn dispatch(&mut self, command: Command) -> Result<Action, BridgeError> {
        match (&self.state, &command) {
            (SessionState::Disconnecting, _) => Err(BridgeError::Disconnecting),
            (SessionState::Transferring { .. }, Command::Abort) => Ok(self.abort()),
            (SessionState::Transferring { .. }, Command::Disconnect) => {
                if let Action::Aborted {
                    pointer,
                    bytes_sent,
                    total_bytes,
                } = self.abort()
                {
                    log::info!(
                        "Dropping transfer to pointer {} at {}/{} bytes",
                        pointer,
                        bytes_sent,
                        total_bytes
                    );
                }
                self.encode(command)
            }
            (
                SessionState::Transferring { .. },
                Command::ResetPointer(PointerTarget::All) | Command::ResetFpga,
            ) => self.encode(command),
            (
                SessionState::Transferring {
                    pointer,
                    bytes_sent,
                    total_bytes,
                },
                _,
            ) => Err(BridgeError::Busy {
                command: command.name(),
                pointer: *pointer,
                sent: *bytes_sent,
                total: *total_bytes,
            }),
            (SessionState::Idle, Command::Abort) => Ok(Action::NothingToAbort),
            (SessionState::Idle, _) => self.encode(command),
        }
    }

    fn encode(&mut self, command: Command) -> Result<Action, BridgeError> {
        log::debug!("Dispatching `{}`", command);
        match self.codec.encode(&command)? {
            Encoded::Single(frame) if command == Command::Disconnect => {
                self.state = SessionState::Disconnecting;
                Ok(Action::Disconnect(frame))
            }
            Encoded::Single(frame) => Ok(Action::Send {
                frame,
                summary: command.to_string(),
            }),
            Encoded::Transfer(transfer) => {
                let pointer = transfer.pointer();
                let total_bytes = transfer.total_bytes();
                self.state = SessionState::Transferring {
                    pointer,
                    bytes_sent: 0,
                    total_bytes,
                };
                self.transfer = Some(transfer);
                Ok(Action::TransferStarted {
                    pointer,
                    total_bytes,
                })
            }
            Encoded::Local => Ok(Action::NothingToAbort),
        }
    }

    fn abort(&mut self) -> Action {
        self.transfer = None;
        match std::mem::replace(&mut self.state, SessionState::Idle) {
            SessionState::Transferring {
                pointer,
                bytes_sent,
                total_bytes,
            } => Action::Aborted {
                pointer,
                bytes_sent,
                total_bytes,
            },
            other => {
                self.state = other;
                Action::NothingToAbort
            }
        }
    }

    /// Hands out the next frame of the transfer in progress.
    ///
    /// Returns `None` when no transfer is running. A file error ends the
    /// transfer and returns the session to idle.
    pub fn next_frame(&mut self) -> Option<Result<TransferStep, BridgeError>> {
        let transfer = self.transfer.as_mut()?;
        let step = match transfer.next() {
            Some(Ok(step)) => step,
            Some(Err(e)) => {
                self.transfer = None;
                self.state = SessionState::Idle;
                return Some(Err(e.into()));
            }
            None => {
                self.transfer = None;
                self.state = SessionState::Idle;
                return None;
            }
        };

        let mut completed = None;
        if let SessionState::Transferring {
            pointer,
            bytes_sent,
            total_bytes,
        } = &mut self.state
        {
            *bytes_sent += step.payload_len as u64;
            if step.last {
                log::debug!(
                    "Last chunk of the transfer to pointer {}: {}/{} bytes",
                    pointer,
                    bytes_sent,
                    total_bytes
                );
                completed = Some((*pointer, *bytes_sent));
            }
        }
        if completed.is_some() {
            self.transfer = None;
            self.state = SessionState::Idle;
        }
        Some(Ok(TransferStep {
            frame: step.frame,
            completed,
        }))
    }

    /// Called when a frame could not be sent. Drops any transfer and starts disconnecting.
    pub fn fail(&mut self) {
        self.transfer = None;
        self.state = SessionState::Disconnecting;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use zynq_protocol::{PointerSet, ProtocolConfig};

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(FrameCodec::new(ProtocolConfig {
            pointers: PointerSet::new(0..=2),
            chunk_size: 16,
            ..Default::default()
        }))
    }

    fn file(len: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&vec![0x5A; len]).unwrap();
        file.flush().unwrap();
        file
    }

    fn load(dispatcher: &mut Dispatcher, file: &NamedTempFile) -> Action {
        dispatcher
            .dispatch_line(&format!("load 1 {}", file.path().display()))
            .unwrap()
    }

    #[test]
    fn single_frames_keep_the_session_idle() {
        let mut dispatcher = dispatcher();
        match dispatcher.dispatch_line("status").unwrap() {
            Action::Send { frame, summary } => {
                assert_eq!(frame.as_bytes(), &[0x80]);
                assert_eq!(summary, "status");
            }
            other => panic!("expected Send, got {:?}", other),
        }
        assert_eq!(dispatcher.state(), &SessionState::Idle);
        assert!(dispatcher.next_frame().is_none());
    }

    #[test]
    fn transfer_runs_to_completion() {
        let mut dispatcher = dispatcher();
        let file = file(40);
        assert!(matches!(
            load(&mut dispatcher, &file),
            Action::TransferStarted {
                total_bytes: 40,
                ..
            }
        ));

        let mut frames = 0;
        while let Some(step) = dispatcher.next_frame() {
            let step = step.unwrap();
            frames += 1;
            if frames < 3 {
                assert!(step.completed.is_none());
                assert!(dispatcher.is_transferring());
            } else {
                assert_eq!(step.completed, Some((Pointer::new(1), 40)));
            }
        }
        assert_eq!(frames, 3);
        assert_eq!(dispatcher.state(), &SessionState::Idle);
        assert!(dispatcher.dispatch_line("status").is_ok());
    }

    #[test]
    fn busy_while_transferring() {
        let mut dispatcher = dispatcher();
        let file = file(40);
        load(&mut dispatcher, &file);
        dispatcher.next_frame().unwrap().unwrap();

        for line in ["status", "id", "rstptr 1", "route 0", "rstfifo", "custom hi"] {
            match dispatcher.dispatch_line(line) {
                Err(BridgeError::Busy { sent, total, .. }) => {
                    assert_eq!((sent, total), (16, 40));
                }
                other => panic!("expected Busy for {line}, got {:?}", other),
            }
        }
        assert!(matches!(
            dispatcher.dispatch_line(&format!("load 2 {}", file.path().display())),
            Err(BridgeError::Busy { command: "load", .. })
        ));
        assert_eq!(
            dispatcher.state(),
            &SessionState::Transferring {
                pointer: Pointer::new(1),
                bytes_sent: 16,
                total_bytes: 40
            }
        );
    }

    #[test]
    fn resets_are_allowed_during_a_transfer() {
        let mut dispatcher = dispatcher();
        let file = file(40);
        load(&mut dispatcher, &file);
        assert!(matches!(
            dispatcher.dispatch_line("rstptr all"),
            Ok(Action::Send { .. })
        ));
        assert!(matches!(
            dispatcher.dispatch_line("rstfpga"),
            Ok(Action::Send { .. })
        ));
        assert!(dispatcher.is_transferring());
    }

    #[test]
    fn abort_cancels_remaining_chunks() {
        let mut dispatcher = dispatcher();
        let file = file(40);
        load(&mut dispatcher, &file);
        dispatcher.next_frame().unwrap().unwrap();
        match dispatcher.dispatch_line("abort").unwrap() {
            Action::Aborted {
                bytes_sent,
                total_bytes,
                ..
            } => assert_eq!((bytes_sent, total_bytes), (16, 40)),
            other => panic!("expected Aborted, got {:?}", other),
        }
        assert!(dispatcher.next_frame().is_none());
        assert!(matches!(
            dispatcher.dispatch_line("abort").unwrap(),
            Action::NothingToAbort
        ));
    }

    #[test]
    fn disconnect_during_a_transfer() {
        let mut dispatcher = dispatcher();
        let file = file(40);
        load(&mut dispatcher, &file);
        match dispatcher.dispatch_line("exit").unwrap() {
            Action::Disconnect(frame) => assert_eq!(frame.as_bytes(), &[0xFF]),
            other => panic!("expected Disconnect, got {:?}", other),
        }
        assert_eq!(dispatcher.state(), &SessionState::Disconnecting);
        assert!(dispatcher.next_frame().is_none());
        assert!(matches!(
            dispatcher.dispatch_line("status"),
            Err(BridgeError::Disconnecting)
        ));
    }

    #[test]
    fn rejected_commands_leave_the_state_alone() {
        let mut dispatcher = dispatcher();
        assert!(matches!(
            dispatcher.dispatch_line("rstptr 99"),
            Err(BridgeError::InvalidPointer { .. })
        ));
        assert!(matches!(
            dispatcher.dispatch_line("custom -b 012"),
            Err(BridgeError::Encoding(_))
        ));
        assert!(matches!(
            dispatcher.dispatch_line("load 1 /no/such/file"),
            Err(BridgeError::FileRead(_))
        ));
        assert!(matches!(
            dispatcher.dispatch_line("flash"),
            Err(BridgeError::Parse(_))
        ));
        assert_eq!(dispatcher.state(), &SessionState::Idle);
    }

    #[test]
    fn send_failure_starts_disconnecting() {
        let mut dispatcher = dispatcher();
        let file = file(40);
        load(&mut dispatcher, &file);
        dispatcher.fail();
        assert_eq!(dispatcher.state(), &SessionState::Disconnecting);
        assert!(dispatcher.next_frame().is_none());
    }
}
