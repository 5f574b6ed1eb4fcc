//! Where the operator transcript goes: the console and the log file.
use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local, NaiveDate};
use zynq_protocol::{InboundRecord, codec::Reply};

/// One transcript entry.
#[derive(Clone, Debug)]
pub struct LogEntry {
    pub at: DateTime<Local>,
    pub kind: EntryKind,
}

#[derive(Clone, Debug)]
pub enum EntryKind {
    /// Bytes from the device, with the reply they decode to.
    Received(InboundRecord, Option<Reply>),
    /// A frame went out. `summary` is the command that produced it.
    Sent { summary: String, bytes: usize },
    Notice(String),
    Error(String),
}

impl LogEntry {
    pub fn now(kind: EntryKind) -> LogEntry {
        LogEntry {
            at: Local::now(),
            kind,
        }
    }

    pub fn received(record: InboundRecord, reply: Option<Reply>) -> LogEntry {
        LogEntry {
            at: record.received_at(),
            kind: EntryKind::Received(record, reply),
        }
    }

    pub fn notice(text: impl Into<String>) -> LogEntry {
        LogEntry::now(EntryKind::Notice(text.into()))
    }

    pub fn error(text: impl Into<String>) -> LogEntry {
        LogEntry::now(EntryKind::Error(text.into()))
    }
}

/// Receives every transcript entry, in order, from the multiplexer.
pub trait Sink: Send {
    fn emit(&mut self, entry: &LogEntry) -> io::Result<()>;
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// The operator console.
///
/// Replies are printed the way the device means them, raw bytes only when
/// `verbose` is set or nothing could be decoded. Every entry ends with a
/// fresh prompt.
pub struct Terminal {
    out: Box<dyn Write + Send>,
    verbose: bool,
}

impl Terminal {
    pub fn new(out: Box<dyn Write + Send>, verbose: bool) -> Terminal {
        Terminal { out, verbose }
    }

    pub fn stdout(verbose: bool) -> Terminal {
        Terminal::new(Box::new(io::stdout()), verbose)
    }
}

impl Sink for Terminal {
    fn emit(&mut self, entry: &LogEntry) -> io::Result<()> {
        match &entry.kind {
            EntryKind::Received(record, Some(reply)) => {
                write!(self.out, "\nreceived : {}", reply)?;
                if self.verbose {
                    write!(self.out, " [{}]", hex(record.bytes()))?;
                }
            }
            EntryKind::Received(record, None) => {
                write!(self.out, "\nreceived : {}", hex(record.bytes()))?;
            }
            EntryKind::Sent { summary, bytes } => {
                if !self.verbose {
                    return Ok(());
                }
                write!(self.out, "sent : {} ({} bytes)", summary, bytes)?;
            }
            EntryKind::Notice(text) => write!(self.out, "{}", text)?,
            EntryKind::Error(text) => write!(self.out, "error : {}", text)?,
        }
        write!(self.out, "\n> ")?;
        self.out.flush()
    }
}

/// Append-only log file.
pub struct Transcript {
    out: File,
    rotation: Option<Rotation>,
}

struct Rotation {
    dir: PathBuf,
    date: NaiveDate,
}

impl Transcript {
    /// Appends to an existing file.
    pub fn append(path: impl AsRef<Path>) -> io::Result<Transcript> {
        let out = OpenOptions::new().append(true).open(path)?;
        Ok(Transcript {
            out,
            rotation: None,
        })
    }

    /// Writes to `main_DD-MM-YYYY.log` in `dir` and moves to a new file when the day changes.
    /// `dir` is created if missing.
    pub fn daily(dir: impl Into<PathBuf>) -> io::Result<Transcript> {
        let dir = dir.into();
        let date = Local::now().date_naive();
        let out = Transcript::open_dated(&dir, date)?;
        Ok(Transcript {
            out,
            rotation: Some(Rotation { dir, date }),
        })
    }

    pub fn dated_path(dir: &Path, date: NaiveDate) -> PathBuf {
        dir.join(format!("main_{}.log", date.format("%d-%m-%Y")))
    }

    fn open_dated(dir: &Path, date: NaiveDate) -> io::Result<File> {
        fs::create_dir_all(dir)?;
        let path = Transcript::dated_path(dir, date);
        log::debug!("Writing the transcript to {}", path.display());
        OpenOptions::new().create(true).append(true).open(path)
    }

    fn rotate(&mut self, date: NaiveDate) -> io::Result<()> {
        if let Some(rotation) = &mut self.rotation
            && rotation.date != date
        {
            self.out = Transcript::open_dated(&rotation.dir, date)?;
            rotation.date = date;
        }
        Ok(())
    }
}

impl Sink for Transcript {
    fn emit(&mut self, entry: &LogEntry) -> io::Result<()> {
        self.rotate(entry.at.date_naive())?;
        let stamp = entry.at.format("%Y-%m-%d %H:%M:%S%.3f");
        match &entry.kind {
            EntryKind::Received(record, reply) => {
                write!(self.out, "[{}] RECV {}", stamp, hex(record.bytes()))?;
                if let Some(reply) = reply {
                    write!(self.out, " | {}", reply)?;
                }
                writeln!(self.out)?;
            }
            EntryKind::Sent { summary, bytes } => {
                writeln!(self.out, "[{}] SENT {} ({} bytes)", stamp, summary, bytes)?
            }
            EntryKind::Notice(text) => writeln!(self.out, "[{}] INFO {}", stamp, text)?,
            EntryKind::Error(text) => writeln!(self.out, "[{}] ERROR {}", stamp, text)?,
        }
        self.out.flush()
    }
}
