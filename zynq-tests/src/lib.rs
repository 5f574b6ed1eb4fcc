//! Loopback harness: a bridge session on one side, an emulated device on the other.
use std::{
    io,
    net::SocketAddr,
    sync::{Arc, Mutex},
    thread::JoinHandle,
    time::Duration,
};

use tokio::net::TcpListener;
use zynq_client::DeviceClient;
use zynq_protocol::ProtocolConfig;
use zynq_server::{
    server::Config,
    session::Session,
    sink::{EntryKind, LogEntry, Sink},
};

/// Keeps every transcript entry for later inspection.
#[derive(Clone, Default)]
pub struct Recorder {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl Recorder {
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().clone()
    }

    /// Transcript entries rendered as short strings, see [`describe`].
    pub fn lines(&self) -> Vec<String> {
        self.entries().iter().map(describe).collect()
    }

    /// Polls until some entry matches, panicking after thirty seconds.
    pub async fn wait_for(&self, predicate: impl Fn(&str) -> bool) {
        for _ in 0..3000 {
            if self.lines().iter().any(|line| predicate(line)) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no matching entry in {:#?}", self.lines());
    }
}

impl Sink for Recorder {
    fn emit(&mut self, entry: &LogEntry) -> io::Result<()> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

/// `recv <reply>`, `recv <hex>`, `sent <summary>`, `info <text>` or `error <text>`.
pub fn describe(entry: &LogEntry) -> String {
    match &entry.kind {
        EntryKind::Received(_, Some(reply)) => format!("recv {}", reply),
        EntryKind::Received(record, None) => format!("recv {:02x?}", &record.bytes()[..]),
        EntryKind::Sent { summary, .. } => format!("sent {}", summary),
        EntryKind::Notice(text) => format!("info {}", text),
        EntryKind::Error(text) => format!("error {}", text),
    }
}

/// A bridge configuration that does not identify on connect.
pub fn quiet_config(protocol: ProtocolConfig) -> Config {
    Config {
        protocol,
        verbose: false,
        identify_on_connect: false,
    }
}

/// Binds a loopback port, runs `device` on its own thread against it and
/// returns the accepted bridge session.
pub async fn connect_device<T, F>(protocol: ProtocolConfig, device: F) -> (Session, JoinHandle<T>)
where
    T: Send + 'static,
    F: FnOnce(DeviceClient) -> T + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let handle = std::thread::spawn(move || {
        let client = DeviceClient::connect(addr, protocol).unwrap();
        device(client)
    });
    let (stream, _) = listener.accept().await.unwrap();
    (Session::from_stream(stream).unwrap(), handle)
}
