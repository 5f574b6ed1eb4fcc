use tokio::net::ToSocketAddrs;
use zynq_protocol::{OpcodeTable, PointerSet, ProtocolConfig, error::ConfigError};

use crate::{
    InputProvider,
    error::BridgeError,
    multiplexer::{Multiplexer, Outcome},
    session::Session,
    sink::Sink,
};

#[derive(Debug, Clone)]
pub struct Config {
    pub protocol: ProtocolConfig,
    /// Show raw bytes next to decoded replies, and sent frames.
    pub verbose: bool,
    /// Send `id` as soon as the device is connected.
    pub identify_on_connect: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            protocol: ProtocolConfig::default(),
            verbose: false,
            identify_on_connect: true,
        }
    }
}

/// Bridges one device connection to an operator.
#[derive(Debug)]
pub struct Server {
    config: Config,
}

/// Builder to create a [Server] instance and modify configuration options
///
/// # Example
///
/// ```
/// use zynq_server::server::Builder;
///
/// let server = Builder::new()
///     .chunk_size(1024)
///     .use_length_prefix(false)
///     .verbose(true)
///     .build()
///     .expect("configuration is valid");
/// assert_eq!(server.config().protocol.chunk_size, 1024);
/// ```
#[derive(Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Number of file bytes per load frame.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.protocol.chunk_size = size;
        self
    }

    /// The pointers the device accepts.
    pub fn pointers(mut self, pointers: PointerSet) -> Self {
        self.config.protocol.pointers = pointers;
        self
    }

    pub fn opcodes(mut self, opcodes: OpcodeTable) -> Self {
        self.config.protocol.opcodes = opcodes;
        self
    }

    /// Per chunk lengths (`true`) or a total length in the first load frame (`false`).
    pub fn use_length_prefix(mut self, enabled: bool) -> Self {
        self.config.protocol.use_length_prefix = enabled;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    pub fn identify_on_connect(mut self, enabled: bool) -> Self {
        self.config.identify_on_connect = enabled;
        self
    }

    /// Validate the protocol configuration and return the server
    pub fn build(self) -> Result<Server, ConfigError> {
        Server::new(self.config)
    }
}

impl Server {
    /// Fails when the protocol configuration is inconsistent, see [`ProtocolConfig::validate`].
    pub fn new(config: Config) -> Result<Server, ConfigError> {
        config.protocol.validate()?;
        Ok(Server { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Waits for the device on `addr`, then serves it.
    ///
    /// Failing to bind or accept is reported as [`BridgeError::Listen`].
    pub async fn listen<D: Sink, L: Sink>(
        &self,
        addr: impl ToSocketAddrs,
        display: D,
        log: L,
        input: impl InputProvider,
    ) -> Result<Outcome, BridgeError> {
        let session = Session::accept(addr).await.map_err(BridgeError::Listen)?;
        self.serve(session, display, log, input).await
    }

    /// Serves an already connected device until either side disconnects.
    pub async fn serve<D: Sink, L: Sink>(
        &self,
        session: Session,
        display: D,
        log: L,
        input: impl InputProvider,
    ) -> Result<Outcome, BridgeError> {
        log::debug!("Serving {} with {:?}", session.peer_addr(), self.config);
        let outcome = Multiplexer::new(session, &self.config, display, log)
            .run(input)
            .await?;
        log::info!("Session ended: {:?}", outcome);
        Ok(outcome)
    }
}

#[test]
fn builder_rejects_invalid_protocol() {
    assert!(matches!(
        Builder::new().chunk_size(0).build(),
        Err(ConfigError::ChunkSize(0))
    ));
    assert!(matches!(
        Builder::new().pointers(PointerSet::new([])).build(),
        Err(ConfigError::NoPointers)
    ));
}

#[test]
fn server_validates_its_config() {
    let config = Config {
        protocol: ProtocolConfig {
            chunk_size: 70_000,
            ..Default::default()
        },
        ..Default::default()
    };
    assert_eq!(Server::new(config).unwrap_err(), ConfigError::ChunkSize(70_000));
    assert!(Server::new(Config::default()).is_ok());
}

#[tokio::test]
async fn listen_reports_a_taken_address() {
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = taken.local_addr().unwrap();
    let server = Server::new(Config::default()).unwrap();
    let quiet = || crate::sink::Terminal::new(Box::new(std::io::sink()), false);
    let (_tx, rx) = std::sync::mpsc::channel::<String>();
    let result = server.listen(addr, quiet(), quiet(), rx).await;
    match result {
        Err(e @ BridgeError::Listen(_)) => {
            assert!(e.to_string().starts_with("Could not wait for the device"))
        }
        other => panic!("expected a listen error, got {:?}", other),
    }
}

#[test]
fn builder_defaults() {
    let server = Builder::new().build().unwrap();
    assert!(server.config().identify_on_connect);
    assert!(!server.config().verbose);
    assert_eq!(server.config().protocol, ProtocolConfig::default());
}
