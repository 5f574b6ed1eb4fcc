//! # Zynq Bridge
//!
//! Operator console for an application running on a Zynq FPGA board.
//! The bridge listens for the board, forwards typed commands and file
//! uploads to it, and prints and logs everything the board answers.
//!
//! ```text
//! zynq-bridge [OPTIONS] [IP PORT [LOG_PATH]]
//! ```
mod console;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, builder::FalseyValueParser};
use env_logger::Env;
use zynq_server::{
    multiplexer::Outcome,
    server::Builder,
    sink::{Terminal, Transcript},
};

use crate::console::Console;

#[derive(Parser)]
#[command(about = "Command bridge between an operator and a Zynq FPGA application", long_about=None)]
struct Args {
    /// Address to listen on for the board
    #[arg(default_value = "192.168.1.1", requires = "port")]
    ip: IpAddr,

    #[arg(default_value = "16384")]
    port: u16,

    /// Existing file to append the transcript to, instead of a dated file in --log-dir
    #[arg(value_parser = existing_file)]
    log_path: Option<PathBuf>,

    /// Show raw bytes and sent frames, and enable debug diagnostics
    #[arg(long, env = "DEBUG", value_parser = FalseyValueParser::new())]
    debug: bool,

    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// File bytes per load frame
    #[arg(long, default_value_t = zynq_protocol::CHUNK_SIZE)]
    chunk_size: usize,

    /// Send the file length once in the first load frame instead of a length per frame
    #[arg(long)]
    total_length: bool,

    /// Do not send `id` when the board connects
    #[arg(long)]
    no_identify: bool,
}

fn existing_file(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    if path.is_file() {
        Ok(path)
    } else {
        Err(format!("{} is not an existing file", path.display()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let filter = if args.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(filter)).init();
    log::debug!(
        "Parsed arguments: ip={}, port={}, chunk_size={}, total_length={}",
        args.ip,
        args.port,
        args.chunk_size,
        args.total_length
    );

    let server = Builder::new()
        .chunk_size(args.chunk_size)
        .use_length_prefix(!args.total_length)
        .verbose(args.debug)
        .identify_on_connect(!args.no_identify)
        .build()
        .context("Invalid protocol configuration")?;

    let transcript = match &args.log_path {
        Some(path) => Transcript::append(path)
            .with_context(|| format!("Could not open {}", path.display()))?,
        None => Transcript::daily(&args.log_dir)
            .with_context(|| format!("Could not create a log in {}", args.log_dir.display()))?,
    };

    let addr = SocketAddr::new(args.ip, args.port);
    println!("Waiting for the board on {}", addr);
    let outcome = server
        .listen(
            addr,
            Terminal::stdout(args.debug),
            transcript,
            Console::stdin(),
        )
        .await
        .context("Session ended with an error")?;

    match outcome {
        Outcome::RemoteDisconnect => println!("\nThe board ended the session"),
        Outcome::LocalDisconnect | Outcome::InputClosed => println!("\nSession closed"),
    }
    Ok(())
}
