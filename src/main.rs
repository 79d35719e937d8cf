//! airplay2-sender - pair with an AirPlay receiver and open a secure control channel.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use airplay_client::{
    AirPlaySenderConnection, ConnectionConfig, ConnectionDelegate, ConnectionState, Error,
    PinProvider,
};
use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_PORT: u16 = 7000;

/// Command-line arguments
struct Args {
    host: String,
    port: u16,
    store: Option<PathBuf>,
    /// Per-response pairing timeout
    timeout: Option<Duration>,
    debug: bool,
}

fn parse_args() -> Result<Args> {
    let mut host = None;
    let mut port = None;
    let mut store = None;
    let mut timeout = None;
    let mut debug = false;
    let mut iter = std::env::args().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--debug" | "-d" => debug = true,
            "--store" | "-s" => {
                let path = iter.next().context("--store needs a path")?;
                store = Some(PathBuf::from(path));
            }
            "--timeout" | "-t" => {
                let ms = iter.next().context("--timeout needs milliseconds")?;
                let ms: u64 = ms.parse().with_context(|| format!("bad timeout {:?}", ms))?;
                timeout = Some(Duration::from_millis(ms));
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other if other.starts_with('-') => {
                eprintln!("Unknown argument: {}", other);
                print_help();
                std::process::exit(1);
            }
            _ if host.is_none() => host = Some(arg),
            _ if port.is_none() => {
                port = Some(arg.parse().with_context(|| format!("bad port {:?}", arg))?);
            }
            _ => bail!("unexpected argument {:?}", arg),
        }
    }

    let Some(host) = host else {
        print_help();
        std::process::exit(1);
    };

    Ok(Args {
        host,
        port: port.unwrap_or(DEFAULT_PORT),
        store,
        timeout,
        debug,
    })
}

fn print_help() {
    println!("airplay2-sender - pair with an AirPlay receiver");
    println!();
    println!("Usage: airplay2-sender [OPTIONS] HOST [PORT]");
    println!();
    println!("Options:");
    println!("  -s, --store PATH     Pairing store file (default: in memory)");
    println!("  -t, --timeout MS     Pairing response timeout in milliseconds");
    println!("  -d, --debug          Enable debug logging");
    println!("  -h, --help           Show this help message");
    println!();
    println!("PORT defaults to {}. RUST_LOG overrides the log filter.", DEFAULT_PORT);
}

fn setup_logging(args: &Args) {
    let default = if args.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(args.debug)
        .init();
}

/// Reads the setup code from the terminal.
struct StdinPin;

impl PinProvider for StdinPin {
    fn request_pin(&self) -> String {
        prompt_pin(io::stdin().lock(), io::stdout())
    }
}

/// Show the prompt on `output` and read one line from `input`.
fn prompt_pin(mut input: impl BufRead, mut output: impl Write) -> String {
    if let Err(e) = write!(output, "Enter the code shown on the receiver: ").and_then(|_| output.flush()) {
        warn!("Could not show PIN prompt: {}", e);
    }
    let mut line = String::new();
    match input.read_line(&mut line) {
        Ok(_) => line.trim().to_string(),
        Err(e) => {
            warn!("Could not read PIN: {}", e);
            String::new()
        }
    }
}

struct ConsoleDelegate;

impl ConnectionDelegate for ConsoleDelegate {
    fn pairing_did_complete(&self, encrypted: bool) {
        if encrypted {
            println!("Paired; control channel is encrypted");
        } else {
            println!("Receiver does not require pairing");
        }
    }

    fn pairing_did_fail(&self, error: &Error) {
        println!("Pairing failed: {}", error);
    }

    fn pin_was_incorrect(&self, attempts_left: u32) {
        println!("Incorrect code, {} attempt(s) left", attempts_left);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args()?;
    setup_logging(&args);

    let mut config = ConnectionConfig::from_env();
    if let Some(path) = &args.store {
        config = config.store_path(path.clone());
    }
    if let Some(timeout) = args.timeout {
        config = config.response_timeout(timeout);
    }

    info!("Starting airplay2-sender for {}:{}", args.host, args.port);
    let mut conn = AirPlaySenderConnection::new(
        args.host.clone(),
        args.host.clone(),
        args.port,
        Arc::new(StdinPin),
        Arc::new(ConsoleDelegate),
        config,
    )?;

    conn.setup()
        .await
        .with_context(|| format!("connecting to {}:{}", args.host, args.port))?;
    let result = conn.wait_for_pairing().await;

    let state = conn.state().await;
    if let Some(receiver) = conn.paired_receiver().await {
        println!("Receiver identifier: {}", receiver.identifier);
        println!("Receiver public key: {}", hex::encode(receiver.ltpk));
    }
    conn.close().await;

    result.context("pairing")?;
    if state != ConnectionState::Encrypted && state != ConnectionState::Unencrypted {
        bail!("connection ended in state {:?}", state);
    }
    Ok(())
}
