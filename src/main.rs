//! PipeHub - An Asynchronous Local IPC Server Engine
//!
//! This is the demonstration binary. `serve` runs the uppercase-echo demo
//! server on a named channel; `request` fires a batch of concurrent clients
//! at it and prints the responses.

use bytes::Bytes;
use pipehub::server::ConnectionHandle;
use pipehub::{IpcClient, IpcHandler, IpcServer, ServerConfig};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// What the binary should do
enum Mode {
    Serve,
    Request,
}

/// Demo configuration
struct Config {
    mode: Mode,
    /// Channel name to serve or connect to
    name: String,
    /// Listener pool size (serve)
    pool: usize,
    /// Number of concurrent clients (request)
    count: usize,
    /// Message each client sends (request)
    message: String,
}

impl Config {
    fn defaults(mode: Mode) -> Self {
        Self {
            mode,
            name: pipehub::DEFAULT_CHANNEL.to_string(),
            pool: pipehub::DEFAULT_LISTENER_POOL,
            count: 10,
            message: "Test request".to_string(),
        }
    }

    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let args: Vec<String> = std::env::args().collect();

        let mut config = match args.get(1).map(String::as_str) {
            Some("serve") => Config::defaults(Mode::Serve),
            Some("request") => Config::defaults(Mode::Request),
            Some("--help") | None => {
                print_help();
                std::process::exit(0);
            }
            Some("--version") | Some("-v") => {
                println!("PipeHub version {}", pipehub::VERSION);
                std::process::exit(0);
            }
            Some(other) => {
                eprintln!("Unknown command: {other}");
                print_help();
                std::process::exit(1);
            }
        };

        let mut i = 2;
        while i < args.len() {
            match args[i].as_str() {
                "--name" | "-n" => {
                    config.name = take_value(&args, i, "--name");
                    i += 2;
                }
                "--pool" => {
                    config.pool = parse_value(&args, i, "--pool");
                    i += 2;
                }
                "--count" | "-c" => {
                    config.count = parse_value(&args, i, "--count");
                    i += 2;
                }
                "--message" | "-m" => {
                    config.message = take_value(&args, i, "--message");
                    i += 2;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }
}

fn take_value(args: &[String], i: usize, flag: &str) -> String {
    match args.get(i + 1) {
        Some(value) => value.clone(),
        None => {
            eprintln!("Error: {flag} requires a value");
            std::process::exit(1);
        }
    }
}

fn parse_value(args: &[String], i: usize, flag: &str) -> usize {
    take_value(args, i, flag).parse().unwrap_or_else(|_| {
        eprintln!("Error: {flag} requires a number");
        std::process::exit(1);
    })
}

fn print_help() {
    println!(
        r#"
PipeHub - An Asynchronous Local IPC Server Engine

USAGE:
    pipehub serve   [OPTIONS]    Run the uppercase-echo demo server
    pipehub request [OPTIONS]    Fire concurrent demo clients at a server

OPTIONS:
    -n, --name <NAME>        Channel name (default: pipehub-demo)
        --pool <N>           Listener pool size for serve (default: 4)
    -c, --count <N>          Concurrent clients for request (default: 10)
    -m, --message <TEXT>     Request payload (default: "Test request")
    -v, --version            Print version information
        --help               Print this help message

EXAMPLES:
    pipehub serve                          # Serve on the default channel
    pipehub serve --name orders --pool 8   # Custom name, larger pool
    pipehub request --count 25             # 25 concurrent round trips
"#
    );
}

/// The demo handler: numbers each connection and uppercases every message.
struct UppercaseDemo {
    counter: AtomicU64,
}

impl IpcHandler for UppercaseDemo {
    type State = u64;

    fn on_connect(&self, _conn: &ConnectionHandle) -> u64 {
        let count = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        println!("Connected: {count}");
        count
    }

    fn on_message(&self, conn: &ConnectionHandle, message: &[u8], state: &mut u64) {
        println!("Message: {} bytes: {}", state, message.len());
        if conn.send(Bytes::from(message.to_ascii_uppercase())).is_err() {
            conn.close();
        }
    }

    fn on_disconnect(&self, _conn: &ConnectionHandle, state: u64) {
        println!("Disconnected: {state}");
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let mut server_config = ServerConfig::new(&config.name);
    server_config.listener_pool = config.pool;

    let handler = UppercaseDemo {
        counter: AtomicU64::new(0),
    };
    let server = IpcServer::start(server_config, handler)?;

    println!(
        "PipeHub v{} serving '{}' ({}). Ctrl+C to stop.",
        pipehub::VERSION,
        config.name,
        server.socket().display()
    );

    signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping server...");
    server.stop().await;
    info!("Server shutdown complete");
    Ok(())
}

async fn request(config: Config) -> anyhow::Result<()> {
    let mut tasks = Vec::new();
    for n in 0..config.count {
        let name = config.name.clone();
        let payload = format!("{} {}", config.message, n);
        tasks.push(tokio::spawn(async move {
            let mut client = IpcClient::connect(&name, Duration::from_secs(2)).await?;
            let reply = client.round_trip(payload.as_bytes()).await?;
            println!("Server response: {}", String::from_utf8_lossy(&reply));
            Ok::<(), anyhow::Error>(())
        }));
    }

    for task in tasks {
        if let Err(e) = task.await? {
            eprintln!("Connection failed: {e}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_args();

    // Set up logging
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    match config.mode {
        Mode::Serve => serve(config).await,
        Mode::Request => request(config).await,
    }
}
