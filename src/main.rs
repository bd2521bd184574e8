//! sparkkv - A Single-Threaded In-Memory Key-Value Server
//!
//! This is the main entry point for the sparkkv server. It parses the
//! command line, restores the keyspace from the append-only file if one
//! exists, binds the listener and hands control to the event loop.

use anyhow::Context;
use sparkkv::commands::CommandHandler;
use sparkkv::persistence::{self, AofLog, DEFAULT_AOF_PATH};
use sparkkv::server::Server;
use std::path::Path;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Server configuration
struct Config {
    /// Port to listen on
    port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: sparkkv::DEFAULT_PORT,
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments.
    ///
    /// The only positional argument is an optional port.
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        match args.get(1).map(String::as_str) {
            None => {}
            Some("--help") => {
                print_help();
                std::process::exit(0);
            }
            Some("--version") | Some("-v") => {
                println!("sparkkv version {}", sparkkv::VERSION);
                std::process::exit(0);
            }
            Some(raw) => {
                config.port = raw.parse().unwrap_or_else(|_| {
                    eprintln!("Error: invalid port number '{}'", raw);
                    std::process::exit(1);
                });
            }
        }

        if args.len() > 2 {
            eprintln!("Error: unexpected argument '{}'", args[2]);
            print_help();
            std::process::exit(1);
        }

        config
    }
}

fn print_help() {
    println!(
        r#"
sparkkv - A Single-Threaded In-Memory Key-Value Server

USAGE:
    sparkkv [PORT]

ARGS:
    PORT    Port to listen on (default: {})

OPTIONS:
    -v, --version    Print version information
        --help       Print this help message

CONNECTING:
    Use redis-cli or any Redis client:
    $ redis-cli -p {}
    127.0.0.1:{}> PING
    PONG
"#,
        sparkkv::DEFAULT_PORT,
        sparkkv::DEFAULT_PORT,
        sparkkv::DEFAULT_PORT,
    );
}

fn main() -> anyhow::Result<()> {
    let config = Config::from_args();

    // Set up logging
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    // All process-wide state lives in the handler: keyspace, expiry
    // index, memory stats and the AOF log.
    let mut handler = CommandHandler::new(AofLog::new(DEFAULT_AOF_PATH));

    // Recover from a previous run before accepting any traffic. A
    // corrupt log is a fatal startup error.
    let aof_path = Path::new(DEFAULT_AOF_PATH);
    if aof_path.exists() {
        let applied = persistence::replay(aof_path, &mut handler)
            .with_context(|| format!("replaying {}", aof_path.display()))?;
        info!(commands = applied, "keyspace restored from AOF");
    }

    let mut server = Server::bind(config.port, handler)
        .with_context(|| format!("binding 0.0.0.0:{}", config.port))?;

    info!(port = config.port, "sparkkv {} ready", sparkkv::VERSION);
    server.run().context("event loop terminated")?;
    Ok(())
}
