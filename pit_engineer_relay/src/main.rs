// CLI entry point for the pit engineer session relay.
//
// Starts a standalone relay that team clients connect to. See `server.rs`
// for the networking architecture and `registry.rs` for the session state.
//
// Usage:
//   relay [OPTIONS]
//     --config <FILE>          JSON config; flags below override it
//     --bind <IP>              Bind address (default: 0.0.0.0)
//     --tcp-port <PORT>        Reliable port (default: 4269)
//     --udp-port <PORT>        Unreliable port (default: 4270)
//     --max-participants <N>   Max participants (default: 5)
//     --liveness-ms <MS>       UDP liveness window (default: 1500)
//
// Log verbosity follows `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::str::FromStr;

use pit_engineer_relay::{RelayConfig, start_relay};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = parse_args();

    let (handle, endpoints) = match start_relay(config) {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "failed to start relay");
            std::process::exit(1);
        }
    };

    info!(
        tcp = %endpoints.reliable,
        udp = %endpoints.unreliable,
        "press Ctrl+C to stop"
    );

    // The process exits on SIGINT/SIGTERM; the relay threads are torn down
    // with it.
    handle.join();
}

/// Parse command-line arguments into a `RelayConfig`. Uses simple
/// `std::env::args()` matching. `--config` is applied
/// first wherever it appears, then the individual flags.
fn parse_args() -> RelayConfig {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut config = match config_file_arg(&args) {
        Some(path) => match RelayConfig::from_json_file(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
        },
        None => RelayConfig::default(),
    };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => i += 1,
            "--bind" => {
                i += 1;
                config.bind_ip = value(&args, i, "--bind requires an IP address");
            }
            "--tcp-port" => {
                i += 1;
                config.tcp_port = value(&args, i, "--tcp-port requires a valid port number");
            }
            "--udp-port" => {
                i += 1;
                config.udp_port = value(&args, i, "--udp-port requires a valid port number");
            }
            "--max-participants" => {
                i += 1;
                config.max_participants =
                    value(&args, i, "--max-participants requires a valid number");
            }
            "--liveness-ms" => {
                i += 1;
                config.liveness_window_ms =
                    value(&args, i, "--liveness-ms requires a number of milliseconds");
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    config
}

fn config_file_arg(args: &[String]) -> Option<PathBuf> {
    let pos = args.iter().position(|a| a == "--config")?;
    match args.get(pos + 1) {
        Some(path) => Some(PathBuf::from(path)),
        None => {
            eprintln!("--config requires a file path");
            std::process::exit(1);
        }
    }
}

/// Parse `args[i]` or exit with `message`.
fn value<T: FromStr>(args: &[String], i: usize, message: &str) -> T {
    args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
        eprintln!("{message}");
        std::process::exit(1);
    })
}

fn print_usage() {
    println!("Usage: relay [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --config <FILE>          JSON config file; flags override it");
    println!("  --bind <IP>              Bind address (default: 0.0.0.0)");
    println!("  --tcp-port <PORT>        Reliable port (default: 4269)");
    println!("  --udp-port <PORT>        Unreliable port (default: 4270)");
    println!("  --max-participants <N>   Max participants (default: 5)");
    println!("  --liveness-ms <MS>       UDP liveness window (default: 1500)");
    println!("  --help, -h               Show this help");
}
