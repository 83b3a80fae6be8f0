//! can-bridge - CAN bus to TCP bridge.
//!
//! # Run
//!
//! ```bash
//! can-bridge                                  # virtual bus, 127.0.0.1:5000
//! can-bridge --config bridge.toml --listen 0.0.0.0:5000
//! can-bridge --interface vcan0                # needs --features socketcan
//! ```
//!
//! Console commands are read line by line from stdin: `t` sends one test
//! frame, `c` toggles the cyclic frame, `q` / `x` / ESC quits.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tracing::error;
use tracing_subscriber::EnvFilter;

use can_bridge::bus::{SharedBus, VirtualBus};
use can_bridge::console::{self, OperatorCommand};
use can_bridge::{Bridge, BridgeBuilder, BridgeConfig, BridgeError, CyclicState, Result};

#[derive(Parser, Debug)]
#[command(name = "can-bridge", version, about = "Bridge a CAN bus to a TCP peer")]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the configuration file
    #[arg(short, long)]
    listen: Option<String>,

    /// SocketCAN interface (e.g. can0); the virtual bus is used when omitted
    #[cfg(all(feature = "socketcan", target_os = "linux"))]
    #[arg(short, long)]
    interface: Option<String>,

    /// Do not loop transmitted frames back on the virtual bus
    #[arg(long)]
    no_self_reception: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "info,can_bridge=debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(all(feature = "socketcan", target_os = "linux"))]
fn open_bus(args: &Args) -> Result<SharedBus> {
    match &args.interface {
        Some(interface) => Ok(Arc::new(can_bridge::bus::SocketCanBus::open(interface)?)),
        None => Ok(virtual_bus(args)),
    }
}

#[cfg(not(all(feature = "socketcan", target_os = "linux")))]
fn open_bus(args: &Args) -> Result<SharedBus> {
    Ok(virtual_bus(args))
}

fn virtual_bus(args: &Args) -> SharedBus {
    Arc::new(VirtualBus::with_options(!args.no_self_reception, true))
}

fn load_config(args: &Args) -> Result<BridgeConfig> {
    let mut config = match &args.config {
        Some(path) => BridgeConfig::load(path)?,
        None => BridgeConfig::default(),
    };

    if let Some(listen) = &args.listen {
        config.listen_addr = listen.clone();
    }
    config.validate()?;
    Ok(config)
}

/// Apply one console command. Returns `false` when the operator quits.
fn handle_command(bridge: &Bridge, command: OperatorCommand) -> bool {
    match command {
        OperatorCommand::Transmit => {
            if let Err(e) = bridge.transmit(&console::test_frame()) {
                eprintln!("Transmit failed: {}", e);
            }
        }
        OperatorCommand::ToggleCyclic => match bridge.toggle_cyclic() {
            Ok(CyclicState::Running) => println!("Cyclic message started."),
            Ok(CyclicState::Idle) => println!("Cyclic message stopped."),
            Err(BridgeError::CyclicUnsupported) => println!("Cyclic messages not supported."),
            Err(e) => eprintln!("Cyclic toggle failed: {}", e),
        },
        OperatorCommand::Quit => return false,
    }
    true
}

/// Read console commands until the operator quits, stdin fails or Ctrl+C.
async fn run_console<R>(bridge: &Bridge, mut lines: Lines<R>)
where
    R: AsyncBufRead + Unpin,
{
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if let Some(command) = OperatorCommand::parse(&line) {
                        if !handle_command(bridge, command) {
                            break;
                        }
                    }
                }
                // stdin closed: keep bridging until Ctrl+C
                Ok(None) => {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Failed to wait for Ctrl+C: {}", e);
                    }
                    break;
                }
                Err(e) => {
                    error!("Console input failed: {}", e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = load_config(&args)?;
    let bus = open_bus(&args)?;

    let bridge = BridgeBuilder::from_config(bus, &config)?.start().await?;

    eprintln!("Peers connect to {}", bridge.local_addr());
    eprintln!("{}", console::USAGE);

    run_console(&bridge, BufReader::new(tokio::io::stdin()).lines()).await;

    eprintln!("Shutting down...");
    let stats = bridge.stats();
    bridge.shutdown().await;

    if args.verbose {
        eprintln!(
            "Frames from bus: {}, forwarded: {}, records from peer: {}, rejected: {}",
            stats.frames_received,
            stats.frames_forwarded,
            stats.records_received,
            stats.records_rejected
        );
    }
    Ok(())
}
