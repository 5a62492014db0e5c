// meshroute: run one routing engine over a UDP socket
//
// The node binds the control port on all addresses, feeds every received
// datagram into the engine, fires engine timers on time and sends whatever
// the engine asks for. Type `route <ip>`, `table`, `status` or `quit`.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use meshroute_core::{Action, InterfaceAddress, RoutingError, RoutingProtocol};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::net::UdpSocket;
use tokio::time::Instant;

#[derive(Parser)]
#[command(name = "meshroute")]
#[command(about = "Reactive multi-hop routing node", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the routing node
    Start {
        /// Control port (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,

        /// Interface address such as 10.0.0.1/24 (repeatable)
        #[arg(short, long = "interface")]
        interfaces: Vec<String>,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default config file
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
    Set {
        key: String,
        value: String,
    },
    Get {
        key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => config::Config::default_path()?,
    };
    let config = config::Config::load(&config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter)),
        )
        .init();

    match cli.command {
        Commands::Start { port, interfaces } => cmd_start(config, port, interfaces).await,
        Commands::Config { action } => cmd_config(config, &config_path, action),
    }
}

fn cmd_config(mut config: config::Config, path: &std::path::Path, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            config::Config::default().save(path)?;
            println!("{} Wrote {}", "✓".green(), path.display());
        }

        ConfigAction::Show => {
            println!("{}", "Configuration".bold());
            println!("  {}", path.display().to_string().dimmed());
            println!();
            let json = serde_json::to_string_pretty(&config).context("Failed to serialize config")?;
            println!("{}", json);
        }

        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save(path)?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => match config.get(&key) {
            Some(value) => println!("{} = {}", key.bright_cyan(), value),
            None => anyhow::bail!("Unknown config key: {}", key),
        },
    }

    Ok(())
}

async fn cmd_start(config: config::Config, port: Option<u16>, extra: Vec<String>) -> Result<()> {
    let mut protocol = config.protocol.clone();
    if let Some(port) = port {
        protocol.control_port = port;
    }
    let port = protocol.control_port;

    let mut interfaces: Vec<InterfaceAddress> =
        config.interfaces.iter().copied().map(Into::into).collect();
    let mut next_index = interfaces.iter().map(|i| i.index).max().unwrap_or(0) + 1;
    for arg in &extra {
        interfaces.push(config::parse_interface(next_index, arg)?);
        next_index += 1;
    }
    if interfaces.is_empty() {
        anyhow::bail!("No interfaces configured (pass --interface 10.0.0.1/24)");
    }

    let mut engine = RoutingProtocol::new(protocol).context("Failed to create routing engine")?;

    let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))
        .await
        .with_context(|| format!("Failed to bind control port {}", port))?;
    socket
        .set_broadcast(true)
        .context("Failed to enable broadcast")?;

    println!("{}", "meshroute: Starting...".bold());
    println!();

    let started = Instant::now();
    for iface in &interfaces {
        engine.on_interface_up(*iface, started.elapsed());
        println!("{} Interface {}", "✓".green(), iface.to_string().bright_cyan());
    }
    println!("{} Listening on UDP port {}", "✓".green(), port);
    println!();

    send_actions(&mut engine, &socket, port).await;

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut dump = tokio::time::interval(Duration::from_secs(config.dump_interval_secs.max(1)));
    dump.tick().await;
    let mut buf = [0u8; 1500];

    loop {
        let wake = engine
            .next_timer_deadline()
            .map(|deadline| started + deadline)
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let (len, from) = received.context("Failed to receive datagram")?;
                let SocketAddr::V4(from) = from else { continue };
                let sender = *from.ip();
                let interface = interface_for(&interfaces, sender);
                match engine.handle_control_datagram(&buf[..len], sender, interface, started.elapsed()) {
                    Ok(()) => {}
                    Err(e @ RoutingError::DuplicateControlMessage { .. }) => tracing::trace!("{}", e),
                    Err(e) => tracing::debug!("Datagram from {} rejected: {}", sender, e),
                }
            }
            _ = tokio::time::sleep_until(wake) => {
                engine.poll_timers(started.elapsed());
            }
            _ = dump.tick(), if config.dump_interval_secs > 0 => {
                println!("{}", engine.routing_table_dump(started.elapsed()));
            }
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => {
                        if !handle_command(&mut engine, line.trim(), started.elapsed()) {
                            break;
                        }
                    }
                    _ => stdin_open = false,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }

        send_actions(&mut engine, &socket, port).await;
    }

    println!("Shutting down...");
    engine.shutdown();
    Ok(())
}

/// Returns `false` when the user asked to quit
fn handle_command(engine: &mut RoutingProtocol, line: &str, now: Duration) -> bool {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (None, _) => {}
        (Some("quit") | Some("exit"), _) => return false,
        (Some("table"), _) => println!("{}", engine.routing_table_dump(now)),
        (Some("status"), _) => {
            let s = engine.summary(now);
            println!("{}", "Status".bold());
            println!("  Interfaces:   {}", s.interfaces);
            println!("  Neighbors:    {}", s.neighbors);
            println!("  Routes:       {}", s.routes);
            println!("  Discoveries:  {}", s.pending_discoveries);
            println!("  Repairs:      {}", s.pending_repairs);
            println!("  Queued:       {}", s.queued_packets);
        }
        (Some("route"), Some(target)) => match target.parse::<Ipv4Addr>() {
            Ok(destination) => match engine.resolve_outgoing_route(destination, now) {
                Ok(route) => println!(
                    "{} {} via {} (interface {})",
                    "✓".green(),
                    destination,
                    route.next_hop.to_string().bright_cyan(),
                    route.interface
                ),
                Err(e) => println!("{} {}", "•".yellow(), e),
            },
            Err(_) => println!("{} Invalid address: {}", "✗".red(), target),
        },
        _ => println!("Commands: route <ip> | table | status | quit"),
    }
    true
}

async fn send_actions(engine: &mut RoutingProtocol, socket: &UdpSocket, port: u16) {
    for action in engine.take_actions() {
        match action {
            Action::Transmit { to, message, .. } => {
                let bytes = meshroute_core::encode_message(&message);
                if let Err(e) = socket.send_to(&bytes, SocketAddrV4::new(to, port)).await {
                    tracing::warn!("Failed to send {} to {}: {}", message.message_type, to, e);
                }
            }
            Action::RouteFound {
                destination,
                next_hop,
            } => {
                println!("{} Route to {} via {}", "✓".green(), destination, next_hop);
            }
            Action::Failed(e) => {
                println!("{} {}", "✗".red(), e);
            }
        }
    }
}

/// Interface whose subnet holds `sender`, else the first one
fn interface_for(interfaces: &[InterfaceAddress], sender: Ipv4Addr) -> u32 {
    interfaces
        .iter()
        .find(|i| i.contains(sender))
        .or_else(|| interfaces.first())
        .map(|i| i.index)
        .unwrap_or(0)
}
