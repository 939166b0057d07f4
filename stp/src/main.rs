//! Entry point for `stp`.
//!
//! Two driving applications share one binary: `send` streams a file to a
//! receiver, `recv` accepts one connection and writes the stream to a file.
//! All protocol work lives in the library; `main.rs` owns process setup
//! (logging, argument parsing, name resolution, file I/O).

use std::fs::File;
use std::io::{BufWriter, Read};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use stp::packet::MSS;
use stp::{ReceiverConfig, Sender, SenderConfig, Simulator, SimulatorConfig, UdpTransport};

/// Reliable byte stream over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Send a file to a listening receiver.
    Send {
        /// Receiver host name or address.
        host: String,
        /// Local UDP port; the receiver's ACKs arrive here.
        local_port: u16,
        /// UDP port the receiver listens on.
        peer_port: u16,
        /// File to transfer.
        file: PathBuf,
        /// Largest payload per segment.
        #[arg(long, default_value_t = MSS)]
        mss: usize,
    },
    /// Receive one transfer and write it to a file.
    Recv {
        /// Sender host name or address.
        host: String,
        /// Local UDP port to listen on.
        local_port: u16,
        /// UDP port the sender sends from; ACKs go here.
        peer_port: u16,
        /// Where to write the received stream.
        #[arg(short, long, default_value = "OutputFile")]
        output: PathBuf,
        /// Probability of dropping an inbound packet.
        #[arg(long, default_value_t = 0.0)]
        packet_loss: f64,
        /// Probability of dropping an outbound ACK.
        #[arg(long, default_value_t = 0.0)]
        ack_loss: f64,
        /// Probability of delivering an inbound packet late.
        #[arg(long, default_value_t = 0.0)]
        reorder: f64,
        /// Probability of flipping a bit in an inbound packet.
        #[arg(long, default_value_t = 0.0)]
        corrupt_packet: f64,
        /// Probability of flipping a bit in an outbound ACK.
        #[arg(long, default_value_t = 0.0)]
        corrupt_ack: f64,
        /// Seed for the impairment RNG.
        #[arg(long)]
        seed: Option<u64>,
        /// Receive window in bytes.
        #[arg(long, default_value_t = stp::config::DEFAULT_RECEIVE_WINDOW)]
        max_window: u16,
    },
}

/// Resolve `host:port` to its first address.
async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("could not resolve {host}"))?;
    addrs
        .next()
        .with_context(|| format!("{host} has no addresses"))
}

/// Unspecified local address of the same family as `peer`.
fn local_for(peer: SocketAddr, port: u16) -> SocketAddr {
    let ip = match peer.ip() {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, port)
}

async fn run_send(host: &str, local_port: u16, peer_port: u16, file: PathBuf, mss: usize) -> Result<()> {
    let mut input = File::open(&file).with_context(|| format!("opening {}", file.display()))?;
    let peer = resolve(host, peer_port).await?;
    let config = SenderConfig {
        mss,
        ..Default::default()
    };

    let mut sender = Sender::connect(local_for(peer, local_port), peer, config)
        .await
        .with_context(|| format!("connecting to {peer}"))?;

    let mut chunk = vec![0u8; 64 * 1024];
    let mut total = 0usize;
    loop {
        let n = input.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        sender.send(&chunk[..n]).await?;
        total += n;
    }

    let report = sender.close().await?;
    log::info!(
        "sent {total} bytes from {} ({} retransmissions)",
        file.display(),
        report.stats.retransmissions
    );
    Ok(())
}

async fn run_recv(
    host: &str,
    local_port: u16,
    peer_port: u16,
    output: PathBuf,
    sim: SimulatorConfig,
    max_window: u16,
) -> Result<()> {
    let peer = resolve(host, peer_port).await?;
    let udp = UdpTransport::connect(local_for(peer, local_port), peer)
        .await
        .with_context(|| format!("binding port {local_port}"))?;
    let mut transport = Simulator::new(udp, sim)?;

    let file = File::create(&output).with_context(|| format!("creating {}", output.display()))?;
    let mut sink = BufWriter::new(file);
    let config = ReceiverConfig {
        max_window,
        ..Default::default()
    };

    let report = stp::receive(&mut transport, config, &mut sink).await?;
    let faults = transport.stats();
    log::info!(
        "received {} bytes into {} (dropped {}, delayed {}, corrupted {}, acks dropped {}, acks corrupted {})",
        report.bytes,
        output.display(),
        faults.dropped,
        faults.delayed,
        faults.corrupted,
        faults.acks_dropped,
        faults.acks_corrupted
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Send {
            host,
            local_port,
            peer_port,
            file,
            mss,
        } => run_send(&host, local_port, peer_port, file, mss).await,
        Mode::Recv {
            host,
            local_port,
            peer_port,
            output,
            packet_loss,
            ack_loss,
            reorder,
            corrupt_packet,
            corrupt_ack,
            seed,
            max_window,
        } => {
            let sim = SimulatorConfig {
                packet_loss,
                ack_loss,
                reorder,
                corrupt_packet,
                corrupt_ack,
                seed,
            };
            run_recv(&host, local_port, peer_port, output, sim, max_window).await
        }
    }
}
