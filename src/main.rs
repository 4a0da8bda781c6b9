//! voxdispatch - Encrypted voice packet dispatch

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::UdpSocket;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use voxdispatch::crypto::SecretKey;
use voxdispatch::dispatch::{
    ChannelFrameSource, FrameSource, HolderConfig, SchedulerConfig, SendScheduler, SessionHolder,
    SpeakingSink, SILENCE_FRAME,
};
use voxdispatch::network::{discover_external_address, resolve, UdpPacketPump};
use voxdispatch::protocol::{NonceStrategy, PacketDecoder, MAX_PACKET_LENGTH};

#[derive(Parser)]
#[command(name = "voxdispatch")]
#[command(about = "Encrypted RTP voice packet dispatch")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover the external address a voice server sees
    Discover {
        /// Voice server address (HOST:PORT)
        #[arg(short, long)]
        server: String,

        /// Source identifier to announce
        #[arg(long)]
        ssrc: u32,

        /// Give up after this many milliseconds
        #[arg(long, default_value = "5000")]
        timeout_ms: u64,
    },

    /// List supported encryption modes
    Modes,

    /// Stream test frames to a voice endpoint
    Send {
        /// Target address (HOST:PORT)
        #[arg(short, long)]
        target: String,

        /// Source identifier
        #[arg(long)]
        ssrc: u32,

        /// Secret key as 64 hex characters
        #[arg(long, env = "VOXDISPATCH_KEY")]
        key: String,

        /// Encryption mode (see 'modes')
        #[arg(long, default_value = "xsalsa20_poly1305_lite")]
        mode: NonceStrategy,

        /// How long to stream, in seconds
        #[arg(long, default_value = "5")]
        duration_secs: u64,

        /// Pacing buffer per session in milliseconds
        #[arg(long, default_value = "400")]
        buffer_ms: u32,
    },

    /// Receive and decrypt voice packets
    Listen {
        /// Port to listen on
        #[arg(short, long, default_value = "5000")]
        port: u16,

        /// Secret key as 64 hex characters
        #[arg(long, env = "VOXDISPATCH_KEY")]
        key: String,

        /// Encryption mode (see 'modes')
        #[arg(long, default_value = "xsalsa20_poly1305_lite")]
        mode: NonceStrategy,

        /// Stop after this many packets (0 = run until interrupted)
        #[arg(long, default_value = "0")]
        count: u64,
    },
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Parse a 32-byte key written as hex
fn parse_key(hex: &str) -> Result<SecretKey> {
    let bytes = hex::decode(hex.trim()).context("Key is not valid hex")?;
    let key = SecretKey::try_from(bytes.as_slice()).context("Key must be 32 bytes")?;
    Ok(key)
}

fn list_modes() {
    println!("Encryption modes:");
    for strategy in NonceStrategy::ALL {
        println!(
            "  {:<26} {:?}, {} byte nonce suffix",
            strategy.mode_name(),
            strategy,
            strategy.suffix_length()
        );
    }
}

async fn run_discover(server: String, ssrc: u32, timeout_ms: u64) -> Result<()> {
    let target = resolve(&server)
        .await
        .with_context(|| format!("Failed to resolve {}", server))?;

    info!("Discovering external address via {}", target);

    let external = tokio::time::timeout(
        Duration::from_millis(timeout_ms),
        discover_external_address(target, ssrc),
    )
    .await
    .with_context(|| format!("No discovery response within {} ms", timeout_ms))?
    .context("Discovery failed")?;

    println!("{}", external);
    Ok(())
}

async fn run_send(
    target: String,
    ssrc: u32,
    key: SecretKey,
    mode: NonceStrategy,
    duration_secs: u64,
    buffer_ms: u32,
) -> Result<()> {
    let address = resolve(&target)
        .await
        .with_context(|| format!("Failed to resolve {}", target))?;

    let config = SchedulerConfig {
        buffer_duration_ms: buffer_ms,
        ..SchedulerConfig::default()
    };
    let scheduler = Arc::new(SendScheduler::new(config, Arc::new(UdpPacketPump::create)));

    let (frames_tx, frames) = ChannelFrameSource::new(64);
    let frames: Arc<dyn FrameSource> = Arc::new(frames);
    let sink: Arc<dyn SpeakingSink> =
        Arc::new(|speaking: bool| info!("Speaking: {}", speaking));

    let holder = SessionHolder::new(
        HolderConfig::default(),
        scheduler.clone(),
        sink,
        Arc::new(move || Some(frames.clone())),
    );

    holder.on_address_and_ssrc_changed(address, ssrc);
    holder.on_key_and_strategy_changed(key, mode);

    info!(
        "Streaming to {} for {} s using {}",
        address, duration_secs, mode
    );

    // One test frame per 20 ms; a full channel just drops the frame
    let mut ticker = tokio::time::interval(Duration::from_millis(20));
    let deadline = tokio::time::Instant::now() + Duration::from_secs(duration_secs);
    while tokio::time::Instant::now() < deadline {
        ticker.tick().await;
        if frames_tx.try_send(SILENCE_FRAME.to_vec()).is_err() {
            warn!("Frame channel full, dropping frame");
        }
    }

    holder.shutdown();
    scheduler.close();
    info!("Done");
    Ok(())
}

async fn run_listen(port: u16, key: SecretKey, mode: NonceStrategy, count: u64) -> Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    let decoder = PacketDecoder::new(key, mode);

    info!("Listening on {} ({})", socket.local_addr()?, mode);

    let mut buf = vec![0u8; MAX_PACKET_LENGTH];
    let mut received = 0u64;

    loop {
        let (len, from) = tokio::select! {
            result = socket.recv_from(&mut buf) => result?,
            _ = tokio::signal::ctrl_c() => break,
        };

        match decoder.decode(&buf[..len]) {
            Ok(packet) => {
                received += 1;
                info!(
                    "{} ssrc={} seq={} ts={} payload={} bytes",
                    from,
                    packet.header.ssrc,
                    packet.header.sequence,
                    packet.header.timestamp,
                    packet.payload.len()
                );
            }
            Err(e) => warn!("Rejected {} byte packet from {}: {}", len, from, e),
        }

        if count > 0 && received >= count {
            break;
        }
    }

    info!("Received {} packets", received);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    match cli.command {
        Commands::Discover {
            server,
            ssrc,
            timeout_ms,
        } => {
            run_discover(server, ssrc, timeout_ms).await?;
        }
        Commands::Modes => list_modes(),
        Commands::Send {
            target,
            ssrc,
            key,
            mode,
            duration_secs,
            buffer_ms,
        } => {
            let key = parse_key(&key)?;
            run_send(target, ssrc, key, mode, duration_secs, buffer_ms).await?;
        }
        Commands::Listen {
            port,
            key,
            mode,
            count,
        } => {
            let key = parse_key(&key)?;
            run_listen(port, key, mode, count).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_accepts_hex() {
        let key = parse_key(&format!("  {}\n", "0a".repeat(32))).unwrap();
        assert_eq!(key.as_bytes(), &[0x0a; 32]);

        let key = parse_key(&"AB".repeat(32)).unwrap();
        assert_eq!(key.as_bytes(), &[0xab; 32]);
    }

    #[test]
    fn test_parse_key_rejects_bad_input() {
        assert!(parse_key("zz").is_err());
        assert!(parse_key(&"0".repeat(63)).is_err());
        assert!(parse_key(&"00".repeat(31)).is_err());
        assert!(parse_key(&"00".repeat(33)).is_err());
    }
}
