use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use vhost_core::config::{DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_MAX_HANDSHAKE_BYTES};
use vhost_core::{sniff, SniSelection, SniffConfig};

mod output;

use output::{OutputFormat, Report};

#[derive(Parser)]
#[command(name = "vhost-proxy")]
#[command(about = "Reports the virtual host each incoming TCP connection asks for (TLS SNI or HTTP Host)")]
struct Cli {
    /// Address to accept connections on
    #[arg(short, long, default_value = "0.0.0.0:8443")]
    listen: SocketAddr,

    /// Deadline for a complete ClientHello or request head, in milliseconds
    #[arg(long, default_value_t = DEFAULT_HANDSHAKE_TIMEOUT.as_millis() as u64)]
    timeout_ms: u64,

    /// Maximum bytes read from a peer while sniffing
    #[arg(long, default_value_t = DEFAULT_MAX_HANDSHAKE_BYTES)]
    max_bytes: usize,

    /// Server name to keep when SNI lists several: "first" or "last"
    #[arg(long, default_value = "first")]
    sni_selection: String,

    /// Output format: "text" (human-readable) or "json" (NDJSON, one object per line)
    #[arg(short, long, default_value = "text")]
    output: String,
}

impl Cli {
    fn sniff_config(&self) -> Result<SniffConfig> {
        let selection = SniSelection::parse(&self.sni_selection).ok_or_else(|| {
            anyhow::anyhow!(
                "Invalid SNI selection '{}'. Expected 'first' or 'last'.",
                self.sni_selection
            )
        })?;
        if self.max_bytes == 0 {
            anyhow::bail!("--max-bytes must be greater than zero");
        }
        Ok(SniffConfig::default()
            .with_timeout(Duration::from_millis(self.timeout_ms))
            .with_max_handshake_bytes(self.max_bytes)
            .with_sni_selection(selection))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let config = Arc::new(cli.sniff_config()?);
    let format = OutputFormat::parse(&cli.output)?;

    let listener = TcpListener::bind(cli.listen).await?;

    info!("vhost-proxy listening on {}", cli.listen);
    info!(
        "Sniff limits: {:?} timeout, {} bytes, SNI selection {:?}",
        config.handshake_timeout, config.max_handshake_bytes, config.sni_selection
    );
    info!("Press Ctrl+C to stop\n");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("accept failed: {}", e);
                continue;
            }
        };

        let config = Arc::clone(&config);
        tokio::spawn(async move {
            match sniff(stream, &config).await {
                Ok(conn) => {
                    let report = Report::from_sniffed(peer, &conn);
                    if let Err(e) = output::print_report(&report, format) {
                        error!("[{}] failed to write report: {}", peer, e);
                    }
                }
                Err(rejected) => {
                    let (error, stream) = rejected.into_parts();
                    warn!(
                        "[{}] sniffing failed after {} bytes: {}",
                        peer,
                        stream.captured_len(),
                        error
                    );
                }
            }

            // Nothing is forwarded; the connection closes here.
        });
    }
}
