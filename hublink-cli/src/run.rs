//! `hublink run`: download a script to a hub and attach to its console.
//!
//! Usage: `hublink run [OPTIONS] DEVICE SCRIPT`
//!
//! `DEVICE` is a packet-oriented node: every read returns one hub
//! notification with its event header, every write is one transport write.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use hublink::{ChannelKind, Hub, HubConfig, MpyCross, RunOptions, StreamChannel};
use hublink_proto::HubKind;
use tracing::{info, warn};

/// Hub class, as accepted on the command line.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum HubKindArg {
    /// BOOST Move hub (20-byte writes).
    Move,
    /// City hub.
    City,
    /// Technic medium hub.
    Technic,
    /// SPIKE Prime / MINDSTORMS Inventor hub.
    Prime,
    /// SPIKE Essential hub.
    Essential,
}

impl From<HubKindArg> for HubKind {
    fn from(k: HubKindArg) -> Self {
        match k {
            HubKindArg::Move => Self::Move,
            HubKindArg::City => Self::City,
            HubKindArg::Technic => Self::Technic,
            HubKindArg::Prime => Self::Prime,
            HubKindArg::Essential => Self::Essential,
        }
    }
}

/// Arguments for `hublink run`.
#[derive(clap::Args)]
pub struct RunArgs {
    /// Hub device node.
    device: PathBuf,

    /// Script path, or inline MicroPython source.
    script: String,

    /// Return once the program is downloaded.
    #[arg(long)]
    no_wait: bool,

    /// Do not print program output or progress.
    #[arg(short, long)]
    quiet: bool,

    /// Hub class; limits write size on constrained hubs.
    #[arg(long, value_enum)]
    hub_kind: Option<HubKindArg>,

    /// Largest single device write, overriding --hub-kind.
    #[arg(long)]
    max_write: Option<usize>,

    /// mpy-cross executable.
    #[arg(long, default_value = "mpy-cross")]
    mpy_cross: PathBuf,

    /// Program bytes per acknowledged block (1-100).
    #[arg(long, default_value_t = 100)]
    chunk_size: usize,

    /// Block acknowledgment timeout in milliseconds.
    #[arg(long, default_value_t = 500)]
    ack_timeout_ms: u64,

    /// Delay before trusting a program stop, in milliseconds.
    #[arg(long, default_value_t = 300)]
    settle_ms: u64,

    /// Program restarts after a stop to wait out.
    #[arg(long, default_value_t = 1)]
    stop_rearms: u32,
}

impl RunArgs {
    pub async fn run(self) -> Result<()> {
        let script = hublink::script_source(&self.script).context("failed to save inline script")?;

        let device = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.device)
            .await
            .with_context(|| format!("failed to open {}", self.device.display()))?;
        let (reader, writer) = tokio::io::split(device);

        let max_write = self
            .max_write
            .or_else(|| self.hub_kind.and_then(|k| HubKind::from(k).max_write()));
        let channel = StreamChannel::new(writer, ChannelKind::Usb).with_max_write(max_write);

        let (sink, mut events) = hublink::subscription();
        tokio::spawn(async move {
            match hublink::forward_events(reader, &sink).await {
                Ok(()) => info!("device closed"),
                Err(e) => warn!(error = %e, "device read failed"),
            }
        });

        let config = HubConfig::default()
            .chunk_size(self.chunk_size)
            .ack_timeout(Duration::from_millis(self.ack_timeout_ms))
            .settle_delay(Duration::from_millis(self.settle_ms))
            .stop_rearms(self.stop_rearms);
        let mut builder = Hub::builder(channel).config(config);
        if !self.quiet {
            builder = builder.on_progress(|p| {
                eprint!("\rdownloading: {}/{} bytes", p.sent, p.total);
                if p.sent == p.total {
                    eprintln!();
                }
            });
        }
        let hub = builder.build();

        let opts = RunOptions::default()
            .wait(!self.no_wait)
            .print_output(!self.quiet);
        let compiler = MpyCross::new(&self.mpy_cross);
        let report = hub
            .run(&mut events, &script, &compiler, tokio::io::stdin(), &opts)
            .await
            .with_context(|| format!("failed to run {}", script.display()))?;

        info!(
            bytes = report.bytes_sent,
            lines = report.output.len(),
            session = ?report.session,
            "run finished"
        );
        Ok(())
    }
}
