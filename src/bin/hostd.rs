//! Host daemon: runs the capture → encoder → server pipeline (spec §4.2,
//! §4.3, §4.4).

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use remote_display_core::backend::{self, BackendInitOpts};
use remote_display_core::capture::CaptureSource;
use remote_display_core::contract::{DisplayConfig, EncoderSettings, Rotation};
use remote_display_core::host_pipeline::{FrameSink, HostPipeline, PipelineRunner};
use remote_display_core::server::{self, Server};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hostd", about = "Capture, encode, and serve a remote display stream")]
struct Args {
    #[arg(long, default_value_t = server::DEFAULT_PORT)]
    port: u16,

    #[arg(long, default_value_t = 1920)]
    width: u32,

    #[arg(long, default_value_t = 1080)]
    height: u32,

    #[arg(long, default_value_t = 60)]
    fps: u32,

    #[arg(long, default_value_t = 8.0)]
    bitrate_mbps: f32,

    #[arg(long, default_value_t = false)]
    gaming_boost: bool,
}

struct ServerFrameSink {
    server: Arc<Server>,
}

impl FrameSink for ServerFrameSink {
    fn send_frame(&mut self, bytes: &[u8], _capture_timestamp_ns: u64, _is_keyframe: bool) {
        if let Err(err) = self.server.send_frame(bytes) {
            tracing::warn!(error = %err, "failed to send frame to client");
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let opts = BackendInitOpts {
        device: None,
        width: args.width,
        height: args.height,
        fps: args.fps,
        initial_settings: EncoderSettings::new(args.bitrate_mbps, 0.5, args.gaming_boost),
    };
    let selection = backend::select_backend(&opts).context("selecting an encoder backend")?;
    info!(backend = selection.encoder.name(), attempts = selection.attempts.len(), "encoder selected");

    let config = DisplayConfig::new(args.width as i32, args.height as i32, Rotation::Deg0);
    let server = Arc::new(Server::new(config));
    server.listen(args.port).context("binding listener")?;
    info!(port = args.port, "listening");

    let pipeline = Arc::new(HostPipeline::new(
        selection.encoder,
        Box::new(ServerFrameSink {
            server: Arc::clone(&server),
        }),
    ));

    let capture = Arc::new(CaptureSource::new(args.width, args.height, args.fps));
    capture.start().context("starting capture source")?;

    let _runner = PipelineRunner::spawn(Arc::clone(&capture), Arc::clone(&pipeline), args.fps);

    server.accept_loop();
    Ok(())
}
