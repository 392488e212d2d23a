//! Client daemon: connects to a host, drives the receive → decoder-feed
//! pipeline, and runs the input/ping uplink on its own thread (spec §4.5–
//! §4.7). There is no concrete OS presentation surface or hardware decoder
//! in this crate (spec §6.3 exclusion); this binary wires the real receive
//! loop and input uplink against a pass-through `SurfaceDecoder` so the
//! pipeline runs end to end up to the point where an OS media framework
//! would take over.

use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use remote_display_core::client::{
    BufferPool, DecoderError, DecoderFeed, DisplayConfigSink, InputUplink, Receiver,
    ReceivedVideoFrame, SurfaceDecoder, VideoFrameSink,
};
use remote_display_core::contract::DisplayConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "clientd", about = "Connect to a host and run the receive/decode/input pipeline")]
struct Args {
    host: String,

    #[arg(long, default_value_t = remote_display_core::server::DEFAULT_PORT)]
    port: u16,
}

/// Hands out an ever-incrementing input-buffer index; stands in for a real
/// decoder's bounded buffer pool (spec §4.6: "the decoder itself is the
/// backpressure signal"). No concrete OS decoder ships in this crate, so
/// this never actually signals backpressure — it always has a buffer free.
struct PassthroughDecoder {
    next_index: AtomicUsize,
}

impl PassthroughDecoder {
    fn new() -> Self {
        Self {
            next_index: AtomicUsize::new(0),
        }
    }
}

impl SurfaceDecoder for PassthroughDecoder {
    fn configure(&mut self, width: u32, height: u32, low_latency: bool) -> Result<(), DecoderError> {
        info!(width, height, low_latency, "decoder configured");
        Ok(())
    }

    fn try_acquire_input_buffer(&mut self) -> Option<usize> {
        Some(self.next_index.fetch_add(1, Ordering::Relaxed))
    }

    fn submit_input_buffer(&mut self, _index: usize, bytes: &[u8], presentation_us: u64) {
        info!(bytes = bytes.len(), presentation_us, "submitted frame to decoder");
    }

    fn release(&mut self) {}
}

struct DecoderVideoSink {
    feed: Arc<DecoderFeed<PassthroughDecoder>>,
}

impl VideoFrameSink for DecoderVideoSink {
    fn on_video_frame(&mut self, frame: ReceivedVideoFrame) {
        let ReceivedVideoFrame {
            buffer,
            size,
            receive_timestamp_ns,
        } = frame;
        // decode() returns the buffer to the shared pool once consumed
        // (spec §4.6 step 3/4), so the receive loop acquiring it back out
        // later is a real reuse rather than a fresh allocation.
        self.feed.decode(buffer, size, receive_timestamp_ns);
    }
}

struct DecoderConfigSink {
    feed: Arc<DecoderFeed<PassthroughDecoder>>,
    current: Option<DisplayConfig>,
}

impl DisplayConfigSink for DecoderConfigSink {
    fn on_display_config(&mut self, config: DisplayConfig) {
        let result = match self.current {
            Some(_) => self
                .feed
                .reconfigure(config.width as u32, config.height as u32),
            None => self.feed.configure(config.width as u32, config.height as u32),
        };
        if let Err(err) = result {
            tracing::error!(error = %err, "decoder rejected display configuration");
        }
        self.current = Some(config);
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let stream = TcpStream::connect((args.host.as_str(), args.port))
        .with_context(|| format!("connecting to {}:{}", args.host, args.port))?;
    stream.set_nodelay(true).context("enabling TCP_NODELAY")?;
    info!(host = %args.host, port = args.port, "connected");

    let uplink_stream = stream.try_clone().context("cloning stream for input uplink")?;
    let _uplink = InputUplink::spawn(uplink_stream);

    // One shared pool between the receive loop (acquires) and the decoder
    // feed (releases once consumed), per spec §4.5's single bounded pool.
    let pool = Arc::new(BufferPool::new());
    let feed = Arc::new(DecoderFeed::new(PassthroughDecoder::new(), Arc::clone(&pool)));

    let mut video_sink = DecoderVideoSink {
        feed: Arc::clone(&feed),
    };
    let mut config_sink = DecoderConfigSink {
        feed: Arc::clone(&feed),
        current: None,
    };

    let mut receiver = Receiver::new(stream, pool);
    match receiver.run(&mut video_sink, &mut config_sink) {
        Ok(()) => {}
        Err(err) => info!(error = %err, "receive loop ended"),
    }

    Ok(())
}
