//! Client-side module tree (spec §4.5–§4.7): receive pipeline, decoder
//! feed, and input/ping uplink.

pub mod buffer_pool;
pub mod decoder_feed;
pub mod input_uplink;
pub mod receiver;

pub use buffer_pool::{BufferPool, FrameBuffer};
pub use decoder_feed::{DecoderError, DecoderFeed, DecoderStatsObserver, SurfaceDecoder};
pub use input_uplink::{InputUplink, MovePredictor};
pub use receiver::{DisplayConfigSink, Receiver, ReceiverError, ReceivedVideoFrame, VideoFrameSink};

/// A trait seam for wherever decoded pictures end up on screen (spec §6.3
/// "presentation_surface" — kept as a seam with no concrete OS
/// implementation per the spec's explicit exclusion).
pub trait PresentationSurface: Send {
    fn present(&mut self, presentation_timestamp_ns: u64);
}
