//! Core of a remote-display streaming system: host-side capture→encoder
//! dispatch, the framed wire protocol, the TCP server session state
//! machine, and the client-side receive/decode/input pipeline.

pub mod backend;
pub mod bitstream;
pub mod capture;
pub mod client;
pub mod contract;
pub mod double_buffer;
pub mod host_pipeline;
pub mod pipeline;
pub mod server;
pub mod stats;
pub mod wire;

pub use bitstream::{AccessUnit, ParameterSetCache, StatefulBitstreamAssembler};
pub use contract::{
    BackendError, DisplayConfig, EncodedFrame, EncoderSettings, InputAction, InputSample,
    PingSample, Rotation, SurfaceHandle, VideoEncoder,
};
pub use double_buffer::DoubleBufferedSurface;
pub use pipeline::{
    BoundedQueueRx, BoundedQueueTx, InFlightCredits, QueueRecvError, QueueSendError, QueueStats,
    bounded_queue,
};
pub use stats::{FrameCadenceWindow, SampleStats};
