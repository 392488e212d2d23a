//! Client receiver: a single reader state machine over the ordered byte
//! stream from the server (spec §4.5). Dispatches on the one-byte type
//! discriminator, rejects oversize video frames fatally, and ignores
//! unrecognized types for forward compatibility.

use std::io::Read;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{info, warn};

use crate::client::buffer_pool::{BufferPool, FrameBuffer};
use crate::contract::{DisplayConfig, Rotation};
use crate::wire::{self, ServerMessage, WireError};

const TYPE_VIDEO_FRAME: u8 = 0;
const TYPE_DISPLAY_CONFIG: u8 = 1;

#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error(transparent)]
    Framing(#[from] WireError),
    #[error("connection closed")]
    Closed,
}

/// Delivered once per received video frame, with the receive timestamp
/// (spec §4.5: "invoke decoder-feed callback with `(buffer, size,
/// receive_timestamp)`"). The buffer must be returned to the pool by the
/// callee once consumed.
pub struct ReceivedVideoFrame {
    pub buffer: FrameBuffer,
    pub size: usize,
    pub receive_timestamp_ns: u64,
}

/// The sink takes ownership of the buffer and is responsible for returning
/// it to the shared pool once consumed — mirroring `DecoderFeed::decode`,
/// which already releases the buffer internally (spec §4.6 step 3/4). The
/// receiver does not release on the sink's behalf.
pub trait VideoFrameSink: Send {
    fn on_video_frame(&mut self, frame: ReceivedVideoFrame);
}

pub trait DisplayConfigSink: Send {
    fn on_display_config(&mut self, config: DisplayConfig);
}

/// Runs the receive loop to completion (fatal error or EOF), driven by the
/// caller's dedicated receive context thread (spec §5). The buffer pool is
/// shared with whatever owns the decoder feed so a buffer acquired here and
/// released there is actually reused (spec §4.5 Buffer pool).
pub struct Receiver {
    stream: TcpStream,
    pool: Arc<BufferPool>,
}

impl Receiver {
    pub fn new(stream: TcpStream, pool: Arc<BufferPool>) -> Self {
        Self { stream, pool }
    }

    pub fn run(
        &mut self,
        video_sink: &mut dyn VideoFrameSink,
        display_sink: &mut dyn DisplayConfigSink,
    ) -> Result<(), ReceiverError> {
        let epoch = Instant::now();
        loop {
            let msg_type = match wire::read_u8(&mut self.stream) {
                Ok(b) => b,
                Err(WireError::Io(err))
                    if err.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Err(ReceiverError::Closed);
                }
                Err(err) => return Err(err.into()),
            };

            match msg_type {
                TYPE_VIDEO_FRAME => {
                    let size = wire::read_u32_be(&mut self.stream)?;
                    wire::validate_frame_size(size)?;
                    let mut buffer = self.pool.acquire(size as usize);
                    self.stream.read_exact(&mut buffer.data[..size as usize])?;
                    let receive_timestamp_ns = epoch.elapsed().as_nanos() as u64;
                    video_sink.on_video_frame(ReceivedVideoFrame {
                        buffer,
                        size: size as usize,
                        receive_timestamp_ns,
                    });
                }
                TYPE_DISPLAY_CONFIG => {
                    match wire::read_server_message_body(&mut self.stream, msg_type)? {
                        ServerMessage::DisplayConfig {
                            width,
                            height,
                            rotation,
                        } => {
                            let rotation = Rotation::from_degrees(rotation)
                                .ok_or(WireError::InvalidRotation(rotation))?;
                            info!(width, height, ?rotation, "received DisplayConfig");
                            display_sink.on_display_config(DisplayConfig::new(
                                width, height, rotation,
                            ));
                        }
                        other => {
                            warn!(?other, "unexpected message for DisplayConfig type byte");
                        }
                    }
                }
                other => {
                    // Forward compatibility: skip message types this
                    // client build does not recognize (spec §4.5).
                    let _ = other;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::write_display_config;
    use std::io::Write as _;
    use std::net::TcpListener;
    use std::thread;

    struct RecordingVideoSink {
        received: Vec<usize>,
        pool: Arc<BufferPool>,
    }
    impl VideoFrameSink for RecordingVideoSink {
        fn on_video_frame(&mut self, frame: ReceivedVideoFrame) {
            self.received.push(frame.size);
            self.pool.release(frame.buffer);
        }
    }

    struct RecordingConfigSink {
        configs: Vec<DisplayConfig>,
    }
    impl DisplayConfigSink for RecordingConfigSink {
        fn on_display_config(&mut self, config: DisplayConfig) {
            self.configs.push(config);
        }
    }

    #[test]
    fn receives_display_config_then_stops_on_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server_thread = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            write_display_config(&mut stream, 1920, 1080, 90).unwrap();
            stream.flush().unwrap();
        });

        let client_stream = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
        let pool = Arc::new(BufferPool::new());
        let mut receiver = Receiver::new(client_stream, Arc::clone(&pool));
        let mut video_sink = RecordingVideoSink {
            received: Vec::new(),
            pool,
        };
        let mut config_sink = RecordingConfigSink { configs: Vec::new() };

        let result = receiver.run(&mut video_sink, &mut config_sink);
        server_thread.join().unwrap();

        assert!(matches!(result, Err(ReceiverError::Closed)));
        assert_eq!(config_sink.configs.len(), 1);
        assert_eq!(config_sink.configs[0].width, 1920);
        assert_eq!(config_sink.configs[0].rotation, Rotation::Deg90);
    }
}
