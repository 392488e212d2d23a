//! Framed message codec for the single bidirectional ordered byte stream
//! (spec §6.1). Integers are big-endian; the two client->server float pairs
//! and the action code are little-endian — the teacher's own Annex-B packer
//! style (`vt_backend.rs`'s `AvccHvccPacker`, manual byte manipulation) is
//! kept instead of reaching for the `bytes` crate, since it already covers
//! this need.

use std::io::{self, Read, Write};

use crate::contract::{InputAction, InputSample, PingSample};

/// `MAX_FRAME_SIZE = 5 MiB` (spec §6.1). A `VideoFrame` size field at or
/// below this bound is accepted; above it the connection is fatal.
pub const MAX_FRAME_SIZE: u32 = 5 * 1024 * 1024;

const TYPE_VIDEO_FRAME: u8 = 0;
const TYPE_DISPLAY_CONFIG: u8 = 1;
const TYPE_INPUT_SAMPLE: u8 = 2;
const TYPE_PING: u8 = 4;
const TYPE_PONG: u8 = 5;

/// Malformed wire bytes — fatal to the connection, never retried in-stream
/// (spec §7 `FramingError`).
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("frame size {0} is zero, which is not a valid VideoFrame payload")]
    ZeroSizedFrame(u32),
    #[error("frame size {size} exceeds MAX_FRAME_SIZE ({max})")]
    OversizeFrame { size: u32, max: u32 },
    #[error("unknown pointer_count {0}; only 1 or 2 are valid")]
    InvalidPointerCount(u8),
    #[error("unknown input action code {0}")]
    InvalidInputAction(i32),
    #[error("unknown rotation value {0}")]
    InvalidRotation(i32),
    #[error("unrecognized message type byte {0}")]
    UnknownMessageType(u8),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A fully-decoded server->client message (spec §6.1 top table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    DisplayConfig {
        width: i32,
        height: i32,
        rotation: i32,
    },
    Pong {
        client_timestamp: [u8; 8],
    },
}

/// A fully-decoded client->server message (spec §6.1 bottom table).
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Input(InputSample),
    Ping { client_timestamp: [u8; 8] },
}

/// Writes the `VideoFrame` type byte, the 4-byte big-endian size, and the
/// payload in one call so the framing invariant (size precedes payload,
/// start code at payload byte 0) is enforced at a single call site.
pub fn write_video_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), WireError> {
    let size = u32::try_from(payload.len()).map_err(|_| WireError::OversizeFrame {
        size: u32::MAX,
        max: MAX_FRAME_SIZE,
    })?;
    validate_frame_size(size)?;
    writer.write_all(&[TYPE_VIDEO_FRAME])?;
    writer.write_all(&size.to_be_bytes())?;
    writer.write_all(payload)?;
    Ok(())
}

pub fn validate_frame_size(size: u32) -> Result<(), WireError> {
    if size == 0 {
        return Err(WireError::ZeroSizedFrame(size));
    }
    if size > MAX_FRAME_SIZE {
        return Err(WireError::OversizeFrame {
            size,
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(())
}

pub fn write_display_config<W: Write>(
    writer: &mut W,
    width: i32,
    height: i32,
    rotation: i32,
) -> Result<(), WireError> {
    writer.write_all(&[TYPE_DISPLAY_CONFIG])?;
    writer.write_all(&width.to_be_bytes())?;
    writer.write_all(&height.to_be_bytes())?;
    writer.write_all(&rotation.to_be_bytes())?;
    Ok(())
}

pub fn write_pong<W: Write>(writer: &mut W, client_timestamp: [u8; 8]) -> Result<(), WireError> {
    writer.write_all(&[TYPE_PONG])?;
    writer.write_all(&client_timestamp)?;
    Ok(())
}

pub fn write_input_sample<W: Write>(
    writer: &mut W,
    sample: &InputSample,
) -> Result<(), WireError> {
    writer.write_all(&[TYPE_INPUT_SAMPLE])?;
    writer.write_all(&[sample.pointer_count()])?;
    writer.write_all(&sample.x.to_le_bytes())?;
    writer.write_all(&sample.y.to_le_bytes())?;
    if let Some((x2, y2)) = sample.second_pointer {
        writer.write_all(&x2.to_le_bytes())?;
        writer.write_all(&y2.to_le_bytes())?;
    }
    writer.write_all(&(sample.action as i32).to_le_bytes())?;
    Ok(())
}

pub fn write_ping<W: Write>(writer: &mut W, sample: PingSample) -> Result<(), WireError> {
    writer.write_all(&[TYPE_PING])?;
    writer.write_all(&sample.client_send_timestamp.to_be_bytes())?;
    Ok(())
}

/// Reads one message from the server->client direction. The type byte must
/// already have been consumed by the caller and is passed in as `msg_type`
/// so callers (the client receiver, which treats type 0 specially for
/// pooled-buffer acquisition) can dispatch before this function touches the
/// socket again.
pub fn read_server_message_body<R: Read>(
    reader: &mut R,
    msg_type: u8,
) -> Result<ServerMessage, WireError> {
    match msg_type {
        TYPE_DISPLAY_CONFIG => {
            let width = read_i32_be(reader)?;
            let height = read_i32_be(reader)?;
            let rotation = read_i32_be(reader)?;
            Ok(ServerMessage::DisplayConfig {
                width,
                height,
                rotation,
            })
        }
        TYPE_PONG => {
            let mut client_timestamp = [0u8; 8];
            reader.read_exact(&mut client_timestamp)?;
            Ok(ServerMessage::Pong { client_timestamp })
        }
        other => Err(WireError::UnknownMessageType(other)),
    }
}

/// Reads one client->server message body given its type byte (spec §4.4
/// receive path: one-byte discriminator then exactly the fixed payload).
pub fn read_client_message_body<R: Read>(
    reader: &mut R,
    msg_type: u8,
) -> Result<ClientMessage, WireError> {
    match msg_type {
        TYPE_INPUT_SAMPLE => {
            let mut pointer_count_buf = [0u8; 1];
            reader.read_exact(&mut pointer_count_buf)?;
            let pointer_count = pointer_count_buf[0];
            if pointer_count != 1 && pointer_count != 2 {
                return Err(WireError::InvalidPointerCount(pointer_count));
            }

            let x = read_f32_le(reader)?;
            let y = read_f32_le(reader)?;
            let second_pointer = if pointer_count == 2 {
                let x2 = read_f32_le(reader)?;
                let y2 = read_f32_le(reader)?;
                Some((x2, y2))
            } else {
                None
            };
            let action_code = read_i32_le(reader)?;
            let action = InputAction::from_i32(action_code)
                .ok_or(WireError::InvalidInputAction(action_code))?;

            Ok(ClientMessage::Input(InputSample {
                action,
                x,
                y,
                second_pointer,
            }))
        }
        TYPE_PING => {
            let mut client_timestamp = [0u8; 8];
            reader.read_exact(&mut client_timestamp)?;
            Ok(ClientMessage::Ping { client_timestamp })
        }
        other => Err(WireError::UnknownMessageType(other)),
    }
}

fn read_i32_be<R: Read>(reader: &mut R) -> Result<i32, WireError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_be_bytes(buf))
}

fn read_i32_le<R: Read>(reader: &mut R) -> Result<i32, WireError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_f32_le<R: Read>(reader: &mut R) -> Result<f32, WireError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(f32::from_le_bytes(buf))
}

pub fn read_u8<R: Read>(reader: &mut R) -> Result<u8, WireError> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub fn read_u32_be<R: Read>(reader: &mut R) -> Result<u32, WireError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}
