//! Hub TCP framing (§6): `[magic: u32][len: u32][message record][optional payload bytes]`.
//!
//! The in-process MPI/channel transports exchange [`Message`](super::Message) values directly
//! and never touch this module. `wire` only matters at the hub socket boundary, where bytes
//! cross an actual stream and a reader has to recover frame boundaries from a byte soup -- the
//! same problem qsim's `NetMessageBroker` solves for its `InternalSyncMessage` stream
//! (`src/simulation/messaging/sim_communication/message_broker.rs`), except here the framing is
//! explicit on the wire instead of implicit in MPI's message-based transport.

use std::io::{self, Read, Write};

use super::{Message, MAX_MESSAGE_SIZE};
use crate::error::{Result, VistleError};

/// Four bytes identifying a vistle_core frame, so a misdirected connection (or a stream that's
/// drifted out of sync) fails fast instead of decoding garbage as a giant length prefix.
pub const FRAME_MAGIC: u32 = 0x5649_4D43; // "VIMC"

/// `magic(4) + len(4)`.
const HEADER_LEN: usize = 8;

/// Serializes `message` and, if present, the bytes backing `payload`, into one frame and writes
/// it to `out`. Partial writes are retried by `write_all`; the caller only needs to supply a
/// writer, not handle short writes itself (§6, "tolerant of partial reads/writes").
pub fn write_frame<W: Write>(out: &mut W, message: &Message, payload: Option<&[u8]>) -> Result<()> {
    let body = message.into_wire()?;
    let payload_len = payload.map_or(0, <[u8]>::len);
    let total_len = body.len() as u32 + payload_len as u32;

    out.write_all(&FRAME_MAGIC.to_be_bytes())?;
    out.write_all(&total_len.to_be_bytes())?;
    out.write_all(&(body.len() as u32).to_be_bytes())?;
    out.write_all(&body)?;
    if let Some(payload) = payload {
        out.write_all(payload)?;
    }
    Ok(())
}

/// Blocks until a full frame has arrived on `input`, then decodes it. Returns the message and,
/// if the frame carried one, the raw payload bytes.
///
/// A stream that closes mid-header or mid-body surfaces as [`VistleError::Io`] with
/// `UnexpectedEof`, matching `Read::read_exact`'s own behavior -- callers that need to
/// distinguish "peer hung up between frames" from "peer hung up mid-frame" should check
/// whether any header bytes were read at all before this returns.
pub fn read_frame<R: Read>(input: &mut R) -> Result<(Message, Option<Vec<u8>>)> {
    let mut header = [0u8; HEADER_LEN];
    input.read_exact(&mut header)?;
    let magic = u32::from_be_bytes(header[0..4].try_into().unwrap());
    if magic != FRAME_MAGIC {
        return Err(VistleError::Fatal(format!(
            "bad frame magic {magic:#010x}, expected {FRAME_MAGIC:#010x}"
        )));
    }
    let total_len = u32::from_be_bytes(header[4..8].try_into().unwrap()) as usize;

    let mut body_len_buf = [0u8; 4];
    input.read_exact(&mut body_len_buf)?;
    let body_len = u32::from_be_bytes(body_len_buf) as usize;
    if body_len > MAX_MESSAGE_SIZE || body_len > total_len {
        return Err(VistleError::Fatal(format!(
            "frame body length {body_len} out of range (total {total_len}, ceiling {MAX_MESSAGE_SIZE})"
        )));
    }

    let mut body = vec![0u8; body_len];
    input.read_exact(&mut body)?;
    let message = Message::from_wire(&body)?;

    let payload_len = total_len - body_len;
    let payload = if payload_len > 0 {
        let mut buf = vec![0u8; payload_len];
        input.read_exact(&mut buf)?;
        Some(buf)
    } else {
        None
    };

    Ok((message, payload))
}
