use std::io::{self, Read, Write};

use thiserror::Error;

use crate::record::LogRecord;

const LEN_BYTES: usize = 4;
const CRC_BYTES: usize = 4;
const KIND_BYTES: usize = 1;
const TIMESTAMP_BYTES: usize = 8;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("checksum mismatch: frame claims {expected:#x}, computed {actual:#x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("failed to decode log record body: {0}")]
    Decode(#[from] bincode::Error),
}

/// Encodes one frame: `<len:u32 LE><crc32c:u32 LE><kind:u8><timestamp_millis:u64 LE><body>`.
///
/// `len` counts only `kind + timestamp + body`; `crc32c` is computed over
/// that same span, so a reader can validate before touching the body codec.
pub fn encode(record: &LogRecord, timestamp_millis: u64) -> Result<Vec<u8>, FrameError> {
    let body = bincode::serialize(record)?;
    let mut payload = Vec::with_capacity(KIND_BYTES + TIMESTAMP_BYTES + body.len());
    payload.push(record.kind_tag());
    payload.extend_from_slice(&timestamp_millis.to_le_bytes());
    payload.extend_from_slice(&body);

    let crc = crc32c::crc32c(&payload);
    let mut frame = Vec::with_capacity(LEN_BYTES + CRC_BYTES + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&crc.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

pub fn write_frame(writer: &mut impl Write, record: &LogRecord, timestamp_millis: u64) -> Result<(), FrameError> {
    let frame = encode(record, timestamp_millis)?;
    writer.write_all(&frame)?;
    Ok(())
}

/// Reads and validates the next frame from `reader`.
///
/// Returns `Ok(None)` at a clean end of stream (no bytes left), or when the
/// stream ends partway through a frame — the tail of a log can be left
/// truncated by a crash mid-append, and replay treats that tail as simply
/// not-yet-committed rather than an error.
pub fn read_frame(reader: &mut impl Read) -> Result<Option<(LogRecord, u64)>, FrameError> {
    let mut len_buf = [0u8; LEN_BYTES];
    match read_exact_or_eof(reader, &mut len_buf)? {
        false => return Ok(None),
        true if is_partial(&len_buf) => return Ok(None),
        true => {}
    }
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut crc_buf = [0u8; CRC_BYTES];
    if !read_exact_or_eof(reader, &mut crc_buf)? {
        return Ok(None);
    }
    let expected_crc = u32::from_le_bytes(crc_buf);

    let mut payload = vec![0u8; len];
    if !read_exact_or_eof(reader, &mut payload)? {
        return Ok(None);
    }

    let actual_crc = crc32c::crc32c(&payload);
    if actual_crc != expected_crc {
        return Err(FrameError::ChecksumMismatch {
            expected: expected_crc,
            actual: actual_crc,
        });
    }

    let _kind = payload[0];
    let timestamp_millis = u64::from_le_bytes(payload[KIND_BYTES..KIND_BYTES + TIMESTAMP_BYTES].try_into().unwrap());
    let body = &payload[KIND_BYTES + TIMESTAMP_BYTES..];
    let record: LogRecord = bincode::deserialize(body)?;
    Ok(Some((record, timestamp_millis)))
}

fn is_partial(len_buf: &[u8; LEN_BYTES]) -> bool {
    // A run of zero bytes can only occur if a segment was preallocated and
    // never written to; treat it as "nothing here yet".
    len_buf == &[0u8; LEN_BYTES]
}

/// Like `Read::read_exact`, but returns `Ok(false)` instead of erroring when
/// the stream ends before any bytes were read, and propagates a genuine
/// mid-frame truncation as `Ok(false)` too (the caller can't recover a
/// partial frame either way).
fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    let mut read = 0;
    while read < buf.len() {
        match reader.read(&mut buf[read..]) {
            Ok(0) => return Ok(false),
            Ok(n) => read += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}
