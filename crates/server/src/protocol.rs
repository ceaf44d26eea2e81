//! Wire protocol: a length-prefixed `bincode` encoding of the request and
//! response shapes, carried directly over a `TcpStream`. This is
//! deliberately thin — every request maps onto exactly one `Store` call, and
//! every response shape mirrors that call's return type.
//!
//! Framing: `<len: u32 LE><body>`, body is a `bincode`-encoded value. A
//! streamed response (`GetMany`, `GetAvailableItems`) is a sequence of such
//! frames, each wrapping one item (or a mid-stream error), followed by a
//! zero-length frame as the terminator. No ordinary encode ever produces a
//! zero-length body, so the terminator can't be confused with a real frame.

use std::io::{self, Read, Write};
use std::path::PathBuf;

use cachecore_store::{
    AvailableItem, DeclareMode, DomainDescription, KeyValue, ObjectDescription, Query, Record, StoreError,
    TypeDescription, TypeServerDescription,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to decode frame body: {0}")]
    Decode(#[from] bincode::Error),
}

/// A `StoreError` rendered for the wire. The concrete `StoreError` variants
/// aren't themselves serializable (some wrap `std::io::Error`), so callers
/// get the rendered message and a coarse kind tag instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
}

impl From<&StoreError> for ErrorInfo {
    fn from(err: &StoreError) -> Self {
        let kind = match err {
            StoreError::NotFound(..) => "NotFound",
            StoreError::NotIndexable => "NotIndexable",
            StoreError::SchemaMismatch(..) => "SchemaMismatch",
            StoreError::UnknownType(..) => "UnknownType",
            StoreError::InvalidQuery(..) => "InvalidQuery",
            StoreError::DumpCorrupt(..) => "DumpCorrupt",
            StoreError::StoreNotEmpty => "StoreNotEmpty",
            StoreError::IoFailure(..) => "IoFailure",
            StoreError::Internal(..) => "Internal",
        };
        ErrorInfo {
            kind: kind.to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    RegisterType(TypeDescription),
    Put {
        type_name: String,
        record: Record,
    },
    Remove {
        type_name: String,
        primary_key: KeyValue,
    },
    GetOne {
        type_name: String,
        key_name: String,
        value: KeyValue,
    },
    GetMany {
        type_name: String,
        query: Query,
    },
    EvalQuery {
        type_name: String,
        query: Query,
    },
    GetAvailableItems {
        type_name: String,
        keys: Vec<KeyValue>,
        filter: Option<Query>,
    },
    GetObjectDescriptions {
        type_name: String,
        query: Query,
    },
    Truncate {
        type_name: String,
    },
    DeleteMany {
        type_name: String,
        query: Query,
    },
    DeclareDomain {
        type_name: String,
        description: DomainDescription,
        mode: DeclareMode,
    },
    GetKnownTypes,
    GetServerDescription,
    GenerateUniqueIds {
        name: String,
        count: u64,
    },
    Dump {
        today: String,
    },
    ImportDump {
        path: PathBuf,
    },
    InitializeFromDump {
        path: PathBuf,
    },
}

/// The single non-streamed response to any `Request` that isn't `GetMany` or
/// `GetAvailableItems`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Ack,
    Error(ErrorInfo),
    OneRecord(Option<Record>),
    EvalQueryResult { authoritative: bool, count: usize },
    ObjectDescriptions(Vec<ObjectDescription>),
    Count(usize),
    KnownTypes(Vec<TypeDescription>),
    ServerDescription(Vec<TypeServerDescription>),
    UniqueIds { start: i64, end: i64 },
    DumpPath(PathBuf),
}

/// One frame of a `GetMany` response stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RecordStreamFrame {
    Item(Record),
    Error(ErrorInfo),
}

/// One frame of a `GetAvailableItems` response stream. The not-found list
/// can only be known once every key has been looked up, so it rides in a
/// frame of its own right after the terminator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AvailableItemsFrame {
    Item(AvailableItem),
    Error(ErrorInfo),
    NotFound(Vec<KeyValue>),
}

/// Writes one length-prefixed frame. `len == 0` is reserved for the stream
/// terminator and is never produced here.
pub fn write_frame<T: Serialize>(writer: &mut impl Write, value: &T) -> Result<(), ProtocolError> {
    let body = bincode::serialize(value)?;
    debug_assert!(!body.is_empty(), "an encoded frame body is never empty");
    writer.write_all(&(body.len() as u32).to_le_bytes())?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

/// Writes the zero-length terminator frame that ends a streamed response.
pub fn write_terminator(writer: &mut impl Write) -> Result<(), ProtocolError> {
    writer.write_all(&0u32.to_le_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Reads one length-prefixed frame body, or `Ok(None)` at a clean
/// end-of-stream (the peer closed the connection).
fn read_body(reader: &mut impl Read) -> Result<Option<Vec<u8>>, ProtocolError> {
    let mut len_buf = [0u8; 4];
    if !read_exact_or_eof(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    Ok(Some(body))
}

/// Reads one request, or `Ok(None)` if the peer closed the connection.
pub fn read_request(reader: &mut impl Read) -> Result<Option<Request>, ProtocolError> {
    match read_body(reader)? {
        Some(body) => Ok(Some(bincode::deserialize(&body)?)),
        None => Ok(None),
    }
}

/// Reads one terminated frame: `Ok(Some(_))` for a real frame, `Ok(None)` at
/// the zero-length terminator. Used by the client side of a streamed
/// response; not used by the server, which only ever writes streams.
pub fn read_stream_frame<T: for<'de> Deserialize<'de>>(reader: &mut impl Read) -> Result<Option<T>, ProtocolError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len == 0 {
        return Ok(None);
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    Ok(Some(bincode::deserialize(&body)?))
}

fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    let mut read = 0;
    while read < buf.len() {
        match reader.read(&mut buf[read..]) {
            Ok(0) if read == 0 => return Ok(false),
            Ok(0) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
            Ok(n) => read += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_through_framing() {
        let mut buf = Vec::new();
        let request = Request::GetKnownTypes;
        write_frame(&mut buf, &request).unwrap();
        let mut cursor = io::Cursor::new(buf);
        let decoded = read_request(&mut cursor).unwrap().unwrap();
        assert!(matches!(decoded, Request::GetKnownTypes));
    }

    #[test]
    fn reading_past_a_clean_close_returns_none() {
        let mut cursor = io::Cursor::new(Vec::<u8>::new());
        assert!(read_request(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn stream_frames_terminate_at_the_zero_length_marker() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &RecordStreamFrame::Item(Record::new(vec![1]))).unwrap();
        write_frame(&mut buf, &RecordStreamFrame::Item(Record::new(vec![2]))).unwrap();
        write_terminator(&mut buf).unwrap();

        let mut cursor = io::Cursor::new(buf);
        let mut items = Vec::new();
        while let Some(frame) = read_stream_frame::<RecordStreamFrame>(&mut cursor).unwrap() {
            items.push(frame);
        }
        assert_eq!(items.len(), 2);
    }
}
