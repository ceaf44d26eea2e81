//! On-disk format of one `<type>_<partition>.data` file: the type name
//! followed by a run of length-prefixed, `bincode`-serialized [`Record`]s.
//! Mirrors the commitlog's own length-prefix framing (see
//! `cachecore_commitlog::frame`), minus the checksum — a corrupt dump file
//! is caught by `bincode` failing to decode, which is good enough for a
//! snapshot (unlike the transaction log, a dump is never partially replayed).

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use cachecore_table::Record;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataFileError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to decode record: {0}")]
    Decode(#[from] bincode::Error),
}

fn write_len_prefixed(writer: &mut impl Write, bytes: &[u8]) -> io::Result<()> {
    writer.write_all(&(bytes.len() as u32).to_le_bytes())?;
    writer.write_all(bytes)
}

fn read_len_prefixed(reader: &mut impl Read) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read(&mut len_buf[..1]) {
        Ok(0) => return Ok(None),
        Ok(_) => reader.read_exact(&mut len_buf[1..])?,
        Err(e) => return Err(e),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    Ok(Some(body))
}

pub fn write(path: &Path, type_name: &str, records: &[Record]) -> Result<(), DataFileError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    write_len_prefixed(&mut writer, type_name.as_bytes())?;
    writer.write_all(&(records.len() as u32).to_le_bytes())?;
    for record in records {
        let body = bincode::serialize(record)?;
        write_len_prefixed(&mut writer, &body)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read(path: &Path) -> Result<(String, Vec<Record>), DataFileError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let type_name_bytes = read_len_prefixed(&mut reader)?.ok_or_else(|| {
        DataFileError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "empty data file"))
    })?;
    let type_name = String::from_utf8_lossy(&type_name_bytes).into_owned();

    let mut count_buf = [0u8; 4];
    reader.read_exact(&mut count_buf)?;
    let count = u32::from_le_bytes(count_buf) as usize;

    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        let body = read_len_prefixed(&mut reader)?.ok_or_else(|| {
            DataFileError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated data file"))
        })?;
        records.push(bincode::deserialize(&body)?);
    }
    Ok((type_name, records))
}
