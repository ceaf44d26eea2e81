//! Logical dump writer/reader.
//!
//! A dump is a directory named for the day it was taken
//! (`<root>/YYYY-MM-DD/`) holding:
//!
//! - `schema.json`: every registered [`TypeDescription`], concatenated.
//! - One or more `<type>_<partition>.data` files per type, each holding at
//!   most [`RECORDS_PER_PARTITION`] records in primary-key order.
//! - `sequence`: the current high-water mark of every named sequence.
//!
//! Writing goes through a temporary sibling directory and a final rename so
//! a reader never observes a half-written dump; a dump missing `schema.json`
//! is treated as not having happened at all (see [`read_dump`]).

mod data_file;

pub use data_file::DataFileError;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use cachecore_primitives::SequenceName;
use cachecore_schema::TypeDescription;
use cachecore_table::Record;
use thiserror::Error;

/// Data files are capped at this many records per the dump layout in the
/// persistence spec (`§4.4`).
pub const RECORDS_PER_PARTITION: usize = 1000;

const SCHEMA_FILE: &str = "schema.json";
const SEQUENCE_FILE: &str = "sequence";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to (de)serialize schema: {0}")]
    Schema(#[from] serde_json::Error),
    #[error(transparent)]
    DataFile(#[from] DataFileError),
    #[error("dump at `{0}` is missing schema.json and is not usable")]
    Corrupt(PathBuf),
}

/// Everything needed to write one type's contribution to a dump.
pub struct TypeDump<'a> {
    pub description: &'a TypeDescription,
    pub records: Vec<Record>,
}

/// Everything read back from a dump directory.
pub struct DumpContents {
    pub schemas: Vec<TypeDescription>,
    pub records: BTreeMap<String, Vec<Record>>,
    pub sequences: BTreeMap<String, i64>,
}

/// Writes a full logical snapshot of `types` and `sequences` under
/// `root/<today>/`, atomically (temp directory + rename).
///
/// `today` is passed in by the caller (rather than read from the clock here)
/// so dump writing stays deterministic and testable.
#[tracing::instrument(skip_all, fields(root = %root.as_ref().display()))]
pub fn write_dump(
    root: impl AsRef<Path>,
    today: &str,
    types: &[TypeDump<'_>],
    sequences: &BTreeMap<SequenceName, i64>,
) -> Result<PathBuf, SnapshotError> {
    let root = root.as_ref();
    fs::create_dir_all(root)?;
    let final_dir = root.join(today);
    let tmp_dir = root.join(format!(".tmp-{today}"));
    if tmp_dir.exists() {
        fs::remove_dir_all(&tmp_dir)?;
    }
    fs::create_dir_all(&tmp_dir)?;

    let schemas: Vec<&TypeDescription> = types.iter().map(|t| t.description).collect();
    let schema_json = serde_json::to_vec_pretty(&schemas)?;
    fs::write(tmp_dir.join(SCHEMA_FILE), schema_json)?;

    for type_dump in types {
        let mut sorted = type_dump.records.clone();
        let pk_name = &type_dump.description.primary_key.name;
        sorted.sort_by(|a, b| a.scalar(pk_name).cmp(&b.scalar(pk_name)));

        for (partition, chunk) in sorted.chunks(RECORDS_PER_PARTITION).enumerate() {
            let file_name = format!("{}_{:04}.data", type_dump.description.type_name, partition);
            data_file::write(&tmp_dir.join(file_name), &type_dump.description.type_name, chunk)?;
        }
        // A type with zero records still gets a single empty partition file,
        // so `GetKnownTypes` after `InitializeFromDump` sees it was dumped.
        if sorted.is_empty() {
            let file_name = format!("{}_{:04}.data", type_dump.description.type_name, 0);
            data_file::write(&tmp_dir.join(file_name), &type_dump.description.type_name, &[])?;
        }
    }

    let sequence_map: BTreeMap<&str, i64> = sequences.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    fs::write(tmp_dir.join(SEQUENCE_FILE), serde_json::to_vec_pretty(&sequence_map)?)?;

    if final_dir.exists() {
        fs::remove_dir_all(&final_dir)?;
    }
    fs::rename(&tmp_dir, &final_dir)?;
    Ok(final_dir)
}

/// Reads a dump directory back. Returns [`SnapshotError::Corrupt`] if
/// `schema.json` is missing, which is how a partially written (never
/// renamed) dump is told apart from a real one.
#[tracing::instrument(skip_all, fields(dir = %dir.as_ref().display()))]
pub fn read_dump(dir: impl AsRef<Path>) -> Result<DumpContents, SnapshotError> {
    let dir = dir.as_ref();
    let schema_path = dir.join(SCHEMA_FILE);
    if !schema_path.is_file() {
        return Err(SnapshotError::Corrupt(dir.to_path_buf()));
    }
    let schemas: Vec<TypeDescription> = serde_json::from_slice(&fs::read(schema_path)?)?;

    let mut records: BTreeMap<String, Vec<Record>> = BTreeMap::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.ends_with(".data") {
            continue;
        }
        let (type_name, chunk_records) = data_file::read(&path)?;
        records.entry(type_name).or_default().extend(chunk_records);
    }

    let sequence_path = dir.join(SEQUENCE_FILE);
    let sequences: BTreeMap<String, i64> = if sequence_path.is_file() {
        serde_json::from_slice(&fs::read(sequence_path)?)?
    } else {
        BTreeMap::new()
    };

    Ok(DumpContents {
        schemas,
        records,
        sequences,
    })
}

/// Lists dump directories under `root` that look complete (have
/// `schema.json`), most recent first by directory name.
pub fn list_dumps(root: impl AsRef<Path>) -> Result<Vec<PathBuf>, SnapshotError> {
    let root = root.as_ref();
    if !root.is_dir() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() && path.join(SCHEMA_FILE).is_file() {
            dirs.push(path);
        }
    }
    dirs.sort();
    dirs.reverse();
    Ok(dirs)
}
