use cachecore_domain::{DeclareMode, DomainDescription};
use cachecore_primitives::{SequenceName, TypeName};
use cachecore_schema::{KeyValue, TypeDescription};
use cachecore_table::Record;
use serde::{Deserialize, Serialize};

/// One mutation as it is appended to the transaction log. Replaying every
/// record in order from an empty store reproduces its exact state.
///
/// `RegisterType` is not itself one of the wire contract's mutations, but
/// without journaling it a fresh process replaying this log alone would hit
/// a `Put` for a type it has never heard of; journaling the registration
/// that necessarily preceded every `Put` keeps replay self-sufficient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogRecord {
    RegisterType { description: TypeDescription },
    Put { type_name: TypeName, record: Record },
    Remove { type_name: TypeName, primary_key: KeyValue },
    Truncate { type_name: TypeName },
    DomainDeclare {
        type_name: TypeName,
        description: DomainDescription,
        mode: DeclareMode,
    },
    SequenceReserve { name: SequenceName, value: i64 },
}

impl LogRecord {
    /// The single-byte tag written alongside the frame header, ahead of the
    /// encoded body, so a reader can skip or filter frames without having
    /// to deserialize the whole body.
    pub fn kind_tag(&self) -> u8 {
        match self {
            LogRecord::RegisterType { .. } => 0,
            LogRecord::Put { .. } => 1,
            LogRecord::Remove { .. } => 2,
            LogRecord::Truncate { .. } => 3,
            LogRecord::DomainDeclare { .. } => 4,
            LogRecord::SequenceReserve { .. } => 5,
        }
    }
}
