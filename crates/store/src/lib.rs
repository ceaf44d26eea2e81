//! The typed store facade: composes the schema registry, per-type record
//! store, query evaluator, domain-completeness tracker, transaction log and
//! dump/restore machinery into the single `Store` API a transport adapter
//! calls into. Nothing here depends on any particular wire protocol.

mod error;
pub mod fault;

pub use cachecore_domain::{DeclareMode, DomainDescription};
pub use cachecore_query::{AndBlock, Op, Operand, Predicate, Query};
pub use cachecore_schema::{KeyDescriptor, KeyKind, KeyRole, KeyValue, TypeDescription};
pub use cachecore_table::Record;
pub use error::StoreError;

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cachecore_commitlog::{replay, LogRecord, TransactionLog};
use cachecore_domain::DomainTracker;
use cachecore_primitives::{KeyName, SequenceName, TypeName};
use cachecore_query::evaluate;
use cachecore_schema::SchemaRegistry;
use cachecore_sequence::SequenceGenerator;
use cachecore_snapshot::{read_dump, write_dump, TypeDump};
use cachecore_table::TypeStore;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// `(current, total)` progress for a streamed `GetAvailableItems` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
}

/// One found record in a `GetAvailableItems` response, carrying the progress
/// at the point it was produced (the lazy-sequence-plus-progress shape the
/// design notes ask for in place of a per-item callback).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailableItem {
    pub progress: Progress,
    pub record: Record,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AvailableItemsResult {
    pub items: Vec<AvailableItem>,
    /// Primary-key values that weren't found, in the same order as requested.
    pub not_found: Vec<KeyValue>,
}

/// One row of `GetObjectDescriptions`: a matched record's key shape, without
/// its payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectDescription {
    pub primary_key: KeyValue,
    pub unique_keys: BTreeMap<KeyName, KeyValue>,
    pub index_keys: BTreeMap<KeyName, KeyValue>,
}

/// One row of `GetServerDescription`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeServerDescription {
    pub description: Arc<TypeDescription>,
    pub count: usize,
    pub hit_count: u64,
}

struct TypeSlot {
    table: RwLock<TypeStore>,
}

/// The store's on-disk and in-process configuration: where the transaction
/// log and dumps live. Transport/CLI configuration (e.g. `TcpPort`) is a
/// concern of `crates/server`, which wraps this.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub data_path: PathBuf,
}

impl StoreConfig {
    pub fn log_path(&self) -> PathBuf {
        self.data_path.join("txlog")
    }

    pub fn dump_root(&self) -> PathBuf {
        self.data_path.join("dump")
    }
}

/// The in-memory, queryable object cache with optional durable persistence.
///
/// Every type gets its own `RwLock<TypeStore>`; the `admin` lock is a
/// process-wide exclusive lock that `Dump`/`ImportDump`/`InitializeFromDump`/
/// `DeclareDomain` hold for their whole duration, while ordinary reads and
/// writes hold it shared — this is what lets an admin operation see (and
/// freeze) a globally consistent view across every type at once, per the
/// concurrency design in the specification.
pub struct Store {
    schema: RwLock<SchemaRegistry>,
    types: RwLock<HashMap<TypeName, Arc<TypeSlot>>>,
    domain: RwLock<DomainTracker>,
    sequences: SequenceGenerator,
    log: parking_lot::Mutex<TransactionLog>,
    admin: RwLock<()>,
    config: StoreConfig,
}

impl Store {
    /// Opens a store backed by `config`, replaying its transaction log (if
    /// any) to rebuild in-memory state. A fresh `data_path` yields an empty
    /// store with an empty log.
    #[tracing::instrument(skip_all, fields(data_path = %config.data_path.display()))]
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&config.data_path)?;
        let log = TransactionLog::open(config.log_path())?;
        let store = Self {
            schema: RwLock::new(SchemaRegistry::new()),
            types: RwLock::new(HashMap::new()),
            domain: RwLock::new(DomainTracker::new()),
            sequences: SequenceGenerator::new(),
            log: parking_lot::Mutex::new(log),
            admin: RwLock::new(()),
            config,
        };
        store.replay_log()?;
        Ok(store)
    }

    fn replay_log(&self) -> Result<(), StoreError> {
        let records = replay(self.config.log_path())?;
        log::info!("replaying {} transaction log record(s)", records.len());
        for record in records {
            self.apply_replayed(record)?;
        }
        Ok(())
    }

    /// Applies one previously-journaled record directly to in-memory state,
    /// without re-journaling it (it's already durable).
    fn apply_replayed(&self, record: LogRecord) -> Result<(), StoreError> {
        match record {
            LogRecord::RegisterType { description } => {
                self.schema.write().register(description.clone())?;
                self.ensure_type_slot(&description);
            }
            LogRecord::Put { type_name, record } => {
                let slot = self.require_slot(type_name.as_str())?;
                slot.table.write().put(record)?;
            }
            LogRecord::Remove { type_name, primary_key } => {
                let slot = self.require_slot(type_name.as_str())?;
                // A prior crash could leave the log with a remove whose put
                // never made it to disk; tolerate that during replay.
                let _ = slot.table.write().remove(&primary_key);
            }
            LogRecord::Truncate { type_name } => {
                let slot = self.require_slot(type_name.as_str())?;
                slot.table.write().truncate();
                self.domain.write().reset(&type_name);
            }
            LogRecord::DomainDeclare { type_name, description, mode } => {
                self.domain.write().declare(type_name, description, mode);
            }
            LogRecord::SequenceReserve { name, value } => {
                self.sequences.restore(name, value);
            }
        }
        Ok(())
    }

    fn journal(&self, record: LogRecord) -> Result<(), StoreError> {
        self.log.lock().append(&record)?;
        Ok(())
    }

    fn ensure_type_slot(&self, description: &TypeDescription) -> Arc<TypeSlot> {
        let type_name = TypeName::from(description.type_name.clone());
        let mut types = self.types.write();
        types
            .entry(type_name)
            .or_insert_with(|| {
                Arc::new(TypeSlot {
                    table: RwLock::new(TypeStore::new(Arc::new(description.clone()))),
                })
            })
            .clone()
    }

    fn require_slot(&self, type_name: &str) -> Result<Arc<TypeSlot>, StoreError> {
        self.types
            .read()
            .get(&TypeName::from(type_name))
            .cloned()
            .ok_or_else(|| StoreError::UnknownType(type_name.to_owned()))
    }

    // -- schema ----------------------------------------------------------

    /// Registers `description`, or confirms an identical one is already
    /// registered. Journaled so a fresh process can rebuild its schemas by
    /// replaying the log alone, without every client re-registering first.
    #[tracing::instrument(skip_all, fields(type_name = %description.type_name))]
    pub fn register_type(&self, description: TypeDescription) -> Result<(), StoreError> {
        let _admin = self.admin.read();
        let is_new = self.schema.read().get(&description.type_name).is_none();
        self.schema.write().register(description.clone())?;
        if is_new {
            self.ensure_type_slot(&description);
            self.journal(LogRecord::RegisterType { description })?;
        }
        Ok(())
    }

    pub fn get_known_types(&self) -> Vec<TypeDescription> {
        self.schema.read().known_types().cloned().collect()
    }

    pub fn get_server_description(&self) -> Vec<TypeServerDescription> {
        let types = self.types.read();
        self.schema
            .read()
            .known_types()
            .filter_map(|desc| {
                let slot = types.get(&TypeName::from(desc.type_name.clone()))?;
                let table = slot.table.read();
                Some(TypeServerDescription {
                    description: table.description().clone(),
                    count: table.count(),
                    hit_count: table.hit_count(),
                })
            })
            .collect()
    }

    // -- mutations ---------------------------------------------------------

    #[tracing::instrument(skip_all, fields(type_name = %type_name))]
    pub fn put(&self, type_name: &str, record: Record) -> Result<(), StoreError> {
        let _admin = self.admin.read();
        let slot = self.require_slot(type_name)?;
        slot.table.write().put(record.clone())?;
        self.journal(LogRecord::Put {
            type_name: type_name.into(),
            record,
        })?;
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(type_name = %type_name))]
    pub fn remove(&self, type_name: &str, primary_key: &KeyValue) -> Result<(), StoreError> {
        let _admin = self.admin.read();
        let slot = self.require_slot(type_name)?;
        slot.table.write().remove(primary_key)?;
        self.journal(LogRecord::Remove {
            type_name: type_name.into(),
            primary_key: primary_key.clone(),
        })?;
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(type_name = %type_name))]
    pub fn truncate(&self, type_name: &str) -> Result<(), StoreError> {
        let _admin = self.admin.read();
        let slot = self.require_slot(type_name)?;
        slot.table.write().truncate();
        self.domain.write().reset(&TypeName::from(type_name));
        self.journal(LogRecord::Truncate {
            type_name: type_name.into(),
        })?;
        Ok(())
    }

    /// Deletes every record matching `query` within `type_name`, returning
    /// how many were removed.
    #[tracing::instrument(skip_all, fields(type_name = %type_name))]
    pub fn delete_many(&self, type_name: &str, query: &Query) -> Result<usize, StoreError> {
        let _admin = self.admin.read();
        let slot = self.require_slot(type_name)?;
        let mut table = slot.table.write();
        let ids = evaluate(query, &table)?;
        let pks: Vec<KeyValue> = ids
            .iter()
            .filter_map(|id| table.get_record(*id))
            .filter_map(|r| r.scalar(&table.description().primary_key.name).cloned())
            .collect();
        for pk in &pks {
            table.remove(pk)?;
        }
        drop(table);
        for pk in &pks {
            self.journal(LogRecord::Remove {
                type_name: type_name.into(),
                primary_key: pk.clone(),
            })?;
        }
        Ok(pks.len())
    }

    // -- reads ---------------------------------------------------------

    #[tracing::instrument(skip_all, fields(type_name = %type_name, key_name = %key_name))]
    pub fn get_one(&self, type_name: &str, key_name: &str, value: &KeyValue) -> Result<Option<Record>, StoreError> {
        let _admin = self.admin.read();
        let slot = self.require_slot(type_name)?;
        let table = slot.table.read();
        Ok(table.get_one(&KeyName::from(key_name), value)?.cloned())
    }

    #[tracing::instrument(skip_all, fields(type_name = %type_name))]
    pub fn get_many(&self, type_name: &str, query: &Query) -> Result<Vec<Record>, StoreError> {
        let _admin = self.admin.read();
        let slot = self.require_slot(type_name)?;
        let table = slot.table.read();
        let ids = evaluate(query, &table)?;
        if !ids.is_empty() {
            table.note_hit();
        }
        Ok(ids.into_iter().filter_map(|id| table.get_record(id).cloned()).collect())
    }

    /// `(authoritative, count)` for `query` — the count of records currently
    /// matching, and whether the domain tracker guarantees that count is
    /// complete rather than just whatever happens to be cached.
    #[tracing::instrument(skip_all, fields(type_name = %type_name))]
    pub fn eval_query(&self, type_name: &str, query: &Query) -> Result<(bool, usize), StoreError> {
        let _admin = self.admin.read();
        let slot = self.require_slot(type_name)?;
        let table = slot.table.read();
        let ids = evaluate(query, &table)?;
        if !ids.is_empty() {
            table.note_hit();
        }
        let authoritative = self.domain.read().is_authoritative(&TypeName::from(type_name), query);
        Ok((authoritative, ids.len()))
    }

    /// Looks up every primary key in `keys`, in input order. Returns the
    /// found records (each tagged with its progress toward the total number
    /// found, not `keys.len()`) and the not-found keys, also in input order.
    /// `filter` further restricts which found records are returned (but not
    /// which are counted not-found) when provided.
    #[tracing::instrument(skip_all, fields(type_name = %type_name, requested = keys.len()))]
    pub fn get_available_items(
        &self,
        type_name: &str,
        keys: &[KeyValue],
        filter: Option<&Query>,
    ) -> Result<AvailableItemsResult, StoreError> {
        let _admin = self.admin.read();
        let slot = self.require_slot(type_name)?;
        let table = slot.table.read();
        let pk_name = table.description().primary_key.name.clone();

        let allowed: Option<std::collections::HashSet<_>> = match filter {
            Some(query) => Some(evaluate(query, &table)?.into_iter().collect()),
            None => None,
        };

        let mut found_ids = Vec::new();
        let mut not_found = Vec::new();
        for key in keys {
            match table.lookup_one(&pk_name, key)? {
                Some(id) if allowed.as_ref().map_or(true, |set| set.contains(&id)) => found_ids.push(id),
                _ => not_found.push(key.clone()),
            }
        }

        let total = found_ids.len();
        let mut items = Vec::with_capacity(total);
        for (i, id) in found_ids.into_iter().enumerate() {
            let record = table.get_record(id).expect("id just resolved from lookup_one").clone();
            items.push(AvailableItem {
                progress: Progress { current: i + 1, total },
                record,
            });
        }
        if total > 0 {
            table.note_hit();
        }
        Ok(AvailableItemsResult { items, not_found })
    }

    #[tracing::instrument(skip_all, fields(type_name = %type_name))]
    pub fn get_object_descriptions(&self, type_name: &str, query: &Query) -> Result<Vec<ObjectDescription>, StoreError> {
        let _admin = self.admin.read();
        let slot = self.require_slot(type_name)?;
        let table = slot.table.read();
        let ids = evaluate(query, &table)?;
        if !ids.is_empty() {
            table.note_hit();
        }
        let description = table.description().clone();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(record) = table.get_record(id) else { continue };
            let primary_key = record
                .scalar(&description.primary_key.name)
                .cloned()
                .expect("put() enforces a primary key on every record");
            let unique_keys = description
                .unique_keys
                .iter()
                .filter_map(|k| record.scalar(&k.name).map(|v| (k.name.clone(), v.clone())))
                .collect();
            let index_keys = description
                .index_keys
                .iter()
                .filter_map(|k| record.scalar(&k.name).map(|v| (k.name.clone(), v.clone())))
                .collect();
            out.push(ObjectDescription {
                primary_key,
                unique_keys,
                index_keys,
            });
        }
        Ok(out)
    }

    // -- domain completeness ---------------------------------------------

    #[tracing::instrument(skip_all, fields(type_name = %type_name))]
    pub fn declare_domain(
        &self,
        type_name: &str,
        description: DomainDescription,
        mode: DeclareMode,
    ) -> Result<(), StoreError> {
        let _admin = self.admin.write();
        self.domain.write().declare(type_name, description.clone(), mode);
        self.journal(LogRecord::DomainDeclare {
            type_name: type_name.into(),
            description,
            mode,
        })?;
        Ok(())
    }

    // -- sequences ---------------------------------------------------------

    #[tracing::instrument(skip_all, fields(name = %name))]
    pub fn generate_unique_ids(&self, name: &str, count: u64) -> Result<Range<i64>, StoreError> {
        let _admin = self.admin.read();
        let range = self.sequences.generate_unique_ids(name, count);
        self.journal(LogRecord::SequenceReserve {
            name: name.into(),
            value: range.end,
        })?;
        Ok(range)
    }

    // -- persistence ---------------------------------------------------------

    /// Writes a full logical snapshot under `config.dump_root()/<today>/`.
    #[tracing::instrument(skip_all)]
    pub fn dump(&self, today: &str) -> Result<PathBuf, StoreError> {
        let _admin = self.admin.write();
        let schema = self.schema.read();
        let types = self.types.read();

        let mut type_dumps = Vec::new();
        let schemas: Vec<&TypeDescription> = schema.known_types().collect();
        for description in &schemas {
            let Some(slot) = types.get(&TypeName::from(description.type_name.clone())) else {
                continue;
            };
            let table = slot.table.read();
            let records: Vec<Record> = table.scan().map(|(_, r)| r.clone()).collect();
            type_dumps.push((description.clone(), records));
        }
        let dumps: Vec<TypeDump<'_>> = type_dumps
            .iter()
            .map(|(desc, records)| TypeDump {
                description: desc,
                records: records.clone(),
            })
            .collect();

        let mut sequences = BTreeMap::new();
        for name in self.sequences.known_sequences() {
            let value = self.sequences.current_value(&name);
            sequences.insert(name, value);
        }

        Ok(write_dump(self.config.dump_root(), today, &dumps, &sequences)?)
    }

    /// `ImportDump` semantics: upserts the dump's records into the existing
    /// store by primary key, restores sequences to `max(current, dumped)`,
    /// and rolls back entirely if anything fails partway through (including
    /// a [`fault::step`] injection in test builds).
    #[tracing::instrument(skip_all, fields(dump_dir = %dump_dir.as_ref().display()))]
    pub fn import_dump(&self, dump_dir: impl AsRef<Path>) -> Result<(), StoreError> {
        self.run_import(dump_dir, false)
    }

    /// `InitializeFromDump` semantics: same as [`Self::import_dump`], but
    /// requires the store to currently hold zero records across every type.
    #[tracing::instrument(skip_all, fields(dump_dir = %dump_dir.as_ref().display()))]
    pub fn initialize_from_dump(&self, dump_dir: impl AsRef<Path>) -> Result<(), StoreError> {
        self.run_import(dump_dir, true)
    }

    fn is_empty(&self) -> bool {
        self.types.read().values().all(|slot| slot.table.read().count() == 0)
    }

    fn run_import(&self, dump_dir: impl AsRef<Path>, require_empty: bool) -> Result<(), StoreError> {
        // Reading the dump is not a store mutation, so do it before taking
        // any lock: a corrupt dump never touches state.
        let contents = read_dump(dump_dir.as_ref())?;

        let _admin = self.admin.write();
        if require_empty && !self.is_empty() {
            return Err(StoreError::StoreNotEmpty);
        }

        // Snapshot everything touched by import, so a failure partway
        // through (including a synthetic one from `fault::step`) can put the
        // store back exactly where it was.
        let schema_before = self.schema.read().known_types().cloned().collect::<Vec<_>>();
        let types_before: HashMap<TypeName, TypeStore> = {
            let types = self.types.read();
            types
                .iter()
                .map(|(name, slot)| (name.clone(), slot.table.read().clone()))
                .collect()
        };
        let sequences_before: BTreeMap<SequenceName, i64> = self
            .sequences
            .known_sequences()
            .into_iter()
            .map(|name| {
                let value = self.sequences.current_value(&name);
                (name, value)
            })
            .collect();
        let log_len_before = self.log.lock().path().metadata().map(|m| m.len()).unwrap_or(0);

        match self.apply_import(&contents) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.rollback_import(schema_before, types_before, sequences_before, log_len_before);
                Err(err)
            }
        }
    }

    fn apply_import(&self, contents: &cachecore_snapshot::DumpContents) -> Result<(), StoreError> {
        for description in &contents.schemas {
            fault::step()?;
            let is_new = self.schema.read().get(&description.type_name).is_none();
            self.schema.write().register(description.clone())?;
            self.ensure_type_slot(description);
            // A type that only ever appeared inside a dump still needs a
            // `RegisterType` record of its own, or a later crash-replay of
            // the log alone (without this dump) couldn't reconstruct it
            // before hitting the `Put`s that follow.
            if is_new {
                self.journal(LogRecord::RegisterType {
                    description: description.clone(),
                })?;
            }
        }

        for (type_name, records) in &contents.records {
            let slot = self.require_slot(type_name)?;
            for record in records {
                fault::step()?;
                let mut table = slot.table.write();
                table.put(record.clone())?;
                drop(table);
                self.journal(LogRecord::Put {
                    type_name: type_name.as_str().into(),
                    record: record.clone(),
                })?;
            }
        }

        for (name, &dumped_value) in &contents.sequences {
            fault::step()?;
            let current = self.sequences.current_value(&SequenceName::new(name.as_str()));
            let restored = current.max(dumped_value);
            self.sequences.restore(name.as_str(), restored);
            self.journal(LogRecord::SequenceReserve {
                name: name.as_str().into(),
                value: restored,
            })?;
        }
        Ok(())
    }

    fn rollback_import(
        &self,
        schema_before: Vec<TypeDescription>,
        types_before: HashMap<TypeName, TypeStore>,
        sequences_before: BTreeMap<SequenceName, i64>,
        log_len_before: u64,
    ) {
        log::warn!("rolling back partially applied dump import");
        {
            let mut schema = self.schema.write();
            *schema = SchemaRegistry::new();
            for description in schema_before {
                let _ = schema.register(description);
            }
        }
        {
            // Replace the whole map rather than patching entries: a failed
            // import may have registered brand new types that must vanish
            // entirely on rollback, not just have their tables reset.
            let mut types = self.types.write();
            types.clear();
            for (name, table) in types_before {
                types.insert(name, Arc::new(TypeSlot { table: RwLock::new(table) }));
            }
        }
        for (name, value) in &sequences_before {
            self.sequences.restore(name.as_str(), *value);
        }
        // A failed import may also have minted brand new sequences; reset
        // those back to their pre-import (nonexistent, i.e. zero) value so
        // `current_value` reads exactly as if the import never happened.
        for name in self.sequences.known_sequences() {
            if !sequences_before.contains_key(&name) {
                self.sequences.restore(name.as_str(), 0);
            }
        }
        self.log.lock().truncate_to(log_len_before).ok();
    }
}
