//! Store Module
//!
//! The entity store that ties all components together.
//!
//! ## Responsibilities
//! - Own the configuration, the log client and the change feed
//! - Register entity types with their codecs
//! - Open one table per entity type on first use
//! - Route saves through the write coordinator
//! - Close everything in order

use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::codec::{codec_for, EntityCodec};
use crate::config::Config;
use crate::error::{LogTableError, Result};
use crate::feed::{ChangeFeed, ChangeListener, ListenerToken};
use crate::keygen::KeyGenerator;
use crate::log::{FileLog, LogClient, MemoryLog};
use crate::model::{EntityTypeDescriptor, Key, Row};
use crate::table::{MaterializedTable, Predicate, TableOptions, TableScan};
use crate::writer::{SaveResult, TableResolver, WriteBatch, WriteCoordinator};

/// A table once opened; locked while that entity's table is being opened
type TableSlot = Arc<Mutex<Option<Arc<MaterializedTable>>>>;

struct RegisteredEntity {
    descriptor: Arc<EntityTypeDescriptor>,
    codec: Arc<dyn EntityCodec>,
}

/// Changelog-backed store of entity tables
///
/// ## Concurrency Model
/// - Reads go straight to the table (internal RwLock, many readers)
/// - Saves may run concurrently; per-key order is the log's partition order
/// - Each table is written by its own ingestion thread
pub struct EntityStore {
    config: Config,
    log: Arc<dyn LogClient>,

    /// Registered entity types
    entities: RwLock<HashMap<String, RegisteredEntity>>,

    /// One slot per entity type that was asked for; tables open on first use
    tables: Mutex<HashMap<String, TableSlot>>,

    feed: Arc<ChangeFeed>,
    writer: WriteCoordinator,
    closed: AtomicBool,
}

impl EntityStore {
    /// Open a store backed by a file log under `config.data_dir`
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        let log = FileLog::open(
            config.log_dir(),
            config.segment_sync_strategy,
            config.poll_interval(),
        )?;
        Self::open_with_log(config, Arc::new(log))
    }

    /// Open a store backed by an in-process log
    pub fn open_in_memory(config: Config) -> Result<Self> {
        Self::open_with_log(config, Arc::new(MemoryLog::new()))
    }

    /// Open a store on top of any log client
    pub fn open_with_log(config: Config, log: Arc<dyn LogClient>) -> Result<Self> {
        config.validate()?;

        let writer = WriteCoordinator::new(
            Arc::clone(&log),
            config.append_timeout(),
            config.read_your_writes,
        );
        let feed = Arc::new(ChangeFeed::new(config.application_id.clone()));

        tracing::info!(
            database = %config.database_name,
            application = %config.application_id,
            "entity store opened"
        );

        Ok(Self {
            config,
            log,
            entities: RwLock::new(HashMap::new()),
            tables: Mutex::new(HashMap::new()),
            feed,
            writer,
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn log(&self) -> &Arc<dyn LogClient> {
        &self.log
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register an entity type with the configured codec
    pub fn register(&self, descriptor: EntityTypeDescriptor) -> Result<Arc<EntityTypeDescriptor>> {
        let codec = codec_for(self.config.codec_for(descriptor.name()));
        self.register_with_codec(descriptor, codec)
    }

    /// Register an entity type with an explicit codec.
    ///
    /// Registering the same layout again is a no-op; a different layout under
    /// the same name is rejected.
    pub fn register_with_codec(
        &self,
        descriptor: EntityTypeDescriptor,
        codec: Arc<dyn EntityCodec>,
    ) -> Result<Arc<EntityTypeDescriptor>> {
        self.check_open()?;

        let mut entities = self.entities.write();
        if let Some(existing) = entities.get(descriptor.name()) {
            if existing.descriptor.type_tag() != descriptor.type_tag() {
                return Err(LogTableError::Schema(format!(
                    "entity {} is already registered with layout {}",
                    descriptor.name(),
                    existing.descriptor.type_tag()
                )));
            }
            return Ok(Arc::clone(&existing.descriptor));
        }

        tracing::debug!(
            entity = descriptor.name(),
            type_tag = descriptor.type_tag(),
            codec = %codec.kind(),
            "entity registered"
        );
        let descriptor = Arc::new(descriptor);
        entities.insert(
            descriptor.name().to_string(),
            RegisteredEntity {
                descriptor: Arc::clone(&descriptor),
                codec,
            },
        );
        Ok(descriptor)
    }

    pub fn descriptor(&self, entity: &str) -> Result<Arc<EntityTypeDescriptor>> {
        self.entities
            .read()
            .get(entity)
            .map(|e| Arc::clone(&e.descriptor))
            .ok_or_else(|| LogTableError::UnknownEntity(entity.to_string()))
    }

    /// Names of the registered entity types, sorted
    pub fn entities(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entities.read().keys().cloned().collect();
        names.sort();
        names
    }

    // =========================================================================
    // Tables
    // =========================================================================

    /// Table of an entity type, opened on first use.
    ///
    /// The table may still be hydrating; its reads apply the readiness mode.
    pub fn table(&self, entity: &str) -> Result<Arc<MaterializedTable>> {
        self.check_open()?;

        let (descriptor, codec) = {
            let entities = self.entities.read();
            let registered = entities
                .get(entity)
                .ok_or_else(|| LogTableError::UnknownEntity(entity.to_string()))?;
            (Arc::clone(&registered.descriptor), Arc::clone(&registered.codec))
        };

        // The store-wide map is only held for the lookup; opening locks the
        // entity's own slot, so other entity types are not held up
        let slot = Arc::clone(self.tables.lock().entry(entity.to_string()).or_default());
        let mut opened = slot.lock();
        if let Some(table) = opened.as_ref() {
            return Ok(Arc::clone(table));
        }
        // close() may have drained the slots meanwhile
        self.check_open()?;

        let table = Arc::new(MaterializedTable::open(
            Arc::clone(&self.log),
            descriptor,
            codec,
            Arc::clone(&self.feed),
            TableOptions::from_config(&self.config, entity),
        )?);
        *opened = Some(Arc::clone(&table));
        Ok(table)
    }

    /// Row of an entity by key values (in key-property order)
    pub fn get(&self, entity: &str, key: Key) -> Result<Option<Row>> {
        let table = self.table(entity)?;
        let key = table.descriptor().coerce_key(key.into_values())?;
        table.get(&key)
    }

    /// Rows of an entity matching a predicate
    pub fn scan(&self, entity: &str, predicate: Option<&Predicate>) -> Result<TableScan> {
        self.table(entity)?.scan(predicate)
    }

    /// Generator of an entity's generated key property, once the table is
    /// ready
    pub fn key_generator(&self, entity: &str) -> Result<Option<Arc<KeyGenerator>>> {
        let table = self.table(entity)?;
        table.ensure_ready()?;
        Ok(table.generator().cloned())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Append a batch of changes to the log
    pub fn save(&self, batch: &WriteBatch) -> Result<SaveResult> {
        self.check_open()?;
        self.writer.save(self, batch)
    }

    /// Make appended records durable
    pub fn flush(&self) -> Result<()> {
        self.log.flush()
    }

    // =========================================================================
    // Change Notifications
    // =========================================================================

    pub fn register_listener<L: ChangeListener>(&self, listener: L) -> Result<ListenerToken> {
        self.check_open()?;
        self.feed.register(listener)
    }

    pub fn unregister_listener(&self, token: ListenerToken) -> bool {
        self.feed.unregister(token)
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Close every table, stop listeners and flush the log. Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let slots: Vec<TableSlot> = self.tables.lock().drain().map(|(_, slot)| slot).collect();
        let tables: Vec<Arc<MaterializedTable>> =
            slots.iter().filter_map(|slot| slot.lock().take()).collect();

        let mut first_error = None;
        for table in tables {
            if let Err(e) = table.close() {
                tracing::warn!(entity = table.name(), error = %e, "failed to close table");
                first_error.get_or_insert(e);
            }
        }

        self.feed.shutdown();
        if let Err(e) = self.log.flush() {
            first_error.get_or_insert(e);
        }

        tracing::info!(database = %self.config.database_name, "entity store closed");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LogTableError::Closed(self.config.database_name.clone()));
        }
        Ok(())
    }
}

impl TableResolver for EntityStore {
    fn resolve(&self, entity: &str) -> Result<Arc<MaterializedTable>> {
        self.table(entity)
    }
}

impl Drop for EntityStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "error while closing entity store");
        }
    }
}
