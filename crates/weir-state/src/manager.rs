//! Lifecycle management of one task's local state stores.
//!
//! [`TaskStorageManager`] owns every store of a single task partition and
//! keeps them consistent with their changelog streams:
//!
//! - `init` decides per store whether the locally cached directory is
//!   reusable or must be rebuilt, registers changelog consumers at the right
//!   starting offsets and drives restoration to completion;
//! - `flush` / `stop` push engine state to disk and then checkpoint the
//!   newest changelog offset into each logged store's `OFFSET` file, which is
//!   what lets the next incarnation skip a full replay.

use crate::config::{StorageConfig, DEFAULT_CHANGELOG_DELETE_RETENTION_MS};
use crate::dirs;
use crate::error::{Result, StateError};
use crate::offset_file;
use crate::paths;
use crate::restore::ChangelogIterator;
use crate::store::{StorageEngine, StoreDefinition};
use crate::system::{SystemAdmin, SystemConsumer};
use crate::task::{Partition, StreamPartition, SystemStream, TaskName};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Retry budget for the extended admin's single-partition newest-offset call.
/// The metadata fallback performs a single fetch.
const NEWEST_OFFSET_RETRIES: u32 = 3;

/// Manages the state stores of one partition of one stateful task.
///
/// `init`, `flush` and `stop` are driven by the task thread and never called
/// concurrently.
pub struct TaskStorageManager {
    task_name: TaskName,
    partition: Partition,
    config: StorageConfig,
    stores: IndexMap<String, StoreDefinition>,
    admins: HashMap<String, Arc<dyn SystemAdmin>>,
    consumers: HashMap<String, Arc<dyn SystemConsumer>>,

    /// Oldest changelog offsets at init time; `Some(None)` records an empty
    /// changelog, a missing key records missing metadata.
    changelog_oldest_offsets: HashMap<SystemStream, Option<String>>,
    /// Newest changelog offsets at init time; restoration drains up to these.
    changelog_newest_offsets: HashMap<SystemStream, Option<String>>,
    /// Starting offsets recovered from surviving `OFFSET` files.
    file_offsets: HashMap<StreamPartition, String>,
    /// Stores that still need a changelog replay.
    to_restore: HashSet<String>,
}

impl TaskStorageManager {
    pub fn new(task_name: TaskName, partition: Partition, config: StorageConfig) -> Self {
        Self {
            task_name,
            partition,
            config,
            stores: IndexMap::new(),
            admins: HashMap::new(),
            consumers: HashMap::new(),
            changelog_oldest_offsets: HashMap::new(),
            changelog_newest_offsets: HashMap::new(),
            file_offsets: HashMap::new(),
            to_restore: HashSet::new(),
        }
    }

    /// Attach a store. Flush order follows attachment order.
    pub fn with_store(mut self, store: StoreDefinition) -> Self {
        self.stores.insert(store.name.clone(), store);
        self
    }

    /// Register the admin and consumer of a message system.
    pub fn with_system(
        mut self,
        system: impl Into<String>,
        admin: Arc<dyn SystemAdmin>,
        consumer: Arc<dyn SystemConsumer>,
    ) -> Self {
        let system = system.into();
        self.admins.insert(system.clone(), admin);
        self.consumers.insert(system, consumer);
        self
    }

    pub fn task_name(&self) -> &TaskName {
        &self.task_name
    }

    pub fn partition(&self) -> Partition {
        self.partition
    }

    /// Engine of a store by name.
    pub fn store(&self, name: &str) -> Option<Arc<dyn StorageEngine>> {
        self.stores.get(name).map(|s| s.engine.clone())
    }

    /// Bring every store up to date with its changelog. Runs the ordered
    /// phases: clean, setup, validate, start consumers, restore, stop
    /// consumers. Any failure from the changelog phases aborts and
    /// propagates; no partial rollback is attempted.
    pub async fn init(&mut self) -> Result<()> {
        info!(task = %self.task_name, partition = %self.partition, "Initializing task storage");

        self.changelog_oldest_offsets.clear();
        self.changelog_newest_offsets.clear();
        self.file_offsets.clear();
        self.to_restore = self
            .stores
            .values()
            .filter(|s| s.engine.properties().is_logged_store)
            .map(|s| s.name.clone())
            .collect();

        self.clean_base_dirs()?;
        self.setup_base_dirs()?;
        self.validate_changelog_streams().await?;
        self.start_consumers().await?;
        self.restore_stores().await?;
        self.stop_consumers().await?;

        info!(task = %self.task_name, "Task storage initialized");
        Ok(())
    }

    /// Flush every engine in declaration order, then checkpoint changelog
    /// offsets.
    pub async fn flush(&self) -> Result<()> {
        for store in self.stores.values() {
            debug!(store = %store.name, "Flushing store");
            store.engine.flush().await?;
        }
        self.flush_changelog_offset_files().await
    }

    /// Stop every engine, then checkpoint changelog offsets so a graceful
    /// shutdown leaves the freshest possible validity certificate on disk.
    pub async fn stop(&self) -> Result<()> {
        for store in self.stores.values() {
            debug!(store = %store.name, "Stopping store");
            store.engine.stop().await?;
        }
        self.flush_changelog_offset_files().await
    }

    fn ephemeral_dir(&self, store_name: &str) -> PathBuf {
        paths::store_partition_dir(&self.config.store_base_dir, store_name, &self.task_name)
    }

    fn logged_dir(&self, store_name: &str) -> PathBuf {
        paths::store_partition_dir(
            &self.config.logged_store_base_dir,
            store_name,
            &self.task_name,
        )
    }

    fn admin(&self, system: &str) -> Result<Arc<dyn SystemAdmin>> {
        self.admins
            .get(system)
            .cloned()
            .ok_or_else(|| StateError::MissingSystemAdmin(system.to_owned()))
    }

    fn consumer(&self, system: &str) -> Result<Arc<dyn SystemConsumer>> {
        self.consumers
            .get(system)
            .cloned()
            .ok_or_else(|| StateError::MissingSystemConsumer(system.to_owned()))
    }

    /// Systems referenced by at least one store changelog, deduplicated.
    fn changelog_systems(&self) -> Vec<String> {
        let mut systems: Vec<String> = self
            .stores
            .values()
            .filter_map(|s| s.changelog.as_ref().map(|c| c.system.clone()))
            .collect();
        systems.sort();
        systems.dedup();
        systems
    }

    /// Phase 1: delete every non-logged partition directory, evaluate each
    /// logged directory for reuse and seed starting offsets from surviving
    /// `OFFSET` files.
    fn clean_base_dirs(&mut self) -> Result<()> {
        for store in self.stores.values() {
            let properties = store.engine.properties();

            let ephemeral_dir = self.ephemeral_dir(&store.name);
            debug!(store = %store.name, dir = %ephemeral_dir.display(), "Deleting non-logged store directory");
            dirs::remove_dir_recursive(&ephemeral_dir)?;

            if !properties.is_logged_store {
                continue;
            }

            let logged_dir = self.logged_dir(&store.name);
            let retention = store.delete_retention.unwrap_or(Duration::from_millis(
                DEFAULT_CHANGELOG_DELETE_RETENTION_MS,
            ));
            if dirs::is_logged_dir_valid(&logged_dir, properties, retention)? {
                if let (Some(offset), Some(changelog)) =
                    (offset_file::read_offset(&logged_dir)?, &store.changelog)
                {
                    info!(
                        store = %store.name,
                        offset = %offset,
                        "Reusing logged store directory"
                    );
                    self.file_offsets
                        .insert(changelog.partition(self.partition), offset);
                }
            } else {
                debug!(store = %store.name, dir = %logged_dir.display(), "Deleting unusable logged store directory");
                dirs::remove_dir_recursive(&logged_dir)?;
            }
        }
        Ok(())
    }

    /// Phase 2: (re)create partition directories. Logged directories are
    /// gated on `exists()`, non-logged ones are created unconditionally.
    fn setup_base_dirs(&self) -> Result<()> {
        for store in self.stores.values() {
            if store.engine.properties().is_logged_store {
                let logged_dir = self.logged_dir(&store.name);
                if !logged_dir.exists() {
                    fs::create_dir_all(&logged_dir)?;
                }
            } else {
                fs::create_dir_all(self.ephemeral_dir(&store.name))?;
            }
        }
        Ok(())
    }

    /// Phase 3: validate every changelog's partitioning and gather oldest and
    /// newest offsets for this partition in one metadata batch per system.
    /// Streams whose metadata lacks this partition are dropped here and fail
    /// later at consumer registration.
    async fn validate_changelog_streams(&mut self) -> Result<()> {
        let mut streams_by_system: HashMap<String, Vec<String>> = HashMap::new();
        for store in self.stores.values() {
            if let Some(changelog) = &store.changelog {
                let admin = self.admin(&changelog.system)?;
                admin
                    .validate_changelog_stream(changelog, self.config.changelog_stream_partitions)
                    .await?;
                streams_by_system
                    .entry(changelog.system.clone())
                    .or_default()
                    .push(changelog.stream.clone());
            }
        }

        for (system, mut streams) in streams_by_system {
            streams.sort();
            streams.dedup();
            let admin = self.admin(&system)?;
            let metadata = admin.fetch_stream_metadata(&streams).await?;
            for (stream, stream_metadata) in metadata {
                let Some(partition_metadata) = stream_metadata.partitions.get(&self.partition)
                else {
                    warn!(
                        stream = %stream,
                        partition = %self.partition,
                        "Changelog metadata has no entry for this partition"
                    );
                    continue;
                };
                let system_stream = SystemStream::new(system.clone(), stream);
                debug!(
                    stream = %system_stream,
                    oldest = ?partition_metadata.oldest_offset,
                    newest = ?partition_metadata.newest_offset,
                    "Gathered changelog offsets"
                );
                self.changelog_oldest_offsets
                    .insert(system_stream.clone(), partition_metadata.oldest_offset.clone());
                self.changelog_newest_offsets
                    .insert(system_stream, partition_metadata.newest_offset.clone());
            }
        }
        Ok(())
    }

    /// Phase 4: register each changelog consumer at its starting offset and
    /// start the consumers. A saved file offset resumes consumption after
    /// itself; otherwise consumption starts at the changelog's oldest offset.
    /// An empty changelog skips registration entirely and drops the store
    /// from the restore set.
    async fn start_consumers(&mut self) -> Result<()> {
        let mut registrations: Vec<(String, StreamPartition, String)> = Vec::new();
        let mut skipped: Vec<String> = Vec::new();

        for store in self.stores.values() {
            let Some(changelog) = &store.changelog else {
                continue;
            };
            let ssp = changelog.partition(self.partition);

            let starting_offset = match self.file_offsets.get(&ssp) {
                Some(file_offset) => {
                    let resume_at = self
                        .admin(&changelog.system)?
                        .offset_after(&ssp, file_offset)
                        .await?;
                    info!(
                        store = %store.name,
                        ssp = %ssp,
                        file_offset = %file_offset,
                        starting_offset = %resume_at,
                        "Resuming changelog consumption after checkpointed offset"
                    );
                    Some(resume_at)
                }
                None => match self.changelog_oldest_offsets.get(changelog) {
                    Some(oldest) => oldest.clone(),
                    None => {
                        return Err(StateError::MissingChangelogOffset { ssp });
                    }
                },
            };

            match starting_offset {
                Some(offset) => {
                    info!(
                        store = %store.name,
                        ssp = %ssp,
                        offset = %offset,
                        "Registering changelog consumer"
                    );
                    registrations.push((changelog.system.clone(), ssp, offset));
                }
                None => {
                    info!(
                        store = %store.name,
                        ssp = %ssp,
                        "Changelog is empty; skipping restoration"
                    );
                    skipped.push(store.name.clone());
                }
            }
        }

        for name in skipped {
            self.to_restore.remove(&name);
        }
        for (system, ssp, offset) in &registrations {
            self.consumer(system)?.register(ssp, offset).await?;
        }
        for system in self.changelog_systems() {
            self.consumer(&system)?.start().await?;
        }
        Ok(())
    }

    /// Phase 5: replay changelog tails into every store still marked for
    /// restoration. Blocks until each engine has drained its iterator.
    async fn restore_stores(&mut self) -> Result<()> {
        let names: Vec<String> = self
            .stores
            .keys()
            .filter(|name| self.to_restore.contains(*name))
            .cloned()
            .collect();

        for name in names {
            let Some(store) = self.stores.get(&name) else {
                continue;
            };
            let Some(changelog) = store.changelog.clone() else {
                continue;
            };
            let engine = store.engine.clone();
            let ssp = changelog.partition(self.partition);
            let end_offset = self
                .changelog_newest_offsets
                .get(&changelog)
                .cloned()
                .flatten();
            // A checkpoint equal to the newest offset means the tail is
            // already applied; there is nothing to drain.
            let end_offset = match (self.file_offsets.get(&ssp), end_offset) {
                (Some(file_offset), Some(newest)) if *file_offset == newest => None,
                (_, end_offset) => end_offset,
            };

            info!(store = %name, ssp = %ssp, end = ?end_offset, "Restoring store from changelog");
            let consumer = self.consumer(&changelog.system)?;
            let mut iterator = ChangelogIterator::new(consumer, ssp, end_offset);
            engine.restore(&mut iterator).await?;
        }
        Ok(())
    }

    /// Phase 6: stop every changelog consumer.
    async fn stop_consumers(&self) -> Result<()> {
        for system in self.changelog_systems() {
            self.consumer(&system)?.stop().await?;
        }
        Ok(())
    }

    /// Checkpoint the newest changelog offset into each logged, persisted
    /// store's `OFFSET` file. A failure for one store is logged and
    /// swallowed: the only cost is a longer restore on the next startup.
    /// An unknown system still fails the whole call.
    async fn flush_changelog_offset_files(&self) -> Result<()> {
        for store in self.stores.values() {
            let properties = store.engine.properties();
            if !(properties.is_logged_store && properties.is_persisted_to_disk) {
                continue;
            }
            let Some(changelog) = &store.changelog else {
                continue;
            };
            let admin = self.admin(&changelog.system)?;
            let ssp = changelog.partition(self.partition);
            let logged_dir = self.logged_dir(&store.name);

            if let Err(e) = self
                .write_changelog_offset_file(&admin, &store.name, &ssp, &logged_dir)
                .await
            {
                warn!(
                    store = %store.name,
                    ssp = %ssp,
                    error = %e,
                    "Failed to checkpoint changelog offset; next startup will restore more"
                );
            }
        }
        Ok(())
    }

    async fn write_changelog_offset_file(
        &self,
        admin: &Arc<dyn SystemAdmin>,
        store_name: &str,
        ssp: &StreamPartition,
        logged_dir: &std::path::Path,
    ) -> Result<()> {
        let newest_offset = if admin.supports_newest_offset() {
            admin.newest_offset(ssp, NEWEST_OFFSET_RETRIES).await?
        } else {
            let metadata = admin
                .fetch_stream_metadata(std::slice::from_ref(&ssp.stream))
                .await?;
            metadata
                .get(&ssp.stream)
                .and_then(|m| m.partitions.get(&ssp.partition))
                .and_then(|p| p.newest_offset.clone())
        };

        match newest_offset {
            Some(offset) => {
                debug!(store = %store_name, offset = %offset, "Writing changelog offset file");
                offset_file::write_offset(logged_dir, &offset)?;
            }
            None => {
                debug!(store = %store_name, "Changelog is empty; removing any stale offset file");
                offset_file::delete_offset(logged_dir)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockStorageEngine, MockSystem};
    use std::fs::File;
    use std::path::Path;
    use std::time::SystemTime;

    const SYSTEM: &str = "kafka";
    const STORE: &str = "orders";
    const CHANGELOG: &str = "orders-changelog";
    const RETENTION: Duration = Duration::from_millis(86_400_000);

    fn task() -> TaskName {
        TaskName::new("Partition 0")
    }

    fn changelog_for(stream: &str) -> SystemStream {
        SystemStream::new(SYSTEM, stream)
    }

    fn manager_with_store(
        base: &Path,
        system: &Arc<MockSystem>,
        engine: &Arc<MockStorageEngine>,
    ) -> TaskStorageManager {
        let config = StorageConfig::new()
            .with_store_base_dir(base.join("ephemeral"))
            .with_logged_store_base_dir(base.join("logged"))
            .with_changelog_stream_partitions(1);
        TaskStorageManager::new(task(), Partition(0), config)
            .with_system(SYSTEM, system.clone(), system.clone())
            .with_store(
                StoreDefinition::new(STORE, engine.clone())
                    .with_changelog(changelog_for(CHANGELOG)),
            )
    }

    fn logged_dir(base: &Path) -> PathBuf {
        base.join("logged").join(STORE).join("Partition_0")
    }

    /// Recursively collect (relative path, contents) of every file under a
    /// root, for byte-equivalence comparisons.
    fn snapshot_tree(root: &Path) -> Vec<(String, Vec<u8>)> {
        fn walk(root: &Path, dir: &Path, out: &mut Vec<(String, Vec<u8>)>) {
            if !dir.exists() {
                return;
            }
            for entry in fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    walk(root, &path, out);
                } else {
                    let rel = path.strip_prefix(root).unwrap().to_string_lossy().into_owned();
                    out.push((rel, fs::read(&path).unwrap()));
                }
            }
        }
        let mut out = Vec::new();
        walk(root, root, &mut out);
        out.sort();
        out
    }

    #[tokio::test]
    async fn test_cold_start_with_empty_changelog() {
        let dir = tempfile::tempdir().unwrap();
        let system = MockSystem::new();
        system.create_stream(CHANGELOG, 1);
        let engine = MockStorageEngine::persisted();
        let mut manager = manager_with_store(dir.path(), &system, &engine);

        manager.init().await.unwrap();

        // Directory created empty, no consumer registered, nothing restored.
        let logged = logged_dir(dir.path());
        assert!(logged.is_dir());
        assert_eq!(fs::read_dir(&logged).unwrap().count(), 0);
        assert!(system.registrations().is_empty());
        assert!(engine.restored_offsets().is_empty());

        // A flush against the still-empty changelog writes no OFFSET file.
        manager.flush().await.unwrap();
        assert_eq!(offset_file::read_offset(&logged).unwrap(), None);
    }

    #[tokio::test]
    async fn test_cold_start_full_replay_and_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let system = MockSystem::new();
        system.create_stream(CHANGELOG, 1);
        for i in 0..5u32 {
            system.produce(CHANGELOG, Partition(0), format!("v{i}"));
        }
        let engine = MockStorageEngine::persisted();
        let mut manager = manager_with_store(dir.path(), &system, &engine);

        manager.init().await.unwrap();

        // Registered at the oldest offset and fully replayed.
        let ssp = changelog_for(CHANGELOG).partition(Partition(0));
        assert_eq!(system.registrations().get(&ssp), Some(&"0".to_owned()));
        assert_eq!(engine.restored_offsets(), ["0", "1", "2", "3", "4"]);
        assert_eq!(system.start_count(), 1);
        assert_eq!(system.stop_count(), 1);

        manager.flush().await.unwrap();
        assert_eq!(engine.flush_count(), 1);
        assert_eq!(
            offset_file::read_offset(&logged_dir(dir.path())).unwrap(),
            Some("4".to_owned())
        );
    }

    #[tokio::test]
    async fn test_warm_start_resumes_after_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let system = MockSystem::new();
        system.create_stream(CHANGELOG, 1);
        for i in 0..=57u32 {
            system.produce(CHANGELOG, Partition(0), format!("v{i}"));
        }
        let engine = MockStorageEngine::persisted();
        let mut manager = manager_with_store(dir.path(), &system, &engine);

        // A fresh checkpoint at offset 42 survives the validity check.
        let logged = logged_dir(dir.path());
        fs::create_dir_all(&logged).unwrap();
        offset_file::write_offset(&logged, "42").unwrap();

        manager.init().await.unwrap();

        // Consumption resumes after the checkpointed offset: 43..=57.
        let ssp = changelog_for(CHANGELOG).partition(Partition(0));
        assert_eq!(system.registrations().get(&ssp), Some(&"43".to_owned()));
        let restored = engine.restored_offsets();
        assert_eq!(restored.first().map(String::as_str), Some("43"));
        assert_eq!(restored.last().map(String::as_str), Some("57"));
        assert_eq!(restored.len(), 15);

        manager.flush().await.unwrap();
        assert_eq!(
            offset_file::read_offset(&logged).unwrap(),
            Some("57".to_owned())
        );
    }

    #[tokio::test]
    async fn test_warm_start_with_stale_checkpoint_replays_fully() {
        let dir = tempfile::tempdir().unwrap();
        let system = MockSystem::new();
        system.create_stream(CHANGELOG, 1);
        for i in 0..5u32 {
            system.produce(CHANGELOG, Partition(0), format!("v{i}"));
        }
        let engine = MockStorageEngine::persisted();
        let mut manager = manager_with_store(dir.path(), &system, &engine);

        let logged = logged_dir(dir.path());
        fs::create_dir_all(&logged).unwrap();
        offset_file::write_offset(&logged, "3").unwrap();
        File::options()
            .write(true)
            .open(paths::offset_file_path(&logged))
            .unwrap()
            .set_modified(SystemTime::now() - RETENTION * 2)
            .unwrap();

        manager.init().await.unwrap();

        // Stale directory discarded: recreated empty, full replay from oldest.
        assert!(logged.is_dir());
        assert_eq!(offset_file::read_offset(&logged).unwrap(), None);
        let ssp = changelog_for(CHANGELOG).partition(Partition(0));
        assert_eq!(system.registrations().get(&ssp), Some(&"0".to_owned()));
        assert_eq!(engine.restored_offsets(), ["0", "1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn test_warm_start_with_empty_offset_file_behaves_cold() {
        let dir = tempfile::tempdir().unwrap();
        let system = MockSystem::new();
        system.create_stream(CHANGELOG, 1);
        system.produce(CHANGELOG, Partition(0), "v0");
        let engine = MockStorageEngine::persisted();
        let mut manager = manager_with_store(dir.path(), &system, &engine);

        let logged = logged_dir(dir.path());
        fs::create_dir_all(&logged).unwrap();
        fs::write(paths::offset_file_path(&logged), "").unwrap();

        manager.init().await.unwrap();

        let ssp = changelog_for(CHANGELOG).partition(Partition(0));
        assert_eq!(system.registrations().get(&ssp), Some(&"0".to_owned()));
        assert_eq!(engine.restored_offsets(), ["0"]);
    }

    #[tokio::test]
    async fn test_non_logged_store_directory_is_reset() {
        let dir = tempfile::tempdir().unwrap();
        let system = MockSystem::new();
        let engine = MockStorageEngine::ephemeral();
        let config = StorageConfig::new()
            .with_store_base_dir(dir.path().join("ephemeral"))
            .with_logged_store_base_dir(dir.path().join("logged"))
            .with_changelog_stream_partitions(1);
        let mut manager = TaskStorageManager::new(task(), Partition(0), config)
            .with_system(SYSTEM, system.clone(), system.clone())
            .with_store(StoreDefinition::new("scratch", engine.clone()));

        let scratch_dir = dir
            .path()
            .join("ephemeral")
            .join("scratch")
            .join("Partition_0");
        fs::create_dir_all(&scratch_dir).unwrap();
        fs::write(scratch_dir.join("leftover"), b"junk").unwrap();

        manager.init().await.unwrap();

        assert!(scratch_dir.is_dir());
        assert_eq!(fs::read_dir(&scratch_dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_init_is_idempotent_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let system = MockSystem::new();
        system.create_stream(CHANGELOG, 1);
        for i in 0..3u32 {
            system.produce(CHANGELOG, Partition(0), format!("v{i}"));
        }
        let engine = MockStorageEngine::persisted();
        let mut manager = manager_with_store(dir.path(), &system, &engine);

        manager.init().await.unwrap();
        manager.flush().await.unwrap();
        let first = snapshot_tree(dir.path());

        manager.init().await.unwrap();
        let second = snapshot_tree(dir.path());

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_missing_partition_metadata_fails_init() {
        let dir = tempfile::tempdir().unwrap();
        let system = MockSystem::new();
        // Changelog exists for validation but exposes no partitions at all,
        // so no starting offset can be resolved for partition 0.
        system.create_stream(CHANGELOG, 0);
        let config = StorageConfig::new()
            .with_store_base_dir(dir.path().join("ephemeral"))
            .with_logged_store_base_dir(dir.path().join("logged"))
            .with_changelog_stream_partitions(0);
        let engine = MockStorageEngine::persisted();
        let mut manager = TaskStorageManager::new(task(), Partition(0), config)
            .with_system(SYSTEM, system.clone(), system.clone())
            .with_store(
                StoreDefinition::new(STORE, engine.clone())
                    .with_changelog(changelog_for(CHANGELOG)),
            );

        let err = manager.init().await.unwrap_err();
        assert!(matches!(err, StateError::MissingChangelogOffset { .. }));
    }

    #[tokio::test]
    async fn test_invalid_partition_count_fails_init() {
        let dir = tempfile::tempdir().unwrap();
        let system = MockSystem::new();
        system.create_stream(CHANGELOG, 4);
        let engine = MockStorageEngine::persisted();
        // Manager expects 1 partition, the stream has 4.
        let mut manager = manager_with_store(dir.path(), &system, &engine);

        let err = manager.init().await.unwrap_err();
        assert!(matches!(err, StateError::ChangelogValidation(_)));
    }

    #[tokio::test]
    async fn test_missing_system_admin_fails_init() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MockStorageEngine::persisted();
        let config = StorageConfig::new()
            .with_store_base_dir(dir.path().join("ephemeral"))
            .with_logged_store_base_dir(dir.path().join("logged"));
        let mut manager = TaskStorageManager::new(task(), Partition(0), config).with_store(
            StoreDefinition::new(STORE, engine.clone()).with_changelog(changelog_for(CHANGELOG)),
        );

        let err = manager.init().await.unwrap_err();
        assert!(matches!(err, StateError::MissingSystemAdmin(_)));
    }

    #[tokio::test]
    async fn test_flush_failure_on_one_store_spares_the_others() {
        let dir = tempfile::tempdir().unwrap();
        let system = MockSystem::new();
        let engines: Vec<_> = (0..3).map(|_| MockStorageEngine::persisted()).collect();

        let config = StorageConfig::new()
            .with_store_base_dir(dir.path().join("ephemeral"))
            .with_logged_store_base_dir(dir.path().join("logged"))
            .with_changelog_stream_partitions(1);
        let mut manager = TaskStorageManager::new(task(), Partition(0), config)
            .with_system(SYSTEM, system.clone(), system.clone());
        for (name, engine) in ["a", "b", "c"].into_iter().zip(&engines) {
            let stream = format!("{name}-changelog");
            system.create_stream(stream.clone(), 1);
            system.produce(&stream, Partition(0), "v0");
            manager = manager.with_store(
                StoreDefinition::new(name, engine.clone()).with_changelog(changelog_for(&stream)),
            );
        }

        manager.init().await.unwrap();
        manager.flush().await.unwrap();

        // Advance every changelog, then poison b's newest-offset lookup.
        for name in ["a", "b", "c"] {
            system.produce(&format!("{name}-changelog"), Partition(0), "v1");
        }
        system.poison_stream("b-changelog");
        manager.flush().await.unwrap();

        let offset_in = |name: &str| {
            let logged = dir.path().join("logged").join(name).join("Partition_0");
            offset_file::read_offset(&logged).unwrap()
        };
        assert_eq!(offset_in("a"), Some("1".to_owned()));
        // b keeps its previous checkpoint untouched.
        assert_eq!(offset_in("b"), Some("0".to_owned()));
        assert_eq!(offset_in("c"), Some("1".to_owned()));
    }

    #[tokio::test]
    async fn test_checkpoints_are_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let system = MockSystem::new();
        system.create_stream(CHANGELOG, 1);
        system.produce(CHANGELOG, Partition(0), "v0");
        let engine = MockStorageEngine::persisted();
        let mut manager = manager_with_store(dir.path(), &system, &engine);

        manager.init().await.unwrap();

        let logged = logged_dir(dir.path());
        let mut previous = 0u64;
        for i in 1..4u32 {
            manager.flush().await.unwrap();
            let offset: u64 = offset_file::read_offset(&logged)
                .unwrap()
                .unwrap()
                .parse()
                .unwrap();
            assert!(offset >= previous);
            previous = offset;
            system.produce(CHANGELOG, Partition(0), format!("v{i}"));
        }
    }

    #[tokio::test]
    async fn test_checkpoint_via_metadata_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let system = MockSystem::without_newest_offset();
        system.create_stream(CHANGELOG, 1);
        system.produce(CHANGELOG, Partition(0), "v0");
        system.produce(CHANGELOG, Partition(0), "v1");
        let engine = MockStorageEngine::persisted();
        let mut manager = manager_with_store(dir.path(), &system, &engine);

        manager.init().await.unwrap();
        manager.flush().await.unwrap();

        assert_eq!(
            offset_file::read_offset(&logged_dir(dir.path())).unwrap(),
            Some("1".to_owned())
        );
    }

    #[tokio::test]
    async fn test_stop_stops_engines_and_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let system = MockSystem::new();
        system.create_stream(CHANGELOG, 1);
        system.produce(CHANGELOG, Partition(0), "v0");
        let engine = MockStorageEngine::persisted();
        let mut manager = manager_with_store(dir.path(), &system, &engine);

        manager.init().await.unwrap();
        manager.stop().await.unwrap();

        assert_eq!(engine.stop_count(), 1);
        assert_eq!(
            offset_file::read_offset(&logged_dir(dir.path())).unwrap(),
            Some("0".to_owned())
        );
    }

    #[tokio::test]
    async fn test_in_memory_logged_store_gets_no_offset_file() {
        let dir = tempfile::tempdir().unwrap();
        let system = MockSystem::new();
        system.create_stream(CHANGELOG, 1);
        system.produce(CHANGELOG, Partition(0), "v0");
        let engine = MockStorageEngine::in_memory_logged();
        let mut manager = manager_with_store(dir.path(), &system, &engine);

        manager.init().await.unwrap();
        assert_eq!(engine.restored_offsets(), ["0"]);

        manager.flush().await.unwrap();
        // Only persisted stores carry a validity certificate.
        assert_eq!(
            offset_file::read_offset(&logged_dir(dir.path())).unwrap(),
            None
        );
    }
}
