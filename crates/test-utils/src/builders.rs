#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use pipeguard::admission::{AdmissionGate, StatusEndpoint};
use pipeguard::config::{
    AdmissionSection, ConfigFile, RawConfigFile, RouteRule, StageConfig,
};
use pipeguard::engine::Orchestrator;
use pipeguard::errors::{PipeguardError, Result};
use pipeguard::fs::mock::MockFileSystem;
use pipeguard::journal::RunJournal;
use pipeguard::marker::{FsMarkerStore, MarkerStore, PROCESSING_MARKER};
use pipeguard::stages::{Pipeline, Stage};
use pipeguard::storage::{LocalStorage, PendingItem};
use pipeguard::trigger::{FileTriggerSlot, TriggerSignal, TriggerSlot};
use pipeguard::types::{OrphanPolicy, StageKind};

pub const TRANSACTIONS_FOLDER: &str = "raw_sales_by_transaction";
pub const PRODUCTS_FOLDER: &str = "raw_sales_by_product";

/// Builder for `ConfigFile` to simplify test setup.
///
/// Starts with every stage configured as `true` and the two sales routes.
pub struct ConfigBuilder {
    config: RawConfigFile,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        let mut config = RawConfigFile::default();
        for kind in StageKind::ALL {
            config.stage.insert(kind.key().to_string(), stage_cmd("true"));
        }
        config.storage.route = vec![
            RouteRule {
                pattern: "*Sales Transaction List*".to_string(),
                folder: TRANSACTIONS_FOLDER.to_string(),
            },
            RouteRule {
                pattern: "*Sales Report by Product*".to_string(),
                folder: PRODUCTS_FOLDER.to_string(),
            },
        ];
        Self { config }
    }

    pub fn with_stage_cmd(mut self, kind: StageKind, cmd: &str) -> Self {
        self.config.stage.insert(kind.key().to_string(), stage_cmd(cmd));
        self
    }

    pub fn without_stage(mut self, kind: StageKind) -> Self {
        self.config.stage.remove(kind.key());
        self
    }

    pub fn with_default_folder(mut self, folder: &str) -> Self {
        self.config.storage.default_folder = Some(folder.to_string());
        self
    }

    pub fn with_orphan_policy(mut self, policy: OrphanPolicy) -> Self {
        self.config.worker.orphan_policy = policy;
        self
    }

    pub fn with_rescan_interval(mut self, value: &str) -> Self {
        self.config.worker.rescan_interval = value.to_string();
        self
    }

    /// Put every `[paths]` entry under `root`.
    pub fn with_paths_under(mut self, root: &Path) -> Self {
        self.config.paths.marker_dir = root.join("state/markers");
        self.config.paths.trigger_dir = root.join("trigger");
        self.config.paths.storage_root = root.join("data");
        self.config.paths.journal = root.join("state/last_run.json");
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn stage_cmd(cmd: &str) -> StageConfig {
    StageConfig {
        cmd: cmd.to_string(),
        workdir: None,
        env: BTreeMap::new(),
    }
}

/// A submitted file with CSV-ish content.
pub fn upload(name: &str) -> PendingItem {
    PendingItem::new(name, format!("id,qty\n1,{}\n", name.len()).into_bytes())
}

/// Both processes wired over one in-memory filesystem.
#[derive(Debug, Clone)]
pub struct Harness {
    pub fs: MockFileSystem,
    pub markers: FsMarkerStore,
    pub slot: FileTriggerSlot,
    pub storage: LocalStorage,
    pub journal: RunJournal,
}

impl Harness {
    pub fn new() -> Self {
        let fs = MockFileSystem::new();
        let shared: Arc<MockFileSystem> = Arc::new(fs.clone());
        let storage = LocalStorage::new("/data", shared.clone())
            .with_route("*Sales Transaction List*", TRANSACTIONS_FOLDER)
            .and_then(|s| s.with_route("*Sales Report by Product*", PRODUCTS_FOLDER))
            .expect("static routes are valid");
        Self {
            markers: FsMarkerStore::new("/state/markers", shared.clone()),
            slot: FileTriggerSlot::new("/trigger", shared.clone()),
            journal: RunJournal::new("/state/last_run.json", shared),
            storage,
            fs,
        }
    }

    pub fn gate(&self) -> AdmissionGate {
        self.gate_with_markers(Arc::new(self.markers.clone()))
    }

    pub fn gate_with_markers(&self, markers: Arc<dyn MarkerStore>) -> AdmissionGate {
        AdmissionGate::new(
            markers,
            Arc::new(self.slot.clone()),
            Arc::new(self.storage.clone()),
            AdmissionSection::default(),
        )
    }

    pub fn status(&self) -> StatusEndpoint {
        StatusEndpoint::new(Arc::new(self.markers.clone()))
    }

    pub fn orchestrator(&self, stages: Vec<Arc<dyn Stage>>) -> Orchestrator {
        let pipeline = Pipeline::new(stages).expect("stages in pipeline order");
        Orchestrator::new(
            Arc::new(self.markers.clone()),
            Arc::new(self.slot.clone()),
            Arc::new(self.storage.clone()),
            pipeline,
        )
        .with_journal(self.journal.clone())
    }

    pub fn marker_present(&self) -> bool {
        self.markers.exists(PROCESSING_MARKER).expect("marker store readable")
    }

    pub fn trigger_present(&self) -> bool {
        self.slot.is_present().expect("trigger slot readable")
    }

    /// Leave marker and trigger behind the way a crashed worker would.
    pub fn leave_orphaned_run(&self) -> TriggerSignal {
        let signal = TriggerSignal::new(uuid::Uuid::new_v4(), vec![format!(
            "{TRANSACTIONS_FOLDER}/Sales Transaction List.csv"
        )]);
        self.markers
            .put(PROCESSING_MARKER, "Processing 1 file(s)")
            .expect("marker writable");
        self.slot.post(&signal).expect("trigger slot empty");
        signal
    }

    pub fn scratch_path(&self, run_id: uuid::Uuid, file: &str) -> PathBuf {
        use pipeguard::storage::Storage;
        self.storage.scratch_dir(run_id).join(file)
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// Marker store that is always down.
#[derive(Debug, Clone, Default)]
pub struct UnavailableMarkerStore;

impl MarkerStore for UnavailableMarkerStore {
    fn exists(&self, _key: &str) -> Result<bool> {
        Err(PipeguardError::MarkerStoreUnavailable("connection refused".into()))
    }

    fn read(&self, _key: &str) -> Result<Option<String>> {
        Err(PipeguardError::MarkerStoreUnavailable("connection refused".into()))
    }

    fn put(&self, _key: &str, _message: &str) -> Result<()> {
        Err(PipeguardError::MarkerStoreUnavailable("connection refused".into()))
    }

    fn age(&self, _key: &str) -> Result<Option<Duration>> {
        Err(PipeguardError::MarkerStoreUnavailable("connection refused".into()))
    }

    fn delete(&self, _key: &str) -> Result<()> {
        Err(PipeguardError::MarkerStoreUnavailable("connection refused".into()))
    }
}
