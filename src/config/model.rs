use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::types::{OrphanPolicy, StageKind};

/// Validated top-level configuration.
///
/// Construct via `ConfigFile::try_from(RawConfigFile)` (see `validate.rs`) or
/// [`crate::config::load_and_validate`].
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub paths: PathsSection,
    pub admission: AdmissionSection,
    pub server: ServerSection,
    pub worker: WorkerSettings,
    pub storage: StorageSection,
    /// Stage commands in pipeline order; every [`StageKind`] appears once.
    pub stages: Vec<(StageKind, StageConfig)>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        paths: PathsSection,
        admission: AdmissionSection,
        server: ServerSection,
        worker: WorkerSettings,
        storage: StorageSection,
        stages: Vec<(StageKind, StageConfig)>,
    ) -> Self {
        Self {
            paths,
            admission,
            server,
            worker,
            storage,
            stages,
        }
    }

    /// Resolve every relative path in `[paths]` and each stage `workdir`
    /// against `base`.
    ///
    /// Used so that a config in `deploy/Pipeguard.toml` refers to directories
    /// next to itself rather than to the current working directory.
    pub fn with_base_dir(mut self, base: &Path) -> Self {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.paths.marker_dir);
        resolve(&mut self.paths.trigger_dir);
        resolve(&mut self.paths.storage_root);
        resolve(&mut self.paths.journal);
        for (_, stage) in self.stages.iter_mut() {
            if let Some(dir) = stage.workdir.as_mut() {
                resolve(dir);
            }
        }
        self
    }

    pub fn stage(&self, kind: StageKind) -> Option<&StageConfig> {
        self.stages.iter().find(|(k, _)| *k == kind).map(|(_, s)| s)
    }
}

/// Configuration exactly as read from the TOML file.
///
/// ```toml
/// [paths]
/// marker_dir = "state/markers"
/// trigger_dir = "trigger"
///
/// [worker]
/// rescan_interval = "5s"
/// orphan_policy = "clear"
///
/// [[storage.route]]
/// pattern = "*Sales Transaction List*"
/// folder = "raw_sales_by_transaction"
///
/// [stage.etl]
/// cmd = "python -m app.pipeline.etl"
/// ```
///
/// All sections except `[stage.*]` are optional.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub paths: PathsSection,

    #[serde(default)]
    pub admission: AdmissionSection,

    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub worker: WorkerSection,

    #[serde(default)]
    pub storage: StorageSection,

    /// `[stage.<name>]` tables keyed by stage name (`etl`, `basket_mining`, ...).
    #[serde(default)]
    pub stage: BTreeMap<String, StageConfig>,
}

/// `[paths]` section. Both processes must agree on these.
#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    /// Directory holding the processing marker. Must be shared between the
    /// admission process and the worker.
    #[serde(default = "default_marker_dir")]
    pub marker_dir: PathBuf,

    /// Directory the worker watches for the trigger file.
    #[serde(default = "default_trigger_dir")]
    pub trigger_dir: PathBuf,

    /// Root for landed payloads and per-run scratch space.
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    /// Where the worker writes the last run report.
    #[serde(default = "default_journal")]
    pub journal: PathBuf,
}

fn default_marker_dir() -> PathBuf {
    PathBuf::from("state/markers")
}

fn default_trigger_dir() -> PathBuf {
    PathBuf::from("trigger")
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data")
}

fn default_journal() -> PathBuf {
    PathBuf::from("state/last_run.json")
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            marker_dir: default_marker_dir(),
            trigger_dir: default_trigger_dir(),
            storage_root: default_storage_root(),
            journal: default_journal(),
        }
    }
}

/// `[admission]` section: the texts returned to rejected submitters.
#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionSection {
    #[serde(default = "default_conflict_message")]
    pub conflict_message: String,

    #[serde(default = "default_retry_hint")]
    pub retry_hint: String,
}

fn default_conflict_message() -> String {
    "Upload or processing already in progress.".to_string()
}

fn default_retry_hint() -> String {
    "Please wait for the current processing to complete (typically 2-5 minutes) and try again."
        .to_string()
}

impl Default for AdmissionSection {
    fn default() -> Self {
        Self {
            conflict_message: default_conflict_message(),
            retry_hint: default_retry_hint(),
        }
    }
}

/// `[server]` section for the admission/status HTTP process.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS origins; empty means any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Upper bound for one upload request body, in MiB.
    #[serde(default = "default_max_upload_mib")]
    pub max_upload_mib: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_max_upload_mib() -> usize {
    64
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
            max_upload_mib: default_max_upload_mib(),
        }
    }
}

/// `[worker]` section as written in TOML (durations are strings).
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSection {
    /// Fallback re-scan period for the trigger directory.
    #[serde(default = "default_rescan_interval")]
    pub rescan_interval: String,

    /// Pause after a filesystem event before reporting the trigger, so the
    /// writer has finished with the file.
    #[serde(default = "default_settle_delay")]
    pub settle_delay: String,

    #[serde(default)]
    pub orphan_policy: OrphanPolicy,
}

fn default_rescan_interval() -> String {
    "5s".to_string()
}

fn default_settle_delay() -> String {
    "500ms".to_string()
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            rescan_interval: default_rescan_interval(),
            settle_delay: default_settle_delay(),
            orphan_policy: OrphanPolicy::default(),
        }
    }
}

/// Parsed form of [`WorkerSection`].
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub rescan_interval: Duration,
    pub settle_delay: Duration,
    pub orphan_policy: OrphanPolicy,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            rescan_interval: Duration::from_secs(5),
            settle_delay: Duration::from_millis(500),
            orphan_policy: OrphanPolicy::Clear,
        }
    }
}

/// `[storage]` section: where submitted files land.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StorageSection {
    /// Folder for files that match no route. When unset, such files are
    /// skipped.
    #[serde(default)]
    pub default_folder: Option<String>,

    /// `[[storage.route]]` entries, first match wins.
    #[serde(default)]
    pub route: Vec<RouteRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteRule {
    /// Glob matched against the submitted file name.
    pub pattern: String,
    /// Landing folder (relative to `<storage_root>/landing`).
    pub folder: String,
}

/// `[stage.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StageConfig {
    /// Shell command that runs the stage.
    pub cmd: String,

    /// Working directory for the command; defaults to the worker's cwd.
    #[serde(default)]
    pub workdir: Option<PathBuf>,

    /// Extra environment variables for the command.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}
