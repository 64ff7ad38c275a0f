//! Configuration management for meteodist using the prefer crate.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::models::Dataset;
use crate::repository::DbContext;

/// Default database filename.
const DEFAULT_DATABASE_FILENAME: &str = "meteodist.db";

/// Default download subdirectory name.
const DOWNLOADS_SUBDIR: &str = "downloads";

/// Grace period before a non-terminal request is force-failed.
pub const DEFAULT_PENDING_GRACE_DAYS: i64 = 2;

/// Default aggregation retention window.
pub const DEFAULT_AGGREGATION_RETENTION_DAYS: i64 = 30;

/// An external tool invocation.
///
/// Arguments may contain `{input}`, `{output}`, `{stem}` and `{query}`
/// placeholders. An argument that is exactly `{options}` or `{datasets}`
/// expands to zero or more arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(command: &str, args: &[&str]) -> Self {
        Self {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// External tools used by extraction, post-processing and format conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCommands {
    /// Archive query; writes the extracted messages to stdout.
    pub extract: ToolCommand,
    /// Derived variables for GRIB input.
    pub derived_grib: ToolCommand,
    /// Derived variables for BUFR input.
    pub derived_bufr: ToolCommand,
    /// Spatial transform used for grid cropping.
    pub crop: ToolCommand,
    /// BUFR to JSON dump; writes JSON lines to stdout.
    pub dump: ToolCommand,
    /// JSON to BUFR import; writes BUFR to stdout.
    pub import: ToolCommand,
}

impl Default for ToolCommands {
    fn default() -> Self {
        Self {
            extract: ToolCommand::new("arki-query", &["--data", "{query}", "{datasets}"]),
            derived_grib: ToolCommand::new("vg6d_transform", &["{options}", "{input}", "{output}"]),
            derived_bufr: ToolCommand::new(
                "v7d_transform",
                &[
                    "--input-format=BUFR",
                    "--output-format=BUFR",
                    "{options}",
                    "{input}",
                    "{output}",
                ],
            ),
            crop: ToolCommand::new("vg6d_transform", &["{options}", "{input}", "{output}"]),
            dump: ToolCommand::new("dbamsg", &["dump", "--json", "{input}"]),
            import: ToolCommand::new("dbamsg", &["convert", "--dest=bufr", "{input}"]),
        }
    }
}

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename.
    pub database_filename: String,
    /// Database URL (overrides data_dir/database_filename if set).
    pub database_url: Option<String>,
    /// Root of the per-user download directories.
    pub download_dir: PathBuf,
    /// Secondary aggregation store (defaults to a file in the data dir).
    pub aggregation_database_url: Option<String>,
    /// Scheduler store URL: `sqlite:<path>`, `memory`, or `redis://...`.
    pub scheduler_store: Option<String>,
    /// HTTP bind address.
    pub bind: String,
    /// Days a request may stay non-terminal before it is force-failed.
    pub pending_grace_days: i64,
    /// Minimum age of a row-less output file before the sweeper removes it.
    pub orphan_min_age_secs: u64,
    /// Aggregation rows older than this are pruned.
    pub aggregation_retention_days: i64,
    /// Recipient of maintenance alerts.
    pub support_email: String,
    /// Mail transfer command, fed an RFC 822 message on stdin.
    pub mail_command: String,
    /// Shared maintenance job log, if any.
    pub job_log: Option<PathBuf>,
    /// Worker polling interval in milliseconds.
    pub worker_poll_interval_ms: u64,
    /// External tools.
    pub tools: ToolCommands,
    /// Dataset catalog.
    pub datasets: Vec<Dataset>,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("meteodist");

        Self {
            download_dir: data_dir.join(DOWNLOADS_SUBDIR),
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            database_url: None,
            aggregation_database_url: None,
            scheduler_store: None,
            bind: "127.0.0.1:5000".to_string(),
            pending_grace_days: DEFAULT_PENDING_GRACE_DAYS,
            orphan_min_age_secs: 3600,
            aggregation_retention_days: DEFAULT_AGGREGATION_RETENTION_DAYS,
            support_email: "support@localhost".to_string(),
            mail_command: "sendmail".to_string(),
            job_log: None,
            worker_poll_interval_ms: 1000,
            tools: ToolCommands::default(),
            datasets: Vec::new(),
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            download_dir: data_dir.join(DOWNLOADS_SUBDIR),
            data_dir,
            ..Default::default()
        }
    }

    /// Get the database URL, constructing from path if not explicitly set.
    pub fn database_url(&self) -> String {
        if let Some(ref url) = self.database_url {
            url.clone()
        } else {
            format!("sqlite:{}", self.database_path().display())
        }
    }

    /// Get the full path to the database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    pub fn aggregation_database_url(&self) -> String {
        self.aggregation_database_url.clone().unwrap_or_else(|| {
            format!("sqlite:{}", self.data_dir.join("aggregations.db").display())
        })
    }

    pub fn scheduler_store_url(&self) -> String {
        self.scheduler_store.clone().unwrap_or_else(|| {
            format!("sqlite:{}", self.data_dir.join("scheduler.db").display())
        })
    }

    /// Download directory of one user.
    pub fn user_download_dir(&self, user_id: i32) -> PathBuf {
        self.download_dir.join(user_id.to_string())
    }

    pub fn find_dataset(&self, name: &str) -> Option<&Dataset> {
        self.datasets.iter().find(|d| d.name == name)
    }

    /// Ensure all directories exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        // Log diagnostics for debugging permission issues in containers (Unix only)
        #[cfg(unix)]
        {
            Self::log_directory_diagnostics(&self.data_dir, "data_dir");
            Self::log_directory_diagnostics(&self.download_dir, "download_dir");
        }

        fs::create_dir_all(&self.data_dir).map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to create data directory '{}': {}",
                    self.data_dir.display(),
                    e
                ),
            )
        })?;
        fs::create_dir_all(&self.download_dir).map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to create download directory '{}': {}",
                    self.download_dir.display(),
                    e
                ),
            )
        })?;
        Ok(())
    }

    /// Log diagnostic information about a directory (Unix only).
    #[cfg(unix)]
    fn log_directory_diagnostics(path: &Path, label: &str) {
        use std::os::unix::fs::MetadataExt;
        let uid = unsafe { libc::getuid() };
        let gid = unsafe { libc::getgid() };
        tracing::debug!(
            "{} check: path={}, running as uid={} gid={}",
            label,
            path.display(),
            uid,
            gid
        );

        match fs::metadata(path) {
            Ok(meta) => tracing::debug!(
                "{} exists: owner={}:{}, mode={:o}, is_dir={}",
                label,
                meta.uid(),
                meta.gid(),
                meta.mode() & 0o7777,
                meta.is_dir()
            ),
            Err(_) => tracing::debug!("{} does not exist, will attempt to create", label),
        }
    }

    /// Create a database context using the configured database URL or path.
    pub fn create_db_context(&self) -> DbContext {
        DbContext::from_url(&self.database_url())
    }
}

/// Configuration file structure. Every field is optional; unset values keep
/// the defaults from [`Settings`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation_database_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler_store: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_grace_days: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orphan_min_age_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation_retention_days: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub support_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mail_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_log: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_poll_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolCommands>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub datasets: Vec<Dataset>,

    /// Path the config was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Automatically discovers meteodist config files in standard locations.
    pub async fn load() -> Self {
        // Use prefer for file discovery, then parse with serde
        match prefer::load("meteodist").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => Self::load_from_path(path).await.unwrap_or_else(|e| {
                    tracing::warn!("{}", e);
                    Self::default()
                }),
                None => Self::default(),
            },
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let mut config = Self::parse(&contents, path)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    fn parse(contents: &str, path: &Path) -> Result<Self, String> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

        match ext {
            "toml" => toml::from_str(contents)
                .map_err(|e| format!("Failed to parse TOML config: {}", e)),
            "yaml" | "yml" => serde_yaml::from_str(contents)
                .map_err(|e| format!("Failed to parse YAML config: {}", e)),
            _ => serde_json::from_str(contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e)),
        }
    }

    /// Get the base directory for resolving relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.data_dir = self.resolve_path(data_dir, base_dir);
            settings.download_dir = settings.data_dir.join(DOWNLOADS_SUBDIR);
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
        if let Some(ref download_dir) = self.download_dir {
            settings.download_dir = self.resolve_path(download_dir, base_dir);
        }
        if let Some(ref url) = self.aggregation_database_url {
            settings.aggregation_database_url = Some(url.clone());
        }
        if let Some(ref store) = self.scheduler_store {
            settings.scheduler_store = Some(store.clone());
        }
        if let Some(ref bind) = self.bind {
            settings.bind = bind.clone();
        }
        if let Some(days) = self.pending_grace_days {
            settings.pending_grace_days = days;
        }
        if let Some(secs) = self.orphan_min_age_secs {
            settings.orphan_min_age_secs = secs;
        }
        if let Some(days) = self.aggregation_retention_days {
            settings.aggregation_retention_days = days;
        }
        if let Some(ref email) = self.support_email {
            settings.support_email = email.clone();
        }
        if let Some(ref cmd) = self.mail_command {
            settings.mail_command = cmd.clone();
        }
        if let Some(ref log) = self.job_log {
            settings.job_log = Some(self.resolve_path(log, base_dir));
        }
        if let Some(ms) = self.worker_poll_interval_ms {
            settings.worker_poll_interval_ms = ms;
        }
        if let Some(ref tools) = self.tools {
            settings.tools = tools.clone();
        }
        if !self.datasets.is_empty() {
            settings.datasets = self.datasets.clone();
        }
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides auto-discovery).
    pub config_path: Option<PathBuf>,
    /// Use CWD for relative paths instead of config file directory.
    pub use_cwd: bool,
    /// Data directory override (--data flag).
    pub data: Option<PathBuf>,
}

/// Read a non-empty environment variable.
fn env_override(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

/// Load config from file sources.
async fn load_file_config(options: &LoadOptions) -> Config {
    // Priority 1: Explicit --config flag
    if let Some(ref config_path) = options.config_path {
        return Config::load_from_path(config_path)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("{}", e);
                Config::default()
            });
    }

    // Priority 2: Auto-discover via prefer
    Config::load().await
}

/// Load settings with explicit options.
/// Returns (Settings, Config) tuple.
pub async fn load_settings_with_options(options: LoadOptions) -> (Settings, Config) {
    let config = load_file_config(&options).await;

    let mut settings = Settings::default();

    let base_dir = if options.use_cwd {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    } else {
        config
            .base_dir()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    };

    config.apply_to_settings(&mut settings, &base_dir);

    // --data override takes precedence for data_dir and its derived paths
    if let Some(ref data_dir) = options.data {
        settings.data_dir = config.resolve_path(&data_dir.to_string_lossy(), &base_dir);
        if config.download_dir.is_none() {
            settings.download_dir = settings.data_dir.join(DOWNLOADS_SUBDIR);
        }
    }

    apply_env_overrides(&mut settings);

    (settings, config)
}

/// Environment variables take the highest precedence.
fn apply_env_overrides(settings: &mut Settings) {
    if let Some(url) = env_override("DATABASE_URL") {
        tracing::debug!("Using DATABASE_URL from environment: {}", url);
        settings.database_url = Some(url);
    }
    if let Some(url) = env_override("AGGREGATION_DATABASE_URL") {
        tracing::debug!("Using AGGREGATION_DATABASE_URL from environment");
        settings.aggregation_database_url = Some(url);
    }
    if let Some(store) = env_override("SCHEDULER_STORE") {
        tracing::debug!("Using SCHEDULER_STORE from environment: {}", store);
        settings.scheduler_store = Some(store);
    }
    if let Some(dir) = env_override("METEODIST_DOWNLOAD_DIR") {
        settings.download_dir = PathBuf::from(shellexpand::tilde(&dir).as_ref());
    }
    if let Some(email) = env_override("METEODIST_SUPPORT_EMAIL") {
        settings.support_email = email;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DataFormat, DatasetCategory};

    #[test]
    fn test_toml_config_applies() {
        let contents = r#"
            data_dir = "state"
            bind = "0.0.0.0:8080"
            pending_grace_days = 3

            [[datasets]]
            name = "lm5"
            description = "COSMO 5km"
            category = "FOR"
            format = "grib"
            license = "CC-BY"
            attribution = "ARPAE"
            public = true
        "#;
        let config = Config::parse(contents, Path::new("meteodist.toml")).unwrap();

        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings, Path::new("/srv"));

        assert_eq!(settings.data_dir, PathBuf::from("/srv/state"));
        assert_eq!(settings.download_dir, PathBuf::from("/srv/state/downloads"));
        assert_eq!(settings.bind, "0.0.0.0:8080");
        assert_eq!(settings.pending_grace_days, 3);
        assert_eq!(settings.orphan_min_age_secs, 3600);

        let lm5 = settings.find_dataset("lm5").unwrap();
        assert_eq!(lm5.category, DatasetCategory::Forecast);
        assert_eq!(lm5.format, DataFormat::Grib);
        assert!(settings.find_dataset("agrmet").is_none());
    }

    #[test]
    fn test_derived_urls() {
        let settings = Settings::with_data_dir(PathBuf::from("/var/lib/meteodist"));
        assert_eq!(
            settings.database_url(),
            "sqlite:/var/lib/meteodist/meteodist.db"
        );
        assert_eq!(
            settings.scheduler_store_url(),
            "sqlite:/var/lib/meteodist/scheduler.db"
        );
        assert_eq!(
            settings.user_download_dir(7),
            PathBuf::from("/var/lib/meteodist/downloads/7")
        );
    }

    #[test]
    fn test_yaml_tools_override() {
        let contents = "tools:\n  extract: {command: my-extract, args: ['{query}']}\n  derived_grib: {command: a}\n  derived_bufr: {command: b}\n  crop: {command: c}\n  dump: {command: d}\n  import: {command: e}\n";
        let config = Config::parse(contents, Path::new("meteodist.yaml")).unwrap();
        let tools = config.tools.unwrap();
        assert_eq!(tools.extract.command, "my-extract");
        assert_eq!(tools.extract.args, vec!["{query}".to_string()]);
        assert!(tools.dump.args.is_empty());
    }
}
