use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Confidence (percent) a match must strictly exceed to be accepted.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 65.0;

/// Engine configuration: defaults, then an optional TOML file, then
/// `FACEID_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory for everything the engine persists.
    pub data_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory of saved face crops, one `<name>.jpg` per identity.
    pub faces_dir: PathBuf,
    /// Directory where uploaded images are staged.
    pub uploads_dir: PathBuf,
    /// OpenCV Haar cascade XML used by the face locator.
    pub cascade_path: PathBuf,
    /// Acceptance threshold for recognition, in percent.
    pub match_threshold: f64,
}

/// On-disk form of the configuration. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    data_dir: Option<PathBuf>,
    db_path: Option<PathBuf>,
    faces_dir: Option<PathBuf>,
    uploads_dir: Option<PathBuf>,
    cascade_path: Option<PathBuf>,
    match_threshold: Option<f64>,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn load() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// All paths derived from one data directory, default threshold.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            db_path: data_dir.join("faces.db"),
            faces_dir: data_dir.join("registered_faces"),
            uploads_dir: data_dir.join("uploads"),
            cascade_path: data_dir.join(faceid_core::DEFAULT_CASCADE_FILE),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            data_dir,
        }
    }

    fn from_lookup(env: impl Fn(&str) -> Option<String>) -> Self {
        let env_path = |key: &str| env(key).map(PathBuf::from);

        let base_dir = env_path("FACEID_DATA_DIR").unwrap_or_else(|| default_data_dir(&env));
        let config_path = env_path("FACEID_CONFIG").unwrap_or_else(|| base_dir.join("config.toml"));
        let file = read_file_config(&config_path);

        let data_dir = env_path("FACEID_DATA_DIR")
            .or(file.data_dir)
            .unwrap_or(base_dir);
        let defaults = Self::with_data_dir(data_dir);

        Self {
            db_path: env_path("FACEID_DB_PATH")
                .or(file.db_path)
                .unwrap_or(defaults.db_path),
            faces_dir: env_path("FACEID_FACES_DIR")
                .or(file.faces_dir)
                .unwrap_or(defaults.faces_dir),
            uploads_dir: env_path("FACEID_UPLOADS_DIR")
                .or(file.uploads_dir)
                .unwrap_or(defaults.uploads_dir),
            cascade_path: env_path("FACEID_CASCADE_PATH")
                .or(file.cascade_path)
                .unwrap_or(defaults.cascade_path),
            match_threshold: env("FACEID_MATCH_THRESHOLD")
                .and_then(|v| v.parse().ok())
                .or(file.match_threshold)
                .unwrap_or(defaults.match_threshold),
            data_dir: defaults.data_dir,
        }
    }

    /// Create the directories the engine writes into.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(&self.faces_dir)?;
        std::fs::create_dir_all(&self.uploads_dir)?;
        Ok(())
    }
}

fn default_data_dir(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    env("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("faceid")
}

fn read_file_config(path: &Path) -> FileConfig {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return FileConfig::default(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "config file unreadable; using defaults");
            return FileConfig::default();
        }
    };
    match toml::from_str(&text) {
        Ok(file) => file,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "config file invalid; using defaults");
            FileConfig::default()
        }
    }
}
