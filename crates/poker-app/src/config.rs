// Configuration loading and parsing (poker.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Contents of `defaults/poker.toml`, used when the process runs outside
/// the project tree and no config exists yet.
const DEFAULT_CONFIG: &str = include_str!("../defaults/poker.toml");

const CONFIG_FILE: &str = "poker.toml";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub logging: LoggingConfig,
    pub export_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub directory: PathBuf,
    pub filter: String,
}

// ---------------------------------------------------------------------------
// poker.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire poker.toml file.
#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    database: DatabaseSection,
    logging: LoggingConfig,
    export: ExportSection,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ExportSection {
    directory: PathBuf,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate `config/poker.toml` relative to `base_dir`.
///
/// This does not copy defaults; prefer `load_config()`.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join(CONFIG_FILE);
    let text = read_file(&path)?;
    let file: ConfigFile = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.clone(),
        source: e,
    })?;

    let config = Config {
        db_path: file.database.path,
        logging: file.logging,
        export_dir: file.export.directory,
    };

    validate(&config)?;

    Ok(config)
}

/// Ensure all config files exist by copying missing ones from `defaults/`.
/// Returns the list of files that were copied. Skips `.example` files.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.exists() {
        if !config_dir.exists() {
            return Err(ConfigError::DefaultsCopyError {
                message: format!(
                    "neither defaults/ nor config/ directory found in {}",
                    base_dir.display()
                ),
            });
        }
        return Ok(vec![]);
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create config directory: {e}"),
    })?;

    let entries = std::fs::read_dir(&defaults_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to read defaults directory: {e}"),
    })?;

    let mut copied = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to read defaults entry: {e}"),
        })?;
        let path = entry.path();

        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };
        if file_name.to_str().is_some_and(|n| n.ends_with(".example")) {
            continue;
        }

        let content = std::fs::read(&path).map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to read {}: {e}", path.display()),
        })?;
        let target = config_dir.join(file_name);
        if write_new(&target, &content)? {
            copied.push(target);
        }
    }

    Ok(copied)
}

/// Convenience wrapper: loads config relative to the current working
/// directory when it holds `config/` or `defaults/`, otherwise from the
/// platform config directory, writing the built-in defaults there on first
/// use.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;

    if cwd.join("config").exists() || cwd.join("defaults").exists() {
        ensure_config_files(&cwd)?;
        return load_config_from(&cwd);
    }

    let base = platform_base_dir()?;
    ensure_builtin_config(&base)?;
    load_config_from(&base)
}

/// Write the built-in default config under `base_dir/config/` unless a
/// config file already exists there. Returns whether a file was written.
pub fn ensure_builtin_config(base_dir: &Path) -> Result<bool, ConfigError> {
    let config_dir = base_dir.join("config");
    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create {}: {e}", config_dir.display()),
    })?;
    let written = write_new(&config_dir.join(CONFIG_FILE), DEFAULT_CONFIG.as_bytes())?;
    if written {
        info!("Wrote default configuration to {}", config_dir.display());
    }
    Ok(written)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn platform_base_dir() -> Result<PathBuf, ConfigError> {
    directories::ProjectDirs::from("", "", "planning-poker")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or_else(|| ConfigError::DefaultsCopyError {
            message: "could not determine a home directory for configuration".into(),
        })
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

/// Create `target` with `content` only if it does not exist yet.
fn write_new(target: &Path, content: &[u8]) -> Result<bool, ConfigError> {
    match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)
    {
        Ok(mut dest) => {
            std::io::Write::write_all(&mut dest, content).map_err(|e| {
                ConfigError::DefaultsCopyError {
                    message: format!("failed to write {}: {e}", target.display()),
                }
            })?;
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(ConfigError::DefaultsCopyError {
            message: format!("failed to create {}: {e}", target.display()),
        }),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.db_path.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "database.path".into(),
            message: "must not be empty".into(),
        });
    }

    if config.logging.filter.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "logging.filter".into(),
            message: "must not be empty".into(),
        });
    }

    let dirs: &[(&str, &Path)] = &[
        ("logging.directory", &config.logging.directory),
        ("export.directory", &config.export_dir),
    ];
    for (name, dir) in dirs {
        if dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError {
                field: name.to_string(),
                message: "must not be empty".into(),
            });
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    /// Helper: returns the poker-app crate root (works whether `cargo test`
    /// runs from the crate root or the workspace root).
    fn project_root() -> PathBuf {
        let cwd = std::env::current_dir().unwrap();
        if cwd.join("defaults").exists() {
            cwd
        } else if cwd.join("crates/poker-app/defaults").exists() {
            cwd.join("crates/poker-app")
        } else {
            panic!("Cannot locate defaults/ directory from CWD {:?}", cwd);
        }
    }

    /// Helper: fresh temp dir with `config/poker.toml` holding `contents`.
    fn temp_config(name: &str, contents: &str) -> PathBuf {
        let tmp = std::env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::write(tmp.join("config").join(CONFIG_FILE), contents).unwrap();
        tmp
    }

    #[test]
    fn load_valid_config_from_defaults() {
        let tmp = temp_config("poker_config_defaults", DEFAULT_CONFIG);
        let config = load_config_from(&tmp).expect("should load valid config");

        assert_eq!(config.db_path, "planning-poker.db");
        assert_eq!(config.logging.directory, PathBuf::from("logs"));
        assert_eq!(config.logging.filter, "poker_app=info,poker_core=info,warn");
        assert_eq!(config.export_dir, PathBuf::from("exports"));

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn builtin_config_matches_defaults_file() {
        let on_disk = fs::read_to_string(project_root().join("defaults/poker.toml")).unwrap();
        assert_eq!(on_disk, DEFAULT_CONFIG);
    }

    #[test]
    fn ensure_config_files_copies_once() {
        let tmp = std::env::temp_dir().join("poker_config_copy");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("defaults")).unwrap();
        fs::write(tmp.join("defaults/poker.toml"), DEFAULT_CONFIG).unwrap();
        fs::write(tmp.join("defaults/poker.toml.example"), "# sample").unwrap();

        let copied = ensure_config_files(&tmp).unwrap();
        assert_eq!(copied, vec![tmp.join("config/poker.toml")]);
        assert!(!tmp.join("config/poker.toml.example").exists());

        // Existing files are left alone on the second run.
        fs::write(tmp.join("config/poker.toml"), "edited").unwrap();
        assert!(ensure_config_files(&tmp).unwrap().is_empty());
        assert_eq!(fs::read_to_string(tmp.join("config/poker.toml")).unwrap(), "edited");

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_files_without_any_directory_fails() {
        let tmp = std::env::temp_dir().join("poker_config_nothing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();

        let err = ensure_config_files(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::DefaultsCopyError { .. }));

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_builtin_config_writes_once() {
        let tmp = std::env::temp_dir().join("poker_config_builtin");
        let _ = fs::remove_dir_all(&tmp);

        assert!(ensure_builtin_config(&tmp).unwrap());
        assert!(!ensure_builtin_config(&tmp).unwrap());
        assert!(load_config_from(&tmp).is_ok());

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn missing_config_file_is_reported() {
        let tmp = std::env::temp_dir().join("poker_config_missing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();

        match load_config_from(&tmp).unwrap_err() {
            ConfigError::FileNotFound { path } => {
                assert!(path.ends_with("config/poker.toml"));
            }
            other => panic!("expected FileNotFound, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_malformed_toml() {
        let tmp = temp_config("poker_config_malformed", "[database\npath = ");
        assert!(matches!(
            load_config_from(&tmp).unwrap_err(),
            ConfigError::ParseError { .. }
        ));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_empty_database_path() {
        let modified = DEFAULT_CONFIG.replace(
            "path = \"planning-poker.db\"",
            "path = \"  \"",
        );
        let tmp = temp_config("poker_config_empty_db", &modified);

        match load_config_from(&tmp).unwrap_err() {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, "database.path"),
            other => panic!("expected ValidationError, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_empty_export_directory() {
        let modified = DEFAULT_CONFIG.replace("directory = \"exports\"", "directory = \"\"");
        let tmp = temp_config("poker_config_empty_export", &modified);

        match load_config_from(&tmp).unwrap_err() {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, "export.directory"),
            other => panic!("expected ValidationError, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }
}
