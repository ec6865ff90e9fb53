// Configuration loading and parsing (dukkho.toml, credentials.toml).

use serde::Deserialize;
use std::fs::{self, OpenOptions};
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Environment variable that overrides `gemini_api_key` from credentials.toml.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

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
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub client: ClientConfig,
    pub credentials: CredentialsConfig,
    pub db_path: PathBuf,
}

// ---------------------------------------------------------------------------
// dukkho.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire dukkho.toml file.
#[derive(Debug, Clone, Deserialize)]
struct DukkhoFile {
    server: ServerConfig,
    model: ModelConfig,
    client: ClientConfig,
    database: DatabaseSection,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    /// Empty means "use the platform data directory".
    #[serde(default)]
    path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the relay listens on, e.g. `127.0.0.1:3000`.
    pub bind: String,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind
            .parse()
            .map_err(|e| ConfigError::ValidationError {
                field: "server.bind".into(),
                message: format!("not a socket address ({e}): {}", self.bind),
            })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub api_base: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Full URL of the relay's chat endpoint.
    pub relay_url: String,
    /// Opaque id handed out by the identity provider.
    pub user_id: String,
}

// ---------------------------------------------------------------------------
// credentials.toml structs
// ---------------------------------------------------------------------------

#[derive(Clone, Deserialize, Default)]
pub struct CredentialsConfig {
    pub gemini_api_key: Option<String>,
}

// Keep the key out of Debug output (and therefore out of the logs).
impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field(
                "gemini_api_key",
                &self.gemini_api_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl CredentialsConfig {
    /// The configured key, treating an empty string as absent.
    pub fn api_key(&self) -> Option<&str> {
        self.gemini_api_key.as_deref().filter(|k| !k.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/dukkho.toml` and
/// (optionally) `config/credentials.toml`, both relative to `base_dir`.
///
/// `env_api_key` is the value of [`API_KEY_ENV`], passed in rather than read
/// here so callers and tests control the environment. A non-empty value
/// wins over the credentials file.
///
/// This is the lower-level loading primitive that does not auto-copy defaults.
/// Prefer `load_config()` which handles default initialization automatically.
pub fn load_config_from(base_dir: &Path, env_api_key: Option<String>) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join("config");

    // --- dukkho.toml (required) ---
    let main_path = config_dir.join("dukkho.toml");
    let main_text = read_file(&main_path)?;
    let file: DukkhoFile = toml::from_str(&main_text).map_err(|e| ConfigError::ParseError {
        path: main_path.clone(),
        source: e,
    })?;

    // --- credentials.toml (optional) ---
    let credentials_path = config_dir.join("credentials.toml");
    let mut credentials: CredentialsConfig = if credentials_path.exists() {
        let cred_text = read_file(&credentials_path)?;
        toml::from_str(&cred_text).map_err(|e| ConfigError::ParseError {
            path: credentials_path.clone(),
            source: e,
        })?
    } else {
        CredentialsConfig::default()
    };

    if let Some(key) = env_api_key.filter(|k| !k.is_empty()) {
        credentials.gemini_api_key = Some(key);
    }

    let db_path = if file.database.path.trim().is_empty() {
        default_db_path()?
    } else {
        PathBuf::from(file.database.path)
    };

    let config = Config {
        server: file.server,
        model: file.model,
        client: file.client,
        credentials,
        db_path,
    };

    validate(&config)?;

    Ok(config)
}

/// Copy every missing file from `defaults/` into `config/`, never
/// overwriting. `.example` templates are left behind. Returns the paths
/// that were created.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.is_dir() {
        return if config_dir.is_dir() {
            Ok(Vec::new())
        } else {
            Err(copy_error(format!(
                "no defaults/ or config/ directory under {}; run from the project root",
                base_dir.display()
            )))
        };
    }

    fs::create_dir_all(&config_dir)
        .map_err(|e| copy_error(format!("cannot create {}: {e}", config_dir.display())))?;
    let entries = fs::read_dir(&defaults_dir)
        .map_err(|e| copy_error(format!("cannot read {}: {e}", defaults_dir.display())))?;

    let mut copied = Vec::new();
    for entry in entries {
        let source = entry.map_err(|e| copy_error(e.to_string()))?.path();
        let Some(name) = source.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !source.is_file() || name.ends_with(".example") {
            continue;
        }

        let target = config_dir.join(name);
        if copy_if_absent(&source, &target)? {
            info!("Copied default {} to {}", source.display(), target.display());
            copied.push(target);
        }
    }

    Ok(copied)
}

/// Returns `false` without touching anything when `target` exists.
fn copy_if_absent(source: &Path, target: &Path) -> Result<bool, ConfigError> {
    let mut dest = match OpenOptions::new().write(true).create_new(true).open(target) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(copy_error(format!("cannot create {}: {e}", target.display()))),
    };
    let mut src = fs::File::open(source)
        .map_err(|e| copy_error(format!("cannot read {}: {e}", source.display())))?;
    io::copy(&mut src, &mut dest)
        .map_err(|e| copy_error(format!("cannot write {}: {e}", target.display())))?;
    Ok(true)
}

fn copy_error(message: String) -> ConfigError {
    ConfigError::DefaultsCopyError { message }
}

/// Convenience wrapper: loads config relative to the current working directory,
/// copying defaults first and honouring `GEMINI_API_KEY`.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd, std::env::var(API_KEY_ENV).ok())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn default_db_path() -> Result<PathBuf, ConfigError> {
    let dirs = directories::ProjectDirs::from("", "", "dukkho").ok_or_else(|| {
        ConfigError::ValidationError {
            field: "database.path".into(),
            message: "empty and no platform data directory is available".into(),
        }
    })?;
    Ok(dirs.data_dir().join("dukkho.db"))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    config.server.bind_addr()?;

    let required: &[(&str, &str)] = &[
        ("model.name", config.model.name.as_str()),
        ("model.api_base", config.model.api_base.as_str()),
        ("client.relay_url", config.client.relay_url.as_str()),
        ("client.user_id", config.client.user_id.as_str()),
    ];
    for (name, val) in required {
        if val.trim().is_empty() {
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

    const VALID_MAIN: &str = r#"
[server]
bind = "127.0.0.1:3000"

[model]
name = "gemini-2.5-flash-lite"
api_base = "https://generativelanguage.googleapis.com/v1beta"

[database]
path = "dukkho.db"

[client]
relay_url = "http://127.0.0.1:3000/api/chat"
user_id = "local"
"#;

    /// Fresh scratch directory under the system temp dir.
    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dukkho_config_{name}"));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(dir.join("config")).unwrap();
        dir
    }

    fn write_main(dir: &Path, text: &str) {
        fs::write(dir.join("config/dukkho.toml"), text).unwrap();
    }

    /// Helper: path to the workspace `defaults/` directory.
    fn workspace_defaults() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../defaults")
    }

    #[test]
    fn load_valid_config() {
        let dir = scratch("valid");
        write_main(&dir, VALID_MAIN);
        let config = load_config_from(&dir, None).expect("should load");

        assert_eq!(config.server.bind, "127.0.0.1:3000");
        assert_eq!(config.server.bind_addr().unwrap().port(), 3000);
        assert_eq!(config.model.name, "gemini-2.5-flash-lite");
        assert_eq!(config.client.user_id, "local");
        assert_eq!(config.db_path, PathBuf::from("dukkho.db"));
        assert!(config.credentials.api_key().is_none());
    }

    #[test]
    fn shipped_defaults_are_valid() {
        let dir = scratch("shipped_defaults");
        fs::copy(
            workspace_defaults().join("dukkho.toml"),
            dir.join("config/dukkho.toml"),
        )
        .unwrap();
        let config = load_config_from(&dir, None).expect("defaults should load");
        assert_eq!(config.model.name, "gemini-2.5-flash-lite");
    }

    #[test]
    fn credentials_file_supplies_key() {
        let dir = scratch("creds");
        write_main(&dir, VALID_MAIN);
        fs::write(
            dir.join("config/credentials.toml"),
            "gemini_api_key = \"file-key\"\n",
        )
        .unwrap();
        let config = load_config_from(&dir, None).unwrap();
        assert_eq!(config.credentials.api_key(), Some("file-key"));
    }

    #[test]
    fn env_key_overrides_file() {
        let dir = scratch("env_override");
        write_main(&dir, VALID_MAIN);
        fs::write(
            dir.join("config/credentials.toml"),
            "gemini_api_key = \"file-key\"\n",
        )
        .unwrap();
        let config = load_config_from(&dir, Some("env-key".into())).unwrap();
        assert_eq!(config.credentials.api_key(), Some("env-key"));
    }

    #[test]
    fn empty_env_key_is_ignored() {
        let dir = scratch("env_empty");
        write_main(&dir, VALID_MAIN);
        let config = load_config_from(&dir, Some(String::new())).unwrap();
        assert!(config.credentials.api_key().is_none());
    }

    #[test]
    fn empty_key_in_file_counts_as_missing() {
        let dir = scratch("creds_empty");
        write_main(&dir, VALID_MAIN);
        fs::write(dir.join("config/credentials.toml"), "gemini_api_key = \"\"\n").unwrap();
        let config = load_config_from(&dir, None).unwrap();
        assert!(config.credentials.api_key().is_none());
    }

    #[test]
    fn debug_output_redacts_key() {
        let creds = CredentialsConfig {
            gemini_api_key: Some("secret-value".into()),
        };
        let shown = format!("{creds:?}");
        assert!(!shown.contains("secret-value"));
        assert!(shown.contains("redacted"));
    }

    #[test]
    fn missing_main_file_is_reported() {
        let dir = scratch("missing");
        match load_config_from(&dir, None) {
            Err(ConfigError::FileNotFound { path }) => {
                assert!(path.ends_with("dukkho.toml"));
            }
            other => panic!("expected FileNotFound, got {other:?}"),
        }
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let dir = scratch("malformed");
        write_main(&dir, "[server\nbind = ");
        assert!(matches!(
            load_config_from(&dir, None),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn bad_bind_address_fails_validation() {
        let dir = scratch("bad_bind");
        write_main(&dir, &VALID_MAIN.replace("127.0.0.1:3000\"", "localhost\""));
        match load_config_from(&dir, None) {
            Err(ConfigError::ValidationError { field, .. }) => assert_eq!(field, "server.bind"),
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    #[test]
    fn empty_user_id_fails_validation() {
        let dir = scratch("empty_user");
        write_main(&dir, &VALID_MAIN.replace("user_id = \"local\"", "user_id = \"\""));
        match load_config_from(&dir, None) {
            Err(ConfigError::ValidationError { field, .. }) => assert_eq!(field, "client.user_id"),
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    #[test]
    fn empty_db_path_uses_data_dir() {
        if directories::ProjectDirs::from("", "", "dukkho").is_none() {
            return; // no home directory in this environment
        }
        let dir = scratch("data_dir");
        write_main(&dir, &VALID_MAIN.replace("path = \"dukkho.db\"", "path = \"\""));
        let config = load_config_from(&dir, None).unwrap();
        assert!(config.db_path.ends_with("dukkho.db"));
        assert!(config.db_path.is_absolute());
    }

    #[test]
    fn ensure_config_files_copies_missing_and_skips_examples() {
        let dir = std::env::temp_dir().join("dukkho_config_ensure");
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(dir.join("defaults")).unwrap();
        fs::write(dir.join("defaults/dukkho.toml"), VALID_MAIN).unwrap();
        fs::write(dir.join("defaults/credentials.toml.example"), "").unwrap();

        let copied = ensure_config_files(&dir).unwrap();
        assert_eq!(copied.len(), 1);
        assert!(dir.join("config/dukkho.toml").exists());
        assert!(!dir.join("config/credentials.toml.example").exists());

        // Second run copies nothing and leaves edits alone.
        fs::write(dir.join("config/dukkho.toml"), "edited").unwrap();
        assert!(ensure_config_files(&dir).unwrap().is_empty());
        assert_eq!(
            fs::read_to_string(dir.join("config/dukkho.toml")).unwrap(),
            "edited"
        );
    }

    #[test]
    fn ensure_config_files_without_any_dir_errors() {
        let dir = std::env::temp_dir().join("dukkho_config_nothing");
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        assert!(matches!(
            ensure_config_files(&dir),
            Err(ConfigError::DefaultsCopyError { .. })
        ));
    }
}
