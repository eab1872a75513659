use std::{fs, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::cli::GlobalArgs;
use crate::view::ViewSettings;

/// Runtime configuration resolved from CLI, environment, file and defaults.
#[derive(Clone, Debug)]
pub struct Config {
    /// The signed-in user.
    pub user_id: Option<String>,
    /// How long a remote typing indicator survives without a refresh.
    pub typing_timeout: Duration,
    /// Minimum gap between our own typing emits.
    pub typing_debounce: Duration,
    pub page_size: u32,
    /// How long a loaded list counts as fresh.
    pub refresh_ttl: Duration,
    pub cloud_name: Option<String>,
    pub logging_enabled: bool,
    /// The file the values were read from, if any.
    pub source: Option<PathBuf>,
}

#[derive(Serialize, Deserialize, Default)]
struct FileConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(default)]
    typing: FileTyping,
    #[serde(default)]
    pagination: FilePagination,
    #[serde(default)]
    cache: FileCache,
    #[serde(default)]
    media: FileMedia,
    #[serde(default)]
    logging: FileLogging,
}

#[derive(Serialize, Deserialize)]
struct FileTyping {
    #[serde(default = "default_typing_timeout_ms")]
    timeout_ms: u64,
    #[serde(default = "default_typing_debounce_ms")]
    debounce_ms: u64,
}

#[derive(Serialize, Deserialize)]
struct FilePagination {
    #[serde(default = "default_page_size")]
    page_size: u32,
}

#[derive(Serialize, Deserialize)]
struct FileCache {
    #[serde(default = "default_refresh_ttl_secs")]
    refresh_ttl_secs: u64,
}

#[derive(Serialize, Deserialize, Default)]
struct FileMedia {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cloud_name: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct FileLogging {
    #[serde(default = "default_logging")]
    enabled: bool,
}

fn default_typing_timeout_ms() -> u64 {
    3000
}

fn default_typing_debounce_ms() -> u64 {
    2000
}

fn default_page_size() -> u32 {
    20
}

fn default_refresh_ttl_secs() -> u64 {
    30
}

fn default_logging() -> bool {
    true
}

impl Default for FileTyping {
    fn default() -> Self {
        Self {
            timeout_ms: default_typing_timeout_ms(),
            debounce_ms: default_typing_debounce_ms(),
        }
    }
}

impl Default for FilePagination {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

impl Default for FileCache {
    fn default() -> Self {
        Self {
            refresh_ttl_secs: default_refresh_ttl_secs(),
        }
    }
}

impl Default for FileLogging {
    fn default() -> Self {
        Self {
            enabled: default_logging(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Config file path precedence: CLI -> ENV -> ./config/inbox.toml -> platform config dir.
fn config_path(args: &GlobalArgs) -> Option<PathBuf> {
    if let Some(path) = args
        .config
        .clone()
        .or_else(|| std::env::var("INBOX_CONFIG").ok().map(PathBuf::from))
    {
        return Some(path);
    }
    let local = PathBuf::from("config/inbox.toml");
    if local.exists() {
        return Some(local);
    }
    ProjectDirs::from("", "", "inbox").map(|dirs| dirs.config_dir().join("inbox.toml"))
}

impl Config {
    /// Resolve configuration from CLI, environment variables, config file and defaults.
    pub fn load(args: &GlobalArgs) -> Result<Self> {
        let mut file_cfg = FileConfig::default();
        let mut source = None;

        if let Some(path) = config_path(args) {
            if let Ok(bytes) = fs::read(&path) {
                let contents = String::from_utf8_lossy(&bytes);
                file_cfg = toml::from_str(&contents)
                    .with_context(|| format!("invalid config file {}", path.display()))?;
                source = Some(path);
            }
        }

        let mut user_id = file_cfg.user_id;
        let mut page_size = file_cfg.pagination.page_size;
        let mut typing_timeout_ms = file_cfg.typing.timeout_ms;
        let mut logging = file_cfg.logging.enabled;

        // environment overrides
        if let Ok(id) = std::env::var("INBOX_USER_ID") {
            user_id = Some(id);
        }
        if let Some(size) = env_parse::<u32>("INBOX_PAGE_SIZE") {
            page_size = size;
        }
        if let Some(ms) = env_parse::<u64>("INBOX_TYPING_TIMEOUT_MS") {
            typing_timeout_ms = ms;
        }
        if let Some(l) = env_parse::<bool>("INBOX_LOGGING") {
            logging = l;
        }

        // CLI overrides
        if let Some(id) = &args.user_id {
            user_id = Some(id.clone());
        }
        if let Some(size) = args.page_size {
            page_size = size;
        }
        if let Some(l) = args.logging {
            logging = l;
        }

        if !(1..=200).contains(&page_size) {
            anyhow::bail!("invalid_page_size");
        }
        if typing_timeout_ms == 0 {
            anyhow::bail!("invalid_typing_timeout");
        }

        Ok(Self {
            user_id: user_id.filter(|id| !id.trim().is_empty()),
            typing_timeout: Duration::from_millis(typing_timeout_ms),
            typing_debounce: Duration::from_millis(file_cfg.typing.debounce_ms),
            page_size,
            refresh_ttl: Duration::from_secs(file_cfg.cache.refresh_ttl_secs),
            cloud_name: file_cfg.media.cloud_name,
            logging_enabled: logging,
            source,
        })
    }

    /// Settings for a messaging view; fails when no user is configured.
    pub fn view_settings(&self) -> Result<ViewSettings> {
        let user_id = self
            .user_id
            .clone()
            .context("no user id configured (set user_id, INBOX_USER_ID or --user-id)")?;
        Ok(ViewSettings {
            user_id,
            page_size: self.page_size,
            typing_timeout: self.typing_timeout,
            typing_debounce: self.typing_debounce,
            refresh_ttl: self.refresh_ttl,
        })
    }

    /// The resolved values in config file form.
    pub fn to_toml(&self) -> Result<String> {
        let file_cfg = FileConfig {
            user_id: self.user_id.clone(),
            typing: FileTyping {
                timeout_ms: self.typing_timeout.as_millis() as u64,
                debounce_ms: self.typing_debounce.as_millis() as u64,
            },
            pagination: FilePagination {
                page_size: self.page_size,
            },
            cache: FileCache {
                refresh_ttl_secs: self.refresh_ttl.as_secs(),
            },
            media: FileMedia {
                cloud_name: self.cloud_name.clone(),
            },
            logging: FileLogging {
                enabled: self.logging_enabled,
            },
        };
        toml::to_string_pretty(&file_cfg).context("serialize config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    fn clear_env() {
        for name in [
            "INBOX_CONFIG",
            "INBOX_USER_ID",
            "INBOX_PAGE_SIZE",
            "INBOX_TYPING_TIMEOUT_MS",
            "INBOX_LOGGING",
        ] {
            std::env::remove_var(name);
        }
    }

    fn args_for(contents: &str) -> (tempfile::TempDir, GlobalArgs) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inbox.toml");
        fs::write(&path, contents).unwrap();
        let args = GlobalArgs {
            config: Some(path),
            ..Default::default()
        };
        (dir, args)
    }

    #[test]
    #[serial]
    fn valid_config_parses() {
        clear_env();
        let (_dir, args) = args_for(
            "user_id = \"u1\"\n[typing]\ntimeout_ms = 5000\n[pagination]\npage_size = 50\n[media]\ncloud_name = \"demo\"\n[logging]\nenabled = false\n",
        );
        let cfg = Config::load(&args).unwrap();
        assert_eq!(cfg.user_id.as_deref(), Some("u1"));
        assert_eq!(cfg.typing_timeout, Duration::from_millis(5000));
        assert_eq!(cfg.page_size, 50);
        assert_eq!(cfg.cloud_name.as_deref(), Some("demo"));
        assert!(!cfg.logging_enabled);
        assert!(cfg.source.is_some());
    }

    #[test]
    #[serial]
    fn missing_keys_defaults() {
        clear_env();
        let (_dir, args) = args_for("");
        let cfg = Config::load(&args).unwrap();
        assert_eq!(cfg.user_id, None);
        assert_eq!(cfg.typing_timeout, Duration::from_secs(3));
        assert_eq!(cfg.typing_debounce, Duration::from_secs(2));
        assert_eq!(cfg.page_size, 20);
        assert_eq!(cfg.refresh_ttl, Duration::from_secs(30));
        assert!(cfg.logging_enabled);
        assert!(cfg.view_settings().is_err());
    }

    #[test]
    #[serial]
    fn invalid_page_size_fails() {
        clear_env();
        let (_dir, args) = args_for("[pagination]\npage_size = 0\n");
        assert!(Config::load(&args).is_err());
        let (_dir, args) = args_for("[pagination]\npage_size = 500\n");
        assert!(Config::load(&args).is_err());
    }

    #[test]
    #[serial]
    fn zero_typing_timeout_fails() {
        clear_env();
        let (_dir, args) = args_for("[typing]\ntimeout_ms = 0\n");
        assert!(Config::load(&args).is_err());
    }

    #[test]
    #[serial]
    fn precedence_cli_env_file() {
        clear_env();
        let (_dir, mut args) = args_for("user_id = \"file\"\n[pagination]\npage_size = 10\n");
        std::env::set_var("INBOX_USER_ID", "env");
        std::env::set_var("INBOX_PAGE_SIZE", "30");
        let cfg = Config::load(&args).unwrap();
        assert_eq!(cfg.user_id.as_deref(), Some("env"));
        assert_eq!(cfg.page_size, 30);

        args.user_id = Some("cli".into());
        args.page_size = Some(40);
        let cfg = Config::load(&args).unwrap();
        assert_eq!(cfg.user_id.as_deref(), Some("cli"));
        assert_eq!(cfg.page_size, 40);
        clear_env();
    }

    #[test]
    #[serial]
    fn env_selects_config_file() {
        clear_env();
        let (_dir, args) = args_for("user_id = \"from-env-path\"\n");
        std::env::set_var("INBOX_CONFIG", args.config.clone().unwrap());
        let cfg = Config::load(&GlobalArgs::default()).unwrap();
        assert_eq!(cfg.user_id.as_deref(), Some("from-env-path"));
        clear_env();
    }

    #[test]
    #[serial]
    fn invalid_toml_is_reported() {
        clear_env();
        let (_dir, args) = args_for("[pagination\n");
        assert!(Config::load(&args).is_err());
    }

    #[test]
    #[serial]
    fn resolved_config_round_trips_through_toml() {
        clear_env();
        let (_dir, args) = args_for("user_id = \"u1\"\n[cache]\nrefresh_ttl_secs = 5\n");
        let cfg = Config::load(&args).unwrap();
        let text = cfg.to_toml().unwrap();
        let (_dir2, again) = args_for(&text);
        let reloaded = Config::load(&again).unwrap();
        assert_eq!(reloaded.refresh_ttl, Duration::from_secs(5));
        assert_eq!(reloaded.user_id.as_deref(), Some("u1"));
        assert_eq!(reloaded.view_settings().unwrap().user_id, "u1");
    }
}
