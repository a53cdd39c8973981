use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::presets::Preset;

/// Application configuration, stored in `~/.standup.toml`
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Config {
    /// Device id of the desk the menu and hotkeys act on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_desk: Option<String>,
    /// General behaviour toggles
    #[serde(default)]
    pub general: GeneralConfig,
    /// Global hotkey combinations
    #[serde(default)]
    pub hotkeys: HotkeyConfig,
    /// Log output
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Known desks, in menu order
    #[serde(default)]
    pub desks: Vec<DeskConfig>,
}

/// General behaviour toggles
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct GeneralConfig {
    /// Install a launch agent so the app starts at login
    #[serde(default = "default_true")]
    pub launch_at_login: bool,
    /// Show a notification when the desk starts moving to a preset
    #[serde(default = "default_true")]
    pub notifications: bool,
}

/// Global hotkey combinations
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct HotkeyConfig {
    /// Register hotkeys at all
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Combination that raises the desk to the next preset
    #[serde(default = "KeyComboConfig::default_raise")]
    pub raise: KeyComboConfig,
    /// Combination that lowers the desk to the next preset
    #[serde(default = "KeyComboConfig::default_lower")]
    pub lower: KeyComboConfig,
    /// Modifiers held together with a digit to jump to preset 1-9
    #[serde(default = "default_preset_modifiers")]
    pub preset_modifiers: Vec<String>,
}

/// One key combination, e.g. `Command+Shift+Up`
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct KeyComboConfig {
    /// Modifier names (`Control`, `Option`, `Command`, `Shift`)
    pub modifiers: Vec<String>,
    /// Key name (`A`-`Z`, `0`-`9`, `Up`, `Down`, `Left`, `Right`, `Space`)
    pub key: String,
}

/// Log output
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Log to a file instead of stdout
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Log file location, `~/` is expanded
    #[serde(default = "default_log_path")]
    pub log_path: String,
}

/// A desk controller reachable through the Particle cloud
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct DeskConfig {
    /// Name shown in the menu and notifications
    pub name: String,
    /// Particle device id
    #[serde(default)]
    pub device_id: String,
    /// Particle access token
    #[serde(default)]
    pub access_token: String,
    /// Height below which the desk counts as sitting, in cm
    #[serde(default = "default_sitting_height")]
    pub sitting_height: u32,
    /// Height above which the desk counts as standing, in cm
    #[serde(default = "default_standing_height")]
    pub standing_height: u32,
    /// Height presets in user order
    #[serde(default)]
    pub presets: Vec<Preset>,
}

/// Credentials needed to talk to a desk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Auth {
    /// Particle access token
    pub access_token: String,
    /// Particle device id
    pub device_id: String,
}

const fn default_true() -> bool {
    true
}

const fn default_sitting_height() -> u32 {
    60
}

const fn default_standing_height() -> u32 {
    100
}

fn default_log_path() -> String {
    "~/.standup/standup.log".to_owned()
}

fn default_preset_modifiers() -> Vec<String> {
    vec!["Control".to_owned(), "Shift".to_owned()]
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            launch_at_login: true,
            notifications: true,
        }
    }
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            raise: KeyComboConfig::default_raise(),
            lower: KeyComboConfig::default_lower(),
            preset_modifiers: default_preset_modifiers(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_path: default_log_path(),
        }
    }
}

impl KeyComboConfig {
    fn default_raise() -> Self {
        Self {
            modifiers: vec!["Command".to_owned(), "Shift".to_owned()],
            key: "Up".to_owned(),
        }
    }

    fn default_lower() -> Self {
        Self {
            modifiers: vec!["Command".to_owned(), "Shift".to_owned()],
            key: "Down".to_owned(),
        }
    }
}

impl DeskConfig {
    /// Credentials, if both the token and the device id are set
    #[must_use]
    pub fn auth(&self) -> Option<Auth> {
        let access_token = self.access_token.trim();
        let device_id = self.device_id.trim();
        if access_token.is_empty() || device_id.is_empty() {
            return None;
        }
        Some(Auth {
            access_token: access_token.to_owned(),
            device_id: device_id.to_owned(),
        })
    }
}

/// Contents written on first run
pub const DEFAULT_CONFIG: &str = r#"# Device id of the desk the menu and hotkeys act on (first desk if unset)
# active_desk = ""

[general]
launch_at_login = true
notifications = true

[hotkeys]
enabled = true
preset_modifiers = ["Control", "Shift"]
raise = { modifiers = ["Command", "Shift"], key = "Up" }
lower = { modifiers = ["Command", "Shift"], key = "Down" }

[telemetry]
enabled = true
log_path = "~/.standup/standup.log"

# Fill in the Particle device id and access token of your desk controller
[[desks]]
name = "Desk"
device_id = ""
access_token = ""
sitting_height = 60
standing_height = 100
presets = [
    { name = "Sitting", height = 60 },
    { name = "Standing", height = 100 },
]
"#;

impl Config {
    /// Load config from ~/.standup.toml, creating it on first run
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            Self::create_default(&config_path).context("failed to create default config")?;
        }

        Self::load_from(&config_path)
    }

    /// Load config from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        let config: Self = toml::from_str(&contents).context("failed to parse config TOML")?;

        Ok(config)
    }

    /// Write config to an explicit path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("failed to write config file {}", path.display()))?;
        tracing::debug!(path = %path.display(), "config saved");
        Ok(())
    }

    /// Location of the config file
    pub fn config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME").context("HOME environment variable not set")?;
        Ok(PathBuf::from(home).join(".standup.toml"))
    }

    fn create_default(path: &Path) -> Result<()> {
        fs::write(path, DEFAULT_CONFIG).context("failed to write default config")?;
        Ok(())
    }

    /// The desk selected by `active_desk`, falling back to the first desk
    #[must_use]
    pub fn active_desk(&self) -> Option<&DeskConfig> {
        self.active_desk
            .as_deref()
            .and_then(|id| self.desks.iter().find(|desk| desk.device_id == id))
            .or_else(|| self.desks.first())
    }

    /// Select the desk with the given device id
    ///
    /// Returns false if no such desk is configured.
    pub fn set_active_desk(&mut self, device_id: &str) -> bool {
        if self.desks.iter().any(|desk| desk.device_id == device_id) {
            self.active_desk = Some(device_id.to_owned());
            true
        } else {
            false
        }
    }

    /// Expand ~ in paths to home directory
    pub fn expand_path(path: &str) -> Result<PathBuf> {
        if let Some(stripped) = path.strip_prefix("~/") {
            let home = std::env::var("HOME").context("HOME environment variable not set")?;
            Ok(PathBuf::from(home).join(stripped))
        } else {
            Ok(PathBuf::from(path))
        }
    }
}
