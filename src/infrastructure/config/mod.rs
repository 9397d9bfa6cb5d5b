//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use crate::application::errors::ConfigError;
use crate::domain::entities::UserPerm;

/// Host configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    pub bot: BotConfig,
    pub modules: ModulesConfig,
    pub switch: SwitchConfig,
    pub hub: HubConfig,
    pub requirements: RequirementsConfig,
    pub adapters: AdaptersConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BotConfig {
    pub name: String,
    /// Platform account the bot runs as
    pub account: String,
    /// Number assigned by the hub on registration
    pub num: Option<i64>,
    pub prefix: String,
    pub owners: Vec<String>,
    pub admins: Vec<String>,
    /// Groups that receive operator notices such as offline peers
    pub dev_group: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ModulesConfig {
    pub directory: PathBuf,
    /// Root entries starting with this are never treated as modules
    pub exclusion_prefix: String,
    pub cache_dir: String,
    pub activation_retries: u32,
    pub manager_pack: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SwitchConfig {
    /// Switch value of a module in a group that never set one
    pub default: bool,
    pub data_file: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct HubConfig {
    pub enabled: bool,
    pub url: String,
    /// Path of the endpoint table, relative to `url`
    pub meta: String,
    pub secret: Option<String>,
    pub heartbeat_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RequirementsConfig {
    /// Command line the requirement specifiers are appended to
    pub command: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AdaptersConfig {
    pub console: ConsoleConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    /// Account console input is attributed to
    pub user: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "modhub".to_string(),
            account: String::new(),
            num: None,
            prefix: ".plugin".to_string(),
            owners: Vec::new(),
            admins: Vec::new(),
            dev_group: Vec::new(),
        }
    }
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./modules"),
            exclusion_prefix: "_".to_string(),
            cache_dir: "__cache__".to_string(),
            activation_retries: 1,
            manager_pack: "module.manager".to_string(),
        }
    }
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            default: true,
            data_file: PathBuf::from("data/switch.json"),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "https://hub.example.org".to_string(),
            meta: "/api/meta".to_string(),
            secret: None,
            heartbeat_secs: 300,
        }
    }
}

impl Default for RequirementsConfig {
    fn default() -> Self {
        Self {
            command: "pip install".to_string(),
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            user: "console".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Parse(format!("Failed to read config: {}", e)))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse config: {}", e)))?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn load_env() -> Self {
        let mut config = Config::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Apply `MODHUB_*` overrides through `lookup`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(secret) = lookup("MODHUB_HUB_SECRET") {
            self.hub.secret = Some(secret);
        }
        if let Some(url) = lookup("MODHUB_HUB_URL") {
            self.hub.url = url;
        }
        if let Some(dir) = lookup("MODHUB_MODULE_DIR") {
            self.modules.directory = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bot.prefix.trim().is_empty() {
            return Err(ConfigError::MissingField("bot.prefix".to_string()));
        }
        if self.modules.cache_dir.is_empty() || !self.modules.cache_dir.starts_with(&self.modules.exclusion_prefix) {
            return Err(ConfigError::InvalidValue(format!(
                "modules.cache-dir '{}' must start with the exclusion prefix '{}'",
                self.modules.cache_dir, self.modules.exclusion_prefix
            )));
        }
        if self.hub.enabled && self.hub.secret.is_none() {
            return Err(ConfigError::MissingField("hub.secret".to_string()));
        }
        Ok(())
    }

    /// Permission tier of a platform user
    pub fn permission_of(&self, user_id: &str) -> UserPerm {
        if self.bot.owners.iter().any(|o| o == user_id) {
            UserPerm::BotOwner
        } else if self.bot.admins.iter().any(|a| a == user_id) {
            UserPerm::Administrator
        } else {
            UserPerm::Member
        }
    }

    /// Directory the install engine unpacks archives into
    pub fn cache_path(&self) -> PathBuf {
        self.modules.directory.join(&self.modules.cache_dir)
    }
}
