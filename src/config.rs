use crate::prelude::*;

use serde::Deserialize;
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub mqtt: Mqtt,

    #[serde(default)]
    pub home_assistant: HomeAssistant,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,

    /// Drop frames with a bad CRC trailer instead of decoding them with a
    /// warning.
    #[serde(default)]
    pub strict_crc: bool,

    /// Treat incoming frames as recorded dumps, which carry their message
    /// type at a different offset than live traffic.
    #[serde(default)]
    pub replay_mode: bool,

    /// Directory with `{neo,noah,nexa}.json` register catalogs overriding
    /// the embedded ones.
    pub registers_dir: Option<String>,
}

// Mqtt {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Mqtt {
    pub host: String,
    #[serde(default = "Mqtt::default_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "Mqtt::default_client_id")]
    pub client_id: String,
}

impl Mqtt {
    fn default_port() -> u16 {
        1883
    }

    fn default_client_id() -> String {
        "growatt-bridge".to_string()
    }
} // }}}

// HomeAssistant {{{
#[derive(Clone, Debug, Deserialize)]
pub struct HomeAssistant {
    #[serde(default = "HomeAssistant::default_enabled")]
    pub enabled: bool,
    #[serde(default = "HomeAssistant::default_prefix")]
    pub prefix: String,
}

impl Default for HomeAssistant {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            prefix: Self::default_prefix(),
        }
    }
}

impl HomeAssistant {
    fn default_enabled() -> bool {
        true
    }

    fn default_prefix() -> String {
        "homeassistant".to_string()
    }
} // }}}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("error reading {}: {}", file, err))?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}

pub struct ConfigWrapper {
    config: Arc<Mutex<Config>>,
}

impl Clone for ConfigWrapper {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
        }
    }
}

impl ConfigWrapper {
    pub fn new(file: String) -> Result<Self> {
        let config = Config::new(file)?;
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
        }
    }

    pub fn mqtt(&self) -> Mqtt {
        self.config.lock().unwrap().mqtt.clone()
    }

    pub fn home_assistant(&self) -> HomeAssistant {
        self.config.lock().unwrap().home_assistant.clone()
    }

    pub fn loglevel(&self) -> String {
        self.config.lock().unwrap().loglevel.clone()
    }

    pub fn strict_crc(&self) -> bool {
        self.config.lock().unwrap().strict_crc
    }

    pub fn replay_mode(&self) -> bool {
        self.config.lock().unwrap().replay_mode
    }

    pub fn registers_dir(&self) -> Option<String> {
        self.config.lock().unwrap().registers_dir.clone()
    }
}
