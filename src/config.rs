use crate::prelude::*;
use crate::solarmax::{Model, Tables};

use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Highest device address the two-digit header field can carry.
const MAX_INVERTER_ID: u8 = 99;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub buses: Vec<Bus>,

    #[serde(default = "Vec::new")]
    pub models: Vec<Model>,

    #[serde(default = "Config::default_poll_interval")]
    pub poll_interval: u64,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,
}

// Bus {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Bus {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    pub host: String,
    pub port: u16,
    pub inverters: Vec<u8>,

    pub connect_timeout: Option<u64>,
    pub read_timeout: Option<u64>,
    pub use_tcp_nodelay: Option<bool>,
    pub reconnect_delay_ms: Option<u64>,
    pub max_reconnect_delay_ms: Option<u64>,
}
impl Bus {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn inverters(&self) -> &[u8] {
        &self.inverters
    }

    pub fn connect_timeout(&self) -> u64 {
        self.connect_timeout.unwrap_or(2)
    }

    pub fn read_timeout(&self) -> u64 {
        self.read_timeout.unwrap_or(10)
    }

    pub fn use_tcp_nodelay(&self) -> bool {
        self.use_tcp_nodelay.unwrap_or(true)
    }

    pub fn reconnect_delay_ms(&self) -> u64 {
        self.reconnect_delay_ms.unwrap_or(1000)
    }

    pub fn max_reconnect_delay_ms(&self) -> u64 {
        self.max_reconnect_delay_ms.unwrap_or(60000)
    }

    pub fn settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            host: self.host.clone(),
            port: self.port,
            connect_timeout: Duration::from_secs(self.connect_timeout()),
            io_timeout: Duration::from_secs(self.read_timeout()),
            use_tcp_nodelay: self.use_tcp_nodelay(),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms()),
            max_reconnect_delay: Duration::from_millis(self.max_reconnect_delay_ms()),
        }
    }
} // }}}

#[derive(Clone, Debug)]
pub struct ConfigWrapper {
    config: Arc<Config>,
}

impl ConfigWrapper {
    pub fn new(file: &str) -> Result<Self> {
        Ok(Self::from_config(Config::new(file)?))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn buses(&self) -> &[Bus] {
        &self.config.buses
    }

    pub fn enabled_buses(&self) -> Vec<Bus> {
        self.buses().iter().filter(|b| b.enabled()).cloned().collect()
    }

    pub fn tables(&self) -> Tables {
        Tables::with_models(&self.config.models)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.config.poll_interval)
    }

    pub fn loglevel(&self) -> &str {
        &self.config.loglevel
    }
}

impl Config {
    /// Read and validate `file`. Nothing is logged, so this can run before
    /// the logger is set up; call `log_summary` afterwards.
    pub fn new(file: &str) -> Result<Self> {
        let content = std::fs::read_to_string(file)
            .map_err(|err| anyhow!("error reading {}: {}", file, err))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn log_summary(&self) {
        info!("Configuration loaded successfully:");
        info!(
            "  Buses: {} configured, {} enabled",
            self.buses.len(),
            self.buses.iter().filter(|b| b.enabled).count()
        );
        for (i, bus) in self.buses.iter().enumerate() {
            info!("    Bus[{}]:", i);
            info!("      Enabled: {}", bus.enabled);
            info!("      Host: {}", bus.host);
            info!("      Port: {}", bus.port);
            info!("      Inverters: {:?}", bus.inverters);
            info!("      Connect Timeout: {}s", bus.connect_timeout());
            info!("      Read Timeout: {}s", bus.read_timeout());
            info!("      TCP NoDelay: {}", bus.use_tcp_nodelay());
            info!(
                "      Reconnect Delay: {}ms (max {}ms)",
                bus.reconnect_delay_ms(),
                bus.max_reconnect_delay_ms()
            );
        }
        info!("  Extra Models: {}", self.models.len());
        info!("  Poll Interval: {}s", self.poll_interval);
        info!("  Log Level: {}", self.loglevel);
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval == 0 {
            bail!("poll_interval must be at least 1 second");
        }

        for (i, bus) in self.buses.iter().enumerate() {
            if !bus.enabled {
                continue;
            }
            if bus.port == 0 {
                bail!("buses[{}].port must be between 1 and 65535", i);
            }
            if bus.host.is_empty() {
                bail!("buses[{}].host cannot be empty", i);
            }
            if bus.connect_timeout() == 0 || bus.read_timeout() == 0 {
                bail!("buses[{}] timeouts must be at least 1 second", i);
            }
            if bus.inverters.is_empty() {
                bail!("buses[{}].inverters cannot be empty", i);
            }
            if let Some(id) = bus.inverters.iter().find(|id| **id > MAX_INVERTER_ID) {
                bail!("buses[{}]: inverter id {} is above {}", i, id, MAX_INVERTER_ID);
            }
            let unique: HashSet<_> = bus.inverters.iter().collect();
            if unique.len() != bus.inverters.len() {
                bail!("buses[{}].inverters contains duplicate ids", i);
            }
        }

        for model in &self.models {
            if model.description.is_empty() {
                bail!("model {} needs a description", model.type_code);
            }
        }

        Ok(())
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_poll_interval() -> u64 {
        60
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}
