//! Server settings read from the environment.

use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use bridge_core::SpiConfig;
use thiserror::Error;

/// Environment variable holding the TCP port to listen on.
pub const PORT_VAR: &str = "SPI_BRIDGE_PORT";

/// Environment variable holding the address to bind.
pub const BIND_VAR: &str = "SPI_BRIDGE_BIND";

/// Environment variable holding the `env_logger` filter.
pub const LOG_VAR: &str = "SPI_BRIDGE_LOG";

/// Port used when [`PORT_VAR`] is unset.
pub const DEFAULT_PORT: u16 = 7170;

/// Address bound when [`BIND_VAR`] is unset. Loopback only.
pub const DEFAULT_BIND: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Invalid environment values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The port variable is not a number in `0..=65535`.
    #[error("{PORT_VAR}={value:?} is not a valid port")]
    InvalidPort {
        /// Raw value.
        value: String,
    },
    /// The bind variable is not an IP address.
    #[error("{BIND_VAR}={value:?} is not a valid IP address")]
    InvalidBind {
        /// Raw value.
        value: String,
    },
}

/// Listening socket and serial adapter settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind.
    pub bind: IpAddr,
    /// Port to listen on; `0` lets the OS pick.
    pub port: u16,
    /// Serial adapter configuration shared by every session.
    pub spi: SpiConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND,
            port: DEFAULT_PORT,
            spi: SpiConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Reads [`PORT_VAR`] and [`BIND_VAR`] from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a variable is set but malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup.
    ///
    /// Empty values count as unset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a variable is set but malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let set = |name: &str| lookup(name).filter(|value: &String| !value.trim().is_empty());

        if let Some(value) = set(PORT_VAR) {
            config.port = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidPort { value })?;
        }
        if let Some(value) = set(BIND_VAR) {
            config.bind = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidBind { value })?;
        }
        Ok(config)
    }

    /// Socket address to bind.
    #[must_use]
    pub const fn address(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::{ConfigError, ServerConfig, BIND_VAR, DEFAULT_PORT, PORT_VAR};

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| {
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value).to_string())
        }
    }

    #[test]
    fn unset_variables_fall_back_to_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).expect("defaults");
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.address().to_string(), "127.0.0.1:7170");
    }

    #[test]
    fn port_and_bind_are_read_from_variables() {
        let config =
            ServerConfig::from_lookup(lookup(&[(PORT_VAR, " 9000 "), (BIND_VAR, "0.0.0.0")]))
                .expect("valid values");
        assert_eq!(config.port, 9000);
        assert_eq!(config.bind, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }

    #[test]
    fn empty_port_counts_as_unset() {
        let config = ServerConfig::from_lookup(lookup(&[(PORT_VAR, "")])).expect("empty is unset");
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert_eq!(
            ServerConfig::from_lookup(lookup(&[(PORT_VAR, "70000")])),
            Err(ConfigError::InvalidPort {
                value: "70000".to_string()
            })
        );
        assert_eq!(
            ServerConfig::from_lookup(lookup(&[(BIND_VAR, "localhost")])),
            Err(ConfigError::InvalidBind {
                value: "localhost".to_string()
            })
        );
    }
}
