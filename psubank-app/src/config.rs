use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use psubank::{
    ChannelConfig, DecodeLevel, LocalConfig, RemoteConfig, Roster, RosterError, TickRate,
};
use serde::Deserialize;

const DEFAULT_TCP_PORT: u16 = 502;

/// Errors that prevent the program from starting
#[derive(Debug, thiserror::Error)]
pub(crate) enum ConfigError {
    #[error("unable to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid configuration file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("tick rate {0} is outside 1..={max}", max = TickRate::MAX)]
    TickRate(u8),
    #[error("remote mode requires a server_address")]
    MissingServerAddress,
    #[error("invalid channel roster: {0}")]
    Roster(#[from] RosterError),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ModeSetting {
    Local,
    Remote,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChannelSetting {
    id: u8,
    port: String,
    #[serde(default)]
    description: String,
}

/// Contents of the configuration file
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct FileConfig {
    mode: ModeSetting,
    #[serde(default = "default_tcp_port")]
    tcp_port: u16,
    #[serde(default)]
    server_address: Option<IpAddr>,
    #[serde(default = "default_tick_rate")]
    tick_rate: u8,
    #[serde(default, rename = "channel")]
    channels: Vec<ChannelSetting>,
}

/// Validated settings for one of the two modes
#[derive(Clone, Debug)]
pub(crate) enum Setup {
    Local(LocalConfig),
    Remote(RemoteConfig),
}

fn default_tcp_port() -> u16 {
    DEFAULT_TCP_PORT
}

fn default_tick_rate() -> u8 {
    TickRate::default().get()
}

impl FileConfig {
    pub(crate) fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::parse(&text)
    }

    pub(crate) fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub(crate) fn into_setup(self, decode: DecodeLevel) -> Result<Setup, ConfigError> {
        let tick_rate = TickRate::new(self.tick_rate).ok_or(ConfigError::TickRate(self.tick_rate))?;

        match self.mode {
            ModeSetting::Local => {
                let channels = self
                    .channels
                    .into_iter()
                    .map(|x| ChannelConfig {
                        id: x.id,
                        port: x.port,
                        description: x.description,
                    })
                    .collect();
                Ok(Setup::Local(LocalConfig {
                    roster: Roster::new(channels)?,
                    listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.tcp_port),
                    tick_rate,
                    decode,
                }))
            }
            ModeSetting::Remote => {
                if !self.channels.is_empty() {
                    tracing::warn!("remote mode learns its channels from the server, ignoring the roster");
                }
                let address = self.server_address.ok_or(ConfigError::MissingServerAddress)?;
                Ok(Setup::Remote(RemoteConfig {
                    server: SocketAddr::new(address, self.tcp_port),
                    tick_rate,
                    decode,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL: &str = r#"
mode = "local"
tcp_port = 1502

[[channel]]
id = 1
port = "/dev/ttyUSB0"
description = "Magnet 1"

[[channel]]
id = 2
port = "/dev/ttyUSB1"
"#;

    #[test]
    fn parses_a_local_configuration() {
        let setup = FileConfig::parse(LOCAL)
            .unwrap()
            .into_setup(DecodeLevel::nothing())
            .unwrap();

        let config = match setup {
            Setup::Local(config) => config,
            Setup::Remote(_) => panic!("expected local mode"),
        };
        assert_eq!(config.listen.port(), 1502);
        assert_eq!(config.tick_rate, TickRate::default());
        assert_eq!(config.roster.channels().len(), 2);
        assert_eq!(config.roster.channels()[0].description, "Magnet 1");
        assert_eq!(config.roster.channels()[1].description, "");
    }

    #[test]
    fn parses_a_remote_configuration() {
        let text = "mode = \"remote\"\nserver_address = \"10.0.0.7\"\ntick_rate = 8\n";
        let setup = FileConfig::parse(text)
            .unwrap()
            .into_setup(DecodeLevel::nothing())
            .unwrap();

        let config = match setup {
            Setup::Remote(config) => config,
            Setup::Local(_) => panic!("expected remote mode"),
        };
        assert_eq!(config.server, "10.0.0.7:502".parse().unwrap());
        assert_eq!(config.tick_rate.get(), 8);
    }

    #[test]
    fn remote_mode_needs_an_address() {
        let result = FileConfig::parse("mode = \"remote\"")
            .unwrap()
            .into_setup(DecodeLevel::nothing());
        assert!(matches!(result, Err(ConfigError::MissingServerAddress)));
    }

    #[test]
    fn tick_rate_is_bounded() {
        let result = FileConfig::parse("mode = \"remote\"\nserver_address = \"::1\"\ntick_rate = 0")
            .unwrap()
            .into_setup(DecodeLevel::nothing());
        assert!(matches!(result, Err(ConfigError::TickRate(0))));
    }

    #[test]
    fn local_mode_needs_channels() {
        let result = FileConfig::parse("mode = \"local\"")
            .unwrap()
            .into_setup(DecodeLevel::nothing());
        assert!(matches!(
            result,
            Err(ConfigError::Roster(RosterError::NoChannels))
        ));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            FileConfig::parse("mode = \"local\"\nbaud = 9600"),
            Err(ConfigError::Parse(_))
        ));
    }
}
