// Error types shared by the library.
//
// Only operational failures live here. A user who is not in the team, a
// team that cannot be found and a wrong password are normal outcomes and
// are reported through `dispatch::Outcome` instead.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// The configuration could not be loaded. Raised before any network call.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Neither a username argument nor a piped credential was supplied.
    #[error("{0}")]
    Input(String),

    /// A call to the directory API failed.
    #[error("directory request failed: {0}")]
    Network(String),

    /// Writing keys to standard output failed.
    #[error("failed to write output: {0}")]
    Output(#[source] std::io::Error),
}

impl Error {
    pub fn input(message: impl Into<String>) -> Self {
        Error::Input(message.into())
    }

    pub fn network(message: impl Into<String>) -> Self {
        Error::Network(message.into())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Network(err.to_string())
    }
}

/// Problems with the configuration file or command-line overrides.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    ParseToml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid endpoint '{value}': {reason}")]
    InvalidEndpoint { value: String, reason: String },

    #[error("invalid --belongs value '{0}', expected ORGANIZATION/TEAM")]
    InvalidBelongs(String),
}

impl ConfigError {
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadFile {
            path: path.into(),
            source,
        }
    }

    pub fn parse_toml(path: impl Into<PathBuf>, source: toml::de::Error) -> Self {
        Self::ParseToml {
            path: path.into(),
            source,
        }
    }
}
