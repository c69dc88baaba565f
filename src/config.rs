// Configuration module: loads the TOML config file and merges the
// command-line overrides on top of it.
//
// The result is a `Config` value that is built once in `main` and then
// only borrowed by the directory client and the authorization engine.

use crate::error::ConfigError;
use reqwest::Url;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Where the config file is looked up when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/octopass.conf";

/// Public GitHub API, used when no endpoint override is configured.
pub const DEFAULT_ENDPOINT: &str = "https://api.github.com/";

/// Raw shape of the config file. Every key is optional and unknown keys
/// are ignored, so an older or newer file still loads. The capitalized
/// names are the keys of existing `/etc/octopass.conf` files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    #[serde(alias = "Endpoint")]
    pub endpoint: String,
    #[serde(alias = "Token")]
    pub token: String,
    #[serde(alias = "Organization")]
    pub organization: String,
    #[serde(alias = "Team")]
    pub team: String,
    #[serde(alias = "Syslog")]
    pub syslog: bool,
    #[serde(alias = "MembershipCheck")]
    pub membership_check: bool,
}

impl FileConfig {
    /// Read and parse a config file. A missing file is an error here; the
    /// caller decides whether the path was optional.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        Self::parse(path, &content)
    }

    fn parse(path: &Path, content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::parse_toml(path, e))
    }
}

/// Values given on the command line. Empty strings and `false` mean
/// "not given".
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub endpoint: Option<String>,
    pub token: Option<String>,
    pub organization: Option<String>,
    pub team: Option<String>,
    pub syslog: bool,
    pub membership_check: bool,
}

impl Overrides {
    /// Apply an `ORGANIZATION/TEAM` pair. Naming a team this way also turns
    /// the membership check on.
    pub fn belongs(mut self, value: &str) -> Result<Self, ConfigError> {
        let (org, team) = value
            .split_once('/')
            .filter(|(org, team)| !org.is_empty() && !team.is_empty() && !team.contains('/'))
            .ok_or_else(|| ConfigError::InvalidBelongs(value.to_string()))?;
        self.organization = Some(org.to_string());
        self.team = Some(team.to_string());
        self.membership_check = true;
        Ok(self)
    }
}

/// Resolved settings for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Base URL override, always ending in `/`. `None` means the public API.
    pub endpoint: Option<Url>,
    pub token: String,
    pub organization: String,
    pub team: String,
    pub syslog: bool,
    pub membership_check: bool,
}

impl Config {
    /// Load the config file and merge `overrides` on top.
    ///
    /// An explicit `path` must exist. Without one, `DEFAULT_CONFIG_PATH` is
    /// read only if it is present, so the tool also works from flags alone.
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => FileConfig::from_path(path)?,
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    FileConfig::from_path(&default)?
                } else {
                    FileConfig::default()
                }
            }
        };
        Self::resolve(file, overrides)
    }

    /// Merge field by field, command line first.
    ///
    /// Strings override when non-empty. Booleans override only when they
    /// differ from their default (`false`), so a flag can switch a setting
    /// on but cannot switch off what the file turned on.
    pub fn resolve(file: FileConfig, overrides: &Overrides) -> Result<Self, ConfigError> {
        let pick = |cli: &Option<String>, file: String| match cli {
            Some(v) if !v.is_empty() => v.clone(),
            _ => file,
        };

        let endpoint = pick(&overrides.endpoint, file.endpoint);
        let endpoint = if endpoint.is_empty() {
            None
        } else {
            Some(parse_endpoint(&endpoint)?)
        };

        Ok(Config {
            endpoint,
            token: pick(&overrides.token, file.token),
            organization: pick(&overrides.organization, file.organization),
            team: pick(&overrides.team, file.team),
            syslog: if overrides.syslog { true } else { file.syslog },
            membership_check: if overrides.membership_check {
                true
            } else {
                file.membership_check
            },
        })
    }

    /// The membership gate runs only with an organization, a team and the
    /// check switched on.
    pub fn is_membership_gate_active(&self) -> bool {
        !self.organization.is_empty() && !self.team.is_empty() && self.membership_check
    }
}

/// Parse an endpoint override into an absolute http(s) base URL with a
/// trailing slash, so relative API paths join under it.
pub fn parse_endpoint(value: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidEndpoint {
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let mut url = Url::parse(value).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(invalid("not an absolute base URL"));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
