// Authorization engine: the decisions octopass makes on top of the
// directory. It never talks to the network itself, everything goes through
// a `DirectoryClient`, which keeps it testable with `MemoryDirectory`.

use crate::config::Config;
use crate::directory::{DirectoryClient, KeySet, TeamId};
use crate::error::Result;
use tracing::{info, warn};

/// Result of resolving the configured team name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamLookup {
    Found(TeamId),
    NotFound,
}

/// Result of a membership check. A missing team denies like a non-member
/// but is kept apart so it can be logged as a misconfiguration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Member,
    NotMember,
    TeamNotFound,
}

pub struct Authorizer<'a, D> {
    config: &'a Config,
    directory: D,
}

impl<'a, D: DirectoryClient> Authorizer<'a, D> {
    pub fn new(config: &'a Config, directory: D) -> Self {
        Authorizer { config, directory }
    }

    pub fn config(&self) -> &Config {
        self.config
    }

    pub fn is_membership_gate_active(&self) -> bool {
        self.config.is_membership_gate_active()
    }

    /// Find the configured team in the organization by exact,
    /// case-sensitive name.
    pub fn find_team(&self) -> Result<TeamLookup> {
        let teams = self.directory.list_teams(&self.config.organization)?;
        Ok(teams
            .iter()
            .find(|t| t.name == self.config.team)
            .map_or(TeamLookup::NotFound, |t| TeamLookup::Found(t.id)))
    }

    pub fn membership(&self, username: &str) -> Result<Membership> {
        let (org, team) = (&self.config.organization, &self.config.team);

        let team_id = match self.find_team()? {
            TeamLookup::Found(id) => id,
            TeamLookup::NotFound => {
                warn!("\"{org}/{team}\" does not exist on the directory");
                return Ok(Membership::TeamNotFound);
            }
        };

        if self.directory.is_team_member(team_id, username)? {
            info!("\"{org}/{team}\" includes: {username}");
            Ok(Membership::Member)
        } else {
            info!("\"{org}/{team}\" does not include: {username}");
            Ok(Membership::NotMember)
        }
    }

    /// Whether `username` belongs to the configured team. A team that does
    /// not exist yields `false`.
    pub fn is_member(&self, username: &str) -> Result<bool> {
        Ok(self.membership(username)? == Membership::Member)
    }

    pub fn get_user_keys(&self, username: &str) -> Result<KeySet> {
        self.directory.list_public_keys(username)
    }

    /// Validate a username/password pair, both trimmed of surrounding
    /// whitespace. An empty password is still sent to the directory.
    pub fn is_basic_authorized(&self, username: &str, password: &str) -> Result<bool> {
        let username = username.trim();
        let ok = self
            .directory
            .validate_credentials(username, password.trim())?;
        if ok {
            info!("passed basic authentication user: {username}");
        } else {
            info!("failed basic authentication user: {username}");
        }
        Ok(ok)
    }
}
