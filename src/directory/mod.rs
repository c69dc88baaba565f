// Directory module: the seam between the authorization logic and the
// remote identity-and-teams API.
//
// - `github`: the real client, talking to api.github.com or a GitHub
//   Enterprise endpoint over HTTPS.
// - `memory`: an in-memory directory with call counters, used by the
//   tests to drive the engine and dispatcher without a network.

pub mod github;
pub mod memory;

pub use github::GitHubClient;
pub use memory::{Calls, MemoryDirectory, Operation};

use crate::error::Result;
use serde::Deserialize;

/// Public keys of one user, in the order the directory returned them.
pub type KeySet = Vec<String>;

/// Opaque identifier the directory assigns to a team.
pub type TeamId = u64;

/// A team within an organization.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
}

/// Operations the authorization engine needs from the directory.
///
/// Every method returns `Err(Error::Network)` when the remote call itself
/// fails. A clean "no" is `Ok(false)` or an empty list, never an error.
pub trait DirectoryClient {
    /// All public keys of `username`, across every page.
    fn list_public_keys(&self, username: &str) -> Result<KeySet>;

    /// All teams of `organization`, across every page.
    fn list_teams(&self, organization: &str) -> Result<Vec<Team>>;

    /// Whether `username` is an active member of the team.
    fn is_team_member(&self, team_id: TeamId, username: &str) -> Result<bool>;

    /// Authenticate as `username` with `password` and check that the
    /// account behind the credential really is `username`.
    fn validate_credentials(&self, username: &str, password: &str) -> Result<bool>;
}

impl<D: DirectoryClient + ?Sized> DirectoryClient for &D {
    fn list_public_keys(&self, username: &str) -> Result<KeySet> {
        (**self).list_public_keys(username)
    }

    fn list_teams(&self, organization: &str) -> Result<Vec<Team>> {
        (**self).list_teams(organization)
    }

    fn is_team_member(&self, team_id: TeamId, username: &str) -> Result<bool> {
        (**self).is_team_member(team_id, username)
    }

    fn validate_credentials(&self, username: &str, password: &str) -> Result<bool> {
        (**self).validate_credentials(username, password)
    }
}
