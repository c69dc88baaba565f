// Library root
// ------------
// octopass answers two questions for a login: which public keys may log in
// as this GitHub user (sshd `AuthorizedKeysCommand`), and is this token or
// password valid for this user (`pam_exec`). Both can be gated on
// membership of a GitHub organization team.
//
// Module responsibilities:
// - `config`: config file loading and command-line overrides.
// - `directory`: the `DirectoryClient` trait, its GitHub implementation
//   and an in-memory one for tests.
// - `engine`: membership, key and credential decisions.
// - `dispatch`: picks the key-lookup or password flow and runs it.
// - `input`: reading the credential from standard input.
// - `logging`: stderr or syslog output for tracing events.
pub mod config;
pub mod directory;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod input;
pub mod logging;

pub use config::{Config, Overrides};
pub use directory::{DirectoryClient, GitHubClient, KeySet, MemoryDirectory, Team, TeamId};
pub use dispatch::{Dispatcher, Flow, Invocation, Outcome, Rejection, State};
pub use engine::{Authorizer, Membership, TeamLookup};
pub use error::{ConfigError, Error, Result};
