// In-memory directory: a `DirectoryClient` backed by plain maps.
//
// It counts every call so tests can assert which remote operations a flow
// performed, and it can be told to fail an operation to simulate an outage.

use super::{DirectoryClient, KeySet, Team, TeamId};
use crate::error::{Error, Result};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

/// The four directory operations, used to inject failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListPublicKeys,
    ListTeams,
    IsTeamMember,
    ValidateCredentials,
}

/// Number of calls made to each operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Calls {
    pub list_public_keys: usize,
    pub list_teams: usize,
    pub is_team_member: usize,
    pub validate_credentials: usize,
}

impl Calls {
    pub fn total(&self) -> usize {
        self.list_public_keys + self.list_teams + self.is_team_member + self.validate_credentials
    }
}

#[derive(Debug, Default)]
pub struct MemoryDirectory {
    keys: HashMap<String, KeySet>,
    teams: HashMap<String, Vec<Team>>,
    members: HashMap<TeamId, HashSet<String>>,
    /// Secret -> login of the account it authenticates as.
    credentials: HashMap<String, String>,
    failing: HashSet<Operation>,
    calls: RefCell<Calls>,
    attempts: RefCell<Vec<(String, String)>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keys<I, S>(mut self, username: &str, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys
            .insert(username.to_string(), keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_team(mut self, organization: &str, name: &str, id: TeamId) -> Self {
        self.teams
            .entry(organization.to_string())
            .or_default()
            .push(Team {
                id,
                name: name.to_string(),
            });
        self
    }

    pub fn with_member(mut self, team_id: TeamId, username: &str) -> Self {
        self.members
            .entry(team_id)
            .or_default()
            .insert(username.to_string());
        self
    }

    /// Register a secret that authenticates as `login`, whatever username
    /// it is presented with. This is how a personal access token behaves.
    pub fn with_credential(mut self, secret: &str, login: &str) -> Self {
        self.credentials
            .insert(secret.to_string(), login.to_string());
        self
    }

    pub fn failing(mut self, op: Operation) -> Self {
        self.failing.insert(op);
        self
    }

    pub fn calls(&self) -> Calls {
        *self.calls.borrow()
    }

    /// Username/password pairs passed to `validate_credentials`, in order.
    pub fn credential_attempts(&self) -> Vec<(String, String)> {
        self.attempts.borrow().clone()
    }

    fn record(&self, op: Operation) -> Result<()> {
        {
            let mut calls = self.calls.borrow_mut();
            match op {
                Operation::ListPublicKeys => calls.list_public_keys += 1,
                Operation::ListTeams => calls.list_teams += 1,
                Operation::IsTeamMember => calls.is_team_member += 1,
                Operation::ValidateCredentials => calls.validate_credentials += 1,
            }
        }
        if self.failing.contains(&op) {
            return Err(Error::network(format!("{op:?} unavailable")));
        }
        Ok(())
    }
}

impl DirectoryClient for MemoryDirectory {
    fn list_public_keys(&self, username: &str) -> Result<KeySet> {
        self.record(Operation::ListPublicKeys)?;
        Ok(self.keys.get(username).cloned().unwrap_or_default())
    }

    fn list_teams(&self, organization: &str) -> Result<Vec<Team>> {
        self.record(Operation::ListTeams)?;
        Ok(self.teams.get(organization).cloned().unwrap_or_default())
    }

    fn is_team_member(&self, team_id: TeamId, username: &str) -> Result<bool> {
        self.record(Operation::IsTeamMember)?;
        Ok(self
            .members
            .get(&team_id)
            .is_some_and(|m| m.contains(username)))
    }

    fn validate_credentials(&self, username: &str, password: &str) -> Result<bool> {
        self.attempts
            .borrow_mut()
            .push((username.to_string(), password.to_string()));
        self.record(Operation::ValidateCredentials)?;
        Ok(self
            .credentials
            .get(password)
            .is_some_and(|login| login == username))
    }
}
