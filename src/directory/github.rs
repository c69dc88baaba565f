// GitHub directory client: a small blocking HTTP client for the parts of
// the GitHub REST API that octopass needs (user keys, org teams, team
// memberships and the authenticated user).
//
// It is synchronous on purpose: octopass makes one decision per process
// and every call has to finish before the login can proceed.

use super::{DirectoryClient, KeySet, Team, TeamId};
use crate::config::{Config, DEFAULT_ENDPOINT};
use crate::error::{ConfigError, Error, Result};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::redirect::Policy;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

const PER_PAGE: usize = 100;

/// Stop paging after this many pages so a misbehaving server cannot keep
/// a login waiting forever.
const MAX_PAGES: u32 = 100;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_REDIRECTS: usize = 3;
const MEDIA_TYPE: &str = "application/vnd.github+json";
const USER_AGENT: &str = concat!("octopass/", env!("CARGO_PKG_VERSION"));

/// Client for the GitHub REST API. Holds the reqwest blocking client, the
/// API base URL and the token used for read calls.
#[derive(Clone)]
pub struct GitHubClient {
    client: Client,
    base_url: Url,
    token: String,
}

#[derive(Deserialize)]
struct PublicKey {
    key: String,
}

#[derive(Deserialize)]
struct Membership {
    state: String,
}

#[derive(Deserialize)]
struct AuthenticatedUser {
    login: String,
}

impl GitHubClient {
    /// Build a client for the endpoint and token in `config`, falling back
    /// to the public GitHub API when no endpoint is set.
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = match &config.endpoint {
            Some(url) => url.clone(),
            None => Url::parse(DEFAULT_ENDPOINT).map_err(|e| ConfigError::InvalidEndpoint {
                value: DEFAULT_ENDPOINT.to_string(),
                reason: e.to_string(),
            })?,
        };
        if config.endpoint.is_some() {
            debug!(endpoint = %base_url, "using API endpoint override");
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| Error::network(format!("failed to build HTTP client: {e}")))?;

        Ok(GitHubClient {
            client,
            base_url,
            token: config.token.clone(),
        })
    }

    /// Join path segments under the base URL. Segments are percent-encoded,
    /// so a username can never escape its path position.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::network(format!("endpoint {} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// GET with the configured token, if any.
    fn get(&self, url: Url) -> RequestBuilder {
        debug!(%url, "GET");
        let req = self.client.get(url).header(ACCEPT, MEDIA_TYPE);
        if self.token.is_empty() {
            req
        } else {
            req.header(AUTHORIZATION, format!("token {}", self.token))
        }
    }

    /// Fetch one page of a list endpoint.
    fn page<T: DeserializeOwned>(&self, segments: &[&str], page: u32) -> Result<Vec<T>> {
        let mut url = self.url(segments)?;
        url.query_pairs_mut()
            .append_pair("per_page", &PER_PAGE.to_string())
            .append_pair("page", &page.to_string());

        let res = self.get(url).send()?;
        let res = ensure_success(res, &segments.join("/"))?;
        Ok(res.json()?)
    }
}

/// Turn a non-success status into a network error carrying the body.
fn ensure_success(res: Response, what: &str) -> Result<Response> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status();
    let txt = res.text().unwrap_or_default();
    Err(Error::network(format!(
        "GET {what} failed: {status} - {}",
        txt.trim()
    )))
}

impl DirectoryClient for GitHubClient {
    fn list_public_keys(&self, username: &str) -> Result<KeySet> {
        let mut keys = KeySet::new();
        for page in 1..=MAX_PAGES {
            let batch: Vec<PublicKey> = self.page(&["users", username, "keys"], page)?;
            let last = batch.len() < PER_PAGE;
            keys.extend(batch.into_iter().map(|k| k.key));
            if last {
                debug!(user = %username, count = keys.len(), "fetched public keys");
                return Ok(keys);
            }
        }
        Err(Error::network(format!(
            "public keys of {username} exceed {MAX_PAGES} pages"
        )))
    }

    fn list_teams(&self, organization: &str) -> Result<Vec<Team>> {
        let mut teams = Vec::new();
        for page in 1..=MAX_PAGES {
            let batch: Vec<Team> = self.page(&["orgs", organization, "teams"], page)?;
            if batch.is_empty() {
                debug!(%organization, count = teams.len(), "fetched teams");
                return Ok(teams);
            }
            teams.extend(batch);
        }
        Err(Error::network(format!(
            "teams of {organization} exceed {MAX_PAGES} pages"
        )))
    }

    fn is_team_member(&self, team_id: TeamId, username: &str) -> Result<bool> {
        let id = team_id.to_string();
        let url = self.url(&["teams", &id, "memberships", username])?;
        let res = self.get(url).send()?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let res = ensure_success(res, &format!("teams/{id}/memberships/{username}"))?;
        let membership: Membership = res.json()?;
        Ok(membership.state == "active")
    }

    fn validate_credentials(&self, username: &str, password: &str) -> Result<bool> {
        let url = self.url(&["user"])?;
        debug!(%url, "GET as basic auth");
        let res = self
            .client
            .get(url)
            .header(ACCEPT, MEDIA_TYPE)
            .basic_auth(username, Some(password))
            .send()?;

        let status = res.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            info!(user = %username, %status, "basic authentication refused");
            return Ok(false);
        }

        let user: AuthenticatedUser = ensure_success(res, "user")?.json()?;
        if user.login == username {
            Ok(true)
        } else {
            warn!(
                user = %username,
                authenticated_as = %user.login,
                "credential belongs to a different account"
            );
            Ok(false)
        }
    }
}
