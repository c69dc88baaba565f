// Mode dispatcher: picks the key-lookup or the password flow for one
// invocation and runs it to an outcome.
//
// The flow is an explicit state machine:
//
//   Start -> KeyLookupFlow | PasswordFlow | Failed
//   KeyLookupFlow -> MembershipGate | EmitKeys
//   PasswordFlow  -> MembershipGate | ValidateCredential
//   MembershipGate -> EmitKeys | ValidateCredential | Rejected | Failed
//   EmitKeys -> Done | Failed
//   ValidateCredential -> Done | Rejected | Failed
//
// `EmitKeys` and `ValidateCredential` are only reachable through the gate
// when the gate is active, so no key is disclosed and no credential is
// tried for a user outside the team.

use crate::directory::DirectoryClient;
use crate::engine::{Authorizer, Membership};
use crate::error::Error;
use crate::input::strip_trailing_nul;
use std::fmt;
use std::io::Write;
use tracing::{debug, error, info, warn};

/// Environment variable pam_exec uses to pass the username.
pub const PAM_USER_ENV: &str = "PAM_USER";

/// Everything the dispatcher needs to know about how it was invoked.
#[derive(Clone, Default)]
pub struct Invocation {
    /// Positional username argument (sshd `AuthorizedKeysCommand %u`).
    pub username: Option<String>,
    /// Standard input contents, `None` when it was not piped.
    pub stdin: Option<Vec<u8>>,
    /// Username from the environment (`PAM_USER`).
    pub pam_user: Option<String>,
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("username", &self.username)
            .field("stdin_bytes", &self.stdin.as_ref().map(Vec::len))
            .field("pam_user", &self.pam_user)
            .finish()
    }
}

/// A password or token. Its `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    KeyLookup {
        username: String,
    },
    Password {
        username: String,
        credential: Credential,
    },
}

impl Flow {
    /// Choose the flow. Piped, non-empty stdin wins over a username
    /// argument: pam_exec may pass arguments too, sshd never pipes data.
    pub fn select(invocation: &Invocation) -> Result<Flow, Error> {
        if let Some(raw) = invocation.stdin.as_deref().filter(|b| !b.is_empty()) {
            let username = invocation
                .pam_user
                .as_deref()
                .filter(|u| !u.is_empty())
                .ok_or_else(|| Error::input(format!("{PAM_USER_ENV} required")))?;
            let raw = std::str::from_utf8(raw)
                .map_err(|_| Error::input("credential on STDIN is not valid UTF-8"))?;
            return Ok(Flow::Password {
                username: username.to_string(),
                credential: Credential(strip_trailing_nul(raw).to_string()),
            });
        }

        match invocation.username.as_deref() {
            Some(username) if !username.is_empty() => Ok(Flow::KeyLookup {
                username: username.to_string(),
            }),
            _ => Err(Error::input(
                "no username argument and no credential on STDIN",
            )),
        }
    }

    pub fn username(&self) -> &str {
        match self {
            Flow::KeyLookup { username } | Flow::Password { username, .. } => username,
        }
    }

    /// The step that follows once the membership gate has been passed or
    /// is inactive.
    fn authorized(self) -> State {
        match self {
            Flow::KeyLookup { username } => State::EmitKeys { username },
            Flow::Password {
                username,
                credential,
            } => State::ValidateCredential {
                username,
                credential,
            },
        }
    }
}

/// Why a login was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NotMember,
    TeamNotFound,
    BadCredential,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Rejection::NotMember => "user is not a member of the team",
            Rejection::TeamNotFound => "team not found in organization",
            Rejection::BadCredential => "not authenticated",
        })
    }
}

#[derive(Debug)]
pub enum State {
    Start(Invocation),
    KeyLookupFlow { username: String },
    PasswordFlow { username: String, credential: Credential },
    MembershipGate(Flow),
    EmitKeys { username: String },
    ValidateCredential { username: String, credential: Credential },
    Done,
    Rejected(Rejection),
    Failed(Error),
}

impl State {
    pub fn name(&self) -> &'static str {
        match self {
            State::Start(_) => "Start",
            State::KeyLookupFlow { .. } => "KeyLookupFlow",
            State::PasswordFlow { .. } => "PasswordFlow",
            State::MembershipGate(_) => "MembershipGate",
            State::EmitKeys { .. } => "EmitKeys",
            State::ValidateCredential { .. } => "ValidateCredential",
            State::Done => "Done",
            State::Rejected(_) => "Rejected",
            State::Failed(_) => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Done | State::Rejected(_) | State::Failed(_))
    }
}

/// Final result of one invocation.
#[derive(Debug)]
pub enum Outcome {
    Done,
    Rejected(Rejection),
    Failed(Error),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Done)
    }

    /// 0 on success, 1 for both denial and failure.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

pub struct Dispatcher<'a, D> {
    auth: Authorizer<'a, D>,
}

impl<'a, D: DirectoryClient> Dispatcher<'a, D> {
    pub fn new(auth: Authorizer<'a, D>) -> Self {
        Dispatcher { auth }
    }

    /// Run the state machine from `Start` until it reaches a terminal
    /// state. Keys are written to `out`, one per line.
    pub fn run<W: Write>(&self, invocation: Invocation, out: &mut W) -> Outcome {
        let mut state = State::Start(invocation);
        while !state.is_terminal() {
            let next = self.step(state, out);
            debug!(state = next.name(), "transition");
            state = next;
        }

        match state {
            State::Rejected(reason) => {
                warn!("rejected: {reason}");
                Outcome::Rejected(reason)
            }
            State::Failed(err) => {
                error!("failed: {err}");
                Outcome::Failed(err)
            }
            _ => Outcome::Done,
        }
    }

    /// Perform a single transition.
    pub fn step<W: Write>(&self, state: State, out: &mut W) -> State {
        match state {
            State::Start(invocation) => match Flow::select(&invocation) {
                Ok(Flow::KeyLookup { username }) => {
                    info!("keys request user: {username}");
                    State::KeyLookupFlow { username }
                }
                Ok(Flow::Password {
                    username,
                    credential,
                }) => {
                    info!("{PAM_USER_ENV}: {username}");
                    State::PasswordFlow {
                        username,
                        credential,
                    }
                }
                Err(err) => State::Failed(err),
            },

            State::KeyLookupFlow { username } => self.gate_or(Flow::KeyLookup { username }),

            State::PasswordFlow {
                username,
                credential,
            } => self.gate_or(Flow::Password {
                username,
                credential,
            }),

            State::MembershipGate(flow) => match self.auth.membership(flow.username()) {
                Ok(Membership::Member) => flow.authorized(),
                Ok(Membership::NotMember) => State::Rejected(Rejection::NotMember),
                Ok(Membership::TeamNotFound) => State::Rejected(Rejection::TeamNotFound),
                Err(err) => State::Failed(err),
            },

            State::EmitKeys { username } => match self.auth.get_user_keys(&username) {
                Ok(keys) => match write_keys(out, &keys) {
                    Ok(()) => State::Done,
                    Err(err) => State::Failed(Error::Output(err)),
                },
                Err(err) => State::Failed(err),
            },

            State::ValidateCredential {
                username,
                credential,
            } => match self
                .auth
                .is_basic_authorized(&username, credential.expose())
            {
                Ok(true) => State::Done,
                Ok(false) => State::Rejected(Rejection::BadCredential),
                Err(err) => State::Failed(err),
            },

            terminal => terminal,
        }
    }

    fn gate_or(&self, flow: Flow) -> State {
        if self.auth.is_membership_gate_active() {
            State::MembershipGate(flow)
        } else {
            flow.authorized()
        }
    }
}

/// One key per line. An empty set writes nothing.
fn write_keys<W: Write>(out: &mut W, keys: &[String]) -> std::io::Result<()> {
    for key in keys {
        writeln!(out, "{key}")?;
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, FileConfig, Overrides};
    use crate::directory::{Calls, MemoryDirectory, Operation};

    fn open_config() -> Config {
        Config::resolve(FileConfig::default(), &Overrides::default()).expect("config")
    }

    fn gated_config(belongs: &str) -> Config {
        let overrides = Overrides::default().belongs(belongs).expect("belongs");
        Config::resolve(FileConfig::default(), &overrides).expect("config")
    }

    fn keys_for(username: &str) -> Invocation {
        Invocation {
            username: Some(username.to_string()),
            ..Default::default()
        }
    }

    fn password_for(username: &str, stdin: &str) -> Invocation {
        Invocation {
            username: None,
            stdin: Some(stdin.as_bytes().to_vec()),
            pam_user: Some(username.to_string()),
        }
    }

    fn run(config: &Config, dir: &MemoryDirectory, invocation: Invocation) -> (Outcome, String) {
        let mut out = Vec::new();
        let outcome = Dispatcher::new(Authorizer::new(config, dir)).run(invocation, &mut out);
        (outcome, String::from_utf8(out).expect("utf8 output"))
    }

    fn trace(config: &Config, dir: &MemoryDirectory, invocation: Invocation) -> Vec<&'static str> {
        let dispatcher = Dispatcher::new(Authorizer::new(config, dir));
        let mut out = Vec::new();
        let mut state = State::Start(invocation);
        let mut names = vec![state.name()];
        while !state.is_terminal() {
            state = dispatcher.step(state, &mut out);
            names.push(state.name());
        }
        names
    }

    fn team_directory() -> MemoryDirectory {
        MemoryDirectory::new()
            .with_team("foo", "infra", 42)
            .with_member(42, "alice")
            .with_keys("alice", ["ssh-rsa AAA...", "ssh-ed25519 BBB..."])
            .with_keys("bob", ["ssh-rsa BOB"])
            .with_credential("token-alice", "alice")
            .with_credential("token-bob", "bob")
    }

    #[test]
    fn key_lookup_without_gate_emits_keys() {
        let dir = team_directory();
        let (outcome, stdout) = run(&open_config(), &dir, keys_for("alice"));

        assert!(outcome.is_success());
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(stdout, "ssh-rsa AAA...\nssh-ed25519 BBB...\n");
        assert_eq!(dir.calls().list_teams, 0);
    }

    #[test]
    fn key_output_has_one_line_per_key() {
        for n in 0..4 {
            let keys: Vec<String> = (0..n).map(|i| format!("ssh-ed25519 K{i}")).collect();
            let dir = MemoryDirectory::new().with_keys("alice", keys.clone());
            let (outcome, stdout) = run(&open_config(), &dir, keys_for("alice"));

            assert!(outcome.is_success());
            assert_eq!(stdout.lines().collect::<Vec<_>>(), keys);
            assert!(!stdout.contains("\n\n"));
            assert_eq!(stdout.is_empty(), n == 0);
        }
    }

    #[test]
    fn gated_key_lookup_for_member() {
        let dir = team_directory();
        let config = gated_config("foo/infra");

        assert_eq!(
            trace(&config, &dir, keys_for("alice")),
            ["Start", "KeyLookupFlow", "MembershipGate", "EmitKeys", "Done"]
        );
    }

    #[test]
    fn non_member_never_sees_key_material() {
        let dir = team_directory();
        let (outcome, stdout) = run(&gated_config("foo/infra"), &dir, keys_for("bob"));

        assert!(matches!(outcome, Outcome::Rejected(Rejection::NotMember)));
        assert_eq!(outcome.exit_code(), 1);
        assert!(stdout.is_empty());
        assert_eq!(dir.calls().list_public_keys, 0);
    }

    #[test]
    fn non_member_never_gets_credential_checked() {
        let dir = team_directory();
        let (outcome, _) = run(
            &gated_config("foo/infra"),
            &dir,
            password_for("bob", "token-bob"),
        );

        assert!(matches!(outcome, Outcome::Rejected(Rejection::NotMember)));
        assert_eq!(dir.calls().validate_credentials, 0);
    }

    #[test]
    fn missing_team_denies_password_flow() {
        let dir = MemoryDirectory::new()
            .with_team("foo", "ops", 1)
            .with_credential("token123", "bob");
        let (outcome, _) = run(
            &gated_config("foo/infra"),
            &dir,
            password_for("bob", "token123"),
        );

        assert!(matches!(outcome, Outcome::Rejected(Rejection::TeamNotFound)));
        assert_eq!(dir.calls().validate_credentials, 0);
        assert_eq!(dir.calls().list_teams, 1);
    }

    #[test]
    fn gated_password_flow_for_member() {
        let dir = team_directory();
        let config = gated_config("foo/infra");

        assert_eq!(
            trace(&config, &dir, password_for("alice", "token-alice")),
            [
                "Start",
                "PasswordFlow",
                "MembershipGate",
                "ValidateCredential",
                "Done"
            ]
        );
    }

    #[test]
    fn password_flow_strips_nul_and_whitespace() {
        let dir = MemoryDirectory::new().with_credential("secret", "alice");
        let (outcome, stdout) = run(&open_config(), &dir, password_for("alice", "  secret\0"));

        assert!(outcome.is_success());
        assert!(stdout.is_empty());
        assert_eq!(
            dir.credential_attempts(),
            [("alice".to_string(), "secret".to_string())]
        );
    }

    #[test]
    fn wrong_credential_is_rejected() {
        let dir = team_directory();
        let (outcome, _) = run(&open_config(), &dir, password_for("alice", "token-bob"));
        assert!(matches!(outcome, Outcome::Rejected(Rejection::BadCredential)));
    }

    #[test]
    fn piped_stdin_takes_precedence_over_argument() {
        let dir = team_directory();
        let invocation = Invocation {
            username: Some("alice".into()),
            stdin: Some(b"token-alice".to_vec()),
            pam_user: Some("alice".into()),
        };
        let (outcome, stdout) = run(&open_config(), &dir, invocation);

        assert!(outcome.is_success());
        assert!(stdout.is_empty());
        assert_eq!(
            dir.calls(),
            Calls {
                validate_credentials: 1,
                ..Default::default()
            }
        );
    }

    #[test]
    fn empty_stdin_falls_back_to_argument() {
        let dir = team_directory();
        let invocation = Invocation {
            username: Some("alice".into()),
            stdin: Some(Vec::new()),
            pam_user: None,
        };
        let (outcome, stdout) = run(&open_config(), &dir, invocation);
        assert!(outcome.is_success());
        assert_eq!(stdout.lines().count(), 2);
    }

    #[test]
    fn no_identity_fails_without_network() {
        let dir = team_directory();
        let invocation = Invocation {
            username: None,
            stdin: Some(Vec::new()),
            pam_user: None,
        };
        let (outcome, stdout) = run(&gated_config("foo/infra"), &dir, invocation);

        assert!(matches!(outcome, Outcome::Failed(Error::Input(_))));
        assert!(stdout.is_empty());
        assert_eq!(dir.calls().total(), 0);
    }

    #[test]
    fn password_flow_requires_pam_user() {
        let dir = team_directory();
        let invocation = Invocation {
            username: Some("alice".into()),
            stdin: Some(b"token-alice".to_vec()),
            pam_user: Some(String::new()),
        };
        let (outcome, _) = run(&open_config(), &dir, invocation);

        assert!(matches!(outcome, Outcome::Failed(Error::Input(_))));
        assert_eq!(dir.calls().total(), 0);
    }

    #[test]
    fn outage_fails_closed() {
        let dir = team_directory().failing(Operation::IsTeamMember);
        let (outcome, stdout) = run(&gated_config("foo/infra"), &dir, keys_for("alice"));
        assert!(matches!(outcome, Outcome::Failed(Error::Network(_))));
        assert!(stdout.is_empty());
        assert_eq!(dir.calls().list_public_keys, 0);

        let dir = team_directory().failing(Operation::ValidateCredentials);
        let (outcome, _) = run(&open_config(), &dir, password_for("alice", "token-alice"));
        assert!(matches!(outcome, Outcome::Failed(Error::Network(_))));
        assert_eq!(outcome.exit_code(), 1);
    }

    #[test]
    fn credential_is_redacted_in_debug_output() {
        let flow = Flow::select(&password_for("alice", "hunter2")).expect("flow");
        assert!(!format!("{flow:?}").contains("hunter2"));
    }
}
