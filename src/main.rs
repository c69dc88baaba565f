// Entrypoint for the octopass binary.
// - Parses flags, loads the config and sets up logging.
// - Hands the invocation to the dispatcher and turns its outcome into the
//   process exit status: 0 when authorized, 1 otherwise.

use anyhow::Context;
use clap::Parser;
use octopass::dispatch::PAM_USER_ENV;
use octopass::{input, logging, Authorizer, Config, Dispatcher, GitHubClient, Invocation, Overrides};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

const EXAMPLES: &str = "\
SSHD AuthorizedKeysCommand:
  Print the public keys of a user
  $ octopass <github username>
  Only when the user belongs to the team
  $ octopass --belongs=foo/bar <github username>

PAM Exec:
  Authorize by token
  $ echo <github token> | env PAM_USER=<github username> octopass
  Only when the user belongs to the team
  $ echo <github token> | env PAM_USER=<github username> octopass --belongs=foo/bar";

/// Authorize SSH and PAM logins with GitHub public keys and team membership
#[derive(Parser, Debug)]
#[command(name = "octopass", version, about, after_help = EXAMPLES)]
struct Args {
    /// GitHub username to print public keys for
    username: Option<String>,

    /// Path to the configuration file [default: /etc/octopass.conf]
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// GitHub API endpoint, e.g. https://ghe.example.com/api/v3/
    #[arg(short, long, value_name = "URL", env = "OCTOPASS_ENDPOINT")]
    endpoint: Option<String>,

    /// Token for GitHub API read calls
    #[arg(long, env = "OCTOPASS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// GitHub organization
    #[arg(long, env = "OCTOPASS_ORGANIZATION")]
    organization: Option<String>,

    /// Team within the organization
    #[arg(long, env = "OCTOPASS_TEAM")]
    team: Option<String>,

    /// Organization and team the user must belong to, as ORG/TEAM
    #[arg(short, long, value_name = "ORG/TEAM")]
    belongs: Option<String>,

    /// Send logs to syslog instead of stderr
    #[arg(short, long)]
    syslog: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn overrides(&self) -> Result<Overrides, octopass::ConfigError> {
        let overrides = Overrides {
            endpoint: self.endpoint.clone(),
            token: self.token.clone(),
            organization: self.organization.clone(),
            team: self.team.clone(),
            syslog: self.syslog,
            membership_check: false,
        };
        match &self.belongs {
            Some(belongs) => overrides.belongs(belongs),
            None => Ok(overrides),
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(&args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("octopass: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> anyhow::Result<ExitCode> {
    let config = Config::load(args.config.as_deref(), &args.overrides()?)
        .context("loading configuration")?;
    logging::init(args.debug, config.syslog);

    let invocation = Invocation {
        username: args.username.clone(),
        stdin: input::read_piped_stdin().context("reading STDIN")?,
        pam_user: std::env::var(PAM_USER_ENV).ok(),
    };

    let client = GitHubClient::new(&config)?;
    let dispatcher = Dispatcher::new(Authorizer::new(&config, client));

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let outcome = dispatcher.run(invocation, &mut out);
    out.flush().context("flushing STDOUT")?;

    Ok(ExitCode::from(outcome.exit_code() as u8))
}
