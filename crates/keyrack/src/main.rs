//! keyrack - Local credential resolution and secret-vault broker
//!
//! Commands:
//! - init: Create the repo manifest and the host identity
//! - set: Declare a key and record which vault holds it on this host
//! - get: Resolve a key or the whole repo into grant attempts
//! - list: Show this host's key configuration (never values)
//! - unlock / relock: Start, extend or end the session daemon's cache
//! - status: Session daemon liveness and TTL
//! - env: Shell exports for a fully granted repo
//! - recipient: Show the host's age public recipient
//!
//! Exit codes: 0 success, 1 error, 2 at least one key not granted.

use age::secrecy::SecretString;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use keyrack::config::{parse_duration, KeyrackConfig};
use keyrack::daemon::DaemonServer;
use keyrack::grant::{self, KeyrackGrantAttempt};
use keyrack::manifest::repo::DEFAULT_REPO_MANIFEST;
use keyrack::ops::{self, NoPrompt, SetRequest};
use keyrack::{
    Environment, GrantTarget, KeySlug, Keyrack, KeyrackGrantMechanism, KeyrackHostVault,
    SecretPrompt, SecretValue,
};
use keyrack_core::Paths;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keyrack")]
#[command(version)]
#[command(about = "Local credential resolution and secret-vault broker")]
#[command(after_help = r#"KEY SLUGS:
    org.env.NAME, e.g. acme.prod.STRIPE_KEY or acme.all.GITHUB_TOKEN
    NAME is also the environment variable that overrides the vault.

VAULTS:
    os.envvar     the process environment
    os.direct     plaintext JSON store under the keyrack home
    os.secure     the OS keychain
    os.daemon     memory of the session daemon
    1password     `op read` of an op:// reference (--exid)
    aws.iam.sso   `aws configure export-credentials` for a profile (--exid)

EXIT CODES:
    0  success, or every requested key granted
    1  error
    2  at least one key locked, blocked or absent"#)]
struct Cli {
    /// Scope host state to an owner (multi-tenant machines)
    #[arg(long, global = true)]
    owner: Option<String>,

    /// Passphrase of a protected host identity (else KEYRACK_PASSPHRASE)
    #[arg(long, global = true)]
    passphrase: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the repo manifest and this host's identity
    Init {
        /// Organization that owns the repo's keys
        #[arg(long)]
        org: String,
        /// Declared environment (repeatable)
        #[arg(long = "env")]
        envs: Vec<String>,
        /// Repo manifest path
        #[arg(long, default_value = DEFAULT_REPO_MANIFEST)]
        at: PathBuf,
    },

    /// Declare a key and store it in a vault
    Set {
        #[arg(long)]
        key: KeySlug,
        #[arg(long)]
        vault: KeyrackHostVault,
        /// Grant mechanism (inferred when the vault implies one)
        #[arg(long)]
        mech: Option<KeyrackGrantMechanism>,
        /// External id: op:// reference or AWS profile
        #[arg(long)]
        exid: Option<String>,
        #[arg(long, default_value = DEFAULT_REPO_MANIFEST)]
        at: PathBuf,
        /// Replace a conflicting configuration
        #[arg(long)]
        force: bool,
        /// Secret value (omit for a hidden prompt)
        #[arg(long)]
        value: Option<String>,
    },

    /// Resolve a key or every key of the repo
    Get {
        #[arg(long, conflicts_with = "repo")]
        key: Option<KeySlug>,
        #[arg(long)]
        repo: bool,
        /// Only keys of this environment (and `all`)
        #[arg(long)]
        env: Option<String>,
        #[arg(long, default_value = DEFAULT_REPO_MANIFEST)]
        at: PathBuf,
        /// Output as JSON (includes granted values)
        #[arg(long, conflicts_with = "value")]
        json: bool,
        /// Print only the granted value of a single key
        #[arg(long, requires = "key")]
        value: bool,
    },

    /// Show this host's key configuration
    List {
        #[arg(long)]
        json: bool,
    },

    /// Start or extend the session and make keys available
    Unlock {
        #[arg(long, conflicts_with = "repo")]
        key: Option<KeySlug>,
        #[arg(long)]
        repo: bool,
        #[arg(long)]
        env: Option<String>,
        /// Session length, e.g. 30m, 9h, 2d
        #[arg(long)]
        duration: Option<String>,
        #[arg(long, default_value = DEFAULT_REPO_MANIFEST)]
        at: PathBuf,
    },

    /// Evict one key, or end the session
    Relock {
        #[arg(long)]
        key: Option<KeySlug>,
    },

    /// Session daemon status
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Print `export NAME='value'` lines for the repo (eval "$(keyrack env)")
    Env {
        #[arg(long)]
        env: Option<String>,
        #[arg(long, default_value = DEFAULT_REPO_MANIFEST)]
        at: PathBuf,
    },

    /// Show this host's age public recipient
    Recipient,

    /// Run the session daemon (spawned by unlock)
    #[command(hide = true)]
    Daemon {
        #[arg(long)]
        socket: PathBuf,
        #[arg(long)]
        pid_file: PathBuf,
    },
}

/// Hidden terminal prompts
struct TerminalPrompt;

impl SecretPrompt for TerminalPrompt {
    fn passphrase(&self) -> Result<Option<SecretString>> {
        let input = rpassword::prompt_password("keyrack passphrase: ")
            .context("Failed to read passphrase")?;
        if input.is_empty() {
            return Ok(None);
        }
        Ok(Some(SecretString::new(input)))
    }

    fn secret(&self, slug: &KeySlug) -> Result<Option<SecretValue>> {
        let input = rpassword::prompt_password(format!("value for {}: ", slug))
            .context("Failed to read secret value")?;
        Ok(Some(SecretValue::new(input)).filter(|v| !v.is_empty()))
    }
}

/// Prompts only when stdin is a terminal
fn prompt() -> &'static dyn SecretPrompt {
    if std::io::stdin().is_terminal() {
        &TerminalPrompt
    } else {
        &NoPrompt
    }
}

fn target(key: Option<KeySlug>, repo: bool, env: Option<String>) -> Result<GrantTarget> {
    match (key, repo) {
        (Some(slug), false) => Ok(GrantTarget::Key(slug)),
        (None, true) => Ok(GrantTarget::Repo { env }),
        _ => bail!("pass exactly one of --key or --repo"),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        eprintln!("{} {:#}", "error:".red(), e);
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Daemon { socket, pid_file } = &cli.command {
        let runtime = tokio::runtime::Runtime::new()?;
        return runtime.block_on(DaemonServer::new(socket.clone(), pid_file.clone()).run());
    }

    let paths = Paths::new();
    let env = Environment::from_process();
    let owner = cli
        .owner
        .or_else(|| env.get("KEYRACK_OWNER").map(str::to_string));
    let passphrase = cli
        .passphrase
        .or_else(|| env.get("KEYRACK_PASSPHRASE").map(str::to_string))
        .map(SecretString::new);
    let config = KeyrackConfig::load(&paths)?;
    let keyrack = Keyrack::new(paths, owner.as_deref(), config, env)?;
    let passphrase = passphrase.as_ref();

    match cli.command {
        Commands::Init { org, envs, at } => cmd_init(&keyrack, &org, &envs, at, passphrase),
        Commands::Set {
            key,
            vault,
            mech,
            exid,
            at,
            force,
            value,
        } => {
            let request = SetRequest {
                slug: key,
                vault,
                mech,
                exid,
                at,
                force,
                value: value.map(SecretValue::new),
            };
            cmd_set(&keyrack, request, passphrase)
        }
        Commands::Get {
            key,
            repo,
            env,
            at,
            json,
            value,
        } => cmd_get(&keyrack, target(key, repo, env)?, at, json, value, passphrase),
        Commands::List { json } => cmd_list(&keyrack, json, passphrase),
        Commands::Unlock {
            key,
            repo,
            env,
            duration,
            at,
        } => cmd_unlock(&keyrack, target(key, repo, env)?, duration, at, passphrase),
        Commands::Relock { key } => cmd_relock(&keyrack, key),
        Commands::Status { json } => cmd_status(&keyrack, json),
        Commands::Env { env, at } => cmd_env(&keyrack, env, at, passphrase),
        Commands::Recipient => {
            println!("{}", keyrack.recipient()?);
            Ok(())
        }
        Commands::Daemon { .. } => Ok(()),
    }
}

fn cmd_init(
    keyrack: &Keyrack,
    org: &str,
    envs: &[String],
    at: PathBuf,
    passphrase: Option<&SecretString>,
) -> Result<()> {
    let outcome = keyrack.init(org, envs, &at, passphrase)?;
    println!("{} {} ({})", "init:".green(), outcome.manifest.display(), outcome.effect);
    println!();
    println!("Host recipient:");
    println!("  {}", outcome.recipient);
    println!();
    println!("Declare keys with: keyrack set --key {}.<env>.<NAME> --vault <vault>", org);
    Ok(())
}

fn cmd_set(keyrack: &Keyrack, request: SetRequest, passphrase: Option<&SecretString>) -> Result<()> {
    let outcome = keyrack.set(request, passphrase, prompt())?;
    let host = &outcome.host;
    println!(
        "{} {} via {} ({}) {}",
        "set:".green(),
        host.slug.to_string().bold(),
        host.vault,
        host.mech,
        outcome.effect
    );
    Ok(())
}

fn print_attempts(attempts: &[KeyrackGrantAttempt]) {
    for attempt in attempts {
        println!("{}", attempt.render());
        println!();
    }
    println!("{}", grant::summarize(attempts));
}

fn exit_for(attempts: &[KeyrackGrantAttempt]) -> Result<()> {
    match grant::exit_code(attempts) {
        0 => Ok(()),
        code => process::exit(code),
    }
}

fn cmd_get(
    keyrack: &Keyrack,
    target: GrantTarget,
    at: PathBuf,
    json: bool,
    value: bool,
    passphrase: Option<&SecretString>,
) -> Result<()> {
    let attempts = keyrack.get(&target, &at, passphrase)?;

    if value {
        match attempts.first().and_then(KeyrackGrantAttempt::secret) {
            Some(secret) => print!("{}", secret.expose()),
            None => {
                for attempt in &attempts {
                    eprintln!("{}", attempt.render());
                }
            }
        }
    } else if json {
        match (&target, attempts.as_slice()) {
            (GrantTarget::Key(_), [attempt]) => println!("{}", serde_json::to_string_pretty(attempt)?),
            _ => println!("{}", serde_json::to_string_pretty(&attempts)?),
        }
    } else {
        print_attempts(&attempts);
    }

    exit_for(&attempts)
}

fn cmd_list(keyrack: &Keyrack, json: bool, passphrase: Option<&SecretString>) -> Result<()> {
    let host = keyrack.list(passphrase)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&host.hosts)?);
        return Ok(());
    }

    if host.hosts.is_empty() {
        println!("No keys configured on this host. Add one with: keyrack set --key <slug> --vault <vault>");
        return Ok(());
    }

    println!("{}", host.uri.bold());
    println!();
    for entry in host.hosts.values() {
        let exid = entry.exid.as_deref().map(|e| format!(" [{}]", e)).unwrap_or_default();
        println!(
            "  {:<40} {:<12} {}{}",
            entry.slug.to_string(),
            entry.vault.to_string(),
            entry.mech,
            exid.dimmed()
        );
    }
    Ok(())
}

fn cmd_unlock(
    keyrack: &Keyrack,
    target: GrantTarget,
    duration: Option<String>,
    at: PathBuf,
    passphrase: Option<&SecretString>,
) -> Result<()> {
    let duration = duration.as_deref().map(parse_duration).transpose()?;
    let outcome = keyrack.unlock(&target, &at, duration, passphrase, prompt())?;

    println!("{} until {}", "unlocked".green(), outcome.expires_at.to_rfc3339());
    println!();
    print_attempts(&outcome.attempts);
    exit_for(&outcome.attempts)
}

fn cmd_relock(keyrack: &Keyrack, key: Option<KeySlug>) -> Result<()> {
    let outcome = keyrack.relock(key.as_ref())?;
    match (&key, outcome.was_running) {
        (_, false) => println!("nothing unlocked"),
        (Some(slug), true) if outcome.evicted == 0 => println!("{} was not cached", slug),
        (Some(slug), true) => println!("{} {}", "relocked".green(), slug),
        (None, true) => println!("{} ({} cached keys dropped)", "relocked".green(), outcome.evicted),
    }
    Ok(())
}

fn cmd_status(keyrack: &Keyrack, json: bool) -> Result<()> {
    let status = keyrack.status()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let state = match status.state.as_str() {
        "running" => status.state.green(),
        "stale" => status.state.yellow(),
        _ => status.state.dimmed(),
    };
    println!("session {}: {}", status.session_id, state);
    println!("  socket: {}", status.socket.display());
    if let Some(pid) = status.pid {
        println!("  pid: {}", pid);
    }

    let Some(report) = &status.report else {
        return Ok(());
    };
    match status.ttl_remaining_seconds {
        Some(seconds) => println!("  ttl: {}m {}s", seconds / 60, seconds % 60),
        None => println!("  ttl: not unlocked"),
    }
    println!("  host manifest: {}", if report.host_cached { "cached" } else { "not cached" });
    for key in &report.keys {
        match key.expires_at {
            Some(at) => println!("  {} (until {})", key.slug, at.to_rfc3339()),
            None => println!("  {}", key.slug),
        }
    }
    Ok(())
}

fn cmd_env(keyrack: &Keyrack, env: Option<String>, at: PathBuf, passphrase: Option<&SecretString>) -> Result<()> {
    let attempts = keyrack.get(&GrantTarget::Repo { env }, &at, passphrase)?;

    match ops::export_lines(&attempts) {
        Some(lines) => {
            for line in lines {
                println!("{}", line);
            }
            Ok(())
        }
        None => {
            for attempt in attempts.iter().filter(|a| !a.is_granted()) {
                eprintln!("{}", attempt.render());
            }
            process::exit(grant::exit_code(&attempts));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_set() {
        let cli = Cli::try_parse_from([
            "keyrack", "set", "--key", "acme.prod.STRIPE_KEY", "--vault", "os.direct", "--force",
        ])
        .unwrap();
        match cli.command {
            Commands::Set { key, vault, mech, force, at, .. } => {
                assert_eq!(key.to_string(), "acme.prod.STRIPE_KEY");
                assert_eq!(vault, KeyrackHostVault::OsDirect);
                assert!(mech.is_none());
                assert!(force);
                assert_eq!(at, PathBuf::from(DEFAULT_REPO_MANIFEST));
            }
            _ => panic!("Expected Set command"),
        }
    }

    #[test]
    fn test_cli_rejects_bad_values() {
        assert!(Cli::try_parse_from(["keyrack", "set", "--key", "nodots", "--vault", "os.direct"]).is_err());
        assert!(Cli::try_parse_from(["keyrack", "set", "--key", "a.b.C", "--vault", "floppy"]).is_err());
        assert!(Cli::try_parse_from(["keyrack", "get", "--key", "a.b.C", "--repo"]).is_err());
        assert!(Cli::try_parse_from(["keyrack", "get", "--repo", "--value"]).is_err());
    }

    #[test]
    fn test_cli_global_owner() {
        let cli = Cli::try_parse_from(["keyrack", "status", "--owner", "ci", "--json"]).unwrap();
        assert_eq!(cli.owner.as_deref(), Some("ci"));
        assert!(matches!(cli.command, Commands::Status { json: true }));
    }

    #[test]
    fn test_cli_unlock_and_target() {
        let cli = Cli::try_parse_from(["keyrack", "unlock", "--repo", "--env", "prod", "--duration", "1h"]).unwrap();
        match cli.command {
            Commands::Unlock { key, repo, env, duration, .. } => {
                assert_eq!(duration.as_deref(), Some("1h"));
                let target = target(key, repo, env).unwrap();
                assert!(matches!(target, GrantTarget::Repo { env: Some(e) } if e == "prod"));
            }
            _ => panic!("Expected Unlock command"),
        }
        assert!(target(None, false, None).is_err());
    }

    #[test]
    fn test_cli_hidden_daemon() {
        let cli = Cli::try_parse_from([
            "keyrack", "daemon", "--socket", "/tmp/k.sock", "--pid-file", "/tmp/k.pid",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Daemon { .. }));
    }
}
