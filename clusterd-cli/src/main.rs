//! clusterd: cluster file-sync status daemon.
//!
//! # Usage
//!
//! ```text
//! clusterd [-f] [-d]... [-t <role>] [--root <dir>]
//! clusterd -V
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{ArgAction, Parser};

use clusterd_daemon::paths::{DAEMON_NAME, DEFAULT_ROOT};
use clusterd_daemon::{init_tracing, start_blocking, DaemonConfig};

#[derive(Parser, Debug)]
#[command(
    name = "clusterd",
    version,
    about = "Track per-manager file synchronization status and watch cluster files for changes",
    long_about = None,
)]
struct Cli {
    /// Run in the foreground.
    #[arg(short = 'f')]
    foreground: bool,

    /// Increase log verbosity (-d debug, -dd trace). RUST_LOG takes precedence.
    #[arg(short = 'd', action = ArgAction::Count)]
    debug: u8,

    /// Node role used to select watch-list entries (e.g. master, client).
    #[arg(short = 't', value_name = "ROLE")]
    role: Option<String>,

    /// Install root holding etc/, queue/, var/ and framework/.
    #[arg(long, value_name = "DIR", env = "CLUSTERD_ROOT", default_value = DEFAULT_ROOT)]
    root: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{DAEMON_NAME}: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    init_tracing(cli.debug);
    if !cli.foreground {
        tracing::info!("not detaching; leave backgrounding to the service manager");
    }

    let config = DaemonConfig::load(cli.root, cli.role)?;
    tracing::debug!(?config, "resolved configuration");

    start_blocking(config)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_parse() {
        let cli = Cli::try_parse_from(["clusterd", "-f", "-dd", "-t", "master", "--root", "/opt/ossec"])
            .unwrap();
        assert!(cli.foreground);
        assert_eq!(cli.debug, 2);
        assert_eq!(cli.role.as_deref(), Some("master"));
        assert_eq!(cli.root, PathBuf::from("/opt/ossec"));
    }
}
