//! # sifbuild
//! Assembles a single-file SIF container image from a prepared root
//! filesystem, the build recipe and JSON metadata.
mod commands;
mod observability;

use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing::Level;

use crate::observability::LogFormat;

// High-level commandline option definition
#[derive(Parser, Debug)]
#[clap(version, author = env!("CARGO_PKG_AUTHORS"))]
struct Opts {
    #[clap(flatten)]
    global: GlobalOpts,

    #[clap(subcommand)]
    subcmd: SubCommand,
}

#[derive(Parser, Debug)]
pub struct GlobalOpts {
    /// set the log file to write logs to (default is '/dev/stderr')
    #[clap(short, long, global = true, overrides_with("log"))]
    log: Option<PathBuf>,
    /// change log level to debug, but the `log-level` flag takes precedence
    #[clap(long, global = true)]
    debug: bool,
    /// set the log format
    #[clap(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
    /// set the log level (default is 'error'), falls back to $SIFBUILD_LOG_LEVEL
    #[clap(long, global = true)]
    log_level: Option<Level>,
    /// also send logs to the systemd journal
    #[clap(long, global = true)]
    systemd_log: bool,
}

#[derive(Parser, Debug)]
enum SubCommand {
    Build(commands::build::Build),
    Inspect(commands::inspect::Inspect),
    Completion(commands::completion::Completion),
}

fn main() -> Result<()> {
    let opts = Opts::parse();
    let mut app = Opts::command();

    if let Err(e) = observability::init(&opts.global) {
        eprintln!("log init failed: {e:?}");
    }

    tracing::debug!(
        "started by user {} with {:?}",
        nix::unistd::geteuid(),
        std::env::args_os()
    );

    match opts.subcmd {
        SubCommand::Build(build) => commands::build::build(build),
        SubCommand::Inspect(inspect) => commands::inspect::inspect(inspect),
        SubCommand::Completion(completion) => {
            commands::completion::completion(completion, &mut app)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_consistent() {
        Opts::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() -> Result<()> {
        let opts = Opts::try_parse_from([
            "sifbuild",
            "inspect",
            "image.sif",
            "--log-level",
            "info",
            "--debug",
        ])?;
        assert_eq!(opts.global.log_level, Some(Level::INFO));
        assert_eq!(opts.global.log_format, LogFormat::Text);
        assert!(opts.global.debug);
        assert!(matches!(opts.subcmd, SubCommand::Inspect(_)));
        Ok(())
    }

    #[test]
    fn test_invalid_log_options_rejected() {
        for args in [
            ["sifbuild", "--log-level", "loud", "inspect", "image.sif"],
            ["sifbuild", "--log-format", "yaml", "inspect", "image.sif"],
        ] {
            assert!(Opts::try_parse_from(args).is_err(), "{args:?}");
        }
        let opts = Opts::try_parse_from(["sifbuild", "--log-format", "json", "inspect", "x.sif"]);
        assert!(matches!(opts, Ok(o) if o.global.log_format == LogFormat::Json));
    }
}
