use std::io;

use anyhow::Result;
use clap::{Command, Parser};
use clap_complete::{generate, Shell};

/// Generate shell completions
#[derive(Debug, Parser)]
pub struct Completion {
    #[clap(long = "shell", short = 's', value_enum, default_value_t = Shell::Bash)]
    pub shell: Shell,
}

pub fn completion(args: Completion, app: &mut Command) -> Result<()> {
    let name = app.get_name().to_string();
    generate(args.shell, app, name, &mut io::stdout());

    Ok(())
}
