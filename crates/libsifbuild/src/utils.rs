//! Utility functionality

use std::io::{ErrorKind, Write};
use std::process::{Command, Output, Stdio};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("failed to spawn {program}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("failed to write stdin of {program}")]
    Stdin {
        program: String,
        source: std::io::Error,
    },
    #[error("failed to wait for {program}")]
    Wait {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} exited with code {code:?}: {output}")]
    NonZeroExit {
        program: String,
        code: Option<i32>,
        output: String,
    },
}

fn program_name(cmd: &Command) -> String {
    cmd.get_program().to_string_lossy().into_owned()
}

/// Runs a command to completion, capturing stdout and stderr. When `input`
/// is given it is written to the child's stdin, which is then closed.
pub fn run_command(cmd: &mut Command, input: Option<&[u8]>) -> Result<Output, CommandError> {
    let program = program_name(cmd);
    tracing::debug!(?cmd, "running command");

    let stdin = if input.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    };
    let mut child = cmd
        .stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| {
            tracing::error!(?err, %program, "failed to spawn command");
            CommandError::Spawn {
                program: program.clone(),
                source: err,
            }
        })?;

    if let (Some(input), Some(mut pipe)) = (input, child.stdin.take()) {
        // A BrokenPipe means the child already exited. Its exit status tells
        // whether that was a failure, so only other errors are fatal here.
        if let Err(err) = pipe.write_all(input) {
            if err.kind() != ErrorKind::BrokenPipe {
                let _ = child.kill();
                let _ = child.wait();
                tracing::error!(?err, %program, "failed to write to stdin");
                return Err(CommandError::Stdin {
                    program,
                    source: err,
                });
            }
        }
    }

    let output = child.wait_with_output().map_err(|err| {
        tracing::error!(?err, %program, "failed to wait for command");
        CommandError::Wait {
            program: program.clone(),
            source: err,
        }
    })?;

    if !output.status.success() {
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        tracing::error!(%program, code = ?output.status.code(), "command failed");
        return Err(CommandError::NonZeroExit {
            program,
            code: output.status.code(),
            output: combined.trim_end().to_owned(),
        });
    }

    Ok(output)
}
