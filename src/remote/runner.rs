//! Process execution abstraction shared by the SSH client and the libvirt
//! provider.

use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::process::{Command, Stdio};
use std::thread;

use super::RemoteError;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Renders the exit status for error messages.
    #[must_use]
    pub fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RemoteError>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RemoteError> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| RemoteError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Command runner that mirrors child output to the local terminal while
/// still capturing it.
///
/// Remote configuration commands can run for many minutes; streaming keeps
/// the operator informed instead of dumping everything once the command ends.
#[derive(Clone, Copy, Debug, Default)]
pub struct StreamingCommandRunner;

impl CommandRunner for StreamingCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RemoteError> {
        let spawn_error = |err: io::Error| RemoteError::Spawn {
            program: program.to_owned(),
            message: err.to_string(),
        };

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_error)?;

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        let stderr_thread = thread::spawn(move || tee_lines(stderr_pipe, io::stderr()));
        let stdout = tee_lines(stdout_pipe, io::stdout());
        let stderr = stderr_thread.join().unwrap_or_default();

        let status = child.wait().map_err(spawn_error)?;

        Ok(CommandOutput {
            code: status.code(),
            stdout,
            stderr,
        })
    }
}

fn tee_lines<R: Read, W: Write>(source: Option<R>, mut sink: W) -> String {
    let Some(pipe) = source else {
        return String::new();
    };

    let mut captured = String::new();
    let mut reader = BufReader::new(pipe);
    let mut line = Vec::new();
    while let Ok(read) = reader.read_until(b'\n', &mut line) {
        if read == 0 {
            break;
        }
        sink.write_all(&line).ok();
        sink.flush().ok();
        captured.push_str(&String::from_utf8_lossy(&line));
        line.clear();
    }
    captured
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tee_lines_captures_and_forwards_every_line() {
        let input: &[u8] = b"first\nsecond\nno-newline";
        let mut forwarded = Vec::new();

        let captured = tee_lines(Some(input), &mut forwarded);

        assert_eq!(captured, "first\nsecond\nno-newline");
        assert_eq!(forwarded, input);
    }

    #[test]
    fn tee_lines_without_pipe_is_empty() {
        let captured = tee_lines(None::<&[u8]>, Vec::new());
        assert!(captured.is_empty());
    }

    #[test]
    fn status_text_reports_unknown_without_code() {
        let output = CommandOutput {
            code: None,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(output.status_text(), "unknown");
        assert!(!output.is_success());
    }
}
