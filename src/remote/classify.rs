//! Classification of failed `ssh` connection attempts.
//!
//! OpenSSH reports every client-side failure with exit status 255 and a
//! human-readable stderr line, so the only way to tell "not up yet" from
//! "will never work" is by matching that text.

use super::runner::CommandOutput;

/// Exit status OpenSSH uses for its own (non-remote) failures.
pub const SSH_CLIENT_FAILURE: i32 = 255;

const RETRYABLE_MARKERS: &[&str] = &[
    "connection refused",
    "connection timed out",
    "operation timed out",
    "no route to host",
    "network is unreachable",
    "host is unreachable",
    "connection reset",
    "connection closed",
    "kex_exchange_identification",
    "permission denied",
    "could not resolve hostname",
];

const AUTH_MARKERS: &[&str] = &[
    "passphrase",
    "invalid format",
    "bad permissions",
    "load key",
    "unprotected private key",
];

/// Outcome of a single connection attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConnectOutcome {
    /// The remote shell ran the test command.
    Connected,
    /// The host is not ready yet; the attempt may be repeated.
    Retryable(String),
    /// The key itself was rejected; retrying cannot help.
    AuthRejected(String),
    /// Any other client failure.
    Fatal(String),
}

/// Classifies the output of an `ssh ... true` check.
///
/// "Permission denied" is retryable because cloud-init installs the
/// authorised key after sshd is already accepting connections.
#[must_use]
pub fn classify_connect(output: &CommandOutput) -> ConnectOutcome {
    match output.code {
        Some(SSH_CLIENT_FAILURE) => classify_stderr(&output.stderr),
        Some(_) => ConnectOutcome::Connected,
        None => ConnectOutcome::Retryable(String::from("ssh terminated by signal")),
    }
}

fn classify_stderr(stderr: &str) -> ConnectOutcome {
    let reason = last_line(stderr);
    let lowered = stderr.to_ascii_lowercase();

    if AUTH_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return ConnectOutcome::AuthRejected(reason);
    }
    if RETRYABLE_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return ConnectOutcome::Retryable(reason);
    }
    ConnectOutcome::Fatal(reason)
}

fn last_line(stderr: &str) -> String {
    stderr
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .map_or_else(|| String::from("ssh exited with status 255"), str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn output(code: Option<i32>, stderr: &str) -> CommandOutput {
        CommandOutput {
            code,
            stdout: String::new(),
            stderr: stderr.to_owned(),
        }
    }

    #[rstest]
    #[case("ssh: connect to host 10.0.0.5 port 22: Connection refused")]
    #[case("ssh: connect to host 10.0.0.5 port 22: Connection timed out")]
    #[case("ssh: connect to host 10.0.0.5 port 22: No route to host")]
    #[case("kex_exchange_identification: read: Connection reset by peer")]
    #[case("ubuntu@10.0.0.5: Permission denied (publickey).")]
    fn transient_failures_are_retryable(#[case] stderr: &str) {
        let outcome = classify_connect(&output(Some(255), stderr));
        assert_eq!(outcome, ConnectOutcome::Retryable(stderr.to_owned()));
    }

    #[rstest]
    #[case("Load key \"/tmp/k.pem\": invalid format")]
    #[case("Enter passphrase for key '/tmp/k.pem':")]
    #[case("Permissions 0644 for '/tmp/k.pem' are too open.\nbad permissions: ignore key")]
    fn key_rejections_are_auth_errors(#[case] stderr: &str) {
        let outcome = classify_connect(&output(Some(255), stderr));
        assert!(
            matches!(outcome, ConnectOutcome::AuthRejected(_)),
            "unexpected outcome: {outcome:?}"
        );
    }

    #[test]
    fn unknown_client_failure_is_fatal() {
        let outcome = classify_connect(&output(Some(255), "Bad configuration option: Foo"));
        assert_eq!(
            outcome,
            ConnectOutcome::Fatal(String::from("Bad configuration option: Foo"))
        );
    }

    #[rstest]
    #[case(Some(0))]
    #[case(Some(1))]
    fn remote_exit_status_means_connected(#[case] code: Option<i32>) {
        assert_eq!(classify_connect(&output(code, "")), ConnectOutcome::Connected);
    }

    #[test]
    fn empty_stderr_gets_a_readable_reason() {
        assert_eq!(
            classify_connect(&output(Some(255), "")),
            ConnectOutcome::Fatal(String::from("ssh exited with status 255"))
        );
    }
}
