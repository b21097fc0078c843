//! Ephemeral SSH keypair generation.

use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};

use super::RemoteError;
use super::runner::CommandRunner;

/// A keypair written into the build's work area.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyPair {
    /// Private key file (`<name>.pem`).
    pub private_key: Utf8PathBuf,
    /// Public key file (`<name>.pem.pub`).
    pub public_key_file: Utf8PathBuf,
    /// Public key in OpenSSH `authorized_keys` format.
    pub public_key: String,
}

impl KeyPair {
    /// Both files, private key first.
    #[must_use]
    pub fn files(&self) -> [&Utf8Path; 2] {
        [&self.private_key, &self.public_key_file]
    }
}

/// Generates an unencrypted ed25519 keypair named `<name>.pem` in `dir`.
///
/// # Errors
///
/// Returns [`RemoteError::KeyGeneration`] when `ssh-keygen` fails or the
/// public half cannot be read back.
pub fn generate_keypair<R: CommandRunner>(
    runner: &R,
    keygen_bin: &str,
    dir: &Utf8Path,
    name: &str,
) -> Result<KeyPair, RemoteError> {
    let private_key = dir.join(format!("{name}.pem"));
    let public_key_file = dir.join(format!("{name}.pem.pub"));

    let args = [
        OsString::from("-q"),
        OsString::from("-t"),
        OsString::from("ed25519"),
        OsString::from("-N"),
        OsString::new(),
        OsString::from("-C"),
        OsString::from(name),
        OsString::from("-f"),
        OsString::from(private_key.as_str()),
    ];
    let output = runner.run(keygen_bin, &args)?;
    if !output.is_success() {
        return Err(RemoteError::KeyGeneration(format!(
            "{keygen_bin} exited with status {}: {}",
            output.status_text(),
            output.stderr.trim()
        )));
    }

    let public_key = read_public_key(dir, &format!("{name}.pem.pub"))?;
    Ok(KeyPair {
        private_key,
        public_key_file,
        public_key,
    })
}

fn read_public_key(dir: &Utf8Path, file_name: &str) -> Result<String, RemoteError> {
    let handle = Dir::open_ambient_dir(dir, ambient_authority())
        .map_err(|err| RemoteError::KeyGeneration(format!("open {dir}: {err}")))?;
    let contents = handle
        .read_to_string(file_name)
        .map_err(|err| RemoteError::KeyGeneration(format!("read {file_name}: {err}")))?;
    let key = contents.trim();
    if key.is_empty() {
        return Err(RemoteError::KeyGeneration(format!("{file_name} is empty")));
    }
    Ok(key.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRunner;
    use tempfile::TempDir;

    fn work_dir() -> (TempDir, Utf8PathBuf) {
        let tmp = TempDir::new().expect("tempdir");
        let path = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf8 tempdir");
        (tmp, path)
    }

    #[test]
    fn generate_keypair_invokes_keygen_and_reads_public_half() {
        let (_tmp, dir) = work_dir();
        let runner = ScriptedRunner::new().with_keygen();

        let pair = generate_keypair(&runner, "ssh-keygen", &dir, "ofen-key-abc")
            .expect("keypair should be generated");

        assert_eq!(pair.private_key, dir.join("ofen-key-abc.pem"));
        assert!(pair.public_key.starts_with("ssh-ed25519 "));
        let invocation = runner.invocations().pop().expect("keygen invocation");
        assert_eq!(invocation.program, "ssh-keygen");
        assert!(
            invocation
                .command_string()
                .contains(&format!("-f {}", pair.private_key)),
            "unexpected args: {}",
            invocation.command_string()
        );
    }

    #[test]
    fn generate_keypair_surfaces_keygen_failure() {
        let (_tmp, dir) = work_dir();
        let runner = ScriptedRunner::new();
        runner.push_output(Some(1), "", "Saving key failed");

        let err = generate_keypair(&runner, "ssh-keygen", &dir, "ofen-key-abc")
            .expect_err("keygen failure should surface");

        assert!(err.to_string().contains("Saving key failed"), "{err}");
    }
}
