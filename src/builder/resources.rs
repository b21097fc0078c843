//! Ledger of everything a build has created, plus its scoped work area.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use tempfile::TempDir;
use uuid::Uuid;

use crate::provider::{AccessRuleRef, CredentialRef, InstanceRef, PublicAddressRef};
use crate::remote::KeyPair;

/// Backend-visible names for one build's ephemeral resources.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceNames {
    /// Credential (key pair) name.
    pub credential: String,
    /// Access rule (security group) name.
    pub access_rule: String,
    /// Instance name.
    pub instance: String,
}

impl ResourceNames {
    /// Derives names from a fresh random suffix.
    #[must_use]
    pub fn generate() -> Self {
        let suffix: String = Uuid::new_v4().simple().to_string().chars().take(12).collect();
        Self::with_suffix(&suffix)
    }

    /// Derives names from `suffix`.
    #[must_use]
    pub fn with_suffix(suffix: &str) -> Self {
        Self {
            credential: format!("ofen-key-{suffix}"),
            access_rule: format!("ofen-grp-{suffix}"),
            instance: format!("ofen-build-{suffix}"),
        }
    }
}

/// Temporary directory holding the private key and, for local hypervisors,
/// the disk copy and seed image.
#[derive(Debug)]
pub struct WorkArea {
    dir: TempDir,
    path: Utf8PathBuf,
}

impl WorkArea {
    /// Creates `ofen-*` under `root`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error when the directory cannot be created or its
    /// path is not UTF-8.
    pub fn create(root: &Utf8Path) -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("ofen-").tempdir_in(root)?;
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).map_err(|path| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("work area path is not UTF-8: {}", path.display()),
            )
        })?;
        Ok(Self { dir, path })
    }

    /// Directory path.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Removes the directory and everything in it.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from the recursive delete.
    pub fn remove(self) -> io::Result<()> {
        self.dir.close()
    }
}

/// What the builder has created so far. Teardown drains it.
#[derive(Debug, Default)]
pub(crate) struct ResourceLedger {
    pub(crate) work_area: Option<WorkArea>,
    pub(crate) keypair: Option<KeyPair>,
    pub(crate) credential: Option<CredentialRef>,
    pub(crate) access_rule: Option<AccessRuleRef>,
    pub(crate) instance: Option<InstanceRef>,
    pub(crate) public_address: Option<PublicAddressRef>,
    pub(crate) launch_submitted: bool,
    pub(crate) instance_captured: bool,
}

/// Deletes `path`, treating an already missing file as success.
pub(crate) fn remove_file_ambient(path: &Utf8Path) -> io::Result<()> {
    let (Some(parent), Some(file_name)) = (path.parent(), path.file_name()) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("not a file path: {path}"),
        ));
    };
    let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    match dir.remove_file(file_name) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}
