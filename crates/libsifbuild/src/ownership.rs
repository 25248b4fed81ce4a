//! Hands the finished image back to the user who ran the build through sudo

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use nix::unistd::{Gid, Uid};
use regex::Regex;

use crate::syscall::{Syscall, SyscallError};

pub const SUDO_COMMAND: &str = "SUDO_COMMAND";
pub const SUDO_USER: &str = "SUDO_USER";
pub const SUDO_UID: &str = "SUDO_UID";
pub const SUDO_GID: &str = "SUDO_GID";

#[derive(Debug, thiserror::Error)]
#[error("failed to change ownership of {path:?} to {uid}:{gid}")]
pub struct OwnershipChangeError {
    pub path: PathBuf,
    pub uid: Uid,
    pub gid: Gid,
    pub source: SyscallError,
}

/// Decides who should own the image. `None` leaves ownership untouched.
pub fn resolve_ownership_target(
    env: &HashMap<String, String>,
    is_superuser: bool,
    pattern: &Regex,
) -> Option<(Uid, Gid)> {
    let command = env.get(SUDO_COMMAND)?;
    if !pattern.is_match(command) {
        return None;
    }

    let user = env.get(SUDO_USER).map(String::as_str).unwrap_or_default();
    if user.is_empty() || !is_superuser {
        return None;
    }

    let (Some(uid), Some(gid)) = (env.get(SUDO_UID), env.get(SUDO_GID)) else {
        tracing::warn!(%user, "SUDO_UID or SUDO_GID not set, keeping ownership");
        return None;
    };

    match (uid.parse::<u32>(), gid.parse::<u32>()) {
        (Ok(uid), Ok(gid)) => Some((Uid::from_raw(uid), Gid::from_raw(gid))),
        (uid_res, gid_res) => {
            tracing::warn!(
                uid_err = ?uid_res.err(),
                gid_err = ?gid_res.err(),
                "invalid SUDO_UID or SUDO_GID, keeping ownership"
            );
            None
        }
    }
}

/// The subset of the process environment the ownership decision reads
pub fn sudo_env() -> HashMap<String, String> {
    [SUDO_COMMAND, SUDO_USER, SUDO_UID, SUDO_GID]
        .into_iter()
        .filter_map(|key| std::env::var(key).ok().map(|value| (key.to_owned(), value)))
        .collect()
}

pub fn apply_ownership(
    path: &Path,
    env: &HashMap<String, String>,
    syscall: &dyn Syscall,
    pattern: &Regex,
) -> Result<Option<(Uid, Gid)>, OwnershipChangeError> {
    let Some((uid, gid)) = resolve_ownership_target(env, syscall.is_superuser(), pattern) else {
        return Ok(None);
    };

    tracing::debug!(?path, %uid, %gid, "changing image ownership");
    syscall
        .chown(path, Some(uid), Some(gid))
        .map_err(|err| OwnershipChangeError {
            path: path.to_owned(),
            uid,
            gid,
            source: err,
        })?;
    Ok(Some((uid, gid)))
}

/// Changes ownership of the image when invoked through sudo. A failure is
/// logged and does not fail the build.
pub fn finalize_ownership(path: &Path, syscall: &dyn Syscall, pattern: &Regex) {
    if let Err(err) = apply_ownership(path, &sudo_env(), syscall, pattern) {
        tracing::warn!(?err, "could not change ownership of the image");
    }
}
