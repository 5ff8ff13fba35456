//! Dropping root privileges after the listening socket is bound.

use crate::error::BalancerError;

/// Switch the process to `user`, given by name or numeric uid.
///
/// The group is switched first, while the process may still do so.
#[cfg(unix)]
pub fn downgrade_to_user(user: &str) -> Result<(), BalancerError> {
    use nix::unistd::{Uid, User, setgid, setuid};

    let fail = |reason: String| BalancerError::PrivilegeDowngrade {
        user: user.to_string(),
        reason,
    };

    let found = match user.parse::<u32>() {
        Ok(uid) => User::from_uid(Uid::from_raw(uid)),
        Err(_) => User::from_name(user),
    }
    .map_err(|e| fail(e.to_string()))?
    .ok_or_else(|| fail("no such user".to_string()))?;

    setgid(found.gid).map_err(|e| fail(format!("setgid({}): {}", found.gid, e)))?;
    setuid(found.uid).map_err(|e| fail(format!("setuid({}): {}", found.uid, e)))?;
    Ok(())
}

#[cfg(not(unix))]
pub fn downgrade_to_user(user: &str) -> Result<(), BalancerError> {
    Err(BalancerError::PrivilegeDowngrade {
        user: user.to_string(),
        reason: "not supported on this platform".to_string(),
    })
}
