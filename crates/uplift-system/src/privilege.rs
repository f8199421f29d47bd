use anyhow::Result;

pub trait PrivilegeCheck {
    fn is_elevated(&self) -> Result<bool>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OsPrivileges;

impl PrivilegeCheck for OsPrivileges {
    fn is_elevated(&self) -> Result<bool> {
        Ok(current_user_is_administrator())
    }
}

#[cfg(unix)]
pub fn current_user_is_administrator() -> bool {
    nix::unistd::Uid::effective().is_root()
}

// `net session` only succeeds from an elevated token.
#[cfg(windows)]
pub fn current_user_is_administrator() -> bool {
    use std::process::{Command, Stdio};

    Command::new("net")
        .arg("session")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(not(any(unix, windows)))]
pub fn current_user_is_administrator() -> bool {
    false
}
