//! Who and where: local identity strings for headers and lock files.

use std::env;
use std::fs;
use std::process;

/// Best-effort login name of the current user.
#[must_use]
pub fn username() -> String {
    env::var("USER")
        .or_else(|_| env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".into())
}

/// Best-effort name of this machine.
#[must_use]
pub fn hostname() -> String {
    if let Ok(name) = env::var("HOSTNAME") {
        if !name.is_empty() {
            return name;
        }
    }
    if let Ok(name) = fs::read_to_string("/etc/hostname") {
        let name = name.trim();
        if !name.is_empty() {
            return name.to_owned();
        }
    }
    "localhost".into()
}

/// The `user@host:pid` string written into lock files.
#[must_use]
pub fn lock_identity() -> String {
    format!("{}@{}:{}", username(), hostname(), process::id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_has_expected_shape() {
        let id = lock_identity();
        assert!(id.contains('@'));
        assert!(id.contains(':'));
        let pid = id.rsplit(':').next().unwrap();
        assert!(pid.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn username_and_hostname_are_nonempty() {
        assert!(!username().is_empty());
        assert!(!hostname().is_empty());
    }
}
