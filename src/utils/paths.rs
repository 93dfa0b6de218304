//! Filesystem path helpers.

use std::path::PathBuf;

use directories::UserDirs;

pub fn home_dir() -> Option<PathBuf> {
    UserDirs::new().map(|dirs| dirs.home_dir().to_path_buf())
}

/// The user's desktop directory, falling back to the home directory when no
/// desktop exists (headless machines, unusual XDG setups).
pub fn desktop_dir() -> Option<PathBuf> {
    let dirs = UserDirs::new()?;
    match dirs.desktop_dir() {
        Some(desktop) if desktop.is_dir() => Some(desktop.to_path_buf()),
        _ => Some(dirs.home_dir().to_path_buf()),
    }
}

/// Expands a leading `~` or `~/` to the home directory. Anything else passes
/// through untouched, including `~user` forms.
pub fn expand_tilde(raw: &str) -> String {
    if raw == "~" {
        return home_dir()
            .map(|home| home.display().to_string())
            .unwrap_or_else(|| raw.to_string());
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(rest).display().to_string();
        }
    }
    raw.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_tilde_prefix() {
        if let Some(home) = home_dir() {
            let expanded = expand_tilde("~/projects");
            assert_eq!(expanded, home.join("projects").display().to_string());
            assert_eq!(expand_tilde("~"), home.display().to_string());
        }
    }

    #[test]
    fn leaves_other_paths_alone() {
        assert_eq!(expand_tilde("/usr/bin/env"), "/usr/bin/env");
        assert_eq!(expand_tilde("relative/path"), "relative/path");
        assert_eq!(expand_tilde("~otheruser/file"), "~otheruser/file");
    }
}
