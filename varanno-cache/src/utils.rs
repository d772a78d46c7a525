use std::env;
use std::path::PathBuf;

use dirs::home_dir;

use crate::consts::{DEFAULT_CACHE_FOLDER, VARANNO_CACHE_ENV};

/// Get default cache folder from environment variable, if not available then use the home folder
///
/// # Returns
/// - path to cache folder
pub fn get_default_cache_folder() -> PathBuf {
    if let Ok(val) = env::var(VARANNO_CACHE_ENV) {
        PathBuf::from(val)
    } else {
        let home = env::var("HOME")
            .or_else(|_| {
                home_dir()
                    .map(|p| p.to_string_lossy().into_owned())
                    .ok_or(env::VarError::NotPresent)
            })
            .unwrap_or_else(|_| "/tmp".to_string());

        let mut path = PathBuf::from(home);
        path.push(DEFAULT_CACHE_FOLDER);
        path
    }
}

/// Expand `$VARS` and a leading `~` in a user supplied folder.
pub fn expand_folder(path: PathBuf) -> PathBuf {
    let raw = path.to_string_lossy().into_owned();
    let expanded = shellexpand::full(&raw)
        .map(|s| s.into_owned())
        .unwrap_or(raw);
    PathBuf::from(expanded)
}

/// True when a pipeline version can be embedded in a file name as-is.
pub fn is_safe_version(version: &str) -> bool {
    !version.is_empty()
        && version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[rstest]
    #[case("1", true)]
    #[case("2.1-rc_1", true)]
    #[case("", false)]
    #[case("../x", false)]
    #[case("a b", false)]
    fn test_is_safe_version(#[case] version: &str, #[case] expected: bool) {
        assert_eq!(is_safe_version(version), expected);
    }

    #[rstest]
    fn test_expand_folder_keeps_plain_paths() {
        assert_eq!(expand_folder(PathBuf::from("/data/cache")), PathBuf::from("/data/cache"));
    }
}
