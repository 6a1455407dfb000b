/* Daemon configuration: a flat key/value file.
 *
 *     user = root
 *     profile = 1
 *     capture_delays = true
 *     pid-file = /var/run/sidewinderd.pid
 *
 * Values written in the old libconfig style (`user = "root";`) are accepted
 * too. Missing keys are added with their defaults and the file is written
 * back, so a fresh install ends up with a complete, editable config. */

use std::path::{Path, PathBuf};

use configparser::ini::Ini;
use tracing::{debug, warn};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/sidewinderd.conf";

/* Keys outside any section land in configparser's default section. */
const SECTION: &str = "default";

const KEY_USER: &str = "user";
const KEY_PROFILE: &str = "profile";
const KEY_CAPTURE_DELAYS: &str = "capture_delays";
const KEY_PID_FILE: &str = "pid-file";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /* Account the daemon drops privileges to. */
    pub user: String,
    /* 1-based profile active at start-up. */
    pub profile: u32,
    /* Replay macros with their recorded timing. */
    pub capture_delays: bool,
    pub pid_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            profile: 1,
            capture_delays: true,
            pid_file: PathBuf::from("/var/run/sidewinderd.pid"),
        }
    }
}

impl Config {
    /* Read `path`, fill in defaults and write missing keys back. */
    /* Never fails: unreadable files fall back to the defaults. */
    pub fn load(path: &Path) -> Self {
        let mut ini = Ini::new();
        if let Err(e) = ini.load(path) {
            warn!("Failed to read config {}: {e}", path.display());
        }

        let added = fill_defaults(&mut ini);
        if added > 0 {
            debug!("Adding {added} default keys to {}", path.display());
            if let Err(e) = ini.write(path) {
                warn!("Failed to write config {}: {e}", path.display());
            }
        }

        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Self {
        let defaults = Self::default();
        let value = |key: &str| ini.get(SECTION, key).map(|v| clean_value(&v));

        let profile = match value(KEY_PROFILE).map(|v| v.parse::<u32>()) {
            Some(Ok(p)) if p >= 1 => p,
            Some(_) => {
                warn!("Invalid {KEY_PROFILE}, using {}", defaults.profile);
                defaults.profile
            }
            None => defaults.profile,
        };

        let capture_delays = match value(KEY_CAPTURE_DELAYS).as_deref().map(parse_bool) {
            Some(Some(b)) => b,
            Some(None) => {
                warn!("Invalid {KEY_CAPTURE_DELAYS}, using {}", defaults.capture_delays);
                defaults.capture_delays
            }
            None => defaults.capture_delays,
        };

        Self {
            user: value(KEY_USER)
                .filter(|u| !u.is_empty())
                .unwrap_or(defaults.user),
            profile,
            capture_delays,
            pid_file: value(KEY_PID_FILE)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.pid_file),
        }
    }

    /* 0-based start-up profile. */
    pub fn profile_index(&self) -> u8 {
        u8::try_from(self.profile.saturating_sub(1)).unwrap_or(u8::MAX)
    }
}

/* Add every missing key with its default. Returns how many were added. */
fn fill_defaults(ini: &mut Ini) -> usize {
    let defaults = Config::default();
    let entries = [
        (KEY_USER, defaults.user.clone()),
        (KEY_PROFILE, defaults.profile.to_string()),
        (KEY_CAPTURE_DELAYS, defaults.capture_delays.to_string()),
        (KEY_PID_FILE, defaults.pid_file.display().to_string()),
    ];

    let mut added = 0;
    for (key, value) in entries {
        if ini.get(SECTION, key).is_none() {
            ini.set(SECTION, key, Some(value));
            added += 1;
        }
    }
    added
}

/* Strip libconfig leftovers: trailing `;` and surrounding quotes. */
fn clean_value(raw: &str) -> String {
    let v = raw.trim().trim_end_matches(';').trim();
    v.strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(v)
        .to_string()
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Config {
        let mut ini = Ini::new();
        ini.read(text.to_string()).unwrap();
        Config::from_ini(&ini)
    }

    #[test]
    fn test_parse_full_file() {
        let config = parse(
            "user = alice\nprofile = 3\ncapture_delays = false\npid-file = /run/sw.pid\n",
        );
        assert_eq!(config.user, "alice");
        assert_eq!(config.profile, 3);
        assert_eq!(config.profile_index(), 2);
        assert!(!config.capture_delays);
        assert_eq!(config.pid_file, PathBuf::from("/run/sw.pid"));
    }

    #[test]
    fn test_parse_libconfig_style() {
        let config = parse("user = \"bob\";\nprofile = 2;\ncapture_delays = true;\n");
        assert_eq!(config.user, "bob");
        assert_eq!(config.profile, 2);
        assert!(config.capture_delays);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = parse("profile = zero\ncapture_delays = maybe\n");
        assert_eq!(config, Config::default());
        assert_eq!(parse("profile = 0\n").profile, 1);
    }

    #[test]
    fn test_load_writes_missing_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sidewinderd.conf");
        std::fs::write(&path, "profile = 2\n").unwrap();

        let config = Config::load(&path);
        assert_eq!(config.profile, 2);
        assert_eq!(config.user, "root");

        let reloaded = parse(&std::fs::read_to_string(&path).unwrap());
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.conf");
        assert_eq!(Config::load(&path), Config::default());
        assert!(path.exists());
    }

    #[test]
    fn test_clean_value() {
        assert_eq!(clean_value(" \"root\"; "), "root");
        assert_eq!(clean_value("plain"), "plain");
        assert_eq!(clean_value("\"unterminated"), "\"unterminated");
    }
}
