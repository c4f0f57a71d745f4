use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Conflict resolution strategy applied when a remote change targets a
/// locally dirty document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Keep the local dirty version; the next upload overwrites the remote.
    Local,
    /// Discard the local version and download the remote one.
    Server,
    /// Keep both: the local bytes become a timestamped conflict copy.
    #[default]
    Both,
    /// Emit a conflict event and wait for an explicit resolution.
    Ask,
}

/// How the remote tree is projected onto the local filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MountStrategy {
    /// Spawn the filesystem bridge; content is downloaded lazily on open.
    #[default]
    Bridge,
    /// Materialize every file into a local sync folder watched for changes.
    Shallow,
}

/// A string whose value must not leak into logs, Debug output, or
/// re-serialized config dumps.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("****")
    }
}

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    /// Access the underlying value.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

/// Human-readable duration (e.g., "200ms", "5s", "2m", "1h").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumanDuration(pub std::time::Duration);

impl HumanDuration {
    pub fn as_duration(&self) -> std::time::Duration {
        self.0
    }

    pub fn from_secs(secs: u64) -> Self {
        HumanDuration(std::time::Duration::from_secs(secs))
    }
}

impl FromStr for HumanDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();

        let (num_str, unit) = if s.ends_with("ms") {
            (&s[..s.len() - 2], "ms")
        } else if s.ends_with('s') {
            (&s[..s.len() - 1], "s")
        } else if s.ends_with('m') {
            (&s[..s.len() - 1], "m")
        } else if s.ends_with('h') {
            (&s[..s.len() - 1], "h")
        } else {
            return Err(format!("Invalid duration format: {}", s));
        };

        let num: u64 = num_str
            .parse()
            .map_err(|_| format!("Invalid number in duration: {}", s))?;

        let duration = match unit {
            "ms" => std::time::Duration::from_millis(num),
            "s" => std::time::Duration::from_secs(num),
            "m" => std::time::Duration::from_secs(num * 60),
            "h" => std::time::Duration::from_secs(num * 3600),
            _ => return Err(format!("Unknown duration unit: {}", unit)),
        };

        Ok(HumanDuration(duration))
    }
}

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let millis = self.0.as_millis();
        if millis < 1000 {
            write!(f, "{}ms", millis)
        } else {
            let secs = self.0.as_secs();
            if secs % 3600 == 0 && secs >= 3600 {
                write!(f, "{}h", secs / 3600)
            } else if secs % 60 == 0 && secs >= 60 {
                write!(f, "{}m", secs / 60)
            } else {
                write!(f, "{}s", secs)
            }
        }
    }
}

impl Serialize for HumanDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Human-readable byte size (e.g., "512kb", "100mb", "2gb").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumanSize(pub u64);

impl HumanSize {
    pub fn as_bytes(&self) -> u64 {
        self.0
    }
}

impl FromStr for HumanSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();

        let (num_str, multiplier) = if s.ends_with("kb") {
            (&s[..s.len() - 2], 1024u64)
        } else if s.ends_with("mb") {
            (&s[..s.len() - 2], 1024 * 1024)
        } else if s.ends_with("gb") {
            (&s[..s.len() - 2], 1024 * 1024 * 1024)
        } else if s.ends_with('b') {
            (&s[..s.len() - 1], 1)
        } else {
            (s.as_str(), 1)
        };

        let num: u64 = num_str
            .trim()
            .parse()
            .map_err(|_| format!("Invalid number in size: {}", s))?;

        Ok(HumanSize(num * multiplier))
    }
}

impl fmt::Display for HumanSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const GB: u64 = 1024 * 1024 * 1024;
        const MB: u64 = 1024 * 1024;
        const KB: u64 = 1024;
        if self.0 >= GB && self.0 % GB == 0 {
            write!(f, "{}gb", self.0 / GB)
        } else if self.0 >= MB && self.0 % MB == 0 {
            write!(f, "{}mb", self.0 / MB)
        } else if self.0 >= KB && self.0 % KB == 0 {
            write!(f, "{}kb", self.0 / KB)
        } else {
            write!(f, "{}b", self.0)
        }
    }
}

impl Serialize for HumanSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HumanSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Remote API connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the document API.
    pub base_url: String,
    /// Bearer token for the API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<Secret>,
    /// Per-request timeout.
    #[serde(default = "crate::defaults::remote_timeout")]
    pub timeout: HumanDuration,
}

/// Local content cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory holding cached document bytes and the manifest.
    pub dir: String,
    /// Maximum total size of cached content.
    #[serde(default = "crate::defaults::cache_max_size")]
    pub max_size: HumanSize,
    /// Delay after the last mutation before the manifest is persisted.
    #[serde(default = "crate::defaults::cache_persist_debounce")]
    pub persist_debounce: HumanDuration,
}

/// Sync engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Interval between periodic sync cycles. A floor is enforced.
    #[serde(default = "crate::defaults::sync_interval")]
    pub interval: HumanDuration,
    /// Quiescence window before a local write is considered settled.
    #[serde(default = "crate::defaults::write_settle")]
    pub write_settle: HumanDuration,
    /// Upload attempts before a dirty file needs manual attention.
    #[serde(default = "crate::defaults::retry_limit")]
    pub retry_limit: u32,
    /// Conflict resolution strategy.
    #[serde(default)]
    pub conflict: ConflictStrategy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            interval: crate::defaults::sync_interval(),
            write_settle: crate::defaults::write_settle(),
            retry_limit: crate::defaults::retry_limit(),
            conflict: ConflictStrategy::default(),
        }
    }
}

/// Mount settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    /// Mount point path (or drive identifier on platforms that use one).
    pub point: String,
    /// Projection strategy.
    #[serde(default)]
    pub strategy: MountStrategy,
}

/// Top-level matterfs configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveConfig {
    pub remote: RemoteConfig,
    pub cache: CacheConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    pub mount: MountConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_duration_parse() {
        assert_eq!(
            "200ms".parse::<HumanDuration>().unwrap().as_duration(),
            std::time::Duration::from_millis(200)
        );
        assert_eq!(
            "5s".parse::<HumanDuration>().unwrap().as_duration(),
            std::time::Duration::from_secs(5)
        );
        assert_eq!(
            "2m".parse::<HumanDuration>().unwrap().as_duration(),
            std::time::Duration::from_secs(120)
        );
        assert!("5x".parse::<HumanDuration>().is_err());
    }

    #[test]
    fn test_human_size_parse() {
        assert_eq!("512".parse::<HumanSize>().unwrap().as_bytes(), 512);
        assert_eq!("512b".parse::<HumanSize>().unwrap().as_bytes(), 512);
        assert_eq!("4kb".parse::<HumanSize>().unwrap().as_bytes(), 4096);
        assert_eq!(
            "2gb".parse::<HumanSize>().unwrap().as_bytes(),
            2 * 1024 * 1024 * 1024
        );
        assert!("lots".parse::<HumanSize>().is_err());
    }

    #[test]
    fn test_human_size_display_roundtrip() {
        for s in ["512b", "4kb", "100mb", "2gb"] {
            let parsed: HumanSize = s.parse().unwrap();
            assert_eq!(parsed.to_string(), s);
        }
    }

    #[test]
    fn test_secret_redacted() {
        let secret = Secret::new("token-abc");
        assert_eq!(format!("{:?}", secret), "Secret(****)");
        assert_eq!(format!("{}", secret), "****");
        assert_eq!(secret.expose(), "token-abc");
    }

    #[test]
    fn test_conflict_strategy_serde() {
        let s: ConflictStrategy = serde_yaml::from_str("ask").unwrap();
        assert_eq!(s, ConflictStrategy::Ask);
        assert_eq!(ConflictStrategy::default(), ConflictStrategy::Both);
    }
}
