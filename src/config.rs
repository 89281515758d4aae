//! # Configuration
//!
//! Loading and defaults for a peer's tunables (§6). As in this codebase's
//! original configuration module, settings load from a TOML file via the
//! `config` crate, with a `Default` impl supplying sensible values for
//! running a peer (or a test) without any file at all.
//!
//! ## Example Configuration File (config.toml)
//! ```toml
//! port = 55516
//! group = "224.224.224.1"
//! ttl = 2
//! election_window_low_ms = 100
//! election_window_high_ms = 500
//! snapshot_pacing_ms = 1
//! observer_queue_depth = 1024
//! max_frame_bytes = 65535
//! ```

use std::net::Ipv4Addr;
use std::path::Path;

use anyhow::Result;
use config::{Config as ConfigLib, File};
use serde::{Deserialize, Serialize};

/// A peer's full set of tunables (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// UDP port the group multicasts on.
    pub port: u16,

    /// The IP multicast group address to join.
    pub group: Ipv4Addr,

    /// Multicast TTL (hop count); limits how far frames travel.
    pub ttl: u32,

    /// Lower bound, in milliseconds, of the randomized election wait
    /// before a peer volunteers to answer a `SyncReq` (§4.4).
    pub election_window_low_ms: u64,

    /// Upper bound, in milliseconds, of the randomized election wait.
    pub election_window_high_ms: u64,

    /// Delay between successive snapshot `Update` frames sent by the
    /// elected volunteer, so a bulk sync doesn't saturate the group in a
    /// single burst (§4.4).
    pub snapshot_pacing_ms: u64,

    /// Bound on each subscriber's pending-change queue (§4.6).
    pub observer_queue_depth: usize,

    /// Largest encoded frame this peer will send or accept (§4.2).
    pub max_frame_bytes: usize,
}

impl PeerConfig {
    /// Load configuration from a TOML file, falling back to [`PeerConfig`]'s
    /// `Default` for any field the file omits.
    pub fn load(path: &Path) -> Result<Self> {
        let settings = ConfigLib::builder().add_source(File::from(path)).build()?;
        let config: PeerConfig = settings.try_deserialize()?;
        Ok(config)
    }

    /// The randomized election wait window as a `(low, high)` pair in
    /// milliseconds, ready for `rand::thread_rng().gen_range(low..=high)`.
    pub fn election_window_ms(&self) -> (u64, u64) {
        (self.election_window_low_ms, self.election_window_high_ms)
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            port: 55516,
            group: Ipv4Addr::new(224, 224, 224, 1),
            ttl: 2,
            election_window_low_ms: 100,
            election_window_high_ms: 500,
            snapshot_pacing_ms: 1,
            observer_queue_depth: 1024,
            max_frame_bytes: 65535,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = PeerConfig::default();
        assert_eq!(config.port, 55516);
        assert_eq!(config.group, Ipv4Addr::new(224, 224, 224, 1));
        assert_eq!(config.election_window_ms(), (100, 500));
    }

    #[test]
    fn load_overrides_only_the_fields_present_in_the_file() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
port = 6000
group = "239.1.1.1"
"#
        )
        .unwrap();

        let config = PeerConfig::load(file.path()).unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.group, Ipv4Addr::new(239, 1, 1, 1));
        // Untouched fields keep their defaults.
        assert_eq!(config.ttl, 2);
        assert_eq!(config.observer_queue_depth, 1024);
    }

    #[test]
    fn load_rejects_a_missing_file() {
        assert!(PeerConfig::load(Path::new("/nonexistent/config.toml")).is_err());
    }
}
