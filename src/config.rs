//! Coordinator configuration.

use std::error::Error;

use serde_derive::{Deserialize, Serialize};

pub const DEFAULT_TIMEOUT_MS: i64 = 15_000;
const DEFAULT_MAX_KEYS_PER_ATTEMPT: usize = 4096;
const DEFAULT_MAX_ENLIST_RETRIES: u32 = 16;
const DEFAULT_EC_MODE: bool = false;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Used when a caller does not supply an explicit per-attempt timeout.
    pub default_timeout_ms: i64,
    /// Hard cap on `keys.len()` for a single attempt; guards against a
    /// caller building an unbounded per-node request.
    pub max_keys_per_attempt: usize,
    /// Bounds the entry-enlister's retry loop on `EntryRemoved` (§4.2 step
    /// 4) so a entry that is perpetually evicted cannot spin the mapping
    /// pass forever.
    pub max_enlist_retries: u32,
    /// Eventually-consistent mode: entries are rechecked asynchronously
    /// after the response applier installs a value (§4.6 step 7).
    pub ec_mode: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            max_keys_per_attempt: DEFAULT_MAX_KEYS_PER_ATTEMPT,
            max_enlist_retries: DEFAULT_MAX_ENLIST_RETRIES,
            ec_mode: DEFAULT_EC_MODE,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), Box<dyn Error>> {
        if self.max_keys_per_attempt == 0 {
            return Err("max-keys-per-attempt must be greater than 0".into());
        }
        if self.max_enlist_retries == 0 {
            return Err("max-enlist-retries must be greater than 0".into());
        }
        Ok(())
    }
}
