use std::time::Duration;

use color_eyre::eyre;
use serde::{Deserialize, Deserializer};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_accounts")]
    pub accounts: u32,
    #[serde(default = "default_transfers")]
    pub transfers: usize,
    #[serde(default = "default_initial_balance")]
    pub initial_balance: i64,
    /// Per-acquisition bound. Transfers block indefinitely when unset.
    #[serde(default, rename = "timeout_ms", deserialize_with = "deserialize_opt_millis")]
    pub timeout: Option<Duration>,
}

fn default_workers() -> usize {
    8
}

fn default_accounts() -> u32 {
    16
}

fn default_transfers() -> usize {
    1000
}

fn default_initial_balance() -> i64 {
    1000
}

fn deserialize_opt_millis<'de, D>(de: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<u64>::deserialize(de).map(|o| o.map(Duration::from_millis))
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        if self.workers == 0 {
            eyre::bail!("ENTITY_LOCKER_WORKERS must be at least 1");
        }
        if self.accounts < 2 {
            eyre::bail!("ENTITY_LOCKER_ACCOUNTS must be at least 2 to transfer between");
        }
        Ok(())
    }
}
