//! Trace push settings forwarded to every node's environment.

use tracing::debug;

pub const PUSH_BUCKET_NAME: &str = "TRACE_PUSH_BUCKET_NAME";
pub const PUSH_REGION: &str = "TRACE_PUSH_REGION";
pub const PUSH_ACCESS_KEY: &str = "TRACE_PUSH_ACCESS_KEY";
pub const PUSH_SECRET_KEY: &str = "TRACE_PUSH_SECRET_KEY";
pub const PUSH_DELAY: &str = "TRACE_PUSH_DELAY";

#[derive(Clone, PartialEq, Eq)]
pub struct TracePushConfig {
    pub bucket_name: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    /// Seconds between pushes.
    pub push_delay: u64,
}

impl std::fmt::Debug for TracePushConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TracePushConfig")
            .field("bucket_name", &self.bucket_name)
            .field("region", &self.region)
            .field("push_delay", &self.push_delay)
            .finish_non_exhaustive()
    }
}

impl TracePushConfig {
    /// Reads the push settings from the process environment. `None` unless
    /// every variable is set and the delay parses.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let read = |key: &str| {
            let value = lookup(key);
            if value.is_none() {
                debug!(variable = key, "Trace push variable not set");
            }
            value
        };

        let push_delay = match read(PUSH_DELAY)?.parse() {
            Ok(delay) => delay,
            Err(e) => {
                debug!(variable = PUSH_DELAY, error = %e, "Trace push delay is not a number");
                return None;
            }
        };
        Some(Self {
            bucket_name: read(PUSH_BUCKET_NAME)?,
            region: read(PUSH_REGION)?,
            access_key: read(PUSH_ACCESS_KEY)?,
            secret_key: read(PUSH_SECRET_KEY)?,
            push_delay,
        })
    }

    /// Environment variables to set on each node.
    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        vec![
            (PUSH_BUCKET_NAME, self.bucket_name.clone()),
            (PUSH_REGION, self.region.clone()),
            (PUSH_ACCESS_KEY, self.access_key.clone()),
            (PUSH_SECRET_KEY, self.secret_key.clone()),
            (PUSH_DELAY, self.push_delay.to_string()),
        ]
    }
}
