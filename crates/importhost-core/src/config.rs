use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for a harness instance.
///
/// Durations are (de)serialized as whole milliseconds so the struct can be
/// embedded directly in a TOML config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Host the daemon listens on and that appears in its transport URL.
    pub listen_host: String,
    /// Upper bound on waiting for the daemon's readiness marker.
    #[serde(with = "millis")]
    pub readiness_timeout: Duration,
    /// Delay between readiness checks.
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    /// How long teardown waits after the interrupt before force-killing.
    #[serde(with = "millis")]
    pub stop_grace: Duration,
    /// Pause after releasing an allocated port. Only Windows needs one.
    #[serde(with = "millis")]
    pub port_release_delay: Duration,
    pub committer_name: String,
    pub committer_email: String,
    pub commit_message: String,
}

impl HarnessConfig {
    pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(1);
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);
    pub const DEFAULT_STOP_GRACE: Duration = Duration::from_millis(300);

    /// Build a config from the defaults plus `IMPORTHOST_*` overrides.
    ///
    /// Recognised variables: `IMPORTHOST_LISTEN_HOST`,
    /// `IMPORTHOST_READINESS_TIMEOUT_MS`, `IMPORTHOST_POLL_INTERVAL_MS`,
    /// `IMPORTHOST_STOP_GRACE_MS`. Unparseable values are ignored.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `IMPORTHOST_*` overrides on top of `self`.
    pub fn with_env_overrides(self) -> Self {
        let mut cfg = self;
        if let Ok(host) = env::var("IMPORTHOST_LISTEN_HOST") {
            cfg.listen_host = host;
        }
        if let Some(d) = env_millis("IMPORTHOST_READINESS_TIMEOUT_MS") {
            cfg.readiness_timeout = d;
        }
        if let Some(d) = env_millis("IMPORTHOST_POLL_INTERVAL_MS") {
            cfg.poll_interval = d;
        }
        if let Some(d) = env_millis("IMPORTHOST_STOP_GRACE_MS") {
            cfg.stop_grace = d;
        }
        cfg
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        let port_release_delay = if cfg!(windows) {
            Duration::from_millis(300)
        } else {
            Duration::ZERO
        };
        Self {
            listen_host: "localhost".to_owned(),
            readiness_timeout: Self::DEFAULT_READINESS_TIMEOUT,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            stop_grace: Self::DEFAULT_STOP_GRACE,
            port_release_delay,
            committer_name: "tests".to_owned(),
            committer_email: "tests@importhost.invalid".to_owned(),
            commit_message: "msg".to_owned(),
        }
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
