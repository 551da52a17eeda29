use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

/// Runtime tuning for a worker process, read from the environment at start.
/// The defaults are the contract: a 1 second idle sleep and a 300 second
/// hard limit per command.
#[derive(Envconfig, Debug, Clone, Copy)]
pub struct WorkerSettings {
    /// How long to sleep when no job is eligible to claim.
    #[envconfig(from = "QUEUECTL_POLL_INTERVAL_MS", default = "1000")]
    pub poll_interval: EnvMsDuration,

    /// Wall-clock limit for a single command execution.
    #[envconfig(from = "QUEUECTL_JOB_TIMEOUT_MS", default = "300000")]
    pub job_timeout: EnvMsDuration,
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let settings = WorkerSettings::init_from_hashmap(&HashMap::new())
            .expect("defaults should initialize");
        assert_eq!(settings.poll_interval.0, time::Duration::from_secs(1));
        assert_eq!(settings.job_timeout.0, time::Duration::from_secs(300));
    }

    #[test]
    fn test_rejects_non_numeric_durations() {
        assert!("fast".parse::<EnvMsDuration>().is_err());
        assert_eq!(
            "250".parse::<EnvMsDuration>().map(|d| d.0),
            Ok(time::Duration::from_millis(250))
        );
    }
}
