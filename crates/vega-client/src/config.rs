// Client-side defaults and tuning overrides.
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::{ClientError, Result};

pub(crate) const DEFAULT_POLL_WINDOW: Duration = Duration::from_secs(60);
pub(crate) const DEFAULT_RECEIVE_QUEUE_DEPTH: usize = 64;

/// Runtime tuning for the feature layer.
///
/// Defaults match the documented protocol (1-minute long-poll window).
/// Overrides come from the environment (`VEGA_POLL_WINDOW_MS`,
/// `VEGA_RECEIVE_QUEUE_DEPTH`) or a YAML file named by `VEGA_CLIENT_CONFIG`
/// or an explicit path.
#[derive(Debug, Clone)]
pub struct ClientTuning {
    /// How long each long poll blocks before the loop re-arms. Shutdown and
    /// liveness checks happen at these window boundaries.
    pub poll_window: Duration,
    /// Channel depth between a receiver's pump task and its consumer.
    pub receive_queue_depth: usize,
}

impl Default for ClientTuning {
    fn default() -> Self {
        Self {
            poll_window: DEFAULT_POLL_WINDOW,
            receive_queue_depth: DEFAULT_RECEIVE_QUEUE_DEPTH,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
struct TuningOverride {
    poll_window_ms: Option<u64>,
    receive_queue_depth: Option<usize>,
}

impl ClientTuning {
    pub fn from_env_or_yaml(config_path: Option<&str>) -> Result<Self> {
        let mut tuning = Self::from_env();
        let override_path = config_path
            .map(|value| value.to_string())
            .or_else(|| std::env::var("VEGA_CLIENT_CONFIG").ok());
        if let Some(path) = override_path.as_deref() {
            let contents = fs::read_to_string(path)
                .map_err(|err| ClientError::Config(format!("read client config {path}: {err}")))?;
            let override_cfg: TuningOverride = serde_yaml::from_str(&contents)
                .map_err(|err| ClientError::Config(format!("parse client config {path}: {err}")))?;
            override_cfg.apply(&mut tuning);
        }
        Ok(tuning)
    }

    pub fn from_env() -> Self {
        let mut tuning = Self::default();
        if let Some(value) = read_u64_env("VEGA_POLL_WINDOW_MS") {
            tuning.poll_window = Duration::from_millis(value);
        }
        if let Some(value) = read_usize_env("VEGA_RECEIVE_QUEUE_DEPTH") {
            tuning.receive_queue_depth = value;
        }
        tuning
    }
}

impl TuningOverride {
    fn apply(&self, tuning: &mut ClientTuning) {
        if let Some(value) = self.poll_window_ms
            && value > 0
        {
            tuning.poll_window = Duration::from_millis(value);
        }
        if let Some(value) = self.receive_queue_depth
            && value > 0
        {
            tuning.receive_queue_depth = value;
        }
    }
}

fn read_u64_env(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
}

fn read_usize_env(key: &str) -> Option<usize> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
}
