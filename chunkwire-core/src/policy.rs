use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreResult, StreamError};

/// Named timeout presets for common deployment shapes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    #[default]
    Default,
    FastLocal,
    Cloud,
    CliSubprocess,
}

impl Preset {
    pub fn policy(self) -> TimeoutPolicy {
        match self {
            Preset::Default => TimeoutPolicy::DEFAULT,
            Preset::FastLocal => TimeoutPolicy::FAST_LOCAL,
            Preset::Cloud => TimeoutPolicy::CLOUD,
            Preset::CliSubprocess => TimeoutPolicy::CLI_SUBPROCESS,
        }
    }
}

impl std::str::FromStr for Preset {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Preset::Default),
            "fast_local" | "fast-local" => Ok(Preset::FastLocal),
            "cloud" => Ok(Preset::Cloud),
            "cli_subprocess" | "cli-subprocess" => Ok(Preset::CliSubprocess),
            other => Err(StreamError::Validation(format!(
                "unknown timeout preset '{other}'"
            ))),
        }
    }
}

/// First-chunk, inter-chunk and total-stream limits for one stream.
/// All three are strictly positive; construction through [`TimeoutPolicy::new`] checks this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    first_chunk: Duration,
    inter_chunk: Duration,
    total_stream: Duration,
}

impl TimeoutPolicy {
    /// 30s / 15s / 5min.
    pub const DEFAULT: TimeoutPolicy = TimeoutPolicy {
        first_chunk: Duration::from_secs(30),
        inter_chunk: Duration::from_secs(15),
        total_stream: Duration::from_secs(300),
    };

    /// Local inference servers: 10s / 5s / 3min.
    pub const FAST_LOCAL: TimeoutPolicy = TimeoutPolicy {
        first_chunk: Duration::from_secs(10),
        inter_chunk: Duration::from_secs(5),
        total_stream: Duration::from_secs(180),
    };

    /// Hosted cloud providers: 60s / 30s / 10min.
    pub const CLOUD: TimeoutPolicy = TimeoutPolicy {
        first_chunk: Duration::from_secs(60),
        inter_chunk: Duration::from_secs(30),
        total_stream: Duration::from_secs(600),
    };

    /// CLI subprocesses: 45s / 20s / 5min.
    pub const CLI_SUBPROCESS: TimeoutPolicy = TimeoutPolicy {
        first_chunk: Duration::from_secs(45),
        inter_chunk: Duration::from_secs(20),
        total_stream: Duration::from_secs(300),
    };

    pub fn new(
        first_chunk: Duration,
        inter_chunk: Duration,
        total_stream: Duration,
    ) -> CoreResult<Self> {
        for (name, value) in [
            ("first_chunk", first_chunk),
            ("inter_chunk", inter_chunk),
            ("total_stream", total_stream),
        ] {
            if value.is_zero() {
                return Err(StreamError::Validation(format!(
                    "{name} timeout must be greater than zero"
                )));
            }
        }
        Ok(Self {
            first_chunk,
            inter_chunk,
            total_stream,
        })
    }

    pub fn first_chunk(&self) -> Duration {
        self.first_chunk
    }

    pub fn inter_chunk(&self) -> Duration {
        self.inter_chunk
    }

    pub fn total_stream(&self) -> Duration {
        self.total_stream
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}
