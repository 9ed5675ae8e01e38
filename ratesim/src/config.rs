//! JSON configuration: schema, validation, and control-schedule parsing.
//!
//! Everything here fails before the first event is scheduled. Validation
//! produces a [`Plan`]: the algorithm-specific settings resolved to typed
//! values plus the fully parsed retargeting schedule.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::control::ControlEntry;

const DEFAULT_SEED: u64 = 12345;
const DEFAULT_MONITOR_PERIOD: u64 = 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("there must be at least one sender")]
    NoSenders,
    #[error("there must be at least one receiver")]
    NoReceivers,
    #[error("there must be at least one thread")]
    NoThreads,
    #[error("queuing discipline {0:?} is not supported (only \"fifo\")")]
    Queuing(String),
    #[error("rate limit must be in (0, 1], got {0}")]
    RateLimit(f64),
    #[error("message sizes must satisfy 1 <= min <= max, got {min}..{max}")]
    MessageSize { min: u32, max: u32 },
    #[error("monitor period must be at least one tick")]
    MonitorPeriod,
    #[error("the relay algorithm needs at least one relay")]
    NoRelays,
    #[error("relay sender_config needs max_outstanding > 0")]
    MaxOutstanding,
    #[error("dist sender_config is missing {0}")]
    MissingDistSetting(&'static str),
    #[error("dist param {name} out of range: {value}")]
    DistParam { name: &'static str, value: f64 },
    #[error("max_tokens must be at least min_message_size")]
    MaxTokens,
    #[error("max_requests_outstanding must be at least 1 and at most senders - 1")]
    RequestsOutstanding,
    #[error("steal_threshold * max_tokens must cover max_message_size when rate stealing is on")]
    StealFloor,
    #[error("sender_control must not be empty")]
    EmptySchedule,
    #[error("sender_control must start at tick 0")]
    ScheduleStart,
    #[error("sender_control ticks must be strictly increasing")]
    ScheduleOrder,
    #[error("sender_control must end by setting every sender to rate 0")]
    ScheduleEnd,
    #[error("invalid control clause {0:?}")]
    Clause(String),
    #[error("control rate {0} out of range [0, 1]")]
    ControlRate(f64),
    #[error("sender index {0} out of range (senders are 1-based)")]
    SenderIndex(u64),
    #[error("sender {0} retargeted twice in one control entry")]
    DuplicateTarget(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Basic,
    Relay,
    Dist,
}

/// One `[tick, control]` pair from the schedule.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlPoint(pub u64, pub ControlSpec);

/// Either a scalar rate applied to every sender (legacy form) or a string
/// of `group=rate` clauses separated by `:`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ControlSpec {
    Rate(f64),
    Clauses(String),
}

/// DistSender tuning knobs (the `params` object of the dist config).
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DistParams {
    pub max_tokens: u64,
    pub steal_threshold: f64,
    pub token_ask_factor: f64,
    pub rate_ask_factor: f64,
    pub max_requests_outstanding: u32,
    pub give_token_threshold: f64,
    pub give_rate_threshold: f64,
    pub max_rate_give_factor: f64,
}

/// Algorithm-specific settings, shape-checked during validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SenderConfig {
    pub max_outstanding: Option<u32>,
    pub steal_tokens: Option<bool>,
    pub steal_rate: Option<bool>,
    pub params: Option<DistParams>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub senders: u32,
    pub receivers: u32,
    #[serde(default)]
    pub relays: u32,
    #[serde(default = "default_threads")]
    pub threads: u32,
    pub network_delay: u64,
    #[serde(default = "default_queuing")]
    pub queuing: String,
    pub rate_limit: f64,
    pub min_message_size: u32,
    pub max_message_size: u32,
    pub algorithm: Algorithm,
    #[serde(default)]
    pub verbosity: u32,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_monitor_period")]
    pub monitor_period: u64,
    #[serde(default)]
    pub sender_config: SenderConfig,
    pub sender_control: Vec<ControlPoint>,
}

fn default_threads() -> u32 {
    1
}

fn default_queuing() -> String {
    "fifo".to_string()
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

fn default_monitor_period() -> u64 {
    DEFAULT_MONITOR_PERIOD
}

/// Resolved algorithm settings.
#[derive(Debug, Clone)]
pub enum Mode {
    Basic,
    Relay {
        max_outstanding: u32,
    },
    Dist {
        steal_tokens: bool,
        steal_rate: bool,
        params: DistParams,
    },
}

/// Output of validation: everything the orchestrator needs, fully checked.
#[derive(Debug, Clone)]
pub struct Plan {
    pub mode: Mode,
    pub schedule: Vec<ControlEntry>,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check every constraint and resolve algorithm-specific settings.
    pub fn validate(&self) -> Result<Plan, ConfigError> {
        if self.senders < 1 {
            return Err(ConfigError::NoSenders);
        }
        if self.receivers < 1 {
            return Err(ConfigError::NoReceivers);
        }
        if self.threads < 1 {
            return Err(ConfigError::NoThreads);
        }
        if self.queuing != "fifo" {
            // "priority" is reserved for a future variant; reject it along
            // with everything else.
            return Err(ConfigError::Queuing(self.queuing.clone()));
        }
        if !(self.rate_limit > 0.0 && self.rate_limit <= 1.0) {
            return Err(ConfigError::RateLimit(self.rate_limit));
        }
        if self.min_message_size < 1 || self.min_message_size > self.max_message_size {
            return Err(ConfigError::MessageSize {
                min: self.min_message_size,
                max: self.max_message_size,
            });
        }
        if self.monitor_period < 1 {
            return Err(ConfigError::MonitorPeriod);
        }

        let mode = self.validate_sender_config()?;
        let schedule = self.validate_schedule()?;
        Ok(Plan { mode, schedule })
    }

    fn validate_sender_config(&self) -> Result<Mode, ConfigError> {
        match self.algorithm {
            Algorithm::Basic => Ok(Mode::Basic),
            Algorithm::Relay => {
                if self.relays < 1 {
                    return Err(ConfigError::NoRelays);
                }
                let max_outstanding = self
                    .sender_config
                    .max_outstanding
                    .filter(|&m| m > 0)
                    .ok_or(ConfigError::MaxOutstanding)?;
                Ok(Mode::Relay { max_outstanding })
            }
            Algorithm::Dist => {
                let steal_tokens = self
                    .sender_config
                    .steal_tokens
                    .ok_or(ConfigError::MissingDistSetting("steal_tokens"))?;
                let steal_rate = self
                    .sender_config
                    .steal_rate
                    .ok_or(ConfigError::MissingDistSetting("steal_rate"))?;
                let params = self
                    .sender_config
                    .params
                    .ok_or(ConfigError::MissingDistSetting("params"))?;
                self.validate_dist_params(steal_rate, &params)?;
                Ok(Mode::Dist {
                    steal_tokens,
                    steal_rate,
                    params,
                })
            }
        }
    }

    fn validate_dist_params(
        &self,
        steal_rate: bool,
        params: &DistParams,
    ) -> Result<(), ConfigError> {
        let unit = |name: &'static str, value: f64| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(ConfigError::DistParam { name, value })
            }
        };
        let unit_positive = |name: &'static str, value: f64| {
            if value > 0.0 && value <= 1.0 {
                Ok(())
            } else {
                Err(ConfigError::DistParam { name, value })
            }
        };

        unit("steal_threshold", params.steal_threshold)?;
        unit_positive("token_ask_factor", params.token_ask_factor)?;
        unit_positive("rate_ask_factor", params.rate_ask_factor)?;
        unit("give_token_threshold", params.give_token_threshold)?;
        unit("give_rate_threshold", params.give_rate_threshold)?;
        unit_positive("max_rate_give_factor", params.max_rate_give_factor)?;

        if params.max_tokens < self.min_message_size as u64 {
            return Err(ConfigError::MaxTokens);
        }
        if params.max_requests_outstanding < 1
            || params.max_requests_outstanding > self.senders.saturating_sub(1)
        {
            return Err(ConfigError::RequestsOutstanding);
        }
        // A sender whose rate was fully stolen recovers only through
        // incoming gifts; this floor guarantees the starvation condition
        // is detectable before the queue head becomes unsendable.
        if steal_rate
            && params.steal_threshold * (params.max_tokens as f64) < self.max_message_size as f64
        {
            return Err(ConfigError::StealFloor);
        }
        Ok(())
    }

    fn validate_schedule(&self) -> Result<Vec<ControlEntry>, ConfigError> {
        if self.sender_control.is_empty() {
            return Err(ConfigError::EmptySchedule);
        }

        let mut entries = Vec::with_capacity(self.sender_control.len());
        let mut last_tick = None;
        for point in &self.sender_control {
            match last_tick {
                None if point.0 != 0 => return Err(ConfigError::ScheduleStart),
                Some(prev) if point.0 <= prev => return Err(ConfigError::ScheduleOrder),
                _ => {}
            }
            last_tick = Some(point.0);
            entries.push(ControlEntry {
                tick: point.0,
                targets: self.parse_control(&point.1)?,
            });
        }

        // The schedule drives termination: its final entry must idle the
        // whole fleet.
        let last = entries.last().expect("non-empty");
        let all_zero = last.targets.len() == self.senders as usize
            && last.targets.iter().all(|&(_, rate)| rate == 0.0);
        if !all_zero {
            return Err(ConfigError::ScheduleEnd);
        }

        Ok(entries)
    }

    /// Parse one control spec into `(sender offset, rate)` targets.
    /// Groups are `*`, a 1-based index `N`, or a 1-based inclusive range
    /// `N-M`; no sender may be targeted twice by one entry.
    fn parse_control(&self, spec: &ControlSpec) -> Result<Vec<(u32, f64)>, ConfigError> {
        let clauses = match spec {
            ControlSpec::Rate(rate) => {
                check_rate(*rate)?;
                return Ok((0..self.senders).map(|s| (s, *rate)).collect());
            }
            ControlSpec::Clauses(text) => text,
        };

        let mut targets: Vec<(u32, f64)> = Vec::new();
        let mut seen = vec![false; self.senders as usize];
        let mut mark = |offset: u32, rate: f64| {
            if std::mem::replace(&mut seen[offset as usize], true) {
                return Err(ConfigError::DuplicateTarget(offset + 1));
            }
            targets.push((offset, rate));
            Ok(())
        };

        for clause in clauses.split(':') {
            let (group, rate_text) = clause
                .split_once('=')
                .ok_or_else(|| ConfigError::Clause(clause.to_string()))?;
            let rate: f64 = rate_text
                .parse()
                .map_err(|_| ConfigError::Clause(clause.to_string()))?;
            check_rate(rate)?;

            if group == "*" {
                for offset in 0..self.senders {
                    mark(offset, rate)?;
                }
            } else if let Some((lo, hi)) = group.split_once('-') {
                let lo = parse_index(lo, clause)?;
                let hi = parse_index(hi, clause)?;
                if lo > hi {
                    return Err(ConfigError::Clause(clause.to_string()));
                }
                for idx in lo..=hi {
                    mark(self.offset_of(idx)?, rate)?;
                }
            } else {
                let idx = parse_index(group, clause)?;
                mark(self.offset_of(idx)?, rate)?;
            }
        }
        Ok(targets)
    }

    /// 1-based sender index to 0-based offset, range-checked.
    fn offset_of(&self, index: u64) -> Result<u32, ConfigError> {
        if index < 1 || index > self.senders as u64 {
            return Err(ConfigError::SenderIndex(index));
        }
        Ok((index - 1) as u32)
    }
}

fn check_rate(rate: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&rate) {
        Ok(())
    } else {
        Err(ConfigError::ControlRate(rate))
    }
}

fn parse_index(text: &str, clause: &str) -> Result<u64, ConfigError> {
    text.parse()
        .map_err(|_| ConfigError::Clause(clause.to_string()))
}
