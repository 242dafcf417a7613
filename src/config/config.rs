/*
 * Copyright (c) 2024 Yunshan Networks
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use log::warn;
use serde::{
    de::{self, Unexpected},
    Deserialize, Deserializer,
};
use thiserror::Error;

use public::l7_protocol::L7Protocol;

use crate::common::DEFAULT_LOG_FILE;
use crate::flow_generator::{flow_config, resequencer::DEFAULT_WINDOW};

const MINUTE: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("yaml config invalid: {0}")]
    YamlConfigInvalid(String),
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    #[serde(flatten)]
    pub log: LogConfig,
    pub l7_flow: L7FlowConfig,
}

impl Config {
    pub fn load_from_file<T: AsRef<Path>>(path: T) -> Result<Self, ConfigError> {
        let contents =
            fs::read_to_string(path).map_err(|e| ConfigError::YamlConfigInvalid(e.to_string()))?;
        Self::load(&contents)
    }

    pub fn load<C: AsRef<str>>(contents: C) -> Result<Self, ConfigError> {
        let contents = contents.as_ref();
        let mut cfg = if contents.trim().is_empty() {
            // parsing empty string leads to EOF error
            Self::default()
        } else {
            serde_yaml::from_str(contents)
                .map_err(|e| ConfigError::YamlConfigInvalid(e.to_string()))?
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Replaces zero values by their defaults, rejects what cannot work.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.log.log_level.trim().is_empty() {
            self.log.log_level = LogConfig::default().log_level;
        }
        if self.log.log_file.is_empty() {
            self.log.log_file = DEFAULT_LOG_FILE.to_owned();
        }
        self.l7_flow.validate()
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct LogConfig {
    pub log_file: String,
    // flexi_logger spec, such as "info,l7_flow_tracer::flow_generator=debug"
    pub log_level: String,
    pub log_retention_days: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_file: DEFAULT_LOG_FILE.to_owned(),
            log_level: "info".to_owned(),
            log_retention_days: 7,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct L7FlowConfig {
    pub resequence_window: usize,
    pub detect_attempts: u32,
    #[serde(deserialize_with = "to_l7_protocols")]
    pub protocols: Vec<L7Protocol>,

    #[serde(with = "humantime_serde")]
    pub live_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub closed_timeout: Duration,
    pub max_flows: usize,
    pub rebuild_threshold: usize,
    #[serde(with = "humantime_serde")]
    pub thread_entry_ttl: Duration,

    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub thread_cleanup_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub span_flush_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub metric_interval: Duration,

    pub span_export: bool,
    pub excluded_processes: Vec<String>,
    pub global_tags: BTreeMap<String, String>,

    pub fragment_queue_size: usize,
    pub point_queue_size: usize,
}

impl Default for L7FlowConfig {
    fn default() -> Self {
        Self {
            resequence_window: DEFAULT_WINDOW,
            detect_attempts: flow_config::DETECT_ATTEMPTS,
            protocols: vec![],
            live_timeout: flow_config::TIMEOUT_LIVE,
            closed_timeout: flow_config::TIMEOUT_CLOSED,
            max_flows: flow_config::MAX_FLOWS,
            rebuild_threshold: flow_config::MAX_FLOWS,
            thread_entry_ttl: 10 * MINUTE,
            sweep_interval: 2 * MINUTE,
            thread_cleanup_interval: 5 * MINUTE,
            span_flush_interval: Duration::from_secs(5),
            metric_interval: Duration::from_secs(10),
            span_export: true,
            excluded_processes: vec![env!("CARGO_PKG_NAME").to_owned()],
            global_tags: BTreeMap::new(),
            fragment_queue_size: 1 << 12,
            point_queue_size: 1 << 10,
        }
    }
}

impl L7FlowConfig {
    fn validate(&mut self) -> Result<(), ConfigError> {
        let d = Self::default();
        if self.resequence_window < 2 {
            warn!(
                "resequence-window {} too small, use {}",
                self.resequence_window, d.resequence_window
            );
            self.resequence_window = d.resequence_window;
        }
        if self.detect_attempts == 0 {
            self.detect_attempts = d.detect_attempts;
        }
        if self.max_flows == 0 {
            self.max_flows = d.max_flows;
        }
        if self.rebuild_threshold == 0 {
            self.rebuild_threshold = d.rebuild_threshold;
        }
        if self.fragment_queue_size == 0 {
            self.fragment_queue_size = d.fragment_queue_size;
        }
        if self.point_queue_size == 0 {
            self.point_queue_size = d.point_queue_size;
        }
        for (value, default) in [
            (&mut self.live_timeout, d.live_timeout),
            (&mut self.closed_timeout, d.closed_timeout),
            (&mut self.thread_entry_ttl, d.thread_entry_ttl),
            (&mut self.sweep_interval, d.sweep_interval),
            (&mut self.thread_cleanup_interval, d.thread_cleanup_interval),
            (&mut self.span_flush_interval, d.span_flush_interval),
            (&mut self.metric_interval, d.metric_interval),
        ] {
            if value.is_zero() {
                *value = default;
            }
        }
        if self.closed_timeout > self.live_timeout {
            return Err(ConfigError::InvalidValue(format!(
                "closed-timeout {:?} longer than live-timeout {:?}",
                self.closed_timeout, self.live_timeout
            )));
        }
        Ok(())
    }
}

fn to_l7_protocols<'de, D>(deserializer: D) -> Result<Vec<L7Protocol>, D::Error>
where
    D: Deserializer<'de>,
{
    let names = Vec::<String>::deserialize(deserializer)?;
    let mut protocols = Vec::with_capacity(names.len());
    for name in names.iter() {
        let protocol = L7Protocol::try_from(name.as_str()).map_err(|_| {
            de::Error::invalid_value(
                Unexpected::Str(name),
                &"http|http2|grpc|mysql|postgresql|redis|amqp",
            )
        })?;
        if !protocols.contains(&protocol) {
            protocols.push(protocol);
        }
    }
    Ok(protocols)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults() {
        let c = Config::load("").unwrap();
        assert_eq!(c, Config::default());
        assert_eq!(c.log.log_level, "info");
        assert_eq!(c.l7_flow.resequence_window, 36);
        assert_eq!(c.l7_flow.detect_attempts, 64);
        assert_eq!(c.l7_flow.live_timeout, Duration::from_secs(180));
        assert_eq!(c.l7_flow.closed_timeout, Duration::from_secs(60));
        assert_eq!(c.l7_flow.max_flows, 160_000);
        assert_eq!(c.l7_flow.span_flush_interval, Duration::from_secs(5));
        assert_eq!(c.l7_flow.excluded_processes, vec!["l7-flow-tracer".to_owned()]);
    }

    #[test]
    fn load_yaml() {
        let yaml = r#"
log-file: /tmp/l7.log
log-level: debug
l7-flow:
  resequence-window: 0
  protocols: [redis, HTTP, grpc, redis]
  live-timeout: 5m
  closed-timeout: 30s
  span-flush-interval: 1s 500ms
  span-export: false
  global-tags:
    host: node-1
"#;
        let c = Config::load(yaml).unwrap();
        assert_eq!(c.log.log_file, "/tmp/l7.log");
        assert_eq!(c.log.log_level, "debug");
        assert_eq!(c.log.log_retention_days, 7);
        let f = &c.l7_flow;
        assert_eq!(f.resequence_window, 36);
        assert_eq!(
            f.protocols,
            vec![L7Protocol::Redis, L7Protocol::Http1, L7Protocol::Grpc]
        );
        assert_eq!(f.live_timeout, Duration::from_secs(300));
        assert_eq!(f.closed_timeout, Duration::from_secs(30));
        assert_eq!(f.span_flush_interval, Duration::from_millis(1500));
        assert_eq!(f.metric_interval, Duration::from_secs(10));
        assert!(!f.span_export);
        assert_eq!(f.global_tags.get("host").map(|s| s.as_str()), Some("node-1"));
    }

    #[test]
    fn invalid() {
        assert!(matches!(
            Config::load("l7-flow:\n  protocols: [kafka]\n"),
            Err(ConfigError::YamlConfigInvalid(_))
        ));
        assert!(matches!(
            Config::load("l7-flow:\n  live-timeout: 10s\n  closed-timeout: 1m\n"),
            Err(ConfigError::InvalidValue(_))
        ));
        assert!(Config::load("l7-flow: [1, 2]").is_err());
    }

    #[test]
    fn from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "l7-flow:\n  max-flows: 1000\n  sweep-interval: 30s").unwrap();
        let c = Config::load_from_file(file.path()).unwrap();
        assert_eq!(c.l7_flow.max_flows, 1000);
        assert_eq!(c.l7_flow.sweep_interval, Duration::from_secs(30));
        assert!(Config::load_from_file("/nonexistent/l7-flow-tracer.yaml").is_err());
    }
}
