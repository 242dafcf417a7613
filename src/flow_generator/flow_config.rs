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

use std::time::Duration;

use public::l7_protocol::L7Protocol;

use super::resequencer::DEFAULT_WINDOW;
use crate::common::fragment::ConnectionInfo;
use crate::config::L7FlowConfig;

pub const TIMEOUT_LIVE: Duration = Duration::from_secs(180);
pub const TIMEOUT_CLOSED: Duration = Duration::from_secs(60);
pub const MAX_FLOWS: usize = 160_000;
pub const DETECT_ATTEMPTS: u32 = 64;

#[derive(Clone, Debug, PartialEq)]
pub struct FlowMapConfig {
    pub window: usize,
    pub detect_attempts: u32,
    // empty means every protocol
    pub protocols: Vec<L7Protocol>,

    pub live_timeout: Duration,
    pub closed_timeout: Duration,
    pub max_flows: usize,
    // removals from a table before it is re-allocated
    pub rebuild_threshold: usize,
    pub thread_entry_ttl: Duration,

    pub span_export: bool,
    pub excluded_processes: Vec<String>,
}

impl Default for FlowMapConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            detect_attempts: DETECT_ATTEMPTS,
            protocols: vec![],
            live_timeout: TIMEOUT_LIVE,
            closed_timeout: TIMEOUT_CLOSED,
            max_flows: MAX_FLOWS,
            rebuild_threshold: MAX_FLOWS,
            thread_entry_ttl: Duration::from_secs(600),
            span_export: true,
            excluded_processes: vec![],
        }
    }
}

impl From<&L7FlowConfig> for FlowMapConfig {
    fn from(c: &L7FlowConfig) -> Self {
        Self {
            window: c.resequence_window,
            detect_attempts: c.detect_attempts,
            protocols: c.protocols.clone(),
            live_timeout: c.live_timeout,
            closed_timeout: c.closed_timeout,
            max_flows: c.max_flows,
            rebuild_threshold: c.rebuild_threshold,
            thread_entry_ttl: c.thread_entry_ttl,
            span_export: c.span_export,
            excluded_processes: c.excluded_processes.clone(),
        }
    }
}

impl FlowMapConfig {
    // http is always decoded
    pub fn protocol_allowed(&self, protocol: L7Protocol) -> bool {
        protocol == L7Protocol::Http1
            || self.protocols.is_empty()
            || self.protocols.contains(&protocol)
            || (protocol == L7Protocol::Http2 && self.protocols.contains(&L7Protocol::Grpc))
    }

    pub fn span_allowed(&self, conn: &ConnectionInfo) -> bool {
        self.span_export
            && !self
                .excluded_processes
                .iter()
                .any(|p| *p == conn.process_name)
    }
}
