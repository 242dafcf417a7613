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

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use log::debug;

use public::{
    enums::{IpFamily, L4Protocol},
    l7_protocol::L7Protocol,
};

use super::protocol_logs::ProtoData;
use crate::common::{
    flow::Direction, fragment::ConnectionInfo, l7_protocol_info::L7ProtocolInfoInterface,
};
use crate::sender::{Point, METRIC_MEASUREMENT};

const EPHEMERAL_PORT: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggKey {
    pub family: IpFamily,
    pub direction: Direction,
    pub transport: L4Protocol,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: String,
    pub dst_port: String,
    pub process: String,
    pub tags: Vec<(&'static str, String)>,
}

impl AggKey {
    /// Key of a record, `None` for records that are not aggregated.
    ///
    /// The client side port changes per connection, it is `*` in the key:
    /// the source port of outgoing records, the destination port of
    /// incoming ones.
    pub fn new(conn: &ConnectionInfo, record: &ProtoData) -> Option<Self> {
        if !is_routable(&conn.src_ip) || !is_routable(&conn.dst_ip) {
            return None;
        }
        if conn.src_port == 0 || conn.dst_port == 0 {
            return None;
        }
        let (src_port, dst_port) = match record.direction {
            Direction::Out => (EPHEMERAL_PORT.to_owned(), conn.dst_port.to_string()),
            Direction::In => (conn.src_port.to_string(), EPHEMERAL_PORT.to_owned()),
            Direction::Unknown => (conn.src_port.to_string(), conn.dst_port.to_string()),
        };
        Some(Self {
            family: conn.family(),
            direction: record.direction,
            transport: conn.l4_protocol,
            src_ip: conn.src_ip,
            dst_ip: conn.dst_ip,
            src_port,
            dst_port,
            process: conn.process_name.clone(),
            tags: record.info.aggregation_tags(),
        })
    }
}

fn is_routable(ip: &IpAddr) -> bool {
    !ip.is_loopback() && !ip.is_unspecified()
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AggValue {
    pub count: u64,
    pub latency_sum: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl AggValue {
    fn add(&mut self, record: &ProtoData) {
        self.count += 1;
        self.latency_sum += record.duration;
        self.bytes_read += record.bytes_read;
        self.bytes_written += record.bytes_written;
    }

    pub fn latency(&self) -> u64 {
        self.latency_sum.checked_div(self.count).unwrap_or_default()
    }
}

/// Request counters of one protocol keyed by [`AggKey`].
#[derive(Debug)]
pub struct Aggregator {
    protocol: L7Protocol,
    stats: HashMap<AggKey, AggValue>,
}

impl Aggregator {
    pub fn new(protocol: L7Protocol) -> Self {
        Self {
            protocol,
            stats: HashMap::new(),
        }
    }

    pub fn protocol(&self) -> L7Protocol {
        self.protocol
    }

    pub fn obs(&mut self, conn: &ConnectionInfo, record: &ProtoData) -> bool {
        let Some(key) = AggKey::new(conn, record) else {
            return false;
        };
        self.stats.entry(key).or_default().add(record);
        true
    }

    pub fn get(&self, key: &AggKey) -> Option<&AggValue> {
        self.stats.get(key)
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    pub fn export(&self, global_tags: &BTreeMap<String, String>) -> Vec<Point> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        self.export_at(global_tags, now)
    }

    pub fn export_at(&self, global_tags: &BTreeMap<String, String>, time: u64) -> Vec<Point> {
        let mut points = Vec::with_capacity(self.stats.len());
        for (key, value) in self.stats.iter() {
            let mut point = Point::new(METRIC_MEASUREMENT, time);
            for (k, v) in global_tags.iter() {
                point.add_tag(k.as_str(), v.as_str());
            }
            point
                .add_tag("family", key.family.to_string())
                .add_tag("direction", key.direction.as_str())
                .add_tag("transport", key.transport.to_string())
                .add_tag("src_ip", key.src_ip.to_string())
                .add_tag("dst_ip", key.dst_ip.to_string())
                .add_tag("src_port", key.src_port.as_str())
                .add_tag("dst_port", key.dst_port.as_str())
                .add_tag("l7_protocol", self.protocol.as_str());
            if !key.process.is_empty() {
                point.add_tag("process", key.process.as_str());
            }
            for (k, v) in key.tags.iter().filter(|(_, v)| !v.is_empty()) {
                point.add_tag(*k, v.as_str());
            }
            point
                .add_field("count", value.count)
                .add_field("latency", value.latency())
                .add_field("bytes_read", value.bytes_read)
                .add_field("bytes_written", value.bytes_written);
            points.push(point);
        }
        points
    }

    pub fn cleanup(&mut self) {
        self.stats.clear();
        // keep memory after a burst of keys in check
        self.stats.shrink_to(0);
    }
}

/// One [`Aggregator`] per protocol.
#[derive(Debug, Default)]
pub struct AggregatorPool {
    aggregators: HashMap<L7Protocol, Aggregator>,
}

impl AggregatorPool {
    pub fn new(protocols: &[L7Protocol]) -> Self {
        Self {
            aggregators: protocols
                .iter()
                .map(|p| (*p, Aggregator::new(*p)))
                .collect(),
        }
    }

    pub fn obs(&mut self, conn: &ConnectionInfo, record: &ProtoData) -> bool {
        match self.aggregators.get_mut(&record.protocol) {
            Some(agg) => agg.obs(conn, record),
            None => {
                debug!("no aggregator for {}", record.protocol);
                false
            }
        }
    }

    pub fn get(&self, protocol: L7Protocol) -> Option<&Aggregator> {
        self.aggregators.get(&protocol)
    }

    /// Exports every non-empty aggregator and resets it.
    pub fn flush(&mut self, global_tags: &BTreeMap<String, String>) -> Vec<Point> {
        let mut points = vec![];
        for agg in self.aggregators.values_mut().filter(|a| !a.is_empty()) {
            points.extend(agg.export(global_tags));
            agg.cleanup();
        }
        points
    }
}
