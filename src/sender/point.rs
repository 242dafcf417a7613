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
use std::fmt::{self, Write};

use serde::Serialize;
use serde_json::Value;

use crate::common::{
    flow::Direction, fragment::ConnectionInfo, l7_protocol_info::L7ProtocolInfoInterface,
};
use crate::flow_generator::protocol_logs::ProtoData;

pub const SPAN_MEASUREMENT: &str = "l7trace";
pub const METRIC_MEASUREMENT: &str = "l7flow";

pub const FIELD_DIRECTION: &str = "direction";
pub const FIELD_THREAD_TRACE_ID: &str = "thread_trace_id";
pub const FIELD_KERNEL_THREAD: &str = "kernel_thread";
pub const FIELD_USER_THREAD: &str = "user_thread";
pub const FIELD_KTIME: &str = "ktime";

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Uint(u64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}i", v),
            Self::Uint(v) => write!(f, "{}u", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Str(v) => write!(f, "\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\"")),
        }
    }
}

impl FieldValue {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Uint(v) => Some(*v),
            Self::Int(v) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Uint(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

macro_rules! impl_from_value {
    ($($t:ty => $variant:ident as $as:ty),+$(,)?) => {
        $(
            impl From<$t> for FieldValue {
                fn from(v: $t) -> Self {
                    Self::$variant(v as $as)
                }
            }
        )+
    };
}

impl_from_value!(
    i32 => Int as i64,
    i64 => Int as i64,
    u16 => Uint as u64,
    u32 => Uint as u64,
    u64 => Uint as u64,
    f64 => Float as f64,
);

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

/// One measurement sample, tags are the identity and fields the values.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: &'static str,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    // unix time, ns
    pub time: u64,
}

impl Point {
    pub fn new(measurement: &'static str, time: u64) -> Self {
        Self {
            measurement,
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            time,
        }
    }

    pub fn add_tag<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) -> &mut Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn add_field<K: Into<String>, V: Into<FieldValue>>(
        &mut self,
        key: K,
        value: V,
    ) -> &mut Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(|s| s.as_str())
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    /// Line protocol rendering, `measurement,tags fields time`.
    pub fn to_kv_string(&self, kv_string: &mut String) {
        kv_string.push_str(self.measurement);
        for (k, v) in self.tags.iter() {
            let _ = write!(kv_string, ",{}={}", escape_key(k), escape_key(v));
        }
        for (i, (k, v)) in self.fields.iter().enumerate() {
            let sep = if i == 0 { ' ' } else { ',' };
            let _ = write!(kv_string, "{}{}={}", sep, escape_key(k), v);
        }
        let _ = write!(kv_string, " {}", self.time);
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = String::new();
        self.to_kv_string(&mut s);
        f.write_str(&s)
    }
}

fn escape_key(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, ',' | '=' | ' ') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn span_type(direction: Direction) -> &'static str {
    match direction {
        Direction::In => "entry",
        Direction::Out => "exit",
        Direction::Unknown => "unknown",
    }
}

/// Span point of a finished record.
///
/// Outgoing spans get no `thread_trace_id` here, it is filled in later with
/// [`ThreadTraceIndex::get_inner_id`](crate::flow_generator::ThreadTraceIndex::get_inner_id)
/// once the incoming request of the same thread had time to show up.
pub fn span_point(record: &ProtoData, conn: &ConnectionInfo) -> Point {
    let mut point = Point::new(SPAN_MEASUREMENT, record.time);

    // protocol specific attributes
    if let Ok(Value::Object(attrs)) = serde_json::to_value(&record.info) {
        for (k, v) in attrs {
            let value = match v {
                Value::Null => continue,
                Value::Bool(b) => FieldValue::Bool(b),
                Value::String(s) => FieldValue::Str(s),
                Value::Number(n) => match (n.as_u64(), n.as_i64()) {
                    (Some(u), _) => FieldValue::Uint(u),
                    (_, Some(i)) => FieldValue::Int(i),
                    _ => FieldValue::Float(n.as_f64().unwrap_or_default()),
                },
                other => FieldValue::Str(other.to_string()),
            };
            point.fields.insert(k, value);
        }
    }
    point
        .add_field("l7_protocol", record.protocol.as_str())
        .add_field("operation", record.info.operation())
        .add_field("status", record.info.status().as_str());

    let meta = &record.meta;
    point
        .add_field("span_type", span_type(record.direction))
        .add_field(FIELD_DIRECTION, record.direction.as_str())
        .add_field("req_seq", meta.req_tcp_seq)
        .add_field("resp_seq", meta.resp_tcp_seq)
        .add_field(FIELD_KERNEL_THREAD, meta.threads[0][0])
        .add_field(FIELD_KTIME, record.ktime);
    if record.direction == Direction::In {
        point.add_field(FIELD_THREAD_TRACE_ID, meta.inner_id);
    }
    if meta.threads[0][1] != 0 {
        point.add_field(FIELD_USER_THREAD, meta.threads[0][1]);
    }
    if let Some(trace) = meta.app_trace.filter(|t| t.is_valid()) {
        point
            .add_field("app_trace_id", trace.trace_id_string())
            .add_field("app_parent_id", trace.parent_id_string())
            .add_field("app_span_sampled", if trace.sampled { 1i64 } else { -1i64 });
    }

    point
        .add_field("source_type", "ebpf")
        .add_field("process_name", conn.process_name.as_str())
        .add_field("thread_name", conn.task_name.as_str())
        .add_field("service", conn.service())
        .add_field("pid", conn.pid.to_string())
        .add_field("src_ip", conn.src_ip.to_string())
        .add_field("dst_ip", conn.dst_ip.to_string())
        .add_field("src_port", conn.src_port.to_string())
        .add_field("dst_port", conn.dst_port.to_string())
        .add_field("start", record.time / 1000)
        .add_field("duration", record.duration / 1000)
        .add_field("cost", record.cost)
        .add_field("bytes_read", record.bytes_read)
        .add_field("bytes_written", record.bytes_written);
    point
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::common::l7_protocol_info::L7ProtocolInfo;
    use crate::flow_generator::protocol_logs::{AppTraceContext, ProtoMeta, RedisInfo};
    use public::l7_protocol::L7Protocol;

    fn record(direction: Direction) -> ProtoData {
        ProtoData {
            protocol: L7Protocol::Redis,
            direction,
            info: L7ProtocolInfo::RedisInfo(RedisInfo::default()),
            meta: ProtoMeta {
                threads: [[1001, 0], [1001, 0]],
                inner_id: 77,
                req_tcp_seq: 10,
                resp_tcp_seq: 20,
                app_trace: None,
            },
            bytes_read: 30,
            bytes_written: 40,
            time: 1_700_000_000_123_456_789,
            ktime: 5000,
            cost: 300,
            duration: 2_500,
        }
    }

    #[test]
    fn span_fields() {
        let conn = ConnectionInfo {
            src_port: 6379,
            dst_port: 50000,
            pid: 7,
            process_name: "redis-server".to_owned(),
            ..Default::default()
        };
        let p = span_point(&record(Direction::In), &conn);
        assert_eq!(p.measurement, SPAN_MEASUREMENT);
        assert_eq!(p.field("span_type").and_then(|v| v.as_str()), Some("entry"));
        assert_eq!(p.field(FIELD_THREAD_TRACE_ID).and_then(|v| v.as_u64()), Some(77));
        assert_eq!(p.field("start").and_then(|v| v.as_u64()), Some(1_700_000_000_123_456));
        assert_eq!(p.field("duration").and_then(|v| v.as_u64()), Some(2));
        assert_eq!(p.field("service").and_then(|v| v.as_str()), Some("redis-server"));
        assert_eq!(p.field("pid").and_then(|v| v.as_str()), Some("7"));
        assert!(p.field(FIELD_USER_THREAD).is_none());
        assert!(p.field("app_trace_id").is_none());

        let mut out = record(Direction::Out);
        out.meta.threads[0][1] = 2002;
        out.meta.app_trace = Some(AppTraceContext {
            trace_id: 0xabc,
            parent_id: 0x12,
            sampled: false,
            hex_encoded: true,
        });
        let p = span_point(&out, &conn);
        assert_eq!(p.field("span_type").and_then(|v| v.as_str()), Some("exit"));
        assert!(p.field(FIELD_THREAD_TRACE_ID).is_none());
        assert_eq!(p.field(FIELD_USER_THREAD).and_then(|v| v.as_i64()), Some(2002));
        assert_eq!(p.field("app_span_sampled").and_then(|v| v.as_i64()), Some(-1));
        assert!(p.field("app_parent_id").is_some());
    }

    #[test]
    fn kv_string() {
        let mut p = Point::new(METRIC_MEASUREMENT, 42);
        p.add_tag("process", "my app")
            .add_tag("l7_protocol", "HTTP")
            .add_field("count", 3u64)
            .add_field("path", "a\"b");
        assert_eq!(
            p.to_string(),
            "l7flow,l7_protocol=HTTP,process=my\\ app count=3u,path=\"a\\\"b\" 42"
        );
    }
}
