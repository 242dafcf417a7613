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

pub mod consts;
pub(crate) mod http;
pub(crate) mod http2;
pub(crate) mod mq;
pub(crate) mod sql;

pub use self::http::{find_http_uri, HttpInfo, HttpLog};
pub use self::http2::{Http2Info, Http2Log};
pub use mq::{AmqpInfo, AmqpLog};
pub use sql::{MysqlInfo, MysqlLog, PostgreInfo, PostgresqlLog, RedisInfo, RedisLog};

use std::fmt;

use serde::Serialize;

use crate::common::{
    flow::{Direction, NicDirection, PacketDirection},
    l7_protocol_info::L7ProtocolInfo,
    l7_protocol_log::ParseParam,
};
use crate::flow_generator::thread_trace::ThreadTraceIndex;

use public::l7_protocol::L7Protocol;

#[derive(Serialize, Debug, PartialEq, Copy, Clone, Eq, Hash)]
pub enum L7ResponseStatus {
    Ok,
    NotExist,
    ServerError,
    ClientError,
}

impl Default for L7ResponseStatus {
    fn default() -> Self {
        L7ResponseStatus::Ok
    }
}

impl L7ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            L7ResponseStatus::Ok => "OK",
            L7ResponseStatus::NotExist => "NotExistError",
            L7ResponseStatus::ServerError => "ServerError",
            L7ResponseStatus::ClientError => "ClientError",
        }
    }

    // coarse status carried on spans
    pub fn span_status(&self) -> &'static str {
        match self {
            L7ResponseStatus::Ok => "ok",
            _ => "error",
        }
    }
}

impl fmt::Display for L7ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Debug, PartialEq, Eq, Clone, Copy)]
pub enum LogMessageType {
    Request,
    Response,
    Session,
    Other,
}

impl Default for LogMessageType {
    fn default() -> Self {
        LogMessageType::Other
    }
}

impl From<PacketDirection> for LogMessageType {
    fn from(d: PacketDirection) -> LogMessageType {
        match d {
            PacketDirection::ClientToServer => LogMessageType::Request,
            PacketDirection::ServerToClient => LogMessageType::Response,
        }
    }
}

/// Where a decoder is in the request/response cycle of its current record.
///
/// | state            | request seen        | response seen    |
/// |------------------|---------------------|------------------|
/// | AwaitingRequest  | AwaitingResponse    | dropped          |
/// | AwaitingResponse | AwaitingResponse    | response started |
/// | SessionOnly      | record is finished  |                  |
///
/// Once a response has been seen the next request closes the record.
#[derive(Serialize, Debug, PartialEq, Eq, Clone, Copy)]
pub enum SessionState {
    AwaitingRequest,
    AwaitingResponse,
    SessionOnly,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::AwaitingRequest
    }
}

/// Trace context propagated by the application in request headers.
#[derive(Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AppTraceContext {
    pub trace_id: u128,
    pub parent_id: u64,
    pub sampled: bool,
    // datadog sends decimal ids, everyone else hex
    pub hex_encoded: bool,
}

impl AppTraceContext {
    pub fn is_valid(&self) -> bool {
        self.trace_id != 0 && self.parent_id != 0
    }

    pub fn trace_id_string(&self) -> String {
        if self.hex_encoded {
            if self.trace_id >> 64 == 0 {
                format!("{:016x}", self.trace_id)
            } else {
                format!("{:032x}", self.trace_id)
            }
        } else {
            self.trace_id.to_string()
        }
    }

    pub fn parent_id_string(&self) -> String {
        if self.hex_encoded {
            format!("{:016x}", self.parent_id)
        } else {
            self.parent_id.to_string()
        }
    }

    fn parse_sampled(value: &str) -> bool {
        matches!(value, "1" | "d" | "true")
    }

    /// Returns true if `key` is a trace header, `key` must be lower case.
    pub fn on_header(&mut self, key: &str, value: &str) -> bool {
        let value = value.trim();
        match key {
            // 00-TRACEID-SPANID-FLAGS
            "traceparent" => {
                let mut segs = value.split('-');
                let (Some(_), Some(trace), Some(span)) = (segs.next(), segs.next(), segs.next())
                else {
                    return true;
                };
                if let (Ok(t), Ok(s)) = (u128::from_str_radix(trace, 16), u64::from_str_radix(span, 16)) {
                    self.trace_id = t;
                    self.parent_id = s;
                    self.hex_encoded = true;
                    self.sampled = segs
                        .next()
                        .and_then(|f| u8::from_str_radix(f, 16).ok())
                        .map(|f| f & 0x1 == 1)
                        .unwrap_or_default();
                }
            }
            // TRACEID-SPANID-SAMPLED-PARENTSPANID
            "b3" => {
                let mut segs = value.split('-');
                let (Some(trace), Some(span)) = (segs.next(), segs.next()) else {
                    return true;
                };
                if let (Ok(t), Ok(s)) = (u128::from_str_radix(trace, 16), u64::from_str_radix(span, 16)) {
                    self.trace_id = t;
                    self.parent_id = s;
                    self.hex_encoded = true;
                    self.sampled = segs.next().map(Self::parse_sampled).unwrap_or_default();
                }
            }
            "x-b3-traceid" => {
                if let Ok(t) = u128::from_str_radix(value, 16) {
                    self.trace_id = t;
                    self.hex_encoded = true;
                }
            }
            "x-b3-spanid" => {
                if let Ok(s) = u64::from_str_radix(value, 16) {
                    self.parent_id = s;
                    self.hex_encoded = true;
                }
            }
            "x-b3-sampled" => self.sampled = Self::parse_sampled(value),
            // TRACEID:SPANID:PARENTSPANID:FLAGS
            "uber-trace-id" => {
                let mut segs = value.split(':');
                let (Some(trace), Some(span)) = (segs.next(), segs.next()) else {
                    return true;
                };
                if let (Ok(t), Ok(s)) = (u128::from_str_radix(trace, 16), u64::from_str_radix(span, 16)) {
                    self.trace_id = t;
                    self.parent_id = s;
                    self.hex_encoded = true;
                    self.sampled = segs
                        .nth(1)
                        .and_then(|f| u8::from_str_radix(f, 16).ok())
                        .map(|f| f & 0x1 == 1)
                        .unwrap_or_default();
                }
            }
            "x-datadog-trace-id" => {
                if let Ok(t) = value.parse::<u64>() {
                    self.trace_id = t as u128;
                    self.hex_encoded = false;
                }
            }
            "x-datadog-parent-id" => {
                if let Ok(s) = value.parse::<u64>() {
                    self.parent_id = s;
                    self.hex_encoded = false;
                }
            }
            "x-datadog-sampling-priority" => {
                self.sampled = value.parse::<i32>().map(|p| p > 0).unwrap_or_default()
            }
            _ => return false,
        }
        true
    }
}

#[derive(Serialize, Debug, Default, Clone, PartialEq)]
pub struct ProtoMeta {
    // request thread, response thread
    pub threads: [[i32; 2]; 2],
    pub inner_id: u64,
    pub req_tcp_seq: u32,
    pub resp_tcp_seq: u32,
    pub app_trace: Option<AppTraceContext>,
}

/// One finished request/response exchange.
#[derive(Serialize, Debug, Clone)]
pub struct ProtoData {
    pub protocol: L7Protocol,
    pub direction: Direction,
    pub info: L7ProtocolInfo,
    pub meta: ProtoMeta,
    pub bytes_read: u64,
    pub bytes_written: u64,
    // wall clock of the request, ns
    pub time: u64,
    // kernel time of the request, ns
    pub ktime: u64,
    pub cost: u64,
    pub duration: u64,
}

/// Timing and byte accounting every decoder keeps for its current record.
///
/// `kts` holds the kernel exit time of the first request fragment, the last
/// request fragment, the first response fragment and the last response
/// fragment.
#[derive(Debug, Default, Clone)]
pub struct RecordTiming {
    pub kts: [u64; 4],
    req_ts_head: u64,
    pub wall_time: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub meta: ProtoMeta,
    has_request: bool,
    has_response: bool,
}

impl RecordTiming {
    pub fn has_request(&self) -> bool {
        self.has_request
    }

    pub fn has_response(&self) -> bool {
        self.has_response
    }

    pub fn on_request(
        &mut self,
        param: &ParseParam,
        direction: Direction,
        thread_index: &mut ThreadTraceIndex,
    ) {
        if !self.has_request {
            self.has_request = true;
            self.kts[0] = param.ts_tail;
            self.req_ts_head = param.ts;
            self.wall_time = param.wall_time;
            self.meta.threads[0] = param.thread;
            self.meta.req_tcp_seq = param.tcp_seq;
            if direction == Direction::In {
                self.meta.inner_id = thread_index.insert(direction, param.thread, param.ts_tail);
            }
        }
        self.kts[1] = param.ts_tail;
    }

    // continuation of the current request
    pub fn extend_request(&mut self, param: &ParseParam) {
        self.kts[1] = param.ts_tail;
    }

    pub fn on_response(&mut self, param: &ParseParam) {
        if !self.has_response {
            self.has_response = true;
            self.kts[2] = param.ts_tail;
            self.meta.threads[1] = param.thread;
            self.meta.resp_tcp_seq = param.tcp_seq;
        }
        self.kts[3] = param.ts_tail;
    }

    pub fn account(&mut self, param: &ParseParam) {
        self.account_bytes(param.nic_direction, param.act_size as u64);
    }

    pub fn account_bytes(&mut self, nic_direction: NicDirection, size: u64) {
        match nic_direction {
            NicDirection::Ingress => self.bytes_read += size,
            NicDirection::Egress => self.bytes_written += size,
            NicDirection::Unknown => (),
        }
    }

    // from the first request syscall entry to the last request exit
    pub fn request_span(&self) -> u64 {
        self.kts[1].saturating_sub(self.req_ts_head)
    }

    pub fn duration(&self) -> u64 {
        if self.has_response && self.kts[3] > self.kts[0] {
            self.kts[3] - self.kts[0]
        } else {
            self.request_span()
        }
    }

    pub fn cost(&self) -> u64 {
        if self.has_response {
            self.kts[2].saturating_sub(self.kts[1])
        } else {
            0
        }
    }

    pub fn finish(
        self,
        protocol: L7Protocol,
        direction: Direction,
        info: L7ProtocolInfo,
    ) -> ProtoData {
        ProtoData {
            protocol,
            direction,
            info,
            bytes_read: self.bytes_read,
            bytes_written: self.bytes_written,
            time: self.wall_time,
            ktime: self.kts[0],
            cost: self.cost(),
            duration: self.duration(),
            meta: self.meta,
        }
    }
}

/// Client/server guess for protocols without an unprompted greeting.
///
/// The port on the server side of the first payload fragment is taken as
/// the server port. Attaching in the middle of a connection on a response
/// swaps the roles for the rest of it.
#[derive(Debug, Default, Clone, Copy)]
pub struct ServerPortGuess {
    port: Option<u16>,
}

impl ServerPortGuess {
    pub fn direction(&mut self, param: &ParseParam) -> Option<PacketDirection> {
        let port = match param.nic_direction {
            NicDirection::Ingress => param.conn.src_port,
            NicDirection::Egress => param.conn.dst_port,
            NicDirection::Unknown => return None,
        };
        let server = *self.port.get_or_insert(port);
        if port == server {
            Some(PacketDirection::ClientToServer)
        } else {
            Some(PacketDirection::ServerToClient)
        }
    }
}

pub fn value_is_default<T>(t: &T) -> bool
where
    T: Default + std::cmp::PartialEq,
{
    t == &T::default()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::common::fragment::{ConnectionInfo, RawFragment, SyscallFn};

    fn fragment(syscall: SyscallFn, ts: u64, act_size: usize) -> RawFragment {
        RawFragment {
            conn: Arc::new(ConnectionInfo {
                src_port: 5432,
                dst_port: 50000,
                ..Default::default()
            }),
            syscall,
            ts,
            ts_tail: ts + 5,
            act_size,
            thread: [10, 0],
            ..Default::default()
        }
    }

    #[test]
    fn trace_headers() {
        let mut ctx = AppTraceContext::default();
        assert!(ctx.on_header(
            "traceparent",
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01"
        ));
        assert!(ctx.is_valid());
        assert!(ctx.sampled);
        assert_eq!(ctx.trace_id_string(), "0af7651916cd43dd8448eb211c80319c");
        assert_eq!(ctx.parent_id_string(), "b7ad6b7169203331");

        let mut ctx = AppTraceContext::default();
        ctx.on_header("x-datadog-trace-id", "1234567890");
        assert!(!ctx.is_valid());
        ctx.on_header("x-datadog-parent-id", "987");
        ctx.on_header("x-datadog-sampling-priority", "-1");
        assert!(ctx.is_valid());
        assert!(!ctx.sampled);
        assert_eq!(ctx.trace_id_string(), "1234567890");
        assert_eq!(ctx.parent_id_string(), "987");

        let mut ctx = AppTraceContext::default();
        ctx.on_header("uber-trace-id", "5e6f:1a2b:0:1");
        assert!(ctx.sampled);
        assert_eq!(ctx.trace_id_string(), "0000000000005e6f");
        assert_eq!(ctx.parent_id, 0x1a2b);

        let mut ctx = AppTraceContext::default();
        ctx.on_header("x-b3-traceid", "80f198ee56343ba864fe8b2a57d3eff7");
        ctx.on_header("x-b3-spanid", "e457b5a2e4d86bd1");
        ctx.on_header("x-b3-sampled", "1");
        assert!(ctx.is_valid() && ctx.sampled);
        assert!(!ctx.on_header("user-agent", "curl"));
    }

    #[test]
    fn timing() {
        let mut index = ThreadTraceIndex::default();
        let mut timing = RecordTiming::default();

        let f = fragment(SyscallFn::Read, 100, 30);
        let param = ParseParam::new(&f, 1_000_000);
        timing.on_request(&param, Direction::In, &mut index);
        timing.account(&param);
        let f = fragment(SyscallFn::Read, 200, 10);
        let param = ParseParam::new(&f, 1_000_100);
        timing.on_request(&param, Direction::In, &mut index);
        timing.account(&param);
        assert_eq!(timing.duration(), 105);
        assert_eq!(timing.cost(), 0);

        let f = fragment(SyscallFn::Write, 500, 50);
        let param = ParseParam::new(&f, 1_000_500);
        timing.on_response(&param);
        timing.account(&param);
        let f = fragment(SyscallFn::Write, 600, 50);
        let param = ParseParam::new(&f, 1_000_600);
        timing.on_response(&param);
        timing.account(&param);

        assert_eq!(timing.kts, [105, 205, 505, 605]);
        assert_eq!(timing.duration(), 500);
        assert_eq!(timing.cost(), 300);
        assert_eq!((timing.bytes_read, timing.bytes_written), (40, 100));
        assert_eq!(timing.wall_time, 1_000_000);
        assert_ne!(timing.meta.inner_id, 0);
        assert_eq!(index.get_inner_id([10, 0], 105), timing.meta.inner_id);
    }

    #[test]
    fn port_guess() {
        let mut guess = ServerPortGuess::default();
        // server side, request read from the client first
        let f = fragment(SyscallFn::Read, 0, 1);
        assert_eq!(
            guess.direction(&ParseParam::new(&f, 0)),
            Some(PacketDirection::ClientToServer)
        );
        let f = fragment(SyscallFn::Write, 0, 1);
        assert_eq!(
            guess.direction(&ParseParam::new(&f, 0)),
            Some(PacketDirection::ServerToClient)
        );
        let f = fragment(SyscallFn::Close, 0, 1);
        assert_eq!(guess.direction(&ParseParam::new(&f, 0)), None);
    }
}
