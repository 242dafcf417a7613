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

use log::debug;
use serde::Serialize;
use serde_json::{value::Value, Map, Number};

use public::{
    bytes::{read_u16_be, read_u32_be, read_u64_be},
    enums::L4Protocol,
    l7_protocol::L7Protocol,
};

use crate::{
    common::{
        flow::{Direction, NicDirection},
        l7_protocol_info::{L7ProtocolInfo, L7ProtocolInfoInterface},
        l7_protocol_log::{L7ProtocolParserInterface, ParseParam},
    },
    flow_generator::{
        error::{Error, Result},
        protocol_logs::{
            consts::{AMQP_FRAME_END, AMQP_FRAME_HEADER_LEN, AMQP_PROTOCOL_HEADER},
            value_is_default, AppTraceContext, L7ResponseStatus, LogMessageType, ProtoData,
            RecordTiming, SessionState,
        },
        thread_trace::ThreadTraceIndex,
    },
};

const AMQP_091: &str = "AMQP 0-9-1";
// class id and method id
const METHOD_MIN_LEN: usize = 4;
// class, weight, body size and property flags
const CONTENT_HEADER_MIN_LEN: usize = 14;

const CONNECTION_CLASS: u16 = 10;
const CHANNEL_CLASS: u16 = 20;
const EXCHANGE_CLASS: u16 = 40;
const QUEUE_CLASS: u16 = 50;
const BASIC_CLASS: u16 = 60;
const TX_CLASS: u16 = 90;

const CLASS_METHODS: [(u16, &str, &[(u16, &str)]); 6] = [
    (
        CONNECTION_CLASS,
        "Connection",
        &[
            (10, "Start"),
            (11, "Start-Ok"),
            (20, "Secure"),
            (21, "Secure-Ok"),
            (30, "Tune"),
            (31, "Tune-Ok"),
            (40, "Open"),
            (41, "Open-Ok"),
            (50, "Close"),
            (51, "Close-Ok"),
        ],
    ),
    (
        CHANNEL_CLASS,
        "Channel",
        &[
            (10, "Open"),
            (11, "Open-Ok"),
            (20, "Flow"),
            (21, "Flow-Ok"),
            (40, "Close"),
            (41, "Close-Ok"),
        ],
    ),
    (
        EXCHANGE_CLASS,
        "Exchange",
        &[
            (10, "Declare"),
            (11, "Declare-Ok"),
            (20, "Delete"),
            (21, "Delete-Ok"),
        ],
    ),
    (
        QUEUE_CLASS,
        "Queue",
        &[
            (10, "Declare"),
            (11, "Declare-Ok"),
            (20, "Bind"),
            (21, "Bind-Ok"),
            (30, "Purge"),
            (31, "Purge-Ok"),
            (40, "Delete"),
            (41, "Delete-Ok"),
            (50, "Unbind"),
            (51, "Unbind-Ok"),
        ],
    ),
    (
        BASIC_CLASS,
        "Basic",
        &[
            (10, "QOS"),
            (11, "QOS-Ok"),
            (20, "Consume"),
            (21, "Consume-Ok"),
            (30, "Cancel"),
            (31, "Cancel-Ok"),
            (40, "Publish"),
            (50, "Return"),
            (60, "Deliver"),
            (70, "Get"),
            (71, "Get-Ok"),
            (72, "Get-Empty"),
            (80, "ACK"),
            (90, "Reject"),
            (100, "Recover-Async"),
            (110, "Recover"),
            (111, "Recover-Ok"),
        ],
    ),
    (
        TX_CLASS,
        "Tx",
        &[
            (10, "Select"),
            (11, "Select-Ok"),
            (20, "Commit"),
            (21, "Commit-Ok"),
            (30, "Rollback"),
            (31, "Rollback-Ok"),
        ],
    ),
];

/// Name of the method, `None` for pairs outside the class/method table.
pub fn check_class_method(class_id: u16, method_id: u16) -> Option<&'static str> {
    CLASS_METHODS
        .iter()
        .find(|(c, _, _)| *c == class_id)
        .and_then(|(_, _, methods)| methods.iter().find(|(m, _)| *m == method_id))
        .map(|(_, name)| *name)
}

pub fn class_name(class_id: u16) -> &'static str {
    CLASS_METHODS
        .iter()
        .find(|(c, _, _)| *c == class_id)
        .map(|(_, name, _)| *name)
        .unwrap_or("Unknown")
}

fn message_type(name: &str) -> LogMessageType {
    match name {
        "Start" | "Secure" | "Tune" | "Open" | "Close" | "Flow" | "Declare" | "Delete" | "Bind"
        | "Unbind" | "Purge" | "QOS" | "Consume" | "Cancel" | "Get" | "Recover" | "Select"
        | "Commit" | "Rollback" => LogMessageType::Request,
        "Publish" | "Return" | "Deliver" | "ACK" | "Reject" | "Recover-Async" => {
            LogMessageType::Session
        }
        "Get-Empty" => LogMessageType::Response,
        n if n.ends_with("-Ok") => LogMessageType::Response,
        _ => LogMessageType::Other,
    }
}

// methods the broker sends on its own
fn from_server(class_id: u16, name: &str) -> bool {
    match class_id {
        CONNECTION_CLASS => matches!(name, "Start" | "Secure" | "Tune"),
        BASIC_CLASS => matches!(name, "Deliver" | "Return"),
        _ => false,
    }
}

#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FrameType {
    #[default]
    Unknown = 0,
    Method = 1,
    Header = 2,
    Body = 3,
    Heartbeat = 8,
}

impl From<u8> for FrameType {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::Method,
            2 => Self::Header,
            3 => Self::Body,
            8 => Self::Heartbeat,
            _ => Self::Unknown,
        }
    }
}

#[derive(Serialize, Debug, Default, Clone, PartialEq)]
pub struct AmqpInfo {
    #[serde(rename = "message_type")]
    pub msg_type: LogMessageType,
    pub frame_type: FrameType,
    #[serde(rename = "channel")]
    pub channel_id: u16,
    #[serde(rename = "class", skip_serializing_if = "value_is_default")]
    pub class_name: &'static str,
    #[serde(rename = "request_resource")]
    pub req_method: &'static str,
    #[serde(rename = "response_method", skip_serializing_if = "value_is_default")]
    pub resp_method: &'static str,

    #[serde(skip_serializing_if = "value_is_default")]
    pub vhost: String,
    #[serde(skip_serializing_if = "value_is_default")]
    pub queue: String,
    #[serde(skip_serializing_if = "value_is_default")]
    pub exchange: String,
    #[serde(skip_serializing_if = "value_is_default")]
    pub routing_key: String,
    // 0 stands for no body frame
    #[serde(skip_serializing_if = "value_is_default")]
    pub body_size: u64,

    #[serde(rename = "response_code", skip_serializing_if = "Option::is_none")]
    pub reply_code: Option<u16>,
    #[serde(rename = "response_exception", skip_serializing_if = "value_is_default")]
    pub reply_text: String,
    #[serde(rename = "response_status")]
    pub status: L7ResponseStatus,
}

impl L7ProtocolInfoInterface for AmqpInfo {
    fn status(&self) -> L7ResponseStatus {
        self.status
    }

    fn operation(&self) -> String {
        if self.class_name.is_empty() {
            self.req_method.to_owned()
        } else {
            format!("{}.{}", self.class_name, self.req_method)
        }
    }

    fn aggregation_tags(&self) -> Vec<(&'static str, String)> {
        vec![
            ("method", self.operation()),
            ("queue", self.queue.clone()),
            ("exchange", self.exchange.clone()),
        ]
    }
}

impl AmqpInfo {
    fn set_reply(&mut self, code: u16, text: &[u8]) {
        self.reply_code = Some(code);
        self.reply_text = slice_to_string(text);
        self.status = match code {
            200..=299 => L7ResponseStatus::Ok,
            // connection-forced, the broker is going away
            320 => L7ResponseStatus::ServerError,
            300..=499 => L7ResponseStatus::ClientError,
            _ => L7ResponseStatus::ServerError,
        };
    }

    // fills what the response knows and the request did not say
    fn merge(&mut self, other: AmqpInfo) {
        if self.queue.is_empty() {
            self.queue = other.queue;
        }
        if self.exchange.is_empty() {
            self.exchange = other.exchange;
        }
        if self.routing_key.is_empty() {
            self.routing_key = other.routing_key;
        }
        if other.body_size != 0 {
            self.body_size = other.body_size;
        }
    }
}

fn slice_to_string(slice: &[u8]) -> String {
    String::from_utf8_lossy(slice).into_owned()
}

fn read_short_str(buffer: &[u8]) -> Option<(&[u8], &[u8])> {
    let sz = *buffer.first()? as usize;
    let s = buffer.get(1..=sz)?;
    Some((buffer.get(sz + 1..)?, s))
}

fn read_field_value(payload: &[u8]) -> Option<(&[u8], Value)> {
    let (payload, value) = match payload.first()? {
        // boolean
        b't' => (payload.get(2..)?, Value::Bool(*payload.get(1)? != 0)),
        b'b' => (payload.get(2..)?, Value::from(*payload.get(1)? as i8)),
        b'B' => (payload.get(2..)?, Value::from(*payload.get(1)?)),
        b'U' => (
            payload.get(3..)?,
            Value::from(read_u16_be(payload.get(1..3)?) as i16),
        ),
        b'u' => (payload.get(3..)?, Value::from(read_u16_be(payload.get(1..3)?))),
        b'I' => (
            payload.get(5..)?,
            Value::from(read_u32_be(payload.get(1..5)?) as i32),
        ),
        b'i' => (payload.get(5..)?, Value::from(read_u32_be(payload.get(1..5)?))),
        b'L' => (
            payload.get(9..)?,
            Value::from(read_u64_be(payload.get(1..9)?) as i64),
        ),
        // long long uint and timestamp
        b'l' | b'T' => (payload.get(9..)?, Value::from(read_u64_be(payload.get(1..9)?))),
        b'f' => (
            payload.get(5..)?,
            Number::from_f64(f32::from_be_bytes(payload.get(1..5)?.try_into().ok()?) as f64)
                .map(Value::Number)
                .unwrap_or_default(),
        ),
        b'd' => (
            payload.get(9..)?,
            Number::from_f64(f64::from_be_bytes(payload.get(1..9)?.try_into().ok()?))
                .map(Value::Number)
                .unwrap_or_default(),
        ),
        // decimal, scale and value
        b'D' => (payload.get(6..)?, Value::Null),
        b's' => {
            let (rest, s) = read_short_str(payload.get(1..)?)?;
            (rest, Value::String(slice_to_string(s)))
        }
        // long string and byte array
        b'S' | b'x' => {
            let size = read_u32_be(payload.get(1..5)?) as usize;
            let s = slice_to_string(payload.get(5..5 + size)?);
            (payload.get(5 + size..)?, Value::String(s))
        }
        b'A' => {
            let size = read_u32_be(payload.get(1..5)?) as usize;
            let mut items = payload.get(5..5 + size)?;
            let rest = payload.get(5 + size..)?;
            let mut vec = Vec::new();
            while !items.is_empty() {
                let (tail, value) = read_field_value(items)?;
                items = tail;
                vec.push(value);
            }
            (rest, Value::Array(vec))
        }
        b'F' => {
            let (rest, map) = read_table(payload.get(1..)?)?;
            (rest, Value::Object(map))
        }
        b'V' => (payload.get(1..)?, Value::Null),
        _ => return None,
    };
    Some((payload, value))
}

fn read_table(payload: &[u8]) -> Option<(&[u8], Map<String, Value>)> {
    let size = read_u32_be(payload.get(0..4)?) as usize;
    let rest = payload.get(4 + size..)?;
    let mut fields = payload.get(4..4 + size)?;
    let mut map = Map::new();
    while !fields.is_empty() {
        let (tail, key) = read_short_str(fields)?;
        let (tail, value) = read_field_value(tail)?;
        fields = tail;
        map.insert(slice_to_string(key), value);
    }
    Some((rest, map))
}

// trace context from the headers property of a content header
fn parse_trace_context(properties: &[u8]) -> Option<AppTraceContext> {
    let flags = read_u16_be(properties.get(0..2)?);
    let mut properties = properties.get(2..)?;
    // content-type
    if flags >> 15 & 1 == 1 {
        properties = read_short_str(properties)?.0;
    }
    // content-encoding
    if flags >> 14 & 1 == 1 {
        properties = read_short_str(properties)?.0;
    }
    if flags >> 13 & 1 == 0 {
        return None;
    }
    let (_, headers) = read_table(properties)?;
    let mut ctx = AppTraceContext::default();
    for (key, value) in headers.iter() {
        if let Value::String(v) = value {
            ctx.on_header(&key.to_ascii_lowercase(), v);
        }
    }
    Some(ctx).filter(|c| c.is_valid())
}

fn parse_queue(class_id: u16, name: &str, args: &[u8]) -> Option<String> {
    let queue = match (class_id, name) {
        // [reserved: short] [queue: shortstr]
        (QUEUE_CLASS, "Declare" | "Bind" | "Unbind" | "Purge" | "Delete")
        | (BASIC_CLASS, "Consume" | "Get") => read_short_str(args.get(2..)?)?.1,
        // [queue: shortstr]
        (QUEUE_CLASS, "Declare-Ok") => read_short_str(args)?.1,
        _ => return None,
    };
    Some(slice_to_string(queue))
}

fn parse_exchange(class_id: u16, name: &str, args: &[u8]) -> Option<String> {
    let exchange = match (class_id, name) {
        // [reserved: short] [exchange: shortstr]
        (EXCHANGE_CLASS, "Declare" | "Delete") | (BASIC_CLASS, "Publish") => {
            read_short_str(args.get(2..)?)?.1
        }
        // [reserved: short] [queue: shortstr] [exchange: shortstr]
        (QUEUE_CLASS, "Bind" | "Unbind") => {
            let (args, _queue) = read_short_str(args.get(2..)?)?;
            read_short_str(args)?.1
        }
        // [reply-code: short] [reply-text: shortstr] [exchange: shortstr]
        (BASIC_CLASS, "Return") => {
            let (args, _reply_text) = read_short_str(args.get(2..)?)?;
            read_short_str(args)?.1
        }
        // [consumer-tag: shortstr] [delivery-tag: long long] [redelivered: bit] [exchange: shortstr]
        (BASIC_CLASS, "Deliver") => {
            let (args, _consumer_tag) = read_short_str(args)?;
            read_short_str(args.get(9..)?)?.1
        }
        // [delivery-tag: long long] [redelivered: bit] [exchange: shortstr]
        (BASIC_CLASS, "Get-Ok") => read_short_str(args.get(9..)?)?.1,
        _ => return None,
    };
    Some(slice_to_string(exchange))
}

fn parse_routing_key(class_id: u16, name: &str, args: &[u8]) -> Option<String> {
    let routing_key = match (class_id, name) {
        // [reserved: short] [queue: shortstr] [exchange: shortstr] [routing-key: shortstr]
        (QUEUE_CLASS, "Bind" | "Unbind") => {
            let (args, _) = read_short_str(args.get(2..)?)?;
            let (args, _) = read_short_str(args)?;
            read_short_str(args)?.1
        }
        // [reserved: short] [exchange: shortstr] [routing-key: shortstr]
        (BASIC_CLASS, "Publish") => {
            let (args, _exchange) = read_short_str(args.get(2..)?)?;
            read_short_str(args)?.1
        }
        // [reply-code: short] [reply-text: shortstr] [exchange: shortstr] [routing-key: shortstr]
        (BASIC_CLASS, "Return") => {
            let (args, _reply_text) = read_short_str(args.get(2..)?)?;
            let (args, _exchange) = read_short_str(args)?;
            read_short_str(args)?.1
        }
        (BASIC_CLASS, "Deliver") => {
            let (args, _consumer_tag) = read_short_str(args)?;
            let (args, _exchange) = read_short_str(args.get(9..)?)?;
            read_short_str(args)?.1
        }
        (BASIC_CLASS, "Get-Ok") => {
            let (args, _exchange) = read_short_str(args.get(9..)?)?;
            read_short_str(args)?.1
        }
        _ => return None,
    };
    Some(slice_to_string(routing_key))
}

#[derive(Debug, Clone, Copy)]
enum Frame<'a> {
    Method {
        channel: u16,
        class_id: u16,
        method_id: u16,
        name: &'static str,
        args: &'a [u8],
    },
    Header {
        channel: u16,
        class_id: u16,
        body_size: u64,
        properties: &'a [u8],
    },
    Body {
        channel: u16,
    },
    Heartbeat,
}

impl<'a> Frame<'a> {
    fn decode(frame_type: FrameType, channel: u16, body: &'a [u8]) -> Result<Self> {
        match frame_type {
            FrameType::Method => {
                if body.len() < METHOD_MIN_LEN {
                    return Err(Error::AmqpLogParseFailed("method frame too short"));
                }
                let class_id = read_u16_be(body);
                let method_id = read_u16_be(&body[2..]);
                let name = check_class_method(class_id, method_id)
                    .ok_or(Error::AmqpLogParseFailed("unknown class and method"))?;
                Ok(Frame::Method {
                    channel,
                    class_id,
                    method_id,
                    name,
                    args: &body[METHOD_MIN_LEN..],
                })
            }
            FrameType::Header => {
                if body.len() < CONTENT_HEADER_MIN_LEN {
                    return Err(Error::AmqpLogParseFailed("content header too short"));
                }
                // weight is always 0
                if read_u16_be(&body[2..]) != 0 {
                    return Err(Error::AmqpLogParseFailed("content header weight not 0"));
                }
                Ok(Frame::Header {
                    channel,
                    class_id: read_u16_be(body),
                    body_size: read_u64_be(&body[4..]),
                    properties: &body[12..],
                })
            }
            FrameType::Body => Ok(Frame::Body { channel }),
            FrameType::Heartbeat => Ok(Frame::Heartbeat),
            FrameType::Unknown => Err(Error::AmqpLogParseFailed("unknown frame type")),
        }
    }
}

/// Frames of one fragment, the first one must be complete and valid, a cut
/// or unknown frame after it ends the list.
fn parse_frames(mut payload: &[u8]) -> Result<Vec<Frame>> {
    let mut frames = vec![];
    while payload.len() > AMQP_FRAME_HEADER_LEN {
        let frame_type = FrameType::from(payload[0]);
        let channel = read_u16_be(&payload[1..]);
        let size = read_u32_be(&payload[3..]) as usize;
        let end = AMQP_FRAME_HEADER_LEN.saturating_add(size);
        let frame = match payload.get(end) {
            Some(&AMQP_FRAME_END) => {
                Frame::decode(frame_type, channel, &payload[AMQP_FRAME_HEADER_LEN..end])
            }
            _ => Err(Error::AmqpLogParseFailed("frame end not found")),
        };
        match frame {
            Ok(f) => frames.push(f),
            Err(e) if frames.is_empty() => return Err(e),
            Err(_) => break,
        }
        payload = &payload[end + 1..];
    }
    if frames.is_empty() {
        return Err(Error::AmqpLogParseFailed("no complete frame"));
    }
    Ok(frames)
}

/// AMQP 0-9-1 decoder.
///
/// Synchronous methods pair up as request and response, asynchronous ones
/// (publish, deliver, ack, content frames, the protocol header) are records
/// of their own and leave the request in progress alone.
///
/// | state            | request method           | response method  | session frame     |
/// |------------------|--------------------------|------------------|-------------------|
/// | AwaitingRequest  | AwaitingResponse         | dropped          | own record        |
/// | AwaitingResponse | previous record pending, | SessionOnly      | own record        |
/// |                  | answered or not          |                  |                   |
/// | SessionOnly      | previous record pending  | dropped          | previous pending, |
/// |                  |                          |                  | then own record   |
#[derive(Debug, Default)]
pub struct AmqpLog {
    state: SessionState,
    direction: Direction,
    vhost: String,
    info: AmqpInfo,
    timing: RecordTiming,
    pending: Vec<ProtoData>,
}

impl L7ProtocolParserInterface for AmqpLog {
    fn check_payload(&self, payload: &[u8], param: &ParseParam) -> bool {
        if param.conn.l4_protocol != L4Protocol::Tcp {
            return false;
        }
        if payload.starts_with(AMQP_PROTOCOL_HEADER) {
            return true;
        }
        if payload.len() < AMQP_FRAME_HEADER_LEN + METHOD_MIN_LEN
            || FrameType::from(payload[0]) != FrameType::Method
        {
            return false;
        }
        let end = AMQP_FRAME_HEADER_LEN.saturating_add(read_u32_be(&payload[3..]) as usize);
        // the frame may be cut by the capture
        if payload.len() > end && payload[end] != AMQP_FRAME_END {
            return false;
        }
        let class_id = read_u16_be(&payload[AMQP_FRAME_HEADER_LEN..]);
        let method_id = read_u16_be(&payload[AMQP_FRAME_HEADER_LEN + 2..]);
        check_class_method(class_id, method_id).is_some()
    }

    fn parse_payload(
        &mut self,
        payload: &[u8],
        param: &ParseParam,
        thread_index: &mut ThreadTraceIndex,
    ) -> Result<()> {
        if payload.is_empty() {
            return Err(Error::ZeroPayloadLen);
        }
        if payload.starts_with(AMQP_PROTOCOL_HEADER) {
            // the client speaks first
            self.resolve_direction(param.nic_direction, false);
            let info = AmqpInfo {
                msg_type: LogMessageType::Session,
                req_method: AMQP_091,
                vhost: self.vhost.clone(),
                ..Default::default()
            };
            self.session(info, param, thread_index);
            return Ok(());
        }

        let frames = parse_frames(payload)?;
        let (body_size, trace) = frames
            .iter()
            .find_map(|f| match f {
                Frame::Header {
                    body_size,
                    properties,
                    ..
                } => Some((*body_size, parse_trace_context(properties))),
                _ => None,
            })
            .unwrap_or_default();

        let mut info = AmqpInfo {
            body_size,
            ..Default::default()
        };
        let mut session = true;
        match frames[0] {
            Frame::Method {
                channel,
                class_id,
                method_id,
                name,
                args,
            } => {
                info.frame_type = FrameType::Method;
                info.channel_id = channel;
                info.class_name = class_name(class_id);
                info.req_method = name;
                info.msg_type = message_type(name);
                info.queue = parse_queue(class_id, name, args).unwrap_or_default();
                info.exchange = parse_exchange(class_id, name, args).unwrap_or_default();
                info.routing_key = parse_routing_key(class_id, name, args).unwrap_or_default();
                match (class_id, name) {
                    // [virtual-host: shortstr]
                    (CONNECTION_CLASS, "Open") => {
                        if let Some((_, vhost)) = read_short_str(args) {
                            self.vhost = slice_to_string(vhost);
                        }
                    }
                    // [reply-code: short] [reply-text: shortstr]
                    (CONNECTION_CLASS | CHANNEL_CLASS, "Close") | (BASIC_CLASS, "Return") => {
                        if let Some((_, text)) = args.get(2..).and_then(read_short_str) {
                            info.set_reply(read_u16_be(args), text);
                        }
                    }
                    _ => (),
                }
                info.vhost = self.vhost.clone();
                if class_id == CONNECTION_CLASS && method_id == 51 {
                    self.vhost.clear();
                }

                let from_server = from_server(class_id, name);
                match info.msg_type {
                    LogMessageType::Request => {
                        session = false;
                        self.resolve_direction(param.nic_direction, from_server);
                        self.on_request(info, param, thread_index);
                    }
                    LogMessageType::Response => {
                        session = false;
                        self.on_response(info, param);
                    }
                    _ => {
                        self.resolve_direction(param.nic_direction, from_server);
                        self.session(info, param, thread_index);
                    }
                }
            }
            Frame::Header {
                channel, class_id, ..
            } => {
                info.frame_type = FrameType::Header;
                info.channel_id = channel;
                info.class_name = class_name(class_id);
                info.req_method = "Content-Header";
                info.msg_type = LogMessageType::Session;
                info.vhost = self.vhost.clone();
                self.session(info, param, thread_index);
            }
            Frame::Body { channel } => {
                info.frame_type = FrameType::Body;
                info.channel_id = channel;
                info.req_method = "Content-Body";
                info.msg_type = LogMessageType::Session;
                info.vhost = self.vhost.clone();
                self.session(info, param, thread_index);
            }
            Frame::Heartbeat => return Ok(()),
        }
        let Some(trace) = trace else {
            return Ok(());
        };
        // the record the content belongs to
        if session {
            if let Some(last) = self.pending.last_mut() {
                last.meta.app_trace.get_or_insert(trace);
            }
        } else if self.timing.has_request() {
            self.timing.meta.app_trace.get_or_insert(trace);
        }
        Ok(())
    }

    fn export(&mut self, force: bool) -> Vec<ProtoData> {
        if self.state == SessionState::SessionOnly || (force && self.timing.has_request()) {
            self.finish_record();
        }
        std::mem::take(&mut self.pending)
    }

    fn conn_close(&mut self) {
        if self.timing.has_response() {
            self.state = SessionState::SessionOnly;
        }
    }

    fn protocol(&self) -> L7Protocol {
        L7Protocol::AMQP
    }
}

impl AmqpLog {
    pub fn new() -> Self {
        Self::default()
    }

    // roles come from the first frame with a known sender
    fn resolve_direction(&mut self, nic_direction: NicDirection, from_server: bool) {
        if self.direction != Direction::Unknown {
            return;
        }
        let d = Direction::from(nic_direction);
        self.direction = if from_server { d.reversed() } else { d };
    }

    fn finish_record(&mut self) {
        let timing = std::mem::take(&mut self.timing);
        let info = std::mem::take(&mut self.info);
        self.pending.push(timing.finish(
            L7Protocol::AMQP,
            self.direction,
            L7ProtocolInfo::AmqpInfo(info),
        ));
        self.state = SessionState::AwaitingRequest;
    }

    fn session(&mut self, info: AmqpInfo, param: &ParseParam, thread_index: &mut ThreadTraceIndex) {
        if self.state == SessionState::SessionOnly {
            self.finish_record();
        }
        let mut timing = RecordTiming::default();
        timing.on_request(param, self.direction, thread_index);
        timing.on_response(param);
        timing.account(param);
        self.pending.push(timing.finish(
            L7Protocol::AMQP,
            self.direction,
            L7ProtocolInfo::AmqpInfo(info),
        ));
    }

    fn on_request(
        &mut self,
        info: AmqpInfo,
        param: &ParseParam,
        thread_index: &mut ThreadTraceIndex,
    ) {
        // channels interleave, an unanswered request is kept too
        if self.timing.has_request() {
            self.finish_record();
        }
        self.info = info;
        self.timing.on_request(param, self.direction, thread_index);
        self.timing.account(param);
        self.state = SessionState::AwaitingResponse;
    }

    fn on_response(&mut self, info: AmqpInfo, param: &ParseParam) {
        if self.state != SessionState::AwaitingResponse {
            debug!("amqp {} without request", info.req_method);
            return;
        }
        self.info.resp_method = info.req_method;
        self.info.merge(info);
        self.timing.on_response(param);
        self.timing.account(param);
        self.state = SessionState::SessionOnly;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::utils::test::Capture;

    fn short_str(s: &str) -> Vec<u8> {
        let mut v = vec![s.len() as u8];
        v.extend_from_slice(s.as_bytes());
        v
    }

    fn frame(frame_type: u8, channel: u16, body: &[u8]) -> Vec<u8> {
        let mut f = vec![frame_type];
        f.extend_from_slice(&channel.to_be_bytes());
        f.extend_from_slice(&(body.len() as u32).to_be_bytes());
        f.extend_from_slice(body);
        f.push(AMQP_FRAME_END);
        f
    }

    fn method(channel: u16, class_id: u16, method_id: u16, args: &[u8]) -> Vec<u8> {
        let mut body = class_id.to_be_bytes().to_vec();
        body.extend_from_slice(&method_id.to_be_bytes());
        body.extend_from_slice(args);
        frame(1, channel, &body)
    }

    fn content_header(channel: u16, body_size: u64, headers: &[(&str, &str)]) -> Vec<u8> {
        let mut body = BASIC_CLASS.to_be_bytes().to_vec();
        body.extend_from_slice(&[0, 0]);
        body.extend_from_slice(&body_size.to_be_bytes());
        if headers.is_empty() {
            body.extend_from_slice(&[0, 0]);
        } else {
            // content-type and headers
            body.extend_from_slice(&0xa000u16.to_be_bytes());
            body.extend_from_slice(&short_str("text/plain"));
            let mut table = vec![];
            for (k, v) in headers {
                table.extend_from_slice(&short_str(k));
                table.push(b'S');
                table.extend_from_slice(&(v.len() as u32).to_be_bytes());
                table.extend_from_slice(v.as_bytes());
            }
            // a field before the strings
            let mut fields = short_str("x-retry");
            fields.extend_from_slice(&[b'I', 0, 0, 0, 3]);
            fields.extend_from_slice(&table);
            body.extend_from_slice(&(fields.len() as u32).to_be_bytes());
            body.extend_from_slice(&fields);
        }
        frame(2, channel, &body)
    }

    fn info(record: &ProtoData) -> &AmqpInfo {
        match &record.info {
            L7ProtocolInfo::AmqpInfo(info) => info,
            _ => unreachable!(),
        }
    }

    #[test]
    fn class_method_table() {
        let mut count = 0;
        for (class_id, _, methods) in CLASS_METHODS.iter() {
            for (method_id, name) in methods.iter() {
                assert_eq!(check_class_method(*class_id, *method_id), Some(*name));
                count += 1;
            }
        }
        // connection 10, channel 6, exchange 4, queue 10, basic 17, tx 6
        assert_eq!(count, 53);
        assert_eq!(check_class_method(60, 40), Some("Publish"));
        // rabbitmq extensions are not part of 0-9-1
        assert_eq!(check_class_method(85, 10), None);
        assert_eq!(check_class_method(60, 120), None);
        assert_eq!(check_class_method(40, 30), None);
        assert_eq!(check_class_method(10, 60), None);
        assert_eq!(class_name(85), "Unknown");
        assert_eq!(check_class_method(10, 51), Some("Close-Ok"));
        assert_eq!(check_class_method(10, 52), None);
        assert_eq!(check_class_method(70, 10), None);
        assert_eq!(check_class_method(0, 0), None);
        assert_eq!(message_type("Get-Empty"), LogMessageType::Response);
        assert_eq!(message_type("Purge"), LogMessageType::Request);
        assert_eq!(message_type("Deliver"), LogMessageType::Session);
    }

    #[test]
    fn client_session() {
        let mut open = short_str("/prod");
        open.extend_from_slice(&[0, 0]);
        let mut declare = vec![0, 0];
        declare.extend_from_slice(&short_str("orders"));
        declare.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
        let mut declare_ok = short_str("orders");
        declare_ok.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 1]);
        let mut publish = vec![0, 0];
        publish.extend_from_slice(&short_str("ex"));
        publish.extend_from_slice(&short_str("orders.new"));
        publish.push(0);
        let mut publish = method(1, 60, 40, &publish);
        publish.extend_from_slice(&content_header(
            1,
            5,
            &[(
                "traceparent",
                "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
            )],
        ));
        publish.extend_from_slice(&frame(3, 1, b"hello"));

        let mut capture = Capture::new(50000, 5672);
        capture
            .write(AMQP_PROTOCOL_HEADER)
            .read(&method(0, 10, 10, &[0, 9]))
            .write(&method(0, 10, 11, &[]))
            .read(&method(0, 10, 30, &[0, 0x07, 0xff]))
            .write(&method(0, 10, 31, &[0, 0x07, 0xff]))
            .write(&method(0, 10, 40, &open))
            .read(&method(0, 10, 41, &[0]))
            .write(&method(1, 50, 10, &declare))
            .read(&method(1, 50, 11, &declare_ok))
            .write(&publish);
        let mut parser = AmqpLog::new();
        let mut index = ThreadTraceIndex::default();
        let records = capture.replay(&mut parser, &mut index, false);
        assert_eq!(records.len(), 6);
        assert!(records.iter().all(|r| r.direction == Direction::Out));
        assert!(records.iter().all(|r| r.meta.inner_id == 0));

        let r = info(&records[0]);
        assert_eq!(r.req_method, AMQP_091);
        assert_eq!(r.msg_type, LogMessageType::Session);
        assert_eq!(r.operation(), AMQP_091);

        let r = info(&records[1]);
        assert_eq!(r.operation(), "Connection.Start");
        assert_eq!(r.resp_method, "Start-Ok");
        assert_eq!(records[1].bytes_read, method(0, 10, 10, &[0, 9]).len() as u64);

        assert_eq!(info(&records[3]).req_method, "Open");
        assert_eq!(info(&records[3]).vhost, "/prod");

        let r = info(&records[4]);
        assert_eq!(r.operation(), "Queue.Declare");
        assert_eq!(r.queue, "orders");
        assert_eq!(r.resp_method, "Declare-Ok");
        assert_eq!(r.vhost, "/prod");
        assert_eq!((records[4].cost, records[4].duration), (1000, 1000));

        let r = info(&records[5]);
        assert_eq!(r.operation(), "Basic.Publish");
        assert_eq!(r.msg_type, LogMessageType::Session);
        assert_eq!(r.exchange, "ex");
        assert_eq!(r.routing_key, "orders.new");
        assert_eq!(r.body_size, 5);
        assert_eq!(records[5].duration, 10);
        assert_eq!(records[5].bytes_written, publish.len() as u64);
        let trace = records[5].meta.app_trace.unwrap();
        assert_eq!(trace.trace_id_string(), "0af7651916cd43dd8448eb211c80319c");
        assert!(trace.sampled);
    }

    #[test]
    fn server_get_and_close() {
        let mut get = vec![0, 0];
        get.extend_from_slice(&short_str("jobs"));
        get.push(1);
        let mut get_ok = 8u64.to_be_bytes().to_vec();
        get_ok.push(0);
        get_ok.extend_from_slice(&short_str("ex"));
        get_ok.extend_from_slice(&short_str("rk"));
        get_ok.extend_from_slice(&4u32.to_be_bytes());
        let mut get_ok = method(1, 60, 71, &get_ok);
        get_ok.extend_from_slice(&content_header(1, 3, &[]));
        get_ok.extend_from_slice(&frame(3, 1, b"job"));
        let mut close = 404u16.to_be_bytes().to_vec();
        close.extend_from_slice(&short_str("NOT_FOUND - no queue 'gone'"));
        close.extend_from_slice(&[0, 50, 0, 10]);

        let mut capture = Capture::new(5672, 40000);
        capture
            .read(&method(1, 60, 70, &get))
            .write(&get_ok)
            .read(&frame(8, 0, b""))
            .write(&method(1, 20, 40, &close))
            .read(&method(1, 20, 41, &[]));
        let mut parser = AmqpLog::new();
        let mut index = ThreadTraceIndex::default();
        let records = capture.replay(&mut parser, &mut index, false);
        assert_eq!(records.len(), 2);

        let r = &records[0];
        assert_eq!(r.direction, Direction::In);
        assert_ne!(r.meta.inner_id, 0);
        let i = info(r);
        assert_eq!(i.operation(), "Basic.Get");
        assert_eq!(i.resp_method, "Get-Ok");
        assert_eq!(i.queue, "jobs");
        assert_eq!(i.exchange, "ex");
        assert_eq!(i.routing_key, "rk");
        assert_eq!(i.body_size, 3);
        assert_eq!(i.status, L7ResponseStatus::Ok);

        let i = info(&records[1]);
        assert_eq!(i.operation(), "Channel.Close");
        assert_eq!(i.reply_code, Some(404));
        assert_eq!(i.reply_text, "NOT_FOUND - no queue 'gone'");
        assert_eq!(i.status, L7ResponseStatus::ClientError);
    }

    #[test]
    fn vhost_and_interleaved_channels() {
        let mut open = short_str("/a");
        open.extend_from_slice(&[0, 0]);
        let mut close = 200u16.to_be_bytes().to_vec();
        close.extend_from_slice(&short_str("bye"));
        close.extend_from_slice(&[0, 0, 0, 0]);
        let declare = |name: &str| {
            let mut d = vec![0, 0];
            d.extend_from_slice(&short_str(name));
            d.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
            d
        };

        let mut capture = Capture::new(50000, 5672);
        capture
            .write(&method(0, 10, 40, &open))
            .read(&method(0, 10, 41, &[0]))
            .write(&method(1, 50, 10, &declare("q1")))
            .write(&method(2, 50, 10, &declare("q2")))
            .read(&method(2, 50, 11, &short_str("q2")))
            .write(&method(0, 10, 50, &close))
            .read(&method(0, 10, 51, &[]))
            .write(&method(3, 50, 10, &declare("q3")));
        let mut parser = AmqpLog::new();
        let mut index = ThreadTraceIndex::default();
        let records = capture.replay(&mut parser, &mut index, true);
        assert_eq!(records.len(), 5);

        // unanswered, exported as it is
        let i = info(&records[1]);
        assert_eq!((i.queue.as_str(), i.resp_method), ("q1", ""));
        assert_eq!(records[1].cost, 0);
        assert_eq!(info(&records[2]).resp_method, "Declare-Ok");
        assert_eq!(info(&records[2]).channel_id, 2);

        let i = info(&records[3]);
        assert_eq!(i.vhost, "/a");
        assert_eq!(i.reply_code, Some(200));
        assert_eq!(i.status, L7ResponseStatus::Ok);
        assert_eq!(info(&records[4]).vhost, "");
    }

    #[test]
    fn frames() {
        let mut payload = method(1, 60, 80, &[0, 0, 0, 0, 0, 0, 0, 1, 0]);
        payload.extend_from_slice(&frame(3, 1, b"cut")[..6]);
        let frames = parse_frames(&payload).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], Frame::Method { name: "ACK", .. }));

        assert!(parse_frames(&frame(9, 0, b"abcd")).is_err());
        assert!(parse_frames(&method(1, 60, 99, &[])).is_err());
        assert!(parse_frames(&frame(1, 0, &[0, 60])).is_err());
        let mut bad_end = method(1, 60, 40, &[]);
        *bad_end.last_mut().unwrap() = 0;
        assert!(parse_frames(&bad_end).is_err());
    }

    #[test]
    fn check() {
        let parser = AmqpLog::new();
        let publish = method(1, 60, 40, &[0, 0, 0, 0, 0]);
        let mut bad_end = publish.clone();
        *bad_end.last_mut().unwrap() = 0;
        let cases: [(&[u8], bool); 6] = [
            (AMQP_PROTOCOL_HEADER, true),
            (&publish, true),
            (&publish[..12], true),
            (&bad_end, false),
            (&method(1, 61, 40, &[0, 0]), false),
            (b"\x01\x00\x00\x00", false),
        ];
        for (payload, expected) in cases {
            let mut capture = Capture::new(50000, 5672);
            capture.write(payload);
            let f = &capture.fragments()[0];
            assert_eq!(
                parser.check_payload(&f.payload, &ParseParam::new(f, 0)),
                expected,
                "payload {:?}",
                payload
            );
        }
    }
}
