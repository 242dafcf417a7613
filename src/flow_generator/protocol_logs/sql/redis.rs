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

use std::str;

use log::debug;
use serde::{Serialize, Serializer};

use super::redis_obfuscate::obfuscate;
use super::super::{
    value_is_default, L7ResponseStatus, ProtoData, RecordTiming, ServerPortGuess, SessionState,
};

use crate::common::{
    flow::{Direction, PacketDirection},
    l7_protocol_info::{L7ProtocolInfo, L7ProtocolInfoInterface},
    l7_protocol_log::{L7ProtocolParserInterface, ParseParam},
};
use crate::flow_generator::{
    error::{Error, Result},
    thread_trace::ThreadTraceIndex,
};

use public::{enums::L4Protocol, l7_protocol::L7Protocol};

const SEPARATOR_SIZE: usize = 2;
const MAX_COMMAND_LENGTH: usize = 17;
const MAX_NESTING_DEPTH: usize = 32;
const STATUS_LIMIT: usize = 32;
const ERROR_LIMIT: usize = 256;
// incomplete responses kept for revalidation
const MAX_CARRY: usize = 16384;

pub const STATUS_CODE_OK: u16 = 200;
pub const STATUS_CODE_ERROR: u16 = 201;

#[derive(Serialize, Debug, Default, Clone, PartialEq)]
pub struct RedisInfo {
    // command line with values masked, such as "SET key ?"
    #[serde(
        rename = "request_resource",
        skip_serializing_if = "value_is_default",
        serialize_with = "vec_u8_to_string"
    )]
    pub request: Vec<u8>,
    // upper case command, such as "SET"
    #[serde(skip_serializing_if = "value_is_default")]
    pub request_type: String,
    #[serde(
        rename = "response_result",
        skip_serializing_if = "value_is_default",
        serialize_with = "vec_u8_to_string"
    )]
    pub status_msg: Vec<u8>,
    #[serde(
        rename = "response_exception",
        skip_serializing_if = "value_is_default",
        serialize_with = "vec_u8_to_string"
    )]
    pub error: Vec<u8>,
    #[serde(rename = "response_code", skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(rename = "response_status")]
    pub status: L7ResponseStatus,
}

pub fn vec_u8_to_string<S>(v: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&String::from_utf8_lossy(v))
}

impl L7ProtocolInfoInterface for RedisInfo {
    fn status(&self) -> L7ResponseStatus {
        self.status
    }

    fn operation(&self) -> String {
        if self.request_type.is_empty() {
            "Redis".to_owned()
        } else {
            format!("Redis {}", self.request_type)
        }
    }

    fn aggregation_tags(&self) -> Vec<(&'static str, String)> {
        vec![("command", self.request_type.clone())]
    }
}

impl RedisInfo {
    fn fill_response(&mut self, payload: &[u8]) {
        let Some(&kind) = payload.first() else {
            return;
        };
        let line = find_separator(&payload[1..])
            .map(|n| &payload[1..1 + n])
            .unwrap_or(&payload[1..]);
        match kind {
            b'+' => {
                self.status_msg = capped(kind, line, STATUS_LIMIT);
            }
            b'-' => {
                self.error = capped(kind, line, ERROR_LIMIT);
            }
            b'!' => {
                let head = 1 + line.len() + SEPARATOR_SIZE;
                let content = payload.get(head..).unwrap_or_default();
                let content = find_separator(content)
                    .map(|n| &content[..n])
                    .unwrap_or(content);
                self.error = capped(kind, content, ERROR_LIMIT);
            }
            _ => (),
        }
        if kind == b'-' || kind == b'!' {
            self.status_code = Some(STATUS_CODE_ERROR);
            self.status = L7ResponseStatus::ServerError;
        } else {
            self.status_code = Some(STATUS_CODE_OK);
            self.status = L7ResponseStatus::Ok;
        }
    }
}

fn capped(kind: u8, content: &[u8], limit: usize) -> Vec<u8> {
    let mut v = Vec::with_capacity(content.len().min(limit) + 4);
    v.push(kind);
    if content.len() > limit {
        v.extend_from_slice(&content[..limit]);
        v.extend_from_slice(b"...");
    } else {
        v.extend_from_slice(content);
    }
    v
}

/// Redis RESP2/RESP3 decoder.
///
/// | state            | request             | response                  | other bytes        |
/// |------------------|---------------------|---------------------------|--------------------|
/// | AwaitingRequest  | AwaitingResponse    | dropped                   | error              |
/// | AwaitingResponse | replaces the record | SessionOnly when complete | continuation of    |
/// |                  | if no response yet, |                           | the current side   |
/// |                  | else previous one   |                           |                    |
/// |                  | pending             |                           |                    |
/// | SessionOnly      | previous pending    | dropped                   | error              |
#[derive(Debug, Default)]
pub struct RedisLog {
    state: SessionState,
    direction: Direction,
    port: ServerPortGuess,
    info: RedisInfo,
    timing: RecordTiming,
    carry: Vec<u8>,
    pending: Vec<ProtoData>,
}

impl L7ProtocolParserInterface for RedisLog {
    fn check_payload(&self, payload: &[u8], param: &ParseParam) -> bool {
        if param.conn.l4_protocol != L4Protocol::Tcp {
            return false;
        }
        match parse_request(payload, param.act_size) {
            Ok(args) => !command_of(args[0]).is_empty(),
            Err(_) => false,
        }
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
        match self.port.direction(param).ok_or(Error::UnknownDirection)? {
            PacketDirection::ClientToServer => match parse_request(payload, param.act_size) {
                Ok(args) => {
                    self.on_request(&args, param, thread_index);
                    Ok(())
                }
                Err(e) => {
                    if self.state == SessionState::AwaitingResponse && !self.timing.has_response()
                    {
                        self.timing.extend_request(param);
                        self.timing.account(param);
                        return Ok(());
                    }
                    Err(e)
                }
            },
            PacketDirection::ServerToClient => self.on_response(payload, param),
        }
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
        self.carry.clear();
    }

    fn protocol(&self) -> L7Protocol {
        L7Protocol::Redis
    }
}

impl RedisLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn finish_record(&mut self) {
        let timing = std::mem::take(&mut self.timing);
        let info = std::mem::take(&mut self.info);
        self.pending.push(timing.finish(
            L7Protocol::Redis,
            self.direction,
            L7ProtocolInfo::RedisInfo(info),
        ));
        self.carry.clear();
        self.state = SessionState::AwaitingRequest;
    }

    fn on_request(
        &mut self,
        args: &[&[u8]],
        param: &ParseParam,
        thread_index: &mut ThreadTraceIndex,
    ) {
        if self.timing.has_response() || self.state == SessionState::SessionOnly {
            self.finish_record();
        } else if self.timing.has_request() {
            debug!("redis request without response, replaced");
            self.timing = RecordTiming::default();
        }
        let command = command_of(args[0]);
        debug!("redis request {}", command);
        self.direction = Direction::from(param.nic_direction);
        self.info = RedisInfo {
            request: obfuscate(&command, args),
            request_type: command,
            ..Default::default()
        };
        self.timing.on_request(param, self.direction, thread_index);
        self.timing.account(param);
        self.state = SessionState::AwaitingResponse;
    }

    fn on_response(&mut self, payload: &[u8], param: &ParseParam) -> Result<()> {
        if self.state != SessionState::AwaitingResponse {
            // still validated, garbage is an error rather than an orphan
            validate_response(payload, 0)?;
            debug!("redis response without request");
            return Ok(());
        }
        let truncated = param.act_size > payload.len();
        let complete = if self.timing.has_response() {
            // continuation of an incomplete response
            self.carry.extend_from_slice(payload);
            match validate_response(&self.carry, 0) {
                Ok(Some(_)) => true,
                Ok(None) => truncated || self.carry.len() > MAX_CARRY,
                Err(_) => true,
            }
        } else {
            let complete = match validate_response(payload, 0)? {
                Some(_) => true,
                None => truncated,
            };
            self.info.fill_response(payload);
            if !complete {
                self.carry.extend_from_slice(payload);
            }
            complete
        };
        self.timing.on_response(param);
        self.timing.account(param);
        if complete {
            self.carry.clear();
            self.state = SessionState::SessionOnly;
        }
        Ok(())
    }
}

fn command_of(arg: &[u8]) -> String {
    if arg.is_empty()
        || arg.len() > MAX_COMMAND_LENGTH
        || !arg.iter().all(|c| c.is_ascii_graphic())
    {
        return String::new();
    }
    String::from_utf8_lossy(arg).to_ascii_uppercase()
}

// position of the first "\r\n"
fn find_separator(payload: &[u8]) -> Option<usize> {
    payload.windows(SEPARATOR_SIZE).position(|w| w == b"\r\n")
}

// integer terminated by "\r\n", with the bytes it took
fn decode_integer(payload: &[u8]) -> Option<(i64, usize)> {
    let separator_pos = find_separator(payload)?;
    if separator_pos < 1 {
        return None;
    }
    let integer = str::from_utf8(&payload[..separator_pos])
        .ok()?
        .parse::<i64>()
        .ok()?;
    Some((integer, separator_pos + SEPARATOR_SIZE))
}

// Command array "*3\r\n$3\r\nSET\r\n$5\r\nmykey\r\n$7\r\nmyvalue\r\n".
// When the capture was cut (act_size beyond the payload), the arguments
// seen so far are returned, the last one possibly partial.
fn parse_request(payload: &[u8], act_size: usize) -> Result<Vec<&[u8]>> {
    let truncated = act_size > payload.len();
    if payload.first() != Some(&b'*') {
        return Err(Error::RedisLogParseFailed);
    }
    let (count, used) = decode_integer(&payload[1..]).ok_or(Error::RedisLogParseFailed)?;
    if count < 1 {
        return Err(Error::RedisLogParseFailed);
    }
    let mut offset = 1 + used;
    let mut args: Vec<&[u8]> = Vec::with_capacity((count as usize).min(16));
    for _ in 0..count {
        let rest = &payload[offset..];
        if rest.is_empty() || (rest[0] == b'$' && find_separator(rest).is_none()) {
            if truncated && !args.is_empty() {
                break;
            }
            return Err(Error::RedisLogParseFailed);
        }
        if rest[0] != b'$' {
            return Err(Error::RedisLogParseFailed);
        }
        let (len, used) = decode_integer(&rest[1..]).ok_or(Error::RedisLogParseFailed)?;
        if len < 0 {
            return Err(Error::RedisLogParseFailed);
        }
        offset += 1 + used;
        let end = offset + len as usize;
        if end + SEPARATOR_SIZE <= payload.len() {
            if &payload[end..end + SEPARATOR_SIZE] != b"\r\n" {
                return Err(Error::RedisLogParseFailed);
            }
            args.push(&payload[offset..end]);
            offset = end + SEPARATOR_SIZE;
        } else if truncated {
            args.push(&payload[offset..end.min(payload.len())]);
            break;
        } else {
            return Err(Error::RedisLogParseFailed);
        }
    }
    Ok(args)
}

/// Checks that `payload` starts with one RESP2/RESP3 value.
///
/// Returns the number of bytes the value takes, `None` when more bytes are
/// needed, and an error when it is not RESP.
fn validate_response(payload: &[u8], depth: usize) -> Result<Option<usize>> {
    if depth > MAX_NESTING_DEPTH {
        return Err(Error::RedisLogParseFailed);
    }
    let Some(&kind) = payload.first() else {
        return Ok(None);
    };
    if !b"+-:$*_#,(!=%~>".contains(&kind) {
        return Err(Error::RedisLogParseFailed);
    }
    let Some(n) = find_separator(&payload[1..]) else {
        return Ok(None);
    };
    let line = &payload[1..1 + n];
    let head = 1 + n + SEPARATOR_SIZE;
    let integer = || {
        str::from_utf8(line)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or(Error::RedisLogParseFailed)
    };
    match kind {
        b'+' | b'-' | b',' => Ok(Some(head)),
        b':' => integer().map(|_| Some(head)),
        b'(' => {
            let digits = line.strip_prefix(b"-").unwrap_or(line);
            if digits.is_empty() || !digits.iter().all(|c| c.is_ascii_digit()) {
                return Err(Error::RedisLogParseFailed);
            }
            Ok(Some(head))
        }
        b'_' if line.is_empty() => Ok(Some(head)),
        b'#' if line == b"t" || line == b"f" => Ok(Some(head)),
        b'$' | b'!' | b'=' => {
            let len = integer()?;
            if len == -1 && kind == b'$' {
                return Ok(Some(head));
            }
            if len < 0 {
                return Err(Error::RedisLogParseFailed);
            }
            let end = head + len as usize;
            if end + SEPARATOR_SIZE > payload.len() {
                return Ok(None);
            }
            if &payload[end..end + SEPARATOR_SIZE] != b"\r\n" {
                return Err(Error::RedisLogParseFailed);
            }
            Ok(Some(end + SEPARATOR_SIZE))
        }
        b'*' | b'~' | b'>' | b'%' => {
            let count = integer()?;
            if count == -1 && kind == b'*' {
                return Ok(Some(head));
            }
            if count < 0 {
                return Err(Error::RedisLogParseFailed);
            }
            let items = if kind == b'%' {
                count.saturating_mul(2)
            } else {
                count
            };
            let mut offset = head;
            for _ in 0..items {
                match validate_response(&payload[offset..], depth + 1)? {
                    Some(n) => offset += n,
                    None => return Ok(None),
                }
            }
            Ok(Some(offset))
        }
        _ => Err(Error::RedisLogParseFailed),
    }
}
