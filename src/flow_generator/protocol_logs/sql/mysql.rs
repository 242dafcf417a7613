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

use std::collections::HashMap;

use log::debug;
use serde::Serialize;

use super::sql_check::{is_mysql, split_head_comment};
use super::sql_obfuscate::ObfuscateCache;
use super::super::{
    consts::*, value_is_default, L7ResponseStatus, ProtoData, RecordTiming, ServerPortGuess,
    SessionState,
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

use public::{
    bytes::{read_u16_le, read_u24_le, read_u32_le, read_u64_le},
    enums::L4Protocol,
    l7_protocol::L7Protocol,
};

const SERVER_STATUS_CODE_MIN: u16 = 1000;
const CLIENT_STATUS_CODE_MIN: u16 = 2000;
const CLIENT_STATUS_CODE_MAX: u16 = 2999;

// longest EOF packet, longer 0xfe packets are rows
const EOF_PACKET_MAX_LEN: usize = 9;
// classic EOF is 0xfe + warnings + status
const CLASSIC_EOF_LEN: usize = 5;
// prepared statements remembered per connection
const MAX_STATEMENTS: usize = 64;

#[derive(Serialize, Debug, Default, Clone, PartialEq)]
pub struct MysqlInfo {
    #[serde(skip)]
    pub command: u8,
    #[serde(rename = "request_type", skip_serializing_if = "value_is_default")]
    pub command_str: &'static str,
    // obfuscated statement, database name for COM_INIT_DB
    #[serde(rename = "request_resource", skip_serializing_if = "value_is_default")]
    pub context: String,
    #[serde(skip_serializing_if = "value_is_default")]
    pub comment: String,
    #[serde(skip_serializing_if = "value_is_default")]
    pub statement_id: u32,

    #[serde(skip)]
    pub response_code: u8,
    #[serde(rename = "response_code", skip_serializing_if = "Option::is_none")]
    pub error_code: Option<u16>,
    #[serde(rename = "sql_affected_rows", skip_serializing_if = "value_is_default")]
    pub affected_rows: u64,
    #[serde(skip_serializing_if = "value_is_default")]
    pub column_count: u64,
    #[serde(rename = "response_exception", skip_serializing_if = "value_is_default")]
    pub error_message: String,
    #[serde(rename = "response_status")]
    pub status: L7ResponseStatus,
}

impl L7ProtocolInfoInterface for MysqlInfo {
    fn status(&self) -> L7ResponseStatus {
        self.status
    }

    fn operation(&self) -> String {
        // statement keyword when there is one, such as "SELECT"
        let keyword = self
            .context
            .split(|c: char| !c.is_ascii_alphabetic())
            .next()
            .unwrap_or_default();
        if matches!(self.command, COM_QUERY | COM_STMT_PREPARE | COM_STMT_EXECUTE)
            && !keyword.is_empty()
        {
            keyword.to_ascii_uppercase()
        } else {
            self.command_str.to_owned()
        }
    }

    fn aggregation_tags(&self) -> Vec<(&'static str, String)> {
        vec![
            ("command", self.command_str.to_owned()),
            (
                "error_code",
                self.error_code.map(|c| c.to_string()).unwrap_or_default(),
            ),
        ]
    }
}

pub fn get_command_str(command: u8) -> &'static str {
    const COMMANDS: [&str; 32] = [
        "", // command 0 is a response
        "COM_QUIT",
        "COM_INIT_DB",
        "COM_QUERY",
        "COM_FIELD_LIST",
        "COM_CREATE_DB",
        "COM_DROP_DB",
        "COM_REFRESH",
        "COM_SHUTDOWN",
        "COM_STATISTICS",
        "COM_PROCESS_INFO",
        "COM_CONNECT",
        "COM_PROCESS_KILL",
        "COM_DEBUG",
        "COM_PING",
        "COM_TIME",
        "COM_DELAYED_INSERT",
        "COM_CHANGE_USER",
        "COM_BINLOG_DUMP",
        "COM_TABLE_DUMP",
        "COM_CONNECT_OUT",
        "COM_REGISTER_SLAVE",
        "COM_STMT_PREPARE",
        "COM_STMT_EXECUTE",
        "COM_STMT_SEND_LONG_DATA",
        "COM_STMT_CLOSE",
        "COM_STMT_RESET",
        "COM_SET_OPTION",
        "COM_STMT_FETCH",
        "COM_DAEMON",
        "COM_BINLOG_DUMP_GTID",
        "COM_RESET_CONNECTION",
    ];
    COMMANDS.get(command as usize).copied().unwrap_or_default()
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct MysqlHeader {
    pub length: u32,
    pub number: u8,
}

impl MysqlHeader {
    pub fn decode(payload: &[u8]) -> Option<Self> {
        if payload.len() < HEADER_LEN {
            return None;
        }
        Some(Self {
            length: read_u24_le(payload),
            number: payload[NUMBER_OFFSET],
        })
    }
}

// Compressed packets with an uncompressed body carry a 7 byte header in
// front of the normal one.
fn strip_compress_header(payload: &[u8]) -> &[u8] {
    if payload.len() <= COMPRESS_HEADER_LEN + HEADER_LEN {
        return payload;
    }
    let compressed = read_u24_le(payload) as usize;
    let uncompressed = read_u24_le(&payload[4..]);
    if compressed != payload.len() - COMPRESS_HEADER_LEN || uncompressed != 0 {
        return payload;
    }
    let inner = &payload[COMPRESS_HEADER_LEN..];
    match MysqlHeader::decode(inner) {
        Some(h) if h.length as usize + HEADER_LEN <= inner.len() => inner,
        _ => payload,
    }
}

// MySQL 8.0.26 prefixes strings with 0x00 0x01
fn mysql_string(payload: &[u8]) -> &[u8] {
    if payload.len() > 2 && payload[0] == 0 && payload[1] == 1 {
        &payload[2..]
    } else {
        payload
    }
}

// length encoded integer
fn decode_compress_int(payload: &[u8]) -> u64 {
    let Some(&value) = payload.first() else {
        return 0;
    };
    match value {
        INT_FLAGS_2 if payload.len() >= 3 => read_u16_le(&payload[1..]) as u64,
        INT_FLAGS_3 if payload.len() >= 4 => read_u24_le(&payload[1..]) as u64,
        INT_FLAGS_8 if payload.len() >= 9 => read_u64_le(&payload[1..]),
        _ => value as u64,
    }
}

// packets of one fragment, the last one possibly cut
fn packets(mut payload: &[u8]) -> impl Iterator<Item = (MysqlHeader, &[u8])> {
    std::iter::from_fn(move || {
        let header = MysqlHeader::decode(payload)?;
        let body = &payload[HEADER_LEN..];
        if body.is_empty() {
            return None;
        }
        let end = (header.length as usize).min(body.len());
        let packet = &body[..end];
        payload = &body[end..];
        Some((header, packet))
    })
}

fn is_eof(header: &MysqlHeader, body: &[u8]) -> bool {
    body.first() == Some(&MYSQL_RESPONSE_CODE_EOF) && (header.length as usize) < EOF_PACKET_MAX_LEN
}

/// MySQL client/server protocol decoder.
///
/// | state            | command packet           | response packet          | other bytes    |
/// |------------------|--------------------------|--------------------------|----------------|
/// | AwaitingRequest  | AwaitingResponse, QUIT   | dropped                  | error          |
/// |                  | and STMT_CLOSE complete  |                          |                |
/// | AwaitingResponse | previous record pending  | SessionOnly on OK, ERR   | rows of the    |
/// |                  | if answered, else        | or the last EOF of a     | result set     |
/// |                  | replaced                 | result set               |                |
/// | SessionOnly      | previous record pending  | dropped                  | dropped        |
#[derive(Debug, Default)]
pub struct MysqlLog {
    state: SessionState,
    direction: Direction,
    port: ServerPortGuess,
    info: MysqlInfo,
    timing: RecordTiming,
    // EOF packets of the current result set
    eof_count: usize,
    statements: HashMap<u32, String>,
    obfuscate_cache: ObfuscateCache,
    pending: Vec<ProtoData>,
}

impl L7ProtocolParserInterface for MysqlLog {
    fn check_payload(&self, payload: &[u8], param: &ParseParam) -> bool {
        if param.conn.l4_protocol != L4Protocol::Tcp {
            return false;
        }
        let payload = strip_compress_header(payload);
        let Some(header) = MysqlHeader::decode(payload) else {
            return false;
        };
        let truncated = param.act_size > payload.len();
        if header.number != 0
            || header.length == 0
            || (!truncated && header.length as usize + HEADER_LEN != payload.len())
            || payload.len() <= HEADER_LEN
        {
            return false;
        }
        match payload[HEADER_LEN] {
            COM_QUERY | COM_STMT_PREPARE => {
                let context = mysql_string(&payload[HEADER_LEN + 1..]);
                is_mysql(&String::from_utf8_lossy(context))
            }
            _ => false,
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
        let payload = strip_compress_header(payload);
        let header = MysqlHeader::decode(payload).ok_or(Error::MysqlLogParseFailed)?;
        match self.port.direction(param).ok_or(Error::UnknownDirection)? {
            PacketDirection::ClientToServer if header.number == 0 => {
                match self.request(&payload[HEADER_LEN..]) {
                    Ok(info) => {
                        self.on_request(info, param, thread_index);
                        Ok(())
                    }
                    Err(e) => self.continuation(param, false).ok_or(e),
                }
            }
            PacketDirection::ClientToServer => self
                .continuation(param, false)
                .ok_or(Error::MysqlLogParseFailed),
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
    }

    fn protocol(&self) -> L7Protocol {
        L7Protocol::MySQL
    }
}

impl MysqlLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn finish_record(&mut self) {
        let timing = std::mem::take(&mut self.timing);
        let info = std::mem::take(&mut self.info);
        self.pending.push(timing.finish(
            L7Protocol::MySQL,
            self.direction,
            L7ProtocolInfo::MysqlInfo(info),
        ));
        self.eof_count = 0;
        self.state = SessionState::AwaitingRequest;
    }

    // bytes that continue the current request or response
    fn continuation(&mut self, param: &ParseParam, response: bool) -> Option<()> {
        if self.state != SessionState::AwaitingResponse {
            return None;
        }
        match (response, self.timing.has_response()) {
            (false, false) => self.timing.extend_request(param),
            (true, true) => self.timing.on_response(param),
            _ => return None,
        }
        self.timing.account(param);
        Some(())
    }

    fn sql(&mut self, payload: &[u8], info: &mut MysqlInfo) {
        let sql = String::from_utf8_lossy(mysql_string(payload));
        let (comment, statement) = split_head_comment(&sql).unwrap_or(("", &sql));
        info.comment = comment.to_owned();
        info.context = self.obfuscate_cache.attempt_obfuscation(statement);
    }

    fn request(&mut self, payload: &[u8]) -> Result<MysqlInfo> {
        let Some(&command) = payload.first() else {
            return Err(Error::MysqlLogParseFailed);
        };
        let mut info = MysqlInfo {
            command,
            command_str: get_command_str(command),
            ..Default::default()
        };
        let body = &payload[1..];
        match command {
            COM_QUERY | COM_STMT_PREPARE => self.sql(body, &mut info),
            COM_INIT_DB => info.context = String::from_utf8_lossy(body).into_owned(),
            COM_STMT_EXECUTE | COM_STMT_CLOSE | COM_STMT_FETCH => {
                if body.len() < 4 {
                    return Err(Error::MysqlLogParseFailed);
                }
                info.statement_id = read_u32_le(body);
                if let Some(sql) = self.statements.get(&info.statement_id) {
                    info.context = sql.clone();
                }
                if command == COM_STMT_CLOSE {
                    self.statements.remove(&info.statement_id);
                }
            }
            COM_QUIT | COM_PING | COM_FIELD_LIST => (),
            _ => return Err(Error::MysqlLogParseFailed),
        }
        Ok(info)
    }

    fn on_request(
        &mut self,
        info: MysqlInfo,
        param: &ParseParam,
        thread_index: &mut ThreadTraceIndex,
    ) {
        if self.timing.has_response() || self.state == SessionState::SessionOnly {
            self.finish_record();
        } else if self.timing.has_request() {
            debug!("mysql {} without response, replaced", self.info.command_str);
            self.timing = RecordTiming::default();
        }
        debug!("mysql request {}", info.command_str);
        let command = info.command;
        self.direction = Direction::from(param.nic_direction);
        self.info = info;
        self.eof_count = 0;
        self.timing.on_request(param, self.direction, thread_index);
        self.timing.account(param);
        self.state = match command {
            // no response follows
            COM_QUIT | COM_STMT_CLOSE => SessionState::SessionOnly,
            _ => SessionState::AwaitingResponse,
        };
    }

    fn on_response(&mut self, payload: &[u8], param: &ParseParam) -> Result<()> {
        if self.state != SessionState::AwaitingResponse {
            debug!("mysql response without request");
            return Ok(());
        }
        if self.timing.has_response() {
            self.continuation(param, true);
            if self.result_set_done(payload) {
                self.state = SessionState::SessionOnly;
            }
            return Ok(());
        }

        let header = MysqlHeader::decode(payload).ok_or(Error::MysqlLogParseFailed)?;
        let body = &payload[HEADER_LEN..];
        if header.number == 0 || body.is_empty() {
            return Err(Error::MysqlLogParseFailed);
        }
        let complete = match body[0] {
            MYSQL_RESPONSE_CODE_ERR => {
                self.error(body)?;
                true
            }
            MYSQL_RESPONSE_CODE_OK => {
                self.info.status = L7ResponseStatus::Ok;
                if self.info.command == COM_STMT_PREPARE {
                    if body.len() < 5 {
                        return Err(Error::MysqlLogParseFailed);
                    }
                    let id = read_u32_le(&body[1..]);
                    self.info.statement_id = id;
                    if self.statements.len() >= MAX_STATEMENTS {
                        self.statements.clear();
                    }
                    self.statements.insert(id, self.info.context.clone());
                } else {
                    self.info.affected_rows = decode_compress_int(&body[1..]);
                }
                true
            }
            MYSQL_RESPONSE_CODE_EOF if is_eof(&header, body) => {
                self.info.status = L7ResponseStatus::Ok;
                true
            }
            _ => {
                // result set, column count first
                self.info.status = L7ResponseStatus::Ok;
                self.info.column_count = decode_compress_int(body);
                self.result_set_done(&body[(header.length as usize).min(body.len())..])
            }
        };
        self.info.response_code = body[0];
        self.timing.on_response(param);
        self.timing.account(param);
        if complete {
            self.state = SessionState::SessionOnly;
        }
        Ok(())
    }

    fn error(&mut self, body: &[u8]) -> Result<()> {
        if body.len() >= 3 {
            let code = read_u16_le(&body[ERROR_CODE_OFFSET..]);
            if code < SERVER_STATUS_CODE_MIN || code > CLIENT_STATUS_CODE_MAX {
                return Err(Error::MysqlLogParseFailed);
            }
            self.info.error_code = Some(code);
            self.info.status = if code >= CLIENT_STATUS_CODE_MIN {
                L7ResponseStatus::ClientError
            } else {
                L7ResponseStatus::ServerError
            };
        }
        let offset = if body.len() > SQL_STATE_OFFSET + SQL_STATE_LEN
            && body[SQL_STATE_OFFSET] == SQL_STATE_MARKER
        {
            SQL_STATE_OFFSET + SQL_STATE_LEN
        } else {
            SQL_STATE_OFFSET
        };
        if let Some(message) = body.get(offset..) {
            self.info.error_message = String::from_utf8_lossy(mysql_string(message)).into_owned();
        }
        Ok(())
    }

    // walks the packets of a result set fragment, true once it ended
    fn result_set_done(&mut self, payload: &[u8]) -> bool {
        for (header, body) in packets(payload) {
            if body.first() == Some(&MYSQL_RESPONSE_CODE_ERR) {
                return true;
            }
            if is_eof(&header, body) {
                self.eof_count += 1;
                // classic result sets end with the second EOF, the OK
                // packet replacing it is longer
                if self.eof_count >= 2 || header.length as usize > CLASSIC_EOF_LEN {
                    return true;
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::utils::test::Capture;

    fn packet(number: u8, body: &[u8]) -> Vec<u8> {
        let mut p = (body.len() as u32).to_le_bytes()[..3].to_vec();
        p.push(number);
        p.extend_from_slice(body);
        p
    }

    fn command(command: u8, body: &[u8]) -> Vec<u8> {
        let mut b = vec![command];
        b.extend_from_slice(body);
        packet(0, &b)
    }

    fn info(record: &ProtoData) -> &MysqlInfo {
        match &record.info {
            L7ProtocolInfo::MysqlInfo(info) => info,
            _ => unreachable!(),
        }
    }

    #[test]
    fn query_and_error() {
        let mut capture = Capture::new(3306, 50000);
        capture
            .read(&command(COM_QUERY, b"/* svc=api */ UPDATE t SET a = 1 WHERE id = 7"))
            .write(&packet(1, b"\x00\x03\x00\x02\x00\x00\x00"))
            .read(&command(COM_QUERY, b"select * from missing"))
            .write(&packet(
                1,
                b"\xff\x7a\x04#42S02Table 'db.missing' doesn't exist",
            ));
        let mut parser = MysqlLog::new();
        let mut index = ThreadTraceIndex::default();
        let records = capture.replay(&mut parser, &mut index, false);
        assert_eq!(records.len(), 2);

        let r = &records[0];
        assert_eq!(r.protocol, L7Protocol::MySQL);
        assert_eq!(r.direction, Direction::In);
        assert_eq!(info(r).context, "UPDATE t SET a = ? WHERE id = ?");
        assert_eq!(info(r).comment, "/* svc=api */");
        assert_eq!(info(r).command_str, "COM_QUERY");
        assert_eq!(info(r).affected_rows, 3);
        assert_eq!(info(r).operation(), "UPDATE");
        assert_eq!(info(r).status, L7ResponseStatus::Ok);
        assert_ne!(r.meta.inner_id, 0);

        let r = &records[1];
        assert_eq!(info(r).error_code, Some(1146));
        assert_eq!(info(r).status, L7ResponseStatus::ServerError);
        assert_eq!(info(r).error_message, "Table 'db.missing' doesn't exist");
    }

    #[test]
    fn prepare_and_execute() {
        let mut capture = Capture::new(50000, 3306);
        capture
            .write(&command(COM_STMT_PREPARE, b"SELECT name FROM users WHERE id = ?"))
            .read(&packet(1, b"\x00\x07\x00\x00\x00\x01\x00\x01\x00\x00\x00\x00"))
            .write(&command(COM_STMT_EXECUTE, b"\x07\x00\x00\x00\x00\x01\x00\x00\x00"))
            .read(&packet(1, b"\x01"))
            .write(&command(COM_STMT_CLOSE, b"\x07\x00\x00\x00"));
        let mut parser = MysqlLog::new();
        let mut index = ThreadTraceIndex::default();
        let records = capture.replay(&mut parser, &mut index, false);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].direction, Direction::Out);
        assert_eq!(records[0].meta.inner_id, 0);
        assert_eq!(info(&records[0]).statement_id, 7);
        assert_eq!(info(&records[1]).command, COM_STMT_EXECUTE);
        assert_eq!(info(&records[1]).statement_id, 7);
        assert_eq!(
            info(&records[1]).context,
            "SELECT name FROM users WHERE id = ?"
        );
        assert_eq!(info(&records[1]).column_count, 1);
        assert_eq!(info(&records[1]).operation(), "SELECT");

        // the close is complete on its own
        assert_eq!(info(&records[2]).command_str, "COM_STMT_CLOSE");
        assert_eq!(info(&records[2]).statement_id, 7);
        assert_eq!(records[2].cost, 0);
        assert!(parser.statements.is_empty());
        assert!(parser.export(true).is_empty());
    }

    #[test]
    fn result_set_over_fragments() {
        let column = packet(2, b"\x03def\x00\x01t\x00\x02id\x00");
        let mut columns = packet(1, b"\x01");
        columns.extend_from_slice(&column);
        columns.extend_from_slice(&packet(3, b"\xfe\x00\x00\x02\x00"));
        let mut rows = packet(4, b"\x011");
        rows.extend_from_slice(&packet(5, b"\x012"));
        rows.extend_from_slice(&packet(6, b"\xfe\x00\x00\x02\x00"));

        let mut capture = Capture::new(3306, 50000);
        capture
            .read(&command(COM_QUERY, b"SELECT id FROM t"))
            .write(&columns)
            .write(&rows);
        let mut parser = MysqlLog::new();
        let mut index = ThreadTraceIndex::default();
        let records = capture.replay(&mut parser, &mut index, false);
        assert_eq!(records.len(), 1);
        assert_eq!(info(&records[0]).column_count, 1);
        assert_eq!(records[0].bytes_written, (columns.len() + rows.len()) as u64);
        assert_eq!(records[0].duration, 2000);

        // OK packet in place of the last EOF
        let mut capture = Capture::new(3306, 50000);
        let mut rows = packet(2, b"\x03def\x00\x01t\x00\x02id\x00");
        rows.extend_from_slice(&packet(3, b"\x011"));
        rows.extend_from_slice(&packet(4, b"\xfe\x00\x00\x02\x00\x00\x00"));
        capture
            .read(&command(COM_QUERY, b"SELECT id FROM t"))
            .write(&packet(1, b"\x01"))
            .write(&rows);
        let mut parser = MysqlLog::new();
        assert_eq!(capture.replay(&mut parser, &mut index, false).len(), 1);
    }

    #[test]
    fn check() {
        let mut capture = Capture::new(50000, 3306);
        capture
            .write(&command(COM_QUERY, b"select * from users"))
            .write(&command(COM_QUERY, b"hello world"))
            .write(&command(COM_PING, b""))
            .write(&packet(1, b"\x03select 1"))
            .write(b"\x14\x00\x00");
        let parser = MysqlLog::new();
        let results = capture
            .fragments()
            .iter()
            .map(|f| parser.check_payload(&f.payload, &ParseParam::new(f, 0)))
            .collect::<Vec<_>>();
        assert_eq!(results, vec![true, false, false, false, false]);

        // compressed protocol without compression
        let inner = command(COM_QUERY, b"SHOW TABLES");
        let mut compressed = (inner.len() as u32).to_le_bytes()[..3].to_vec();
        compressed.extend_from_slice(&[0, 0, 0, 0]);
        compressed.extend_from_slice(&inner);
        assert_eq!(strip_compress_header(&compressed), &inner[..]);
        assert_eq!(strip_compress_header(&inner), &inner[..]);
    }

    #[test]
    fn compress_int() {
        assert_eq!(decode_compress_int(&[0x05]), 5);
        assert_eq!(decode_compress_int(&[0xfc, 0x10, 0x27]), 10000);
        assert_eq!(decode_compress_int(&[0xfd, 0x01, 0x00, 0x01]), 65537);
        assert_eq!(decode_compress_int(&[0xfc, 0x10]), 0xfc);
        assert_eq!(decode_compress_int(&[]), 0);
        assert_eq!(get_command_str(COM_STMT_FETCH), "COM_STMT_FETCH");
        assert_eq!(get_command_str(0x40), "");
    }
}
