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
use public::{bytes::read_u32_be, enums::L4Protocol, l7_protocol::L7Protocol};
use serde::Serialize;

use super::postgre_convert::get_code_desc;
use super::sql_check::{is_postgresql, split_head_comment, trim_head_comment_and_get_first_word};
use super::sql_obfuscate::ObfuscateCache;
use crate::{
    common::{
        flow::{Direction, PacketDirection},
        l7_protocol_info::{L7ProtocolInfo, L7ProtocolInfoInterface},
        l7_protocol_log::{L7ProtocolParserInterface, ParseParam},
    },
    flow_generator::{
        error::{Error, Result},
        protocol_logs::{
            consts::POSTGRESQL_HEADER_LEN, value_is_default, L7ResponseStatus, ProtoData,
            RecordTiming, ServerPortGuess, SessionState,
        },
        thread_trace::ThreadTraceIndex,
    },
};

// length field counts itself
const BLOCK_MIN_LEN: usize = 4;
const FIRST_WORD_MAX_LEN: usize = 12;

#[derive(Debug, Default, Clone, Serialize, PartialEq)]
pub struct PostgreInfo {
    // request
    #[serde(rename = "request_resource", skip_serializing_if = "value_is_default")]
    pub resource: String,
    #[serde(rename = "request_type", skip_serializing_if = "value_is_default")]
    pub resource_type: String,
    #[serde(skip_serializing_if = "value_is_default")]
    pub comment: String,
    pub req_type: char,

    // response
    pub resp_type: char,
    #[serde(rename = "sql_affected_rows", skip_serializing_if = "value_is_default")]
    pub affected_rows: u64,
    // SQLSTATE such as 42P01
    #[serde(rename = "response_code", skip_serializing_if = "value_is_default")]
    pub status_code: String,
    #[serde(rename = "response_result", skip_serializing_if = "value_is_default")]
    pub error_name: String,
    #[serde(rename = "response_exception", skip_serializing_if = "value_is_default")]
    pub message: String,
    #[serde(rename = "response_status")]
    pub status: L7ResponseStatus,
}

impl L7ProtocolInfoInterface for PostgreInfo {
    fn status(&self) -> L7ResponseStatus {
        self.status
    }

    fn operation(&self) -> String {
        self.resource_type.to_ascii_uppercase()
    }

    fn aggregation_tags(&self) -> Vec<(&'static str, String)> {
        vec![
            ("request_type", self.resource_type.to_ascii_uppercase()),
            ("status_code", self.status_code.clone()),
        ]
    }
}

// tag and body of every complete message, stops at the first bad one
fn blocks(mut payload: &[u8]) -> impl Iterator<Item = (u8, &[u8])> {
    std::iter::from_fn(move || {
        if payload.len() < POSTGRESQL_HEADER_LEN {
            return None;
        }
        let tag = payload[0];
        let length = read_u32_be(&payload[1..]) as usize;
        if length < BLOCK_MIN_LEN || length + 1 > payload.len() {
            return None;
        }
        let body = &payload[POSTGRESQL_HEADER_LEN..length + 1];
        payload = &payload[length + 1..];
        Some((tag, body))
    })
}

fn cstring(payload: &[u8]) -> Option<(&[u8], &[u8])> {
    let end = payload.iter().position(|&b| b == 0)?;
    Some((&payload[..end], &payload[end + 1..]))
}

/// Finds the statement of a frontend message run.
///
/// Only simple query (`Q`) and parse (`P`) carry SQL, the other frontend
/// messages of the extended protocol are skipped. The last statement wins.
fn parse_request(payload: &[u8]) -> Result<Option<(char, &[u8])>> {
    let mut statement = None;
    let mut parsed = false;
    for (tag, body) in blocks(payload) {
        match tag {
            b'Q' => {
                // the statement must fill the whole message
                let (sql, rest) = cstring(body).ok_or(Error::PostgresLogParseFailed)?;
                if !rest.is_empty() {
                    return Err(Error::PostgresLogParseFailed);
                }
                statement = Some((tag as char, sql));
            }
            b'P' => {
                let (_, body) = cstring(body).ok_or(Error::PostgresLogParseFailed)?;
                let (sql, _) = cstring(body).ok_or(Error::PostgresLogParseFailed)?;
                statement = Some((tag as char, sql));
            }
            b'B' | b'F' | b'C' | b'D' | b'H' | b'S' | b'X' | b'd' | b'c' | b'f' => (),
            _ => return Err(Error::PostgresLogParseFailed),
        }
        parsed = true;
    }
    if !parsed {
        return Err(Error::PostgresLogParseFailed);
    }
    if let Some((_, sql)) = statement {
        if !is_postgresql(&String::from_utf8_lossy(sql)) {
            return Err(Error::PostgresLogParseFailed);
        }
    }
    Ok(statement)
}

#[derive(Debug, Default, PartialEq)]
struct Response {
    resp_type: Option<char>,
    affected_rows: Option<u64>,
    // SQLSTATE and message
    error: Option<(String, String)>,
    ready_for_query: bool,
}

fn command_complete(body: &[u8]) -> Result<Option<u64>> {
    let (tag, _) = cstring(body).ok_or(Error::PostgresLogParseFailed)?;
    let tag = String::from_utf8_lossy(tag);
    let mut words = tag.split(' ');
    match words.next().unwrap_or_default() {
        // INSERT oid rows
        "INSERT" => words
            .nth(1)
            .and_then(|rows| rows.parse().ok())
            .map(Some)
            .ok_or(Error::PostgresLogParseFailed),
        "DELETE" | "UPDATE" | "SELECT" | "MERGE" | "MOVE" | "FETCH" | "COPY" => {
            Ok(words.next().and_then(|rows| rows.parse().ok()))
        }
        _ => Ok(None),
    }
}

fn error_response(mut body: &[u8]) -> Result<(String, String)> {
    let mut code = None;
    let mut message = String::new();
    while let Some(&field) = body.first() {
        if field == 0 {
            break;
        }
        let (value, rest) = cstring(&body[1..]).ok_or(Error::PostgresLogParseFailed)?;
        match field {
            b'C' => code = Some(String::from_utf8_lossy(value).into_owned()),
            b'M' => message = String::from_utf8_lossy(value).into_owned(),
            _ => (),
        }
        body = rest;
    }
    code.map(|c| (c, message))
        .ok_or(Error::PostgresLogParseFailed)
}

fn parse_response(payload: &[u8]) -> Result<Response> {
    let mut response = Response::default();
    let mut parsed = false;
    for (tag, body) in blocks(payload) {
        match tag {
            b'C' => {
                if let Some(rows) = command_complete(body)? {
                    response.affected_rows = Some(rows);
                }
                response.resp_type = Some('C');
            }
            b'E' => {
                response.error = Some(error_response(body)?);
                response.resp_type = Some('E');
            }
            b'Z' => response.ready_for_query = true,
            b'I' | b'1' | b'2' | b'3' | b'S' | b'K' | b'T' | b'n' | b'N' | b't' | b'D' | b'G'
            | b'H' | b'W' | b'd' | b'c' | b'R' | b's' => (),
            _ => return Err(Error::PostgresLogParseFailed),
        }
        parsed = true;
    }
    if parsed {
        Ok(response)
    } else {
        Err(Error::PostgresLogParseFailed)
    }
}

/// PostgreSQL frontend/backend protocol decoder.
///
/// | state            | frontend messages        | backend messages          |
/// |------------------|--------------------------|---------------------------|
/// | AwaitingRequest  | AwaitingResponse         | dropped                   |
/// | AwaitingResponse | continuation until the   | SessionOnly on ReadyFor-  |
/// |                  | first response, then the | Query, other messages     |
/// |                  | previous record pending  | extend the response       |
/// | SessionOnly      | previous record pending  | dropped                   |
///
/// Records without a statement, such as a lone Sync, are not exported.
#[derive(Debug, Default)]
pub struct PostgresqlLog {
    state: SessionState,
    direction: Direction,
    port: ServerPortGuess,
    info: PostgreInfo,
    timing: RecordTiming,
    obfuscate_cache: ObfuscateCache,
    pending: Vec<ProtoData>,
}

impl L7ProtocolParserInterface for PostgresqlLog {
    fn check_payload(&self, payload: &[u8], param: &ParseParam) -> bool {
        param.conn.l4_protocol == L4Protocol::Tcp
            && matches!(parse_request(payload), Ok(Some(_)))
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
            PacketDirection::ClientToServer => {
                let statement = parse_request(payload)?;
                self.on_request(statement, param, thread_index);
                Ok(())
            }
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
        L7Protocol::PostgreSQL
    }
}

impl PostgresqlLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn finish_record(&mut self) {
        let timing = std::mem::take(&mut self.timing);
        let info = std::mem::take(&mut self.info);
        self.state = SessionState::AwaitingRequest;
        if info.resource.is_empty() {
            debug!("postgresql record without statement dropped");
            return;
        }
        let request_span = timing.request_span();
        let mut data = timing.finish(
            L7Protocol::PostgreSQL,
            self.direction,
            L7ProtocolInfo::PostgreInfo(info),
        );
        if data.cost == 0 {
            data.cost = request_span;
        }
        self.pending.push(data);
    }

    fn statement(&mut self, req_type: char, sql: &[u8]) -> PostgreInfo {
        let sql = String::from_utf8_lossy(sql);
        let (comment, statement) = split_head_comment(&sql).unwrap_or(("", &sql));
        PostgreInfo {
            resource: self.obfuscate_cache.attempt_obfuscation(statement),
            resource_type: trim_head_comment_and_get_first_word(statement, FIRST_WORD_MAX_LEN)
                .unwrap_or_default()
                .to_owned(),
            comment: comment.to_owned(),
            req_type,
            ..Default::default()
        }
    }

    fn on_request(
        &mut self,
        statement: Option<(char, &[u8])>,
        param: &ParseParam,
        thread_index: &mut ThreadTraceIndex,
    ) {
        let continuation =
            self.state == SessionState::AwaitingResponse && !self.timing.has_response();
        match statement {
            // Bind, Execute or Sync after the Parse
            None if continuation => {
                self.timing.extend_request(param);
                self.timing.account(param);
                return;
            }
            Some(_) if continuation && self.timing.has_request() => {
                debug!("postgresql {} without response, replaced", self.info.resource_type);
                self.timing = RecordTiming::default();
            }
            _ if self.timing.has_response() || self.state == SessionState::SessionOnly => {
                self.finish_record()
            }
            _ => (),
        }
        self.info = match statement {
            Some((req_type, sql)) => self.statement(req_type, sql),
            None => PostgreInfo::default(),
        };
        self.direction = Direction::from(param.nic_direction);
        self.timing.on_request(param, self.direction, thread_index);
        self.timing.account(param);
        self.state = SessionState::AwaitingResponse;
    }

    fn on_response(&mut self, payload: &[u8], param: &ParseParam) -> Result<()> {
        let response = match parse_response(payload) {
            Ok(r) => r,
            // rows split over several syscalls
            Err(_) if self.state == SessionState::AwaitingResponse && self.timing.has_response() => {
                self.timing.on_response(param);
                self.timing.account(param);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if self.state != SessionState::AwaitingResponse {
            debug!("postgresql response without request");
            return Ok(());
        }

        if let Some(resp_type) = response.resp_type {
            self.info.resp_type = resp_type;
        }
        if let Some(rows) = response.affected_rows {
            self.info.affected_rows = rows;
        }
        if let Some((code, message)) = response.error {
            let (name, status) = get_code_desc(&code);
            self.info.error_name = name.to_owned();
            self.info.status = status;
            self.info.status_code = code;
            self.info.message = message;
        }
        self.timing.on_response(param);
        self.timing.account(param);
        if response.ready_for_query {
            self.state = SessionState::SessionOnly;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::utils::test::Capture;

    fn block(tag: u8, body: &[u8]) -> Vec<u8> {
        let mut b = vec![tag];
        b.extend_from_slice(&(body.len() as u32 + 4).to_be_bytes());
        b.extend_from_slice(body);
        b
    }

    fn info(record: &ProtoData) -> &PostgreInfo {
        match &record.info {
            L7ProtocolInfo::PostgreInfo(info) => info,
            _ => unreachable!(),
        }
    }

    #[test]
    fn simple_query() {
        let mut response = block(b'T', b"\x00\x01id\x00\x00\x00\x40\x01\x00\x01\x00\x00\x00\x17\x00\x04\xff\xff\xff\xff\x00\x00");
        response.extend_from_slice(&block(b'D', b"\x00\x01\x00\x00\x00\x015"));
        response.extend_from_slice(&block(b'C', b"SELECT 1\x00"));
        response.extend_from_slice(&block(b'Z', b"I"));

        let mut capture = Capture::new(5432, 50000);
        capture
            .read(&block(b'Q', b"/* app=api */ SELECT * FROM t WHERE id = 5\x00"))
            .write(&response);
        let mut parser = PostgresqlLog::new();
        let mut index = ThreadTraceIndex::default();
        let records = capture.replay(&mut parser, &mut index, false);
        assert_eq!(records.len(), 1);

        let r = &records[0];
        assert_eq!(r.protocol, L7Protocol::PostgreSQL);
        assert_eq!(r.direction, Direction::In);
        assert_ne!(r.meta.inner_id, 0);
        assert_eq!(info(r).resource, "SELECT * FROM t WHERE id = ?");
        assert_eq!(info(r).resource_type, "SELECT");
        assert_eq!(info(r).comment, "/* app=api */");
        assert_eq!(info(r).req_type, 'Q');
        assert_eq!(info(r).resp_type, 'C');
        assert_eq!(info(r).affected_rows, 1);
        assert_eq!(info(r).status, L7ResponseStatus::Ok);
        assert_eq!((r.duration, r.cost), (1000, 1000));
        assert_eq!(r.bytes_written, response.len() as u64);
    }

    #[test]
    fn extended_query() {
        let mut request = block(b'P', b"\x00insert into t values ($1, 'a')\x00\x00\x00");
        request.extend_from_slice(&block(b'B', b"\x00\x00\x00\x00\x00\x01\x00\x00\x00\x017\x00\x00"));
        let mut response = block(b'1', b"");
        response.extend_from_slice(&block(b'2', b""));
        response.extend_from_slice(&block(b'C', b"INSERT 0 1\x00"));
        response.extend_from_slice(&block(b'Z', b"I"));

        let mut capture = Capture::new(50000, 5432);
        capture
            .write(&request)
            .write(&block(b'S', b""))
            .read(&response);
        let mut parser = PostgresqlLog::new();
        let mut index = ThreadTraceIndex::default();
        let records = capture.replay(&mut parser, &mut index, false);
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.direction, Direction::Out);
        assert_eq!(r.meta.inner_id, 0);
        assert_eq!(info(r).resource, "insert into t values ($1, ?)");
        assert_eq!(info(r).operation(), "INSERT");
        assert_eq!(info(r).req_type, 'P');
        assert_eq!(info(r).affected_rows, 1);
        // the sync extends the request
        assert_eq!(r.cost, 1000);
        assert_eq!(r.duration, 2000);
        assert_eq!(
            r.bytes_written,
            (request.len() + block(b'S', b"").len()) as u64
        );
    }

    #[test]
    fn error_responses() {
        let mut response = block(
            b'E',
            b"SERROR\x00VERROR\x00C42P01\x00Mrelation \"nope\" does not exist\x00P15\x00\x00",
        );
        response.extend_from_slice(&block(b'Z', b"I"));

        let mut capture = Capture::new(5432, 50000);
        capture
            .read(&block(b'Q', b"select * from nope\x00"))
            .write(&response)
            .read(&block(b'Q', b"select 1/0\x00"))
            .write(&block(b'E', b"SERROR\x00C22012\x00Mdivision by zero\x00\x00"))
            .read(&block(b'Q', b"select pg_terminate_backend(1)\x00"))
            .write(&block(b'E', b"SFATAL\x00C57P01\x00Mterminating\x00\x00"));
        let mut parser = PostgresqlLog::new();
        let mut index = ThreadTraceIndex::default();
        let records = capture.replay(&mut parser, &mut index, true);
        assert_eq!(records.len(), 3);

        let i = info(&records[0]);
        assert_eq!(i.resp_type, 'E');
        assert_eq!(i.status, L7ResponseStatus::ClientError);
        assert_eq!(i.status_code, "42P01");
        assert_eq!(i.error_name, "undefined_table");
        assert_eq!(i.message, "relation \"nope\" does not exist");

        // no ReadyForQuery, closed by the next request
        assert_eq!(info(&records[1]).status, L7ResponseStatus::ClientError);
        assert_eq!(info(&records[1]).error_name, "division_by_zero");
        assert_eq!(info(&records[2]).status, L7ResponseStatus::ServerError);
    }

    #[test]
    fn records_without_statement() {
        let mut capture = Capture::new(5432, 50000);
        capture
            .read(&block(b'S', b""))
            .write(&block(b'Z', b"I"))
            .read(&block(b'Q', b"BEGIN\x00"));
        let mut parser = PostgresqlLog::new();
        let mut index = ThreadTraceIndex::default();
        let records = capture.replay(&mut parser, &mut index, true);
        // request without a response, cost falls back to the request span
        assert_eq!(records.len(), 1);
        assert_eq!(info(&records[0]).resource, "BEGIN");
        assert_eq!((records[0].duration, records[0].cost), (10, 10));
    }

    #[test]
    fn responses() {
        let r = parse_response(&block(b'C', b"DELETE 3\x00")).unwrap();
        assert_eq!(r.affected_rows, Some(3));
        let r = parse_response(&block(b'C', b"BEGIN\x00")).unwrap();
        assert_eq!((r.affected_rows, r.resp_type), (None, Some('C')));
        assert!(parse_response(&block(b'C', b"INSERT 0 x\x00")).is_err());
        assert!(parse_response(&block(b'E', b"SERROR\x00Mno code\x00\x00")).is_err());
        assert!(parse_response(b"HTTP/1.1 200 OK\r\n\r\n").is_err());
        // a cut DataRow leaves nothing to parse
        assert!(parse_response(&block(b'D', b"\x00\x01\x00\x00\x00\x05abcde")[..8]).is_err());
    }

    #[test]
    fn check() {
        let mut startup = vec![0, 0, 0, 23, 0, 3, 0, 0];
        startup.extend_from_slice(b"user\x00postgres\x00\x00");
        let cases: [(Vec<u8>, bool); 6] = [
            (block(b'Q', b"select 1;\x00"), true),
            (block(b'P', b"s1\x00UPDATE t SET a = $1\x00\x00\x00"), true),
            (block(b'Q', b"hello world\x00"), false),
            (block(b'Q', b"select 1\x00trailing"), false),
            (block(b'S', b""), false),
            (startup, false),
        ];
        let parser = PostgresqlLog::new();
        for (payload, expected) in cases {
            let mut capture = Capture::new(50000, 5432);
            capture.write(&payload);
            let f = &capture.fragments()[0];
            assert_eq!(
                parser.check_payload(&f.payload, &ParseParam::new(f, 0)),
                expected,
                "payload {:?}",
                String::from_utf8_lossy(&payload)
            );
        }
    }
}
