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
use serde::Serialize;

use super::consts::*;
use super::{
    value_is_default, AppTraceContext, L7ResponseStatus, ProtoData, RecordTiming, SessionState,
};

use crate::common::{
    flow::{Direction, NicDirection},
    l7_protocol_info::{L7ProtocolInfo, L7ProtocolInfoInterface},
    l7_protocol_log::{L7ProtocolParserInterface, ParseParam},
};
use crate::flow_generator::{
    error::{Error, Result},
    thread_trace::ThreadTraceIndex,
};

use public::{enums::L4Protocol, l7_protocol::L7Protocol};

#[derive(Serialize, Debug, Default, Clone, PartialEq)]
pub struct HttpInfo {
    #[serde(skip_serializing_if = "value_is_default")]
    pub version: String,
    #[serde(rename = "request_type", skip_serializing_if = "value_is_default")]
    pub method: String,
    #[serde(rename = "request_resource", skip_serializing_if = "value_is_default")]
    pub path: String,
    // the request line was cut before the version
    #[serde(skip_serializing_if = "value_is_default")]
    pub truncated: bool,
    #[serde(rename = "request_domain", skip_serializing_if = "value_is_default")]
    pub host: String,
    #[serde(rename = "user_agent", skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "value_is_default")]
    pub x_request_id: String,

    #[serde(rename = "request_length", skip_serializing_if = "Option::is_none")]
    pub req_content_length: Option<u64>,
    #[serde(rename = "response_length", skip_serializing_if = "Option::is_none")]
    pub resp_content_length: Option<u64>,

    #[serde(rename = "response_code", skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(rename = "response_status")]
    pub status: L7ResponseStatus,
}

impl L7ProtocolInfoInterface for HttpInfo {
    fn status(&self) -> L7ResponseStatus {
        self.status
    }

    fn operation(&self) -> String {
        format!("{} {}", self.method, self.path)
    }

    fn aggregation_tags(&self) -> Vec<(&'static str, String)> {
        vec![
            ("method", self.method.clone()),
            ("path", self.path.clone()),
            (
                "status_code",
                self.status_code.map(|c| c.to_string()).unwrap_or_default(),
            ),
        ]
    }
}

// response body still expected
#[derive(Debug, Clone, Copy, PartialEq)]
enum Body {
    Length(u64),
    Chunked,
    // ends with the connection
    Unbounded,
}

/// HTTP/1.x decoder.
///
/// | state            | request line                    | status line        | other bytes      |
/// |------------------|---------------------------------|--------------------|------------------|
/// | AwaitingRequest  | AwaitingResponse                | dropped            | dropped          |
/// | AwaitingResponse | previous record pending if it   | response started,  | body of the side |
/// |                  | has a response, new record      | SessionOnly once   | it was sent from |
/// |                  |                                 | the body is done   |                  |
/// | SessionOnly      | previous record pending         | dropped            | dropped          |
#[derive(Debug, Default)]
pub struct HttpLog {
    state: SessionState,
    direction: Direction,
    // nic direction requests travel in
    request_nic: Option<NicDirection>,
    info: HttpInfo,
    trace: AppTraceContext,
    timing: RecordTiming,
    body: Option<Body>,
    pending: Vec<ProtoData>,
}

impl L7ProtocolParserInterface for HttpLog {
    fn check_payload(&self, payload: &[u8], param: &ParseParam) -> bool {
        if param.conn.l4_protocol != L4Protocol::Tcp {
            return false;
        }
        match parse_v1_headers(payload).next() {
            Some(first_line) => is_http_req_line(first_line),
            None => is_truncated_req_line(payload),
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
        if param.nic_direction == NicDirection::Unknown {
            return Err(Error::UnknownDirection);
        }
        if is_http_v1_payload(payload) {
            if let Some(line) = first_line(payload) {
                if line.starts_with(RESPONSE_PREFIX) {
                    return self.on_response_line(line, payload, param);
                }
                if let Ok(()) = self.on_request_line(line, payload, param, thread_index) {
                    return Ok(());
                }
            }
        }
        self.on_body(payload, param);
        Ok(())
    }

    fn export(&mut self, force: bool) -> Vec<ProtoData> {
        if self.state == SessionState::SessionOnly || (force && self.timing.has_request()) {
            self.finish_record();
        }
        std::mem::take(&mut self.pending)
    }

    fn conn_close(&mut self) {
        if self.body == Some(Body::Unbounded) {
            self.state = SessionState::SessionOnly;
        }
    }

    fn protocol(&self) -> L7Protocol {
        L7Protocol::Http1
    }
}

impl HttpLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn finish_record(&mut self) {
        let mut timing = std::mem::take(&mut self.timing);
        if self.trace.is_valid() {
            timing.meta.app_trace = Some(self.trace);
        }
        let info = std::mem::take(&mut self.info);
        self.pending.push(timing.finish(
            L7Protocol::Http1,
            self.direction,
            L7ProtocolInfo::HttpInfo(info),
        ));
        self.trace = AppTraceContext::default();
        self.body = None;
        self.state = SessionState::AwaitingRequest;
    }

    fn on_request_line(
        &mut self,
        line: &str,
        payload: &[u8],
        param: &ParseParam,
        thread_index: &mut ThreadTraceIndex,
    ) -> Result<()> {
        // the captured prefix may end inside the request line
        let cut = is_truncated_req_line(payload);
        let (method, uri, version) = match get_http_request_info(line) {
            Ok((method, uri, version)) => match get_http_request_version(version) {
                Ok(version) => (method, uri, version),
                Err(_) if cut => (method, uri, ""),
                Err(e) => return Err(e),
            },
            Err(_) if cut => {
                let (method, uri) = line.split_once(' ').ok_or(Error::HttpHeaderParseFailed)?;
                (method, uri, "")
            }
            Err(e) => return Err(e),
        };
        check_http_method(method)?;
        let (path, truncated) = find_http_uri(line).ok_or(Error::HttpHeaderParseFailed)?;
        debug!("http request {} {}", method, uri);

        if self.timing.has_response() || self.state == SessionState::SessionOnly {
            self.finish_record();
        } else if self.timing.has_request() {
            debug!("http request without response, replaced");
            self.timing = RecordTiming::default();
            self.trace = AppTraceContext::default();
        }

        self.direction = Direction::from(param.nic_direction);
        self.request_nic = Some(param.nic_direction);
        self.info = HttpInfo {
            version: version.to_owned(),
            method: method.to_owned(),
            path: path.to_owned(),
            truncated,
            ..Default::default()
        };
        for (key, value) in header_pairs(payload) {
            let key = key.to_ascii_lowercase();
            if self.trace.on_header(&key, value) {
                continue;
            }
            match key.as_str() {
                "host" => self.info.host = value.to_owned(),
                "user-agent" => self.info.user_agent = Some(value.to_owned()),
                "x-request-id" => self.info.x_request_id = value.to_owned(),
                "content-length" => self.info.req_content_length = value.parse().ok(),
                _ => (),
            }
        }
        self.timing.on_request(param, self.direction, thread_index);
        self.timing.account(param);
        self.state = SessionState::AwaitingResponse;
        Ok(())
    }

    fn on_response_line(&mut self, line: &str, payload: &[u8], param: &ParseParam) -> Result<()> {
        let (version, status_code) = get_http_resp_info(line)?;
        if self.state != SessionState::AwaitingResponse {
            debug!("http response {} without request", status_code);
            return Ok(());
        }
        if self.info.version.is_empty() {
            self.info.version = version.to_owned();
        }
        self.info.status_code = Some(status_code);
        self.info.status = status_of(status_code);

        let mut body = Body::Unbounded;
        let mut content_length = None;
        for (key, value) in header_pairs(payload) {
            if key.eq_ignore_ascii_case("content-length") {
                content_length = value.parse::<u64>().ok();
            } else if key.eq_ignore_ascii_case("transfer-encoding")
                && value.eq_ignore_ascii_case("chunked")
            {
                body = Body::Chunked;
            }
        }
        if let Some(len) = content_length {
            self.info.resp_content_length = Some(len);
            body = Body::Length(len);
        }
        if status_code == 204 || status_code == 304 || self.info.method == "HEAD" {
            body = Body::Length(0);
        }

        self.timing.on_response(param);
        self.timing.account(param);
        // interim responses are followed by the real one
        if status_code < 200 {
            return Ok(());
        }
        self.body = Some(body);
        if let Some(n) = find_subsequence(payload, b"\r\n\r\n").map(|i| i + 4) {
            self.consume_body(&payload[n..], param.act_size.saturating_sub(n));
        }
        Ok(())
    }

    fn on_body(&mut self, payload: &[u8], param: &ParseParam) {
        if self.state != SessionState::AwaitingResponse {
            return;
        }
        if Some(param.nic_direction) == self.request_nic {
            if !self.timing.has_response() {
                self.timing.extend_request(param);
                self.timing.account(param);
            }
        } else if self.timing.has_response() {
            self.timing.on_response(param);
            self.timing.account(param);
            self.consume_body(payload, param.act_size);
        }
    }

    fn consume_body(&mut self, payload: &[u8], size: usize) {
        match self.body {
            Some(Body::Length(left)) => {
                let left = left.saturating_sub(size as u64);
                self.body = Some(Body::Length(left));
                if left == 0 {
                    self.state = SessionState::SessionOnly;
                }
            }
            Some(Body::Chunked) if payload.ends_with(b"0\r\n\r\n") => {
                self.state = SessionState::SessionOnly;
            }
            _ => (),
        }
    }
}

pub(super) fn status_of(status_code: u16) -> L7ResponseStatus {
    if status_code >= HTTP_STATUS_CLIENT_ERROR_MIN && status_code <= HTTP_STATUS_CLIENT_ERROR_MAX {
        L7ResponseStatus::ClientError
    } else if status_code >= HTTP_STATUS_SERVER_ERROR_MIN
        && status_code <= HTTP_STATUS_SERVER_ERROR_MAX
    {
        L7ResponseStatus::ServerError
    } else {
        L7ResponseStatus::Ok
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

// first line of the payload, the whole payload if it was cut before "\r\n"
fn first_line(payload: &[u8]) -> Option<&str> {
    let end = find_subsequence(payload, b"\r\n").unwrap_or(payload.len());
    str::from_utf8(&payload[..end]).ok()
}

fn header_pairs(payload: &[u8]) -> impl Iterator<Item = (&str, &str)> {
    parse_v1_headers(payload)
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim(), v.trim()))
}

/// Path of a request line without scheme, host and query.
///
/// The flag is set when the line ends right after the uri, which happens when
/// the captured prefix cut the request line.
pub fn find_http_uri(line: &str) -> Option<(&str, bool)> {
    let (_, rest) = line.split_once(' ')?;
    let (mut uri, truncated) = match rest.find(' ') {
        Some(i) => (&rest[..i], false),
        None => (rest, true),
    };
    if let Some(i) = uri.find("://") {
        let host_and_path = &uri[i + 3..];
        uri = match host_and_path.find('/') {
            Some(j) => &host_and_path[j..],
            None => "/",
        };
    }
    if let Some(i) = uri.find(|c| c == '?' || c == '#') {
        uri = &uri[..i];
    }
    Some((uri, truncated))
}

const HTTP_METHODS: [&'static str; 15] = [
    "GET",
    "POST",
    "PUT",
    "DELETE",
    "OPTIONS",
    "HEAD",
    "TRACE",
    "CONNECT",
    "PATCH",
    "LINK",
    "UNLINK",
    "COPY",
    "MOVE",
    "WRAPPED",
    "EXTENSION-METHOD",
];
const RESPONSE_PREFIX: &'static str = "HTTP/";

pub fn is_http_v1_payload(buf: &[u8]) -> bool {
    if buf.starts_with(RESPONSE_PREFIX.as_bytes()) {
        return true;
    }
    for m in HTTP_METHODS {
        if buf.starts_with(m.as_bytes()) {
            return true;
        }
    }
    false
}

// check first line is http request line
pub fn is_http_req_line(line: &str) -> bool {
    if line.len() < "GET / HTTP/1.1".len() {
        return false;
    }

    for i in HTTP_METHODS.iter() {
        if line.starts_with(i) {
            return matches!(
                line.get(line.len() - HTTP_V1_VERSION_LEN..),
                Some("HTTP/0.9" | "HTTP/1.0" | "HTTP/1.1")
            );
        }
    }
    false
}

/// Request line cut by the capture before its "\r\n".
///
/// Method and uri must be complete, the version may be missing or partial.
pub fn is_truncated_req_line(payload: &[u8]) -> bool {
    if find_subsequence(payload, b"\r\n").is_some() {
        return false;
    }
    let Ok(line) = str::from_utf8(payload) else {
        return false;
    };
    let mut parts = line.splitn(3, ' ');
    let (Some(method), Some(uri)) = (parts.next(), parts.next()) else {
        return false;
    };
    if check_http_method(method).is_err() || !uri.starts_with('/') {
        return false;
    }
    match parts.next() {
        None => !uri.contains(|c: char| c.is_ascii_control()),
        Some(version) => {
            HTTP_V1_1_VERSION.starts_with(version) || HTTP_V1_0_VERSION.starts_with(version)
        }
    }
}

pub fn check_http_method(method: &str) -> Result<()> {
    match method {
        "OPTIONS" | "GET" | "HEAD" | "POST" | "PUT" | "DELETE" | "TRACE" | "CONNECT" | "PATCH" => {
            Ok(())
        }
        _ => Err(Error::HttpHeaderParseFailed),
    }
}

pub fn get_http_request_version(version: &str) -> Result<&str> {
    match version {
        HTTP_V1_0_VERSION => Ok("1.0"),
        HTTP_V1_1_VERSION => Ok("1.1"),
        _ => Err(Error::HttpHeaderParseFailed),
    }
}

pub fn get_http_request_info(line_info: &str) -> Result<(&str, &str, &str)> {
    let mut iter = line_info.splitn(3, |c: char| c.is_ascii_whitespace());
    match (iter.next(), iter.next(), iter.next()) {
        (Some(method), Some(path), Some(version)) => Ok((method, path, version)),
        _ => Err(Error::HttpHeaderParseFailed),
    }
}

pub fn get_http_resp_info(line_info: &str) -> Result<(&str, u16)> {
    const VERSION_LEN: usize = HTTP_V1_0_VERSION.len();
    const CODE_OFFSET: usize = VERSION_LEN + 1;
    const CODE_LEN: usize = 3;
    if line_info.len() < HTTP_RESP_MIN_LEN || !line_info.is_ascii() {
        return Err(Error::HttpHeaderParseFailed);
    }
    // HTTP response line: HTTP/1.1 404 Not Found.
    let version = match &line_info[..VERSION_LEN] {
        HTTP_V1_0_VERSION => "1.0",
        HTTP_V1_1_VERSION => "1.1",
        _ => return Err(Error::HttpHeaderParseFailed),
    };

    let Ok(status_code) = line_info[CODE_OFFSET..CODE_OFFSET + CODE_LEN].parse::<u16>() else {
        return Err(Error::HttpHeaderParseFailed);
    };

    if status_code < HTTP_STATUS_CODE_MIN || status_code > HTTP_STATUS_CODE_MAX {
        return Err(Error::HttpHeaderParseFailed);
    }
    Ok((version, status_code))
}

pub struct V1HeaderIterator<'a>(&'a [u8]);

impl<'a> Iterator for V1HeaderIterator<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        if self.0.len() < 2 {
            return None;
        }
        const SEP: &'static str = "\r\n";
        let mut end = 0;
        loop {
            // odd length lines such as "HTTP/1.0 200 OK\r\n"
            if end == self.0.len() - 1
                && self.0[end] == b'\n'
                && end >= 1
                && self.0[end - 1] == b'\r'
            {
                end -= 1;
                break;
            }

            if end + SEP.len() > self.0.len() {
                return None;
            }
            match &self.0[end] {
                b'\r' if self.0[end + 1] == b'\n' => break,
                b'\n' if end >= 1 && self.0[end - 1] == b'\r' => {
                    end -= 1;
                    break;
                }
                c if !c.is_ascii() => return None,
                _ => (),
            }
            // the length of SEP is 2 so step 2 is ok
            end += 2;
        }
        if end == 0 {
            None
        } else {
            let result = str::from_utf8(&self.0[..end]).ok();
            self.0 = &self.0[end + 2..];
            result
        }
    }
}

pub fn parse_v1_headers(payload: &[u8]) -> V1HeaderIterator<'_> {
    V1HeaderIterator(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::utils::test::Capture;

    #[test]
    fn uri() {
        assert_eq!(find_http_uri("GET /abccom HTTP/1.1"), Some(("/abccom", false)));
        assert_eq!(
            find_http_uri("GET https://h/sfsf?22 HTTP/1.1"),
            Some(("/sfsf", false))
        );
        assert_eq!(find_http_uri("GET /abc/def?x=1"), Some(("/abc/def", true)));
        assert_eq!(find_http_uri("POST http://host HTTP/1.0"), Some(("/", false)));
        assert_eq!(find_http_uri("GET"), None);
    }

    #[test]
    fn request_and_status_line() {
        assert!(is_http_req_line("GET /index.html HTTP/1.1"));
        assert!(!is_http_req_line("GET /index.html HTTP/2.0"));
        assert!(!is_http_req_line("FOO /index.html HTTP/1.1"));
        assert_eq!(get_http_resp_info("HTTP/1.1 404 Not Found").unwrap(), ("1.1", 404));
        assert!(get_http_resp_info("HTTP/1.1 99 Continue").is_err());
        assert!(get_http_resp_info("HTTP/2.0 200 OK").is_err());
        let mut it = parse_v1_headers(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");
        assert_eq!(it.next(), Some("HTTP/1.1 200 OK"));
        assert_eq!(it.next(), Some("Content-Length: 2"));
        assert_eq!(it.next(), None);
    }

    #[test]
    fn inbound_session() {
        let mut capture = Capture::new(80, 50000);
        capture
            .read(b"GET /api/users?id=3 HTTP/1.1\r\nHost: example.com\r\nUser-Agent: curl/8.0\r\ntraceparent: 00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01\r\n\r\n")
            .write(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n01234")
            .write(b"56789");
        let mut parser = HttpLog::new();
        let mut index = ThreadTraceIndex::default();
        let records = capture.replay(&mut parser, &mut index, false);
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.direction, Direction::In);
        assert_eq!(r.protocol, L7Protocol::Http1);
        let L7ProtocolInfo::HttpInfo(info) = &r.info else {
            unreachable!()
        };
        assert_eq!(info.method, "GET");
        assert_eq!(info.path, "/api/users");
        assert_eq!(info.host, "example.com");
        assert_eq!(info.status_code, Some(200));
        assert_eq!(info.resp_content_length, Some(10));
        // kernel times 1010, 1010, 2010, 3010
        assert_eq!(r.duration, 2000);
        assert_eq!(r.cost, 1000);
        let fragments = capture.fragments();
        assert_eq!(r.bytes_read, fragments[0].act_size as u64);
        assert_eq!(
            r.bytes_written,
            (fragments[1].act_size + fragments[2].act_size) as u64
        );
        assert_ne!(r.meta.inner_id, 0);
        assert_eq!(index.get_inner_id([100, 100], 5000), r.meta.inner_id);
        let trace = r.meta.app_trace.unwrap();
        assert_eq!(trace.trace_id_string(), "0af7651916cd43dd8448eb211c80319c");
        assert!(parser.export(true).is_empty());
    }

    #[test]
    fn keep_alive_and_errors() {
        let mut capture = Capture::new(50000, 8080);
        capture
            .write(b"POST /a HTTP/1.1\r\nContent-Length: 2\r\n\r\n{}")
            .read(b"HTTP/1.1 404 Not Found\r\nTransfer-Encoding: chunked\r\n\r\n")
            .read(b"5\r\nhello\r\n")
            .write(b"DELETE /b HTTP/1.1\r\n\r\n")
            .read(b"HTTP/1.1 503 Service Unavailable\r\n\r\n");
        let mut parser = HttpLog::new();
        let mut index = ThreadTraceIndex::default();
        let records = capture.replay(&mut parser, &mut index, false);
        // the chunked body never ended, the next request closed it
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].direction, Direction::Out);
        assert_eq!(records[0].meta.inner_id, 0);
        assert!(index.is_empty());
        let L7ProtocolInfo::HttpInfo(info) = &records[0].info else {
            unreachable!()
        };
        assert_eq!(info.status, L7ResponseStatus::ClientError);
        assert_eq!(info.req_content_length, Some(2));

        // the last response has no length and waits for close
        assert!(parser.export(false).is_empty());
        parser.conn_close();
        let records = parser.export(false);
        assert_eq!(records.len(), 1);
        let L7ProtocolInfo::HttpInfo(info) = &records[0].info else {
            unreachable!()
        };
        assert_eq!(info.method, "DELETE");
        assert_eq!(info.status, L7ResponseStatus::ServerError);
    }

    #[test]
    fn truncated_request_line() {
        let conn = crate::common::ConnectionInfo::default();
        let f = crate::common::RawFragment {
            conn: std::sync::Arc::new(conn),
            ..Default::default()
        };
        let param = ParseParam::new(&f, 0);
        let parser = HttpLog::new();
        for (payload, expected) in [
            (&b"GET /very/long/path/cut"[..], true),
            (b"POST /api/v1/orders?id=3 HTT", true),
            (b"GET /index.html HTTP/1.1", true),
            (b"GET /index.html HTTP/1.1\r\nHost: a\r\n\r\n", true),
            (b"GET /", true),
            (b"GET", false),
            (b"GET ", false),
            (b"GET index.html", false),
            (b"FOO /index.html", false),
            (b"GET /index.html FTP/1.1", false),
            (b"GET /index.html HTTP/2.0", false),
            (b"GET /index.html HTTP/1.1\r\n", true),
            (b"PRI * HTTP/2.0", false),
        ] {
            assert_eq!(
                parser.check_payload(payload, &param),
                expected,
                "payload {:?}",
                String::from_utf8_lossy(payload)
            );
        }
    }

    #[test]
    fn request_cut_inside_version() {
        let mut capture = Capture::new(80, 50000);
        capture.read(b"POST /api/v1/orders?id=3 HTT");
        let mut parser = HttpLog::new();
        let mut index = ThreadTraceIndex::default();
        let records = capture.replay(&mut parser, &mut index, true);
        assert_eq!(records.len(), 1);
        let L7ProtocolInfo::HttpInfo(info) = &records[0].info else {
            unreachable!()
        };
        assert_eq!(info.method, "POST");
        assert_eq!(info.path, "/api/v1/orders");
        assert_eq!(info.version, "");
        assert!(!info.truncated);
    }

    #[test]
    fn orphan_response_and_truncated_request() {
        let mut capture = Capture::new(80, 50000);
        capture
            .write(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
            .read(b"GET /very/long/path/cut");
        let mut parser = HttpLog::new();
        let mut index = ThreadTraceIndex::default();
        assert!(capture.replay(&mut parser, &mut index, false).is_empty());
        let records = parser.export(true);
        assert_eq!(records.len(), 1);
        let L7ProtocolInfo::HttpInfo(info) = &records[0].info else {
            unreachable!()
        };
        assert_eq!(info.path, "/very/long/path/cut");
        assert!(info.truncated);
        assert_eq!(info.version, "");
        assert_eq!(info.status_code, None);
        // only the request, 10ns inside the syscall
        assert_eq!(records[0].duration, 10);
    }
}
