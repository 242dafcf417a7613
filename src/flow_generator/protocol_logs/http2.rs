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
use std::str;

use hpack::Decoder;
use log::debug;
use serde::Serialize;

use super::consts::*;
use super::http::{check_http_method, status_of};
use super::{value_is_default, AppTraceContext, L7ResponseStatus, ProtoData, RecordTiming};

use crate::common::{
    flow::{Direction, NicDirection},
    l7_protocol_info::{L7ProtocolInfo, L7ProtocolInfoInterface},
    l7_protocol_log::{L7ProtocolParserInterface, ParseParam},
};
use crate::flow_generator::{
    error::{Error, Result},
    thread_trace::ThreadTraceIndex,
};

use public::{bytes::read_u32_be, enums::L4Protocol, l7_protocol::L7Protocol};

const MAX_STREAMS: usize = 256;
// unfinished frame bytes kept for the next fragment
const MAX_CARRY: usize = 16384;

#[derive(Serialize, Debug, Default, Clone, PartialEq)]
pub struct Http2Info {
    #[serde(rename = "request_id")]
    pub stream_id: u32,
    #[serde(rename = "request_type", skip_serializing_if = "value_is_default")]
    pub method: String,
    #[serde(rename = "request_resource", skip_serializing_if = "value_is_default")]
    pub path: String,
    #[serde(rename = "request_domain", skip_serializing_if = "value_is_default")]
    pub authority: String,
    #[serde(rename = "user_agent", skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip)]
    pub is_grpc: bool,

    #[serde(rename = "request_length", skip_serializing_if = "Option::is_none")]
    pub req_content_length: Option<u64>,
    #[serde(rename = "response_length", skip_serializing_if = "Option::is_none")]
    pub resp_content_length: Option<u64>,

    #[serde(rename = "response_code", skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grpc_status: Option<u32>,
    #[serde(skip_serializing_if = "value_is_default")]
    pub grpc_message: String,
    #[serde(rename = "response_status")]
    pub status: L7ResponseStatus,
}

impl Http2Info {
    fn update_status(&mut self) {
        self.status = match self.grpc_status {
            Some(code) if self.is_grpc => grpc_status_of(code),
            _ => self.status_code.map(status_of).unwrap_or_default(),
        };
    }
}

impl L7ProtocolInfoInterface for Http2Info {
    fn status(&self) -> L7ResponseStatus {
        self.status
    }

    fn operation(&self) -> String {
        if self.is_grpc {
            self.path.clone()
        } else {
            format!("{} {}", self.method, self.path)
        }
    }

    fn aggregation_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("method", self.method.clone()),
            ("path", self.path.clone()),
            (
                "status_code",
                self.status_code.map(|c| c.to_string()).unwrap_or_default(),
            ),
        ];
        if self.is_grpc {
            tags.push((
                "grpc_status",
                self.grpc_status.map(|c| c.to_string()).unwrap_or_default(),
            ));
        }
        tags
    }
}

// https://grpc.github.io/grpc/core/md_doc_statuscodes.html
fn grpc_status_of(code: u32) -> L7ResponseStatus {
    match code {
        0 => L7ResponseStatus::Ok,
        // INVALID_ARGUMENT NOT_FOUND ALREADY_EXISTS PERMISSION_DENIED
        // FAILED_PRECONDITION OUT_OF_RANGE UNAUTHENTICATED
        3 | 5 | 6 | 7 | 9 | 11 | 16 => L7ResponseStatus::ClientError,
        _ => L7ResponseStatus::ServerError,
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct Httpv2Headers {
    pub frame_length: u32,
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: u32,
}

impl Httpv2Headers {
    // https://tools.ietf.org/html/rfc7540#section-4.1
    // +-----------------------------------------------+
    // |                 Length (24)                   |
    // +---------------+---------------+---------------+
    // |   Type (8)    |   Flags (8)   |
    // +-+-------------+---------------+-------------------------------+
    // |R|                 Stream Identifier (31)                      |
    // +=+=============================================================+
    // |                   Frame Payload (0...)                      ...
    // +---------------------------------------------------------------+
    pub fn parse_headers_frame(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() < HTTPV2_FRAME_HEADER_LENGTH {
            return Err(Error::InsufficientPayloadLength);
        }
        let frame_type = payload[3];
        if frame_type > HTTPV2_FRAME_TYPE_MAX {
            return Err(Error::Http2FrameParseFailed);
        }

        if payload[5] & 0x80 != 0 {
            return Err(Error::Http2FrameParseFailed);
        }

        self.frame_length = read_u32_be(payload) >> 8;
        if self.frame_length as usize > HTTPV2_MAX_FRAME_SIZE {
            return Err(Error::Http2FrameParseFailed);
        }
        self.frame_type = frame_type;
        self.flags = payload[4];
        self.stream_id = read_u32_be(&payload[5..]);

        Ok(())
    }
}

// header block fragment of a HEADERS frame without padding and priority
fn header_block(flags: u8, frame: &[u8]) -> Result<&[u8]> {
    let (mut start, mut end) = (0, frame.len());
    if flags & FLAG_HEADERS_PADDED != 0 {
        let pad = *frame.first().ok_or(Error::Http2FrameParseFailed)? as usize;
        start = 1;
        end = end.checked_sub(pad).ok_or(Error::Http2FrameParseFailed)?;
    }
    if flags & FLAG_HEADERS_PRIORITY != 0 {
        start += 5;
    }
    if start > end {
        return Err(Error::Http2FrameParseFailed);
    }
    Ok(&frame[start..end])
}

fn data_len(flags: u8, frame: &[u8]) -> Result<u64> {
    if flags & FLAG_HEADERS_PADDED == 0 {
        return Ok(frame.len() as u64);
    }
    let pad = *frame.first().ok_or(Error::Http2FrameParseFailed)? as usize;
    frame
        .len()
        .checked_sub(pad + 1)
        .map(|n| n as u64)
        .ok_or(Error::Http2FrameParseFailed)
}

fn nic_index(nic_direction: NicDirection) -> Option<usize> {
    match nic_direction {
        NicDirection::Ingress => Some(0),
        NicDirection::Egress => Some(1),
        NicDirection::Unknown => None,
    }
}

#[derive(Default)]
struct Stream {
    direction: Direction,
    info: Http2Info,
    trace: AppTraceContext,
    timing: RecordTiming,
}

impl Stream {
    fn on_header(&mut self, key: &[u8], value: &[u8]) {
        let Ok(key) = str::from_utf8(key) else {
            return;
        };
        let value = String::from_utf8_lossy(value);
        match key {
            ":method" => self.info.method = value.into_owned(),
            ":path" => {
                let path = value.split('?').next().unwrap_or_default();
                self.info.path = path.to_owned();
            }
            ":authority" | "host" => self.info.authority = value.into_owned(),
            ":status" => self.info.status_code = value.parse().ok(),
            "content-type" => {
                if value.starts_with("application/grpc") {
                    self.info.is_grpc = true;
                }
            }
            "user-agent" => self.info.user_agent = Some(value.into_owned()),
            "grpc-status" => self.info.grpc_status = value.trim().parse().ok(),
            "grpc-message" => self.info.grpc_message = value.into_owned(),
            _ => {
                self.trace.on_header(key, &value);
            }
        }
    }

    fn finish(self) -> ProtoData {
        let Stream {
            direction,
            mut info,
            trace,
            mut timing,
        } = self;
        info.update_status();
        if trace.is_valid() {
            timing.meta.app_trace = Some(trace);
        }
        let protocol = if info.is_grpc {
            L7Protocol::Grpc
        } else {
            L7Protocol::Http2
        };
        timing.finish(protocol, direction, L7ProtocolInfo::Http2Info(info))
    }
}

struct HeaderBlock {
    stream_id: u32,
    end_stream: bool,
    size: u64,
    data: Vec<u8>,
}

/// HTTP/2 and gRPC decoder.
///
/// Streams are tracked by id, each one is a record:
///
/// | stream event                     | effect                          |
/// |----------------------------------|---------------------------------|
/// | HEADERS with `:method`           | record opened, awaiting response |
/// | HEADERS/DATA from the client     | request continues               |
/// | HEADERS/DATA from the server     | response continues              |
/// | END_STREAM from the server       | record finished                 |
/// | frame for an unknown stream      | dropped                         |
///
/// The client side is the one that sent the connection preface, or the first
/// request headers when the preface was not seen.
pub struct Http2Log {
    // per nic direction, ingress first
    decoders: [Decoder<'static>; 2],
    carry: [Vec<u8>; 2],
    blocks: [Option<HeaderBlock>; 2],

    client_nic: Option<NicDirection>,
    streams: HashMap<u32, Stream>,
    pending: Vec<ProtoData>,
}

impl Default for Http2Log {
    fn default() -> Self {
        Self {
            decoders: [Decoder::new(), Decoder::new()],
            carry: Default::default(),
            blocks: Default::default(),
            client_nic: None,
            streams: HashMap::new(),
            pending: vec![],
        }
    }
}

impl L7ProtocolParserInterface for Http2Log {
    fn check_payload(&self, payload: &[u8], param: &ParseParam) -> bool {
        if param.conn.l4_protocol != L4Protocol::Tcp {
            return false;
        }
        if payload.starts_with(HTTPV2_MAGIC) {
            return true;
        }
        let mut frames = payload;
        let mut header = Httpv2Headers::default();
        while frames.len() >= HTTPV2_FRAME_HEADER_LENGTH {
            if header.parse_headers_frame(frames).is_err() {
                return false;
            }
            let end = HTTPV2_FRAME_HEADER_LENGTH + header.frame_length as usize;
            if frames.len() < end {
                return false;
            }
            if header.frame_type == HTTPV2_FRAME_HEADERS_TYPE {
                if header.stream_id == 0 || header.flags & FLAG_END_HEADERS == 0 {
                    return false;
                }
                let Ok(block) = header_block(header.flags, &frames[HTTPV2_FRAME_HEADER_LENGTH..end])
                else {
                    return false;
                };
                // a fresh decoder, requests after the first may refer to the dynamic table
                let Ok(headers) = Decoder::new().decode(block) else {
                    return false;
                };
                return headers.iter().any(|(k, v)| {
                    k == b":method"
                        && str::from_utf8(v)
                            .map(|m| check_http_method(m).is_ok())
                            .unwrap_or_default()
                });
            }
            frames = &frames[end..];
        }
        false
    }

    fn parse_payload(
        &mut self,
        payload: &[u8],
        param: &ParseParam,
        thread_index: &mut ThreadTraceIndex,
    ) -> Result<()> {
        let Some(side) = nic_index(param.nic_direction) else {
            return Err(Error::UnknownDirection);
        };
        if payload.is_empty() {
            return Err(Error::ZeroPayloadLen);
        }
        let truncated = param.act_size > payload.len();

        let mut carry = std::mem::take(&mut self.carry[side]);
        let buf: &[u8] = if carry.is_empty() {
            payload
        } else {
            carry.extend_from_slice(payload);
            &carry
        };

        let mut frames = buf;
        if frames.starts_with(HTTPV2_MAGIC) {
            self.client_nic = Some(param.nic_direction);
            frames = &frames[HTTPV2_MAGIC_LENGTH..];
        }
        let mut header = Httpv2Headers::default();
        while frames.len() >= HTTPV2_FRAME_HEADER_LENGTH {
            header.parse_headers_frame(frames)?;
            let end = HTTPV2_FRAME_HEADER_LENGTH + header.frame_length as usize;
            if frames.len() < end {
                break;
            }
            self.on_frame(
                &header,
                &frames[HTTPV2_FRAME_HEADER_LENGTH..end],
                param,
                side,
                thread_index,
            )?;
            frames = &frames[end..];
        }
        // bytes lost to truncation would misalign the next frame
        if !frames.is_empty() && !truncated && frames.len() <= MAX_CARRY {
            self.carry[side] = frames.to_vec();
        }
        Ok(())
    }

    fn export(&mut self, force: bool) -> Vec<ProtoData> {
        if force {
            let mut ids: Vec<u32> = self.streams.keys().copied().collect();
            ids.sort_unstable();
            for id in ids {
                self.finish_stream(id);
            }
        }
        std::mem::take(&mut self.pending)
    }

    fn conn_close(&mut self) {
        self.carry = Default::default();
        self.blocks = Default::default();
    }

    fn protocol(&self) -> L7Protocol {
        L7Protocol::Http2
    }
}

impl Http2Log {
    pub fn new() -> Self {
        Self::default()
    }

    fn finish_stream(&mut self, stream_id: u32) {
        if let Some(stream) = self.streams.remove(&stream_id) {
            self.pending.push(stream.finish());
        }
    }

    fn from_server(&self, param: &ParseParam) -> bool {
        self.client_nic != Some(param.nic_direction)
    }

    fn on_frame(
        &mut self,
        header: &Httpv2Headers,
        frame: &[u8],
        param: &ParseParam,
        side: usize,
        thread_index: &mut ThreadTraceIndex,
    ) -> Result<()> {
        let size = (HTTPV2_FRAME_HEADER_LENGTH + frame.len()) as u64;
        match header.frame_type {
            HTTPV2_FRAME_HEADERS_TYPE => {
                if header.stream_id == 0 {
                    return Err(Error::Http2FrameParseFailed);
                }
                let block = header_block(header.flags, frame)?;
                let end_stream = header.flags & FLAG_END_STREAM != 0;
                if header.flags & FLAG_END_HEADERS == 0 {
                    self.blocks[side] = Some(HeaderBlock {
                        stream_id: header.stream_id,
                        end_stream,
                        size,
                        data: block.to_vec(),
                    });
                    return Ok(());
                }
                self.on_header_block(
                    header.stream_id,
                    end_stream,
                    size,
                    block,
                    param,
                    side,
                    thread_index,
                )
            }
            HTTPV2_FRAME_CONTINUATION_TYPE => {
                let Some(mut block) = self.blocks[side].take() else {
                    return Err(Error::Http2FrameParseFailed);
                };
                if block.stream_id != header.stream_id {
                    return Err(Error::Http2FrameParseFailed);
                }
                block.data.extend_from_slice(frame);
                block.size += size;
                if header.flags & FLAG_END_HEADERS == 0 {
                    self.blocks[side] = Some(block);
                    return Ok(());
                }
                self.on_header_block(
                    block.stream_id,
                    block.end_stream,
                    block.size,
                    &block.data,
                    param,
                    side,
                    thread_index,
                )
            }
            HTTPV2_FRAME_DATA_TYPE => {
                if header.stream_id == 0 {
                    return Err(Error::Http2FrameParseFailed);
                }
                let len = data_len(header.flags, frame)?;
                let from_server = self.from_server(param);
                let Some(stream) = self.streams.get_mut(&header.stream_id) else {
                    return Ok(());
                };
                if from_server {
                    stream.timing.on_response(param);
                    *stream.info.resp_content_length.get_or_insert(0) += len;
                } else {
                    stream.timing.extend_request(param);
                    *stream.info.req_content_length.get_or_insert(0) += len;
                }
                stream.timing.account_bytes(param.nic_direction, size);
                if from_server && header.flags & FLAG_END_STREAM != 0 {
                    self.finish_stream(header.stream_id);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn on_header_block(
        &mut self,
        stream_id: u32,
        end_stream: bool,
        size: u64,
        block: &[u8],
        param: &ParseParam,
        side: usize,
        thread_index: &mut ThreadTraceIndex,
    ) -> Result<()> {
        let headers = match self.decoders[side].decode(block) {
            Ok(headers) => headers,
            Err(e) => {
                // the dynamic table is lost
                self.decoders[side] = Decoder::new();
                return Err(Error::HpackDecodeFailed(format!("{:?}", e)));
            }
        };

        if headers.iter().any(|(k, _)| k == b":method") {
            if self.client_nic.is_none() {
                self.client_nic = Some(param.nic_direction);
            }
            if self.streams.len() >= MAX_STREAMS {
                if let Some(oldest) = self.streams.keys().min().copied() {
                    debug!("too many http2 streams, finish stream {}", oldest);
                    self.finish_stream(oldest);
                }
            }
            let direction = Direction::from(param.nic_direction);
            let stream = self.streams.entry(stream_id).or_default();
            stream.direction = direction;
            stream.info.stream_id = stream_id;
            for (k, v) in headers.iter() {
                stream.on_header(k, v);
            }
            stream.timing.on_request(param, direction, thread_index);
            stream.timing.account_bytes(param.nic_direction, size);
            return Ok(());
        }

        let from_server = self.from_server(param);
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            debug!("http2 headers of unknown stream {}", stream_id);
            return Ok(());
        };
        for (k, v) in headers.iter() {
            stream.on_header(k, v);
        }
        if from_server {
            stream.timing.on_response(param);
        } else {
            stream.timing.extend_request(param);
        }
        stream.timing.account_bytes(param.nic_direction, size);
        if from_server && end_stream {
            self.finish_stream(stream_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use hpack::Encoder;

    use super::*;
    use crate::utils::test::Capture;

    const SETTINGS: u8 = 0x4;

    fn frame(frame_type: u8, flags: u8, stream_id: u32, payload: &[u8]) -> Vec<u8> {
        let mut f = Vec::with_capacity(HTTPV2_FRAME_HEADER_LENGTH + payload.len());
        f.extend_from_slice(&(payload.len() as u32).to_be_bytes()[1..]);
        f.push(frame_type);
        f.push(flags);
        f.extend_from_slice(&stream_id.to_be_bytes());
        f.extend_from_slice(payload);
        f
    }

    fn encode(encoder: &mut Encoder<'static>, headers: &[(&str, &str)]) -> Vec<u8> {
        encoder.encode(headers.iter().map(|(k, v)| (k.as_bytes(), v.as_bytes())))
    }

    fn info(record: &ProtoData) -> &Http2Info {
        match &record.info {
            L7ProtocolInfo::Http2Info(info) => info,
            _ => unreachable!(),
        }
    }

    #[test]
    fn grpc_unary() {
        let (mut client, mut server) = (Encoder::new(), Encoder::new());
        let mut request = HTTPV2_MAGIC.to_vec();
        request.extend(frame(SETTINGS, 0, 0, &[]));
        let request_start = request.len();
        request.extend(frame(
            HTTPV2_FRAME_HEADERS_TYPE,
            FLAG_END_HEADERS,
            1,
            &encode(
                &mut client,
                &[
                    (":method", "POST"),
                    (":scheme", "http"),
                    (":path", "/helloworld.Greeter/SayHello"),
                    (":authority", "greeter:9000"),
                    ("content-type", "application/grpc"),
                    (
                        "traceparent",
                        "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
                    ),
                ],
            ),
        ));
        request.extend(frame(
            HTTPV2_FRAME_DATA_TYPE,
            FLAG_END_STREAM,
            1,
            &[0, 0, 0, 0, 2, 0x0a, 0x00],
        ));

        let mut capture = Capture::new(50000, 9000);
        capture
            .write(&request)
            .read(&frame(
                HTTPV2_FRAME_HEADERS_TYPE,
                FLAG_END_HEADERS,
                1,
                &encode(
                    &mut server,
                    &[(":status", "200"), ("content-type", "application/grpc")],
                ),
            ))
            .read(&frame(HTTPV2_FRAME_DATA_TYPE, 0, 1, &[0, 0, 0, 0, 3, 1, 2, 3]))
            .read(&frame(
                HTTPV2_FRAME_HEADERS_TYPE,
                FLAG_END_HEADERS | FLAG_END_STREAM,
                1,
                &encode(
                    &mut server,
                    &[("grpc-status", "5"), ("grpc-message", "user not found")],
                ),
            ));

        let mut parser = Http2Log::new();
        let mut index = ThreadTraceIndex::default();
        let records = capture.replay(&mut parser, &mut index, false);
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.protocol, L7Protocol::Grpc);
        assert_eq!(r.direction, Direction::Out);
        let info = info(r);
        assert_eq!(info.path, "/helloworld.Greeter/SayHello");
        assert_eq!(info.authority, "greeter:9000");
        assert_eq!(info.status_code, Some(200));
        assert_eq!(info.grpc_status, Some(5));
        assert_eq!(info.grpc_message, "user not found");
        assert_eq!(info.status, L7ResponseStatus::ClientError);
        assert_eq!(info.req_content_length, Some(7));
        assert_eq!(info.resp_content_length, Some(8));
        assert_eq!(r.bytes_written, (request.len() - request_start) as u64);
        let read: usize = capture.fragments()[1..].iter().map(|f| f.act_size).sum();
        assert_eq!(r.bytes_read, read as u64);
        assert_eq!(r.duration, 3000);
        assert_eq!(r.cost, 1000);
        assert!(r.meta.app_trace.unwrap().sampled);
        assert_eq!(r.meta.inner_id, 0);
    }

    #[test]
    fn interleaved_streams() {
        let (mut client, mut server) = (Encoder::new(), Encoder::new());
        let first = encode(
            &mut client,
            &[
                (":method", "GET"),
                (":scheme", "http"),
                (":path", "/a"),
                (":authority", "svc"),
            ],
        );
        let second = encode(
            &mut client,
            &[
                (":method", "GET"),
                (":scheme", "http"),
                (":path", "/b?page=2"),
                (":authority", "svc"),
            ],
        );

        let mut capture = Capture::new(8080, 50000);
        capture
            .read(
                &[
                    frame(
                        HTTPV2_FRAME_HEADERS_TYPE,
                        FLAG_END_HEADERS | FLAG_END_STREAM,
                        1,
                        &first,
                    ),
                    frame(HTTPV2_FRAME_HEADERS_TYPE, FLAG_END_STREAM, 3, &second[..2]),
                ]
                .concat(),
            )
            .read(&frame(
                HTTPV2_FRAME_CONTINUATION_TYPE,
                FLAG_END_HEADERS,
                3,
                &second[2..],
            ))
            .write(&frame(
                HTTPV2_FRAME_HEADERS_TYPE,
                FLAG_END_HEADERS | FLAG_END_STREAM,
                3,
                &encode(&mut server, &[(":status", "500")]),
            ))
            .write(
                &[
                    frame(
                        HTTPV2_FRAME_HEADERS_TYPE,
                        FLAG_END_HEADERS,
                        1,
                        &encode(&mut server, &[(":status", "200")]),
                    ),
                    frame(HTTPV2_FRAME_DATA_TYPE, FLAG_END_STREAM, 1, b"hello"),
                ]
                .concat(),
            );

        let mut parser = Http2Log::new();
        let mut index = ThreadTraceIndex::default();
        let records = capture.replay(&mut parser, &mut index, false);
        assert_eq!(records.len(), 2);
        let (b, a) = (info(&records[0]), info(&records[1]));
        assert_eq!((a.stream_id, a.path.as_str()), (1, "/a"));
        assert_eq!((b.stream_id, b.path.as_str()), (3, "/b"));
        assert_eq!(a.status, L7ResponseStatus::Ok);
        assert_eq!(a.resp_content_length, Some(5));
        assert_eq!(b.status, L7ResponseStatus::ServerError);
        for r in records.iter() {
            assert_eq!(r.protocol, L7Protocol::Http2);
            assert_eq!(r.direction, Direction::In);
            assert_ne!(r.meta.inner_id, 0);
        }
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn frame_split_across_fragments() {
        let mut client = Encoder::new();
        let headers = frame(
            HTTPV2_FRAME_HEADERS_TYPE,
            FLAG_END_HEADERS | FLAG_END_STREAM,
            5,
            &encode(
                &mut client,
                &[(":method", "GET"), (":path", "/split"), (":scheme", "http")],
            ),
        );
        let mut capture = Capture::new(8080, 50000);
        capture.read(&headers[..4]).read(&headers[4..]);

        let mut parser = Http2Log::new();
        let mut index = ThreadTraceIndex::default();
        assert!(capture.replay(&mut parser, &mut index, false).is_empty());
        // no response, the record is flushed on close
        let records = parser.export(true);
        assert_eq!(records.len(), 1);
        assert_eq!(info(&records[0]).path, "/split");
        assert_eq!(info(&records[0]).status_code, None);
        assert_eq!(records[0].bytes_read, headers.len() as u64);
    }

    #[test]
    fn check() {
        let parser = Http2Log::new();
        let mut capture = Capture::new(50000, 80);
        let mut client = Encoder::new();
        let mut payload = frame(SETTINGS, 0, 0, &[0, 3, 0, 0, 0, 100]);
        payload.extend(frame(
            HTTPV2_FRAME_HEADERS_TYPE,
            FLAG_END_HEADERS,
            1,
            &encode(&mut client, &[(":method", "GET"), (":path", "/")]),
        ));
        capture
            .write(HTTPV2_MAGIC)
            .write(&payload)
            .write(b"GET / HTTP/1.1\r\n\r\n")
            .write(&frame(HTTPV2_FRAME_DATA_TYPE, 0, 1, b"data"));
        let matched: Vec<bool> = capture
            .fragments()
            .iter()
            .map(|f| parser.check_payload(&f.payload, &ParseParam::new(f, 0)))
            .collect();
        assert_eq!(matched, vec![true, true, false, false]);
    }
}
