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

use std::str::Utf8Error;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("zero payload len")]
    ZeroPayloadLen,
    #[error("insufficient payload length")]
    InsufficientPayloadLength,
    #[error("unknown packet direction")]
    UnknownDirection,
    #[error("http header parse failed")]
    HttpHeaderParseFailed,
    #[error("http2 frame parse failed")]
    Http2FrameParseFailed,
    #[error("hpack decode failed: {0}")]
    HpackDecodeFailed(String),
    #[error("redis log parse failed")]
    RedisLogParseFailed,
    #[error("mysql log parse failed")]
    MysqlLogParseFailed,
    #[error("postgresql log parse failed")]
    PostgresLogParseFailed,
    #[error("{0}")]
    AmqpLogParseFailed(&'static str),
    #[error("l7 protocol unknown")]
    L7ProtocolUnknown,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<Utf8Error> for Error {
    fn from(_: Utf8Error) -> Self {
        Self::HttpHeaderParseFailed
    }
}
