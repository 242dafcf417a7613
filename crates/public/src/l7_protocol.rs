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

use std::fmt;

use num_enum::FromPrimitive;
use serde::Serialize;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Hash, Eq, FromPrimitive, num_enum::Default)]
#[repr(u8)]
pub enum L7Protocol {
    #[num_enum(default)]
    Unknown = 0,

    // HTTP
    Http1 = 20,
    Http2 = 21,

    // RPC
    Grpc = 41,

    // SQL
    MySQL = 60,
    PostgreSQL = 61,

    // NoSQL
    Redis = 80,

    // MQ
    AMQP = 102,
}

impl L7Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            L7Protocol::Unknown => "unknown",
            L7Protocol::Http1 => "HTTP",
            L7Protocol::Http2 => "HTTP2",
            L7Protocol::Grpc => "gRPC",
            L7Protocol::MySQL => "MySQL",
            L7Protocol::PostgreSQL => "PostgreSQL",
            L7Protocol::Redis => "Redis",
            L7Protocol::AMQP => "AMQP",
        }
    }
}

impl fmt::Display for L7Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for L7Protocol {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_ascii_lowercase().as_str() {
            "http" | "http1" => Ok(L7Protocol::Http1),
            "http2" => Ok(L7Protocol::Http2),
            "grpc" => Ok(L7Protocol::Grpc),
            "mysql" => Ok(L7Protocol::MySQL),
            "postgresql" | "pgsql" => Ok(L7Protocol::PostgreSQL),
            "redis" => Ok(L7Protocol::Redis),
            "amqp" => Ok(L7Protocol::AMQP),
            _ => Err(format!("unknown protocol {}", value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_names() {
        assert_eq!(L7Protocol::try_from("Redis"), Ok(L7Protocol::Redis));
        assert_eq!(L7Protocol::try_from("HTTP"), Ok(L7Protocol::Http1));
        assert_eq!(L7Protocol::try_from("pgsql"), Ok(L7Protocol::PostgreSQL));
        assert!(L7Protocol::try_from("kafka").is_err());
        assert_eq!(L7Protocol::from(102u8), L7Protocol::AMQP);
        assert_eq!(L7Protocol::from(7u8), L7Protocol::Unknown);
        assert_eq!(L7Protocol::Grpc.to_string(), "gRPC");
    }
}
