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

use enum_dispatch::enum_dispatch;
use log::debug;

use super::flow::NicDirection;
use super::fragment::{ConnectionInfo, RawFragment};

use crate::flow_generator::aggregator::AggregatorPool;
use crate::flow_generator::protocol_logs::{
    AmqpLog, Http2Log, HttpLog, MysqlLog, PostgresqlLog, ProtoData, RedisLog,
};
use crate::flow_generator::thread_trace::ThreadTraceIndex;
use crate::flow_generator::Result;

use public::l7_protocol::L7Protocol;

/*
 every protocol implements L7ProtocolParserInterface.

 check_payload only looks at the bytes and never touches the parser state, it
 runs on a template instance and may be called many times on the same
 connection before enough bytes arrive. once it matches, the flow map asks
 get_parser() for a fresh instance which then lives as long as the connection:

                  ordered fragment
                         |
             L7ProtocolRegistry::detect()
                  |              |
                match          miss ------> attempts += 1, drop fragment
                  |
                  v
      L7ProtocolParser::parse_payload()   (one call per fragment)
                  |
                  v
      L7ProtocolParser::export(force)     (once per batch, force on close)
                  |
                  v
              Vec<ProtoData> --------> aggregator / span points
*/

/// Per-fragment view handed to the parsers.
#[derive(Debug, Clone, Copy)]
pub struct ParseParam<'a> {
    pub conn: &'a ConnectionInfo,
    pub nic_direction: NicDirection,
    // unix time in nanoseconds when the fragment was handled
    pub wall_time: u64,
    pub ts: u64,
    pub ts_tail: u64,
    pub thread: [i32; 2],
    pub tcp_seq: u32,
    pub act_size: usize,
}

impl<'a> ParseParam<'a> {
    pub fn new(fragment: &'a RawFragment, wall_time: u64) -> Self {
        Self {
            conn: &fragment.conn,
            nic_direction: fragment.syscall.nic_direction(),
            wall_time,
            ts: fragment.ts,
            ts_tail: fragment.ts_tail,
            thread: fragment.thread,
            tcp_seq: fragment.tcp_seq,
            act_size: fragment.act_size,
        }
    }
}

macro_rules! all_protocol {
    ($( $l7_proto:ident , $parser:ident , $log:ident::$new_func:ident);+$(;)?) => {
        #[enum_dispatch]
        pub enum L7ProtocolParser {
            $(
                $parser($log),
            )+
        }

        pub fn get_parser(p: L7Protocol) -> Option<L7ProtocolParser> {
            match p {
                // grpc is found while decoding http2
                L7Protocol::Grpc => Some(L7ProtocolParser::Http2Parser(Http2Log::new())),
                $(
                    L7Protocol::$l7_proto => Some(L7ProtocolParser::$parser($log::$new_func())),
                )+
                _ => None,
            }
        }

        pub fn get_all_protocol() -> Vec<L7ProtocolParser> {
            Vec::from([
                $(
                    L7ProtocolParser::$parser($log::$new_func()),
                )+
            ])
        }
    };
}

// l7Protocol , enumName , ParserImplement::newFuncName
// the order is the detection order
all_protocol!(
    Http1,HttpParser,HttpLog::new;
    Http2,Http2Parser,Http2Log::new;
    AMQP,AmqpParser,AmqpLog::new;
    Redis,RedisParser,RedisLog::new;
    MySQL,MysqlParser,MysqlLog::new;
    PostgreSQL,PostgresParser,PostgresqlLog::new;
    // add protocol below
);

#[enum_dispatch(L7ProtocolParser)]
pub trait L7ProtocolParserInterface {
    // must not change any state
    fn check_payload(&self, payload: &[u8], param: &ParseParam) -> bool;
    fn parse_payload(
        &mut self,
        payload: &[u8],
        param: &ParseParam,
        thread_index: &mut ThreadTraceIndex,
    ) -> Result<()>;
    // force also flushes the unfinished record
    fn export(&mut self, force: bool) -> Vec<ProtoData>;
    fn conn_close(&mut self);
    fn protocol(&self) -> L7Protocol;
}

/// Protocols known to the flow map, tried in registration order.
pub struct L7ProtocolRegistry {
    parsers: Vec<L7ProtocolParser>,
}

impl Default for L7ProtocolRegistry {
    fn default() -> Self {
        Self {
            parsers: get_all_protocol(),
        }
    }
}

impl L7ProtocolRegistry {
    pub fn with_protocols(protocols: &[L7Protocol]) -> Self {
        let mut parsers = vec![];
        for p in protocols {
            match get_parser(*p) {
                Some(parser) if !parsers.iter().any(|x: &L7ProtocolParser| x.protocol() == *p) => {
                    parsers.push(parser)
                }
                Some(_) => (),
                None => debug!("no parser for protocol {}", p),
            }
        }
        Self { parsers }
    }

    pub fn detect(&self, payload: &[u8], param: &ParseParam) -> Option<L7ProtocolParser> {
        if payload.is_empty() {
            return None;
        }
        self.parsers
            .iter()
            .find(|p| p.check_payload(payload, param))
            .and_then(|p| get_parser(p.protocol()))
    }

    pub fn protocols(&self) -> Vec<L7Protocol> {
        self.parsers.iter().map(|p| p.protocol()).collect()
    }

    pub fn aggregators(&self) -> AggregatorPool {
        let mut protocols = self.protocols();
        if protocols.contains(&L7Protocol::Http2) {
            protocols.push(L7Protocol::Grpc);
        }
        AggregatorPool::new(&protocols)
    }
}
