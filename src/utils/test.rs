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

use std::sync::Arc;

use crate::common::{
    fragment::{ConnectionInfo, RawFragment, SyscallFn},
    l7_protocol_log::{L7ProtocolParserInterface, ParseParam},
};
use crate::flow_generator::{protocol_logs::ProtoData, ThreadTraceIndex};

pub const TEST_WALL_TIME: u64 = 1_700_000_000_000_000_000;

/// Hand-built syscall capture of one connection.
///
/// Each pushed payload gets the next index, a kernel time 1000ns after the
/// previous one and a syscall exit 10ns after its entry.
pub struct Capture {
    conn: Arc<ConnectionInfo>,
    fragments: Vec<RawFragment>,
    thread: [i32; 2],
    ts: u64,
}

impl Capture {
    pub fn new(src_port: u16, dst_port: u16) -> Self {
        Self {
            conn: Arc::new(ConnectionInfo {
                src_ip: "10.0.0.1".parse().unwrap(),
                dst_ip: "10.0.0.2".parse().unwrap(),
                src_port,
                dst_port,
                pid: 42,
                process_name: "server".to_owned(),
                task_name: "worker".to_owned(),
                ..Default::default()
            }),
            fragments: vec![],
            thread: [100, 100],
            ts: 0,
        }
    }

    pub fn with_conn(conn: ConnectionInfo) -> Self {
        Self {
            conn: Arc::new(conn),
            fragments: vec![],
            thread: [100, 100],
            ts: 0,
        }
    }

    pub fn conn(&self) -> &Arc<ConnectionInfo> {
        &self.conn
    }

    pub fn thread(mut self, thread: [i32; 2]) -> Self {
        self.thread = thread;
        self
    }

    pub fn push(&mut self, syscall: SyscallFn, payload: &[u8]) -> &mut Self {
        self.ts += 1000;
        self.fragments.push(RawFragment {
            conn: self.conn.clone(),
            index: self.fragments.len() as u64 + 1,
            syscall,
            tcp_seq: self.fragments.len() as u32 * 100,
            thread: self.thread,
            ts: self.ts,
            ts_tail: self.ts + 10,
            act_size: payload.len(),
            payload: payload.to_vec(),
            ..Default::default()
        });
        self
    }

    // server side of the connection
    pub fn read(&mut self, payload: &[u8]) -> &mut Self {
        self.push(SyscallFn::Read, payload)
    }

    pub fn write(&mut self, payload: &[u8]) -> &mut Self {
        self.push(SyscallFn::Write, payload)
    }

    pub fn fragments(&self) -> &[RawFragment] {
        &self.fragments
    }

    pub fn into_fragments(self) -> Vec<RawFragment> {
        self.fragments
    }

    /// Feeds every fragment to `parser` and exports with `force`.
    pub fn replay<P: L7ProtocolParserInterface>(
        &self,
        parser: &mut P,
        index: &mut ThreadTraceIndex,
        force: bool,
    ) -> Vec<ProtoData> {
        for f in self.fragments.iter() {
            let param = ParseParam::new(f, TEST_WALL_TIME + f.ts);
            let _ = parser.parse_payload(&f.payload, &param, index);
        }
        parser.export(force)
    }
}
