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
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use num_enum::FromPrimitive;
use serde::Serialize;

use super::flow::NicDirection;
use public::enums::{IpFamily, L4Protocol};

/// Identity of one kernel socket for its whole lifetime.
#[derive(Serialize, Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    pub sk_ptr: u64,
    pub ktime: u32,
    pub rand: u32,
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}-{}-{}", self.sk_ptr, self.ktime, self.rand)
    }
}

/// Socket metadata, addresses are seen from the local end.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub l4_protocol: L4Protocol,

    pub netns: u32,
    pub pid: u32,
    pub process_name: String,
    pub task_name: String,
    pub service_name: String,

    // destination before DNAT
    pub nat: Option<SocketAddr>,
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        Self {
            src_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            dst_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            src_port: 0,
            dst_port: 0,
            l4_protocol: L4Protocol::Tcp,
            netns: 0,
            pid: 0,
            process_name: String::new(),
            task_name: String::new(),
            service_name: String::new(),
            nat: None,
        }
    }
}

impl ConnectionInfo {
    pub fn family(&self) -> IpFamily {
        if self.src_ip.is_ipv4() {
            IpFamily::Ipv4
        } else {
            IpFamily::Ipv6
        }
    }

    pub fn service(&self) -> &str {
        if !self.service_name.is_empty() {
            &self.service_name
        } else if !self.process_name.is_empty() {
            &self.process_name
        } else {
            &self.task_name
        }
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{} -> {}:{} pid {} ({})",
            self.l4_protocol,
            self.src_ip,
            self.src_port,
            self.dst_ip,
            self.dst_port,
            self.pid,
            self.process_name
        )
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum SyscallFn {
    #[num_enum(default)]
    Unknown = 0,
    Write = 1,
    Read = 2,
    Sendto = 3,
    Recvfrom = 4,
    Writev = 5,
    Readv = 6,
    Sendmsg = 7,
    Recvmsg = 8,
    Sendfile = 9,
    Close = 10,
}

impl Default for SyscallFn {
    fn default() -> Self {
        SyscallFn::Unknown
    }
}

impl SyscallFn {
    pub fn nic_direction(&self) -> NicDirection {
        match self {
            SyscallFn::Read | SyscallFn::Recvfrom | SyscallFn::Readv | SyscallFn::Recvmsg => {
                NicDirection::Ingress
            }
            SyscallFn::Write
            | SyscallFn::Sendto
            | SyscallFn::Writev
            | SyscallFn::Sendmsg
            | SyscallFn::Sendfile => NicDirection::Egress,
            SyscallFn::Close | SyscallFn::Unknown => NicDirection::Unknown,
        }
    }
}

/// One capture event.
///
/// `index` grows by one per event on the same connection and wraps at
/// `u64::MAX`. `act_size` is what the syscall moved, `payload` holds the
/// captured (possibly truncated) prefix of it.
#[derive(Debug, Default, Clone)]
pub struct RawFragment {
    pub conn_id: ConnectionId,
    pub conn: Arc<ConnectionInfo>,
    pub index: u64,
    pub syscall: SyscallFn,
    pub tcp_seq: u32,
    // kernel tid, user-space tid
    pub thread: [i32; 2],
    pub ts: u64,
    pub ts_tail: u64,
    pub act_size: usize,
    pub payload: Vec<u8>,
}

impl fmt::Display for RawFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "conn {} index {} fn {:?} tcp_seq {} thread {:?} act_size {} captured {}",
            self.conn_id,
            self.index,
            self.syscall,
            self.tcp_seq,
            self.thread,
            self.act_size,
            self.payload.len()
        )
    }
}
