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

//! Layer-7 request/response tracing over captured socket syscalls.
//!
//! Fragments of socket reads and writes are put back in order per
//! connection, classified by protocol and decoded into request/response
//! records. Records feed per-protocol aggregates and span points which are
//! handed to a [`sender::PointSender`].

pub mod common;
pub mod config;
pub mod error;
pub mod flow_generator;
pub mod sender;
pub mod tracer;
pub mod utils;

pub use common::{
    fragment::{ConnectionId, ConnectionInfo, RawFragment, SyscallFn},
    l7_protocol_log::L7ProtocolRegistry,
    L7Protocol,
};
pub use config::Config;
pub use error::{Error, Result};
pub use flow_generator::{ConnWatcher, FlowMapConfig, Resequencer, ThreadTraceIndex};
pub use sender::{Point, PointCategory, PointSender, QueueSender};
pub use tracer::Tracer;
