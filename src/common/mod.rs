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

pub mod flow;
pub mod fragment;
pub mod l7_protocol_info;
pub mod l7_protocol_log;

pub use fragment::{ConnectionId, ConnectionInfo, RawFragment, SyscallFn};
pub use public::enums;
pub use public::l7_protocol::L7Protocol;

pub const DEFAULT_LOG_FILE: &str = "/var/log/l7-flow-tracer/l7-flow-tracer.log";
