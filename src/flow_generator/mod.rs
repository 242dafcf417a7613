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

pub mod aggregator;
pub mod error;
pub mod flow_config;
pub mod flow_map;
pub mod protocol_logs;
pub mod resequencer;
pub mod thread_trace;

pub use aggregator::{AggKey, AggValue, Aggregator, AggregatorPool};
pub use error::{Error, Result};
pub use flow_config::FlowMapConfig;
pub use flow_map::{ConnWatcher, FlowMapCounter, FlowPipe, PipeState};
pub use protocol_logs::{L7ResponseStatus, LogMessageType, ProtoData, ProtoMeta};
pub use resequencer::Resequencer;
pub use thread_trace::ThreadTraceIndex;
