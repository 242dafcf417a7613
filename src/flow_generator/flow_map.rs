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

use std::{
    collections::{BTreeMap, HashMap},
    mem,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use log::{debug, info, warn};

use public::{l7_protocol::L7Protocol, pool::BytesPool};

use super::{
    aggregator::AggregatorPool,
    flow_config::FlowMapConfig,
    protocol_logs::ProtoData,
    resequencer::Resequencer,
    thread_trace::ThreadTraceIndex,
};
use crate::{
    common::{
        flow::{Direction, NicDirection},
        fragment::{ConnectionId, ConnectionInfo, RawFragment, SyscallFn},
        l7_protocol_log::{
            L7ProtocolParser, L7ProtocolParserInterface, L7ProtocolRegistry, ParseParam,
        },
    },
    sender::{
        span_point, Point, FIELD_DIRECTION, FIELD_KERNEL_THREAD, FIELD_KTIME,
        FIELD_THREAD_TRACE_ID, FIELD_USER_THREAD,
    },
};

pub enum PipeState {
    Detecting { attempts: u32 },
    Decoding(L7ProtocolParser),
    // detected but not in the allowlist
    Skipped(L7Protocol),
    Undetected,
}

impl PipeState {
    pub fn protocol(&self) -> Option<L7Protocol> {
        match self {
            Self::Decoding(p) => Some(p.protocol()),
            Self::Skipped(p) => Some(*p),
            _ => None,
        }
    }
}

/// Everything known about one connection.
pub struct FlowPipe {
    conn: Arc<ConnectionInfo>,
    state: PipeState,
    resequencer: Resequencer,
    last_seen: Duration,
    closed: bool,
}

impl FlowPipe {
    fn new(conn: Arc<ConnectionInfo>, window: usize, now: Duration) -> Self {
        Self {
            conn,
            state: PipeState::Detecting { attempts: 0 },
            resequencer: Resequencer::new(window),
            last_seen: now,
            closed: false,
        }
    }

    pub fn state(&self) -> &PipeState {
        &self.state
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn export(&mut self, force: bool) -> Vec<ProtoData> {
        match &mut self.state {
            PipeState::Decoding(parser) => parser.export(force),
            _ => vec![],
        }
    }

    fn close(&mut self) {
        self.closed = true;
        if let PipeState::Decoding(parser) = &mut self.state {
            parser.conn_close();
        }
    }
}

#[derive(Debug, Default)]
pub struct FlowMapCounter {
    new: AtomicU64,          // connections seen for the first time
    closed: AtomicU64,       // connections closed by the application
    evicted: AtomicU64,      // idle connections removed by sweep
    reset: AtomicU64,        // connections dropped by the table cap
    duplicate: AtomicU64,    // late or repeated fragments
    undetected: AtomicU64,   // connections that gave up detection
    skipped: AtomicU64,      // connections of excluded protocols
    parse_failed: AtomicU64, // fragments the decoder rejected
    records: AtomicU64,
    concurrent: AtomicU64, // live and closed connections in the tables
}

impl FlowMapCounter {
    /// Counts since the last call, `concurrent` is a gauge.
    pub fn get_counters(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("new", self.new.swap(0, Ordering::Relaxed)),
            ("closed", self.closed.swap(0, Ordering::Relaxed)),
            ("evicted", self.evicted.swap(0, Ordering::Relaxed)),
            ("reset", self.reset.swap(0, Ordering::Relaxed)),
            ("duplicate", self.duplicate.swap(0, Ordering::Relaxed)),
            ("undetected", self.undetected.swap(0, Ordering::Relaxed)),
            ("skipped", self.skipped.swap(0, Ordering::Relaxed)),
            ("parse_failed", self.parse_failed.swap(0, Ordering::Relaxed)),
            ("records", self.records.swap(0, Ordering::Relaxed)),
            ("concurrent", self.concurrent.load(Ordering::Relaxed)),
        ]
    }
}

// re-allocates a table after many removals, hashbrown keeps its capacity
fn rebuild(table: &mut HashMap<ConnectionId, FlowPipe>) {
    let mut rebuilt = HashMap::with_capacity(table.len());
    rebuilt.extend(table.drain());
    *table = rebuilt;
}

/// Connection table in front of the decoders.
///
/// Live connections move to the closed table on `close()`, where late
/// fragments of them still find their pipe until it expires.
pub struct ConnWatcher {
    config: FlowMapConfig,
    registry: L7ProtocolRegistry,

    live: HashMap<ConnectionId, FlowPipe>,
    closed: HashMap<ConnectionId, FlowPipe>,
    live_removed: usize,
    closed_removed: usize,

    thread_index: ThreadTraceIndex,
    aggregators: AggregatorPool,
    // spans of this tick and of the previous one
    spans: Vec<Point>,
    spans_prev: Vec<Point>,

    pool: Arc<BytesPool>,
    counter: Arc<FlowMapCounter>,
}

impl ConnWatcher {
    pub fn new(config: FlowMapConfig, registry: L7ProtocolRegistry, pool: Arc<BytesPool>) -> Self {
        let aggregators = registry.aggregators();
        Self {
            thread_index: ThreadTraceIndex::new(config.thread_entry_ttl.as_nanos() as u64),
            config,
            registry,
            live: HashMap::new(),
            closed: HashMap::new(),
            live_removed: 0,
            closed_removed: 0,
            aggregators,
            spans: vec![],
            spans_prev: vec![],
            pool,
            counter: Arc::new(FlowMapCounter::default()),
        }
    }

    pub fn counter(&self) -> &Arc<FlowMapCounter> {
        &self.counter
    }

    pub fn live_len(&self) -> usize {
        self.live.len()
    }

    pub fn closed_len(&self) -> usize {
        self.closed.len()
    }

    pub fn get(&self, id: &ConnectionId) -> Option<&FlowPipe> {
        self.live.get(id).or_else(|| self.closed.get(id))
    }

    pub fn thread_index(&self) -> &ThreadTraceIndex {
        &self.thread_index
    }

    pub fn aggregators(&self) -> &AggregatorPool {
        &self.aggregators
    }

    /// Feeds one captured fragment, returns the records it finished.
    ///
    /// `now` is the wall clock since the unix epoch.
    pub fn handle(&mut self, now: Duration, fragment: RawFragment) -> Vec<ProtoData> {
        let id = fragment.conn_id;
        let in_closed = self.closed.contains_key(&id);
        if !in_closed && !self.live.contains_key(&id) {
            self.make_room();
            self.live.insert(
                id,
                FlowPipe::new(fragment.conn.clone(), self.config.window, now),
            );
            self.counter.new.fetch_add(1, Ordering::Relaxed);
        }
        let table = if in_closed {
            &mut self.closed
        } else {
            &mut self.live
        };
        let Some(pipe) = table.get_mut(&id) else {
            return vec![];
        };
        pipe.last_seen = now;

        let mut ready = vec![];
        if let Some(dup) = pipe.resequencer.queue(fragment, &mut ready) {
            self.counter.duplicate.fetch_add(1, Ordering::Relaxed);
            self.pool.put(dup.payload);
        }
        let wall_time = now.as_nanos() as u64;
        let mut close = false;
        let mut index = 0;
        while index < ready.len() {
            let f = &ready[index];
            index += 1;
            if f.syscall.nic_direction() == NicDirection::Unknown {
                if f.syscall == SyscallFn::Close && !pipe.closed {
                    close = true;
                    // nothing more comes in order, deliver what is left
                    ready.extend(pipe.resequencer.drain());
                }
                continue;
            }
            Self::on_fragment(
                pipe,
                f,
                wall_time,
                &self.config,
                &self.registry,
                &mut self.thread_index,
                &self.counter,
            );
        }
        for f in ready {
            self.pool.put(f.payload);
        }
        if close {
            pipe.close();
            self.counter.closed.fetch_add(1, Ordering::Relaxed);
        }

        let force = pipe.closed;
        let records = pipe.export(force);
        let conn = pipe.conn.clone();
        if close && !in_closed {
            if let Some(pipe) = self.live.remove(&id) {
                self.closed.insert(id, pipe);
            }
            self.live_removed += 1;
            if self.live_removed > self.config.rebuild_threshold {
                rebuild(&mut self.live);
                self.live_removed = 0;
            }
        }
        self.observe(&conn, &records);
        self.update_concurrent();
        records
    }

    fn on_fragment(
        pipe: &mut FlowPipe,
        f: &RawFragment,
        wall_time: u64,
        config: &FlowMapConfig,
        registry: &L7ProtocolRegistry,
        thread_index: &mut ThreadTraceIndex,
        counter: &FlowMapCounter,
    ) {
        let param = ParseParam::new(f, wall_time);
        if let PipeState::Detecting { attempts } = &mut pipe.state {
            if f.payload.is_empty() {
                return;
            }
            match registry.detect(&f.payload, &param) {
                Some(parser) if !config.protocol_allowed(parser.protocol()) => {
                    debug!("{} is {}, skipped", pipe.conn, parser.protocol());
                    counter.skipped.fetch_add(1, Ordering::Relaxed);
                    pipe.state = PipeState::Skipped(parser.protocol());
                    return;
                }
                Some(parser) => {
                    debug!("{} detected as {}", pipe.conn, parser.protocol());
                    pipe.state = PipeState::Decoding(parser);
                }
                None => {
                    *attempts += 1;
                    if *attempts >= config.detect_attempts {
                        debug!(
                            "{} not detected after {} fragments",
                            pipe.conn, attempts
                        );
                        counter.undetected.fetch_add(1, Ordering::Relaxed);
                        pipe.state = PipeState::Undetected;
                    }
                    return;
                }
            }
        }
        let PipeState::Decoding(parser) = &mut pipe.state else {
            return;
        };
        if f.act_size == 0 {
            return;
        }
        if let Err(e) = parser.parse_payload(&f.payload, &param, thread_index) {
            counter.parse_failed.fetch_add(1, Ordering::Relaxed);
            debug!("{} fragment {}: {}", parser.protocol(), f, e);
        }
    }

    fn observe(&mut self, conn: &ConnectionInfo, records: &[ProtoData]) {
        if records.is_empty() {
            return;
        }
        self.counter
            .records
            .fetch_add(records.len() as u64, Ordering::Relaxed);
        let span_allowed = self.config.span_allowed(conn);
        for r in records {
            self.aggregators.obs(conn, r);
            if span_allowed {
                self.spans.push(span_point(r, conn));
            }
        }
    }

    // drops whole tables when a new connection would exceed the cap
    fn make_room(&mut self) {
        if self.live.len() + self.closed.len() < self.config.max_flows {
            return;
        }
        warn!(
            "connection table full ({} live, {} closed), reset closed connections",
            self.live.len(),
            self.closed.len()
        );
        self.counter
            .reset
            .fetch_add(self.closed.len() as u64, Ordering::Relaxed);
        self.closed = HashMap::new();
        self.closed_removed = 0;
        if self.live.len() >= self.config.max_flows {
            warn!("{} live connections, reset them all", self.live.len());
            self.counter
                .reset
                .fetch_add(self.live.len() as u64, Ordering::Relaxed);
            self.live = HashMap::new();
            self.live_removed = 0;
        }
    }

    fn update_concurrent(&self) {
        self.counter.concurrent.store(
            (self.live.len() + self.closed.len()) as u64,
            Ordering::Relaxed,
        );
    }

    /// Removes idle connections, returns how many went away.
    ///
    /// Evicted live connections flush their unfinished record first.
    pub fn sweep(&mut self, now: Duration) -> usize {
        let live_timeout = self.config.live_timeout;
        let closed_timeout = self.config.closed_timeout;

        let expired: Vec<ConnectionId> = self
            .live
            .iter()
            .filter(|(_, p)| now.saturating_sub(p.last_seen) > live_timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in expired.iter() {
            let Some(mut pipe) = self.live.remove(id) else {
                continue;
            };
            pipe.close();
            let records = pipe.export(true);
            self.observe(&pipe.conn, &records);
            for f in pipe.resequencer.drain() {
                self.pool.put(f.payload);
            }
        }
        let before = self.closed.len();
        self.closed
            .retain(|_, p| now.saturating_sub(p.last_seen) <= closed_timeout);
        let closed_expired = before - self.closed.len();

        self.live_removed += expired.len();
        if self.live_removed > self.config.rebuild_threshold {
            rebuild(&mut self.live);
            self.live_removed = 0;
        }
        self.closed_removed += closed_expired;
        if self.closed_removed > self.config.rebuild_threshold {
            rebuild(&mut self.closed);
            self.closed_removed = 0;
        }

        let removed = expired.len() + closed_expired;
        if removed > 0 {
            debug!(
                "sweep removed {} live and {} closed connections",
                expired.len(),
                closed_expired
            );
        }
        self.counter
            .evicted
            .fetch_add(removed as u64, Ordering::Relaxed);
        self.update_concurrent();
        removed
    }

    pub fn cleanup_threads(&mut self) {
        self.thread_index.cleanup();
    }

    /// Span points ready to send.
    ///
    /// Spans wait one call before they are handed out so that the incoming
    /// request an outgoing call was made for is in the thread index by then.
    pub fn take_spans(&mut self) -> Vec<Point> {
        let mut spans = mem::replace(&mut self.spans_prev, mem::take(&mut self.spans));
        for point in spans.iter_mut() {
            if point.field(FIELD_DIRECTION).and_then(|v| v.as_str())
                != Some(Direction::Out.as_str())
            {
                continue;
            }
            let thread = [
                Self::thread_field(point, FIELD_KERNEL_THREAD),
                Self::thread_field(point, FIELD_USER_THREAD),
            ];
            let ktime = point
                .field(FIELD_KTIME)
                .and_then(|v| v.as_u64())
                .unwrap_or_default();
            let id = self.thread_index.get_inner_id(thread, ktime);
            point.add_field(FIELD_THREAD_TRACE_ID, id);
        }
        spans
    }

    fn thread_field(point: &Point, key: &str) -> i32 {
        point
            .field(key)
            .and_then(|v| v.as_i64())
            .and_then(|v| i32::try_from(v).ok())
            .unwrap_or_default()
    }

    /// Metric points of every protocol, the aggregators start over.
    pub fn flush_metrics(&mut self, global_tags: &BTreeMap<String, String>) -> Vec<Point> {
        let points = self.aggregators.flush(global_tags);
        info!(
            "{} metric points, flow map {:?}",
            points.len(),
            self.counter.get_counters()
        );
        points
    }
}
