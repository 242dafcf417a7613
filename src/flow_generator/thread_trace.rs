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

use log::debug;

use crate::common::flow::Direction;

pub const DEFAULT_ENTRY_TTL: u64 = 600_000_000_000;
const COMPACT_TOMBSTONES: usize = 1000;

#[derive(Debug, Clone, Copy)]
struct ThreadEntry {
    ts: u64,
    id: u64,
    // next older entry of the same thread
    prev: Option<usize>,
}

/// Inbound request timeline per OS thread.
///
/// Each thread has a list ordered from newest to oldest by kernel time. An
/// outbound call made by a thread is attributed to the newest inbound request
/// that thread received before the call.
///
/// Entries live in one arena and link to each other by index, removed slots
/// are recycled through `free` and squeezed out by compaction.
pub struct ThreadTraceIndex {
    entries: Vec<ThreadEntry>,
    free: Vec<usize>,
    heads: HashMap<[i32; 2], usize>,
    ttl: u64,
}

impl Default for ThreadTraceIndex {
    fn default() -> Self {
        Self::new(DEFAULT_ENTRY_TTL)
    }
}

pub fn random_id() -> u64 {
    loop {
        let id = rand::random::<u64>() >> 1;
        if id != 0 {
            return id;
        }
    }
}

impl ThreadTraceIndex {
    pub fn new(ttl: u64) -> Self {
        Self {
            entries: vec![],
            free: vec![],
            heads: HashMap::new(),
            ttl,
        }
    }

    fn alloc(&mut self, entry: ThreadEntry) -> usize {
        match self.free.pop() {
            Some(i) => {
                self.entries[i] = entry;
                i
            }
            None => {
                self.entries.push(entry);
                self.entries.len() - 1
            }
        }
    }

    /// Records an inbound request, returns its inner id or 0 for other directions.
    pub fn insert(&mut self, direction: Direction, thread: [i32; 2], ts: u64) -> u64 {
        if direction != Direction::In {
            return 0;
        }
        let id = random_id();
        let node = self.alloc(ThreadEntry { ts, id, prev: None });

        let Some(&head) = self.heads.get(&thread) else {
            self.heads.insert(thread, node);
            return id;
        };
        if self.entries[head].ts <= ts {
            self.entries[node].prev = Some(head);
            self.heads.insert(thread, node);
            return id;
        }

        // fragments race across cpus, walk back from the newest
        let mut cur = head;
        loop {
            match self.entries[cur].prev {
                Some(p) if self.entries[p].ts > ts => cur = p,
                prev => {
                    self.entries[node].prev = prev;
                    self.entries[cur].prev = Some(node);
                    break;
                }
            }
        }
        id
    }

    /// Id of the newest inbound request at or before `ts`, a fresh random id if none.
    pub fn get_inner_id(&self, thread: [i32; 2], ts: u64) -> u64 {
        let mut next = self.heads.get(&thread).copied();
        while let Some(i) = next {
            let e = &self.entries[i];
            if e.ts <= ts {
                return e.id;
            }
            next = e.prev;
        }
        random_id()
    }

    pub fn len(&self) -> usize {
        self.entries.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release_chain(&mut self, mut next: Option<usize>) {
        while let Some(i) = next {
            next = self.entries[i].prev;
            self.entries[i].prev = None;
            self.free.push(i);
        }
    }

    /// Drops entries older than the ttl relative to the newest entry of their
    /// thread. Threads whose newest entry is itself expired against the newest
    /// entry overall are dropped as a whole.
    pub fn cleanup(&mut self) {
        let Some(newest) = self.heads.values().map(|h| self.entries[*h].ts).max() else {
            return;
        };
        let ttl = self.ttl;
        let heads: Vec<([i32; 2], usize)> = self.heads.iter().map(|(k, v)| (*k, *v)).collect();
        for (thread, head) in heads {
            let head_ts = self.entries[head].ts;
            if newest.saturating_sub(head_ts) > ttl {
                self.heads.remove(&thread);
                self.release_chain(Some(head));
                continue;
            }
            let mut cur = head;
            while let Some(p) = self.entries[cur].prev {
                if head_ts.saturating_sub(self.entries[p].ts) > ttl {
                    self.entries[cur].prev = None;
                    self.release_chain(Some(p));
                    break;
                }
                cur = p;
            }
        }

        let (tombstones, live) = (self.free.len(), self.len());
        if tombstones > COMPACT_TOMBSTONES && tombstones >= live {
            self.compact();
        }
    }

    fn compact(&mut self) {
        let mut entries = Vec::with_capacity(self.len());
        for head in self.heads.values_mut() {
            let mut next = Some(*head);
            let mut last: Option<usize> = None;
            while let Some(i) = next {
                let e = self.entries[i];
                let new_index = entries.len();
                entries.push(ThreadEntry { prev: None, ..e });
                match last {
                    Some(l) => entries[l].prev = Some(new_index),
                    None => *head = new_index,
                }
                last = Some(new_index);
                next = e.prev;
            }
        }
        debug!(
            "thread trace index compacted from {} to {} entries",
            self.entries.len(),
            entries.len()
        );
        self.entries = entries;
        self.free = vec![];
    }
}
