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

use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;
use parking_lot::Mutex;

pub const DEFAULT_TIERS: [usize; 4] = [256, 1 << 10, 4 << 10, 16 << 10];
const DEFAULT_MAX_POOLED: usize = 1024;

struct Tier {
    size: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolCounter {
    pub hit: u64,
    pub miss: u64,
    pub oversize: u64,
}

/// Size-classed pool of byte buffers.
///
/// A buffer is served from the smallest tier that fits the request and goes
/// back to the largest tier its capacity can still satisfy. Requests beyond the
/// last tier are plain allocations and are dropped on `put`.
pub struct BytesPool {
    tiers: Vec<Tier>,
    max_pooled: usize,

    hit: AtomicU64,
    miss: AtomicU64,
    oversize: AtomicU64,
}

impl Default for BytesPool {
    fn default() -> Self {
        Self::new(&DEFAULT_TIERS, DEFAULT_MAX_POOLED)
    }
}

impl BytesPool {
    pub fn new(tier_sizes: &[usize], max_pooled: usize) -> Self {
        let mut sizes = tier_sizes.to_vec();
        sizes.sort_unstable();
        sizes.dedup();
        Self {
            tiers: sizes
                .into_iter()
                .filter(|s| *s > 0)
                .map(|size| Tier {
                    size,
                    free: Mutex::new(vec![]),
                })
                .collect(),
            max_pooled,
            hit: AtomicU64::new(0),
            miss: AtomicU64::new(0),
            oversize: AtomicU64::new(0),
        }
    }

    /// Returns an empty buffer with capacity of at least `len`.
    pub fn get(&self, len: usize) -> Vec<u8> {
        let Some(tier) = self.tiers.iter().find(|t| t.size >= len) else {
            self.oversize.fetch_add(1, Ordering::Relaxed);
            return Vec::with_capacity(len);
        };
        if let Some(buf) = tier.free.lock().pop() {
            self.hit.fetch_add(1, Ordering::Relaxed);
            return buf;
        }
        self.miss.fetch_add(1, Ordering::Relaxed);
        Vec::with_capacity(tier.size)
    }

    pub fn alloc(&self, data: &[u8]) -> Vec<u8> {
        let mut buf = self.get(data.len());
        buf.extend_from_slice(data);
        buf
    }

    pub fn put(&self, mut buf: Vec<u8>) {
        let cap = buf.capacity();
        let Some(tier) = self.tiers.iter().rev().find(|t| t.size <= cap) else {
            return;
        };
        if cap > tier.size << 1 && tier.size == self.max_tier_size() {
            // oversize allocation, not worth keeping
            return;
        }
        buf.clear();
        let mut free = tier.free.lock();
        if free.len() < self.max_pooled {
            free.push(buf);
        } else {
            debug!("bytes pool tier {} is full", tier.size);
        }
    }

    fn max_tier_size(&self) -> usize {
        self.tiers.last().map(|t| t.size).unwrap_or_default()
    }

    pub fn pooled(&self) -> Vec<(usize, usize)> {
        self.tiers
            .iter()
            .map(|t| (t.size, t.free.lock().len()))
            .collect()
    }

    pub fn counter(&self) -> PoolCounter {
        PoolCounter {
            hit: self.hit.load(Ordering::Relaxed),
            miss: self.miss.load(Ordering::Relaxed),
            oversize: self.oversize.load(Ordering::Relaxed),
        }
    }
}
