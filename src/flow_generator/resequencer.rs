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

use std::collections::VecDeque;

use log::debug;

use crate::common::RawFragment;

pub const DEFAULT_WINDOW: usize = 36;
// indexes this close to either end of the u64 range are taken as wrapped
const ROLLOVER_GUARD: u64 = 1025;

/// Wrap-aware `l < r` for fragment indexes.
pub fn index_less(l: u64, r: u64) -> bool {
    if l > u64::MAX - ROLLOVER_GUARD && r <= ROLLOVER_GUARD {
        return true;
    }
    if r > u64::MAX - ROLLOVER_GUARD && l <= ROLLOVER_GUARD {
        return false;
    }
    l < r
}

/// Puts fragments of one connection back into index order.
///
/// Fragments wait in a sorted buffer until the run starting right after the
/// last delivered index is contiguous. A full buffer gives up on the gap and
/// delivers its older half, so one fragment lost upstream costs at most one
/// window of latency.
pub struct Resequencer {
    buffer: VecDeque<RawFragment>,
    window: usize,
    last_delivered: u64,
}

impl Default for Resequencer {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl Resequencer {
    pub fn new(window: usize) -> Self {
        let window = window.max(2);
        Self {
            buffer: VecDeque::with_capacity(window),
            window,
            last_delivered: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Appends ready fragments to `ready` in index order.
    ///
    /// A fragment that was already delivered or is already buffered is handed
    /// back so the caller can recycle it.
    pub fn queue(
        &mut self,
        fragment: RawFragment,
        ready: &mut Vec<RawFragment>,
    ) -> Option<RawFragment> {
        let index = fragment.index;
        if !index_less(self.last_delivered, index) {
            debug!(
                "drop late fragment {} last delivered {}",
                index, self.last_delivered
            );
            return Some(fragment);
        }

        let pos = self
            .buffer
            .iter()
            .position(|f| !index_less(f.index, index))
            .unwrap_or(self.buffer.len());
        if self.buffer.get(pos).map(|f| f.index) == Some(index) {
            debug!("drop duplicated fragment {}", index);
            return Some(fragment);
        }
        self.buffer.insert(pos, fragment);

        self.flush_contiguous(ready);
        if self.buffer.len() >= self.window {
            let half = self.window / 2;
            for f in self.buffer.drain(..half) {
                self.last_delivered = f.index;
                ready.push(f);
            }
            debug!(
                "resequencer window full, skip to index {}",
                self.last_delivered
            );
            self.flush_contiguous(ready);
        }
        None
    }

    fn flush_contiguous(&mut self, ready: &mut Vec<RawFragment>) {
        while let Some(f) = self.buffer.front() {
            if f.index != self.last_delivered.wrapping_add(1) {
                break;
            }
            self.last_delivered = f.index;
            if let Some(f) = self.buffer.pop_front() {
                ready.push(f);
            }
        }
    }

    /// Everything still buffered, in order.
    pub fn drain(&mut self) -> Vec<RawFragment> {
        if let Some(f) = self.buffer.back() {
            self.last_delivered = f.index;
        }
        self.buffer.drain(..).collect()
    }
}
