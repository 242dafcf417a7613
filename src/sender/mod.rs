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

mod point;

pub use point::{span_point, FieldValue, Point, METRIC_MEASUREMENT, SPAN_MEASUREMENT};
pub(crate) use point::{
    FIELD_DIRECTION, FIELD_KERNEL_THREAD, FIELD_KTIME, FIELD_THREAD_TRACE_ID, FIELD_USER_THREAD,
};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use log::warn;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointCategory {
    Metric,
    Span,
}

impl fmt::Display for PointCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Metric => write!(f, "metric"),
            Self::Span => write!(f, "span"),
        }
    }
}

/// Downstream of every exported point batch.
pub trait PointSender: Send + Sync {
    fn send(&self, category: PointCategory, points: Vec<Point>) -> Result<()>;
}

pub type PointBatch = (PointCategory, Vec<Point>);

/// Hands batches to a bounded channel, a full channel drops the batch.
pub struct QueueSender {
    tx: mpsc::Sender<PointBatch>,
    dropped: AtomicU64,
}

impl QueueSender {
    pub fn new(size: usize) -> (Self, mpsc::Receiver<PointBatch>) {
        let (tx, rx) = mpsc::channel(size.max(1));
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    // points dropped on a full channel so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl PointSender for QueueSender {
    fn send(&self, category: PointCategory, points: Vec<Point>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        match self.tx.try_send((category, points)) {
            Ok(_) => Ok(()),
            Err(TrySendError::Full((category, points))) => {
                let total = self.dropped.fetch_add(points.len() as u64, Ordering::Relaxed);
                warn!(
                    "{} queue full, {} points dropped ({} in total)",
                    category,
                    points.len(),
                    total + points.len() as u64
                );
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(Error::ChannelClosed("point")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_sender() {
        let (sender, mut rx) = QueueSender::new(1);
        let point = Point::new(METRIC_MEASUREMENT, 1);
        sender.send(PointCategory::Span, vec![]).unwrap();
        sender
            .send(PointCategory::Metric, vec![point.clone()])
            .unwrap();
        sender
            .send(PointCategory::Metric, vec![point.clone(), point.clone()])
            .unwrap();
        assert_eq!(sender.dropped(), 2);

        let (category, points) = rx.try_recv().unwrap();
        assert_eq!(category, PointCategory::Metric);
        assert_eq!(points, vec![point.clone()]);
        assert!(rx.try_recv().is_err());

        drop(rx);
        assert!(matches!(
            sender.send(PointCategory::Span, vec![point]),
            Err(Error::ChannelClosed(_))
        ));
    }
}
