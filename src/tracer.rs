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

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::{
    runtime::Handle,
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};

use public::pool::BytesPool;

use crate::{
    common::{l7_protocol_log::L7ProtocolRegistry, RawFragment},
    config::L7FlowConfig,
    error::{Error, Result},
    flow_generator::{ConnWatcher, FlowMapConfig},
    sender::{PointCategory, PointSender},
};

fn wall_now() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

/// Runs a `ConnWatcher` on a tokio runtime.
///
/// Fragments sent through `sender()` are handled in arrival order by one
/// task. Interval tasks sweep idle connections, clean the thread index and
/// hand span and metric points to the `PointSender`. `stop` ends them all.
pub struct Tracer {
    config: L7FlowConfig,
    runtime: Handle,

    watcher: Arc<Mutex<ConnWatcher>>,
    pool: Arc<BytesPool>,
    points: Arc<dyn PointSender>,

    fragment_tx: mpsc::Sender<RawFragment>,
    fragment_rx: Option<mpsc::Receiver<RawFragment>>,

    cancel: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Tracer {
    pub fn new(
        config: L7FlowConfig,
        registry: L7ProtocolRegistry,
        points: Arc<dyn PointSender>,
        runtime: Handle,
    ) -> Self {
        let pool = Arc::new(BytesPool::default());
        let watcher = ConnWatcher::new(FlowMapConfig::from(&config), registry, pool.clone());
        let (fragment_tx, fragment_rx) = mpsc::channel(config.fragment_queue_size.max(1));
        let (cancel, _) = watch::channel(false);
        Self {
            config,
            runtime,
            watcher: Arc::new(Mutex::new(watcher)),
            pool,
            points,
            fragment_tx,
            fragment_rx: Some(fragment_rx),
            cancel,
            handles: vec![],
        }
    }

    /// Inbound side of the fragment channel.
    pub fn sender(&self) -> mpsc::Sender<RawFragment> {
        self.fragment_tx.clone()
    }

    pub fn watcher(&self) -> &Arc<Mutex<ConnWatcher>> {
        &self.watcher
    }

    pub fn pool(&self) -> &Arc<BytesPool> {
        &self.pool
    }

    pub fn is_running(&self) -> bool {
        !self.handles.is_empty()
    }

    pub fn start(&mut self) -> Result<()> {
        let Some(rx) = self.fragment_rx.take() else {
            return Err(Error::AlreadyStarted);
        };
        self.cancel.send_replace(false);

        let handle = self.spawn_receiver(rx);
        self.handles.push(handle);

        let watcher = self.watcher.clone();
        let handle = self.spawn_periodic("sweep", self.config.sweep_interval, move || {
            let mut w = watcher.lock();
            let evicted = w.sweep(wall_now());
            debug!(
                "sweep evicted {} connections, {} live {} closed",
                evicted,
                w.live_len(),
                w.closed_len()
            );
        });
        self.handles.push(handle);

        let watcher = self.watcher.clone();
        let handle = self.spawn_periodic(
            "thread cleanup",
            self.config.thread_cleanup_interval,
            move || watcher.lock().cleanup_threads(),
        );
        self.handles.push(handle);

        let watcher = self.watcher.clone();
        let points = self.points.clone();
        let handle = self.spawn_periodic("span flush", self.config.span_flush_interval, move || {
            let spans = watcher.lock().take_spans();
            if let Err(e) = points.send(PointCategory::Span, spans) {
                warn!("send spans failed: {}", e);
            }
        });
        self.handles.push(handle);

        let watcher = self.watcher.clone();
        let points = self.points.clone();
        let global_tags: BTreeMap<String, String> = self.config.global_tags.clone();
        let handle = self.spawn_periodic("metric flush", self.config.metric_interval, move || {
            let metrics = watcher.lock().flush_metrics(&global_tags);
            if let Err(e) = points.send(PointCategory::Metric, metrics) {
                warn!("send metrics failed: {}", e);
            }
        });
        self.handles.push(handle);

        info!("l7 flow tracer started");
        Ok(())
    }

    fn spawn_receiver(&self, mut rx: mpsc::Receiver<RawFragment>) -> JoinHandle<()> {
        let watcher = self.watcher.clone();
        let mut cancel = self.cancel.subscribe();
        self.runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.changed() => break,
                    fragment = rx.recv() => match fragment {
                        Some(fragment) => {
                            let records = watcher.lock().handle(wall_now(), fragment);
                            if !records.is_empty() {
                                debug!("{} records", records.len());
                            }
                        }
                        None => break,
                    },
                }
            }
            info!("fragment receiver stopped");
        })
    }

    fn spawn_periodic<F>(&self, name: &'static str, period: Duration, mut f: F) -> JoinHandle<()>
    where
        F: FnMut() + Send + 'static,
    {
        let mut cancel = self.cancel.subscribe();
        self.runtime.spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.changed() => break,
                    _ = ticker.tick() => f(),
                }
            }
            info!("{} stopped", name);
        })
    }

    /// Signals every task and waits for them to exit.
    pub async fn stop(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        self.cancel.send_replace(true);
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                warn!("tracer task failed: {}", e);
            }
        }
        info!("l7 flow tracer stopped");
    }
}
