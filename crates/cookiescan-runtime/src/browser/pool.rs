//! Browser pool.
//!
//! Holds up to `pool_size` instances (1–10), lazily warmed with at most
//! two at init. Instances are recycled when they age past `max_age`, sit
//! idle past `max_idle`, accumulate `max_uses` acquisitions, or fail a
//! health probe. Acquisition is exclusive for the duration of one scan; a
//! background checker probes only idle instances, never one in use.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use cookiescan_kernel::browser::{BrowserError, BrowserSession, PageDriver};
use cookiescan_kernel::config::BrowserPoolConfig;
use cookiescan_kernel::model::scan::Viewport;

use super::{BrowserInstance, BrowserLauncher};

/// How long `acquire` waits for a release once the pool is saturated.
const ACQUIRE_WAIT: Duration = Duration::from_secs(60);

/// Idle threshold below which the health checker leaves an instance alone.
const HEALTH_MIN_IDLE: Duration = Duration::from_secs(30);

struct Slot {
    instance: Arc<dyn BrowserInstance>,
    created_at: Instant,
    last_used: Instant,
    use_count: u32,
    healthy: bool,
    in_use: bool,
}

struct PoolState {
    instances: HashMap<u32, Slot>,
    idle: VecDeque<u32>,
    next_id: u32,
    /// Launches in flight, counted so concurrent acquires cannot overshoot
    /// the cap while the state lock is released for the launch itself.
    launching: usize,
    closed: bool,
}

/// An acquired instance. Implements [`BrowserSession`] so the executor can
/// open pages through it; must be handed back via [`BrowserPool::release`].
pub struct PooledBrowser {
    id: u32,
    instance: Arc<dyn BrowserInstance>,
}

#[async_trait]
impl BrowserSession for PooledBrowser {
    async fn open_page(
        &self,
        user_agent: &str,
        viewport: Viewport,
    ) -> Result<Box<dyn PageDriver>, BrowserError> {
        self.instance.open_page(user_agent, viewport).await
    }
}

/// Per-instance stats snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceStats {
    pub id: u32,
    pub age_seconds: u64,
    pub idle_seconds: u64,
    pub use_count: u32,
    pub healthy: bool,
    pub in_use: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub pool_size: usize,
    pub active_instances: usize,
    pub available_instances: usize,
    pub total_uses: u64,
    pub instances: Vec<InstanceStats>,
}

pub struct BrowserPool {
    config: BrowserPoolConfig,
    launcher: Arc<dyn BrowserLauncher>,
    state: Mutex<PoolState>,
    released: Notify,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl BrowserPool {
    /// Build a pool. `pool_size` outside 1–10 is clamped.
    pub fn new(mut config: BrowserPoolConfig, launcher: Arc<dyn BrowserLauncher>) -> Arc<Self> {
        config.pool_size = config.pool_size.clamp(1, 10);
        Arc::new(Self {
            config,
            launcher,
            state: Mutex::new(PoolState {
                instances: HashMap::new(),
                idle: VecDeque::new(),
                next_id: 0,
                launching: 0,
                closed: false,
            }),
            released: Notify::new(),
            health_task: Mutex::new(None),
        })
    }

    /// Warm up at most two instances and start the health checker.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), BrowserError> {
        let warm = self.config.pool_size.min(2);
        for _ in 0..warm {
            let instance = self.launcher.launch().await?;
            let mut state = self.state.lock().await;
            let id = state.next_id;
            state.next_id += 1;
            state.instances.insert(id, new_slot(instance));
            state.idle.push_back(id);
        }

        let pool = Arc::clone(self);
        let interval = Duration::from_secs(self.config.health_check_interval_seconds.max(1));
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                pool.health_check_pass().await;
            }
        });
        *self.health_task.lock().await = Some(task);

        tracing::info!(
            pool_size = self.config.pool_size,
            warmed = warm,
            "browser pool initialized"
        );
        Ok(())
    }

    /// Acquire an instance: idle fast path, then create-under-cap, then
    /// wait for a release. Times out after [`ACQUIRE_WAIT`].
    pub async fn acquire(&self) -> Result<PooledBrowser, BrowserError> {
        let deadline = Instant::now() + ACQUIRE_WAIT;

        loop {
            // Fast path + create-under-cap, under one lock.
            {
                let mut state = self.state.lock().await;
                if state.closed {
                    return Err(BrowserError::Session("browser pool is closed".into()));
                }

                while let Some(id) = state.idle.pop_front() {
                    let recycle = state
                        .instances
                        .get(&id)
                        .map(|slot| self.should_recycle(slot))
                        .unwrap_or(false);
                    if recycle {
                        if let Some(slot) = state.instances.remove(&id) {
                            tracing::info!(instance = id, "recycling browser on acquire");
                            tokio::spawn(async move { slot.instance.close().await });
                        }
                        continue;
                    }
                    if let Some(slot) = state.instances.get_mut(&id) {
                        slot.in_use = true;
                        slot.use_count += 1;
                        slot.last_used = Instant::now();
                        return Ok(PooledBrowser {
                            id,
                            instance: Arc::clone(&slot.instance),
                        });
                    }
                }

                if state.instances.len() + state.launching < self.config.pool_size {
                    state.launching += 1;
                } else {
                    drop(state);
                    // Saturated: wait for a release, bounded by the deadline.
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(BrowserError::Session(
                            "no browser instance available".into(),
                        ));
                    }
                    let _ = tokio::time::timeout(remaining, self.released.notified()).await;
                    continue;
                }
            }

            // Reserved a launch slot; create outside the lock.
            let launched = self.launcher.launch().await;
            let mut state = self.state.lock().await;
            state.launching -= 1;
            match launched {
                Ok(instance) => {
                    let id = state.next_id;
                    state.next_id += 1;
                    let mut slot = new_slot(instance);
                    slot.in_use = true;
                    slot.use_count = 1;
                    let pooled = PooledBrowser {
                        id,
                        instance: Arc::clone(&slot.instance),
                    };
                    state.instances.insert(id, slot);
                    tracing::info!(instance = id, "created browser instance");
                    return Ok(pooled);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Hand an instance back. All pages the caller opened are closed before
    /// the instance becomes available again; instances over a recycling
    /// threshold are torn down instead.
    pub async fn release(&self, pooled: PooledBrowser) {
        pooled.instance.close_open_pages().await;

        let mut state = self.state.lock().await;
        if state.closed {
            if let Some(slot) = state.instances.remove(&pooled.id) {
                tokio::spawn(async move { slot.instance.close().await });
            }
            return;
        }

        let Some(slot) = state.instances.get_mut(&pooled.id) else {
            return;
        };
        slot.in_use = false;
        slot.last_used = Instant::now();

        if self.should_recycle(slot) {
            if let Some(slot) = state.instances.remove(&pooled.id) {
                tracing::info!(instance = pooled.id, "recycling browser on release");
                tokio::spawn(async move { slot.instance.close().await });
            }
        } else {
            state.idle.push_back(pooled.id);
        }
        drop(state);
        self.released.notify_one();
    }

    fn should_recycle(&self, slot: &Slot) -> bool {
        if slot.created_at.elapsed() > Duration::from_secs(self.config.max_age_seconds) {
            return true;
        }
        if !slot.in_use
            && slot.last_used.elapsed() > Duration::from_secs(self.config.max_idle_seconds)
        {
            return true;
        }
        if slot.use_count >= self.config.max_uses_per_instance {
            return true;
        }
        !slot.healthy
    }

    /// One background health pass over idle instances.
    async fn health_check_pass(&self) {
        // Collect candidates without holding the lock through the probes.
        let candidates: Vec<(u32, Arc<dyn BrowserInstance>)> = {
            let state = self.state.lock().await;
            if state.closed {
                return;
            }
            state
                .instances
                .iter()
                .filter(|(_, slot)| {
                    !slot.in_use && slot.last_used.elapsed() >= HEALTH_MIN_IDLE
                })
                .map(|(id, slot)| (*id, Arc::clone(&slot.instance)))
                .collect()
        };

        for (id, instance) in candidates {
            let healthy = instance.health_check().await;
            if !healthy {
                tracing::warn!(instance = id, "browser failed health check");
            }
            let mut state = self.state.lock().await;
            if let Some(slot) = state.instances.get_mut(&id) {
                // Skip instances grabbed while we were probing.
                if !slot.in_use {
                    slot.healthy = healthy;
                }
            }
        }
    }

    pub async fn stats(&self) -> PoolStats {
        let state = self.state.lock().await;
        PoolStats {
            pool_size: self.config.pool_size,
            active_instances: state.instances.len(),
            available_instances: state.idle.len(),
            total_uses: state
                .instances
                .values()
                .map(|slot| slot.use_count as u64)
                .sum(),
            instances: state
                .instances
                .iter()
                .map(|(id, slot)| InstanceStats {
                    id: *id,
                    age_seconds: slot.created_at.elapsed().as_secs(),
                    idle_seconds: slot.last_used.elapsed().as_secs(),
                    use_count: slot.use_count,
                    healthy: slot.healthy,
                    in_use: slot.in_use,
                })
                .collect(),
        }
    }

    /// Close every instance and stop the health checker.
    pub async fn close(&self) {
        if let Some(task) = self.health_task.lock().await.take() {
            task.abort();
        }
        let mut state = self.state.lock().await;
        state.closed = true;
        state.idle.clear();
        for (_, slot) in state.instances.drain() {
            slot.instance.close().await;
        }
        tracing::info!("browser pool closed");
    }
}

fn new_slot(instance: Arc<dyn BrowserInstance>) -> Slot {
    Slot {
        instance,
        created_at: Instant::now(),
        last_used: Instant::now(),
        use_count: 0,
        healthy: true,
        in_use: false,
    }
}
