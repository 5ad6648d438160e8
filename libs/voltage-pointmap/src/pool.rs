//! Transport pools
//!
//! Two policies behind [`TransportPool`]:
//!
//! - [`BoundedPool`] for point-to-point links (TCP): opens
//!   `max_open_conns` transports up front, opens overflow transports when
//!   empty, and retires transports on release when they are too old, fail
//!   the liveness probe, or do not fit back into the pool.
//! - [`SharedLinkPool`] for multiplexed physical links (RTU): every slave on
//!   one serial port subscribes to the same transport through a
//!   [`SharedLinkRegistry`]; the port is closed when the last subscriber
//!   detaches. Access to the shared transport is serialized.
//!
//! Eviction is silent for callers: the next acquire simply opens a fresh link.

use std::collections::{BTreeSet, VecDeque};
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::config::SerialParams;
use crate::error::{PointMapError, Result};
use crate::transport::{Transport, TransportFactory, TransportResult};

/// A transport checked out of a pool.
pub enum Checkout<T> {
    /// Exclusively owned until released
    Owned(T),
    /// Shared link, locked for this caller until released
    Shared(OwnedMutexGuard<T>),
}

impl<T> Deref for Checkout<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self {
            Self::Owned(transport) => transport,
            Self::Shared(guard) => &**guard,
        }
    }
}

impl<T> DerefMut for Checkout<T> {
    fn deref_mut(&mut self) -> &mut T {
        match self {
            Self::Owned(transport) => transport,
            Self::Shared(guard) => &mut **guard,
        }
    }
}

/// Capability shared by both pool policies.
#[async_trait]
pub trait TransportPool<T: Transport>: Send + Sync {
    async fn acquire(&self) -> Result<Checkout<T>>;

    /// Return a checkout. Never fails; retired transports are closed here.
    async fn release(&self, checkout: Checkout<T>);

    /// Close the pool. A second shutdown fails with `PoolClosed`.
    async fn shutdown(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

async fn evict<T: Transport>(transport: T, reason: &str) {
    warn!("Evicting pooled transport: {}", reason);
    discard(transport, reason).await;
}

async fn discard<T: Transport>(mut transport: T, reason: &str) {
    debug!("Closing transport: {}", reason);
    if let Err(e) = transport.close().await {
        warn!("Failed to close transport: {}", e);
    }
}

fn default_max_open_conns() -> usize {
    3
}

fn default_conn_max_lifetime_secs() -> u64 {
    30 * 60
}

/// Sizing of a [`BoundedPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundedPoolConfig {
    /// Transports opened up front and kept idle
    #[serde(default = "default_max_open_conns")]
    pub max_open_conns: usize,
    /// Transports older than this are closed on release
    #[serde(default = "default_conn_max_lifetime_secs")]
    pub conn_max_lifetime_secs: u64,
}

impl Default for BoundedPoolConfig {
    fn default() -> Self {
        Self {
            max_open_conns: default_max_open_conns(),
            conn_max_lifetime_secs: default_conn_max_lifetime_secs(),
        }
    }
}

impl BoundedPoolConfig {
    pub fn with_max_open_conns(mut self, max_open_conns: usize) -> Self {
        self.max_open_conns = max_open_conns;
        self
    }

    pub fn with_conn_max_lifetime_secs(mut self, secs: u64) -> Self {
        self.conn_max_lifetime_secs = secs;
        self
    }

    pub fn conn_max_lifetime(&self) -> Duration {
        Duration::from_secs(self.conn_max_lifetime_secs)
    }
}

struct PoolState<T> {
    idle: VecDeque<T>,
    closed: bool,
}

/// Eager, bounded pool of point-to-point transports.
pub struct BoundedPool<T> {
    config: BoundedPoolConfig,
    factory: TransportFactory<T>,
    state: Mutex<PoolState<T>>,
}

impl<T: Transport> BoundedPool<T> {
    /// Open `max_open_conns` transports. Any failure closes the ones
    /// already opened.
    pub async fn new(config: BoundedPoolConfig, factory: TransportFactory<T>) -> Result<Self> {
        let capacity = config.max_open_conns.max(1);
        let mut idle = VecDeque::with_capacity(capacity);
        for _ in 0..capacity {
            match factory().await {
                Ok(transport) => idle.push_back(transport),
                Err(e) => {
                    for transport in idle {
                        discard(transport, "pool construction failed").await;
                    }
                    return Err(PointMapError::transport("open pooled connection", e));
                },
            }
        }
        debug!("Connection pool ready with {} transports", capacity);

        Ok(Self {
            config: BoundedPoolConfig {
                max_open_conns: capacity,
                ..config
            },
            factory,
            state: Mutex::new(PoolState {
                idle,
                closed: false,
            }),
        })
    }

    pub fn config(&self) -> &BoundedPoolConfig {
        &self.config
    }

    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }
}

#[async_trait]
impl<T: Transport> TransportPool<T> for BoundedPool<T> {
    async fn acquire(&self) -> Result<Checkout<T>> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(PointMapError::PoolClosed);
            }
            if let Some(transport) = state.idle.pop_front() {
                return Ok(Checkout::Owned(transport));
            }
        }

        debug!("Pool exhausted, opening overflow connection");
        let transport = (self.factory)()
            .await
            .map_err(|e| PointMapError::transport("open overflow connection", e))?;
        Ok(Checkout::Owned(transport))
    }

    async fn release(&self, checkout: Checkout<T>) {
        let mut transport = match checkout {
            Checkout::Owned(transport) => transport,
            Checkout::Shared(_) => return,
        };

        if self.state.lock().closed {
            return discard(transport, "pool closed").await;
        }
        if transport.created_at().elapsed() > self.config.conn_max_lifetime() {
            return evict(transport, "exceeded max lifetime").await;
        }
        if !transport.is_alive().await {
            return evict(transport, "failed liveness probe").await;
        }

        let rejected = {
            let mut state = self.state.lock();
            if !state.closed && state.idle.len() < self.config.max_open_conns {
                state.idle.push_back(transport);
                None
            } else {
                Some(transport)
            }
        };
        if let Some(transport) = rejected {
            discard(transport, "pool full").await;
        }
    }

    async fn shutdown(&self) -> Result<()> {
        let drained: Vec<T> = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(PointMapError::PoolClosed);
            }
            state.closed = true;
            state.idle.drain(..).collect()
        };
        info!("Shutting down connection pool ({} idle)", drained.len());
        for transport in drained {
            discard(transport, "pool shutdown").await;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

struct SharedLink<T> {
    transport: Arc<AsyncMutex<T>>,
    params: SerialParams,
    subscribers: BTreeSet<u8>,
}

/// Open physical links keyed by port path.
///
/// Create one per application and hand it to every client on the same
/// serial ports; call [`shutdown_all`](Self::shutdown_all) on exit.
pub struct SharedLinkRegistry<T> {
    links: DashMap<String, SharedLink<T>>,
}

enum Attached<T> {
    Opened(Arc<AsyncMutex<T>>),
    Joined(Arc<AsyncMutex<T>>),
}

impl<T: Transport> SharedLinkRegistry<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            links: DashMap::new(),
        })
    }

    /// Subscribe `subscriber` to the link at `key`, opening it with `open`
    /// if it is not open yet.
    ///
    /// Fails with `ConfigConflict` when the link is already open with
    /// different serial parameters or the subscriber id is taken.
    pub async fn attach<F, Fut>(
        self: &Arc<Self>,
        key: &str,
        params: &SerialParams,
        subscriber: u8,
        open: F,
    ) -> Result<SharedLinkPool<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        if let Some(transport) = self.try_join(key, params, subscriber)? {
            return Ok(self.handle(key, subscriber, transport));
        }

        let transport = open()
            .await
            .map_err(|e| PointMapError::transport(format!("open shared link {key}"), e))?;

        let mut fresh = Some(transport);
        let attached = match self.links.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                let shared = Arc::new(AsyncMutex::new(fresh.take().ok_or_else(|| {
                    PointMapError::Config("shared link opened twice".to_string())
                })?));
                vacant.insert(SharedLink {
                    transport: Arc::clone(&shared),
                    params: params.clone(),
                    subscribers: BTreeSet::from([subscriber]),
                });
                Ok(Attached::Opened(shared))
            },
            Entry::Occupied(mut occupied) => {
                Self::join(occupied.get_mut(), key, params, subscriber).map(Attached::Joined)
            },
        };

        // Another caller opened the port first; keep theirs.
        if let Some(unused) = fresh {
            discard(unused, "shared link already open").await;
        }

        match attached? {
            Attached::Opened(transport) => {
                info!("Opened shared link {} for subscriber {}", key, subscriber);
                Ok(self.handle(key, subscriber, transport))
            },
            Attached::Joined(transport) => Ok(self.handle(key, subscriber, transport)),
        }
    }

    fn try_join(
        &self,
        key: &str,
        params: &SerialParams,
        subscriber: u8,
    ) -> Result<Option<Arc<AsyncMutex<T>>>> {
        match self.links.get_mut(key) {
            Some(mut link) => Self::join(&mut link, key, params, subscriber).map(Some),
            None => Ok(None),
        }
    }

    fn join(
        link: &mut SharedLink<T>,
        key: &str,
        params: &SerialParams,
        subscriber: u8,
    ) -> Result<Arc<AsyncMutex<T>>> {
        if link.params != *params {
            return Err(PointMapError::ConfigConflict {
                key: key.to_string(),
                reason: format!(
                    "open with {}, requested {}; baud rate, data bits, parity and stop bits must match",
                    link.params, params
                ),
            });
        }
        if !link.subscribers.insert(subscriber) {
            return Err(PointMapError::ConfigConflict {
                key: key.to_string(),
                reason: format!("subscriber {subscriber} already attached"),
            });
        }
        debug!(
            "Subscriber {} joined shared link {} ({} subscribers)",
            subscriber,
            key,
            link.subscribers.len()
        );
        Ok(Arc::clone(&link.transport))
    }

    fn handle(
        self: &Arc<Self>,
        key: &str,
        subscriber: u8,
        transport: Arc<AsyncMutex<T>>,
    ) -> SharedLinkPool<T> {
        SharedLinkPool {
            registry: Arc::clone(self),
            key: key.to_string(),
            subscriber,
            transport,
            detached: AtomicBool::new(false),
        }
    }

    /// Drop one subscriber; the link closes with its last subscriber.
    async fn detach(&self, key: &str, subscriber: u8) -> Result<()> {
        let remaining = match self.links.get_mut(key) {
            Some(mut link) => {
                link.subscribers.remove(&subscriber);
                link.subscribers.len()
            },
            None => return Ok(()),
        };
        if remaining > 0 {
            debug!(
                "Subscriber {} left shared link {} ({} remaining)",
                subscriber, key, remaining
            );
            return Ok(());
        }

        match self
            .links
            .remove_if(key, |_, link| link.subscribers.is_empty())
        {
            Some((_, link)) => Self::close_link(key, link).await,
            None => Ok(()),
        }
    }

    async fn close_link(key: &str, link: SharedLink<T>) -> Result<()> {
        // Waits for an in-flight operation of another subscriber.
        let mut transport = link.transport.lock().await;
        transport
            .close()
            .await
            .map_err(|e| PointMapError::transport(format!("close shared link {key}"), e))?;
        info!("Closed shared link {}", key);
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.links.contains_key(key)
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        self.links
            .get(key)
            .map(|link| link.subscribers.len())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Close every link regardless of subscribers. Returns the first
    /// close failure after attempting all links.
    pub async fn shutdown_all(&self) -> Result<()> {
        let keys: Vec<String> = self.links.iter().map(|entry| entry.key().clone()).collect();
        let mut first_error = None;
        for key in keys {
            if let Some((_, link)) = self.links.remove(&key) {
                if let Err(e) = Self::close_link(&key, link).await {
                    warn!("{}", e);
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// One subscriber's view of a shared physical link.
///
/// Call [`shutdown`](TransportPool::shutdown) to detach; dropping the pool
/// without it keeps the subscription until the registry is shut down.
pub struct SharedLinkPool<T> {
    registry: Arc<SharedLinkRegistry<T>>,
    key: String,
    subscriber: u8,
    transport: Arc<AsyncMutex<T>>,
    detached: AtomicBool,
}

impl<T> SharedLinkPool<T> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn subscriber(&self) -> u8 {
        self.subscriber
    }
}

#[async_trait]
impl<T: Transport> TransportPool<T> for SharedLinkPool<T> {
    async fn acquire(&self) -> Result<Checkout<T>> {
        if self.detached.load(Ordering::Acquire) {
            return Err(PointMapError::PoolClosed);
        }
        let guard = Arc::clone(&self.transport).lock_owned().await;
        Ok(Checkout::Shared(guard))
    }

    async fn release(&self, checkout: Checkout<T>) {
        match checkout {
            Checkout::Shared(guard) => drop(guard),
            Checkout::Owned(transport) => discard(transport, "not part of a shared link").await,
        }
    }

    async fn shutdown(&self) -> Result<()> {
        if self.detached.swap(true, Ordering::AcqRel) {
            return Err(PointMapError::PoolClosed);
        }
        self.registry.detach(&self.key, self.subscriber).await
    }

    fn is_closed(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }
}
