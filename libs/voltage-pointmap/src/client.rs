//! Point-level client facade
//!
//! [`ModbusClient`] resolves point names through a [`PointCatalog`], checks a
//! transport out of its pool for the duration of one operation and returns it
//! afterwards.
//!
//! Batch operations walk an annotated record. With batching enabled the
//! addresses of every participating point are coalesced into blocks first;
//! otherwise each point's range is read or written on its own.
//!
//! Batch writes are not transactional. Every field is encoded and validated
//! before the first request, but a transport failure part-way through leaves
//! the blocks already written applied on the device. The same holds when the
//! caller drops an in-flight operation; its checked-out transport is then
//! discarded instead of returned to the pool.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::catalog::{PointCatalog, PointDescriptor, RegisterKind};
use crate::config::{LinkConfig, ModbusConfig};
use crate::error::{PointMapError, Result};
use crate::executor::{self, DeviceLimits};
use crate::planner::{self, Block, BlockSet, PlannerConfig};
use crate::pool::{BoundedPool, SharedLinkRegistry, TransportPool};
use crate::record::{schema, walk, walk_mut, PointFilter, PointRecord};
use crate::transport::{Transport, TransportFactory, TransportResult};
use crate::value::{PointField, ValueKind};

/// Batching client bound to one slave and one pool.
pub struct ModbusClient<T: Transport> {
    catalog: Arc<PointCatalog>,
    pool: Box<dyn TransportPool<T>>,
    slave_id: u8,
    batching: bool,
    planner: PlannerConfig,
    limits: DeviceLimits,
}

impl<T: Transport> ModbusClient<T> {
    /// Client with batching disabled and default device limits.
    pub fn new<P>(catalog: impl Into<Arc<PointCatalog>>, pool: P) -> Self
    where
        P: TransportPool<T> + 'static,
    {
        Self {
            catalog: catalog.into(),
            pool: Box::new(pool),
            slave_id: 1,
            batching: false,
            planner: PlannerConfig::default(),
            limits: DeviceLimits::default(),
        }
    }

    pub fn with_batching(mut self, planner: PlannerConfig) -> Self {
        self.batching = true;
        self.planner = planner;
        self
    }

    pub fn without_batching(mut self) -> Self {
        self.batching = false;
        self
    }

    pub fn with_limits(mut self, limits: DeviceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_slave_id(mut self, slave_id: u8) -> Self {
        self.slave_id = slave_id;
        self
    }

    fn configured(mut self, config: &ModbusConfig) -> Self {
        self.slave_id = config.slave_id;
        self.batching = config.batch.enabled;
        self.planner = config.batch.planner;
        self.limits = config.limits();
        self
    }

    /// Client over an eagerly opened [`BoundedPool`].
    pub async fn connect_bounded(
        config: &ModbusConfig,
        catalog: impl Into<Arc<PointCatalog>>,
        factory: TransportFactory<T>,
    ) -> Result<Self> {
        config.validate()?;
        let pool = BoundedPool::new(config.pool, factory).await?;
        debug!(
            "Connected to {} with {} pooled transports",
            config.link.key(),
            pool.idle_count()
        );
        Ok(Self::new(catalog, pool).configured(config))
    }

    /// Client subscribed to a shared serial link; the slave id is the
    /// subscriber id.
    pub async fn connect_shared<F, Fut>(
        config: &ModbusConfig,
        catalog: impl Into<Arc<PointCatalog>>,
        registry: &Arc<SharedLinkRegistry<T>>,
        open: F,
    ) -> Result<Self>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        config.validate()?;
        let LinkConfig::Rtu { device, serial } = &config.link else {
            return Err(PointMapError::Config(format!(
                "Shared links require an RTU link, got {}",
                config.link.key()
            )));
        };
        let pool = registry
            .attach(device, serial, config.slave_id, open)
            .await?;
        Ok(Self::new(catalog, pool).configured(config))
    }

    pub fn catalog(&self) -> &PointCatalog {
        &self.catalog
    }

    pub fn slave_id(&self) -> u8 {
        self.slave_id
    }

    pub fn is_batching(&self) -> bool {
        self.batching
    }

    pub fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    /// Read one point into a fresh value.
    pub async fn get_value<V>(&self, point: &str) -> Result<V>
    where
        V: PointField + Default,
    {
        let mut value = V::default();
        self.get_value_into(point, &mut value).await?;
        Ok(value)
    }

    /// Read one point into `out`.
    #[instrument(level = "debug", skip(self, out), fields(slave = self.slave_id))]
    pub async fn get_value_into(&self, point: &str, out: &mut dyn PointField) -> Result<()> {
        let desc = self.catalog.require(point)?;

        let mut link = self.pool.acquire().await?;
        let result = executor::read_range(
            &mut *link,
            desc.register_kind,
            desc.address,
            desc.quantity(),
            &self.limits,
        )
        .await;
        self.pool.release(link).await;

        let bytes = result.map_err(|e| e.at_point(point))?;
        out.decode_from(&bytes, desc).map_err(|e| e.at_point(point))
    }

    /// Write one point. A null optional value writes nothing.
    #[instrument(level = "debug", skip(self, value), fields(slave = self.slave_id))]
    pub async fn set_value<V>(&self, point: &str, value: &V) -> Result<()>
    where
        V: PointField + ?Sized,
    {
        let desc = self.catalog.require(point)?;
        let Some(payload) = value.encode_to(desc).map_err(|e| e.at_point(point))? else {
            debug!("Null value, nothing written");
            return Ok(());
        };
        check_writable(point, desc)?;

        let mut link = self.pool.acquire().await?;
        let result = executor::write_range(
            &mut *link,
            desc.register_kind,
            desc.address,
            &payload,
            &self.limits,
        )
        .await;
        self.pool.release(link).await;

        result.map_err(|e| e.at_point(point))
    }

    /// Read every annotated point of `record` allowed by `filter`.
    ///
    /// Points missing from the catalog are skipped; use
    /// [`validate_record`](Self::validate_record) for a strict check.
    #[instrument(level = "debug", skip_all, fields(slave = self.slave_id, batching = self.batching))]
    pub async fn get_values<R>(&self, record: &mut R, filter: &PointFilter) -> Result<()>
    where
        R: PointRecord + ?Sized,
    {
        let blocks = self.plan_reads(record, filter)?;
        if blocks.is_empty() {
            debug!("No catalog points to read");
            return Ok(());
        }

        let mut link = self.pool.acquire().await?;
        let result = self.read_blocks(&mut *link, blocks).await;
        self.pool.release(link).await;
        let blocks = result?;

        walk_mut(record, filter, |point, field| {
            let Some(desc) = self.catalog.get(point) else {
                return Ok(());
            };
            let bytes = blocks
                .gather(desc.register_kind, desc.address, desc.quantity())
                .map_err(|e| e.at_point(point))?;
            field.decode_from(&bytes, desc).map_err(|e| e.at_point(point))
        })
    }

    /// Write every annotated, non-null point of `record`.
    ///
    /// All fields are encoded before the first request. When two fields map
    /// to the same register, the later one in declaration order wins.
    #[instrument(level = "debug", skip_all, fields(slave = self.slave_id, batching = self.batching))]
    pub async fn set_values<R>(&self, record: &R) -> Result<()>
    where
        R: PointRecord + ?Sized,
    {
        let blocks = self.plan_writes(record)?;
        if blocks.is_empty() {
            debug!("No catalog points to write");
            return Ok(());
        }

        let mut link = self.pool.acquire().await?;
        let result = self.write_blocks(&mut *link, &blocks).await;
        self.pool.release(link).await;
        result
    }

    /// Check that every annotated point of `R` exists in the catalog and
    /// that its value type fits the point's register kind.
    pub fn validate_record<R: PointRecord>(&self) -> Result<()> {
        for field in schema::<R>() {
            let desc = self.catalog.require(field.point)?;
            if desc.register_kind.is_bit()
                && matches!(field.kind, ValueKind::Text | ValueKind::Opaque)
            {
                return Err(PointMapError::unsupported(
                    field.path,
                    format!(
                        "{} value on {} point {}",
                        field.kind, desc.register_kind, field.point
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Shut down the pool or detach from the shared link.
    pub async fn close(&self) -> Result<()> {
        self.pool.shutdown().await
    }

    fn plan_reads<R>(&self, record: &R, filter: &PointFilter) -> Result<Vec<Block>>
    where
        R: PointRecord + ?Sized,
    {
        if self.batching {
            let addresses = planner::collect_addresses(record, &self.catalog, filter)?;
            let blocks = addresses.plan(&self.planner);
            debug!(
                "Planned {} read blocks for {} addresses",
                blocks.len(),
                addresses.len()
            );
            return Ok(blocks);
        }

        let mut blocks = Vec::new();
        walk(record, filter, |point, _| {
            match self.catalog.get(point) {
                Some(desc) => blocks.push(Block::new(
                    desc.register_kind,
                    desc.address,
                    desc.end_address(),
                )),
                None => debug!("Point {} not in catalog, skipped", point),
            }
            Ok(())
        })?;
        Ok(blocks)
    }

    fn plan_writes<R>(&self, record: &R) -> Result<Vec<Block>>
    where
        R: PointRecord + ?Sized,
    {
        let mut words: BTreeMap<RegisterKind, BTreeMap<u16, [u8; 2]>> = BTreeMap::new();
        let mut blocks = Vec::new();

        walk(record, &PointFilter::all(), |point, field| {
            let Some(desc) = self.catalog.get(point) else {
                debug!("Point {} not in catalog, skipped", point);
                return Ok(());
            };
            let Some(payload) = field.encode_to(desc).map_err(|e| e.at_point(point))? else {
                return Ok(());
            };
            check_writable(point, desc)?;

            if self.batching {
                let table = words.entry(desc.register_kind).or_default();
                for (address, word) in (desc.address..=desc.end_address()).zip(payload.chunks_exact(2)) {
                    table.insert(address, [word[0], word[1]]);
                }
            } else {
                let mut block = Block::new(desc.register_kind, desc.address, desc.end_address());
                block.payload = payload;
                blocks.push(block);
            }
            Ok(())
        })?;

        if self.batching {
            blocks = words
                .iter()
                .flat_map(|(kind, table)| {
                    planner::coalesce_writes(*kind, table, self.planner.max_block_size)
                })
                .collect();
            debug!("Planned {} write blocks", blocks.len());
        }
        Ok(blocks)
    }

    async fn read_blocks(&self, transport: &mut T, blocks: Vec<Block>) -> Result<BlockSet> {
        let mut set = BlockSet::default();
        let mut blocks = blocks.into_iter().peekable();
        while let Some(mut block) = blocks.next() {
            executor::read_block(transport, &mut block, &self.limits).await?;
            set.push(block);
            if blocks.peek().is_some() {
                self.limits.pause().await;
            }
        }
        Ok(set)
    }

    async fn write_blocks(&self, transport: &mut T, blocks: &[Block]) -> Result<()> {
        let mut blocks = blocks.iter().peekable();
        while let Some(block) = blocks.next() {
            executor::write_block(transport, block, &self.limits).await?;
            if blocks.peek().is_some() {
                self.limits.pause().await;
            }
        }
        Ok(())
    }
}

fn check_writable(point: &str, desc: &PointDescriptor) -> Result<()> {
    if desc.register_kind.is_writable() {
        Ok(())
    } else {
        Err(PointMapError::ReadOnly {
            point: point.to_string(),
            kind: desc.register_kind,
        })
    }
}
