//! Address collection and block coalescing
//!
//! Reads: the addresses of every requested point are gathered per register
//! kind, then merged greedily into blocks bounded by `max_block_size`
//! registers, tolerating gaps of up to `max_gap_in_block` unrequested
//! addresses. The pass is O(n log n) and never revisits a closed block, so
//! it is not guaranteed to produce the minimum number of blocks.
//!
//! Writes: only strictly contiguous addresses are merged, unrequested
//! registers are never written.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{PointCatalog, PointDescriptor, RegisterKind};
use crate::error::{PointMapError, Result};
use crate::record::{walk, PointFilter, PointRecord};

fn default_max_block_size() -> u16 {
    100
}

fn default_max_gap_in_block() -> u16 {
    10
}

/// Coalescing limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Largest span of one block, in registers
    #[serde(default = "default_max_block_size")]
    pub max_block_size: u16,
    /// Largest run of unrequested addresses merged into a block
    #[serde(default = "default_max_gap_in_block")]
    pub max_gap_in_block: u16,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_block_size: default_max_block_size(),
            max_gap_in_block: default_max_gap_in_block(),
        }
    }
}

impl PlannerConfig {
    pub fn with_max_block_size(mut self, max_block_size: u16) -> Self {
        self.max_block_size = max_block_size;
        self
    }

    pub fn with_max_gap_in_block(mut self, max_gap_in_block: u16) -> Self {
        self.max_gap_in_block = max_gap_in_block;
        self
    }
}

/// Contiguous address range `[start, end]` of one register kind.
///
/// `payload` holds two bytes per address once the block has been read, or
/// the bytes to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub kind: RegisterKind,
    pub start: u16,
    pub end: u16,
    pub payload: Vec<u8>,
}

impl Block {
    pub fn new(kind: RegisterKind, start: u16, end: u16) -> Self {
        Self {
            kind,
            start,
            end,
            payload: Vec::new(),
        }
    }

    pub fn quantity(&self) -> u16 {
        self.end - self.start + 1
    }

    pub fn contains(&self, address: u16) -> bool {
        (self.start..=self.end).contains(&address)
    }
}

/// Requested addresses, per register kind, in ascending order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressSet {
    kinds: BTreeMap<RegisterKind, BTreeSet<u16>>,
}

impl AddressSet {
    pub fn insert_point(&mut self, point: &PointDescriptor) {
        let set = self.kinds.entry(point.register_kind).or_default();
        set.extend(point.address..=point.end_address());
    }

    pub fn addresses(&self, kind: RegisterKind) -> impl Iterator<Item = u16> + '_ {
        self.kinds.get(&kind).into_iter().flatten().copied()
    }

    pub fn kinds(&self) -> impl Iterator<Item = RegisterKind> + '_ {
        self.kinds.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.kinds.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Coalesce every kind into read blocks.
    pub fn plan(&self, config: &PlannerConfig) -> Vec<Block> {
        self.kinds
            .iter()
            .flat_map(|(kind, addrs)| coalesce(*kind, addrs.iter().copied(), config))
            .collect()
    }
}

/// Gather the addresses of every allowed leaf of `record`.
///
/// Points missing from the catalog are skipped.
pub fn collect_addresses<R>(
    record: &R,
    catalog: &PointCatalog,
    filter: &PointFilter,
) -> Result<AddressSet>
where
    R: PointRecord + ?Sized,
{
    let mut set = AddressSet::default();
    walk(record, filter, |point, _| {
        match catalog.get(point) {
            Some(desc) => set.insert_point(desc),
            None => debug!("Point {} not in catalog, skipped", point),
        }
        Ok(())
    })?;
    Ok(set)
}

/// Greedy single-pass merge of `addresses` into read blocks.
pub fn coalesce<I>(kind: RegisterKind, addresses: I, config: &PlannerConfig) -> Vec<Block>
where
    I: IntoIterator<Item = u16>,
{
    let mut sorted: Vec<u16> = addresses.into_iter().collect();
    sorted.sort_unstable();
    sorted.dedup();

    let max_size = u32::from(config.max_block_size.max(1));
    // A gap of 1 is plain contiguity.
    let max_step = u32::from(config.max_gap_in_block).max(1);

    let mut blocks = Vec::new();
    let mut iter = sorted.into_iter();
    let Some(first) = iter.next() else {
        return blocks;
    };
    let (mut start, mut end) = (first, first);
    for addr in iter {
        let span = u32::from(addr) - u32::from(start) + 1;
        let step = u32::from(addr) - u32::from(end);
        if span <= max_size && step <= max_step {
            end = addr;
        } else {
            blocks.push(Block::new(kind, start, end));
            start = addr;
            end = addr;
        }
    }
    blocks.push(Block::new(kind, start, end));
    blocks
}

/// Merge per-address words into contiguous write blocks.
pub fn coalesce_writes(
    kind: RegisterKind,
    words: &BTreeMap<u16, [u8; 2]>,
    max_block_size: u16,
) -> Vec<Block> {
    let max_size = usize::from(max_block_size.max(1));
    let mut blocks: Vec<Block> = Vec::new();
    for (&addr, word) in words {
        match blocks.last_mut() {
            Some(block)
                if u32::from(addr) == u32::from(block.end) + 1
                    && usize::from(block.quantity()) < max_size =>
            {
                block.end = addr;
                block.payload.extend_from_slice(word);
            },
            _ => {
                let mut block = Block::new(kind, addr, addr);
                block.payload.extend_from_slice(word);
                blocks.push(block);
            },
        }
    }
    blocks
}

/// Blocks that have been read, indexed for point extraction.
#[derive(Debug, Clone, Default)]
pub struct BlockSet {
    blocks: Vec<Block>,
}

impl BlockSet {
    pub fn push(&mut self, block: Block) {
        self.blocks.push(block);
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Bytes for `quantity` registers from `address`, spanning adjacent
    /// blocks when a point straddles a block boundary.
    pub fn gather(&self, kind: RegisterKind, address: u16, quantity: u16) -> Result<Vec<u8>> {
        if quantity == 0 {
            return Ok(Vec::new());
        }
        let expected = usize::from(quantity) * 2;
        let mut out = Vec::with_capacity(expected);
        let last = u32::from(address) + u32::from(quantity) - 1;
        let mut cursor = u32::from(address);

        while cursor <= last {
            let found = self.blocks.iter().find(|b| {
                b.kind == kind && u32::from(b.start) <= cursor && cursor <= u32::from(b.end)
            });
            let Some(block) = found else { break };
            let upto = last.min(u32::from(block.end));
            let from = (cursor - u32::from(block.start)) as usize * 2;
            let to = (upto - u32::from(block.start) + 1) as usize * 2;
            match block.payload.get(from..to) {
                Some(bytes) => out.extend_from_slice(bytes),
                None => break,
            }
            cursor = upto + 1;
        }

        if out.len() != expected {
            return Err(PointMapError::ShortData {
                context: format!("{kind} {address}+{quantity}"),
                expected,
                actual: out.len(),
            });
        }
        Ok(out)
    }
}
