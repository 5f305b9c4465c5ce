//! Identity cache - native address to live wrappers
//!
//! Design: open addressing with double hashing over a power-of-two table.
//! Each bucket holds a short chain of wrappers at one address (a class and
//! its first member share an address). Entries are `Weak`, so the cache
//! never keeps a wrapper alive; a wrapper being dropped is simply skipped.
//!
//! A bucket keeps its key once set so probe sequences stay valid; emptied
//! buckets turn stale and are reclaimed when the table is reorganised.

use crate::config::IdentityConfig;
use crate::logging;
use crate::registry::TypeId;
use crate::value::NativePtr;
use crate::wrapper::{Wrapper, WrapperFlags, WrapperType};
use smallvec::SmallVec;
use std::sync::{Arc, Weak};

/// A registered (address, type, wrapper) triple.
#[derive(Debug, Clone)]
pub struct Identity {
    pub address: NativePtr,
    pub type_id: TypeId,
    pub wrapper: Weak<Wrapper>,
    /// Registered for a super-type sub-object, not the object itself.
    pub alias: bool,
}

#[derive(Clone)]
struct Entry {
    wrapper: Weak<Wrapper>,
    ty: Arc<WrapperType>,
    alias: bool,
}

impl Entry {
    fn is_live(&self) -> bool {
        self.wrapper.strong_count() > 0
    }
}

#[derive(Clone, Default)]
struct Bucket {
    key: Option<NativePtr>,
    chain: SmallVec<[Entry; 1]>,
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ObjectMapStats {
    pub capacity: usize,
    pub used: usize,
    pub stale: usize,
    pub entries: usize,
    pub reorganisations: u64,
}

pub struct ObjectMap {
    buckets: Vec<Bucket>,
    /// Buckets whose key was never set.
    unused: usize,
    /// Buckets with a key but no entries.
    stale: usize,
    min_free_ratio: usize,
    grow_ratio: usize,
    reorganisations: u64,
}

const MIN_CAPACITY: usize = 16;

impl ObjectMap {
    pub fn new(config: &IdentityConfig) -> Self {
        let capacity = config.initial_capacity.max(MIN_CAPACITY).next_power_of_two();
        Self {
            buckets: vec![Bucket::default(); capacity],
            unused: capacity,
            stale: 0,
            min_free_ratio: config.min_free_ratio.max(2),
            grow_ratio: config.grow_ratio.max(2),
            reorganisations: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    /// The live wrapper at `address` whose type is `ty` or derives from it.
    ///
    /// Only the match is upgraded, so no wrapper can be dropped (and
    /// re-enter the runtime) from inside the lookup.
    pub fn find(&self, address: NativePtr, ty: TypeId) -> Option<Arc<Wrapper>> {
        let bucket = &self.buckets[self.probe(address)];
        bucket.key?;
        bucket
            .chain
            .iter()
            .find(|entry| entry.is_live() && entry.ty.is_subtype_of(ty))
            .and_then(|entry| entry.wrapper.upgrade())
    }

    /// Register `wrapper` at `address`.
    ///
    /// Unless the wrapper shares its address, wrappers still registered there
    /// belong to a native object that was deleted without notice; they are
    /// dropped from the chain and returned so the caller can invalidate them.
    pub fn add(&mut self, address: NativePtr, wrapper: &Arc<Wrapper>, alias: bool) -> Vec<Arc<Wrapper>> {
        let index = self.probe(address);
        let shared = wrapper.flags().contains(WrapperFlags::SHARE_MAP);
        let mut stale_wrappers = Vec::new();

        let bucket = &mut self.buckets[index];
        match bucket.key {
            None => {
                bucket.key = Some(address);
                self.unused -= 1;
            }
            Some(_) if bucket.chain.is_empty() => self.stale -= 1,
            Some(_) if !shared && !alias => {
                stale_wrappers = bucket
                    .chain
                    .drain(..)
                    .filter_map(|entry| entry.wrapper.upgrade())
                    .filter(|w| !Arc::ptr_eq(w, wrapper))
                    .collect();
            }
            Some(_) => {}
        }
        bucket.chain.insert(
            0,
            Entry {
                wrapper: Arc::downgrade(wrapper),
                ty: wrapper.wrapper_type().clone(),
                alias,
            },
        );

        logging::log_identity_insert(wrapper.wrapper_type().name(), address.addr(), alias, stale_wrappers.len());

        if self.unused <= self.capacity() / self.min_free_ratio {
            self.reorganise();
        }
        stale_wrappers
    }

    /// Remove `wrapper`'s entry at `address`. Returns whether one was found.
    pub fn remove(&mut self, address: NativePtr, wrapper: *const Wrapper) -> bool {
        let index = self.probe(address);
        let bucket = &mut self.buckets[index];
        if bucket.key.is_none() {
            return false;
        }
        let Some(ty) = bucket
            .chain
            .iter()
            .find(|entry| std::ptr::eq(entry.wrapper.as_ptr(), wrapper))
            .map(|entry| entry.ty.clone())
        else {
            return false;
        };
        bucket.chain.retain(|entry| !std::ptr::eq(entry.wrapper.as_ptr(), wrapper));
        if bucket.chain.is_empty() {
            self.stale += 1;
        }
        logging::log_identity_remove(ty.name(), address.addr());
        true
    }

    /// Drop entries at `address` whose wrapper has been collected.
    pub fn purge(&mut self, address: NativePtr) {
        let index = self.probe(address);
        let bucket = &mut self.buckets[index];
        if bucket.key.is_none() || bucket.chain.is_empty() {
            return;
        }
        bucket.chain.retain(|entry| entry.is_live());
        if bucket.chain.is_empty() {
            self.stale += 1;
        }
    }

    /// Snapshot of every live registration.
    pub fn identities(&self) -> Vec<Identity> {
        let mut out = Vec::new();
        for bucket in &self.buckets {
            let Some(address) = bucket.key else { continue };
            for entry in bucket.chain.iter().filter(|e| e.is_live()) {
                out.push(Identity {
                    address,
                    type_id: entry.ty.id(),
                    wrapper: entry.wrapper.clone(),
                    alias: entry.alias,
                });
            }
        }
        out
    }

    /// Every live, non-alias wrapper. Drop the result outside the runtime lock.
    pub fn live_wrappers(&self) -> Vec<Arc<Wrapper>> {
        self.buckets
            .iter()
            .flat_map(|b| b.chain.iter())
            .filter(|entry| !entry.alias)
            .filter_map(|entry| entry.wrapper.upgrade())
            .collect()
    }

    pub fn stats(&self) -> ObjectMapStats {
        let entries = self.buckets.iter().map(|b| b.chain.len()).sum();
        ObjectMapStats {
            capacity: self.capacity(),
            used: self.capacity() - self.unused - self.stale,
            stale: self.stale,
            entries,
            reorganisations: self.reorganisations,
        }
    }

    /// Bucket holding `address`, or the empty bucket where it would go.
    fn probe(&self, address: NativePtr) -> usize {
        let mask = self.capacity() - 1;
        let addr = address.addr() as u64;
        let mut index = (hash(addr) as usize) & mask;
        // An odd step visits every bucket of a power-of-two table.
        let step = ((addr >> 4) as usize | 1) & mask;
        loop {
            match self.buckets[index].key {
                None => return index,
                Some(key) if key == address => return index,
                Some(_) => index = (index + step) & mask,
            }
        }
    }

    /// Rebuild the table, dropping stale buckets and collected wrappers.
    /// Grows when too few buckets would be free otherwise.
    fn reorganise(&mut self) {
        let old_capacity = self.capacity();
        let new_capacity = if self.unused + self.stale < old_capacity / self.grow_ratio {
            old_capacity * 2
        } else {
            old_capacity
        };

        let old = std::mem::replace(&mut self.buckets, vec![Bucket::default(); new_capacity]);
        self.unused = new_capacity;
        self.stale = 0;
        let mut live = 0;
        for mut bucket in old {
            let Some(key) = bucket.key else { continue };
            bucket.chain.retain(|entry| entry.is_live());
            if bucket.chain.is_empty() {
                continue;
            }
            live += bucket.chain.len();
            let index = self.probe(key);
            self.buckets[index] = bucket;
            self.unused -= 1;
        }
        self.reorganisations += 1;
        logging::log_identity_reorganise(old_capacity, new_capacity, live);
    }
}

fn hash(addr: u64) -> u64 {
    // Fibonacci hashing; low address bits are mostly alignment zeros.
    (addr >> 3).wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 32
}
