//! Erase path and merge protocols.
//!
//! Erasing rebuilds the bucket without the victim residue, then rebalances:
//! an emptied bucket is detached and empty branch levels above it pruned; a
//! bucket left covering a whole branch is promoted into the grandparent,
//! re-absorbing the completed byte into its residues; a drained bucket
//! coalesces with its buddy window when the buddy is a bucket of the same
//! shape. A buddy that is still a branch, or a deeper-split bucket, blocks
//! the merge until it has drained too.

use crate::PTrie;
use crate::bucket::{self, Bucket, decode_handle, encode_handle};
use crate::chunks::{KeyView, MAX_KEY_LEN, PTR_BYTES};
use crate::error::TrieError;
use crate::node::{NodeIdx, Slot};

impl<
    T,
    const HAS_ENTRIES: bool,
    const BSIZE: u8,
    const HEAPBOUND: u16,
    const SPLITBOUND: u16,
    const ALLOCSIZE: usize,
> PTrie<T, HAS_ENTRIES, BSIZE, HEAPBOUND, SPLITBOUND, ALLOCSIZE>
{
    /// Remove a key. Returns whether it was present.
    pub fn erase(&mut self, key: &[u8]) -> Result<bool, TrieError> {
        if key.len() > MAX_KEY_LEN {
            return Err(TrieError::KeyTooLong(key.len()));
        }
        let kv = KeyView::new(key);
        let (_, depth, slot) = self.fast_forward(&kv);
        let Slot::Bucket(node) = slot else {
            return Ok(false);
        };
        let (found, index) = self.bucket_search(&kv, node, depth);
        if !found {
            return Ok(false);
        }
        self.erase_at(node, index, Self::byte_of(depth), kv.len().to_be_bytes());
        self.len -= 1;
        self.merge_down(node);
        debug_assert!(!self.exists(key).map(|r| r.0).unwrap_or(true));
        Ok(true)
    }

    /// Rebuild the bucket without the residue at `index`, releasing its heap
    /// block and marking its entry dead.
    fn erase_at(&mut self, node: NodeIdx, index: usize, byte: usize, prefix: [u8; 2]) {
        let (count, at, slot_len, id, handle) = {
            let n = &self.buckets[node];
            let mut at = 0usize;
            for i in 0..index {
                at += Self::bytes(Self::residue_body_len(n.bucket.first(i), byte, prefix));
            }
            let blen = Self::residue_body_len(n.bucket.first(index), byte, prefix);
            let id = if HAS_ENTRIES {
                Some(n.bucket.entry_id(n.count, index) as usize)
            } else {
                None
            };
            let handle = (blen >= HEAPBOUND as usize)
                .then(|| decode_handle(&n.bucket.data(n.count, HAS_ENTRIES)[at..at + PTR_BYTES]));
            (n.count, at, Self::bytes(blen), id, handle)
        };
        if let Some(handle) = handle {
            self.heap.remove(handle);
        }
        {
            let n = &mut self.buckets[node];
            if count > 1 {
                n.bucket = n.bucket.remove_slot(count, HAS_ENTRIES, index, at, slot_len);
            } else {
                n.bucket = Bucket::empty();
            }
            n.count = count - 1;
            n.totsize -= slot_len;
        }
        if let Some(id) = id {
            self.entries.set_node(id, None);
        }
        #[cfg(debug_assertions)]
        self.debug_check_bucket(node);
    }

    /// Rebalance after an erase. The surviving ids' back-pointers only
    /// change when residues move to another bucket node.
    pub(crate) fn merge_down(&mut self, node: NodeIdx) {
        let bound = (SPLITBOUND / 3) as usize;
        let (count, ty, parent) = {
            let n = &self.buckets[node];
            (n.count, n.ty, n.parent)
        };
        if ty == 0 {
            if count == 0 {
                return self.prune_empty(node, parent);
            }
            if count > bound {
                return;
            }
            if self.branches[parent].parent.is_some() {
                self.promote(node, parent);
            }
        } else {
            if count > bound {
                return;
            }
            self.try_coalesce(node);
        }
    }

    /// Detach an emptied whole-branch bucket and prune branch levels that
    /// became empty above it. Uncovering a branch with a single remaining
    /// bucket child re-triggers the merge on that bucket.
    fn prune_empty(&mut self, node: NodeIdx, mut parent: NodeIdx) {
        self.buckets.remove(node);
        for i in 0..Self::WIDTH {
            self.branches[parent].children[i] = Slot::Empty;
        }
        #[cfg(debug_assertions)]
        self.debug_check_branch(parent);
        loop {
            let Some(grand) = self.branches[parent].parent else {
                // the root keeps its empty slots
                return;
            };
            let path = self.branches[parent].path as usize;
            self.branches[grand].children[path] = Slot::Empty;
            self.branches.remove(parent);
            parent = grand;
            #[cfg(debug_assertions)]
            self.debug_check_branch(parent);

            let mut only: Option<Slot> = None;
            for i in 0..Self::WIDTH {
                let slot = self.branches[parent].children[i];
                if slot == Slot::Empty {
                    continue;
                }
                match only {
                    None => only = Some(slot),
                    Some(o) if o == slot => {}
                    Some(_) => return,
                }
            }
            match only {
                // this level emptied out as well
                None => continue,
                Some(Slot::Bucket(sibling)) => {
                    tracing::trace!("pruned empty branch levels, re-merging uncovered bucket");
                    return self.merge_down(sibling);
                }
                Some(_) => return,
            }
        }
    }

    /// Dissolve the parent branch of a bucket that covers all of its slots,
    /// moving the bucket up into the grandparent.
    fn promote(&mut self, node: NodeIdx, parent: NodeIdx) {
        let (depth, prefix) = self.branch_level(parent);
        let Some(grand) = self.branches[parent].parent else {
            return;
        };
        let path = self.branches[parent].path;

        // moving up one chunk re-crosses a byte boundary when the dissolved
        // level completed one
        if depth % Self::BDIV == 0 {
            let restored = self.restored_byte(parent);
            self.inject_byte(node, restored, depth / Self::BDIV, prefix);
        }
        {
            let n = &mut self.buckets[node];
            n.path = path;
            n.ty = BSIZE;
            n.parent = grand;
        }
        self.branches[grand].children[path as usize] = Slot::Bucket(node);
        self.branches.remove(parent);
        #[cfg(debug_assertions)]
        self.debug_check_branch(grand);
        tracing::trace!(path, "promoted bucket across a dissolved branch");
        self.merge_down(node);
    }

    /// The virtual byte completed by the levels ending at `parent`,
    /// assembled from the ancestor paths.
    fn restored_byte(&self, parent: NodeIdx) -> u8 {
        let mut byte = 0u16;
        let mut cur = parent;
        for i in 0..Self::BDIV {
            let branch = &self.branches[cur];
            byte |= (branch.path as u16) << (BSIZE as usize * i);
            match branch.parent {
                Some(p) => cur = p,
                None => break,
            }
        }
        byte as u8
    }

    /// Shift every residue one byte to the right: the restored byte enters
    /// the `first` word and the byte leaving it is prepended to the body,
    /// migrating inline bodies to the heap when they reach `HEAPBOUND`.
    fn inject_byte(&mut self, node: NodeIdx, restored: u8, obyte: usize, prefix: [u8; 2]) {
        let nbyte = obyte - 1;
        let count = self.buckets[node].count;
        let old = std::mem::take(&mut self.buckets[node].bucket);
        let old_data = old.data(count, HAS_ENTRIES);

        let mut firsts = Vec::with_capacity(count);
        let mut slots: Vec<Vec<u8>> = Vec::with_capacity(count);
        let mut off = 0usize;
        for i in 0..count {
            let f = old.first(i);
            let len = Self::residue_key_len(f, obyte, prefix) as usize;
            let blen = len.saturating_sub(obyte);
            let nblen = len.saturating_sub(nbyte);
            firsts.push(((restored as u16) << 8) | (f >> 8));
            let mut slot = Vec::new();
            if nblen == blen + 1 {
                let lead = f as u8;
                if blen >= HEAPBOUND as usize {
                    let handle = decode_handle(&old_data[off..off + PTR_BYTES]);
                    let block = self.heap.remove(handle);
                    let mut grown = Vec::with_capacity(nblen);
                    grown.push(lead);
                    grown.extend_from_slice(&block);
                    let fresh = self.heap.insert(grown.into_boxed_slice());
                    slot.extend_from_slice(&encode_handle(fresh));
                } else if nblen >= HEAPBOUND as usize {
                    let mut grown = Vec::with_capacity(nblen);
                    grown.push(lead);
                    grown.extend_from_slice(&old_data[off..off + blen]);
                    let fresh = self.heap.insert(grown.into_boxed_slice());
                    slot.extend_from_slice(&encode_handle(fresh));
                } else {
                    slot.push(lead);
                    slot.extend_from_slice(&old_data[off..off + blen]);
                }
            } else {
                debug_assert_eq!(nblen, blen);
                debug_assert_eq!(blen, 0);
            }
            off += Self::bytes(blen);
            slots.push(slot);
        }
        let ids: Vec<u64> = if HAS_ENTRIES {
            (0..count).map(|i| old.entry_id(count, i)).collect()
        } else {
            Vec::new()
        };

        let (rebuilt, data_size) = bucket::pack(&firsts, &ids, &slots, HAS_ENTRIES);
        let n = &mut self.buckets[node];
        n.bucket = rebuilt;
        n.totsize = data_size;
    }

    /// Merge with the buddy window: coalesce with a same-shape bucket or
    /// widen over an empty window, then keep rebalancing.
    fn try_coalesce(&mut self, node: NodeIdx) {
        let (count, ty, path, parent, totsize) = {
            let n = &self.buckets[node];
            (n.count, n.ty, n.path, n.parent, n.totsize)
        };
        debug_assert!(ty > 0);
        let mask = Self::mask(ty - 1);
        let buddy = path ^ mask;
        let from = (path & !mask) as usize;
        let window = Self::WIDTH >> (ty - 1);

        match self.branches[parent].children[buddy as usize] {
            Slot::Branch(_) => {}
            Slot::Bucket(other) => {
                debug_assert_ne!(other, node);
                let (ocount, oty, ototsize) = {
                    let o = &self.buckets[other];
                    (o.count, o.ty, o.totsize)
                };
                if oty != ty {
                    // the buddy has split deeper and is not ready to merge
                    return;
                }
                let merged_count = count + ocount;
                if merged_count >= SPLITBOUND as usize {
                    return;
                }
                let (first, second) = if path & mask != 0 { (other, node) } else { (node, other) };
                let merged = {
                    let a = &self.buckets[first];
                    let b = &self.buckets[second];
                    a.bucket.concat(a.count, &b.bucket, b.count, HAS_ENTRIES)
                };
                if HAS_ENTRIES {
                    let ids: Vec<u64> = {
                        let o = &self.buckets[other];
                        (0..ocount).map(|i| o.bucket.entry_id(ocount, i)).collect()
                    };
                    for id in ids {
                        self.entries.set_node(id as usize, Some(node));
                    }
                }
                self.buckets.remove(other);
                {
                    let n = &mut self.buckets[node];
                    n.bucket = merged;
                    n.count = merged_count;
                    n.totsize = totsize + ototsize;
                    n.ty = ty - 1;
                    n.path = from as u8;
                }
                for i in from..from + window {
                    self.branches[parent].children[i] = Slot::Bucket(node);
                }
                #[cfg(debug_assertions)]
                self.debug_check_branch(parent);
                tracing::trace!(count = merged_count, "coalesced buddy buckets");
                self.merge_down(node);
            }
            Slot::Empty => {
                // widen only over a fully empty buddy window
                for i in from..from + window {
                    let slot = self.branches[parent].children[i];
                    if slot != Slot::Empty && slot != Slot::Bucket(node) {
                        return;
                    }
                }
                {
                    let n = &mut self.buckets[node];
                    n.ty = ty - 1;
                    n.path = from as u8;
                }
                for i in from..from + window {
                    self.branches[parent].children[i] = Slot::Bucket(node);
                }
                #[cfg(debug_assertions)]
                self.debug_check_branch(parent);
                self.merge_down(node);
            }
        }
    }
}
