//! Compact prefix trie over byte keys.
//!
//! The trie branches on fixed-width bit groups (*chunks*) of a virtual
//! encoding, a 16-bit length prefix followed by the key bytes, and batches
//! key suffixes (*residues*) into packed buckets of siblings that share a
//! path. Buckets split as they fill and merge back as they drain, so the
//! tree only grows structure where the key population is dense.
//!
//! Three front types cover the common configurations:
//!
//! - [`Set`]: membership only.
//! - [`StableSet`]: membership plus a stable entry id per key, with
//!   [`unpack`](PTrie::unpack) to reconstruct keys from ids.
//! - [`Map`]: a `StableSet` with a value attached to every entry.
//!
//! All three are aliases of [`PTrie`], which exposes the tuning knobs as
//! const generics: chunk width `BSIZE` (2, 4 or 8 bits), the inline/heap
//! body threshold `HEAPBOUND`, the bucket capacity `SPLITBOUND`, and the
//! entry-table slab size `ALLOCSIZE`.
//!
//! Single-threaded by design: mutation goes through `&mut self` and there is
//! no interior locking.

mod bucket;
mod chunks;
mod entries;
mod error;
mod iter;
mod merge;
mod node;
mod split;
#[cfg(test)]
mod test_utils;

use std::cmp::Ordering;

use crate::bucket::{Bucket, decode_handle, encode_handle};
use crate::chunks::{KeyView, MAX_KEY_LEN, PTR_BYTES, pack_chunks};
use crate::entries::EntryTable;
use crate::node::{Arena, Branch, BucketNode, NodeIdx, Slot};
use smallvec::SmallVec;

pub use crate::error::TrieError;
pub use crate::iter::TrieIterator;

/// Entry id returned where no entry table exists or no entry was found.
pub const NO_ENTRY: usize = usize::MAX;

/// Membership-only trie with the canonical configuration.
pub type Set = PTrie;

/// Trie handing out a stable entry id per inserted key.
pub type StableSet = PTrie<(), true>;

/// Trie associating a value with every entry.
pub type Map<T> = PTrie<T, true>;

pub struct PTrie<
    T = (),
    const HAS_ENTRIES: bool = false,
    const BSIZE: u8 = 8,
    const HEAPBOUND: u16 = 17,
    const SPLITBOUND: u16 = 129,
    const ALLOCSIZE: usize = 65536,
> {
    pub(crate) branches: Arena<Branch>,
    pub(crate) buckets: Arena<BucketNode>,
    pub(crate) heap: Arena<Box<[u8]>>,
    pub(crate) entries: EntryTable<T>,
    pub(crate) root: NodeIdx,
    pub(crate) len: usize,
}

impl<
    T: Clone,
    const HAS_ENTRIES: bool,
    const BSIZE: u8,
    const HEAPBOUND: u16,
    const SPLITBOUND: u16,
    const ALLOCSIZE: usize,
> Clone for PTrie<T, HAS_ENTRIES, BSIZE, HEAPBOUND, SPLITBOUND, ALLOCSIZE>
{
    /// Deep copy. Nodes and heap blocks are arena-indexed, so cloning the
    /// arenas reproduces the whole graph with every internal reference and
    /// entry id intact.
    fn clone(&self) -> Self {
        Self {
            branches: self.branches.clone(),
            buckets: self.buckets.clone(),
            heap: self.heap.clone(),
            entries: self.entries.clone(),
            root: self.root,
            len: self.len,
        }
    }
}

impl<
    T,
    const HAS_ENTRIES: bool,
    const BSIZE: u8,
    const HEAPBOUND: u16,
    const SPLITBOUND: u16,
    const ALLOCSIZE: usize,
> Default for PTrie<T, HAS_ENTRIES, BSIZE, HEAPBOUND, SPLITBOUND, ALLOCSIZE>
{
    fn default() -> Self {
        Self::new()
    }
}

impl<
    T,
    const HAS_ENTRIES: bool,
    const BSIZE: u8,
    const HEAPBOUND: u16,
    const SPLITBOUND: u16,
    const ALLOCSIZE: usize,
> PTrie<T, HAS_ENTRIES, BSIZE, HEAPBOUND, SPLITBOUND, ALLOCSIZE>
{
    /// Fanout of a branch node.
    pub(crate) const WIDTH: usize = 1 << BSIZE;
    /// Chunks per virtual byte.
    pub(crate) const BDIV: usize = (8 / BSIZE) as usize;

    const PARAMS_OK: () = {
        assert!(BSIZE == 2 || BSIZE == 4 || BSIZE == 8, "BSIZE must be 2, 4 or 8");
        assert!(SPLITBOUND >= 6, "SPLITBOUND must be at least 6");
        assert!(HEAPBOUND as usize > PTR_BYTES, "HEAPBOUND must exceed the handle size");
        assert!(ALLOCSIZE > 0, "ALLOCSIZE must be positive");
    };

    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::PARAMS_OK;
        let mut branches = Arena::new();
        let root = branches.insert(Branch::new(Self::WIDTH, 0, None));
        Self {
            branches,
            buckets: Arena::new(),
            heap: Arena::new(),
            entries: EntryTable::new(ALLOCSIZE),
            root,
            len: 0,
        }
    }

    /// Live entry count.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drop every entry and reset to the freshly-built state. Entry ids from
    /// before the reset are forgotten, exactly as on a new trie.
    pub fn clear(&mut self) {
        let mut branches = Arena::new();
        let root = branches.insert(Branch::new(Self::WIDTH, 0, None));
        self.branches = branches;
        self.buckets = Arena::new();
        self.heap = Arena::new();
        self.entries = EntryTable::new(ALLOCSIZE);
        self.root = root;
        self.len = 0;
    }

    /// Stored size of a body of `blen` bytes: heap-escaped bodies occupy a
    /// handle instead.
    pub(crate) const fn bytes(blen: usize) -> usize {
        if blen >= HEAPBOUND as usize { PTR_BYTES } else { blen }
    }

    /// Virtual byte index a bucket at chunk `depth` sits in.
    pub(crate) const fn byte_of(depth: usize) -> usize {
        depth / Self::BDIV
    }

    /// Mask of chunk bit `bit`, counting from the most significant.
    pub(crate) const fn mask(bit: u8) -> u8 {
        1u8 << (BSIZE - 1 - bit)
    }

    /// Full key length of a residue with the given `first` word, in a bucket
    /// at virtual byte `byte`; `prefix` carries the path-determined first
    /// two virtual bytes (only the bits the path has actually consumed are
    /// read).
    pub(crate) fn residue_key_len(first: u16, byte: usize, prefix: [u8; 2]) -> u16 {
        match byte {
            0 => first,
            1 => u16::from_be_bytes([prefix[0], (first >> 8) as u8]),
            _ => u16::from_be_bytes(prefix),
        }
    }

    /// Body length of a residue at virtual byte `byte`.
    pub(crate) fn residue_body_len(first: u16, byte: usize, prefix: [u8; 2]) -> usize {
        (Self::residue_key_len(first, byte, prefix) as usize).saturating_sub(byte)
    }

    /// Chunk level of `branch` and the first two virtual bytes its path
    /// determines (zero-filled when shallower than two bytes).
    pub(crate) fn branch_level(&self, branch: NodeIdx) -> (usize, [u8; 2]) {
        let mut path = SmallVec::<[u8; 32]>::new();
        let mut cur = branch;
        while let Some(parent) = self.branches[cur].parent {
            path.push(self.branches[cur].path);
            cur = parent;
        }
        path.reverse();
        let packed = pack_chunks(&path, BSIZE);
        let mut prefix = [0u8; 2];
        if !packed.is_empty() {
            prefix[0] = packed[0];
        }
        if packed.len() > 1 {
            prefix[1] = packed[1];
        }
        (path.len(), prefix)
    }

    /// Descend from the root following the key's chunks until the child is
    /// not a branch. Returns the last branch, its chunk depth, and the slot
    /// the key resolves to there.
    pub(crate) fn fast_forward(&self, kv: &KeyView) -> (NodeIdx, usize, Slot) {
        let mut branch = self.root;
        let mut depth = 0usize;
        loop {
            let chunk = kv.chunk(depth, BSIZE) as usize;
            match self.branches[branch].children[chunk] {
                Slot::Branch(next) => {
                    branch = next;
                    depth += 1;
                }
                slot => return (branch, depth, slot),
            }
        }
    }

    /// Ordered scan of a bucket for the key. Returns whether it was found
    /// and the index it occupies or would be inserted at.
    pub(crate) fn bucket_search(&self, kv: &KeyView, node: NodeIdx, depth: usize) -> (bool, usize) {
        let byte = Self::byte_of(depth);
        let target_first = kv.first_word(byte);
        let target_body = kv.body(byte);
        let prefix = kv.len().to_be_bytes();
        let n = &self.buckets[node];
        let mut offset = 0usize;
        let mut index = 0usize;
        while index < n.count {
            let f = n.bucket.first(index);
            if f >= target_first {
                break;
            }
            offset += Self::bytes(Self::residue_body_len(f, byte, prefix));
            index += 1;
        }
        let data = n.bucket.data(n.count, HAS_ENTRIES);
        while index < n.count {
            let f = n.bucket.first(index);
            if f > target_first {
                break;
            }
            // equal first words imply equal body lengths
            let blen = Self::residue_body_len(f, byte, prefix);
            let stored: &[u8] = if blen >= HEAPBOUND as usize {
                &self.heap[decode_handle(&data[offset..offset + PTR_BYTES])]
            } else {
                &data[offset..offset + blen]
            };
            match stored.cmp(&target_body) {
                Ordering::Equal => return (true, index),
                Ordering::Greater => return (false, index),
                Ordering::Less => {
                    offset += Self::bytes(blen);
                    index += 1;
                }
            }
        }
        (false, index)
    }

    /// Look a key up without modifying the trie. The id is the stable entry
    /// id on entry-tracking variants and [`NO_ENTRY`] otherwise.
    pub fn exists(&self, key: &[u8]) -> Result<(bool, usize), TrieError> {
        if key.len() > MAX_KEY_LEN {
            return Err(TrieError::KeyTooLong(key.len()));
        }
        let kv = KeyView::new(key);
        let (_, depth, slot) = self.fast_forward(&kv);
        let Slot::Bucket(node) = slot else {
            return Ok((false, NO_ENTRY));
        };
        let (found, index) = self.bucket_search(&kv, node, depth);
        let id = if found && HAS_ENTRIES {
            let n = &self.buckets[node];
            n.bucket.entry_id(n.count, index) as usize
        } else {
            NO_ENTRY
        };
        Ok((found, id))
    }

    /// Insert a key. Returns `(false, existing_id)` when it is already
    /// present, `(true, fresh_id)` otherwise.
    pub fn insert(&mut self, key: &[u8]) -> Result<(bool, usize), TrieError>
    where
        T: Default,
    {
        if key.len() > MAX_KEY_LEN {
            return Err(TrieError::KeyTooLong(key.len()));
        }
        let kv = KeyView::new(key);
        let (parent, depth, slot) = self.fast_forward(&kv);
        let (node, index) = match slot {
            Slot::Bucket(node) => {
                let (found, index) = self.bucket_search(&kv, node, depth);
                if found {
                    let id = if HAS_ENTRIES {
                        let n = &self.buckets[node];
                        n.bucket.entry_id(n.count, index) as usize
                    } else {
                        NO_ENTRY
                    };
                    return Ok((false, id));
                }
                (node, index)
            }
            _ => (self.attach_bucket(parent, kv.chunk(depth, BSIZE)), 0),
        };

        let byte = Self::byte_of(depth);
        let first = kv.first_word(byte);
        let body = kv.body(byte);
        let prefix = kv.len().to_be_bytes();

        // data offset of the insertion point
        let at = {
            let n = &self.buckets[node];
            if byte >= 2 {
                index * Self::bytes(body.len())
            } else {
                let mut off = 0;
                for i in 0..index {
                    off += Self::bytes(Self::residue_body_len(n.bucket.first(i), byte, prefix));
                }
                off
            }
        };

        let mut slot_buf = SmallVec::<[u8; 16]>::new();
        if body.len() >= HEAPBOUND as usize {
            let handle = self.heap.insert(body.to_vec().into_boxed_slice());
            slot_buf.extend_from_slice(&encode_handle(handle));
        } else {
            slot_buf.extend_from_slice(body);
        }

        let id = if HAS_ENTRIES {
            self.entries.next(node, T::default())
        } else {
            NO_ENTRY
        };

        let count = {
            let n = &mut self.buckets[node];
            n.bucket = n
                .bucket
                .insert_slot(n.count, HAS_ENTRIES, index, at, &slot_buf, first, id as u64);
            n.count += 1;
            n.totsize += slot_buf.len();
            n.count
        };
        self.len += 1;

        if count >= SPLITBOUND as usize {
            self.split_node(node, depth, kv.len());
        }

        #[cfg(debug_assertions)]
        self.debug_check_branch(self.buckets[node].parent);
        debug_assert!(self.exists(key).map(|r| r.0).unwrap_or(false));
        Ok((true, id))
    }

    /// Hang a fresh empty bucket under `parent` for `chunk`, covering the
    /// widest run of empty sibling slots around it.
    fn attach_bucket(&mut self, parent: NodeIdx, chunk: u8) -> NodeIdx {
        let mut lo = chunk;
        let mut hi = chunk;
        let mut bit = BSIZE;
        while bit > 0 {
            let mask = Self::mask(bit - 1);
            let nlo = lo & !mask;
            let nhi = hi | mask;
            let all_empty = (nlo..=nhi)
                .all(|i| matches!(self.branches[parent].children[i as usize], Slot::Empty));
            if !all_empty {
                break;
            }
            lo = nlo;
            hi = nhi;
            bit -= 1;
        }
        let node = self.buckets.insert(BucketNode {
            path: lo,
            ty: bit,
            parent,
            count: 0,
            totsize: 0,
            bucket: Bucket::empty(),
        });
        for i in lo..=hi {
            self.branches[parent].children[i as usize] = Slot::Bucket(node);
        }
        node
    }

    /// Structural self-check of one bucket: linkage, covered window, residue
    /// ordering, size accounting, and entry back-pointers.
    #[cfg(debug_assertions)]
    pub(crate) fn debug_check_bucket(&self, node: NodeIdx) {
        let n = &self.buckets[node];
        let (level, prefix) = self.branch_level(n.parent);
        let byte = Self::byte_of(level);
        assert!(n.ty <= BSIZE);
        assert!(n.count < SPLITBOUND as usize);
        let window = Self::WIDTH >> n.ty;
        let base = n.path as usize;
        assert_eq!(base & (window - 1), 0, "bucket window must be aligned");
        for slot in base..base + window {
            assert_eq!(self.branches[n.parent].children[slot], Slot::Bucket(node));
        }
        let data = n.bucket.data(n.count, HAS_ENTRIES);
        let mut off = 0usize;
        let mut prev: Option<(u16, &[u8])> = None;
        for i in 0..n.count {
            let f = n.bucket.first(i);
            let blen = Self::residue_body_len(f, byte, prefix);
            let body: &[u8] = if blen >= HEAPBOUND as usize {
                &self.heap[decode_handle(&data[off..off + PTR_BYTES])]
            } else {
                &data[off..off + blen]
            };
            if let Some(previous) = prev {
                assert!(previous < (f, body), "residues must be strictly ordered");
            }
            if HAS_ENTRIES {
                let id = n.bucket.entry_id(n.count, i) as usize;
                let back = self.entries.get(id).and_then(|entry| entry.node);
                assert_eq!(back, Some(node), "entry back-pointer must match");
            }
            off += Self::bytes(blen);
            prev = Some((f, body));
        }
        assert_eq!(off, n.totsize, "totsize must match the stored bodies");
        assert_eq!(data.len(), n.totsize);
    }

    /// Structural self-check of a branch and every bucket directly below it,
    /// run after each structural change in debug builds.
    #[cfg(debug_assertions)]
    pub(crate) fn debug_check_branch(&self, branch: NodeIdx) {
        let b = &self.branches[branch];
        if let Some(parent) = b.parent {
            assert_eq!(
                self.branches[parent].children[b.path as usize],
                Slot::Branch(branch)
            );
        }
        let mut i = 0usize;
        while i < Self::WIDTH {
            match b.children[i] {
                Slot::Empty => i += 1,
                Slot::Branch(child) => {
                    assert_eq!(self.branches[child].parent, Some(branch));
                    assert_eq!(self.branches[child].path as usize, i);
                    i += 1;
                }
                Slot::Bucket(node) => {
                    assert_eq!(self.buckets[node].parent, branch);
                    assert_eq!(self.buckets[node].path as usize, i);
                    self.debug_check_bucket(node);
                    i += Self::WIDTH >> self.buckets[node].ty;
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn check_consistency(&self) {
        let mut residues = 0usize;
        let mut stack = vec![self.root];
        while let Some(branch) = stack.pop() {
            let (level, prefix) = self.branch_level(branch);
            let byte = Self::byte_of(level);
            let mut i = 0usize;
            while i < Self::WIDTH {
                match self.branches[branch].children[i] {
                    Slot::Empty => i += 1,
                    Slot::Branch(child) => {
                        assert_eq!(self.branches[child].parent, Some(branch));
                        assert_eq!(self.branches[child].path as usize, i);
                        stack.push(child);
                        i += 1;
                    }
                    Slot::Bucket(b) => {
                        let n = &self.buckets[b];
                        assert_eq!(n.parent, branch);
                        assert!(n.ty <= BSIZE);
                        let window = Self::WIDTH >> n.ty;
                        assert_eq!(n.path as usize, i, "bucket window must start at its path");
                        for w in 0..window {
                            assert_eq!(
                                self.branches[branch].children[i + w],
                                Slot::Bucket(b),
                                "bucket must cover its whole window"
                            );
                        }
                        assert!(n.count < SPLITBOUND as usize);
                        let data = n.bucket.data(n.count, HAS_ENTRIES);
                        let mut off = 0usize;
                        let mut prev: Option<(u16, Vec<u8>)> = None;
                        for r in 0..n.count {
                            let f = n.bucket.first(r);
                            let blen = Self::residue_body_len(f, byte, prefix);
                            let body: Vec<u8> = if blen >= HEAPBOUND as usize {
                                self.heap[decode_handle(&data[off..off + PTR_BYTES])].to_vec()
                            } else {
                                data[off..off + blen].to_vec()
                            };
                            if let Some((pf, pb)) = &prev {
                                assert!(
                                    (*pf, pb.as_slice()) < (f, body.as_slice()),
                                    "residues must be strictly ordered"
                                );
                            }
                            if HAS_ENTRIES {
                                let id = n.bucket.entry_id(n.count, r) as usize;
                                let entry = self.entries.get(id).unwrap();
                                assert_eq!(entry.node, Some(b), "entry back-pointer must match");
                            }
                            off += Self::bytes(blen);
                            prev = Some((f, body));
                        }
                        assert_eq!(off, n.totsize, "totsize must match the stored bodies");
                        assert_eq!(data.len(), n.totsize);
                        residues += n.count;
                        i += window;
                    }
                }
            }
        }
        assert_eq!(residues, self.len, "live count must match stored residues");
    }
}

impl<T, const BSIZE: u8, const HEAPBOUND: u16, const SPLITBOUND: u16, const ALLOCSIZE: usize>
    PTrie<T, true, BSIZE, HEAPBOUND, SPLITBOUND, ALLOCSIZE>
{
    /// Reconstruct the key behind a live entry id.
    pub fn unpack(&self, id: usize) -> Result<Vec<u8>, TrieError> {
        let node = self
            .entries
            .get(id)
            .and_then(|entry| entry.node)
            .ok_or(TrieError::StaleEntry(id))?;
        let n = &self.buckets[node];
        let index = (0..n.count)
            .find(|&i| n.bucket.entry_id(n.count, i) as usize == id)
            .ok_or(TrieError::StaleEntry(id))?;
        Ok(self.unpack_at(node, index))
    }

    /// Reconstruct the key behind a live entry id into `dest`, returning its
    /// length.
    pub fn unpack_into(&self, id: usize, dest: &mut Vec<u8>) -> Result<usize, TrieError> {
        let key = self.unpack(id)?;
        dest.clear();
        dest.extend_from_slice(&key);
        Ok(key.len())
    }

    /// Value attached to a live entry id.
    pub fn get_data(&self, id: usize) -> Result<&T, TrieError> {
        self.entries
            .get(id)
            .filter(|entry| entry.node.is_some())
            .map(|entry| &entry.data)
            .ok_or(TrieError::StaleEntry(id))
    }

    pub fn get_data_mut(&mut self, id: usize) -> Result<&mut T, TrieError> {
        self.entries
            .get_mut(id)
            .filter(|entry| entry.node.is_some())
            .map(|entry| &mut entry.data)
            .ok_or(TrieError::StaleEntry(id))
    }

    /// Value for `key`, inserting a default entry when absent.
    pub fn entry(&mut self, key: &[u8]) -> Result<&mut T, TrieError>
    where
        T: Default,
    {
        let (_, id) = self.insert(key)?;
        self.get_data_mut(id)
    }
}

#[cfg(test)]
mod test;
