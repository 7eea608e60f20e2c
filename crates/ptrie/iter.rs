//! Ordered traversal and key reconstruction.
//!
//! The cursor walks buckets in child-slot order, one position per residue.
//! The order is deterministic for a given key population but is over the
//! virtual encoding, so it is not lexicographic over keys. Reconstruction
//! reassembles a key from the branch path above the bucket, the residue's
//! `first` word, and its stored body.

use crate::PTrie;
use crate::bucket::decode_handle;
use crate::chunks::{PTR_BYTES, pack_chunks};
use crate::node::{NodeIdx, Slot};
use smallvec::SmallVec;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Position {
    At(NodeIdx, usize),
    End,
}

/// Bidirectional cursor over the trie. Obtained from
/// [`begin`](PTrie::begin) or [`end`](PTrie::end); the forward direction
/// also implements [`Iterator`] over reconstructed keys.
pub struct TrieIterator<
    'a,
    T,
    const HAS_ENTRIES: bool,
    const BSIZE: u8,
    const HEAPBOUND: u16,
    const SPLITBOUND: u16,
    const ALLOCSIZE: usize,
> {
    trie: &'a PTrie<T, HAS_ENTRIES, BSIZE, HEAPBOUND, SPLITBOUND, ALLOCSIZE>,
    pos: Position,
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
    /// Cursor at the first entry (or at the end of an empty trie).
    pub fn begin(&self) -> TrieIterator<'_, T, HAS_ENTRIES, BSIZE, HEAPBOUND, SPLITBOUND, ALLOCSIZE> {
        let pos = match self.min_bucket_from(self.root, 0) {
            Some(node) => Position::At(node, 0),
            None => Position::End,
        };
        TrieIterator { trie: self, pos }
    }

    /// Past-the-end cursor; [`retreat`](TrieIterator::retreat) from here
    /// lands on the last entry.
    pub fn end(&self) -> TrieIterator<'_, T, HAS_ENTRIES, BSIZE, HEAPBOUND, SPLITBOUND, ALLOCSIZE> {
        TrieIterator {
            trie: self,
            pos: Position::End,
        }
    }

    /// Forward iterator over all keys.
    pub fn iter(&self) -> TrieIterator<'_, T, HAS_ENTRIES, BSIZE, HEAPBOUND, SPLITBOUND, ALLOCSIZE> {
        self.begin()
    }

    /// Leftmost populated bucket in the subtree of `branch`, scanning child
    /// slots from `start`.
    fn min_bucket_from(&self, branch: NodeIdx, start: usize) -> Option<NodeIdx> {
        let mut i = start;
        while i < Self::WIDTH {
            match self.branches[branch].children[i] {
                Slot::Empty => i += 1,
                Slot::Branch(child) => {
                    if let Some(found) = self.min_bucket_from(child, 0) {
                        return Some(found);
                    }
                    i += 1;
                }
                Slot::Bucket(node) => {
                    let n = &self.buckets[node];
                    if n.count > 0 {
                        return Some(node);
                    }
                    i = n.path as usize + (Self::WIDTH >> n.ty);
                }
            }
        }
        None
    }

    /// Rightmost populated bucket in the subtree of `branch`, scanning child
    /// slots below `end` (exclusive).
    fn max_bucket_from(&self, branch: NodeIdx, end: usize) -> Option<NodeIdx> {
        let mut i = end;
        while i > 0 {
            i -= 1;
            match self.branches[branch].children[i] {
                Slot::Empty => {}
                Slot::Branch(child) => {
                    if let Some(found) = self.max_bucket_from(child, Self::WIDTH) {
                        return Some(found);
                    }
                }
                Slot::Bucket(node) => {
                    let n = &self.buckets[node];
                    if n.count > 0 {
                        return Some(node);
                    }
                    i = n.path as usize;
                }
            }
        }
        None
    }

    fn next_bucket(&self, node: NodeIdx) -> Option<NodeIdx> {
        let n = &self.buckets[node];
        let mut branch = n.parent;
        let mut start = n.path as usize + (Self::WIDTH >> n.ty);
        loop {
            if let Some(found) = self.min_bucket_from(branch, start) {
                return Some(found);
            }
            start = self.branches[branch].path as usize + 1;
            branch = self.branches[branch].parent?;
        }
    }

    fn prev_bucket(&self, node: NodeIdx) -> Option<NodeIdx> {
        let n = &self.buckets[node];
        let mut branch = n.parent;
        let mut end = n.path as usize;
        loop {
            if let Some(found) = self.max_bucket_from(branch, end) {
                return Some(found);
            }
            end = self.branches[branch].path as usize;
            branch = self.branches[branch].parent?;
        }
    }

    /// Reconstruct the key stored at a bucket position from the branch path,
    /// the `first` word, and the body.
    pub(crate) fn unpack_at(&self, node: NodeIdx, index: usize) -> Vec<u8> {
        let n = &self.buckets[node];
        let mut chunks = SmallVec::<[u8; 64]>::new();
        let mut cur = n.parent;
        while let Some(parent) = self.branches[cur].parent {
            chunks.push(self.branches[cur].path);
            cur = parent;
        }
        chunks.reverse();
        let depth = chunks.len();
        let byte = Self::byte_of(depth);
        let packed = pack_chunks(&chunks, BSIZE);

        let first = n.bucket.first(index);
        let mut prefix = [0u8; 2];
        if !packed.is_empty() {
            prefix[0] = packed[0];
        }
        if packed.len() > 1 {
            prefix[1] = packed[1];
        }
        let len = Self::residue_key_len(first, byte, prefix) as usize;
        let vlen = len + 2;

        let mut virt = vec![0u8; vlen];
        let head = byte.min(vlen).min(packed.len());
        virt[..head].copy_from_slice(&packed[..head]);
        if byte < vlen {
            virt[byte] = (first >> 8) as u8;
        }
        if byte + 1 < vlen {
            virt[byte + 1] = first as u8;
        }
        let blen = len.saturating_sub(byte);
        if blen > 0 {
            let mut off = 0usize;
            for i in 0..index {
                off += Self::bytes(Self::residue_body_len(n.bucket.first(i), byte, prefix));
            }
            let data = n.bucket.data(n.count, HAS_ENTRIES);
            let body: &[u8] = if blen >= HEAPBOUND as usize {
                &self.heap[decode_handle(&data[off..off + PTR_BYTES])]
            } else {
                &data[off..off + blen]
            };
            virt[byte + 2..byte + 2 + blen].copy_from_slice(body);
        }
        // strip the length prefix
        virt.split_off(2)
    }
}

impl<
    T,
    const HAS_ENTRIES: bool,
    const BSIZE: u8,
    const HEAPBOUND: u16,
    const SPLITBOUND: u16,
    const ALLOCSIZE: usize,
> TrieIterator<'_, T, HAS_ENTRIES, BSIZE, HEAPBOUND, SPLITBOUND, ALLOCSIZE>
{
    pub fn is_end(&self) -> bool {
        self.pos == Position::End
    }

    /// Entry id at the cursor, on entry-tracking variants.
    pub fn index(&self) -> Option<usize> {
        match self.pos {
            Position::At(node, slot) if HAS_ENTRIES => {
                let n = &self.trie.buckets[node];
                Some(n.bucket.entry_id(n.count, slot) as usize)
            }
            _ => None,
        }
    }

    /// Reconstructed key at the cursor.
    pub fn key(&self) -> Option<Vec<u8>> {
        match self.pos {
            Position::At(node, slot) => Some(self.trie.unpack_at(node, slot)),
            Position::End => None,
        }
    }

    /// Move forward. Returns whether the cursor is on an entry afterwards.
    pub fn advance(&mut self) -> bool {
        match self.pos {
            Position::End => false,
            Position::At(node, slot) => {
                if slot + 1 < self.trie.buckets[node].count {
                    self.pos = Position::At(node, slot + 1);
                    return true;
                }
                match self.trie.next_bucket(node) {
                    Some(next) => {
                        self.pos = Position::At(next, 0);
                        true
                    }
                    None => {
                        self.pos = Position::End;
                        false
                    }
                }
            }
        }
    }

    /// Move backward. Returns whether the cursor moved; at the first entry
    /// it stays put.
    pub fn retreat(&mut self) -> bool {
        match self.pos {
            Position::End => match self
                .trie
                .max_bucket_from(self.trie.root, self.trie.branches[self.trie.root].children.len())
            {
                Some(node) => {
                    self.pos = Position::At(node, self.trie.buckets[node].count - 1);
                    true
                }
                None => false,
            },
            Position::At(node, slot) => {
                if slot > 0 {
                    self.pos = Position::At(node, slot - 1);
                    return true;
                }
                match self.trie.prev_bucket(node) {
                    Some(prev) => {
                        self.pos = Position::At(prev, self.trie.buckets[prev].count - 1);
                        true
                    }
                    None => false,
                }
            }
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
> Iterator for TrieIterator<'_, T, HAS_ENTRIES, BSIZE, HEAPBOUND, SPLITBOUND, ALLOCSIZE>
{
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        let key = self.key()?;
        self.advance();
        Some(key)
    }
}
