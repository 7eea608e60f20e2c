//! Split protocols.
//!
//! A bucket that reaches `SPLITBOUND` residues is divided. While it still
//! covers more than one slot of its parent, a *regular split* fixes one more
//! chunk bit: the low half stays, the high half moves to a sibling bucket.
//! Once it covers exactly one slot, a *forward split* replaces it with a new
//! branch node consuming the next chunk; when that chunk completes a virtual
//! byte, every residue shifts one byte from its body into its `first` word.

use crate::PTrie;
use crate::bucket::{self, decode_handle, encode_handle};
use crate::chunks::PTR_BYTES;
use crate::node::{Branch, BucketNode, NodeIdx, Slot};

impl<
    T,
    const HAS_ENTRIES: bool,
    const BSIZE: u8,
    const HEAPBOUND: u16,
    const SPLITBOUND: u16,
    const ALLOCSIZE: usize,
> PTrie<T, HAS_ENTRIES, BSIZE, HEAPBOUND, SPLITBOUND, ALLOCSIZE>
{
    /// Split `node` at chunk `depth`. `key_len` is the length of the key
    /// whose insert triggered the split; every residue shares its length
    /// prefix bits as far as the path has consumed them.
    pub(crate) fn split_node(&mut self, node: NodeIdx, depth: usize, key_len: u16) {
        let (count, ty, path, parent, totsize) = {
            let n = &self.buckets[node];
            (n.count, n.ty, n.path, n.parent, n.totsize)
        };
        if ty == BSIZE {
            return self.split_fwd(node, depth, key_len);
        }

        let byte = Self::byte_of(depth);
        let prefix = key_len.to_be_bytes();
        let shift = BSIZE as usize * (Self::BDIV - 1 - depth % Self::BDIV);
        let mask = Self::mask(ty);

        // residues are first-ordered, so the low side is a prefix
        let mut lcnt = count;
        let mut lsize = 0usize;
        for i in 0..count {
            let f = self.buckets[node].bucket.first(i);
            let chunk = ((f >> 8) as u8 >> shift) & ((Self::WIDTH - 1) as u8);
            if chunk & mask != 0 {
                lcnt = i;
                break;
            }
            lsize += Self::bytes(Self::residue_body_len(f, byte, prefix));
        }
        let hcnt = count - lcnt;
        let hpath = path | mask;
        let dist = (hpath - path) as usize;

        if lcnt == 0 {
            for i in (path as usize)..(hpath as usize) {
                self.branches[parent].children[i] = Slot::Empty;
            }
            let n = &mut self.buckets[node];
            n.path = hpath;
            n.ty += 1;
            return self.split_node(node, depth, key_len);
        }
        if hcnt == 0 {
            for i in (hpath as usize)..(hpath as usize + dist) {
                self.branches[parent].children[i] = Slot::Empty;
            }
            self.buckets[node].ty += 1;
            return self.split_node(node, depth, key_len);
        }

        let old = std::mem::take(&mut self.buckets[node].bucket);
        let (low, high) = old.split_at(count, HAS_ENTRIES, lcnt, lsize);
        {
            let n = &mut self.buckets[node];
            n.bucket = low;
            n.count = lcnt;
            n.totsize = lsize;
            n.ty += 1;
        }
        let hnode = self.buckets.insert(BucketNode {
            path: hpath,
            ty: ty + 1,
            parent,
            count: hcnt,
            totsize: totsize - lsize,
            bucket: high,
        });
        for i in (hpath as usize)..(hpath as usize + dist) {
            self.branches[parent].children[i] = Slot::Bucket(hnode);
        }
        if HAS_ENTRIES {
            let ids: Vec<u64> = {
                let n = &self.buckets[hnode];
                (0..hcnt).map(|i| n.bucket.entry_id(hcnt, i)).collect()
            };
            for id in ids {
                self.entries.set_node(id as usize, Some(hnode));
            }
        }

        if lcnt >= SPLITBOUND as usize {
            self.split_node(node, depth, key_len);
        }
        if hcnt >= SPLITBOUND as usize {
            self.split_node(hnode, depth, key_len);
        }
        #[cfg(debug_assertions)]
        self.debug_check_branch(parent);
    }

    /// Replace a single-slot bucket with a branch node routing on the next
    /// chunk, partitioning its residues between the branch's two halves.
    fn split_fwd(&mut self, node: NodeIdx, depth: usize, key_len: u16) {
        let ndepth = depth + 1;
        let byte = Self::byte_of(depth);
        let nbyte = Self::byte_of(ndepth);
        // past the length prefix every residue has the same length; nothing
        // is left to route on beyond the end of the virtual encoding
        if byte >= 2 && ndepth >= (key_len as usize + 2) * Self::BDIV {
            return;
        }
        let to_cut = nbyte - byte;
        let prefix = key_len.to_be_bytes();
        let (count, path, parent) = {
            let n = &self.buckets[node];
            (n.count, n.path, n.parent)
        };

        let fwd = self.branches.insert(Branch::new(Self::WIDTH, path, Some(parent)));
        self.branches[parent].children[path as usize] = Slot::Branch(fwd);

        let shift = BSIZE as usize * (Self::BDIV - 1 - ndepth % Self::BDIV);
        let top = Self::mask(0);
        let old = std::mem::take(&mut self.buckets[node].bucket);

        let mut lcnt = count;
        for i in 0..count {
            let f = old.first(i);
            let vbyte = if to_cut == 0 { (f >> 8) as u8 } else { f as u8 };
            let chunk = (vbyte >> shift) & ((Self::WIDTH - 1) as u8);
            if chunk & top != 0 {
                lcnt = i;
                break;
            }
        }
        let hcnt = count - lcnt;

        // shift every residue across the consumed chunk
        let mut firsts = Vec::with_capacity(count);
        let mut slots: Vec<Vec<u8>> = Vec::with_capacity(count);
        let old_data = old.data(count, HAS_ENTRIES);
        let mut off = 0usize;
        for i in 0..count {
            let f = old.first(i);
            let len = Self::residue_key_len(f, byte, prefix) as usize;
            let blen = len.saturating_sub(byte);
            let nblen = len.saturating_sub(nbyte);
            let mut slot = Vec::new();
            if to_cut == 0 {
                firsts.push(f);
                slot.extend_from_slice(&old_data[off..off + Self::bytes(blen)]);
            } else {
                // the completed byte moves into the first word
                let (lead, rest): (u8, Vec<u8>) = if blen >= HEAPBOUND as usize {
                    let handle = decode_handle(&old_data[off..off + PTR_BYTES]);
                    let block = self.heap.remove(handle);
                    (block[0], block[1..].to_vec())
                } else if blen > 0 {
                    (old_data[off], old_data[off + 1..off + blen].to_vec())
                } else {
                    (0, Vec::new())
                };
                debug_assert_eq!(rest.len(), nblen);
                firsts.push((f << 8) | lead as u16);
                if nblen >= HEAPBOUND as usize {
                    let handle = self.heap.insert(rest.into_boxed_slice());
                    slot.extend_from_slice(&encode_handle(handle));
                } else {
                    slot.extend_from_slice(&rest);
                }
            }
            off += Self::bytes(blen);
            debug_assert!(firsts.len() < 2 || firsts[firsts.len() - 2] <= firsts[firsts.len() - 1]);
            slots.push(slot);
        }
        let ids: Vec<u64> = if HAS_ENTRIES {
            (0..count).map(|i| old.entry_id(count, i)).collect()
        } else {
            Vec::new()
        };

        let half = Self::WIDTH / 2;
        if hcnt == 0 {
            let (b, dsize) = bucket::pack(&firsts, &ids, &slots, HAS_ENTRIES);
            {
                let n = &mut self.buckets[node];
                n.bucket = b;
                n.totsize = dsize;
                n.parent = fwd;
                n.path = 0;
                n.ty = 1;
            }
            for i in 0..half {
                self.branches[fwd].children[i] = Slot::Bucket(node);
            }
            self.split_node(node, ndepth, key_len);
            #[cfg(debug_assertions)]
            self.debug_check_branch(fwd);
        } else if lcnt == 0 {
            let (b, dsize) = bucket::pack(&firsts, &ids, &slots, HAS_ENTRIES);
            {
                let n = &mut self.buckets[node];
                n.bucket = b;
                n.totsize = dsize;
                n.parent = fwd;
                n.path = half as u8;
                n.ty = 1;
            }
            for i in half..Self::WIDTH {
                self.branches[fwd].children[i] = Slot::Bucket(node);
            }
            self.split_node(node, ndepth, key_len);
            #[cfg(debug_assertions)]
            self.debug_check_branch(fwd);
        } else {
            let (lb, lsize) = bucket::pack(&firsts[..lcnt], &ids[..ids.len().min(lcnt)], &slots[..lcnt], HAS_ENTRIES);
            let (hb, hsize) = bucket::pack(
                &firsts[lcnt..],
                if HAS_ENTRIES { &ids[lcnt..] } else { &[] },
                &slots[lcnt..],
                HAS_ENTRIES,
            );
            let lnode = self.buckets.insert(BucketNode {
                path: 0,
                ty: 1,
                parent: fwd,
                count: lcnt,
                totsize: lsize,
                bucket: lb,
            });
            {
                let n = &mut self.buckets[node];
                n.bucket = hb;
                n.count = hcnt;
                n.totsize = hsize;
                n.parent = fwd;
                n.path = half as u8;
                n.ty = 1;
            }
            for i in 0..half {
                self.branches[fwd].children[i] = Slot::Bucket(lnode);
            }
            for i in half..Self::WIDTH {
                self.branches[fwd].children[i] = Slot::Bucket(node);
            }
            if HAS_ENTRIES {
                for id in &ids[..lcnt] {
                    self.entries.set_node(*id as usize, Some(lnode));
                }
            }
            #[cfg(debug_assertions)]
            self.debug_check_branch(fwd);
            tracing::trace!(depth = ndepth, low = lcnt, high = hcnt, "forward split");
        }
    }
}
