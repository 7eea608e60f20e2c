use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

/// `n` distinct random keys of `len` bytes from a deterministic seed.
pub(crate) fn seeded_keys(seed: u64, n: usize, len: usize) -> Vec<Vec<u8>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(n);
    while out.len() < n {
        let mut key = vec![0u8; len];
        rng.fill_bytes(&mut key);
        if seen.insert(key.clone()) {
            out.push(key);
        }
    }
    out
}

/// Deletion order alternating outward from the midpoint:
/// `mid, mid-1, mid+1, mid-2, mid+2, …` over `0..n`.
pub(crate) fn outward_order(n: usize) -> Vec<usize> {
    let mid = n / 2;
    let mut out = Vec::with_capacity(n);
    for step in 0..n {
        let idx = if step % 2 == 1 {
            mid - step.div_ceil(2)
        } else {
            mid + step / 2
        };
        out.push(idx);
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn seeded_keys_are_deterministic_and_distinct() {
        let a = seeded_keys(314, 100, 20);
        let b = seeded_keys(314, 100, 20);
        assert_eq!(a, b);
        let distinct: HashSet<_> = a.iter().collect();
        assert_eq!(distinct.len(), 100);
    }

    #[test]
    fn outward_order_is_a_permutation() {
        let order = outward_order(8);
        assert_eq!(order, vec![4, 3, 5, 2, 6, 1, 7, 0]);
        let mut sorted = outward_order(257);
        sorted.sort_unstable();
        assert_eq!(sorted, (0..257).collect::<Vec<_>>());
    }
}
