use crate::primitives::hash::Hash;

/// Merkle root over an ordered list of leaf hashes.
///
/// An empty list yields the zero hash and a single leaf is its own root.
/// An odd node at any level is paired with itself.
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return Hash::ZERO;
    }
    let mut level: Vec<Hash> = leaves.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let left = pair[0];
                let right = pair.get(1).copied().unwrap_or(left);
                hash_pair(&left, &right)
            })
            .collect();
    }
    level[0]
}

pub fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut data = Vec::with_capacity(64);
    data.extend_from_slice(left.as_bytes());
    data.extend_from_slice(right.as_bytes());
    Hash::sha256(&data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_and_single() {
        assert!(merkle_root(&[]).is_zero());
        let h = Hash::sha256(b"a");
        assert_eq!(merkle_root(&[h]), h);
    }

    #[test]
    fn test_pair_and_odd_tail() {
        let a = Hash::sha256(b"a");
        let b = Hash::sha256(b"b");
        let c = Hash::sha256(b"c");
        assert_eq!(merkle_root(&[a, b]), hash_pair(&a, &b));
        let expected = hash_pair(&hash_pair(&a, &b), &hash_pair(&c, &c));
        assert_eq!(merkle_root(&[a, b, c]), expected);
    }

    #[test]
    fn test_order_matters() {
        let a = Hash::sha256(b"a");
        let b = Hash::sha256(b"b");
        assert_ne!(merkle_root(&[a, b]), merkle_root(&[b, a]));
    }
}
