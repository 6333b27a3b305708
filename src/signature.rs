use std::cmp::Ordering;
use std::fmt;

use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use thiserror::Error;

use crate::codec::{self, ATOM_SEP, BIT_SEP, BOND_SEP, MORGAN_SEP, NEIG_SEP};
use crate::{extract, morgan_bits, Bond, Element, InvalidAtomError, MalformedSignatureError,
    MoleculeGraph};

#[derive(Error, Debug)]
#[error("neighbors were never computed for this signature")]
pub struct NeighborsNotComputedError;

/// Errors raised while building or expanding signatures.
#[derive(Error, Debug)]
pub enum SignatureError {
    #[error(transparent)]
    InvalidAtom(#[from] InvalidAtomError),
    #[error(transparent)]
    Malformed(#[from] MalformedSignatureError),
    #[error(transparent)]
    NeighborsNotComputed(#[from] NeighborsNotComputedError),
}

/// Canonical signature of one atom.
///
/// `morgans` holds the fingerprint bit of the atom's environment at every
/// radius level, root first. `root` is the canonical rendering of the
/// full-radius environment. `root_minus` and `neighbors` stay unset until
/// [`AtomSignature::expand_neighbors`] computes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomSignature {
    morgans: Vec<u32>,
    root: String,
    root_minus: Option<String>,
    neighbors: Option<Vec<(Bond, String)>>,
}

impl AtomSignature {
    /// Build the unexpanded signature of an environment.
    pub fn from_environment(env: &crate::Environment, morgans: Vec<u32>) -> Self {
        AtomSignature {
            morgans,
            root: codec::render(env),
            root_minus: None,
            neighbors: None,
        }
    }

    pub fn morgans(&self) -> &[u32] {
        &self.morgans
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn root_minus(&self) -> Option<&str> {
        self.root_minus.as_deref()
    }

    pub fn neighbors(&self) -> Option<&[(Bond, String)]> {
        self.neighbors.as_deref()
    }

    /// Serialize. With `include_neighbors` the expanded form
    /// `bits ## root && TAG <> sig ...` is emitted; requesting it before
    /// [`AtomSignature::expand_neighbors`] ran is an error.
    pub fn to_string(&self, include_neighbors: bool) -> Result<String, NeighborsNotComputedError> {
        let mut s = self
            .morgans
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join(BIT_SEP);
        s.push_str(MORGAN_SEP);
        s.push_str(&self.root);
        if include_neighbors {
            let neighbors = self.neighbors.as_ref().ok_or(NeighborsNotComputedError)?;
            for (bond, sig) in neighbors {
                s.push_str(NEIG_SEP);
                s.push_str(bond.tag());
                s.push_str(BOND_SEP);
                s.push_str(sig);
            }
        }
        Ok(s)
    }

    /// Parse either serialized form back into a signature.
    pub fn from_string(signature: &str) -> Result<Self, MalformedSignatureError> {
        let (bits, remaining) = signature
            .split_once(MORGAN_SEP)
            .ok_or_else(|| MalformedSignatureError(format!(
                "{signature:?}: missing '{MORGAN_SEP}' separator"
            )))?;
        let morgans = bits
            .split(BIT_SEP)
            .map(|b| {
                b.parse::<u32>().map_err(|_| {
                    MalformedSignatureError(format!("{signature:?}: bad bit identifier {b:?}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut parts = remaining.split(NEIG_SEP);
        let root = parts.next().expect("split yields at least one part");
        codec::parse(root)?;

        let mut neighbors = Vec::new();
        let mut expanded = false;
        for part in parts {
            expanded = true;
            let (tag, sig) = part.split_once(BOND_SEP).ok_or_else(|| {
                MalformedSignatureError(format!(
                    "{signature:?}: neighbor entry {part:?} lacks '{BOND_SEP}'"
                ))
            })?;
            let bond = Bond::from_tag(tag).ok_or_else(|| {
                MalformedSignatureError(format!("{signature:?}: unknown bond tag {tag:?}"))
            })?;
            codec::parse(sig)?;
            neighbors.push((bond, sig.to_string()));
        }

        let root_minus = if expanded {
            Some(derive_root_minus(root, &morgans)?)
        } else {
            None
        };
        Ok(AtomSignature {
            morgans,
            root: root.to_string(),
            root_minus,
            neighbors: if expanded { Some(neighbors) } else { None },
        })
    }

    /// Return a copy with `root_minus` and `neighbors` populated.
    ///
    /// For every bond incident to the root atom the expansion records the
    /// bond type and the root string of the neighboring atom's own
    /// signature, taken from `siblings` (one signature per graph node, in
    /// node order). One level deep, never recursive, and a pure function of
    /// the sibling set — expanding twice gives the same value.
    pub fn expand_neighbors(
        &self,
        graph: &MoleculeGraph,
        node: NodeIndex,
        siblings: &[AtomSignature],
    ) -> Result<AtomSignature, SignatureError> {
        if graph.node_weight(node).is_none() {
            return Err(InvalidAtomError::Dangling(node.index()).into());
        }
        let mut neighbors: Vec<(Bond, String)> = graph
            .edges(node)
            .map(|e| {
                let other = if e.source() == node {
                    e.target()
                } else {
                    e.source()
                };
                (e.weight().order, siblings[other.index()].root.clone())
            })
            .collect();
        neighbors.sort_by(|a, b| (a.0.tag(), &a.1).cmp(&(b.0.tag(), &b.1)));

        Ok(AtomSignature {
            morgans: self.morgans.clone(),
            root: self.root.clone(),
            root_minus: Some(derive_root_minus(&self.root, &self.morgans)?),
            neighbors: Some(neighbors),
        })
    }
}

/// The root environment rendered one radius level short. Derived from the
/// root string itself so serialized and freshly built signatures agree.
fn derive_root_minus(root: &str, morgans: &[u32]) -> Result<String, MalformedSignatureError> {
    let radius = morgans.len().saturating_sub(1);
    let mut env = codec::parse(root)?;
    env.levels.truncate(radius.saturating_sub(1));
    Ok(codec::render(&env))
}

impl Ord for AtomSignature {
    fn cmp(&self, other: &Self) -> Ordering {
        // Canonical order is textual: bond tags, not enum discriminants.
        let key = |s: &AtomSignature| {
            (
                s.morgans.clone(),
                s.root.clone(),
                s.root_minus.clone(),
                s.neighbors.as_ref().map(|ns| {
                    ns.iter()
                        .map(|(b, sig)| (b.tag(), sig.clone()))
                        .collect::<Vec<_>>()
                }),
            )
        };
        key(self).cmp(&key(other))
    }
}

impl PartialOrd for AtomSignature {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for AtomSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let include_neighbors = self.neighbors.is_some();
        match self.to_string(include_neighbors) {
            Ok(s) => write!(f, "{s}"),
            Err(_) => unreachable!("display only includes computed neighbors"),
        }
    }
}

/// Canonical signature of a whole molecule: the signatures of its heavy
/// atoms in ascending canonical order, so isomorphic molecules serialize
/// identically no matter how their atoms were numbered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoleculeSignature {
    atoms: Vec<AtomSignature>,
}

impl MoleculeSignature {
    /// Signature of every heavy atom at the given configuration.
    pub fn from_graph(
        graph: &MoleculeGraph,
        radius: usize,
        n_bits: u32,
        use_stereo: bool,
    ) -> Result<Self, SignatureError> {
        let atoms = Self::per_node(graph, radius, n_bits, use_stereo)?
            .into_iter()
            .filter_map(|(element, sig)| (element != Element::H).then_some(sig))
            .collect::<Vec<_>>();
        let mut sig = MoleculeSignature { atoms };
        sig.atoms.sort();
        Ok(sig)
    }

    /// Unsorted per-node signatures, element tagged, indexed by node.
    fn per_node(
        graph: &MoleculeGraph,
        radius: usize,
        n_bits: u32,
        use_stereo: bool,
    ) -> Result<Vec<(Element, AtomSignature)>, SignatureError> {
        let bits = morgan_bits(graph, radius, n_bits, use_stereo);
        let mut out = Vec::with_capacity(graph.node_count());
        for node in graph.node_indices() {
            let env = extract(graph, node, radius, use_stereo)?;
            out.push((
                graph[node].element,
                AtomSignature::from_environment(&env, bits[node.index()].clone()),
            ));
        }
        Ok(out)
    }

    /// Expand the neighbors of every atom signature against the full
    /// sibling set. Pure: returns a new value, and running it again yields
    /// the same result.
    pub fn post_compute_neighbors(
        &self,
        graph: &MoleculeGraph,
        radius: usize,
        n_bits: u32,
        use_stereo: bool,
    ) -> Result<Self, SignatureError> {
        let per_node = Self::per_node(graph, radius, n_bits, use_stereo)?;
        let siblings: Vec<AtomSignature> =
            per_node.iter().map(|(_, sig)| sig.clone()).collect();
        let mut atoms = Vec::with_capacity(per_node.len());
        for (index, (element, sig)) in per_node.iter().enumerate() {
            if *element == Element::H {
                continue;
            }
            atoms.push(sig.expand_neighbors(graph, NodeIndex::new(index), &siblings)?);
        }
        atoms.sort();
        Ok(MoleculeSignature { atoms })
    }

    pub fn atoms(&self) -> &[AtomSignature] {
        &self.atoms
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    /// One string per atom signature, in canonical order.
    pub fn to_strings(
        &self,
        include_neighbors: bool,
    ) -> Result<Vec<String>, NeighborsNotComputedError> {
        self.atoms
            .iter()
            .map(|a| a.to_string(include_neighbors))
            .collect()
    }

    pub fn to_string(&self, include_neighbors: bool) -> Result<String, NeighborsNotComputedError> {
        Ok(self.to_strings(include_neighbors)?.join(ATOM_SEP))
    }

    pub fn from_string(signature: &str) -> Result<Self, MalformedSignatureError> {
        let atoms = signature
            .split(ATOM_SEP)
            .map(AtomSignature::from_string)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(MoleculeSignature { atoms })
    }
}

impl fmt::Display for MoleculeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, atom) in self.atoms.iter().enumerate() {
            if i > 0 {
                write!(f, "{ATOM_SEP}")?;
            }
            write!(f, "{atom}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_smiles;

    const NBITS: u32 = 2048;

    fn signature(smiles: &str, radius: usize) -> MoleculeSignature {
        let mol = parse_smiles(smiles).unwrap();
        MoleculeSignature::from_graph(&mol, radius, NBITS, false).unwrap()
    }

    #[test]
    fn test_atom_signature_roundtrip_plain() {
        let sig = signature("CCO", 2);
        for atom in sig.atoms() {
            let s = atom.to_string(false).unwrap();
            let parsed = AtomSignature::from_string(&s).unwrap();
            assert_eq!(&parsed, atom);
        }
    }

    #[test]
    fn test_atom_signature_roundtrip_expanded() {
        let mol = parse_smiles("CCO").unwrap();
        let sig = MoleculeSignature::from_graph(&mol, 2, NBITS, false)
            .unwrap()
            .post_compute_neighbors(&mol, 2, NBITS, false)
            .unwrap();
        for atom in sig.atoms() {
            let s = atom.to_string(true).unwrap();
            let parsed = AtomSignature::from_string(&s).unwrap();
            assert_eq!(&parsed, atom);
        }
    }

    #[test]
    fn test_molecule_signature_roundtrip() {
        let sig = signature("CC(=O)O", 2);
        let s = sig.to_string(false).unwrap();
        let parsed = MoleculeSignature::from_string(&s).unwrap();
        assert_eq!(parsed, sig);
    }

    #[test]
    fn test_molecule_signature_roundtrip_expanded() {
        let mol = parse_smiles("c1ccncc1").unwrap();
        let sig = MoleculeSignature::from_graph(&mol, 2, NBITS, false)
            .unwrap()
            .post_compute_neighbors(&mol, 2, NBITS, false)
            .unwrap();
        let s = sig.to_string(true).unwrap();
        let parsed = MoleculeSignature::from_string(&s).unwrap();
        assert_eq!(parsed, sig);
    }

    #[test]
    fn test_order_independence() {
        // Ethanol written in three atom orders.
        let a = signature("CCO", 2).to_string(false).unwrap();
        let b = signature("OCC", 2).to_string(false).unwrap();
        let c = signature("C(O)C", 2).to_string(false).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_radius_sensitivity() {
        let r1 = signature("CCO", 1);
        let r2 = signature("CCO", 2);
        assert_ne!(r1, r2);
        assert_ne!(
            r1.to_string(false).unwrap(),
            r2.to_string(false).unwrap()
        );

        // Even when the environment saturates below the radius, the bit
        // tuples keep the configurations apart.
        let small_r2 = signature("CO", 2);
        let small_r3 = signature("CO", 3);
        assert_ne!(small_r2, small_r3);
    }

    #[test]
    fn test_expand_neighbors_idempotent() {
        let mol = parse_smiles("CC(=O)O").unwrap();
        let base = MoleculeSignature::from_graph(&mol, 2, NBITS, false).unwrap();
        let once = base.post_compute_neighbors(&mol, 2, NBITS, false).unwrap();
        let twice = once.post_compute_neighbors(&mol, 2, NBITS, false).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_neighbors_not_computed() {
        let sig = signature("CCO", 2);
        let err = sig.to_string(true);
        assert!(err.is_err());
    }

    #[test]
    fn test_neighbor_contents() {
        let mol = parse_smiles("CO").unwrap();
        let sig = MoleculeSignature::from_graph(&mol, 2, NBITS, false)
            .unwrap()
            .post_compute_neighbors(&mol, 2, NBITS, false)
            .unwrap();
        for atom in sig.atoms() {
            let neighbors = atom.neighbors().unwrap();
            assert_eq!(neighbors.len(), 1);
            assert_eq!(neighbors[0].0, Bond::Single);
            // The recorded string is the neighbor's root, not our own.
            assert_ne!(neighbors[0].1, atom.root());
        }
    }

    #[test]
    fn test_canonical_sort() {
        let sig = signature("CC(=O)O", 2);
        assert!(sig.atoms().windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_malformed_molecule_string() {
        assert!(MoleculeSignature::from_string("garbage").is_err());
        assert!(MoleculeSignature::from_string("12 ## [C;H4;h4;D0;X4:1] .. nope").is_err());
    }

    #[test]
    fn test_root_minus_matches_shorter_radius() {
        let mol = parse_smiles("CCCO").unwrap();
        let expanded = MoleculeSignature::from_graph(&mol, 2, NBITS, false)
            .unwrap()
            .post_compute_neighbors(&mol, 2, NBITS, false)
            .unwrap();
        let shorter = MoleculeSignature::from_graph(&mol, 1, NBITS, false).unwrap();
        let shorter_roots: Vec<&str> = shorter.atoms().iter().map(|a| a.root()).collect();
        for atom in expanded.atoms() {
            assert!(shorter_roots.contains(&atom.root_minus().unwrap()));
        }
    }
}
