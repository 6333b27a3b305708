use std::fmt::Write;

use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use thiserror::Error;

use crate::{AtomParity, Bond, BondStereo, Element, MoleculeGraph};

#[derive(Error, Debug)]
pub enum InvalidAtomError {
    #[error("atom index {0} has no graph context")]
    Dangling(usize),
}

/// Immutable snapshot of one atom as it appears in signature strings:
/// everything needed to render an atom pattern, nothing tied to the graph
/// it came from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AtomDescriptor {
    pub element: Element,
    pub aromatic: bool,
    /// Total hydrogens (implicit + bracket-written).
    pub h_total: u8,
    /// Implicit hydrogens only.
    pub h_implicit: u8,
    /// Heavy-atom degree.
    pub degree: u8,
    /// Total connectivity: degree plus hydrogens.
    pub connectivity: u8,
    pub charge: i8,
    pub parity: Option<AtomParity>,
}

impl AtomDescriptor {
    /// Snapshot an atom in graph context. Stereo parity is dropped unless
    /// `use_stereo` is set.
    pub fn of(graph: &MoleculeGraph, node: NodeIndex, use_stereo: bool) -> Self {
        let atom = &graph[node];
        let degree = graph.edges(node).count() as u8;
        let h_total = atom.total_h();
        let h_implicit = if atom.explicit_h.is_some() {
            0
        } else {
            atom.implicit_h
        };
        AtomDescriptor {
            element: atom.element,
            aromatic: atom.aromatic,
            h_total,
            h_implicit,
            degree,
            connectivity: degree + h_total,
            charge: atom.charge,
            parity: if use_stereo { atom.parity } else { None },
        }
    }

    /// Render as an atom pattern, e.g. `[C;H3;h3;D1;X4]`, with the `:1` root
    /// tag when `root` is set.
    pub fn pattern(&self, root: bool) -> String {
        let mut s = String::from("[");
        if self.aromatic {
            s.push_str(&self.element.symbol().to_ascii_lowercase());
        } else {
            s.push_str(self.element.symbol());
        }
        let _ = write!(
            s,
            ";H{};h{};D{};X{}",
            self.h_total, self.h_implicit, self.degree, self.connectivity
        );
        match self.charge {
            0 => {}
            1 => s.push_str(";+"),
            -1 => s.push_str(";-"),
            c if c > 0 => {
                let _ = write!(s, ";+{c}");
            }
            c => {
                let _ = write!(s, ";-{}", -c);
            }
        }
        match self.parity {
            Some(AtomParity::Ccw) => s.push_str(";@"),
            Some(AtomParity::Cw) => s.push_str(";@@"),
            None => {}
        }
        if root {
            s.push_str(":1");
        }
        s.push(']');
        s
    }
}

/// Immutable snapshot of one bond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BondDescriptor {
    pub order: Bond,
    pub stereo: Option<BondStereo>,
}

impl BondDescriptor {
    pub fn of(order: Bond, stereo: Option<BondStereo>, use_stereo: bool) -> Self {
        BondDescriptor {
            order,
            stereo: if use_stereo { stereo } else { None },
        }
    }

    /// Bond symbol used between atom patterns.
    pub fn symbol(&self) -> &'static str {
        match (self.order, self.stereo) {
            (Bond::Single, Some(BondStereo::Up)) => "/",
            (Bond::Single, Some(BondStereo::Down)) => "\\",
            (Bond::Single, None) => "-",
            (Bond::Double, _) => "=",
            (Bond::Triple, _) => "#",
            (Bond::Aromatic, _) => ":",
        }
    }

    pub fn from_symbol(symbol: char) -> Option<Self> {
        let (order, stereo) = match symbol {
            '-' => (Bond::Single, None),
            '/' => (Bond::Single, Some(BondStereo::Up)),
            '\\' => (Bond::Single, Some(BondStereo::Down)),
            '=' => (Bond::Double, None),
            '#' => (Bond::Triple, None),
            ':' => (Bond::Aromatic, None),
            _ => return None,
        };
        Some(BondDescriptor { order, stereo })
    }
}

/// Radius-bounded neighborhood of one atom, in canonical form.
///
/// `levels[k]` holds the bonded atoms at shortest-path distance `k + 1`
/// from the root — a property of the graph, so membership cannot depend on
/// traversal order. Within a level, pairs are sorted by rendered text.
/// Trailing empty levels are dropped, so an environment that stops growing
/// before the requested radius has fewer levels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub root: AtomDescriptor,
    pub levels: Vec<Vec<(BondDescriptor, AtomDescriptor)>>,
}

/// Walk the bonded neighborhood of `root` out to `radius` and return its
/// canonical [`Environment`].
pub fn extract(
    graph: &MoleculeGraph,
    root: NodeIndex,
    radius: usize,
    use_stereo: bool,
) -> Result<Environment, InvalidAtomError> {
    if graph.node_weight(root).is_none() {
        return Err(InvalidAtomError::Dangling(root.index()));
    }

    let n = graph.node_count();
    let mut distance: Vec<Option<usize>> = vec![None; n];
    distance[root.index()] = Some(0);
    let mut frontier = vec![root];
    let mut levels = Vec::new();

    for depth in 1..=radius {
        let mut next_frontier: Vec<NodeIndex> = Vec::new();
        for &node in &frontier {
            for neighbor in graph.neighbors(node) {
                if distance[neighbor.index()].is_none() {
                    distance[neighbor.index()] = Some(depth);
                    next_frontier.push(neighbor);
                }
            }
        }
        if next_frontier.is_empty() {
            break;
        }

        let mut level: Vec<(BondDescriptor, AtomDescriptor)> = next_frontier
            .iter()
            .map(|&node| {
                // An atom bonded to several previous-level atoms records its
                // smallest incident bond, keeping the choice canonical.
                let bond = graph
                    .edges(node)
                    .filter(|e| {
                        let other = if e.source() == node {
                            e.target()
                        } else {
                            e.source()
                        };
                        distance[other.index()] == Some(depth - 1)
                    })
                    .map(|e| BondDescriptor::of(e.weight().order, e.weight().stereo, use_stereo))
                    .min_by_key(|b| b.symbol())
                    .expect("frontier atom must have a bond to the previous level");
                (bond, AtomDescriptor::of(graph, node, use_stereo))
            })
            .collect();
        level.sort_by(|a, b| {
            (a.1.pattern(false), a.0.symbol()).cmp(&(b.1.pattern(false), b.0.symbol()))
        });
        levels.push(level);
        frontier = next_frontier;
    }

    Ok(Environment {
        root: AtomDescriptor::of(graph, root, use_stereo),
        levels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_smiles;

    #[test]
    fn test_radius_zero() {
        let mol = parse_smiles("CCO").unwrap();
        let env = extract(&mol, NodeIndex::new(0), 0, false).unwrap();
        assert!(env.levels.is_empty());
        assert_eq!(env.root.element, Element::C);
        assert_eq!(env.root.h_total, 3);
    }

    #[test]
    fn test_levels_by_distance() {
        let mol = parse_smiles("CCO").unwrap();
        let env = extract(&mol, NodeIndex::new(0), 2, false).unwrap();
        assert_eq!(env.levels.len(), 2);
        assert_eq!(env.levels[0].len(), 1);
        assert_eq!(env.levels[1].len(), 1);
        assert_eq!(env.levels[1][0].1.element, Element::O);
    }

    #[test]
    fn test_environment_saturates() {
        // Methanol has no atom past distance 1, whatever the radius.
        let mol = parse_smiles("CO").unwrap();
        let env = extract(&mol, NodeIndex::new(0), 5, false).unwrap();
        assert_eq!(env.levels.len(), 1);
    }

    #[test]
    fn test_order_independent() {
        let mol1 = parse_smiles("CC(O)N").unwrap();
        let mol2 = parse_smiles("NC(O)C").unwrap();
        // Central carbon is index 1 in both spellings.
        let env1 = extract(&mol1, NodeIndex::new(1), 2, false).unwrap();
        let env2 = extract(&mol2, NodeIndex::new(1), 2, false).unwrap();
        assert_eq!(env1, env2);
    }

    #[test]
    fn test_ring_membership_in_descriptor_counts() {
        let mol = parse_smiles("C1CC1").unwrap();
        let env = extract(&mol, NodeIndex::new(0), 1, false).unwrap();
        // Both ring neighbors show up at level one.
        assert_eq!(env.levels[0].len(), 2);
    }

    #[test]
    fn test_dangling_atom() {
        let mol = parse_smiles("CC").unwrap();
        let err = extract(&mol, NodeIndex::new(99), 1, false);
        assert!(matches!(err, Err(InvalidAtomError::Dangling(99))));
    }

    #[test]
    fn test_stereo_toggle() {
        let mol = parse_smiles("N[C@H](C)O").unwrap();
        let with = extract(&mol, NodeIndex::new(1), 1, true).unwrap();
        let without = extract(&mol, NodeIndex::new(1), 1, false).unwrap();
        assert_eq!(with.root.parity, Some(AtomParity::Ccw));
        assert_eq!(without.root.parity, None);
    }
}
