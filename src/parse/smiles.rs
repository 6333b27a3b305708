use std::collections::BTreeMap;

use anyhow::{Context, Result};
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use thiserror::Error;

use crate::{Atom, AtomParity, Bond, BondEdge, BondStereo, Element, MoleculeGraph};

#[derive(Error, Debug)]
pub enum SmilesError {
    #[error("branch start '(' at position {0} without a current atom")]
    BranchNoCurrentAtom(usize),
    #[error("branch end ')' at position {0} without a matching '('")]
    BranchEndNoStart(usize),
    #[error("ring closure '{0}' at position {1} without a current atom")]
    RingClosureNoCurrentAtom(char, usize),
    #[error("incomplete ring closure after '%' at position {0}")]
    IncompleteRingClosure(usize),
    #[error("unclosed bracket '[' at position {0}")]
    UnclosedBracket(usize),
    #[error("unknown element symbol '{0}' at position {1}")]
    UnknownElement(String, usize),
    #[error("malformed bracket atom '[{0}]'")]
    MalformedBracket(String),
    #[error("ring bond left open at end of input")]
    UnclosedRing,
}

/// Parses a SMILES string into a [`MoleculeGraph`] and runs the perception
/// pass (implicit hydrogens, ring membership).
pub fn parse_smiles(smiles: &str) -> Result<MoleculeGraph> {
    let mut graph = parse_smiles_helper(smiles)
        .with_context(|| format!("Failed to parse SMILES string {smiles}"))?;
    perceive(&mut graph);
    Ok(graph)
}

fn parse_smiles_helper(smiles: &str) -> Result<MoleculeGraph> {
    let mut graph = MoleculeGraph::new_undirected();
    let mut current_atom: Option<NodeIndex> = None;
    let mut bond_type = Bond::Single;
    let mut bond_stereo: Option<BondStereo> = None;
    let mut branch_stack: Vec<NodeIndex> = Vec::new();
    let mut ring_map: BTreeMap<u8, (NodeIndex, Bond)> = BTreeMap::new();

    let chars: Vec<char> = smiles.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '(' => {
                let atom = current_atom.ok_or(SmilesError::BranchNoCurrentAtom(i))?;
                branch_stack.push(atom);
                i += 1;
            }
            ')' => {
                current_atom = Some(
                    branch_stack
                        .pop()
                        .ok_or(SmilesError::BranchEndNoStart(i))?,
                );
                i += 1;
            }
            '-' | '=' | '#' | ':' => {
                bond_type = match c {
                    '-' => Bond::Single,
                    '=' => Bond::Double,
                    '#' => Bond::Triple,
                    _ => Bond::Aromatic,
                };
                i += 1;
            }
            '/' => {
                bond_type = Bond::Single;
                bond_stereo = Some(BondStereo::Up);
                i += 1;
            }
            '\\' => {
                bond_type = Bond::Single;
                bond_stereo = Some(BondStereo::Down);
                i += 1;
            }
            '%' => {
                if i + 2 >= chars.len() {
                    return Err(SmilesError::IncompleteRingClosure(i).into());
                }
                let digits: String = chars[i + 1..i + 3].iter().collect();
                let ring_number: u8 = digits
                    .parse()
                    .with_context(|| format!("Bad ring closure digits '{digits}'"))?;
                close_or_open_ring(
                    &mut graph,
                    &mut ring_map,
                    ring_number,
                    current_atom.ok_or(SmilesError::RingClosureNoCurrentAtom(c, i))?,
                    &mut bond_type,
                );
                i += 3;
            }
            '0'..='9' => {
                let ring_number = c.to_digit(10).unwrap() as u8;
                close_or_open_ring(
                    &mut graph,
                    &mut ring_map,
                    ring_number,
                    current_atom.ok_or(SmilesError::RingClosureNoCurrentAtom(c, i))?,
                    &mut bond_type,
                );
                i += 1;
            }
            '[' => {
                let end_relative = chars[i..]
                    .iter()
                    .position(|&x| x == ']')
                    .ok_or(SmilesError::UnclosedBracket(i))?;
                let end = i + end_relative;
                let content: String = chars[i + 1..end].iter().collect();
                let atom = parse_bracket_atom(&content)
                    .with_context(|| format!("While parsing {smiles}"))?;
                attach_atom(
                    &mut graph,
                    &mut current_atom,
                    &mut bond_type,
                    &mut bond_stereo,
                    atom,
                );
                i = end + 1;
            }
            '.' => {
                // Disconnected fragment; start fresh.
                current_atom = None;
                branch_stack.clear();
                i += 1;
            }
            _ => {
                // Organic-subset atom, possibly two letters (Cl, Br, Si).
                let (element, aromatic, consumed) = match_organic_symbol(&chars, i)
                    .ok_or_else(|| SmilesError::UnknownElement(c.to_string(), i))?;
                attach_atom(
                    &mut graph,
                    &mut current_atom,
                    &mut bond_type,
                    &mut bond_stereo,
                    Atom::new(element, aromatic),
                );
                i += consumed;
            }
        }
    }

    if !ring_map.is_empty() {
        return Err(SmilesError::UnclosedRing.into());
    }

    Ok(graph)
}

/// Match a one- or two-letter element symbol starting at `i`, preferring the
/// two-letter reading when it names a real element.
fn match_organic_symbol(chars: &[char], i: usize) -> Option<(Element, bool, usize)> {
    if i + 1 < chars.len() && chars[i + 1].is_ascii_lowercase() {
        let candidate: String = chars[i..i + 2].iter().collect();
        if let Some((element, aromatic)) = Element::from_smiles(&candidate) {
            // An aromatic letter followed by another valid aromatic letter
            // ("cc") is two atoms, not one symbol.
            if chars[i].is_ascii_uppercase()
                || Element::from_smiles(&chars[i + 1].to_string()).is_none()
            {
                return Some((element, aromatic, 2));
            }
        }
    }
    let single: String = chars[i..i + 1].iter().collect();
    Element::from_smiles(&single).map(|(element, aromatic)| (element, aromatic, 1))
}

/// Parse the inside of a bracket atom: `[13C@H2+2]`-style content.
fn parse_bracket_atom(content: &str) -> Result<Atom> {
    let chars: Vec<char> = content.chars().collect();
    let mut i = 0;

    // Isotope prefix is accepted and dropped.
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }

    let mut symbol = String::new();
    if i < chars.len() && chars[i].is_ascii_alphabetic() {
        symbol.push(chars[i]);
        i += 1;
        if i < chars.len() && chars[i].is_ascii_lowercase() {
            let two: String = format!("{}{}", symbol, chars[i]);
            if Element::from_smiles(&two).is_some() {
                symbol = two;
                i += 1;
            }
        }
    }
    let (element, aromatic) = Element::from_smiles(&symbol)
        .ok_or_else(|| SmilesError::MalformedBracket(content.to_string()))?;

    let mut atom = Atom::new(element, aromatic);
    // Inside a bracket the hydrogen count is exact; default is zero.
    atom.explicit_h = Some(0);

    while i < chars.len() {
        match chars[i] {
            '@' => {
                if i + 1 < chars.len() && chars[i + 1] == '@' {
                    atom.parity = Some(AtomParity::Cw);
                    i += 2;
                } else {
                    atom.parity = Some(AtomParity::Ccw);
                    i += 1;
                }
            }
            'H' => {
                i += 1;
                let mut digits = String::new();
                while i < chars.len() && chars[i].is_ascii_digit() {
                    digits.push(chars[i]);
                    i += 1;
                }
                let count = if digits.is_empty() {
                    1
                } else {
                    digits
                        .parse()
                        .map_err(|_| SmilesError::MalformedBracket(content.to_string()))?
                };
                atom.explicit_h = Some(count);
            }
            '+' | '-' => {
                let sign: i8 = if chars[i] == '+' { 1 } else { -1 };
                i += 1;
                let mut magnitude: i8 = 1;
                // Either repeated signs (--) or a digit (+2).
                if i < chars.len() && chars[i].is_ascii_digit() {
                    magnitude = chars[i].to_digit(10).unwrap() as i8;
                    i += 1;
                } else {
                    while i < chars.len() && chars[i] == chars[i - 1] {
                        magnitude += 1;
                        i += 1;
                    }
                }
                atom.charge = sign * magnitude;
            }
            ':' => {
                // Atom map number, accepted and dropped.
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            _ => return Err(SmilesError::MalformedBracket(content.to_string()).into()),
        }
    }

    Ok(atom)
}

fn attach_atom(
    graph: &mut MoleculeGraph,
    current_atom: &mut Option<NodeIndex>,
    bond_type: &mut Bond,
    bond_stereo: &mut Option<BondStereo>,
    atom: Atom,
) {
    let new_atom = graph.add_node(atom);
    if let Some(prev_atom) = *current_atom {
        let order = if graph[prev_atom].aromatic && graph[new_atom].aromatic {
            // Two adjacent aromatic atoms bond aromatically unless a bond
            // symbol said otherwise.
            if *bond_type == Bond::Single {
                Bond::Aromatic
            } else {
                *bond_type
            }
        } else {
            *bond_type
        };
        graph.add_edge(
            prev_atom,
            new_atom,
            BondEdge {
                order,
                stereo: bond_stereo.take(),
            },
        );
        *bond_type = Bond::Single;
    }
    *current_atom = Some(new_atom);
}

fn close_or_open_ring(
    graph: &mut MoleculeGraph,
    ring_map: &mut BTreeMap<u8, (NodeIndex, Bond)>,
    ring_number: u8,
    current: NodeIndex,
    bond_type: &mut Bond,
) {
    if let Some((start_atom, opening_bond)) = ring_map.remove(&ring_number) {
        let order = if graph[start_atom].aromatic && graph[current].aromatic {
            Bond::Aromatic
        } else if *bond_type != Bond::Single {
            *bond_type
        } else {
            opening_bond
        };
        graph.add_edge(current, start_atom, BondEdge::plain(order));
        *bond_type = Bond::Single;
    } else {
        ring_map.insert(ring_number, (current, *bond_type));
        *bond_type = Bond::Single;
    }
}

/// Perception pass: implicit hydrogen counts from default valences, ring
/// membership from DFS back edges.
pub fn perceive(graph: &mut MoleculeGraph) {
    let nodes: Vec<NodeIndex> = graph.node_indices().collect();
    for node in &nodes {
        if graph[*node].explicit_h.is_some() {
            continue;
        }
        let sum_x2: u16 = graph
            .edges(*node)
            .map(|e| e.weight().order_x2() as u16)
            .sum();
        let used = sum_x2.div_ceil(2) as u8;
        let valence = graph[*node]
            .element
            .default_valences()
            .iter()
            .copied()
            .find(|&v| v >= used)
            .unwrap_or(used);
        graph[*node].implicit_h = valence - used;
    }
    mark_rings(graph);
}

/// Marks every atom lying on a cycle. DFS; a back edge marks all atoms on
/// the tree path between its endpoints.
fn mark_rings(graph: &mut MoleculeGraph) {
    let mut visited: Vec<bool> = vec![false; graph.node_count()];
    let mut on_ring: Vec<bool> = vec![false; graph.node_count()];
    let mut stack: Vec<NodeIndex> = Vec::new();

    fn dfs(
        graph: &MoleculeGraph,
        current: NodeIndex,
        parent: Option<NodeIndex>,
        visited: &mut [bool],
        on_ring: &mut [bool],
        stack: &mut Vec<NodeIndex>,
    ) {
        visited[current.index()] = true;
        stack.push(current);
        for neighbor in graph.neighbors(current) {
            if Some(neighbor) == parent {
                continue;
            }
            if let Some(pos) = stack.iter().position(|&n| n == neighbor) {
                for &n in &stack[pos..] {
                    on_ring[n.index()] = true;
                }
            } else if !visited[neighbor.index()] {
                dfs(graph, neighbor, Some(current), visited, on_ring, stack);
            }
        }
        stack.pop();
    }

    for node in graph.node_indices() {
        if !visited[node.index()] {
            dfs(graph, node, None, &mut visited, &mut on_ring, &mut stack);
        }
    }
    for node in graph.node_indices().collect::<Vec<_>>() {
        graph[node].in_ring = on_ring[node.index()];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Element::*;

    #[test]
    fn test_parse_ethanol() {
        let molecule = parse_smiles("CCO").expect("Failed to parse SMILES");

        assert_eq!(molecule.node_count(), 3);
        assert_eq!(molecule.edge_count(), 2);
        assert_eq!(molecule[NodeIndex::new(0)].element, C);
        assert_eq!(molecule[NodeIndex::new(1)].element, C);
        assert_eq!(molecule[NodeIndex::new(2)].element, O);

        // Perceived hydrogens: CH3, CH2, OH.
        assert_eq!(molecule[NodeIndex::new(0)].total_h(), 3);
        assert_eq!(molecule[NodeIndex::new(1)].total_h(), 2);
        assert_eq!(molecule[NodeIndex::new(2)].total_h(), 1);
    }

    #[test]
    fn test_parse_cyclohexane() {
        let molecule = parse_smiles("C1CCCCC1").expect("Failed to parse SMILES");

        assert_eq!(molecule.node_count(), 6);
        assert_eq!(molecule.edge_count(), 6);
        for node in molecule.node_indices() {
            assert_eq!(molecule[node].element, C);
            assert!(molecule[node].in_ring);
            assert_eq!(molecule[node].total_h(), 2);
        }
    }

    #[test]
    fn test_parse_benzene() {
        let molecule = parse_smiles("c1ccccc1").expect("Failed to parse SMILES");

        assert_eq!(molecule.node_count(), 6);
        assert_eq!(molecule.edge_count(), 6);
        for node in molecule.node_indices() {
            assert!(molecule[node].aromatic);
            assert!(molecule[node].in_ring);
            // Aromatic carbon carries one hydrogen.
            assert_eq!(molecule[node].total_h(), 1);
        }
        for edge in molecule.edge_references() {
            assert_eq!(edge.weight().order, Bond::Aromatic);
        }
    }

    #[test]
    fn test_parse_double_bond() {
        let molecule = parse_smiles("C=O").expect("Failed to parse SMILES");
        let edge = molecule.edge_references().next().unwrap();
        assert_eq!(edge.weight().order, Bond::Double);
        assert_eq!(molecule[NodeIndex::new(0)].total_h(), 2);
        assert_eq!(molecule[NodeIndex::new(1)].total_h(), 0);
    }

    #[test]
    fn test_parse_bracket_charge() {
        let molecule = parse_smiles("[NH4+]").expect("Failed to parse SMILES");
        let atom = molecule[NodeIndex::new(0)];
        assert_eq!(atom.element, N);
        assert_eq!(atom.total_h(), 4);
        assert_eq!(atom.charge, 1);

        let molecule = parse_smiles("[O-]").expect("Failed to parse SMILES");
        let atom = molecule[NodeIndex::new(0)];
        assert_eq!(atom.charge, -1);
        assert_eq!(atom.total_h(), 0);
    }

    #[test]
    fn test_parse_branch() {
        let molecule = parse_smiles("CC(C)C").expect("Failed to parse SMILES");
        assert_eq!(molecule.node_count(), 4);
        assert_eq!(molecule.edge_count(), 3);
        let degrees: Vec<usize> = molecule
            .node_indices()
            .map(|n| molecule.edges(n).count())
            .collect();
        assert_eq!(degrees.iter().filter(|&&d| d == 3).count(), 1);
    }

    #[test]
    fn test_parse_two_letter_elements() {
        let molecule = parse_smiles("CCl").expect("Failed to parse SMILES");
        assert_eq!(molecule[NodeIndex::new(1)].element, Cl);

        let molecule = parse_smiles("CBr").expect("Failed to parse SMILES");
        assert_eq!(molecule[NodeIndex::new(1)].element, Br);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_smiles("(CC").is_err());
        assert!(parse_smiles("C)").is_err());
        assert!(parse_smiles("C[").is_err());
        assert!(parse_smiles("C1CC").is_err());
        assert!(parse_smiles("Xx").is_err());
    }

    #[test]
    fn test_parse_disconnected() {
        let molecule = parse_smiles("C.O").expect("Failed to parse SMILES");
        assert_eq!(molecule.node_count(), 2);
        assert_eq!(molecule.edge_count(), 0);
    }

    #[test]
    fn test_stereo_markers() {
        let molecule = parse_smiles("F/C=C/F").expect("Failed to parse SMILES");
        assert_eq!(molecule.node_count(), 4);
        let stereo_edges = molecule
            .edge_references()
            .filter(|e| e.weight().stereo.is_some())
            .count();
        assert_eq!(stereo_edges, 2);
    }
}
