use std::collections::HashMap;
use std::fmt;

use lazy_static::lazy_static;
use petgraph::graph::UnGraph;

mod parse;
pub use parse::*;

mod morgan;
pub use morgan::*;

mod environment;
pub use environment::*;

mod codec;
pub use codec::*;

mod signature;
pub use signature::*;

mod alphabet;
pub use alphabet::*;

/// Elements accepted by the SMILES front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Element {
    H,
    B,
    C,
    N,
    O,
    F,
    Si,
    P,
    S,
    Cl,
    Br,
    I,
}

lazy_static! {
    /// Symbol lookup used by the SMILES parser. Lowercase entries are the
    /// aromatic spellings.
    static ref ELEMENT_SYMBOLS: HashMap<&'static str, (Element, bool)> = {
        let mut m = HashMap::new();
        for e in [
            Element::H,
            Element::B,
            Element::C,
            Element::N,
            Element::O,
            Element::F,
            Element::Si,
            Element::P,
            Element::S,
            Element::Cl,
            Element::Br,
            Element::I,
        ] {
            m.insert(e.symbol(), (e, false));
        }
        // Aromatic subset per the SMILES organic rules.
        m.insert("b", (Element::B, true));
        m.insert("c", (Element::C, true));
        m.insert("n", (Element::N, true));
        m.insert("o", (Element::O, true));
        m.insert("p", (Element::P, true));
        m.insert("s", (Element::S, true));
        m
    };
}

impl Element {
    pub fn symbol(&self) -> &'static str {
        match self {
            Element::H => "H",
            Element::B => "B",
            Element::C => "C",
            Element::N => "N",
            Element::O => "O",
            Element::F => "F",
            Element::Si => "Si",
            Element::P => "P",
            Element::S => "S",
            Element::Cl => "Cl",
            Element::Br => "Br",
            Element::I => "I",
        }
    }

    pub fn atomic_number(&self) -> u8 {
        match self {
            Element::H => 1,
            Element::B => 5,
            Element::C => 6,
            Element::N => 7,
            Element::O => 8,
            Element::F => 9,
            Element::Si => 14,
            Element::P => 15,
            Element::S => 16,
            Element::Cl => 17,
            Element::Br => 35,
            Element::I => 53,
        }
    }

    /// Default valences, smallest first, used for implicit hydrogen
    /// perception on atoms written outside brackets.
    pub fn default_valences(&self) -> &'static [u8] {
        match self {
            Element::H => &[1],
            Element::B => &[3],
            Element::C => &[4],
            Element::N => &[3, 5],
            Element::O => &[2],
            Element::F => &[1],
            Element::Si => &[4],
            Element::P => &[3, 5],
            Element::S => &[2, 4, 6],
            Element::Cl => &[1],
            Element::Br => &[1],
            Element::I => &[1],
        }
    }

    /// Look up a SMILES symbol. Returns the element and whether the spelling
    /// was the aromatic (lowercase) one.
    pub fn from_smiles(symbol: &str) -> Option<(Element, bool)> {
        ELEMENT_SYMBOLS.get(symbol).copied()
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// Tetrahedral parity of an atom, as written in SMILES.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AtomParity {
    /// `@` — counterclockwise.
    Ccw,
    /// `@@` — clockwise.
    Cw,
}

/// Graph node payload. The parser fills the written fields; the perception
/// pass after parsing fills `implicit_h` and `in_ring`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Atom {
    pub element: Element,
    pub aromatic: bool,
    pub charge: i8,
    /// Hydrogen count written in a bracket atom, e.g. `[NH2]`. `None` for
    /// atoms outside brackets, whose count is perceived from valence.
    pub explicit_h: Option<u8>,
    /// Perceived implicit hydrogen count.
    pub implicit_h: u8,
    /// Whether the atom is a member of at least one ring.
    pub in_ring: bool,
    pub parity: Option<AtomParity>,
}

impl Atom {
    pub fn new(element: Element, aromatic: bool) -> Self {
        Atom {
            element,
            aromatic,
            charge: 0,
            explicit_h: None,
            implicit_h: 0,
            in_ring: false,
            parity: None,
        }
    }

    /// Total hydrogen count, bracket-written or perceived.
    pub fn total_h(&self) -> u8 {
        self.explicit_h.unwrap_or(self.implicit_h)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Bond {
    Single,
    Double,
    Triple,
    Aromatic,
}

impl Bond {
    /// Contribution to the valence sum, doubled so it stays integral for
    /// aromatic bonds (aromatic counts 1.5).
    pub fn order_x2(&self) -> u8 {
        match self {
            Bond::Single => 2,
            Bond::Double => 4,
            Bond::Triple => 6,
            Bond::Aromatic => 3,
        }
    }

    /// Tag used in the neighbor part of a signature string.
    pub fn tag(&self) -> &'static str {
        match self {
            Bond::Single => "SINGLE",
            Bond::Double => "DOUBLE",
            Bond::Triple => "TRIPLE",
            Bond::Aromatic => "AROMATIC",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Bond> {
        match tag {
            "SINGLE" => Some(Bond::Single),
            "DOUBLE" => Some(Bond::Double),
            "TRIPLE" => Some(Bond::Triple),
            "AROMATIC" => Some(Bond::Aromatic),
            _ => None,
        }
    }
}

/// Stereo direction of a single bond (`/` and `\` in SMILES).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BondStereo {
    Up,
    Down,
}

/// Edge payload: bond order plus the stereo direction it was written with,
/// if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BondEdge {
    pub order: Bond,
    pub stereo: Option<BondStereo>,
}

impl BondEdge {
    pub fn plain(order: Bond) -> Self {
        BondEdge {
            order,
            stereo: None,
        }
    }

    pub fn order_x2(&self) -> u8 {
        self.order.order_x2()
    }
}

pub type MoleculeGraph = UnGraph<Atom, BondEdge>;

/// Install a global tracing subscriber. Safe to call more than once; later
/// calls are ignored.
pub fn init_logging(level: &str) {
    let level = level.parse().unwrap_or(tracing::Level::INFO);
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
}
