//! Canonical signature string grammar.
//!
//! ```text
//! signature        := fingerprint_bits " ## " root_pattern [" && " bond_tag " <> " pattern]*
//! fingerprint_bits := INT ("-" INT)*
//! root_pattern     := atom_pattern[":1"] level*
//! level            := "(" (bond_char atom_pattern)+ ")"
//! atom_pattern     := "[" element ";H"n ";h"n ";D"n ";X"n [";"charge] [";"stereo] "]"
//! ```
//!
//! `render` and `parse` are exact inverses; the string form is the durable
//! interchange format, so the grammar must not drift.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, digit1, one_of},
    combinator::{all_consuming, map, map_res, opt},
    multi::{many0, many1},
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};
use thiserror::Error;

use crate::{AtomDescriptor, AtomParity, BondDescriptor, Element, Environment};

/// Separator between bit identifiers in the fingerprint prefix.
pub const BIT_SEP: &str = "-";
/// Separator between the fingerprint prefix and the root pattern.
pub const MORGAN_SEP: &str = " ## ";
/// Separator before each neighbor entry.
pub const NEIG_SEP: &str = " && ";
/// Separator between a neighbor's bond tag and its pattern.
pub const BOND_SEP: &str = " <> ";
/// Separator between atom signatures in a molecule-level export.
pub const ATOM_SEP: &str = " .. ";

#[derive(Error, Debug)]
#[error("malformed signature: {0}")]
pub struct MalformedSignatureError(pub String);

/// Render an environment into its canonical root pattern. The root atom
/// leads, tagged `:1`; each radius level follows as one parenthesized group.
pub fn render(env: &Environment) -> String {
    let mut s = env.root.pattern(true);
    for level in &env.levels {
        s.push('(');
        for (bond, atom) in level {
            s.push_str(bond.symbol());
            s.push_str(&atom.pattern(false));
        }
        s.push(')');
    }
    s
}

/// Parse a canonical root pattern back into its [`Environment`]. Exact
/// inverse of [`render`]; anything else is rejected.
pub fn parse(input: &str) -> Result<Environment, MalformedSignatureError> {
    let (_, (root, levels)) = all_consuming(pair(atom_pattern, many0(level)))(input)
        .map_err(|e| MalformedSignatureError(format!("{input:?}: {e}")))?;

    let (root, is_root) = root;
    if !is_root {
        return Err(MalformedSignatureError(format!(
            "{input:?}: root atom is not tagged ':1'"
        )));
    }
    let mut out_levels = Vec::with_capacity(levels.len());
    for level in levels {
        let mut out = Vec::with_capacity(level.len());
        for (bond, (atom, is_root)) in level {
            if is_root {
                return Err(MalformedSignatureError(format!(
                    "{input:?}: ':1' tag on a non-root atom"
                )));
            }
            out.push((bond, atom));
        }
        out_levels.push(out);
    }
    Ok(Environment {
        root,
        levels: out_levels,
    })
}

fn number(input: &str) -> IResult<&str, u8> {
    map_res(digit1, str::parse)(input)
}

fn charge(input: &str) -> IResult<&str, i8> {
    let (input, sign) = one_of("+-")(input)?;
    let (input, magnitude) = opt(map_res(digit1, str::parse::<i8>))(input)?;
    let magnitude = magnitude.unwrap_or(1);
    Ok((
        input,
        if sign == '+' { magnitude } else { -magnitude },
    ))
}

fn parity(input: &str) -> IResult<&str, AtomParity> {
    alt((
        map(tag("@@"), |_| AtomParity::Cw),
        map(tag("@"), |_| AtomParity::Ccw),
    ))(input)
}

fn element_symbol(input: &str) -> IResult<&str, (Element, bool)> {
    map_res(take_while1(|c: char| c.is_ascii_alphabetic()), |s: &str| {
        Element::from_smiles(s).ok_or("unknown element")
    })(input)
}

/// One atom pattern; returns the descriptor and whether it carried the
/// `:1` root tag.
fn atom_pattern(input: &str) -> IResult<&str, (AtomDescriptor, bool)> {
    let fields = tuple((
        element_symbol,
        preceded(tag(";H"), number),
        preceded(tag(";h"), number),
        preceded(tag(";D"), number),
        preceded(tag(";X"), number),
        opt(preceded(char(';'), charge)),
        opt(preceded(char(';'), parity)),
        opt(tag(":1")),
    ));
    map(
        delimited(char('['), fields, char(']')),
        |((element, aromatic), h_total, h_implicit, degree, connectivity, charge, parity, root)| {
            (
                AtomDescriptor {
                    element,
                    aromatic,
                    h_total,
                    h_implicit,
                    degree,
                    connectivity,
                    charge: charge.unwrap_or(0),
                    parity,
                },
                root.is_some(),
            )
        },
    )(input)
}

fn bond_symbol(input: &str) -> IResult<&str, BondDescriptor> {
    map_res(one_of("-/\\=#:"), |c| {
        BondDescriptor::from_symbol(c).ok_or("unknown bond")
    })(input)
}

fn level(input: &str) -> IResult<&str, Vec<(BondDescriptor, (AtomDescriptor, bool))>> {
    delimited(
        char('('),
        many1(pair(bond_symbol, atom_pattern)),
        char(')'),
    )(input)
}
