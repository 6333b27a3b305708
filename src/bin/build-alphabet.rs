use std::fs;

use anyhow::{bail, Context, Result};
use molsig::{init_logging, Alphabet};
use tracing::info;

fn main() -> Result<()> {
    init_logging("info");

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 2 {
        bail!("usage: build-alphabet <smiles-file> <output> [radius] [nbits]");
    }
    let input = &args[0];
    let output = &args[1];
    let radius: usize = args
        .get(2)
        .map(|s| s.parse())
        .transpose()
        .context("radius must be an integer")?
        .unwrap_or(2);
    let n_bits: u32 = args
        .get(3)
        .map(|s| s.parse())
        .transpose()
        .context("nbits must be an integer")?
        .unwrap_or(2048);

    let contents =
        fs::read_to_string(input).with_context(|| format!("Failed to read {input}"))?;
    let molecules: Vec<&str> = contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    info!("{} molecules from {input}", molecules.len());

    let mut alphabet = Alphabet::new(radius, n_bits, false);
    let report = alphabet.fill_parallel(&molecules);
    info!(
        "filled alphabet: {} entries from {} molecules ({} skipped)",
        alphabet.size(),
        report.processed,
        report.skipped
    );

    alphabet
        .save(output)
        .with_context(|| format!("Failed to save alphabet to {output}"))?;
    info!("saved {output}");

    Ok(())
}
