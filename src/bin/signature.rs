use std::io;

use anyhow::{bail, Context, Result};
use molsig::{init_logging, parse_smiles, MoleculeSignature};

fn main() -> Result<()> {
    init_logging("warn");

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        bail!("usage: signature <smiles> [radius] [nbits]");
    }
    let smiles = &args[0];
    let radius: usize = args
        .get(1)
        .map(|s| s.parse())
        .transpose()
        .context("radius must be an integer")?
        .unwrap_or(2);
    let n_bits: u32 = args
        .get(2)
        .map(|s| s.parse())
        .transpose()
        .context("nbits must be an integer")?
        .unwrap_or(2048);

    let graph = parse_smiles(smiles)?;
    let signature = MoleculeSignature::from_graph(&graph, radius, n_bits, false)?
        .post_compute_neighbors(&graph, radius, n_bits, false)?;

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(io::stdout());
    writer.write_record(["atom", "signature"])?;
    for (i, atom) in signature.atoms().iter().enumerate() {
        writer.write_record([i.to_string(), atom.to_string(true)?])?;
    }
    writer.flush()?;

    Ok(())
}
