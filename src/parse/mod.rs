mod smiles;
pub use smiles::*;
