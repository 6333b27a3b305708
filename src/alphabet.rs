use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::{parse_smiles, MoleculeSignature, SignatureError};

/// Archive magic + format version. Bump the version on any layout change.
const MAGIC: &[u8; 4] = b"MSIG";
const VERSION: u16 = 1;

/// Which of an atom signature's bit identifiers key it in the alphabet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BitRegistration {
    /// Register under the bit of every radius level, so coarser-radius
    /// queries get partial coverage.
    #[default]
    AllLevels,
    /// Register only under the full-radius bit.
    FinalOnly,
}

#[derive(Error, Debug)]
#[error("incompatible alphabet configurations: {left} vs {right}")]
pub struct IncompatibleAlphabetError {
    pub left: String,
    pub right: String,
}

#[derive(Error, Debug)]
pub enum AlphabetLoadError {
    #[error("failed to read alphabet archive {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path:?} is not an alphabet archive (bad magic)")]
    BadMagic { path: PathBuf },
    #[error("unsupported alphabet archive version {found} in {path:?}")]
    Version { found: u16, path: PathBuf },
    #[error("corrupt alphabet archive {path:?}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

#[derive(Error, Debug)]
pub enum AlphabetSaveError {
    #[error("failed to write alphabet archive {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode alphabet archive: {0}")]
    Encode(String),
}

/// Counters reported by a [`Alphabet::fill`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillReport {
    pub processed: usize,
    pub skipped: usize,
}

/// Mapping from fingerprint bit identifiers to the canonical atomic
/// signature strings observed to produce them.
///
/// The configuration fields are first-class state: every merge and
/// compatibility check compares them field for field. The mapping only ever
/// grows under [`Alphabet::fill`], so a partially filled alphabet is always
/// a valid (smaller) alphabet — safe to checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alphabet {
    radius: usize,
    n_bits: u32,
    use_stereo: bool,
    registration: BitRegistration,
    entries: BTreeMap<u32, BTreeSet<String>>,
}

impl Alphabet {
    pub fn new(radius: usize, n_bits: u32, use_stereo: bool) -> Self {
        Alphabet {
            radius,
            n_bits,
            use_stereo,
            registration: BitRegistration::default(),
            entries: BTreeMap::new(),
        }
    }

    pub fn with_registration(mut self, registration: BitRegistration) -> Self {
        self.registration = registration;
        self
    }

    pub fn radius(&self) -> usize {
        self.radius
    }

    pub fn n_bits(&self) -> u32 {
        self.n_bits
    }

    pub fn use_stereo(&self) -> bool {
        self.use_stereo
    }

    pub fn registration(&self) -> BitRegistration {
        self.registration
    }

    fn config_string(&self) -> String {
        format!(
            "(radius={}, n_bits={}, use_stereo={}, registration={:?})",
            self.radius, self.n_bits, self.use_stereo, self.registration
        )
    }

    /// Add one molecule. On error the alphabet is untouched: the signature
    /// is built completely before anything is inserted.
    pub fn add_molecule(&mut self, smiles: &str) -> Result<(), SignatureError> {
        let graph = parse_smiles(smiles).map_err(|e| {
            SignatureError::Malformed(crate::MalformedSignatureError(format!(
                "cannot build graph for {smiles:?}: {e}"
            )))
        })?;
        let signature =
            MoleculeSignature::from_graph(&graph, self.radius, self.n_bits, self.use_stereo)?;
        self.add_signature(&signature);
        Ok(())
    }

    /// Register every atom signature of an already-built molecule
    /// signature. The inserted member string is the atom's canonical
    /// `bits ## root` form.
    pub fn add_signature(&mut self, signature: &MoleculeSignature) {
        for atom in signature.atoms() {
            let entry = atom
                .to_string(false)
                .expect("plain form never needs neighbors");
            let bits: &[u32] = match self.registration {
                BitRegistration::AllLevels => atom.morgans(),
                BitRegistration::FinalOnly => {
                    let n = atom.morgans().len();
                    &atom.morgans()[n.saturating_sub(1)..]
                }
            };
            for &bit in bits {
                self.entries
                    .entry(bit)
                    .or_default()
                    .insert(entry.clone());
            }
        }
    }

    /// Fill from a stream of SMILES strings. Molecules that fail to parse
    /// or sign are skipped with a warning and counted; they contribute zero
    /// entries. Use [`Alphabet::add_molecule`] to abort on first failure
    /// instead.
    pub fn fill<S: AsRef<str>>(&mut self, smiles: &[S]) -> FillReport {
        let mut report = FillReport::default();
        for (i, s) in smiles.iter().enumerate() {
            if i > 0 && i % 1000 == 0 {
                info!("alphabet fill: {} molecules, {} entries", i, self.size());
            }
            match self.add_molecule(s.as_ref()) {
                Ok(()) => report.processed += 1,
                Err(e) => {
                    warn!("skipping molecule {i} ({:?}): {e}", s.as_ref());
                    report.skipped += 1;
                }
            }
        }
        report
    }

    /// Parallel fill: each worker builds a private shard with this
    /// alphabet's configuration, and the shards are reduced with
    /// [`Alphabet::merge`] — sound because the mapping is a set union, so
    /// processing order is irrelevant.
    pub fn fill_parallel<S: AsRef<str> + Sync>(&mut self, smiles: &[S]) -> FillReport {
        let chunk = (smiles.len() / rayon::current_num_threads()).max(1);
        let template = Alphabet {
            radius: self.radius,
            n_bits: self.n_bits,
            use_stereo: self.use_stereo,
            registration: self.registration,
            entries: BTreeMap::new(),
        };
        let (shard, report) = smiles
            .par_chunks(chunk)
            .map(|chunk| {
                let mut shard = template.clone();
                let report = shard.fill(chunk);
                (shard, report)
            })
            .reduce(
                || (template.clone(), FillReport::default()),
                |(a, ra), (b, rb)| {
                    (
                        a.merge(b).expect("shards share one configuration"),
                        FillReport {
                            processed: ra.processed + rb.processed,
                            skipped: ra.skipped + rb.skipped,
                        },
                    )
                },
            );
        for (bit, strings) in shard.entries {
            self.entries.entry(bit).or_default().extend(strings);
        }
        report
    }

    /// True iff the two alphabets were built under identical configurations
    /// and may therefore be merged or compared.
    pub fn compatible(&self, other: &Alphabet) -> bool {
        self.radius == other.radius
            && self.n_bits == other.n_bits
            && self.use_stereo == other.use_stereo
            && self.registration == other.registration
    }

    /// Union of two alphabets. Commutative and associative; merging with an
    /// empty alphabet of the same configuration is the identity.
    pub fn merge(mut self, other: Alphabet) -> Result<Alphabet, IncompatibleAlphabetError> {
        if !self.compatible(&other) {
            return Err(IncompatibleAlphabetError {
                left: self.config_string(),
                right: other.config_string(),
            });
        }
        for (bit, strings) in other.entries {
            self.entries.entry(bit).or_default().extend(strings);
        }
        Ok(self)
    }

    /// Total count of distinct `(bit, signature string)` entries.
    pub fn size(&self) -> usize {
        self.entries.values().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bit identifiers with at least one member, ascending.
    pub fn bits(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.keys().copied()
    }

    /// Signature strings registered under one bit.
    pub fn signatures_for_bit(&self, bit: u32) -> Option<&BTreeSet<String>> {
        self.entries.get(&bit)
    }

    /// Persist as a single archive: magic, version, then the bincode body.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), AlphabetSaveError> {
        let path = path.as_ref();
        let body = bincode::serialize(&Archive::from(self))
            .map_err(|e| AlphabetSaveError::Encode(e.to_string()))?;
        let write = |path: &Path| -> io::Result<()> {
            let mut file = File::create(path)?;
            file.write_all(MAGIC)?;
            file.write_all(&VERSION.to_le_bytes())?;
            file.write_all(&body)?;
            Ok(())
        };
        write(path).map_err(|source| AlphabetSaveError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Alphabet, AlphabetLoadError> {
        let path = path.as_ref();
        let io_err = |source| AlphabetLoadError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = File::open(path).map_err(io_err)?;
        let mut header = [0u8; 6];
        file.read_exact(&mut header).map_err(io_err)?;
        if &header[..4] != MAGIC {
            return Err(AlphabetLoadError::BadMagic {
                path: path.to_path_buf(),
            });
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != VERSION {
            return Err(AlphabetLoadError::Version {
                found: version,
                path: path.to_path_buf(),
            });
        }
        let mut body = Vec::new();
        file.read_to_end(&mut body).map_err(io_err)?;
        let archive: Archive =
            bincode::deserialize(&body).map_err(|e| AlphabetLoadError::Corrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        archive.into_alphabet(path)
    }
}

/// On-disk layout: configuration header plus the mapping flattened into one
/// string array with per-key offsets.
#[derive(Serialize, Deserialize)]
struct Archive {
    radius: u64,
    n_bits: u32,
    use_stereo: bool,
    registration: BitRegistration,
    keys: Vec<u32>,
    /// `strings[offsets[i]..offsets[i + 1]]` are the members of `keys[i]`.
    offsets: Vec<u64>,
    strings: Vec<String>,
}

impl From<&Alphabet> for Archive {
    fn from(alphabet: &Alphabet) -> Self {
        let mut keys = Vec::with_capacity(alphabet.entries.len());
        let mut offsets = Vec::with_capacity(alphabet.entries.len() + 1);
        let mut strings = Vec::new();
        offsets.push(0);
        for (bit, members) in &alphabet.entries {
            keys.push(*bit);
            strings.extend(members.iter().cloned());
            offsets.push(strings.len() as u64);
        }
        Archive {
            radius: alphabet.radius as u64,
            n_bits: alphabet.n_bits,
            use_stereo: alphabet.use_stereo,
            registration: alphabet.registration,
            keys,
            offsets,
            strings,
        }
    }
}

impl Archive {
    fn into_alphabet(self, path: &Path) -> Result<Alphabet, AlphabetLoadError> {
        let corrupt = |reason: &str| AlphabetLoadError::Corrupt {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };
        if self.offsets.len() != self.keys.len() + 1 {
            return Err(corrupt("offset table does not match key table"));
        }
        if self.offsets.first() != Some(&0)
            || self.offsets.last() != Some(&(self.strings.len() as u64))
        {
            return Err(corrupt("offset table does not span the string table"));
        }
        let mut entries = BTreeMap::new();
        for (i, &bit) in self.keys.iter().enumerate() {
            let (start, end) = (self.offsets[i], self.offsets[i + 1]);
            if start > end {
                return Err(corrupt("offset table is not monotone"));
            }
            let members: BTreeSet<String> = self.strings[start as usize..end as usize]
                .iter()
                .cloned()
                .collect();
            entries.insert(bit, members);
        }
        Ok(Alphabet {
            radius: self.radius as usize,
            n_bits: self.n_bits,
            use_stereo: self.use_stereo,
            registration: self.registration,
            entries,
        })
    }
}
