//! Structure file readers and writers.
//!
//! Every format reduces a model to one C-alpha per residue. [`load_structure`] picks the
//! reader from the file extension.

pub mod cif;
pub mod pdb;
pub mod prot;
pub mod traits;

use self::cif::{CifError, CifFile};
use self::pdb::{PdbError, PdbFile};
use self::prot::{ProtError, ProtFile};
use self::traits::StructureFile;
use crate::core::models::structure::Structure;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureFormat {
    Pdb,
    Cif,
    Prot,
}

impl StructureFormat {
    /// Determines the format from the file extension, ignoring case.
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "pdb" => Some(Self::Pdb),
            "cif" | "mmcif" => Some(Self::Cif),
            "prot" => Some(Self::Prot),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum StructureIoError {
    #[error("Unsupported structure file format: {0}")]
    UnsupportedFormat(PathBuf),
    #[error("Failed to read PDB file '{path}': {source}")]
    Pdb { path: PathBuf, source: PdbError },
    #[error("Failed to read mmCIF file '{path}': {source}")]
    Cif { path: PathBuf, source: CifError },
    #[error("Failed to read protein state file '{path}': {source}")]
    Prot { path: PathBuf, source: ProtError },
}

/// Loads a structure, choosing the reader by extension.
///
/// # Errors
///
/// Returns [`StructureIoError::UnsupportedFormat`] for unknown extensions, or the
/// format-specific error wrapped with the offending path.
pub fn load_structure(path: &Path) -> Result<Structure, StructureIoError> {
    let format = StructureFormat::from_path(path)
        .ok_or_else(|| StructureIoError::UnsupportedFormat(path.to_path_buf()))?;
    let to_path = || path.to_path_buf();

    let structure = match format {
        StructureFormat::Pdb => PdbFile::read_from_path(path)
            .map_err(|source| StructureIoError::Pdb { path: to_path(), source })?,
        StructureFormat::Cif => CifFile::read_from_path(path)
            .map_err(|source| StructureIoError::Cif { path: to_path(), source })?,
        StructureFormat::Prot => ProtFile::read_from_path(path)
            .map_err(|source| StructureIoError::Prot { path: to_path(), source })?,
    };
    debug!(path = %path.display(), ?format, residues = structure.len(), "Structure loaded.");
    Ok(structure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn format_is_detected_case_insensitively() {
        assert_eq!(StructureFormat::from_path(Path::new("a/model.PDB")), Some(StructureFormat::Pdb));
        assert_eq!(StructureFormat::from_path(Path::new("model.mmcif")), Some(StructureFormat::Cif));
        assert_eq!(StructureFormat::from_path(Path::new("model.Cif")), Some(StructureFormat::Cif));
        assert_eq!(StructureFormat::from_path(Path::new("model.prot")), Some(StructureFormat::Prot));
        assert_eq!(StructureFormat::from_path(Path::new("model.xyz")), None);
        assert_eq!(StructureFormat::from_path(Path::new("model")), None);
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        let err = load_structure(Path::new("input.xyz")).unwrap_err();
        assert!(matches!(err, StructureIoError::UnsupportedFormat(p) if p == Path::new("input.xyz")));
    }

    #[test]
    fn loads_pdb_from_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.pdb");
        fs::write(
            &path,
            "ATOM      2  CA  ALA A   1      11.639   6.071  -5.147  1.00  0.00           C\n",
        )
        .unwrap();

        let structure = load_structure(&path).unwrap();
        assert_eq!(structure.len(), 1);
    }

    #[test]
    fn parse_failure_carries_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.pdb");
        fs::write(&path, "END\n").unwrap();

        match load_structure(&path).unwrap_err() {
            StructureIoError::Pdb { path: p, source: PdbError::MissingRecord(_) } => assert_eq!(p, path),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
