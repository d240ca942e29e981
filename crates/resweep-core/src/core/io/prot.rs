use crate::core::io::traits::StructureFile;
use crate::core::models::amino_acid::AminoAcid;
use crate::core::models::residue::Residue;
use crate::core::models::structure::Structure;
use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, Write};
use thiserror::Error;

pub const PROT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ProtError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid protein state file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Failed to serialize protein state: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Unsupported format version {found} (expected {PROT_FORMAT_VERSION})")]
    UnsupportedVersion { found: u32 },
    #[error("Missing required record: {0}")]
    MissingRecord(String),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct ProtDocument {
    format_version: u32,
    #[serde(default)]
    residues: Vec<ProtResidue>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct ProtResidue {
    chain_id: String,
    residue_number: isize,
    name: String,
    position: [f64; 3],
    #[serde(default)]
    confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    predicted_type: Option<String>,
}

impl From<&Residue> for ProtResidue {
    fn from(residue: &Residue) -> Self {
        Self {
            chain_id: residue.chain_id.clone(),
            residue_number: residue.residue_number,
            name: residue.name.clone(),
            position: [residue.position.x, residue.position.y, residue.position.z],
            confidence: residue.confidence,
            predicted_type: residue.predicted_type.map(|aa| aa.to_three_letter().to_string()),
        }
    }
}

impl From<ProtResidue> for Residue {
    fn from(dto: ProtResidue) -> Self {
        let [x, y, z] = dto.position;
        let mut residue = Residue::new(&dto.chain_id, dto.residue_number, &dto.name, Point3::new(x, y, z));
        residue.confidence = dto.confidence;
        residue.predicted_type = dto
            .predicted_type
            .as_deref()
            .and_then(AminoAcid::from_three_letter);
        residue
    }
}

/// Lossless TOML snapshot of a refined structure, including per-residue confidence and
/// predicted types.
pub struct ProtFile;

impl StructureFile for ProtFile {
    type Error = ProtError;

    fn read_from(reader: &mut impl BufRead) -> Result<Structure, Self::Error> {
        let mut content = String::new();
        reader.read_to_string(&mut content)?;
        let document: ProtDocument = toml::from_str(&content)?;

        if document.format_version != PROT_FORMAT_VERSION {
            return Err(ProtError::UnsupportedVersion {
                found: document.format_version,
            });
        }
        if document.residues.is_empty() {
            return Err(ProtError::MissingRecord("[[residues]]".into()));
        }

        Ok(Structure::from_residues(
            document.residues.into_iter().map(Residue::from).collect(),
        ))
    }

    fn write_to(structure: &Structure, writer: &mut impl Write) -> Result<(), Self::Error> {
        let document = ProtDocument {
            format_version: PROT_FORMAT_VERSION,
            residues: structure.residues().iter().map(ProtResidue::from).collect(),
        };
        let text = toml::to_string(&document)?;
        writer.write_all(text.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trip_preserves_prediction_state() {
        let mut structure = Structure::new();
        let mut first = Residue::new("A", 3, "GLY", Point3::new(1.5, -2.25, 3.0));
        first.confidence = 0.8;
        first.predicted_type = Some(AminoAcid::Alanine);
        structure.push(first);
        structure.push(Residue::new("B", -1, "UNK", Point3::origin()));

        let mut buffer = Vec::new();
        ProtFile::write_to(&structure, &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("format-version = 1"));
        assert!(text.contains("[[residues]]"));

        let reread = ProtFile::read_from(&mut Cursor::new(text)).unwrap();
        assert_eq!(reread, structure);
    }

    #[test]
    fn future_version_is_rejected() {
        let text = "format-version = 2\n[[residues]]\nchain-id = \"A\"\nresidue-number = 1\nname = \"ALA\"\nposition = [0.0, 0.0, 0.0]\n";
        let err = ProtFile::read_from(&mut Cursor::new(text)).unwrap_err();
        assert!(matches!(err, ProtError::UnsupportedVersion { found: 2 }));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let text = "format-version = 1\nextra = true\n";
        let err = ProtFile::read_from(&mut Cursor::new(text)).unwrap_err();
        assert!(matches!(err, ProtError::Toml(_)));
    }

    #[test]
    fn empty_residue_list_is_missing_record() {
        let err = ProtFile::read_from(&mut Cursor::new("format-version = 1\n")).unwrap_err();
        assert!(matches!(err, ProtError::MissingRecord(_)));
    }
}
