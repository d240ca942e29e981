use crate::core::io::traits::StructureFile;
use crate::core::models::amino_acid::AminoAcid;
use crate::core::models::residue::Residue;
use crate::core::models::structure::Structure;
use nalgebra::Point3;
use std::collections::HashSet;
use std::io::{self, BufRead, Write};
use thiserror::Error;

const CA_ATOM_NAME: &str = "CA";
const MIN_COORDINATE_LINE_LEN: usize = 54;

#[derive(Debug, Error)]
pub enum PdbError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Parse error on line {line}: {kind}")]
    Parse { line: usize, kind: PdbParseErrorKind },
    #[error("Missing required record: {0}")]
    MissingRecord(String),
}

#[derive(Debug, Error)]
pub enum PdbParseErrorKind {
    #[error("Invalid integer format in columns {columns} (value: '{value}')")]
    InvalidInt { columns: String, value: String },
    #[error("Invalid float format in columns {columns} (value: '{value}')")]
    InvalidFloat { columns: String, value: String },
    #[error("Line is too short for ATOM/HETATM record (must be at least 54 chars)")]
    LineTooShort,
}

fn slice_and_trim(line: &str, start: usize, end: usize) -> &str {
    line.get(start..end.min(line.len())).unwrap_or("").trim()
}

fn parse_coordinate(line: &str, line_num: usize, start: usize, end: usize) -> Result<f64, PdbError> {
    let value = slice_and_trim(line, start, end);
    value.parse().map_err(|_| PdbError::Parse {
        line: line_num,
        kind: PdbParseErrorKind::InvalidFloat {
            columns: format!("{}-{}", start + 1, end),
            value: value.into(),
        },
    })
}

/// Reader and writer for PDB coordinate files, reduced to one C-alpha per residue.
pub struct PdbFile;

impl StructureFile for PdbFile {
    type Error = PdbError;

    fn read_from(reader: &mut impl BufRead) -> Result<Structure, Self::Error> {
        let mut structure = Structure::new();
        let mut seen: HashSet<(String, isize, String)> = HashSet::new();

        for (line_num, line_res) in reader.lines().enumerate() {
            let line = line_res?;
            let line_num = line_num + 1;

            let record_type = slice_and_trim(&line, 0, 6);
            match record_type {
                "ENDMDL" => break,
                "ATOM" | "HETATM" => {}
                _ => continue,
            }

            if line.len() < MIN_COORDINATE_LINE_LEN {
                return Err(PdbError::Parse {
                    line: line_num,
                    kind: PdbParseErrorKind::LineTooShort,
                });
            }

            if slice_and_trim(&line, 12, 16) != CA_ATOM_NAME {
                continue;
            }
            let alt_loc = slice_and_trim(&line, 16, 17);
            if !alt_loc.is_empty() && alt_loc != "A" {
                continue;
            }

            let res_name = slice_and_trim(&line, 17, 20);
            // A HETATM "CA" is calcium unless the residue is a known amino acid.
            if record_type == "HETATM" && AminoAcid::from_three_letter(res_name).is_none() {
                continue;
            }

            let chain_id = match slice_and_trim(&line, 21, 22) {
                "" => "A",
                id => id,
            };
            let res_seq_str = slice_and_trim(&line, 22, 26);
            let res_seq: isize = res_seq_str.parse().map_err(|_| PdbError::Parse {
                line: line_num,
                kind: PdbParseErrorKind::InvalidInt {
                    columns: "23-26".into(),
                    value: res_seq_str.into(),
                },
            })?;
            let insertion_code = slice_and_trim(&line, 26, 27);

            if !seen.insert((chain_id.to_string(), res_seq, insertion_code.to_string())) {
                continue;
            }

            let x = parse_coordinate(&line, line_num, 30, 38)?;
            let y = parse_coordinate(&line, line_num, 38, 46)?;
            let z = parse_coordinate(&line, line_num, 46, 54)?;

            structure.push(Residue::new(chain_id, res_seq, res_name, Point3::new(x, y, z)));
        }

        if structure.is_empty() {
            return Err(PdbError::MissingRecord("C-alpha ATOM records".into()));
        }
        Ok(structure)
    }

    fn write_to(structure: &Structure, writer: &mut impl Write) -> Result<(), Self::Error> {
        writeln!(writer, "REMARK   1 C-ALPHA MODEL GENERATED BY RESWEEP")?;
        let mut previous_chain: Option<&str> = None;
        for (i, residue) in structure.residues().iter().enumerate() {
            if let Some(prev) = previous_chain {
                if prev != residue.chain_id {
                    writeln!(writer, "TER")?;
                }
            }
            previous_chain = Some(&residue.chain_id);

            let chain = residue.chain_id.chars().next().unwrap_or('A');
            let b_factor = (residue.confidence * 100.0).clamp(0.0, 999.99);
            writeln!(
                writer,
                "ATOM  {:>5}  CA  {:>3} {:1}{:>4}    {:>8.3}{:>8.3}{:>8.3}{:>6.2}{:>6.2}           C",
                (i + 1) % 100_000,
                residue.display_name(),
                chain,
                residue.residue_number,
                residue.position.x,
                residue.position.y,
                residue.position.z,
                1.0,
                b_factor,
            )?;
        }
        writeln!(writer, "TER")?;
        writeln!(writer, "END")?;
        Ok(())
    }
}
