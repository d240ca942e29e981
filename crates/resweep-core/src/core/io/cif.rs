use crate::core::io::traits::StructureFile;
use crate::core::models::amino_acid::AminoAcid;
use crate::core::models::residue::Residue;
use crate::core::models::structure::Structure;
use nalgebra::Point3;
use std::collections::{HashMap, HashSet};
use std::io::{self, BufRead, Write};
use thiserror::Error;

const ATOM_SITE_PREFIX: &str = "_atom_site.";

#[derive(Debug, Error)]
pub enum CifError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Parse error on line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("Required _atom_site column is missing: {0}")]
    MissingColumn(&'static str),
    #[error("Missing required record: {0}")]
    MissingRecord(String),
}

/// Splits one mmCIF data line into tokens, honouring single and double quotes.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i].is_whitespace() {
            i += 1;
            continue;
        }
        if chars[i] == '#' {
            break;
        }
        if chars[i] == '\'' || chars[i] == '"' {
            let quote = chars[i];
            let start = i + 1;
            let mut end = start;
            // A quote only closes a value when followed by whitespace or end of line.
            while end < chars.len()
                && !(chars[end] == quote
                    && chars.get(end + 1).is_none_or(|c| c.is_whitespace()))
            {
                end += 1;
            }
            tokens.push(chars[start..end.min(chars.len())].iter().collect());
            i = end + 1;
        } else {
            let start = i;
            while i < chars.len() && !chars[i].is_whitespace() {
                i += 1;
            }
            tokens.push(chars[start..i].iter().collect());
        }
    }
    tokens
}

fn is_null(value: &str) -> bool {
    value == "?" || value == "."
}

/// Column positions of the `_atom_site` fields the reader needs.
struct AtomSiteColumns {
    group: Option<usize>,
    atom_name: usize,
    alt_id: Option<usize>,
    comp_id: usize,
    asym_id: usize,
    seq_id: usize,
    ins_code: Option<usize>,
    x: usize,
    y: usize,
    z: usize,
    model: Option<usize>,
}

impl AtomSiteColumns {
    fn resolve(names: &[String]) -> Result<Self, CifError> {
        let lookup: HashMap<&str, usize> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();
        let find = |candidates: &[&str]| candidates.iter().find_map(|c| lookup.get(c).copied());
        let require = |candidates: &[&str], label: &'static str| {
            find(candidates).ok_or(CifError::MissingColumn(label))
        };

        Ok(Self {
            group: find(&["group_PDB"]),
            atom_name: require(&["label_atom_id", "auth_atom_id"], "label_atom_id")?,
            alt_id: find(&["label_alt_id"]),
            comp_id: require(&["label_comp_id", "auth_comp_id"], "label_comp_id")?,
            asym_id: require(&["auth_asym_id", "label_asym_id"], "auth_asym_id")?,
            seq_id: require(&["auth_seq_id", "label_seq_id"], "auth_seq_id")?,
            ins_code: find(&["pdbx_PDB_ins_code"]),
            x: require(&["Cartn_x"], "Cartn_x")?,
            y: require(&["Cartn_y"], "Cartn_y")?,
            z: require(&["Cartn_z"], "Cartn_z")?,
            model: find(&["pdbx_PDB_model_num"]),
        })
    }
}

/// Reader and writer for the `_atom_site` loop of mmCIF files, one C-alpha per residue.
pub struct CifFile;

impl CifFile {
    fn residue_from_row(
        row: &[String],
        columns: &AtomSiteColumns,
        line: usize,
    ) -> Result<Option<(Residue, String)>, CifError> {
        let field = |i: usize| row[i].as_str();
        let optional = |i: Option<usize>| i.map(|i| row[i].as_str()).filter(|v| !is_null(v));

        if field(columns.atom_name) != "CA" {
            return Ok(None);
        }
        if let Some(alt) = optional(columns.alt_id) {
            if alt != "A" {
                return Ok(None);
            }
        }
        let comp_id = field(columns.comp_id);
        if optional(columns.group) == Some("HETATM") && AminoAcid::from_three_letter(comp_id).is_none() {
            return Ok(None);
        }

        let parse_f64 = |i: usize, label: &str| -> Result<f64, CifError> {
            field(i).parse().map_err(|_| CifError::Parse {
                line,
                message: format!("invalid {} value '{}'", label, field(i)),
            })
        };
        let seq_str = field(columns.seq_id);
        let seq: isize = seq_str.parse().map_err(|_| CifError::Parse {
            line,
            message: format!("invalid residue number '{}'", seq_str),
        })?;
        let position = Point3::new(
            parse_f64(columns.x, "Cartn_x")?,
            parse_f64(columns.y, "Cartn_y")?,
            parse_f64(columns.z, "Cartn_z")?,
        );
        let ins_code = optional(columns.ins_code).unwrap_or("").to_string();

        Ok(Some((
            Residue::new(field(columns.asym_id), seq, comp_id, position),
            ins_code,
        )))
    }
}

impl StructureFile for CifFile {
    type Error = CifError;

    fn read_from(reader: &mut impl BufRead) -> Result<Structure, Self::Error> {
        let mut structure = Structure::new();
        let mut seen: HashSet<(String, isize, String)> = HashSet::new();

        let mut in_loop_header = false;
        let mut column_names: Vec<String> = Vec::new();
        let mut columns: Option<AtomSiteColumns> = None;
        let mut pending: Vec<String> = Vec::new();
        let mut first_model: Option<String> = None;

        for (line_num, line_res) in reader.lines().enumerate() {
            let line = line_res?;
            let line_num = line_num + 1;
            let trimmed = line.trim();

            if trimmed == "loop_" {
                if columns.is_some() {
                    break;
                }
                in_loop_header = true;
                column_names.clear();
                continue;
            }

            if in_loop_header {
                if let Some(name) = trimmed.strip_prefix(ATOM_SITE_PREFIX) {
                    column_names.push(name.to_string());
                    continue;
                }
                if trimmed.starts_with('_') {
                    in_loop_header = false;
                    column_names.clear();
                    continue;
                }
                in_loop_header = false;
                if column_names.is_empty() {
                    continue;
                }
                columns = Some(AtomSiteColumns::resolve(&column_names)?);
            }

            let Some(cols) = columns.as_ref() else {
                continue;
            };
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.starts_with('#') || trimmed.starts_with('_') || trimmed.starts_with("data_") {
                break;
            }

            pending.extend(tokenize(trimmed));
            if pending.len() < column_names.len() {
                continue;
            }
            if pending.len() > column_names.len() {
                return Err(CifError::Parse {
                    line: line_num,
                    message: format!(
                        "expected {} values in _atom_site row, found {}",
                        column_names.len(),
                        pending.len()
                    ),
                });
            }
            let row = std::mem::take(&mut pending);

            if let Some(model_col) = cols.model {
                let model = &row[model_col];
                match &first_model {
                    None => first_model = Some(model.clone()),
                    Some(first) if first != model => break,
                    Some(_) => {}
                }
            }

            if let Some((residue, ins_code)) = Self::residue_from_row(&row, cols, line_num)? {
                let key = (residue.chain_id.clone(), residue.residue_number, ins_code);
                if seen.insert(key) {
                    structure.push(residue);
                }
            }
        }

        if structure.is_empty() {
            return Err(CifError::MissingRecord("C-alpha _atom_site rows".into()));
        }
        Ok(structure)
    }

    fn write_to(structure: &Structure, writer: &mut impl Write) -> Result<(), Self::Error> {
        writeln!(writer, "data_resweep")?;
        writeln!(writer, "#")?;
        writeln!(writer, "loop_")?;
        for column in [
            "group_PDB",
            "id",
            "type_symbol",
            "label_atom_id",
            "label_comp_id",
            "auth_asym_id",
            "auth_seq_id",
            "Cartn_x",
            "Cartn_y",
            "Cartn_z",
            "occupancy",
            "B_iso_or_equiv",
        ] {
            writeln!(writer, "{}{}", ATOM_SITE_PREFIX, column)?;
        }
        for (i, residue) in structure.residues().iter().enumerate() {
            writeln!(
                writer,
                "ATOM {} C CA {} {} {} {:.3} {:.3} {:.3} 1.00 {:.2}",
                i + 1,
                residue.display_name(),
                residue.chain_id,
                residue.residue_number,
                residue.position.x,
                residue.position.y,
                residue.position.z,
                (residue.confidence * 100.0).clamp(0.0, 999.99),
            )?;
        }
        writeln!(writer, "#")?;
        Ok(())
    }
}
