use super::coverage::CoverageState;
use crate::core::models::amino_acid::{AMINO_ACID_COUNT, AminoAcid};
use crate::core::models::structure::Structure;
use nalgebra::Point3;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

pub fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Numerically stable softmax over amino-acid logits.
pub fn softmax(logits: &[f64; AMINO_ACID_COUNT]) -> [f64; AMINO_ACID_COUNT] {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut out = logits.map(|l| (l - max).exp());
    let sum: f64 = out.iter().sum();
    for p in &mut out {
        *p /= sum;
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinalResidue {
    pub index: usize,
    pub chain_id: String,
    pub residue_number: isize,
    pub input_name: String,
    pub position: Point3<f64>,
    pub confidence: f64,
    pub existence_probability: f64,
    pub aa_probabilities: [f64; AMINO_ACID_COUNT],
    pub predicted_type: Option<AminoAcid>,
    pub visits: u32,
}

/// Read-only per-residue outcome of a run. Residues that were never visited keep their
/// input position and carry no predicted type.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FinalResults {
    residues: Vec<FinalResidue>,
}

#[derive(Serialize)]
struct CsvRow<'a> {
    index: usize,
    chain: &'a str,
    residue_number: isize,
    input_name: &'a str,
    predicted_type: &'a str,
    visits: u32,
    x: f64,
    y: f64,
    z: f64,
    confidence: f64,
    existence_probability: f64,
    type_probability: f64,
}

impl FinalResults {
    pub fn from_state(state: &CoverageState, structure: &Structure) -> Self {
        let residues = structure
            .residues()
            .iter()
            .enumerate()
            .map(|(index, residue)| {
                let visits = state.count(index);
                let acc = state.accumulator(index);
                let visited = visits > 0;
                let aa_probabilities = softmax(&acc.aa_logits);
                let predicted_type = visited
                    .then(|| {
                        aa_probabilities
                            .iter()
                            .enumerate()
                            .max_by(|a, b| a.1.total_cmp(b.1))
                            .and_then(|(i, _)| AminoAcid::from_index(i))
                    })
                    .flatten();

                FinalResidue {
                    index,
                    chain_id: residue.chain_id.clone(),
                    residue_number: residue.residue_number,
                    input_name: residue.name.clone(),
                    position: if visited { acc.position } else { residue.position },
                    confidence: if visited { acc.confidence } else { 0.0 },
                    existence_probability: if visited { logistic(acc.existence) } else { 0.0 },
                    aa_probabilities,
                    predicted_type,
                    visits,
                }
            })
            .collect();
        Self { residues }
    }

    pub fn residues(&self) -> &[FinalResidue] {
        &self.residues
    }

    pub fn len(&self) -> usize {
        self.residues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.residues.is_empty()
    }

    /// Writes one CSV row per residue with a header line.
    pub fn write_csv(&self, writer: impl Write) -> Result<(), csv::Error> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        for r in &self.residues {
            let type_probability = r
                .predicted_type
                .map(|aa| r.aa_probabilities[aa.index()])
                .unwrap_or(0.0);
            csv_writer.serialize(CsvRow {
                index: r.index,
                chain: &r.chain_id,
                residue_number: r.residue_number,
                input_name: &r.input_name,
                predicted_type: r.predicted_type.map(AminoAcid::to_three_letter).unwrap_or(""),
                visits: r.visits,
                x: r.position.x,
                y: r.position.y,
                z: r.position.z,
                confidence: r.confidence,
                existence_probability: r.existence_probability,
                type_probability,
            })?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    pub fn write_csv_path(&self, path: &Path) -> Result<(), csv::Error> {
        self.write_csv(File::create(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::residue::Residue;
    use crate::engine::dispatch::ResiduePrediction;

    fn structure() -> Structure {
        Structure::from_residues(vec![
            Residue::new("A", 1, "GLY", Point3::new(1.0, 1.0, 1.0)),
            Residue::new("A", 2, "ALA", Point3::new(5.0, 1.0, 1.0)),
        ])
    }

    fn prediction(x: f64, lys_logit: f64) -> ResiduePrediction {
        let mut aa_logits = [0.0; AMINO_ACID_COUNT];
        aa_logits[AminoAcid::Lysine.index()] = lys_logit;
        ResiduePrediction {
            position: Point3::new(x, 0.0, 0.0),
            confidence: 0.6,
            existence: 0.0,
            aa_logits,
        }
    }

    #[test]
    fn softmax_sums_to_one_and_keeps_order() {
        let mut logits = [0.0; AMINO_ACID_COUNT];
        logits[3] = 2.0;
        logits[5] = 10.0;
        let p = softmax(&logits);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(p[5] > 0.99);
        assert!(p[3] > p[0]);
        assert!(p[5] > p[3]);
    }

    #[test]
    fn softmax_stays_finite_for_large_logits() {
        let mut logits = [0.0; AMINO_ACID_COUNT];
        logits[5] = 1000.0;
        let p = softmax(&logits);
        assert!(p.iter().all(|v| v.is_finite()));
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert_eq!(p[5], 1.0);
    }

    #[test]
    fn logistic_is_centred_at_zero() {
        assert_eq!(logistic(0.0), 0.5);
        assert!(logistic(10.0) > 0.9999);
        assert!(logistic(-10.0) < 1e-4);
    }

    #[test]
    fn visited_residues_report_averages() {
        let structure = structure();
        let mut state = CoverageState::new(2);
        state.record(0, &prediction(2.0, 4.0));
        state.record(0, &prediction(4.0, 2.0));

        let results = state.finalize(&structure);
        assert_eq!(results.len(), 2);
        let first = &results.residues()[0];
        assert_eq!(first.visits, 2);
        assert!((first.position.x - 3.0).abs() < 1e-12);
        assert!((first.confidence - 0.6).abs() < 1e-12);
        assert_eq!(first.existence_probability, 0.5);
        assert_eq!(first.predicted_type, Some(AminoAcid::Lysine));
    }

    #[test]
    fn unvisited_residues_keep_input_position() {
        let structure = structure();
        let results = CoverageState::new(2).finalize(&structure);
        let second = &results.residues()[1];
        assert_eq!(second.visits, 0);
        assert_eq!(second.position, Point3::new(5.0, 1.0, 1.0));
        assert!(second.predicted_type.is_none());
    }

    #[test]
    fn csv_has_header_and_one_row_per_residue() {
        let structure = structure();
        let mut state = CoverageState::new(2);
        state.record(1, &prediction(7.0, 3.0));

        let mut buffer = Vec::new();
        state.finalize(&structure).write_csv(&mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("index,chain,residue_number,input_name,predicted_type,visits"));
        assert!(lines[1].starts_with("0,A,1,GLY,,0,"));
        assert!(lines[2].starts_with("1,A,2,ALA,LYS,1,7.0,"));
    }
}
