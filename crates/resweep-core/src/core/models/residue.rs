use super::amino_acid::AminoAcid;
use nalgebra::Point3;

/// One residue of the structure and its current prediction state.
///
/// `position` starts at the input C-alpha coordinate and is overwritten with the running
/// average of all merged predictions as inference proceeds, so that later crops are cut
/// around the refined estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct Residue {
    pub chain_id: String,                   // Author chain identifier (e.g., "A")
    pub residue_number: isize,              // Sequence number from the source file
    pub name: String,                       // Residue name as read (e.g., "ALA")
    pub residue_type: Option<AminoAcid>,    // Parsed type, `None` for unknown names
    pub position: Point3<f64>,              // Current C-alpha estimate in Angstroms
    pub confidence: f64,                    // Mean predicted confidence, 0 before any pass
    pub predicted_type: Option<AminoAcid>,  // Most likely type from merged logits
}

impl Residue {
    pub fn new(chain_id: &str, residue_number: isize, name: &str, position: Point3<f64>) -> Self {
        Self {
            chain_id: chain_id.to_string(),
            residue_number,
            name: name.to_string(),
            residue_type: AminoAcid::from_three_letter(name),
            position,
            confidence: 0.0,
            predicted_type: None,
        }
    }

    /// The residue name to report: the predicted type once one exists, the input name otherwise.
    pub fn display_name(&self) -> &str {
        match self.predicted_type {
            Some(aa) => aa.to_three_letter(),
            None => &self.name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_residue_parses_type_from_name() {
        let residue = Residue::new("A", 12, "LYS", Point3::new(1.0, 2.0, 3.0));
        assert_eq!(residue.chain_id, "A");
        assert_eq!(residue.residue_number, 12);
        assert_eq!(residue.residue_type, Some(AminoAcid::Lysine));
        assert_eq!(residue.confidence, 0.0);
        assert!(residue.predicted_type.is_none());
    }

    #[test]
    fn unknown_name_leaves_type_empty() {
        let residue = Residue::new("B", 1, "UNK", Point3::origin());
        assert!(residue.residue_type.is_none());
        assert_eq!(residue.display_name(), "UNK");
    }

    #[test]
    fn display_name_prefers_prediction() {
        let mut residue = Residue::new("A", 1, "GLY", Point3::origin());
        residue.predicted_type = Some(AminoAcid::Serine);
        assert_eq!(residue.display_name(), "SER");
    }
}
