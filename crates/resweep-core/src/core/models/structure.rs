use super::residue::Residue;

/// The residue-indexed structure refined by the scheduler.
///
/// Residue order is fixed once the structure is loaded: the index of a residue in
/// this collection is its entity id for the whole run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Structure {
    residues: Vec<Residue>,
}

impl Structure {
    /// Creates a new, empty structure.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_residues(residues: Vec<Residue>) -> Self {
        Self { residues }
    }

    /// Appends a residue and returns its index.
    pub fn push(&mut self, residue: Residue) -> usize {
        self.residues.push(residue);
        self.residues.len() - 1
    }

    pub fn len(&self) -> usize {
        self.residues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.residues.is_empty()
    }

    pub fn residue(&self, index: usize) -> Option<&Residue> {
        self.residues.get(index)
    }

    pub fn residue_mut(&mut self, index: usize) -> Option<&mut Residue> {
        self.residues.get_mut(index)
    }

    pub fn residues(&self) -> &[Residue] {
        &self.residues
    }

    /// Current positions as plain coordinate arrays, in residue order.
    ///
    /// This is the layout expected by the k-d tree used for neighbour and crop queries.
    pub fn positions(&self) -> Vec<[f64; 3]> {
        self.residues
            .iter()
            .map(|r| [r.position.x, r.position.y, r.position.z])
            .collect()
    }

    /// Finds a residue by chain identifier and residue number.
    pub fn find(&self, chain_id: &str, residue_number: isize) -> Option<usize> {
        self.residues
            .iter()
            .position(|r| r.chain_id == chain_id && r.residue_number == residue_number)
    }
}
