//! Protein sequences and the peptide windows scored against them.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use mhcpred_common::{MhcPredError, Result};

/// Residues accepted in input sequences: the 20 standard amino acids plus `X`.
pub const AMINO_ACIDS: &str = "ACDEFGHIKLMNPQRSTVWYX";

/// A named protein sequence, stored upper-case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProteinSequence {
    pub id: String,
    pub residues: String,
}

impl ProteinSequence {
    pub fn new(id: impl Into<String>, residues: impl AsRef<str>) -> Result<Self> {
        let id = id.into();
        let residues = residues.as_ref().trim().to_ascii_uppercase();
        if id.is_empty() {
            return Err(MhcPredError::InvalidSequence {
                id,
                reason: "empty sequence identifier".into(),
            });
        }
        if residues.is_empty() {
            return Err(MhcPredError::InvalidSequence {
                id,
                reason: "empty sequence".into(),
            });
        }
        if let Some(bad) = residues.chars().find(|c| !AMINO_ACIDS.contains(*c)) {
            return Err(MhcPredError::InvalidSequence {
                id,
                reason: format!("invalid residue '{}'", bad),
            });
        }
        Ok(Self { id, residues })
    }

    pub fn len(&self) -> usize {
        self.residues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.residues.is_empty()
    }

    /// All windows of `length`, left to right. Empty when the sequence is shorter.
    pub fn windows(&self, length: usize) -> Vec<PeptideWindow> {
        if length == 0 || self.len() < length {
            return Vec::new();
        }
        (0..=self.len() - length)
            .map(|offset| PeptideWindow {
                sequence_id: self.id.clone(),
                offset,
                peptide: self.residues[offset..offset + length].to_string(),
            })
            .collect()
    }
}

/// Validates a caller-supplied (id, sequence) collection. Identifiers must be unique.
pub fn check_sequences<I, K, V>(sequences: I) -> Result<Vec<ProteinSequence>>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut checked = Vec::new();
    for (id, residues) in sequences {
        let sequence = ProteinSequence::new(id, residues)?;
        if !seen.insert(sequence.id.clone()) {
            return Err(MhcPredError::InvalidSequence {
                id: sequence.id,
                reason: "duplicate sequence identifier".into(),
            });
        }
        checked.push(sequence);
    }
    Ok(checked)
}

/// A fixed-length substring of a protein sequence at a 0-based offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeptideWindow {
    pub sequence_id: String,
    pub offset: usize,
    pub peptide: String,
}

impl PeptideWindow {
    pub fn len(&self) -> usize {
        self.peptide.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peptide.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_window_counts() {
        let seq = ProteinSequence::new("1L2Y", "NLYIQWLKDGGPSSGRPPPS").unwrap();
        for length in 1..=20 {
            assert_eq!(seq.windows(length).len(), 20 - length + 1);
        }
        assert!(seq.windows(21).is_empty());
        assert!(seq.windows(0).is_empty());
    }

    #[test]
    fn test_window_contents() {
        let seq = ProteinSequence::new("s", "siinfekl").unwrap();
        let windows = seq.windows(7);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].peptide, "SIINFEK");
        assert_eq!(windows[1].offset, 1);
        assert_eq!(windows[1].peptide, "IINFEKL");
        assert_eq!(windows[1].sequence_id, "s");
    }

    #[test]
    fn test_rejects_bad_sequences() {
        assert!(ProteinSequence::new("a", "").is_err());
        assert!(ProteinSequence::new("", "SIINFEKL").is_err());
        assert!(ProteinSequence::new("a", "SIIN*FEKL").is_err());
        assert!(ProteinSequence::new("a", "SIINBFEKL").is_err());
    }

    #[test]
    fn test_duplicate_ids() {
        let err = check_sequences(vec![("a", "SIINFEKL"), ("a", "SIINFEKL")]).unwrap_err();
        assert!(matches!(err, MhcPredError::InvalidSequence { .. }));
        assert_eq!(check_sequences(vec![("a", "SIINFEKL"), ("b", "KLA")]).unwrap().len(), 2);
    }
}
