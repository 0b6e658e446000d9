use serde::Serialize;

use mhcpred_alleles::Allele;

/// One predicted (peptide, allele) binding.
///
/// Built only by the result normalizer, so every record carries a finite,
/// non-negative percentile rank. Fields are read through accessors; records
/// are never modified after construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BindingPrediction {
    sequence_id: String,
    offset: usize,
    peptide: String,
    allele: Allele,
    affinity: Option<f64>,
    percentile_rank: f64,
    score: Option<f64>,
    predictor: String,
}

/// Identity of a prediction within a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PredictionKey {
    pub sequence_id: String,
    pub offset: usize,
    pub length: usize,
    pub allele: Allele,
}

impl BindingPrediction {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        sequence_id: String,
        offset: usize,
        peptide: String,
        allele: Allele,
        affinity: Option<f64>,
        percentile_rank: f64,
        score: Option<f64>,
        predictor: String,
    ) -> Self {
        debug_assert!(percentile_rank.is_finite() && percentile_rank >= 0.0);
        Self {
            sequence_id,
            offset,
            peptide,
            allele,
            affinity,
            percentile_rank,
            score,
            predictor,
        }
    }

    pub fn sequence_id(&self) -> &str {
        &self.sequence_id
    }

    /// 0-based position of the peptide in its source sequence
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn peptide(&self) -> &str {
        &self.peptide
    }

    pub fn length(&self) -> usize {
        self.peptide.len()
    }

    pub fn allele(&self) -> &Allele {
        &self.allele
    }

    /// Predicted IC50 in nM
    pub fn affinity(&self) -> Option<f64> {
        self.affinity
    }

    /// Lower is stronger
    pub fn percentile_rank(&self) -> f64 {
        self.percentile_rank
    }

    /// Raw predictor score (log-affinity, elution or stability score)
    pub fn score(&self) -> Option<f64> {
        self.score
    }

    pub fn predictor(&self) -> &str {
        &self.predictor
    }

    pub fn key(&self) -> PredictionKey {
        PredictionKey {
            sequence_id: self.sequence_id.clone(),
            offset: self.offset,
            length: self.peptide.len(),
            allele: self.allele.clone(),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use mhcpred_alleles::normalize;

    /// Test helper: a prediction with the given placement and rank.
    pub fn prediction(sequence_id: &str, offset: usize, allele: &str, rank: f64) -> BindingPrediction {
        BindingPrediction::new(
            sequence_id.to_string(),
            offset,
            "SIINFEKL".to_string(),
            normalize(allele).unwrap(),
            Some(rank * 100.0),
            rank,
            None,
            "mock".to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::prediction;

    #[test]
    fn test_key_uses_canonical_allele() {
        let a = prediction("s", 3, "hla-a0201", 1.0);
        let b = prediction("s", 3, "HLA-A*02:01", 5.0);
        assert_eq!(a.key(), b.key());
        assert_eq!(a.length(), 8);
    }

    #[test]
    fn test_serializes_flat_record() {
        let record = prediction("s", 0, "A*02:01", 0.5);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["allele"], "HLA-A*02:01");
        assert_eq!(json["percentile_rank"], 0.5);
        assert_eq!(json["sequence_id"], "s");
    }
}
