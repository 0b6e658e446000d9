//! End-to-end predictions through the in-process mock backend.

use std::sync::Arc;

use mhcpred_core::{
    BackendAdapter, BatchLimits, ExecutionOptions, MhcPredError, MockBackend, MockFault, Predictor, ProteinSequence,
};
use pretty_assertions::assert_eq;

/// Trp-cage miniprotein.
const TRP_CAGE: &str = "NLYIQWLKDGGPSSGRPPPS";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Mock whose IC50 grows with the window offset, so offset 0 binds best.
fn graded_mock() -> MockBackend {
    let windows = ProteinSequence::new("1L2Y", TRP_CAGE).unwrap().windows(9);
    windows.iter().fold(MockBackend::new(), |mock, w| {
        mock.with_affinity(&w.peptide, 50.0 * (w.offset + 1) as f64)
    })
}

#[tokio::test]
async fn test_trp_cage_ranked_by_affinity() {
    init_tracing();
    let predictor = Predictor::new(Arc::new(graded_mock()), &["A*02:01"], ExecutionOptions::default()).unwrap();
    let collection = predictor.predict([("1L2Y", TRP_CAGE)]).await.unwrap();

    assert_eq!(collection.len(), 12);
    let best = collection.index(0).unwrap();
    assert_eq!(best.offset(), 0);
    assert_eq!(best.peptide(), "NLYIQWLKD");
    assert_eq!(best.affinity(), Some(50.0));
    assert_eq!(best.percentile_rank(), 0.0);
    assert_eq!(best.predictor(), "mock");

    let offsets: Vec<usize> = collection.iter().map(|r| r.offset()).collect();
    assert_eq!(offsets, (0..12).collect::<Vec<_>>());
    assert!(collection
        .iter()
        .map(|r| r.percentile_rank())
        .collect::<Vec<_>>()
        .windows(2)
        .all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn test_cross_product_over_lengths_and_alleles() {
    let mock = Arc::new(MockBackend::new().with_limits(BatchLimits {
        max_alleles_per_call: 1,
        max_peptides_per_call: 3,
        max_sequences_per_call: 1,
    }));
    let options = ExecutionOptions {
        peptide_lengths: vec![8, 9, 10],
        concurrency: 3,
        ..Default::default()
    };
    let predictor = Predictor::new(mock.clone(), &["A0201", "B*07:02", "hla-c0702"], options).unwrap();
    let collection = predictor
        .predict(vec![("1L2Y", TRP_CAGE), ("ova", "SIINFEKLAV")])
        .await
        .unwrap();

    // (13 + 12 + 11) + (3 + 2 + 1) windows, three alleles each
    assert_eq!(collection.len(), 42 * 3);
    assert_eq!(collection.group_by_allele().len(), 3);
    assert_eq!(collection.group_by_sequence().get("ova").map(|g| g.len()), Some(18));
    assert!(mock.peak_in_flight() <= 3);
}

#[tokio::test]
async fn test_native_ranks_are_kept() {
    let mock = MockBackend::new().with_native_ranks().with_affinity("SIINFEKLA", 250.0);
    let predictor = Predictor::new(Arc::new(mock), &["A0201"], ExecutionOptions::default()).unwrap();
    let collection = predictor.predict([("ova", "SIINFEKLAV")]).await.unwrap();
    let record = collection.iter().find(|r| r.peptide() == "SIINFEKLA").unwrap();
    assert_eq!(record.percentile_rank(), 0.5);
}

#[tokio::test]
async fn test_malformed_output_is_unparsable() {
    let mock = MockBackend::new().with_fault(MockFault::Garbage("<html>maintenance</html>".into()));
    let options = ExecutionOptions {
        concurrency: 1,
        ..Default::default()
    };
    let predictor = Predictor::new(Arc::new(mock), &["A0201"], options).unwrap();
    let err = predictor.predict([("1L2Y", TRP_CAGE)]).await.unwrap_err();
    assert!(matches!(err.root_cause(), MhcPredError::UnparsableOutput { .. }), "{err}");
}

#[tokio::test]
async fn test_equivalent_allele_spellings_merge() {
    let left = Predictor::new(Arc::new(graded_mock()), &["hla-a0101"], ExecutionOptions::default())
        .unwrap()
        .predict([("1L2Y", TRP_CAGE)])
        .await
        .unwrap();
    let right = Predictor::new(Arc::new(graded_mock()), &["A*01:01"], ExecutionOptions::default())
        .unwrap()
        .predict([("1L2Y", TRP_CAGE)])
        .await
        .unwrap();

    let merged = left.merge(&right);
    assert_eq!(merged.len(), 12);
    assert_eq!(merged.alleles().len(), 1);
    assert_eq!(merged, left);
}

#[tokio::test]
async fn test_collection_serializes_in_rank_order() {
    let predictor = Predictor::new(Arc::new(graded_mock()), &["A0201"], ExecutionOptions::default()).unwrap();
    let collection = predictor.predict([("1L2Y", TRP_CAGE)]).await.unwrap();
    let json = serde_json::to_value(collection.top(2)).unwrap();
    let rows = json.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["offset"], 0);
    assert_eq!(rows[1]["offset"], 1);
    assert_eq!(rows[0]["allele"], "HLA-A*02:01");
}

#[tokio::test]
async fn test_backend_is_usable_as_trait_object() {
    let adapter: Arc<dyn BackendAdapter> = Arc::new(MockBackend::new().with_name("mock-v2"));
    let predictor = Predictor::new(adapter, &["A0201"], ExecutionOptions::default()).unwrap();
    assert_eq!(predictor.backend_name(), "mock-v2");
    let collection = predictor.predict_peptides(&["SIINFEKL"]).await.unwrap();
    assert_eq!(collection.first().map(|r| r.predictor()), Some("mock-v2"));
}
