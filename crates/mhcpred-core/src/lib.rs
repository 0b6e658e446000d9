//! # mhcpred-core
//!
//! Runs MHC binding predictors behind one interface and turns their output
//! into a ranked [`EpitopeCollection`].
//!
//! A [`Predictor`] binds a [`BackendAdapter`] (a local command-line tool, a
//! remote service, or the in-process [`MockBackend`]) to a set of alleles.
//! `predict` slides peptide windows over each sequence, runs the backend
//! across the windows × alleles cross product on a bounded pool of tasks,
//! and normalises every output row into a [`BindingPrediction`].

pub mod backend;
pub mod collection;
pub mod driver;
pub mod normalise;
pub mod prediction;
pub mod predictor;
pub mod sequence;

pub use backend::{
    BackendAdapter, BatchLimits, IedbMethod, InvocationBatch, InvocationSpec, LocalCommandAdapter, LocalTool,
    MockBackend, MockFault, PredictionMode, RawOutput, RemoteServiceAdapter,
};
pub use collection::{EpitopeCollection, DEFAULT_STRONG_BINDER_RANK};
pub use driver::{CancelHandle, ExecutionDriver};
pub use prediction::{BindingPrediction, PredictionKey};
pub use predictor::Predictor;
pub use sequence::{PeptideWindow, ProteinSequence};

pub use mhcpred_alleles::{normalize, Allele};
pub use mhcpred_common::{ExecutionOptions, MhcPredError, PredictorOptions, Result};
