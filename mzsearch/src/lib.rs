//! Search tandem mass spectra against candidate sequences and control the false
//! discovery rate of the resulting matches with target-decoy competition.
pub mod acceptor;
pub mod adduct;
pub mod candidate;
pub mod charge;
pub mod mass;
pub mod scorer;
pub mod spectrum;

pub mod index;
pub mod search;
pub mod spectral_match;

pub mod disambiguation;
pub mod fdr;

pub mod api;

pub use acceptor::{
    AcceptorError, AcceptorKind, AcceptorSpec, AllowedInterval, MassDiffAcceptor, Notch,
};
pub use adduct::{Adduct, AdductRegistry};
pub use api::{
    assign_q_values, disambiguate_all, group_by_partition, Partition, SearchEngine, SearchError,
    SearchOutcome, StrategyKind,
};
pub use candidate::{Candidate, CandidateSet, Fragment, Specificity};
pub use disambiguation::{DisambiguationPolicy, Disambiguator, DisambiguatorKind};
pub use fdr::{FdrEngine, FdrRecord, FdrResults, FdrSummary, NotchSummary, ResolvedMatch};
pub use index::{CandidateIndex, IndexError, IndexParams};
pub use mass::{Dissociation, Terminus};
pub use scorer::{FragmentScorer, ScoringError, ScoringParams};
pub use search::{SearchParams, SearchStrategy};
pub use spectral_match::{Hypothesis, Resolution, SpectralMatch};
pub use spectrum::Spectrum;
