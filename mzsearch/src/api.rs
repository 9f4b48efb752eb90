//! High level APIs for searching spectra and controlling the FDR of the results
use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::acceptor::AcceptorError;
use crate::candidate::{CandidateSet, Specificity};
use crate::disambiguation::Disambiguator;
use crate::fdr::{FdrEngine, FdrResults};
use crate::index::{CandidateIndex, IndexError, IndexParams};
use crate::mass::Terminus;
use crate::scorer::ScoringError;
use crate::search::{
    ExhaustiveSearch, IndexedSearch, PartitionedMatch, SearchParams, SearchStrategy,
    TerminusAgnosticSearch,
};
use crate::spectral_match::SpectralMatch;
use crate::spectrum::Spectrum;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Invalid precursor acceptor: {0}")]
    Acceptor(#[from] AcceptorError),
    #[error("Invalid index configuration: {0}")]
    Index(#[from] IndexError),
    #[error("Invalid scoring configuration: {0}")]
    Scoring(#[from] ScoringError),
    #[error("A terminus-agnostic search requires at least one specificity category")]
    EmptySpecificities,
}

/// The search strategies a [`SearchEngine`] can be built with
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum StrategyKind {
    Exhaustive,
    #[default]
    Indexed,
    TerminusAgnostic,
}

impl Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Exhaustive => "exhaustive",
            Self::Indexed => "indexed",
            Self::TerminusAgnostic => "terminus-agnostic",
        };
        f.write_str(name)
    }
}

/// A population of matches that shares one FDR estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum Partition {
    All,
    Specificity(Specificity),
}

impl Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Specificity(s) => write!(f, "{s}"),
        }
    }
}

/// The result of searching one spectrum
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Plain(Option<SpectralMatch>),
    Partitioned(PartitionedMatch),
}

impl SearchOutcome {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Plain(m) => m.is_none(),
            Self::Partitioned(p) => p.is_empty(),
        }
    }

    /// Split the outcome into the matches belonging to each [`Partition`]
    pub fn into_partitions(self) -> Vec<(Partition, SpectralMatch)> {
        match self {
            Self::Plain(m) => m.into_iter().map(|m| (Partition::All, m)).collect(),
            Self::Partitioned(p) => p
                .into_tracks()
                .map(|(s, m)| (Partition::Specificity(s), m))
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
enum Strategy {
    Exhaustive(ExhaustiveSearch),
    Indexed(IndexedSearch),
    TerminusAgnostic(TerminusAgnosticSearch),
}

/// A configured search strategy with its candidate structures built and ready to be
/// shared across threads.
///
/// Prefer building one instance and reusing it for every spectrum of a run, since
/// building the fragment index is the expensive part.
#[derive(Debug, Clone)]
pub struct SearchEngine {
    strategy: Strategy,
}

impl SearchEngine {
    pub fn exhaustive(
        candidates: impl Into<Arc<CandidateSet>>,
        params: SearchParams,
    ) -> Result<Self, SearchError> {
        params.scorer.params.validate()?;
        Ok(Self {
            strategy: Strategy::Exhaustive(ExhaustiveSearch::new(candidates, params)),
        })
    }

    pub fn indexed(
        candidates: impl Into<Arc<CandidateSet>>,
        index_params: IndexParams,
        params: SearchParams,
    ) -> Result<Self, SearchError> {
        params.scorer.params.validate()?;
        let index = CandidateIndex::build(candidates, index_params.fragment_terminus(None))?;
        Ok(Self {
            strategy: Strategy::Indexed(IndexedSearch::new(index, params)),
        })
    }

    /// Search truncations of `candidates` anchored at `fixed_terminus`, reporting a
    /// separate match for each category in `specificities`.
    pub fn terminus_agnostic(
        candidates: impl Into<Arc<CandidateSet>>,
        index_params: IndexParams,
        params: SearchParams,
        fixed_terminus: Terminus,
        specificities: &[Specificity],
    ) -> Result<Self, SearchError> {
        if specificities.is_empty() {
            return Err(SearchError::EmptySpecificities);
        }
        params.scorer.params.validate()?;
        let search = TerminusAgnosticSearch::build(
            candidates,
            index_params,
            params,
            fixed_terminus,
            specificities,
        )?;
        Ok(Self {
            strategy: Strategy::TerminusAgnostic(search),
        })
    }

    pub fn kind(&self) -> StrategyKind {
        match &self.strategy {
            Strategy::Exhaustive(_) => StrategyKind::Exhaustive,
            Strategy::Indexed(_) => StrategyKind::Indexed,
            Strategy::TerminusAgnostic(_) => StrategyKind::TerminusAgnostic,
        }
    }

    /// The strategy behind this engine as a plain [`SearchStrategy`]
    pub fn strategy(&self) -> &dyn SearchStrategy {
        match &self.strategy {
            Strategy::Exhaustive(s) => s as &dyn SearchStrategy,
            Strategy::Indexed(s) => s,
            Strategy::TerminusAgnostic(s) => s,
        }
    }

    /// The partitions this engine's results are divided into
    pub fn partitions(&self) -> Vec<Partition> {
        match &self.strategy {
            Strategy::TerminusAgnostic(s) => s
                .specificities()
                .iter()
                .copied()
                .map(Partition::Specificity)
                .collect(),
            _ => vec![Partition::All],
        }
    }

    pub fn search_spectrum(&self, spectrum: &Spectrum) -> SearchOutcome {
        match &self.strategy {
            Strategy::Exhaustive(s) => SearchOutcome::Plain(s.search_spectrum(spectrum)),
            Strategy::Indexed(s) => SearchOutcome::Plain(s.search_spectrum(spectrum)),
            Strategy::TerminusAgnostic(s) => {
                SearchOutcome::Partitioned(s.search_partitioned(spectrum))
            }
        }
    }

    /// Search `spectra` in order on the current thread, stopping before the next
    /// spectrum once `cancel` is set. The outcomes of every spectrum searched before
    /// that are returned.
    pub fn search_all(&self, spectra: &[Spectrum], cancel: &AtomicBool) -> Vec<SearchOutcome> {
        let mut outcomes = Vec::with_capacity(spectra.len());
        for spectrum in spectra.iter() {
            if cancel.load(Ordering::Relaxed) {
                tracing::info!(
                    "Search cancelled after {} of {} spectra",
                    outcomes.len(),
                    spectra.len()
                );
                break;
            }
            outcomes.push(self.search_spectrum(spectrum));
        }
        outcomes
    }
}

/// Collect the matches of many outcomes by [`Partition`]
pub fn group_by_partition<I: IntoIterator<Item = SearchOutcome>>(
    outcomes: I,
) -> BTreeMap<Partition, Vec<SpectralMatch>> {
    let mut groups: BTreeMap<Partition, Vec<SpectralMatch>> = BTreeMap::new();
    for outcome in outcomes {
        for (partition, m) in outcome.into_partitions() {
            groups.entry(partition).or_default().push(m);
        }
    }
    groups
}

/// Settle the tied candidates of every match with `disambiguator`
pub fn disambiguate_all<D: Disambiguator + ?Sized>(
    matches: Vec<SpectralMatch>,
    disambiguator: &D,
) -> Vec<SpectralMatch> {
    matches
        .into_iter()
        .map(|m| disambiguator.resolve(m))
        .collect()
}

/// Rank one population of matches and assign their q-values
pub fn assign_q_values(matches: Vec<SpectralMatch>, engine: &FdrEngine) -> FdrResults {
    engine.run(matches)
}
