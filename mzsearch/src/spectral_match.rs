//! Per-spectrum accumulation of the best scoring hypotheses
use std::sync::Arc;

use crate::acceptor::Notch;
use crate::candidate::{Candidate, CandidateKey};
use crate::scorer::{FragmentMatches, MatchedIon, ScoreType, SCORE_TOLERANCE};
use crate::spectrum::Spectrum;

/// One accepted (candidate, notch, score) proposal for a spectrum
#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis {
    pub candidate: Arc<Candidate>,
    pub notch: Notch,
    pub score: ScoreType,
    pub ions: Vec<MatchedIon>,
}

impl Hypothesis {
    pub fn new(candidate: Arc<Candidate>, notch: Notch, matches: FragmentMatches) -> Self {
        Self {
            candidate,
            notch,
            score: matches.score,
            ions: matches.ions,
        }
    }

    pub fn key(&self) -> CandidateKey {
        self.candidate.key
    }

    pub fn is_decoy(&self) -> bool {
        self.candidate.is_decoy
    }

    fn same_identity(&self, other: &Hypothesis) -> bool {
        self.key() == other.key() && self.notch == other.notch
    }
}

/// How a spectrum's set of tied candidates was settled
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Resolution {
    /// Not yet seen by a disambiguator
    #[default]
    Unresolved,
    /// Only one candidate attained the best score
    Unambiguous,
    /// Several candidates tied and all were kept
    AmbiguousRetained,
    /// Several candidates tied and one was chosen
    AmbiguousResolved,
}

/// The best scoring candidates for one spectrum, frozen for disambiguation and FDR
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralMatch {
    pub scan_id: u64,
    pub query_index: usize,
    pub precursor_mass: f64,
    score: ScoreType,
    runner_up_score: Option<ScoreType>,
    tied: Vec<Hypothesis>,
    resolution: Resolution,
}

impl SpectralMatch {
    /// Assemble a match directly. `tied` must not be empty and is put in canonical order.
    pub fn from_parts(
        scan_id: u64,
        query_index: usize,
        precursor_mass: f64,
        score: ScoreType,
        runner_up_score: Option<ScoreType>,
        mut tied: Vec<Hypothesis>,
        resolution: Resolution,
    ) -> Self {
        tied.sort_by(|a, b| a.key().cmp(&b.key()).then(a.notch.cmp(&b.notch)));
        Self {
            scan_id,
            query_index,
            precursor_mass,
            score,
            runner_up_score,
            tied,
            resolution,
        }
    }

    pub fn score(&self) -> ScoreType {
        self.score
    }

    /// The best score strictly below [`SpectralMatch::score`], if any was seen
    pub fn runner_up_score(&self) -> Option<ScoreType> {
        self.runner_up_score
    }

    pub fn delta_score(&self) -> Option<ScoreType> {
        self.runner_up_score.map(|r| self.score - r)
    }

    pub fn tied(&self) -> &[Hypothesis] {
        &self.tied
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// The single identification, when exactly one candidate remains
    pub fn best(&self) -> Option<&Hypothesis> {
        match self.tied.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    /// The notch shared by every tied candidate, if they agree
    pub fn notch(&self) -> Option<Notch> {
        let first = self.tied.first()?.notch;
        self.tied.iter().all(|h| h.notch == first).then_some(first)
    }

    /// A match counts as a decoy if any of its tied candidates is a decoy
    pub fn is_decoy(&self) -> bool {
        self.tied.iter().any(|h| h.is_decoy())
    }

    pub fn is_ambiguous(&self) -> bool {
        self.tied.len() > 1
    }

    /// Replace the tied set with the outcome of disambiguation
    pub fn resolve_to(mut self, tied: Vec<Hypothesis>, resolution: Resolution) -> Self {
        if !tied.is_empty() {
            self.tied = tied;
        }
        self.resolution = resolution;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum AccumulatorState {
    #[default]
    Empty,
    HasCandidates {
        score: ScoreType,
        runner_up: Option<ScoreType>,
        tied: Vec<Hypothesis>,
    },
}

/// Collects hypotheses for one spectrum, keeping only those tied for the best score.
///
/// Owned by whichever worker is searching the spectrum and consumed by
/// [`MatchAccumulator::finish`].
#[derive(Debug, Clone, PartialEq)]
pub struct MatchAccumulator {
    pub scan_id: u64,
    pub query_index: usize,
    pub precursor_mass: f64,
    state: AccumulatorState,
}

impl MatchAccumulator {
    pub fn new(scan_id: u64, query_index: usize, precursor_mass: f64) -> Self {
        Self {
            scan_id,
            query_index,
            precursor_mass,
            state: AccumulatorState::Empty,
        }
    }

    pub fn for_spectrum(spectrum: &Spectrum) -> Self {
        Self::new(
            spectrum.scan_id,
            spectrum.query_index,
            spectrum.precursor_mass,
        )
    }

    pub fn state(&self) -> &AccumulatorState {
        &self.state
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.state, AccumulatorState::Empty)
    }

    pub fn add(&mut self, hypothesis: Hypothesis) {
        match &mut self.state {
            AccumulatorState::Empty => {
                self.state = AccumulatorState::HasCandidates {
                    score: hypothesis.score,
                    runner_up: None,
                    tied: vec![hypothesis],
                };
            }
            AccumulatorState::HasCandidates {
                score,
                runner_up,
                tied,
            } => {
                if hypothesis.score > *score + SCORE_TOLERANCE {
                    *runner_up = Some(*score);
                    *score = hypothesis.score;
                    tied.clear();
                    tied.push(hypothesis);
                } else if hypothesis.score >= *score - SCORE_TOLERANCE {
                    if !tied.iter().any(|h| h.same_identity(&hypothesis)) {
                        tied.push(hypothesis);
                    }
                } else {
                    *runner_up = Some(match *runner_up {
                        Some(r) => r.max(hypothesis.score),
                        None => hypothesis.score,
                    });
                }
            }
        }
    }

    pub fn extend<I: IntoIterator<Item = Hypothesis>>(&mut self, hypotheses: I) {
        hypotheses.into_iter().for_each(|h| self.add(h));
    }

    /// Freeze the accumulated state, or `None` if nothing was accepted
    pub fn finish(self) -> Option<SpectralMatch> {
        match self.state {
            AccumulatorState::Empty => None,
            AccumulatorState::HasCandidates {
                score,
                runner_up,
                tied,
            } => Some(SpectralMatch::from_parts(
                self.scan_id,
                self.query_index,
                self.precursor_mass,
                score,
                runner_up,
                tied,
                Resolution::Unresolved,
            )),
        }
    }
}
