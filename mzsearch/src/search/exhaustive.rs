//! Brute force search of every candidate, the reference the other strategies must agree with
use std::sync::Arc;

use crate::candidate::CandidateSet;
use crate::spectral_match::{MatchAccumulator, SpectralMatch};
use crate::spectrum::Spectrum;

use super::{SearchParams, SearchStrategy};

#[derive(Debug, Clone)]
pub struct ExhaustiveSearch {
    candidates: Arc<CandidateSet>,
    params: SearchParams,
}

impl ExhaustiveSearch {
    pub fn new(candidates: impl Into<Arc<CandidateSet>>, params: SearchParams) -> Self {
        Self {
            candidates: candidates.into(),
            params,
        }
    }

    pub fn candidates(&self) -> &Arc<CandidateSet> {
        &self.candidates
    }

    pub fn params(&self) -> &SearchParams {
        &self.params
    }
}

impl SearchStrategy for ExhaustiveSearch {
    fn name(&self) -> &'static str {
        "exhaustive"
    }

    fn search_spectrum(&self, spectrum: &Spectrum) -> Option<SpectralMatch> {
        if spectrum.is_empty() {
            tracing::trace!("Spectrum {} has no peaks", spectrum.query_index);
            return None;
        }
        let prepared = self.params.scorer.prepare(spectrum);
        let mut accumulator = MatchAccumulator::for_spectrum(spectrum);
        for candidate in self.candidates.iter() {
            if let Some(hypothesis) = self.params.evaluate(candidate, &prepared) {
                accumulator.add(hypothesis);
            }
        }
        accumulator.finish()
    }
}
