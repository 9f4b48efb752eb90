//! Fragment index accelerated search
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use identity_hash::BuildIdentityHasher;
use mzpeaks::{prelude::*, Tolerance};

use crate::acceptor::MassDiffAcceptor;
use crate::index::{CandidateId, CandidateIndex};
use crate::scorer::PreparedSpectrum;
use crate::spectral_match::{MatchAccumulator, SpectralMatch};
use crate::spectrum::Spectrum;

use super::{SearchParams, SearchStrategy};

pub(crate) type HitCounts = HashMap<CandidateId, u32, BuildIdentityHasher<CandidateId>>;

/// Every mass an observed peak may stand for: its own mass, the masses of the higher
/// charge fragments it may be, and its complement. A fragment the scorer can match
/// lies within the paired tolerance of one of these.
pub(crate) fn probe_masses(params: &SearchParams, prepared: &PreparedSpectrum) -> Vec<(f64, Tolerance)> {
    let spectrum = prepared.spectrum;
    let tolerance = params.scorer.params.fragment_tolerance;
    let mut probes =
        Vec::with_capacity(spectrum.peaks.len() * (2 + prepared.charges.len()));
    for peak in spectrum.peaks.iter() {
        probes.push((peak.neutral_mass, tolerance));
        for z in prepared.charges.iter().copied() {
            probes.push((peak.neutral_mass * z as f64, scale_tolerance(tolerance, z)));
        }
    }
    if params.scorer.params.complementary_ions {
        probes.extend(
            params
                .scorer
                .complement_masses(spectrum)
                .into_iter()
                .map(|m| (m, tolerance)),
        );
    }
    probes
}

/// An absolute error on the apparent mass of a charge `z` ion grows `z` fold on its
/// true mass. Relative errors are unchanged.
fn scale_tolerance(tolerance: Tolerance, z: i32) -> Tolerance {
    match tolerance {
        Tolerance::Da(d) => Tolerance::Da(d * z.unsigned_abs() as f64),
        ppm => ppm,
    }
}

/// Count fragment index hits per candidate over all probe masses, optionally only for
/// candidates whose id falls in one of `allowed`.
pub(crate) fn count_hits(
    index: &CandidateIndex,
    probes: &[(f64, Tolerance)],
    allowed: Option<&[Range<usize>]>,
) -> HitCounts {
    let mut hits = HitCounts::default();
    for (probe, tolerance) in probes.iter().copied() {
        for id in index.candidates_for_fragment(probe, tolerance) {
            if let Some(allowed) = allowed {
                if !allowed.iter().any(|r| r.contains(&(id as usize))) {
                    continue;
                }
            }
            *hits.entry(id).or_default() += 1;
        }
    }
    hits
}

/// Search only the candidates that share enough fragments with the spectrum to
/// possibly reach the minimum score.
///
/// The hit threshold is derived from the minimum score and the largest weight a
/// single fragment match can carry, so as long as every fragment fits within the
/// index's mass limit and `min_index_hits` is unset, this accepts exactly the same
/// hypotheses as [`ExhaustiveSearch`](super::ExhaustiveSearch).
#[derive(Debug, Clone)]
pub struct IndexedSearch {
    index: Arc<CandidateIndex>,
    params: SearchParams,
}

impl IndexedSearch {
    pub fn new(index: impl Into<Arc<CandidateIndex>>, params: SearchParams) -> Self {
        let index: Arc<CandidateIndex> = index.into();
        if index.params().fragment_terminus.is_some() {
            tracing::warn!(
                "Indexed search over a fragment index restricted to one terminus will miss candidates"
            );
        }
        Self { index, params }
    }

    pub fn index(&self) -> &Arc<CandidateIndex> {
        &self.index
    }

    pub fn params(&self) -> &SearchParams {
        &self.params
    }

    /// The ranges of candidate ids whose precursor mass the acceptor could accept
    fn precursor_ranges(&self, spectrum: &Spectrum) -> Vec<Range<usize>> {
        let candidates = self.index.candidates();
        self.params
            .acceptor
            .intervals_from_observed(spectrum.precursor_mass)
            .into_iter()
            .map(|iv| candidates.indices_in_mass_range(iv.min, iv.max))
            .filter(|r| !r.is_empty())
            .collect()
    }
}

impl SearchStrategy for IndexedSearch {
    fn name(&self) -> &'static str {
        "indexed"
    }

    fn search_spectrum(&self, spectrum: &Spectrum) -> Option<SpectralMatch> {
        if spectrum.is_empty() {
            tracing::trace!("Spectrum {} has no peaks", spectrum.query_index);
            return None;
        }
        let ranges = self.precursor_ranges(spectrum);
        if ranges.is_empty() {
            return None;
        }

        let prepared = self.params.scorer.prepare(spectrum);
        let probes = probe_masses(&self.params, &prepared);
        let hits = count_hits(&self.index, &probes, Some(&ranges));

        let threshold = self.params.scorer.params.prefilter_threshold();
        let mut passing: Vec<CandidateId> = hits
            .into_iter()
            .filter(|(_, count)| *count >= threshold)
            .map(|(id, _)| id)
            .collect();
        passing.sort_unstable();
        tracing::trace!(
            "Spectrum {}: {} candidates passed the {threshold} hit threshold",
            spectrum.query_index,
            passing.len()
        );

        let candidates = self.index.candidates();
        let mut accumulator = MatchAccumulator::for_spectrum(spectrum);
        for id in passing {
            let candidate = &candidates[id as usize];
            if let Some(hypothesis) = self.params.evaluate(candidate, &prepared) {
                accumulator.add(hypothesis);
            }
        }
        accumulator.finish()
    }
}
