/*! Search with only one terminus fixed by the digestion rule.

Candidates are source sequences (for example whole proteins or fully specific peptides)
whose fixed terminus is trusted while the other may fall anywhere. Fragment ions
containing the fixed terminus are shared by every truncation of a source, so a
fragment index restricted to those ions finds the sources worth truncating. The
observed precursor mass then pins down where the floating terminus falls.

Full-length matches are found separately through a [`PrecursorIndex`], because only
when the floating terminus coincides with the true end of the source do that end's
terminal modifications apply.
*/
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::acceptor::{AllowedInterval, MassDiffAcceptor};
use crate::candidate::{Candidate, CandidateSet, Specificity};
use crate::index::{CandidateId, CandidateIndex, IndexError, IndexParams, PrecursorIndex};
use crate::mass::{Terminus, WATER};
use crate::scorer::PreparedSpectrum;
use crate::spectral_match::{Hypothesis, MatchAccumulator, SpectralMatch};
use crate::spectrum::Spectrum;

use super::indexed::{count_hits, probe_masses};
use super::{SearchParams, SearchStrategy};

/// Independent best matches for one spectrum, one per specificity category.
///
/// Categories are kept apart because their score distributions under the null
/// hypothesis differ, so they must not share an FDR estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionedMatch {
    pub scan_id: u64,
    pub query_index: usize,
    pub tracks: Vec<(Specificity, Option<SpectralMatch>)>,
}

impl PartitionedMatch {
    pub fn get(&self, specificity: Specificity) -> Option<&SpectralMatch> {
        self.tracks
            .iter()
            .find(|(s, _)| *s == specificity)
            .and_then(|(_, m)| m.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.iter().all(|(_, m)| m.is_none())
    }

    pub fn into_tracks(self) -> impl Iterator<Item = (Specificity, SpectralMatch)> {
        self.tracks
            .into_iter()
            .filter_map(|(s, m)| m.map(|m| (s, m)))
    }
}

#[derive(Debug, Clone)]
pub struct TerminusAgnosticSearch {
    fragment_index: Arc<CandidateIndex>,
    precursor_index: Arc<PrecursorIndex>,
    params: SearchParams,
    fixed_terminus: Terminus,
    specificities: Vec<Specificity>,
}

impl TerminusAgnosticSearch {
    /// Build the fixed-terminus fragment index and the precursor index over `candidates`
    #[tracing::instrument(skip_all, level = "debug")]
    pub fn build(
        candidates: impl Into<Arc<CandidateSet>>,
        index_params: IndexParams,
        params: SearchParams,
        fixed_terminus: Terminus,
        specificities: &[Specificity],
    ) -> Result<Self, IndexError> {
        let candidates: Arc<CandidateSet> = candidates.into();
        let index_params = index_params.fragment_terminus(Some(fixed_terminus));
        let fragment_index = CandidateIndex::build(Arc::clone(&candidates), index_params)?;
        let precursor_index =
            PrecursorIndex::build(candidates, index_params.precursor_bin_width)?;
        let specificities: Vec<Specificity> = specificities
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        Ok(Self {
            fragment_index: Arc::new(fragment_index),
            precursor_index: Arc::new(precursor_index),
            params,
            fixed_terminus,
            specificities,
        })
    }

    pub fn fixed_terminus(&self) -> Terminus {
        self.fixed_terminus
    }

    pub fn specificities(&self) -> &[Specificity] {
        &self.specificities
    }

    pub fn params(&self) -> &SearchParams {
        &self.params
    }

    pub fn fragment_index(&self) -> &Arc<CandidateIndex> {
        &self.fragment_index
    }

    /// The truncation lengths, counted from the fixed terminus, whose mass falls in
    /// one of `intervals`. Full length is excluded, it is handled by the precursor index.
    fn truncation_lengths(&self, candidate: &Candidate, intervals: &[AllowedInterval]) -> BTreeSet<usize> {
        let mut lengths = BTreeSet::new();
        let Some(info) = candidate.residues.as_ref() else {
            return lengths;
        };
        let n = info.len();
        let sums = info.cumulative_masses(self.fixed_terminus);
        let base = info.terminal_mods.get(self.fixed_terminus) + WATER;
        for iv in intervals {
            let start = sums.partition_point(|s| *s < iv.min - base).max(1);
            let end = sums.partition_point(|s| *s <= iv.max - base).min(n);
            if start < end {
                lengths.extend(start..end);
            }
        }
        lengths
    }

    fn span_for(&self, length: usize, n: usize) -> (usize, usize) {
        match self.fixed_terminus {
            Terminus::N => (0, length),
            Terminus::C => (n - length, n),
        }
    }

    fn visit_hypotheses<F: FnMut(Specificity, Hypothesis)>(&self, spectrum: &Spectrum, mut emit: F) {
        if spectrum.is_empty() {
            tracing::trace!("Spectrum {} has no peaks", spectrum.query_index);
            return;
        }
        let prepared: PreparedSpectrum = self.params.scorer.prepare(spectrum);
        let intervals = self
            .params
            .acceptor
            .intervals_from_observed(spectrum.precursor_mass);
        let candidates = self.fragment_index.candidates();

        let full_length: BTreeSet<CandidateId> = intervals
            .iter()
            .flat_map(|iv| self.precursor_index.candidates_in_mass_range(iv.min, iv.max))
            .collect();
        for id in full_length {
            let candidate = &candidates[id as usize];
            if candidate.residues.is_none() {
                tracing::trace!("Skipping {candidate}, it has no residue information");
                continue;
            }
            if let Some(hypothesis) = self.params.evaluate(candidate, &prepared) {
                emit(candidate.specificity(), hypothesis);
            }
        }

        let probes = probe_masses(&self.params, &prepared);
        let hits = count_hits(&self.fragment_index, &probes, None);
        let threshold = self
            .params
            .scorer
            .params
            .min_index_hits
            .unwrap_or(1)
            .max(1);
        let mut sources: Vec<CandidateId> = hits
            .into_iter()
            .filter(|(_, count)| *count >= threshold)
            .map(|(id, _)| id)
            .collect();
        sources.sort_unstable();

        for id in sources {
            let source = &candidates[id as usize];
            let Some(n) = source.residues.as_ref().map(|r| r.len()) else {
                tracing::trace!("Skipping {source}, it has no residue information");
                continue;
            };
            for length in self.truncation_lengths(source, &intervals) {
                let (start, end) = self.span_for(length, n);
                let Some(truncated) = source.truncate(start, end) else {
                    continue;
                };
                let truncated = Arc::new(truncated);
                if let Some(hypothesis) = self.params.evaluate(&truncated, &prepared) {
                    emit(truncated.specificity(), hypothesis);
                }
            }
        }
    }

    /// Search `spectrum`, keeping a separate best match per configured specificity
    pub fn search_partitioned(&self, spectrum: &Spectrum) -> PartitionedMatch {
        let mut accumulators: Vec<(Specificity, MatchAccumulator)> = self
            .specificities
            .iter()
            .map(|s| (*s, MatchAccumulator::for_spectrum(spectrum)))
            .collect();
        self.visit_hypotheses(spectrum, |specificity, hypothesis| {
            if let Some((_, acc)) = accumulators.iter_mut().find(|(s, _)| *s == specificity) {
                acc.add(hypothesis);
            }
        });
        PartitionedMatch {
            scan_id: spectrum.scan_id,
            query_index: spectrum.query_index,
            tracks: accumulators
                .into_iter()
                .map(|(s, acc)| (s, acc.finish()))
                .collect(),
        }
    }
}

impl SearchStrategy for TerminusAgnosticSearch {
    fn name(&self) -> &'static str {
        "terminus-agnostic"
    }

    /// Search `spectrum` pooling all configured specificities into one match
    fn search_spectrum(&self, spectrum: &Spectrum) -> Option<SpectralMatch> {
        let mut accumulator = MatchAccumulator::for_spectrum(spectrum);
        self.visit_hypotheses(spectrum, |specificity, hypothesis| {
            if self.specificities.contains(&specificity) {
                accumulator.add(hypothesis);
            }
        });
        accumulator.finish()
    }
}
