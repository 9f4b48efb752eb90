/*! Mass-binned lookup structures over a [`CandidateSet`].

[`CandidateIndex`] maps theoretical fragment masses to the candidates that produce them,
and [`PrecursorIndex`] maps whole candidate masses to candidates.
*/
use std::ops::Range;
use std::sync::Arc;

use mzpeaks::Tolerance;
use thiserror::Error;

use crate::acceptor::symmetric_window;
use crate::candidate::CandidateSet;
use crate::mass::Terminus;

/// The position of a candidate in its [`CandidateSet`]
pub type CandidateId = u32;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IndexError {
    #[error("Fragment bin width must be positive and finite, got {0}")]
    InvalidBinWidth(f64),
    #[error("Maximum fragment mass must be positive and finite, got {0}")]
    InvalidMaxMass(f64),
    #[error("Precursor bin width must be positive and finite, got {0}")]
    InvalidPrecursorBinWidth(f64),
    #[error("{0} fragment bins would be required, reduce the maximum fragment mass or widen the bins")]
    TooManyBins(f64),
}

/// Sizing of the fragment and precursor indices
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IndexParams {
    /// The width of a fragment mass bin in Daltons
    pub bin_width: f64,
    /// Fragments heavier than this are not indexed
    pub max_fragment_mass: f64,
    /// The width of a precursor mass bin in Daltons
    pub precursor_bin_width: f64,
    /// When set, only fragments containing this terminus are indexed
    pub fragment_terminus: Option<Terminus>,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            bin_width: 0.01,
            max_fragment_mass: 30_000.0,
            precursor_bin_width: 0.01,
            fragment_terminus: None,
        }
    }
}

/// Enough for a 60 kDa fragment range at 1 mDa bins
const MAX_BINS: f64 = (1u64 << 26) as f64;

impl IndexParams {
    pub fn new(bin_width: f64, max_fragment_mass: f64) -> Self {
        Self {
            bin_width,
            max_fragment_mass,
            ..Default::default()
        }
    }

    pub fn fragment_terminus(mut self, terminus: Option<Terminus>) -> Self {
        self.fragment_terminus = terminus;
        self
    }

    pub fn precursor_bin_width(mut self, width: f64) -> Self {
        self.precursor_bin_width = width;
        self
    }

    pub fn validate(self) -> Result<Self, IndexError> {
        if !(self.bin_width.is_finite() && self.bin_width > 0.0) {
            return Err(IndexError::InvalidBinWidth(self.bin_width));
        }
        if !(self.max_fragment_mass.is_finite() && self.max_fragment_mass > 0.0) {
            return Err(IndexError::InvalidMaxMass(self.max_fragment_mass));
        }
        if !(self.precursor_bin_width.is_finite() && self.precursor_bin_width > 0.0) {
            return Err(IndexError::InvalidPrecursorBinWidth(self.precursor_bin_width));
        }
        let n_bins = (self.max_fragment_mass / self.bin_width).round() + 1.0;
        if n_bins > MAX_BINS {
            return Err(IndexError::TooManyBins(n_bins));
        }
        Ok(self)
    }
}

/// Summary counts describing a built [`CandidateIndex`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IndexStats {
    pub candidates: usize,
    pub indexed_fragments: usize,
    pub excluded_fragments: usize,
    pub bins: usize,
}

/// Translate a tolerance window around `mass` into a bin range of a binning of width
/// `width` with `n_bins` bins, widened by one bin on each side.
fn probe_bins(mass: f64, tolerance: Tolerance, width: f64, n_bins: usize) -> Range<usize> {
    let (lo, hi) = symmetric_window(tolerance, mass);
    if n_bins == 0 || !(lo.is_finite() && hi.is_finite()) || hi < 0.0 {
        return 0..0;
    }
    let first = ((lo / width).round() as i64 - 1).max(0);
    let last = ((hi / width).round() as i64 + 1).min(n_bins as i64 - 1);
    if first > last {
        0..0
    } else {
        first as usize..(last as usize + 1)
    }
}

/// A fragment mass index: `bins[round(mass / bin_width)]` lists the ids of every
/// candidate with a fragment of that mass.
///
/// Ids are inserted in ascending order, so every bin is sorted by id and therefore
/// by precursor mass. A candidate with several fragments in the same bin appears once
/// per fragment. The index is read-only once built.
#[derive(Debug, Clone)]
pub struct CandidateIndex {
    candidates: Arc<CandidateSet>,
    bins: Vec<Vec<CandidateId>>,
    params: IndexParams,
    stats: IndexStats,
}

impl CandidateIndex {
    #[tracing::instrument(skip_all, level = "debug")]
    pub fn build(
        candidates: impl Into<Arc<CandidateSet>>,
        params: IndexParams,
    ) -> Result<Self, IndexError> {
        let params = params.validate()?;
        let candidates: Arc<CandidateSet> = candidates.into();
        let n_bins = (params.max_fragment_mass / params.bin_width).round() as usize + 1;
        let mut bins: Vec<Vec<CandidateId>> = vec![Vec::new(); n_bins];
        let mut stats = IndexStats {
            candidates: candidates.len(),
            bins: n_bins,
            ..Default::default()
        };

        for (id, candidate) in candidates.iter().enumerate() {
            let fragments = candidate.fragments.iter().filter(|f| {
                params
                    .fragment_terminus
                    .map(|t| f.terminus == t)
                    .unwrap_or(true)
            });
            for fragment in fragments {
                if !(fragment.mass > 0.0 && fragment.mass <= params.max_fragment_mass) {
                    stats.excluded_fragments += 1;
                    tracing::trace!(
                        "Excluding fragment {fragment} ({:.4}) of {candidate}",
                        fragment.mass
                    );
                    continue;
                }
                let bin = (fragment.mass / params.bin_width).round() as usize;
                match bins.get_mut(bin) {
                    Some(bin) => {
                        bin.push(id as CandidateId);
                        stats.indexed_fragments += 1;
                    }
                    None => stats.excluded_fragments += 1,
                }
            }
        }

        if stats.excluded_fragments > 0 {
            tracing::debug!(
                "Excluded {} fragments outside of (0, {}] from the fragment index",
                stats.excluded_fragments,
                params.max_fragment_mass
            );
        }
        tracing::debug!(
            "Indexed {} fragments from {} candidates into {} bins",
            stats.indexed_fragments,
            stats.candidates,
            stats.bins
        );

        Ok(Self {
            candidates,
            bins,
            params,
            stats,
        })
    }

    pub fn candidates(&self) -> &Arc<CandidateSet> {
        &self.candidates
    }

    pub fn params(&self) -> &IndexParams {
        &self.params
    }

    pub fn stats(&self) -> IndexStats {
        self.stats
    }

    pub fn num_bins(&self) -> usize {
        self.bins.len()
    }

    /// The bin a fragment of `mass` would be stored in
    pub fn bin_of(&self, mass: f64) -> Option<usize> {
        if !(mass > 0.0 && mass <= self.params.max_fragment_mass) {
            return None;
        }
        Some((mass / self.params.bin_width).round() as usize).filter(|i| *i < self.bins.len())
    }

    /// The bins that must be read to find all fragments within `tolerance` of `mass`,
    /// including the immediate neighbors of the tolerance window.
    pub fn probe_bins(&self, mass: f64, tolerance: Tolerance) -> Range<usize> {
        probe_bins(mass, tolerance, self.params.bin_width, self.bins.len())
    }

    pub fn bin(&self, index: usize) -> &[CandidateId] {
        self.bins.get(index).map(|b| b.as_slice()).unwrap_or_default()
    }

    /// All candidate ids stored in the bins covering `mass` within `tolerance`.
    ///
    /// This is a superset of the candidates that actually have a fragment within
    /// tolerance; ids repeat once per stored fragment.
    pub fn candidates_for_fragment(
        &self,
        mass: f64,
        tolerance: Tolerance,
    ) -> impl Iterator<Item = CandidateId> + '_ {
        self.bins[self.probe_bins(mass, tolerance)]
            .iter()
            .flat_map(|bin| bin.iter().copied())
    }
}

/// Candidates bucketed by their whole precursor mass
#[derive(Debug, Clone)]
pub struct PrecursorIndex {
    candidates: Arc<CandidateSet>,
    /// (bin, ids) pairs sorted by bin
    bins: Vec<(i64, Vec<CandidateId>)>,
    bin_width: f64,
}

impl PrecursorIndex {
    #[tracing::instrument(skip_all, level = "debug")]
    pub fn build(
        candidates: impl Into<Arc<CandidateSet>>,
        bin_width: f64,
    ) -> Result<Self, IndexError> {
        if !(bin_width.is_finite() && bin_width > 0.0) {
            return Err(IndexError::InvalidPrecursorBinWidth(bin_width));
        }
        let candidates: Arc<CandidateSet> = candidates.into();
        let mut bins: Vec<(i64, Vec<CandidateId>)> = Vec::new();
        // Candidates are sorted by mass, so bins arrive in order
        for (id, candidate) in candidates.iter().enumerate() {
            let bin = (candidate.monoisotopic_mass / bin_width).round() as i64;
            match bins.last_mut() {
                Some((last, ids)) if *last == bin => ids.push(id as CandidateId),
                _ => bins.push((bin, vec![id as CandidateId])),
            }
        }
        tracing::debug!(
            "Indexed {} precursors into {} bins",
            candidates.len(),
            bins.len()
        );
        Ok(Self {
            candidates,
            bins,
            bin_width,
        })
    }

    pub fn candidates(&self) -> &Arc<CandidateSet> {
        &self.candidates
    }

    pub fn num_bins(&self) -> usize {
        self.bins.len()
    }

    /// The ids of all candidates whose precursor mass is within `[low, high]`, in
    /// ascending order.
    pub fn candidates_in_mass_range(&self, low: f64, high: f64) -> Vec<CandidateId> {
        if low > high || low.is_nan() || high.is_nan() {
            return Vec::new();
        }
        if !(low.is_finite() && high.is_finite()) {
            return self
                .candidates
                .indices_in_mass_range(low, high)
                .map(|i| i as CandidateId)
                .collect();
        }
        // Float to int casts saturate, so the neighbor widening must too
        let first = ((low / self.bin_width).round() as i64).saturating_sub(1);
        let last = ((high / self.bin_width).round() as i64).saturating_add(1);
        let start = self.bins.partition_point(|(b, _)| *b < first);
        let end = self.bins.partition_point(|(b, _)| *b <= last);
        self.bins[start..end.max(start)]
            .iter()
            .flat_map(|(_, ids)| ids.iter().copied())
            .filter(|id| {
                let mass = self.candidates[*id as usize].monoisotopic_mass;
                low <= mass && mass <= high
            })
            .collect()
    }
}
