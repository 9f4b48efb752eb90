//! Settling spectra whose best score is shared by several candidates
use std::collections::HashSet;

use identity_hash::BuildIdentityHasher;

use crate::spectral_match::{Hypothesis, Resolution, SpectralMatch};

type PeakSet = HashSet<u32, BuildIdentityHasher<u32>>;

/// Decide what to report for a [`SpectralMatch`] with tied candidates.
///
/// Implementations must be conservative: when they cannot single out one candidate,
/// every tied candidate is kept.
pub trait Disambiguator: Send + Sync {
    fn resolve(&self, spectral_match: SpectralMatch) -> SpectralMatch;
}

/// A candidate wins when, against every other tied candidate, it explains at least
/// `min_unique_ions` observed peaks the other does not, and its unique peaks outnumber
/// the other's unique peaks by at least `min_unique_ions` (and by at least one).
///
/// The margin is antisymmetric, so at most one candidate can win. Candidates with
/// the same number of unique peaks as each other are never separated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniqueIonFilter {
    pub min_unique_ions: usize,
}

impl UniqueIonFilter {
    pub fn new(min_unique_ions: usize) -> Self {
        Self { min_unique_ions }
    }

    fn explained_peaks(hypothesis: &Hypothesis) -> PeakSet {
        hypothesis.ions.iter().map(|ion| ion.peak_index).collect()
    }

    /// The number of peaks explained by `a` but not by `b`
    pub fn unique_ions(a: &Hypothesis, b: &Hypothesis) -> usize {
        let theirs = Self::explained_peaks(b);
        Self::explained_peaks(a).difference(&theirs).count()
    }
}

impl Default for UniqueIonFilter {
    fn default() -> Self {
        Self { min_unique_ions: 1 }
    }
}

impl Disambiguator for UniqueIonFilter {
    fn resolve(&self, spectral_match: SpectralMatch) -> SpectralMatch {
        if !spectral_match.is_ambiguous() {
            return spectral_match.resolve_to(Vec::new(), Resolution::Unambiguous);
        }
        let peak_sets: Vec<PeakSet> = spectral_match
            .tied()
            .iter()
            .map(Self::explained_peaks)
            .collect();

        let margin = self.min_unique_ions.max(1);
        let dominates = |i: usize, j: usize| {
            let ours = peak_sets[i].difference(&peak_sets[j]).count();
            let theirs = peak_sets[j].difference(&peak_sets[i]).count();
            ours >= self.min_unique_ions && ours >= theirs + margin
        };
        let winner =
            (0..peak_sets.len()).find(|&i| (0..peak_sets.len()).all(|j| i == j || dominates(i, j)));

        match winner {
            Some(winner) => {
                let winner = spectral_match.tied()[winner].clone();
                tracing::trace!(
                    "Spectrum {} resolved to {} by unique ions",
                    spectral_match.query_index,
                    winner.candidate
                );
                spectral_match.resolve_to(vec![winner], Resolution::AmbiguousResolved)
            }
            None => spectral_match.resolve_to(Vec::new(), Resolution::AmbiguousRetained),
        }
    }
}

/// Never choose between tied candidates
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetainAll;

impl Disambiguator for RetainAll {
    fn resolve(&self, spectral_match: SpectralMatch) -> SpectralMatch {
        let resolution = if spectral_match.is_ambiguous() {
            Resolution::AmbiguousRetained
        } else {
            Resolution::Unambiguous
        };
        spectral_match.resolve_to(Vec::new(), resolution)
    }
}

/// Prefer the candidate whose precursor mass is explained by the lowest notch
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LowestNotch;

impl Disambiguator for LowestNotch {
    fn resolve(&self, spectral_match: SpectralMatch) -> SpectralMatch {
        if !spectral_match.is_ambiguous() {
            return spectral_match.resolve_to(Vec::new(), Resolution::Unambiguous);
        }
        let Some(lowest) = spectral_match.tied().iter().map(|h| h.notch).min() else {
            return spectral_match;
        };
        let mut survivors = spectral_match.tied().iter().filter(|h| h.notch == lowest);
        match (survivors.next(), survivors.next()) {
            (Some(winner), None) => {
                let winner = winner.clone();
                spectral_match.resolve_to(vec![winner], Resolution::AmbiguousResolved)
            }
            _ => spectral_match.resolve_to(Vec::new(), Resolution::AmbiguousRetained),
        }
    }
}

/// Which [`Disambiguator`] to use, as named in configuration
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum DisambiguationPolicy {
    #[default]
    UniqueIons,
    RetainAll,
    LowestNotch,
}

impl DisambiguationPolicy {
    pub fn build(&self, min_unique_ions: usize) -> DisambiguatorKind {
        match self {
            Self::UniqueIons => DisambiguatorKind::UniqueIons(UniqueIonFilter::new(min_unique_ions)),
            Self::RetainAll => DisambiguatorKind::RetainAll(RetainAll),
            Self::LowestNotch => DisambiguatorKind::LowestNotch(LowestNotch),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisambiguatorKind {
    UniqueIons(UniqueIonFilter),
    RetainAll(RetainAll),
    LowestNotch(LowestNotch),
}

impl Default for DisambiguatorKind {
    fn default() -> Self {
        Self::UniqueIons(UniqueIonFilter::default())
    }
}

impl Disambiguator for DisambiguatorKind {
    fn resolve(&self, spectral_match: SpectralMatch) -> SpectralMatch {
        match self {
            Self::UniqueIons(d) => d.resolve(spectral_match),
            Self::RetainAll(d) => d.resolve(spectral_match),
            Self::LowestNotch(d) => d.resolve(spectral_match),
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::acceptor::Notch;
    use crate::candidate::test::peptide;
    use crate::candidate::{Candidate, CandidateSet};
    use crate::mass::IonKind;
    use crate::scorer::{FragmentMatches, MatchedIon};
    use crate::candidate::Fragment;

    fn ion(peak_index: u32) -> MatchedIon {
        MatchedIon {
            fragment: Fragment::new(100.0 + peak_index as f64, IonKind::B, 1),
            charge: 1,
            peak_index,
            observed_mass: 100.0 + peak_index as f64,
            intensity: 1.0,
            complementary: false,
            mass_error: 0.0,
        }
    }

    fn hyp(candidate: &Arc<Candidate>, notch: Notch, peaks: &[u32]) -> Hypothesis {
        scored_hyp(candidate, notch, peaks, peaks.len() as f64)
    }

    fn scored_hyp(candidate: &Arc<Candidate>, notch: Notch, peaks: &[u32], score: f64) -> Hypothesis {
        Hypothesis::new(
            Arc::clone(candidate),
            notch,
            FragmentMatches {
                score,
                ions: peaks.iter().copied().map(ion).collect(),
            },
        )
    }

    fn tied(hyps: Vec<Hypothesis>) -> SpectralMatch {
        let score = hyps[0].score;
        SpectralMatch::from_parts(1, 0, 800.0, score, None, hyps, Resolution::Unresolved)
    }

    fn set() -> CandidateSet {
        ["PEPTIDE", "PEPTLDE", "DEITPEP"]
            .into_iter()
            .map(|s| peptide(s, false))
            .collect()
    }

    #[test]
    fn test_single_candidate_is_unambiguous() {
        let set = set();
        let m = tied(vec![hyp(&set[0], 0, &[1, 2, 3])]);
        for policy in [
            DisambiguationPolicy::UniqueIons,
            DisambiguationPolicy::RetainAll,
            DisambiguationPolicy::LowestNotch,
        ] {
            let resolved = policy.build(1).resolve(m.clone());
            assert_eq!(resolved.resolution(), Resolution::Unambiguous);
            assert_eq!(resolved.tied().len(), 1);
        }
    }

    #[test]
    fn test_fully_shared_ions_are_retained() {
        let set = set();
        let m = tied(vec![hyp(&set[0], 0, &[1, 2, 3]), hyp(&set[1], 0, &[1, 2, 3])]);
        let resolved = UniqueIonFilter::new(1).resolve(m);
        assert_eq!(resolved.resolution(), Resolution::AmbiguousRetained);
        assert_eq!(resolved.tied().len(), 2);
        assert!(resolved.best().is_none());
    }

    #[test]
    fn test_unique_ions_resolve() {
        let set = set();
        let m = tied(vec![
            hyp(&set[0], 0, &[1, 2, 3, 4, 7, 8]),
            hyp(&set[1], 0, &[1, 2, 3, 4, 5, 6]),
        ]);
        // Both candidates have two unique peaks
        let resolved = UniqueIonFilter::new(2).resolve(m.clone());
        assert_eq!(resolved.resolution(), Resolution::AmbiguousRetained);

        let m = tied(vec![
            hyp(&set[0], 0, &[1, 2, 3, 4, 7, 8, 9]),
            hyp(&set[1], 0, &[1, 2, 3, 4, 5, 6, 9]),
            hyp(&set[2], 0, &[1, 2, 3, 4, 5, 8, 9]),
        ]);
        assert_eq!(UniqueIonFilter::unique_ions(&m.tied()[0], &m.tied()[2]), 1);
        let resolved = UniqueIonFilter::new(1).resolve(m.clone());
        // Every candidate has a peak the others lack, so none stands out
        assert_eq!(resolved.resolution(), Resolution::AmbiguousRetained);

        // Each pair differs by exactly one peak in each direction
        let m = tied(vec![
            hyp(&set[0], 0, &[1, 2, 3, 10, 11]),
            hyp(&set[1], 0, &[1, 2, 3, 4, 10]),
            hyp(&set[2], 0, &[1, 2, 3, 4, 11]),
        ]);
        let resolved = UniqueIonFilter::new(1).resolve(m);
        assert_eq!(resolved.resolution(), Resolution::AmbiguousRetained);
        assert_eq!(resolved.tied().len(), 3);
        assert!(resolved.best().is_none());

        // Low-mass fragments weigh double, so fewer peaks can reach the same score
        let m = tied(vec![
            scored_hyp(&set[0], 0, &[1, 2, 3, 4], 6.0),
            scored_hyp(&set[1], 0, &[1, 2, 3, 4, 5, 6], 6.0),
        ]);
        let resolved = UniqueIonFilter::new(1).resolve(m.clone());
        assert_eq!(resolved.resolution(), Resolution::AmbiguousResolved);
        assert_eq!(resolved.best().unwrap().key(), set[1].key);
        assert_eq!(resolved.tied().len(), 1);

        let resolved = UniqueIonFilter::new(3).resolve(m);
        assert_eq!(resolved.resolution(), Resolution::AmbiguousRetained);

        let m = tied(vec![
            scored_hyp(&set[0], 0, &[1, 2, 5], 6.0),
            scored_hyp(&set[1], 0, &[1, 2, 3, 4, 5, 6], 6.0),
            scored_hyp(&set[2], 0, &[1, 2, 3, 4], 6.0),
        ]);
        let resolved = UniqueIonFilter::new(1).resolve(m);
        assert_eq!(resolved.resolution(), Resolution::AmbiguousResolved);
        assert_eq!(resolved.best().unwrap().key(), set[1].key);
    }

    #[test]
    fn test_equal_unique_counts_are_retained() {
        let set = set();
        let m = tied(vec![hyp(&set[0], 0, &[1, 2, 3, 7]), hyp(&set[1], 0, &[1, 2, 3, 8])]);
        for min_unique_ions in [0, 1, 2] {
            let resolved = UniqueIonFilter::new(min_unique_ions).resolve(m.clone());
            assert_eq!(resolved.resolution(), Resolution::AmbiguousRetained);
            assert_eq!(resolved.tied().len(), 2);
        }
    }

    #[test]
    fn test_same_candidate_at_two_notches() {
        let set = set();
        let m = tied(vec![hyp(&set[0], 1, &[1, 2, 3]), hyp(&set[0], 0, &[1, 2, 3])]);
        let resolved = UniqueIonFilter::new(1).resolve(m.clone());
        assert_eq!(resolved.resolution(), Resolution::AmbiguousRetained);
        assert_eq!(resolved.tied().len(), 2);

        let lowest = LowestNotch.resolve(m);
        assert_eq!(lowest.resolution(), Resolution::AmbiguousResolved);
        assert_eq!(lowest.notch(), Some(0));
        assert_eq!(lowest.best().unwrap().key(), set[0].key);
    }

    #[test]
    fn test_retain_all_and_lowest_notch() {
        let set = set();
        let m = tied(vec![hyp(&set[0], 1, &[1, 2]), hyp(&set[1], 0, &[3, 4])]);
        let retained = RetainAll.resolve(m.clone());
        assert_eq!(retained.resolution(), Resolution::AmbiguousRetained);
        assert_eq!(retained.tied().len(), 2);

        let lowest = LowestNotch.resolve(m);
        assert_eq!(lowest.resolution(), Resolution::AmbiguousResolved);
        assert_eq!(lowest.best().unwrap().key(), set[1].key);
        assert_eq!(lowest.notch(), Some(0));

        let m = tied(vec![
            hyp(&set[0], 0, &[1, 2]),
            hyp(&set[1], 0, &[3, 4]),
            hyp(&set[2], 2, &[5, 6]),
        ]);
        let lowest = LowestNotch.resolve(m);
        assert_eq!(lowest.resolution(), Resolution::AmbiguousRetained);
        assert_eq!(lowest.tied().len(), 3);
    }
}
