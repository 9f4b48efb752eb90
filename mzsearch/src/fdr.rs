/*! Target-decoy false discovery rate estimation.

Matches are ranked by score, and at each rank the ratio of decoys to targets seen so
far estimates the FDR of accepting everything at or above that score. The q-value of
a match is the smallest such estimate over every score cutoff that still accepts it.

Notches are kept apart: besides the pooled estimate, every match whose tied candidates
agree on a notch also receives a q-value computed only among matches of that notch.
*/
use std::collections::BTreeMap;

use crate::acceptor::Notch;
use crate::scorer::ScoreType;
use crate::spectral_match::SpectralMatch;

/// The target-decoy bookkeeping attached to one ranked [`SpectralMatch`]
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FdrRecord {
    pub is_decoy: bool,
    /// The notch this match was counted under, `None` when its tied candidates disagree
    pub notch: Option<Notch>,
    pub cumulative_targets: usize,
    pub cumulative_decoys: usize,
    /// The q-value over the pooled population
    pub q_value: f64,
    pub notch_cumulative_targets: Option<usize>,
    pub notch_cumulative_decoys: Option<usize>,
    /// The q-value within this match's notch. `NaN` if the notch has no targets.
    pub notch_q_value: Option<f64>,
}

impl FdrRecord {
    pub fn passes(&self, threshold: f64) -> bool {
        !self.is_decoy && self.q_value <= threshold
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMatch {
    pub spectral_match: SpectralMatch,
    pub fdr: FdrRecord,
}

impl ResolvedMatch {
    pub fn score(&self) -> ScoreType {
        self.spectral_match.score()
    }

    pub fn q_value(&self) -> f64 {
        self.fdr.q_value
    }

    pub fn is_decoy(&self) -> bool {
        self.fdr.is_decoy
    }
}

/// Population counts for one notch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NotchSummary {
    pub notch: Notch,
    pub targets: usize,
    pub decoys: usize,
    /// Targets whose per-notch q-value is at or below the reporting threshold
    pub passing: usize,
    /// No decoys were seen in this notch, so its q-values carry no evidence
    pub uncontrolled: bool,
    /// No targets were seen in this notch, so its q-values are `NaN`
    pub undefined: bool,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FdrSummary {
    pub threshold: f64,
    pub targets: usize,
    pub decoys: usize,
    /// Targets whose pooled q-value is at or below `threshold`
    pub passing: usize,
    /// No decoys were present at all. Every q-value is 0, which is not evidence of
    /// an error-free result.
    pub uncontrolled: bool,
    /// Matches excluded from per-notch estimation because their tied candidates
    /// were explained by different notches
    pub mixed_notch: usize,
    pub notches: Vec<NotchSummary>,
}

impl FdrSummary {
    pub fn notch(&self, notch: Notch) -> Option<&NotchSummary> {
        self.notches.iter().find(|n| n.notch == notch)
    }
}

/// Matches in ranked order with their [`FdrRecord`]s
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FdrResults {
    pub matches: Vec<ResolvedMatch>,
    pub summary: FdrSummary,
}

impl Default for FdrSummary {
    fn default() -> Self {
        Self {
            threshold: FdrEngine::DEFAULT_THRESHOLD,
            targets: 0,
            decoys: 0,
            passing: 0,
            uncontrolled: false,
            mixed_notch: 0,
            notches: Vec::new(),
        }
    }
}

impl FdrResults {
    /// The number of targets with a pooled q-value at or below `threshold`
    pub fn passing(&self, threshold: f64) -> usize {
        self.matches
            .iter()
            .filter(|m| m.fdr.passes(threshold))
            .count()
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ResolvedMatch> {
        self.matches.iter()
    }
}

/// Cumulative counts and monotone q-values for one ranked population
#[derive(Debug, Default)]
struct Competition {
    targets: Vec<usize>,
    decoys: Vec<usize>,
    q_values: Vec<f64>,
    total_targets: usize,
    total_decoys: usize,
}

impl Competition {
    /// `ranked` must already be sorted by descending score
    fn compute(ranked: &[(ScoreType, bool)]) -> Self {
        let n = ranked.len();
        let mut targets = Vec::with_capacity(n);
        let mut decoys = Vec::with_capacity(n);
        let (mut t, mut d) = (0usize, 0usize);
        for (_, is_decoy) in ranked.iter() {
            if *is_decoy {
                d += 1;
            } else {
                t += 1;
            }
            targets.push(t);
            decoys.push(d);
        }

        let mut q_values = vec![f64::NAN; n];
        if t > 0 {
            // An equal score run shares the estimate made after its last member
            let mut end = n;
            while end > 0 {
                let last = end - 1;
                let mut start = last;
                while start > 0 && ranked[start - 1].0 == ranked[last].0 {
                    start -= 1;
                }
                let raw = decoys[last] as f64 / targets[last].max(1) as f64;
                q_values[start..end].fill(raw);
                end = start;
            }

            let mut q_min = f64::INFINITY;
            for q in q_values.iter_mut().rev() {
                q_min = q_min.min(*q);
                *q = q_min;
            }
        }

        Self {
            targets,
            decoys,
            q_values,
            total_targets: t,
            total_decoys: d,
        }
    }
}

/// Assigns q-values to a full set of [`SpectralMatch`]es.
///
/// The ranking is by descending score, with ties broken by ascending `scan_id` and
/// then `query_index`, so the output order never depends on the order of the input.
/// A match counts as a decoy when any of its remaining tied candidates is a decoy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FdrEngine {
    threshold: f64,
}

impl Default for FdrEngine {
    fn default() -> Self {
        Self {
            threshold: Self::DEFAULT_THRESHOLD,
        }
    }
}

impl FdrEngine {
    pub const DEFAULT_THRESHOLD: f64 = 0.01;

    pub fn new() -> Self {
        Self::default()
    }

    /// Set the q-value threshold used for the `passing` counts of the summary
    pub fn with_threshold(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    fn rank(matches: &mut [SpectralMatch]) {
        matches.sort_by(|a, b| {
            b.score()
                .total_cmp(&a.score())
                .then_with(|| a.scan_id.cmp(&b.scan_id))
                .then_with(|| a.query_index.cmp(&b.query_index))
        });
    }

    #[tracing::instrument(skip_all, level = "debug")]
    pub fn run(&self, mut matches: Vec<SpectralMatch>) -> FdrResults {
        Self::rank(&mut matches);

        let ranked: Vec<(ScoreType, bool)> =
            matches.iter().map(|m| (m.score(), m.is_decoy())).collect();
        let pooled = Competition::compute(&ranked);

        let mut members: BTreeMap<Notch, Vec<usize>> = BTreeMap::new();
        let mut mixed_notch = 0;
        for (i, m) in matches.iter().enumerate() {
            match m.notch() {
                Some(notch) => members.entry(notch).or_default().push(i),
                None => mixed_notch += 1,
            }
        }

        let mut records: Vec<FdrRecord> = ranked
            .iter()
            .enumerate()
            .map(|(i, (_, is_decoy))| FdrRecord {
                is_decoy: *is_decoy,
                notch: None,
                cumulative_targets: pooled.targets[i],
                cumulative_decoys: pooled.decoys[i],
                q_value: pooled.q_values[i],
                notch_cumulative_targets: None,
                notch_cumulative_decoys: None,
                notch_q_value: None,
            })
            .collect();

        let mut notches = Vec::with_capacity(members.len());
        for (notch, idxs) in members.iter() {
            let sub: Vec<(ScoreType, bool)> = idxs.iter().map(|i| ranked[*i]).collect();
            let competition = Competition::compute(&sub);
            let mut passing = 0;
            for (j, i) in idxs.iter().copied().enumerate() {
                let record = &mut records[i];
                record.notch = Some(*notch);
                record.notch_cumulative_targets = Some(competition.targets[j]);
                record.notch_cumulative_decoys = Some(competition.decoys[j]);
                record.notch_q_value = Some(competition.q_values[j]);
                if !record.is_decoy && competition.q_values[j] <= self.threshold {
                    passing += 1;
                }
            }
            let summary = NotchSummary {
                notch: *notch,
                targets: competition.total_targets,
                decoys: competition.total_decoys,
                passing,
                uncontrolled: competition.total_decoys == 0 && competition.total_targets > 0,
                undefined: competition.total_targets == 0,
            };
            if summary.undefined {
                tracing::warn!(
                    "Notch {notch} has {} decoys and no targets, its q-values are undefined",
                    summary.decoys
                );
            } else if summary.uncontrolled {
                tracing::debug!("Notch {notch} has no decoys, its q-values are uncontrolled");
            }
            notches.push(summary);
        }

        let uncontrolled = pooled.total_decoys == 0 && pooled.total_targets > 0;
        if uncontrolled {
            tracing::warn!(
                "No decoys among {} matches, q-values are not an error estimate",
                pooled.total_targets
            );
        }

        let passing = records.iter().filter(|r| r.passes(self.threshold)).count();
        tracing::info!(
            "{passing} of {} target matches pass q-value {} ({} decoys)",
            pooled.total_targets,
            self.threshold,
            pooled.total_decoys
        );

        let summary = FdrSummary {
            threshold: self.threshold,
            targets: pooled.total_targets,
            decoys: pooled.total_decoys,
            passing,
            uncontrolled,
            mixed_notch,
            notches,
        };

        let matches = matches
            .into_iter()
            .zip(records)
            .map(|(spectral_match, fdr)| ResolvedMatch { spectral_match, fdr })
            .collect();

        FdrResults { matches, summary }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use mzpeaks::Tolerance;

    use super::*;
    use crate::acceptor::DotMassDiffAcceptor;
    use crate::candidate::test::peptide;
    use crate::candidate::{Candidate, CandidateSet};
    use crate::scorer::{FragmentScorer, ScoringParams};
    use crate::search::{ExhaustiveSearch, SearchParams, SearchStrategy};
    use crate::spectral_match::{test::hypothesis, Resolution};
    use crate::spectrum::Spectrum;

    fn library() -> CandidateSet {
        ["PEPTIDE", "DEITPEP", "PEPTLDE", "EDLTPEP", "SAMPLER", "RELPMAS"]
            .into_iter()
            .enumerate()
            .map(|(i, s)| peptide(s, i % 2 == 1))
            .collect()
    }

    fn make_match(
        scan_id: u64,
        candidate: &Arc<Candidate>,
        notch: Notch,
        score: ScoreType,
    ) -> SpectralMatch {
        SpectralMatch::from_parts(
            scan_id,
            scan_id as usize,
            candidate.monoisotopic_mass,
            score,
            None,
            vec![hypothesis(candidate, notch, score)],
            Resolution::Unambiguous,
        )
    }

    fn target(set: &CandidateSet) -> &Arc<Candidate> {
        set.iter().find(|c| !c.is_decoy).unwrap()
    }

    fn decoy(set: &CandidateSet) -> &Arc<Candidate> {
        set.iter().find(|c| c.is_decoy).unwrap()
    }

    fn q_values(results: &FdrResults) -> Vec<f64> {
        results.iter().map(|m| m.q_value()).collect()
    }

    #[test]
    fn test_peptide_decoy_scenario() {
        let target = peptide("PEPTIDE", false);
        let decoy = peptide("DEITPEP", true);
        let keep = |c: &Candidate| {
            Candidate::new(
                c.sequence.clone(),
                c.monoisotopic_mass,
                c.fragments.iter().take(3).copied().collect(),
                c.is_decoy,
            )
        };
        let set: CandidateSet = vec![keep(&target), keep(&decoy)].into_iter().collect();
        let precursor = target.monoisotopic_mass;
        let peaks = Spectrum::peaks_from_pairs(target.fragments.iter().take(3).map(|f| (f.mass, 100.0)));
        let spectrum = Spectrum::new(1, 0, precursor, vec![2], peaks);

        let params = SearchParams::new(
            DotMassDiffAcceptor::exact(Tolerance::PPM(10.0)).unwrap().into(),
            FragmentScorer::new(ScoringParams::new(Tolerance::PPM(10.0), 1.0)),
        );
        let search = ExhaustiveSearch::new(set, params);
        let found = search.search_spectrum(&spectrum).unwrap();
        assert_eq!(found.tied().len(), 1);
        let best = found.best().unwrap();
        assert_eq!(best.candidate.sequence, "PEPTIDE");
        assert_eq!((best.notch, best.score), (0, 3.0));

        let decoy_set: CandidateSet = vec![keep(&decoy)].into_iter().collect();
        let other = make_match(2, &decoy_set[0], 0, 1.0);

        let results = FdrEngine::new().run(vec![other, found]);
        assert_eq!(q_values(&results), vec![0.0, 1.0]);
        assert!(!results.matches[0].is_decoy());
        assert!(results.matches[1].is_decoy());
        assert!(!results.summary.uncontrolled);
        assert_eq!(results.summary.passing, 1);
    }

    #[test]
    fn test_zero_decoys_is_uncontrolled() {
        let set = library();
        let t = target(&set);
        let matches: Vec<_> = (0..5).map(|i| make_match(i, t, 0, 10.0 - i as f64)).collect();
        let results = FdrEngine::new().run(matches);
        assert!(results.summary.uncontrolled);
        assert!(q_values(&results).iter().all(|q| *q == 0.0));
        assert!(results.summary.notch(0).unwrap().uncontrolled);
        assert_eq!(results.passing(0.0), 5);
    }

    #[test]
    fn test_interleaved_targets_and_decoys() {
        let set = library();
        let (t, d) = (target(&set), decoy(&set));
        let matches: Vec<_> = (0..20u64)
            .map(|i| {
                let candidate = if i % 2 == 0 { t } else { d };
                make_match(i, candidate, 0, 100.0 - i as f64)
            })
            .collect();
        let results = FdrEngine::new().run(matches);
        let qs = q_values(&results);
        assert_eq!(qs[0], 0.0);
        assert_eq!(qs[1], 0.5);
        assert_eq!(qs[2], 0.5);
        assert!(qs[1..].iter().all(|q| (0.5..=1.0).contains(q)));
        assert!(qs.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(results.summary.targets, 10);
        assert_eq!(results.summary.decoys, 10);
    }

    #[test]
    fn test_monotone_and_input_order_independent() {
        let set = library();
        let (t, d) = (target(&set), decoy(&set));
        let mut matches = Vec::new();
        for i in 0..60u64 {
            let candidate = if (i * 5) % 7 < 4 { t } else { d };
            let score = ((i * 37) % 23) as f64 / 2.0;
            matches.push(make_match(i, candidate, (i % 3) as Notch, score));
        }
        let forward = FdrEngine::new().run(matches.clone());
        matches.reverse();
        let backward = FdrEngine::new().run(matches);
        assert_eq!(forward, backward);

        let qs = q_values(&forward);
        assert!(qs.windows(2).all(|w| w[0] <= w[1]));
        assert!(forward
            .matches
            .windows(2)
            .all(|w| w[0].score() >= w[1].score()));
        for notch in 0..3 {
            let per_notch: Vec<f64> = forward
                .iter()
                .filter(|m| m.fdr.notch == Some(notch))
                .map(|m| m.fdr.notch_q_value.unwrap())
                .collect();
            assert!(per_notch.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn test_equal_scores_share_q_value() {
        let set = library();
        let (t, d) = (target(&set), decoy(&set));
        let matches = vec![
            make_match(5, d, 0, 3.0),
            make_match(4, t, 0, 4.0),
            make_match(3, d, 0, 4.0),
            make_match(2, t, 0, 4.0),
            make_match(1, t, 0, 5.0),
        ];
        let results = FdrEngine::new().run(matches);
        let qs = q_values(&results);
        assert_eq!(qs[0], 0.0);
        // Scan 2 ranks ahead of the decoy in its run, but the run shares one estimate
        let shared = 1.0 / 3.0;
        assert_eq!(&qs[1..4], &[shared, shared, shared]);
        assert_eq!(qs[4], 2.0 / 3.0);
        let scans: Vec<u64> = results.iter().map(|m| m.spectral_match.scan_id).collect();
        assert_eq!(scans, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_notch_without_targets_is_undefined() {
        let set = library();
        let (t, d) = (target(&set), decoy(&set));
        let matches = vec![
            make_match(1, t, 0, 9.0),
            make_match(2, t, 0, 8.0),
            make_match(3, d, 1, 7.0),
            make_match(4, d, 0, 6.0),
        ];
        let results = FdrEngine::new().run(matches);
        let shifted = &results.matches[2];
        assert_eq!(shifted.fdr.notch, Some(1));
        assert!(shifted.fdr.notch_q_value.unwrap().is_nan());
        assert!(!shifted.q_value().is_nan());
        let notch = results.summary.notch(1).unwrap();
        assert!(notch.undefined);
        assert_eq!((notch.targets, notch.decoys), (0, 1));

        let exact = results.summary.notch(0).unwrap();
        assert!(!exact.undefined);
        assert_eq!(results.matches[3].fdr.notch_q_value, Some(0.5));
        assert_eq!(results.matches[1].fdr.notch_q_value, Some(0.0));
    }

    #[test]
    fn test_mixed_notch_only_pooled() {
        let set = library();
        let targets: Vec<&Arc<Candidate>> = set.iter().filter(|c| !c.is_decoy).collect();
        let (t, t2) = (targets[0], targets[1]);
        let mixed = SpectralMatch::from_parts(
            7,
            7,
            t.monoisotopic_mass,
            4.0,
            None,
            vec![hypothesis(t, 0, 4.0), hypothesis(t2, 1, 4.0)],
            Resolution::AmbiguousRetained,
        );
        let results = FdrEngine::new().run(vec![mixed]);
        assert_eq!(results.summary.mixed_notch, 1);
        assert!(results.summary.notches.is_empty());
        assert_eq!(results.matches[0].fdr.notch, None);
        assert_eq!(results.matches[0].fdr.notch_q_value, None);
        assert_eq!(results.matches[0].fdr.cumulative_targets, 1);
    }

    #[test]
    fn test_empty() {
        let results = FdrEngine::with_threshold(0.05).run(Vec::new());
        assert!(results.is_empty());
        assert_eq!(results.summary.threshold, 0.05);
        assert!(!results.summary.uncontrolled);
    }
}
