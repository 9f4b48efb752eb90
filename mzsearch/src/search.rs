/*! Search strategies that turn a [`Spectrum`] into a [`SpectralMatch`].

Every strategy shares the same acceptance policy, implemented by [`SearchParams`]: a
candidate becomes a [`Hypothesis`] only when the acceptor assigns its precursor mass a
notch and its fragment score reaches the minimum score. Hypotheses are fed through a
[`MatchAccumulator`](crate::spectral_match::MatchAccumulator), so strategies differ only in which candidates they consider.
*/
use std::sync::Arc;

use crate::acceptor::{AcceptorKind, MassDiffAcceptor, Notch};
use crate::candidate::Candidate;
use crate::scorer::{FragmentScorer, PreparedSpectrum};
use crate::spectral_match::{Hypothesis, SpectralMatch};
use crate::spectrum::Spectrum;

pub mod exhaustive;
pub mod indexed;
pub mod terminus_agnostic;

pub use exhaustive::ExhaustiveSearch;
pub use indexed::IndexedSearch;
pub use terminus_agnostic::{PartitionedMatch, TerminusAgnosticSearch};

/// Something that can search a single spectrum
pub trait SearchStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Find the best scoring candidates for `spectrum`, or `None` if no candidate was
    /// accepted.
    fn search_spectrum(&self, spectrum: &Spectrum) -> Option<SpectralMatch>;
}

/// The acceptance policy shared by all strategies
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub acceptor: AcceptorKind,
    pub scorer: FragmentScorer,
}

impl SearchParams {
    pub fn new(acceptor: AcceptorKind, scorer: FragmentScorer) -> Self {
        Self { acceptor, scorer }
    }

    /// Evaluate `candidate` against a prepared spectrum, assigning the notch from the
    /// acceptor.
    #[inline]
    pub fn evaluate(
        &self,
        candidate: &Arc<Candidate>,
        prepared: &PreparedSpectrum,
    ) -> Option<Hypothesis> {
        let notch = self
            .acceptor
            .accept(prepared.spectrum.precursor_mass, candidate.monoisotopic_mass)?;
        self.evaluate_with_notch(candidate, notch, prepared)
    }

    /// Score `candidate` and keep it if it reaches the minimum score
    #[inline]
    pub fn evaluate_with_notch(
        &self,
        candidate: &Arc<Candidate>,
        notch: Notch,
        prepared: &PreparedSpectrum,
    ) -> Option<Hypothesis> {
        if candidate.fragments.is_empty() {
            return None;
        }
        let matches = self.scorer.score_prepared(candidate, prepared);
        if self.scorer.passes(matches.score) {
            Some(Hypothesis::new(Arc::clone(candidate), notch, matches))
        } else {
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::sync::Arc;

    use mzpeaks::Tolerance;

    use crate::acceptor::{AcceptorKind, DotMassDiffAcceptor};
    use crate::candidate::test::residue_mass;
    use crate::candidate::{Candidate, CandidateSet, TerminalMods};
    use crate::mass::{Dissociation, C13_SPACING, PROTON};
    use crate::scorer::{FragmentScorer, ScoringParams};
    use crate::spectrum::Spectrum;

    use super::SearchParams;

    /// A small deterministic pseudo-random generator so fixtures are reproducible
    pub(crate) struct Lcg(pub u64);

    impl Lcg {
        pub(crate) fn next(&mut self) -> u64 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            self.0 >> 33
        }

        pub(crate) fn pick<'a, T>(&mut self, items: &'a [T]) -> &'a T {
            &items[(self.next() as usize) % items.len()]
        }
    }

    const ALPHABET: &[char] = &[
        'G', 'A', 'S', 'P', 'V', 'T', 'L', 'N', 'D', 'Q', 'K', 'E', 'M', 'H', 'F', 'R', 'Y', 'W',
    ];

    pub(crate) fn random_sequence(rng: &mut Lcg, length: usize) -> String {
        (0..length).map(|_| *rng.pick(ALPHABET)).collect()
    }

    pub(crate) fn make_candidate(sequence: &str, is_decoy: bool) -> Candidate {
        Candidate::from_residues(
            sequence,
            sequence.chars().map(residue_mass).collect(),
            TerminalMods::default(),
            Dissociation::Hcd,
            is_decoy,
        )
    }

    /// A candidate library of random targets with reversed decoys, plus a set of
    /// spectra generated from a subset of the targets with a mix of singly charged,
    /// doubly charged, and missing fragments and an occasional isotope error.
    pub(crate) fn fixture(seed: u64, n_targets: usize, n_spectra: usize) -> (CandidateSet, Vec<Spectrum>) {
        let mut rng = Lcg(seed);
        let mut candidates = Vec::new();
        let mut sources = Vec::new();
        for _ in 0..n_targets {
            let length = 7 + (rng.next() % 8) as usize;
            let seq = random_sequence(&mut rng, length);
            let decoy: String = seq.chars().rev().collect();
            sources.push(make_candidate(&seq, false));
            candidates.push(make_candidate(&seq, false));
            candidates.push(make_candidate(&decoy, true));
        }

        let mut spectra = Vec::new();
        for i in 0..n_spectra {
            let source = &sources[(rng.next() as usize) % sources.len()];
            let mut peaks = Vec::new();
            for fragment in source.fragments.iter() {
                match rng.next() % 5 {
                    0 => {}
                    1 => {
                        let mz = (fragment.mass + 2.0 * PROTON) / 2.0;
                        peaks.push((mz - PROTON, 20.0));
                    }
                    _ => peaks.push((fragment.mass * (1.0 + 2e-6), 100.0)),
                }
            }
            // Noise
            for _ in 0..5 {
                peaks.push((100.0 + (rng.next() % 150_000) as f64 / 100.0, 5.0));
            }
            let isotope = if rng.next() % 4 == 0 { C13_SPACING } else { 0.0 };
            spectra.push(Spectrum::new(
                i as u64,
                i,
                source.monoisotopic_mass + isotope,
                vec![2 + (rng.next() % 2) as i32],
                Spectrum::peaks_from_pairs(peaks),
            ));
        }
        (CandidateSet::new(candidates), spectra)
    }

    pub(crate) fn isotope_params(scoring: ScoringParams) -> SearchParams {
        let acceptor: AcceptorKind = DotMassDiffAcceptor::isotope_errors(0, 1, Tolerance::PPM(10.0))
            .unwrap()
            .into();
        SearchParams::new(acceptor, FragmentScorer::new(scoring))
    }

    #[test]
    fn test_evaluate_rejects_mass_and_score() {
        let set: CandidateSet = vec![make_candidate("PEPTIDE", false)].into_iter().collect();
        let candidate = Arc::clone(&set[0]);
        let peaks = Spectrum::peaks_from_pairs(candidate.fragments.iter().take(4).map(|f| (f.mass, 10.0)));
        let params = isotope_params(ScoringParams::new(Tolerance::PPM(10.0), 4.0));

        let spectrum = Spectrum::new(1, 0, candidate.monoisotopic_mass, vec![2], peaks.clone());
        let prepared = params.scorer.prepare(&spectrum);
        let hyp = params.evaluate(&candidate, &prepared).unwrap();
        assert_eq!((hyp.notch, hyp.score), (0, 4.0));

        let spectrum = Spectrum::new(1, 0, candidate.monoisotopic_mass + C13_SPACING, vec![2], peaks.clone());
        let prepared = params.scorer.prepare(&spectrum);
        assert_eq!(params.evaluate(&candidate, &prepared).unwrap().notch, 1);

        let spectrum = Spectrum::new(1, 0, candidate.monoisotopic_mass + 0.5, vec![2], peaks.clone());
        let prepared = params.scorer.prepare(&spectrum);
        assert!(params.evaluate(&candidate, &prepared).is_none());

        let strict = isotope_params(ScoringParams::new(Tolerance::PPM(10.0), 5.0));
        let spectrum = Spectrum::new(1, 0, candidate.monoisotopic_mass, vec![2], peaks);
        let prepared = strict.scorer.prepare(&spectrum);
        assert!(strict.evaluate(&candidate, &prepared).is_none());
    }
}
