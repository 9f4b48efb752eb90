//! Fragment ion matching and shared-peak scoring
use mzpeaks::{prelude::*, DeconvolutedPeak, MassPeakSetType, Tolerance};
use thiserror::Error;

use crate::acceptor::check_tolerance;
use crate::candidate::{Candidate, Fragment};
use crate::charge::fragment_charges;
use crate::mass::apparent_singly_charged_mass;
use crate::spectrum::Spectrum;

pub type ScoreType = f64;

/// Scores closer than this are considered tied
pub const SCORE_TOLERANCE: ScoreType = 1e-9;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoringError {
    #[error("The minimum score must be positive and finite, got {0}")]
    InvalidMinScore(ScoreType),
    #[error("Invalid fragment tolerance {0}")]
    InvalidTolerance(String),
    #[error("The low mass threshold must be positive and finite, got {0}")]
    InvalidLowMassThreshold(f64),
}

/// Parameters controlling how theoretical fragments are matched to observed peaks
/// and how those matches are scored.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScoringParams {
    pub fragment_tolerance: Tolerance,
    /// Hypotheses scoring below this are never reported
    pub min_score: ScoreType,
    /// Whether to also interpret observed peaks as unresolved higher charge fragments
    pub match_all_charges: bool,
    /// Fragments lighter than this count double
    pub low_mass_threshold: Option<f64>,
    /// Whether to also match fragments against the complements of observed peaks
    pub complementary_ions: bool,
    /// A lower bound on fragment index hits before a candidate is fully scored
    pub min_index_hits: Option<u32>,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            fragment_tolerance: Tolerance::PPM(20.0),
            min_score: 3.0,
            match_all_charges: false,
            low_mass_threshold: None,
            complementary_ions: false,
            min_index_hits: None,
        }
    }
}

impl ScoringParams {
    pub fn new(fragment_tolerance: Tolerance, min_score: ScoreType) -> Self {
        Self {
            fragment_tolerance,
            min_score,
            ..Default::default()
        }
    }

    pub fn match_all_charges(mut self, value: bool) -> Self {
        self.match_all_charges = value;
        self
    }

    pub fn low_mass_threshold(mut self, value: Option<f64>) -> Self {
        self.low_mass_threshold = value;
        self
    }

    pub fn complementary_ions(mut self, value: bool) -> Self {
        self.complementary_ions = value;
        self
    }

    pub fn min_index_hits(mut self, value: Option<u32>) -> Self {
        self.min_index_hits = value;
        self
    }

    pub fn validate(self) -> Result<Self, ScoringError> {
        if !(self.min_score.is_finite() && self.min_score > 0.0) {
            return Err(ScoringError::InvalidMinScore(self.min_score));
        }
        check_tolerance(self.fragment_tolerance)
            .map_err(|_| ScoringError::InvalidTolerance(format!("{:?}", self.fragment_tolerance)))?;
        if let Some(threshold) = self.low_mass_threshold {
            if !(threshold.is_finite() && threshold > 0.0) {
                return Err(ScoringError::InvalidLowMassThreshold(threshold));
            }
        }
        Ok(self)
    }

    /// The most a single matched fragment can contribute to a score
    pub fn max_weight(&self) -> ScoreType {
        if self.low_mass_threshold.is_some() {
            2.0
        } else {
            1.0
        }
    }

    /// The fewest fragment index hits a candidate needs before it can possibly
    /// reach `min_score`, raised to `min_index_hits` when set.
    pub fn prefilter_threshold(&self) -> u32 {
        let implied = ((self.min_score - SCORE_TOLERANCE) / self.max_weight())
            .ceil()
            .max(0.0) as u32;
        implied.max(self.min_index_hits.unwrap_or_default())
    }
}

/// A theoretical fragment matched to an observed peak
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MatchedIon {
    pub fragment: Fragment,
    /// The charge the fragment was matched at
    pub charge: i32,
    /// The index of the observed peak in the spectrum's peak list
    pub peak_index: u32,
    /// The neutral mass of the observed peak
    pub observed_mass: f64,
    pub intensity: f32,
    /// Whether the fragment was matched through the complement of the peak
    pub complementary: bool,
    /// The difference between the observed and theoretical fragment mass, in Daltons
    pub mass_error: f64,
}

/// The outcome of scoring a single candidate against a spectrum
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FragmentMatches {
    pub score: ScoreType,
    pub ions: Vec<MatchedIon>,
}

/// The peaks of a spectrum prepared for repeated candidate scoring.
///
/// Complementary masses are computed once per spectrum. Because the complement of a
/// peak is `constant - mass`, walking the peak list backwards yields them in
/// ascending order, so position `i` in `complements` is peak `n - 1 - i`.
#[derive(Debug, Clone)]
pub struct PreparedSpectrum<'a> {
    pub spectrum: &'a Spectrum,
    pub complements: Option<MassPeakSetType<DeconvolutedPeak>>,
    pub charges: Vec<i32>,
}

impl<'a> PreparedSpectrum<'a> {
    fn complement_source(&self, complement_index: usize) -> usize {
        self.spectrum.peaks.len() - 1 - complement_index
    }
}

/// Matches candidate fragments to observed peaks and scores the result by shared
/// peak count.
#[derive(Debug, Clone, Copy)]
pub struct FragmentScorer {
    pub params: ScoringParams,
    /// Added to the precursor mass when computing complementary peak masses
    pub complementary_offset: f64,
}

impl FragmentScorer {
    pub fn new(params: ScoringParams) -> Self {
        Self {
            params,
            complementary_offset: 0.0,
        }
    }

    pub fn with_complementary_offset(mut self, offset: f64) -> Self {
        self.complementary_offset = offset;
        self
    }

    #[inline]
    pub fn weight(&self, fragment_mass: f64) -> ScoreType {
        match self.params.low_mass_threshold {
            Some(threshold) if fragment_mass < threshold => 2.0,
            _ => 1.0,
        }
    }

    /// The masses observed peaks stand for when read as complements
    pub fn complement_masses(&self, spectrum: &Spectrum) -> Vec<f64> {
        let total = spectrum.precursor_mass + self.complementary_offset;
        spectrum
            .peaks
            .iter()
            .rev()
            .map(|p| total - p.neutral_mass)
            .collect()
    }

    pub fn prepare<'a>(&self, spectrum: &'a Spectrum) -> PreparedSpectrum<'a> {
        let complements = if self.params.complementary_ions && !spectrum.is_empty() {
            let total = spectrum.precursor_mass + self.complementary_offset;
            let peaks: Vec<DeconvolutedPeak> = spectrum
                .peaks
                .iter()
                .rev()
                .map(|p| DeconvolutedPeak::new(total - p.neutral_mass, p.intensity, 1, 0))
                .collect();
            Some(MassPeakSetType::new(peaks))
        } else {
            None
        };
        let charges = fragment_charges(spectrum.max_charge(), self.params.match_all_charges).collect();
        PreparedSpectrum {
            spectrum,
            complements,
            charges,
        }
    }

    /// Score `candidate` against a spectrum prepared with [`FragmentScorer::prepare`]
    pub fn score_prepared(&self, candidate: &Candidate, prepared: &PreparedSpectrum) -> FragmentMatches {
        let tolerance = self.params.fragment_tolerance;
        let peaks = &prepared.spectrum.peaks;
        let mut result = FragmentMatches::default();
        if peaks.is_empty() {
            return result;
        }

        for fragment in candidate.fragments.iter() {
            let weight = self.weight(fragment.mass);
            let mut matched = false;

            if let Some(peak) = peaks.has_peak(fragment.mass, tolerance) {
                matched = true;
                result.score += weight;
                result.ions.push(MatchedIon {
                    fragment: *fragment,
                    charge: 1,
                    peak_index: peak.index,
                    observed_mass: peak.neutral_mass,
                    intensity: peak.intensity,
                    complementary: false,
                    mass_error: peak.neutral_mass - fragment.mass,
                });
            }

            for z in prepared.charges.iter().copied() {
                let apparent = apparent_singly_charged_mass(fragment.mass, z);
                if let Some(peak) = peaks.has_peak(apparent, tolerance) {
                    matched = true;
                    result.score += weight;
                    result.ions.push(MatchedIon {
                        fragment: *fragment,
                        charge: z,
                        peak_index: peak.index,
                        observed_mass: peak.neutral_mass,
                        intensity: peak.intensity,
                        complementary: false,
                        mass_error: (peak.neutral_mass - apparent) * z as f64,
                    });
                }
            }

            if matched {
                continue;
            }

            if let Some(complements) = prepared.complements.as_ref() {
                if let Some(comp) = complements.has_peak(fragment.mass, tolerance) {
                    let source = &peaks[prepared.complement_source(comp.index as usize)];
                    result.score += 1.0;
                    result.ions.push(MatchedIon {
                        fragment: *fragment,
                        charge: 1,
                        peak_index: source.index,
                        observed_mass: source.neutral_mass,
                        intensity: source.intensity,
                        complementary: true,
                        mass_error: comp.neutral_mass - fragment.mass,
                    });
                }
            }
        }
        result
    }

    /// Score `candidate` against `spectrum`
    pub fn score(&self, candidate: &Candidate, spectrum: &Spectrum) -> FragmentMatches {
        let prepared = self.prepare(spectrum);
        self.score_prepared(candidate, &prepared)
    }

    /// Whether a score is high enough to be reported
    #[inline]
    pub fn passes(&self, score: ScoreType) -> bool {
        score >= self.params.min_score - SCORE_TOLERANCE
    }
}
