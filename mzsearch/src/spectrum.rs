//! Observed spectra as seen by the search core
use std::sync::Arc;

use mzpeaks::{prelude::*, DeconvolutedPeak, MassPeakSetType};

/// The fragment peaks of a spectrum, shared between co-isolated precursor hypotheses
pub type PeakList = Arc<MassPeakSetType<DeconvolutedPeak>>;

/// A deconvoluted tandem spectrum paired with one precursor hypothesis.
///
/// When several precursors were co-isolated, each gets its own `Spectrum` with the
/// same `scan_id` and the same [`PeakList`].
#[derive(Debug, Clone)]
pub struct Spectrum {
    pub scan_id: u64,
    /// Unique across all spectrum records in a run
    pub query_index: usize,
    /// The neutral precursor mass
    pub precursor_mass: f64,
    pub charges: Vec<i32>,
    pub peaks: PeakList,
}

impl Spectrum {
    pub fn new(
        scan_id: u64,
        query_index: usize,
        precursor_mass: f64,
        charges: Vec<i32>,
        peaks: PeakList,
    ) -> Self {
        Self {
            scan_id,
            query_index,
            precursor_mass,
            charges,
            peaks,
        }
    }

    /// Build a peak list from `(neutral mass, intensity)` pairs, treating every peak
    /// as singly charged.
    pub fn peaks_from_pairs<I: IntoIterator<Item = (f64, f32)>>(pairs: I) -> PeakList {
        let peaks: Vec<DeconvolutedPeak> = pairs
            .into_iter()
            .map(|(mass, intensity)| DeconvolutedPeak::new(mass, intensity, 1, 0))
            .collect();
        Arc::new(MassPeakSetType::new(peaks))
    }

    /// Another precursor hypothesis for the same scan, sharing this spectrum's peaks
    pub fn co_isolated(&self, query_index: usize, precursor_mass: f64, charges: Vec<i32>) -> Self {
        Self::new(
            self.scan_id,
            query_index,
            precursor_mass,
            charges,
            Arc::clone(&self.peaks),
        )
    }

    /// The largest charge of the precursor, at least 1
    pub fn max_charge(&self) -> i32 {
        self.charges
            .iter()
            .map(|z| z.abs())
            .max()
            .unwrap_or(1)
            .max(1)
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }
}
