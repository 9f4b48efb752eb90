use std::iter::Sum;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub spectra_searched: usize,
    pub spectra_matched: usize,
    pub spectra_skipped: usize,
    pub spectra_without_peaks: usize,
    pub ambiguous_matches: usize,
    pub peaks: usize,
}

impl ProgressRecord {
    pub fn sum(self, rhs: Self) -> Self {
        self + rhs
    }
}

impl Add for ProgressRecord {
    type Output = ProgressRecord;

    fn add(self, rhs: Self) -> Self::Output {
        let mut dup = self;
        dup += rhs;
        dup
    }
}

impl AddAssign for ProgressRecord {
    fn add_assign(&mut self, rhs: Self) {
        self.spectra_searched += rhs.spectra_searched;
        self.spectra_matched += rhs.spectra_matched;
        self.spectra_skipped += rhs.spectra_skipped;
        self.spectra_without_peaks += rhs.spectra_without_peaks;
        self.ambiguous_matches += rhs.ambiguous_matches;
        self.peaks += rhs.peaks;
    }
}

impl Sum for ProgressRecord {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(ProgressRecord::default(), ProgressRecord::sum)
    }
}
