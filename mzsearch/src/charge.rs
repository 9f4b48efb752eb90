//! Charge states considered when matching observed peaks to theoretical fragments
use std::cmp;

pub type ChargeRange = (i32, i32);

/// An inclusive iterator over the charge states between two bounds, carrying the sign
/// of the lower bound.
#[derive(Debug, Clone)]
pub struct ChargeRangeIter {
    pub min: i32,
    pub max: i32,
    pub sign: i32,
    index: usize,
    size: usize,
}

impl ChargeRangeIter {
    pub fn new(min: i32, max: i32) -> ChargeRangeIter {
        let low = cmp::min(min.abs(), max.abs());
        let high = cmp::max(min.abs(), max.abs());
        let sign = if min < 0 { -1 } else { 1 };
        let size = (high - low + 1) as usize;
        ChargeRangeIter {
            min: low,
            max: high,
            sign,
            index: 0,
            size,
        }
    }

    /// An iterator that yields nothing
    pub fn empty() -> ChargeRangeIter {
        ChargeRangeIter {
            min: 1,
            max: 1,
            sign: 1,
            index: 0,
            size: 0,
        }
    }

    pub fn next_charge(&mut self) -> Option<i32> {
        if self.index >= self.size {
            None
        } else {
            let i = (self.min + self.index as i32) * self.sign;
            self.index += 1;
            Some(i)
        }
    }
}

impl Iterator for ChargeRangeIter {
    type Item = i32;

    fn next(&mut self) -> Option<i32> {
        self.next_charge()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.size.saturating_sub(self.index);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ChargeRangeIter {}

impl From<ChargeRange> for ChargeRangeIter {
    fn from(pair: ChargeRange) -> ChargeRangeIter {
        ChargeRangeIter::new(pair.0, pair.1)
    }
}

/// The additional charge states a singly-charged-looking peak may actually carry.
///
/// Observed peaks are assumed to be singly charged. With `match_all_charges`, a peak
/// can also stand for an unresolved fragment of any charge from 2 up to the precursor
/// charge, since a fragment cannot carry more charge than its precursor.
pub fn fragment_charges(max_precursor_charge: i32, match_all_charges: bool) -> ChargeRangeIter {
    let max_charge = max_precursor_charge.abs();
    if match_all_charges && max_charge >= 2 {
        ChargeRangeIter::new(2, max_charge)
    } else {
        ChargeRangeIter::empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_charge_range() {
        let charges: Vec<_> = ChargeRangeIter::new(1, 4).collect();
        assert_eq!(charges, vec![1, 2, 3, 4]);
        let charges: Vec<_> = ChargeRangeIter::from((-1, -3)).collect();
        assert_eq!(charges, vec![-1, -2, -3]);
        assert_eq!(ChargeRangeIter::new(2, 3).len(), 2);
    }

    #[test]
    fn test_fragment_charges() {
        assert_eq!(fragment_charges(3, true).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(fragment_charges(3, false).count(), 0);
        assert_eq!(fragment_charges(1, true).count(), 0);
        assert_eq!(fragment_charges(-2, true).collect::<Vec<_>>(), vec![2]);
    }
}
