/*! Precursor mass-difference acceptance.

A [`MassDiffAcceptor`] decides whether an observed precursor mass can be explained by a
candidate's theoretical mass, and if so, which *notch* (modelled mass relationship)
explains it. The interval enumerators are what index-based strategies use to turn an
observed mass into candidate mass ranges, and [`MassDiffAcceptor::accept`] must agree
with them exactly.
*/
use std::fmt::Display;
use std::str::FromStr;

use itertools::Itertools;
use mzpeaks::Tolerance;
use thiserror::Error;

use crate::adduct::AdductRegistry;
use crate::mass::C13_SPACING;

/// A mass relationship category
pub type Notch = u32;

/// An error that might occur while configuring a [`MassDiffAcceptor`]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AcceptorError {
    #[error("Failed to parse mass difference acceptor {0:?}: {1}")]
    MalformedSpec(String, String),
    #[error("Unknown adduct {0:?}")]
    UnknownAdduct(String),
    #[error("Invalid precursor tolerance {0}")]
    InvalidTolerance(String),
    #[error("Invalid mass difference interval {0}..{1}")]
    InvalidInterval(f64, f64),
    #[error("A mass difference acceptor must define at least one notch")]
    NoNotches,
}

pub(crate) fn check_tolerance(tolerance: Tolerance) -> Result<Tolerance, AcceptorError> {
    let valid = match tolerance {
        Tolerance::PPM(ppm) => ppm.is_finite() && (0.0..1e6).contains(&ppm),
        Tolerance::Da(da) => da.is_finite() && da >= 0.0,
    };
    if valid {
        Ok(tolerance)
    } else {
        Err(AcceptorError::InvalidTolerance(format!("{tolerance:?}")))
    }
}

/// The range of masses within `tolerance` of `center`.
///
/// PPM tolerances are evaluated against the larger of the two masses being compared,
/// `|a - b| <= ppm * max(a, b)`, which makes the relationship symmetric. Consequently
/// the same window describes both "observed masses matching this target" and "target
/// masses matching this observation".
#[inline]
pub fn symmetric_window(tolerance: Tolerance, center: f64) -> (f64, f64) {
    match tolerance {
        Tolerance::PPM(ppm) => {
            let f = ppm / 1e6;
            let a = center * (1.0 - f);
            let b = center / (1.0 - f);
            if a <= b {
                (a, b)
            } else {
                (b, a)
            }
        }
        Tolerance::Da(da) => (center - da, center + da),
    }
}

/// Test whether two masses are within `tolerance` of each other, symmetrically
#[inline]
pub fn within_tolerance(tolerance: Tolerance, a: f64, b: f64) -> bool {
    let (lo, hi) = symmetric_window(tolerance, a);
    lo <= b && b <= hi
}

/// The smallest representable value greater than `x`
pub(crate) fn next_up(x: f64) -> f64 {
    if x.is_nan() || x == f64::INFINITY {
        return x;
    }
    if x == 0.0 {
        return f64::from_bits(1);
    }
    let bits = x.to_bits();
    if x > 0.0 {
        f64::from_bits(bits + 1)
    } else {
        f64::from_bits(bits - 1)
    }
}

/// The largest representable value less than `x`
pub(crate) fn next_down(x: f64) -> f64 {
    -next_up(-x)
}

const MAX_REFINE_STEPS: usize = 64;

/// Snap the finite bounds of an approximate interval to exactly the values `accepts`
/// holds for, which must form one contiguous range near `approx`.
///
/// Inverting a tolerance window rounds differently than evaluating it, so the bounds
/// derived from an observed mass can be off by a few ulps from the candidate masses
/// the forward test accepts. Returns `None` if nothing near `approx` is accepted.
fn refine_interval(approx: AllowedInterval, accepts: impl Fn(f64) -> bool) -> Option<AllowedInterval> {
    let mut min = approx.min;
    if min.is_finite() {
        if accepts(min) {
            for _ in 0..MAX_REFINE_STEPS {
                let next = next_down(min);
                if !accepts(next) {
                    break;
                }
                min = next;
            }
        } else {
            min = (0..MAX_REFINE_STEPS)
                .scan(min, |m, _| {
                    *m = next_up(*m);
                    Some(*m)
                })
                .find(|m| accepts(*m))?;
        }
    }
    let mut max = approx.max;
    if max.is_finite() {
        if accepts(max) {
            for _ in 0..MAX_REFINE_STEPS {
                let next = next_up(max);
                if !accepts(next) {
                    break;
                }
                max = next;
            }
        } else {
            max = (0..MAX_REFINE_STEPS)
                .scan(max, |m, _| {
                    *m = next_down(*m);
                    Some(*m)
                })
                .find(|m| accepts(*m))?;
        }
    }
    (min <= max).then_some(AllowedInterval::new(min, max, approx.notch))
}

/// An inclusive mass range tagged with the notch it corresponds to
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AllowedInterval {
    pub min: f64,
    pub max: f64,
    pub notch: Notch,
}

impl AllowedInterval {
    pub fn new(min: f64, max: f64, notch: Notch) -> Self {
        Self { min, max, notch }
    }

    #[inline]
    pub fn contains(&self, mass: f64) -> bool {
        self.min <= mass && mass <= self.max
    }

    pub fn is_bounded(&self) -> bool {
        self.min.is_finite() && self.max.is_finite()
    }

    fn shifted(self, delta: f64) -> Self {
        Self::new(self.min + delta, self.max + delta, self.notch)
    }
}

/// Decide whether an observed precursor mass is compatible with a candidate mass.
pub trait MassDiffAcceptor {
    /// A short description used in logs
    fn name(&self) -> String;

    /// The number of distinct notches this acceptor may assign
    fn num_notches(&self) -> usize;

    /// A human readable label for `notch`
    fn notch_label(&self, notch: Notch) -> String;

    /// The observed mass ranges compatible with `candidate_mass`, in notch order
    fn intervals_from_candidate(&self, candidate_mass: f64) -> Vec<AllowedInterval>;

    /// The candidate mass ranges compatible with `observed_mass`, in notch order.
    ///
    /// A notch whose range holds no representable candidate mass is omitted.
    fn intervals_from_observed(&self, observed_mass: f64) -> Vec<AllowedInterval>;

    /// Accept or reject a candidate mass for an observed mass, returning the lowest
    /// notch whose interval from [`MassDiffAcceptor::intervals_from_candidate`]
    /// contains `observed_mass`.
    fn accept(&self, observed_mass: f64, candidate_mass: f64) -> Option<Notch> {
        self.intervals_from_candidate(candidate_mass)
            .into_iter()
            .find(|iv| iv.contains(observed_mass))
            .map(|iv| iv.notch)
    }

    /// As [`MassDiffAcceptor::accept`], but encode a rejection as `-1`
    fn accept_code(&self, observed_mass: f64, candidate_mass: f64) -> i32 {
        match self.accept(observed_mass, candidate_mass) {
            Some(notch) => notch as i32,
            None => -1,
        }
    }
}

/// Accept a fixed set of mass offsets, each its own notch.
///
/// An observed mass `o` matches candidate `c` at notch `i` when `o` is within
/// tolerance of `c + offsets[i]`.
#[derive(Debug, Clone)]
pub struct DotMassDiffAcceptor {
    offsets: Vec<f64>,
    tolerance: Tolerance,
}

impl DotMassDiffAcceptor {
    pub fn new(offsets: Vec<f64>, tolerance: Tolerance) -> Result<Self, AcceptorError> {
        let tolerance = check_tolerance(tolerance)?;
        if offsets.is_empty() {
            return Err(AcceptorError::NoNotches);
        }
        if let Some(bad) = offsets.iter().find(|o| !o.is_finite()) {
            return Err(AcceptorError::InvalidInterval(*bad, *bad));
        }
        Ok(Self { offsets, tolerance })
    }

    /// Match only the monoisotopic mass
    pub fn exact(tolerance: Tolerance) -> Result<Self, AcceptorError> {
        Self::new(vec![0.0], tolerance)
    }

    /// Allow isotope peak mis-assignments between `min` and `max` C13 spacings.
    ///
    /// Notches are numbered by increasing magnitude with positive errors first, so the
    /// monoisotopic assignment is always notch 0 when `0` is in range, followed by
    /// +1, -1, +2, -2 ...
    pub fn isotope_errors(min: i32, max: i32, tolerance: Tolerance) -> Result<Self, AcceptorError> {
        if min > max {
            return Err(AcceptorError::InvalidInterval(min as f64, max as f64));
        }
        let offsets = (min..=max)
            .sorted_by_key(|i| (i.abs(), -i.signum()))
            .map(|i| i as f64 * C13_SPACING)
            .collect();
        Self::new(offsets, tolerance)
    }

    pub fn offsets(&self) -> &[f64] {
        &self.offsets
    }

    pub fn tolerance(&self) -> Tolerance {
        self.tolerance
    }
}

impl MassDiffAcceptor for DotMassDiffAcceptor {
    fn name(&self) -> String {
        format!(
            "dot({}) @ {:?}",
            self.offsets.iter().map(|o| format!("{o:.4}")).join(","),
            self.tolerance
        )
    }

    fn num_notches(&self) -> usize {
        self.offsets.len()
    }

    fn notch_label(&self, notch: Notch) -> String {
        match self.offsets.get(notch as usize) {
            Some(offset) if *offset == 0.0 => "0".to_string(),
            Some(offset) => format!("{offset:+.3}"),
            None => format!("?{notch}"),
        }
    }

    fn intervals_from_candidate(&self, candidate_mass: f64) -> Vec<AllowedInterval> {
        self.offsets
            .iter()
            .enumerate()
            .map(|(i, offset)| {
                let (lo, hi) = symmetric_window(self.tolerance, candidate_mass + offset);
                AllowedInterval::new(lo, hi, i as Notch)
            })
            .collect()
    }

    fn intervals_from_observed(&self, observed_mass: f64) -> Vec<AllowedInterval> {
        let (lo, hi) = symmetric_window(self.tolerance, observed_mass);
        self.offsets
            .iter()
            .enumerate()
            .filter_map(|(i, offset)| {
                refine_interval(
                    AllowedInterval::new(lo, hi, i as Notch).shifted(-offset),
                    |c| within_tolerance(self.tolerance, c + offset, observed_mass),
                )
            })
            .collect()
    }

    #[inline]
    fn accept(&self, observed_mass: f64, candidate_mass: f64) -> Option<Notch> {
        self.offsets
            .iter()
            .position(|offset| within_tolerance(self.tolerance, candidate_mass + offset, observed_mass))
            .map(|i| i as Notch)
    }
}

/// Accept any mass difference at all, with a single notch
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct OpenMassDiffAcceptor;

impl MassDiffAcceptor for OpenMassDiffAcceptor {
    fn name(&self) -> String {
        "open".to_string()
    }

    fn num_notches(&self) -> usize {
        1
    }

    fn notch_label(&self, _notch: Notch) -> String {
        "open".to_string()
    }

    fn intervals_from_candidate(&self, _candidate_mass: f64) -> Vec<AllowedInterval> {
        vec![AllowedInterval::new(f64::NEG_INFINITY, f64::INFINITY, 0)]
    }

    fn intervals_from_observed(&self, _observed_mass: f64) -> Vec<AllowedInterval> {
        vec![AllowedInterval::new(f64::NEG_INFINITY, f64::INFINITY, 0)]
    }

    #[inline]
    fn accept(&self, _observed_mass: f64, _candidate_mass: f64) -> Option<Notch> {
        Some(0)
    }
}

/// Accept mass differences `observed - candidate` falling within any of a set of
/// ranges, all sharing notch 0. Bounds may be infinite.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalMassDiffAcceptor {
    ranges: Vec<(f64, f64)>,
}

impl IntervalMassDiffAcceptor {
    pub fn new(mut ranges: Vec<(f64, f64)>) -> Result<Self, AcceptorError> {
        if ranges.is_empty() {
            return Err(AcceptorError::NoNotches);
        }
        for (lo, hi) in ranges.iter() {
            if lo.is_nan() || hi.is_nan() || lo > hi {
                return Err(AcceptorError::InvalidInterval(*lo, *hi));
            }
        }
        ranges.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
        Ok(Self { ranges })
    }

    pub fn ranges(&self) -> &[(f64, f64)] {
        &self.ranges
    }
}

impl MassDiffAcceptor for IntervalMassDiffAcceptor {
    fn name(&self) -> String {
        format!(
            "interval({})",
            self.ranges
                .iter()
                .map(|(lo, hi)| format!("{lo}..{hi}"))
                .join(";")
        )
    }

    fn num_notches(&self) -> usize {
        1
    }

    fn notch_label(&self, _notch: Notch) -> String {
        "0".to_string()
    }

    fn intervals_from_candidate(&self, candidate_mass: f64) -> Vec<AllowedInterval> {
        self.ranges
            .iter()
            .map(|(lo, hi)| AllowedInterval::new(candidate_mass + lo, candidate_mass + hi, 0))
            .collect()
    }

    fn intervals_from_observed(&self, observed_mass: f64) -> Vec<AllowedInterval> {
        self.ranges
            .iter()
            .filter_map(|(lo, hi)| {
                refine_interval(
                    AllowedInterval::new(observed_mass - hi, observed_mass - lo, 0),
                    |c| AllowedInterval::new(c + lo, c + hi, 0).contains(observed_mass),
                )
            })
            .collect()
    }

    #[inline]
    fn accept(&self, observed_mass: f64, candidate_mass: f64) -> Option<Notch> {
        self.ranges
            .iter()
            .any(|(lo, hi)| {
                AllowedInterval::new(candidate_mass + lo, candidate_mass + hi, 0)
                    .contains(observed_mass)
            })
            .then_some(0)
    }
}

/// One distinct combination of adducts
#[derive(Debug, Clone, PartialEq)]
pub struct AdductCombination {
    /// (adduct index, count) pairs for every adduct used at least once
    pub counts: Vec<(usize, u32)>,
    pub mass_shift: f64,
    pub label: String,
}

/// Accept sums of zero or more adducts up to per-adduct frequency caps, assigning one
/// notch to each distinct combination. The unadducted combination is always notch 0.
#[derive(Debug, Clone)]
pub struct AdductMassDiffAcceptor {
    combinations: Vec<AdductCombination>,
    tolerance: Tolerance,
}

impl AdductMassDiffAcceptor {
    /// Build the acceptor from `(adduct name, maximum count)` pairs resolved against
    /// `registry`. The order of `caps` fixes the notch numbering.
    pub fn new(
        registry: &AdductRegistry,
        caps: &[(&str, u32)],
        tolerance: Tolerance,
    ) -> Result<Self, AcceptorError> {
        let tolerance = check_tolerance(tolerance)?;
        let species = caps
            .iter()
            .map(|(name, max_count)| {
                registry
                    .get(name)
                    .map(|a| (a.name.clone(), a.mass_shift, *max_count))
                    .ok_or_else(|| AcceptorError::UnknownAdduct(name.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut combinations: Vec<AdductCombination> = species
            .iter()
            .map(|(_, _, max_count)| 0..=*max_count)
            .multi_cartesian_product()
            .map(|counts| {
                let used: Vec<(usize, u32)> = counts
                    .iter()
                    .copied()
                    .enumerate()
                    .filter(|(_, c)| *c > 0)
                    .collect();
                let mass_shift = used
                    .iter()
                    .map(|(i, c)| species[*i].1 * *c as f64)
                    .sum();
                let label = if used.is_empty() {
                    "Unadducted".to_string()
                } else {
                    used.iter()
                        .map(|(i, c)| format!("{}{}", species[*i].0, c))
                        .join("")
                };
                AdductCombination {
                    counts: used,
                    mass_shift,
                    label,
                }
            })
            .collect();

        // `multi_cartesian_product` yields nothing for zero species
        if combinations.is_empty() {
            combinations.push(AdductCombination {
                counts: Vec::new(),
                mass_shift: 0.0,
                label: "Unadducted".to_string(),
            });
        }
        combinations.sort_by(|a, b| {
            a.counts
                .len()
                .cmp(&b.counts.len())
                .then_with(|| a.counts.cmp(&b.counts))
        });

        Ok(Self {
            combinations,
            tolerance,
        })
    }

    pub fn combinations(&self) -> &[AdductCombination] {
        &self.combinations
    }

    pub fn notch_for_label(&self, label: &str) -> Option<Notch> {
        self.combinations
            .iter()
            .position(|c| c.label == label)
            .map(|i| i as Notch)
    }
}

impl MassDiffAcceptor for AdductMassDiffAcceptor {
    fn name(&self) -> String {
        format!(
            "adduct({}) @ {:?}",
            self.combinations.iter().map(|c| c.label.as_str()).join(","),
            self.tolerance
        )
    }

    fn num_notches(&self) -> usize {
        self.combinations.len()
    }

    fn notch_label(&self, notch: Notch) -> String {
        self.combinations
            .get(notch as usize)
            .map(|c| c.label.clone())
            .unwrap_or_else(|| format!("?{notch}"))
    }

    fn intervals_from_candidate(&self, candidate_mass: f64) -> Vec<AllowedInterval> {
        self.combinations
            .iter()
            .enumerate()
            .map(|(i, combo)| {
                let (lo, hi) = symmetric_window(self.tolerance, candidate_mass + combo.mass_shift);
                AllowedInterval::new(lo, hi, i as Notch)
            })
            .collect()
    }

    fn intervals_from_observed(&self, observed_mass: f64) -> Vec<AllowedInterval> {
        let (lo, hi) = symmetric_window(self.tolerance, observed_mass);
        self.combinations
            .iter()
            .enumerate()
            .filter_map(|(i, combo)| {
                refine_interval(
                    AllowedInterval::new(lo, hi, i as Notch).shifted(-combo.mass_shift),
                    |c| within_tolerance(self.tolerance, c + combo.mass_shift, observed_mass),
                )
            })
            .collect()
    }

    #[inline]
    fn accept(&self, observed_mass: f64, candidate_mass: f64) -> Option<Notch> {
        self.combinations
            .iter()
            .position(|combo| {
                within_tolerance(self.tolerance, candidate_mass + combo.mass_shift, observed_mass)
            })
            .map(|i| i as Notch)
    }
}

/// A closed set of acceptor implementations that can be shared across threads
#[derive(Debug, Clone)]
pub enum AcceptorKind {
    Dot(DotMassDiffAcceptor),
    Open(OpenMassDiffAcceptor),
    Interval(IntervalMassDiffAcceptor),
    Adduct(AdductMassDiffAcceptor),
}

macro_rules! dispatch {
    ($self:ident, $inner:ident => $body:expr) => {
        match $self {
            AcceptorKind::Dot($inner) => $body,
            AcceptorKind::Open($inner) => $body,
            AcceptorKind::Interval($inner) => $body,
            AcceptorKind::Adduct($inner) => $body,
        }
    };
}

impl MassDiffAcceptor for AcceptorKind {
    fn name(&self) -> String {
        dispatch!(self, a => a.name())
    }

    fn num_notches(&self) -> usize {
        dispatch!(self, a => a.num_notches())
    }

    fn notch_label(&self, notch: Notch) -> String {
        dispatch!(self, a => a.notch_label(notch))
    }

    fn intervals_from_candidate(&self, candidate_mass: f64) -> Vec<AllowedInterval> {
        dispatch!(self, a => a.intervals_from_candidate(candidate_mass))
    }

    fn intervals_from_observed(&self, observed_mass: f64) -> Vec<AllowedInterval> {
        dispatch!(self, a => a.intervals_from_observed(observed_mass))
    }

    #[inline]
    fn accept(&self, observed_mass: f64, candidate_mass: f64) -> Option<Notch> {
        dispatch!(self, a => a.accept(observed_mass, candidate_mass))
    }
}

impl From<DotMassDiffAcceptor> for AcceptorKind {
    fn from(value: DotMassDiffAcceptor) -> Self {
        Self::Dot(value)
    }
}

impl From<OpenMassDiffAcceptor> for AcceptorKind {
    fn from(value: OpenMassDiffAcceptor) -> Self {
        Self::Open(value)
    }
}

impl From<IntervalMassDiffAcceptor> for AcceptorKind {
    fn from(value: IntervalMassDiffAcceptor) -> Self {
        Self::Interval(value)
    }
}

impl From<AdductMassDiffAcceptor> for AcceptorKind {
    fn from(value: AdductMassDiffAcceptor) -> Self {
        Self::Adduct(value)
    }
}

/// A textual description of an acceptor, as found in configuration files.
///
/// Recognized forms:
/// - `exact`
/// - `isotope:<min>..<max>`, e.g. `isotope:0..1`
/// - `dot:<offset>,<offset>,...`
/// - `open`
/// - `interval:<lo>..<hi>[;<lo>..<hi>...]`, where an empty bound is unbounded
/// - `adduct:<name>:<max>,<name>:<max>,...`
#[derive(Debug, Clone, PartialEq)]
pub enum AcceptorSpec {
    Exact,
    Isotope(i32, i32),
    Dot(Vec<f64>),
    Open,
    Interval(Vec<(f64, f64)>),
    Adduct(Vec<(String, u32)>),
}

impl AcceptorSpec {
    /// Resolve this description into a concrete acceptor
    pub fn build(
        &self,
        tolerance: Tolerance,
        registry: &AdductRegistry,
    ) -> Result<AcceptorKind, AcceptorError> {
        let acceptor = match self {
            AcceptorSpec::Exact => DotMassDiffAcceptor::exact(tolerance)?.into(),
            AcceptorSpec::Isotope(lo, hi) => {
                DotMassDiffAcceptor::isotope_errors(*lo, *hi, tolerance)?.into()
            }
            AcceptorSpec::Dot(offsets) => DotMassDiffAcceptor::new(offsets.clone(), tolerance)?.into(),
            AcceptorSpec::Open => OpenMassDiffAcceptor.into(),
            AcceptorSpec::Interval(ranges) => IntervalMassDiffAcceptor::new(ranges.clone())?.into(),
            AcceptorSpec::Adduct(caps) => {
                let caps: Vec<(&str, u32)> = caps.iter().map(|(n, c)| (n.as_str(), *c)).collect();
                AdductMassDiffAcceptor::new(registry, &caps, tolerance)?.into()
            }
        };
        Ok(acceptor)
    }
}

fn parse_bound(spec: &str, token: &str, default: f64) -> Result<f64, AcceptorError> {
    let token = token.trim();
    if token.is_empty() {
        Ok(default)
    } else {
        token
            .parse::<f64>()
            .map_err(|e| AcceptorError::MalformedSpec(spec.to_string(), format!("{token:?}: {e}")))
    }
}

fn parse_range(spec: &str, token: &str) -> Result<(f64, f64), AcceptorError> {
    let (lo, hi) = token.split_once("..").ok_or_else(|| {
        AcceptorError::MalformedSpec(spec.to_string(), format!("expected <lo>..<hi>, got {token:?}"))
    })?;
    Ok((
        parse_bound(spec, lo, f64::NEG_INFINITY)?,
        parse_bound(spec, hi, f64::INFINITY)?,
    ))
}

impl FromStr for AcceptorSpec {
    type Err = AcceptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let malformed = |msg: &str| AcceptorError::MalformedSpec(s.to_string(), msg.to_string());
        let (kind, rest) = match s.split_once(':') {
            Some((kind, rest)) => (kind.trim(), Some(rest.trim())),
            None => (s, None),
        };
        match (kind.to_lowercase().as_str(), rest) {
            ("exact", None) => Ok(Self::Exact),
            ("open", None) => Ok(Self::Open),
            ("isotope", Some(rest)) => {
                let (lo, hi) = rest
                    .split_once("..")
                    .ok_or_else(|| malformed("expected isotope:<min>..<max>"))?;
                let lo = lo.trim().parse::<i32>().map_err(|e| malformed(&e.to_string()))?;
                let hi = hi.trim().parse::<i32>().map_err(|e| malformed(&e.to_string()))?;
                Ok(Self::Isotope(lo, hi))
            }
            ("dot", Some(rest)) => {
                let offsets = rest
                    .split(',')
                    .map(|t| t.trim().parse::<f64>().map_err(|e| malformed(&e.to_string())))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::Dot(offsets))
            }
            ("interval", Some(rest)) => {
                let ranges = rest
                    .split(';')
                    .map(|t| parse_range(s, t))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::Interval(ranges))
            }
            ("adduct", Some(rest)) => {
                let caps = rest
                    .split(',')
                    .map(|t| {
                        let (name, count) = t
                            .split_once(':')
                            .ok_or_else(|| malformed("expected <name>:<max count>"))?;
                        let count = count
                            .trim()
                            .parse::<u32>()
                            .map_err(|e| malformed(&e.to_string()))?;
                        Ok((name.trim().to_string(), count))
                    })
                    .collect::<Result<Vec<_>, AcceptorError>>()?;
                Ok(Self::Adduct(caps))
            }
            _ => Err(malformed("unrecognized acceptor kind")),
        }
    }
}

impl Display for AcceptorSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bound = |v: &f64| {
            if v.is_finite() {
                v.to_string()
            } else {
                String::new()
            }
        };
        match self {
            AcceptorSpec::Exact => write!(f, "exact"),
            AcceptorSpec::Open => write!(f, "open"),
            AcceptorSpec::Isotope(lo, hi) => write!(f, "isotope:{lo}..{hi}"),
            AcceptorSpec::Dot(offsets) => write!(f, "dot:{}", offsets.iter().join(",")),
            AcceptorSpec::Interval(ranges) => write!(
                f,
                "interval:{}",
                ranges
                    .iter()
                    .map(|(lo, hi)| format!("{}..{}", bound(lo), bound(hi)))
                    .join(";")
            ),
            AcceptorSpec::Adduct(caps) => write!(
                f,
                "adduct:{}",
                caps.iter().map(|(n, c)| format!("{n}:{c}")).join(",")
            ),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    fn assert_consistent<A: MassDiffAcceptor>(acceptor: &A, observed: f64, candidate: f64) {
        let from_observed = acceptor.intervals_from_observed(observed);
        let from_candidate = acceptor.intervals_from_candidate(candidate);
        match acceptor.accept(observed, candidate) {
            Some(notch) => {
                assert!(
                    from_observed
                        .iter()
                        .any(|iv| iv.notch == notch && iv.contains(candidate)),
                    "{candidate} not in {from_observed:?} for notch {notch}"
                );
                assert!(
                    from_candidate
                        .iter()
                        .any(|iv| iv.notch == notch && iv.contains(observed)),
                    "{observed} not in {from_candidate:?} for notch {notch}"
                );
                assert_eq!(acceptor.accept_code(observed, candidate), notch as i32);
            }
            None => {
                assert!(!from_observed.iter().any(|iv| iv.contains(candidate)));
                assert!(!from_candidate.iter().any(|iv| iv.contains(observed)));
                assert_eq!(acceptor.accept_code(observed, candidate), -1);
            }
        }
    }

    /// Every interval endpoint, and the representable value just outside it, must get the
    /// same verdict from all three views.
    fn assert_consistent_at_edges<A: MassDiffAcceptor>(acceptor: &A, observed: f64, candidate: f64) {
        for iv in acceptor.intervals_from_candidate(candidate) {
            for edge in [iv.min, iv.max] {
                if !edge.is_finite() {
                    continue;
                }
                let notch = acceptor.accept(edge, candidate);
                assert!(
                    matches!(notch, Some(n) if n <= iv.notch),
                    "{edge} from {iv:?} rejected as {notch:?}"
                );
                for o in [edge, next_down(edge), next_up(edge)] {
                    assert_consistent(acceptor, o, candidate);
                }
            }
        }
        for iv in acceptor.intervals_from_observed(observed) {
            for edge in [iv.min, iv.max] {
                if !edge.is_finite() {
                    continue;
                }
                let notch = acceptor.accept(observed, edge);
                assert!(
                    matches!(notch, Some(n) if n <= iv.notch),
                    "{edge} from {iv:?} rejected as {notch:?}"
                );
                for c in [edge, next_down(edge), next_up(edge)] {
                    assert_consistent(acceptor, observed, c);
                }
            }
        }
    }

    #[test]
    fn test_window_edges_agree() {
        let acceptor = DotMassDiffAcceptor::isotope_errors(-1, 2, Tolerance::PPM(10.0)).unwrap();
        for candidate in [500.0, 1234.5678, 2999.99, 17000.25] {
            assert_consistent_at_edges(&acceptor, candidate, candidate);
            assert_consistent_at_edges(&acceptor, candidate + C13_SPACING, candidate);
        }
        let acceptor = DotMassDiffAcceptor::isotope_errors(0, 1, Tolerance::Da(0.02)).unwrap();
        assert_consistent_at_edges(&acceptor, 1000.01, 1000.0);

        let interval = IntervalMassDiffAcceptor::new(vec![(-0.1, 0.3)]).unwrap();
        assert_consistent_at_edges(&interval, 1000.3, 1000.0);
    }

    #[test]
    fn test_next_float() {
        assert!(next_up(1.0) > 1.0);
        assert!(next_down(1.0) < 1.0);
        assert_eq!(next_down(next_up(1000.0)), 1000.0);
        assert!(next_up(-1.0) > -1.0);
        assert!(next_up(0.0) > 0.0);
        assert!(next_down(0.0) < 0.0);
        assert_eq!(next_up(f64::INFINITY), f64::INFINITY);
    }

    #[test]
    fn test_adduct_notches() {
        let registry = AdductRegistry::default();
        let acceptor =
            AdductMassDiffAcceptor::new(&registry, &[("Na", 1), ("K", 2)], Tolerance::PPM(10.0))
                .unwrap();
        let labels: Vec<_> = (0..acceptor.num_notches())
            .map(|i| acceptor.notch_label(i as Notch))
            .collect();
        assert_eq!(
            labels,
            vec!["Unadducted", "Na1", "K1", "K2", "Na1K1", "Na1K2"]
        );

        let k = registry.get("K").unwrap().mass_shift;
        let mass = 1500.0;
        let k2 = acceptor.notch_for_label("K2").unwrap();
        assert_eq!(acceptor.accept(mass + 2.0 * k, mass), Some(k2));
        assert_eq!(acceptor.accept_code(mass + 2.0 * k, mass), k2 as i32);
        assert_eq!(acceptor.accept(mass + 2.0 * k + 0.1, mass), None);
        assert_eq!(acceptor.accept_code(mass + 2.0 * k + 0.1, mass), -1);
        assert_eq!(acceptor.accept(mass, mass), Some(0));
    }

    #[test]
    fn test_unknown_adduct() {
        let err = AdductMassDiffAcceptor::new(
            &AdductRegistry::default(),
            &[("Xx", 1)],
            Tolerance::PPM(10.0),
        )
        .unwrap_err();
        assert_eq!(err, AcceptorError::UnknownAdduct("Xx".into()));
    }

    #[test]
    fn test_isotope_notch_order() {
        let acceptor = DotMassDiffAcceptor::isotope_errors(-1, 2, Tolerance::PPM(5.0)).unwrap();
        let offsets: Vec<i32> = acceptor
            .offsets()
            .iter()
            .map(|o| (o / C13_SPACING).round() as i32)
            .collect();
        assert_eq!(offsets, vec![0, 1, -1, 2]);
        assert_eq!(acceptor.accept(1001.00335, 1000.0), Some(1));
        assert_eq!(acceptor.accept(1000.0, 1000.0), Some(0));
        assert_eq!(acceptor.accept(1000.5, 1000.0), None);
    }

    #[test]
    fn test_ppm_window_is_symmetric() {
        let tol = Tolerance::PPM(10.0);
        let a = 1000.0;
        let (lo, hi) = symmetric_window(tol, a);
        for b in [lo, hi] {
            assert!(within_tolerance(tol, a, b));
            // Evaluated relative to the larger mass, so both orderings agree
            assert!(within_tolerance(tol, b, a) || (b - a).abs() < 1e-12);
        }
        assert!(!within_tolerance(tol, a, hi + 1e-6));
        assert!(!within_tolerance(tol, a, lo - 1e-6));
    }

    #[test]
    fn test_open_and_interval() {
        let open = OpenMassDiffAcceptor;
        assert_eq!(open.accept(100.0, 5000.0), Some(0));
        assert!(!open.intervals_from_observed(100.0)[0].is_bounded());

        let interval = IntervalMassDiffAcceptor::new(vec![(-187.0, f64::INFINITY)]).unwrap();
        assert_eq!(interval.accept(1000.0, 1100.0), Some(0));
        assert_eq!(interval.accept(1000.0, 1187.0), Some(0));
        assert_eq!(interval.accept(1000.0, 1187.5), None);
        assert_eq!(interval.accept(5000.0, 1000.0), Some(0));

        assert!(IntervalMassDiffAcceptor::new(vec![(5.0, 1.0)]).is_err());
        assert!(IntervalMassDiffAcceptor::new(vec![]).is_err());
    }

    #[test]
    fn test_parse_specs() {
        let registry = AdductRegistry::default();
        let tol = Tolerance::PPM(10.0);
        for (text, notches) in [
            ("exact", 1),
            ("isotope:0..1", 2),
            ("dot:0,1.00335,2.0067", 3),
            ("open", 1),
            ("interval:-187..", 1),
            ("interval:..-1;1..5", 1),
            ("adduct:Na:1,K:2", 6),
        ] {
            let spec: AcceptorSpec = text.parse().unwrap();
            let acceptor = spec.build(tol, &registry).unwrap();
            assert_eq!(acceptor.num_notches(), notches, "{text}");
            let round_trip: AcceptorSpec = spec.to_string().parse().unwrap();
            assert_eq!(round_trip, spec);
        }

        for text in ["", "isotope", "isotope:a..b", "dot:x", "interval:5", "adduct:Na", "bogus"] {
            assert!(text.parse::<AcceptorSpec>().is_err(), "{text:?} should not parse");
        }
        let unknown: AcceptorSpec = "adduct:Zz:1".parse().unwrap();
        assert!(matches!(
            unknown.build(tol, &registry),
            Err(AcceptorError::UnknownAdduct(_))
        ));
        assert!(AcceptorSpec::Exact.build(Tolerance::PPM(-1.0), &registry).is_err());
    }

    fn tolerance_strategy() -> impl Strategy<Value = Tolerance> {
        prop_oneof![
            (0.5f64..50.0).prop_map(Tolerance::PPM),
            (0.001f64..0.5).prop_map(Tolerance::Da),
        ]
    }

    proptest! {
        #[test]
        fn dot_acceptor_consistency(
            candidate in 200.0f64..20000.0,
            tolerance in tolerance_strategy(),
            isotope in -1i32..3,
            jitter in -0.6f64..0.6,
        ) {
            let acceptor = DotMassDiffAcceptor::isotope_errors(-1, 2, tolerance).unwrap();
            let observed = candidate + isotope as f64 * C13_SPACING + jitter;
            assert_consistent(&acceptor, observed, candidate);
        }

        #[test]
        fn adduct_acceptor_consistency(
            candidate in 200.0f64..20000.0,
            tolerance in tolerance_strategy(),
            na in 0u32..2,
            k in 0u32..3,
            jitter in -0.05f64..0.05,
        ) {
            let registry = AdductRegistry::default();
            let acceptor = AdductMassDiffAcceptor::new(&registry, &[("Na", 1), ("K", 2)], tolerance).unwrap();
            let shift = na as f64 * registry.get("Na").unwrap().mass_shift
                + k as f64 * registry.get("K").unwrap().mass_shift;
            assert_consistent(&acceptor, candidate + shift + jitter, candidate);
        }

        #[test]
        fn interval_acceptor_consistency(
            candidate in 200.0f64..20000.0,
            delta in -400.0f64..400.0,
            lo in -200.0f64..0.0,
            width in 0.0f64..300.0,
        ) {
            let acceptor = IntervalMassDiffAcceptor::new(vec![(lo, lo + width), (250.0, f64::INFINITY)]).unwrap();
            assert_consistent(&acceptor, candidate + delta, candidate);
        }

        #[test]
        fn dot_acceptor_edges(
            candidate in 200.0f64..20000.0,
            tolerance in tolerance_strategy(),
            isotope in -1i32..3,
        ) {
            let acceptor = DotMassDiffAcceptor::isotope_errors(-1, 2, tolerance).unwrap();
            let observed = candidate + isotope as f64 * C13_SPACING;
            assert_consistent_at_edges(&acceptor, observed, candidate);
        }

        #[test]
        fn adduct_acceptor_edges(
            candidate in 200.0f64..20000.0,
            tolerance in tolerance_strategy(),
            k in 0u32..3,
        ) {
            let registry = AdductRegistry::default();
            let acceptor = AdductMassDiffAcceptor::new(&registry, &[("Na", 1), ("K", 2)], tolerance).unwrap();
            let observed = candidate + k as f64 * registry.get("K").unwrap().mass_shift;
            assert_consistent_at_edges(&acceptor, observed, candidate);
        }

        #[test]
        fn interval_acceptor_edges(
            candidate in 200.0f64..20000.0,
            delta in -400.0f64..400.0,
            lo in -200.0f64..0.0,
            width in 0.0f64..300.0,
        ) {
            let acceptor = IntervalMassDiffAcceptor::new(vec![(lo, lo + width), (250.0, f64::INFINITY)]).unwrap();
            assert_consistent_at_edges(&acceptor, candidate + delta, candidate);
        }
    }
}
