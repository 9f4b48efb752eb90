//! Candidate sequences and the immutable, mass-ordered set they are searched from
use std::fmt::Display;
use std::ops::Range;
use std::sync::Arc;

use crate::mass::{Dissociation, IonKind, Terminus, WATER};

/// A theoretical fragment ion of a candidate
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Fragment {
    /// The neutral mass of the fragment
    pub mass: f64,
    pub terminus: Terminus,
    pub kind: IonKind,
    /// The number of residues from `terminus` this fragment covers
    pub number: u32,
}

impl Fragment {
    pub fn new(mass: f64, kind: IonKind, number: u32) -> Self {
        Self {
            mass,
            terminus: kind.terminus(),
            kind,
            number,
        }
    }
}

impl Display for Fragment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            IonKind::B => "b",
            IonKind::Y => "y",
            IonKind::C => "c",
            IonKind::Z => "z",
        };
        write!(f, "{kind}{}", self.number)
    }
}

/// Mass modifications attached to either end of a sequence
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TerminalMods {
    pub n_term: f64,
    pub c_term: f64,
}

impl TerminalMods {
    pub fn new(n_term: f64, c_term: f64) -> Self {
        Self { n_term, c_term }
    }

    pub fn get(&self, terminus: Terminus) -> f64 {
        match terminus {
            Terminus::N => self.n_term,
            Terminus::C => self.c_term,
        }
    }
}

/// How many of a candidate's termini agree with the digestion rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum Specificity {
    FullySpecific,
    SemiSpecific,
    NonSpecific,
}

impl Specificity {
    pub const ALL: [Specificity; 3] = [
        Specificity::FullySpecific,
        Specificity::SemiSpecific,
        Specificity::NonSpecific,
    ];

    pub fn from_specific_ends(n_specific: bool, c_specific: bool) -> Self {
        match (n_specific, c_specific) {
            (true, true) => Self::FullySpecific,
            (false, false) => Self::NonSpecific,
            _ => Self::SemiSpecific,
        }
    }
}

impl Display for Specificity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Specificity::FullySpecific => "fully-specific",
            Specificity::SemiSpecific => "semi-specific",
            Specificity::NonSpecific => "non-specific",
        };
        f.write_str(name)
    }
}

/// Which residue boundaries of a sequence are valid digestion sites.
///
/// Sites are boundary positions: site `i` lies between residue `i - 1` and residue `i`.
/// The sequence's own two ends are described separately, since whether the original
/// sequence ends are specific is a property of how it was produced.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CleavageAnnotations {
    pub n_term_specific: bool,
    pub c_term_specific: bool,
    pub internal_sites: Vec<u32>,
}

impl CleavageAnnotations {
    pub fn new(n_term_specific: bool, c_term_specific: bool, mut internal_sites: Vec<u32>) -> Self {
        internal_sites.sort_unstable();
        internal_sites.dedup();
        Self {
            n_term_specific,
            c_term_specific,
            internal_sites,
        }
    }

    /// Both ends of the source sequence are specific and no internal site is known
    pub fn fully_specific() -> Self {
        Self::new(true, true, Vec::new())
    }

    fn is_site(&self, position: u32) -> bool {
        self.internal_sites.binary_search(&position).is_ok()
    }

    /// Classify the sub-sequence `start..end` of a sequence of `length` residues
    pub fn classify(&self, start: u32, end: u32, length: u32) -> Specificity {
        let n_specific = if start == 0 {
            self.n_term_specific
        } else {
            self.is_site(start)
        };
        let c_specific = if end == length {
            self.c_term_specific
        } else {
            self.is_site(end)
        };
        Specificity::from_specific_ends(n_specific, c_specific)
    }

    /// The annotations of the sub-sequence `start..end`, re-based so that the
    /// sub-sequence's own ends carry their specificity.
    pub fn slice(&self, start: u32, end: u32, length: u32) -> Self {
        let n_term_specific = if start == 0 {
            self.n_term_specific
        } else {
            self.is_site(start)
        };
        let c_term_specific = if end == length {
            self.c_term_specific
        } else {
            self.is_site(end)
        };
        let internal_sites = self
            .internal_sites
            .iter()
            .filter(|s| start < **s && **s < end)
            .map(|s| s - start)
            .collect();
        Self {
            n_term_specific,
            c_term_specific,
            internal_sites,
        }
    }
}

/// Residue-level detail needed to regenerate fragments for partial sequences
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResidueInfo {
    pub masses: Vec<f64>,
    pub terminal_mods: TerminalMods,
    pub dissociation: Dissociation,
    pub cleavage: CleavageAnnotations,
}

impl ResidueInfo {
    pub fn len(&self) -> usize {
        self.masses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masses.is_empty()
    }

    /// Cumulative residue mass sums starting from `terminus`, `sums[k]` being the total
    /// mass of the first `k` residues read from that end. Terminal modifications are
    /// not included.
    pub fn cumulative_masses(&self, terminus: Terminus) -> Vec<f64> {
        let mut sums = Vec::with_capacity(self.masses.len() + 1);
        sums.push(0.0);
        let mut acc = 0.0;
        let mut push = |m: &f64| {
            acc += m;
            sums.push(acc);
        };
        match terminus {
            Terminus::N => self.masses.iter().for_each(&mut push),
            Terminus::C => self.masses.iter().rev().for_each(&mut push),
        }
        sums
    }
}

/// The identity of a candidate within one search: the position of its source record
/// in the [`CandidateSet`] and the residue span it covers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CandidateKey {
    pub source: u32,
    pub start: u32,
    pub end: u32,
}

impl CandidateKey {
    pub fn new(source: u32, start: u32, end: u32) -> Self {
        Self { source, start, end }
    }
}

impl Display for CandidateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}..{}]", self.source, self.start, self.end)
    }
}

/// A theoretical sequence with precomputed precursor and fragment masses.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Candidate {
    pub sequence: String,
    /// The neutral monoisotopic mass of the whole sequence
    pub monoisotopic_mass: f64,
    /// Theoretical fragments, sorted by mass
    pub fragments: Vec<Fragment>,
    pub is_decoy: bool,
    pub residues: Option<ResidueInfo>,
    /// Assigned when the candidate joins a [`CandidateSet`]
    pub key: CandidateKey,
}

impl Candidate {
    /// Create a candidate from precomputed masses
    pub fn new(
        sequence: impl Into<String>,
        monoisotopic_mass: f64,
        mut fragments: Vec<Fragment>,
        is_decoy: bool,
    ) -> Self {
        fragments.sort_by(|a, b| a.mass.total_cmp(&b.mass));
        Self {
            sequence: sequence.into(),
            monoisotopic_mass,
            fragments,
            is_decoy,
            residues: None,
            key: CandidateKey::default(),
        }
    }

    /// Compute the precursor mass and the two ion series of `dissociation` from
    /// residue masses. Fragments are generated for every cleavage between residues.
    pub fn from_residues(
        sequence: impl Into<String>,
        masses: Vec<f64>,
        terminal_mods: TerminalMods,
        dissociation: Dissociation,
        is_decoy: bool,
    ) -> Self {
        let info = ResidueInfo {
            masses,
            terminal_mods,
            dissociation,
            cleavage: CleavageAnnotations::fully_specific(),
        };
        let monoisotopic_mass = Self::precursor_mass_of(&info);
        let fragments = Self::generate_fragments(&info);
        let mut this = Self::new(sequence, monoisotopic_mass, fragments, is_decoy);
        this.key.end = info.len() as u32;
        this.residues = Some(info);
        this
    }

    pub fn with_cleavage(mut self, cleavage: CleavageAnnotations) -> Self {
        if let Some(info) = self.residues.as_mut() {
            info.cleavage = cleavage;
        }
        self
    }

    fn precursor_mass_of(info: &ResidueInfo) -> f64 {
        info.terminal_mods.n_term
            + info.masses.iter().sum::<f64>()
            + info.terminal_mods.c_term
            + WATER
    }

    fn generate_fragments(info: &ResidueInfo) -> Vec<Fragment> {
        let n = info.masses.len();
        if n < 2 {
            return Vec::new();
        }
        let [n_kind, c_kind] = info.dissociation.ion_kinds();
        let prefix = info.cumulative_masses(Terminus::N);
        let suffix = info.cumulative_masses(Terminus::C);
        let mut fragments = Vec::with_capacity(2 * (n - 1));
        for k in 1..n {
            fragments.push(Fragment::new(
                n_kind.fragment_mass(info.terminal_mods.n_term + prefix[k]),
                n_kind,
                k as u32,
            ));
            fragments.push(Fragment::new(
                c_kind.fragment_mass(info.terminal_mods.c_term + suffix[k]),
                c_kind,
                k as u32,
            ));
        }
        fragments
    }

    pub fn num_residues(&self) -> usize {
        self.residues.as_ref().map(|r| r.len()).unwrap_or_default()
    }

    /// How many of this candidate's own ends are digestion sites. Candidates without
    /// residue information are assumed to be fully specific.
    pub fn specificity(&self) -> Specificity {
        match self.residues.as_ref() {
            Some(info) => {
                let n = info.len() as u32;
                info.cleavage.classify(0, n, n)
            }
            None => Specificity::FullySpecific,
        }
    }

    /// Build the sub-sequence `start..end` of this candidate with its fragments
    /// regenerated.
    ///
    /// A terminal modification survives only on an end that coincides with the
    /// corresponding end of this sequence. The span is relative to this candidate's
    /// residues and the resulting key is expressed relative to the same source.
    /// Returns `None` without residue information or for an empty/out of range span.
    pub fn truncate(&self, start: usize, end: usize) -> Option<Candidate> {
        let info = self.residues.as_ref()?;
        let n = info.len();
        if start >= end || end > n {
            return None;
        }
        let terminal_mods = TerminalMods::new(
            if start == 0 { info.terminal_mods.n_term } else { 0.0 },
            if end == n { info.terminal_mods.c_term } else { 0.0 },
        );
        let sub = ResidueInfo {
            masses: info.masses[start..end].to_vec(),
            terminal_mods,
            dissociation: info.dissociation,
            cleavage: info.cleavage.slice(start as u32, end as u32, n as u32),
        };
        let sequence = if self.sequence.chars().count() == n {
            self.sequence.chars().skip(start).take(end - start).collect()
        } else {
            format!("{}[{start}..{end}]", self.sequence)
        };
        let mut truncated = Candidate::new(
            sequence,
            Self::precursor_mass_of(&sub),
            Self::generate_fragments(&sub),
            self.is_decoy,
        );
        truncated.residues = Some(sub);
        truncated.key = CandidateKey::new(
            self.key.source,
            self.key.start + start as u32,
            self.key.start + end as u32,
        );
        Some(truncated)
    }
}

impl Display for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{} ({:.4})",
            if self.is_decoy { "DECOY_" } else { "" },
            self.sequence,
            self.monoisotopic_mass
        )
    }
}

/// The immutable candidate array for a run, sorted by precursor mass.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    candidates: Vec<Arc<Candidate>>,
    masses: Vec<f64>,
}

impl CandidateSet {
    /// Stably sort `candidates` by precursor mass and assign each its [`CandidateKey`]
    pub fn new(mut candidates: Vec<Candidate>) -> Self {
        candidates.sort_by(|a, b| a.monoisotopic_mass.total_cmp(&b.monoisotopic_mass));
        let candidates: Vec<_> = candidates
            .into_iter()
            .enumerate()
            .map(|(i, mut c)| {
                c.key = CandidateKey::new(i as u32, 0, c.num_residues() as u32);
                Arc::new(c)
            })
            .collect();
        let masses = candidates.iter().map(|c| c.monoisotopic_mass).collect();
        Self { candidates, masses }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Candidate>> {
        self.candidates.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arc<Candidate>> {
        self.candidates.iter()
    }

    pub fn as_slice(&self) -> &[Arc<Candidate>] {
        &self.candidates
    }

    /// The positions of all candidates whose precursor mass lies within `[low, high]`
    pub fn indices_in_mass_range(&self, low: f64, high: f64) -> Range<usize> {
        let start = self.masses.partition_point(|m| *m < low);
        let end = self.masses.partition_point(|m| *m <= high);
        start..end.max(start)
    }
}

impl std::ops::Index<usize> for CandidateSet {
    type Output = Arc<Candidate>;

    fn index(&self, index: usize) -> &Self::Output {
        &self.candidates[index]
    }
}

impl FromIterator<Candidate> for CandidateSet {
    fn from_iter<T: IntoIterator<Item = Candidate>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
