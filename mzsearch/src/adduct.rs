//! An explicit registry of adduct mass shifts
use std::fmt::Display;

/// A charge carrier substitution, expressed as the mass shift relative to a proton
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Adduct {
    pub name: String,
    pub mass_shift: f64,
}

impl Adduct {
    pub fn new(name: impl Into<String>, mass_shift: f64) -> Self {
        Self {
            name: name.into(),
            mass_shift,
        }
    }
}

impl Display for Adduct {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({:+.6})", self.name, self.mass_shift)
    }
}

/// A lookup table of known adducts.
///
/// This is a plain value: construct it once, add any site-specific adducts with
/// [`AdductRegistry::with_adduct`], and pass it to whatever needs to resolve adduct
/// names. Nothing about it is process-global.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AdductRegistry {
    adducts: Vec<Adduct>,
}

impl Default for AdductRegistry {
    fn default() -> Self {
        Self::empty()
            .with_adduct(Adduct::new("Na", 21.981943))
            .with_adduct(Adduct::new("K", 37.955882))
            .with_adduct(Adduct::new("NH4", 17.026549))
            .with_adduct(Adduct::new("Li", 6.008178))
            .with_adduct(Adduct::new("Ca", 37.946941))
    }
}

impl AdductRegistry {
    pub fn empty() -> Self {
        Self {
            adducts: Vec::new(),
        }
    }

    /// Add `adduct`, replacing any existing entry with the same name
    pub fn with_adduct(mut self, adduct: Adduct) -> Self {
        match self.adducts.iter_mut().find(|a| a.name == adduct.name) {
            Some(existing) => *existing = adduct,
            None => self.adducts.push(adduct),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Adduct> {
        self.adducts.iter().find(|a| a.name == name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Adduct> {
        self.adducts.iter()
    }

    pub fn len(&self) -> usize {
        self.adducts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adducts.is_empty()
    }
}
