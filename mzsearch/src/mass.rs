/*! Mass constants and ion series definitions shared by candidates and scoring */
#[cfg(test)]
use num_traits::Float;

#[doc(hidden)]
pub use chemical_elements::{neutral_mass, PROTON as _PROTON};

/// The mass of H+, a hydrogen atom minus an electron
pub const PROTON: f64 = _PROTON;
/// The monoisotopic mass of a hydrogen atom
pub const HYDROGEN: f64 = 1.00782503207;
/// The monoisotopic mass of water
pub const WATER: f64 = 18.0105646837;
/// The monoisotopic mass of ammonia
pub const AMMONIA: f64 = 17.02654910101;
/// The mass spacing between the monoisotopic peak and the first C13 isotope peak
pub const C13_SPACING: f64 = 1.00335483810;

#[cfg(test)]
pub(crate) fn isclose<T: Float>(a: T, b: T, delta: T) -> bool {
    (a - b).abs() < delta
}

/// The fragmentation method, which determines which ion series are generated
/// from a residue sequence.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Dissociation {
    /// Collisional dissociation, producing b and y ions
    #[default]
    Hcd,
    /// Electron-driven dissociation, producing c and z• ions
    Etd,
}

impl Dissociation {
    /// The ion kinds produced by this dissociation method, N-terminal first
    pub const fn ion_kinds(&self) -> [IonKind; 2] {
        match self {
            Self::Hcd => [IonKind::B, IonKind::Y],
            Self::Etd => [IonKind::C, IonKind::Z],
        }
    }

    /// The mass that an N-terminal fragment and its complementary C-terminal
    /// fragment sum to, relative to the precursor neutral mass.
    pub const fn complementary_offset(&self) -> f64 {
        match self {
            Self::Hcd => 0.0,
            Self::Etd => HYDROGEN,
        }
    }
}

/// Which end of the sequence a fragment ion contains
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Terminus {
    N,
    C,
}

impl Terminus {
    pub const fn opposite(&self) -> Self {
        match self {
            Self::N => Self::C,
            Self::C => Self::N,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IonKind {
    B,
    Y,
    C,
    Z,
}

impl IonKind {
    pub const fn terminus(&self) -> Terminus {
        match self {
            Self::B | Self::C => Terminus::N,
            Self::Y | Self::Z => Terminus::C,
        }
    }

    /// Convert the summed residue mass of a terminal fragment (including the terminal
    /// cap modification) into the neutral fragment mass of this ion kind.
    #[inline]
    pub fn fragment_mass(&self, residue_sum: f64) -> f64 {
        match self {
            Self::B => residue_sum,
            Self::C => residue_sum + AMMONIA,
            Self::Y => residue_sum + WATER,
            Self::Z => residue_sum + WATER - AMMONIA + HYDROGEN,
        }
    }
}

/// The mass an ion with neutral mass `mass` and charge `charge` would appear at
/// if it were mistaken for a singly charged ion.
#[inline]
pub fn apparent_singly_charged_mass(mass: f64, charge: i32) -> f64 {
    let z = charge as f64;
    let mz = (mass + z * PROTON) / z;
    neutral_mass(mz, 1, PROTON)
}
