use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use mzpeaks::Tolerance;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use mzsearch::{
    acceptor::AcceptorSpec,
    disambiguation::{DisambiguationPolicy, DisambiguatorKind},
    Adduct, AcceptorKind, AdductRegistry, CandidateSet, Dissociation, FdrEngine, FragmentScorer,
    IndexParams, ScoringParams, SearchEngine, SearchError, SearchParams, Specificity,
    StrategyKind, Terminus,
};

pub const CONFIG_FILE_NAME: &str = "mzsearcher.toml";
pub const ENV_PREFIX: &str = "MZSEARCHER_";
pub const BUFFER_SIZE: usize = 10_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Extract(
        #[source]
        #[from]
        Box<figment::Error>,
    ),
    #[error("Invalid {0} tolerance: {1}")]
    InvalidTolerance(&'static str, f64),
    #[error("The q-value threshold must be between 0 and 1, got {0}")]
    InvalidThreshold(f64),
    #[error("The channel buffer size must be at least 1")]
    InvalidBufferSize,
    #[error("Invalid adduct {0:?} with mass shift {1}")]
    InvalidAdduct(String, f64),
    #[error(transparent)]
    Search(#[from] SearchError),
}

impl From<figment::Error> for ConfigError {
    fn from(value: figment::Error) -> Self {
        Self::Extract(Box::new(value))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToleranceUnit {
    #[default]
    Ppm,
    Da,
}

/// A mass accuracy constraint, written as `{ value = 10.0, unit = "ppm" }`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToleranceConfig {
    pub value: f64,
    #[serde(default)]
    pub unit: ToleranceUnit,
}

impl ToleranceConfig {
    pub const fn ppm(value: f64) -> Self {
        Self {
            value,
            unit: ToleranceUnit::Ppm,
        }
    }

    pub const fn da(value: f64) -> Self {
        Self {
            value,
            unit: ToleranceUnit::Da,
        }
    }

    fn validate(&self, what: &'static str) -> Result<Tolerance, ConfigError> {
        if !(self.value.is_finite() && self.value > 0.0) {
            return Err(ConfigError::InvalidTolerance(what, self.value));
        }
        Ok(match self.unit {
            ToleranceUnit::Ppm => Tolerance::PPM(self.value),
            ToleranceUnit::Da => Tolerance::Da(self.value),
        })
    }
}

/// A site-specific adduct added to the default registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdductConfig {
    pub name: String,
    pub mass_shift: f64,
}

/// The full set of user-facing search parameters.
///
/// Every field has a default, so a configuration file only needs to name what it
/// changes. Read with [`SearchConfig::load`], then turn into [`SearchSettings`] with
/// [`SearchConfig::validate`] before any spectrum is touched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// The precursor mass difference acceptor, e.g. `isotope:0..1` or `adduct:Na:1,K:2`
    pub acceptor: String,
    pub precursor_tolerance: ToleranceConfig,
    pub fragment_tolerance: ToleranceConfig,
    pub adducts: Vec<AdductConfig>,

    pub strategy: StrategyKind,
    pub bin_width: f64,
    pub max_fragment_mass: f64,
    pub precursor_bin_width: f64,
    pub fixed_terminus: Terminus,
    pub specificities: Vec<Specificity>,

    pub dissociation: Dissociation,
    pub min_score: f64,
    pub match_all_charges: bool,
    pub low_mass_threshold: Option<f64>,
    pub complementary_ions: bool,
    pub min_index_hits: Option<u32>,

    pub disambiguation: DisambiguationPolicy,
    pub min_unique_ions: usize,
    pub q_value_threshold: f64,

    /// The number of threads to use, passing a value < 1 to use all available threads
    pub threads: i32,
    pub channel_buffer_size: usize,
    /// The path to write a log file to, in addition to STDERR
    pub log_file: Option<PathBuf>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        let index = IndexParams::default();
        Self {
            acceptor: "isotope:0..1".to_string(),
            precursor_tolerance: ToleranceConfig::ppm(10.0),
            fragment_tolerance: ToleranceConfig::ppm(20.0),
            adducts: Vec::new(),
            strategy: StrategyKind::Indexed,
            bin_width: index.bin_width,
            max_fragment_mass: index.max_fragment_mass,
            precursor_bin_width: index.precursor_bin_width,
            fixed_terminus: Terminus::N,
            specificities: Specificity::ALL.to_vec(),
            dissociation: Dissociation::Hcd,
            min_score: 3.0,
            match_all_charges: false,
            low_mass_threshold: None,
            complementary_ions: false,
            min_index_hits: None,
            disambiguation: DisambiguationPolicy::UniqueIons,
            min_unique_ions: 1,
            q_value_threshold: FdrEngine::DEFAULT_THRESHOLD,
            threads: -1,
            channel_buffer_size: BUFFER_SIZE,
            log_file: None,
        }
    }
}

impl SearchConfig {
    /// Extract a configuration from `figment`, falling back to the defaults for
    /// anything it does not provide
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config = Figment::from(Serialized::defaults(SearchConfig::default()))
            .merge(figment)
            .extract()?;
        Ok(config)
    }

    /// Read `mzsearcher.toml` from the working directory, then `path` if given, then
    /// any `MZSEARCHER_` environment variables, each overriding the last.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Toml::file(CONFIG_FILE_NAME));
        if let Some(path) = path {
            figment = figment.merge(Toml::file_exact(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX));
        Self::from_figment(figment)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    fn adduct_registry(&self) -> Result<AdductRegistry, ConfigError> {
        let mut registry = AdductRegistry::default();
        for adduct in self.adducts.iter() {
            if adduct.name.is_empty() || !adduct.mass_shift.is_finite() {
                return Err(ConfigError::InvalidAdduct(
                    adduct.name.clone(),
                    adduct.mass_shift,
                ));
            }
            registry = registry.with_adduct(Adduct::new(adduct.name.clone(), adduct.mass_shift));
        }
        Ok(registry)
    }

    /// Check every parameter and build the concrete search components
    pub fn validate(&self) -> Result<SearchSettings, ConfigError> {
        let registry = self.adduct_registry()?;
        let precursor_tolerance = self.precursor_tolerance.validate("precursor")?;
        let fragment_tolerance = self.fragment_tolerance.validate("fragment")?;

        let acceptor = AcceptorSpec::from_str(&self.acceptor)
            .and_then(|spec| spec.build(precursor_tolerance, &registry))
            .map_err(SearchError::from)?;

        let scoring = ScoringParams::new(fragment_tolerance, self.min_score)
            .match_all_charges(self.match_all_charges)
            .low_mass_threshold(self.low_mass_threshold)
            .complementary_ions(self.complementary_ions)
            .min_index_hits(self.min_index_hits)
            .validate()
            .map_err(SearchError::from)?;

        let index_params = IndexParams::new(self.bin_width, self.max_fragment_mass)
            .precursor_bin_width(self.precursor_bin_width)
            .validate()
            .map_err(SearchError::from)?;

        if self.strategy == StrategyKind::TerminusAgnostic && self.specificities.is_empty() {
            return Err(SearchError::EmptySpecificities.into());
        }
        if !(0.0..=1.0).contains(&self.q_value_threshold) {
            return Err(ConfigError::InvalidThreshold(self.q_value_threshold));
        }
        if self.channel_buffer_size == 0 {
            return Err(ConfigError::InvalidBufferSize);
        }

        let settings = SearchSettings {
            acceptor,
            scoring,
            index_params,
            dissociation: self.dissociation,
            strategy: self.strategy,
            fixed_terminus: self.fixed_terminus,
            specificities: self.specificities.clone(),
            disambiguator: self.disambiguation.build(self.min_unique_ions),
            fdr: FdrEngine::with_threshold(self.q_value_threshold),
            threads: self.threads,
            channel_buffer_size: self.channel_buffer_size,
        };
        debug!("Validated search settings: {settings:?}");
        Ok(settings)
    }
}

/// Validated, ready to use search components
#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub acceptor: AcceptorKind,
    pub scoring: ScoringParams,
    pub index_params: IndexParams,
    pub dissociation: Dissociation,
    pub strategy: StrategyKind,
    pub fixed_terminus: Terminus,
    pub specificities: Vec<Specificity>,
    pub disambiguator: DisambiguatorKind,
    pub fdr: FdrEngine,
    pub threads: i32,
    pub channel_buffer_size: usize,
}

impl SearchSettings {
    pub fn search_params(&self) -> SearchParams {
        let scorer = FragmentScorer::new(self.scoring)
            .with_complementary_offset(self.dissociation.complementary_offset());
        SearchParams::new(self.acceptor.clone(), scorer)
    }

    /// Build the configured strategy over `candidates`
    pub fn build_engine(&self, candidates: Arc<CandidateSet>) -> Result<SearchEngine, SearchError> {
        let params = self.search_params();
        match self.strategy {
            StrategyKind::Exhaustive => SearchEngine::exhaustive(candidates, params),
            StrategyKind::Indexed => SearchEngine::indexed(candidates, self.index_params, params),
            StrategyKind::TerminusAgnostic => SearchEngine::terminus_agnostic(
                candidates,
                self.index_params,
                params,
                self.fixed_terminus,
                &self.specificities,
            ),
        }
    }
}
