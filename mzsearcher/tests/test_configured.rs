use figment::{
    providers::{Format, Toml},
    Figment,
};

use mzsearch::{
    candidate::{CleavageAnnotations, TerminalMods},
    Candidate, Dissociation, Partition, Resolution, Specificity, Spectrum,
};
use mzsearcher::{ConfigError, SearchConfig, SearchTask, SearchTaskError};

fn residue_mass(residue: char) -> f64 {
    match residue {
        'G' => 57.02146,
        'A' => 71.03711,
        'S' => 87.03203,
        'P' => 97.05276,
        'V' => 99.06841,
        'T' => 101.04768,
        'L' | 'I' => 113.08406,
        'N' => 114.04293,
        'D' => 115.02694,
        'Q' => 128.05858,
        'K' => 128.09496,
        'E' => 129.04259,
        'M' => 131.04049,
        'H' => 137.05891,
        'F' => 147.06841,
        'R' => 156.10111,
        'Y' => 163.06333,
        'W' => 186.07931,
        _ => panic!("Unknown residue {residue}"),
    }
}

fn candidate(sequence: &str, is_decoy: bool) -> Candidate {
    Candidate::from_residues(
        sequence,
        sequence.chars().map(residue_mass).collect(),
        TerminalMods::default(),
        Dissociation::Hcd,
        is_decoy,
    )
}

fn spectrum_for(candidate: &Candidate, index: usize, n_fragments: usize) -> Spectrum {
    let peaks = Spectrum::peaks_from_pairs(
        candidate
            .fragments
            .iter()
            .take(n_fragments)
            .map(|f| (f.mass * (1.0 + 3e-6), 100.0)),
    );
    Spectrum::new(index as u64 + 1000, index, candidate.monoisotopic_mass, vec![2], peaks)
}

/// Random target sequences with reversed decoys. Most spectra come from targets with
/// every fragment present, a few come from decoys with only three.
fn library(seed: u64, n_targets: usize) -> (Vec<Candidate>, Vec<Spectrum>) {
    const ALPHABET: &[u8] = b"GASPVTLNDQKEMHFRYW";
    let mut state = seed;
    let mut next = move || {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (state >> 33) as usize
    };
    let mut candidates = Vec::new();
    let mut spectra = Vec::new();
    for i in 0..n_targets {
        let length = 8 + next() % 6;
        let seq: String = (0..length)
            .map(|_| ALPHABET[next() % ALPHABET.len()] as char)
            .collect();
        let rev: String = seq.chars().rev().collect();
        let target = candidate(&seq, false);
        let decoy = candidate(&rev, true);
        if i % 10 == 9 {
            spectra.push(spectrum_for(&decoy, spectra.len(), 3));
        } else {
            spectra.push(spectrum_for(&target, spectra.len(), usize::MAX));
        }
        candidates.push(target);
        candidates.push(decoy);
    }
    (candidates, spectra)
}

fn load(path: &str) -> SearchConfig {
    SearchConfig::from_figment(Figment::new().merge(Toml::file_exact(path))).unwrap()
}

#[test_log::test]
#[test_log(default_log_filter = "debug")]
fn test_indexed_search() {
    let config = load("tests/data/indexed.toml");
    let task = SearchTask::from_config(&config).unwrap();
    let (candidates, spectra) = library(17, 40);
    let n_spectra = spectra.len();
    let report = task.run(candidates, spectra).unwrap();

    assert!(!report.cancelled);
    assert_eq!(report.progress.spectra_searched, n_spectra);
    assert_eq!(report.partitions.len(), 1);
    let results = report.get(Partition::All).unwrap();
    assert_eq!(results.len(), report.progress.spectra_matched);
    assert!(results.summary.decoys > 0);
    assert!(!results.summary.uncontrolled);
    assert!(report.passing() > 0);
    assert!(results
        .iter()
        .all(|m| m.spectral_match.resolution() != Resolution::Unresolved));

    let qs: Vec<f64> = results.iter().map(|m| m.q_value()).collect();
    assert!(qs.windows(2).all(|w| w[0] <= w[1]));

    let json = report.summary_json().unwrap();
    assert!(json.contains("\"all\""));
    assert!(json.contains("\"indexed\""));
}

#[test_log::test]
fn test_terminus_agnostic_search() {
    const PROTEIN: &str = "PEPTIDEKGLSAMVNR";
    let config = load("tests/data/semi_specific.toml");
    let task = SearchTask::from_config(&config).unwrap();

    let sites = vec![8];
    let protein = candidate(PROTEIN, false).with_cleavage(CleavageAnnotations::new(true, true, sites));
    let decoy_seq: String = PROTEIN.chars().rev().collect();
    let decoy = candidate(&decoy_seq, true);

    let spectra = vec![
        spectrum_for(&protein.truncate(0, 8).unwrap(), 0, usize::MAX),
        spectrum_for(&protein.truncate(0, 5).unwrap(), 1, usize::MAX),
        spectrum_for(&protein.truncate(0, 11).unwrap(), 2, usize::MAX),
    ];
    let report = task.run(vec![protein, decoy], spectra).unwrap();

    assert_eq!(report.partitions.len(), 2);
    let fully = report
        .get(Partition::Specificity(Specificity::FullySpecific))
        .unwrap();
    let semi = report
        .get(Partition::Specificity(Specificity::SemiSpecific))
        .unwrap();
    assert_eq!(fully.len(), 1);
    assert_eq!(semi.len(), 2);
    assert_eq!(
        fully.matches[0].spectral_match.best().unwrap().candidate.sequence,
        "PEPTIDEK"
    );
    assert!(report.get(Partition::All).is_none());
    assert!(fully.summary.uncontrolled);
}

#[test]
fn test_cancelled_run_reports_partial_results() {
    let config = load("tests/data/indexed.toml");
    let task = SearchTask::from_config(&config).unwrap();
    let handle = task.cancel_handle();
    handle.store(true, std::sync::atomic::Ordering::Release);

    let (candidates, spectra) = library(3, 10);
    let report = task.run(candidates, spectra).unwrap();
    assert!(report.cancelled);
    assert_eq!(report.progress.spectra_skipped, 10);
    assert_eq!(report.progress.spectra_searched, 0);
    assert!(report.get(Partition::All).unwrap().is_empty());
}

#[test]
fn test_invalid_configuration_fails_before_search() {
    let config = load("tests/data/bad_acceptor.toml");
    let err = SearchTask::from_config(&config).unwrap_err();
    assert!(matches!(err, SearchTaskError::Config(ConfigError::Search(_))));

    let mut config = load("tests/data/semi_specific.toml");
    config.specificities.clear();
    assert!(SearchTask::from_config(&config).is_err());
}

#[test]
fn test_load_with_environment() {
    std::env::set_var("MZSEARCHER_MIN_SCORE", "4.5");
    let config = SearchConfig::load(Some(std::path::Path::new("tests/data/indexed.toml"))).unwrap();
    std::env::remove_var("MZSEARCHER_MIN_SCORE");
    assert_eq!(config.min_score, 4.5);
    assert_eq!(config.channel_buffer_size, 8);
}
