use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mzsearch::{
    group_by_partition, disambiguate_all, Candidate, CandidateSet, FdrResults, FdrSummary,
    Partition, SearchError, Spectrum, StrategyKind,
};

use crate::config::{ConfigError, SearchConfig, SearchSettings};
use crate::proc::{collate_results, search_spectra};
use crate::progress::ProgressRecord;

#[derive(Debug, Error)]
pub enum SearchTaskError {
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error("Failed to build the worker thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("The {0} thread panicked")]
    WorkerPanic(&'static str),
    #[error("Failed to install the logging subscriber: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),
}

/// Install a compact STDERR logger filtered by `RUST_LOG` (defaulting to `info`) and,
/// when `log_file` is given, a non-blocking writer to that file as well.
///
/// The returned guard flushes the file writer when dropped, so hold onto it for
/// the life of the program.
pub fn init_logging(log_file: Option<PathBuf>) -> Result<Option<WorkerGuard>, SearchTaskError> {
    let stderr_layer = fmt::layer().compact().with_writer(io::stderr).with_filter(
        EnvFilter::builder()
            .with_default_directive(tracing::Level::INFO.into())
            .from_env_lossy(),
    );
    match log_file {
        Some(path) => {
            let file = fs::File::create(&path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let file_layer = fmt::layer().with_ansi(false).with_writer(writer).with_filter(
                EnvFilter::builder()
                    .with_default_directive(tracing::Level::DEBUG.into())
                    .from_env_lossy(),
            );
            tracing_subscriber::registry()
                .with(stderr_layer)
                .with(file_layer)
                .try_init()?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry().with(stderr_layer).try_init()?;
            Ok(None)
        }
    }
}

/// The outcome of a [`SearchTask`], one FDR-controlled population per partition
#[derive(Debug, Clone)]
pub struct SearchReport {
    pub strategy: StrategyKind,
    pub partitions: BTreeMap<Partition, FdrResults>,
    pub progress: ProgressRecord,
    /// Whether the run stopped early. Results for searched spectra are still valid.
    pub cancelled: bool,
}

#[derive(Debug, Serialize)]
struct ReportSummary<'a> {
    strategy: StrategyKind,
    cancelled: bool,
    progress: &'a ProgressRecord,
    partitions: BTreeMap<String, &'a FdrSummary>,
}

impl SearchReport {
    pub fn get(&self, partition: Partition) -> Option<&FdrResults> {
        self.partitions.get(&partition)
    }

    /// The number of targets passing each partition's own q-value threshold
    pub fn passing(&self) -> usize {
        self.partitions.values().map(|r| r.summary.passing).sum()
    }

    /// Serialize the run counts and every partition's [`FdrSummary`] as JSON
    pub fn summary_json(&self) -> Result<String, serde_json::Error> {
        let summary = ReportSummary {
            strategy: self.strategy,
            cancelled: self.cancelled,
            progress: &self.progress,
            partitions: self
                .partitions
                .iter()
                .map(|(p, r)| (p.to_string(), &r.summary))
                .collect(),
        };
        serde_json::to_string_pretty(&summary)
    }
}

/// Runs a configured search over a batch of spectra on a dedicated thread pool
#[derive(Debug)]
pub struct SearchTask {
    settings: SearchSettings,
    cancel: Arc<AtomicBool>,
}

impl SearchTask {
    pub fn new(settings: SearchSettings) -> Self {
        Self {
            settings,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_config(config: &SearchConfig) -> Result<Self, SearchTaskError> {
        Ok(Self::new(config.validate()?))
    }

    /// Load the configuration from the usual sources, see [`SearchConfig::load`]
    pub fn load(path: Option<&Path>) -> Result<Self, SearchTaskError> {
        Self::from_config(&SearchConfig::load(path)?)
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    /// A flag that stops the run before the next spectrum once set
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    fn create_threadpool(&self) -> Result<rayon::ThreadPool, SearchTaskError> {
        let num_threads = if self.settings.threads > 0 {
            self.settings.threads as usize
        } else {
            thread::available_parallelism()?.into()
        };
        debug!("Using {} cores", num_threads);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()?;
        Ok(pool)
    }

    /// Search `spectra` against `candidates`, then disambiguate and assign q-values
    /// within each result partition
    pub fn run(
        &self,
        candidates: Vec<Candidate>,
        spectra: Vec<Spectrum>,
    ) -> Result<SearchReport, SearchTaskError> {
        let start = Instant::now();
        let candidates = Arc::new(CandidateSet::new(candidates));
        info!(
            "Searching {} spectra against {} candidates with the {} strategy",
            spectra.len(),
            candidates.len(),
            self.settings.strategy
        );
        let engine = self.settings.build_engine(candidates)?;
        let pool = self.create_threadpool()?;

        let (send_solved, recv_solved) =
            crossbeam_channel::bounded(self.settings.channel_buffer_size);
        let collate_task = thread::spawn(move || collate_results(recv_solved));

        let prog = pool.install(|| search_spectra(&engine, &spectra, send_solved, &self.cancel));

        let collated = collate_task
            .join()
            .map_err(|_| SearchTaskError::WorkerPanic("collator"))?;
        let cancelled = prog.spectra_skipped > 0 || self.cancel.load(Ordering::Acquire);
        if cancelled {
            warn!(
                "Search cancelled, {} spectra were not searched",
                prog.spectra_skipped
            );
        }

        let mut groups = group_by_partition(collated.into_iter().map(|(_, outcome)| outcome));
        let mut partitions = BTreeMap::new();
        let mut prog = prog;
        for partition in engine.partitions() {
            let matches = groups.remove(&partition).unwrap_or_default();
            let matches = disambiguate_all(matches, &self.settings.disambiguator);
            prog.ambiguous_matches += matches.iter().filter(|m| m.is_ambiguous()).count();
            let _span = tracing::info_span!("partition", %partition).entered();
            let results = self.settings.fdr.run(matches);
            partitions.insert(partition, results);
        }

        info!(
            "Spectra searched: {} | matched: {} | skipped: {}",
            prog.spectra_searched, prog.spectra_matched, prog.spectra_skipped
        );
        info!("Total Elapsed Time: {:0.3?}", start.elapsed());

        Ok(SearchReport {
            strategy: self.settings.strategy,
            partitions,
            progress: prog,
            cancelled,
        })
    }
}
