use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use itertools::Itertools;
use mzpeaks::prelude::*;
use rayon::prelude::*;
use tracing::{debug, info, trace, warn};

use mzsearch::{SearchEngine, SearchOutcome, Spectrum};

use crate::progress::ProgressRecord;

/// Search every spectrum on the current rayon pool, sending each outcome tagged with
/// its position in `spectra`. Spectra not yet started when `cancel` is set are
/// skipped and counted.
pub fn search_spectra(
    engine: &SearchEngine,
    spectra: &[Spectrum],
    sender: Sender<(usize, SearchOutcome)>,
    cancel: &AtomicBool,
) -> ProgressRecord {
    let started = Instant::now();

    let prog: ProgressRecord = spectra
        .par_iter()
        .enumerate()
        .map(|(i, spectrum)| {
            let mut prog = ProgressRecord::default();
            if cancel.load(Ordering::Acquire) {
                prog.spectra_skipped += 1;
                return prog;
            }
            let span = tracing::debug_span!(
                "searching spectrum",
                scan_id = spectrum.scan_id,
                query_index = spectrum.query_index
            );
            let _entered = span.enter();

            prog.spectra_searched += 1;
            prog.peaks += spectrum.peaks.len();
            if spectrum.is_empty() {
                prog.spectra_without_peaks += 1;
            }
            let outcome = engine.search_spectrum(spectrum);
            if !outcome.is_empty() {
                prog.spectra_matched += 1;
            }
            if tracing::event_enabled!(tracing::Level::TRACE) {
                let tid = thread::current().id();
                trace!("{tid:?}: Sending spectrum {i}");
            }
            if let Err(e) = sender.send((i, outcome)) {
                warn!("Failed to send search result {i}: {e}");
            }
            prog
        })
        .fold(ProgressRecord::default, ProgressRecord::sum)
        .sum();

    let elapsed = started.elapsed();
    let spectra_per_second = prog.spectra_searched as f64 / elapsed.as_secs_f64().max(1e-9);
    info!(
        "Elapsed Time: {:0.3?} ({:0.2} spectra/sec)",
        elapsed, spectra_per_second
    );
    prog
}

/// Re-establishes the order of results produced out of order by parallel workers
#[derive(Debug)]
pub(crate) struct Collator<T> {
    pub waiting: HashMap<usize, T>,
    pub next_key: usize,
}

impl<T> Default for Collator<T> {
    fn default() -> Self {
        Self {
            waiting: HashMap::new(),
            next_key: 0,
        }
    }
}

impl<T> Collator<T> {
    pub fn receive(&mut self, key: usize, item: T) {
        self.waiting.insert(key, item);
    }

    pub fn try_next(&mut self) -> Option<(usize, T)> {
        let key = self.next_key;
        let item = self.waiting.remove(&key)?;
        self.next_key += 1;
        Some((key, item))
    }

    /// Release everything still waiting in key order, skipping any gaps
    pub fn drain_sorted(&mut self) -> Vec<(usize, T)> {
        let waiting = std::mem::take(&mut self.waiting);
        waiting
            .into_iter()
            .sorted_by_key(|(i, _)| *i)
            .collect()
    }
}

/// Receive results until every sender has hung up, returning them in input order
pub fn collate_results<T: Send>(receiver: Receiver<(usize, T)>) -> Vec<(usize, T)> {
    let mut collator = Collator::default();
    let mut collated = Vec::new();
    for (i, item) in receiver.iter() {
        collator.receive(i, item);
        while let Some(next) = collator.try_next() {
            collated.push(next);
        }
    }
    let n = collator.waiting.len();
    if n > 0 {
        debug!("Draining {n} results after a gap at {}", collator.next_key);
        collated.extend(collator.drain_sorted());
    }
    collated
}
