//! # Fan-out / Fan-in Task Group
//!
//! Spawns one fresh thread per job, lets every worker push exactly one report
//! into a bounded channel and blocks on that channel until all workers have
//! reported or the deadline passes.
//!
//! Threads cannot be killed, so a straggler is abandoned instead: its handle
//! is dropped, and whatever it sends after the deadline lands on a
//! disconnected channel and is discarded.

use crossbeam_channel::{RecvTimeoutError, bounded};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::warn;

/// What came back from one round of workers.
#[derive(Debug)]
pub struct GroupOutcome<R, E> {
    /// Successful results, in arrival order.
    pub results: Vec<R>,
    /// Failures reported by workers, in arrival order.
    pub failures: Vec<E>,
    /// Job indices whose workers did not report before the deadline.
    pub timed_out: Vec<usize>,
}

impl<R, E> GroupOutcome<R, E> {
    fn empty() -> Self {
        Self {
            results: Vec::new(),
            failures: Vec::new(),
            timed_out: Vec::new(),
        }
    }
}

/// Runs `work` on every job in parallel and gathers the reports.
///
/// `work` only gets shared, read-only access to its inputs; anything it needs
/// must be captured by value (typically behind an `Arc`).
pub fn run_group<J, R, E, F>(label: &str, jobs: Vec<J>, timeout: Duration, work: F) -> GroupOutcome<R, E>
where
    J: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
    F: Fn(J) -> Result<R, E> + Send + Sync + 'static,
{
    let mut outcome = GroupOutcome::empty();
    let total = jobs.len();
    if total == 0 {
        return outcome;
    }

    let (tx, rx) = bounded::<(usize, Result<R, E>)>(total);
    let work = Arc::new(work);
    let mut reported = vec![false; total];

    for (index, job) in jobs.into_iter().enumerate() {
        let tx = tx.clone();
        let work = Arc::clone(&work);
        let spawned = thread::Builder::new()
            .name(format!("{label}-{index}"))
            .spawn(move || {
                let report = work(job);
                // The receiver is gone once the orchestrator gave up on us.
                let _ = tx.send((index, report));
            });
        if let Err(e) = spawned {
            warn!("[{label}] could not spawn worker {index}: {e}");
            reported[index] = true;
        }
    }
    drop(tx);

    let deadline = Instant::now() + timeout;
    let mut pending = reported.iter().filter(|r| !**r).count();
    while pending > 0 {
        match rx.recv_deadline(deadline) {
            Ok((index, report)) => {
                reported[index] = true;
                pending -= 1;
                match report {
                    Ok(result) => outcome.results.push(result),
                    Err(failure) => outcome.failures.push(failure),
                }
            }
            Err(RecvTimeoutError::Timeout) => break,
            // Every sender is gone: remaining workers died without reporting.
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    outcome.timed_out = reported
        .iter()
        .enumerate()
        .filter_map(|(i, r)| (!r).then_some(i))
        .collect();
    for index in &outcome.timed_out {
        warn!("[{label}] worker {index} did not report in time, abandoning it");
    }
    outcome
}
