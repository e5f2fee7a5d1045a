//! Convergence applier - walks a plan and converges each resource
//!
//! Per resource: `Pending -> Checking -> {NoOpNeeded | Applying -> Applied | Failed}`,
//! or `Blocked` when a dependency failed, or `Skipped` once the run is
//! cancelled. A resource is only dispatched once every predecessor is
//! `NoOpNeeded` or `Applied`.
//!
//! With `jobs > 1`, independent resources are converged in waves on a rayon
//! pool. Each wave holds resources whose predecessors are all resolved; the
//! coordinating thread records outcomes and blocks dependents of failures
//! before the next wave is computed.

use crate::catalog::{Catalog, CatalogNode};
use crate::context::{ProgressCallback, Providers};
use crate::diff::{Change, CheckOutcome};
use crate::error::{ApplyError, BlockedError, CheckError, ResourceError};
use crate::report::{Outcome, ResourceReport, RunReport};
use crate::resolver::Plan;
use crate::resource::CommandExit;
use crate::types::ResourceId;
use chrono::Utc;
use rayon::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const CANCELLED: &str = "cancelled";

/// Shared flag to stop a run from another thread
///
/// In-flight actions finish; nothing new starts applying.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Options for a convergence run
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Check only; report what would change
    pub noop: bool,
    /// Maximum resources converged at once
    pub jobs: usize,
    /// Deadline for the whole run
    pub timeout: Option<Duration>,
    pub cancel: CancelToken,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            noop: false,
            jobs: 1,
            timeout: None,
            cancel: CancelToken::new(),
        }
    }
}

/// Lifecycle of one resource within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pending,
    Checking,
    NoOpNeeded,
    Applying,
    Applied,
    Failed,
    Blocked,
    Skipped,
}

impl Phase {
    /// Whether dependents may start
    pub fn is_resolved(self) -> bool {
        matches!(self, Self::NoOpNeeded | Self::Applied)
    }
}

impl From<&Outcome> for Phase {
    fn from(outcome: &Outcome) -> Self {
        match outcome {
            Outcome::Unchanged | Outcome::WouldChange { .. } => Self::NoOpNeeded,
            Outcome::Changed { .. } => Self::Applied,
            Outcome::Failed { .. } => Self::Failed,
            Outcome::Blocked { .. } => Self::Blocked,
            Outcome::Skipped { .. } => Self::Skipped,
        }
    }
}

/// Whether new actions may still start
struct Gate<'a> {
    cancel: &'a CancelToken,
    deadline: Option<Instant>,
}

impl Gate<'_> {
    fn stopped(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// Coordinator state for one run
struct Run<'a, P: ProgressCallback> {
    catalog: &'a Catalog,
    plan: &'a Plan,
    phases: Vec<Phase>,
    outcomes: Vec<Option<(Outcome, u64)>>,
    refresh: Vec<bool>,
    progress: &'a mut P,
}

impl<'a, P: ProgressCallback> Run<'a, P> {
    fn record(&mut self, index: usize, outcome: Outcome, duration_ms: u64) {
        let catalog = self.catalog;
        let node = catalog.node(index);
        self.phases[index] = Phase::from(&outcome);
        self.progress.on_resource_complete(&node.id, &outcome);

        if outcome.is_change() {
            for edge in catalog.edges_from(index) {
                if edge.kind.refreshes() {
                    log::debug!("{} schedules refresh of {}", node.id, catalog.node(edge.to).id);
                    self.refresh[edge.to] = true;
                }
            }
        }

        let failed = matches!(outcome, Outcome::Failed { .. });
        self.outcomes[index] = Some((outcome, duration_ms));

        if failed {
            for dependent in self.plan.dependents(index) {
                if self.phases[dependent] == Phase::Pending {
                    let error = BlockedError {
                        resource: catalog.node(dependent).id.clone(),
                        failed_dependency: node.id.clone(),
                    };
                    self.record(dependent, Outcome::Blocked { error }, 0);
                }
            }
        }
    }

    fn skip_pending(&mut self) {
        let plan = self.plan;
        for &index in &plan.order {
            if self.phases[index] == Phase::Pending {
                self.record(
                    index,
                    Outcome::Skipped {
                        reason: CANCELLED.to_string(),
                    },
                    0,
                );
            }
        }
    }

    fn ready(&self) -> Vec<usize> {
        self.plan
            .order
            .iter()
            .copied()
            .filter(|&index| {
                self.phases[index] == Phase::Pending
                    && self.plan.predecessors[index]
                        .iter()
                        .all(|&pred| self.phases[pred].is_resolved())
            })
            .collect()
    }
}

/// Converge a catalog in plan order
///
/// Never aborts early: check and apply failures are recorded in the report
/// and only block the failed resource's dependents.
pub fn apply<P: ProgressCallback>(
    catalog: &Catalog,
    plan: &Plan,
    host: &Providers<'_>,
    opts: &ApplyOptions,
    progress: &mut P,
) -> RunReport {
    let started_at = Utc::now();
    let started = Instant::now();
    let gate = Gate {
        cancel: &opts.cancel,
        deadline: opts.timeout.map(|timeout| started + timeout),
    };

    progress.on_run_start(plan.len(), opts.noop);
    let count = catalog.len();
    let mut run = Run {
        catalog,
        plan,
        phases: vec![Phase::Pending; count],
        outcomes: vec![None; count],
        refresh: vec![false; count],
        progress,
    };

    let pool = if opts.jobs > 1 {
        match rayon::ThreadPoolBuilder::new().num_threads(opts.jobs).build() {
            Ok(pool) => Some(pool),
            Err(e) => {
                log::warn!("Failed to create thread pool, converging sequentially: {e}");
                None
            }
        }
    } else {
        None
    };

    match pool {
        Some(pool) => apply_waves(&mut run, &pool, host, opts.noop, &gate),
        None => apply_sequential(&mut run, host, opts.noop, &gate),
    }

    let mut report = RunReport::new(started_at, opts.noop);
    for &index in &plan.order {
        let node = catalog.node(index);
        let (outcome, duration_ms) = run.outcomes[index].take().unwrap_or_else(|| {
            (
                Outcome::Skipped {
                    reason: CANCELLED.to_string(),
                },
                0,
            )
        });
        report.push(ResourceReport {
            id: node.id.clone(),
            class: node.class.clone(),
            outcome,
            duration_ms,
        });
    }
    report.duration_ms = millis(started.elapsed());

    run.progress.on_run_complete(&report);
    report
}

fn apply_sequential<P: ProgressCallback>(
    run: &mut Run<'_, P>,
    host: &Providers<'_>,
    noop: bool,
    gate: &Gate<'_>,
) {
    let plan = run.plan;
    let catalog = run.catalog;
    for &index in &plan.order {
        if run.phases[index] != Phase::Pending {
            continue;
        }
        if gate.stopped() {
            log::warn!("Run stopped; skipping remaining resources");
            run.skip_pending();
            return;
        }

        run.phases[index] = Phase::Checking;
        let node = catalog.node(index);
        let (outcome, duration_ms) = converge_timed(node, host, noop, run.refresh[index], gate);
        run.record(index, outcome, duration_ms);
    }
}

fn apply_waves<P: ProgressCallback>(
    run: &mut Run<'_, P>,
    pool: &rayon::ThreadPool,
    host: &Providers<'_>,
    noop: bool,
    gate: &Gate<'_>,
) {
    loop {
        if gate.stopped() {
            log::warn!("Run stopped; skipping remaining resources");
            run.skip_pending();
            return;
        }

        let wave = run.ready();
        if wave.is_empty() {
            return;
        }
        run.progress.on_wave_start(wave.len());
        for &index in &wave {
            run.phases[index] = Phase::Checking;
        }

        let catalog = run.catalog;
        let refresh = &run.refresh;
        let results: Vec<(usize, Outcome, u64)> = pool.install(|| {
            wave.par_iter()
                .map(|&index| {
                    let (outcome, duration_ms) =
                        converge_timed(catalog.node(index), host, noop, refresh[index], gate);
                    (index, outcome, duration_ms)
                })
                .collect()
        });

        for (index, outcome, duration_ms) in results {
            run.record(index, outcome, duration_ms);
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn converge_timed(
    node: &CatalogNode,
    host: &Providers<'_>,
    noop: bool,
    refresh: bool,
    gate: &Gate<'_>,
) -> (Outcome, u64) {
    let started = Instant::now();
    let outcome = converge(node, host, noop, refresh, gate);
    (outcome, millis(started.elapsed()))
}

fn failed(error: impl Into<ResourceError>) -> Outcome {
    Outcome::Failed {
        error: error.into(),
    }
}

fn apply_error(id: &ResourceId, err: &anyhow::Error) -> ApplyError {
    match err.downcast_ref::<CommandExit>() {
        Some(exit) => ApplyError::CommandFailed {
            resource: id.clone(),
            status: exit.status,
            stderr: exit.stderr.clone(),
        },
        None => ApplyError::ActionFailed {
            resource: id.clone(),
            cause: format!("{err:#}"),
        },
    }
}

/// Check, and if needed apply, one resource
fn converge(
    node: &CatalogNode,
    host: &Providers<'_>,
    noop: bool,
    refresh: bool,
    gate: &Gate<'_>,
) -> Outcome {
    let id = &node.id;
    let resource = node.spec.as_resource();

    let checked = match resource.check(host) {
        Ok(checked) => checked,
        Err(err) => {
            return failed(CheckError {
                resource: id.clone(),
                cause: format!("{err:#}"),
            });
        }
    };

    let changes = match checked {
        CheckOutcome::InSync if refresh => return refresh_resource(node, host, noop, gate),
        CheckOutcome::InSync => return Outcome::Unchanged,
        CheckOutcome::Drifted(changes) if noop => return Outcome::WouldChange { changes },
        CheckOutcome::Drifted(changes) => changes,
    };

    if gate.stopped() {
        return Outcome::Skipped {
            reason: CANCELLED.to_string(),
        };
    }

    log::debug!("{id}: {:?}", Phase::Applying);
    log::info!(
        "{id}: {}",
        changes.iter().map(Change::summary).collect::<Vec<_>>().join(", ")
    );
    if let Err(err) = resource.apply(host, &changes) {
        return failed(apply_error(id, &err));
    }

    if resource.verify_after_apply() {
        match resource.check(host) {
            Ok(CheckOutcome::InSync) => {}
            Ok(CheckOutcome::Drifted(remaining)) => {
                return failed(ApplyError::VerificationFailed {
                    resource: id.clone(),
                    remaining: remaining.iter().map(Change::summary).collect(),
                });
            }
            Err(err) => {
                return failed(ApplyError::ActionFailed {
                    resource: id.clone(),
                    cause: format!("could not verify after apply: {err:#}"),
                });
            }
        }
    }

    Outcome::Changed {
        changes,
        refreshed: false,
    }
}

/// Deliver a pending refresh to an in-sync resource
fn refresh_resource(
    node: &CatalogNode,
    host: &Providers<'_>,
    noop: bool,
    gate: &Gate<'_>,
) -> Outcome {
    if noop {
        return Outcome::WouldChange {
            changes: vec![Change::new("refresh", "pending", "triggered")],
        };
    }
    if gate.stopped() {
        return Outcome::Skipped {
            reason: CANCELLED.to_string(),
        };
    }

    match node.spec.as_resource().refresh(host) {
        Ok(true) => {
            log::info!("{}: refreshed", node.id);
            Outcome::Changed {
                changes: Vec::new(),
                refreshed: true,
            }
        }
        Ok(false) => Outcome::Unchanged,
        Err(err) => failed(apply_error(&node.id, &err)),
    }
}
