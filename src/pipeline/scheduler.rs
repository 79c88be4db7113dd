//! Thin hourly adapter around [`Pipeline::run_once`].
//!
//! Runs never overlap: the next tick is only awaited after the current run
//! returns. Missed ticks are skipped rather than replayed, and a failed run is
//! simply retried by the next tick.

use crate::pipeline::orchestrator::{Pipeline, RunReport};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleStats {
    pub runs: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl ScheduleStats {
    fn record(&mut self, ok: bool) {
        self.runs += 1;
        if ok {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Run `pipeline` every `interval` until `shutdown` is cancelled.
///
/// The first run starts immediately. `max_runs` bounds the number of runs;
/// `None` runs until shutdown.
pub async fn run_hourly(
    pipeline: &Pipeline,
    interval: Duration,
    shutdown: &CancellationToken,
    max_runs: Option<usize>,
) -> ScheduleStats {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut stats = ScheduleStats::default();

    info!("Scheduler started: every {:?} for {} areas", interval, pipeline.areas().len());
    loop {
        if max_runs.is_some_and(|max| stats.runs >= max) {
            break;
        }
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let ok = match pipeline.run_once(shutdown).await {
            Ok(report) => log_report(&report),
            Err(e) => {
                error!("Scheduled run failed: {}", e);
                false
            }
        };
        stats.record(ok);
    }
    info!(
        "Scheduler stopped after {} runs ({} ok, {} failed)",
        stats.runs, stats.succeeded, stats.failed
    );
    stats
}

fn log_report(report: &RunReport) -> bool {
    if report.is_success() {
        info!(
            run_id = %report.run_id,
            "Scheduled run wrote {} rows for {} areas",
            report.rows_written(),
            report.areas
        );
        true
    } else {
        for failure in report.failures() {
            warn!(run_id = %report.run_id, "Scheduled run partially failed: {}", failure);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::ExtractorPort;
    use crate::error::{FetchCause, FetchError};
    use crate::infra::sqlite_loader::SqliteLoader;
    use crate::types::{AreaCode, AreaSnapshot, Table, Value};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Fails every other call
    struct FlakyExtractor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ExtractorPort for FlakyExtractor {
        async fn fetch(
            &self,
            area: &AreaCode,
            _cancel: &CancellationToken,
        ) -> Result<AreaSnapshot, FetchError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 1 {
                return Err(FetchError::new(area, FetchCause::Http("reset".into())));
            }
            let t = Table::with_rows(["v"], vec![vec![Value::from(1)]]).unwrap();
            Ok(AreaSnapshot {
                area: area.clone(),
                population: t.clone(),
                traffic_meta: t.clone(),
                traffic_detail: t,
            })
        }
    }

    #[tokio::test]
    async fn test_failed_runs_do_not_stop_the_schedule() {
        let loader = Arc::new(SqliteLoader::open_in_memory().unwrap());
        let pipeline = Pipeline::new(
            vec![AreaCode::new("A1")],
            Arc::new(FlakyExtractor {
                calls: AtomicUsize::new(0),
            }),
            loader.clone(),
        );

        let stats = run_hourly(
            &pipeline,
            Duration::from_millis(10),
            &CancellationToken::new(),
            Some(3),
        )
        .await;

        assert_eq!(
            stats,
            ScheduleStats {
                runs: 3,
                succeeded: 2,
                failed: 1
            }
        );
        assert_eq!(loader.count_rows("pptln").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_stops_before_first_run() {
        let loader = Arc::new(SqliteLoader::open_in_memory().unwrap());
        let pipeline = Pipeline::new(
            vec![AreaCode::new("A1")],
            Arc::new(FlakyExtractor {
                calls: AtomicUsize::new(0),
            }),
            loader,
        );
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let stats = run_hourly(&pipeline, Duration::from_secs(3600), &shutdown, None).await;
        assert_eq!(stats.runs, 0);
    }
}
