use crate::app::ports::{ExtractorPort, LoaderPort};
use crate::error::{FetchCause, KindFailure, PipelineError, Stage};
use crate::observability::metrics;
use crate::pipeline::{collector, merger};
use crate::types::{AreaCode, LoadResult, RecordKind, Table};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Outcome of one kind-pipeline (merge then load)
#[derive(Debug)]
pub struct KindOutcome {
    pub kind: RecordKind,
    pub result: Result<LoadResult, PipelineError>,
}

/// What one `run_once` did
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub areas: usize,
    pub outcomes: Vec<KindOutcome>,
}

impl RunReport {
    pub fn rows_written(&self) -> usize {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .map(|r| r.rows_written)
            .sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &PipelineError> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().err())
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Load results on success, otherwise the first kind-pipeline failure
    pub fn into_result(self) -> Result<Vec<LoadResult>, PipelineError> {
        self.outcomes.into_iter().map(|o| o.result).collect()
    }
}

/// Collect → merge → load for the fixed area list.
///
/// Extractor and loader come in through their ports so the scheduler
/// adapter, the CLI and the tests all drive the same code.
pub struct Pipeline {
    areas: Vec<AreaCode>,
    extractor: Arc<dyn ExtractorPort>,
    loader: Arc<dyn LoaderPort>,
    concurrency: usize,
    run_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        areas: Vec<AreaCode>,
        extractor: Arc<dyn ExtractorPort>,
        loader: Arc<dyn LoaderPort>,
    ) -> Self {
        Self {
            areas,
            extractor,
            loader,
            concurrency: 1,
            run_timeout: Duration::from_secs(15 * 60),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn areas(&self) -> &[AreaCode] {
        &self.areas
    }

    /// Run the whole pipeline once.
    ///
    /// `Err` means nothing was loaded: the collect stage failed, or the run was
    /// cancelled or timed out before collection finished. Once collection is
    /// done every kind-pipeline reports its own outcome in the `RunReport`,
    /// including kinds interrupted by cancellation or the run timeout, so a
    /// kind that already committed is never hidden behind a run-level error.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<RunReport, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline_run", run_id = %run_id);
        let started_at = Utc::now();
        let t0 = std::time::Instant::now();

        // Child token: a timeout cancels this run without touching the caller's token
        let run_cancel = cancel.child_token();
        let work = self.run_stages(cancel, &run_cancel).instrument(span);
        tokio::pin!(work);

        // On timeout the stages are cancelled, not dropped: in-flight loads
        // roll back and every kind still reports what happened to it
        let outcome = match tokio::time::timeout(self.run_timeout, &mut work).await {
            Ok(r) => r,
            Err(_) => {
                warn!(%run_id, "Run exceeded {:?}, cancelling", self.run_timeout);
                run_cancel.cancel();
                work.await
            }
        };

        let finished_at = Utc::now();
        let elapsed = t0.elapsed().as_secs_f64();
        match outcome {
            Ok((areas, outcomes)) => {
                let report = RunReport {
                    run_id,
                    started_at,
                    finished_at,
                    areas,
                    outcomes,
                };
                metrics::pipeline::run_finished(report.is_success(), elapsed);
                if report.is_success() {
                    info!(%run_id, rows = report.rows_written(), "Run finished in {:.1}s", elapsed);
                } else {
                    for failure in report.failures() {
                        error!(%run_id, "{}", failure);
                    }
                }
                Ok(report)
            }
            Err(e) => {
                metrics::pipeline::run_finished(false, elapsed);
                error!(%run_id, "Run failed: {}", e);
                Err(e)
            }
        }
    }

    /// Why `run` was cancelled: the caller's token, or else the run timeout
    fn interruption(&self, caller: &CancellationToken) -> KindFailure {
        if caller.is_cancelled() {
            KindFailure::Cancelled
        } else {
            KindFailure::TimedOut(self.run_timeout)
        }
    }

    async fn run_stages(
        &self,
        caller: &CancellationToken,
        run: &CancellationToken,
    ) -> Result<(usize, Vec<KindOutcome>), PipelineError> {
        let collected =
            collector::collect_all(&self.areas, self.extractor.as_ref(), self.concurrency, run)
                .await;
        let cancelled = match &collected {
            Err(e) => e.cause == FetchCause::Cancelled,
            Ok(_) => run.is_cancelled(),
        };
        if cancelled {
            return Err(match self.interruption(caller) {
                KindFailure::TimedOut(d) => PipelineError::TimedOut(d),
                _ => PipelineError::Cancelled,
            });
        }
        let mut bucket = collected?;
        let areas = bucket.area_count();

        let population = bucket.take(RecordKind::Population);
        let traffic_meta = bucket.take(RecordKind::TrafficMeta);
        let traffic_detail = bucket.take(RecordKind::TrafficDetail);

        // The three kinds share nothing after collection
        let (p, m, d) = tokio::join!(
            self.merge_and_load(RecordKind::Population, population, caller, run),
            self.merge_and_load(RecordKind::TrafficMeta, traffic_meta, caller, run),
            self.merge_and_load(RecordKind::TrafficDetail, traffic_detail, caller, run),
        );
        Ok((areas, vec![p, m, d]))
    }

    async fn merge_and_load(
        &self,
        kind: RecordKind,
        tables: Vec<Table>,
        caller: &CancellationToken,
        run: &CancellationToken,
    ) -> KindOutcome {
        let result = self
            .merge_then_load(kind, tables, caller, run)
            .instrument(info_span!("kind_pipeline", kind = %kind))
            .await;
        if let Err(e) = &result {
            warn!("{} pipeline did not load: {}", kind, e);
        }
        KindOutcome { kind, result }
    }

    async fn merge_then_load(
        &self,
        kind: RecordKind,
        tables: Vec<Table>,
        caller: &CancellationToken,
        run: &CancellationToken,
    ) -> Result<LoadResult, PipelineError> {
        let merged = merger::merge(kind, tables).map_err(|e| PipelineError::Kind {
            kind,
            stage: Stage::Merged,
            source: KindFailure::Merge(e),
        })?;
        info!("Merged {} rows for {}", merged.len(), kind);

        let interrupted = |source| PipelineError::Kind {
            kind,
            stage: Stage::Loaded,
            source,
        };
        if run.is_cancelled() {
            return Err(interrupted(self.interruption(caller)));
        }
        match self.loader.load(kind, merged, kind.table_name(), run).await {
            Ok(loaded) => Ok(loaded),
            Err(e) if e.is_cancelled() => Err(interrupted(self.interruption(caller))),
            Err(e) => Err(interrupted(KindFailure::Load(e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FetchError, LoadError};
    use crate::infra::sqlite_loader::SqliteLoader;
    use crate::types::{AreaSnapshot, Value};
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Canned snapshots keyed by area code; unknown areas fail
    struct FakeExtractor {
        snapshots: HashMap<String, AreaSnapshot>,
        delay: Duration,
    }

    #[async_trait]
    impl ExtractorPort for FakeExtractor {
        async fn fetch(
            &self,
            area: &AreaCode,
            cancel: &CancellationToken,
        ) -> Result<AreaSnapshot, FetchError> {
            tokio::select! {
                _ = cancel.cancelled() => return Err(FetchError::new(area, FetchCause::Cancelled)),
                _ = tokio::time::sleep(self.delay) => {}
            }
            self.snapshots
                .get(area.as_str())
                .cloned()
                .ok_or_else(|| FetchError::new(area, FetchCause::Status(500)))
        }
    }

    fn snapshot(area: &str, pop: i64) -> AreaSnapshot {
        let one = |col: &str, v: Value| Table::with_rows([col], vec![vec![v]]).unwrap();
        AreaSnapshot {
            area: AreaCode::new(area),
            population: one("pop", Value::from(pop)),
            traffic_meta: one("road_msg", Value::from(format!("{} avg", area))),
            traffic_detail: Table::with_rows(
                ["link_id", "spd"],
                vec![
                    vec![Value::from(format!("{}-1", area)), Value::from(10)],
                    vec![Value::from(format!("{}-2", area)), Value::from(20)],
                ],
            )
            .unwrap(),
        }
    }

    /// SQLite underneath, but the `held` kind waits for the run to be
    /// cancelled before it starts its append
    struct HoldingLoader {
        inner: Arc<SqliteLoader>,
        held: RecordKind,
        started: tokio::sync::Notify,
    }

    #[async_trait]
    impl LoaderPort for HoldingLoader {
        async fn load(
            &self,
            kind: RecordKind,
            table: Table,
            target: &str,
            cancel: &CancellationToken,
        ) -> Result<LoadResult, LoadError> {
            if kind == self.held {
                self.started.notify_one();
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(Duration::from_secs(30)) => {}
                }
            }
            self.inner.load(kind, table, target, cancel).await
        }
    }

    fn holding_fixture(held: RecordKind) -> (Pipeline, Arc<HoldingLoader>) {
        let extractor = FakeExtractor {
            snapshots: [("A1", 10), ("A2", 20)]
                .iter()
                .map(|(a, p)| (a.to_string(), snapshot(a, *p)))
                .collect(),
            delay: Duration::from_millis(1),
        };
        let loader = Arc::new(HoldingLoader {
            inner: Arc::new(SqliteLoader::open_in_memory().unwrap()),
            held,
            started: tokio::sync::Notify::new(),
        });
        let pipeline = Pipeline::new(
            vec![AreaCode::new("A1"), AreaCode::new("A2")],
            Arc::new(extractor),
            loader.clone(),
        );
        (pipeline, loader)
    }

    /// Every kind either committed all its rows or appended none
    fn assert_no_partial_append(report: &RunReport, loader: &SqliteLoader) {
        for outcome in &report.outcomes {
            let stored = loader.count_rows(outcome.kind.table_name()).unwrap();
            match &outcome.result {
                Ok(loaded) => assert_eq!(stored, loaded.rows_written),
                Err(_) => assert_eq!(stored, 0, "{} was partially appended", outcome.kind),
            }
        }
    }

    fn fixture(areas: &[&str], known: &[(&str, i64)]) -> (Pipeline, Arc<SqliteLoader>) {
        let extractor = FakeExtractor {
            snapshots: known
                .iter()
                .map(|(a, p)| (a.to_string(), snapshot(a, *p)))
                .collect(),
            delay: Duration::from_millis(1),
        };
        let loader = Arc::new(SqliteLoader::open_in_memory().unwrap());
        let pipeline = Pipeline::new(
            areas.iter().map(|a| AreaCode::new(*a)).collect(),
            Arc::new(extractor),
            loader.clone(),
        )
        .with_concurrency(2);
        (pipeline, loader)
    }

    #[tokio::test]
    async fn test_two_areas_end_to_end() {
        let (pipeline, loader) = fixture(&["A1", "A2"], &[("A1", 10), ("A2", 20)]);

        let report = pipeline.run_once(&CancellationToken::new()).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.areas, 2);
        assert_eq!(report.rows_written(), 2 + 2 + 4);
        let pops = loader.read_rows("pptln", &["pop".to_string()]).unwrap();
        assert_eq!(pops, vec![vec![Value::from(10)], vec![Value::from(20)]]);
        let links = loader.read_rows("traffic_detail", &["link_id".to_string()]).unwrap();
        assert_eq!(
            links,
            ["A1-1", "A1-2", "A2-1", "A2-2"]
                .map(|s| vec![Value::from(s)])
                .to_vec()
        );
    }

    #[tokio::test]
    async fn test_fetch_failure_loads_nothing() {
        let (pipeline, loader) = fixture(&["A1", "A2"], &[("A1", 10)]);

        let err = pipeline.run_once(&CancellationToken::new()).await.unwrap_err();

        match err {
            PipelineError::Collect(e) => assert_eq!(e.area, AreaCode::new("A2")),
            other => panic!("unexpected error: {other}"),
        }
        for kind in RecordKind::ALL {
            assert_eq!(loader.count_rows(kind.table_name()).unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn test_second_run_doubles_rows() {
        let (pipeline, loader) = fixture(&["A1", "A2"], &[("A1", 10), ("A2", 20)]);
        let cancel = CancellationToken::new();

        pipeline.run_once(&cancel).await.unwrap().into_result().unwrap();
        pipeline.run_once(&cancel).await.unwrap().into_result().unwrap();

        assert_eq!(loader.count_rows("pptln").unwrap(), 4);
        assert_eq!(loader.count_rows("traffic_meta").unwrap(), 4);
        assert_eq!(loader.count_rows("traffic_detail").unwrap(), 8);
    }

    #[tokio::test]
    async fn test_schema_mismatch_fails_only_that_kind() {
        let (mut pipeline, loader) = fixture(&["A1", "A2"], &[("A1", 10), ("A2", 20)]);
        let mut extractor = FakeExtractor {
            snapshots: HashMap::new(),
            delay: Duration::from_millis(1),
        };
        extractor.snapshots.insert("A1".into(), snapshot("A1", 10));
        let mut drifted = snapshot("A2", 20);
        drifted.traffic_meta = Table::with_rows(["other"], vec![vec![Value::Null]]).unwrap();
        extractor.snapshots.insert("A2".into(), drifted);
        pipeline.extractor = Arc::new(extractor);

        let report = pipeline.run_once(&CancellationToken::new()).await.unwrap();

        assert!(!report.is_success());
        let failed: Vec<_> = report.failures().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].kind(), Some(RecordKind::TrafficMeta));
        assert_eq!(failed[0].stage(), Some(Stage::Merged));
        assert_eq!(loader.count_rows("traffic_meta").unwrap(), 0);
        assert_eq!(loader.count_rows("pptln").unwrap(), 2);
        assert!(report.into_result().is_err());
    }

    #[tokio::test]
    async fn test_timeout_cancels_run() {
        let (mut pipeline, loader) = fixture(&["A1"], &[("A1", 10)]);
        pipeline.extractor = Arc::new(FakeExtractor {
            snapshots: HashMap::new(),
            delay: Duration::from_secs(60),
        });
        let pipeline = pipeline.with_run_timeout(Duration::from_millis(20));

        let err = pipeline.run_once(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, PipelineError::TimedOut(_)));
        assert_eq!(loader.count_rows("pptln").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_timeout_during_loads_reports_each_kind() {
        let (pipeline, loader) = holding_fixture(RecordKind::TrafficDetail);
        let pipeline = pipeline.with_run_timeout(Duration::from_millis(300));

        let report = pipeline.run_once(&CancellationToken::new()).await.unwrap();

        let by_kind: HashMap<_, _> = report.outcomes.iter().map(|o| (o.kind, &o.result)).collect();
        assert_eq!(by_kind[&RecordKind::Population].as_ref().unwrap().rows_written, 2);
        assert_eq!(by_kind[&RecordKind::TrafficMeta].as_ref().unwrap().rows_written, 2);
        assert!(matches!(
            by_kind[&RecordKind::TrafficDetail],
            Err(PipelineError::Kind {
                kind: RecordKind::TrafficDetail,
                stage: Stage::Loaded,
                source: KindFailure::TimedOut(_),
            })
        ));
        assert!(!report.is_success());
        assert_eq!(loader.inner.count_rows("pptln").unwrap(), 2);
        assert_eq!(loader.inner.count_rows("traffic_detail").unwrap(), 0);
        assert_no_partial_append(&report, &loader.inner);
    }

    #[tokio::test]
    async fn test_caller_cancellation_during_loads_appends_nothing_partial() {
        let (pipeline, loader) = holding_fixture(RecordKind::Population);
        let cancel = CancellationToken::new();

        let (report, ()) = tokio::join!(pipeline.run_once(&cancel), async {
            loader.started.notified().await;
            cancel.cancel();
        });
        let report = report.unwrap();

        let population = report
            .outcomes
            .iter()
            .find(|o| o.kind == RecordKind::Population)
            .unwrap();
        assert!(matches!(
            population.result,
            Err(PipelineError::Kind {
                source: KindFailure::Cancelled,
                ..
            })
        ));
        assert_eq!(loader.inner.count_rows("pptln").unwrap(), 0);
        assert_no_partial_append(&report, &loader.inner);
    }

    #[tokio::test]
    async fn test_caller_cancellation_aborts_collection() {
        let (pipeline, loader) = fixture(&["A1", "A2"], &[("A1", 10), ("A2", 20)]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = pipeline.run_once(&cancel).await.unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled));
        assert_eq!(loader.count_rows("pptln").unwrap(), 0);
    }
}
