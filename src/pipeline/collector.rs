use crate::app::ports::ExtractorPort;
use crate::error::FetchError;
use crate::observability::metrics;
use crate::types::{AreaCode, Bucket};
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Fetch every area and group the per-area tables by kind.
///
/// Up to `concurrency` areas are in flight at once. `buffered` yields results
/// in input order, so the bucket always follows `areas` no matter which
/// request finishes first. The first failure aborts the whole collection and
/// no partial bucket is returned.
pub async fn collect_all(
    areas: &[AreaCode],
    extractor: &dyn ExtractorPort,
    concurrency: usize,
    cancel: &CancellationToken,
) -> Result<Bucket, FetchError> {
    info!("Collecting {} areas (concurrency {})", areas.len(), concurrency);

    let snapshots = stream::iter(areas)
        .map(|area| async move {
            let snapshot = extractor.fetch(area, cancel).await?;
            metrics::collector::area_fetched();
            Ok::<_, FetchError>(snapshot)
        })
        .buffered(concurrency.max(1))
        .try_collect::<Vec<_>>()
        .await;

    let snapshots = match snapshots {
        Ok(s) => s,
        Err(e) => {
            metrics::collector::run_failed();
            error!("Collection aborted: {}", e);
            return Err(e);
        }
    };

    let mut bucket = Bucket::new();
    for snapshot in snapshots {
        bucket.push(snapshot);
    }
    info!("Collected {} areas", bucket.area_count());
    Ok(bucket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchCause;
    use crate::types::{AreaSnapshot, RecordKind, Table, Value};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Returns one population row per area, later areas answering faster
    struct StaggeredExtractor {
        fail_on: Option<&'static str>,
        calls: AtomicUsize,
        total: u64,
    }

    fn single(column: &str, v: Value) -> Table {
        Table::with_rows([column], vec![vec![v]]).unwrap()
    }

    #[async_trait]
    impl ExtractorPort for StaggeredExtractor {
        async fn fetch(
            &self,
            area: &AreaCode,
            _cancel: &CancellationToken,
        ) -> Result<AreaSnapshot, FetchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as u64;
            tokio::time::sleep(Duration::from_millis(5 * (self.total - n.min(self.total)))).await;
            if self.fail_on == Some(area.as_str()) {
                return Err(FetchError::new(area, FetchCause::Status(500)));
            }
            Ok(AreaSnapshot {
                area: area.clone(),
                population: single("area", Value::from(area.as_str())),
                traffic_meta: single("area", Value::from(area.as_str())),
                traffic_detail: Table::new(["area"]).unwrap(),
            })
        }
    }

    fn areas(codes: &[&str]) -> Vec<AreaCode> {
        codes.iter().map(|c| AreaCode::new(*c)).collect()
    }

    #[tokio::test]
    async fn test_bucket_has_one_table_per_area_in_order() {
        let codes = areas(&["A1", "A2", "A3", "A4", "A5"]);
        let extractor = StaggeredExtractor {
            fail_on: None,
            calls: AtomicUsize::new(0),
            total: 5,
        };

        let bucket = collect_all(&codes, &extractor, 4, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(bucket.areas(), &codes[..]);
        for kind in RecordKind::ALL {
            assert_eq!(bucket.tables(kind).len(), codes.len());
        }
        let order: Vec<_> = bucket
            .tables(RecordKind::Population)
            .iter()
            .map(|t| t.get(0, "area").cloned().unwrap())
            .collect();
        assert_eq!(
            order,
            ["A1", "A2", "A3", "A4", "A5"].map(Value::from).to_vec()
        );
    }

    #[tokio::test]
    async fn test_first_failure_aborts_collection() {
        let codes = areas(&["A1", "A2", "A3"]);
        let extractor = StaggeredExtractor {
            fail_on: Some("A2"),
            calls: AtomicUsize::new(0),
            total: 3,
        };

        let err = collect_all(&codes, &extractor, 1, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.area, AreaCode::new("A2"));
        // Sequential: A3 is never requested after A2 fails
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_area_list_yields_empty_bucket() {
        let extractor = StaggeredExtractor {
            fail_on: None,
            calls: AtomicUsize::new(0),
            total: 0,
        };
        let bucket = collect_all(&[], &extractor, 2, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(bucket.area_count(), 0);
    }
}
