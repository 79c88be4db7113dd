//! Client for the Seoul real-time city data API (`citydata` service).
//!
//! One request per area returns population and road-traffic sections together;
//! [`SeoulCityData`] splits that payload into the three fixed table schemas.

use crate::app::ports::{ExtractorPort, HttpClientPort};
use crate::config::ApiConfig;
use crate::constants::{API_SUCCESS_CODE, CITYDATA_SERVICE};
use crate::error::{FetchCause, FetchError};
use crate::observability::metrics;
use crate::types::{AreaCode, AreaSnapshot, RecordKind, Table, Value};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Map;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

type JsonObject = Map<String, serde_json::Value>;

/// Output column and the response keys it is read from, first match wins
struct Field {
    column: &'static str,
    keys: &'static [&'static str],
}

const fn field(column: &'static str, keys: &'static [&'static str]) -> Field {
    Field { column, keys }
}

const POPULATION_FIELDS: &[Field] = &[
    field("area_congest_lvl", &["AREA_CONGEST_LVL"]),
    field("area_congest_msg", &["AREA_CONGEST_MSG"]),
    field("area_ppltn_min", &["AREA_PPLTN_MIN"]),
    field("area_ppltn_max", &["AREA_PPLTN_MAX"]),
    field("male_ppltn_rate", &["MALE_PPLTN_RATE"]),
    field("female_ppltn_rate", &["FEMALE_PPLTN_RATE"]),
    field("ppltn_rate_0", &["PPLTN_RATE_0"]),
    field("ppltn_rate_10", &["PPLTN_RATE_10"]),
    field("ppltn_rate_20", &["PPLTN_RATE_20"]),
    field("ppltn_rate_30", &["PPLTN_RATE_30"]),
    field("ppltn_rate_40", &["PPLTN_RATE_40"]),
    field("ppltn_rate_50", &["PPLTN_RATE_50"]),
    field("ppltn_rate_60", &["PPLTN_RATE_60"]),
    field("ppltn_rate_70", &["PPLTN_RATE_70"]),
    field("resnt_ppltn_rate", &["RESNT_PPLTN_RATE"]),
    field("non_resnt_ppltn_rate", &["NON_RESNT_PPLTN_RATE"]),
    field("replace_yn", &["REPLACE_YN"]),
    field("ppltn_time", &["PPLTN_TIME"]),
];

const TRAFFIC_META_FIELDS: &[Field] = &[
    field("road_msg", &["ROAD_MSG"]),
    field("road_traffic_idx", &["ROAD_TRAFFIC_IDX"]),
    field("road_traffic_spd", &["ROAD_TRAFFIC_SPD"]),
    // The API spells this one ROAD_TRFFIC_TIME
    field("road_traffic_time", &["ROAD_TRFFIC_TIME", "ROAD_TRAFFIC_TIME"]),
];

const TRAFFIC_DETAIL_FIELDS: &[Field] = &[
    field("link_id", &["LINK_ID"]),
    field("road_nm", &["ROAD_NM"]),
    field("start_nd_cd", &["START_ND_CD"]),
    field("start_nd_nm", &["START_ND_NM"]),
    field("start_nd_xy", &["START_ND_XY"]),
    field("end_nd_cd", &["END_ND_CD"]),
    field("end_nd_nm", &["END_ND_NM"]),
    field("end_nd_xy", &["END_ND_XY"]),
    field("dist", &["DIST"]),
    field("spd", &["SPD"]),
    field("idx", &["IDX"]),
    field("xylist", &["XYLIST"]),
];

fn fields_for(kind: RecordKind) -> &'static [Field] {
    match kind {
        RecordKind::Population => POPULATION_FIELDS,
        RecordKind::TrafficMeta => TRAFFIC_META_FIELDS,
        RecordKind::TrafficDetail => TRAFFIC_DETAIL_FIELDS,
    }
}

/// Column schema every area's table of `kind` carries
pub fn columns_for(kind: RecordKind) -> Vec<&'static str> {
    let mut columns = vec!["area_nm", "area_cd"];
    columns.extend(fields_for(kind).iter().map(|f| f.column));
    columns
}

#[derive(Debug, Deserialize)]
struct CityDataResponse {
    #[serde(rename = "CITYDATA")]
    citydata: Option<JsonObject>,
    #[serde(rename = "RESULT")]
    result: Option<ApiResult>,
    // Some error payloads put the code at the top level
    #[serde(rename = "CODE")]
    code: Option<String>,
    #[serde(rename = "MESSAGE")]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResult {
    #[serde(rename = "RESULT.CODE", alias = "CODE")]
    code: Option<String>,
    #[serde(rename = "RESULT.MESSAGE", alias = "MESSAGE")]
    message: Option<String>,
}

pub struct SeoulCityData {
    http: Arc<dyn HttpClientPort>,
    base_url: String,
    api_key: String,
}

impl SeoulCityData {
    pub fn new(http: Arc<dyn HttpClientPort>, config: &ApiConfig) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    fn url_for(&self, area: &AreaCode, key: &str) -> String {
        format!(
            "{}/{}/json/{}/1/5/{}",
            self.base_url, key, CITYDATA_SERVICE, area
        )
    }

    /// Same URL with the key masked, safe for logs
    pub fn redacted_url(&self, area: &AreaCode) -> String {
        self.url_for(area, "***")
    }

    /// Split one decoded response body into the three per-area tables
    pub fn parse_snapshot(area: &AreaCode, body: &[u8]) -> Result<AreaSnapshot, FetchError> {
        let resp: CityDataResponse = serde_json::from_slice(body)
            .map_err(|e| FetchError::new(area, FetchCause::Malformed(e.to_string())))?;

        let (code, message) = match &resp.result {
            Some(r) => (r.code.clone(), r.message.clone()),
            None => (resp.code.clone(), resp.message.clone()),
        };
        if let Some(code) = &code {
            if code != API_SUCCESS_CODE {
                return Err(FetchError::new(
                    area,
                    FetchCause::Api {
                        code: code.clone(),
                        message: message.unwrap_or_default(),
                    },
                ));
            }
        }
        let citydata = resp.citydata.ok_or_else(|| {
            FetchError::new(area, FetchCause::Malformed("response has no CITYDATA".into()))
        })?;

        let scalar = |key: &str| match citydata.get(key) {
            None => Ok(Value::Null),
            Some(raw) => Value::from_json(raw).ok_or_else(|| {
                FetchError::new(area, FetchCause::Malformed(format!("{} is not a scalar", key)))
            }),
        };
        let area_nm = scalar("AREA_NM")?;
        let area_cd = match scalar("AREA_CD")? {
            Value::Null => Value::Text(area.to_string()),
            v => v,
        };
        let ident = (area_nm, area_cd);

        let population = section(area, RecordKind::Population, &citydata, "LIVE_PPLTN_STTS")?;
        let traffic = citydata
            .get("ROAD_TRAFFIC_STTS")
            .and_then(|v| v.as_object())
            .ok_or_else(|| {
                malformed(area, RecordKind::TrafficMeta, "ROAD_TRAFFIC_STTS missing or not an object")
            })?;
        let traffic_meta = section(area, RecordKind::TrafficMeta, traffic, "AVG_ROAD_DATA")?;
        let traffic_detail =
            section(area, RecordKind::TrafficDetail, traffic, "ROAD_TRAFFIC_STTS")?;

        Ok(AreaSnapshot {
            area: area.clone(),
            population: build_table(area, RecordKind::Population, &ident, &population)?,
            traffic_meta: build_table(area, RecordKind::TrafficMeta, &ident, &traffic_meta)?,
            traffic_detail: build_table(area, RecordKind::TrafficDetail, &ident, &traffic_detail)?,
        })
    }
}

fn malformed(area: &AreaCode, kind: RecordKind, detail: impl Into<String>) -> FetchError {
    FetchError::for_kind(area, kind, FetchCause::Malformed(detail.into()))
}

/// Records under `key`: an array of objects, or a single object. Anything
/// else, including a non-object array entry, is malformed.
fn section<'a>(
    area: &AreaCode,
    kind: RecordKind,
    parent: &'a JsonObject,
    key: &str,
) -> Result<Vec<&'a JsonObject>, FetchError> {
    match parent.get(key) {
        None => Err(malformed(area, kind, format!("missing {}", key))),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, v)| {
                v.as_object()
                    .ok_or_else(|| malformed(area, kind, format!("{}[{}] is not an object", key, i)))
            })
            .collect(),
        Some(serde_json::Value::Object(obj)) => Ok(vec![obj]),
        Some(_) => Err(malformed(area, kind, format!("{} is not an object or array", key))),
    }
}

fn build_table(
    area: &AreaCode,
    kind: RecordKind,
    ident: &(Value, Value),
    records: &[&JsonObject],
) -> Result<Table, FetchError> {
    let fields = fields_for(kind);
    let mut table =
        Table::new(columns_for(kind)).map_err(|e| malformed(area, kind, e.to_string()))?;
    for record in records {
        let mut row = Vec::with_capacity(fields.len() + 2);
        row.push(ident.0.clone());
        row.push(ident.1.clone());
        for f in fields {
            let cell = match f.keys.iter().find_map(|k| record.get(*k)) {
                None => Value::Null,
                Some(raw) => Value::from_json(raw).ok_or_else(|| {
                    malformed(area, kind, format!("{} is not a scalar", f.column))
                })?,
            };
            row.push(cell);
        }
        table
            .push_row(row)
            .map_err(|e| malformed(area, kind, e.to_string()))?;
    }
    Ok(table)
}

#[async_trait]
impl ExtractorPort for SeoulCityData {
    #[instrument(skip(self, area, cancel), fields(area = %area))]
    async fn fetch(
        &self,
        area: &AreaCode,
        cancel: &CancellationToken,
    ) -> Result<AreaSnapshot, FetchError> {
        let url = self.url_for(area, &self.api_key);
        debug!("GET {}", self.redacted_url(area));
        let t0 = Instant::now();

        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(FetchError::new(area, FetchCause::Cancelled));
            }
            r = self.http.get(&url) => r,
        };
        let resp = match resp {
            Ok(r) => r,
            Err(e) => {
                metrics::api::request_error(area.as_str());
                warn!("Request failed: {}", e);
                return Err(FetchError::new(area, FetchCause::Http(e)));
            }
        };
        if !(200..=299).contains(&resp.status) {
            metrics::api::request_error(area.as_str());
            return Err(FetchError::new(area, FetchCause::Status(resp.status)));
        }

        let parsed = Self::parse_snapshot(area, &resp.bytes);
        match &parsed {
            Ok(snapshot) => {
                metrics::api::request_success(t0.elapsed().as_secs_f64(), resp.bytes.len());
                debug!(
                    population = snapshot.population.len(),
                    traffic_meta = snapshot.traffic_meta.len(),
                    traffic_detail = snapshot.traffic_detail.len(),
                    "Parsed city data"
                );
            }
            Err(e) => {
                metrics::api::request_error(area.as_str());
                warn!("Unusable response ({}): {}", resp.content_type, e);
            }
        }
        parsed
    }
}
