//! Constants shared by the extractor, the loader and the CLI.

/// Seoul open-data API host. The key is the first path segment after it.
pub const DEFAULT_API_BASE_URL: &str = "http://openapi.seoul.go.kr:8088";

/// Service name of the real-time city data endpoint.
pub const CITYDATA_SERVICE: &str = "citydata";

/// RESULT.CODE the API returns for a successful lookup.
pub const API_SUCCESS_CODE: &str = "INFO-000";

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
pub const DEFAULT_DB_PATH: &str = "data/seoul_city.db";

// Environment overrides so secrets never have to live in config.toml
pub const ENV_API_KEY: &str = "SEOUL_API_KEY";
pub const ENV_DB_PATH: &str = "SEOUL_DB_PATH";
pub const ENV_METRICS_ADDR: &str = "SEOUL_METRICS_ADDR";

/// Hotspot area codes tracked when config.toml does not list its own.
pub const DEFAULT_AREA_CODES: &[&str] = &[
    "POI001", "POI002", "POI003", "POI004", "POI005", "POI006", "POI007", "POI008", "POI009",
    "POI010", "POI011", "POI012", "POI013", "POI014", "POI015", "POI016", "POI017", "POI018",
    "POI019", "POI020", "POI021", "POI022", "POI023", "POI024", "POI025", "POI026", "POI027",
    "POI028", "POI029", "POI030", "POI031", "POI032", "POI033", "POI034", "POI035", "POI036",
    "POI037", "POI038", "POI039", "POI040", "POI041", "POI042", "POI043", "POI044", "POI045",
    "POI046", "POI047", "POI048", "POI049", "POI050",
];

/// Get the default area codes as owned strings
pub fn default_area_codes() -> Vec<String> {
    DEFAULT_AREA_CODES.iter().map(|s| s.to_string()).collect()
}
