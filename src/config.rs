use crate::estimator::{SyntheticRanges, WaitFormula};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
pub const DEFAULT_SERVER_PORT: u16 = 8080;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;
pub const DEFAULT_CONCURRENCY: usize = 6;
pub const DEFAULT_CAMERA_PARALLEL: usize = 4;
pub const DEFAULT_FACILITY_BUDGET_SECS: u64 = 20;
pub const DEFAULT_RADIUS_M: f64 = 10_000.0;
pub const DEFAULT_LIMIT: usize = 5;
pub const DEFAULT_MAX_CANDIDATES: usize = 12;
pub const DEFAULT_MIN_IMAGE_BYTES: usize = 100;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 6;
pub const DEFAULT_BASE_PER_PERSON_MINUTES: u32 = 10;
pub const DEFAULT_VISION_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_VISION_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_PLACES_URL: &str = "https://places.googleapis.com/v1/places:searchNearby";
pub const DEFAULT_ROUTES_URL: &str =
    "https://routes.googleapis.com/distanceMatrix/v2:computeRouteMatrix";
pub const DEFAULT_POSTGREST_TABLE: &str = "facility_estimates";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub app: AppSection,
    pub logging: LoggingSection,
    #[serde(default)]
    pub server: Option<ServerSection>,
    #[serde(default)]
    pub cache: Option<CacheSection>,
    #[serde(default)]
    pub estimator: Option<EstimatorSection>,
    #[serde(default)]
    pub recommend: Option<RecommendSection>,
    #[serde(default)]
    pub vision: Option<VisionSection>,
    #[serde(default)]
    pub routing: Option<RoutingSection>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSection {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSection {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSection {
    /// Port to listen on (default: 8080)
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    Postgrest,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheSection {
    /// Seconds a stored estimate may be reused without re-estimation (default: 300)
    pub ttl_secs: Option<u64>,
    pub backend: Option<CacheBackend>,
    #[serde(default)]
    pub postgrest: Option<PostgrestSection>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PostgrestSection {
    pub base_url: String,
    pub api_key: Option<String>,
    pub table: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EstimatorSection {
    pub formula: Option<WaitFormula>,
    /// When true, facilities with no cameras and no cache get a randomized estimate
    pub synthetic_fallback: Option<bool>,
    pub people_min: Option<u32>,
    pub people_max: Option<u32>,
    pub per_person_min: Option<u32>,
    pub per_person_max: Option<u32>,
    pub doctors_min: Option<u32>,
    pub doctors_max: Option<u32>,
    pub base_per_person_minutes: Option<u32>,
    /// Pin the entropy source, for reproducible runs
    pub rng_seed: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecommendSection {
    /// Max facilities re-estimated in flight at once (default: 6)
    pub concurrency: Option<usize>,
    /// Max camera fetches in flight per facility (default: 4)
    pub camera_parallel: Option<usize>,
    /// Budget per facility before it degrades to no-data (default: 20s)
    pub facility_budget_secs: Option<u64>,
    pub radius_m: Option<f64>,
    pub default_limit: Option<usize>,
    pub max_candidates: Option<usize>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VisionSection {
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    /// When true, a counting failure degrades the facility instead of
    /// falling back to the seeded heuristic
    pub strict: Option<bool>,
    pub min_image_bytes: Option<usize>,
    pub fetch_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RoutingSection {
    pub api_key: Option<String>,
    pub places_url: Option<String>,
    pub routes_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

pub fn load_default() -> Result<Config, ConfigError> {
    load_from_path(DEFAULT_CONFIG_PATH)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    Ok(config)
}

impl Config {
    pub fn server_port(&self) -> u16 {
        self.server
            .as_ref()
            .and_then(|s| s.port)
            .unwrap_or(DEFAULT_SERVER_PORT)
    }

    pub fn cache_ttl(&self) -> Duration {
        let secs = self
            .cache
            .as_ref()
            .and_then(|c| c.ttl_secs)
            .unwrap_or(DEFAULT_CACHE_TTL_SECS);
        Duration::from_secs(secs)
    }

    pub fn cache_backend(&self) -> CacheBackend {
        self.cache
            .as_ref()
            .and_then(|c| c.backend.clone())
            .unwrap_or(CacheBackend::Memory)
    }

    pub fn postgrest(&self) -> Option<&PostgrestSection> {
        self.cache.as_ref()?.postgrest.as_ref()
    }

    pub fn wait_formula(&self) -> WaitFormula {
        self.estimator
            .as_ref()
            .and_then(|e| e.formula)
            .unwrap_or(WaitFormula::DoctorAware)
    }

    pub fn synthetic_fallback(&self) -> bool {
        self.estimator
            .as_ref()
            .and_then(|e| e.synthetic_fallback)
            .unwrap_or(true)
    }

    pub fn synthetic_ranges(&self) -> SyntheticRanges {
        let defaults = SyntheticRanges::default();
        let Some(section) = self.estimator.as_ref() else {
            return defaults;
        };
        SyntheticRanges {
            people_min: section.people_min.unwrap_or(defaults.people_min),
            people_max: section.people_max.unwrap_or(defaults.people_max),
            per_person_min: section.per_person_min.unwrap_or(defaults.per_person_min),
            per_person_max: section.per_person_max.unwrap_or(defaults.per_person_max),
            doctors_min: section.doctors_min.unwrap_or(defaults.doctors_min),
            doctors_max: section.doctors_max.unwrap_or(defaults.doctors_max),
        }
    }

    pub fn base_per_person_minutes(&self) -> u32 {
        self.estimator
            .as_ref()
            .and_then(|e| e.base_per_person_minutes)
            .unwrap_or(DEFAULT_BASE_PER_PERSON_MINUTES)
    }

    pub fn rng_seed(&self) -> Option<u64> {
        self.estimator.as_ref().and_then(|e| e.rng_seed)
    }

    pub fn concurrency(&self) -> usize {
        self.recommend
            .as_ref()
            .and_then(|r| r.concurrency)
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_CONCURRENCY)
    }

    pub fn camera_parallel(&self) -> usize {
        self.recommend
            .as_ref()
            .and_then(|r| r.camera_parallel)
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_CAMERA_PARALLEL)
    }

    pub fn facility_budget(&self) -> Duration {
        let secs = self
            .recommend
            .as_ref()
            .and_then(|r| r.facility_budget_secs)
            .unwrap_or(DEFAULT_FACILITY_BUDGET_SECS);
        Duration::from_secs(secs)
    }

    pub fn radius_m(&self) -> f64 {
        self.recommend
            .as_ref()
            .and_then(|r| r.radius_m)
            .unwrap_or(DEFAULT_RADIUS_M)
    }

    pub fn default_limit(&self) -> usize {
        self.recommend
            .as_ref()
            .and_then(|r| r.default_limit)
            .unwrap_or(DEFAULT_LIMIT)
    }

    pub fn max_candidates(&self) -> usize {
        self.recommend
            .as_ref()
            .and_then(|r| r.max_candidates)
            .unwrap_or(DEFAULT_MAX_CANDIDATES)
    }

    pub fn vision_endpoint(&self) -> String {
        self.vision
            .as_ref()
            .and_then(|v| v.endpoint.clone())
            .unwrap_or_else(|| DEFAULT_VISION_ENDPOINT.to_string())
    }

    pub fn vision_model(&self) -> String {
        self.vision
            .as_ref()
            .and_then(|v| v.model.clone())
            .unwrap_or_else(|| DEFAULT_VISION_MODEL.to_string())
    }

    /// Config value first, `OPENAI_API_KEY` second.
    pub fn vision_api_key(&self) -> Option<String> {
        self.vision
            .as_ref()
            .and_then(|v| v.api_key.clone())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.is_empty())
    }

    pub fn vision_strict(&self) -> bool {
        self.vision.as_ref().and_then(|v| v.strict).unwrap_or(false)
    }

    pub fn min_image_bytes(&self) -> usize {
        self.vision
            .as_ref()
            .and_then(|v| v.min_image_bytes)
            .unwrap_or(DEFAULT_MIN_IMAGE_BYTES)
    }

    pub fn fetch_timeout(&self) -> Duration {
        let secs = self
            .vision
            .as_ref()
            .and_then(|v| v.fetch_timeout_secs)
            .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS);
        Duration::from_secs(secs)
    }

    /// Config value first, `GOOGLE_MAPS_API_KEY` second.
    pub fn routing_api_key(&self) -> Option<String> {
        self.routing
            .as_ref()
            .and_then(|r| r.api_key.clone())
            .or_else(|| std::env::var("GOOGLE_MAPS_API_KEY").ok())
            .filter(|k| !k.is_empty())
    }

    pub fn places_url(&self) -> String {
        self.routing
            .as_ref()
            .and_then(|r| r.places_url.clone())
            .unwrap_or_else(|| DEFAULT_PLACES_URL.to_string())
    }

    pub fn routes_url(&self) -> String {
        self.routing
            .as_ref()
            .and_then(|r| r.routes_url.clone())
            .unwrap_or_else(|| DEFAULT_ROUTES_URL.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_config(name: &str, contents: &str) -> std::path::PathBuf {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before unix epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("triage-config-{name}-{unique}.toml"));
        fs::write(&path, contents).expect("write temp config");
        path
    }

    #[test]
    fn minimal_config_uses_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let path = temp_config(
            "minimal",
            r#"
[app]
name = "triage-flow"

[logging]
level = "info"
"#,
        );
        let config = load_from_path(&path)?;
        let _ = fs::remove_file(&path);

        assert_eq!(config.server_port(), DEFAULT_SERVER_PORT);
        assert_eq!(config.cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.cache_backend(), CacheBackend::Memory);
        assert_eq!(config.concurrency(), 6);
        assert_eq!(config.camera_parallel(), 4);
        assert_eq!(config.wait_formula(), WaitFormula::DoctorAware);
        assert!(config.synthetic_fallback());
        assert_eq!(config.min_image_bytes(), 100);
        Ok(())
    }

    #[test]
    fn sections_override_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let path = temp_config(
            "full",
            r#"
[app]
name = "triage-flow"

[logging]
level = "debug"

[server]
port = 9090

[cache]
ttl_secs = 60
backend = "postgrest"

[cache.postgrest]
base_url = "http://localhost:3000"
table = "estimates"

[estimator]
formula = "simple"
synthetic_fallback = false
people_min = 5
people_max = 10
rng_seed = 42

[recommend]
concurrency = 2
"#,
        );
        let config = load_from_path(&path)?;
        let _ = fs::remove_file(&path);

        assert_eq!(config.server_port(), 9090);
        assert_eq!(config.cache_ttl(), Duration::from_secs(60));
        assert_eq!(config.cache_backend(), CacheBackend::Postgrest);
        assert_eq!(
            config.postgrest().map(|p| p.base_url.as_str()),
            Some("http://localhost:3000")
        );
        assert_eq!(config.wait_formula(), WaitFormula::Simple);
        assert!(!config.synthetic_fallback());
        assert_eq!(config.synthetic_ranges().people_min, 5);
        assert_eq!(config.synthetic_ranges().people_max, 10);
        assert_eq!(config.synthetic_ranges().doctors_max, 20);
        assert_eq!(config.rng_seed(), Some(42));
        assert_eq!(config.concurrency(), 2);
        Ok(())
    }

    #[test]
    fn zero_concurrency_falls_back_to_default() -> Result<(), Box<dyn std::error::Error>> {
        let path = temp_config(
            "zero-conc",
            r#"
[app]
name = "triage-flow"

[logging]
level = "info"

[recommend]
concurrency = 0
camera_parallel = 0
"#,
        );
        let config = load_from_path(&path)?;
        let _ = fs::remove_file(&path);

        assert_eq!(config.concurrency(), DEFAULT_CONCURRENCY);
        assert_eq!(config.camera_parallel(), DEFAULT_CAMERA_PARALLEL);
        Ok(())
    }

    #[test]
    fn missing_config_file_returns_read_error() {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before unix epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("triage-config-missing-{unique}.toml"));

        let result = load_from_path(&path);

        assert!(matches!(result, Err(ConfigError::Read(_))));
    }

    #[test]
    fn invalid_toml_returns_parse_error() {
        let path = temp_config("invalid", "not = [valid");

        let result = load_from_path(&path);
        let _ = fs::remove_file(&path);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
