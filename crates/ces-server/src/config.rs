use ces_auth::SigningAlgorithm;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Backend FHIR data server being fronted
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub enforcement: EnforcementSettings,
    /// Bearer token verification
    #[serde(default)]
    pub auth: AuthSettings,
    /// Security labeling service
    #[serde(default)]
    pub labeling: LabelingSettings,
    /// Consent decision service
    #[serde(default)]
    pub decision: DecisionSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }
        // Backend validations
        let base = self.backend.base_url.trim();
        if base.is_empty() {
            return Err("backend.base_url is required".into());
        }
        validate_http_url("backend.base_url", base)?;
        if self.backend.timeout_ms == 0 {
            return Err("backend.timeout_ms must be > 0".into());
        }
        // Auth validations
        if self
            .auth
            .jwt_public_key
            .as_deref()
            .is_none_or(|key| key.trim().is_empty())
        {
            return Err("auth.jwt_public_key is required".into());
        }
        self.auth.signing_algorithm()?;
        // Labeling validations
        if self.labeling.enabled {
            match self.labeling.endpoint.as_deref().map(str::trim) {
                None | Some("") => {
                    return Err("labeling.enabled=true requires labeling.endpoint".into());
                }
                Some(endpoint) => validate_http_url("labeling.endpoint", endpoint)?,
            }
            if self.labeling.timeout_ms == 0 {
                return Err("labeling.timeout_ms must be > 0".into());
            }
        }
        // Decision validations
        match self.decision.endpoint.as_deref().map(str::trim) {
            None | Some("") => return Err("decision.endpoint is required".into()),
            Some(endpoint) => validate_http_url("decision.endpoint", endpoint)?,
        }
        if self.decision.hook.trim().is_empty() {
            return Err("decision.hook must not be empty".into());
        }
        if self.decision.timeout_ms == 0 {
            return Err("decision.timeout_ms must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        let ip: std::net::IpAddr = self.server.host.parse().unwrap_or([0, 0, 0, 0].into());
        SocketAddr::from((ip, self.server.port))
    }
}

fn validate_http_url(field: &str, value: &str) -> Result<(), String> {
    let parsed = url::Url::parse(value).map_err(|e| format!("{field} is not a valid URL: {e}"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("{field} must use http or https, got '{other}'")),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Applies to inbound request bodies forwarded to the backend.
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_body_limit() -> usize {
    10 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// e.g. `http://fhir.internal:8080/fhir`
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_backend_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_backend_timeout_ms() -> u64 {
    30_000
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_ms: default_backend_timeout_ms(),
        }
    }
}

impl BackendConfig {
    /// Base URL without a trailing slash.
    pub fn base(&self) -> &str {
        self.base_url.trim().trim_end_matches('/')
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EnforcementSettings {
    /// Resource types returned without consent checks.
    #[serde(default)]
    pub unprotected_resource_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// PEM encoded public key; literal `\n` sequences are accepted.
    #[serde(default)]
    pub jwt_public_key: Option<String>,
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    /// Expected `iss` claim, not checked when unset.
    #[serde(default)]
    pub issuer: Option<String>,
}

fn default_algorithm() -> String {
    SigningAlgorithm::default().as_str().to_string()
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_public_key: None,
            algorithm: default_algorithm(),
            issuer: None,
        }
    }
}

impl AuthSettings {
    pub fn signing_algorithm(&self) -> Result<SigningAlgorithm, String> {
        self.algorithm
            .parse::<SigningAlgorithm>()
            .map_err(|e| format!("auth.algorithm: {e}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelingSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_service_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_true() -> bool {
    true
}
fn default_service_timeout_ms() -> u64 {
    10_000
}

impl Default for LabelingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: None,
            timeout_ms: default_service_timeout_ms(),
        }
    }
}

impl LabelingSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionSettings {
    /// Base URL of the CDS Hooks decision service.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_hook")]
    pub hook: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default = "default_service_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_hook() -> String {
    "patient-consent-consult".into()
}
fn default_scope() -> String {
    "patient-privacy".into()
}

impl Default for DecisionSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            hook: default_hook(),
            scope: default_scope(),
            timeout_ms: default_service_timeout_ms(),
        }
    }
}

impl DecisionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_FILE: &str = "ces.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g. CES__BACKEND__BASE_URL=http://fhir:8080/fhir
        builder = builder.add_source(
            Environment::with_prefix("CES")
                .try_parsing(true)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("enforcement.unprotected_resource_types"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let mut merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        normalize(&mut merged);
        merged.validate()?;
        Ok(merged)
    }

    fn normalize(cfg: &mut AppConfig) {
        let types = &mut cfg.enforcement.unprotected_resource_types;
        for ty in types.iter_mut() {
            *ty = ty.trim().to_string();
        }
        types.retain(|ty| !ty.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.backend.base_url = "http://fhir.local/fhir".into();
        cfg.auth.jwt_public_key = Some("-----BEGIN PUBLIC KEY-----".into());
        cfg.labeling.endpoint = Some("http://sls.local/label".into());
        cfg.decision.endpoint = Some("http://cds.local".into());
        cfg
    }

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.auth.algorithm, "RS256");
        assert_eq!(cfg.decision.hook, "patient-consent-consult");
        assert_eq!(cfg.decision.scope, "patient-privacy");
        assert!(cfg.labeling.enabled);
        assert!(cfg.enforcement.unprotected_resource_types.is_empty());
    }

    #[test]
    fn test_valid_config_passes() {
        assert_eq!(valid().validate(), Ok(()));
    }

    #[test]
    fn test_backend_base_url_required() {
        let mut cfg = valid();
        cfg.backend.base_url = String::new();
        assert!(cfg.validate().unwrap_err().contains("backend.base_url"));

        cfg.backend.base_url = "ftp://fhir.local".into();
        assert!(cfg.validate().unwrap_err().contains("http or https"));
    }

    #[test]
    fn test_labeling_endpoint_only_required_when_enabled() {
        let mut cfg = valid();
        cfg.labeling.endpoint = None;
        assert!(cfg.validate().unwrap_err().contains("labeling.endpoint"));

        cfg.labeling.enabled = false;
        assert_eq!(cfg.validate(), Ok(()));
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        let mut cfg = valid();
        cfg.auth.algorithm = "HS256".into();
        assert!(cfg.validate().unwrap_err().contains("auth.algorithm"));
    }

    #[test]
    fn test_backend_base_strips_trailing_slash() {
        let mut cfg = valid();
        cfg.backend.base_url = "http://fhir.local/fhir/".into();
        assert_eq!(cfg.backend.base(), "http://fhir.local/fhir");
    }
}
