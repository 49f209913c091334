//! Configuration for the comparison run
//!
//! Everything is read from environment variables with defaults pointing at
//! the shared test iTwin. Only the authentication variables are required.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use clash_client::ServiceEndpoints;
use clash_core::NewSuppressionRule;
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Errors in the process configuration; all are fatal at startup
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    MissingVar(String),

    #[error("invalid value {value:?} for {name}: {reason}")]
    Invalid {
        name: String,
        value: String,
        reason: String,
    },

    #[error("both clients are disabled; enable CLASH_CALL_RC or CLASH_CALL_WSG")]
    NoClientEnabled,
}

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

pub const DEFAULT_ITWIN_ID: &str = "57822e4f-5cf0-41b8-bda3-bb52f71cc095";
pub const DEFAULT_IMODEL_ID: &str = "6e59f05d-c8ea-438a-8230-77624661790f";
pub const DEFAULT_CHANGESET_ID: &str = "9d4a4c92c929c4eee7dd879fb9af519d9fa027e5";
pub const DEFAULT_RESULT_ID: &str = "001fba17-bb25-40fb-b6c3-571f22e4bb0f";
pub const DEFAULT_SUPPRESSION_TEMPLATE_ID: &str = "c9767f64-cdda-4fec-be02-0f5ca05a430d";
pub const DEFAULT_BULK_COUNT: usize = 20;

/// Environment variables the device sign-in needs
pub const AUTH_CLIENT_ID_VAR: &str = "ClashRestClientId";
pub const AUTH_SCOPES_VAR: &str = "ClashRestClientScopes";
pub const AUTH_REDIRECT_URI_VAR: &str = "ClashRestClientLoginRedirectUri";

/// Which client runs first for each operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderingPolicy {
    RcFirst,
    #[default]
    WsgFirst,
    /// Neither client waits on the other's outcome; slots run RC then WSG
    Independent,
}

impl FromStr for OrderingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rc-first" | "rc" => Ok(Self::RcFirst),
            "wsg-first" | "wsg" => Ok(Self::WsgFirst),
            "independent" => Ok(Self::Independent),
            other => Err(format!(
                "unknown order {:?}, expected rc-first, wsg-first or independent",
                other
            )),
        }
    }
}

/// Result polling after a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_attempts: u32,
}

/// Configuration of the comparison scenario
#[derive(Debug, Clone)]
pub struct ComparisonConfig {
    pub itwin_id: String,
    pub imodel_id: String,
    pub endpoints: ServiceEndpoints,
    pub policy: OrderingPolicy,
    pub call_rc: bool,
    pub call_wsg: bool,
    /// Changeset every run targets
    pub changeset_id: String,
    /// Result fetched by the results step unless a polled run replaces it
    pub result_id: String,
    pub bulk_count: usize,
    pub suppression_rule: NewSuppressionRule,
    /// `None` skips the poll step
    pub poll: Option<PollSettings>,
}

/// Default payload for the suppression rule steps
pub fn default_suppression_rule() -> NewSuppressionRule {
    let mut parameters = Map::new();
    parameters.insert("likeExpression1".into(), json!({"value": "boxes"}));
    parameters.insert("likeExpression2".into(), json!({"value": "Spheres"}));
    NewSuppressionRule {
        template_id: DEFAULT_SUPPRESSION_TEMPLATE_ID.to_string(),
        name: "as-test".to_string(),
        reason: "testing".to_string(),
        parameters,
    }
}

fn parse_var<T: FromStr>(name: &str, value: Option<String>, default: T) -> ConfigResult<T>
where
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name: name.to_string(),
            value,
            reason: e.to_string(),
        }),
    }
}

fn parse_flag(name: &str, value: Option<String>, default: bool) -> ConfigResult<bool> {
    let Some(raw) = value else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name: name.to_string(),
            value: raw.clone(),
            reason: "expected true or false".to_string(),
        }),
    }
}

impl ComparisonConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from any variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let prefix = var("IMJS_URL_PREFIX").unwrap_or_default();
        let hosted = ServiceEndpoints::hosted(&prefix);
        let rms_timeout = parse_var(
            "CLASH_RMS_TIMEOUT_SECS",
            var("CLASH_RMS_TIMEOUT_SECS"),
            ServiceEndpoints::DEFAULT_RMS_TIMEOUT.as_secs(),
        )?;
        let ras_timeout = parse_var(
            "CLASH_RAS_TIMEOUT_SECS",
            var("CLASH_RAS_TIMEOUT_SECS"),
            ServiceEndpoints::DEFAULT_RAS_TIMEOUT.as_secs(),
        )?;
        let endpoints = ServiceEndpoints::new(
            &var("CLASH_RMS_URL").unwrap_or(hosted.rms_url),
            &var("CLASH_RAS_URL").unwrap_or(hosted.ras_url),
        )
        .with_timeouts(
            Duration::from_secs(rms_timeout),
            Duration::from_secs(ras_timeout),
        );

        let call_rc = parse_flag("CLASH_CALL_RC", var("CLASH_CALL_RC"), true)?;
        let call_wsg = parse_flag("CLASH_CALL_WSG", var("CLASH_CALL_WSG"), true)?;
        if !call_rc && !call_wsg {
            return Err(ConfigError::NoClientEnabled);
        }

        let mut suppression_rule = default_suppression_rule();
        if let Some(template_id) = var("CLASH_SUPPRESSION_TEMPLATE_ID") {
            suppression_rule.template_id = template_id;
        }
        if let Some(raw) = var("CLASH_SUPPRESSION_PARAMETERS") {
            suppression_rule.parameters = match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(parameters)) => parameters,
                Ok(_) => {
                    return Err(ConfigError::Invalid {
                        name: "CLASH_SUPPRESSION_PARAMETERS".to_string(),
                        value: raw,
                        reason: "expected a JSON object".to_string(),
                    })
                }
                Err(e) => {
                    return Err(ConfigError::Invalid {
                        name: "CLASH_SUPPRESSION_PARAMETERS".to_string(),
                        value: raw,
                        reason: e.to_string(),
                    })
                }
            };
        }

        let poll = if parse_flag("CLASH_POLL", var("CLASH_POLL"), false)? {
            Some(PollSettings {
                interval: Duration::from_secs(parse_var(
                    "CLASH_POLL_INTERVAL_SECS",
                    var("CLASH_POLL_INTERVAL_SECS"),
                    5,
                )?),
                max_attempts: parse_var(
                    "CLASH_POLL_MAX_ATTEMPTS",
                    var("CLASH_POLL_MAX_ATTEMPTS"),
                    60,
                )?,
            })
        } else {
            None
        };

        Ok(Self {
            itwin_id: var("CLASH_ITWIN_ID").unwrap_or_else(|| DEFAULT_ITWIN_ID.to_string()),
            imodel_id: var("CLASH_IMODEL_ID").unwrap_or_else(|| DEFAULT_IMODEL_ID.to_string()),
            endpoints,
            policy: parse_var("CLASH_ORDER", var("CLASH_ORDER"), OrderingPolicy::default())?,
            call_rc,
            call_wsg,
            changeset_id: var("CLASH_CHANGESET_ID")
                .unwrap_or_else(|| DEFAULT_CHANGESET_ID.to_string()),
            result_id: var("CLASH_RESULT_ID").unwrap_or_else(|| DEFAULT_RESULT_ID.to_string()),
            bulk_count: parse_var("CLASH_BULK_COUNT", var("CLASH_BULK_COUNT"), DEFAULT_BULK_COUNT)?,
            suppression_rule,
            poll,
        })
    }
}

/// Sign-in settings
#[derive(Clone)]
pub struct AuthConfig {
    pub client_id: String,
    pub scopes: String,
    /// Registered with the app; the device flow does not redirect
    pub redirect_uri: String,
    /// Identity provider base URL
    pub authority: String,
    /// Pre-issued token that skips sign-in
    pub access_token: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("client_id", &self.client_id)
            .field("scopes", &self.scopes)
            .field("redirect_uri", &self.redirect_uri)
            .field("authority", &self.authority)
            .field("access_token", &self.access_token.as_ref().map(|_| "(set)"))
            .finish()
    }
}

impl AuthConfig {
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Fails when any of the three app registration variables is missing
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required =
            |name: &str| var(name).ok_or_else(|| ConfigError::MissingVar(name.to_string()));

        let client_id = required(AUTH_CLIENT_ID_VAR)?;
        let scopes = required(AUTH_SCOPES_VAR)?;
        let redirect_uri = required(AUTH_REDIRECT_URI_VAR)?;
        let prefix = var("IMJS_URL_PREFIX").unwrap_or_default();

        Ok(Self {
            client_id,
            scopes,
            redirect_uri,
            authority: var("CLASH_AUTHORITY")
                .unwrap_or_else(|| format!("https://{}ims.bentley.com", prefix))
                .trim_end_matches('/')
                .to_string(),
            access_token: var("CLASH_ACCESS_TOKEN"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ComparisonConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.itwin_id, DEFAULT_ITWIN_ID);
        assert_eq!(config.imodel_id, DEFAULT_IMODEL_ID);
        assert_eq!(config.policy, OrderingPolicy::WsgFirst);
        assert!(config.call_rc && config.call_wsg);
        assert_eq!(config.bulk_count, 20);
        assert_eq!(config.poll, None);
        assert_eq!(config.endpoints.rms_timeout, Duration::from_secs(60));
        assert_eq!(config.endpoints.ras_timeout, Duration::from_secs(120));
        assert_eq!(
            config.endpoints.ras_url,
            "https://connect-resultsanalysisservice.bentley.com"
        );
        assert_eq!(config.suppression_rule.name, "as-test");
        assert_eq!(config.suppression_rule.parameters.len(), 2);
    }

    #[test]
    fn test_overrides() {
        let config = ComparisonConfig::from_lookup(lookup(&[
            ("IMJS_URL_PREFIX", "qa-"),
            ("CLASH_RMS_URL", "http://localhost:9000/"),
            ("CLASH_ORDER", "independent"),
            ("CLASH_CALL_WSG", "false"),
            ("CLASH_POLL", "true"),
            ("CLASH_POLL_INTERVAL_SECS", "1"),
        ]))
        .unwrap();
        assert_eq!(config.endpoints.rms_url, "http://localhost:9000");
        assert_eq!(
            config.endpoints.ras_url,
            "https://qa-connect-resultsanalysisservice.bentley.com"
        );
        assert_eq!(config.policy, OrderingPolicy::Independent);
        assert!(!config.call_wsg);
        assert_eq!(
            config.poll,
            Some(PollSettings {
                interval: Duration::from_secs(1),
                max_attempts: 60
            })
        );
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            ComparisonConfig::from_lookup(lookup(&[("CLASH_ORDER", "sideways")])),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            ComparisonConfig::from_lookup(lookup(&[("CLASH_BULK_COUNT", "many")])),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            ComparisonConfig::from_lookup(lookup(&[
                ("CLASH_CALL_RC", "no"),
                ("CLASH_CALL_WSG", "0")
            ])),
            Err(ConfigError::NoClientEnabled)
        ));
    }

    #[test]
    fn test_auth_requires_registration_vars() {
        let err = AuthConfig::from_lookup(lookup(&[
            (AUTH_CLIENT_ID_VAR, "app"),
            (AUTH_SCOPES_VAR, "clashdetection:read"),
        ]))
        .unwrap_err();
        assert!(
            matches!(&err, ConfigError::MissingVar(name) if name == AUTH_REDIRECT_URI_VAR),
            "{}",
            err
        );

        let auth = AuthConfig::from_lookup(lookup(&[
            (AUTH_CLIENT_ID_VAR, "app"),
            (AUTH_SCOPES_VAR, "clashdetection:read"),
            (AUTH_REDIRECT_URI_VAR, "http://localhost:3000/signin-callback"),
            ("CLASH_ACCESS_TOKEN", "abc"),
        ]))
        .unwrap();
        assert_eq!(auth.authority, "https://ims.bentley.com");
        assert_eq!(auth.access_token.as_deref(), Some("abc"));
        assert!(!format!("{:?}", auth).contains("abc"));
    }
}
