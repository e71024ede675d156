use reqwest::Url;
use tracing::warn;

use super::error::{CouchDaoError, CouchResult};

/// Database used when `COUCH_DB` is not set.
pub const DEFAULT_DATABASE: &str = "quizpoint_sessions";

const BASE_URL_ENV: &str = "COUCH_BASE_URL";
const DATABASE_ENV: &str = "COUCH_DB";
const USERNAME_ENV: &str = "COUCH_USERNAME";
const PASSWORD_ENV: &str = "COUCH_PASSWORD";

/// Where the relay keeps its session documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouchConfig {
    /// Server root, without a trailing slash.
    pub base_url: String,
    /// Database holding one `session::<code>` document per session.
    pub database: String,
    /// Basic-auth user and password, only when both are given.
    pub credentials: Option<(String, String)>,
}

impl CouchConfig {
    /// Validated configuration for `base_url` and `database`, without credentials.
    pub fn new(base_url: impl Into<String>, database: impl Into<String>) -> CouchResult<Self> {
        let base_url = base_url.into();
        let parsed = Url::parse(&base_url).map_err(|_| CouchDaoError::InvalidConfig {
            reason: format!("`{base_url}` is not a URL"),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(CouchDaoError::InvalidConfig {
                reason: format!("`{base_url}` must use http or https"),
            });
        }

        let database = database.into();
        if !is_valid_database_name(&database) {
            return Err(CouchDaoError::InvalidConfig {
                reason: format!("`{database}` is not a valid CouchDB database name"),
            });
        }

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            database,
            credentials: None,
        })
    }

    /// Attach basic-auth credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Read `COUCH_*` from the process environment. `Ok(None)` when no server is configured.
    pub fn from_env() -> CouchResult<Option<Self>> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`CouchConfig::from_env`] over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> CouchResult<Option<Self>> {
        let Some(base_url) = lookup(BASE_URL_ENV).filter(|url| !url.trim().is_empty()) else {
            return Ok(None);
        };
        let database = lookup(DATABASE_ENV)
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DATABASE.to_owned());

        let config = Self::new(base_url.trim(), database)?;
        match (lookup(USERNAME_ENV), lookup(PASSWORD_ENV)) {
            (Some(username), Some(password)) => {
                Ok(Some(config.with_credentials(username, password)))
            }
            (None, None) => Ok(Some(config)),
            _ => {
                warn!("only one of {USERNAME_ENV}/{PASSWORD_ENV} is set; connecting anonymously");
                Ok(Some(config))
            }
        }
    }
}

/// CouchDB naming rule: a lowercase letter followed by `a-z 0-9 _ $ ( ) + - /`.
fn is_valid_database_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|first| first.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "_$()+-/".contains(c))
}
