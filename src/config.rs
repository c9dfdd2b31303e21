use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "genoserve")]
#[command(about = "Paginated query server for indexed genomic data repositories")]
pub struct Config {
    /// Host address to bind to
    #[arg(long, env = "GENOSERVE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "GENOSERVE_PORT", default_value = "8000")]
    pub port: u16,

    /// Repository root created with `genoserve-repo init`
    #[arg(long, env = "GENOSERVE_REPO", default_value = "./repo")]
    pub repo_dir: PathBuf,

    /// Enable CORS for all origins
    #[arg(long, env = "GENOSERVE_CORS", default_value = "true")]
    pub cors: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Page size used when a request does not ask for one
    #[arg(long, env = "GENOSERVE_DEFAULT_PAGE_SIZE", default_value = "100")]
    pub default_page_size: usize,

    /// Largest page size a request may ask for
    #[arg(long, env = "GENOSERVE_MAX_PAGE_SIZE", default_value = "1024")]
    pub max_page_size: usize,

    /// Upper bound on the estimated serialized size of one page, in bytes
    #[arg(long, env = "GENOSERVE_MAX_RESPONSE_LENGTH", default_value = "1048576")]
    pub max_response_length: usize,

    /// Reject malformed or over-specified requests instead of repairing them
    #[arg(long, env = "GENOSERVE_REQUEST_VALIDATION", default_value = "false")]
    pub request_validation: bool,

    /// Re-check every produced page against the paging invariants
    #[arg(long, env = "GENOSERVE_RESPONSE_VALIDATION", default_value = "false")]
    pub response_validation: bool,

    /// Per-query deadline in milliseconds (0 disables it)
    #[arg(long, env = "GENOSERVE_QUERY_TIMEOUT_MS", default_value = "30000")]
    pub query_timeout_ms: u64,
}

impl Config {
    /// Freeze the query-relevant settings into the value handed to the engine.
    pub fn query_config(&self) -> QueryConfig {
        QueryConfig {
            default_page_size: self.default_page_size.max(1),
            max_page_size: self.max_page_size.max(1),
            max_response_length: self.max_response_length.max(1),
            request_validation: self.request_validation,
            response_validation: self.response_validation,
            query_timeout: (self.query_timeout_ms > 0)
                .then(|| Duration::from_millis(self.query_timeout_ms)),
        }
    }
}

/// Immutable settings consumed by the query engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryConfig {
    pub default_page_size: usize,
    pub max_page_size: usize,
    pub max_response_length: usize,
    pub request_validation: bool,
    pub response_validation: bool,
    pub query_timeout: Option<Duration>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_page_size: 100,
            max_page_size: 1024,
            max_response_length: 1024 * 1024,
            request_validation: false,
            response_validation: false,
            query_timeout: None,
        }
    }
}

impl QueryConfig {
    /// Resolve the page size for a request.
    ///
    /// A hint is honoured when it is positive and within `max_page_size`;
    /// anything else falls back to the default, unless strict request
    /// validation is on, in which case a non-positive hint is rejected.
    pub fn effective_page_size(&self, hint: Option<i64>) -> crate::Result<usize> {
        match hint {
            None => Ok(self.default_page_size),
            Some(h) if h <= 0 && self.request_validation => Err(crate::Error::InvalidInput(
                format!("page size must be positive, got {}", h),
            )),
            Some(h) if h > 0 && (h as u64) <= self.max_page_size as u64 => Ok(h as usize),
            Some(_) => Ok(self.default_page_size),
        }
    }
}
