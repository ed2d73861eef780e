use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub ops_key: String,
    /// Seconds between dispatch batch runs.
    pub dispatch_interval_secs: u64,
    /// Maximum schedule rows processed per batch run.
    pub dispatch_batch_limit: i64,
    /// A QUEUED row due longer than this is reported as stuck.
    pub stuck_threshold_mins: i64,
    // SMTP (optional)
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()?,
            ops_key: env::var("OPS_KEY")
                .unwrap_or_else(|_| "change_this_ops_key".into()),
            dispatch_interval_secs: env::var("DISPATCH_INTERVAL_SECS")
                .unwrap_or_else(|_| "300".into())
                .parse()?,
            dispatch_batch_limit: env::var("DISPATCH_BATCH_LIMIT")
                .unwrap_or_else(|_| "250".into())
                .parse()?,
            stuck_threshold_mins: env::var("STUCK_THRESHOLD_MINS")
                .unwrap_or_else(|_| "60".into())
                .parse()?,
            smtp_host: env::var("SMTP_HOST").ok().filter(|s| !s.is_empty()),
            smtp_port: env::var("SMTP_PORT").ok().and_then(|v| v.parse().ok()),
            smtp_username: env::var("SMTP_USERNAME").ok().filter(|s| !s.is_empty()),
            smtp_password: env::var("SMTP_PASSWORD").ok().filter(|s| !s.is_empty()),
            smtp_from: env::var("SMTP_FROM").ok().filter(|s| !s.is_empty()),
        })
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    env::var(key).map_err(|_| anyhow::anyhow!("Missing required env var: {}", key))
}
