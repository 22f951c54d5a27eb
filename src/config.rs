use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::{env, str::FromStr, time::Duration};

/// Which object store backs document payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Local,
    S3,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "s3" => Ok(Self::S3),
            "memory" => Ok(Self::Memory),
            other => bail!("unknown storage backend `{other}` (expected local, s3 or memory)"),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables (`DOCVAULT_*`, `.env` honoured) and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Separate database for the job queue; the metadata database when unset.
    pub queue_url: Option<String>,

    pub storage_backend: StorageBackend,
    pub storage_dir: String,
    /// Prefix of presigned links served by this process.
    pub public_base_url: String,
    pub signing_secret: String,
    pub s3_endpoint: Option<String>,
    pub multi_region: bool,
    pub bucket_au: String,
    pub region_au: String,
    pub bucket_in: String,
    pub region_in: String,

    pub download_ttl: Duration,
    pub max_upload_size: u64,
    pub allowed_extensions: Vec<String>,
    /// Whole-request cap; bulk uploads carry several files.
    pub max_request_size: usize,

    pub worker_count: usize,
    pub poll_interval: Duration,
    pub job_max_attempts: u32,
    pub job_retry_delay: Duration,
    pub archive_after: Duration,
    pub stuck_after: Duration,
    pub archive_every: Duration,
    pub cleanup_every: Duration,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Immigration document storage service")]
pub struct Args {
    /// Host to bind to (overrides DOCVAULT_HOST)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Port to bind to (overrides DOCVAULT_PORT)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Database URL (overrides DOCVAULT_DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Directory for the local storage backend (overrides DOCVAULT_STORAGE_DIR)
    #[arg(long, global = true)]
    pub storage_dir: Option<String>,

    /// local, s3 or memory (overrides DOCVAULT_STORAGE_BACKEND)
    #[arg(long, global = true)]
    pub storage_backend: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP API (default), with background workers unless disabled
    Serve {
        #[arg(long)]
        no_workers: bool,
    },
    /// Run only the job workers and scheduler
    Worker,
    /// Run migrations and exit
    Migrate,
    /// Create a user and print an API token for it
    CreateUser {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "")]
        first_name: String,
        #[arg(long, default_value = "")]
        last_name: String,
        #[arg(long)]
        staff: bool,
    },
}

impl AppConfig {
    /// Parse `.env`, environment variables and CLI args into an AppConfig and
    /// the command to run.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        // A missing .env is fine.
        let _ = dotenvy::dotenv();
        let args = Args::parse();
        let cfg = Self::from_lookup(&args, |name| env::var(name).ok())?;
        let command = args.command.unwrap_or(Command::Serve { no_workers: false });
        Ok((cfg, command))
    }

    /// Merge `args` over values found through `lookup`.
    pub fn from_lookup(args: &Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let env_port: u16 = parse_var(&lookup, "DOCVAULT_PORT", 8000)?;
        let storage_backend = match &args.storage_backend {
            Some(value) => value.parse()?,
            None => parse_var(&lookup, "DOCVAULT_STORAGE_BACKEND", StorageBackend::Local)?,
        };
        let host = args.host.clone().unwrap_or_else(|| var("DOCVAULT_HOST", "0.0.0.0"));
        let port = args.port.unwrap_or(env_port);

        let signing_secret = var("DOCVAULT_SIGNING_SECRET", "");
        if storage_backend == StorageBackend::Local && signing_secret.len() < 16 {
            bail!("DOCVAULT_SIGNING_SECRET must be set to at least 16 characters for the local backend");
        }

        let max_upload_size = parse_var(&lookup, "DOCVAULT_MAX_UPLOAD_SIZE", 52_428_800u64)?;
        let allowed_extensions = var("DOCVAULT_ALLOWED_EXTENSIONS", "pdf,jpg,jpeg,png,doc,docx")
            .split(',')
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        let default_request_size = usize::try_from(max_upload_size.saturating_mul(10))
            .unwrap_or(usize::MAX);

        Ok(Self {
            public_base_url: var("DOCVAULT_PUBLIC_BASE_URL", &format!("http://localhost:{port}")),
            host,
            port,
            database_url: args
                .database_url
                .clone()
                .unwrap_or_else(|| var("DOCVAULT_DATABASE_URL", "sqlite://./data/docvault.db")),
            queue_url: lookup("DOCVAULT_QUEUE_URL").filter(|url| !url.is_empty()),
            storage_backend,
            storage_dir: args
                .storage_dir
                .clone()
                .unwrap_or_else(|| var("DOCVAULT_STORAGE_DIR", "./data/objects")),
            signing_secret,
            s3_endpoint: lookup("DOCVAULT_S3_ENDPOINT").filter(|url| !url.is_empty()),
            multi_region: parse_var(&lookup, "DOCVAULT_MULTI_REGION", false)?,
            bucket_au: var("DOCVAULT_BUCKET_AU", "immigration-docs-au"),
            region_au: var("DOCVAULT_REGION_AU", "ap-southeast-2"),
            bucket_in: var("DOCVAULT_BUCKET_IN", "immigration-docs-in"),
            region_in: var("DOCVAULT_REGION_IN", "ap-south-1"),
            download_ttl: Duration::from_secs(parse_var(&lookup, "DOCVAULT_DOWNLOAD_TTL_SECS", 3600)?),
            max_upload_size,
            allowed_extensions,
            max_request_size: parse_var(&lookup, "DOCVAULT_MAX_REQUEST_SIZE", default_request_size)?,
            worker_count: parse_var(&lookup, "DOCVAULT_WORKERS", 2)?,
            poll_interval: Duration::from_millis(parse_var(&lookup, "DOCVAULT_POLL_INTERVAL_MS", 1000)?),
            job_max_attempts: parse_var(&lookup, "DOCVAULT_JOB_MAX_ATTEMPTS", 3)?,
            job_retry_delay: Duration::from_secs(parse_var(&lookup, "DOCVAULT_JOB_RETRY_DELAY_SECS", 60)?),
            archive_after: days(parse_var(&lookup, "DOCVAULT_ARCHIVE_AFTER_DAYS", 90)?),
            stuck_after: Duration::from_secs(parse_var(&lookup, "DOCVAULT_STUCK_AFTER_SECS", 3600)?),
            archive_every: Duration::from_secs(parse_var(&lookup, "DOCVAULT_ARCHIVE_EVERY_SECS", 86_400)?),
            cleanup_every: Duration::from_secs(parse_var(&lookup, "DOCVAULT_CLEANUP_EVERY_SECS", 3600)?),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{err}"))
            .with_context(|| format!("parsing {name} value `{value}`")),
        _ => Ok(default),
    }
}

fn days(count: u64) -> Duration {
    Duration::from_secs(count * 24 * 60 * 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(argv: &[&str], vars: &[(&str, &str)]) -> Result<AppConfig> {
        let args = Args::parse_from(argv);
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(&args, |name| vars.get(name).cloned())
    }

    const SECRET: (&str, &str) = ("DOCVAULT_SIGNING_SECRET", "0123456789abcdef");

    #[test]
    fn defaults_match_the_documented_values() {
        let cfg = config(&["docvault"], &[SECRET]).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:8000");
        assert_eq!(cfg.storage_backend, StorageBackend::Local);
        assert_eq!(cfg.download_ttl, Duration::from_secs(3600));
        assert_eq!(cfg.max_upload_size, 52_428_800);
        assert_eq!(cfg.allowed_extensions, ["pdf", "jpg", "jpeg", "png", "doc", "docx"]);
        assert_eq!(cfg.job_max_attempts, 3);
        assert_eq!(cfg.archive_after, days(90));
        assert!(!cfg.multi_region);
        assert!(cfg.queue_url.is_none());
    }

    #[test]
    fn cli_args_override_environment() {
        let cfg = config(
            &["docvault", "--port", "9100", "migrate"],
            &[SECRET, ("DOCVAULT_PORT", "9000"), ("DOCVAULT_HOST", "127.0.0.1")],
        )
        .unwrap();
        assert_eq!(cfg.addr(), "127.0.0.1:9100");
    }

    #[test]
    fn bad_numbers_name_the_variable() {
        let err = config(&["docvault"], &[SECRET, ("DOCVAULT_WORKERS", "many")]).unwrap_err();
        assert!(format!("{err:#}").contains("DOCVAULT_WORKERS"));
    }

    #[test]
    fn local_backend_requires_a_signing_secret() {
        assert!(config(&["docvault"], &[]).is_err());
        assert!(config(&["docvault", "--storage-backend", "memory"], &[]).is_ok());
    }

    #[test]
    fn parses_subcommands() {
        let args = Args::parse_from(["docvault", "create-user", "--username", "ana", "--email", "a@x.io", "--staff"]);
        assert!(matches!(
            args.command,
            Some(Command::CreateUser { ref username, staff: true, .. }) if username == "ana"
        ));
    }
}
