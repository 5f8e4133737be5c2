use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use drive_import::{
    ContinuationQueue, ContinuationWorkerBuilder, DriveAuth, GoogleDriveClient, ImportConfig,
    LocalObjectStore, ObjectStore, OrchestratorBuilder, S3Config, S3ObjectStore,
    ServiceAccountKey, SqliteCatalog, SqliteContinuationQueue, SqliteRunStore,
};
use drive_import_server::{run_server, AppState, JwtSessionVerifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StorageBackend {
    S3,
    Local,
}

#[derive(Parser, Debug)]
#[command(name = "drive-import-server", about = "Drive course import service")]
struct ServerArgs {
    #[arg(long, env = "IMPORT_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://drive-import.db")]
    database_url: String,

    /// Shared secret carried by continuation payloads.
    #[arg(long, env = "IMPORT_RUNNER_SECRET", hide_env_values = true)]
    runner_secret: String,

    /// HS256 secret session tokens are signed with.
    #[arg(long, env = "SESSION_JWT_SECRET", hide_env_values = true)]
    session_jwt_secret: String,

    #[arg(long, env = "DRIVE_ACCESS_TOKEN", hide_env_values = true)]
    drive_access_token: Option<String>,

    /// Service account key as JSON or base64 JSON.
    #[arg(long, env = "GOOGLE_SERVICE_ACCOUNT_KEY", hide_env_values = true)]
    service_account_key: Option<String>,

    #[arg(long, env = "GOOGLE_SERVICE_ACCOUNT_KEY_PATH")]
    service_account_key_path: Option<PathBuf>,

    #[arg(long, env = "STORAGE_BACKEND", value_enum, default_value = "local")]
    storage_backend: StorageBackend,

    #[arg(long, env = "S3_BUCKET")]
    s3_bucket: Option<String>,

    #[arg(long, env = "S3_REGION", default_value = "us-east-1")]
    s3_region: String,

    #[arg(long, env = "S3_ENDPOINT")]
    s3_endpoint: Option<String>,

    #[arg(long, env = "LOCAL_STORAGE_PATH", default_value = "./imports")]
    local_storage_path: PathBuf,

    #[arg(long, env = "IMPORT_TIME_BUDGET_SECS", default_value_t = 250)]
    time_budget_secs: u64,

    #[arg(long, env = "RUNNER_POLL_MS", default_value_t = 1000)]
    runner_poll_ms: u64,

    #[arg(long, env = "RUNNER_CONCURRENCY", default_value_t = 2)]
    runner_concurrency: usize,
}

impl ServerArgs {
    async fn drive_auth(&self) -> anyhow::Result<DriveAuth> {
        if let Some(token) = &self.drive_access_token {
            return Ok(DriveAuth::bearer(token.clone()));
        }
        if let Some(raw) = &self.service_account_key {
            return Ok(DriveAuth::service_account(ServiceAccountKey::parse(raw)?));
        }
        if let Some(path) = &self.service_account_key_path {
            let key = ServiceAccountKey::from_file(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            return Ok(DriveAuth::service_account(key));
        }
        bail!(
            "no Drive credentials: set DRIVE_ACCESS_TOKEN, GOOGLE_SERVICE_ACCOUNT_KEY or GOOGLE_SERVICE_ACCOUNT_KEY_PATH"
        )
    }

    async fn object_store(&self) -> anyhow::Result<Arc<dyn ObjectStore>> {
        Ok(match self.storage_backend {
            StorageBackend::Local => {
                info!(root = %self.local_storage_path.display(), "using local object storage");
                Arc::new(LocalObjectStore::new(&self.local_storage_path))
            }
            StorageBackend::S3 => {
                let bucket = self
                    .s3_bucket
                    .clone()
                    .context("S3_BUCKET is required with STORAGE_BACKEND=s3")?;
                info!(bucket = %bucket, "using S3 object storage");
                Arc::new(
                    S3ObjectStore::new(S3Config {
                        bucket_name: bucket,
                        region: self.s3_region.clone(),
                        access_key_id: std::env::var("AWS_ACCESS_KEY_ID").ok(),
                        secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY").ok(),
                        endpoint_url: self.s3_endpoint.clone(),
                    })
                    .await?,
                )
            }
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,drive_import=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = ServerArgs::parse();

    let options = SqliteConnectOptions::from_str(&args.database_url)
        .with_context(|| format!("invalid DATABASE_URL {}", args.database_url))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("connecting to database")?;

    let runs = SqliteRunStore::new(pool.clone());
    runs.run_migrations().await?;
    let catalog = SqliteCatalog::new(pool.clone());
    catalog.run_migrations().await?;
    let queue = Arc::new(SqliteContinuationQueue::new(pool));
    queue.run_migrations().await?;

    let drive = GoogleDriveClient::new(args.drive_auth().await?);
    let storage = args.object_store().await?;

    let config =
        ImportConfig::default().time_budget(Duration::from_secs(args.time_budget_secs));
    let orchestrator = Arc::new(
        OrchestratorBuilder::new(
            Arc::new(drive),
            storage,
            Arc::new(catalog),
            Arc::new(runs),
            queue.clone() as Arc<dyn ContinuationQueue>,
        )
        .config(config)
        .runner_secret(args.runner_secret.clone())
        .instance(format!("{}", args.bind))
        .build(),
    );

    let worker = ContinuationWorkerBuilder::new(queue, orchestrator.clone())
        .poll_interval(Duration::from_millis(args.runner_poll_ms))
        .max_concurrent(args.runner_concurrency)
        .build();
    tokio::spawn(async move { worker.run().await });
    info!(concurrency = args.runner_concurrency, "continuation worker started");

    let state = Arc::new(AppState {
        orchestrator,
        sessions: Arc::new(JwtSessionVerifier::new(&args.session_jwt_secret)),
    });
    run_server(state, args.bind).await
}
