//! `fieldsync` keeps field work captured offline (photos, check-ins, work
//! reports) in a durable queue and delivers it to the backend once the
//! device is back online.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

mod config;
mod database;
mod error;
mod models;
mod services;

use backend_client::BackendClient;
use clap::{Args, Parser, Subcommand, ValueEnum};
use config::SyncConfig;
use error::AppError;
use models::BackendSettings;
use offline_queue::{GeoPoint, OfflineQueue, PhotoCategory, PhotoMetadata, QueueKind};
use rusqlite::Connection;
use services::connectivity::{self, ConnectivityMonitor};
use services::field_actions::{
    Delivery, FieldActions, PhotoDelivery, ReportForm, Technician, WorkSite,
};
use services::geolocation::{FixedPosition, NoGeolocation};
use services::{
    export_service, settings_service, GeolocationProvider, Position, SyncOrchestrator, SyncOutcome,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(
    name = "fieldsync",
    about = "Offline queue and sync for field-service work",
    version
)]
struct Cli {
    /// Config file (defaults to $FIELDSYNC_CONFIG or ./fieldsync.toml)
    #[arg(long, global = true, value_name = "path")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show pending counts and backend settings
    Status,
    /// Run one sync pass now
    Sync,
    /// Probe connectivity and sync whenever it returns, until Ctrl-C
    Watch,
    /// Store backend settings and optionally sign in
    Configure {
        #[arg(long)]
        url: String,
        #[arg(long = "api-key")]
        api_key: String,
        #[arg(long, default_value = "work-photos")]
        bucket: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long, requires = "email")]
        password: Option<String>,
    },
    /// Resume automatic sync
    Enable,
    /// Pause sync without removing the backend settings
    Disable,
    /// Remove the stored backend settings and session
    Forget,
    /// Write all pending items to a zip archive
    Export {
        /// Target directory (defaults to <data dir>/exports)
        #[arg(long, value_name = "dir")]
        dir: Option<PathBuf>,
        /// Remove the exported items from the queues
        #[arg(long)]
        clear: bool,
    },
    /// Restore pending items from an export archive
    Import { path: PathBuf },
    /// Upload a photo, or queue it when offline
    Photo {
        path: PathBuf,
        #[command(flatten)]
        field: FieldArgs,
        #[arg(long, value_enum, default_value = "during")]
        category: CategoryArg,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Check in at the work site and start the job
    CheckIn {
        #[command(flatten)]
        field: FieldArgs,
        /// Check in even when far from the site
        #[arg(long)]
        force: bool,
    },
    /// Submit the work report and complete the job
    Report {
        #[command(flatten)]
        field: FieldArgs,
        #[arg(long)]
        description: String,
        #[arg(long, default_value = "")]
        materials: String,
        /// Defaults to the time since the last check-in
        #[arg(long)]
        minutes: Option<u32>,
        #[arg(long, default_value = "")]
        problems: String,
        #[arg(long, default_value = "")]
        recommendations: String,
    },
    /// Discard pending items
    Clear {
        #[arg(value_enum)]
        kind: KindArg,
        /// Required, cleared items cannot be recovered
        #[arg(long)]
        force: bool,
    },
}

/// Who is working where, and the device position if known
#[derive(Debug, Args)]
struct FieldArgs {
    #[arg(long = "tech-id")]
    technician_id: String,
    #[arg(long = "tech-name")]
    technician_name: String,
    #[arg(long = "order-id")]
    order_id: String,
    #[arg(long = "order-number")]
    order_number: String,
    #[arg(long, requires = "lon", allow_negative_numbers = true)]
    lat: Option<f64>,
    #[arg(long, requires = "lat", allow_negative_numbers = true)]
    lon: Option<f64>,
    #[arg(long, default_value_t = 10.0)]
    accuracy: f64,
    #[arg(long = "site-lat", requires = "site_lon", allow_negative_numbers = true)]
    site_lat: Option<f64>,
    #[arg(long = "site-lon", requires = "site_lat", allow_negative_numbers = true)]
    site_lon: Option<f64>,
}

impl FieldArgs {
    fn technician(&self) -> Technician {
        Technician {
            id: self.technician_id.clone(),
            name: self.technician_name.clone(),
        }
    }

    fn site(&self) -> WorkSite {
        WorkSite {
            order_id: self.order_id.clone(),
            order_number: self.order_number.clone(),
            location: match (self.site_lat, self.site_lon) {
                (Some(latitude), Some(longitude)) => Some(GeoPoint {
                    latitude,
                    longitude,
                }),
                _ => None,
            },
        }
    }

    fn geolocation(&self) -> Arc<dyn GeolocationProvider> {
        match (self.lat, self.lon) {
            (Some(latitude), Some(longitude)) => Arc::new(FixedPosition(Position {
                latitude,
                longitude,
                accuracy_m: self.accuracy,
            })),
            _ => Arc::new(NoGeolocation),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CategoryArg {
    Before,
    During,
    After,
}

impl From<CategoryArg> for PhotoCategory {
    fn from(arg: CategoryArg) -> Self {
        match arg {
            CategoryArg::Before => PhotoCategory::Before,
            CategoryArg::During => PhotoCategory::During,
            CategoryArg::After => PhotoCategory::After,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Photos,
    CheckIns,
    Reports,
    All,
}

impl KindArg {
    fn kinds(self) -> Vec<QueueKind> {
        match self {
            KindArg::Photos => vec![QueueKind::Photos],
            KindArg::CheckIns => vec![QueueKind::CheckIns],
            KindArg::Reports => vec![QueueKind::Reports],
            KindArg::All => QueueKind::ALL.to_vec(),
        }
    }
}

fn init_logging() {
    #[cfg(target_os = "android")]
    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(log::LevelFilter::Info)
            .with_tag("fieldsync"),
    );

    #[cfg(not(target_os = "android"))]
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Failed to create tokio runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("{}", e.user_message());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let config = match &cli.config {
        Some(path) => SyncConfig::load_from(path)?,
        None => SyncConfig::load()?,
    };

    let conn = database::init_database(&config)?;
    let store = Arc::new(database::open_queue_store(&config)?);
    let queue = Arc::new(OfflineQueue::new(store));

    match cli.command {
        Command::Status => print_status(&conn, &queue),
        Command::Sync => {
            let client = connect(&conn)?;
            let monitor = ConnectivityMonitor::new(client.health().await.is_ok());
            let orchestrator = orchestrator(&queue, client, monitor, &config);
            if let Some(outcome) = orchestrator.sync_now().await {
                report_outcome(&conn, &outcome)?;
            }
            Ok(())
        }
        Command::Watch => watch(&conn, queue, &config).await,
        Command::Configure {
            url,
            api_key,
            bucket,
            email,
            password,
        } => configure(&conn, url, api_key, bucket, email, password).await,
        Command::Enable => set_enabled(&conn, true),
        Command::Disable => set_enabled(&conn, false),
        Command::Forget => {
            settings_service::delete_backend_settings(&conn)?;
            println!("Backend settings removed");
            Ok(())
        }
        Command::Export { dir, clear } => {
            let dir = dir.unwrap_or_else(|| database::get_data_directory(&config).join("exports"));
            let path = if clear {
                export_service::export_and_clear(&queue, &dir)?
            } else {
                export_service::export_to_zip(&queue, &dir)?
            };
            println!("Exported to {}", path.display());
            Ok(())
        }
        Command::Import { path } => {
            let added = export_service::import_from_zip(&queue, &path)?;
            println!(
                "Imported {} photos, {} check-ins, {} reports",
                added.photos, added.check_ins, added.reports
            );
            Ok(())
        }
        Command::Photo {
            path,
            field,
            category,
            description,
        } => {
            let bytes = std::fs::read(&path)?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "photo.jpg".to_string());
            let metadata = PhotoMetadata {
                work_order_id: Some(field.order_id.clone()),
                order_number: Some(field.order_number.clone()),
                technician_id: field.technician_id.clone(),
                technician_name: field.technician_name.clone(),
                category: category.into(),
                description,
                location: None,
            };
            let actions = field_actions(&conn, &queue, &field, &config).await?;
            match actions.record_photo(bytes, &file_name, None, metadata).await? {
                PhotoDelivery::Uploaded { file_url } => println!("Uploaded: {}", file_url),
                PhotoDelivery::Queued { id } => println!("Saved offline as {}", id),
            }
            Ok(())
        }
        Command::CheckIn { field, force } => {
            let actions = field_actions(&conn, &queue, &field, &config).await?;
            let delivery = actions
                .start_work(&field.technician(), &field.site(), force)
                .await?;
            print_delivery("Check-in", delivery);
            Ok(())
        }
        Command::Report {
            field,
            description,
            materials,
            minutes,
            problems,
            recommendations,
        } => {
            let actions = field_actions(&conn, &queue, &field, &config).await?;
            let elapsed_minutes = match minutes {
                Some(minutes) => minutes,
                None => actions
                    .elapsed_minutes_since_arrival(
                        &field.technician_id,
                        &field.order_id,
                        chrono::Utc::now(),
                    )
                    .await?
                    .unwrap_or(0),
            };
            let form = ReportForm {
                work_description: description,
                materials_used: materials,
                elapsed_minutes,
                problems_found: problems,
                recommendations,
            };
            let delivery = actions
                .submit_report(&field.technician(), &field.site(), form)
                .await?;
            print_delivery("Report", delivery);
            Ok(())
        }
        Command::Clear { kind, force } => {
            if !force {
                return Err(AppError::Validation(
                    "Clearing discards unsent work. Export first, then pass --force.".to_string(),
                ));
            }
            for kind in kind.kinds() {
                let discarded = queue.clear(kind)?;
                println!("Cleared {} {}", discarded, kind);
            }
            Ok(())
        }
    }
}

fn print_status(conn: &Connection, queue: &OfflineQueue) -> Result<(), AppError> {
    let counts = queue.counts();
    println!(
        "Pending: {} photos, {} check-ins, {} reports ({} total)",
        counts.photos, counts.check_ins, counts.reports, counts.total
    );

    match settings_service::load_backend_settings(conn)? {
        Some(settings) => {
            println!(
                "Backend: {} ({})",
                settings.base_url,
                if settings.enabled { "enabled" } else { "disabled" }
            );
            println!(
                "Last sync: {}",
                settings.last_sync.as_deref().unwrap_or("never")
            );
        }
        None => println!("Backend: not configured"),
    }
    Ok(())
}

fn set_enabled(conn: &Connection, enabled: bool) -> Result<(), AppError> {
    if settings_service::load_backend_settings(conn)?.is_none() {
        return Err(AppError::NotFound("Backend configuration".to_string()));
    }
    settings_service::set_sync_enabled(conn, enabled)?;
    println!("Sync {}", if enabled { "enabled" } else { "disabled" });
    Ok(())
}

fn connect(conn: &Connection) -> Result<Arc<BackendClient>, AppError> {
    let settings = settings_service::load_backend_settings(conn)?
        .ok_or_else(|| AppError::NotFound("Backend configuration".to_string()))?;
    if !settings.enabled {
        return Err(AppError::Validation("Sync is disabled".to_string()));
    }
    Ok(Arc::new(BackendClient::new(settings.to_backend_config())?))
}

fn orchestrator(
    queue: &Arc<OfflineQueue>,
    client: Arc<BackendClient>,
    monitor: ConnectivityMonitor,
    config: &SyncConfig,
) -> SyncOrchestrator {
    SyncOrchestrator::new(queue.clone(), client.clone(), client, monitor, config)
}

async fn field_actions(
    conn: &Connection,
    queue: &Arc<OfflineQueue>,
    field: &FieldArgs,
    config: &SyncConfig,
) -> Result<FieldActions, AppError> {
    let client = connect(conn)?;
    let monitor = ConnectivityMonitor::new(client.health().await.is_ok());
    Ok(FieldActions::new(
        queue.clone(),
        client.clone(),
        client,
        field.geolocation(),
        monitor,
        config.clone(),
    ))
}

fn print_delivery(what: &str, delivery: Delivery) {
    match delivery {
        Delivery::Submitted => println!("{} submitted", what),
        Delivery::Queued { id } => println!("{} saved offline as {}", what, id),
    }
}

fn report_outcome(conn: &Connection, outcome: &SyncOutcome) -> Result<(), AppError> {
    for message in outcome.messages() {
        println!("{}", message);
    }
    for item in &outcome.stalled {
        println!(
            "  {} failed {} times: {}",
            item.id, item.failures, item.last_error
        );
    }
    if outcome.success() > 0 || outcome.fail() > 0 {
        settings_service::update_last_sync(conn)?;
    }
    Ok(())
}

async fn watch(
    conn: &Connection,
    queue: Arc<OfflineQueue>,
    config: &SyncConfig,
) -> Result<(), AppError> {
    let client = connect(conn)?;
    let monitor = ConnectivityMonitor::new(false);
    let orchestrator = orchestrator(&queue, client.clone(), monitor.clone(), config);
    let mut status = orchestrator.subscribe_status();
    let mut counts = queue.subscribe_counts();

    let probe_client = client.clone();
    let probe = connectivity::run_probe(monitor, config.probe_interval(), move || {
        let client = probe_client.clone();
        async move { client.health().await.is_ok() }
    });

    log::info!(
        "Watching connectivity every {:?}, {} items pending",
        config.probe_interval(),
        queue.counts().total
    );

    let report = async {
        loop {
            tokio::select! {
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let finished = {
                        let current = status.borrow_and_update();
                        if current.syncing { None } else { current.last_outcome.clone() }
                    };
                    if let Some(outcome) = finished {
                        if let Err(e) = report_outcome(conn, &outcome) {
                            log::error!("Could not record sync time: {}", e);
                        }
                    }
                }
                changed = counts.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let pending = *counts.borrow_and_update();
                    log::info!("Pending items: {}", pending.total);
                }
            }
        }
    };

    tokio::select! {
        _ = probe => {}
        _ = orchestrator.run() => {}
        _ = report => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            log::info!("Stopping");
        }
    }

    let history = orchestrator.history();
    let synced: usize = history.iter().map(|o| o.success()).sum();
    let failed: usize = history.iter().map(|o| o.fail()).sum();
    println!(
        "{} sync passes: {} items synced, {} failures",
        history.len(),
        synced,
        failed
    );
    Ok(())
}

async fn configure(
    conn: &Connection,
    url: String,
    api_key: String,
    bucket: String,
    email: Option<String>,
    password: Option<String>,
) -> Result<(), AppError> {
    let mut settings = BackendSettings::new(url, api_key, bucket);
    settings.email = email.clone();
    settings_service::save_backend_settings(conn, &settings)?;
    println!("Backend settings saved");

    if let (Some(email), Some(password)) = (email, password) {
        let client = BackendClient::new(settings.to_backend_config())?;
        let session = client.sign_in(&email, &password).await?;
        settings_service::store_session(conn, &email, &session.access_token)?;
        println!("Signed in as {}", session.email.as_deref().unwrap_or(&email));
    }
    Ok(())
}
