// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Central service layer — opens the store, builds the submission pipeline,
// and owns the maintenance task.
//
// The SQLite connection is shared behind the store's own mutex; everything
// else here is cheap to clone, so request handlers take an `AppServices`
// clone into their async blocks.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use printmeter_core::ServiceConfig;
use printmeter_core::error::{PrintmeterError, Result};
use printmeter_core::human_errors::humanize_error;
use printmeter_core::types::{PrintRecord, PrinterInfo, TopupEntry, UserAccount};
use printmeter_document::{ConversionPipeline, OfficeConverter, UploadStore};
use printmeter_ledger::maintenance::MaintenanceReport;
use printmeter_ledger::{Ledger, MaintenanceTask, Store, records};
use printmeter_print::{PlatformDispatcher, PrintDispatcher, platform_dispatcher};

use super::data_dir;
use super::submission::{JobOrchestrator, Quote, Submission, SubmissionReceipt};

const CONFIG_FILE: &str = "config.json";

/// Shared application services.
#[derive(Clone)]
pub struct AppServices {
    orchestrator: Arc<JobOrchestrator<PlatformDispatcher>>,
    store: Store,
    maintenance: Arc<tokio::sync::Mutex<MaintenanceTask>>,
    data_dir: PathBuf,
    config: Arc<Mutex<ServiceConfig>>,
}

impl AppServices {
    /// Initialise all services from the default data directory.
    pub fn init() -> Result<Self> {
        let dir = data_dir::data_dir();
        let config = load_config(&dir).unwrap_or_default();
        Self::open(dir, config)
    }

    /// Initialise all services rooted at `dir` with an explicit config.
    ///
    /// Opens (or creates) the database and upload root but does not start
    /// the maintenance task.
    pub fn open(dir: PathBuf, config: ServiceConfig) -> Result<Self> {
        info!(path = %dir.display(), "initialising services");

        let store = Store::open(data_dir::resolve(&dir, &config.database_path))?;
        let uploads_root = data_dir::resolve(&dir, &config.upload_dir);
        std::fs::create_dir_all(&uploads_root)?;
        let uploads = UploadStore::new(uploads_root);

        let office = OfficeConverter::new(&config.office_converter, config.conversion_timeout());
        let font = config
            .text_font_path
            .as_deref()
            .map(|p| data_dir::resolve(&dir, p));
        if font.is_none() {
            warn!("no text font configured; plain-text uploads will be rejected");
        }
        let pipeline = ConversionPipeline::new(office, font);

        let orchestrator = JobOrchestrator::new(
            Ledger::new(store.clone()),
            uploads.clone(),
            pipeline,
            platform_dispatcher()?,
            config.conversion_timeout(),
        );
        let maintenance =
            MaintenanceTask::new(store.clone(), uploads, config.maintenance_interval());

        info!("services initialised");
        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            store,
            maintenance: Arc::new(tokio::sync::Mutex::new(maintenance)),
            data_dir: dir,
            config: Arc::new(Mutex::new(config)),
        })
    }

    // -- Printing ------------------------------------------------------------

    /// Run one submission through conversion, billing, and dispatch.
    pub async fn submit(&self, submission: Submission) -> Result<SubmissionReceipt> {
        self.orchestrator.submit(submission).await
    }

    /// Price a document without printing it.
    pub async fn quote(&self, filename: &str, bytes: &[u8]) -> Result<Quote> {
        self.orchestrator.quote(filename, bytes).await
    }

    /// Printers offered by `host`, or by the configured printer host.
    pub async fn list_printers(&self, host: Option<&str>) -> Result<Vec<PrinterInfo>> {
        let host = match host {
            Some(h) if !h.trim().is_empty() => h.to_string(),
            _ => self.config().printer_host,
        };
        self.orchestrator.dispatcher().list_printers(&host).await
    }

    // -- Accounts ------------------------------------------------------------

    pub async fn account(&self, user_id: i64) -> Result<UserAccount> {
        let ledger = self.orchestrator.ledger().clone();
        run_blocking(move || ledger.account(user_id)).await
    }

    /// Print job records of one user, newest first.
    pub async fn print_history(&self, user_id: i64) -> Result<Vec<PrintRecord>> {
        let store = self.store.clone();
        run_blocking(move || store.with_tx(true, |tx| records::list_print_jobs(tx, user_id))).await
    }

    /// Topup audit trail of one user.
    pub async fn topup_history(&self, user_id: i64) -> Result<Vec<TopupEntry>> {
        let store = self.store.clone();
        run_blocking(move || store.with_tx(true, |tx| records::list_topups(tx, user_id))).await
    }

    // -- Maintenance ---------------------------------------------------------

    /// Start the auto-topup and retention sweeps.
    pub async fn start_maintenance(&self) {
        let mut task = self.maintenance.lock().await;
        task.start();
    }

    /// Stop the sweeps and wait for the current one to finish.
    pub async fn stop_maintenance(&self) -> Result<()> {
        let mut task = self.maintenance.lock().await;
        task.stop().await
    }

    pub async fn is_maintenance_running(&self) -> bool {
        self.maintenance.lock().await.is_running()
    }

    /// Run one sweep now, outside the timer.
    pub async fn run_maintenance_now(&self) -> Result<MaintenanceReport> {
        let task = Arc::clone(&self.maintenance);
        let guard = task.lock_owned().await;
        run_blocking(move || Ok(guard.run_once(chrono::Utc::now()))).await
    }

    // -- Config --------------------------------------------------------------

    pub fn config(&self) -> ServiceConfig {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Persist a new config. Takes effect on the next start.
    pub fn save_config(&self, config: &ServiceConfig) -> Result<()> {
        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = config.clone();
        persist_config(&self.data_dir, config)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

/// Status code and JSON body for a service result at the HTTP boundary.
///
/// Errors become `{"error": ..., "retriable": ...}` with the status chosen by
/// `humanize_error`.
pub fn http_response<T: Serialize>(result: &Result<T>) -> (u16, serde_json::Value) {
    match result {
        Ok(value) => match serde_json::to_value(value) {
            Ok(body) => (200, body),
            Err(e) => http_response::<()>(&Err(PrintmeterError::Serialization(e))),
        },
        Err(err) => {
            let human = humanize_error(err);
            (
                human.status,
                json!({ "error": human.message, "retriable": human.retriable }),
            )
        }
    }
}

async fn run_blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| PrintmeterError::Io(std::io::Error::other(format!("worker task: {e}"))))?
}

// -- Config persistence -------------------------------------------------------

fn load_config(data_dir: &Path) -> Option<ServiceConfig> {
    let path = data_dir.join(CONFIG_FILE);
    let data = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&data) {
        Ok(config) => Some(config),
        Err(e) => {
            warn!(path = %path.display(), "ignoring unreadable config: {e}");
            None
        }
    }
}

fn persist_config(data_dir: &Path, config: &ServiceConfig) -> Result<()> {
    let path = data_dir.join(CONFIG_FILE);
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use printmeter_core::types::NewUser;
    use printmeter_ledger::records::RETENTION_DAYS_KEY;

    fn services(dir: &Path) -> AppServices {
        AppServices::open(dir.to_path_buf(), ServiceConfig::default()).expect("open services")
    }

    #[test]
    fn config_round_trips_through_data_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(load_config(dir.path()).is_none());

        let config = ServiceConfig {
            conversion_timeout_secs: 30,
            printer_host: "cups.lan:631".into(),
            ..Default::default()
        };
        persist_config(dir.path(), &config).expect("persist");
        let loaded = load_config(dir.path()).expect("load");
        assert_eq!(loaded.conversion_timeout_secs, 30);
        assert_eq!(loaded.printer_host, "cups.lan:631");

        std::fs::write(dir.path().join(CONFIG_FILE), "{ not json").expect("write");
        assert!(load_config(dir.path()).is_none());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(CONFIG_FILE), r#"{"maintenance_interval_secs": 60}"#)
            .expect("write");
        let loaded = load_config(dir.path()).expect("load");
        assert_eq!(loaded.maintenance_interval_secs, 60);
        assert_eq!(loaded.conversion_timeout_secs, 120);
    }

    #[tokio::test]
    async fn open_creates_database_and_upload_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let svc = services(dir.path());
        assert!(dir.path().join("printmeter.db").exists());
        assert!(dir.path().join("uploads").is_dir());

        let user_id = svc
            .store
            .with_tx(false, |tx| {
                records::create_user(
                    tx,
                    &NewUser {
                        username: "bob".into(),
                        balance_cents: 250,
                        ..Default::default()
                    },
                    Utc::now(),
                )
            })
            .expect("create user");
        let account = svc.account(user_id).await.expect("account");
        assert_eq!(account.balance_cents, 250);
        assert!(svc.print_history(user_id).await.expect("history").is_empty());
        assert!(svc.topup_history(user_id).await.expect("topups").is_empty());
    }

    #[tokio::test]
    async fn maintenance_starts_and_stops() {
        let dir = tempfile::tempdir().expect("tempdir");
        let svc = services(dir.path());
        svc.store
            .with_tx(false, |tx| records::set_setting(tx, RETENTION_DAYS_KEY, "30"))
            .expect("setting");

        svc.start_maintenance().await;
        assert!(svc.is_maintenance_running().await);
        svc.stop_maintenance().await.expect("stop");
        assert!(!svc.is_maintenance_running().await);

        let report = svc.run_maintenance_now().await.expect("sweep");
        assert_eq!(report.cleanup.deleted_jobs, 0);
    }

    #[test]
    fn errors_map_to_http_bodies() {
        let rejected: Result<()> = Err(PrintmeterError::MonthlyLimitExceeded {
            spent_cents: 900,
            cost_cents: 200,
            limit_cents: 1000,
        });
        let (status, body) = http_response(&rejected);
        assert_eq!(status, 400);
        assert_eq!(body["error"], "monthly spending limit exceeded");

        let failed: Result<()> = Err(PrintmeterError::DispatchFailed("ipp error: server-error-busy".into()));
        let (status, body) = http_response(&failed);
        assert_eq!(status, 500);
        assert!(body["error"].as_str().expect("message").contains("server-error-busy"));

        let ok: Result<Quote> = Ok(Quote {
            file_kind: printmeter_core::types::FileKind::Pdf,
            pages: 2,
            is_estimate: false,
            cost_cents: 20,
        });
        let (status, body) = http_response(&ok);
        assert_eq!(status, 200);
        assert_eq!(body["costCents"], 20);
        assert_eq!(body["fileKind"], "pdf");
    }
}
