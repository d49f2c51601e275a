//! Scripted collaborators for engine tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::azure::{BlobItem, EditionSettings, ImportRequest, OperationHandle, SqlServerTarget};
use crate::credentials::SqlCredentials;
use crate::error::AppError;
use crate::migration::dispatcher::ImportTemplate;
use crate::migration::model::{BatchResult, ImportStatus, ProgressSnapshot, StatusObservation};
use crate::migration::ops::{ArchiveSource, ImportService, ProgressSink};

pub(crate) fn import_template() -> ImportTemplate {
    ImportTemplate {
        server: SqlServerTarget {
            resource_group: "rg-1".into(),
            server_name: "sql-1".into(),
        },
        edition: EditionSettings {
            edition: "Standard".into(),
            service_objective: "S0".into(),
            max_size_bytes: 268_435_456_000,
        },
        credentials: SqlCredentials {
            username: "sqladmin".into(),
            password: SecretString::from("P@ssw0rd".to_string()),
        },
        container_url: Url::parse("https://acct.blob.core.windows.net/bacpacs").unwrap(),
        storage_key: SecretString::from("key".to_string()),
    }
}

/// One scripted status answer.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Reply {
    Status(ImportStatus),
    Fault,
}

pub(crate) use Reply::{Fault, Status};

#[derive(Default)]
struct FakeState {
    fail_submit: HashSet<String>,
    scripts: HashMap<String, VecDeque<Reply>>,
    existing: HashSet<String>,
    exists_errors: HashSet<String>,
    submitted: Vec<String>,
    status_calls: HashMap<String, usize>,
    exists_calls: Vec<String>,
    in_flight: usize,
    max_in_flight: usize,
}

/// Import service whose answers are keyed by database name.
///
/// Handles look like `https://fake/operations/{database}`. A status script
/// is consumed front to back and its last reply repeats; databases without a
/// script succeed immediately.
#[derive(Clone, Default)]
pub(crate) struct FakeImportService {
    state: Arc<Mutex<FakeState>>,
    delay: Duration,
}

impl FakeImportService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fail_submission(self, database: &str) -> Self {
        self.state.lock().unwrap().fail_submit.insert(database.into());
        self
    }

    pub fn script(self, database: &str, replies: Vec<Reply>) -> Self {
        self.state
            .lock()
            .unwrap()
            .scripts
            .insert(database.into(), replies.into());
        self
    }

    pub fn with_database(self, database: &str) -> Self {
        self.state.lock().unwrap().existing.insert(database.into());
        self
    }

    pub fn exists_error(self, database: &str) -> Self {
        self.state.lock().unwrap().exists_errors.insert(database.into());
        self
    }

    pub fn submitted(&self) -> Vec<String> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn status_calls(&self, database: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .status_calls
            .get(database)
            .copied()
            .unwrap_or(0)
    }

    pub fn exists_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().exists_calls.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_in_flight
    }

    fn enter(&self) {
        let mut state = self.state.lock().unwrap();
        state.in_flight += 1;
        state.max_in_flight = state.max_in_flight.max(state.in_flight);
    }

    fn leave(&self) {
        self.state.lock().unwrap().in_flight -= 1;
    }
}

impl ImportService for FakeImportService {
    fn submit_import<'a>(
        &'a self,
        request: &'a ImportRequest,
    ) -> Pin<Box<dyn Future<Output = Result<OperationHandle, AppError>> + Send + 'a>> {
        Box::pin(async move {
            self.enter();
            tokio::time::sleep(self.delay).await;
            self.leave();

            let database = request.database_name.clone();
            let mut state = self.state.lock().unwrap();
            state.submitted.push(database.clone());
            if state.fail_submit.contains(&database) {
                return Err(AppError::AzureError(format!(
                    "[SubscriptionQuotaExceeded] cannot create {}",
                    database
                )));
            }
            Ok(OperationHandle::new(format!(
                "https://fake/operations/{}",
                database
            )))
        })
    }

    fn get_status<'a>(
        &'a self,
        handle: &'a OperationHandle,
    ) -> Pin<Box<dyn Future<Output = Result<StatusObservation, AppError>> + Send + 'a>> {
        Box::pin(async move {
            self.enter();
            tokio::time::sleep(self.delay).await;
            self.leave();

            let database = handle.short().to_string();
            let mut state = self.state.lock().unwrap();
            *state.status_calls.entry(database.clone()).or_insert(0) += 1;
            let reply = match state.scripts.get_mut(&database) {
                Some(script) if script.len() > 1 => script.pop_front(),
                Some(script) => script.front().copied(),
                None => None,
            }
            .unwrap_or(Status(ImportStatus::Succeeded));

            match reply {
                Status(status) => Ok(StatusObservation::new(status)
                    .with_message(format!("{} is {}", database, status))),
                Fault => Err(AppError::ConnectionFailed(format!(
                    "GET /operations/{} failed",
                    database
                ))),
            }
        })
    }

    fn database_exists<'a>(
        &'a self,
        _server: &'a SqlServerTarget,
        database_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, AppError>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.exists_calls.push(database_name.to_string());
            if state.exists_errors.contains(database_name) {
                return Err(AppError::AzureError(
                    "[AuthorizationFailed] no read access".into(),
                ));
            }
            Ok(state.existing.contains(database_name))
        })
    }
}

/// Archive source returning a fixed listing.
pub(crate) struct FakeArchiveSource {
    pub names: Vec<&'static str>,
}

impl ArchiveSource for FakeArchiveSource {
    fn list_blobs<'a>(
        &'a self,
        _container: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<BlobItem>, AppError>> + Send + 'a>> {
        let blobs: Vec<BlobItem> = self
            .names
            .iter()
            .map(|name| BlobItem {
                name: name.to_string(),
                content_length: None,
            })
            .collect();
        Box::pin(async move { Ok(blobs) })
    }
}

/// Sink that keeps everything it receives.
#[derive(Default)]
pub(crate) struct RecordingSink {
    snapshots: Mutex<Vec<ProgressSnapshot>>,
    results: Mutex<Vec<BatchResult>>,
}

impl RecordingSink {
    pub fn snapshots(&self) -> Vec<ProgressSnapshot> {
        self.snapshots.lock().unwrap().clone()
    }

    pub fn results(&self) -> Vec<BatchResult> {
        self.results.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn emit_progress(&self, snapshot: &ProgressSnapshot) {
        self.snapshots.lock().unwrap().push(snapshot.clone());
    }

    fn emit_result(&self, result: &BatchResult) {
        self.results.lock().unwrap().push(result.clone());
    }
}
