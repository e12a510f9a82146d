use crate::config::{AutomationSection, GatewayConfig, StoreBackend, StoreSection};
use crate::lifecycle::{Stage, StageTracker};
use crate::{CoreError, ErrorKind, Failure};
use chrono::Local;
use hostgate_runtime::{
    playbook_log_path, select_recipe, write_inventory, AutomationCommands, Deadline, LineSink,
    ProcessRunner,
};
use hostgate_schema::{HostGroup, LockKey, RegistrationRequest, UnregisterRequest};
use hostgate_store::{Acquire, LockManager, LockStore, MemoryStore, RedisStore, Release};
use std::fmt::Display;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Where a registration writes its progress.
///
/// Lines may be held back until [`ProgressSink::commit`] is called; after
/// that the caller is committed to a successful response and every later
/// outcome, including failure, is only visible in the lines themselves.
pub trait ProgressSink: LineSink {
    fn commit(&mut self) -> io::Result<()>;
}

impl ProgressSink for Vec<String> {
    fn commit(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Build the lock backend named in the configuration.
pub fn open_store(section: &StoreSection) -> Result<Arc<dyn LockStore>, CoreError> {
    match section.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::Redis => {
            let password = Some(section.password.as_str()).filter(|p| !p.is_empty());
            let store = RedisStore::open(&section.addr, password, section.db, section.timeout)?;
            Ok(Arc::new(store))
        }
    }
}

/// What a completed registration produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationReport {
    pub group: HostGroup,
    pub recipe: PathBuf,
    pub inventory: PathBuf,
    pub log: PathBuf,
    /// The lock was already held by the same owner.
    pub idempotent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unregistered {
    pub deleted: LockKey,
    /// Released without an owner check.
    pub forced: bool,
}

fn timestamp() -> String {
    Local::now().format("%Y/%m/%d %H:%M:%S%.6f").to_string()
}

fn emit(sink: &mut dyn ProgressSink, level: &str, message: impl Display) -> Result<(), CoreError> {
    sink.emit(&format!("{} [{level}] {message}", timestamp()))
        .map_err(CoreError::Disconnected)
}

/// Passes command output through and, while the command is silent, emits
/// a "still running" line every `every`.
struct Heartbeat<'a> {
    sink: &'a mut dyn ProgressSink,
    every: Option<Duration>,
    stage: Stage,
    started: Instant,
    last_line: Instant,
}

impl LineSink for Heartbeat<'_> {
    fn emit(&mut self, line: &str) -> io::Result<()> {
        self.last_line = Instant::now();
        self.sink.emit(line)
    }

    fn idle(&mut self) -> io::Result<()> {
        self.sink.idle()?;
        match self.every {
            Some(every) if self.last_line.elapsed() >= every => {
                self.last_line = Instant::now();
                self.sink.emit(&format!(
                    "{} [INFO] {} still running ({}s)",
                    timestamp(),
                    self.stage,
                    self.started.elapsed().as_secs()
                ))
            }
            _ => Ok(()),
        }
    }
}

fn ensure_time_left(deadline: Deadline, next: Stage) -> Result<(), CoreError> {
    if deadline.expired() {
        return Err(CoreError::Timeout(format!(
            "overall deadline exceeded before {next}"
        )));
    }
    Ok(())
}

/// Drives registrations and unregistrations against one lock store and one
/// automation setup. Shared by all request threads.
pub struct Gateway {
    locks: LockManager,
    runner: ProcessRunner,
    commands: AutomationCommands,
    log_dir: PathBuf,
    recipe_dir: PathBuf,
    overall_timeout: Option<Duration>,
    rename_timeout: Option<Duration>,
    apply_timeout: Option<Duration>,
    heartbeat: Option<Duration>,
}

impl Gateway {
    pub fn new(automation: &AutomationSection, locks: LockManager) -> Self {
        Self {
            locks,
            runner: ProcessRunner::from_parts(
                automation.shell.clone(),
                automation.shell_args.clone(),
            ),
            commands: AutomationCommands {
                ansible: automation.ansible.clone(),
                ansible_playbook: automation.ansible_playbook.clone(),
                user: automation.user.clone(),
                recipe_dir: automation.dir.clone(),
            },
            log_dir: automation.log_dir.clone(),
            recipe_dir: automation.dir.clone(),
            overall_timeout: automation.overall_timeout,
            rename_timeout: automation.rename_timeout,
            apply_timeout: automation.apply_timeout,
            heartbeat: automation.heartbeat,
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Result<Self, CoreError> {
        let store = open_store(&config.store)?;
        let locks = LockManager::new(store);
        info!("lock backend: {}", locks.backend());
        Ok(Self::new(&config.automation, locks))
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Provision one host: claim its hostname, then rename it and apply its
    /// group's playbook, streaming progress into `sink`.
    ///
    /// On failure a terminal line describing it is written to `sink` (if it
    /// still accepts writes) before the error is returned. The lock is kept
    /// in every case.
    pub fn register(
        &self,
        req: &RegistrationRequest,
        sink: &mut dyn ProgressSink,
    ) -> Result<RegistrationReport, Failure> {
        let mut tracker = StageTracker::new();
        match self.drive(req, sink, &mut tracker) {
            Ok(report) => Ok(report),
            Err(error) => {
                let failure = Failure {
                    stage: tracker.stage(),
                    error,
                };
                let terminal = match &failure.error {
                    CoreError::Conflict { .. } => format!("[CONFLICT] {}", failure.error),
                    _ => format!("[ERROR] {failure}"),
                };
                match failure.error.kind() {
                    ErrorKind::Disconnected => {
                        warn!("client went away during {}: {}", failure.stage, failure.error);
                    }
                    ErrorKind::Client | ErrorKind::Conflict | ErrorKind::NotFound => {
                        warn!("registration of {} rejected: {failure}", req.hostname);
                        let _ = sink.emit(&terminal);
                    }
                    _ => {
                        error!("registration of {} failed: {failure}", req.hostname);
                        let _ = sink.emit(&terminal);
                    }
                }
                Err(failure)
            }
        }
    }

    fn drive(
        &self,
        req: &RegistrationRequest,
        sink: &mut dyn ProgressSink,
        tracker: &mut StageTracker,
    ) -> Result<RegistrationReport, CoreError> {
        req.validate()?;
        let group = req.group();
        let owner = req.owner();
        let key = req.lock_key();
        info!("register request: hostname={} owner={owner}", req.hostname);

        tracker.advance(Stage::Locking)?;
        emit(sink, "INFO", format_args!("trying to register: {key}"))?;
        let idempotent = match self.locks.try_acquire(&req.hostname, &owner)? {
            Acquire::Acquired => {
                emit(sink, "INFO", "registered")?;
                false
            }
            Acquire::AlreadyHeld(stored) if LockManager::is_idempotent_retry(&stored, &owner) => {
                warn!("{key} already held by {stored}; running provisioning again");
                emit(
                    sink,
                    "WARN",
                    format_args!("already registered (idempotent), stored=\"{stored}\""),
                )?;
                true
            }
            Acquire::AlreadyHeld(stored) => {
                emit(
                    sink,
                    "ERROR",
                    format_args!("registration conflict: stored=\"{stored}\", incoming=\"{owner}\""),
                )?;
                return Err(CoreError::Conflict {
                    stored,
                    incoming: owner,
                });
            }
        };

        let overall = Deadline::from_timeout(self.overall_timeout);

        tracker.advance(Stage::SelectingRecipe)?;
        ensure_time_left(overall, Stage::SelectingRecipe)?;
        let selection = select_recipe(&self.recipe_dir, &group)?;
        if let Some(warning) = &selection.warning {
            warn!("{warning}");
            emit(sink, "WARN", warning)?;
        }
        info!("{} uses playbook {}", req.hostname, selection.path.display());
        emit(
            sink,
            "INFO",
            format_args!("use playbook: {}", selection.path.display()),
        )?;

        tracker.advance(Stage::WritingArtifact)?;
        ensure_time_left(overall, Stage::WritingArtifact)?;
        let inventory = write_inventory(&self.log_dir, req)?;
        emit(
            sink,
            "INFO",
            format_args!("inventory written: {}", inventory.display()),
        )?;

        // From here on the outcome is reported in the stream itself.
        sink.commit().map_err(CoreError::Disconnected)?;

        tracker.advance(Stage::RenamingHost)?;
        ensure_time_left(overall, Stage::RenamingHost)?;
        let rename = self
            .commands
            .rename(&req.address, &inventory, &req.hostname);
        self.run_stage(
            sink,
            Stage::RenamingHost,
            &rename,
            overall.narrowed(self.rename_timeout),
        )?;
        emit(
            sink,
            "INFO",
            format_args!("hostname set: {}", req.hostname),
        )?;

        tracker.advance(Stage::ApplyingRecipe)?;
        ensure_time_left(overall, Stage::ApplyingRecipe)?;
        let log = playbook_log_path(&inventory, Local::now());
        let apply = self
            .commands
            .apply(&selection.path, &inventory, &group, &log);
        self.run_stage(
            sink,
            Stage::ApplyingRecipe,
            &apply,
            overall.narrowed(self.apply_timeout),
        )?;

        tracker.advance(Stage::Done)?;
        info!("{} provisioned, log {}", req.hostname, log.display());
        emit(
            sink,
            "INFO",
            format_args!("initialize host done. log={}", log.display()),
        )?;

        Ok(RegistrationReport {
            group,
            recipe: selection.path,
            inventory,
            log,
            idempotent,
        })
    }

    fn run_stage(
        &self,
        sink: &mut dyn ProgressSink,
        stage: Stage,
        command: &str,
        deadline: Deadline,
    ) -> Result<(), CoreError> {
        info!("run: {command}");
        emit(sink, "INFO", format_args!("run: {command}"))?;
        let now = Instant::now();
        let mut output = Heartbeat {
            sink,
            every: self.heartbeat,
            stage,
            started: now,
            last_line: now,
        };
        self.runner.run(command, deadline, &mut output)?;
        Ok(())
    }

    /// Release the lock on a hostname so it can be registered again.
    ///
    /// With an owner guard the lock is only released if the guard matches
    /// the stored owner; without one it is released unconditionally.
    pub fn unregister(&self, req: &UnregisterRequest) -> Result<Unregistered, CoreError> {
        req.validate()?;
        let expected = req.expected_owner();
        let key = req.lock_key();
        match self.locks.release(&req.hostname, expected.as_ref())? {
            Release::Released => Ok(Unregistered {
                deleted: key,
                forced: expected.is_none(),
            }),
            Release::NotFound => Err(CoreError::NotRegistered(key.into_inner())),
            Release::Mismatch(stored) => {
                let incoming = expected.map(|o| o.into_inner()).unwrap_or_default();
                warn!("refusing to release {key}: stored={stored} incoming={incoming}");
                Err(CoreError::OwnerMismatch { stored, incoming })
            }
        }
    }
}
