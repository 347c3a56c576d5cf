//! Round orchestration.
//!
//! ```text
//! Received -> Materializing -> Generating -> Publishing -> AwaitingReadiness -> Notifying -> Done
//!                  |               |             |                |                 |
//!               (warn)          Aborted       Aborted          (warn)            Aborted
//! ```
//!
//! Every round runs under the lock of its repository identity, so two
//! rounds never touch the same working tree at once. Errors never escape
//! a round: they end up in the returned [`RoundReport`] and the log.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

use crate::attachments::{AttachmentMaterializer, StagedAttachment};
use crate::config::{HostingConfig, PagesmithConfig};
use crate::errors::PipelineError;
use crate::generator::{CodeGenerator, CompletionBackend, backend_from_config};
use crate::models::{BuildRequest, NotificationPayload, RoundOutcome, RoundReport, RoundStage};
use crate::notify::EvaluatorNotifier;
use crate::publisher::{GitCli, HostingPlatform, RepoIdentity, RepositoryPublisher, VcsGateway, hosting_from_config};
use crate::readiness::ReadinessPoller;

/// Runs one build round to completion. The front door only sees this.
#[async_trait]
pub trait RoundRunner: Send + Sync {
    async fn run_round(&self, request: BuildRequest) -> RoundReport;
}

/// One async mutex per repository identity.
#[derive(Default)]
pub struct TaskLockMap {
    locks: std::sync::Mutex<HashMap<RepoIdentity, Arc<tokio::sync::Mutex<()>>>>,
}

impl TaskLockMap {
    pub fn lock_for(&self, id: &RepoIdentity) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(id.clone()).or_default())
    }

    /// Hand back a lock from [`lock_for`](Self::lock_for). The entry is
    /// dropped once no other round holds or waits on it.
    pub fn release(&self, id: &RepoIdentity, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        drop(lock);
        if locks.get(id).is_some_and(|entry| Arc::strong_count(entry) == 1) {
            locks.remove(id);
        }
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Stage bookkeeping for one round.
struct RoundRecorder {
    report: RoundReport,
}

impl RoundRecorder {
    fn new(request: &BuildRequest) -> Self {
        Self {
            report: RoundReport {
                task: request.task.clone(),
                round: request.round,
                stages: vec![RoundStage::Received],
                outcome: RoundOutcome::Done,
                deployment: None,
                ready: None,
                notify_attempts: None,
                error: None,
            },
        }
    }

    fn current(&self) -> RoundStage {
        self.report
            .stages
            .last()
            .copied()
            .unwrap_or(RoundStage::Received)
    }

    fn enter(&mut self, next: RoundStage) {
        let current = self.current();
        if !current.can_transition_to(next) {
            tracing::error!(from = %current, to = %next, "invalid stage transition");
        }
        tracing::debug!(stage = %next, "entering stage");
        self.report.stages.push(next);
    }

    fn abort(mut self, err: PipelineError) -> RoundReport {
        let at = err.stage();
        if at != self.current() {
            tracing::error!(stage = %at, current = %self.current(), "abort raised outside its stage");
        }
        tracing::error!(stage = %at, error = %err, "round aborted");
        self.enter(RoundStage::Aborted);
        self.report.outcome = RoundOutcome::Aborted { at };
        self.report.error = Some(err.to_string());
        self.report
    }

    fn finish(mut self) -> RoundReport {
        self.enter(RoundStage::Done);
        self.report.outcome = RoundOutcome::Done;
        self.report
    }
}

pub struct Pipeline {
    hosting: HostingConfig,
    materializer: AttachmentMaterializer,
    generator: CodeGenerator,
    publisher: RepositoryPublisher,
    poller: ReadinessPoller,
    readiness_timeout: Duration,
    notifier: EvaluatorNotifier,
    locks: TaskLockMap,
}

impl Pipeline {
    /// Assemble a pipeline from explicit collaborators.
    pub fn new(
        config: &PagesmithConfig,
        backend: Arc<dyn CompletionBackend>,
        vcs: Arc<dyn VcsGateway>,
        hosting: Arc<dyn HostingPlatform>,
    ) -> Self {
        let pipeline = &config.pipeline;
        Self {
            hosting: config.hosting.clone(),
            materializer: AttachmentMaterializer::new(
                Duration::from_secs(pipeline.attachment_timeout_secs),
                pipeline.attachment_max_bytes,
            ),
            generator: CodeGenerator::new(backend, config.generator.max_context_bytes),
            publisher: RepositoryPublisher::new(vcs, hosting, &pipeline.work_root, &config.license_holder()),
            poller: ReadinessPoller::new(Duration::from_secs(pipeline.readiness_interval_secs)),
            readiness_timeout: Duration::from_secs(pipeline.readiness_timeout_secs),
            notifier: EvaluatorNotifier::new(
                pipeline.notify_backoff(),
                Duration::from_secs(pipeline.notify_timeout_secs),
            ),
            locks: TaskLockMap::default(),
        }
    }

    /// Assemble the production pipeline described by `config`.
    pub fn from_config(config: &PagesmithConfig) -> anyhow::Result<Self> {
        config.validate_for_pipeline()?;
        let backend = backend_from_config(&config.generator, &config.secrets)?;
        let vcs: Arc<dyn VcsGateway> = Arc::new(GitCli::new(
            &config.hosting.commit_name,
            &config.hosting.commit_email,
        ));
        let hosting = hosting_from_config(&config.hosting, &config.secrets, Arc::clone(&vcs))?;
        Ok(Self::new(config, backend, vcs, hosting))
    }

    /// Run every stage. The caller holds the lock for `id`.
    async fn execute(&self, request: BuildRequest, id: &RepoIdentity) -> RoundReport {
        tracing::info!("round started");

        let mut recorder = RoundRecorder::new(&request);

        recorder.enter(RoundStage::Materializing);
        let staging = self.publisher.staging_dir(id);
        let staged = match self.materializer.materialize(&request.attachments, &staging).await {
            Ok(staged) => staged,
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "attachment staging failed; continuing without attachments");
                request
                    .attachments
                    .iter()
                    .map(|a| StagedAttachment {
                        name: a.name.clone(),
                        media_type: "text/plain".to_string(),
                        path: None,
                    })
                    .collect()
            }
        };

        recorder.enter(RoundStage::Generating);
        let prior = if request.is_initial_round() {
            None
        } else {
            match self.publisher.sync_from_remote(id).await {
                Ok(dir) => Some(dir),
                Err(e) => {
                    tracing::warn!(error = %e, "could not refresh working tree; generating with local state");
                    let dir = self.publisher.working_dir(id);
                    dir.exists().then_some(dir)
                }
            }
        };
        let files = match self
            .generator
            .generate(&request.brief, &staged, prior.as_deref())
            .await
        {
            Ok(files) => files,
            Err(e) => return recorder.abort(e.into()),
        };

        recorder.enter(RoundStage::Publishing);
        let deployment = match self.publisher.publish(id, &files, &staged, request.round).await {
            Ok(deployment) => deployment,
            Err(e) => return recorder.abort(e.into()),
        };
        tracing::info!(repo_url = %deployment.repo_url, commit_sha = %deployment.commit_sha, pages_url = %deployment.pages_url, "deployed");
        recorder.report.deployment = Some(deployment.clone());

        recorder.enter(RoundStage::AwaitingReadiness);
        let ready = self
            .poller
            .wait_until_ready(&deployment.pages_url, self.readiness_timeout)
            .await;
        if !ready {
            tracing::warn!(pages_url = %deployment.pages_url, "site not confirmed live; notifying anyway");
        }
        recorder.report.ready = Some(ready);

        recorder.enter(RoundStage::Notifying);
        let payload = NotificationPayload::new(&request, &deployment);
        match self.notifier.notify(&payload, &request.evaluation_url).await {
            Ok(attempts) => {
                recorder.report.notify_attempts = Some(attempts);
                tracing::info!(attempts, "round complete");
                recorder.finish()
            }
            Err(e) => {
                let crate::errors::NotifyError::Exhausted { attempts, .. } = &e;
                recorder.report.notify_attempts = Some(*attempts);
                recorder.abort(e.into())
            }
        }
    }
}

#[async_trait]
impl RoundRunner for Pipeline {
    async fn run_round(&self, request: BuildRequest) -> RoundReport {
        let id = RepoIdentity::for_task(&request.task, &self.hosting);
        let span = tracing::info_span!(
            "round",
            task = %request.task,
            round = request.round,
            repo = %id.name
        );
        let lock = self.locks.lock_for(&id);
        let report = async {
            let _guard = lock.lock().await;
            self.execute(request, &id).await
        }
        .instrument(span)
        .await;
        self.locks.release(&id, lock);
        report
    }
}
