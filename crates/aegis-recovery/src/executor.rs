//! Topological execution of recovery plans.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use aegis_core::metrics::{names, MetricsRegistry};
use aegis_stores::StoreKind;

use crate::error::{RecoveryError, Result};
use crate::plan::{RecoveryPlan, StepAction, StepState};

/// The environment recovery steps act on. Production wiring restores
/// through the backup engine and probes the target region; tests
/// substitute recording fakes.
#[async_trait]
pub trait RecoveryEnvironment: Send + Sync {
    /// Apply backups in order, optionally limited to some stores.
    async fn restore_backups(
        &self,
        backup_ids: &[String],
        stores: Option<&[StoreKind]>,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Roll out application workloads in the target region.
    async fn deploy_applications(&self, region: &str, cancel: &CancellationToken) -> Result<()>;

    /// Point routing at the target region.
    async fn configure_networking(&self, region: &str, cancel: &CancellationToken) -> Result<()>;

    /// Verify the recovered region.
    async fn validate(&self, region: &str, cancel: &CancellationToken) -> Result<()>;
}

/// Executes recovery plans against an environment.
pub struct RecoveryExecutor {
    environment: Arc<dyn RecoveryEnvironment>,
    metrics: Arc<MetricsRegistry>,
}

impl RecoveryExecutor {
    /// Create an executor.
    pub fn new(environment: Arc<dyn RecoveryEnvironment>, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            environment,
            metrics,
        }
    }

    /// Execute a plan and return it with final step states.
    ///
    /// A step enters `running` only once all of its dependencies are
    /// `completed`; independent steps run concurrently. The first
    /// failure halts further scheduling; already-running steps finish
    /// and the failing step carries the error in the returned plan.
    pub async fn execute(
        &self,
        plan: RecoveryPlan,
        cancel: &CancellationToken,
    ) -> Result<RecoveryPlan> {
        plan.validate()?;
        if cancel.is_cancelled() {
            return Err(RecoveryError::Cancelled);
        }
        self.metrics.inc(names::RECOVERY_PLAN_EXECUTIONS_TOTAL);
        tracing::info!(plan_id = %plan.id, kind = ?plan.kind, steps = plan.steps.len(), "executing recovery plan");

        let target_region = plan.target_region.clone();
        let state = Arc::new(Mutex::new(plan));
        let mut join_set: JoinSet<(uuid::Uuid, Result<()>)> = JoinSet::new();
        let mut halted = false;

        loop {
            if !halted && !cancel.is_cancelled() {
                self.schedule_ready(&state, &target_region, cancel, &mut join_set);
            }

            match join_set.join_next().await {
                None => break,
                Some(Ok((step_id, outcome))) => {
                    let mut plan = state.lock();
                    if let Some(step) = plan.steps.iter_mut().find(|s| s.id == step_id) {
                        match outcome {
                            Ok(()) => {
                                step.state = StepState::Completed;
                                tracing::info!(step = %step.name, "recovery step completed");
                            }
                            Err(e) => {
                                step.state = StepState::Failed;
                                step.error = Some(e.to_string());
                                halted = true;
                                tracing::error!(step = %step.name, error = %e, "recovery step failed");
                            }
                        }
                    }
                }
                Some(Err(join_error)) => {
                    halted = true;
                    tracing::error!(error = %join_error, "recovery step task panicked");
                }
            }
        }

        let plan = Arc::try_unwrap(state)
            .map_err(|_| RecoveryError::Environment("plan state still shared".to_string()))?
            .into_inner();

        if plan.completed() {
            tracing::info!(plan_id = %plan.id, "recovery plan completed");
        }
        Ok(plan)
    }

    /// Mark every ready step running and spawn it. Status transitions
    /// serialize under the plan lock.
    fn schedule_ready(
        &self,
        state: &Arc<Mutex<RecoveryPlan>>,
        target_region: &str,
        cancel: &CancellationToken,
        join_set: &mut JoinSet<(uuid::Uuid, Result<()>)>,
    ) {
        let mut plan = state.lock();
        let completed: Vec<uuid::Uuid> = plan
            .steps
            .iter()
            .filter(|s| s.state == StepState::Completed)
            .map(|s| s.id)
            .collect();

        let ready: Vec<(uuid::Uuid, StepAction)> = plan
            .steps
            .iter()
            .filter(|s| {
                s.state == StepState::Pending
                    && s.dependencies.iter().all(|d| completed.contains(d))
            })
            .map(|s| (s.id, s.action.clone()))
            .collect();

        for (step_id, action) in ready {
            if let Some(step) = plan.steps.iter_mut().find(|s| s.id == step_id) {
                step.state = StepState::Running;
            }

            let environment = Arc::clone(&self.environment);
            let region = target_region.to_string();
            let cancel = cancel.clone();
            join_set.spawn(async move {
                let outcome = run_action(environment, &action, &region, &cancel).await;
                (step_id, outcome)
            });
        }
    }
}

async fn run_action(
    environment: Arc<dyn RecoveryEnvironment>,
    action: &StepAction,
    region: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(RecoveryError::Cancelled);
    }
    match action {
        StepAction::RestoreBackups { backup_ids, stores } => {
            environment
                .restore_backups(backup_ids, stores.as_deref(), cancel)
                .await
        }
        StepAction::DeployApplications => environment.deploy_applications(region, cancel).await,
        StepAction::ConfigureNetworking => {
            environment.configure_networking(region, cancel).await
        }
        StepAction::Validate => environment.validate(region, cancel).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{RecoveryPlanKind, RecoveryStep, StepCategory};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeEnvironment {
        log: Mutex<Vec<String>>,
        fail_restore: AtomicBool,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl FakeEnvironment {
        async fn enter(&self, label: String) {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.log.lock().push(label);
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl RecoveryEnvironment for FakeEnvironment {
        async fn restore_backups(
            &self,
            backup_ids: &[String],
            _stores: Option<&[StoreKind]>,
            _cancel: &CancellationToken,
        ) -> Result<()> {
            self.enter(format!("restore:{}", backup_ids.join("+"))).await;
            if self.fail_restore.load(Ordering::SeqCst) {
                return Err(RecoveryError::Environment("restore failed".to_string()));
            }
            Ok(())
        }

        async fn deploy_applications(
            &self,
            _region: &str,
            _cancel: &CancellationToken,
        ) -> Result<()> {
            self.enter("deploy".to_string()).await;
            Ok(())
        }

        async fn configure_networking(
            &self,
            _region: &str,
            _cancel: &CancellationToken,
        ) -> Result<()> {
            self.enter("network".to_string()).await;
            Ok(())
        }

        async fn validate(&self, _region: &str, _cancel: &CancellationToken) -> Result<()> {
            self.enter("validate".to_string()).await;
            Ok(())
        }
    }

    fn step(name: &str, action: StepAction) -> RecoveryStep {
        RecoveryStep {
            id: uuid::Uuid::new_v4(),
            name: name.to_string(),
            description: String::new(),
            category: StepCategory::Database,
            dependencies: Vec::new(),
            estimated_secs: 60,
            state: StepState::Pending,
            error: None,
            action,
        }
    }

    fn linear_plan() -> RecoveryPlan {
        let restore = step(
            "restore",
            StepAction::RestoreBackups {
                backup_ids: vec!["full-1".to_string()],
                stores: None,
            },
        );
        let mut deploy = step("deploy", StepAction::DeployApplications);
        deploy.dependencies.push(restore.id);
        let mut network = step("network", StepAction::ConfigureNetworking);
        network.dependencies.push(deploy.id);
        let mut validate = step("validate", StepAction::Validate);
        validate.dependencies.push(network.id);

        RecoveryPlan {
            id: uuid::Uuid::new_v4(),
            kind: RecoveryPlanKind::Full,
            target_region: "west".to_string(),
            backup_id: Some("full-1".to_string()),
            point_in_time: None,
            steps: vec![restore, deploy, network, validate],
            estimated_secs: 40 * 60,
        }
    }

    #[tokio::test]
    async fn test_linear_plan_runs_in_order() {
        let environment = Arc::new(FakeEnvironment::default());
        let executor = RecoveryExecutor::new(
            Arc::clone(&environment) as Arc<dyn RecoveryEnvironment>,
            Arc::new(MetricsRegistry::new()),
        );

        let plan = executor
            .execute(linear_plan(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(plan.completed());
        assert_eq!(
            environment.log.lock().clone(),
            vec!["restore:full-1", "deploy", "network", "validate"]
        );
    }

    #[tokio::test]
    async fn test_failure_halts_scheduling() {
        let environment = Arc::new(FakeEnvironment::default());
        environment.fail_restore.store(true, Ordering::SeqCst);
        let executor = RecoveryExecutor::new(
            Arc::clone(&environment) as Arc<dyn RecoveryEnvironment>,
            Arc::new(MetricsRegistry::new()),
        );

        let plan = executor
            .execute(linear_plan(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!plan.completed());
        let failure = plan.first_failure().unwrap();
        assert_eq!(failure.name, "restore");
        assert!(failure.error.as_ref().unwrap().contains("restore failed"));

        // Dependents were never scheduled.
        for name in ["deploy", "network", "validate"] {
            let step = plan.steps.iter().find(|s| s.name == name).unwrap();
            assert_eq!(step.state, StepState::Pending);
        }
    }

    #[tokio::test]
    async fn test_independent_steps_run_concurrently() {
        let environment = Arc::new(FakeEnvironment::default());
        let executor = RecoveryExecutor::new(
            Arc::clone(&environment) as Arc<dyn RecoveryEnvironment>,
            Arc::new(MetricsRegistry::new()),
        );

        let a = step(
            "restore-a",
            StepAction::RestoreBackups {
                backup_ids: vec!["full-1".to_string()],
                stores: None,
            },
        );
        let b = step(
            "restore-b",
            StepAction::RestoreBackups {
                backup_ids: vec!["full-2".to_string()],
                stores: None,
            },
        );
        let mut validate = step("validate", StepAction::Validate);
        validate.dependencies.push(a.id);
        validate.dependencies.push(b.id);

        let plan = RecoveryPlan {
            id: uuid::Uuid::new_v4(),
            kind: RecoveryPlanKind::Partial,
            target_region: "west".to_string(),
            backup_id: None,
            point_in_time: None,
            steps: vec![a, b, validate],
            estimated_secs: 0,
        };

        let plan = executor
            .execute(plan, &CancellationToken::new())
            .await
            .unwrap();

        assert!(plan.completed());
        assert!(environment.max_active.load(Ordering::SeqCst) >= 2);
        assert_eq!(environment.log.lock().last().unwrap(), "validate");
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let environment = Arc::new(FakeEnvironment::default());
        let executor = RecoveryExecutor::new(
            environment as Arc<dyn RecoveryEnvironment>,
            Arc::new(MetricsRegistry::new()),
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            executor.execute(linear_plan(), &cancel).await,
            Err(RecoveryError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_metrics_incremented() {
        let environment = Arc::new(FakeEnvironment::default());
        let metrics = Arc::new(MetricsRegistry::new());
        let executor = RecoveryExecutor::new(
            environment as Arc<dyn RecoveryEnvironment>,
            Arc::clone(&metrics),
        );

        executor
            .execute(linear_plan(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            metrics.counter(names::RECOVERY_PLAN_EXECUTIONS_TOTAL),
            1
        );
    }
}
