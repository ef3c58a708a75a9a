//! Recovery plans: typed step DAGs generated from the backup catalog.

use serde::{Deserialize, Serialize};

use aegis_backup::BackupCatalog;
use aegis_stores::StoreKind;

use crate::error::{RecoveryError, Result};

/// Plan kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryPlanKind {
    /// Restore everything from the latest full backup.
    Full,
    /// Restore a subset of stores.
    Partial,
    /// Restore to a specific point in time via a full + incremental chain.
    PointInTime,
}

/// Step category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepCategory {
    /// Store restore.
    Database,
    /// Application rollout.
    Application,
    /// Routing and DNS.
    Network,
    /// Post-recovery verification.
    Validation,
}

/// Step lifecycle. Advances only forward: pending, running, then
/// completed or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    /// Not yet scheduled.
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

/// What a step does when executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "action")]
pub enum StepAction {
    /// Apply backups in order, optionally limited to some stores.
    RestoreBackups {
        /// Backup ids, applied in order.
        backup_ids: Vec<String>,
        /// Store filter; `None` restores all stores.
        stores: Option<Vec<StoreKind>>,
    },
    /// Roll out application workloads in the target region.
    DeployApplications,
    /// Point routing at the target region.
    ConfigureNetworking,
    /// Verify the recovered region.
    Validate,
}

/// One node of the recovery DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryStep {
    /// Step id.
    pub id: uuid::Uuid,
    /// Short human name.
    pub name: String,
    /// What the step does.
    pub description: String,
    /// Category.
    pub category: StepCategory,
    /// Steps that must complete before this one may run.
    pub dependencies: Vec<uuid::Uuid>,
    /// Estimated duration in seconds.
    pub estimated_secs: u64,
    /// Current state.
    pub state: StepState,
    /// Failure description once failed.
    pub error: Option<String>,
    /// Executable action.
    pub action: StepAction,
}

impl RecoveryStep {
    fn new(
        name: &str,
        description: &str,
        category: StepCategory,
        estimated_secs: u64,
        action: StepAction,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            name: name.to_string(),
            description: description.to_string(),
            category,
            dependencies: Vec::new(),
            estimated_secs,
            state: StepState::Pending,
            error: None,
            action,
        }
    }

    fn after(mut self, dependency: &RecoveryStep) -> Self {
        self.dependencies.push(dependency.id);
        self
    }
}

/// A generated recovery plan. Immutable once created; step states are
/// the only mutable fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryPlan {
    /// Plan id.
    pub id: uuid::Uuid,
    /// Plan kind.
    pub kind: RecoveryPlanKind,
    /// Region being recovered.
    pub target_region: String,
    /// Backup anchoring the plan, if any.
    pub backup_id: Option<String>,
    /// Requested point in time, for point-in-time plans.
    pub point_in_time: Option<chrono::DateTime<chrono::Utc>>,
    /// Steps in creation order.
    pub steps: Vec<RecoveryStep>,
    /// Sum of step estimates in seconds.
    pub estimated_secs: u64,
}

impl RecoveryPlan {
    /// The first failed step, if any.
    pub fn first_failure(&self) -> Option<&RecoveryStep> {
        self.steps.iter().find(|s| s.state == StepState::Failed)
    }

    /// Whether every step completed.
    pub fn completed(&self) -> bool {
        self.steps.iter().all(|s| s.state == StepState::Completed)
    }

    /// Validate the dependency graph: every dependency exists and the
    /// graph is acyclic.
    pub fn validate(&self) -> Result<()> {
        for step in &self.steps {
            for dep in &step.dependencies {
                if !self.steps.iter().any(|s| s.id == *dep) {
                    return Err(RecoveryError::InvalidPlan(format!(
                        "step {} depends on unknown step {}",
                        step.name, dep
                    )));
                }
            }
        }

        // Kahn's algorithm; leftover nodes mean a cycle.
        let mut resolved: Vec<uuid::Uuid> = Vec::new();
        let mut remaining: Vec<&RecoveryStep> = self.steps.iter().collect();
        while !remaining.is_empty() {
            let ready: Vec<uuid::Uuid> = remaining
                .iter()
                .filter(|s| s.dependencies.iter().all(|d| resolved.contains(d)))
                .map(|s| s.id)
                .collect();
            if ready.is_empty() {
                return Err(RecoveryError::InvalidPlan(
                    "dependency cycle detected".to_string(),
                ));
            }
            resolved.extend(ready.iter());
            remaining.retain(|s| !ready.contains(&s.id));
        }
        Ok(())
    }

    fn finish(mut self) -> Self {
        self.estimated_secs = self.steps.iter().map(|s| s.estimated_secs).sum();
        self
    }
}

/// Generates plans from the backup catalog.
pub struct RecoveryPlanner {
    catalog: BackupCatalog,
}

impl RecoveryPlanner {
    /// Create a planner over the catalog.
    pub fn new(catalog: BackupCatalog) -> Self {
        Self { catalog }
    }

    /// The canonical full plan: restore databases, deploy applications,
    /// configure networking, validate.
    pub async fn plan_full(&self, target_region: &str) -> Result<RecoveryPlan> {
        let backup = self
            .catalog
            .latest_successful_full()
            .await?
            .ok_or(RecoveryError::NoBackup)?;

        let restore = RecoveryStep::new(
            "restore-databases",
            "Restore all stores from the latest full backup",
            StepCategory::Database,
            20 * 60,
            StepAction::RestoreBackups {
                backup_ids: vec![backup.id.clone()],
                stores: None,
            },
        );
        let deploy = RecoveryStep::new(
            "deploy-applications",
            "Roll out application workloads in the target region",
            StepCategory::Application,
            10 * 60,
            StepAction::DeployApplications,
        )
        .after(&restore);
        let network = RecoveryStep::new(
            "configure-networking",
            "Point routing and DNS at the target region",
            StepCategory::Network,
            5 * 60,
            StepAction::ConfigureNetworking,
        )
        .after(&deploy);
        let validate = RecoveryStep::new(
            "validate",
            "Verify stores and endpoints in the recovered region",
            StepCategory::Validation,
            5 * 60,
            StepAction::Validate,
        )
        .after(&network);

        let plan = RecoveryPlan {
            id: uuid::Uuid::new_v4(),
            kind: RecoveryPlanKind::Full,
            target_region: target_region.to_string(),
            backup_id: Some(backup.id),
            point_in_time: None,
            steps: vec![restore, deploy, network, validate],
            estimated_secs: 0,
        }
        .finish();
        plan.validate()?;
        Ok(plan)
    }

    /// A partial plan: restore a store subset from a chosen (or latest)
    /// backup, then validate.
    pub async fn plan_partial(
        &self,
        target_region: &str,
        stores: Vec<StoreKind>,
        backup_id: Option<&str>,
    ) -> Result<RecoveryPlan> {
        let backup = match backup_id {
            Some(id) => self.catalog.load(id).await?,
            None => self
                .catalog
                .latest_successful_full()
                .await?
                .ok_or(RecoveryError::NoBackup)?,
        };

        let store_list = if stores.is_empty() {
            StoreKind::ALL.to_vec()
        } else {
            stores
        };

        let restore = RecoveryStep::new(
            "restore-databases",
            "Restore the selected stores",
            StepCategory::Database,
            15 * 60,
            StepAction::RestoreBackups {
                backup_ids: vec![backup.id.clone()],
                stores: Some(store_list),
            },
        );
        let validate = RecoveryStep::new(
            "validate",
            "Verify the restored stores",
            StepCategory::Validation,
            5 * 60,
            StepAction::Validate,
        )
        .after(&restore);

        let plan = RecoveryPlan {
            id: uuid::Uuid::new_v4(),
            kind: RecoveryPlanKind::Partial,
            target_region: target_region.to_string(),
            backup_id: Some(backup.id),
            point_in_time: None,
            steps: vec![restore, validate],
            estimated_secs: 0,
        }
        .finish();
        plan.validate()?;
        Ok(plan)
    }

    /// A point-in-time plan: the newest full at or before the target,
    /// then the incremental chain covering `(full.timestamp, target]`.
    /// Missing coverage fails here, at plan time.
    pub async fn plan_point_in_time(
        &self,
        target_region: &str,
        point_in_time: chrono::DateTime<chrono::Utc>,
    ) -> Result<RecoveryPlan> {
        let (full, incrementals) = self
            .catalog
            .chain_for_point_in_time(point_in_time)
            .await?
            .ok_or_else(|| {
                RecoveryError::NoCoverage(format!(
                    "no full backup at or before {}",
                    point_in_time.to_rfc3339()
                ))
            })?;

        let mut backup_ids = vec![full.id.clone()];
        backup_ids.extend(incrementals.iter().map(|r| r.id.clone()));

        let restore = RecoveryStep::new(
            "restore-databases",
            "Apply the full backup, then each incremental in order",
            StepCategory::Database,
            (20 + 5 * incrementals.len() as u64) * 60,
            StepAction::RestoreBackups {
                backup_ids,
                stores: None,
            },
        );
        let deploy = RecoveryStep::new(
            "deploy-applications",
            "Roll out application workloads in the target region",
            StepCategory::Application,
            10 * 60,
            StepAction::DeployApplications,
        )
        .after(&restore);
        let network = RecoveryStep::new(
            "configure-networking",
            "Point routing and DNS at the target region",
            StepCategory::Network,
            5 * 60,
            StepAction::ConfigureNetworking,
        )
        .after(&deploy);
        let validate = RecoveryStep::new(
            "validate",
            "Verify stores and endpoints at the recovered point in time",
            StepCategory::Validation,
            5 * 60,
            StepAction::Validate,
        )
        .after(&network);

        let plan = RecoveryPlan {
            id: uuid::Uuid::new_v4(),
            kind: RecoveryPlanKind::PointInTime,
            target_region: target_region.to_string(),
            backup_id: Some(full.id),
            point_in_time: Some(point_in_time),
            steps: vec![restore, deploy, network, validate],
            estimated_secs: 0,
        }
        .finish();
        plan.validate()?;
        Ok(plan)
    }
}
