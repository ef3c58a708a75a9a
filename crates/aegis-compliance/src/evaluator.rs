//! Compliance requirements and their evaluation.

use serde::{Deserialize, Serialize};

use aegis_core::config::AegisConfig;

/// Compliance standards the requirements map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Standard {
    /// EU General Data Protection Regulation.
    #[serde(rename = "GDPR")]
    Gdpr,
    /// SOC 2.
    #[serde(rename = "SOC2")]
    Soc2,
    /// ISO/IEC 27001.
    #[serde(rename = "ISO27001")]
    Iso27001,
    /// HIPAA.
    #[serde(rename = "HIPAA")]
    Hipaa,
    /// PCI-DSS.
    #[serde(rename = "PCI-DSS")]
    PciDss,
}

impl Standard {
    /// All standards in report order.
    pub const ALL: [Standard; 5] = [
        Standard::Gdpr,
        Standard::Soc2,
        Standard::Iso27001,
        Standard::Hipaa,
        Standard::PciDss,
    ];

    /// Display name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Standard::Gdpr => "GDPR",
            Standard::Soc2 => "SOC2",
            Standard::Iso27001 => "ISO27001",
            Standard::Hipaa => "HIPAA",
            Standard::PciDss => "PCI-DSS",
        }
    }
}

impl std::fmt::Display for Standard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requirement severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Non-compliance blocks certification.
    Critical,
    /// Must be remediated promptly.
    High,
    /// Should be remediated.
    Medium,
    /// Advisory.
    Low,
}

/// Evaluation outcome for one requirement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementResult {
    /// Requirement name.
    pub name: String,
    /// Standard the requirement maps to.
    pub standard: Standard,
    /// Severity when failed.
    pub severity: Severity,
    /// Whether the configuration satisfies the requirement.
    pub passed: bool,
    /// What was evaluated.
    pub details: String,
    /// Remediation guidance when failed.
    pub recommendations: Vec<String>,
}

/// Full evaluation result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceReport {
    /// When the evaluation ran.
    pub generated_at: chrono::DateTime<chrono::Utc>,
    /// True when every requirement passed.
    pub compliant: bool,
    /// Per-requirement outcomes.
    pub requirements: Vec<RequirementResult>,
}

impl ComplianceReport {
    /// Passed/total counts for one standard.
    pub fn by_standard(&self, standard: Standard) -> (usize, usize) {
        let of_standard: Vec<_> = self
            .requirements
            .iter()
            .filter(|r| r.standard == standard)
            .collect();
        let passed = of_standard.iter().filter(|r| r.passed).count();
        (passed, of_standard.len())
    }
}

/// Evaluate every requirement against the configuration.
pub fn evaluate(config: &AegisConfig) -> ComplianceReport {
    let dr = &config.disaster_recovery;
    let mut requirements = Vec::new();

    let encryption = dr.backup.encryption.enabled;
    requirements.push(RequirementResult {
        name: "Backups encrypted at rest".to_string(),
        standard: Standard::Gdpr,
        severity: Severity::Critical,
        passed: encryption,
        details: format!("backup.encryption.enabled = {}", encryption),
        recommendations: if encryption {
            Vec::new()
        } else {
            vec![
                "Enable disasterRecovery.backup.encryption and reference a managed KMS key"
                    .to_string(),
            ]
        },
    });

    let retention = dr.backup.retention;
    let retention_ok = retention.daily > 0 && retention.weekly > 0 && retention.monthly > 0;
    requirements.push(RequirementResult {
        name: "Backup retention tiers populated".to_string(),
        standard: Standard::Soc2,
        severity: Severity::High,
        passed: retention_ok,
        details: format!(
            "retention daily={} weekly={} monthly={}",
            retention.daily, retention.weekly, retention.monthly
        ),
        recommendations: if retention_ok {
            Vec::new()
        } else {
            vec!["Set non-zero daily, weekly, and monthly retention counts".to_string()]
        },
    });

    let replication_ok =
        dr.replication.enabled && !dr.replication.regions.is_empty();
    requirements.push(RequirementResult {
        name: "Multi-region replication enabled".to_string(),
        standard: Standard::Iso27001,
        severity: Severity::Critical,
        passed: replication_ok,
        details: format!(
            "replication enabled={} regions={}",
            dr.replication.enabled,
            dr.replication.regions.len()
        ),
        recommendations: if replication_ok {
            Vec::new()
        } else {
            vec!["Enable replication with at least one secondary region".to_string()]
        },
    });

    let objectives_ok = dr.recovery.rto <= 240 && dr.recovery.rpo <= 60;
    requirements.push(RequirementResult {
        name: "Recovery objectives within policy".to_string(),
        standard: Standard::Hipaa,
        severity: Severity::High,
        passed: objectives_ok,
        details: format!(
            "rto={}min (policy max 240), rpo={}min (policy max 60)",
            dr.recovery.rto, dr.recovery.rpo
        ),
        recommendations: if objectives_ok {
            Vec::new()
        } else {
            vec!["Tighten recovery.rto/recovery.rpo to policy bounds".to_string()]
        },
    });

    requirements.push(RequirementResult {
        name: "Automatic failover configured".to_string(),
        standard: Standard::Iso27001,
        severity: Severity::Medium,
        passed: dr.recovery.auto_failover,
        details: format!("recovery.autoFailover = {}", dr.recovery.auto_failover),
        recommendations: if dr.recovery.auto_failover {
            Vec::new()
        } else {
            vec!["Enable autoFailover so a confirmed-unhealthy primary promotes a secondary"
                .to_string()]
        },
    });

    let notifications_ok = dr.notifications.any_configured();
    requirements.push(RequirementResult {
        name: "Incident notification sink present".to_string(),
        standard: Standard::PciDss,
        severity: Severity::Medium,
        passed: notifications_ok,
        details: format!("notification sinks configured = {}", notifications_ok),
        recommendations: if notifications_ok {
            Vec::new()
        } else {
            vec!["Configure a webhook, Slack channel, or email recipients".to_string()]
        },
    });

    let compliant = requirements.iter().all(|r| r.passed);
    ComplianceReport {
        generated_at: chrono::Utc::now(),
        compliant,
        requirements,
    }
}
