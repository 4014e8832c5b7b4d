use std::fmt;

use folder_kernel_store_sqlite::{IntegrityReport, MigrationStatus, SafetyCheck, VerificationReport};
use serde::{Deserialize, Serialize};

use crate::scheduler::BackupStats;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

impl HealthStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checked_at: String,
    pub integrity: Option<IntegrityReport>,
    pub backups: Option<VerificationReport>,
    pub migration: Option<MigrationStatus>,
    pub backup_stats: BackupStats,
    pub issues: Vec<String>,
}

impl HealthReport {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Raw probe results gathered by the kernel. A probe that could not run is
/// carried as its error text.
#[derive(Debug)]
pub(crate) struct Probes {
    pub integrity: Result<IntegrityReport, String>,
    pub backups: Result<VerificationReport, String>,
    pub migration: Result<MigrationStatus, String>,
    pub safety: SafetyCheck,
    pub backup_stats: BackupStats,
}

pub(crate) fn assess(probes: Probes) -> HealthReport {
    let mut issues = Vec::new();

    let integrity = match probes.integrity {
        Ok(report) => {
            if !report.quick_check_ok {
                issues.push(format!("store integrity check failed: {}", report.quick_check_message));
            }
            if report.foreign_key_violations > 0 {
                issues.push(format!("{} foreign key violations", report.foreign_key_violations));
            }
            if !report.schema_status.pending_versions.is_empty() {
                issues.push(format!(
                    "schema at version {} of {}",
                    report.schema_status.current_version, report.schema_status.target_version
                ));
            }
            Some(report)
        }
        Err(err) => {
            issues.push(format!("integrity check unavailable: {err}"));
            None
        }
    };

    let backups = match probes.backups {
        Ok(report) => {
            if !report.is_clean() {
                issues.push(format!("{} of {} backups failed verification", report.invalid, report.total));
            }
            Some(report)
        }
        Err(err) => {
            issues.push(format!("backup verification unavailable: {err}"));
            None
        }
    };

    let migration = match probes.migration {
        Ok(status) => Some(status),
        Err(err) => {
            issues.push(format!("migration status unavailable: {err}"));
            None
        }
    };
    if probes.safety.safe {
        issues.push(format!(
            "legacy migration pending ({} legacy keys present)",
            probes.safety.present_keys.len()
        ));
    }

    let status = if issues.is_empty() { HealthStatus::Healthy } else { HealthStatus::Degraded };
    HealthReport {
        status,
        checked_at: folder_kernel_core::now_rfc3339(),
        integrity,
        backups,
        migration,
        backup_stats: probes.backup_stats,
        issues,
    }
}

#[cfg(test)]
mod tests {
    use folder_kernel_store_sqlite::{BackupIssue, SchemaStatus, LATEST_SCHEMA_VERSION};

    use super::*;

    fn clean() -> Probes {
        Probes {
            integrity: Ok(IntegrityReport {
                quick_check_ok: true,
                quick_check_message: "ok".to_string(),
                foreign_key_violations: 0,
                schema_status: SchemaStatus {
                    current_version: LATEST_SCHEMA_VERSION,
                    target_version: LATEST_SCHEMA_VERSION,
                    pending_versions: Vec::new(),
                },
            }),
            backups: Ok(VerificationReport::default()),
            migration: Ok(MigrationStatus {
                is_complete: false,
                validated_keys: Vec::new(),
                pending_keys: Vec::new(),
            }),
            safety: SafetyCheck {
                safe: false,
                reason: Some("no legacy data found to migrate".to_string()),
                present_keys: Vec::new(),
                already_complete: false,
            },
            backup_stats: BackupStats::default(),
        }
    }

    #[test]
    fn clean_probes_are_healthy() {
        let report = assess(clean());
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn each_failing_probe_degrades_with_an_issue() {
        let mut probes = clean();
        probes.backups = Ok(VerificationReport {
            total: 2,
            valid: 1,
            invalid: 1,
            issues: vec![BackupIssue { id: "2".to_string(), reason: "missing data".to_string() }],
        });
        probes.integrity = Err("record store is not initialized".to_string());
        probes.safety.safe = true;
        probes.safety.present_keys = vec!["appTitle".to_string()];

        let report = assess(probes);
        assert_eq!(report.status, HealthStatus::Degraded);
        assert!(report.integrity.is_none());
        assert_eq!(report.issues.len(), 3, "{:?}", report.issues);
        assert!(report.issues.iter().any(|issue| issue.starts_with("1 of 2 backups")));
    }
}
