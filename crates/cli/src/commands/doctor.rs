use serde::Serialize;
use skillrelay_core::config::{AppConfig, LoadOptions};
use skillrelay_core::SkillRegistry;
use skillrelay_db::{connect_with_settings, ping};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
pub struct DoctorCheck {
    pub name: &'static str,
    pub status: CheckStatus,
    pub details: String,
}

#[derive(Debug, Serialize)]
pub struct DoctorReport {
    pub overall_status: CheckStatus,
    pub summary: String,
    pub checks: Vec<DoctorCheck>,
}

const DEPENDENT_CHECKS: [&str; 4] =
    ["skill_registry", "correlation_secret", "inbound_auth", "database_connectivity"];

pub fn run(options: LoadOptions, json_output: bool) -> String {
    let report = build_report(options);

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

/// Warnings do not fail the report; they flag setups that only suit local development.
pub fn build_report(options: LoadOptions) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(options) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_skill_registry(&config));
            checks.push(check_correlation_secret(&config));
            checks.push(check_inbound_auth(&config));
            checks.push(check_database_connectivity(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.extend(DEPENDENT_CHECKS.into_iter().map(|name| DoctorCheck {
                name,
                status: CheckStatus::Skipped,
                details: "skipped because configuration did not load".to_string(),
            }));
        }
    }

    let failed = checks.iter().any(|check| {
        matches!(check.status, CheckStatus::Fail | CheckStatus::Skipped)
    });
    let overall_status = if failed { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if failed {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_skill_registry(config: &AppConfig) -> DoctorCheck {
    match SkillRegistry::from_config(&config.skills) {
        Ok(registry) if registry.is_empty() => DoctorCheck {
            name: "skill_registry",
            status: CheckStatus::Warn,
            details: "no skills configured; every turn is handled by the root".to_string(),
        },
        Ok(registry) => DoctorCheck {
            name: "skill_registry",
            status: CheckStatus::Pass,
            details: format!("{} skill(s) registered", registry.len()),
        },
        Err(error) => DoctorCheck {
            name: "skill_registry",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

fn check_correlation_secret(config: &AppConfig) -> DoctorCheck {
    if config.correlation.secret.is_some() {
        return DoctorCheck {
            name: "correlation_secret",
            status: CheckStatus::Pass,
            details: "routing keys are stable across restarts".to_string(),
        };
    }
    DoctorCheck {
        name: "correlation_secret",
        status: CheckStatus::Warn,
        details: "correlation.secret unset; skills lose their routing keys on restart".to_string(),
    }
}

fn check_inbound_auth(config: &AppConfig) -> DoctorCheck {
    if config.auth.allowed_callers.is_empty() {
        return DoctorCheck {
            name: "inbound_auth",
            status: CheckStatus::Warn,
            details: "auth.allowed_callers is empty; inbound calls are not authenticated"
                .to_string(),
        };
    }
    DoctorCheck {
        name: "inbound_auth",
        status: CheckStatus::Pass,
        details: format!("{} caller(s) allowed", config.auth.allowed_callers.len()),
    }
}

fn check_database_connectivity(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| format!("failed to connect to database: {error}"))?;
        let reachable = ping(&pool).await.map_err(|error| format!("database query failed: {error}"));
        pool.close().await;
        reachable
    });

    match result {
        Ok(()) => DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`", config.database.url),
        },
        Err(error) => {
            DoctorCheck { name: "database_connectivity", status: CheckStatus::Fail, details: error }
        }
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
