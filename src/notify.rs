use futures::future::BoxFuture;
use tracing::{info, warn};

use crate::regression::{RegressionAlert, Severity};

/// Delivery channel for regression alerts. Delivery failures are the
/// notifier's concern and never fail the analysis that produced the alert.
pub trait Notifier: Send + Sync {
    fn notify<'a>(&'a self, alert: &'a RegressionAlert, message: &'a str) -> BoxFuture<'a, ()>;
}

/// Writes alerts to the tracing log.
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify<'a>(&'a self, alert: &'a RegressionAlert, message: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            match alert.severity {
                Severity::Critical | Severity::High => warn!(
                    scenario = %alert.scenario_id,
                    metric = %alert.metric,
                    severity = ?alert.severity,
                    "{}",
                    message
                ),
                Severity::Medium | Severity::Low => info!(
                    scenario = %alert.scenario_id,
                    metric = %alert.metric,
                    severity = ?alert.severity,
                    "{}",
                    message
                ),
            }
        })
    }
}

pub fn format_alert(alert: &RegressionAlert) -> String {
    format!(
        "[{:?}] {}: {}",
        alert.severity, alert.scenario_id, alert.message
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regression::AlertKind;

    fn alert(severity: Severity) -> RegressionAlert {
        RegressionAlert {
            id: "a1".to_string(),
            scenario_id: "checkout".to_string(),
            metric: "responseTime.p95".to_string(),
            kind: AlertKind::Regression,
            severity,
            degradation_pct: 60.0,
            baseline_value: 100.0,
            current_value: 160.0,
            confidence: 0.95,
            trend: None,
            recommended_actions: Vec::new(),
            message: "p95 up 60%".to_string(),
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_format_alert() {
        assert_eq!(
            format_alert(&alert(Severity::Critical)),
            "[Critical] checkout: p95 up 60%"
        );
    }

    #[tokio::test]
    async fn test_tracing_notifier_accepts_every_severity() {
        for severity in [Severity::Low, Severity::Medium, Severity::High, Severity::Critical] {
            let a = alert(severity);
            TracingNotifier.notify(&a, &format_alert(&a)).await;
        }
    }
}
