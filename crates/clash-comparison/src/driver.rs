//! Runs one operation through both clients in a configured order and
//! measures each call

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use clash_client::{ClientError, ClientKind, ClientResult};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::compare::{compare_outputs, CompareOptions, ComparisonResult};
use crate::config::{ComparisonConfig, OrderingPolicy};

/// Outcome of one client's call
#[derive(Debug)]
pub enum Slot<T> {
    /// The client is switched off; nothing was called
    Disabled,
    Completed {
        started: Instant,
        elapsed: Duration,
        value: T,
    },
    Failed {
        started: Instant,
        elapsed: Duration,
        error: ClientError,
    },
}

impl<T> Slot<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Slot::Completed { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Slot::Completed { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ClientError> {
        match self {
            Slot::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn started(&self) -> Option<Instant> {
        match self {
            Slot::Disabled => None,
            Slot::Completed { started, .. } | Slot::Failed { started, .. } => Some(*started),
        }
    }

    pub fn elapsed(&self) -> Option<Duration> {
        match self {
            Slot::Disabled => None,
            Slot::Completed { elapsed, .. } | Slot::Failed { elapsed, .. } => Some(*elapsed),
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, Slot::Disabled)
    }

    pub fn summary(&self) -> SlotSummary {
        match self {
            Slot::Disabled => SlotSummary::Disabled,
            Slot::Completed { elapsed, .. } => SlotSummary::Completed(*elapsed),
            Slot::Failed { elapsed, error, .. } => SlotSummary::Failed {
                elapsed: *elapsed,
                error: error.to_string(),
            },
        }
    }
}

/// A slot without its value, kept for the end-of-run summary
#[derive(Debug, Clone, PartialEq)]
pub enum SlotSummary {
    Disabled,
    Completed(Duration),
    Failed { elapsed: Duration, error: String },
}

impl fmt::Display for SlotSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotSummary::Disabled => write!(f, "-"),
            SlotSummary::Completed(elapsed) => write!(f, "{}ms", elapsed.as_millis()),
            SlotSummary::Failed { elapsed, .. } => write!(f, "FAILED ({}ms)", elapsed.as_millis()),
        }
    }
}

/// Both slots of one operation
#[derive(Debug)]
pub struct DualMeasurement<T> {
    pub operation: String,
    pub rc: Slot<T>,
    pub wsg: Slot<T>,
    /// Present when both clients completed and outputs were compared
    pub comparison: Option<ComparisonResult>,
}

impl<T> DualMeasurement<T> {
    /// The RC value, or the WSG value when RC produced none
    pub fn preferred(&self) -> Option<&T> {
        self.rc.value().or_else(|| self.wsg.value())
    }

    pub fn into_preferred(self) -> Option<T> {
        let DualMeasurement { rc, wsg, .. } = self;
        rc.into_value().or_else(|| wsg.into_value())
    }

    /// Values of every completed slot
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.rc.value().into_iter().chain(self.wsg.value())
    }

    pub fn passed(&self) -> Option<bool> {
        self.comparison.as_ref().map(|c| c.passed)
    }

    /// Error of whichever failed client ran first
    pub fn into_first_error(self) -> Option<ClientError> {
        let DualMeasurement { rc, wsg, .. } = self;
        let mut failed: Vec<(Instant, ClientError)> = [rc, wsg]
            .into_iter()
            .filter_map(|slot| match slot {
                Slot::Failed { started, error, .. } => Some((started, error)),
                _ => None,
            })
            .collect();
        failed.sort_by_key(|(started, _)| *started);
        failed.into_iter().next().map(|(_, error)| error)
    }
}

/// Executes operations against the enabled clients in policy order
#[derive(Debug, Clone)]
pub struct Driver {
    policy: OrderingPolicy,
    call_rc: bool,
    call_wsg: bool,
    context_id: String,
    options: CompareOptions,
}

impl Driver {
    pub fn new(policy: OrderingPolicy, call_rc: bool, call_wsg: bool, context_id: &str) -> Self {
        Self {
            policy,
            call_rc,
            call_wsg,
            context_id: context_id.to_string(),
            options: CompareOptions::new(),
        }
    }

    pub fn from_config(config: &ComparisonConfig) -> Self {
        Self::new(config.policy, config.call_rc, config.call_wsg, &config.itwin_id)
    }

    pub fn with_compare_options(mut self, options: CompareOptions) -> Self {
        self.options = options;
        self
    }

    pub fn is_enabled(&self, kind: ClientKind) -> bool {
        match kind {
            ClientKind::Rc => self.call_rc,
            ClientKind::Wsg => self.call_wsg,
        }
    }

    /// Enabled clients in the order they are called
    pub fn order(&self) -> Vec<ClientKind> {
        let order = match self.policy {
            OrderingPolicy::WsgFirst => [ClientKind::Wsg, ClientKind::Rc],
            OrderingPolicy::RcFirst | OrderingPolicy::Independent => {
                [ClientKind::Rc, ClientKind::Wsg]
            }
        };
        order
            .into_iter()
            .filter(|kind| self.is_enabled(*kind))
            .collect()
    }

    /// Measure both clients and diff their outputs when both completed
    pub async fn execute<T, R, RF, W, WF>(&self, operation: &str, rc: R, wsg: W) -> DualMeasurement<T>
    where
        T: Serialize,
        R: FnOnce() -> RF,
        RF: Future<Output = ClientResult<T>>,
        W: FnOnce() -> WF,
        WF: Future<Output = ClientResult<T>>,
    {
        let mut measurement = self.measure(operation, rc, wsg).await;
        if let (Some(rc), Some(wsg)) = (measurement.rc.value(), measurement.wsg.value()) {
            measurement.comparison = self.compare(operation, rc, wsg);
        }
        measurement
    }

    /// Measure both clients without comparing outputs
    ///
    /// For operations whose outputs are expected to differ, such as new ids.
    pub async fn measure<T, R, RF, W, WF>(&self, operation: &str, rc: R, wsg: W) -> DualMeasurement<T>
    where
        R: FnOnce() -> RF,
        RF: Future<Output = ClientResult<T>>,
        W: FnOnce() -> WF,
        WF: Future<Output = ClientResult<T>>,
    {
        let mut rc = Some(rc);
        let mut wsg = Some(wsg);
        let mut rc_slot = Slot::Disabled;
        let mut wsg_slot = Slot::Disabled;

        for kind in self.order() {
            match kind {
                ClientKind::Rc => {
                    if let Some(call) = rc.take() {
                        rc_slot = self.run(operation, kind, call).await;
                    }
                }
                ClientKind::Wsg => {
                    if let Some(call) = wsg.take() {
                        wsg_slot = self.run(operation, kind, call).await;
                    }
                }
            }
        }

        DualMeasurement {
            operation: operation.to_string(),
            rc: rc_slot,
            wsg: wsg_slot,
            comparison: None,
        }
    }

    /// Measure a single client call, logged like the dual ones
    pub async fn run<T, F, Fut>(&self, operation: &str, kind: ClientKind, call: F) -> Slot<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ClientResult<T>>,
    {
        let started = Instant::now();
        let outcome = call().await;
        let elapsed = started.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;

        match outcome {
            Ok(value) => {
                info!(
                    operation,
                    client = %kind,
                    elapsed_ms,
                    "{} - {}: {}ms",
                    operation,
                    kind,
                    elapsed_ms
                );
                Slot::Completed {
                    started,
                    elapsed,
                    value,
                }
            }
            Err(error) => {
                warn!(
                    operation,
                    client = %kind,
                    context_id = %self.context_id,
                    elapsed_ms,
                    error = %error,
                    "{} - {} failed",
                    operation,
                    kind
                );
                Slot::Failed {
                    started,
                    elapsed,
                    error,
                }
            }
        }
    }

    fn compare<T: Serialize>(&self, operation: &str, rc: &T, wsg: &T) -> Option<ComparisonResult> {
        let (rc, wsg) = match (serde_json::to_value(rc), serde_json::to_value(wsg)) {
            (Ok(rc), Ok(wsg)) => (rc, wsg),
            (Err(e), _) | (_, Err(e)) => {
                warn!(operation, error = %e, "Could not serialize outputs for comparison");
                return None;
            }
        };

        let result = compare_outputs(operation, &rc, &wsg, &self.options);
        if result.passed {
            debug!(operation, "Outputs match");
        } else {
            warn!(
                operation,
                differences = result.differences.len(),
                "Outputs differ"
            );
            for diff in &result.differences {
                debug!(
                    operation,
                    category = %diff.category,
                    path = %diff.path,
                    rc = %diff.rc_value,
                    wsg = %diff.wsg_value,
                    "Difference"
                );
            }
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> Arc<Mutex<Vec<ClientKind>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    async fn record(
        calls: &Arc<Mutex<Vec<ClientKind>>>,
        kind: ClientKind,
        result: ClientResult<u32>,
    ) -> ClientResult<u32> {
        calls.lock().unwrap().push(kind);
        result
    }

    #[tokio::test]
    async fn test_policy_order() {
        for (policy, expected) in [
            (OrderingPolicy::RcFirst, vec![ClientKind::Rc, ClientKind::Wsg]),
            (OrderingPolicy::WsgFirst, vec![ClientKind::Wsg, ClientKind::Rc]),
            (OrderingPolicy::Independent, vec![ClientKind::Rc, ClientKind::Wsg]),
        ] {
            let calls = recorder();
            let driver = Driver::new(policy, true, true, "ctx");
            let measurement = driver
                .execute(
                    "op",
                    || record(&calls, ClientKind::Rc, Ok(1)),
                    || record(&calls, ClientKind::Wsg, Ok(1)),
                )
                .await;

            assert_eq!(*calls.lock().unwrap(), expected, "{:?}", policy);
            assert_eq!(measurement.passed(), Some(true));
        }
    }

    #[tokio::test]
    async fn test_disabled_client_is_never_called() {
        let calls = recorder();
        let driver = Driver::new(OrderingPolicy::WsgFirst, true, false, "ctx");
        let measurement = driver
            .execute(
                "op",
                || record(&calls, ClientKind::Rc, Ok(7)),
                || record(&calls, ClientKind::Wsg, Ok(8)),
            )
            .await;

        assert_eq!(*calls.lock().unwrap(), vec![ClientKind::Rc]);
        assert!(measurement.wsg.is_disabled());
        assert_eq!(measurement.preferred(), Some(&7));
        assert!(measurement.comparison.is_none());
    }

    #[tokio::test]
    async fn test_first_failure_does_not_stop_second() {
        let calls = recorder();
        let driver = Driver::new(OrderingPolicy::RcFirst, true, true, "ctx");
        let measurement = driver
            .execute(
                "op",
                || record(&calls, ClientKind::Rc, Err(ClientError::no_data("op"))),
                || record(&calls, ClientKind::Wsg, Ok(3)),
            )
            .await;

        assert_eq!(calls.lock().unwrap().len(), 2);
        assert!(measurement.rc.error().is_some());
        assert_eq!(measurement.preferred(), Some(&3));
        assert!(measurement.comparison.is_none());
        assert!(matches!(
            measurement.into_first_error(),
            Some(ClientError::NoData { .. })
        ));
    }

    #[tokio::test]
    async fn test_mismatch_is_reported() {
        let driver = Driver::new(OrderingPolicy::Independent, true, true, "ctx");
        let measurement = driver
            .execute(
                "op",
                || async { Ok::<_, ClientError>(1u32) },
                || async { Ok::<_, ClientError>(2u32) },
            )
            .await;
        let comparison = measurement.comparison.unwrap();
        assert!(!comparison.passed);
        assert_eq!(comparison.differences.len(), 1);
    }

    #[tokio::test]
    async fn test_compare_options_apply_to_outputs() {
        let created = |id: &str| serde_json::json!([{"id": id, "name": "copy"}]);
        let driver = Driver::new(OrderingPolicy::RcFirst, true, true, "ctx");

        let strict = driver
            .execute(
                "copy",
                || async { Ok::<_, ClientError>(created("rc-1")) },
                || async { Ok::<_, ClientError>(created("wsg-1")) },
            )
            .await;
        assert_eq!(strict.passed(), Some(false));

        let driver = driver.with_compare_options(CompareOptions::new().ignore_field("id"));
        let relaxed = driver
            .execute(
                "copy",
                || async { Ok::<_, ClientError>(created("rc-1")) },
                || async { Ok::<_, ClientError>(created("wsg-1")) },
            )
            .await;
        assert_eq!(relaxed.passed(), Some(true));
    }

    #[test]
    fn test_slot_summary_display() {
        assert_eq!(SlotSummary::Disabled.to_string(), "-");
        assert_eq!(
            SlotSummary::Completed(Duration::from_millis(42)).to_string(),
            "42ms"
        );
    }
}
