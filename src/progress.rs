//! Weighted multi-step progress tracking with callbacks and a bounded
//! per-operation snapshot ring.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Pending,
    Running,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct Step {
    pub name: String,
    pub weight: f64,
}

impl Step {
    pub fn new(name: impl Into<String>, weight: f64) -> Self {
        Self {
            name: name.into(),
            weight,
        }
    }
}

struct StepState {
    step: Step,
    progress_percent: f64,
    completed: bool,
}

/// A point-in-time view of an operation's progress, appended to its
/// snapshot ring at most once per `snapshot_interval`.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub operation_id: String,
    pub step_index: usize,
    pub step_name: String,
    pub overall_percent: f64,
    pub items_processed: u64,
    pub total_items: Option<u64>,
    pub throughput_items_per_second: Option<f64>,
    pub estimated_time_remaining_seconds: Option<f64>,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

pub type ProgressCallback = Arc<dyn Fn(&ProgressSnapshot) + Send + Sync>;

struct Inner {
    current_step: usize,
    steps: Vec<StepState>,
    state: OperationState,
    items_processed: u64,
    total_items: Option<u64>,
    started_at: Instant,
    last_snapshot_at: Option<Instant>,
    snapshots: VecDeque<ProgressSnapshot>,
}

/// One tracked operation: a named sequence of weighted steps whose
/// combined completion is reported as a single percentage.
pub struct Operation {
    id: String,
    name: String,
    snapshot_interval: Duration,
    max_snapshots: usize,
    global_callback: Option<ProgressCallback>,
    operation_callback: Option<ProgressCallback>,
    inner: Mutex<Inner>,
}

impl Operation {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        steps: Vec<Step>,
        total_items: Option<u64>,
        snapshot_interval: Duration,
        max_snapshots: usize,
    ) -> Self {
        let step_states = steps
            .into_iter()
            .map(|step| StepState {
                step,
                progress_percent: 0.0,
                completed: false,
            })
            .collect();

        Self {
            id: id.into(),
            name: name.into(),
            snapshot_interval,
            max_snapshots,
            global_callback: None,
            operation_callback: None,
            inner: Mutex::new(Inner {
                current_step: 0,
                steps: step_states,
                state: OperationState::Pending,
                items_processed: 0,
                total_items,
                started_at: Instant::now(),
                last_snapshot_at: None,
                snapshots: VecDeque::new(),
            }),
        }
    }

    pub fn with_callbacks(
        mut self,
        global_callback: Option<ProgressCallback>,
        operation_callback: Option<ProgressCallback>,
    ) -> Self {
        self.global_callback = global_callback;
        self.operation_callback = operation_callback;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn overall_percent_locked(inner: &Inner) -> f64 {
        let total_weight: f64 = inner.steps.iter().map(|s| s.step.weight).sum();
        if total_weight <= 0.0 {
            return 0.0;
        }
        let completed_weight: f64 = inner
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| {
                if s.completed {
                    s.step.weight
                } else if i == inner.current_step {
                    s.step.weight * (s.progress_percent / 100.0)
                } else {
                    0.0
                }
            })
            .sum();
        (completed_weight / total_weight) * 100.0
    }

    /// Update the current step's progress and/or items processed, fire
    /// the callbacks, and append a snapshot if `snapshot_interval` has
    /// elapsed since the last one.
    pub async fn update_progress(
        &self,
        items_processed: Option<u64>,
        step_percent: Option<f64>,
        message: Option<String>,
    ) {
        let mut inner = self.inner.lock().await;
        if inner.state == OperationState::Cancelled {
            return;
        }
        if inner.state == OperationState::Pending {
            inner.state = OperationState::Running;
        }
        if let Some(items) = items_processed {
            inner.items_processed = items;
        }
        if let Some(pct) = step_percent {
            let idx = inner.current_step;
            if let Some(step) = inner.steps.get_mut(idx) {
                step.progress_percent = pct.clamp(0.0, 100.0);
            }
        }

        self.emit(&mut inner, message).await;
    }

    /// Mark the current step complete and move to the next one, firing
    /// the callbacks. A no-op past the last step.
    pub async fn advance_step(&self, message: Option<String>) {
        let mut inner = self.inner.lock().await;
        if inner.state == OperationState::Cancelled {
            return;
        }
        let idx = inner.current_step;
        if let Some(step) = inner.steps.get_mut(idx) {
            step.completed = true;
            step.progress_percent = 100.0;
        }
        if inner.current_step + 1 < inner.steps.len() {
            inner.current_step += 1;
        }

        self.emit(&mut inner, message).await;
    }

    /// Irreversibly transition to `cancelled`, firing one last callback.
    pub async fn cancel(&self, message: Option<String>) {
        let mut inner = self.inner.lock().await;
        if inner.state == OperationState::Cancelled {
            return;
        }
        inner.state = OperationState::Cancelled;
        self.emit(&mut inner, message).await;
    }

    pub async fn complete(&self, message: Option<String>) {
        let mut inner = self.inner.lock().await;
        for step in &mut inner.steps {
            step.completed = true;
            step.progress_percent = 100.0;
        }
        inner.state = OperationState::Completed;
        self.emit(&mut inner, message).await;
    }

    async fn emit(&self, inner: &mut Inner, message: Option<String>) {
        let should_snapshot = match inner.last_snapshot_at {
            None => true,
            Some(t) => t.elapsed() >= self.snapshot_interval,
        };
        let force = matches!(inner.state, OperationState::Completed | OperationState::Cancelled);

        if !should_snapshot && !force {
            return;
        }

        let elapsed = inner.started_at.elapsed().as_secs_f64();
        let throughput = if elapsed > 0.0 && inner.items_processed > 0 {
            Some(inner.items_processed as f64 / elapsed)
        } else {
            None
        };
        let eta = match (throughput, inner.total_items) {
            (Some(tput), Some(total)) if tput > 0.0 && total as u64 >= inner.items_processed => {
                Some((total - inner.items_processed) as f64 / tput)
            }
            _ => None,
        };

        let step_index = inner.current_step;
        let step_name = inner
            .steps
            .get(step_index)
            .map(|s| s.step.name.clone())
            .unwrap_or_default();

        let snapshot = ProgressSnapshot {
            operation_id: self.id.clone(),
            step_index,
            step_name,
            overall_percent: Self::overall_percent_locked(inner),
            items_processed: inner.items_processed,
            total_items: inner.total_items,
            throughput_items_per_second: throughput,
            estimated_time_remaining_seconds: eta,
            message,
            timestamp: Utc::now(),
        };

        if let Some(cb) = &self.global_callback {
            cb(&snapshot);
        }
        if let Some(cb) = &self.operation_callback {
            cb(&snapshot);
        }

        inner.snapshots.push_back(snapshot);
        while inner.snapshots.len() > self.max_snapshots {
            inner.snapshots.pop_front();
        }
        inner.last_snapshot_at = Some(Instant::now());
    }

    pub async fn overall_percent(&self) -> f64 {
        let inner = self.inner.lock().await;
        Self::overall_percent_locked(&inner)
    }

    pub async fn state(&self) -> OperationState {
        self.inner.lock().await.state
    }

    pub async fn snapshots(&self) -> Vec<ProgressSnapshot> {
        self.inner.lock().await.snapshots.iter().cloned().collect()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn op(steps: Vec<(&str, f64)>) -> Operation {
        Operation::new(
            "op1",
            "test operation",
            steps.into_iter().map(|(n, w)| Step::new(n, w)).collect(),
            Some(100),
            Duration::from_millis(0),
            10,
        )
    }

    #[tokio::test]
    async fn test_overall_percent_weighted_across_steps() {
        let operation = op(vec![("scan", 1.0), ("apply", 3.0)]);
        operation.update_progress(None, Some(100.0), None).await;
        // first step fully done, weight 1/4 => 25%
        assert!((operation.overall_percent().await - 25.0).abs() < 0.001);

        operation.advance_step(None).await;
        operation.update_progress(None, Some(50.0), None).await;
        // first step (25%) + half of second step's 75% => 25 + 37.5 = 62.5
        assert!((operation.overall_percent().await - 62.5).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_cancel_is_irreversible() {
        let operation = op(vec![("only", 1.0)]);
        operation.cancel(Some("stopped".to_string())).await;
        assert_eq!(operation.state().await, OperationState::Cancelled);

        operation.update_progress(Some(50), None, None).await;
        assert_eq!(operation.state().await, OperationState::Cancelled);
    }

    #[tokio::test]
    async fn test_snapshots_bounded_by_max() {
        let operation = Operation::new(
            "op2",
            "bounded",
            vec![Step::new("only", 1.0)],
            Some(10),
            Duration::from_millis(0),
            3,
        );
        for i in 0..10u64 {
            operation.update_progress(Some(i), None, None).await;
        }
        assert!(operation.snapshots().await.len() <= 3);
    }

    #[tokio::test]
    async fn test_callbacks_fire_on_update() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let operation = Operation::new(
            "op3",
            "callback test",
            vec![Step::new("only", 1.0)],
            None,
            Duration::from_millis(0),
            5,
        )
        .with_callbacks(
            Some(Arc::new(move |_snap: &ProgressSnapshot| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            })),
            None,
        );

        operation.update_progress(Some(1), None, None).await;
        operation.advance_step(None).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_eta_none_until_progress_made() {
        let operation = op(vec![("only", 1.0)]);
        let snapshot = {
            operation.update_progress(Some(0), Some(0.0), None).await;
            operation.snapshots().await.into_iter().last().unwrap()
        };
        assert_eq!(snapshot.throughput_items_per_second, None);
        assert_eq!(snapshot.estimated_time_remaining_seconds, None);
    }
}
