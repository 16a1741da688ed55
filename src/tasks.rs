use std::collections::HashSet;

use log::{debug, info, warn};
use serde_json::Value;

use crate::api::{ApiRoutes, Task, TaskActionResponse, TaskCategory};
use crate::network_client::{Executor, NetworkError};
use crate::session::NetworkContext;

/// What one reconciliation pass over a category did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub available: bool,
    pub completed: usize,
    pub claimed: usize,
    pub rewards: f64,
}

/// Runs fetch → complete → re-fetch → claim for one task category.
///
/// Completing a task does not mark it claimable atomically on the server, so claim
/// eligibility is read from the list fetched after the completion phase. Only tasks
/// that were already completed before this pass, or that this pass completed, are
/// ever claimed.
pub struct TaskReconciler<'a> {
    executor: &'a Executor,
    routes: &'a ApiRoutes,
    excluded_ids: &'a [i64],
}

impl<'a> TaskReconciler<'a> {
    pub fn new(executor: &'a Executor, routes: &'a ApiRoutes, excluded_ids: &'a [i64]) -> Self {
        Self { executor, routes, excluded_ids }
    }

    /// Safe to call on every pass. Only fatal client errors on the list fetch escape;
    /// failures of individual task mutations are logged and skipped.
    pub async fn reconcile(&self, ctx: &NetworkContext, category: TaskCategory) -> Result<ReconcileReport, NetworkError> {
        let mut report = ReconcileReport::default();
        info!("[{}] Fetching {} tasks...", ctx.account(), category);

        let Some(snapshot) = self.fetch(ctx, category).await? else {
            warn!("[{}] {} tasks not available this pass", ctx.account(), category);
            return Ok(report);
        };
        report.available = true;

        let mut claimable: HashSet<i64> = HashSet::new();
        for task in snapshot.iter().filter(|t| !self.is_excluded(t)) {
            if task.is_completed || task.claimed() {
                claimable.insert(task.task_id);
                debug!(
                    "[{}] {} task already completed: {} (ID: {})",
                    ctx.account(),
                    category,
                    task.title(),
                    task.task_id
                );
                continue;
            }
            info!("[{}] Completing {} task: {} (ID: {})", ctx.account(), category, task.title(), task.task_id);
            match self.executor.execute(ctx, &self.routes.complete_task(task.task_id)).await.into_payload() {
                Ok(Some(payload)) => {
                    report.completed += 1;
                    claimable.insert(task.task_id);
                    let response: TaskActionResponse = serde_json::from_value(payload).unwrap_or_default();
                    info!("[{}] {}", ctx.account(), response.message.as_deref().unwrap_or("Task completed"));
                }
                Ok(None) => info!("[{}] No completion confirmation for task {}", ctx.account(), task.task_id),
                Err(e) => warn!(
                    "[{}] Completing task {} failed, moving on: {}",
                    ctx.account(),
                    task.task_id,
                    e
                ),
            }
        }

        // The pre-completion snapshot is stale by now.
        let Some(reconciled) = self.fetch(ctx, category).await? else {
            warn!("[{}] {} tasks unavailable after completion, claims deferred", ctx.account(), category);
            return Ok(report);
        };

        for task in reconciled.iter().filter(|t| !self.is_excluded(t)) {
            if !task.is_completed || task.claimed() {
                continue;
            }
            if !claimable.contains(&task.task_id) {
                warn!(
                    "[{}] {} task {} turned completed without this pass completing it, not claiming",
                    ctx.account(),
                    category,
                    task.task_id
                );
                continue;
            }
            info!(
                "[{}] Claiming reward for {} task: {} (ID: {})",
                ctx.account(),
                category,
                task.title(),
                task.task_id
            );
            match self.executor.execute(ctx, &self.routes.claim_task(task.task_id)).await.into_payload() {
                Ok(Some(payload)) => {
                    report.claimed += 1;
                    let response: TaskActionResponse = serde_json::from_value(payload).unwrap_or_default();
                    let reward = response.reward_tokens.unwrap_or(0.0);
                    report.rewards += reward;
                    info!(
                        "[{}] {} Reward received: {}",
                        ctx.account(),
                        response.message.as_deref().unwrap_or("Task claimed."),
                        reward
                    );
                }
                Ok(None) => info!("[{}] Nothing to claim for task {}", ctx.account(), task.task_id),
                Err(e) => warn!("[{}] Claiming task {} failed, moving on: {}", ctx.account(), task.task_id, e),
            }
        }

        info!(
            "[{}] {} tasks: {} completed, {} claimed, {} tokens",
            ctx.account(),
            category,
            report.completed,
            report.claimed,
            report.rewards
        );
        Ok(report)
    }

    fn is_excluded(&self, task: &Task) -> bool {
        self.excluded_ids.contains(&task.task_id)
    }

    async fn fetch(&self, ctx: &NetworkContext, category: TaskCategory) -> Result<Option<Vec<Task>>, NetworkError> {
        let payload = self.executor.execute(ctx, &self.routes.list_tasks(category)).await.into_payload()?;
        Ok(payload.and_then(|value| parse_task_list(ctx.account(), value)))
    }
}

/// `None` unless the payload is a JSON array. Elements that do not look like tasks are dropped.
pub fn parse_task_list(account: &str, value: Value) -> Option<Vec<Task>> {
    let Value::Array(items) = value else {
        return None;
    };
    let tasks = items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<Task>(item) {
            Ok(task) => Some(task),
            Err(e) => {
                warn!("[{}] Skipping malformed task entry: {}", account, e);
                None
            }
        })
        .collect();
    Some(tasks)
}
