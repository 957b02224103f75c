//! Running one subtask of a composite strategy: retry, timeout, recovery.

use crate::error::StrategyError;
use crate::recovery::RecoveryRequest;
use crate::recursive::RecursiveStrategy;
use crate::resolver::StrategyResolver;
use crate::strategy::{ExecutionStrategy, StrategyDeps};
use conductor_core::{ExecutionContext, SubtaskResult, Task, TaskResult};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How a subtask is dispatched.
#[derive(Clone, Copy)]
pub(crate) enum SubtaskRunner<'a> {
    /// Pick a strategy through the resolver
    Resolver(&'a StrategyResolver),
    /// Recurse into the recursive strategy unless the subtask asks for another one
    Recursive {
        strategy: &'a RecursiveStrategy,
        resolver: &'a StrategyResolver,
    },
}

impl SubtaskRunner<'_> {
    async fn run(&self, task: &Task, ctx: &mut ExecutionContext) -> Result<TaskResult, StrategyError> {
        match self {
            Self::Resolver(resolver) => resolver.execute_task(task, ctx).await,
            Self::Recursive { strategy, resolver } => {
                if RecursiveStrategy::delegates(task) {
                    resolver.execute_task(task, ctx).await
                } else {
                    strategy.execute(task, ctx, resolver).await
                }
            }
        }
    }
}

/// Per-call settings for [`run_subtask`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct SubtaskOptions<'a> {
    /// Strategy running the batch, reported to the recovery collaborator
    pub strategy: &'a str,
    /// Deadline per attempt
    pub timeout: Option<Duration>,
    /// Whether a failure would abort the enclosing batch
    pub critical: bool,
}

struct Failure {
    message: String,
    fatal: bool,
    retryable: bool,
    timed_out: bool,
}

/// Run a subtask on its own branch.
///
/// Applies the subtask's retry policy, races each attempt against the
/// timeout and offers the final failure to the recovery collaborator. Never
/// fails: the outcome is always a [`SubtaskResult`].
pub(crate) async fn run_subtask(
    task: &Task,
    ctx: &mut ExecutionContext,
    deps: &StrategyDeps,
    opts: SubtaskOptions<'_>,
    runner: SubtaskRunner<'_>,
) -> SubtaskResult {
    let policy = task.retry.clone().unwrap_or_default();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0;

    let failure = loop {
        attempts += 1;
        let attempt = match opts.timeout {
            Some(limit) => match tokio::time::timeout(limit, runner.run(task, ctx)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(StrategyError::Timeout {
                    task_id: task.id.clone(),
                    after: limit,
                }),
            },
            None => runner.run(task, ctx).await,
        };

        let failure = match attempt {
            Ok(result) if result.success => {
                return SubtaskResult::ok(task.id.clone(), result.result.unwrap_or(Value::Null)).on_context(ctx.id());
            }
            Ok(result) => Failure {
                message: result.error.unwrap_or_else(|| "unknown error".to_string()),
                fatal: false,
                retryable: result.retryable,
                timed_out: false,
            },
            Err(e) => Failure {
                message: e.to_string(),
                fatal: e.is_fatal(),
                retryable: e.is_retryable(),
                timed_out: matches!(e, StrategyError::Timeout { .. }),
            },
        };

        if !failure.retryable || attempts >= max_attempts {
            break failure;
        }

        let delay = policy.delay_for(attempts);
        debug!(task_id = %task.id, attempt = attempts, ?delay, error = %failure.message, "retrying subtask");
        tokio::time::sleep(delay).await;
    };

    if !failure.fatal {
        if let Some(recovered) = try_recover(task, ctx, deps, &opts, attempts, &failure).await {
            return recovered;
        }
    }

    SubtaskResult::failed(task.id.clone(), failure.message).on_context(ctx.id())
}

async fn try_recover(
    task: &Task,
    ctx: &mut ExecutionContext,
    deps: &StrategyDeps,
    opts: &SubtaskOptions<'_>,
    attempts: u32,
    failure: &Failure,
) -> Option<SubtaskResult> {
    let recovery = deps.recovery.as_ref()?;
    let request = RecoveryRequest {
        task_id: task.id.clone(),
        strategy: opts.strategy.to_string(),
        depth: ctx.depth(),
        attempts,
        timed_out: failure.timed_out,
        critical: opts.critical,
    };

    match recovery.recover(&failure.message, &request).await {
        Ok(outcome) if outcome.success => {
            info!(task_id = %task.id, action = ?outcome.action, "subtask recovered");
            let value = outcome.result.clone().unwrap_or(Value::Null);
            ctx.mark_completed(task.id.clone(), value.clone());
            if let Some(delay) = outcome.delay() {
                tokio::time::sleep(delay).await;
            }
            let mut result = SubtaskResult::ok(task.id.clone(), value).on_context(ctx.id());
            result.recovered = true;
            Some(result)
        }
        Ok(_) => None,
        Err(e) => {
            warn!(task_id = %task.id, error = %format!("{e:#}"), "recovery collaborator failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionConfig;
    use crate::recovery::{ErrorRecovery, RecoveryOutcome};
    use crate::test_support::{deps_with_tools, CountingTool, FailingTool};
    use async_trait::async_trait;
    use conductor_core::{BackoffStrategy, RetryPolicy};
    use serde_json::json;
    use std::sync::Arc;

    struct AlwaysRecover;

    #[async_trait]
    impl ErrorRecovery for AlwaysRecover {
        async fn recover(&self, _error: &str, request: &RecoveryRequest) -> anyhow::Result<RecoveryOutcome> {
            Ok(RecoveryOutcome::recovered(json!({"recoveredFrom": request.task_id})))
        }
    }

    fn opts() -> SubtaskOptions<'static> {
        SubtaskOptions {
            strategy: "parallel",
            timeout: None,
            critical: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_success() {
        let counter = Arc::new(CountingTool::failing_first("flaky", 2));
        let deps = deps_with_tools(vec![counter.clone()]);
        let resolver = StrategyResolver::with_defaults(deps.clone(), ExecutionConfig::default());
        let task = Task::new("t")
            .with_tool("flaky", json!({}))
            .with_retry(RetryPolicy::new(3, 100, BackoffStrategy::Exponential));

        let mut ctx = ExecutionContext::new();
        let result = run_subtask(&task, &mut ctx, &deps, opts(), SubtaskRunner::Resolver(&resolver)).await;

        assert!(result.success);
        assert_eq!(counter.calls(), 3);
        assert_eq!(result.context, Some(ctx.id()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_a_failure() {
        let deps = StrategyDeps::new();
        let resolver = StrategyResolver::with_defaults(deps.clone(), ExecutionConfig::default());
        let task = Task::new("slow").with_fn(|_| Ok(json!(1)));
        let mut ctx = ExecutionContext::new();

        let quick = SubtaskOptions {
            timeout: Some(Duration::from_millis(50)),
            ..opts()
        };
        let result = run_subtask(&task, &mut ctx, &deps, quick, SubtaskRunner::Resolver(&resolver)).await;
        assert!(result.success);

        let sleepy = Arc::new(crate::test_support::SleepTool::new(Duration::from_secs(5)));
        let deps = deps_with_tools(vec![sleepy]);
        let resolver = StrategyResolver::with_defaults(deps.clone(), ExecutionConfig::default());
        let task = Task::new("slow").with_tool("sleep", json!({}));
        let result = run_subtask(&task, &mut ctx, &deps, quick, SubtaskRunner::Resolver(&resolver)).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_recovery_turns_failure_into_success() {
        let deps = deps_with_tools(vec![Arc::new(FailingTool::erroring("broken"))])
            .with_recovery(Arc::new(AlwaysRecover));
        let resolver = StrategyResolver::with_defaults(deps.clone(), ExecutionConfig::default());
        let task = Task::new("r").with_tool("broken", json!({}));
        let mut ctx = ExecutionContext::new();

        let result = run_subtask(&task, &mut ctx, &deps, opts(), SubtaskRunner::Resolver(&resolver)).await;
        assert!(result.success);
        assert!(result.recovered);
        assert_eq!(result.result, Some(json!({"recoveredFrom": "r"})));
        assert!(ctx.is_completed("r"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_tool_is_not_retried() {
        let deps = StrategyDeps::new();
        let resolver = StrategyResolver::with_defaults(deps.clone(), ExecutionConfig::default());
        let task = Task::new("n")
            .with_tool("nope", json!({}))
            .with_retry(RetryPolicy::new(4, 1000, BackoffStrategy::Exponential));
        let mut ctx = ExecutionContext::new();

        let started = tokio::time::Instant::now();
        let result = run_subtask(&task, &mut ctx, &deps, opts(), SubtaskRunner::Resolver(&resolver)).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Tool not found"));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tool_failures_still_back_off() {
        let counter = Arc::new(CountingTool::failing_first("flaky", 10));
        let deps = deps_with_tools(vec![counter.clone()]);
        let resolver = StrategyResolver::with_defaults(deps.clone(), ExecutionConfig::default());
        let task = Task::new("f")
            .with_tool("flaky", json!({}))
            .with_retry(RetryPolicy::new(3, 1000, BackoffStrategy::Constant));
        let mut ctx = ExecutionContext::new();

        let started = tokio::time::Instant::now();
        let result = run_subtask(&task, &mut ctx, &deps, opts(), SubtaskRunner::Resolver(&resolver)).await;
        assert!(!result.success);
        assert_eq!(counter.calls(), 3);
        assert!(started.elapsed() >= Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn test_fatal_errors_are_not_retried() {
        let deps = StrategyDeps::new();
        let resolver = StrategyResolver::with_defaults(deps.clone(), ExecutionConfig::default());
        let task = Task::new("d")
            .with_data(json!(1))
            .with_dependencies(vec!["missing".into()])
            .with_retry(RetryPolicy::new(5, 10_000, BackoffStrategy::Constant));
        let mut ctx = ExecutionContext::new();

        let result = run_subtask(&task, &mut ctx, &deps, opts(), SubtaskRunner::Resolver(&resolver)).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Dependencies not met"));
    }
}
