//! Test doubles shared by the strategy tests.

use crate::strategy::StrategyDeps;
use async_trait::async_trait;
use conductor_ai::{ModelClient, PromptRequest, PromptResponse};
use conductor_tools::{InMemoryToolRegistry, Tool, ToolOutput};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn deps_with_tools(tools: Vec<Arc<dyn Tool>>) -> StrategyDeps {
    StrategyDeps::new().with_tools(Arc::new(InMemoryToolRegistry::new(tools)))
}

/// Replies from a script, repeating the last one once it runs out.
pub struct ScriptedModel {
    failures: AtomicUsize,
    replies: Mutex<VecDeque<String>>,
    last: Mutex<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<&str>) -> Self {
        Self::failing_first(0, replies)
    }

    /// Errors on the first `failures` requests.
    pub fn failing_first(failures: usize, replies: Vec<&str>) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            replies: Mutex::new(replies.into_iter().map(str::to_string).collect()),
            last: Mutex::new(String::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn request(&self, request: PromptRequest) -> anyhow::Result<PromptResponse> {
        self.prompts.lock().unwrap().push(request.prompt);

        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("model unavailable");
        }

        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.replies.lock().unwrap().pop_front() {
            *last = next;
        }
        Ok(PromptResponse::new(last.clone()))
    }
}

/// A tool that always fails, either by reporting `success: false` or by erroring.
pub struct FailingTool {
    name: String,
    report: bool,
}

impl FailingTool {
    pub fn reporting(name: &str) -> Self {
        Self { name: name.to_string(), report: true }
    }

    pub fn erroring(name: &str) -> Self {
        Self { name: name.to_string(), report: false }
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    async fn execute(&self, _inputs: &Value) -> anyhow::Result<ToolOutput> {
        if self.report {
            Ok(ToolOutput::failed(json!({"reason": "refused"}), None))
        } else {
            anyhow::bail!("{} exploded", self.name)
        }
    }
}

/// Errors on the first `n` calls, then succeeds with the call count.
pub struct CountingTool {
    name: String,
    fail_first: usize,
    calls: AtomicUsize,
}

impl CountingTool {
    pub fn failing_first(name: &str, n: usize) -> Self {
        Self {
            name: name.to_string(),
            fail_first: n,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for CountingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Fails a fixed number of times"
    }

    async fn execute(&self, _inputs: &Value) -> anyhow::Result<ToolOutput> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.fail_first {
            anyhow::bail!("attempt {call} failed");
        }
        Ok(ToolOutput::ok(json!(call)))
    }
}

/// Sleeps for a fixed time and tracks how many calls overlap.
pub struct SleepTool {
    delay: Duration,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SleepTool {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for SleepTool {
    fn name(&self) -> &str {
        "sleep"
    }

    fn description(&self) -> &str {
        "Sleep, then return"
    }

    async fn execute(&self, _inputs: &Value) -> anyhow::Result<ToolOutput> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(self.in_flight.clone());
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(ToolOutput::ok(json!({"slept_ms": self.delay.as_millis() as u64})))
    }
}
