//! Sequential pipeline: run sub-agents in order over shared session state.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};
use wayfarer_agent::{Agent, AgentOutput, InvocationContext};
use wayfarer_core::error::Error;

/// Runs its stages one after another on the same invocation.
///
/// Stages hand results forward through state: a stage's output key is
/// written before the next stage renders its instruction. Only the first
/// stage sees the user's message. Any stage error aborts the pipeline.
pub struct SequentialAgent {
    name: String,
    description: String,
    stages: Vec<Arc<dyn Agent>>,
}

impl SequentialAgent {
    pub fn new(name: impl Into<String>, stages: Vec<Arc<dyn Agent>>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            stages,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn stages(&self) -> &[Arc<dyn Agent>] {
        &self.stages
    }

    /// Check that every stage's read keys are available when it runs:
    /// present in `initial_keys` or written by an earlier stage.
    pub fn validate(&self, initial_keys: &[&str]) -> Result<(), Error> {
        if self.stages.is_empty() {
            return Err(self.empty());
        }

        let mut available: HashSet<String> = initial_keys.iter().map(|k| k.to_string()).collect();
        for stage in &self.stages {
            for key in stage.reads() {
                if !available.contains(&key) {
                    return Err(Error::MissingStateKey {
                        agent: stage.name().to_string(),
                        key,
                    });
                }
            }
            available.extend(stage.writes());
        }
        Ok(())
    }

    fn empty(&self) -> Error {
        Error::Config {
            message: format!("pipeline '{}' has no stages", self.name),
        }
    }
}

#[async_trait]
impl Agent for SequentialAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    /// Keys read by some stage and not produced by an earlier one.
    fn reads(&self) -> Vec<String> {
        let mut written: HashSet<String> = HashSet::new();
        let mut reads = Vec::new();
        for stage in &self.stages {
            for key in stage.reads() {
                if !written.contains(&key) && !reads.contains(&key) {
                    reads.push(key);
                }
            }
            written.extend(stage.writes());
        }
        reads
    }

    fn writes(&self) -> Vec<String> {
        let mut writes: Vec<String> = Vec::new();
        for key in self.stages.iter().flat_map(|s| s.writes()) {
            if !writes.contains(&key) {
                writes.push(key);
            }
        }
        writes
    }

    async fn run(&self, ctx: &mut InvocationContext) -> wayfarer_core::Result<AgentOutput> {
        if self.stages.is_empty() {
            return Err(self.empty());
        }
        info!(pipeline = %self.name, stages = self.stages.len(), "Running pipeline");

        let mut output = AgentOutput::default();
        let mut usage = wayfarer_core::provider::Usage::default();
        for (index, stage) in self.stages.iter().enumerate() {
            debug!(pipeline = %self.name, stage = %stage.name(), index, "Pipeline stage");
            output = stage.run(ctx).await?;
            usage.add(&output.usage);
        }
        output.usage = usage;
        Ok(output)
    }
}
