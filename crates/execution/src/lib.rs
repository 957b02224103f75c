//! Execution layer - strategy selection, decomposition and scheduling.
//!
//! A task reaches a [`StrategyResolver`], which picks one of the registered
//! [`ExecutionStrategy`] implementations (atomic, sequential, parallel,
//! recursive, or a custom one) and runs it against an
//! [`ExecutionContext`](conductor_core::ExecutionContext). Composite
//! strategies hand their subtasks back to the resolver.

#![warn(missing_docs)]

pub mod error;
pub mod config;
pub mod strategy;

// Collaborators
pub mod analysis;
pub mod progress;
pub mod recovery;

// Shared machinery
pub mod aggregate;
pub mod dependency;
pub mod scheduler;
mod direct;
mod subtask;

// Strategies
pub mod atomic;
pub mod sequential;
pub mod parallel;
pub mod recursive;

pub mod resolver;
pub mod engine;

#[cfg(test)]
mod test_support;

pub use error::StrategyError;
pub use config::{
    BatchSettings, ExecutionConfig, ParallelConfig, RecursiveConfig, ResolverConfig, SequentialConfig,
    StrategyPriorities,
};
pub use strategy::{ExecutionStrategy, StrategyDeps, ATOMIC, PARALLEL, RECURSIVE, SEQUENTIAL};
pub use analysis::{Alternative, Recommendation, TaskAnalysis, TaskAnalyzer};
pub use progress::{NoopProgress, ProgressEmitter, ProgressEvent, RecordingProgress, TracingProgress};
pub use recovery::{ErrorRecovery, RecoveryOutcome, RecoveryRequest};
pub use aggregate::{aggregate, aggregate_with, compose};
pub use dependency::{DependencyGraph, Resolution};
pub use scheduler::{BoundedRunner, Flow, RunReport};
pub use atomic::AtomicStrategy;
pub use sequential::SequentialStrategy;
pub use parallel::ParallelStrategy;
pub use recursive::RecursiveStrategy;
pub use resolver::{StrategyEvaluation, StrategyFactory, StrategyResolver};
pub use engine::ExecutionEngine;
