//! Bar replay: the coordinator, the worker runtime, and the signals between them.

pub mod config;
pub mod coordinator;
pub mod dataset;
pub mod signals;
pub mod sink;
pub mod worker;

pub use config::{ConfigError, ReplayConfig, RuleBarrier};
pub use coordinator::{CoordinatorState, ReplayCoordinator, ReplayError, RunOutcome, RunStatus};
pub use dataset::SharedDataset;
pub use signals::{CancelToken, SignalBoard, StrategyHandle, WaitOutcome, WaitStage, WorkerId};
pub use sink::{ExecutionSink, RecordingSink, SinkEvent, TracingSink};
pub use worker::{
    run_strategy, spawn_strategy, ReplayEvent, Strategy, StrategyContext, WorkerEnv,
};
