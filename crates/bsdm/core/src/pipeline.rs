// BSDM
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Monitoring pipeline
//!
//! One pipeline owns one run: it reads lines in arrival order, segments them
//! into blocks, dispatches closed blocks to their analyzer and resolves the
//! goal graph after every block. The only concurrency is between waiting on
//! the line source and the shutdown signal.

use crate::config::BsdmConfig;
use crate::error::{BsdmError, BsdmResult, EXIT_SUCCESS, ProcessingError};
use crate::grammar::Grammar;
use crate::model::{MemorySubsystemModel, build_inventory, validate};
use crate::processors::{AnalyzerContext, ProcessorKind, ProcessorRegistry, analyze};
use crate::qualification::{EngineContext, QualificationEngine, Verdict, engines_from_config};
use crate::report::{QualificationResult, ResultSink, RunSummary};
use crate::scheduler::{DependencyScheduler, EngineStage, GoalGraphBuilder, GoalId};
use crate::segmenter::{BlockSegmenter, ClosedBlock, LifecycleEvent, LifecycleWatcher, SegmentEvent};
use crate::source::{LineSource, LogLine};
use chrono::{DateTime, Utc};
use std::any::Any;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use tracing::{debug, error, info, warn};

/// Mutable state of one run
struct RunState {
    model: MemorySubsystemModel,
    started_at: DateTime<Utc>,
    lines_read: usize,
    blocks_processed: usize,
    block_errors: usize,
    results: Vec<QualificationResult>,
    extra_tags: Vec<String>,
}

/// Borrowed view used while executing goals
struct GoalEnv<'a> {
    config: &'a BsdmConfig,
    grammar: &'a Grammar,
    engines: &'a mut [Box<dyn QualificationEngine>],
    sinks: &'a mut [Box<dyn ResultSink>],
    state: &'a mut RunState,
}

pub struct Pipeline {
    config: BsdmConfig,
    grammar: Grammar,
    registry: ProcessorRegistry,
    segmenter: BlockSegmenter,
    lifecycle: LifecycleWatcher,
    scheduler: DependencyScheduler<GoalId>,
    engines: Vec<Box<dyn QualificationEngine>>,
    sinks: Vec<Box<dyn ResultSink>>,
    state: RunState,
}

impl Pipeline {
    /// Compile the grammar, build the registry and the goal graph
    pub fn new(config: BsdmConfig) -> BsdmResult<Self> {
        let grammar = Grammar::compile(&config.grammar)?;
        let engines = engines_from_config(&config);

        let mut registry = ProcessorRegistry::with_defaults(&config.node);
        let mut builder = GoalGraphBuilder::with_base_goals();
        for engine in &engines {
            registry.register_all(engine.processing_rules(&config.node));
            builder.extend(engine.testplan());
        }
        registry.merge_config(&config.processors);
        let plan = builder.build()?;
        info!(goals = plan.len(), rules = registry.len(), grammar = %grammar.version, "testplan built");

        Ok(Self {
            segmenter: BlockSegmenter::from_grammar(&grammar, config.base.max_block_depth),
            lifecycle: LifecycleWatcher::new(grammar.lifecycle.clone()),
            scheduler: DependencyScheduler::new(plan, config.base.max_resolution_passes),
            state: RunState {
                model: MemorySubsystemModel::new(),
                started_at: Utc::now(),
                lines_read: 0,
                blocks_processed: 0,
                block_errors: 0,
                results: Vec::new(),
                extra_tags: Vec::new(),
            },
            config,
            grammar,
            registry,
            engines,
            sinks: Vec::new(),
        })
    }

    pub fn with_sink(mut self, sink: Box<dyn ResultSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Tags added to every result on top of the configured ones
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.state.extra_tags.extend(tags);
        self
    }

    pub fn model(&self) -> &MemorySubsystemModel {
        &self.state.model
    }

    pub fn results(&self) -> &[QualificationResult] {
        &self.state.results
    }

    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    /// True once every goal has been reached
    pub fn is_complete(&self) -> bool {
        self.scheduler.is_complete()
    }

    pub fn is_processed(&self, goal: &GoalId) -> bool {
        self.scheduler.is_processed(goal)
    }

    /// Feed one normalized line
    pub fn feed_line(&mut self, line: &LogLine) -> BsdmResult<()> {
        self.state.lines_read += 1;
        if let Some(LifecycleEvent::Restart(restarts)) = self.lifecycle.observe(line, &mut self.state.model.lifecycle) {
            debug!(restarts, "boot restarted while monitoring");
        }

        let registry = &self.registry;
        match self.segmenter.feed(&line.text, |name| registry.contains(name)) {
            SegmentEvent::Closed(block) => self.on_block_closed(block),
            SegmentEvent::Opened(name) => {
                debug!(block = %name, "block started");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Feed raw text, one line per `\n`
    pub fn feed_text(&mut self, text: &str) -> BsdmResult<()> {
        for raw in text.lines() {
            self.feed_line(&LogLine::new(raw))?;
        }
        Ok(())
    }

    /// End of stream: flush open blocks and run the final resolution
    pub fn finish(&mut self) -> BsdmResult<()> {
        for block in self.segmenter.finish() {
            warn!(block = %block.name, "block not closed before end of stream");
            self.on_block_closed(block)?;
        }

        let Pipeline {
            config,
            grammar,
            scheduler,
            engines,
            sinks,
            state,
            ..
        } = self;
        let mut env = GoalEnv {
            config,
            grammar,
            engines,
            sinks,
            state,
        };
        let unresolved = scheduler.finalize(|goal| execute_goal(*goal, &mut env))?;
        if unresolved.is_empty() {
            return Ok(());
        }
        let unresolved: Vec<String> = unresolved.iter().map(ToString::to_string).collect();
        error!(unresolved = ?unresolved, "insufficient data to reach the goal");
        Err(BsdmError::InsufficientData { unresolved })
    }

    /// Read `source` until every goal is reached, the stream ends or `shutdown` fires
    ///
    /// The source is closed on every exit path.
    pub async fn run<F>(&mut self, source: &mut dyn LineSource, shutdown: F) -> RunSummary
    where
        F: Future<Output = ()>,
    {
        info!(source = %source.describe(), kind = %source.kind(), "monitoring started");
        let shutdown = std::pin::pin!(shutdown);
        let outcome = self.drive(source, shutdown).await;
        if let Err(e) = source.close().await {
            warn!(error = %e, "failed to close line source");
        }
        self.summarize(source.describe(), outcome)
    }

    async fn drive<F>(&mut self, source: &mut dyn LineSource, mut shutdown: Pin<&mut F>) -> BsdmResult<()>
    where
        F: Future<Output = ()>,
    {
        loop {
            if self.scheduler.is_complete() {
                info!("all goals reached, stop reading");
                return Ok(());
            }
            tokio::select! {
                biased;
                _ = shutdown.as_mut() => {
                    warn!("interrupted, closing line source");
                    return Err(BsdmError::Cancelled);
                }
                next = source.next_line() => match next? {
                    Some(line) => self.feed_line(&line)?,
                    None => break,
                },
            }
        }
        info!(lines = self.state.lines_read, "end of stream");
        self.finish()
    }

    /// Summary of the run so far with the exit code for `outcome`
    pub fn summarize(&self, source: impl Into<String>, outcome: BsdmResult<()>) -> RunSummary {
        let (exit_code, error, unresolved) = match outcome {
            Ok(()) => (self.verdict_exit_code(), None, Vec::new()),
            Err(e) => {
                let unresolved = match &e {
                    BsdmError::InsufficientData { unresolved } => unresolved.clone(),
                    _ => Vec::new(),
                };
                // A definite engine FAIL outranks goals that never got their data
                let exit_code = match (&e, self.verdict_exit_code()) {
                    (BsdmError::InsufficientData { .. }, code) if code != EXIT_SUCCESS => code,
                    _ => e.exit_code(),
                };
                (exit_code, Some(e.to_string()), unresolved)
            }
        };
        let model = &self.state.model;
        RunSummary {
            source: source.into(),
            exit_code,
            error,
            lines_read: self.state.lines_read,
            blocks_processed: self.state.blocks_processed,
            block_errors: self.state.block_errors,
            chassis: model.chassis.clone(),
            components: model.components.len(),
            ram_config: model.ram_config.clone(),
            failure_events: model.failure_events.clone(),
            lifecycle: model.lifecycle.clone(),
            results: self.state.results.clone(),
            unresolved,
            passes: self.scheduler.total_passes(),
        }
    }

    /// Exit code of the last failing engine, success otherwise
    fn verdict_exit_code(&self) -> u8 {
        self.engines
            .iter()
            .filter(|e| e.verdict() == Some(Verdict::Fail))
            .map(|e| e.fail_exit_code())
            .last()
            .unwrap_or(EXIT_SUCCESS)
    }

    fn on_block_closed(&mut self, block: ClosedBlock) -> BsdmResult<()> {
        let Some(kind) = self.registry.get(&block.name) else {
            return Ok(());
        };
        self.state.blocks_processed += 1;
        if block.forced {
            warn!(block = %block.name, "block closed by fatal error marker");
        }

        let outcome = catch_unwind(AssertUnwindSafe(|| self.dispatch(kind, &block))).unwrap_or_else(|payload| {
            Err(ProcessingError::Panicked {
                block: block.name.clone(),
                detail: panic_detail(payload.as_ref()),
            })
        });

        match outcome {
            Ok(true) => {
                info!(block = %block.name, goal = %kind, "block processed");
                self.scheduler.mark_processed(GoalId::Process(kind));
            }
            Ok(false) => debug!(block = %block.name, goal = %kind, "block processed, more data needed"),
            Err(e) => {
                self.state.block_errors += 1;
                warn!(block = %block.name, error = %e, "failed to process {}", block.name);
            }
        }
        self.resolve()
    }

    fn dispatch(&mut self, kind: ProcessorKind, block: &ClosedBlock) -> Result<bool, ProcessingError> {
        if kind.is_engine() {
            let Some(engine) = self.engines.iter_mut().find(|e| e.processor() == kind) else {
                return Err(ProcessingError::Unhandled { block: block.name.clone() });
            };
            let ctx = EngineContext {
                model: &self.state.model,
                node: &self.config.node,
                fields: &self.grammar.fields,
            };
            return engine.process_block(block, &ctx);
        }

        let mut ctx = AnalyzerContext {
            model: &mut self.state.model,
            fields: &self.grammar.fields,
            node: &self.config.node,
        };
        analyze(kind, block, &mut ctx)
    }

    fn resolve(&mut self) -> BsdmResult<()> {
        let Pipeline {
            config,
            grammar,
            scheduler,
            engines,
            sinks,
            state,
            ..
        } = self;
        let mut env = GoalEnv {
            config,
            grammar,
            engines,
            sinks,
            state,
        };
        scheduler.resolve(|goal| execute_goal(*goal, &mut env))?;
        Ok(())
    }
}

fn panic_detail(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Execute one goal of the testplan
fn execute_goal(goal: GoalId, env: &mut GoalEnv<'_>) -> BsdmResult<bool> {
    match goal {
        // Satisfied by processed blocks only
        GoalId::ConsoleData | GoalId::Process(_) => Ok(false),
        GoalId::RamConfValidator => validate_ram_config(env),
        GoalId::Engine(kind, stage) => {
            let Some(index) = env.engines.iter().position(|e| e.kind() == kind) else {
                return Ok(false);
            };
            if stage == EngineStage::SendResults {
                return send_results(index, env);
            }
            let ctx = EngineContext {
                model: &env.state.model,
                node: &env.config.node,
                fields: &env.grammar.fields,
            };
            Ok(env.engines[index].run_stage(stage, &ctx))
        }
    }
}

fn validate_ram_config(env: &mut GoalEnv<'_>) -> BsdmResult<bool> {
    let model = &mut env.state.model;
    model.components = build_inventory(model, &env.config.node);
    let status = validate(model, &env.config.checks, &env.config.node);
    model.ram_config = Some(status.clone());
    if status.is_pass() {
        info!(dimms = status.counts.dimms_count, models = ?status.models, "RAM configuration validated");
        Ok(true)
    } else {
        Err(BsdmError::Validation(status))
    }
}

fn send_results(index: usize, env: &mut GoalEnv<'_>) -> BsdmResult<bool> {
    let engine = &env.engines[index];
    let Some(status) = engine.verdict() else {
        return Ok(false);
    };
    let model = &env.state.model;

    let mut tags = env.config.report.tags.clone();
    tags.extend(env.state.extra_tags.iter().cloned());
    if let Some(first) = model.components.first() {
        tags.push(first.model.clone());
    }

    let result = QualificationResult {
        test: engine.test_name().to_string(),
        status,
        failure_reason: engine.failure_reason(),
        started_at: env.state.started_at,
        finished_at: Utc::now(),
        environment: model.chassis.clone(),
        components: model.components.clone(),
        ram_config: model.ram_config.clone(),
        tags,
        data: engine.result_data(),
        failure_events: model.failure_events.clone(),
        lifecycle: model.lifecycle.clone(),
    };

    for sink in env.sinks.iter_mut() {
        if let Err(e) = sink.submit(&result) {
            warn!(sink = %sink.name(), test = %result.test, error = %e, "failed to send results");
        }
    }
    info!(test = %result.test, status = %result.status, "results sent");
    env.state.results.push(result);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ReplaySource;

    const CHASSIS: &str = "\
InitFruStrings: Class ID:  03
SystemManufacturer: UpdateStr: Acme
SystemProductName: UpdateStr: R-100
SystemSerialNumber: UpdateStr: SN123
BaseBoardManufacturer: UpdateStr: Acme
BaseBoardProductName: UpdateStr: X11DPi
InitFruStrings Exiting...";

    #[test]
    fn test_registry_includes_engine_rules() {
        let pipeline = Pipeline::new(BsdmConfig::default().with_rmt(true).with_step(true)).unwrap();
        assert_eq!(pipeline.registry().get("BSSA_RMT"), Some(ProcessorKind::RmtResults));
        assert_eq!(pipeline.registry().get("RMT_N1"), Some(ProcessorKind::RmtResults));
        assert_eq!(pipeline.registry().get("@SEC Run CPGC Test"), Some(ProcessorKind::StepResults));
    }

    #[test]
    fn test_chassis_block_marks_goal() {
        let mut pipeline = Pipeline::new(BsdmConfig::default()).unwrap();
        pipeline.feed_text(CHASSIS).unwrap();
        assert!(pipeline.is_processed(&GoalId::Process(ProcessorKind::ChassisInfo)));
        assert_eq!(pipeline.model().chassis.system_serial.as_deref(), Some("SN123"));
    }

    #[test]
    fn test_analyzer_error_is_recoverable() {
        let mut pipeline = Pipeline::new(BsdmConfig::default()).unwrap();
        pipeline.feed_text("START_SOCKET_0_TABLE\nnothing useful\nSTOP_SOCKET_0_TABLE").unwrap();
        let summary = pipeline.summarize("test", Ok(()));
        assert_eq!(summary.block_errors, 1);
        assert!(!pipeline.is_processed(&GoalId::Process(ProcessorKind::SocketTable)));
    }

    #[test]
    fn test_panic_detail() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_detail(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_detail(payload.as_ref()), "bang");
    }

    #[tokio::test]
    async fn test_run_reports_insufficient_data() {
        let mut pipeline = Pipeline::new(BsdmConfig::default()).unwrap();
        let mut source = ReplaySource::from_text("replay", CHASSIS);
        let summary = pipeline.run(&mut source, std::future::pending()).await;
        assert_eq!(summary.exit_code, crate::error::EXIT_DATA_MISSING);
        assert!(summary.unresolved.contains(&"ram_conf_validator".to_string()));
        assert!(source.is_closed());
    }

    #[tokio::test]
    async fn test_run_cancelled() {
        let mut pipeline = Pipeline::new(BsdmConfig::default()).unwrap();
        let mut source = ReplaySource::from_text("replay", CHASSIS);
        let summary = pipeline.run(&mut source, async {}).await;
        assert_eq!(summary.exit_code, crate::error::EXIT_CANCELLED);
        assert_eq!(summary.lines_read, 0);
        assert!(source.is_closed());
    }
}
