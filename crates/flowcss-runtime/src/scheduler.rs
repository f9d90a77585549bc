#![forbid(unsafe_code)]

//! Frame-budgeted task scheduler.
//!
//! [`ExecutionEngine`] holds a queue of [`ComputationTask`]s ordered by
//! descending priority and runs as many of them as fit in one frame.
//!
//! # Frame budget
//!
//! `execute_frame(t0, ..)` keeps popping tasks while more than 2 ms of the
//! frame remain (`max_frame_time_ms - (now - t0)`). A task whose complexity
//! exceeds the chunk threshold is split into chunks; its chunks run one at a
//! time while more than 1 ms remains. Unfinished chunks are put back through
//! the normal priority queue, so a paused task can be overtaken by higher
//! priority arrivals before it resumes.
//!
//! # Chunks
//!
//! A task with complexity `c` above the threshold gets `max(1, c / 10)`
//! chunks. Each chunk is a step quota over the task's compiled program,
//! `ceil(len / chunks)` instructions, and all chunks share one [`Machine`].
//! The last chunk runs the program to completion.
//!
//! # Failure Modes
//!
//! - **Evaluation error**: logged, the task is abandoned and reported in
//!   [`FrameReport::failed`]. It is not retried.
//! - **Chunk error**: the machine state is meaningless after a failed step,
//!   so the whole task is abandoned.
//! - **Inputs changed mid-flight**: a chunked task reads its dependencies in
//!   several frames. When they no longer match the values it started with,
//!   the result is published through [`Scope::publish_stale`], never cached,
//!   and counted in [`FrameReport::stale`]. Tasks with assignments are not
//!   checked.

use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use flowcss_core::Value;
use flowcss_core::clock::Clock;
use flowcss_core::expr::Expression;

use crate::cache::{ResultCache, generate_key};
use crate::config::EngineConfig;
use crate::error::{EvalError, FlowError, Result};
use crate::eval::{Machine, Program, Scope, Step};

/// Tasks are only popped while more than this much frame time remains.
pub const TASK_HEADROOM_MS: f64 = 2.0;
/// Chunks only run while more than this much frame time remains.
pub const CHUNK_HEADROOM_MS: f64 = 1.0;

pub type TaskId = u64;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// One slice of a chunked task.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// `"{task_id}-{index}"`
    pub id: String,
    pub index: usize,
    pub dependencies: Vec<String>,
    pub estimated_cost_ms: f64,
    /// Instructions this chunk may execute. The last chunk ignores it.
    pub steps: usize,
}

/// A parsed expression waiting to be evaluated.
#[derive(Debug)]
pub struct ComputationTask {
    id: TaskId,
    expression: Rc<Expression>,
    priority: i32,
    output: Option<String>,
    program: std::result::Result<Program, EvalError>,
    machine: Machine,
    chunks: VecDeque<Chunk>,
    chunked: bool,
    cache_key: Option<String>,
}

impl ComputationTask {
    /// A task evaluating `expression`. Higher `priority` runs sooner.
    #[must_use]
    pub fn new(expression: impl Into<Rc<Expression>>, priority: i32) -> Self {
        let expression = expression.into();
        let program = Program::compile(&expression.root);
        Self {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            expression,
            priority,
            output: None,
            program,
            machine: Machine::new(),
            chunks: VecDeque::new(),
            chunked: false,
            cache_key: None,
        }
    }

    /// Publish the result to variable `name` on completion.
    #[must_use]
    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.output = Some(name.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    #[must_use]
    pub fn expression(&self) -> &Expression {
        &self.expression
    }

    #[must_use]
    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    /// Chunks not yet executed. Empty for unchunked tasks.
    #[must_use]
    pub fn chunks(&self) -> &VecDeque<Chunk> {
        &self.chunks
    }

    #[must_use]
    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    fn split_into_chunks(&mut self, cost_ms: f64) {
        let count = (self.expression.complexity / 10).max(1) as usize;
        let len = self.program.as_ref().map_or(1, Program::len);
        let steps = len.div_ceil(count).max(1);
        self.chunks = (0..count)
            .map(|index| Chunk {
                id: format!("{}-{index}", self.id),
                index,
                dependencies: self.expression.dependencies.clone(),
                estimated_cost_ms: cost_ms,
                steps,
            })
            .collect();
        self.chunked = true;
    }
}

/// A task that finished this frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskCompletion {
    pub task_id: TaskId,
    pub output: Option<String>,
    pub value: Value,
}

/// A task abandoned this frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskFailure {
    pub task_id: TaskId,
    pub output: Option<String>,
    pub error: FlowError,
}

/// What one call to [`ExecutionEngine::execute_frame`] did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    /// Tasks popped from the queue.
    pub executed: usize,
    pub completed: Vec<TaskCompletion>,
    pub failed: Vec<TaskFailure>,
    pub chunks_run: usize,
    /// Chunked tasks put back with chunks remaining.
    pub rescheduled: usize,
    pub cache_hits: usize,
    /// Completed tasks whose inputs changed while they were paused.
    pub stale: usize,
    /// Tasks still queued when the frame ended.
    pub deferred: usize,
    pub elapsed_ms: f64,
}

enum Outcome {
    Done(Value),
    Failed(FlowError),
    Paused,
}

/// Priority queue plus evaluator.
///
/// Worker and GPU options in [`EngineConfig`] are accepted but inert: every
/// task runs on the caller's thread inside `execute_frame`.
#[derive(Debug)]
pub struct ExecutionEngine {
    max_frame_time_ms: f64,
    chunk_threshold: u32,
    chunk_cost_ms: f64,
    cache_ttl_ms: Option<f64>,
    queue: VecDeque<ComputationTask>,
    cache: ResultCache,
    clock: Clock,
    disposed: bool,
}

impl ExecutionEngine {
    #[must_use]
    pub fn new(config: &EngineConfig, clock: Clock) -> Self {
        Self {
            max_frame_time_ms: config.max_frame_time_ms,
            chunk_threshold: config.chunk_threshold,
            chunk_cost_ms: config.chunk_cost_ms,
            cache_ttl_ms: config.cache_ttl_ms,
            queue: VecDeque::new(),
            cache: ResultCache::new(config.cache_size, clock.clone()),
            clock,
            disposed: false,
        }
    }

    /// Queue `task` behind every task of equal or higher priority.
    ///
    /// A task over the chunk threshold is split into chunks the first time
    /// it is scheduled.
    pub fn schedule(&mut self, mut task: ComputationTask) -> Result<TaskId> {
        if self.disposed {
            return Err(FlowError::Disposed);
        }
        if !task.chunked && task.expression.complexity > self.chunk_threshold {
            task.split_into_chunks(self.chunk_cost_ms);
        }
        let id = task.id;
        self.enqueue(task);
        Ok(id)
    }

    fn enqueue(&mut self, task: ComputationTask) {
        let at = self
            .queue
            .iter()
            .position(|queued| queued.priority < task.priority)
            .unwrap_or(self.queue.len());
        self.queue.insert(at, task);
    }

    fn remaining_ms(&self, frame_start_ms: f64) -> f64 {
        self.max_frame_time_ms - (self.clock.now_ms() - frame_start_ms)
    }

    /// Run queued work until the queue is empty or the frame that started at
    /// `frame_start_ms` is nearly over.
    pub fn execute_frame(&mut self, frame_start_ms: f64, scope: &mut dyn Scope) -> FrameReport {
        let mut report = FrameReport::default();
        let span = tracing::debug_span!(
            "scheduler.frame",
            queued = self.queue.len(),
            executed = tracing::field::Empty,
            remaining_ms = tracing::field::Empty,
        );
        let _guard = span.enter();

        while !self.queue.is_empty() && self.remaining_ms(frame_start_ms) > TASK_HEADROOM_MS {
            let Some(task) = self.queue.pop_front() else {
                break;
            };
            report.executed += 1;
            self.run_task(task, frame_start_ms, scope, &mut report);
        }

        report.deferred = self.queue.len();
        report.elapsed_ms = self.clock.now_ms() - frame_start_ms;
        span.record("executed", report.executed);
        span.record("remaining_ms", self.max_frame_time_ms - report.elapsed_ms);
        report
    }

    fn run_task(
        &mut self,
        mut task: ComputationTask,
        frame_start_ms: f64,
        scope: &mut dyn Scope,
        report: &mut FrameReport,
    ) {
        if task.machine.is_fresh() && task.cache_key.is_none() && !task.expression.has_side_effects()
        {
            let key = cache_key(&task.expression, scope);
            if let Some(value) = self.cache.get(&key) {
                report.cache_hits += 1;
                self.complete(task, value, scope, report);
                return;
            }
            task.cache_key = Some(key);
        }

        let outcome = if task.chunked {
            self.run_chunks(&mut task, frame_start_ms, scope, report)
        } else {
            match &task.program {
                Ok(program) => match task.machine.run(program, scope, None) {
                    Ok(Step::Done(value)) => Outcome::Done(value),
                    Ok(Step::Suspended) => Outcome::Paused,
                    Err(err) => Outcome::Failed(err),
                },
                Err(err) => Outcome::Failed(err.clone().into()),
            }
        };

        match outcome {
            Outcome::Done(value) => self.complete(task, value, scope, report),
            Outcome::Failed(error) => {
                tracing::warn!(
                    message = "scheduler.task_failed",
                    task_id = task.id,
                    source = %task.expression.source,
                    error = %error
                );
                report.failed.push(TaskFailure {
                    task_id: task.id,
                    output: task.output,
                    error,
                });
            }
            Outcome::Paused => {
                report.rescheduled += 1;
                self.enqueue(task);
            }
        }
    }

    fn run_chunks(
        &mut self,
        task: &mut ComputationTask,
        frame_start_ms: f64,
        scope: &mut dyn Scope,
        report: &mut FrameReport,
    ) -> Outcome {
        let program = match &task.program {
            Ok(program) => program,
            Err(err) => return Outcome::Failed(err.clone().into()),
        };
        while !task.chunks.is_empty() && self.remaining_ms(frame_start_ms) > CHUNK_HEADROOM_MS {
            let Some(chunk) = task.chunks.pop_front() else {
                break;
            };
            let quota = (!task.chunks.is_empty()).then_some(chunk.steps);
            report.chunks_run += 1;
            match task.machine.run(program, scope, quota) {
                Ok(Step::Suspended) => {}
                Ok(Step::Done(value)) => return Outcome::Done(value),
                Err(err) => {
                    tracing::warn!(
                        message = "scheduler.chunk_failed",
                        task_id = task.id,
                        chunk_id = %chunk.id,
                        error = %err
                    );
                    return Outcome::Failed(err);
                }
            }
        }
        Outcome::Paused
    }

    fn complete(
        &mut self,
        mut task: ComputationTask,
        value: Value,
        scope: &mut dyn Scope,
        report: &mut FrameReport,
    ) {
        // The key was taken from the inputs when the task started.
        let stale = task.chunked
            && task
                .cache_key
                .as_ref()
                .is_some_and(|key| *key != cache_key(&task.expression, scope));
        if stale {
            task.cache_key = None;
            report.stale += 1;
            tracing::debug!(
                message = "scheduler.inputs_changed",
                task_id = task.id,
                source = %task.expression.source
            );
        }
        if let Some(key) = task.cache_key.take() {
            self.cache.set(key, value.clone(), self.cache_ttl_ms);
        }
        let published = match task.output.as_deref() {
            Some(output) if stale => scope.publish_stale(output, value.clone()),
            Some(output) => scope.publish(output, value.clone()),
            None => Ok(()),
        };
        if let Err(error) = published {
            tracing::warn!(
                message = "scheduler.task_failed",
                task_id = task.id,
                source = %task.expression.source,
                error = %error
            );
            report.failed.push(TaskFailure {
                task_id: task.id,
                output: task.output,
                error,
            });
            return;
        }
        tracing::debug!(
            message = "scheduler.task_completed",
            task_id = task.id,
            output = task.output.as_deref().unwrap_or(""),
            value = %value
        );
        report.completed.push(TaskCompletion {
            task_id: task.id,
            output: task.output,
            value,
        });
    }

    /// Whether a queued task will publish to `name`.
    #[must_use]
    pub fn has_pending_output(&self, name: &str) -> bool {
        self.queue.iter().any(|t| t.output.as_deref() == Some(name))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Queued tasks, head first.
    pub fn queued(&self) -> impl Iterator<Item = &ComputationTask> {
        self.queue.iter()
    }

    #[must_use]
    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut ResultCache {
        &mut self.cache
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Drop every queued task and cached result. Idempotent.
    pub fn dispose(&mut self) {
        self.queue.clear();
        self.cache.clear();
        self.disposed = true;
    }
}

fn cache_key(expression: &Expression, scope: &dyn Scope) -> String {
    let values: Vec<(&str, Value)> = expression
        .dependencies
        .iter()
        .filter_map(|name| scope.lookup(name).map(|value| (name.as_str(), value)))
        .collect();
    generate_key(
        &expression.source,
        values.iter().map(|(name, value)| (*name, value)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowcss_core::clock::LabClock;
    use flowcss_core::expr::parse;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tracing::Subscriber;
    use tracing_subscriber::Layer;
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use web_time::Duration;

    fn engine(config: EngineConfig) -> (ExecutionEngine, LabClock) {
        let lab = LabClock::new();
        (ExecutionEngine::new(&config, Clock::lab(&lab)), lab)
    }

    fn unlimited() -> EngineConfig {
        EngineConfig::default().with_max_frame_time_ms(f64::INFINITY)
    }

    fn task(source: &str, priority: i32) -> ComputationTask {
        ComputationTask::new(parse(source), priority)
    }

    /// `sin(a) + sin(a) + ...` with complexity 7n + 3(n - 1).
    fn heavy(n: usize) -> String {
        vec!["sin(a)"; n].join(" + ")
    }

    fn vars(pairs: &[(&str, f64)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::Number(*v)))
            .collect()
    }

    #[test]
    fn higher_priority_runs_first() {
        let (mut engine, _) = engine(unlimited());
        let low = engine.schedule(task("1", 1)).unwrap();
        let high = engine.schedule(task("5", 5)).unwrap();
        let mid = engine.schedule(task("3", 3)).unwrap();

        let report = engine.execute_frame(0.0, &mut vars(&[]));
        let order: Vec<TaskId> = report.completed.iter().map(|c| c.task_id).collect();
        assert_eq!(order, vec![high, mid, low]);
        assert_eq!(report.deferred, 0);
    }

    #[test]
    fn equal_priorities_run_in_submission_order() {
        let (mut engine, _) = engine(unlimited());
        let ids: Vec<TaskId> = (0..4)
            .map(|i| engine.schedule(task(&i.to_string(), 2)).unwrap())
            .collect();
        let report = engine.execute_frame(0.0, &mut vars(&[]));
        let order: Vec<TaskId> = report.completed.iter().map(|c| c.task_id).collect();
        assert_eq!(order, ids);
    }

    #[test]
    fn stops_popping_with_less_than_two_ms_left() {
        let (mut engine, lab) = engine(EngineConfig::default().with_max_frame_time_ms(16.0));
        // Assignments skip the cache, so only the pop checks read the clock.
        for i in 0..10 {
            engine.schedule(task(&format!("x{i} = {i}"), 1)).unwrap();
        }
        // Each clock read costs 5 ms: 11 ms left, 6 ms left, then 1 ms left.
        lab.set_auto_advance(Duration::from_millis(5));
        let report = engine.execute_frame(0.0, &mut vars(&[]));
        assert_eq!(report.executed, 2);
        assert_eq!(report.deferred, 8);
        assert_eq!(engine.len(), 8);
    }

    #[test]
    fn exhausted_frame_runs_nothing() {
        let (mut engine, lab) = engine(EngineConfig::default());
        engine.schedule(task("1", 1)).unwrap();
        lab.advance(Duration::from_millis(15));
        let report = engine.execute_frame(0.0, &mut vars(&[]));
        assert_eq!(report.executed, 0);
        assert_eq!(report.deferred, 1);
    }

    #[test]
    fn outputs_are_published() {
        let (mut engine, _) = engine(unlimited());
        engine
            .schedule(task("a * 2", 1).with_output("out"))
            .unwrap();
        let mut scope = vars(&[("a", 21.0)]);
        let report = engine.execute_frame(0.0, &mut scope);
        assert_eq!(report.completed[0].output.as_deref(), Some("out"));
        assert_eq!(scope.get("out"), Some(&Value::Number(42.0)));
        assert!(!engine.has_pending_output("out"));
    }

    #[test]
    fn simple_tasks_are_not_chunked() {
        let (mut engine, _) = engine(unlimited());
        engine.schedule(task(&heavy(10), 1)).unwrap();
        assert!(!engine.queued().next().unwrap().is_chunked());
    }

    #[test]
    fn complex_tasks_are_chunked() {
        let (mut engine, _) = engine(unlimited());
        let source = heavy(11);
        assert_eq!(parse(&source).complexity, 107);
        engine.schedule(task(&source, 1)).unwrap();
        let queued = engine.queued().next().unwrap();
        assert!(queued.is_chunked());
        assert_eq!(queued.chunks().len(), 10);
        // 11 loads + 11 calls + 10 adds = 32 instructions over 10 chunks.
        assert!(queued.chunks().iter().all(|c| c.steps == 4));
        assert_eq!(queued.chunks()[0].id, format!("{}-0", queued.id()));
        assert_eq!(queued.chunks()[0].dependencies, vec!["a".to_string()]);
    }

    #[test]
    fn chunked_task_resumes_across_frames() {
        let (mut engine, lab) = engine(EngineConfig::default());
        let source = heavy(11);
        engine.schedule(task(&source, 1).with_output("out")).unwrap();
        let mut scope = vars(&[("a", 0.5)]);
        let expected = 11.0 * 0.5f64.sin();

        // Each clock read costs 3 ms, so a frame fits at most three chunks.
        lab.set_auto_advance(Duration::from_millis(3));
        let mut frames = 0;
        let mut chunks = 0;
        let value = loop {
            frames += 1;
            let t0 = lab.elapsed_ms();
            let report = engine.execute_frame(t0, &mut scope);
            chunks += report.chunks_run;
            if let Some(done) = report.completed.first() {
                break done.value.clone();
            }
            assert_eq!(report.rescheduled, 1);
            let remaining = engine.queued().next().unwrap().chunks().len();
            assert_eq!(remaining, 10 - chunks);
            assert!(frames < 10, "task never finished");
        };
        // 32 instructions at 4 per chunk finish inside the eighth chunk.
        assert_eq!(frames, 3);
        assert_eq!(chunks, 8);
        let Value::Number(got) = value else {
            panic!("expected number");
        };
        assert!((got - expected).abs() < 1e-12);
        assert_eq!(scope.get("out"), Some(&Value::Number(got)));
    }

    #[test]
    fn inputs_changed_mid_flight_are_not_cached() {
        let (mut engine, lab) = engine(EngineConfig::default());
        let source = heavy(11);
        engine.schedule(task(&source, 1).with_output("out")).unwrap();
        let mut scope = vars(&[("a", 0.5)]);

        lab.set_auto_advance(Duration::from_millis(3));
        let t0 = lab.elapsed_ms();
        let first = engine.execute_frame(t0, &mut scope);
        assert!(first.completed.is_empty());
        assert_eq!(first.rescheduled, 1);

        scope.insert("a".into(), Value::Number(2.0));
        let report = loop {
            let t0 = lab.elapsed_ms();
            let report = engine.execute_frame(t0, &mut scope);
            if !report.completed.is_empty() {
                break report;
            }
            assert_eq!(engine.len(), 1, "task was dropped");
        };
        assert_eq!(report.stale, 1);
        assert!(engine.cache().is_empty());
        lab.set_auto_advance(Duration::ZERO);

        // Back to the starting input: no entry may claim to know the answer.
        scope.insert("a".into(), Value::Number(0.5));
        engine.schedule(task(&source, 1).with_output("out")).unwrap();
        let t0 = lab.elapsed_ms();
        let report = engine.execute_frame(t0, &mut scope);
        assert_eq!(report.cache_hits, 0);
        assert_eq!(report.stale, 0);
        let Some(Value::Number(got)) = scope.get("out").cloned() else {
            panic!("expected number");
        };
        assert!((got - 11.0 * 0.5f64.sin()).abs() < 1e-12);
        assert_eq!(engine.cache().len(), 1);
    }

    #[test]
    fn cached_result_respects_value_kind() {
        let (mut engine, _) = engine(unlimited());
        let mut scope = vars(&[("a", 1.0)]);
        engine.schedule(task("a + 1", 1)).unwrap();
        let report = engine.execute_frame(0.0, &mut scope);
        assert_eq!(report.completed[0].value, Value::Number(2.0));

        scope.insert("a".into(), Value::from("1"));
        engine.schedule(task("a + 1", 1)).unwrap();
        let report = engine.execute_frame(0.0, &mut scope);
        assert_eq!(report.cache_hits, 0);
        assert_eq!(report.completed[0].value, Value::from("11"));
    }

    #[test]
    fn paused_task_yields_to_new_higher_priority_work() {
        let (mut engine, lab) = engine(EngineConfig::default());
        let chunked = engine.schedule(task(&heavy(11), 1)).unwrap();
        let mut scope = vars(&[("a", 1.0)]);
        lab.set_auto_advance(Duration::from_millis(3));
        let t0 = lab.elapsed_ms();
        engine.execute_frame(t0, &mut scope);
        lab.set_auto_advance(Duration::ZERO);

        let urgent = engine.schedule(task("1 + 1", 9)).unwrap();
        let t0 = lab.elapsed_ms();
        let report = engine.execute_frame(t0, &mut scope);
        let order: Vec<TaskId> = report.completed.iter().map(|c| c.task_id).collect();
        assert_eq!(order, vec![urgent, chunked]);
    }

    #[test]
    fn failed_task_is_dropped_and_others_continue() {
        let (mut engine, _) = engine(unlimited());
        let bad = engine.schedule(task("missing * 2", 5)).unwrap();
        let good = engine.schedule(task("2 * 2", 1)).unwrap();
        let report = engine.execute_frame(0.0, &mut vars(&[]));
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].task_id, bad);
        assert_eq!(
            report.failed[0].error,
            FlowError::Eval(EvalError::UnboundVariable {
                name: "missing".into()
            })
        );
        assert_eq!(report.completed[0].task_id, good);
        assert!(engine.is_empty());
    }

    #[test]
    fn failed_chunk_abandons_the_task() {
        let (mut engine, _) = engine(unlimited());
        let source = format!("{} + missing", heavy(11));
        engine.schedule(task(&source, 1)).unwrap();
        let report = engine.execute_frame(0.0, &mut vars(&[("a", 1.0)]));
        assert_eq!(report.failed.len(), 1);
        assert!(report.completed.is_empty());
        assert_eq!(report.rescheduled, 0);
        assert!(engine.is_empty());
    }

    #[test]
    fn pure_results_are_cached_by_dependency_values() {
        let (mut engine, _) = engine(unlimited());
        let mut scope = vars(&[("a", 3.0)]);
        engine.schedule(task("a * a", 1)).unwrap();
        engine.execute_frame(0.0, &mut scope);
        engine.schedule(task("a * a", 1)).unwrap();
        let report = engine.execute_frame(0.0, &mut scope);
        assert_eq!(report.cache_hits, 1);
        assert_eq!(report.completed[0].value, Value::Number(9.0));

        scope.insert("a".into(), Value::Number(4.0));
        engine.schedule(task("a * a", 1)).unwrap();
        let report = engine.execute_frame(0.0, &mut scope);
        assert_eq!(report.cache_hits, 0);
        assert_eq!(report.completed[0].value, Value::Number(16.0));
    }

    #[test]
    fn assignments_are_never_cached() {
        let (mut engine, _) = engine(unlimited());
        let mut scope = vars(&[("n", 0.0)]);
        for _ in 0..2 {
            engine.schedule(task("n = n + 1", 1)).unwrap();
            let report = engine.execute_frame(0.0, &mut scope);
            assert_eq!(report.cache_hits, 0);
        }
        assert_eq!(scope.get("n"), Some(&Value::Number(2.0)));
        assert!(engine.cache().is_empty());
    }

    #[test]
    fn dispose_clears_and_refuses_work() {
        let (mut engine, _) = engine(unlimited());
        engine.schedule(task("1", 1)).unwrap();
        engine.dispose();
        engine.dispose();
        assert!(engine.is_empty());
        assert!(engine.is_disposed());
        assert_eq!(engine.schedule(task("1", 1)), Err(FlowError::Disposed));
    }

    // ── Tracing capture ─────────────────────────────────────────────────

    #[derive(Default)]
    struct Captured {
        spans: Vec<String>,
        messages: Vec<String>,
    }

    struct Capture {
        state: Arc<Mutex<Captured>>,
    }

    impl<S> Layer<S> for Capture
    where
        S: Subscriber + for<'lookup> tracing_subscriber::registry::LookupSpan<'lookup>,
    {
        fn on_new_span(
            &self,
            attrs: &tracing::span::Attributes<'_>,
            _id: &tracing::Id,
            _ctx: Context<'_, S>,
        ) {
            self.state
                .lock()
                .expect("capture lock")
                .spans
                .push(attrs.metadata().name().to_string());
        }

        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            struct Msg {
                message: Option<String>,
            }
            impl tracing::field::Visit for Msg {
                fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
                    if field.name() == "message" {
                        self.message = Some(value.to_string());
                    }
                }

                fn record_debug(
                    &mut self,
                    field: &tracing::field::Field,
                    value: &dyn std::fmt::Debug,
                ) {
                    if field.name() == "message" {
                        self.message = Some(format!("{value:?}").trim_matches('"').to_string());
                    }
                }
            }
            let mut msg = Msg { message: None };
            event.record(&mut msg);
            if let Some(message) = msg.message {
                self.state.lock().expect("capture lock").messages.push(message);
            }
        }
    }

    #[test]
    fn frame_span_and_task_events_are_emitted() {
        let state = Arc::new(Mutex::new(Captured::default()));
        let subscriber = tracing_subscriber::registry().with(Capture {
            state: Arc::clone(&state),
        });
        let _guard = tracing::subscriber::set_default(subscriber);

        let (mut engine, _) = engine(unlimited());
        engine.schedule(task("1 + 1", 1)).unwrap();
        engine.schedule(task("nope + 1", 1)).unwrap();
        engine.execute_frame(0.0, &mut vars(&[]));

        let snapshot = state.lock().expect("capture lock");
        assert!(snapshot.spans.iter().any(|s| s == "scheduler.frame"));
        assert!(
            snapshot
                .messages
                .iter()
                .any(|m| m == "scheduler.task_completed"),
            "expected scheduler.task_completed, got {:?}",
            snapshot.messages
        );
        assert!(
            snapshot.messages.iter().any(|m| m == "scheduler.task_failed"),
            "expected scheduler.task_failed, got {:?}",
            snapshot.messages
        );
    }
}
