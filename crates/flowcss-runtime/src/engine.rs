#![forbid(unsafe_code)]

//! Engine facade.
//!
//! [`FlowEngine`] owns one variable graph, one scheduler (with its result
//! cache), and one [`DomBridge`]. The host calls [`FlowEngine::tick`] once
//! per animation frame; each running tick
//!
//! 1. refreshes the built-in variables (`time`, `frameCount`, pointer and
//!    viewport),
//! 2. reschedules every flow whose inputs changed,
//! 3. runs the scheduler for the frame budget,
//! 4. flushes the bridge and invokes the frame-request hook.
//!
//! # Flows
//!
//! `flow(source)` parses `source`, creates a result variable named
//! `__flow_N`, links it as a dependent of every variable the expression
//! reads, and schedules its first evaluation. The result variable is
//! returned immediately and has no value until the scheduler gets to it.
//! When any input changes later the result variable is marked dirty and the
//! flow is evaluated again on the next tick.
//!
//! A flow that fails is marked clean, so it is retried only after one of its
//! inputs changes again.

use std::fmt;
use std::rc::Rc;

use flowcss_core::Value;
use flowcss_core::clock::Clock;
use flowcss_core::expr::{Expression, parse};

use crate::cache::CacheStats;
use crate::config::EngineConfig;
use crate::dom::{DomBridge, ElementHandle, NullBridge, StyleMap};
use crate::error::{FlowError, Result};
use crate::reactive::{Variable, VariableGraph};
use crate::scheduler::{ComputationTask, ExecutionEngine, FrameReport};

/// Value of the `GOLDEN_RATIO` built-in.
pub const GOLDEN_RATIO: f64 = 1.618_033_988_749_895;

/// Prefix of the result variables created by [`FlowEngine::flow`].
pub const FLOW_PREFIX: &str = "__flow_";

/// Names of the variables every engine defines.
pub const BUILTINS: [&str; 9] = [
    "PI",
    "E",
    "GOLDEN_RATIO",
    "time",
    "frameCount",
    "mouseX",
    "mouseY",
    "viewportWidth",
    "viewportHeight",
];

struct FlowBinding {
    variable: Variable,
    expression: Rc<Expression>,
}

/// Reactive style engine.
pub struct FlowEngine {
    config: EngineConfig,
    clock: Clock,
    graph: VariableGraph,
    scheduler: ExecutionEngine,
    bridge: Box<dyn DomBridge>,
    flows: Vec<FlowBinding>,
    next_flow: usize,
    pointer: (f64, f64),
    viewport: (f64, f64),
    running: bool,
    started_at_ms: f64,
    frame_count: u64,
    frame_request: Option<Box<dyn FnMut()>>,
    disposed: bool,
}

impl fmt::Debug for FlowEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowEngine")
            .field("config", &self.config)
            .field("variables", &self.graph.len())
            .field("flows", &self.flows.len())
            .field("queued", &self.scheduler.len())
            .field("running", &self.running)
            .field("frame_count", &self.frame_count)
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

impl FlowEngine {
    /// An engine on the real clock with no presentation layer.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_parts(config, Clock::real(), Box::new(NullBridge))
    }

    /// An engine on an explicit clock and bridge.
    pub fn with_parts(
        config: EngineConfig,
        clock: Clock,
        bridge: Box<dyn DomBridge>,
    ) -> Result<Self> {
        let config = config.sanitized();
        if config.requests_inert_backend() {
            tracing::debug!(
                message = "engine.inert_backend",
                worker_count = config.worker_count,
                enable_gpu = config.enable_gpu
            );
        }
        let engine = Self {
            scheduler: ExecutionEngine::new(&config, clock.clone()),
            graph: VariableGraph::new(clock.clone()),
            viewport: config.viewport,
            config,
            clock,
            bridge,
            flows: Vec::new(),
            next_flow: 0,
            pointer: (0.0, 0.0),
            running: false,
            started_at_ms: 0.0,
            frame_count: 0,
            frame_request: None,
            disposed: false,
        };
        engine.install_builtins()?;
        Ok(engine)
    }

    fn install_builtins(&self) -> Result<()> {
        let (width, height) = self.viewport;
        let initial = [
            std::f64::consts::PI,
            std::f64::consts::E,
            GOLDEN_RATIO,
            0.0,
            0.0,
            0.0,
            0.0,
            width,
            height,
        ];
        for (name, value) in BUILTINS.into_iter().zip(initial) {
            self.graph.variable_with(name, value)?;
        }
        Ok(())
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed {
            Err(FlowError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Get or create the variable called `name`. `initial` is applied only
    /// when the variable is created.
    pub fn variable(&self, name: &str, initial: Option<Value>) -> Result<Variable> {
        self.ensure_live()?;
        match initial {
            Some(value) => self.graph.variable_with(name, value),
            None => self.graph.variable(name),
        }
    }

    /// Bind an expression to a new result variable and schedule it.
    ///
    /// Variables the expression reads are created (without a value) if they
    /// do not exist yet. On error the edges already added are removed again,
    /// and the result name is never handed out twice.
    pub fn flow(&mut self, source: &str) -> Result<Variable> {
        self.ensure_live()?;
        let expression = Rc::new(parse(source));
        let name = self.next_flow_name();
        let output = self.graph.variable(&name)?;
        let mut linked = Vec::with_capacity(expression.dependencies.len());
        if let Err(error) = self.bind_flow(&output, &expression, &mut linked) {
            for input in &linked {
                output.remove_dependency(input);
            }
            output.mark_clean();
            return Err(error);
        }
        self.flows.push(FlowBinding {
            variable: output.clone(),
            expression,
        });
        Ok(output)
    }

    fn bind_flow(
        &mut self,
        output: &Variable,
        expression: &Rc<Expression>,
        linked: &mut Vec<Variable>,
    ) -> Result<()> {
        for dependency in &expression.dependencies {
            let input = self.graph.variable(dependency)?;
            output.add_dependency(&input)?;
            linked.push(input);
        }
        self.scheduler.schedule(
            ComputationTask::new(Rc::clone(expression), self.config.flow_priority)
                .with_output(output.name()),
        )?;
        Ok(())
    }

    fn next_flow_name(&mut self) -> String {
        loop {
            let name = format!("{FLOW_PREFIX}{}", self.next_flow);
            self.next_flow += 1;
            if self.graph.find(&name).is_none() {
                return name;
            }
        }
    }

    /// Hand `styles` for `element` to the bridge.
    pub fn style(&mut self, element: impl Into<ElementHandle>, styles: &StyleMap) -> Result<()> {
        self.ensure_live()?;
        self.bridge.apply(&element.into(), styles)
    }

    /// Start doing work on [`tick`](Self::tick). `time` counts from now.
    pub fn start(&mut self) -> Result<()> {
        self.ensure_live()?;
        if !self.running {
            self.running = true;
            self.started_at_ms = self.clock.now_ms();
        }
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Called at the end of every running tick, to ask the host for the
    /// next frame.
    pub fn on_frame_request(&mut self, request: impl FnMut() + 'static) {
        self.frame_request = Some(Box::new(request));
    }

    /// Record a pointer move. Visible as `mouseX`/`mouseY` from the next
    /// tick.
    pub fn set_pointer(&mut self, x: f64, y: f64) {
        self.pointer = (x, y);
    }

    /// Record a viewport resize. Visible as `viewportWidth`/`viewportHeight`
    /// from the next tick.
    pub fn set_viewport(&mut self, width: f64, height: f64) {
        self.viewport = (width, height);
    }

    /// Run one frame. A stopped engine returns an empty report.
    pub fn tick(&mut self) -> Result<FrameReport> {
        self.ensure_live()?;
        if !self.running {
            return Ok(FrameReport::default());
        }
        let frame_start = self.clock.now_ms();
        self.frame_count += 1;
        self.refresh_builtins(frame_start)?;
        self.reschedule_dirty_flows()?;

        let mut scope = self.graph.clone();
        let report = self.scheduler.execute_frame(frame_start, &mut scope);
        for failure in &report.failed {
            if let Some(var) = failure.output.as_deref().and_then(|n| self.graph.find(n)) {
                var.mark_clean();
            }
        }

        self.bridge.flush();
        if let Some(request) = self.frame_request.as_mut() {
            request();
        }
        Ok(report)
    }

    fn refresh_builtins(&self, frame_start: f64) -> Result<()> {
        let (mouse_x, mouse_y) = self.pointer;
        let (width, height) = self.viewport;
        let updates = [
            ("time", (frame_start - self.started_at_ms) / 1000.0),
            ("frameCount", self.frame_count as f64),
            ("mouseX", mouse_x),
            ("mouseY", mouse_y),
            ("viewportWidth", width),
            ("viewportHeight", height),
        ];
        for (name, value) in updates {
            self.graph.variable(name)?.set(value)?;
        }
        Ok(())
    }

    fn reschedule_dirty_flows(&mut self) -> Result<()> {
        for flow in &self.flows {
            let name = flow.variable.name();
            if flow.variable.is_dirty() && !self.scheduler.has_pending_output(name) {
                self.scheduler.schedule(
                    ComputationTask::new(Rc::clone(&flow.expression), self.config.flow_priority)
                        .with_output(name),
                )?;
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn graph(&self) -> &VariableGraph {
        &self.graph
    }

    #[must_use]
    pub fn scheduler(&self) -> &ExecutionEngine {
        &self.scheduler
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.scheduler.cache().stats()
    }

    /// Ticks run since creation.
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Result variables of every flow, in creation order.
    #[must_use]
    pub fn flows(&self) -> Vec<Variable> {
        self.flows.iter().map(|f| f.variable.clone()).collect()
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Stop, drop queued work and cached results, and release every
    /// subscription and relation in the graph. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.running = false;
        self.scheduler.dispose();
        self.graph.dispose();
        self.flows.clear();
        self.frame_request = None;
        self.disposed = true;
    }
}

impl Drop for FlowEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}
