#![forbid(unsafe_code)]

//! E2E tests for the flow engine.
//!
//! Validates that:
//! 1. The documented examples (`x = 2 + 3 * 4`, `a > b ? 1 : 0`) produce
//!    their expected values through the whole engine.
//! 2. A heavy flow spreads over several frames without overrunning the
//!    frame budget and still lands on the right value.
//! 3. Animated styles follow `time` and reach the bridge once per tick.
//! 4. Failures are logged and contained: a failing subscriber or flow does
//!    not stop the tick.
//! 5. Configuration from the environment reaches the scheduler.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use flowcss_core::Value;
use flowcss_core::clock::{Clock, LabClock};
use flowcss_runtime::{
    EngineConfig, FlowEngine, FlowError, NullBridge, RecordingBridge, StyleMap, StyleValue,
};
use tracing::Subscriber;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};
use web_time::Duration;

// ============================================================================
// Helpers
// ============================================================================

fn engine_with(config: EngineConfig) -> (FlowEngine, LabClock, RecordingBridge) {
    let lab = LabClock::new();
    let bridge = RecordingBridge::new();
    let engine =
        FlowEngine::with_parts(config, Clock::lab(&lab), Box::new(bridge.clone())).unwrap();
    (engine, lab, bridge)
}

fn number(value: Option<Value>) -> f64 {
    value.and_then(|v| v.as_number()).unwrap_or(f64::NAN)
}

/// Collects event messages and their `error` field.
#[derive(Clone, Default)]
struct Captured {
    events: Arc<Mutex<Vec<(String, Option<String>)>>>,
}

impl Captured {
    fn messages(&self) -> Vec<String> {
        self.events
            .lock()
            .expect("capture lock")
            .iter()
            .map(|(m, _)| m.clone())
            .collect()
    }

    fn error_of(&self, message: &str) -> Option<String> {
        self.events
            .lock()
            .expect("capture lock")
            .iter()
            .find(|(m, _)| m == message)
            .and_then(|(_, e)| e.clone())
    }
}

impl<S> Layer<S> for Captured
where
    S: Subscriber + for<'lookup> tracing_subscriber::registry::LookupSpan<'lookup>,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        #[derive(Default)]
        struct V {
            message: Option<String>,
            error: Option<String>,
        }
        impl tracing::field::Visit for V {
            fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
                if field.name() == "message" {
                    self.message = Some(value.to_string());
                }
            }

            fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                let text = format!("{value:?}").trim_matches('"').to_string();
                match field.name() {
                    "message" => self.message = Some(text),
                    "error" => self.error = Some(text),
                    _ => {}
                }
            }
        }
        let mut visitor = V::default();
        event.record(&mut visitor);
        if let Some(message) = visitor.message {
            self.events
                .lock()
                .expect("capture lock")
                .push((message, visitor.error));
        }
    }
}

// ============================================================================
// 1. Documented examples
// ============================================================================

#[test]
fn assignment_example_evaluates_to_fourteen() {
    let (mut engine, _, _) = engine_with(EngineConfig::default());
    let out = engine.flow("x = 2 + 3 * 4").unwrap();
    engine.start().unwrap();
    engine.tick().unwrap();
    assert_eq!(out.get(), Some(Value::Number(14.0)));
    assert_eq!(engine.graph().value("x"), Some(Value::Number(14.0)));
}

#[test]
fn ternary_example_selects_first_branch() {
    let (mut engine, _, _) = engine_with(EngineConfig::default());
    engine.variable("a", Some(Value::from(5))).unwrap();
    let b = engine.variable("b", Some(Value::from(2))).unwrap();
    let out = engine.flow("a > b ? 1 : 0").unwrap();
    engine.start().unwrap();
    engine.tick().unwrap();
    assert_eq!(out.get(), Some(Value::Number(1.0)));

    b.set(7.0).unwrap();
    engine.tick().unwrap();
    assert_eq!(out.get(), Some(Value::Number(0.0)));
}

// ============================================================================
// 2. Heavy flows across frames
// ============================================================================

#[test]
fn heavy_flow_spans_frames_within_budget() {
    let (mut engine, lab, _) = engine_with(EngineConfig::default());
    engine.variable("a", Some(Value::from(1))).unwrap();
    let source = vec!["sin(a) * cos(a)"; 12].join(" + ");
    let heavy = engine.flow(&source).unwrap();
    let light = engine.flow("a + 1").unwrap();
    engine.start().unwrap();

    lab.set_auto_advance(Duration::from_millis(2));
    let mut frames = 0;
    while heavy.get().is_none() {
        frames += 1;
        assert!(frames < 100, "heavy flow never finished");
        let report = engine.tick().unwrap();
        assert!(report.failed.is_empty());
        // Every chunk costs at least one 2 ms clock read out of a 16 ms frame.
        assert!(report.chunks_run <= 8, "{} chunks in one frame", report.chunks_run);
    }
    lab.set_auto_advance(Duration::ZERO);

    assert!(frames > 1, "expected the heavy flow to be chunked");
    assert_eq!(light.get(), Some(Value::Number(2.0)));
    let expected = 12.0 * 1f64.sin() * 1f64.cos();
    assert!((number(heavy.get()) - expected).abs() < 1e-12);
}

// ============================================================================
// 3. Animated styles
// ============================================================================

#[test]
fn animated_style_follows_time() {
    let (mut engine, lab, bridge) = engine_with(EngineConfig::default());
    let opacity = engine.flow("clamp(time * 2, 0, 1)").unwrap();
    let mut styles = StyleMap::new();
    styles.insert("opacity".into(), StyleValue::from(&opacity));
    engine.style("hero", &styles).unwrap();
    engine.start().unwrap();

    let mut seen = Vec::new();
    for _ in 0..4 {
        lab.advance(Duration::from_millis(200));
        engine.tick().unwrap();
        seen.push(number(bridge.latest("hero", "opacity")));
    }
    assert_eq!(seen, vec![0.4, 0.8, 1.0, 1.0]);
    assert_eq!(bridge.flushes(), 4);
    // The clamp holds at 1, so the last tick publishes nothing new.
    assert_eq!(bridge.committed().len(), 3);
}

#[test]
fn pointer_driven_transform() {
    let (mut engine, _, bridge) = engine_with(EngineConfig::default().with_viewport(800.0, 600.0));
    let tilt = engine
        .flow("(mouseX - viewportWidth / 2) / viewportWidth * 30")
        .unwrap();
    let mut styles = StyleMap::new();
    styles.insert("rotate".into(), StyleValue::from(&tilt));
    engine.style("card", &styles).unwrap();
    engine.start().unwrap();

    engine.set_pointer(800.0, 0.0);
    engine.tick().unwrap();
    assert_eq!(bridge.latest("card", "rotate"), Some(Value::Number(15.0)));

    engine.set_pointer(400.0, 0.0);
    engine.tick().unwrap();
    assert_eq!(bridge.latest("card", "rotate"), Some(Value::Number(0.0)));
}

// ============================================================================
// 4. Contained failures
// ============================================================================

#[test]
fn failures_are_logged_and_contained() {
    let captured = Captured::default();
    let subscriber = tracing_subscriber::registry().with(captured.clone());
    let _guard = tracing::subscriber::set_default(subscriber);

    let (mut engine, _, _) = engine_with(EngineConfig::default());
    let a = engine.variable("a", Some(Value::from(1))).unwrap();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let _bad = a
        .try_subscribe(|_| Err(FlowError::subscriber("listener gone")))
        .unwrap();
    let _good = a
        .subscribe(move |v| sink.borrow_mut().push(v.clone()))
        .unwrap();

    let broken = engine.flow("missing_fn(a) * nope").unwrap();
    let fine = engine.flow("a * 3").unwrap();
    engine.start().unwrap();
    let report = engine.tick().unwrap();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(broken.get(), None);
    assert_eq!(fine.get(), Some(Value::Number(3.0)));

    a.set(2.0).unwrap();
    assert_eq!(*seen.borrow(), vec![Value::Number(2.0)]);
    engine.tick().unwrap();
    assert_eq!(fine.get(), Some(Value::Number(6.0)));

    let messages = captured.messages();
    assert!(
        messages.iter().any(|m| m == "scheduler.task_failed"),
        "got {messages:?}"
    );
    assert!(
        messages.iter().any(|m| m == "variable.subscriber_failed"),
        "got {messages:?}"
    );
    let error = captured.error_of("variable.subscriber_failed").unwrap_or_default();
    assert!(error.contains("listener gone"), "error field was {error:?}");
}

#[test]
fn cycles_are_rejected_at_link_time() {
    let (engine, _, _) = engine_with(EngineConfig::default());
    let a = engine.variable("a", None).unwrap();
    let b = engine.variable("b", None).unwrap();
    a.add_dependency(&b).unwrap();
    assert!(matches!(b.add_dependency(&a), Err(FlowError::Cycle { .. })));
    assert_eq!(b.mark_dirty(), 2);
}

// ============================================================================
// 5. Configuration
// ============================================================================

#[test]
fn env_config_reaches_the_engine() {
    let env: HashMap<&str, &str> = [
        ("FLOWCSS_MAX_FRAME_TIME_MS", "8"),
        ("FLOWCSS_CACHE_SIZE", "2"),
        ("FLOWCSS_WORKER_COUNT", "not-a-number"),
    ]
    .into_iter()
    .collect();
    let config = EngineConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()));
    assert_eq!(config.max_frame_time_ms, 8.0);
    assert_eq!(config.worker_count, EngineConfig::default().worker_count);

    let lab = LabClock::new();
    let mut engine = FlowEngine::with_parts(config, Clock::lab(&lab), Box::new(NullBridge)).unwrap();
    let v = engine.variable("v", Some(Value::from(0))).unwrap();
    engine.flow("v + 1").unwrap();
    engine.start().unwrap();
    for i in 1..=4 {
        v.set(f64::from(i)).unwrap();
        engine.tick().unwrap();
    }
    let stats = engine.cache_stats();
    assert_eq!(stats.max_size, 2);
    assert_eq!(stats.size, 2);
}
