//! Execution recorder for handler invocations.
//!
//! Wraps a call, measures its latency and emits one [`ExecutionRecord`] per
//! invocation:
//!
//! ```text
//! method=user.find description="Find a user" args="arg0: 42 arg1: null " elapsed_ms=12 caller=10.0.0.7
//! ```
//!
//! ## Guarantees
//!
//! - The wrapped call's output is returned unchanged, and the recorder adds no
//!   work before it besides starting a timer.
//! - Calls at or above the slow threshold are recorded at `warn`, others at `info`.
//! - The per-call timer is a scope guard ([`CallTimer`]) released on every exit
//!   path, including errors, panics and cancellation. [`ExecutionRecorder::active_calls`]
//!   counts the live ones.
//! - Recording failures are caught and logged at `error`; they never touch the
//!   call's result.
//!
//! Failed calls (`Err` outputs through [`ExecutionRecorder::run_fallible`]) are
//! recorded too, with [`Outcome::Failed`] and the same latency-based level.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::net::IpAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::RecorderConfig;

/// A statically declared instrumented operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Operation {
    /// Short method name, e.g. `user.find`.
    pub name: &'static str,
    /// Human-readable description; may be empty.
    pub description: &'static str,
}

impl Operation {
    /// Declare an operation.
    pub const fn new(name: &'static str, description: &'static str) -> Self {
        Self { name, description }
    }
}

/// Argument summary builder.
///
/// Arguments are rendered with `Debug` when added, so the wrapped call can
/// take ownership of them afterwards.
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    rendered: Vec<String>,
    unprintable: Option<usize>,
}

impl CallArgs {
    /// Start an empty summary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the next positional argument.
    pub fn arg<T: fmt::Debug + ?Sized>(mut self, value: &T) -> Self {
        self.push(|| format!("{value:?}"));
        self
    }

    /// Add the next positional argument, rendering `None` as `null`.
    pub fn opt_arg<T: fmt::Debug + ?Sized>(mut self, value: Option<&T>) -> Self {
        match value {
            Some(value) => self.push(|| format!("{value:?}")),
            None => self.rendered.push("null".to_string()),
        }
        self
    }

    /// Number of arguments added.
    pub fn len(&self) -> usize {
        self.rendered.len()
    }

    /// Whether no arguments were added.
    pub fn is_empty(&self) -> bool {
        self.rendered.is_empty()
    }

    /// `arg0: v0 arg1: v1 ` summary.
    pub fn summary(&self) -> Result<String, RecordError> {
        if let Some(index) = self.unprintable {
            return Err(RecordError::UnprintableArgument { index });
        }
        Ok(self
            .rendered
            .iter()
            .enumerate()
            .map(|(i, value)| format!("arg{i}: {value} "))
            .collect())
    }

    fn push(&mut self, render: impl FnOnce() -> String) {
        let index = self.rendered.len();
        match panic::catch_unwind(AssertUnwindSafe(render)) {
            Ok(rendered) => self.rendered.push(rendered),
            Err(_) => {
                if self.unprintable.is_none() {
                    self.unprintable = Some(index);
                }
                self.rendered.push(String::new());
            }
        }
    }
}

/// Error while building or emitting a record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    /// An argument's `Debug` implementation panicked.
    #[error("argument {index} could not be rendered")]
    UnprintableArgument {
        /// Position of the argument.
        index: usize,
    },

    /// The sink panicked while emitting.
    #[error("record sink panicked: {0}")]
    SinkPanicked(String),
}

/// Whether the wrapped call succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The call returned normally (or `Ok`).
    Completed,
    /// The call returned `Err`.
    Failed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

/// Log level of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RecordLevel {
    /// Normal call.
    Info,
    /// Slow call.
    Warn,
}

impl RecordLevel {
    /// `Warn` when `elapsed >= threshold`, else `Info`.
    pub fn for_elapsed(elapsed: Duration, threshold: Duration) -> Self {
        if elapsed >= threshold {
            Self::Warn
        } else {
            Self::Info
        }
    }
}

/// One instrumented invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRecord {
    /// Operation name.
    pub method: &'static str,
    /// Operation description.
    pub description: &'static str,
    /// `arg0: v0 arg1: v1 ` summary.
    pub arg_summary: String,
    /// Wall time of the call.
    pub elapsed: Duration,
    /// Remote address of the request, when known.
    pub caller: Option<IpAddr>,
    /// Call outcome.
    pub outcome: Outcome,
    /// Log level.
    pub level: RecordLevel,
}

/// Destination for execution records.
pub trait RecordSink: Send + Sync {
    /// Emit one record.
    fn record(&self, record: &ExecutionRecord);
}

/// Emits records as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl RecordSink for TracingSink {
    fn record(&self, record: &ExecutionRecord) {
        let caller = record
            .caller
            .map_or_else(|| "unknown".to_string(), |ip| ip.to_string());
        let elapsed_ms = record.elapsed.as_millis() as u64;

        match record.level {
            RecordLevel::Warn => tracing::warn!(
                target: "service_commons::recorder",
                method = record.method,
                description = record.description,
                args = %record.arg_summary,
                elapsed_ms,
                caller = %caller,
                outcome = %record.outcome,
                "Slow execution"
            ),
            RecordLevel::Info => tracing::info!(
                target: "service_commons::recorder",
                method = record.method,
                description = record.description,
                args = %record.arg_summary,
                elapsed_ms,
                caller = %caller,
                outcome = %record.outcome,
                "Execution"
            ),
        }
    }
}

/// Keeps records in memory, for tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<ExecutionRecord>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records emitted so far.
    pub fn records(&self) -> Vec<ExecutionRecord> {
        self.records.lock().clone()
    }

    /// Number of records emitted so far.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether nothing was emitted.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl RecordSink for MemorySink {
    fn record(&self, record: &ExecutionRecord) {
        self.records.lock().push(record.clone());
    }
}

/// Scope guard timing one call.
///
/// Counted by its recorder while alive.
#[derive(Debug)]
pub struct CallTimer<'a> {
    started: Instant,
    active: &'a AtomicUsize,
}

impl<'a> CallTimer<'a> {
    fn start(active: &'a AtomicUsize) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self {
            started: Instant::now(),
            active,
        }
    }

    /// Time since the call started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for CallTimer<'_> {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Times calls and hands records to a sink.
pub struct ExecutionRecorder {
    slow_threshold: Duration,
    sink: Arc<dyn RecordSink>,
    active: AtomicUsize,
}

impl fmt::Debug for ExecutionRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionRecorder")
            .field("slow_threshold", &self.slow_threshold)
            .field("active_calls", &self.active_calls())
            .finish_non_exhaustive()
    }
}

impl Default for ExecutionRecorder {
    fn default() -> Self {
        Self::from_config(&RecorderConfig::default())
    }
}

impl ExecutionRecorder {
    /// Recorder emitting to `tracing` with the given slow threshold.
    pub fn new(slow_threshold: Duration) -> Self {
        Self {
            slow_threshold,
            sink: Arc::new(TracingSink),
            active: AtomicUsize::new(0),
        }
    }

    /// Recorder built from configuration.
    pub fn from_config(config: &RecorderConfig) -> Self {
        Self::new(config.slow_threshold)
    }

    /// Replace the sink.
    pub fn with_sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Slow-call threshold.
    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }

    /// Number of calls currently being timed.
    pub fn active_calls(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Start timing a call manually.
    pub fn start(&self) -> CallTimer<'_> {
        CallTimer::start(&self.active)
    }

    /// Run `call` and record it. Returns the call's output unchanged.
    pub async fn run<F: Future>(
        &self,
        op: &Operation,
        args: CallArgs,
        caller: Option<IpAddr>,
        call: F,
    ) -> F::Output {
        self.run_recorded(op, args, caller, call).await.0
    }

    /// Run `call`, record it, and also return the record when recording succeeded.
    pub async fn run_recorded<F: Future>(
        &self,
        op: &Operation,
        args: CallArgs,
        caller: Option<IpAddr>,
        call: F,
    ) -> (F::Output, Option<ExecutionRecord>) {
        let timer = self.start();
        let output = call.await;
        let record = self.finish(op, &args, caller, &timer, Outcome::Completed);
        (output, record)
    }

    /// Run a fallible `call`, recording `Err` outputs as failed.
    pub async fn run_fallible<T, E, F>(
        &self,
        op: &Operation,
        args: CallArgs,
        caller: Option<IpAddr>,
        call: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        let timer = self.start();
        let output = call.await;
        let outcome = if output.is_ok() {
            Outcome::Completed
        } else {
            Outcome::Failed
        };
        self.finish(op, &args, caller, &timer, outcome);
        output
    }

    /// Build and emit the record for a finished call.
    ///
    /// Never panics; failures are logged and yield `None`.
    pub fn finish(
        &self,
        op: &Operation,
        args: &CallArgs,
        caller: Option<IpAddr>,
        timer: &CallTimer<'_>,
        outcome: Outcome,
    ) -> Option<ExecutionRecord> {
        let elapsed = timer.elapsed();
        let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
            let record = ExecutionRecord {
                method: op.name,
                description: op.description,
                arg_summary: args.summary()?,
                elapsed,
                caller,
                outcome,
                level: RecordLevel::for_elapsed(elapsed, self.slow_threshold),
            };
            self.sink.record(&record);
            Ok::<_, RecordError>(record)
        }));

        let failure = match attempt {
            Ok(Ok(record)) => return Some(record),
            Ok(Err(e)) => e,
            Err(payload) => RecordError::SinkPanicked(panic_message(payload.as_ref())),
        };
        tracing::error!(
            target: "service_commons::recorder",
            method = op.name,
            error = %failure,
            "Execution recording failed"
        );
        None
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const FIND_USER: Operation = Operation::new("user.find", "Find a user");

    fn recorder() -> (ExecutionRecorder, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let recorder = ExecutionRecorder::new(Duration::from_millis(1000)).with_sink(sink.clone());
        (recorder, sink)
    }

    struct Exploding;

    impl fmt::Debug for Exploding {
        fn fmt(&self, _: &mut fmt::Formatter<'_>) -> fmt::Result {
            panic!("no debug for you")
        }
    }

    struct PanickingSink;

    impl RecordSink for PanickingSink {
        fn record(&self, _: &ExecutionRecord) {
            panic!("sink is down")
        }
    }

    #[test]
    fn test_arg_summary() {
        let summary = CallArgs::new()
            .arg(&42)
            .opt_arg::<String>(None)
            .arg("ann")
            .summary()
            .unwrap();
        assert_eq!(summary, "arg0: 42 arg1: null arg2: \"ann\" ");
        assert_eq!(CallArgs::new().summary().unwrap(), "");
    }

    #[test]
    fn test_level_threshold() {
        let threshold = Duration::from_millis(1000);
        assert_eq!(RecordLevel::for_elapsed(Duration::from_millis(999), threshold), RecordLevel::Info);
        assert_eq!(RecordLevel::for_elapsed(Duration::from_millis(1000), threshold), RecordLevel::Warn);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_is_warn() {
        let (recorder, sink) = recorder();
        let caller = Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)));

        let (output, record) = recorder
            .run_recorded(&FIND_USER, CallArgs::new().arg(&7), caller, async {
                tokio::time::sleep(Duration::from_millis(1500)).await;
                "done"
            })
            .await;

        assert_eq!(output, "done");
        let record = record.unwrap();
        assert_eq!(record.level, RecordLevel::Warn);
        assert!(record.elapsed >= Duration::from_millis(1500));
        assert_eq!(record.caller, caller);
        assert_eq!(record.method, "user.find");
        assert_eq!(record.arg_summary, "arg0: 7 ");
        assert_eq!(sink.len(), 1);
        assert_eq!(recorder.active_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_call_is_info() {
        let (recorder, sink) = recorder();

        let output = recorder
            .run(&FIND_USER, CallArgs::new(), None, async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                1
            })
            .await;

        assert_eq!(output, 1);
        assert_eq!(sink.records()[0].level, RecordLevel::Info);
        assert_eq!(sink.records()[0].outcome, Outcome::Completed);
        assert_eq!(recorder.active_calls(), 0);
    }

    #[tokio::test]
    async fn test_timer_live_during_call() {
        let (recorder, _) = recorder();
        recorder
            .run(&FIND_USER, CallArgs::new(), None, async {
                assert_eq!(recorder.active_calls(), 1);
            })
            .await;
        assert_eq!(recorder.active_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_call_recorded() {
        let (recorder, sink) = recorder();

        let result: Result<(), &str> = recorder
            .run_fallible(&FIND_USER, CallArgs::new(), None, async {
                tokio::time::sleep(Duration::from_millis(1200)).await;
                Err("not found")
            })
            .await;

        assert_eq!(result, Err("not found"));
        let records = sink.records();
        assert_eq!(records[0].outcome, Outcome::Failed);
        assert_eq!(records[0].level, RecordLevel::Warn);
        assert_eq!(recorder.active_calls(), 0);
    }

    #[tokio::test]
    async fn test_timer_released_on_panic() {
        let (recorder, sink) = recorder();
        let recorder = Arc::new(recorder);

        let task = {
            let recorder = Arc::clone(&recorder);
            tokio::spawn(async move {
                recorder
                    .run(&FIND_USER, CallArgs::new(), None, async {
                        panic!("handler blew up");
                    })
                    .await
            })
        };

        assert!(task.await.unwrap_err().is_panic());
        assert_eq!(recorder.active_calls(), 0);
        assert!(sink.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_released_on_cancel() {
        let (recorder, _) = recorder();

        let call = recorder.run(&FIND_USER, CallArgs::new(), None, tokio::time::sleep(Duration::from_secs(60)));
        let timed_out = tokio::time::timeout(Duration::from_secs(1), call).await;

        assert!(timed_out.is_err());
        assert_eq!(recorder.active_calls(), 0);
    }

    #[tokio::test]
    async fn test_unprintable_arg_does_not_affect_result() {
        let (recorder, sink) = recorder();

        let (output, record) = recorder
            .run_recorded(&FIND_USER, CallArgs::new().arg(&1).arg(&Exploding), None, async { 5 })
            .await;

        assert_eq!(output, 5);
        assert!(record.is_none());
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_sink_panic_does_not_affect_result() {
        let recorder = ExecutionRecorder::new(Duration::from_millis(1000)).with_sink(Arc::new(PanickingSink));

        let (output, record) = recorder.run_recorded(&FIND_USER, CallArgs::new(), None, async { 5 }).await;

        assert_eq!(output, 5);
        assert!(record.is_none());
        assert_eq!(recorder.active_calls(), 0);
    }

    #[test]
    fn test_unprintable_arg_error() {
        let args = CallArgs::new().arg(&Exploding);
        assert_eq!(args.summary(), Err(RecordError::UnprintableArgument { index: 0 }));
        assert_eq!(args.len(), 1);
    }
}
