//! Distributed tracing spans and the per-context trace manager.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;

/// Span lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanStatus {
    /// Span is open.
    Started,
    /// Finished successfully.
    Success,
    /// Finished with an error.
    Error,
}

/// One timed span in a trace tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceSpan {
    /// Trace the span belongs to; fixed across the tree.
    pub trace_id: String,
    /// This span's own identifier.
    pub span_id: String,
    /// Parent span, `None` for the root.
    pub parent_span_id: Option<String>,
    /// Service under trace.
    pub service: String,
    /// Method under trace.
    pub method: String,
    /// Start, milliseconds since the Unix epoch.
    pub start_ms: u64,
    /// End, set when the span finishes.
    pub end_ms: Option<u64>,
    /// Lifecycle status.
    pub status: SpanStatus,
    /// Key/value annotations.
    pub tags: BTreeMap<String, String>,
    /// Timed log entries.
    pub logs: BTreeMap<String, String>,
}

impl TraceSpan {
    /// Span duration in milliseconds, `None` while open.
    #[must_use]
    pub fn duration_ms(&self) -> Option<u64> {
        self.end_ms.map(|end| end.saturating_sub(self.start_ms))
    }
}

/// Sink for finished spans.
pub trait TraceCollector: Send + Sync {
    /// Receives a finished span.
    fn collect(&self, span: &TraceSpan);
}

/// Default collector: success at info level, errors at error level.
#[derive(Debug, Default)]
pub struct LogCollector;

impl TraceCollector for LogCollector {
    fn collect(&self, span: &TraceSpan) {
        let duration = span.duration_ms().unwrap_or(0);
        match span.status {
            SpanStatus::Error => {
                tracing::error!(
                    trace_id = %span.trace_id,
                    span_id = %span.span_id,
                    service = %span.service,
                    method = %span.method,
                    duration_ms = duration,
                    error = span.logs.get("error").map(String::as_str).unwrap_or(""),
                    "trace span failed"
                );
            }
            _ => {
                tracing::info!(
                    trace_id = %span.trace_id,
                    span_id = %span.span_id,
                    service = %span.service,
                    method = %span.method,
                    duration_ms = duration,
                    "trace span finished"
                );
            }
        }
    }
}

/// Collector retaining finished spans in memory, for tests and the trace
/// chain query.
#[derive(Debug, Default)]
pub struct MemoryCollector {
    spans: RwLock<Vec<TraceSpan>>,
}

impl MemoryCollector {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All finished spans of `trace_id`, in finish order.
    #[must_use]
    pub fn trace_chain(&self, trace_id: &str) -> Vec<TraceSpan> {
        self.spans
            .read()
            .map(|spans| {
                spans
                    .iter()
                    .filter(|span| span.trace_id == trace_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of collected spans.
    #[must_use]
    pub fn len(&self) -> usize {
        self.spans.read().map(|spans| spans.len()).unwrap_or(0)
    }

    /// True when nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TraceCollector for MemoryCollector {
    fn collect(&self, span: &TraceSpan) {
        if let Ok(mut spans) = self.spans.write() {
            spans.push(span.clone());
        }
    }
}

/// Identity of the current logical call path.
///
/// Inside the runtime that is the tokio task; on plain threads (tests,
/// synchronous callers) it falls back to the thread id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ContextId {
    Task(tokio::task::Id),
    Thread(std::thread::ThreadId),
}

fn current_context() -> ContextId {
    tokio::task::try_id()
        .map(ContextId::Task)
        .unwrap_or_else(|| ContextId::Thread(std::thread::current().id()))
}

/// Maintains the active span per concurrent context and fans finished
/// spans out to registered collectors.
pub struct TraceManager {
    stacks: DashMap<ContextId, Vec<TraceSpan>>,
    collectors: RwLock<Vec<Arc<dyn TraceCollector>>>,
}

impl TraceManager {
    /// Creates a manager with the default log collector registered.
    #[must_use]
    pub fn new() -> Self {
        let manager = Self::bare();
        manager.add_collector(Arc::new(LogCollector));
        manager
    }

    /// Creates a manager with no collectors.
    #[must_use]
    pub fn bare() -> Self {
        Self {
            stacks: DashMap::new(),
            collectors: RwLock::new(Vec::new()),
        }
    }

    /// Registers a collector.
    pub fn add_collector(&self, collector: Arc<dyn TraceCollector>) {
        if let Ok(mut collectors) = self.collectors.write() {
            collectors.push(collector);
        }
    }

    /// Starts a new root span and makes it current.
    pub fn start_trace(&self, service: &str, method: &str) -> TraceSpan {
        let span = self.new_span(ulid::Ulid::new().to_string(), None, service, method);
        self.push(span.clone());
        span
    }

    /// Starts a child of the current span, or a root if none is active.
    pub fn start_child_trace(&self, service: &str, method: &str) -> TraceSpan {
        let parent = self.current();
        let span = match parent {
            Some(parent) => self.new_span(
                parent.trace_id.clone(),
                Some(parent.span_id.clone()),
                service,
                method,
            ),
            None => self.new_span(ulid::Ulid::new().to_string(), None, service, method),
        };
        self.push(span.clone());
        span
    }

    /// Continues a trace received from a remote peer.
    pub fn start_trace_with_parent(
        &self,
        trace_id: &str,
        parent_span_id: Option<&str>,
        service: &str,
        method: &str,
    ) -> TraceSpan {
        let span = self.new_span(
            trace_id.to_owned(),
            parent_span_id.map(str::to_owned),
            service,
            method,
        );
        self.push(span.clone());
        span
    }

    fn new_span(
        &self,
        trace_id: String,
        parent_span_id: Option<String>,
        service: &str,
        method: &str,
    ) -> TraceSpan {
        TraceSpan {
            trace_id,
            span_id: ulid::Ulid::new().to_string(),
            parent_span_id,
            service: service.to_owned(),
            method: method.to_owned(),
            start_ms: parallax_proto::now_millis(),
            end_ms: None,
            status: SpanStatus::Started,
            tags: BTreeMap::new(),
            logs: BTreeMap::new(),
        }
    }

    fn push(&self, span: TraceSpan) {
        self.stacks.entry(current_context()).or_default().push(span);
    }

    /// The current span of this context, if any.
    #[must_use]
    pub fn current(&self) -> Option<TraceSpan> {
        self.stacks
            .get(&current_context())
            .and_then(|stack| stack.last().cloned())
    }

    /// Adds a tag to the current span.
    pub fn add_tag(&self, key: &str, value: &str) {
        self.with_current(|span| {
            span.tags.insert(key.to_owned(), value.to_owned());
        });
    }

    /// Adds a log entry to the current span.
    pub fn add_log(&self, key: &str, value: &str) {
        self.with_current(|span| {
            span.logs.insert(key.to_owned(), value.to_owned());
        });
    }

    fn with_current(&self, mutate: impl FnOnce(&mut TraceSpan)) {
        if let Some(mut stack) = self.stacks.get_mut(&current_context()) {
            if let Some(span) = stack.last_mut() {
                mutate(span);
            }
        }
    }

    /// Finishes the current span successfully.
    pub fn finish_trace(&self) {
        self.finish(SpanStatus::Success, None);
    }

    /// Finishes the current span with an error message.
    pub fn finish_trace_with_error(&self, message: &str) {
        self.finish(SpanStatus::Error, Some(message));
    }

    fn finish(&self, status: SpanStatus, error: Option<&str>) {
        let context = current_context();
        let span = {
            let Some(mut stack) = self.stacks.get_mut(&context) else {
                return;
            };
            let Some(mut span) = stack.pop() else {
                return;
            };
            span.end_ms = Some(parallax_proto::now_millis());
            span.status = status;
            if let Some(message) = error {
                span.logs.insert("error".to_owned(), message.to_owned());
            }
            span
        };

        // Contexts come and go with tasks; drop empty stacks eagerly.
        self.stacks
            .remove_if(&context, |_, stack| stack.is_empty());

        if let Ok(collectors) = self.collectors.read() {
            for collector in collectors.iter() {
                collector.collect(&span);
            }
        }
    }

    /// Number of contexts with open spans, for leak checks in tests.
    #[must_use]
    pub fn open_contexts(&self) -> usize {
        self.stacks.len()
    }
}

impl Default for TraceManager {
    fn default() -> Self {
        Self::new()
    }
}
