//! QuickJS run loop shared by both backends

use super::{GuestEvent, GuestJob, RunOutcome, RunReport};
use crate::error::SandboxError;
use crate::sandbox::types::OutputStream;
use regex::Regex;
use rquickjs::{Coerced, Context, Ctx, Error as JsError, Exception, Function, Runtime, Value};
use serde::Deserialize;
use std::cell::Cell;
use std::sync::LazyLock;

/// `<eval>:3:14` style positions in QuickJS stacks
static STACK_POSITION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":(\d+)(?::(\d+))?").unwrap());

/// Guest-facing globals installed before any guest code runs
const BOOTSTRAP: &str = r#"
(() => {
    const global = globalThis;
    const hostWrite = global.__host_write;
    const hostEmit = global.__host_emit;

    const format = (args) => args.map((arg) => {
        if (typeof arg === 'string') return arg;
        try {
            const json = JSON.stringify(arg);
            return json === undefined ? String(arg) : json;
        } catch (_) {
            return String(arg);
        }
    }).join(' ');

    const write = (stream) => (...args) => hostWrite(stream, format(args) + '\n');
    global.console = Object.freeze({
        log: write(1),
        info: write(1),
        debug: write(1),
        warn: write(2),
        error: write(2),
    });

    let nextElement = 0;
    let nextHandler = 0;
    const handlers = new Map();
    const emit = (op) => {
        if (op === null || typeof op !== 'object') {
            throw new TypeError('host.emit expects an operation object');
        }
        hostEmit(JSON.stringify(op));
    };

    global.host = Object.freeze({
        emit,
        createElement(tag, props) {
            const id = 'el_' + (++nextElement);
            emit({ type: 'createElement', id, tag: String(tag), props: props || {} });
            return id;
        },
        setAttribute(elementId, name, value) {
            emit({ type: 'setAttribute', elementId, name: String(name), value });
        },
        appendChild(parentId, childId) {
            emit({ type: 'appendChild', parentId, childId });
        },
        removeChild(parentId, childId) {
            emit({ type: 'removeChild', parentId, childId });
        },
        setText(elementId, text) {
            emit({ type: 'setTextContent', elementId, text: String(text) });
        },
        on(elementId, event, handler) {
            const handlerId = 'h_' + (++nextHandler);
            handlers.set(handlerId, handler);
            emit({ type: 'addEventListener', elementId, event: String(event), handlerId });
            return handlerId;
        },
        callHost(action, payload) {
            emit({ type: 'callHost', action: String(action), payload: payload === undefined ? null : payload });
        },
    });

    global.__tool_result = (text) => {
        try {
            return JSON.parse(text);
        } catch (_) {
            return text;
        }
    };

    const encode = (value) => {
        try {
            return JSON.stringify(value);
        } catch (_) {
            return JSON.stringify(String(value));
        }
    };
    const fulfilled = (value) => {
        global.__guest_outcome = { state: 'fulfilled', json: encode(value) };
    };
    const rejected = (error) => {
        const isObject = error !== null && typeof error === 'object';
        global.__guest_outcome = {
            state: 'rejected',
            name: isObject && error.name !== undefined ? String(error.name) : undefined,
            message: isObject && error.message !== undefined ? String(error.message) : String(error),
            stack: isObject && error.stack !== undefined ? String(error.stack) : undefined,
        };
    };

    global.__guest_settle = (value) => {
        if (value !== null && typeof value === 'object' && typeof value.then === 'function') {
            global.__guest_outcome = { state: 'pending' };
            value.then(fulfilled, rejected);
        } else {
            fulfilled(value);
        }
    };
})();
"#;

/// Settlement record written by `__guest_settle`
#[derive(Debug, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
enum Settlement {
    Fulfilled {
        json: Option<String>,
    },
    Rejected {
        name: Option<String>,
        message: String,
        stack: Option<String>,
    },
    Pending,
}

/// An exception pulled out of the engine
#[derive(Debug, Clone, Default)]
pub(crate) struct ThrownError {
    pub name: Option<String>,
    pub message: String,
    pub stack: Option<String>,
}

impl ThrownError {
    /// Read whatever was thrown; non-Error values are coerced to a string
    pub(crate) fn catch(ctx: &Ctx<'_>) -> Self {
        let thrown = ctx.catch();
        if let Some(exception) = thrown.as_exception() {
            return Self {
                name: exception.get::<_, Option<String>>("name").ok().flatten(),
                message: exception.message().unwrap_or_default(),
                stack: exception.stack(),
            };
        }
        let message = thrown
            .get::<Coerced<String>>()
            .map(|coerced| coerced.0)
            .unwrap_or_else(|_| "uncaught guest exception".to_string());
        Self {
            message,
            ..Default::default()
        }
    }

    fn is_out_of_memory(&self) -> bool {
        self.message.contains("out of memory")
    }

    fn is_syntax_error(&self) -> bool {
        self.name.as_deref() == Some("SyntaxError")
    }

    /// Line and column from the first stack position
    pub(crate) fn position(&self) -> (Option<u32>, Option<u32>) {
        let Some(captures) = self.stack.as_deref().and_then(|s| STACK_POSITION.captures(s)) else {
            return (None, None);
        };
        let line = captures.get(1).and_then(|m| m.as_str().parse().ok());
        let column = captures.get(2).and_then(|m| m.as_str().parse().ok());
        (line, column)
    }

    pub(crate) fn into_compilation_error(self) -> SandboxError {
        let (line, column) = self.position();
        SandboxError::Compilation {
            message: self.message,
            line,
            column,
        }
    }

    fn into_error(self, memory_limit: Option<u64>) -> SandboxError {
        if let Some(limit_bytes) = memory_limit.filter(|_| self.is_out_of_memory()) {
            return SandboxError::OutOfMemory { limit_bytes };
        }
        let message = match &self.name {
            Some(name) if !name.is_empty() => format!("{}: {}", name, self.message),
            _ => self.message,
        };
        SandboxError::Runtime {
            message,
            stack: self.stack,
        }
    }
}

/// Which step of the run produced an engine error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Setup,
    Evaluate,
}

/// Run one job on `runtime` in a fresh context
pub(super) fn run_job(runtime: &Runtime, job: &GuestJob, memory_limit: Option<u64>) -> RunReport {
    let cancel = job.cancel.clone();
    runtime.set_interrupt_handler(Some(Box::new(move || cancel.is_cancelled())));

    let outcome = match Context::full(runtime) {
        Ok(context) => run_in_context(runtime, &context, job, memory_limit),
        Err(JsError::Allocation) => match memory_limit {
            Some(limit_bytes) => RunOutcome::Failed(SandboxError::OutOfMemory { limit_bytes }),
            None => RunOutcome::Failed(SandboxError::internal("engine allocation failed")),
        },
        Err(e) => RunOutcome::Failed(SandboxError::internal(format!(
            "failed to create guest context: {}",
            e
        ))),
    };

    runtime.set_interrupt_handler(None);
    let heap_used_bytes = u64::try_from(runtime.memory_usage().memory_used_size).ok();

    RunReport {
        outcome,
        heap_used_bytes,
    }
}

fn run_in_context(
    runtime: &Runtime,
    context: &Context,
    job: &GuestJob,
    memory_limit: Option<u64>,
) -> RunOutcome {
    let started = context.with(|ctx| -> Result<(), RunOutcome> {
        let fail = |ctx: &Ctx<'_>, err: JsError, phase: Phase| {
            classify(ctx, err, phase, job, memory_limit)
        };

        install_natives(&ctx, job).map_err(|e| fail(&ctx, e, Phase::Setup))?;
        ctx.eval::<Value, _>(BOOTSTRAP)
            .map_err(|e| fail(&ctx, e, Phase::Setup))?;
        if !job.program.bindings.is_empty() {
            ctx.eval::<Value, _>(job.program.bindings.as_str())
                .map_err(|e| fail(&ctx, e, Phase::Setup))?;
        }

        let value: Value = ctx
            .eval(job.program.code.as_str())
            .map_err(|e| fail(&ctx, e, Phase::Evaluate))?;
        let settle: Function = ctx
            .globals()
            .get("__guest_settle")
            .map_err(|e| fail(&ctx, e, Phase::Setup))?;
        settle
            .call::<_, ()>((value,))
            .map_err(|e| fail(&ctx, e, Phase::Evaluate))?;
        Ok(())
    });
    if let Err(outcome) = started {
        return outcome;
    }

    let mut job_failed = false;
    while runtime.is_job_pending() {
        if job.cancel.is_cancelled() {
            return RunOutcome::Interrupted;
        }
        if runtime.execute_pending_job().is_err() {
            job_failed = true;
        }
    }
    if job.cancel.is_cancelled() {
        return RunOutcome::Interrupted;
    }

    context.with(|ctx| read_outcome(&ctx, job_failed, memory_limit))
}

fn classify(
    ctx: &Ctx<'_>,
    err: JsError,
    phase: Phase,
    job: &GuestJob,
    memory_limit: Option<u64>,
) -> RunOutcome {
    if job.cancel.is_cancelled() {
        // Drain the uncatchable "interrupted" exception
        let _ = ctx.catch();
        return RunOutcome::Interrupted;
    }

    match err {
        JsError::Exception => {
            let thrown = ThrownError::catch(ctx);
            if phase == Phase::Evaluate && thrown.is_syntax_error() {
                return RunOutcome::Failed(thrown.into_compilation_error());
            }
            RunOutcome::Failed(thrown.into_error(memory_limit))
        }
        JsError::Allocation => match memory_limit {
            Some(limit_bytes) => RunOutcome::Failed(SandboxError::OutOfMemory { limit_bytes }),
            None => RunOutcome::Failed(SandboxError::internal("engine allocation failed")),
        },
        other => RunOutcome::Failed(SandboxError::internal(format!("engine error: {}", other))),
    }
}

fn read_outcome(ctx: &Ctx<'_>, job_failed: bool, memory_limit: Option<u64>) -> RunOutcome {
    let raw: String = match ctx.eval("JSON.stringify(globalThis.__guest_outcome ?? { state: 'pending' })") {
        Ok(raw) => raw,
        Err(JsError::Exception) => {
            return RunOutcome::Failed(ThrownError::catch(ctx).into_error(memory_limit));
        }
        Err(e) => {
            return RunOutcome::Failed(SandboxError::internal(format!(
                "failed to read guest outcome: {}",
                e
            )));
        }
    };

    let settlement: Settlement = match serde_json::from_str(&raw) {
        Ok(settlement) => settlement,
        Err(e) => {
            return RunOutcome::Failed(SandboxError::internal(format!(
                "malformed guest outcome: {}",
                e
            )));
        }
    };

    match settlement {
        Settlement::Fulfilled { json } => {
            let value = json.map(|json| {
                serde_json::from_str(&json).unwrap_or(serde_json::Value::String(json))
            });
            RunOutcome::Completed(value)
        }
        Settlement::Rejected {
            name,
            message,
            stack,
        } => RunOutcome::Failed(
            ThrownError {
                name,
                message,
                stack,
            }
            .into_error(memory_limit),
        ),
        Settlement::Pending if job_failed => RunOutcome::Failed(SandboxError::Runtime {
            message: "guest job raised an uncaught exception".to_string(),
            stack: None,
        }),
        Settlement::Pending => RunOutcome::Failed(SandboxError::Runtime {
            message: "guest promise never settled".to_string(),
            stack: None,
        }),
    }
}

/// Appended once when a stream runs out of output budget
pub(crate) const OUTPUT_TRUNCATED_MARKER: &str = "\n[output truncated]\n";

/// Per-stream byte allowance for console output of one execution
struct OutputBudget {
    limit: usize,
    stdout: Cell<usize>,
    stderr: Cell<usize>,
}

impl OutputBudget {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            stdout: Cell::new(0),
            stderr: Cell::new(0),
        }
    }

    /// Returns the part of `text` that still fits, or `None` once the stream is exhausted
    fn admit(&self, stream: OutputStream, mut text: String) -> Option<String> {
        let used = match stream {
            OutputStream::Stdout => &self.stdout,
            OutputStream::Stderr => &self.stderr,
        };
        let spent = used.get();
        if spent >= self.limit {
            return None;
        }

        let remaining = self.limit - spent;
        if text.len() <= remaining {
            used.set(spent + text.len());
            return Some(text);
        }

        let mut cut = remaining;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str(OUTPUT_TRUNCATED_MARKER);
        used.set(self.limit);
        Some(text)
    }
}

/// Native functions backing the bootstrap and the tool bridges
fn install_natives<'js>(ctx: &Ctx<'js>, job: &GuestJob) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    let events = job.events.clone();
    let budget = OutputBudget::new(job.output_limit_bytes);
    let write = Function::new(ctx.clone(), move |stream: i32, text: String| {
        let stream = if stream == 2 {
            OutputStream::Stderr
        } else {
            OutputStream::Stdout
        };
        if let Some(text) = budget.admit(stream, text) {
            let _ = events.send(GuestEvent::Output(stream, text));
        }
    })?
    .with_name("__host_write")?;
    globals.set("__host_write", write)?;

    let events = job.events.clone();
    let emit = Function::new(ctx.clone(), move |json: String| {
        let _ = events.send(GuestEvent::Operation(json));
    })?
    .with_name("__host_emit")?;
    globals.set("__host_emit", emit)?;

    if job.tools.is_empty() {
        return Ok(());
    }

    let tools = job.tools.clone();
    let context = job.context.clone();
    let handle = job.runtime.clone();
    let cancel = job.cancel.clone();
    let call_tool = Function::new(
        ctx.clone(),
        move |ctx: Ctx<'_>, name: String, params: String| -> rquickjs::Result<String> {
            let failure = |message: String| {
                let error = SandboxError::ToolExecution {
                    tool: name.clone(),
                    message,
                };
                tracing::warn!(tool = %name, "{}", error);
                Exception::throw_message(&ctx, &error.to_string())
            };

            let Some(tool) = tools.get(&name) else {
                return Err(failure("tool is not granted to this execution".to_string()));
            };
            let params: serde_json::Value = serde_json::from_str(&params)
                .map_err(|e| failure(format!("invalid parameters: {}", e)))?;

            tracing::debug!(tool = %name, "guest tool call");
            let outcome = handle.block_on(async {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    result = tool.execute(params, &context) => Some(result),
                }
            });
            match outcome {
                Some(Ok(output)) => Ok(output.joined_text()),
                Some(Err(e)) => Err(failure(e.to_string())),
                None => Err(failure("execution was cancelled".to_string())),
            }
        },
    )?
    .with_name("__host_call_tool")?;
    globals.set("__host_call_tool", call_tool)?;

    Ok(())
}
