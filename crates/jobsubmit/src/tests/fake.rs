//! Deterministic script engine for tests.
//!
//! Scripts are line based:
//!
//! ```text
//! # comment
//! function NAME [returns VALUE] [sleep MS] [message TEXT] [write FIELD=VALUE] [error]
//! log-user TEXT
//! syntax-error
//! raise
//! ```
//!
//! A `syntax-error` line fails the load with a syntax error, `raise` with a
//! runtime error of the script body. `log-user` queues a user message while
//! the body runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::common::error::{InvokeError, LoadError};
use crate::engine::{CallResult, HookArg, Interpreter, ScriptEngine};
use crate::value::{Table, Value};

#[derive(Debug, Clone)]
pub struct CallRecord {
    pub function: String,
    pub args: Vec<HookArg>,
    pub start: Instant,
    pub end: Instant,
    /// Another call was running when this one started.
    pub overlapped: bool,
}

#[derive(Default)]
struct FakeLog {
    created: AtomicUsize,
    active: AtomicUsize,
    calls: Mutex<Vec<CallRecord>>,
    views: Mutex<BTreeMap<String, Table>>,
}

#[derive(Clone, Default)]
pub struct FakeEngine {
    log: Arc<FakeLog>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(&self) -> Arc<dyn ScriptEngine> {
        Arc::new(self.clone())
    }

    pub fn interpreters_created(&self) -> usize {
        self.log.created.load(Ordering::SeqCst)
    }

    /// Last table installed under `slurm.<name>` by any interpreter.
    pub fn view(&self, name: &str) -> Option<Table> {
        self.log.views.lock().unwrap().get(name).cloned()
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.log.calls.lock().unwrap().clone()
    }
}

impl ScriptEngine for FakeEngine {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn create_interpreter(&self) -> Result<Box<dyn Interpreter>, LoadError> {
        self.log.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeInterpreter {
            functions: Default::default(),
            messages: Vec::new(),
            log: self.log.clone(),
        }))
    }
}

#[derive(Clone, Default)]
struct FakeFunction {
    returns: Value,
    sleep: Option<Duration>,
    message: Option<String>,
    writes: Vec<(String, Value)>,
    error: bool,
}

struct FakeInterpreter {
    functions: BTreeMap<String, FakeFunction>,
    messages: Vec<String>,
    log: Arc<FakeLog>,
}

fn parse_value(token: &str) -> Value {
    match token {
        "nil" => Value::Nil,
        "true" => Value::Boolean(true),
        "false" => Value::Boolean(false),
        _ => token
            .parse::<i64>()
            .map(Value::Integer)
            .or_else(|_| token.parse::<f64>().map(Value::Number))
            .unwrap_or_else(|_| Value::String(token.to_string())),
    }
}

fn parse_function<'a>(
    mut tokens: impl Iterator<Item = &'a str>,
) -> Result<(String, FakeFunction), LoadError> {
    let syntax_error = |msg: &str| LoadError::SyntaxError(msg.to_string());
    let name = tokens.next().ok_or_else(|| syntax_error("missing name"))?;
    let mut function = FakeFunction::default();
    while let Some(token) = tokens.next() {
        let mut argument = || tokens.next().ok_or_else(|| syntax_error(token));
        match token {
            "returns" => function.returns = parse_value(argument()?),
            "sleep" => {
                let ms = argument()?.parse().map_err(|_| syntax_error("sleep"))?;
                function.sleep = Some(Duration::from_millis(ms));
            }
            "message" => function.message = Some(argument()?.to_string()),
            "write" => {
                let (field, value) = argument()?
                    .split_once('=')
                    .ok_or_else(|| syntax_error("write"))?;
                function.writes.push((field.to_string(), parse_value(value)));
            }
            "error" => function.error = true,
            other => return Err(syntax_error(other)),
        }
    }
    Ok((name.to_string(), function))
}

impl Interpreter for FakeInterpreter {
    fn exec(&mut self, _chunk_name: &str, source: &str) -> Result<(), LoadError> {
        for line in source.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut tokens = line.split_whitespace();
            match tokens.next() {
                Some("function") => {
                    let (name, function) = parse_function(tokens)?;
                    self.functions.insert(name, function);
                }
                Some("log-user") => self.messages.push(tokens.collect::<Vec<_>>().join(" ")),
                Some("syntax-error") => return Err(LoadError::SyntaxError(line.to_string())),
                Some("raise") => return Err(LoadError::ScriptError(line.to_string())),
                _ => return Err(LoadError::SyntaxError(line.to_string())),
            }
        }
        Ok(())
    }

    fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    fn is_defined(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    fn set_view(&mut self, name: &str, value: Table) -> Result<(), InvokeError> {
        self.log.views.lock().unwrap().insert(name.to_string(), value);
        Ok(())
    }

    fn call(&mut self, function: &str, args: Vec<HookArg>) -> Result<CallResult, InvokeError> {
        let f = self
            .functions
            .get(function)
            .cloned()
            .ok_or_else(|| InvokeError::Runtime(format!("{function} is not defined")))?;

        let overlapped = self.log.active.fetch_add(1, Ordering::SeqCst) > 0;
        let start = Instant::now();
        if let Some(duration) = f.sleep {
            std::thread::sleep(duration);
        }
        if let Some(message) = &f.message {
            self.messages.push(message.clone());
        }
        let result = if f.error {
            Err(InvokeError::Runtime("fake error".to_string()))
        } else {
            run_writes(&f, &args).map(|request| CallResult {
                returned: f.returns.clone(),
                request,
            })
        };
        let end = Instant::now();
        self.log.active.fetch_sub(1, Ordering::SeqCst);

        self.log.calls.lock().unwrap().push(CallRecord {
            function: function.to_string(),
            args,
            start,
            end,
            overlapped,
        });
        result
    }

    fn take_user_message(&mut self) -> Option<String> {
        let messages = std::mem::take(&mut self.messages);
        (!messages.is_empty()).then(|| messages.join("\n"))
    }
}

fn run_writes(f: &FakeFunction, args: &[HookArg]) -> Result<Option<Table>, InvokeError> {
    let Some((fields, writable)) = args.iter().find_map(|arg| match arg {
        HookArg::Request { fields, writable } => Some((fields, writable)),
        _ => None,
    }) else {
        return Ok(None);
    };
    let mut updates = Table::new();
    for name in writable.iter() {
        updates.set(*name, fields.get(*name).clone());
    }
    for (field, value) in &f.writes {
        if !writable.contains(&field.as_str()) {
            return Err(InvokeError::Runtime(format!(
                "attempt to modify read-only field '{field}'"
            )));
        }
        updates.set(field.as_str(), value.clone());
    }
    Ok(Some(updates))
}
