//! Lua 5.4 interpreter backed by `mlua`.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ctld::{PartitionFlags, ReservationFlags};
use mlua::{Function, HookTriggers, Lua, MultiValue, VmState};

use crate::common::error::{InvokeError, LoadError};
use crate::common::setup::SCRIPT_LOG_TARGET;
use crate::engine::{CallResult, HookArg, Interpreter, ScriptEngine};
use crate::value::{Key, Table, Value};

const PRELUDE: &str = include_str!("prelude.lua");

/// Name of the host table visible to scripts.
pub const HOST_TABLE: &str = "slurm";

/// Deadline is checked after this many VM instructions.
const DEADLINE_CHECK_INSTRUCTIONS: u32 = 1000;

/// Nested tables deeper than this are not converted back from Lua.
const MAX_TABLE_DEPTH: usize = 16;

pub struct LuaEngine {
    call_timeout: Option<Duration>,
}

impl LuaEngine {
    pub fn new(call_timeout: Option<Duration>) -> Self {
        Self { call_timeout }
    }
}

impl ScriptEngine for LuaEngine {
    fn name(&self) -> &'static str {
        "lua"
    }

    fn create_interpreter(&self) -> Result<Box<dyn Interpreter>, LoadError> {
        let interpreter = LuaInterpreter::new(self.call_timeout)
            .map_err(|e| LoadError::Engine(e.to_string()))?;
        Ok(Box::new(interpreter))
    }
}

pub struct LuaInterpreter {
    lua: Lua,
    slurm: mlua::Table,
    readonly: Function,
    request: Function,
    user_messages: Arc<Mutex<Vec<String>>>,
    call_timeout: Option<Duration>,
    deadline: Arc<Mutex<Option<Instant>>>,
}

fn script_log_level(level: &str) -> log::Level {
    match level {
        "error" => log::Level::Error,
        "info" => log::Level::Info,
        "verbose" | "debug" => log::Level::Debug,
        _ => log::Level::Trace,
    }
}

fn runtime_error(error: mlua::Error) -> InvokeError {
    InvokeError::Runtime(error.to_string())
}

impl LuaInterpreter {
    fn new(call_timeout: Option<Duration>) -> mlua::Result<Self> {
        let lua = Lua::new();
        let slurm = lua.create_table()?;

        for (name, code) in ctld::status::NAMED_CODES {
            slurm.raw_set(*name, *code)?;
        }
        for (name, flag) in PartitionFlags::all().iter_names() {
            slurm.raw_set(format!("PARTITION_{name}"), flag.bits())?;
        }
        for (name, flag) in ReservationFlags::all().iter_names() {
            slurm.raw_set(format!("RESERVE_FLAG_{name}"), flag.bits())?;
        }

        let emit = lua.create_function(|_, (level, message): (String, String)| {
            log::log!(target: SCRIPT_LOG_TARGET, script_log_level(&level), "{message}");
            Ok(())
        })?;
        let user_messages: Arc<Mutex<Vec<String>>> = Default::default();
        let buffer = user_messages.clone();
        let user = lua.create_function(move |_, message: String| {
            buffer
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(message);
            Ok(())
        })?;

        let (readonly, request): (Function, Function) = lua
            .load(PRELUDE)
            .set_name("=prelude")
            .call((slurm.clone(), emit, user))?;
        lua.globals().raw_set(HOST_TABLE, slurm.clone())?;

        let deadline: Arc<Mutex<Option<Instant>>> = Default::default();
        if call_timeout.is_some() {
            let deadline = deadline.clone();
            lua.set_hook(
                HookTriggers::new().every_nth_instruction(DEADLINE_CHECK_INSTRUCTIONS),
                move |_lua, _debug| match *deadline.lock().unwrap_or_else(|e| e.into_inner()) {
                    Some(limit) if Instant::now() >= limit => Err(mlua::Error::RuntimeError(
                        "script exceeded its time limit".to_string(),
                    )),
                    _ => Ok(VmState::Continue),
                },
            );
        }

        Ok(Self {
            lua,
            slurm,
            readonly,
            request,
            user_messages,
            call_timeout,
            deadline,
        })
    }

    fn set_deadline(&self, deadline: Option<Instant>) {
        *self.deadline.lock().unwrap_or_else(|e| e.into_inner()) = deadline;
    }

    /// Runs `f` with the time limit armed.
    fn with_deadline<R>(&self, f: impl FnOnce() -> R) -> R {
        if let Some(timeout) = self.call_timeout {
            self.set_deadline(Some(Instant::now() + timeout));
            let result = f();
            self.set_deadline(None);
            result
        } else {
            f()
        }
    }

    fn key_to_lua(&self, key: &Key) -> mlua::Result<mlua::Value> {
        Ok(match key {
            Key::Int(i) => mlua::Value::Integer(*i),
            Key::Str(s) => mlua::Value::String(self.lua.create_string(s)?),
        })
    }

    fn create_table(&self, table: &Table, readonly: bool) -> mlua::Result<mlua::Table> {
        let result = self.lua.create_table_with_capacity(0, table.len())?;
        for (key, value) in table.iter() {
            result.raw_set(self.key_to_lua(key)?, self.to_lua(value, readonly)?)?;
        }
        Ok(result)
    }

    /// Returns the proxy handed to the script and the table backing it.
    fn request_proxy(
        &self,
        fields: &Table,
        writable: &[&str],
    ) -> mlua::Result<(mlua::Value, mlua::Table)> {
        let backing = self.create_table(fields, false)?;
        let names = self.lua.create_sequence_from(writable.iter().copied())?;
        let proxy = self.request.call((backing.clone(), names))?;
        Ok((proxy, backing))
    }

    fn to_lua(&self, value: &Value, readonly: bool) -> mlua::Result<mlua::Value> {
        Ok(match value {
            Value::Nil => mlua::Value::Nil,
            Value::Boolean(v) => mlua::Value::Boolean(*v),
            Value::Integer(v) => mlua::Value::Integer(*v),
            Value::Number(v) => mlua::Value::Number(*v),
            Value::String(v) => mlua::Value::String(self.lua.create_string(v)?),
            Value::Table(t) => {
                let table = self.create_table(t, readonly)?;
                if readonly {
                    self.readonly.call(table)?
                } else {
                    mlua::Value::Table(table)
                }
            }
        })
    }
}

fn key_from_lua(key: mlua::Value) -> Option<Key> {
    match key {
        mlua::Value::Integer(i) => Some(Key::Int(i)),
        mlua::Value::Number(n) if n.fract() == 0.0 => Some(Key::Int(n as i64)),
        mlua::Value::String(s) => Some(Key::Str(s.to_string_lossy().to_string())),
        _ => None,
    }
}

/// Converts a Lua value into a [`Value`]. Functions, userdata and threads
/// become `Nil`.
fn from_lua(value: mlua::Value, depth: usize) -> Value {
    match value {
        mlua::Value::Boolean(v) => Value::Boolean(v),
        mlua::Value::Integer(v) => Value::Integer(v),
        mlua::Value::Number(v) => Value::Number(v),
        mlua::Value::String(s) => Value::String(s.to_string_lossy().to_string()),
        mlua::Value::Table(t) if depth < MAX_TABLE_DEPTH => {
            let mut table = Table::new();
            for (key, value) in t.pairs::<mlua::Value, mlua::Value>().flatten() {
                if let Some(key) = key_from_lua(key) {
                    table.set(key, from_lua(value, depth + 1));
                }
            }
            Value::Table(table)
        }
        _ => Value::Nil,
    }
}

impl Interpreter for LuaInterpreter {
    fn exec(&mut self, chunk_name: &str, source: &str) -> Result<(), LoadError> {
        let chunk = self.lua.load(source).set_name(format!("@{chunk_name}"));
        self.with_deadline(|| chunk.exec()).map_err(|e| match e {
            mlua::Error::SyntaxError { message, .. } => LoadError::SyntaxError(message),
            e => LoadError::ScriptError(e.to_string()),
        })
    }

    fn has_function(&self, name: &str) -> bool {
        matches!(
            self.lua.globals().get::<mlua::Value>(name),
            Ok(mlua::Value::Function(_))
        )
    }

    fn is_defined(&self, name: &str) -> bool {
        !matches!(
            self.lua.globals().get::<mlua::Value>(name),
            Ok(mlua::Value::Nil) | Err(_)
        )
    }

    fn set_view(&mut self, name: &str, value: Table) -> Result<(), InvokeError> {
        let value = self
            .to_lua(&Value::Table(value), true)
            .map_err(runtime_error)?;
        self.slurm.raw_set(name, value).map_err(runtime_error)
    }

    fn call(&mut self, function: &str, args: Vec<HookArg>) -> Result<CallResult, InvokeError> {
        let func = match self.lua.globals().get::<mlua::Value>(function) {
            Ok(mlua::Value::Function(f)) => f,
            _ => {
                return Err(InvokeError::Runtime(format!(
                    "global {function} is not a function"
                )));
            }
        };

        let mut lua_args = Vec::with_capacity(args.len());
        let mut request = None;
        for arg in args {
            let value = match arg {
                HookArg::Value(value) => self.to_lua(&value, false),
                HookArg::View(table) => self.to_lua(&Value::Table(table), true),
                HookArg::Request { fields, writable } => {
                    self.request_proxy(&fields, writable).map(|(proxy, backing)| {
                        request = Some((backing, writable));
                        proxy
                    })
                }
            }
            .map_err(runtime_error)?;
            lua_args.push(value);
        }

        let returned = self
            .with_deadline(|| func.call::<mlua::Value>(MultiValue::from_vec(lua_args)))
            .map_err(runtime_error)?;

        let request = match request {
            Some((backing, writable)) => {
                let mut updates = Table::new();
                for name in writable {
                    let value: mlua::Value = backing.raw_get(*name).map_err(runtime_error)?;
                    updates.set(*name, from_lua(value, 0));
                }
                Some(updates)
            }
            None => None,
        };
        Ok(CallResult {
            returned: from_lua(returned, 0),
            request,
        })
    }

    fn take_user_message(&mut self) -> Option<String> {
        let messages =
            std::mem::take(&mut *self.user_messages.lock().unwrap_or_else(|e| e.into_inner()));
        (!messages.is_empty()).then(|| messages.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::common::error::{InvokeError, LoadError};
    use crate::engine::lua::LuaEngine;
    use crate::engine::{HookArg, Interpreter, ScriptEngine};
    use crate::value::{Table, Value};

    fn interpreter(source: &str) -> Box<dyn Interpreter> {
        let mut interpreter = LuaEngine::new(None).create_interpreter().unwrap();
        interpreter.exec("test.lua", source).unwrap();
        interpreter
    }

    #[test]
    fn test_syntax_error() {
        let mut interpreter = LuaEngine::new(None).create_interpreter().unwrap();
        assert!(matches!(
            interpreter.exec("test.lua", "function ("),
            Err(LoadError::SyntaxError(_))
        ));
    }

    #[test]
    fn test_body_runtime_error() {
        let mut interpreter = LuaEngine::new(None).create_interpreter().unwrap();
        assert!(matches!(
            interpreter.exec("test.lua", "error('boom')"),
            Err(LoadError::ScriptError(_))
        ));
    }

    #[test]
    fn test_has_function() {
        let interpreter = interpreter("function f() end\ng = 5");
        assert!(interpreter.has_function("f"));
        assert!(!interpreter.has_function("g"));
        assert!(!interpreter.has_function("h"));

        assert!(interpreter.is_defined("f"));
        assert!(interpreter.is_defined("g"));
        assert!(!interpreter.is_defined("h"));
    }

    #[test]
    fn test_call_non_function_global() {
        let mut interpreter = interpreter("g = 5");
        assert!(matches!(
            interpreter.call("g", vec![]),
            Err(InvokeError::Runtime(_))
        ));
    }

    #[test]
    fn test_constants() {
        let mut interpreter = interpreter(
            "function f() return slurm.ESLURM_INVALID_PARTITION_NAME + slurm.PARTITION_HIDDEN end",
        );
        let result = interpreter.call("f", vec![]).unwrap();
        assert_eq!(result.returned, Value::Integer(2002));
    }

    #[test]
    fn test_call_arguments_and_extra_results() {
        let mut interpreter = interpreter("function f(a, b) return a + b.x, 'ignored' end");
        let result = interpreter
            .call(
                "f",
                vec![
                    HookArg::Value(Value::Integer(2)),
                    HookArg::View(Table::new().with("x", 3i64)),
                ],
            )
            .unwrap();
        assert_eq!(result.returned, Value::Integer(5));
        assert!(result.request.is_none());
    }

    #[test]
    fn test_view_is_readonly() {
        let mut interpreter = interpreter("function f(t) t.x = 1 end");
        let error = interpreter
            .call("f", vec![HookArg::View(Table::new().with("x", 0i64))])
            .unwrap_err();
        assert!(matches!(error, InvokeError::Runtime(msg) if msg.contains("read-only")));
    }

    #[test]
    fn test_nested_view_is_readonly() {
        let mut interpreter = interpreter("function f(t) t.inner.x = 1 end");
        let view = Table::new().with("inner", Table::new().with("x", 0i64));
        assert!(interpreter.call("f", vec![HookArg::View(view)]).is_err());
    }

    #[test]
    fn test_view_iteration() {
        let mut interpreter = interpreter(
            r#"
function f(t)
    local n = 0
    for _, v in pairs(t) do n = n + v end
    return n * 10 + #t
end"#,
        );
        let view = Table::sequence([1i64, 2, 3]);
        let result = interpreter.call("f", vec![HookArg::View(view)]).unwrap();
        assert_eq!(result.returned, Value::Integer(63));
    }

    #[test]
    fn test_request_writes() {
        const WRITABLE: &[&str] = &["name", "comment"];
        let mut interpreter = interpreter(
            r#"
function f(r)
    r.name = r.name .. "-x"
    r.comment = nil
    return 0
end"#,
        );
        let fields = Table::new()
            .with("name", "job")
            .with("comment", "c")
            .with("user_id", 10u32);
        let result = interpreter
            .call(
                "f",
                vec![HookArg::Request {
                    fields,
                    writable: WRITABLE,
                }],
            )
            .unwrap();
        let updates = result.request.unwrap();
        assert_eq!(updates.get("name").as_str(), Some("job-x"));
        assert!(updates.get("comment").is_nil());
        assert!(!updates.contains_key("user_id"));
    }

    #[test]
    fn test_request_rejects_non_writable_and_tables() {
        const WRITABLE: &[&str] = &["name"];
        let mut interpreter = interpreter(
            "function f(r) r.user_id = 0 end\nfunction g(r) r.name = {} end",
        );
        for function in ["f", "g"] {
            let arg = HookArg::Request {
                fields: Table::new().with("user_id", 10u32),
                writable: WRITABLE,
            };
            assert!(interpreter.call(function, vec![arg]).is_err());
        }
    }

    #[test]
    fn test_set_view() {
        let mut interpreter = interpreter("function f() return slurm.jobs[7].name end");
        interpreter
            .set_view("jobs", Table::new().with(7u32, Table::new().with("name", "a")))
            .unwrap();
        let result = interpreter.call("f", vec![]).unwrap();
        assert_eq!(result.returned, Value::String("a".into()));
    }

    #[test]
    fn test_user_messages_are_drained() {
        let mut interpreter = interpreter(
            r#"
function f()
    slurm.log_user("first %d", 1)
    slurm.log_user("second")
    slurm.log_info("not for user")
end"#,
        );
        interpreter.call("f", vec![]).unwrap();
        assert_eq!(
            interpreter.take_user_message().as_deref(),
            Some("first 1\nsecond")
        );
        assert_eq!(interpreter.take_user_message(), None);
    }

    #[test]
    fn test_call_timeout() {
        let mut interpreter = LuaEngine::new(Some(Duration::from_millis(50)))
            .create_interpreter()
            .unwrap();
        interpreter
            .exec("test.lua", "function f() while true do end end\nfunction g() return 1 end")
            .unwrap();
        assert!(interpreter.call("f", vec![]).is_err());
        let result = interpreter.call("g", vec![]).unwrap();
        assert_eq!(result.returned, Value::Integer(1));
    }

    #[test]
    fn test_unsupported_values_become_nil() {
        let mut interpreter = interpreter("function f() return print end");
        let result = interpreter.call("f", vec![]).unwrap();
        assert!(result.returned.is_nil());
    }
}
