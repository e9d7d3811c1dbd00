//! Scripted-plugin runtime (embedded Lua 5.4).
//!
//! A scripted plugin is a Lua chunk declaring:
//!
//! ```lua
//! name = "upper"                      -- optional, overrides the file stem
//! description = "Uppercase the page"
//! function transform(text)
//!     return text:upper()
//! end
//! ```
//!
//! The chunk runs in a context with only the `string`, `table`, `math` and
//! `utf8` libraries plus the [`mw`](crate::mw) helpers.  Withheld globals are
//! guarded so that touching one aborts the call as a sandbox violation.
//!
//! A [`ScriptedPlugin`] keeps only its source.  Every [`transform`] call
//! builds a fresh context on a worker thread, so the instruction counter,
//! deadline and abort reason are local to that call and nothing is shared
//! between threads.
//!
//! The instruction hook cannot fire while the guest sits inside a library
//! function such as a backtracking `string.find`.  The calling thread
//! therefore waits on the worker with its own deadline and reports
//! [`PluginError::Timeout`] when it passes; the abandoned worker ends at its
//! next hook check once the library call returns.
//!
//! [`transform`]: Plugin::transform

use std::cell::{Cell, RefCell};
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use mlua::{HookTriggers, Lua, LuaOptions, MultiValue, StdLib, Table, Value, VmState};

use crate::abi;
use crate::config::SandboxConfig;
use crate::error::{PluginError, Result};
use crate::mw;
use crate::plugin::{Plugin, PluginKind};

/// Instructions between two governor checks.
const HOOK_INTERVAL: u32 = 1000;

/// Extra wait granted to the in-guest governor before the caller stops
/// waiting for a worker.
const WATCHDOG_GRACE: Duration = Duration::from_millis(100);

/// Globals removed from the guest namespace.
const WITHHELD_GLOBALS: &[&str] = &[
    "os",
    "io",
    "debug",
    "package",
    "require",
    "dofile",
    "loadfile",
    "load",
    "loadstring",
    "collectgarbage",
    "print",
    "rawget",
    "rawset",
    "rawequal",
    "rawlen",
    "getmetatable",
    "setmetatable",
    "coroutine",
    "pcall",
    "xpcall",
];

/// Why the governor stopped a guest.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Abort {
    Capability(String),
    Deadline,
    InstructionLimit(u64),
}

/// One guest execution context and its abort slot.
struct Guest {
    lua: Lua,
    abort: Rc<RefCell<Option<Abort>>>,
}

impl Guest {
    /// Build a sandboxed context with the governor armed.
    fn new(plugin: &str, config: &SandboxConfig) -> mlua::Result<Self> {
        let lua = Lua::new_with(
            StdLib::STRING | StdLib::TABLE | StdLib::MATH | StdLib::UTF8,
            LuaOptions::default(),
        )?;
        let abort = Rc::new(RefCell::new(None));

        withhold_capabilities(&lua, &abort)?;
        mw::register(&lua, plugin)?;
        install_governor(&lua, config, &abort);
        lua.set_memory_limit(config.memory_limit())?;

        Ok(Self { lua, abort })
    }

    /// Run the plugin chunk, defining its globals.
    fn exec(&self, plugin: &str, source: &str) -> mlua::Result<()> {
        self.lua.load(source).set_name(plugin).exec()
    }

    fn abort_reason(&self) -> Option<Abort> {
        self.abort.borrow().clone()
    }
}

fn withhold_capabilities(lua: &Lua, abort: &Rc<RefCell<Option<Abort>>>) -> mlua::Result<()> {
    let globals = lua.globals();
    for name in WITHHELD_GLOBALS {
        globals.raw_set(*name, Value::Nil)?;
    }
    globals.set_metatable(Some(guard_table(lua, abort, WITHHELD_GLOBALS, "")?));

    let string: Table = globals.raw_get("string")?;
    string.raw_set("dump", Value::Nil)?;
    string.set_metatable(Some(guard_table(lua, abort, &["dump"], "string.")?));
    Ok(())
}

/// A metatable whose `__index` rejects the listed keys and yields `nil`
/// for everything else.
fn guard_table(
    lua: &Lua,
    abort: &Rc<RefCell<Option<Abort>>>,
    names: &'static [&'static str],
    prefix: &'static str,
) -> mlua::Result<Table> {
    let abort = Rc::clone(abort);
    let index = lua.create_function(move |_, (_table, key): (Table, Value)| {
        let Value::String(key) = key else {
            return Ok(Value::Nil);
        };
        let key = key.to_string_lossy();
        if names.iter().any(|name| *name == key) {
            let capability = format!("{prefix}{key}");
            let message = format!("attempt to reference undefined capability '{capability}'");
            abort
                .borrow_mut()
                .get_or_insert(Abort::Capability(capability));
            return Err(mlua::Error::RuntimeError(message));
        }
        Ok(Value::Nil)
    })?;
    let meta = lua.create_table()?;
    meta.raw_set("__index", index)?;
    Ok(meta)
}

fn install_governor(lua: &Lua, config: &SandboxConfig, abort: &Rc<RefCell<Option<Abort>>>) {
    let abort = Rc::clone(abort);
    let deadline = Instant::now() + config.timeout();
    let limit = config.instruction_limit();
    let executed = Cell::new(0u64);

    lua.set_hook(
        HookTriggers {
            every_nth_instruction: Some(HOOK_INTERVAL),
            ..Default::default()
        },
        move |_lua, _debug| {
            let count = executed.get() + u64::from(HOOK_INTERVAL);
            executed.set(count);

            let (reason, message) = if Instant::now() >= deadline {
                (Abort::Deadline, "wall-clock limit reached".to_owned())
            } else if let Some(limit) = limit.filter(|&limit| count > limit) {
                (
                    Abort::InstructionLimit(limit),
                    format!("instruction limit of {limit} reached"),
                )
            } else {
                return Ok(VmState::Continue);
            };
            abort.borrow_mut().get_or_insert(reason);
            Err(mlua::Error::RuntimeError(message))
        },
    );
}

fn is_memory_error(err: &mlua::Error) -> bool {
    match err {
        mlua::Error::MemoryError(_) => true,
        mlua::Error::CallbackError { cause, .. } => is_memory_error(cause),
        _ => false,
    }
}

/// A Lua-hosted plugin.
pub struct ScriptedPlugin {
    description: String,
    script: Arc<Script>,
}

/// Everything a worker thread needs to run one call.
struct Script {
    name: String,
    source: Arc<str>,
    config: SandboxConfig,
}

impl std::fmt::Debug for ScriptedPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedPlugin")
            .field("name", &self.script.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl ScriptedPlugin {
    /// Load a plugin from a `.lua` file with the default governor.
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_file_with_config(path, SandboxConfig::default())
    }

    /// Load a plugin from a `.lua` file.
    ///
    /// The registration name is the guest's top-level `name` string if it
    /// declares one, otherwise the file stem.
    pub fn from_file_with_config(path: &Path, config: SandboxConfig) -> Result<Self> {
        let stem = crate::loader::plugin_name_from_path(path)?;
        let source: Arc<str> = std::fs::read_to_string(path)
            .map_err(|e| {
                PluginError::load_failed(&stem, format!("cannot read {}: {e}", path.display()))
            })?
            .into();
        let (description, declared) = validate(&stem, &source, &config)?;
        let name = declared.unwrap_or(stem);
        tracing::debug!(plugin = %name, path = %path.display(), "scripted plugin parsed");
        Ok(Self::assemble(name, description, source, config))
    }

    /// Load a plugin from in-memory source under an explicit name.
    pub fn from_source(name: &str, source: &str, config: SandboxConfig) -> Result<Self> {
        let source: Arc<str> = source.into();
        let (description, _) = validate(name, &source, &config)?;
        Ok(Self::assemble(name.to_owned(), description, source, config))
    }

    fn assemble(name: String, description: String, source: Arc<str>, config: SandboxConfig) -> Self {
        Self {
            description,
            script: Arc::new(Script {
                name,
                source,
                config,
            }),
        }
    }
}

/// Run `job` on a fresh thread and wait for it at most the configured
/// timeout plus [`WATCHDOG_GRACE`].
fn on_worker<T, F>(plugin: &str, config: &SandboxConfig, job: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    std::thread::Builder::new()
        .name(format!("lua-guest-{plugin}"))
        .spawn(move || {
            let _ = tx.send(job());
        })
        .map_err(|e| {
            PluginError::execution_failed(plugin, format!("cannot start guest thread: {e}"))
        })?;

    match rx.recv_timeout(config.timeout() + WATCHDOG_GRACE) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            tracing::warn!(
                plugin = %plugin,
                limit_ms = config.timeout_ms(),
                "guest overran its deadline inside a library call, abandoning worker"
            );
            Err(PluginError::timeout(plugin, config.timeout_ms()))
        }
        Err(RecvTimeoutError::Disconnected) => Err(PluginError::execution_failed(
            plugin,
            "guest thread exited without a result",
        )),
    }
}

/// Run the chunk once and check the entry-point contract.
///
/// Returns the description and the declared name, if any.
fn validate(
    plugin: &str,
    source: &Arc<str>,
    config: &SandboxConfig,
) -> Result<(String, Option<String>)> {
    config
        .validate()
        .map_err(|e| PluginError::load_failed(plugin, e))?;
    let (name, source, limits) = (plugin.to_owned(), Arc::clone(source), config.clone());
    on_worker(plugin, config, move || inspect(&name, &source, &limits)).map_err(|e| match e {
        PluginError::Timeout { .. } => PluginError::load_failed(plugin, e.detail()),
        other => other,
    })
}

fn inspect(plugin: &str, source: &str, config: &SandboxConfig) -> Result<(String, Option<String>)> {
    let guest = Guest::new(plugin, config)
        .and_then(|guest| guest.exec(plugin, source).map(|()| guest))
        .map_err(|e| PluginError::load_failed(plugin, e))?;
    let globals = guest.lua.globals();

    let description = match globals.raw_get::<Value>("description") {
        Ok(Value::String(s)) => s.to_string_lossy().to_string(),
        _ => {
            return Err(PluginError::load_failed(
                plugin,
                "missing top-level string `description`",
            ));
        }
    };
    if !matches!(globals.raw_get::<Value>("transform"), Ok(Value::Function(_))) {
        return Err(PluginError::load_failed(
            plugin,
            "missing top-level function `transform`",
        ));
    }
    let declared = match globals.raw_get::<Value>("name") {
        Ok(Value::String(s)) => Some(s.to_string_lossy().to_string()).filter(|n| !n.is_empty()),
        _ => None,
    };
    Ok((description, declared))
}

impl Plugin for ScriptedPlugin {
    fn name(&self) -> &str {
        &self.script.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Scripted
    }

    fn transform(&self, input: &str) -> Result<String> {
        let started = Instant::now();
        let script = Arc::clone(&self.script);
        let input = input.to_owned();
        let text = on_worker(&self.script.name, &self.script.config, move || {
            script.run(&input)
        })?;

        tracing::debug!(
            plugin = %self.script.name,
            elapsed_us = elapsed_micros(started.elapsed()),
            "scripted transform finished"
        );
        Ok(text)
    }
}

impl Script {
    /// One guarded call of `transform`, on the current thread.
    fn run(&self, input: &str) -> Result<String> {
        let guest = Guest::new(&self.name, &self.config).map_err(|e| self.classify(None, e))?;

        let outcome = guest.exec(&self.name, &self.source).and_then(|()| {
            guest
                .lua
                .globals()
                .raw_get::<mlua::Function>("transform")?
                .call::<MultiValue>(input)
        });

        // An abort recorded during the call wins even if the guest swallowed it.
        if let Some(reason) = guest.abort_reason() {
            let err = outcome
                .err()
                .unwrap_or_else(|| mlua::Error::RuntimeError("aborted".into()));
            return Err(self.classify(Some(reason), err));
        }
        let values = outcome.map_err(|e| self.classify(None, e))?;
        self.expect_single_string(values)
    }

    fn classify(&self, guest_abort: Option<Abort>, err: mlua::Error) -> PluginError {
        match guest_abort {
            Some(Abort::Deadline) => PluginError::timeout(&self.name, self.config.timeout_ms()),
            Some(Abort::InstructionLimit(limit)) => PluginError::sandboxed(
                &self.name,
                format!("instruction limit of {limit} exceeded"),
            ),
            Some(Abort::Capability(name)) => PluginError::sandboxed(
                &self.name,
                format!("capability `{name}` is not available"),
            ),
            None if is_memory_error(&err) => PluginError::sandboxed(
                &self.name,
                format!("memory limit of {} bytes exceeded", self.config.memory_limit()),
            ),
            None => PluginError::execution_failed(&self.name, err),
        }
    }

    fn expect_single_string(&self, values: MultiValue) -> Result<String> {
        let mut values = values.into_iter();
        let value = match (values.next(), values.next()) {
            (Some(value), None) => value,
            (None, _) => {
                return Err(PluginError::invalid_return(&self.name, "no value returned"));
            }
            (Some(_), Some(_)) => {
                return Err(PluginError::invalid_return(
                    &self.name,
                    "more than one value returned",
                ));
            }
        };
        let s = match value {
            Value::String(s) => s,
            other => {
                return Err(PluginError::invalid_return(
                    &self.name,
                    format!("expected a string, got {}", other.type_name()),
                ));
            }
        };
        let bytes = s.as_bytes();
        abi::check_len(bytes.len()).map_err(|e| PluginError::sandboxed(&self.name, e))?;
        std::str::from_utf8(&bytes)
            .map(str::to_owned)
            .map_err(|e| PluginError::invalid_return(&self.name, e))
    }
}

fn elapsed_micros(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn plugin(source: &str) -> ScriptedPlugin {
        ScriptedPlugin::from_source("test", source, SandboxConfig::default()).unwrap()
    }

    fn load_err(source: &str) -> PluginError {
        ScriptedPlugin::from_source("test", source, SandboxConfig::default()).unwrap_err()
    }

    #[test]
    fn uppercase_transform() {
        let p = plugin(
            r#"
            description = "Uppercase"
            function transform(text) return text:upper() end
            "#,
        );
        assert_eq!(p.description(), "Uppercase");
        assert_eq!(p.kind(), PluginKind::Scripted);
        assert_eq!(p.transform("hello world").unwrap(), "HELLO WORLD");
    }

    #[test]
    fn missing_description_fails_to_load() {
        let err = load_err("function transform(t) return t end");
        assert_eq!(err.kind(), ErrorKind::LoadFailed);
        assert!(err.to_string().contains("description"));
    }

    #[test]
    fn missing_transform_fails_to_load() {
        let err = load_err(r#"description = "no entry point""#);
        assert_eq!(err.kind(), ErrorKind::LoadFailed);
        assert!(err.to_string().contains("transform"));
    }

    #[test]
    fn syntax_error_fails_to_load() {
        let err = load_err("description = 'x' function transform(");
        assert_eq!(err.kind(), ErrorKind::LoadFailed);
    }

    #[test]
    fn invalid_config_fails_to_load() {
        let config = SandboxConfig::default().with_memory_limit(0);
        let err = ScriptedPlugin::from_source(
            "test",
            "description = 'x' function transform(t) return t end",
            config,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LoadFailed);
        assert!(err.to_string().contains("memory_limit"));
    }

    #[test]
    fn guest_error_is_execution_failure() {
        let p = plugin(
            r#"
            description = "boom"
            function transform(text) error("kaboom") end
            "#,
        );
        let err = p.transform("x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExecutionFailed);
        assert!(err.to_string().contains("kaboom"));
    }

    #[test]
    fn non_string_returns_are_invalid() {
        for body in ["return 42", "return nil", "return {}", "return", "return 'a', 'b'"] {
            let source = format!("description = 'x' function transform(text) {body} end");
            let err = plugin(&source).transform("x").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidReturn, "body: {body}");
        }
    }

    #[test]
    fn invalid_utf8_return_is_invalid() {
        let p = plugin(r#"description = 'x' function transform(t) return "\xff\xfe" end"#);
        assert_eq!(p.transform("x").unwrap_err().kind(), ErrorKind::InvalidReturn);
    }

    #[test]
    fn withheld_capabilities_are_sandboxed() {
        for call in [
            "os.execute('true')",
            "io.open('/etc/passwd')",
            "require('socket')",
            "load('return 1')",
            "debug.getinfo(1)",
            "string.dump(transform)",
            "collectgarbage()",
        ] {
            let source =
                format!("description = 'x' function transform(text) {call} return text end");
            let err = plugin(&source).transform("x").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Sandboxed, "call: {call}");
        }
    }

    #[test]
    fn capability_probe_at_load_fails_to_load() {
        let err = load_err("local x = os.time() description = 'x' function transform(t) return t end");
        assert_eq!(err.kind(), ErrorKind::LoadFailed);
    }

    #[test]
    fn unknown_globals_are_plain_nil() {
        let p = plugin(
            r#"
            description = "probe"
            function transform(text)
                if undefined_thing == nil then return text .. "!" end
                return text
            end
            "#,
        );
        assert_eq!(p.transform("ok").unwrap(), "ok!");
    }

    #[test]
    fn instruction_limit_is_sandboxed() {
        let config = SandboxConfig::default().with_instruction_limit(Some(10_000));
        let p = ScriptedPlugin::from_source(
            "spin",
            "description = 'spin' function transform(t) while true do end end",
            config,
        )
        .unwrap();
        let err = p.transform("x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Sandboxed);
        assert!(err.to_string().contains("instruction limit"));
    }

    #[test]
    fn wall_clock_limit_is_timeout() {
        let config = SandboxConfig::default()
            .with_instruction_limit(None)
            .with_timeout(Duration::from_millis(50));
        let p = ScriptedPlugin::from_source(
            "spin",
            "description = 'spin' function transform(t) while true do end end",
            config,
        )
        .unwrap();
        let started = Instant::now();
        let err = p.transform("x").unwrap_err();
        assert!(matches!(err, PluginError::Timeout { limit_ms: 50, .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    /// `a*` repeated twelve times against a long run of `a` with no `b`
    /// backtracks for far longer than any test timeout.
    const BACKTRACK: &str = r#"string.rep("a", 3000), string.rep("a*", 12) .. "b""#;

    fn short_timeout() -> SandboxConfig {
        SandboxConfig::default()
            .with_instruction_limit(None)
            .with_timeout(Duration::from_millis(100))
    }

    #[test]
    fn long_library_call_is_timeout() {
        let source = format!(
            "description = 'backtrack' \
             function transform(t) local s, p = {BACKTRACK} return tostring(s:find(p)) end"
        );
        let p = ScriptedPlugin::from_source("backtrack", &source, short_timeout()).unwrap();

        let started = Instant::now();
        let err = p.transform("x").unwrap_err();
        assert!(matches!(err, PluginError::Timeout { limit_ms: 100, .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn long_host_helper_call_is_timeout() {
        let source = format!(
            "description = 'backtrack' \
             function transform(t) local s, p = {BACKTRACK} return mw.text.gsub(s, p, '') end"
        );
        let p = ScriptedPlugin::from_source("backtrack", &source, short_timeout()).unwrap();

        let started = Instant::now();
        assert_eq!(p.transform("x").unwrap_err().kind(), ErrorKind::Timeout);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn long_library_call_at_load_fails_to_load() {
        let source = format!(
            "local s, p = {BACKTRACK} s:match(p) \
             description = 'x' function transform(t) return t end"
        );
        let started = Instant::now();
        let err = ScriptedPlugin::from_source("backtrack", &source, short_timeout()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LoadFailed);
        assert!(err.to_string().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn fast_calls_are_unaffected_by_the_watchdog() {
        let p = ScriptedPlugin::from_source(
            "upper",
            "description = 'u' function transform(t) return t:upper() end",
            short_timeout(),
        )
        .unwrap();
        for _ in 0..20 {
            assert_eq!(p.transform("abc").unwrap(), "ABC");
        }
    }

    #[test]
    fn memory_limit_is_sandboxed() {
        let config = SandboxConfig::default().with_memory_limit(256 * 1024);
        let p = ScriptedPlugin::from_source(
            "hog",
            r#"
            description = "hog"
            function transform(text)
                local t = {}
                for i = 1, 1000000 do t[i] = string.rep("x", 64) .. i end
                return text
            end
            "#,
            config.with_instruction_limit(None),
        )
        .unwrap();
        assert_eq!(p.transform("x").unwrap_err().kind(), ErrorKind::Sandboxed);
    }

    #[test]
    fn globals_do_not_persist_between_calls() {
        let p = plugin(
            r#"
            description = "counter"
            calls = 0
            function transform(text)
                calls = calls + 1
                return text .. calls
            end
            "#,
        );
        assert_eq!(p.transform("a").unwrap(), "a1");
        assert_eq!(p.transform("a").unwrap(), "a1");
    }

    #[test]
    fn mw_helpers_are_available() {
        let p = plugin(
            r#"
            description = "categories"
            function transform(text)
                return table.concat(mw.categories(text), ",")
            end
            "#,
        );
        assert_eq!(
            p.transform("[[Category:A]] [[Category:B]]").unwrap(),
            "A,B"
        );
    }

    #[test]
    fn declared_name_overrides_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file_stem.lua");
        std::fs::write(
            &path,
            "name = 'declared' description = 'd' function transform(t) return t end",
        )
        .unwrap();
        assert_eq!(ScriptedPlugin::from_file(&path).unwrap().name(), "declared");

        let plain = dir.path().join("plain.lua");
        std::fs::write(&plain, "description = 'd' function transform(t) return t end").unwrap();
        assert_eq!(ScriptedPlugin::from_file(&plain).unwrap().name(), "plain");
    }

    #[test]
    fn unreadable_file_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let err = ScriptedPlugin::from_file(&dir.path().join("missing.lua")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LoadFailed);
    }
}
