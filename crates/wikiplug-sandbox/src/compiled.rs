//! Compiled-module runtime (WebAssembly via wasmtime).
//!
//! A compiled plugin is a core module that imports nothing and exports:
//!
//! - `memory`: its linear memory
//! - `alloc(size: i32) -> i32`
//! - `transform(ptr: i32, len: i32) -> i32`, returning a pointer to a
//!   length-prefixed frame (see [`abi`](crate::abi))
//!
//! No host functions are linked, so a module has no way to reach the file
//! system, the network or the process.  Each call runs in a fresh [`Store`]
//! and instance charged with the configured fuel, bounded by an epoch
//! deadline and capped by a memory limiter.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use wasmtime::{
    Engine, ExternType, FuncType, Instance, Module, ResourceLimiter, Store, Trap, ValType,
};

use crate::abi::{self, FrameError};
use crate::config::SandboxConfig;
use crate::error::{PluginError, Result};
use crate::plugin::{Plugin, PluginKind};

/// Interval at which the engine epoch advances.
pub const EPOCH_TICK: Duration = Duration::from_millis(10);

/// Table growth ceiling per instance.
const MAX_TABLE_ELEMENTS: usize = 10_000;

fn epoch_deadline_ticks(timeout: Duration) -> u64 {
    let tick_ms = EPOCH_TICK.as_millis().max(1);
    let timeout_ms = timeout.as_millis().max(1);
    u64::try_from(timeout_ms.div_ceil(tick_ms)).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct EpochTicker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EpochTicker {
    fn start(engine: Engine, interval: Duration) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("wasm-epoch-ticker".into())
            .spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    std::thread::sleep(interval);
                    engine.increment_epoch();
                }
            })?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for EpochTicker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// A wasmtime engine configured for metered, interruptible execution,
/// together with the thread that drives its epoch.
///
/// One engine can back any number of plugins; the ticker stops when the last
/// handle is dropped.
pub struct WasmEngine {
    engine: Engine,
    _ticker: EpochTicker,
}

impl WasmEngine {
    /// Create an engine and start its epoch ticker.
    pub fn new() -> Result<Self> {
        let mut config = wasmtime::Config::new();
        config.consume_fuel(true);
        config.epoch_interruption(true);
        config.wasm_memory64(false);

        let engine = Engine::new(&config)
            .map_err(|e| PluginError::load_failed("wasm engine", format!("{e:#}")))?;
        let ticker = EpochTicker::start(engine.clone(), EPOCH_TICK)?;
        tracing::debug!(tick_ms = EPOCH_TICK.as_millis() as u64, "wasm engine started");
        Ok(Self {
            engine,
            _ticker: ticker,
        })
    }

    /// The underlying wasmtime engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}

impl std::fmt::Debug for WasmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmEngine").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Per-call host state
// ---------------------------------------------------------------------------

struct MemoryCeiling {
    limit: usize,
    breached: bool,
}

impl ResourceLimiter for MemoryCeiling {
    fn memory_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        if desired > self.limit {
            self.breached = true;
            return Err(wasmtime::Error::msg(format!(
                "linear memory of {desired} bytes exceeds the {}-byte limit",
                self.limit
            )));
        }
        Ok(true)
    }

    fn table_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        Ok(desired <= MAX_TABLE_ELEMENTS)
    }
}

struct HostState {
    limits: MemoryCeiling,
}

// ---------------------------------------------------------------------------
// Plugin
// ---------------------------------------------------------------------------

/// A WebAssembly-hosted plugin.
pub struct CompiledPlugin {
    name: String,
    description: String,
    engine: Arc<WasmEngine>,
    module: Module,
    config: SandboxConfig,
}

impl std::fmt::Debug for CompiledPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledPlugin")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CompiledPlugin {
    /// Load a module from disk on a private engine with the default governor.
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_file_with_config(path, Arc::new(WasmEngine::new()?), SandboxConfig::default())
    }

    /// Load a module from disk.  The plugin is named after the file stem.
    ///
    /// Both the binary format and the text format are accepted.
    pub fn from_file_with_config(
        path: &Path,
        engine: Arc<WasmEngine>,
        config: SandboxConfig,
    ) -> Result<Self> {
        let name = crate::loader::plugin_name_from_path(path)?;
        let bytes = std::fs::read(path).map_err(|e| {
            PluginError::load_failed(&name, format!("cannot read {}: {e}", path.display()))
        })?;
        tracing::debug!(
            plugin = %name,
            path = %path.display(),
            size_bytes = bytes.len(),
            "read module bytes"
        );
        Self::from_bytes(&name, &bytes, engine, config)
    }

    /// Compile, check and trial-instantiate a module.
    pub fn from_bytes(
        name: &str,
        bytes: &[u8],
        engine: Arc<WasmEngine>,
        config: SandboxConfig,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| PluginError::load_failed(name, e))?;
        let module = Module::new(engine.engine(), bytes)
            .map_err(|e| PluginError::load_failed(name, format!("{e:#}")))?;
        check_contract(name, &module)?;

        let plugin = Self {
            name: name.to_owned(),
            description: format!("compiled plugin {name}"),
            engine,
            module,
            config,
        };
        let mut store = plugin.new_store()?;
        Instance::new(&mut store, &plugin.module, &[])
            .map_err(|e| PluginError::load_failed(name, format!("instantiation failed: {e:#}")))?;

        tracing::debug!(plugin = %name, "compiled plugin ready");
        Ok(plugin)
    }

    fn new_store(&self) -> Result<Store<HostState>> {
        let mut store = Store::new(
            self.engine.engine(),
            HostState {
                limits: MemoryCeiling {
                    limit: self.config.memory_limit(),
                    breached: false,
                },
            },
        );
        store.limiter(|state| &mut state.limits);
        store
            .set_fuel(self.config.computation_budget())
            .map_err(|e| PluginError::execution_failed(&self.name, format!("{e:#}")))?;
        store.set_epoch_deadline(epoch_deadline_ticks(self.config.timeout()));
        Ok(store)
    }

    fn run(&self, store: &mut Store<HostState>, input: &str) -> Result<String> {
        let instance = Instance::new(&mut *store, &self.module, &[])
            .map_err(|e| self.classify(store.data(), e))?;
        let memory = instance
            .get_memory(&mut *store, "memory")
            .ok_or_else(|| PluginError::execution_failed(&self.name, "no exported memory"))?;
        let alloc = instance
            .get_typed_func::<i32, i32>(&mut *store, "alloc")
            .map_err(|e| PluginError::execution_failed(&self.name, e))?;
        let transform = instance
            .get_typed_func::<(i32, i32), i32>(&mut *store, "transform")
            .map_err(|e| PluginError::execution_failed(&self.name, e))?;

        let len = i32::try_from(input.len()).map_err(|_| {
            PluginError::sandboxed(&self.name, "input does not fit a 32-bit guest")
        })?;
        let ptr = alloc
            .call(&mut *store, len)
            .map_err(|e| self.classify(store.data(), e))?;
        memory
            .write(&mut *store, guest_offset(ptr), input.as_bytes())
            .map_err(|e| {
                PluginError::execution_failed(
                    &self.name,
                    format!("`alloc` returned an unusable region: {e}"),
                )
            })?;

        let frame = transform
            .call(&mut *store, (ptr, len))
            .map_err(|e| self.classify(store.data(), e))?;
        self.read_frame(memory.data(&*store), guest_offset(frame))
    }

    fn read_frame(&self, memory: &[u8], offset: usize) -> Result<String> {
        let frame = memory.get(offset..).ok_or_else(|| {
            PluginError::invalid_return(
                &self.name,
                format!("result pointer {offset} is outside guest memory"),
            )
        })?;
        match abi::decode_frame(frame) {
            Ok(text) => Ok(text.to_owned()),
            Err(e @ FrameError::TooLarge { .. }) => Err(PluginError::sandboxed(&self.name, e)),
            Err(e) => Err(PluginError::invalid_return(&self.name, e)),
        }
    }

    fn classify(&self, state: &HostState, err: wasmtime::Error) -> PluginError {
        if state.limits.breached {
            return PluginError::sandboxed(
                &self.name,
                format!(
                    "memory limit of {} bytes exceeded",
                    self.config.memory_limit()
                ),
            );
        }
        match err.downcast_ref::<Trap>() {
            Some(Trap::OutOfFuel) => PluginError::sandboxed(
                &self.name,
                format!(
                    "computation budget of {} exhausted",
                    self.config.computation_budget()
                ),
            ),
            Some(Trap::Interrupt) => PluginError::timeout(&self.name, self.config.timeout_ms()),
            _ => PluginError::execution_failed(&self.name, format!("{err:#}")),
        }
    }
}

impl Plugin for CompiledPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Compiled
    }

    fn transform(&self, input: &str) -> Result<String> {
        let mut store = self.new_store()?;
        let result = self.run(&mut store, input);

        let remaining = store.get_fuel().unwrap_or(0);
        tracing::debug!(
            plugin = %self.name,
            fuel_consumed = self.config.computation_budget().saturating_sub(remaining),
            ok = result.is_ok(),
            "compiled transform finished"
        );
        result
    }
}

fn guest_offset(ptr: i32) -> usize {
    ptr as u32 as usize
}

fn check_contract(name: &str, module: &Module) -> Result<()> {
    if let Some(import) = module.imports().next() {
        return Err(PluginError::load_failed(
            name,
            format!(
                "imports `{}::{}` but no host imports are provided",
                import.module(),
                import.name()
            ),
        ));
    }
    if !matches!(module.get_export("memory"), Some(ExternType::Memory(_))) {
        return Err(PluginError::load_failed(
            name,
            "must export a linear memory named `memory`",
        ));
    }
    check_func(name, module, "alloc", 1)?;
    check_func(name, module, "transform", 2)
}

/// Require an exported function taking `params` i32s and returning one i32.
fn check_func(name: &str, module: &Module, export: &str, params: usize) -> Result<()> {
    let ty = match module.get_export(export) {
        Some(ExternType::Func(ty)) => ty,
        _ => {
            return Err(PluginError::load_failed(
                name,
                format!("missing exported function `{export}`"),
            ));
        }
    };
    if !is_i32_signature(&ty, params) {
        return Err(PluginError::load_failed(
            name,
            format!(
                "`{export}` has the wrong signature, expected {params} i32 parameter(s) \
                 and one i32 result"
            ),
        ));
    }
    Ok(())
}

fn is_i32_signature(ty: &FuncType, params: usize) -> bool {
    ty.params().len() == params
        && ty.params().all(|p| matches!(p, ValType::I32))
        && ty.results().len() == 1
        && ty.results().all(|r| matches!(r, ValType::I32))
}
