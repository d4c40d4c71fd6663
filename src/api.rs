//! Runtime control surface.
//!
//! Process-wide switches consulted by the rewrite and dispatch paths:
//! whether the bridge is active at all, which engine executes clusters,
//! which op types are administratively disabled, and whether placement
//! decisions are logged. Everything here is cheap to read from hot paths.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{OnceLock, RwLock};

use crate::cluster::ClusterId;
use crate::encapsulate;
use crate::engine;
use crate::error::{BridgeError, BridgeResult};
use crate::ir::TensorSpec;
use crate::translate::translate_cluster;

struct State {
    enabled: AtomicBool,
    logging_placement: AtomicBool,
    dynamic_fallback: AtomicBool,
    engine: RwLock<String>,
    disabled_ops: RwLock<BTreeSet<String>>,
}

fn state() -> &'static State {
    static STATE: OnceLock<State> = OnceLock::new();
    STATE.get_or_init(|| State {
        enabled: AtomicBool::new(true),
        logging_placement: AtomicBool::new(false),
        dynamic_fallback: AtomicBool::new(true),
        engine: RwLock::new(engine::INTERPRETER.to_string()),
        disabled_ops: RwLock::new(BTreeSet::new()),
    })
}

pub fn enable() {
    state().enabled.store(true, Ordering::Relaxed);
}

pub fn disable() {
    state().enabled.store(false, Ordering::Relaxed);
}

pub fn is_enabled() -> bool {
    state().enabled.load(Ordering::Relaxed)
}

/// Registered engine names, sorted.
pub fn engine_names() -> Vec<String> {
    engine::engine_names()
}

pub fn is_supported_engine(name: &str) -> bool {
    engine::is_supported_engine(name)
}

/// Selects the engine clusters execute on.
pub fn set_engine(name: &str) -> BridgeResult<()> {
    if !engine::is_supported_engine(name) {
        return Err(BridgeError::engine(format!("engine {name} is not registered")));
    }
    *state().engine.write().expect("api state poisoned") = name.to_string();
    Ok(())
}

pub fn engine() -> String {
    state().engine.read().expect("api state poisoned").clone()
}

pub fn start_logging_placement() {
    state().logging_placement.store(true, Ordering::Relaxed);
}

pub fn stop_logging_placement() {
    state().logging_placement.store(false, Ordering::Relaxed);
}

pub fn is_logging_placement() -> bool {
    state().logging_placement.load(Ordering::Relaxed)
}

pub fn enable_dynamic_fallback() {
    state().dynamic_fallback.store(true, Ordering::Relaxed);
}

pub fn disable_dynamic_fallback() {
    state().dynamic_fallback.store(false, Ordering::Relaxed);
}

pub fn is_dynamic_fallback_enabled() -> bool {
    state().dynamic_fallback.load(Ordering::Relaxed)
}

/// Replaces the disabled-ops setting from a comma-separated list; empty
/// entries are ignored.
pub fn set_disabled_ops(list: &str) {
    let ops: BTreeSet<String> = list
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    *state().disabled_ops.write().expect("api state poisoned") = ops;
}

pub fn disabled_ops() -> BTreeSet<String> {
    state()
        .disabled_ops
        .read()
        .expect("api state poisoned")
        .clone()
}

/// Translates a registered cluster for the given input specs and returns
/// its IR as pretty-printed JSON (diagnostic export).
pub fn export_cluster_ir(cluster_id: ClusterId, input_specs: &[TensorSpec]) -> BridgeResult<String> {
    let cluster = encapsulate::subgraph(cluster_id).ok_or_else(|| {
        BridgeError::structural(format!("{cluster_id} is not registered"))
    })?;
    let translated = translate_cluster(&cluster, input_specs)?;
    translated
        .func
        .to_json()
        .map_err(|e| BridgeError::structural(format!("could not serialize IR: {e}")))
}
