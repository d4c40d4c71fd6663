//! Backend engine surface and process-wide engine registry.
//!
//! An engine consumes validated functions and executes them on some
//! device. Engines register under a name; the dispatcher resolves the
//! active one at execution time. The crate ships a reference CPU
//! interpreter so the pipeline is executable without hardware.

mod interpreter;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use thiserror::Error;

use crate::ir::{FunctionIr, TensorLiteral};

pub use interpreter::Interpreter;

/// Name the reference interpreter registers under.
pub const INTERPRETER: &str = "INTERPRETER";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine does not implement {op}")]
    Unsupported { op: String },

    #[error("input {index}: {message}")]
    Input { index: usize, message: String },

    #[error("execution failed: {0}")]
    Execution(String),
}

/// Execution backend for lowered functions.
///
/// Results must come back in row-major layout matching each result's
/// `TensorSpec`.
pub trait Engine: Send + Sync {
    fn name(&self) -> &str;

    /// Runs `func` on `inputs`, ordered by the function's parameters.
    fn execute(
        &self,
        func: &FunctionIr,
        inputs: &[TensorLiteral],
    ) -> Result<Vec<TensorLiteral>, EngineError>;
}

fn registry() -> &'static RwLock<HashMap<String, Arc<dyn Engine>>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, Arc<dyn Engine>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map: HashMap<String, Arc<dyn Engine>> = HashMap::new();
        map.insert(INTERPRETER.to_string(), Arc::new(Interpreter));
        RwLock::new(map)
    })
}

/// Registers `engine` under its own name, replacing any previous entry.
pub fn register_engine(engine: Arc<dyn Engine>) {
    registry()
        .write()
        .expect("engine registry poisoned")
        .insert(engine.name().to_string(), engine);
}

pub fn engine(name: &str) -> Option<Arc<dyn Engine>> {
    registry()
        .read()
        .expect("engine registry poisoned")
        .get(name)
        .cloned()
}

/// Registered engine names, sorted.
pub fn engine_names() -> Vec<String> {
    let mut names: Vec<String> = registry()
        .read()
        .expect("engine registry poisoned")
        .keys()
        .cloned()
        .collect();
    names.sort();
    names
}

pub fn is_supported_engine(name: &str) -> bool {
    registry()
        .read()
        .expect("engine registry poisoned")
        .contains_key(name)
}
