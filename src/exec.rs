//! Execution dispatch for encapsulated clusters.
//!
//! Lowered functions are cached per (cluster, input signature); within one
//! key at most one translation runs even under concurrent callers, others
//! block on the same cell. Translation failure is recoverable: the cluster
//! body runs on the host reference evaluator instead. Engine failures are
//! the caller's problem and surface verbatim.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, OnceLock};

use lru::LruCache;
use tracing::{debug, warn};

use crate::api;
use crate::cluster::ClusterId;
use crate::encapsulate::{self, ClusterSubgraph};
use crate::error::{BridgeError, BridgeResult};
use crate::graph::{eval_graph, TensorData};
use crate::ir::{TensorLiteral, TensorSpec};
use crate::translate::{translate_cluster, TranslateError, TranslatedFunction};
use crate::{engine, translate};

const DEFAULT_CACHE_CAPACITY: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    cluster: ClusterId,
    signature: Vec<TensorSpec>,
}

type CacheCell = Arc<OnceLock<Result<Arc<TranslatedFunction>, Arc<TranslateError>>>>;

/// LRU cache of lowered functions with per-key at-most-once translation.
pub struct FunctionCache {
    entries: Mutex<LruCache<CacheKey, CacheCell>>,
}

impl FunctionCache {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is nonzero");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("function cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().expect("function cache poisoned").clear();
    }

    fn get_or_translate(
        &self,
        cluster: &ClusterSubgraph,
        signature: &[TensorSpec],
    ) -> Result<Arc<TranslatedFunction>, Arc<TranslateError>> {
        let key = CacheKey {
            cluster: cluster.id,
            signature: signature.to_vec(),
        };
        let cell: CacheCell = {
            let mut entries = self.entries.lock().expect("function cache poisoned");
            entries
                .get_or_insert(key, || Arc::new(OnceLock::new()))
                .clone()
        };
        cell.get_or_init(|| {
            debug!(cluster = %cluster.id, "translating cluster");
            translate_cluster(cluster, signature)
                .map(Arc::new)
                .map_err(Arc::new)
        })
        .clone()
    }
}

fn global_cache() -> &'static FunctionCache {
    static CACHE: OnceLock<FunctionCache> = OnceLock::new();
    CACHE.get_or_init(|| FunctionCache::with_capacity(DEFAULT_CACHE_CAPACITY))
}

/// Drops every cached function (test isolation hook).
pub fn clear_function_cache() {
    global_cache().clear();
}

pub fn cached_function_count() -> usize {
    global_cache().len()
}

fn literal_to_tensor(literal: &TensorLiteral) -> TensorData {
    TensorData::new(
        literal.spec.dtype.to_host(),
        literal.spec.dims.clone(),
        literal.bytes.to_vec(),
    )
}

fn tensor_to_literal(tensor: &TensorData) -> TensorLiteral {
    translate::literal_from_tensor(tensor)
}

/// Runs the registered cluster body on the host reference evaluator.
fn execute_native(
    cluster: &ClusterSubgraph,
    inputs: &[TensorLiteral],
) -> BridgeResult<Vec<TensorLiteral>> {
    let feeds: Vec<TensorData> = inputs.iter().map(literal_to_tensor).collect();
    let outputs = eval_graph(&cluster.graph, &feeds)?;
    Ok(outputs.iter().map(tensor_to_literal).collect())
}

/// Executes one encapsulated cluster on the active engine, translating on
/// first sight of this input signature.
pub fn execute_cluster(
    cluster_id: ClusterId,
    inputs: &[TensorLiteral],
) -> BridgeResult<Vec<TensorLiteral>> {
    let cluster = encapsulate::subgraph(cluster_id).ok_or_else(|| {
        BridgeError::structural(format!("{cluster_id} is not registered"))
    })?;
    if inputs.len() != cluster.num_inputs {
        return Err(BridgeError::structural(format!(
            "{cluster_id} expects {} inputs, got {}",
            cluster.num_inputs,
            inputs.len()
        )));
    }
    let signature: Vec<TensorSpec> = inputs.iter().map(|t| t.spec.clone()).collect();

    let translated = match global_cache().get_or_translate(&cluster, &signature) {
        Ok(translated) => translated,
        Err(error) => {
            if !api::is_dynamic_fallback_enabled() {
                return Err(error.into());
            }
            warn!(
                cluster = %cluster_id,
                %error,
                "translation failed, falling back to native execution"
            );
            return execute_native(&cluster, inputs);
        }
    };

    let engine_name = api::engine();
    let engine = engine::engine(&engine_name)
        .ok_or_else(|| BridgeError::engine(format!("engine {engine_name} is not registered")))?;

    let engine_inputs: Vec<TensorLiteral> = translated
        .param_inputs
        .iter()
        .map(|&index| inputs[index].clone())
        .collect();
    let engine_outputs = engine
        .execute(&translated.func, &engine_inputs)
        .map_err(|e| BridgeError::engine(e.to_string()))?;
    if engine_outputs.len() != translated.kept_outputs.len() {
        return Err(BridgeError::engine(format!(
            "engine returned {} outputs, expected {}",
            engine_outputs.len(),
            translated.kept_outputs.len()
        )));
    }

    // Reassemble the host output list, synthesizing the dropped zero-dim
    // results from their recorded specs.
    let mut produced = engine_outputs.into_iter();
    let mut outputs = Vec::with_capacity(translated.output_specs.len());
    for (index, spec) in translated.output_specs.iter().enumerate() {
        if translated.kept_outputs.contains(&index) {
            outputs.push(produced.next().ok_or_else(|| {
                BridgeError::engine("engine output list ended early".to_string())
            })?);
        } else {
            outputs.push(TensorLiteral::zeroed(spec.clone()));
        }
    }
    Ok(outputs)
}
