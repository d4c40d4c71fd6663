mod common;

use std::sync::Mutex;

use ferry::api;
use ferry::cluster::ClusterAssignment;
use ferry::encapsulate::encapsulate_clusters;
use ferry::exec::{cached_function_count, clear_function_cache, execute_cluster};
use ferry::graph::Graph;
use ferry::ir::{DType, TensorLiteral, TensorSpec};
use ferry::{rewrite_graph, BridgeError, ClusterId, RewriteOptions};

use common::{init_tracing, op, placeholder, retval};

// Dispatch goes through process-wide state (function cache, fallback
// switch), so these tests run one at a time.
static SERIAL: Mutex<()> = Mutex::new(());

#[test]
fn rewritten_cluster_executes_on_the_engine() -> anyhow::Result<()> {
    let _guard = SERIAL.lock().unwrap();
    init_tracing();

    let mut graph = Graph::new();
    let a = placeholder(&mut graph, "a", 0);
    let b = placeholder(&mut graph, "b", 1);
    let add = op(&mut graph, "add", "Add", &[a, b]);
    let neg = op(&mut graph, "neg", "Neg", &[add]);
    retval(&mut graph, "out", 0, neg, 0);

    let report = rewrite_graph(&mut graph, &RewriteOptions::default())?;
    assert_eq!(report.marked, 2);
    assert_eq!(report.clusters.len(), 1);

    let inputs = [
        TensorLiteral::from_f32(vec![3], &[1.0, 2.0, 3.0]),
        TensorLiteral::from_f32(vec![3], &[4.0, 5.0, 6.0]),
    ];
    let outputs = execute_cluster(report.clusters[0], &inputs)?;
    assert_eq!(outputs[0].spec.dims, vec![3]);
    assert_eq!(outputs[0].to_f32_vec().unwrap(), vec![-5.0, -7.0, -9.0]);

    let specs = [
        TensorSpec::new(DType::F32, vec![3]),
        TensorSpec::new(DType::F32, vec![3]),
    ];
    let json = api::export_cluster_ir(report.clusters[0], &specs)?;
    assert!(json.contains("\"parameters\""));
    Ok(())
}

#[test]
fn translations_are_cached_per_signature() -> anyhow::Result<()> {
    let _guard = SERIAL.lock().unwrap();
    init_tracing();

    let mut graph = Graph::new();
    let input = placeholder(&mut graph, "input", 0);
    let relu = op(&mut graph, "relu", "Relu", &[input]);
    let neg = op(&mut graph, "neg", "Neg", &[relu]);
    retval(&mut graph, "out", 0, neg, 0);
    let report = rewrite_graph(&mut graph, &RewriteOptions::default())?;
    let id = report.clusters[0];

    clear_function_cache();
    assert_eq!(cached_function_count(), 0);

    execute_cluster(id, &[TensorLiteral::from_f32(vec![4], &[1.0, -2.0, 3.0, -4.0])])?;
    assert_eq!(cached_function_count(), 1);

    // Same signature, different data: cache hit.
    execute_cluster(id, &[TensorLiteral::from_f32(vec![4], &[5.0, 6.0, -7.0, 8.0])])?;
    assert_eq!(cached_function_count(), 1);

    // A new shape translates again under its own key.
    execute_cluster(id, &[TensorLiteral::from_f32(vec![2, 2], &[1.0, 2.0, 3.0, 4.0])])?;
    assert_eq!(cached_function_count(), 2);
    Ok(())
}

#[test]
fn untranslatable_cluster_falls_back_to_native_eval() -> anyhow::Result<()> {
    let _guard = SERIAL.lock().unwrap();
    init_tracing();

    // A reshape with a runtime shape never passes marking; hand-build the
    // membership so the dispatcher has to take the fallback path.
    let mut graph = Graph::new();
    let data = placeholder(&mut graph, "data", 0);
    let shape = placeholder(&mut graph, "shape", 1);
    let reshape = op(&mut graph, "reshape", "Reshape", &[data, shape]);
    let neg = op(&mut graph, "neg", "Neg", &[reshape]);
    retval(&mut graph, "out", 0, neg, 0);

    let mut assignment = ClusterAssignment::default();
    assignment.clusters.push(vec![reshape, neg]);
    let ids = encapsulate_clusters(&mut graph, &assignment)?;

    let inputs = [
        TensorLiteral::from_f32(vec![6], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
        TensorLiteral::from_i64(vec![2], &[2, 3]),
    ];
    let outputs = execute_cluster(ids[0], &inputs)?;
    assert_eq!(outputs[0].spec.dims, vec![2, 3]);
    assert_eq!(
        outputs[0].to_f32_vec().unwrap(),
        vec![-1.0, -2.0, -3.0, -4.0, -5.0, -6.0]
    );

    api::disable_dynamic_fallback();
    let denied = execute_cluster(ids[0], &inputs);
    api::enable_dynamic_fallback();
    assert!(matches!(denied, Err(BridgeError::Translate(_))));
    Ok(())
}

#[test]
fn executing_an_unknown_cluster_is_structural() {
    let _guard = SERIAL.lock().unwrap();
    let err = execute_cluster(ClusterId(u32::MAX), &[]).unwrap_err();
    assert!(matches!(err, BridgeError::Structural { .. }));
}
