mod common;

use std::sync::Arc;

use ferry::api;
use ferry::engine::{self, Engine, EngineError};
use ferry::graph::Graph;
use ferry::ir::{FunctionIr, TensorLiteral};
use ferry::{rewrite_graph, ClusterId, RewriteOptions};

use common::{op, placeholder, retval};

#[test]
fn disabled_ops_parse_from_a_comma_list() {
    api::set_disabled_ops(" Add, Mul ,,Relu ");
    let ops: Vec<String> = api::disabled_ops().into_iter().collect();
    assert_eq!(ops, vec!["Add", "Mul", "Relu"]);

    api::set_disabled_ops("");
    assert!(api::disabled_ops().is_empty());
}

#[test]
fn engine_selection_rejects_unknown_names() {
    assert!(api::engine_names().contains(&engine::INTERPRETER.to_string()));
    assert!(!api::is_supported_engine("npu3"));
    assert!(api::set_engine("npu3").is_err());

    api::set_engine(engine::INTERPRETER).unwrap();
    assert_eq!(api::engine(), engine::INTERPRETER);
}

#[test]
fn custom_engines_register_under_their_name() {
    struct Echo;

    impl Engine for Echo {
        fn name(&self) -> &str {
            "ECHO"
        }

        fn execute(
            &self,
            _func: &FunctionIr,
            inputs: &[TensorLiteral],
        ) -> Result<Vec<TensorLiteral>, EngineError> {
            Ok(inputs.to_vec())
        }
    }

    engine::register_engine(Arc::new(Echo));
    assert!(api::is_supported_engine("ECHO"));
}

#[test]
fn disabled_bridge_leaves_the_graph_alone() {
    let mut graph = Graph::new();
    let input = placeholder(&mut graph, "input", 0);
    let relu = op(&mut graph, "relu", "Relu", &[input]);
    let neg = op(&mut graph, "neg", "Neg", &[relu]);
    retval(&mut graph, "out", 0, neg, 0);

    api::disable();
    let report = rewrite_graph(&mut graph, &RewriteOptions::default()).unwrap();
    api::enable();

    assert_eq!(report.marked, 0);
    assert!(report.clusters.is_empty());
    assert_eq!(graph.node_count(), 4);
    assert!(graph.find_node("relu").is_some());
}

#[test]
fn placement_logging_toggles() {
    api::start_logging_placement();
    assert!(api::is_logging_placement());
    api::stop_logging_placement();
    assert!(!api::is_logging_placement());
}

#[test]
fn exporting_an_unknown_cluster_fails() {
    assert!(api::export_cluster_ir(ClusterId(u32::MAX), &[]).is_err());
}
