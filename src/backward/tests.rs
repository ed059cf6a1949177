//! Tests for the backward builder

use rstest::rstest;

use super::*;
use crate::error::BackwardError;
use crate::naming::{EMPTY_VAR_NAME, grad_var_name};
use crate::operator::{AttributeMap, GENERATED_BACKWARD_KIND, NOP_KIND, NetOp, VarNameMap};
use crate::registry::{ArgProto, OpFactory, OpProto, OpRegistry};
use crate::vars;

fn registry() -> OpRegistry {
    let mut registry = OpRegistry::with_default_ops();
    registry
        .register(
            OpProto::new("many_output_op")
                .input(ArgProto::new("x"))
                .output(ArgProto::new("y"))
                .output(ArgProto::new("z"))
                .grad("many_output_op_grad"),
        )
        .unwrap();
    registry
        .register(
            OpProto::new("triple_out")
                .input(ArgProto::new("X"))
                .output(ArgProto::new("A"))
                .output(ArgProto::new("B"))
                .output(ArgProto::new("C"))
                .grad("triple_out_grad"),
        )
        .unwrap();
    registry
        .register(
            OpProto::new("argmax")
                .input(ArgProto::new("X"))
                .output(ArgProto::new("Out")),
        )
        .unwrap();
    registry
}

fn op(registry: &OpRegistry, kind: &str, inputs: VarNameMap, outputs: VarNameMap) -> Operator {
    registry
        .create_op(kind, inputs, outputs, AttributeMap::new())
        .unwrap()
}

fn net_of(ops: Vec<Operator>) -> Operator {
    let mut net = NetOp::new();
    for op in ops {
        net.append_op(op).unwrap();
    }
    net.complete_add_op(true);
    net.into()
}

/// mul -> rowwise_add -> sigmoid, with intermediates named after `out`.
fn fc(registry: &OpRegistry, x: &str, w: &str, b: &str, out: &str) -> Operator {
    let mul_out = format!("{out}_mul");
    let add_out = format!("{out}_add");
    net_of(vec![
        op(
            registry,
            "mul",
            vars! { "X" => [x], "Y" => [w] },
            vars! { "Out" => [mul_out] },
        ),
        op(
            registry,
            "rowwise_add",
            vars! { "X" => [mul_out], "b" => [b] },
            vars! { "Out" => [add_out] },
        ),
        op(
            registry,
            "sigmoid",
            vars! { "X" => [add_out] },
            vars! { "Y" => [out] },
        ),
    ])
}

fn build(registry: &OpRegistry, fwd: &Operator, no_grad: &mut NoGradSet) -> Operator {
    let mut uniq_id = 0;
    BackwardBuilder::new(registry)
        .build(fwd, no_grad, &mut uniq_id)
        .unwrap()
}

fn count_leaves(op: &Operator) -> usize {
    leaf_kinds(op).len()
}

fn leaf_kinds(op: &Operator) -> Vec<String> {
    match op.as_net() {
        Some(net) => net.ops().iter().flat_map(leaf_kinds).collect(),
        None => vec![op.kind().to_string()],
    }
}

#[test]
fn test_prune_when_no_input_gradient_needed() {
    let registry = registry();
    let fwd = op(
        &registry,
        "mul",
        vars! { "X" => ["x"], "Y" => ["y"] },
        vars! { "Out" => ["z"] },
    );
    let mut no_grad = NoGradSet::seeded(["x", "y"]);
    let before = no_grad.clone();

    let bwd = build(&registry, &fwd, &mut no_grad);
    assert_eq!(bwd.kind(), NOP_KIND);
    assert!(bwd.as_net().unwrap().is_empty());
    assert_eq!(no_grad, before);
}

#[test]
fn test_prune_when_no_output_gradient_available() {
    let registry = registry();
    let fwd = op(
        &registry,
        "mul",
        vars! { "X" => ["x"], "Y" => ["y"] },
        vars! { "Out" => ["z"] },
    );
    let mut no_grad = NoGradSet::seeded(["z"]);

    let bwd = build(&registry, &fwd, &mut no_grad);
    assert_eq!(bwd.kind(), NOP_KIND);
    assert!(no_grad.contains("x@GRAD"));
    assert!(no_grad.contains("y@GRAD"));
}

#[test]
fn test_leaf_returns_grad_op_directly() {
    let registry = registry();
    let fwd = op(
        &registry,
        "rowwise_add",
        vars! { "X" => ["x"], "b" => ["b"] },
        vars! { "Out" => ["out"] },
    );
    let bwd = build(&registry, &fwd, &mut NoGradSet::seeded(Vec::<String>::new()));

    assert_eq!(bwd.kind(), "rowwise_add_grad");
    assert!(!bwd.is_net_op());
    assert_eq!(bwd.input("Out@GRAD").unwrap(), "out@GRAD");
    assert_eq!(bwd.output("X@GRAD").unwrap(), "x@GRAD");
    assert_eq!(bwd.output("b@GRAD").unwrap(), "b@GRAD");
}

#[test]
fn test_unneeded_grad_output_bound_to_empty() {
    let registry = registry();
    let fwd = op(
        &registry,
        "mul",
        vars! { "X" => ["a"], "Y" => ["b"] },
        vars! { "Out" => ["out"] },
    );
    let bwd = build(&registry, &fwd, &mut NoGradSet::seeded(["a"]));

    assert_eq!(bwd.kind(), "mul_grad");
    assert_eq!(bwd.inputs().len(), 4);
    assert_eq!(bwd.outputs().len(), 2);
    assert_eq!(bwd.output("X@GRAD").unwrap(), EMPTY_VAR_NAME);
    assert_eq!(bwd.output("Y@GRAD").unwrap(), "b@GRAD");
}

#[test]
fn test_zero_fill_for_unavailable_output_gradient() {
    let registry = registry();
    let fwd = op(
        &registry,
        "many_output_op",
        vars! { "x" => ["X"] },
        vars! { "y" => ["Y"], "z" => ["Z"] },
    );
    let bwd = build(&registry, &fwd, &mut NoGradSet::seeded(["Z"]));

    assert_eq!(bwd.kind(), GENERATED_BACKWARD_KIND);
    let net = bwd.as_net().unwrap();
    assert!(net.is_sealed());
    assert_eq!(net.len(), 2);

    let fill_zero = &net.ops()[0];
    assert_eq!(fill_zero.kind(), "fill_zeros_like");
    assert_eq!(fill_zero.input("Src").unwrap(), "Z");
    assert_eq!(fill_zero.output("Dst").unwrap(), "Z@ZERO");

    let d_many_out = &net.ops()[1];
    assert_eq!(d_many_out.kind(), "many_output_op_grad");
    assert_eq!(d_many_out.inputs().len(), 1 + 2 + 2);
    assert_eq!(d_many_out.input("z@GRAD").unwrap(), "Z@ZERO");
    assert_eq!(d_many_out.input("y@GRAD").unwrap(), "Y@GRAD");
    assert_eq!(d_many_out.output("x@GRAD").unwrap(), "X@GRAD");
}

#[rstest]
#[case(true, 1)]
#[case(false, 2)]
fn test_zero_fill_dedup(#[case] dedup: bool, #[case] expected_fills: usize) {
    let registry = registry();
    let fwd = op(
        &registry,
        "triple_out",
        vars! { "X" => ["x"] },
        vars! { "A" => ["z"], "B" => ["z"], "C" => ["w"] },
    );
    let config = BackwardConfig::builder().dedup_zero_fill(dedup).build();
    let mut uniq_id = 0;
    let bwd = BackwardBuilder::with_config(&registry, config)
        .build(&fwd, &mut NoGradSet::seeded(["z"]), &mut uniq_id)
        .unwrap();

    let net = bwd.as_net().unwrap();
    let fills = net
        .ops()
        .iter()
        .filter(|op| op.kind() == "fill_zeros_like")
        .count();
    assert_eq!(fills, expected_fills);
    assert_eq!(net.len(), expected_fills + 1);

    let grad = net.ops().last().unwrap();
    assert_eq!(grad.input("A@GRAD").unwrap(), "z@ZERO");
    assert_eq!(grad.input("B@GRAD").unwrap(), "z@ZERO");
    assert_eq!(grad.input("C@GRAD").unwrap(), "w@GRAD");
}

#[test]
fn test_duplicate_gradients_are_summed() {
    let registry = registry();
    // c1: x -> a, c2: a -> b, c3: (x, b) -> out. x feeds both c1 and c3.
    let fwd = net_of(vec![
        op(&registry, "sigmoid", vars! { "X" => ["x"] }, vars! { "Y" => ["a"] }),
        op(&registry, "sigmoid", vars! { "X" => ["a"] }, vars! { "Y" => ["b"] }),
        op(
            &registry,
            "mul",
            vars! { "X" => ["x"], "Y" => ["b"] },
            vars! { "Out" => ["out"] },
        ),
    ]);

    let mut no_grad = NoGradSet::seeded(Vec::<String>::new());
    let mut uniq_id = 0;
    let bwd = BackwardBuilder::new(&registry)
        .build(&fwd, &mut no_grad, &mut uniq_id)
        .unwrap();
    assert_eq!(uniq_id, 1);

    let net = bwd.as_net().unwrap();
    let kinds: Vec<_> = net.ops().iter().map(|op| op.kind()).collect();
    assert_eq!(kinds, vec!["mul_grad", "sigmoid_grad", "sigmoid_grad", "add"]);

    assert_eq!(
        net.ops()[0].output("X@GRAD").unwrap(),
        "x@GRAD@RENAME@0@0"
    );
    assert_eq!(
        net.ops()[2].output("X@GRAD").unwrap(),
        "x@GRAD@RENAME@0@1"
    );
    // b@GRAD has a single producer and keeps its name.
    assert_eq!(net.ops()[0].output("Y@GRAD").unwrap(), "b@GRAD");

    let add = &net.ops()[3];
    assert_eq!(
        add.inputs_of("X").unwrap(),
        ["x@GRAD@RENAME@0@0".to_string(), "x@GRAD@RENAME@0@1".to_string()]
    );
    assert_eq!(add.output("Out").unwrap(), "x@GRAD");
    assert_eq!(net.outputs()["all"].iter().filter(|n| *n == "x@GRAD").count(), 1);
}

#[test]
fn test_aggregation_inserted_after_last_producer() {
    let registry = registry();
    // Reverse order: d(c4) d(c3) d(c2) d(c1). x@GRAD comes from d(c4) and
    // d(c2), y@GRAD from d(c3) and d(c1).
    let fwd = net_of(vec![
        op(&registry, "sigmoid", vars! { "X" => ["y"] }, vars! { "Y" => ["o1"] }),
        op(&registry, "sigmoid", vars! { "X" => ["x"] }, vars! { "Y" => ["o2"] }),
        op(&registry, "sigmoid", vars! { "X" => ["y"] }, vars! { "Y" => ["o3"] }),
        op(&registry, "sigmoid", vars! { "X" => ["x"] }, vars! { "Y" => ["o4"] }),
    ]);
    let bwd = build(&registry, &fwd, &mut NoGradSet::seeded(Vec::<String>::new()));

    let net = bwd.as_net().unwrap();
    let kinds: Vec<_> = net.ops().iter().map(|op| op.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            "sigmoid_grad",
            "sigmoid_grad",
            "sigmoid_grad",
            "add",
            "sigmoid_grad",
            "add"
        ]
    );
    assert_eq!(net.ops()[3].output("Out").unwrap(), "x@GRAD");
    assert_eq!(net.ops()[5].output("Out").unwrap(), "y@GRAD");
}

#[test]
fn test_empty_outputs_are_never_summed() {
    let registry = registry();
    // Both gradients of `w` are pruned, so both mul_grad ops bind @EMPTY@.
    let fwd = net_of(vec![
        op(
            &registry,
            "mul",
            vars! { "X" => ["x"], "Y" => ["w"] },
            vars! { "Out" => ["h"] },
        ),
        op(
            &registry,
            "mul",
            vars! { "X" => ["h"], "Y" => ["w"] },
            vars! { "Out" => ["out"] },
        ),
    ]);
    let bwd = build(&registry, &fwd, &mut NoGradSet::seeded(["w"]));

    let net = bwd.as_net().unwrap();
    assert_eq!(net.len(), 2);
    assert!(net.ops().iter().all(|op| op.kind() == "mul_grad"));
    assert_eq!(net.ops()[0].output("Y@GRAD").unwrap(), EMPTY_VAR_NAME);
    assert_eq!(net.ops()[1].output("Y@GRAD").unwrap(), EMPTY_VAR_NAME);
}

#[test]
fn test_pruning_propagates_to_earlier_ops() {
    let registry = registry();
    let fwd = net_of(vec![
        op(&registry, "sigmoid", vars! { "X" => ["x"] }, vars! { "Y" => ["a"] }),
        op(&registry, "sigmoid", vars! { "X" => ["a"] }, vars! { "Y" => ["y"] }),
    ]);
    let mut no_grad = NoGradSet::seeded(["y"]);
    let bwd = build(&registry, &fwd, &mut no_grad);

    let net = bwd.as_net().unwrap();
    assert_eq!(net.len(), 2);
    assert!(net.ops().iter().all(|op| op.kind() == NOP_KIND));
    assert!(no_grad.contains("a@GRAD"));
    assert!(no_grad.contains("x@GRAD"));
}

#[test]
fn test_net_with_all_inputs_unneeded_is_pruned() {
    let registry = registry();
    let fwd = fc(&registry, "x", "w", "b", "y");
    let mut no_grad = NoGradSet::seeded(["x", "w", "b"]);
    let mut uniq_id = 0;
    let bwd = BackwardBuilder::new(&registry)
        .build(&fwd, &mut no_grad, &mut uniq_id)
        .unwrap();

    assert_eq!(bwd.kind(), NOP_KIND);
    assert_eq!(uniq_id, 0);
}

#[test]
fn test_nested_nets() {
    let registry = registry();
    let fwd = net_of(vec![
        fc(&registry, "x", "w1", "b1", "h"),
        fc(&registry, "h", "w2", "b2", "y"),
    ]);
    let mut no_grad = NoGradSet::seeded(Vec::<String>::new());
    let mut uniq_id = 0;
    let bwd = BackwardBuilder::new(&registry)
        .build(&fwd, &mut no_grad, &mut uniq_id)
        .unwrap();

    // One expansion per fc plus one for the outer net.
    assert_eq!(uniq_id, 3);

    let net = bwd.as_net().unwrap();
    assert_eq!(net.len(), 2);
    for (sub, grad_x) in net.ops().iter().zip(["h@GRAD", "x@GRAD"]) {
        assert_eq!(sub.kind(), GENERATED_BACKWARD_KIND);
        let kinds: Vec<_> = sub
            .as_net()
            .unwrap()
            .ops()
            .iter()
            .map(|op| op.kind())
            .collect();
        assert_eq!(kinds, vec!["sigmoid_grad", "rowwise_add_grad", "mul_grad"]);
        assert_eq!(
            sub.as_net().unwrap().ops()[2].output("X@GRAD").unwrap(),
            grad_x
        );
    }
    assert_eq!(count_leaves(&bwd), 6);
}

#[test]
fn test_shared_input_across_nested_nets() {
    let registry = registry();
    let fwd = net_of(vec![
        fc(&registry, "x", "w1", "b1", "h1"),
        fc(&registry, "x", "w2", "b2", "h2"),
    ]);
    let mut uniq_id = 0;
    let bwd = BackwardBuilder::new(&registry)
        .build(
            &fwd,
            &mut NoGradSet::seeded(Vec::<String>::new()),
            &mut uniq_id,
        )
        .unwrap();

    // The outer net is expanded last, so it owns uid 2.
    assert_eq!(uniq_id, 3);
    let net = bwd.as_net().unwrap();
    assert_eq!(net.len(), 3);

    let second_fc = net.ops()[0].as_net().unwrap();
    let first_fc = net.ops()[1].as_net().unwrap();
    assert_eq!(
        second_fc.ops()[2].output("X@GRAD").unwrap(),
        "x@GRAD@RENAME@2@0"
    );
    assert_eq!(
        first_fc.ops()[2].output("X@GRAD").unwrap(),
        "x@GRAD@RENAME@2@1"
    );

    let add = &net.ops()[2];
    assert_eq!(add.kind(), "add");
    assert_eq!(add.output("Out").unwrap(), "x@GRAD");
}

#[rstest]
#[case(&[])]
#[case(&["x"])]
#[case(&["w"])]
#[case(&["a"])]
#[case(&["y"])]
#[case(&["x", "w"])]
fn test_pruning_is_idempotent(#[case] no_grad_vars: &[&str]) {
    let registry = registry();
    let fwd = net_of(vec![
        op(&registry, "sigmoid", vars! { "X" => ["x"] }, vars! { "Y" => ["a"] }),
        op(
            &registry,
            "mul",
            vars! { "X" => ["a"], "Y" => ["w"] },
            vars! { "Out" => ["y"] },
        ),
    ]);

    let mut first_set = NoGradSet::seeded(no_grad_vars.iter().copied());
    let initial = first_set.clone();
    let first = build(&registry, &fwd, &mut first_set);
    assert!(first_set.is_superset(&initial));

    let mut second_set = first_set.clone();
    second_set.insert(grad_var_name("unrelated"));
    let second = build(&registry, &fwd, &mut second_set);

    assert!(count_leaves(&second) <= count_leaves(&first));
    let first_kinds = leaf_kinds(&first);
    assert!(leaf_kinds(&second).iter().all(|kind| first_kinds.contains(kind)));
}

#[test]
fn test_missing_gradient_is_an_error() {
    let registry = registry();
    let fwd = net_of(vec![
        op(&registry, "sigmoid", vars! { "X" => ["x"] }, vars! { "Y" => ["a"] }),
        op(&registry, "argmax", vars! { "X" => ["a"] }, vars! { "Out" => ["idx"] }),
    ]);
    let mut uniq_id = 0;
    let err = BackwardBuilder::new(&registry)
        .build(
            &fwd,
            &mut NoGradSet::seeded(Vec::<String>::new()),
            &mut uniq_id,
        )
        .unwrap_err();
    assert_eq!(err, BackwardError::GradientNotRegistered("argmax".to_string()));
}

#[rstest]
#[case(0, false)]
#[case(1, false)]
#[case(2, true)]
fn test_depth_limit(#[case] max_depth: usize, #[case] ok: bool) {
    let registry = registry();
    // outer net -> fc net -> leaves: leaves sit at depth 2.
    let fwd = net_of(vec![fc(&registry, "x", "w", "b", "y")]);
    let config = BackwardConfig::builder().max_depth(max_depth).build();
    let mut uniq_id = 0;
    let result = BackwardBuilder::with_config(&registry, config).build(
        &fwd,
        &mut NoGradSet::seeded(Vec::<String>::new()),
        &mut uniq_id,
    );

    match result {
        Ok(_) => assert!(ok),
        Err(err) => {
            assert!(!ok);
            assert_eq!(err, BackwardError::DepthLimitExceeded(max_depth));
        }
    }
}

#[test]
fn test_driver_is_deterministic() {
    let _ = env_logger::builder().is_test(true).try_init();

    let registry = registry();
    let fwd = net_of(vec![
        fc(&registry, "x", "w1", "b1", "h1"),
        fc(&registry, "x", "w2", "b2", "h2"),
    ]);
    let first = backward(&fwd, ["b1"], &registry).unwrap();
    let second = backward(&fwd, ["b1"], &registry).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.to_string(), second.to_string());
}

fn sigmoid_net(registry: &OpRegistry, kind: &str, seal: Option<bool>) -> NetOp {
    let mut net = NetOp::with_kind(kind);
    net.append_op(op(registry, "sigmoid", vars! { "X" => ["x"] }, vars! { "Y" => ["y"] }))
        .unwrap();
    if let Some(calc) = seal {
        net.complete_add_op(calc);
    }
    net
}

#[rstest]
#[case(None)]
#[case(Some(false))]
fn test_net_without_calculated_bindings_is_rejected(#[case] seal: Option<bool>) {
    let registry = registry();
    let fwd = Operator::from(sigmoid_net(&registry, "plain_net", seal));

    let err = backward(&fwd, Vec::<String>::new(), &registry).unwrap_err();
    assert_eq!(err, BackwardError::NetNotSealed("plain_net".to_string()));
}

#[test]
fn test_nested_net_without_calculated_bindings_is_rejected() {
    let registry = registry();
    let inner = sigmoid_net(&registry, "inner", None);
    let fwd = net_of(vec![inner.into()]);

    let err = backward(&fwd, Vec::<String>::new(), &registry).unwrap_err();
    assert_eq!(err, BackwardError::NetNotSealed("inner".to_string()));
}

#[test]
fn test_sealed_net_is_differentiated() {
    let registry = registry();
    let fwd = Operator::from(sigmoid_net(&registry, "plain_net", Some(true)));

    let bwd = backward(&fwd, Vec::<String>::new(), &registry).unwrap();
    assert_eq!(leaf_kinds(&bwd), vec!["sigmoid_grad"]);
}

#[test]
fn test_gradient_bound_twice_by_one_op_is_not_summed() {
    let registry = registry();
    let fwd = net_of(vec![op(
        &registry,
        "mul",
        vars! { "X" => ["x"], "Y" => ["x"] },
        vars! { "Out" => ["y"] },
    )]);

    let bwd = backward(&fwd, Vec::<String>::new(), &registry).unwrap();
    let net = bwd.as_net().unwrap();
    assert_eq!(net.len(), 1);
    assert_eq!(net.ops()[0].output("X@GRAD").unwrap(), "x@GRAD");
    assert_eq!(net.ops()[0].output("Y@GRAD").unwrap(), "x@GRAD");
}
