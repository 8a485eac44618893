mod utils;

use revgraph_core::{
    error::{Error, Result},
    value::GradientValue,
};
use revgraph_graph::{
    ArchitectureDescription, BackwardScheduler, BuilderConfig, GraphBuilder, IntermediateStore, LayerDescription,
    NestedLayerDescription, NodeId, Operand, ParameterStore, Position, StartingPoint, TimeStepDescription, ValueKey,
};
use revgraph_ops::builtin_registry;
use utils::{op, scale, test_both_modes};

fn build(step: TimeStepDescription, config: BuilderConfig) -> Result<revgraph_graph::Graph> {
    let intermediates = IntermediateStore::new();
    intermediates.insert_shared("x", 1.0);
    let registry = builtin_registry();
    GraphBuilder::new(&registry)
        .config(config)
        .intermediates(intermediates)
        .build(&ArchitectureDescription::new().time_step(step))
}

#[test]
fn wires_chain_and_adjacency() -> Result<()> {
    let graph = utils::diamond()?;
    assert_eq!(graph.len(), 5);
    assert_eq!(graph.start(), NodeId(0));
    assert_eq!(graph.last(), NodeId(4));
    assert_eq!(graph.chain().collect::<Vec<_>>(), (0..5).map(NodeId).collect::<Vec<_>>());

    let x = graph.named("X_0")?;
    assert_eq!(x.operands(), &[Operand::Weight(ValueKey::shared("x"))]);
    assert_eq!(x.backward_adjacent(), &[None]);

    let s = graph.named("S_0")?;
    assert_eq!(s.backward_adjacent(), &[Some(x.id())]);
    assert_eq!(s.outputs(), &[NodeId(2), NodeId(3)]);

    let l = graph.named("L_0")?;
    assert_eq!(l.backward_adjacent(), &[Some(NodeId(2)), Some(NodeId(3))]);
    assert_eq!(l.op_type(), "add");
    assert!(l.outputs().is_empty());
    Ok(())
}

#[test]
fn dangling_input_fails_the_build() {
    let step = TimeStepDescription::new()
        .start(op("identity", "a", &["x"]))
        .start(op("identity", "b", &["nowhere"]));
    let err = build(step, BuilderConfig::new()).unwrap_err();
    assert_eq!(
        err,
        Error::UnresolvedInput {
            node: "b_0".into(),
            input: "nowhere".into()
        }
    );
    assert!(err.is_configuration());
}

#[test]
fn configuration_errors() {
    let unknown = TimeStepDescription::new().start(op("softmax", "a", &["x"]));
    assert_eq!(
        build(unknown, BuilderConfig::new()).unwrap_err(),
        Error::UnknownOperation("softmax".into())
    );

    let duplicate = TimeStepDescription::new()
        .start(op("identity", "a", &["x"]))
        .start(op("identity", "a", &["x"]));
    assert_eq!(
        build(duplicate, BuilderConfig::new()).unwrap_err(),
        Error::DuplicateNode("a_0".into())
    );

    let forward = TimeStepDescription::new()
        .start(op("identity", "a", &["b"]))
        .start(op("identity", "b", &["x"]));
    assert!(matches!(
        build(forward, BuilderConfig::new()),
        Err(Error::ForwardReference { .. })
    ));

    let malformed = TimeStepDescription::new().start(op("identity", "a", &["x[q+1]"]));
    assert!(matches!(
        build(malformed, BuilderConfig::new()),
        Err(Error::InvalidInputRef(_))
    ));

    let missing_attr = TimeStepDescription::new().start(op("scale", "a", &["x"]));
    assert!(matches!(
        build(missing_attr, BuilderConfig::new()),
        Err(Error::InvalidAttribute { .. })
    ));

    let empty = GraphBuilder::new(&builtin_registry())
        .build(&ArchitectureDescription::new())
        .unwrap_err();
    assert_eq!(empty, Error::EmptyArchitecture);
    assert!(empty.is_configuration());
}

#[test]
fn layers_and_nested_layers_get_positions() -> Result<()> {
    let step = TimeStepDescription::new()
        .start(op("identity", "in", &["x"]))
        .layer(
            LayerDescription::new("body")
                .repeat(2)
                .entry(scale("s", "in", 2.0))
                .entry(NestedLayerDescription::new("inner", 2).operation(op("identity", "i", &["s"]))),
        )
        .end(op("identity", "out", &["i"]));
    let graph = build(step, BuilderConfig::new())?;

    let names: Vec<String> = graph.nodes().iter().map(|n| n.specific_id().to_string()).collect();
    assert_eq!(
        names,
        ["in_0", "s_0_0", "i_0_0_0", "i_0_0_1", "s_0_1", "i_0_1_0", "i_0_1_1", "out_0"]
    );

    // bare names search the enclosing scopes, then the latest earlier node
    let s01 = graph.find("s", Position::layer(0, 1)).expect("present");
    assert_eq!(graph.named("i_0_1_0")?.backward_adjacent(), &[Some(s01)]);
    assert_eq!(graph.named("s_0_1")?.backward_adjacent(), &[Some(NodeId(0))]);
    assert_eq!(graph.named("out_0")?.backward_adjacent(), &[Some(NodeId(6))]);
    Ok(())
}

#[test]
fn rendered_names_that_fit_two_nodes_are_rejected() -> Result<()> {
    let step = TimeStepDescription::new()
        .start(op("identity", "h_0", &["x"]))
        .layer(LayerDescription::new("body").repeat(2).entry(op("identity", "h", &["x"])));
    let graph = build(step, BuilderConfig::new())?;

    let flat = graph.find("h_0", Position::time_step(0)).expect("present");
    let layered = graph.find("h", Position::layer(0, 0)).expect("present");
    assert_ne!(flat, layered);
    assert!(matches!(graph.named("h_0_0"), Err(Error::InvalidState(_))));
    assert_eq!(graph.named("h_0_1")?.id(), NodeId(2));
    assert!(matches!(graph.named("h_9"), Err(Error::InvalidState(_))));
    Ok(())
}

#[test]
fn repeat_overrides_apply_by_layer_name() -> Result<()> {
    let step = TimeStepDescription::new().layer(
        LayerDescription::new("body")
            .entry(op("identity", "a", &["x"]))
            .entry(NestedLayerDescription::new("inner", 1).operation(op("identity", "b", &["a"]))),
    );
    let graph = build(step, BuilderConfig::new().repeat("body", 3).repeat("inner", 2))?;
    assert_eq!(graph.len(), 3 * (1 + 2));
    assert!(graph.find("b", Position::nested(0, 2, 1)).is_some());
    Ok(())
}

#[test]
fn weights_resolve_by_position_before_shared() -> Result<()> {
    let parameters = ParameterStore::new();
    parameters.insert_shared("w", 1.0);
    parameters.insert_at("w", Position::layer(0, 1), 2.0);
    parameters.insert_shared("unused", 0.0);

    let step = TimeStepDescription::new().layer(
        LayerDescription::new("body")
            .repeat(2)
            .entry(op("mul", "y", &["x", "w"])),
    );
    let description = ArchitectureDescription::new().time_step(step);
    let intermediates = IntermediateStore::new();
    intermediates.insert_shared("x", 3.0);

    let registry = builtin_registry();
    let graph = GraphBuilder::new(&registry)
        .parameters(parameters)
        .intermediates(intermediates)
        .build(&description)?;
    assert_eq!(
        graph.named("y_0_0")?.operands()[1],
        Operand::Weight(ValueKey::shared("w"))
    );
    assert_eq!(
        graph.named("y_0_1")?.operands()[1],
        Operand::Weight(ValueKey::at("w", Position::layer(0, 1)))
    );
    assert_eq!(graph.named("y_0_1")?.operands()[0], Operand::Intermediate(ValueKey::shared("x")));
    assert_eq!(graph.forward()?, GradientValue::Scalar(6.0));

    let strict = ParameterStore::new();
    strict.insert_shared("w", 1.0);
    strict.insert_shared("unused", 0.0);
    let intermediates = IntermediateStore::new();
    intermediates.insert_shared("x", 3.0);
    let err = GraphBuilder::new(&registry)
        .config(BuilderConfig::new().reject_unused_weights(true))
        .parameters(strict)
        .intermediates(intermediates)
        .build(&description)
        .unwrap_err();
    assert_eq!(err, Error::UnusedWeight("unused".into()));
    Ok(())
}

/// h_t = tanh(x_t + h_{t-1} * w), unrolled over three steps.
fn recurrent() -> Result<revgraph_graph::Graph> {
    let template = TimeStepDescription::new()
        .start(op("identity", "xin", &["x"]))
        .layer(
            LayerDescription::new("cell")
                .entry(op("mul", "hw", &["h[t-1]", "w"]))
                .entry(op("add", "pre", &["xin", "hw"]))
                .entry(op("tanh", "h", &["pre"])),
        )
        .end(op("identity", "out", &["h"]));

    let parameters = ParameterStore::new();
    parameters.insert_shared("w", 0.7);
    let intermediates = IntermediateStore::new();
    intermediates.insert_shared("h", 0.1);
    for (t, x) in [0.5f32, -0.3, 0.8].into_iter().enumerate() {
        intermediates.insert_at("x", Position::time_step(t), x);
    }

    let registry = builtin_registry();
    GraphBuilder::new(&registry)
        .parameters(parameters)
        .intermediates(intermediates)
        .build(&ArchitectureDescription::repeated(template, 3))
}

#[test]
fn recurrent_offsets_reach_the_previous_step() -> Result<()> {
    test_both_modes(|mode| {
        let graph = recurrent()?;
        let h1 = graph.find("h", Position::layer(1, 0)).expect("present");
        assert_eq!(graph.named("hw_2_0")?.backward_adjacent(), &[Some(h1), None]);
        assert_eq!(
            graph.named("hw_0_0")?.operands()[0],
            Operand::Intermediate(ValueKey::shared("h"))
        );
        assert_eq!(
            graph.named("xin_1")?.operands()[0],
            Operand::Intermediate(ValueKey::at("x", Position::time_step(1)))
        );

        graph.forward()?;
        BackwardScheduler::with_mode(mode).backward(&graph, StartingPoint(0), GradientValue::Scalar(1.0))?;

        let (w, h_init) = (0.7f32, 0.1f32);
        let xs = [0.5f32, -0.3, 0.8];
        let mut hs = Vec::new();
        let mut h = h_init;
        for x in xs {
            h = (x + h * w).tanh();
            hs.push(h);
        }

        let g_pre2 = 1.0 - hs[2] * hs[2];
        let g_h1 = g_pre2 * w;
        let g_pre1 = g_h1 * (1.0 - hs[1] * hs[1]);
        let g_h0 = g_pre1 * w;
        let g_pre0 = g_h0 * (1.0 - hs[0] * hs[0]);
        let dw = g_pre2 * hs[1] + g_pre1 * hs[0] + g_pre0 * h_init;

        let got_h0 = graph.named("h_0_0")?.output_gradient()?.expect("present");
        assert!(got_h0.approx_eq(&GradientValue::Scalar(g_h0), 1e-6));
        let got_dw = graph.gradients().get_shared("w")?.expect("present");
        assert!(got_dw.approx_eq(&GradientValue::Scalar(dw), 1e-5), "{:?} vs {}", got_dw, dw);

        // out_0 and out_1 are not on the path from out_2
        assert_eq!(graph.named("out_1")?.backward_invocations(), 0);
        Ok(())
    })
}

#[test]
fn finders_resolve_what_names_cannot() -> Result<()> {
    let template = TimeStepDescription::new()
        .start(op("identity", "carry", &["previous"]))
        .start(op("identity", "y", &["carry"]));
    let intermediates = IntermediateStore::new();
    intermediates.insert_at("previous", Position::time_step(0), 1.0);

    let config = BuilderConfig::new().finder(|input, position, lookup| {
        if input.name != "previous" || position.time_step == 0 {
            return None;
        }
        lookup.find("y", Position::time_step(position.time_step - 1))
    });
    let registry = builtin_registry();
    let graph = GraphBuilder::new(&registry)
        .config(config)
        .intermediates(intermediates)
        .build(&ArchitectureDescription::repeated(template, 3))?;

    let y1 = graph.named("y_1")?.id();
    assert_eq!(graph.named("carry_2")?.backward_adjacent(), &[Some(y1)]);
    assert_eq!(graph.forward()?, GradientValue::Scalar(1.0));

    let scheduler = BackwardScheduler::sequential();
    let report = scheduler.backward(&graph, StartingPoint(0), GradientValue::Scalar(1.0))?;
    assert_eq!(report.nodes_propagated, 6);

    // a finder may only point backwards along the chain
    let ahead = BuilderConfig::new().finder(|input, position, lookup| {
        (input.name == "later").then(|| lookup.find("b", *position)).flatten()
    });
    let step = TimeStepDescription::new()
        .start(op("identity", "a", &["later"]))
        .start(op("identity", "b", &["x"]));
    assert!(matches!(build(step, ahead), Err(Error::ForwardReference { .. })));
    Ok(())
}

#[cfg(feature = "serde")]
#[test]
fn description_deserializes_from_json() -> Result<()> {
    let json = r#"{
        "time_steps": [{
            "start_operations": [{ "type": "identity", "inputs": ["x"], "name": "in" }],
            "layers": [{
                "name": "body",
                "repeat": 2,
                "entries": [
                    { "type": "scale", "inputs": ["in"], "name": "s", "attributes": { "factor": 2.0 } },
                    { "name": "inner", "repeat": 2, "operations": [{ "type": "identity", "inputs": ["s"], "name": "i" }] }
                ]
            }],
            "end_operations": [{ "type": "add", "inputs": ["i"], "name": "out" }]
        }]
    }"#;
    let description: ArchitectureDescription =
        serde_json::from_str(json).map_err(|e| Error::InvalidState(e.to_string()))?;
    assert_eq!(description.operation_count(), 8);

    let back = serde_json::to_string(&description).map_err(|e| Error::InvalidState(e.to_string()))?;
    let again: ArchitectureDescription =
        serde_json::from_str(&back).map_err(|e| Error::InvalidState(e.to_string()))?;
    assert_eq!(again, description);

    let graph = build(description.time_steps[0].clone(), BuilderConfig::new())?;
    assert_eq!(graph.forward()?, GradientValue::Scalar(2.0));
    Ok(())
}
