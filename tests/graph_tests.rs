//! Structural round trip: describe, serialize, rebuild, resume.

mod test_support;

use std::sync::Arc;

use pullflow_core::config::EngineConfig;
use pullflow_core::graph::GraphDef;
use pullflow_core::types::Buffer;
use pullflow_exec::Engine;
use pullflow_function::{FunctionLibrary, LocalExecutor};
use pullflow_operators::{dataset_from_graph, graph_of, Dataset, MapDataset, OpError, RangeDataset};
use test_support::{library, scalar_i64_sig, values};

fn nested() -> Arc<dyn Dataset> {
    let lib = library();
    let cfg = EngineConfig::default();
    let inner = MapDataset::new(
        RangeDataset::new(0, 12, 2).unwrap(),
        "through",
        &lib,
        vec![],
        scalar_i64_sig(),
        false,
        &cfg,
    )
    .unwrap();
    MapDataset::new(
        inner,
        "offset",
        &lib,
        vec![Buffer::scalar_i64(-1)],
        scalar_i64_sig(),
        true,
        &cfg,
    )
    .unwrap()
}

fn engine(cfg: EngineConfig) -> Engine {
    Engine::new(cfg, Arc::new(LocalExecutor::new())).unwrap()
}

#[test]
fn test_rebuilt_graph_produces_same_records() {
    let original = nested();
    let graph = graph_of(original.as_ref()).unwrap();
    let json = graph.to_json().unwrap();
    let parsed = GraphDef::from_json(&json).unwrap();
    assert_eq!(parsed.fingerprint().unwrap(), graph.fingerprint().unwrap());

    let rebuilt = dataset_from_graph(&parsed, &library(), &EngineConfig::default()).unwrap();
    assert_eq!(rebuilt.debug_string(), original.debug_string());
    assert_eq!(graph_of(rebuilt.as_ref()).unwrap(), graph);

    let e = engine(EngineConfig::default());
    let a = e.collect(&original).unwrap();
    let b = e.collect(&rebuilt).unwrap();
    assert_eq!(values(&a), vec![-1, 1, 3, 5, 7, 9]);
    assert_eq!(a, b);
}

#[test]
fn test_rebuild_requires_every_function() {
    let graph = graph_of(nested().as_ref()).unwrap();
    assert!(graph.functions.contains("through"));
    assert!(graph.functions.contains("offset"));

    let partial = FunctionLibrary::new()
        .with(library().lookup("through").unwrap().clone())
        .unwrap();
    let err = dataset_from_graph(&graph, &partial, &EngineConfig::default()).err().unwrap();
    assert!(matches!(err, OpError::Instantiation(_)));
}

#[test]
fn test_rebuilt_dataset_resumes_original_checkpoint() {
    let original = nested();
    let cfg = EngineConfig {
        checkpoint_uri: Some("memory://graph-tests".into()),
        checkpoint_every: Some(2),
        ..EngineConfig::default()
    };
    let e = engine(cfg.clone()).with_configured_checkpoints().unwrap();

    let mut n = 0;
    let _ = e.run(&original, |_| {
        n += 1;
        if n > 2 {
            return Err(pullflow_exec::ExecError::Sink("stop".into()));
        }
        Ok(())
    });

    // Same engine (same in-memory store), rebuilt dataset, resume enabled.
    let graph = GraphDef::from_json(&graph_of(original.as_ref()).unwrap().to_json().unwrap()).unwrap();
    let rebuilt = dataset_from_graph(&graph, &library(), &cfg).unwrap();
    let store = e.checkpoints().unwrap();
    let name = e.checkpoint_name_for(&graph.fingerprint().unwrap());
    assert!(store.exists(&name).unwrap());

    let resumed = Engine::new(
        EngineConfig {
            resume: true,
            ..cfg
        },
        Arc::new(LocalExecutor::new()),
    )
    .unwrap();
    // A memory store lives with its engine, so hand the saved blob over.
    let ckpt = store.load(&name).unwrap();
    let handoff = pullflow_ckpt::CheckpointStore::new(
        Box::new(pullflow_ckpt::MemoryStorage::new()),
        pullflow_ckpt::Codec::None,
        "handoff",
    );
    handoff.save(&name, &ckpt).unwrap();
    let out = resumed.with_checkpoints(handoff).collect(&rebuilt).unwrap();
    assert_eq!(values(&out), vec![3, 5, 7, 9]);
}
