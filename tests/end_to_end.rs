//! End-to-end scenarios over the public API: JSON artifacts on disk, the
//! reference runtime, the registry and a two-stage pipeline.

use mlcore::config::ModelConfig;
use mlcore::interpreter::{FsModelLoader, Interpreter, ReferenceRuntime, TensorRuntime};
use mlcore::model::{Model, ModelState};
use mlcore::pipeline::Pipeline;
use mlcore::pixels::{ImageData, ImagePreprocessConfig};
use mlcore::registry::ModelRegistry;
use mlcore::tasks::DetectionTask;
use mlcore::tensor::{NamedTensors, Tensor};
use mlcore::value::VisionValue;
use mlcore::vision::DetectionOptions;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

struct Fixture {
  dir: tempfile::TempDir,
  runtime: Arc<ReferenceRuntime>,
}

impl Fixture {
  async fn new() -> Self {
    mlcore::logging::init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    write_json(dir.path(), "scorer.json", scorer()).await;
    write_json(dir.path(), "rectifier.json", rectifier()).await;
    write_json(dir.path(), "detector.json", detector()).await;
    Self {
      dir,
      runtime: Arc::new(ReferenceRuntime::new()),
    }
  }

  fn model(&self, name: &str, config: ModelConfig) -> Arc<Model> {
    Arc::new(Model::tensor(name, config, self.backend()))
  }

  fn backend(&self) -> Interpreter<Arc<ReferenceRuntime>> {
    Interpreter::with_loader(self.runtime.clone(), FsModelLoader::with_root(self.dir.path()))
  }
}

async fn write_json(dir: &Path, file: &str, value: serde_json::Value) {
  tokio::fs::write(dir.join(file), value.to_string())
    .await
    .unwrap();
}

fn scorer() -> serde_json::Value {
  json!({
    "format": "graph",
    "inputs": [{ "name": "x", "dims": [null, 2] }],
    "outputs": ["y"],
    "nodes": [
      { "name": "h", "op": "dense", "inputs": ["x"], "weights": [[1, 0], [0, 1]], "bias": [0, 1] },
      { "name": "y", "op": "softmax", "inputs": ["h"] }
    ]
  })
}

fn rectifier() -> serde_json::Value {
  json!({
    "format": "layers",
    "input": { "name": "x", "dims": [null, 2] },
    "output": "y",
    "layers": [{ "op": "add", "value": -0.5 }, { "op": "relu" }]
  })
}

/// A detector emitting one constant row regardless of the image.
fn detector() -> serde_json::Value {
  json!({
    "format": "graph",
    "labels": ["cat", "dog"],
    "inputs": [{ "name": "image", "dims": [1, 2, 2, 3] }],
    "outputs": ["boxes"],
    "nodes": [
      { "name": "flat", "op": "reshape", "inputs": ["image"], "dims": [1, 12] },
      {
        "name": "row",
        "op": "dense",
        "inputs": ["flat"],
        "weights": vec![vec![0.0; 7]; 12],
        "bias": [0.5, 0.5, 0.2, 0.2, 0.9, 0.2, 0.8]
      },
      { "name": "boxes", "op": "reshape", "inputs": ["row"], "dims": [1, 1, 7] }
    ]
  })
}

fn x(values: Vec<f32>) -> VisionValue {
  let mut inputs = NamedTensors::new();
  inputs.insert("x".to_string(), Tensor::from_f32(values, vec![1, 2]).unwrap());
  VisionValue::Tensors(inputs)
}

#[tokio::test]
async fn registry_loads_from_disk_and_predicts() {
  let fixture = Fixture::new().await;
  let config_path = fixture.dir.path().join("scorer.config.json");
  tokio::fs::write(&config_path, r#"{"model_path": "scorer.json", "warmup_runs": 2}"#)
    .await
    .unwrap();
  let config = ModelConfig::from_json_file(&config_path).await.unwrap();

  let registry = ModelRegistry::new();
  registry.register("scorer", fixture.model("scorer", config));
  let model = registry.get_or_load("scorer").await.unwrap();
  assert_eq!(model.state(), ModelState::Ready);

  let result = model.predict(&x(vec![1.0, 0.0])).await.unwrap();
  let y = result.outputs["y"].to_f32_vec();
  assert!((y[0] - 0.5).abs() < 1e-6 && (y[1] - 0.5).abs() < 1e-6);
  assert!(result.total_time_ms() >= result.inference_time_ms);
  assert_eq!(fixture.runtime.live_tensors(), 0);

  let info = registry.entry_info("scorer").unwrap();
  assert_eq!(info.config.warmup_runs, 2);

  registry.dispose_all().await;
  assert_eq!(model.state(), ModelState::Disposed);
  assert_eq!(fixture.runtime.memory_bytes(), 0);
}

#[tokio::test]
async fn pipeline_chains_models_through_a_transform() {
  let fixture = Fixture::new().await;
  let scorer = fixture.model("scorer", ModelConfig::new("scorer.json"));
  let rectifier = fixture.model("rectifier", ModelConfig::new("rectifier.json"));

  let pipeline = Pipeline::builder("score-then-rectify")
    .detect(scorer)
    .detect(rectifier)
    .transform(|value| {
      let mut renamed = NamedTensors::new();
      if let Some(y) = value.as_tensors().and_then(|t| t.get("y")) {
        renamed.insert("x".to_string(), y.clone());
      }
      Ok(VisionValue::Tensors(renamed))
    })
    .build()
    .unwrap();
  pipeline.load_all().await.unwrap();

  let result = pipeline.run(x(vec![3.0, 0.0])).await.unwrap();
  assert_eq!(result.stages_executed, vec!["scorer", "rectifier"]);
  let out = result.final_output().unwrap().as_tensors().unwrap()["y"].to_f32_vec();
  // softmax([3, 1]) = [0.88, 0.12]; minus 0.5 and clamped at zero.
  assert!(out[0] > 0.3 && out[0] < 0.4);
  assert_eq!(out[1], 0.0);
  assert_eq!(fixture.runtime.live_tensors(), 0);
}

#[tokio::test]
async fn detector_boxes_land_in_source_pixels() {
  let fixture = Fixture::new().await;
  let task = DetectionTask::new(DetectionOptions::default())
    .with_preprocess(ImagePreprocessConfig::new().with_pad_to_square(true));
  let model = Model::new(
    "detector",
    ModelConfig::new("detector.json"),
    fixture.backend(),
    task,
  );
  model.load().await.unwrap();

  // 4x2 frame, padded to 4x4 and resized to the declared 2x2 input.
  let frame = VisionValue::from(ImageData::filled(4, 2, [200, 100, 50]));
  let result = model.predict(&frame).await.unwrap();
  let boxes = result.parsed.as_detections().unwrap();
  assert_eq!(boxes.len(), 1);

  let b = &boxes[0];
  assert_eq!(b.label, "dog");
  assert!((b.confidence - 0.72).abs() < 1e-4);
  assert!((b.x - 1.6).abs() < 1e-4);
  assert!((b.y - 0.6).abs() < 1e-4);
  assert!((b.width - 0.8).abs() < 1e-4);
  assert!((b.height - 0.8).abs() < 1e-4);
  assert_eq!(fixture.runtime.live_tensors(), 0);
}
