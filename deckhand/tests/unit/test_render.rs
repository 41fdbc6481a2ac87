//! Rendering the shipped task definition template

use std::path::PathBuf;

use deckhand::pipeline::executor::PipelineTarget;
use deckhand::storage::settings::Settings;

fn target() -> PipelineTarget {
    let settings = Settings::default();
    PipelineTarget {
        registry: "123456789012.dkr.ecr.us-east-1.amazonaws.com".to_string(),
        repository: "deckhand".to_string(),
        cluster: "deckhand-cluster".to_string(),
        service: "deckhand-service".to_string(),
        task_definition_path: PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join(&settings.pipeline.task_definition_path),
        container_name: settings.pipeline.container_name,
    }
}

#[tokio::test]
async fn test_shipped_template_renders_for_commit() {
    let target = target();
    let image = target.image("9f8e7d6c5b4a").unwrap();

    let definition = target.render(&image).await.unwrap();

    assert_eq!(definition.family, "deckhand");
    assert_eq!(
        definition.image_for("deckhand"),
        Some("123456789012.dkr.ecr.us-east-1.amazonaws.com/deckhand:9f8e7d6c5b4a")
    );
    assert_eq!(definition.container_definitions[0].port_mappings[0].container_port, 80);

    // Fields the model does not name survive the round trip
    let json = definition.to_json().unwrap();
    assert!(json.contains("awslogs-stream-prefix"));
    assert!(json.contains("RUST_LOG"));
}

#[tokio::test]
async fn test_render_rejects_unknown_container() {
    let target = PipelineTarget {
        container_name: "sidecar".to_string(),
        ..target()
    };
    let image = target.image("9f8e7d6c5b4a").unwrap();
    assert!(target.render(&image).await.is_err());
}

#[tokio::test]
async fn test_render_missing_template_fails() {
    let target = PipelineTarget {
        task_definition_path: PathBuf::from("does/not/exist.json"),
        ..target()
    };
    let image = target.image("9f8e7d6c5b4a").unwrap();
    assert!(target.render(&image).await.is_err());
}
