mod common;

use common::{handle, session, FakeSandbox};
use pipecore::{NodeDefinition, NodeError, NodeStatus, RunStatus, Value, WorkflowDefinition};
use pipenodes::{
    register_all, ChartExecutor, ChartFactory, CleaningKind, CleaningStep, DebugFactory,
    FileFormat, LoaderFactory, TrainingPlan, TransformKind,
};
use piperuntime::{ExecutorFactory, ExecutorRegistry, PipeRuntime, RuntimeConfig};
use serde_json::json;
use std::collections::HashMap;

fn params(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[test]
fn test_transform_statements() {
    let filter = TransformKind::FilterRows
        .statement(&params(&[("expression", Value::from("name == \"a\""))]))
        .unwrap();
    assert_eq!(filter, r#"df = df.query("name == \"a\"")"#);

    let sort = TransformKind::SortRows
        .statement(&params(&[
            ("by", Value::from("age, name")),
            ("descending", Value::from(true)),
        ]))
        .unwrap();
    assert!(sort.contains(r#"by=["age", "name"]"#));
    assert!(sort.contains("ascending=False"));

    let mut mapping = std::collections::BTreeMap::new();
    mapping.insert("old".to_string(), Value::from("new"));
    let rename = TransformKind::RenameColumns
        .statement(&params(&[("mapping", Value::Map(mapping))]))
        .unwrap();
    assert_eq!(rename, r#"df = df.rename(columns={"old": "new"})"#);
}

#[test]
fn test_transform_configuration_errors() {
    assert!(matches!(
        TransformKind::SelectColumns.statement(&HashMap::new()),
        Err(NodeError::Configuration(_))
    ));
    assert!(matches!(
        TransformKind::FilterRows.statement(&params(&[("expression", Value::from("  "))])),
        Err(NodeError::Configuration(_))
    ));
    assert!(matches!(
        TransformKind::RenameColumns.statement(&params(&[("mapping", Value::from("a"))])),
        Err(NodeError::Configuration(_))
    ));
}

#[test]
fn test_cleaning_steps() {
    let defaults = CleaningKind::Configurable.steps(&HashMap::new());
    assert_eq!(defaults, vec![CleaningStep::DropNulls, CleaningStep::DropDuplicates]);

    let filled = CleaningKind::Configurable.steps(&params(&[
        ("fill_value", Value::from(-1)),
        ("trim_strings", Value::from(true)),
        ("drop_duplicates", Value::from(false)),
    ]));
    assert_eq!(
        filled,
        vec![CleaningStep::TrimStrings, CleaningStep::FillNulls(Value::from(-1))]
    );

    assert_eq!(
        CleaningKind::FillNulls.steps(&HashMap::new()),
        vec![CleaningStep::FillNulls(Value::from(0))]
    );
}

#[test]
fn test_training_plan_validation() {
    assert!(matches!(
        TrainingPlan::from_parameters(&HashMap::new()),
        Err(NodeError::Configuration(_))
    ));
    assert!(matches!(
        TrainingPlan::from_parameters(&params(&[
            ("target", Value::from("label")),
            ("test_size", Value::from(1.5)),
        ])),
        Err(NodeError::Configuration(_))
    ));
    assert!(matches!(
        TrainingPlan::from_parameters(&params(&[
            ("target", Value::from("label")),
            ("algorithm", Value::from("quantum_forest")),
        ])),
        Err(NodeError::Configuration(_))
    ));

    let plan = TrainingPlan::from_parameters(&params(&[("target", Value::from("label"))])).unwrap();
    let program = plan.fragment("m.pkl").render();
    assert!(program.contains("from sklearn.model_selection import train_test_split"));
    assert!(program.contains("test_size=0.2, random_state=42"));
    assert!(program.contains(r#"target = "label""#));
}

#[test]
fn test_chart_fragment() {
    let scatter = ChartExecutor::fragment(&params(&[("kind", Value::from("scatter"))]), "c.png");
    assert!(matches!(scatter, Err(NodeError::Configuration(_))));

    let hist = ChartExecutor::fragment(
        &params(&[("kind", Value::from("histogram")), ("x", Value::from("age"))]),
        "c.png",
    )
    .unwrap()
    .render();
    assert!(hist.contains(r#"df.plot(kind="hist", x=None, y=None, ax=ax)"#));
    assert!(hist.contains("matplotlib.use(\"Agg\")"));
}

#[tokio::test]
async fn test_loader_stages_inline_content() {
    let sandbox = FakeSandbox::new();
    sandbox.push_result(json!({"output": [{"a": 1}], "rows": 1, "columns": ["a"]}));

    let executor = LoaderFactory::new(FileFormat::Csv).create("csv_loader", session(sandbox.clone()));
    let result = executor
        .execute(HashMap::new(), params(&[("content", Value::from("a\n1\n"))]))
        .await;

    assert!(result.success, "{}", result.error());
    assert_eq!(result.outputs.get("rows"), Some(&Value::from(1)));

    let staged: Vec<String> = sandbox
        .files
        .lock()
        .unwrap()
        .keys()
        .filter(|p| p.starts_with("/workspace/uploads/") && p.ends_with(".csv"))
        .cloned()
        .collect();
    assert_eq!(staged.len(), 1);
    assert_eq!(sandbox.file(&staged[0]).unwrap(), b"a\n1\n");

    let programs = sandbox.programs();
    assert_eq!(programs.len(), 1);
    assert!(programs[0].contains(&format!("pd.read_csv(\"{}\", sep=\",\")", staged[0])));
    assert!(result.logs.iter().any(|l| l == &format!("source: {}", staged[0])));
}

#[tokio::test]
async fn test_loader_copies_host_file() {
    let host = std::env::temp_dir().join(format!("pipenodes-{}.json", uuid::Uuid::new_v4().simple()));
    std::fs::write(&host, br#"[{"a": 1}]"#).unwrap();
    let name = host.file_name().unwrap().to_str().unwrap().to_string();

    let sandbox = FakeSandbox::new();
    sandbox.push_result(json!({"output": [{"a": 1}]}));
    let executor = LoaderFactory::new(FileFormat::Json).create("json_loader", session(sandbox.clone()));
    let result = executor
        .execute(
            HashMap::new(),
            params(&[("host_path", Value::from(host.to_str().unwrap()))]),
        )
        .await;
    std::fs::remove_file(&host).ok();

    assert!(result.success, "{}", result.error());
    let staged = format!("/workspace/uploads/{}", name);
    assert_eq!(sandbox.file(&staged).unwrap(), br#"[{"a": 1}]"#);
    assert!(sandbox.programs()[0].contains(&format!("pd.read_json(\"{}\")", staged)));
}

#[tokio::test]
async fn test_loader_without_source_fails_before_sandbox() {
    let sandbox = FakeSandbox::new();
    let executor = LoaderFactory::new(FileFormat::Excel).create("excel_loader", session(sandbox.clone()));
    let result = executor.execute(HashMap::new(), HashMap::new()).await;

    assert!(!result.success);
    assert!(result.error().contains("'path', 'host_path' or 'content'"));
    assert!(sandbox.programs().is_empty());
}

#[tokio::test]
async fn test_chart_collects_png() {
    let sandbox = FakeSandbox::new();
    let png_path = "/workspace/charts/abc.png";
    sandbox.put_file(png_path, b"\x89PNG fake");
    sandbox.push_result(json!({"path": png_path}));

    let executor = ChartFactory.create("plot_chart", session(sandbox.clone()));
    let mut inputs = HashMap::new();
    inputs.insert("input".to_string(), Value::from(json!([{"x": 1, "y": 2}])));
    let result = executor
        .execute(inputs, params(&[("kind", Value::from("bar"))]))
        .await;

    assert!(result.success, "{}", result.error());
    let reference = result.outputs.get("output").and_then(Value::as_binary).unwrap();
    assert_eq!(reference.uri, "sandbox://project-1/workspace/charts/abc.png");
    assert_eq!(reference.size, 9);
    assert_eq!(reference.media_type.as_deref(), Some("image/png"));
}

#[tokio::test]
async fn test_chart_missing_file_fails_node() {
    let sandbox = FakeSandbox::new();
    sandbox.push_result(json!({"path": "/workspace/charts/gone.png"}));

    let executor = ChartFactory.create("plot_chart", session(sandbox));
    let result = executor.execute(HashMap::new(), HashMap::new()).await;

    assert!(!result.success);
    assert!(result.error().contains("gone.png"));
}

#[tokio::test]
async fn test_debug_passes_inputs_through() {
    let executor = DebugFactory.create("debug_log", session(FakeSandbox::new()));
    let mut inputs = HashMap::new();
    inputs.insert("input".to_string(), Value::from(json!([1, 2, 3])));
    inputs.insert("extra".to_string(), Value::from("x"));

    let result = executor
        .execute(inputs, params(&[("message", Value::from("checkpoint"))]))
        .await;

    assert!(result.success);
    assert_eq!(result.outputs.get("output"), Some(&Value::from(json!([1, 2, 3]))));
    assert_eq!(result.outputs.get("extra"), Some(&Value::from("x")));
    assert_eq!(result.logs[0], "DEBUG: checkpoint");
    assert!(result.logs.iter().any(|l| l.starts_with("  input: list of 3")));
}

#[test]
fn test_register_all() {
    let mut registry = ExecutorRegistry::new();
    register_all(&mut registry);

    let ids = registry.list_component_ids();
    for id in [
        "csv_loader",
        "json_loader",
        "excel_loader",
        "clean_data",
        "drop_nulls",
        "fill_nulls",
        "drop_duplicates",
        "select_columns",
        "filter_rows",
        "sort_rows",
        "rename_columns",
        "train_model",
        "evaluate_model",
        "plot_chart",
        "debug_log",
    ] {
        assert!(ids.contains(&id.to_string()), "{} registered", id);
    }

    let metadata = registry.get_metadata("train_model").unwrap();
    assert_eq!(metadata.category, "model");

    // Unknown loaders resolve to the first data source
    let (factory, _) = registry.lookup("parquet_loader", Some("data_source"));
    assert_eq!(factory.component_id(), "csv_loader");
}

#[tokio::test]
async fn test_pipeline_through_runtime() {
    let sandbox = FakeSandbox::new();
    sandbox.push_result(json!({
        "output": [{"name": "a", "age": 30}, {"name": "b", "age": 12}],
        "rows": 2,
        "columns": ["name", "age"],
    }));
    sandbox.push_result(json!({"output": [{"name": "a", "age": 30}], "rows": 1}));

    let mut registry = ExecutorRegistry::new();
    register_all(&mut registry);
    let runtime = PipeRuntime::new(sandbox.clone(), registry, RuntimeConfig::default());

    let mut workflow = WorkflowDefinition::new("adults");
    workflow.add_node(
        NodeDefinition::new("load", "csv_loader").with_parameter("path", "/workspace/people.csv"),
    );
    workflow.add_node(
        NodeDefinition::new("adults", "filter_rows").with_parameter("expression", "age >= 18"),
    );
    workflow.add_node(NodeDefinition::new("show", "debug_log").with_parameter("message", "adults"));
    workflow.connect("load", "output", "adults", "input");
    workflow.connect("adults", "output", "show", "input");

    let snapshot = runtime.execute(workflow, handle()).await.unwrap();

    assert_eq!(snapshot.run.status, RunStatus::Completed);
    for id in ["load", "adults", "show"] {
        assert_eq!(snapshot.node(id).unwrap().status, NodeStatus::Completed, "{}", id);
    }
    assert_eq!(
        snapshot.node("show").unwrap().outputs.get("output"),
        Some(&Value::from(json!([{"name": "a", "age": 30}])))
    );

    let programs = sandbox.programs();
    assert_eq!(programs.len(), 2);
    assert!(programs[1].contains(r#"df.query("age >= 18")"#));
}

#[tokio::test]
async fn test_failed_fragment_fails_downstream() {
    let sandbox = FakeSandbox::new();
    sandbox.push_result(json!({"success": false, "error": "FileNotFoundError: people.csv"}));

    let mut registry = ExecutorRegistry::new();
    register_all(&mut registry);
    let runtime = PipeRuntime::new(sandbox, registry, RuntimeConfig::default());

    let mut workflow = WorkflowDefinition::new("broken");
    workflow.add_node(NodeDefinition::new("load", "csv_loader").with_parameter("path", "people.csv"));
    workflow.add_node(NodeDefinition::new("show", "debug_log"));
    workflow.connect("load", "output", "show", "input");

    let snapshot = runtime.execute(workflow, handle()).await.unwrap();

    assert_eq!(snapshot.run.status, RunStatus::Failed);
    let load = snapshot.node("load").unwrap();
    assert_eq!(load.status, NodeStatus::Failed);
    assert!(load.error.as_deref().unwrap().contains("FileNotFoundError"));
    assert_eq!(snapshot.node("show").unwrap().status, NodeStatus::Failed);
}
