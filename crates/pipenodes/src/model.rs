//! Model training and evaluation executors (scikit-learn in the sandbox).

use crate::codegen::{
    param_f64, param_list, param_str, py_opt_str, py_str, py_str_list, require_input, run_fragment,
    Fragment,
};
use async_trait::async_trait;
use pipecore::{ComponentExecutor, ExecutionResult, NodeError, Value};
use piperuntime::{ExecutorFactory, ExecutorMetadata, PortDefinition, SandboxSession};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

pub const MODEL_TYPE: &str = "model";
pub const EVALUATION_TYPE: &str = "evaluation";

const MODEL_DIR: &str = "models";
const PREDICTION_LIMIT: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    RandomForest,
    DecisionTree,
    Linear,
}

impl Algorithm {
    fn name(self) -> &'static str {
        match self {
            Self::RandomForest => "random_forest",
            Self::DecisionTree => "decision_tree",
            Self::Linear => "linear",
        }
    }

    /// Import line plus the expressions building the classifier and the
    /// regressor
    fn constructors(self, seed: u64) -> (&'static str, String, String) {
        match self {
            Self::RandomForest => (
                "from sklearn.ensemble import RandomForestClassifier, RandomForestRegressor",
                format!("RandomForestClassifier(random_state={})", seed),
                format!("RandomForestRegressor(random_state={})", seed),
            ),
            Self::DecisionTree => (
                "from sklearn.tree import DecisionTreeClassifier, DecisionTreeRegressor",
                format!("DecisionTreeClassifier(random_state={})", seed),
                format!("DecisionTreeRegressor(random_state={})", seed),
            ),
            Self::Linear => (
                "from sklearn.linear_model import LinearRegression, LogisticRegression",
                "LogisticRegression(max_iter=1000)".to_string(),
                "LinearRegression()".to_string(),
            ),
        }
    }
}

impl FromStr for Algorithm {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "random_forest" | "randomforest" => Ok(Self::RandomForest),
            "decision_tree" | "tree" => Ok(Self::DecisionTree),
            "linear" | "linear_regression" | "logistic_regression" => Ok(Self::Linear),
            other => Err(NodeError::Configuration(format!("unknown algorithm '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Classification,
    Regression,
}

impl FromStr for Task {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "classification" | "classifier" => Ok(Self::Classification),
            "regression" | "regressor" => Ok(Self::Regression),
            other => Err(NodeError::Configuration(format!("unknown task '{}'", other))),
        }
    }
}

/// Validated training parameters
#[derive(Debug, Clone)]
pub struct TrainingPlan {
    pub target: String,
    pub features: Vec<String>,
    pub algorithm: Algorithm,
    pub task: Option<Task>,
    pub test_size: f64,
    pub seed: u64,
}

impl TrainingPlan {
    pub fn from_parameters(parameters: &HashMap<String, Value>) -> Result<Self, NodeError> {
        let target = param_str(parameters, "target")
            .ok_or_else(|| NodeError::Configuration("missing parameter 'target'".to_string()))?
            .to_string();
        let algorithm = param_str(parameters, "algorithm")
            .map(str::parse::<Algorithm>)
            .transpose()?
            .unwrap_or(Algorithm::RandomForest);
        let task = param_str(parameters, "task").map(str::parse::<Task>).transpose()?;
        let test_size = param_f64(parameters, "test_size").unwrap_or(0.2);
        if !(test_size > 0.0 && test_size < 1.0) {
            return Err(NodeError::Configuration(format!(
                "test_size must be between 0 and 1, got {}",
                test_size
            )));
        }
        let seed = param_f64(parameters, "random_state").map(|s| s as u64).unwrap_or(42);

        Ok(Self {
            target,
            features: param_list(parameters, "features"),
            algorithm,
            task,
            test_size,
            seed,
        })
    }

    pub fn fragment(&self, model_file: &str) -> Fragment {
        let (import, classifier, regressor) = self.algorithm.constructors(self.seed);
        let task = self.task.map(|t| match t {
            Task::Classification => "classification",
            Task::Regression => "regression",
        });

        let mut fragment = Fragment::with_frames()
            .import("import os")
            .import("import pickle")
            .import("from sklearn.model_selection import train_test_split")
            .import(import);
        fragment
            .line("df = _pf_frame()")
            .line(format!("target = {}", py_str(&self.target)))
            .line(format!(
                "features = {} or [c for c in df.columns if c != target]",
                py_str_list(&self.features)
            ))
            .line("X = pd.get_dummies(df[features])")
            .line("y = df[target]")
            .line(format!("task = {}", py_opt_str(task)))
            .line("if task is None:\n    task = \"classification\" if (y.dtype == object or y.nunique() <= 10) else \"regression\"")
            .line(format!(
                "model = {} if task == \"classification\" else {}",
                classifier, regressor
            ))
            .line(format!(
                "X_train, X_test, y_train, y_test = train_test_split(X, y, test_size={}, random_state={})",
                self.test_size, self.seed
            ))
            .line("model.fit(X_train, y_train)")
            .line("score = float(model.score(X_test, y_test))")
            .line(format!("os.makedirs({}, exist_ok=True)", py_str(MODEL_DIR)))
            .line(format!(
                "path = os.path.abspath(os.path.join({}, {}))",
                py_str(MODEL_DIR),
                py_str(model_file)
            ))
            .line("with open(path, \"wb\") as fh:\n    pickle.dump({\"model\": model, \"columns\": list(X.columns), \"features\": features, \"target\": target, \"task\": task}, fh)")
            .line(format!("print(\"trained %s %s model, score %.4f\" % ({}, task, score))", py_str(self.algorithm.name())))
            .line(format!(
                "emit_result({{\"output\": {{\"path\": path, \"algorithm\": {}, \"task\": task, \"target\": target, \"features\": features}}, \"metrics\": {{\"score\": score, \"train_rows\": int(len(X_train)), \"test_rows\": int(len(X_test))}}}})",
                py_str(self.algorithm.name())
            ));
        fragment
    }
}

pub struct TrainModelExecutor {
    component_id: String,
    session: SandboxSession,
}

#[async_trait]
impl ComponentExecutor for TrainModelExecutor {
    fn component_id(&self) -> &str {
        &self.component_id
    }

    async fn execute(
        &self,
        inputs: HashMap<String, Value>,
        parameters: HashMap<String, Value>,
    ) -> ExecutionResult {
        let plan = match TrainingPlan::from_parameters(&parameters) {
            Ok(plan) => plan,
            Err(e) => return e.into(),
        };
        let model_file = format!("{}.pkl", Uuid::new_v4().simple());
        run_fragment(&self.session, &plan.fragment(&model_file), inputs).await
    }
}

pub struct TrainModelFactory;

impl ExecutorFactory for TrainModelFactory {
    fn create(&self, component_id: &str, session: SandboxSession) -> Box<dyn ComponentExecutor> {
        Box::new(TrainModelExecutor {
            component_id: component_id.to_string(),
            session,
        })
    }

    fn component_id(&self) -> &str {
        "train_model"
    }

    fn component_type(&self) -> Option<&str> {
        Some(MODEL_TYPE)
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Train a classifier or regressor on 'target' (random_forest, decision_tree or linear)".to_string(),
            category: MODEL_TYPE.to_string(),
            inputs: vec![PortDefinition::required("input", "Training rows")],
            outputs: vec![
                PortDefinition::required("output", "Model descriptor (sandbox path, task, features)"),
                PortDefinition::optional("metrics", "Hold-out score and split sizes"),
            ],
        }
    }
}

/// Scores a trained model against a dataset
pub struct EvaluateModelExecutor {
    component_id: String,
    session: SandboxSession,
}

impl EvaluateModelExecutor {
    pub fn fragment() -> Fragment {
        let mut fragment = Fragment::with_frames()
            .import("import pickle")
            .import("from sklearn import metrics as _pf_metrics");
        fragment
            .line("descriptor = INPUTS.get(\"model\")")
            .line("if not isinstance(descriptor, dict) or \"path\" not in descriptor:\n    raise ValueError(\"input 'model' is not a trained model\")")
            .line("with open(descriptor[\"path\"], \"rb\") as fh:\n    bundle = pickle.load(fh)")
            .line("df = _pf_frame()")
            .line("X = pd.get_dummies(df[bundle[\"features\"]]).reindex(columns=bundle[\"columns\"], fill_value=0)")
            .line("y = df[bundle[\"target\"]]")
            .line("pred = bundle[\"model\"].predict(X)")
            .line("if bundle[\"task\"] == \"classification\":\n    scores = {\"accuracy\": float(_pf_metrics.accuracy_score(y, pred)), \"f1_macro\": float(_pf_metrics.f1_score(y, pred, average=\"macro\"))}\nelse:\n    scores = {\"r2\": float(_pf_metrics.r2_score(y, pred)), \"mae\": float(_pf_metrics.mean_absolute_error(y, pred)), \"rmse\": float(_pf_metrics.mean_squared_error(y, pred) ** 0.5)}")
            .line(format!(
                "emit_result({{\"output\": scores, \"predictions\": [p.item() if hasattr(p, \"item\") else p for p in pred[:{}]]}})",
                PREDICTION_LIMIT
            ));
        fragment
    }
}

#[async_trait]
impl ComponentExecutor for EvaluateModelExecutor {
    fn component_id(&self) -> &str {
        &self.component_id
    }

    async fn execute(
        &self,
        inputs: HashMap<String, Value>,
        _parameters: HashMap<String, Value>,
    ) -> ExecutionResult {
        for port in ["model", "input"] {
            if let Err(e) = require_input(&inputs, port) {
                return e.into();
            }
        }
        run_fragment(&self.session, &Self::fragment(), inputs).await
    }
}

pub struct EvaluateModelFactory;

impl ExecutorFactory for EvaluateModelFactory {
    fn create(&self, component_id: &str, session: SandboxSession) -> Box<dyn ComponentExecutor> {
        Box::new(EvaluateModelExecutor {
            component_id: component_id.to_string(),
            session,
        })
    }

    fn component_id(&self) -> &str {
        "evaluate_model"
    }

    fn component_type(&self) -> Option<&str> {
        Some(EVALUATION_TYPE)
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Score a trained model on a dataset".to_string(),
            category: EVALUATION_TYPE.to_string(),
            inputs: vec![
                PortDefinition::required("model", "Model descriptor from train_model"),
                PortDefinition::required("input", "Rows holding the features and target"),
            ],
            outputs: vec![
                PortDefinition::required("output", "Metrics (accuracy/f1 or r2/mae/rmse)"),
                PortDefinition::optional("predictions", "First predictions"),
            ],
        }
    }
}
