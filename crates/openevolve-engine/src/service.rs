use crate::controller::{EvolutionController, EvolutionStatus};
use crate::error::EngineError;
use crate::events::{EventBus, EvolutionEvent};
use crate::logger::{LogRecord, RunLogger};
use openevolve_config::Config;
use openevolve_database::ProgramDatabase;
use openevolve_evaluator::{CommandEvaluator, EvaluationModule};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{error, info};
use uuid::Uuid;

/// Parameters for starting one evolution run.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartEvolutionRequest {
    pub initial_program_path: PathBuf,
    pub evaluator_path: PathBuf,
    pub config_path: Option<PathBuf>,
    pub iterations: Option<u64>,
    pub output_dir: Option<PathBuf>,
}

/// Graph snapshot of a run for visualization.
#[derive(Clone, Debug, Serialize)]
pub struct EvolutionData {
    pub nodes: Vec<Value>,
    pub edges: Vec<Value>,
    pub archive: Vec<String>,
    pub checkpoint_dir: String,
}

struct RunHandle {
    status: Arc<RwLock<EvolutionStatus>>,
    stop: Arc<AtomicBool>,
    database: Arc<RwLock<ProgramDatabase>>,
    bus: EventBus,
    output_dir: PathBuf,
}

/// In-process control API presented to the hosting shell. Transport
/// (HTTP, IPC) stays with the shell.
pub struct EvolutionService {
    runs: Mutex<HashMap<String, RunHandle>>,
}

impl EvolutionService {
    pub fn new() -> Self {
        Self {
            runs: Mutex::new(HashMap::new()),
        }
    }

    /// Start a run with a command-backed evaluator, per the user
    /// evaluator contract.
    pub async fn start_evolution(
        &self,
        request: StartEvolutionRequest,
    ) -> Result<String, EngineError> {
        let module = Arc::new(CommandEvaluator::new(&request.evaluator_path)?);
        self.start_with_module(request, module).await
    }

    /// Start a run with an in-process evaluation module (tests, demos,
    /// embedded evaluators).
    pub async fn start_with_module(
        &self,
        request: StartEvolutionRequest,
        module: Arc<dyn EvaluationModule>,
    ) -> Result<String, EngineError> {
        if !request.initial_program_path.exists() {
            return Err(EngineError::SeedMissing(request.initial_program_path));
        }

        let mut config = match &request.config_path {
            Some(path) => Config::load(path)?,
            None => Config::load_default()?,
        };
        if let Some(iterations) = request.iterations {
            config.max_iterations = iterations;
        }

        let run_id = Uuid::new_v4().to_string();
        let output_dir = request
            .output_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("openevolve").join(&run_id));

        let mut controller = EvolutionController::new(
            config,
            &request.initial_program_path,
            module,
            &output_dir,
        )
        .await?;

        let handle = RunHandle {
            status: controller.status_handle(),
            stop: controller.stop_handle(),
            database: controller.database_handle(),
            bus: controller.bus(),
            output_dir,
        };
        let status = handle.status.clone();
        let task_run_id = run_id.clone();
        tokio::spawn(async move {
            match controller.run().await {
                Ok(best) => {
                    info!(run = %task_run_id, best = %best.id, "run finished");
                }
                Err(e) => {
                    error!(run = %task_run_id, error = %e, "run failed");
                    if let Ok(mut status) = status.write() {
                        status.status = "error".to_string();
                        status.error = Some(e.to_string());
                    }
                }
            }
        });

        self.runs
            .lock()
            .map_err(|_| EngineError::LockPoisoned)?
            .insert(run_id.clone(), handle);
        info!(run = %run_id, "evolution started");
        Ok(run_id)
    }

    /// Request a run to stop after its current iteration.
    pub fn stop_evolution(&self, run_id: &str) -> Result<(), EngineError> {
        let runs = self.runs.lock().map_err(|_| EngineError::LockPoisoned)?;
        let handle = runs
            .get(run_id)
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
        {
            let status = handle
                .status
                .read()
                .map_err(|_| EngineError::LockPoisoned)?;
            if status.status != "running" {
                return Err(EngineError::RunNotRunning(run_id.to_string()));
            }
        }
        handle.stop.store(true, Ordering::SeqCst);
        info!(run = %run_id, "stop requested");
        Ok(())
    }

    pub fn get_status(&self, run_id: &str) -> Result<EvolutionStatus, EngineError> {
        let runs = self.runs.lock().map_err(|_| EngineError::LockPoisoned)?;
        let handle = runs
            .get(run_id)
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
        handle
            .status
            .read()
            .map(|s| s.clone())
            .map_err(|_| EngineError::LockPoisoned)
    }

    /// Live nodes/edges/archive snapshot from the run's database.
    pub fn get_evolution_data(&self, run_id: &str) -> Result<EvolutionData, EngineError> {
        let runs = self.runs.lock().map_err(|_| EngineError::LockPoisoned)?;
        let handle = runs
            .get(run_id)
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
        let db = handle
            .database
            .read()
            .map_err(|_| EngineError::LockPoisoned)?;

        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        for program in db.programs() {
            nodes.push(program_node(program));
            if let Some(parent_id) = &program.parent_id {
                if db.get(parent_id).is_some() {
                    edges.push(json!({ "source": parent_id, "target": program.id }));
                }
            }
        }
        Ok(EvolutionData {
            nodes,
            edges,
            archive: db.archive().to_vec(),
            checkpoint_dir: latest_checkpoint_dir(&handle.output_dir)
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "live".to_string()),
        })
    }

    pub fn get_program(&self, run_id: &str, program_id: &str) -> Result<Value, EngineError> {
        let runs = self.runs.lock().map_err(|_| EngineError::LockPoisoned)?;
        let handle = runs
            .get(run_id)
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
        let db = handle
            .database
            .read()
            .map_err(|_| EngineError::LockPoisoned)?;
        db.get(program_id)
            .map(program_node)
            .ok_or_else(|| EngineError::RunNotFound(program_id.to_string()))
    }

    /// Structured records parsed back out of the run's `evolution.log`.
    pub fn get_logs(&self, run_id: &str) -> Result<Vec<LogRecord>, EngineError> {
        let runs = self.runs.lock().map_err(|_| EngineError::LockPoisoned)?;
        let handle = runs
            .get(run_id)
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
        let path = handle.output_dir.join("evolution.log");
        if !path.exists() {
            return Ok(Vec::new());
        }
        Ok(RunLogger::read_records(&path)?)
    }

    pub fn subscribe(&self, run_id: &str) -> Result<broadcast::Receiver<EvolutionEvent>, EngineError> {
        let runs = self.runs.lock().map_err(|_| EngineError::LockPoisoned)?;
        let handle = runs
            .get(run_id)
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
        Ok(handle.bus.subscribe())
    }

    /// Load a config file, or the persistent UI config when no path is
    /// given.
    pub fn get_config(&self, path: Option<&Path>) -> Result<Config, EngineError> {
        Ok(match path {
            Some(path) => Config::load(path)?,
            None => Config::load_default()?,
        })
    }

    pub fn save_config(&self, path: &Path, config: &Config) -> Result<(), EngineError> {
        config.save(path)?;
        Ok(())
    }
}

impl Default for EvolutionService {
    fn default() -> Self {
        Self::new()
    }
}

fn program_node(program: &openevolve_core::Program) -> Value {
    json!({
        "id": program.id,
        "code": program.code,
        "metrics": program.metrics,
        "generation": program.generation,
        "parent_id": program.parent_id,
        "island": program.island().unwrap_or(0),
        "iteration": program.iteration_found,
        "method": program.metadata.get("action").cloned()
            .unwrap_or_else(|| json!("unknown")),
    })
}

/// Highest-numbered `checkpoint_<n>` directory under
/// `<outputDir>/checkpoints`, if any.
fn latest_checkpoint_dir(output_dir: &Path) -> Option<PathBuf> {
    let checkpoints = output_dir.join("checkpoints");
    let entries = std::fs::read_dir(&checkpoints).ok()?;
    entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            name.strip_prefix("checkpoint_")
                .and_then(|n| n.parse::<u64>().ok())
                .map(|n| (n, entry.path()))
        })
        .max_by_key(|(n, _)| *n)
        .map(|(_, path)| path)
}
