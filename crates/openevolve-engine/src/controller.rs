use crate::error::EngineError;
use crate::events::{EventBus, EvolutionEvent};
use crate::logger::RunLogger;
use futures::stream::{FuturesUnordered, StreamExt};
use openevolve_config::Config;
use openevolve_core::{apply_diff, extract_code_block, DiffParser, Program};
use openevolve_database::{ProgramDatabase, SelectionStrategy};
use openevolve_evaluator::{EvaluationModule, Evaluator};
use openevolve_llm::{ChatMessage, GenerateOptions, LlmEnsemble};
use openevolve_pacevolve::{
    Action, CollaborativeEvolution, HierarchicalContextManager, IdeaCluster, MomentumBacktracker,
};
use openevolve_prompt::{PromptContext, PromptSampler, TemplateManager};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Externally visible run status.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionStatus {
    pub status: String,
    pub iteration: u64,
    pub total_iterations: u64,
    pub best_score: Option<f64>,
    pub start_time: Option<f64>,
    pub error: Option<String>,
}

/// The iteration state machine: wires the database, ensemble, prompt
/// sampler, evaluator, and the three PACEvolve mechanisms into one
/// cooperative loop.
pub struct EvolutionController {
    config: Config,
    output_dir: PathBuf,
    database: Arc<RwLock<ProgramDatabase>>,
    ensemble: Arc<LlmEnsemble>,
    evaluator: Arc<Evaluator>,
    sampler: PromptSampler,
    diff_parser: DiffParser,
    hcm: HierarchicalContextManager,
    mbb: MomentumBacktracker,
    ce: CollaborativeEvolution,
    bus: EventBus,
    logger: Arc<RunLogger>,
    stop: Arc<AtomicBool>,
    status: Arc<RwLock<EvolutionStatus>>,
    /// Fitness of the previous candidate per island, for prompt deltas.
    last_island_fitness: HashMap<usize, f64>,
}

impl EvolutionController {
    /// Build every component, evaluate the seed, and insert it into
    /// island 0 at iteration 0.
    pub async fn new(
        config: Config,
        initial_program_path: &Path,
        module: Arc<dyn EvaluationModule>,
        output_dir: &Path,
    ) -> Result<Self, EngineError> {
        let ensemble = Arc::new(LlmEnsemble::from_config(&config.llm)?);
        Self::with_ensemble(config, initial_program_path, module, output_dir, ensemble).await
    }

    /// As [`EvolutionController::new`], with a caller-supplied ensemble
    /// (custom chat clients, scripted tests).
    pub async fn with_ensemble(
        config: Config,
        initial_program_path: &Path,
        module: Arc<dyn EvaluationModule>,
        output_dir: &Path,
        ensemble: Arc<LlmEnsemble>,
    ) -> Result<Self, EngineError> {
        if !initial_program_path.exists() {
            return Err(EngineError::SeedMissing(initial_program_path.to_path_buf()));
        }
        std::fs::create_dir_all(output_dir)?;
        let logger = Arc::new(RunLogger::create(output_dir.join("evolution.log"))?);

        let seed_code = std::fs::read_to_string(initial_program_path)?;
        let mut evaluator = Evaluator::new(
            module,
            config.evaluator.clone(),
            config.file_suffix.clone(),
        );
        if config.evaluator.use_llm_feedback {
            let feedback_ensemble = Arc::new(LlmEnsemble::from_model_list(
                &config.llm,
                &config.llm.evaluator_models,
            )?);
            let system = if config.prompt.evaluator_system_message.is_empty() {
                TemplateManager::load(None)?.get("evaluator_system_message")
            } else {
                config.prompt.evaluator_system_message.clone()
            };
            evaluator = evaluator.with_llm_feedback(feedback_ensemble, system);
        }
        let evaluator = Arc::new(evaluator);

        let templates =
            TemplateManager::load(config.prompt.template_dir.as_deref().map(Path::new))?;
        let sampler = PromptSampler::new(config.prompt.clone(), templates, config.random_seed);
        let diff_parser = DiffParser::new()?;

        let database = Arc::new(RwLock::new(ProgramDatabase::new(config.database.clone())));
        let hcm = HierarchicalContextManager::new(config.pacevolve.clone());
        let mbb = MomentumBacktracker::new(
            config.pacevolve.clone(),
            config.random_seed.map(|s| s.wrapping_add(1)),
        );
        let ce = CollaborativeEvolution::new(
            config.pacevolve.clone(),
            config.random_seed.map(|s| s.wrapping_add(2)),
        );

        let status = Arc::new(RwLock::new(EvolutionStatus {
            status: "running".to_string(),
            iteration: 0,
            total_iterations: config.max_iterations,
            best_score: None,
            start_time: Some(chrono::Utc::now().timestamp_millis() as f64 / 1000.0),
            error: None,
        }));

        let mut controller = Self {
            config,
            output_dir: output_dir.to_path_buf(),
            database,
            ensemble,
            evaluator,
            sampler,
            diff_parser,
            hcm,
            mbb,
            ce,
            bus: EventBus::new(),
            logger,
            stop: Arc::new(AtomicBool::new(false)),
            status,
            last_island_fitness: HashMap::new(),
        };
        controller.evaluate_seed(seed_code).await?;
        Ok(controller)
    }

    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn status_handle(&self) -> Arc<RwLock<EvolutionStatus>> {
        self.status.clone()
    }

    pub fn database_handle(&self) -> Arc<RwLock<ProgramDatabase>> {
        self.database.clone()
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    async fn evaluate_seed(&mut self, seed_code: String) -> Result<(), EngineError> {
        let seed = Program::new(seed_code, self.config.language.clone()).with_iteration(0);
        let metrics = self
            .evaluator
            .evaluate_program(&seed.code, &seed.id)
            .await;
        let mut seed = seed.with_metrics(metrics);
        if let Some(artifacts) = self.evaluator.take_artifacts(&seed.id) {
            seed.artifacts_json = Some(serde_json::to_string(&artifacts)?);
        }
        let id = self.db_write()?.add(seed, Some(0), Some(0));
        self.logger
            .info(&format!("seed program {} evaluated and inserted", id));
        self.refresh_status(0)?;
        Ok(())
    }

    /// Run the evolution loop to termination and persist the final
    /// best program. Returns the best program.
    pub async fn run(&mut self) -> Result<Program, EngineError> {
        let total = self.config.max_iterations;
        self.logger
            .info(&format!("starting evolution for {} iterations", total));

        for iteration in 1..=total {
            if self.stop.load(Ordering::SeqCst) {
                self.logger.info("stop requested, ending run");
                self.set_status("stopped", None)?;
                break;
            }

            if let Err(e) = self.run_iteration(iteration).await {
                warn!(iteration, error = %e, "iteration failed");
                self.logger
                    .warn(&format!("iteration {} failed: {}", iteration, e));
                self.bus.publish(EvolutionEvent::Error {
                    error: e.to_string(),
                });
            }
            self.refresh_status(iteration)?;

            if self.config.checkpoint_interval > 0
                && iteration % self.config.checkpoint_interval == 0
            {
                if let Err(e) = self.save_checkpoint(iteration) {
                    warn!(iteration, error = %e, "checkpoint failed");
                    self.logger
                        .warn(&format!("checkpoint at iteration {} failed: {}", iteration, e));
                }
            }

            if let Some(target) = self.config.target_score {
                let best = self.db_read()?.best_score();
                if best.is_some_and(|b| b >= target) {
                    self.logger.info(&format!(
                        "target score {} reached at iteration {}",
                        target, iteration
                    ));
                    break;
                }
            }
        }

        let best = self.save_best_program()?;
        if self.current_status()?.status == "running" {
            self.set_status("completed", None)?;
        }
        self.bus.publish(EvolutionEvent::Complete {
            best_program_id: Some(best.id.clone()),
            best_score: self.db_read()?.best_score(),
        });
        self.logger.info("evolution complete");
        Ok(best)
    }

    async fn run_iteration(&mut self, iteration: u64) -> Result<(), EngineError> {
        let num_islands = self.db_read()?.num_islands();
        let island = (iteration % num_islands as u64) as usize;
        let target = self.config.target_score;
        let pac = self.config.pacevolve.clone();

        // Idle islands advance their generation and wait for migration.
        if self.db_read()?.island(island)?.is_empty() {
            self.logger.info(&format!(
                "island {} empty at iteration {}, skipping",
                island, iteration
            ));
            self.advance_island(island)?;
            return Ok(());
        }

        let stagnating = pac.enable_mbb && self.mbb.is_stagnating(island);

        // Momentum gate: restore a past best before burning an LLM call.
        if pac.enable_mbb && self.mbb.should_backtrack(island) {
            if let Some(target_program) = self.mbb.backtrack_target(island) {
                self.insert_backtrack_clone(target_program, iteration, island)?;
                self.hcm.reset_for_backtrack();
                self.emit_progress(iteration)?;
                self.advance_island(island)?;
                return Ok(());
            }
        }

        // Crossover gate: pull the best of a leading peer island.
        if self
            .ce
            .should_perform_crossover(iteration, island, stagnating, target)
        {
            if let Some(partner) = self.ce.choose_partner(island, num_islands, target) {
                if self.perform_crossover(iteration, island, partner).await? {
                    self.advance_island(island)?;
                    return Ok(());
                }
            }
        }

        let action = self.ce.sample_action();
        if action == Action::Backtrack {
            // A sampled backtrack that has a restore point behaves like
            // the momentum gate; without one it degrades to weighted
            // parent selection.
            if let Some(target_program) = self.mbb.backtrack_target(island) {
                self.insert_backtrack_clone(target_program, iteration, island)?;
                self.hcm.reset_for_backtrack();
                self.emit_progress(iteration)?;
                self.advance_island(island)?;
                return Ok(());
            }
        }

        let strategy = match action {
            Action::Explore => SelectionStrategy::Explore,
            Action::Exploit => SelectionStrategy::Exploit,
            Action::Backtrack => SelectionStrategy::Weighted,
        };

        let (parent, inspirations) = self.db_write()?.sample_from_island(
            island,
            self.config.prompt.num_diverse_programs,
            strategy,
        )?;
        let island_best = self
            .db_read()?
            .island_best_score(island)
            .unwrap_or_else(|| parent.fitness(&self.config.database.feature_dimensions));
        self.ce.observe_island(island, island_best);

        let prompt = self.build_prompt(&parent, &inspirations, iteration)?;
        let action_tag = action_name(action);

        let candidates = self.config.evaluator.parallel_evaluations.max(1);
        if candidates == 1 {
            let child = self
                .generate_candidate(&prompt, &parent, iteration, island, action_tag)
                .await?;
            self.ingest_child(child, iteration, island, target)?;
        } else {
            let mut inflight = FuturesUnordered::new();
            for _ in 0..candidates {
                let ensemble = self.ensemble.clone();
                let evaluator = self.evaluator.clone();
                let prompt = prompt.clone();
                let parent = parent.clone();
                let diff_parser = self.diff_parser.clone();
                let diff_mode = self.config.diff_based_evolution;
                let language = self.config.language.clone();
                inflight.push(async move {
                    build_child(
                        &ensemble,
                        &evaluator,
                        &diff_parser,
                        diff_mode,
                        &language,
                        &prompt,
                        &parent,
                        iteration,
                        island,
                        action_tag,
                    )
                    .await
                });
            }
            // Completion order is the insert order; the strict-fitness
            // rule arbitrates cell occupancy either way.
            while let Some(result) = inflight.next().await {
                match result {
                    Ok(child) => self.ingest_child(child, iteration, island, target)?,
                    Err(e) => {
                        self.logger
                            .warn(&format!("candidate failed at iteration {}: {}", iteration, e));
                        self.bus.publish(EvolutionEvent::Error {
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        if pac.enable_hcm
            && pac.pruning_interval > 0
            && iteration % pac.pruning_interval == 0
        {
            self.hcm.prune_stale_ideas(iteration);
        }
        if pac.momentum_window_size > 0 && iteration % pac.momentum_window_size as u64 == 0 {
            let policy = self.ce.policy();
            self.logger.info(&format!(
                "pacevolve stats: momentum={:.4} policy=({:.2}/{:.2}/{:.2}) ideas={}",
                self.mbb.momentum(island),
                policy.explore,
                policy.exploit,
                policy.backtrack,
                self.hcm.len()
            ));
        }

        self.advance_island(island)?;
        self.emit_progress(iteration)?;
        Ok(())
    }

    async fn generate_candidate(
        &self,
        prompt: &openevolve_prompt::Prompt,
        parent: &Program,
        iteration: u64,
        island: usize,
        action_tag: &str,
    ) -> Result<Program, EngineError> {
        build_child(
            &self.ensemble,
            &self.evaluator,
            &self.diff_parser,
            self.config.diff_based_evolution,
            &self.config.language,
            prompt,
            parent,
            iteration,
            island,
            action_tag,
        )
        .await
    }

    fn ingest_child(
        &mut self,
        child: Program,
        iteration: u64,
        island: usize,
        target: Option<f64>,
    ) -> Result<(), EngineError> {
        let pac = &self.config.pacevolve;
        let child_fitness = child.fitness(&self.config.database.feature_dimensions);
        self.db_write()?
            .add(child.clone(), Some(iteration), Some(island));

        if pac.enable_hcm {
            self.hcm.add_idea(&child, iteration);
        }
        if pac.enable_mbb {
            self.mbb.update(&child, iteration, island, target);
        }
        let island_best = self.db_read()?.island_best_score(island);
        if let Some(best) = island_best {
            self.ce.observe_island(island, best);
        }
        if pac.enable_ce {
            let own = self.ce.absolute_progress(island, target);
            let peer = self.ce.peer_best_progress(island, target);
            self.ce
                .update_policy(self.mbb.momentum(island), Some(own), peer);
        }
        self.last_island_fitness.insert(island, child_fitness);
        Ok(())
    }

    async fn perform_crossover(
        &mut self,
        iteration: u64,
        island: usize,
        partner: usize,
    ) -> Result<bool, EngineError> {
        let (parent1, parent2, source_islands) = {
            let db = self.db_read()?;
            let own_best = db
                .island(island)?
                .best_program_id
                .as_deref()
                .and_then(|id| db.get(id))
                .cloned();
            let partner_best = db
                .island(partner)?
                .best_program_id
                .as_deref()
                .and_then(|id| db.get(id))
                .cloned();
            let (Some(own), Some(peer)) = (own_best, partner_best) else {
                return Ok(false);
            };
            let dims = &self.config.database.feature_dimensions;
            // The fitter best leads the offspring's lineage.
            if peer.fitness(dims) > own.fitness(dims) {
                (peer, own, [partner, island])
            } else {
                (own, peer, [island, partner])
            }
        };

        let offspring = self
            .ce
            .build_offspring(&parent1, &parent2, source_islands, iteration);
        let metrics = self
            .evaluator
            .evaluate_program(&offspring.code, &offspring.id)
            .await;
        let mut offspring = offspring.with_metrics(metrics);
        if let Some(artifacts) = self.evaluator.take_artifacts(&offspring.id) {
            offspring.artifacts_json = Some(serde_json::to_string(&artifacts)?);
        }
        self.db_write()?.add(offspring, Some(iteration), Some(island));
        self.ce.mark_crossover(iteration);
        self.logger.info(&format!(
            "crossover between islands {} and {} at iteration {}",
            source_islands[0], source_islands[1], iteration
        ));
        self.emit_progress(iteration)?;
        Ok(true)
    }

    fn insert_backtrack_clone(
        &mut self,
        source: Program,
        iteration: u64,
        island: usize,
    ) -> Result<(), EngineError> {
        let clone = Program::new(source.code.clone(), source.language.clone())
            .with_parent(source.id.clone())
            .with_generation(source.generation + 1)
            .with_iteration(iteration)
            .with_metrics(source.metrics.clone())
            .annotate("backtracked", json!(true))
            .annotate("island", json!(island));
        self.db_write()?.add(clone, Some(iteration), Some(island));
        self.logger.info(&format!(
            "backtracked island {} to program {} at iteration {}",
            island, source.id, iteration
        ));
        Ok(())
    }

    fn build_prompt(
        &self,
        parent: &Program,
        inspirations: &[Program],
        iteration: u64,
    ) -> Result<openevolve_prompt::Prompt, EngineError> {
        let island = parent.island().unwrap_or(0);
        let (top_programs, feature_coords) = {
            let db = self.db_read()?;
            (
                db.top_programs(self.config.prompt.num_top_programs),
                db.peek_feature_coords(parent),
            )
        };
        let generation_ideas: Vec<String> = if self.config.pacevolve.enable_hcm {
            self.hcm
                .generation_context()
                .into_iter()
                .map(render_idea)
                .collect()
        } else {
            Vec::new()
        };
        let selection_ideas: Vec<String> = if self.config.pacevolve.enable_hcm {
            self.hcm
                .selection_context()
                .into_iter()
                .map(render_idea)
                .collect()
        } else {
            Vec::new()
        };
        let artifacts: Option<HashMap<String, String>> = parent
            .artifacts_json
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok());

        let context = PromptContext {
            current_code: &parent.code,
            current_metrics: &parent.metrics,
            previous_fitness: self.last_island_fitness.get(&island).copied(),
            top_programs: &top_programs,
            inspirations,
            generation_ideas: &generation_ideas,
            selection_ideas: &selection_ideas,
            language: &self.config.language,
            iteration,
            diff_mode: self.config.diff_based_evolution,
            feature_dimensions: &self.config.database.feature_dimensions,
            feature_coords: &feature_coords,
            artifacts: artifacts.as_ref(),
            template_override: None,
        };
        Ok(self.sampler.build(&context))
    }

    fn advance_island(&mut self, island: usize) -> Result<(), EngineError> {
        let mut db = self.db_write()?;
        db.increment_island_generation(island);
        if db.should_migrate() {
            db.migrate_programs();
        }
        Ok(())
    }

    fn emit_progress(&self, iteration: u64) -> Result<(), EngineError> {
        let (best_score, metrics, best_program_id) = {
            let db = self.db_read()?;
            let best = db.best_program();
            (
                db.best_score(),
                best.map(|p| p.metrics.clone()).unwrap_or_default(),
                best.map(|p| p.id.clone()),
            )
        };
        self.bus.publish(EvolutionEvent::Progress {
            iteration,
            best_score,
            metrics,
            best_program_id,
        });
        Ok(())
    }

    fn save_checkpoint(&self, iteration: u64) -> Result<(), EngineError> {
        let dir = self
            .output_dir
            .join("checkpoints")
            .join(format!("checkpoint_{}", iteration));
        self.db_read()?.save(&dir, iteration)?;
        self.logger
            .info(&format!("checkpoint saved at iteration {}", iteration));
        Ok(())
    }

    fn save_best_program(&self) -> Result<Program, EngineError> {
        let best = self
            .db_read()?
            .best_program()
            .cloned()
            .ok_or(EngineError::NoPrograms)?;
        let best_dir = self.output_dir.join("best");
        std::fs::create_dir_all(&best_dir)?;
        let code_path = best_dir.join(format!("best_program{}", self.config.file_suffix));
        std::fs::write(&code_path, &best.code)?;
        let info = json!({
            "id": best.id,
            "generation": best.generation,
            "iteration_found": best.iteration_found,
            "metrics": best.metrics,
            "language": best.language,
            "saved_at": chrono::Utc::now().to_rfc3339(),
        });
        std::fs::write(
            best_dir.join("best_program_info.json"),
            serde_json::to_string_pretty(&info)?,
        )?;
        info!(program = %best.id, "best program saved");
        Ok(best)
    }

    fn refresh_status(&self, iteration: u64) -> Result<(), EngineError> {
        let best_score = self.db_read()?.best_score();
        let mut status = self.status.write().map_err(|_| EngineError::LockPoisoned)?;
        status.iteration = iteration;
        status.best_score = best_score;
        Ok(())
    }

    fn current_status(&self) -> Result<EvolutionStatus, EngineError> {
        Ok(self
            .status
            .read()
            .map_err(|_| EngineError::LockPoisoned)?
            .clone())
    }

    fn set_status(&self, state: &str, error: Option<String>) -> Result<(), EngineError> {
        {
            let mut status = self.status.write().map_err(|_| EngineError::LockPoisoned)?;
            status.status = state.to_string();
            if error.is_some() {
                status.error = error;
            }
        }
        let status = self.current_status()?;
        self.bus.publish(EvolutionEvent::Status {
            status: status.status,
            iteration: status.iteration,
            total_iterations: status.total_iterations,
            best_score: status.best_score,
        });
        Ok(())
    }

    fn db_read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, ProgramDatabase>, EngineError> {
        self.database.read().map_err(|_| EngineError::LockPoisoned)
    }

    fn db_write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, ProgramDatabase>, EngineError> {
        self.database.write().map_err(|_| EngineError::LockPoisoned)
    }
}

fn action_name(action: Action) -> &'static str {
    match action {
        Action::Explore => "explore",
        Action::Exploit => "exploit",
        Action::Backtrack => "backtrack",
    }
}

fn render_idea(cluster: &IdeaCluster) -> String {
    format!("{} (score {:.2})", cluster.title, cluster.score)
}

/// One candidate: LLM call, diff/rewrite parsing, evaluation. Shared
/// by the serial and parallel paths.
#[allow(clippy::too_many_arguments)]
async fn build_child(
    ensemble: &LlmEnsemble,
    evaluator: &Evaluator,
    diff_parser: &DiffParser,
    diff_mode: bool,
    language: &str,
    prompt: &openevolve_prompt::Prompt,
    parent: &Program,
    iteration: u64,
    island: usize,
    action_tag: &str,
) -> Result<Program, EngineError> {
    let response = ensemble
        .generate(
            &prompt.system,
            &[ChatMessage::user(prompt.user.clone())],
            &GenerateOptions::default(),
        )
        .await?;

    let child_code = if diff_mode {
        let blocks = diff_parser.parse(&response);
        if blocks.is_empty() {
            warn!(iteration, "no diff blocks in response, keeping parent code");
            parent.code.clone()
        } else {
            apply_diff(&parent.code, &blocks)
        }
    } else {
        extract_code_block(&response, language)
    };

    let mut child = Program::new(child_code, language.to_string())
        .with_parent(parent.id.clone())
        .with_generation(parent.generation + 1)
        .with_iteration(iteration)
        .annotate("island", json!(island))
        .annotate("action", json!(action_tag));
    let metrics = evaluator.evaluate_program(&child.code, &child.id).await;
    child.metrics = metrics;
    if let Some(artifacts) = evaluator.take_artifacts(&child.id) {
        child.artifacts_json = Some(serde_json::to_string(&artifacts)?);
    }
    Ok(child)
}
