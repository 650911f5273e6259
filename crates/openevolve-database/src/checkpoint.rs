use crate::database::ProgramDatabase;
use crate::error::DatabaseError;
use crate::island::Island;
use openevolve_config::DatabaseConfig;
use openevolve_core::Program;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Serialized database indexes, written beside `programs.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointMetadata {
    pub last_iteration: u64,
    pub best_program_id: Option<String>,
    pub island_best_programs: Vec<Option<String>>,
    pub archive: Vec<String>,
    /// Resident id sets, one per island.
    pub islands: Vec<Vec<String>>,
    pub island_generations: Vec<u64>,
    pub last_migration_generation: u64,
}

impl ProgramDatabase {
    /// Write `programs.json` and `metadata.json` under `dir`. The
    /// directory is staged under a `.tmp` sibling and renamed into
    /// place so readers never observe a partial checkpoint.
    pub fn save(&self, dir: &Path, iteration: u64) -> Result<(), DatabaseError> {
        let staging = dir.with_extension("tmp");
        if staging.exists() {
            std::fs::remove_dir_all(&staging).map_err(|source| DatabaseError::Io {
                path: staging.clone(),
                source,
            })?;
        }
        std::fs::create_dir_all(&staging).map_err(|source| DatabaseError::Io {
            path: staging.clone(),
            source,
        })?;

        let programs: Vec<&Program> = self.programs().collect();
        let programs_json = serde_json::to_string_pretty(&programs)?;
        let programs_path = staging.join("programs.json");
        std::fs::write(&programs_path, programs_json).map_err(|source| DatabaseError::Io {
            path: programs_path,
            source,
        })?;

        let metadata = CheckpointMetadata {
            last_iteration: iteration,
            best_program_id: self.best_program_id().map(str::to_string),
            island_best_programs: self
                .islands()
                .iter()
                .map(|i| i.best_program_id.clone())
                .collect(),
            archive: self.archive().to_vec(),
            islands: self.islands().iter().map(|i| i.residents.clone()).collect(),
            island_generations: self.islands().iter().map(|i| i.generation).collect(),
            last_migration_generation: self.last_migration_generation(),
        };
        let metadata_path = staging.join("metadata.json");
        std::fs::write(&metadata_path, serde_json::to_string_pretty(&metadata)?).map_err(
            |source| DatabaseError::Io {
                path: metadata_path,
                source,
            },
        )?;

        if dir.exists() {
            std::fs::remove_dir_all(dir).map_err(|source| DatabaseError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        std::fs::rename(&staging, dir).map_err(|source| DatabaseError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        info!(dir = %dir.display(), iteration, "checkpoint saved");
        Ok(())
    }

    /// Restore a database from a checkpoint directory.
    pub fn load(dir: &Path, config: DatabaseConfig) -> Result<Self, DatabaseError> {
        let programs_path = dir.join("programs.json");
        if !programs_path.exists() {
            return Err(DatabaseError::CheckpointMissing(programs_path));
        }
        let metadata_path = dir.join("metadata.json");
        if !metadata_path.exists() {
            return Err(DatabaseError::CheckpointMissing(metadata_path));
        }

        let programs_raw =
            std::fs::read_to_string(&programs_path).map_err(|source| DatabaseError::Io {
                path: programs_path,
                source,
            })?;
        let programs: Vec<Program> = serde_json::from_str(&programs_raw)?;

        let metadata_raw =
            std::fs::read_to_string(&metadata_path).map_err(|source| DatabaseError::Io {
                path: metadata_path,
                source,
            })?;
        let metadata: CheckpointMetadata = serde_json::from_str(&metadata_raw)?;

        let mut db = ProgramDatabase::new(config);
        let island_count = db.num_islands().max(metadata.islands.len());
        let mut islands: Vec<Island> = (0..island_count).map(|_| Island::default()).collect();
        for (index, residents) in metadata.islands.iter().enumerate() {
            islands[index].residents = residents.clone();
        }
        for (index, generation) in metadata.island_generations.iter().enumerate() {
            if let Some(island) = islands.get_mut(index) {
                island.generation = *generation;
            }
        }
        for (index, best) in metadata.island_best_programs.iter().enumerate() {
            if let Some(island) = islands.get_mut(index) {
                island.best_program_id = best.clone();
            }
        }

        db.restore_state(
            programs,
            islands,
            metadata.archive,
            metadata.best_program_id,
            metadata.last_iteration,
            metadata.last_migration_generation,
        );
        info!(dir = %dir.display(), "checkpoint loaded");
        Ok(db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DatabaseConfig {
        DatabaseConfig {
            population_size: 50,
            archive_size: 5,
            num_islands: 2,
            feature_dimensions: vec!["complexity".to_string()],
            random_seed: Some(7),
            ..DatabaseConfig::default()
        }
    }

    fn program(code: &str, score: f64) -> Program {
        Program::new(code, "python").with_metric("combined_score", score)
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = dir.path().join("checkpoint_20");

        let mut db = ProgramDatabase::new(config());
        for i in 0..10u64 {
            db.add(
                program(&format!("code {}", i), i as f64 / 10.0),
                Some(i),
                Some((i % 2) as usize),
            );
        }
        db.increment_island_generation(0);
        db.save(&checkpoint, 20).unwrap();

        let restored = ProgramDatabase::load(&checkpoint, config()).unwrap();
        assert_eq!(restored.len(), db.len());
        assert_eq!(restored.best_program_id(), db.best_program_id());
        assert_eq!(restored.archive(), db.archive());
        assert_eq!(restored.last_iteration(), 20);
        for (a, b) in restored.islands().iter().zip(db.islands()) {
            assert_eq!(a.residents, b.residents);
            assert_eq!(a.generation, b.generation);
            assert_eq!(a.best_program_id, b.best_program_id);
        }
    }

    #[test]
    fn load_missing_programs_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ProgramDatabase::load(dir.path(), config()).unwrap_err();
        assert!(matches!(err, DatabaseError::CheckpointMissing(_)));
    }

    #[test]
    fn load_missing_metadata_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("programs.json"), "[]").unwrap();
        let err = ProgramDatabase::load(dir.path(), config()).unwrap_err();
        assert!(matches!(err, DatabaseError::CheckpointMissing(_)));
    }

    #[test]
    fn save_overwrites_existing_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = dir.path().join("checkpoint_10");

        let mut db = ProgramDatabase::new(config());
        db.add(program("first", 0.5), Some(1), Some(0));
        db.save(&checkpoint, 10).unwrap();
        db.add(program("second", 0.7), Some(2), Some(0));
        db.save(&checkpoint, 10).unwrap();

        let restored = ProgramDatabase::load(&checkpoint, config()).unwrap();
        assert_eq!(restored.len(), 2);
    }

    #[test]
    fn cells_rebuilt_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = dir.path().join("checkpoint_1");

        let mut db = ProgramDatabase::new(config());
        db.add(program("aaaa", 0.2), Some(0), Some(0));
        db.add(program("bbbb", 0.8), Some(1), Some(0));
        db.save(&checkpoint, 1).unwrap();

        let restored = ProgramDatabase::load(&checkpoint, config()).unwrap();
        let island = restored.island(0).unwrap();
        assert!(!island.cells.is_empty());
        for occupant in island.cells.values() {
            assert!(island.contains(occupant));
        }
    }
}
