use std::collections::HashMap;

/// One subpopulation: a resident set, a MAP-Elites cell map, a
/// generation counter, and the island-best program.
///
/// Invariants: cell-map values are a subset of the resident set, each
/// cell holds exactly one program, and the island best is the
/// maximum-fitness resident.
#[derive(Clone, Debug, Default)]
pub struct Island {
    /// Program ids resident on this island, in insertion order.
    pub residents: Vec<String>,
    /// Feature-coordinate key → best resident program for that cell.
    pub cells: HashMap<String, String>,
    pub generation: u64,
    pub best_program_id: Option<String>,
}

impl Island {
    pub fn add_resident(&mut self, id: &str) {
        if !self.residents.iter().any(|r| r == id) {
            self.residents.push(id.to_string());
        }
    }

    pub fn remove_resident(&mut self, id: &str) {
        self.residents.retain(|r| r != id);
        self.cells.retain(|_, occupant| occupant != id);
        if self.best_program_id.as_deref() == Some(id) {
            self.best_program_id = None;
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.residents.iter().any(|r| r == id)
    }

    pub fn is_empty(&self) -> bool {
        self.residents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_resident_is_idempotent() {
        let mut island = Island::default();
        island.add_resident("a");
        island.add_resident("a");
        assert_eq!(island.residents.len(), 1);
    }

    #[test]
    fn remove_clears_cells_and_best() {
        let mut island = Island::default();
        island.add_resident("a");
        island.cells.insert("0-0".into(), "a".into());
        island.best_program_id = Some("a".into());
        island.remove_resident("a");
        assert!(island.is_empty());
        assert!(island.cells.is_empty());
        assert!(island.best_program_id.is_none());
    }
}
