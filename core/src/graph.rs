//! The Task Graph. Tasks are stored in an arena and
//! referenced by integer indices internally; the parent/subtask
//! back-references would otherwise form reference cycles if tasks held
//! `Rc`/pointers to each other directly.

use std::collections::{HashMap, HashSet};

use crate::error::{MarcusError, Result};
use crate::models::{Task, TaskId, TaskStatus};

type Slot = usize;

/// Owns every task known to the kernel for a single project and the edges
/// between them. Dependency edges are stored by id and resolved through
/// `index` on every traversal; this keeps the arena append-only-friendly
/// and avoids invalidating indices when a task is replaced in place.
#[derive(Debug, Default)]
pub struct TaskGraph {
    arena: Vec<Option<Task>>,
    index: HashMap<TaskId, Slot>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new task or replace an existing one with the same id.
    /// Returns an error if the task's `dependencies` reference an id not
    /// already present in the graph, or if inserting would create a cycle.
    pub fn upsert(&mut self, task: Task) -> Result<()> {
        for dep in &task.dependencies {
            if !self.index.contains_key(dep) {
                return Err(MarcusError::GraphInvariantError(format!(
                    "task {} depends on unknown task {}",
                    task.id, dep
                )));
            }
        }

        let (slot, previous) = match self.index.get(&task.id) {
            Some(&slot) => (slot, self.arena[slot].take()),
            None => {
                let slot = self.arena.len();
                self.arena.push(None);
                self.index.insert(task.id.clone(), slot);
                (slot, None)
            }
        };
        self.arena[slot] = Some(task);

        if self.has_cycle_from(slot) {
            // Roll back: a cycle-creating upsert never commits.
            match previous {
                Some(previous) => self.arena[slot] = Some(previous),
                None => {
                    let id = self.arena[slot].take().map(|t| t.id);
                    if let Some(id) = id {
                        self.index.remove(&id);
                    }
                }
            }
            return Err(MarcusError::GraphInvariantError(
                "upsert would create a dependency cycle".into(),
            ));
        }

        Ok(())
    }

    pub fn remove(&mut self, id: &TaskId) -> Option<Task> {
        let slot = self.index.remove(id)?;
        self.arena[slot].take()
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        let slot = *self.index.get(id)?;
        self.arena[slot].as_ref()
    }

    pub fn get_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        let slot = *self.index.get(id)?;
        self.arena[slot].as_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.arena.iter().filter_map(|slot| slot.as_ref())
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Tasks not yet `Done` whose every dependency is `Done`.
    pub fn iter_ready(&self) -> impl Iterator<Item = &Task> {
        self.iter().filter(move |task| {
            task.status != TaskStatus::Done
                && task.dependencies.iter().all(|dep| {
                    self.get(dep).map(|t| t.status == TaskStatus::Done).unwrap_or(false)
                })
        })
    }

    /// The direct dependencies of `id`, i.e. tasks that must complete
    /// before it can start.
    pub fn predecessors(&self, id: &TaskId) -> Vec<&Task> {
        match self.get(id) {
            Some(task) => task.dependencies.iter().filter_map(|dep| self.get(dep)).collect(),
            None => Vec::new(),
        }
    }

    /// Tasks that directly depend on `id`.
    pub fn successors(&self, id: &TaskId) -> Vec<&Task> {
        self.iter().filter(|task| task.dependencies.iter().any(|dep| dep == id)).collect()
    }

    /// Verify the whole graph: every dependency edge resolves, the
    /// dependency relation is acyclic, no subtask's parent is itself a
    /// subtask, and no two siblings share a `subtask_index`.
    pub fn validate(&self) -> Result<()> {
        for task in self.iter() {
            for dep in &task.dependencies {
                if !self.index.contains_key(dep) {
                    return Err(MarcusError::GraphInvariantError(format!(
                        "task {} depends on unknown task {}",
                        task.id, dep
                    )));
                }
            }
        }
        for &slot in self.index.values() {
            if self.has_cycle_from(slot) {
                return Err(MarcusError::GraphInvariantError(
                    "dependency graph contains a cycle".into(),
                ));
            }
        }

        let mut sibling_indices: HashMap<&TaskId, HashSet<u32>> = HashMap::new();
        for task in self.iter() {
            if !task.is_subtask {
                continue;
            }
            let Some(parent_id) = &task.parent_task_id else { continue };
            if let Some(parent) = self.get(parent_id) {
                if parent.is_subtask {
                    return Err(MarcusError::GraphInvariantError(format!(
                        "subtask {} has a subtask ({}) as its parent",
                        task.id, parent_id
                    )));
                }
            }
            if let Some(index) = task.subtask_index {
                if !sibling_indices.entry(parent_id).or_default().insert(index) {
                    return Err(MarcusError::GraphInvariantError(format!(
                        "subtask {} collides with a sibling on subtask_index {} under parent {}",
                        task.id, index, parent_id
                    )));
                }
            }
        }

        Ok(())
    }

    fn has_cycle_from(&self, start: Slot) -> bool {
        let mut visiting = vec![false; self.arena.len()];
        let mut visited = vec![false; self.arena.len()];
        self.dfs_cycle(start, &mut visiting, &mut visited)
    }

    fn dfs_cycle(&self, slot: Slot, visiting: &mut [bool], visited: &mut [bool]) -> bool {
        if visiting[slot] {
            return true;
        }
        if visited[slot] {
            return false;
        }
        visiting[slot] = true;
        if let Some(task) = &self.arena[slot] {
            for dep in &task.dependencies {
                if let Some(&dep_slot) = self.index.get(dep) {
                    if self.dfs_cycle(dep_slot, visiting, visited) {
                        return true;
                    }
                }
            }
        }
        visiting[slot] = false;
        visited[slot] = true;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn task(id: &str, deps: &[&str]) -> Task {
        Task {
            id: id.into(),
            name: id.into(),
            description: String::new(),
            status: TaskStatus::Todo,
            priority: crate::models::Priority::Medium,
            estimated_hours: 1.0,
            actual_hours: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            done_at: None,
            due_date: None,
            labels: BTreeSet::new(),
            project_id: "P".into(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            is_subtask: false,
            parent_task_id: None,
            subtask_index: None,
            provides: None,
            requires: None,
            assigned_to: None,
            board_sync_pending: false,
        }
    }

    #[test]
    fn ready_excludes_tasks_with_unfinished_dependencies() {
        let mut graph = TaskGraph::new();
        graph.upsert(task("a", &[])).unwrap();
        graph.upsert(task("b", &["a"])).unwrap();

        let ready: Vec<&str> = graph.iter_ready().map(|t| t.id.as_str()).collect();
        assert_eq!(ready, vec!["a"]);

        graph.get_mut(&"a".to_string()).unwrap().status = TaskStatus::Done;
        let ready: Vec<&str> = graph.iter_ready().map(|t| t.id.as_str()).collect();
        assert_eq!(ready, vec!["b"]);
    }

    #[test]
    fn upsert_rejects_unknown_dependency() {
        let mut graph = TaskGraph::new();
        let err = graph.upsert(task("b", &["a"])).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::BusinessLogic);
    }

    #[test]
    fn upsert_rejects_cycle() {
        let mut graph = TaskGraph::new();
        graph.upsert(task("a", &[])).unwrap();
        graph.upsert(task("b", &["a"])).unwrap();
        // Replace "a" so it depends on "b", closing the cycle a -> b -> a.
        let err = graph.upsert(task("a", &["b"])).unwrap_err();
        assert!(err.to_string().contains("cycle"));
        // The rejected upsert must not have left the graph mutated.
        assert!(graph.get(&"a".to_string()).unwrap().dependencies.is_empty());
    }

    #[test]
    fn validate_rejects_subtask_whose_parent_is_itself_a_subtask() {
        let mut graph = TaskGraph::new();
        graph.upsert(task("parent", &[])).unwrap();

        let mut grandchild_host = task("mid", &[]);
        grandchild_host.is_subtask = true;
        grandchild_host.parent_task_id = Some("parent".into());
        grandchild_host.subtask_index = Some(0);
        graph.upsert(grandchild_host).unwrap();

        let mut grandchild = task("leaf", &[]);
        grandchild.is_subtask = true;
        grandchild.parent_task_id = Some("mid".into());
        grandchild.subtask_index = Some(0);
        graph.upsert(grandchild).unwrap();

        let err = graph.validate().unwrap_err();
        assert!(err.to_string().contains("subtask") || err.to_string().contains("invariant"));
    }

    #[test]
    fn validate_rejects_colliding_sibling_subtask_indices() {
        let mut graph = TaskGraph::new();
        graph.upsert(task("parent", &[])).unwrap();

        let mut child_a = task("a", &[]);
        child_a.is_subtask = true;
        child_a.parent_task_id = Some("parent".into());
        child_a.subtask_index = Some(0);
        graph.upsert(child_a).unwrap();

        let mut child_b = task("b", &[]);
        child_b.is_subtask = true;
        child_b.parent_task_id = Some("parent".into());
        child_b.subtask_index = Some(0);
        graph.upsert(child_b).unwrap();

        assert!(graph.validate().is_err());
    }

    #[test]
    fn successors_reports_dependents() {
        let mut graph = TaskGraph::new();
        graph.upsert(task("a", &[])).unwrap();
        graph.upsert(task("b", &["a"])).unwrap();
        graph.upsert(task("c", &["a"])).unwrap();
        let mut ids: Vec<&str> = graph.successors(&"a".to_string()).iter().map(|t| t.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["b", "c"]);
    }
}
