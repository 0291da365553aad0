//! Task DAG: the planner's output and the unit the scheduler dispatches.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::workflow::review::ReviewVerdict;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub dependencies: Vec<String>,
    pub status: TaskStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub result: Option<String>,
    pub review: Option<ReviewVerdict>,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        dependencies: Vec<String>,
        max_attempts: u32,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            dependencies,
            status: TaskStatus::Pending,
            attempts: 0,
            max_attempts,
            result: None,
            review: None,
        }
    }
}

/// Set of tasks with the acyclicity invariant on `dependencies`. Produced
/// once by the planner; only status/attempt/result fields change afterward.
#[derive(Debug, Clone)]
pub struct TaskDAG {
    tasks: HashMap<String, Task>,
    /// Insertion order, preserved so reports list tasks the way the plan
    /// named them rather than in hash-map order.
    order: Vec<String>,
}

impl TaskDAG {
    pub fn new(tasks: Vec<Task>) -> Result<Self> {
        let mut map = HashMap::new();
        let mut order = Vec::with_capacity(tasks.len());
        for task in tasks {
            if map.contains_key(&task.id) {
                return Err(Error::validation(format!("duplicate task id: {}", task.id)));
            }
            order.push(task.id.clone());
            map.insert(task.id.clone(), task);
        }
        for task in map.values() {
            for dep in &task.dependencies {
                if !map.contains_key(dep) {
                    return Err(Error::validation(format!(
                        "task {} depends on unknown task {}",
                        task.id, dep
                    )));
                }
            }
        }
        let dag = Self { tasks: map, order };
        dag.check_acyclic()?;
        Ok(dag)
    }

    /// A single task standing in for a plan the planner couldn't produce.
    pub fn trivial(requirement: &str) -> Self {
        let task = Task::new("t1", "Complete the requirement", requirement, vec![], 1);
        Self::new(vec![task]).expect("a single dependency-free task is always a valid DAG")
    }

    fn check_acyclic(&self) -> Result<()> {
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        for task in self.tasks.values() {
            in_degree.insert(task.id.as_str(), task.dependencies.len());
        }
        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|&(_, &deg)| deg == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0;
        let mut remaining = in_degree.clone();
        while let Some(id) = queue.pop_front() {
            visited += 1;
            for task in self.tasks.values() {
                if task.dependencies.iter().any(|d| d == id) {
                    let entry = remaining.get_mut(task.id.as_str()).unwrap();
                    *entry -= 1;
                    if *entry == 0 {
                        queue.push_back(task.id.as_str());
                    }
                }
            }
        }
        if visited != self.tasks.len() {
            return Err(Error::validation("task dependency graph contains a cycle"));
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    pub fn ids_in_order(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn initial_ready_set(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| self.tasks[*id].dependencies.is_empty())
            .cloned()
            .collect()
    }

    pub fn all_terminal(&self) -> bool {
        self.tasks.values().all(|t| {
            matches!(
                t.status,
                TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
            )
        })
    }

    /// Dependents of `id` whose dependencies are now all completed, given
    /// `id` just transitioned to `Completed`.
    pub fn newly_ready_after_completion(&self, id: &str) -> Vec<String> {
        self.order
            .iter()
            .filter(|candidate| {
                let task = &self.tasks[*candidate];
                task.status == TaskStatus::Pending
                    && task.dependencies.iter().any(|d| d == id)
                    && task
                        .dependencies
                        .iter()
                        .all(|d| self.tasks[d].status == TaskStatus::Completed)
            })
            .cloned()
            .collect()
    }

    /// Every task transitively depending on `id`, direct or indirect.
    pub fn transitive_dependents(&self, id: &str) -> Vec<String> {
        let mut result = HashSet::new();
        let mut frontier = vec![id.to_string()];
        while let Some(current) = frontier.pop() {
            for task in self.tasks.values() {
                if task.dependencies.iter().any(|d| d == &current) && result.insert(task.id.clone()) {
                    frontier.push(task.id.clone());
                }
            }
        }
        result.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trivial_dag_is_valid() {
        let dag = TaskDAG::trivial("build a thing");
        assert_eq!(dag.len(), 1);
        assert_eq!(dag.initial_ready_set(), vec!["t1".to_string()]);
    }

    #[test]
    fn test_rejects_unknown_dependency() {
        let task = Task::new("t2", "second", "desc", vec!["t1".to_string()], 3);
        assert!(TaskDAG::new(vec![task]).is_err());
    }

    #[test]
    fn test_rejects_cycle() {
        let t1 = Task::new("t1", "a", "d", vec!["t2".to_string()], 3);
        let t2 = Task::new("t2", "b", "d", vec!["t1".to_string()], 3);
        assert!(TaskDAG::new(vec![t1, t2]).is_err());
    }

    #[test]
    fn test_two_task_chain_ready_propagation() {
        let t1 = Task::new("t1", "a", "d", vec![], 3);
        let t2 = Task::new("t2", "b", "d", vec!["t1".to_string()], 3);
        let mut dag = TaskDAG::new(vec![t1, t2]).unwrap();
        assert_eq!(dag.initial_ready_set(), vec!["t1".to_string()]);
        dag.get_mut("t1").unwrap().status = TaskStatus::Completed;
        assert_eq!(dag.newly_ready_after_completion("t1"), vec!["t2".to_string()]);
    }

    #[test]
    fn test_transitive_dependents() {
        let t1 = Task::new("t1", "a", "d", vec![], 3);
        let t2 = Task::new("t2", "b", "d", vec!["t1".to_string()], 3);
        let t3 = Task::new("t3", "c", "d", vec!["t2".to_string()], 3);
        let dag = TaskDAG::new(vec![t1, t2, t3]).unwrap();
        let mut dependents = dag.transitive_dependents("t1");
        dependents.sort();
        assert_eq!(dependents, vec!["t2".to_string(), "t3".to_string()]);
    }
}
