//! Externally supplied task/subtask/detail breakdown.
//!
//! The tree is stored as an arena: node 0 is the root task, every other node
//! points at its parent by index, and siblings keep the order they arrived in.
//! The scheduling core only ever sees the Pomodoro task derived from the root.

use crate::domain::models::{NewTask, Priority, Task};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Task,
    Subtask,
    Detail,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecompositionNode {
    pub kind: NodeKind,
    pub text: String,
    pub parent: Option<usize>,
    pub is_completed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecompositionTree {
    pub id: String,
    nodes: Vec<DecompositionNode>,
}

#[derive(Debug, Deserialize)]
struct RawTask {
    name: String,
    #[serde(default)]
    subtasks: Vec<RawSubtask>,
}

#[derive(Debug, Deserialize)]
struct RawSubtask {
    name: String,
    #[serde(default)]
    details: Vec<RawDetail>,
}

#[derive(Debug, Deserialize)]
struct RawDetail {
    desc: String,
}

impl DecompositionTree {
    pub fn from_json(id: impl Into<String>, raw: &str) -> Result<Self, String> {
        let parsed: RawTask = serde_json::from_str(raw)
            .map_err(|error| format!("invalid decomposition payload: {error}"))?;
        let name = parsed.name.trim();
        if name.is_empty() {
            return Err("decomposition name must not be empty".to_string());
        }

        let mut nodes = vec![DecompositionNode {
            kind: NodeKind::Task,
            text: name.to_string(),
            parent: None,
            is_completed: false,
        }];
        for subtask in parsed.subtasks {
            let subtask_index = nodes.len();
            nodes.push(DecompositionNode {
                kind: NodeKind::Subtask,
                text: subtask.name.trim().to_string(),
                parent: Some(0),
                is_completed: false,
            });
            for detail in subtask.details {
                nodes.push(DecompositionNode {
                    kind: NodeKind::Detail,
                    text: detail.desc.trim().to_string(),
                    parent: Some(subtask_index),
                    is_completed: false,
                });
            }
        }

        Ok(Self {
            id: id.into(),
            nodes,
        })
    }

    pub fn name(&self) -> &str {
        self.nodes
            .first()
            .map(|node| node.text.as_str())
            .unwrap_or_default()
    }

    pub fn node(&self, index: usize) -> Option<&DecompositionNode> {
        self.nodes.get(index)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Indices of the direct children of `parent`, in arrival order.
    pub fn children(&self, parent: usize) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.parent == Some(parent))
            .map(|(index, _)| index)
            .collect()
    }

    pub fn set_completed(&mut self, index: usize, completed: bool) -> Result<(), String> {
        let node = self
            .nodes
            .get_mut(index)
            .ok_or_else(|| format!("no decomposition node at index {index}"))?;
        if node.kind != NodeKind::Detail {
            return Err("only details can be checked off".to_string());
        }
        node.is_completed = completed;
        Ok(())
    }

    /// The root becomes a medium-priority Pomodoro task linked back by group id.
    pub fn to_pomodoro_task(
        &self,
        task_id: String,
        work_seconds: u32,
        now: DateTime<Utc>,
    ) -> Result<Task, String> {
        Task::from_new(
            task_id,
            NewTask {
                name: self.name().to_string(),
                duration_seconds: work_seconds,
                priority: Some(Priority::Medium),
                is_pomodoro: true,
                group_id: Some(self.id.clone()),
                ..NewTask::default()
            },
            now,
        )
    }
}
