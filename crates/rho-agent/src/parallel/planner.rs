//! Goal decomposition into a manifest

use async_trait::async_trait;
use futures::StreamExt;
use rho_ai::{Message, Model, TurnEvent};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::lane::{Manifest, ManifestNode};
use crate::error::{Error, Result};
use crate::transport::Transport;

/// Turns one goal into a manifest of subtasks
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, goal: &str, cancel: CancellationToken) -> Result<Manifest>;
}

/// Planner with a fixed list of subtasks
pub struct StaticPlanner {
    nodes: Vec<ManifestNode>,
}

impl StaticPlanner {
    pub fn new(nodes: Vec<ManifestNode>) -> Self {
        Self { nodes }
    }
}

#[async_trait]
impl Planner for StaticPlanner {
    async fn plan(&self, goal: &str, _cancel: CancellationToken) -> Result<Manifest> {
        if self.nodes.is_empty() {
            return Err(Error::Orchestration("manifest has no subtasks".into()));
        }
        Ok(Manifest::new(goal, self.nodes.clone()))
    }
}

const PLANNER_PROMPT: &str = "Split the user's goal into independent subtasks that can be worked on \
in parallel without editing the same files. Reply with only a JSON array. Each element is an \
object with \"description\" (string) and \"files\" (array of workspace-relative paths or \
directories the subtask may change).";

/// Asks a model for the decomposition
pub struct ModelPlanner {
    transport: Arc<dyn Transport>,
    model: Model,
    max_nodes: usize,
}

impl ModelPlanner {
    pub fn new(transport: Arc<dyn Transport>, model: Model) -> Self {
        Self {
            transport,
            model,
            max_nodes: 8,
        }
    }
}

#[async_trait]
impl Planner for ModelPlanner {
    async fn plan(&self, goal: &str, cancel: CancellationToken) -> Result<Manifest> {
        let history = vec![Message::system(PLANNER_PROMPT), Message::user(goal)];
        let mut stream = self
            .transport
            .continue_turn(history, vec![], &self.model, cancel)
            .await?;

        let mut reply = None;
        while let Some(event) = stream.next().await {
            match event {
                TurnEvent::Done { final_text, .. } => reply = Some(final_text),
                TurnEvent::Error { message, class } => {
                    return Err(Error::Orchestration(format!(
                        "planner turn failed ({class}): {message}"
                    )));
                }
                _ => {}
            }
        }
        let reply = reply.ok_or_else(|| Error::Orchestration("planner turn ended without a reply".into()))?;

        let mut nodes = match parse_plan(&reply) {
            Some(nodes) if !nodes.is_empty() => nodes,
            _ => {
                tracing::warn!("Planner reply was not a subtask list, running the goal as one lane");
                vec![ManifestNode::new("node-1", goal)]
            }
        };
        nodes.truncate(self.max_nodes);
        Ok(Manifest::new(goal, nodes))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PlannedTask {
    Text(String),
    Object {
        description: String,
        #[serde(default, alias = "file_scope", alias = "fileScope")]
        files: Vec<String>,
    },
}

/// Extract the first JSON array in `reply` as manifest nodes
pub fn parse_plan(reply: &str) -> Option<Vec<ManifestNode>> {
    let start = reply.find('[')?;
    let end = reply.rfind(']')?;
    if end <= start {
        return None;
    }
    let tasks: Vec<PlannedTask> = serde_json::from_str(&reply[start..=end]).ok()?;
    Some(
        tasks
            .into_iter()
            .map(|t| match t {
                PlannedTask::Text(d) => (d, vec![]),
                PlannedTask::Object { description, files } => (description, files),
            })
            .filter(|(d, _)| !d.trim().is_empty())
            .enumerate()
            .map(|(i, (d, files))| ManifestNode::new(format!("node-{}", i + 1), d.trim()).with_scope(files))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_objects_inside_prose() {
        let reply = r#"Here is the plan:
```json
[{"description": "Add the API route", "files": ["src/api"]},
 {"description": "Add the page", "files": ["src/ui/page.tsx"]}]
```"#;
        let nodes = parse_plan(reply).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].id, "node-1");
        assert_eq!(nodes[0].file_scope, vec!["src/api"]);
        assert_eq!(nodes[1].description, "Add the page");
    }

    #[test]
    fn test_parse_plain_strings() {
        let nodes = parse_plan(r#"["write tests", "  ", "fix lint"]"#).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].id, "node-2");
        assert!(nodes[1].file_scope.is_empty());
    }

    #[test]
    fn test_parse_rejects_non_arrays() {
        assert!(parse_plan("no plan here").is_none());
        assert!(parse_plan("] backwards [").is_none());
    }

    #[tokio::test]
    async fn test_static_planner_requires_nodes() {
        let planner = StaticPlanner::new(vec![]);
        assert!(planner.plan("goal", CancellationToken::new()).await.is_err());
    }
}
