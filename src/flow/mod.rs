//! Conversation flow graph.
//!
//! A flow is a directed graph of named [`Stage`]s between the virtual
//! [`START`] and [`END`] nodes. The default flow has a single inference stage:
//!
//! ```text
//! START -> infer -> END
//! ```
//!
//! Flows are assembled with [`FlowBuilder`] and validated by
//! [`FlowBuilder::compile`] into a [`CompiledFlow`], which runs the stages in
//! path order. Each stage sees the full working sequence and returns the
//! messages it adds to it.

mod controller;

pub use controller::{ConversationFlow, History, TurnOutcome};

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::Direction;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, EdgeRef};

use crate::error::{OracleError, Result};
use crate::llm::{ChatNode, Message};

/// Name of the entry node.
pub const START: &str = "__start__";
/// Name of the exit node.
pub const END: &str = "__end__";
/// Name of the inference stage in the default flow.
pub const INFER_STAGE: &str = "infer";

/// One step of a conversation flow.
#[async_trait::async_trait]
pub trait Stage: Send + Sync + std::fmt::Debug {
    /// Produce the messages to append after `messages`.
    async fn run(&self, messages: &[Message]) -> Result<Vec<Message>>;
}

/// Stage that asks the chat node for the next assistant message.
#[derive(Debug, Clone)]
pub struct InferStage {
    node: Arc<ChatNode>,
}

impl InferStage {
    #[must_use]
    pub fn new(node: Arc<ChatNode>) -> Self {
        Self { node }
    }
}

#[async_trait::async_trait]
impl Stage for InferStage {
    async fn run(&self, messages: &[Message]) -> Result<Vec<Message>> {
        let reply = self.node.get_response(messages).await?;
        Ok(vec![reply])
    }
}

#[derive(Debug, Clone)]
enum FlowNode {
    Start,
    End,
    Stage { name: String, stage: Arc<dyn Stage> },
}

impl FlowNode {
    fn name(&self) -> &str {
        match self {
            Self::Start => START,
            Self::End => END,
            Self::Stage { name, .. } => name,
        }
    }
}

/// Builder for a [`CompiledFlow`].
///
/// Structural problems are collected and reported together by
/// [`FlowBuilder::compile`].
#[derive(Debug)]
pub struct FlowBuilder {
    graph: DiGraph<FlowNode, ()>,
    nodes: HashMap<String, NodeIndex>,
    edges: Vec<(String, String)>,
    problems: Vec<String>,
}

impl Default for FlowBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowBuilder {
    #[must_use]
    pub fn new() -> Self {
        let mut graph = DiGraph::new();
        let mut nodes = HashMap::new();
        nodes.insert(START.to_string(), graph.add_node(FlowNode::Start));
        nodes.insert(END.to_string(), graph.add_node(FlowNode::End));
        Self {
            graph,
            nodes,
            edges: Vec::new(),
            problems: Vec::new(),
        }
    }

    /// Register a stage under `name`.
    #[must_use]
    pub fn add_stage(mut self, name: impl Into<String>, stage: impl Stage + 'static) -> Self {
        let name = name.into();
        if name.trim().is_empty() {
            self.problems.push("stage name must not be empty".to_string());
            return self;
        }
        if self.nodes.contains_key(&name) {
            self.problems.push(format!("duplicate node '{name}'"));
            return self;
        }

        let index = self.graph.add_node(FlowNode::Stage {
            name: name.clone(),
            stage: Arc::new(stage),
        });
        self.nodes.insert(name, index);
        self
    }

    /// Connect `from` to `to`. Both ends are resolved at compile time.
    #[must_use]
    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push((from.into(), to.into()));
        self
    }

    /// Validate the graph and fix the execution order.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError::InvalidFlow`] when a node is unknown or
    /// duplicated, a node other than [`END`] lacks exactly one outgoing edge,
    /// [`END`] has an outgoing edge, the graph has a cycle, or a stage is
    /// unreachable from [`START`].
    pub fn compile(mut self) -> Result<CompiledFlow> {
        for (from, to) in std::mem::take(&mut self.edges) {
            match (self.nodes.get(&from), self.nodes.get(&to)) {
                (Some(&a), Some(&b)) => {
                    self.graph.add_edge(a, b, ());
                }
                (None, _) => self.problems.push(format!("edge from unknown node '{from}'")),
                (_, None) => self.problems.push(format!("edge to unknown node '{to}'")),
            }
        }

        for index in self.graph.node_indices() {
            let node = &self.graph[index];
            let outgoing = self.graph.edges_directed(index, Direction::Outgoing).count();
            match node {
                FlowNode::End if outgoing > 0 => {
                    self.problems.push(format!("'{END}' must not have outgoing edges"));
                }
                FlowNode::End => {}
                _ if outgoing != 1 => self.problems.push(format!(
                    "node '{}' has {outgoing} outgoing edges, expected 1",
                    node.name()
                )),
                _ => {}
            }
        }

        if is_cyclic_directed(&self.graph) {
            self.problems.push("flow contains a cycle".to_string());
        }

        let start = self.nodes[START];
        let mut reachable = Vec::new();
        let mut dfs = Dfs::new(&self.graph, start);
        while let Some(index) = dfs.next(&self.graph) {
            reachable.push(index);
        }
        for index in self.graph.node_indices() {
            if !reachable.contains(&index) {
                self.problems.push(format!(
                    "node '{}' is unreachable from '{START}'",
                    self.graph[index].name()
                ));
            }
        }

        if !self.problems.is_empty() {
            return Err(OracleError::InvalidFlow(self.problems.join("; ")));
        }

        // Every node but END has exactly one successor and there are no
        // cycles, so following successors from START ends at END.
        let mut steps = Vec::new();
        let mut current = start;
        while let Some(edge) = self.graph.edges_directed(current, Direction::Outgoing).next() {
            current = edge.target();
            if let FlowNode::Stage { name, stage } = &self.graph[current] {
                steps.push((name.clone(), Arc::clone(stage)));
            }
        }

        Ok(CompiledFlow { steps })
    }
}

/// A validated flow, ready to run.
#[derive(Debug, Clone)]
pub struct CompiledFlow {
    steps: Vec<(String, Arc<dyn Stage>)>,
}

impl CompiledFlow {
    /// The default `START -> infer -> END` flow around `node`.
    pub fn single_inference(node: Arc<ChatNode>) -> Result<Self> {
        FlowBuilder::new()
            .add_stage(INFER_STAGE, InferStage::new(node))
            .add_edge(START, INFER_STAGE)
            .add_edge(INFER_STAGE, END)
            .compile()
    }

    /// Stage names in execution order.
    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|(name, _)| name.as_str())
    }

    /// Run every stage over `messages` and return what they added, in order.
    ///
    /// The input is not modified.
    pub async fn execute(&self, messages: &[Message]) -> Result<Vec<Message>> {
        let mut working = messages.to_vec();
        let produced_from = working.len();

        for (name, stage) in &self.steps {
            let added = stage.run(&working).await?;
            tracing::debug!(stage = %name, added = added.len(), "Flow stage completed");
            working.extend(added);
        }

        Ok(working.split_off(produced_from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Fixed(&'static str);

    #[async_trait::async_trait]
    impl Stage for Fixed {
        async fn run(&self, _messages: &[Message]) -> Result<Vec<Message>> {
            Ok(vec![Message::assistant(self.0)])
        }
    }

    #[derive(Debug)]
    struct CountSeen;

    #[async_trait::async_trait]
    impl Stage for CountSeen {
        async fn run(&self, messages: &[Message]) -> Result<Vec<Message>> {
            Ok(vec![Message::system(messages.len().to_string())])
        }
    }

    fn invalid_reason(result: Result<CompiledFlow>) -> String {
        match result {
            Err(OracleError::InvalidFlow(reason)) => reason,
            other => panic!("expected InvalidFlow, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stages_run_in_path_order() {
        let flow = FlowBuilder::new()
            .add_stage("second", CountSeen)
            .add_stage("first", Fixed("a"))
            .add_edge(START, "first")
            .add_edge("first", "second")
            .add_edge("second", END)
            .compile()
            .unwrap();

        assert_eq!(flow.stage_names().collect::<Vec<_>>(), vec!["first", "second"]);

        let input = vec![Message::user("hi")];
        let added = flow.execute(&input).await.unwrap();
        assert_eq!(added, vec![Message::assistant("a"), Message::system("2")]);
        assert_eq!(input.len(), 1);
    }

    #[test]
    fn test_missing_edge_to_end() {
        let reason = invalid_reason(
            FlowBuilder::new()
                .add_stage("infer", Fixed("a"))
                .add_edge(START, "infer")
                .compile(),
        );
        assert!(reason.contains("'infer' has 0 outgoing edges"), "{reason}");
    }

    #[test]
    fn test_unknown_and_duplicate_nodes() {
        let reason = invalid_reason(
            FlowBuilder::new()
                .add_stage("infer", Fixed("a"))
                .add_stage("infer", Fixed("b"))
                .add_edge(START, "infer")
                .add_edge("infer", "missing")
                .compile(),
        );
        assert!(reason.contains("duplicate node 'infer'"), "{reason}");
        assert!(reason.contains("unknown node 'missing'"), "{reason}");
    }

    #[test]
    fn test_cycle_rejected() {
        let reason = invalid_reason(
            FlowBuilder::new()
                .add_stage("a", Fixed("a"))
                .add_stage("b", Fixed("b"))
                .add_edge(START, "a")
                .add_edge("a", "b")
                .add_edge("b", "a")
                .compile(),
        );
        assert!(reason.contains("cycle"), "{reason}");
    }

    #[test]
    fn test_unreachable_stage() {
        let reason = invalid_reason(
            FlowBuilder::new()
                .add_stage("a", Fixed("a"))
                .add_stage("orphan", Fixed("b"))
                .add_edge(START, "a")
                .add_edge("a", END)
                .add_edge("orphan", END)
                .compile(),
        );
        assert!(reason.contains("'orphan' is unreachable"), "{reason}");
    }
}
