//! Parallel lane orchestration
//!
//! One goal is planned into a manifest, each node gets a lane, and lanes run
//! concurrently up to `max_parallel_lanes`. A lane alternates worker and
//! verifier passes until it is verified or reaches its failure ceiling, and a
//! verified lane merges by claiming the files it touched. Lanes share one
//! workspace, so a lane whose files were already claimed ends in
//! `MERGE_CONFLICT`.

use parking_lot::Mutex;
use rho_ai::{Model, Usage};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::events::{OrchestrationSummary, OrchestratorEvent};
use super::lane::{Lane, LaneStatus, Manifest, ManifestNode};
use super::planner::Planner;
use super::scope::ScopedBackend;
use super::verifier::{Verifier, VerifyRequest};
use crate::agent::{Agent, AgentConfig};
use crate::error::{Error, Result};
use crate::tool::BoxedBackend;
use crate::transport::Transport;

/// Limits for a parallel run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelConfig {
    pub max_parallel_lanes: usize,
    /// Failed or rejected attempts after which a lane escalates and stops
    pub lane_failure_ceiling: u32,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            max_parallel_lanes: 4,
            lane_failure_ceiling: 2,
        }
    }
}

/// Drives lanes for one goal at a time
pub struct Orchestrator {
    config: ParallelConfig,
    worker: AgentConfig,
    transport: Arc<dyn Transport>,
    tools: BoxedBackend,
    planner: Arc<dyn Planner>,
    verifier: Arc<dyn Verifier>,
    verifier_model: Option<Model>,
    event_tx: broadcast::Sender<OrchestratorEvent>,
}

impl Orchestrator {
    pub fn new(
        config: ParallelConfig,
        worker: AgentConfig,
        transport: Arc<dyn Transport>,
        tools: BoxedBackend,
        planner: Arc<dyn Planner>,
        verifier: Arc<dyn Verifier>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            worker,
            transport,
            tools,
            planner,
            verifier,
            verifier_model: None,
            event_tx,
        }
    }

    /// Price verifier usage with this model instead of the worker's
    pub fn with_verifier_model(mut self, model: Model) -> Self {
        self.verifier_model = Some(model);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: OrchestratorEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Plan `goal` and run every lane to a final state. Planning failures
    /// are reported as `orchestration_error` and returned as errors; lane
    /// failures only show up in the summary.
    pub async fn run(&self, goal: &str, cancel: CancellationToken) -> Result<OrchestrationSummary> {
        let started = Instant::now();

        let manifest = match self.planner.plan(goal, cancel.clone()).await {
            Ok(manifest) if !manifest.nodes.is_empty() => manifest,
            Ok(_) => return Err(self.fail("planner produced no subtasks".into())),
            Err(e) => return Err(self.fail(format!("planning failed: {e}"))),
        };
        tracing::info!(manifest = %manifest.id, lanes = manifest.nodes.len(), "Manifest created");
        self.emit(OrchestratorEvent::ManifestCreated {
            manifest: manifest.clone(),
        });

        let ctx = LaneContext {
            goal: manifest.goal.clone(),
            worker: self.worker.clone(),
            transport: Arc::clone(&self.transport),
            tools: Arc::clone(&self.tools),
            verifier: Arc::clone(&self.verifier),
            ceiling: self.config.lane_failure_ceiling.max(1),
            claims: Arc::new(Mutex::new(HashMap::new())),
            latest: Arc::new(Mutex::new(HashMap::new())),
            events: self.event_tx.clone(),
        };

        let mut lanes: Vec<Lane> = manifest
            .nodes
            .iter()
            .map(|node| {
                let lane = Lane::new(&manifest, node, &self.worker.model.id, self.verifier.model_id());
                self.emit(OrchestratorEvent::LaneCreated { lane: lane.clone() });
                lane
            })
            .collect();

        let permits = Arc::new(Semaphore::new(self.config.max_parallel_lanes.max(1)));
        let mut join_set = JoinSet::new();
        let mut task_lanes = HashMap::new();

        for (idx, (lane, node)) in lanes.iter().zip(&manifest.nodes).enumerate() {
            let ctx = ctx.clone();
            let lane = lane.clone();
            let node = node.clone();
            let permits = Arc::clone(&permits);
            let cancel = cancel.child_token();
            let handle = join_set.spawn(async move {
                let _permit = permits.acquire_owned().await;
                ctx.run_lane(lane, node, cancel).await
            });
            task_lanes.insert(handle.id(), idx);
        }

        let mut usage = Usage::default();
        let mut cost = 0.0;
        let mut escalations = 0;

        while let Some(joined) = join_set.join_next_with_id().await {
            match joined {
                Ok((id, report)) => {
                    usage.add(&report.worker_usage);
                    usage.add(&report.verifier_usage);
                    cost += report.worker_usage.calculate_cost(&self.worker.model).total;
                    let verifier_model = self.verifier_model.as_ref().unwrap_or(&self.worker.model);
                    cost += report.verifier_usage.calculate_cost(verifier_model).total;
                    escalations += usize::from(report.escalated);
                    if let Some(&idx) = task_lanes.get(&id) {
                        lanes[idx] = report.lane;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Lane task panicked");
                    if let Some(&idx) = task_lanes.get(&e.id()) {
                        // Recover the state from the lane's last transition.
                        if let Some(last) = ctx.latest.lock().remove(&lanes[idx].id) {
                            lanes[idx] = last;
                        }
                        let lane = &mut lanes[idx];
                        if lane.status != LaneStatus::Failed {
                            let from = lane.force_failed();
                            self.emit(OrchestratorEvent::LaneStatusChanged {
                                lane_id: lane.id.clone(),
                                from,
                                to: LaneStatus::Failed,
                                failure_count: lane.failure_count,
                            });
                        }
                    }
                }
            }
        }

        let summary = summarize(&manifest, lanes, usage, cost, escalations, started);
        tracing::info!(
            manifest = %summary.manifest_id,
            merged = summary.merged,
            failed = summary.failed,
            duration_ms = summary.duration_ms,
            "Orchestration complete"
        );
        self.emit(OrchestratorEvent::OrchestrationComplete {
            summary: summary.clone(),
        });
        Ok(summary)
    }

    fn fail(&self, message: String) -> Error {
        tracing::warn!(error = %message, "Orchestration failed");
        self.emit(OrchestratorEvent::OrchestrationError {
            message: message.clone(),
        });
        Error::Orchestration(message)
    }
}

fn summarize(
    manifest: &Manifest,
    lanes: Vec<Lane>,
    usage: Usage,
    cost: f64,
    escalations: usize,
    started: Instant,
) -> OrchestrationSummary {
    let merged = lanes.iter().filter(|l| l.status == LaneStatus::Merged).count();
    let failed = lanes.iter().filter(|l| l.status.is_failure()).count();
    OrchestrationSummary {
        manifest_id: manifest.id.clone(),
        total_lanes: lanes.len(),
        merged,
        failed,
        escalations,
        duration_ms: started.elapsed().as_millis() as u64,
        cost,
        usage,
        success: failed == 0,
        lanes,
    }
}

struct LaneReport {
    lane: Lane,
    worker_usage: Usage,
    verifier_usage: Usage,
    escalated: bool,
}

/// Everything a lane task needs, cheap to clone
#[derive(Clone)]
struct LaneContext {
    goal: String,
    worker: AgentConfig,
    transport: Arc<dyn Transport>,
    tools: BoxedBackend,
    verifier: Arc<dyn Verifier>,
    ceiling: u32,
    /// file -> id of the lane that merged it
    claims: Arc<Mutex<HashMap<String, String>>>,
    /// lane id -> lane as of its latest transition
    latest: Arc<Mutex<HashMap<String, Lane>>>,
    events: broadcast::Sender<OrchestratorEvent>,
}

impl LaneContext {
    fn transition(&self, lane: &mut Lane, to: LaneStatus) {
        match lane.transition(to) {
            Ok(from) => {
                tracing::debug!(lane = %lane.id, %from, %to, failures = lane.failure_count, "Lane status changed");
                self.latest.lock().insert(lane.id.clone(), lane.clone());
                let _ = self.events.send(OrchestratorEvent::LaneStatusChanged {
                    lane_id: lane.id.clone(),
                    from,
                    to,
                    failure_count: lane.failure_count,
                });
            }
            Err(e) => tracing::error!(error = %e, "Invalid lane transition"),
        }
    }

    fn escalate(&self, lane: &Lane, reason: &str) {
        tracing::warn!(lane = %lane.id, failures = lane.failure_count, reason, "Lane escalated");
        let _ = self.events.send(OrchestratorEvent::Escalation {
            lane_id: lane.id.clone(),
            failure_count: lane.failure_count,
            reason: reason.to_string(),
        });
    }

    async fn run_lane(&self, mut lane: Lane, node: ManifestNode, cancel: CancellationToken) -> LaneReport {
        let mut report_usage = (Usage::default(), Usage::default());
        let mut escalated = false;
        let mut feedback: Option<String> = None;

        loop {
            if cancel.is_cancelled() {
                if lane.status == LaneStatus::Queued {
                    self.transition(&mut lane, LaneStatus::Failed);
                }
                break;
            }

            self.transition(&mut lane, LaneStatus::Working);
            let (worked, summary) = self
                .work(&mut lane, &node, feedback.as_deref(), &cancel, &mut report_usage.0)
                .await;

            if !worked {
                lane.failure_count += 1;
                self.transition(&mut lane, LaneStatus::Failed);
                if cancel.is_cancelled() {
                    break;
                }
                if lane.failure_count >= self.ceiling {
                    self.escalate(&lane, &summary);
                    escalated = true;
                    break;
                }
                feedback = Some(summary);
                continue;
            }

            self.transition(&mut lane, LaneStatus::PendingVerify);
            let request = VerifyRequest {
                goal: self.goal.clone(),
                node: node.clone(),
                files_touched: lane.files_touched.clone(),
                worker_summary: summary,
            };
            let verdict = match self.verifier.verify(&request, cancel.clone()).await {
                Ok(verdict) => verdict,
                Err(e) => super::verifier::Verdict::reject(format!("verification failed: {e}")),
            };
            report_usage.1.add(&verdict.usage);

            if verdict.approved {
                self.transition(&mut lane, LaneStatus::Verified);
                let next = self.merge(&lane);
                self.transition(&mut lane, next);
                break;
            }

            lane.failure_count += 1;
            self.transition(&mut lane, LaneStatus::Rejected);
            if cancel.is_cancelled() {
                break;
            }
            if lane.failure_count >= self.ceiling {
                self.escalate(&lane, &verdict.feedback);
                escalated = true;
                break;
            }
            feedback = Some(verdict.feedback);
        }

        LaneReport {
            lane,
            worker_usage: report_usage.0,
            verifier_usage: report_usage.1,
            escalated,
        }
    }

    /// One worker pass. Returns whether it completed and its final message.
    async fn work(
        &self,
        lane: &mut Lane,
        node: &ManifestNode,
        feedback: Option<&str>,
        cancel: &CancellationToken,
        usage: &mut Usage,
    ) -> (bool, String) {
        let scoped = ScopedBackend::new(Arc::clone(&self.tools), node.file_scope.clone());
        let mut agent = Agent::new(
            self.worker.clone(),
            Arc::clone(&self.transport),
            Arc::new(scoped.clone()),
        );
        agent.handle().link_parent(cancel.clone());

        let mut prompt = format!("Overall goal: {}\n\nYour subtask: {}", self.goal, node.description);
        if !node.file_scope.is_empty() {
            prompt.push_str(&format!(
                "\n\nOnly modify files under: {}",
                node.file_scope.join(", ")
            ));
        }
        if let Some(feedback) = feedback {
            prompt.push_str(&format!("\n\nA previous attempt was not accepted:\n{feedback}"));
        }

        let result = agent.prompt(&prompt).await;
        lane.record_files(scoped.files_touched());

        match result {
            Ok(outcome) => {
                usage.add(&outcome.usage);
                (outcome.is_success(), outcome.final_text)
            }
            Err(e) => (false, e.to_string()),
        }
    }

    /// Claim the lane's files, or report a conflict if another lane already merged any
    fn merge(&self, lane: &Lane) -> LaneStatus {
        let mut claims = self.claims.lock();
        let conflict = lane
            .files_touched
            .iter()
            .find(|f| claims.get(*f).is_some_and(|owner| owner != &lane.id));
        if let Some(file) = conflict {
            tracing::warn!(lane = %lane.id, file = %file, "Merge conflict");
            return LaneStatus::MergeConflict;
        }
        for file in &lane.files_touched {
            claims.insert(file.clone(), lane.id.clone());
        }
        LaneStatus::Merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::planner::StaticPlanner;
    use crate::parallel::verifier::Verdict;
    use crate::tool::{ToolBackend, ToolResult};
    use async_trait::async_trait;
    use rho_ai::{ErrorClass, Message, StopReason, ToolCallRequest, TurnEvent, TurnEventStream};
    use serde_json::json;
    use std::collections::VecDeque;

    /// Worker model stand-in. Writes `file` on the first turn when set, then answers.
    struct WorkerTransport {
        file: Option<String>,
        fail: bool,
    }

    #[async_trait]
    impl Transport for WorkerTransport {
        async fn continue_turn(
            &self,
            history: Vec<Message>,
            _tools: Vec<rho_ai::Tool>,
            _model: &Model,
            _cancel: CancellationToken,
        ) -> rho_ai::Result<TurnEventStream> {
            let last_is_user = history.last().map(|m| m.role()) == Some("user");
            let done = |text: &str, calls: Vec<ToolCallRequest>| TurnEvent::Done {
                final_text: text.into(),
                stop_reason: if calls.is_empty() { StopReason::Stop } else { StopReason::ToolUse },
                final_tool_calls: calls,
                usage: Usage { input: 100, output: 10 },
            };
            let events = if self.fail {
                vec![
                    TurnEvent::Start,
                    TurnEvent::Error {
                        message: "boom".into(),
                        class: ErrorClass::Transport,
                    },
                ]
            } else {
                match (&self.file, last_is_user) {
                    (Some(file), true) => vec![
                        TurnEvent::Start,
                        done("", vec![ToolCallRequest::new("c1", "create_file", json!({"path": file}))]),
                    ],
                    _ => vec![TurnEvent::Start, done("Subtask finished.", vec![])],
                }
            };
            Ok(Box::pin(tokio_stream::iter(events)))
        }
    }

    struct OkTools;

    #[async_trait]
    impl ToolBackend for OkTools {
        fn is_enabled(&self) -> bool {
            true
        }

        fn schemas(&self) -> Vec<rho_ai::Tool> {
            vec![]
        }

        async fn execute(&self, _name: &str, _arguments: serde_json::Value, _cancel: CancellationToken) -> ToolResult {
            ToolResult::ok("done")
        }
    }

    /// Verifier replaying scripted verdicts, approving once they run out
    struct ScriptedVerifier {
        verdicts: Mutex<VecDeque<bool>>,
    }

    impl ScriptedVerifier {
        fn new(verdicts: impl IntoIterator<Item = bool>) -> Arc<Self> {
            Arc::new(Self {
                verdicts: Mutex::new(verdicts.into_iter().collect()),
            })
        }
    }

    #[async_trait]
    impl Verifier for ScriptedVerifier {
        fn model_id(&self) -> String {
            "verifier".into()
        }

        async fn verify(&self, _request: &VerifyRequest, _cancel: CancellationToken) -> Result<Verdict> {
            Ok(match self.verdicts.lock().pop_front() {
                Some(false) => Verdict::reject("needs work"),
                _ => Verdict::approve("fine"),
            })
        }
    }

    fn orchestrator(
        nodes: Vec<ManifestNode>,
        transport: WorkerTransport,
        verifier: Arc<ScriptedVerifier>,
        ceiling: u32,
    ) -> Orchestrator {
        let worker = AgentConfig::new(Model::openai_compatible("worker", "http://localhost").with_cost(1.0, 2.0));
        Orchestrator::new(
            ParallelConfig {
                max_parallel_lanes: 2,
                lane_failure_ceiling: ceiling,
            },
            worker,
            Arc::new(transport),
            Arc::new(OkTools),
            Arc::new(StaticPlanner::new(nodes)),
            verifier,
        )
    }

    fn drain(rx: &mut broadcast::Receiver<OrchestratorEvent>) -> Vec<OrchestratorEvent> {
        let mut events = vec![];
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        events
    }

    fn transitions(events: &[OrchestratorEvent]) -> Vec<(LaneStatus, LaneStatus)> {
        events
            .iter()
            .filter_map(|e| match e {
                OrchestratorEvent::LaneStatusChanged { from, to, .. } => Some((*from, *to)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_rejected_lane_counts_as_failed() {
        let orch = orchestrator(
            vec![ManifestNode::new("n1", "add a route")],
            WorkerTransport { file: None, fail: false },
            ScriptedVerifier::new([false]),
            1,
        );
        let mut rx = orch.subscribe();

        let summary = orch.run("goal", CancellationToken::new()).await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(
            transitions(&events),
            vec![
                (LaneStatus::Queued, LaneStatus::Working),
                (LaneStatus::Working, LaneStatus::PendingVerify),
                (LaneStatus::PendingVerify, LaneStatus::Rejected),
            ]
        );
        assert!(events.iter().any(|e| e.name() == "escalation"));
        assert_eq!(events.first().map(|e| e.name()), Some("manifest_created"));
        assert_eq!(events.last().map(|e| e.name()), Some("orchestration_complete"));
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.merged, 0);
        assert!(!summary.success);
    }

    #[tokio::test]
    async fn test_all_lanes_merge() {
        let orch = orchestrator(
            vec![ManifestNode::new("n1", "a"), ManifestNode::new("n2", "b"), ManifestNode::new("n3", "c")],
            WorkerTransport { file: None, fail: false },
            ScriptedVerifier::new([]),
            2,
        );

        let summary = orch.run("goal", CancellationToken::new()).await.unwrap();

        assert_eq!(summary.total_lanes, 3);
        assert_eq!(summary.merged, 3);
        assert!(summary.success);
        assert_eq!(summary.usage.input, 300);
        // 300 input tokens at $1/M plus 30 output tokens at $2/M
        assert!((summary.cost - 0.00036).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_retry_after_rejection_still_succeeds() {
        let orch = orchestrator(
            vec![ManifestNode::new("n1", "a")],
            WorkerTransport { file: None, fail: false },
            ScriptedVerifier::new([false, true]),
            2,
        );
        let mut rx = orch.subscribe();

        let summary = orch.run("goal", CancellationToken::new()).await.unwrap();

        assert!(summary.success);
        assert_eq!(summary.lanes[0].status, LaneStatus::Merged);
        assert_eq!(summary.lanes[0].failure_count, 1);
        let t = transitions(&drain(&mut rx));
        assert!(t.contains(&(LaneStatus::Rejected, LaneStatus::Working)));
        assert_eq!(t.last(), Some(&(LaneStatus::Verified, LaneStatus::Merged)));
    }

    #[tokio::test]
    async fn test_overlapping_lanes_conflict() {
        let orch = orchestrator(
            vec![ManifestNode::new("n1", "a"), ManifestNode::new("n2", "b")],
            WorkerTransport {
                file: Some("shared.rs".into()),
                fail: false,
            },
            ScriptedVerifier::new([]),
            2,
        );

        let summary = orch.run("goal", CancellationToken::new()).await.unwrap();

        let statuses: Vec<_> = summary.lanes.iter().map(|l| l.status).collect();
        assert_eq!(statuses.iter().filter(|s| **s == LaneStatus::Merged).count(), 1);
        assert_eq!(statuses.iter().filter(|s| **s == LaneStatus::MergeConflict).count(), 1);
        assert_eq!(summary.failed, 1);
        assert!(summary.lanes.iter().all(|l| l.files_touched == vec!["shared.rs"]));
    }

    #[tokio::test]
    async fn test_worker_failures_escalate() {
        let orch = orchestrator(
            vec![ManifestNode::new("n1", "a")],
            WorkerTransport { file: None, fail: true },
            ScriptedVerifier::new([]),
            2,
        );
        let mut rx = orch.subscribe();

        let summary = orch.run("goal", CancellationToken::new()).await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(
            transitions(&events),
            vec![
                (LaneStatus::Queued, LaneStatus::Working),
                (LaneStatus::Working, LaneStatus::Failed),
                (LaneStatus::Failed, LaneStatus::Working),
                (LaneStatus::Working, LaneStatus::Failed),
            ]
        );
        assert_eq!(summary.escalations, 1);
        assert_eq!(summary.lanes[0].status, LaneStatus::Failed);
        assert!(!summary.success);
    }

    #[tokio::test]
    async fn test_cancelled_run_fails_queued_lanes() {
        let orch = orchestrator(
            vec![ManifestNode::new("n1", "a"), ManifestNode::new("n2", "b")],
            WorkerTransport { file: None, fail: false },
            ScriptedVerifier::new([]),
            2,
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = orch.run("goal", cancel).await.unwrap();

        assert_eq!(summary.failed, 2);
        assert!(summary.lanes.iter().all(|l| l.status == LaneStatus::Failed));
    }

    #[tokio::test]
    async fn test_planning_error_is_reported() {
        let orch = orchestrator(
            vec![],
            WorkerTransport { file: None, fail: false },
            ScriptedVerifier::new([]),
            2,
        );
        let mut rx = orch.subscribe();

        assert!(orch.run("goal", CancellationToken::new()).await.is_err());
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name(), "orchestration_error");
    }

    struct PanickingVerifier;

    #[async_trait]
    impl Verifier for PanickingVerifier {
        fn model_id(&self) -> String {
            "verifier".into()
        }

        async fn verify(&self, _request: &VerifyRequest, _cancel: CancellationToken) -> Result<Verdict> {
            panic!("verifier crashed");
        }
    }

    #[tokio::test]
    async fn test_panicked_lane_reports_failure() {
        let worker = AgentConfig::new(Model::openai_compatible("worker", "http://localhost"));
        let orch = Orchestrator::new(
            ParallelConfig::default(),
            worker,
            Arc::new(WorkerTransport { file: None, fail: false }),
            Arc::new(OkTools),
            Arc::new(StaticPlanner::new(vec![ManifestNode::new("n1", "a")])),
            Arc::new(PanickingVerifier),
        );
        let mut rx = orch.subscribe();

        let summary = orch.run("goal", CancellationToken::new()).await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(
            transitions(&events),
            vec![
                (LaneStatus::Queued, LaneStatus::Working),
                (LaneStatus::Working, LaneStatus::PendingVerify),
                (LaneStatus::PendingVerify, LaneStatus::Failed),
            ]
        );
        assert_eq!(events.last().map(|e| e.name()), Some("orchestration_complete"));
        assert_eq!(summary.lanes[0].status, LaneStatus::Failed);
        assert_eq!(summary.failed, 1);
        assert!(!summary.success);
    }
}
