//! Verification of a lane's work before it may merge

use async_trait::async_trait;
use regex::Regex;
use rho_ai::{Model, Usage};
use std::sync::{Arc, LazyLock};
use tokio_util::sync::CancellationToken;

use super::lane::ManifestNode;
use super::scope::ScopedBackend;
use crate::agent::{Agent, AgentConfig};
use crate::error::{Error, Result};
use crate::nudge::NudgePolicy;
use crate::tool::BoxedBackend;
use crate::transport::Transport;

static VERDICT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\W*VERDICT\W*:\W*(APPROVE|REJECT)\b").expect("verdict pattern is valid")
});

/// What a verifier is asked to check
#[derive(Debug, Clone)]
pub struct VerifyRequest {
    pub goal: String,
    pub node: ManifestNode,
    pub files_touched: Vec<String>,
    /// The worker's final message
    pub worker_summary: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub approved: bool,
    pub feedback: String,
    pub usage: Usage,
}

impl Verdict {
    pub fn approve(feedback: impl Into<String>) -> Self {
        Self {
            approved: true,
            feedback: feedback.into(),
            usage: Usage::default(),
        }
    }

    pub fn reject(feedback: impl Into<String>) -> Self {
        Self {
            approved: false,
            feedback: feedback.into(),
            usage: Usage::default(),
        }
    }
}

/// Checks a worker's output. Errors are treated as rejections by the caller.
#[async_trait]
pub trait Verifier: Send + Sync {
    fn model_id(&self) -> String;

    async fn verify(&self, request: &VerifyRequest, cancel: CancellationToken) -> Result<Verdict>;
}

const VERIFIER_PROMPT: &str = "You review work done by another agent on one subtask. Inspect the \
listed files with the read-only tools. End your reply with a line `VERDICT: APPROVE` if the \
subtask is done correctly, or `VERDICT: REJECT` followed by what must change.";

/// Runs a read-only agent over the lane's output
pub struct ModelVerifier {
    config: AgentConfig,
    transport: Arc<dyn Transport>,
    tools: BoxedBackend,
}

impl ModelVerifier {
    pub fn new(config: AgentConfig, transport: Arc<dyn Transport>, tools: BoxedBackend) -> Self {
        let config = AgentConfig {
            system_prompt: Some(VERIFIER_PROMPT.to_string()),
            nudge: NudgePolicy::disabled(),
            ..config
        };
        Self {
            config,
            transport,
            tools,
        }
    }

    pub fn model(&self) -> &Model {
        &self.config.model
    }
}

#[async_trait]
impl Verifier for ModelVerifier {
    fn model_id(&self) -> String {
        self.config.model.id.clone()
    }

    async fn verify(&self, request: &VerifyRequest, cancel: CancellationToken) -> Result<Verdict> {
        let tools = Arc::new(ScopedBackend::read_only(Arc::clone(&self.tools)));
        let mut agent = Agent::new(self.config.clone(), Arc::clone(&self.transport), tools);
        agent.handle().link_parent(cancel);

        let files = if request.files_touched.is_empty() {
            "(none)".to_string()
        } else {
            request.files_touched.join("\n")
        };
        let prompt = format!(
            "Overall goal: {}\n\nSubtask: {}\n\nFiles changed:\n{}\n\nWorker's report:\n{}",
            request.goal, request.node.description, files, request.worker_summary
        );

        let outcome = agent.prompt(&prompt).await?;
        if !outcome.is_success() {
            return Err(Error::Orchestration(format!(
                "verifier did not finish: {}",
                outcome.final_text
            )));
        }

        let mut verdict = parse_verdict(&outcome.final_text);
        verdict.usage = outcome.usage;
        Ok(verdict)
    }
}

/// Read the last `VERDICT:` line. A reply without one is a rejection.
pub fn parse_verdict(text: &str) -> Verdict {
    match VERDICT.captures_iter(text).last() {
        Some(caps) => {
            let approved = caps[1].eq_ignore_ascii_case("APPROVE");
            if approved {
                Verdict::approve(text.trim())
            } else {
                Verdict::reject(text.trim())
            }
        }
        None => Verdict::reject(format!("Verifier gave no verdict: {}", text.trim())),
    }
}
