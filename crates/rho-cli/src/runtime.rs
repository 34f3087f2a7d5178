//! Wiring from configuration to agents and orchestrators

use std::path::PathBuf;
use std::sync::Arc;

use rho_agent::parallel::{ModelPlanner, ModelVerifier, Orchestrator};
use rho_agent::{Agent, AgentConfig, BoxedBackend, ProviderTransport, ToolBackend, Transport};
use rho_ai::{Model, OpenAiCompatible};
use rho_tools::Dispatcher;

use crate::config::Config;
use crate::context::ProjectContext;

/// Everything needed to start runs: one transport and one dispatcher shared
/// by every session and lane
pub struct Runtime {
    pub config: Config,
    pub model: Model,
    pub transport: Arc<dyn Transport>,
    pub tools: BoxedBackend,
    base_prompt: String,
    context: ProjectContext,
}

impl Runtime {
    pub fn from_config(config: Config, workspace: Option<PathBuf>) -> anyhow::Result<Self> {
        let api_key = config.api_key();
        if api_key.is_none() {
            tracing::warn!("No API key configured; set OPENAI_API_KEY or api_key in the config file");
        }
        let backend = Arc::new(OpenAiCompatible::new(api_key));
        let transport: Arc<dyn Transport> =
            Arc::new(ProviderTransport::new(backend).with_retry_config(config.retry_config()));

        let dispatcher = Dispatcher::new(workspace.clone()).with_config(config.tools_config());
        let model = build_model(&config, config.model_id());
        let base_prompt = match config.system_prompt_file.as_deref() {
            Some(path) => std::fs::read_to_string(expand_home(path))
                .map_err(|e| anyhow::anyhow!("Failed to read system prompt file {path}: {e}"))?,
            None => build_system_prompt(&dispatcher.schemas()),
        };

        Ok(Self {
            config,
            model,
            transport,
            tools: Arc::new(dispatcher),
            base_prompt,
            context: ProjectContext::new(workspace),
        })
    }

    /// Assemble a runtime from parts, with no project context
    #[cfg(test)]
    pub fn with_parts(config: Config, model: Model, transport: Arc<dyn Transport>, tools: BoxedBackend) -> Self {
        let base_prompt = build_system_prompt(&tools.schemas());
        Self {
            config,
            model,
            transport,
            tools,
            base_prompt,
            context: ProjectContext::new(None),
        }
    }

    pub fn agent_config(&self, model: Model, session: &str) -> AgentConfig {
        let prompt = match self.context.for_session(session) {
            Some(context) => format!("{}\n\n# Project context\n\n{context}", self.base_prompt),
            None => self.base_prompt.clone(),
        };
        AgentConfig {
            limits: self.config.loop_limits(),
            compression: self.config.compression_config(),
            ..AgentConfig::new(model).with_system_prompt(prompt)
        }
    }

    /// A fresh conversation for `session`
    pub fn agent(&self, session: &str) -> Agent {
        Agent::new(
            self.agent_config(self.model.clone(), session),
            Arc::clone(&self.transport),
            Arc::clone(&self.tools),
        )
    }

    pub fn forget_session(&self, session: &str) {
        self.context.invalidate(session);
    }

    /// An orchestrator whose lanes and verifier share this runtime's transport and tools
    pub fn orchestrator(&self) -> Orchestrator {
        let parallel = &self.config.parallel;
        let worker_model = parallel
            .worker_model
            .as_deref()
            .map(|id| build_model(&self.config, id))
            .unwrap_or_else(|| self.model.clone());
        let verifier_model = parallel
            .verifier_model
            .as_deref()
            .map(|id| build_model(&self.config, id))
            .unwrap_or_else(|| worker_model.clone());

        let worker = self.agent_config(worker_model.clone(), "parallel");
        let verifier = ModelVerifier::new(
            AgentConfig {
                limits: self.config.loop_limits(),
                ..AgentConfig::new(verifier_model.clone())
            },
            Arc::clone(&self.transport),
            Arc::clone(&self.tools),
        );
        let planner = ModelPlanner::new(Arc::clone(&self.transport), worker_model);

        Orchestrator::new(
            self.config.parallel_config(),
            worker,
            Arc::clone(&self.transport),
            Arc::clone(&self.tools),
            Arc::new(planner),
            Arc::new(verifier),
        )
        .with_verifier_model(verifier_model)
    }
}

fn build_model(config: &Config, id: &str) -> Model {
    let model = Model::openai_compatible(id, config.base_url());
    match (config.input_cost, config.output_cost) {
        (None, None) => model,
        (input, output) => model.with_cost(input.unwrap_or(0.0), output.unwrap_or(0.0)),
    }
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

fn build_system_prompt(tools: &[rho_ai::Tool]) -> String {
    let mut prompt = String::from("You are rho, a coding assistant that works inside the user's workspace.\n\n");
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    let workspace_open = names.contains(&"edit_file");

    if !workspace_open {
        prompt.push_str("NOTE: No workspace folder is open, so file and shell tools are unavailable.");
        if names.is_empty() {
            prompt.push_str(" Answer from the conversation alone.\n\n");
            return prompt;
        }
        prompt.push_str("\n\n");
    }

    prompt.push_str("Tools: ");
    prompt.push_str(&names.join(", "));
    prompt.push_str("\n\nGuidelines:\n");
    prompt.push_str("- Be concise\n");
    if workspace_open {
        prompt.push_str("- Read a file before editing it; edit_file needs the exact current text\n");
        prompt.push_str("- Use grep_search or glob_search to find code before changing it\n");
    }
    prompt.push_str("- When you say you will do something, call the tool in the same reply\n");
    prompt
}
