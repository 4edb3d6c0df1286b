//! CLI route: single route table and run context. Dispatches to the engine and presentation.

use crate::action::{ActionContext, ActionResult, ActionSource, ActionStatus, BasicContext};
use crate::cli::output::map_error;
use crate::cli::parse::Commands;
use crate::cli::presentation::{
    format_script_report_json, format_script_report_text, format_usage,
};
use crate::config::ConfigLoader;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::registry::RegistrySnapshot;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of one script line
#[derive(Debug, Clone, Serialize)]
pub struct CommandOutcome {
    pub line: usize,
    pub command: String,
    pub status: ActionStatus,
    pub result: Option<ActionResult>,
    pub errors: Vec<String>,
}

/// Everything a script run produced
#[derive(Debug, Clone, Serialize)]
pub struct ScriptReport {
    pub commands: Vec<CommandOutcome>,
    pub registry: RegistrySnapshot,
    pub undo_items: usize,
    pub redo_items: usize,
    pub provenance_steps: usize,
}

impl ScriptReport {
    pub fn all_succeeded(&self) -> bool {
        self.commands
            .iter()
            .all(|c| c.status == ActionStatus::Success)
    }
}

/// Runtime context for CLI execution: workspace, config path and the engine.
pub struct RunContext {
    engine: Arc<Engine>,
    workspace_root: PathBuf,
    config_path: Option<PathBuf>,
}

impl RunContext {
    /// Create run context from workspace root and optional config path. Uses ConfigLoader only.
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, EngineError> {
        let config = if let Some(ref cfg_path) = config_path {
            ConfigLoader::load_from_file(cfg_path)?
        } else {
            ConfigLoader::load(&workspace_root)?
        };
        let engine = Engine::new(config)?;
        Ok(Self {
            engine,
            workspace_root,
            config_path,
        })
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn workspace_root(&self) -> &PathBuf {
        &self.workspace_root
    }

    pub fn config_path(&self) -> Option<&PathBuf> {
        self.config_path.as_ref()
    }

    /// Execute a CLI command and return its output.
    pub fn execute(&self, command: &Commands) -> Result<String, EngineError> {
        match command {
            Commands::Run { script, format } => {
                let text = std::fs::read_to_string(script)?;
                info!(script = %script.display(), "Running script");
                let report = self.run_script(&text, ActionSource::Script);
                render(&report, format)
            }
            Commands::Exec { commands, format } => {
                let lines = commands
                    .iter()
                    .enumerate()
                    .map(|(i, c)| (i + 1, c.trim()));
                let report = self.run_lines(lines, ActionSource::CommandLine);
                render(&report, format)
            }
            Commands::Usage { kind } => {
                let kinds = match kind {
                    Some(kind) => vec![kind.clone()],
                    None => self.engine.command_kinds(),
                };
                let mut lines = Vec::with_capacity(kinds.len());
                for kind in kinds {
                    let usage = self.engine.usage(&kind).ok_or_else(|| {
                        EngineError::Parse(crate::error::ParseError::UnknownCommand(kind.clone()))
                    })?;
                    lines.push(usage);
                }
                Ok(format_usage(&lines))
            }
            Commands::Config => toml::to_string_pretty(self.engine.config())
                .map_err(|e| EngineError::ConfigError(e.to_string())),
        }
    }

    /// Run every non-empty, non-comment line of `script` in order. Each command completes
    /// (including its background work) before the next one is posted.
    pub fn run_script(&self, script: &str, source: ActionSource) -> ScriptReport {
        let lines = script
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'));
        self.run_lines(lines, source)
    }

    fn run_lines<'a>(
        &self,
        lines: impl IntoIterator<Item = (usize, &'a str)>,
        source: ActionSource,
    ) -> ScriptReport {
        let mut commands = Vec::new();
        for (line, command) in lines {
            let context = BasicContext::handle(source);
            let outcome = match self
                .engine
                .post_and_wait_command(command, Arc::clone(&context))
            {
                Ok(_) => {
                    context.wait_done();
                    CommandOutcome {
                        line,
                        command: command.to_string(),
                        status: context.status(),
                        result: context.result(),
                        errors: context.errors(),
                    }
                }
                Err(e) => {
                    warn!(line, error = %e, "Command rejected");
                    CommandOutcome {
                        line,
                        command: command.to_string(),
                        status: ActionStatus::Invalid,
                        result: None,
                        errors: vec![map_error(&e)],
                    }
                }
            };
            commands.push(outcome);
        }
        self.engine.wait_until_idle();

        ScriptReport {
            commands,
            registry: self.engine.registry().snapshot(),
            undo_items: self.engine.undo_buffer().num_undo_items(),
            redo_items: self.engine.undo_buffer().num_redo_items(),
            provenance_steps: self.engine.provenance().len(),
        }
    }
}

fn render(report: &ScriptReport, format: &str) -> Result<String, EngineError> {
    match format {
        "json" => format_script_report_json(report),
        _ => Ok(format_script_report_text(report)),
    }
}
