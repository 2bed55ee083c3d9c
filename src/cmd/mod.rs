pub mod run;
pub mod serve;

use std::sync::Arc;

use intake::config::Config;
use intake::engine::ClaudeCliEngine;
use intake::pipeline::InterviewPlan;
use intake::report::{HttpReportStore, MarkdownRenderer};
use intake::runner::PipelineRunner;

pub(crate) fn init_tracing(verbose: bool) {
    let default = if verbose { "intake=debug" } else { "intake=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Assemble the standard interview runner from config: Claude CLI engine,
/// Markdown renderer, and the HTTP store when a storage URL is configured.
pub(crate) fn build_runner(config: &Config) -> PipelineRunner {
    let mut runner = PipelineRunner::new(
        InterviewPlan::standard(),
        Arc::new(ClaudeCliEngine::new(&config.claude_cmd)),
        Arc::new(MarkdownRenderer::new(&config.reports_dir)),
        config.retry.clone(),
    );
    if let Some(url) = &config.storage_url {
        runner = runner.with_store(Arc::new(HttpReportStore::new(url)));
    }
    runner
}
