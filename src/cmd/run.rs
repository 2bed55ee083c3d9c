use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use console::style;
use dialoguer::Input;

use intake::config::Config;
use intake::session::{SessionRegistry, TurnOutcome};
use intake::worker;

/// Drive one interview in the terminal: the worker asks, the user answers,
/// until the report is produced. No HTTP involved: this talks to a local
/// registry the same way the server handlers do.
pub async fn run(project_dir: &Path, session_id: Option<String>, verbose: bool) -> Result<()> {
    super::init_tracing(verbose);

    let config = Config::load(project_dir)?;
    let runner = Arc::new(super::build_runner(&config));
    let registry = Arc::new(SessionRegistry::new());

    let id = session_id.unwrap_or_else(SessionRegistry::mint_id);
    let session = registry.get_or_create(&id);

    println!("{}", style("Welcome to the intake interview.").bold());
    println!("Session: {id}");
    println!("Answer each question; the report is generated when the interview completes.");

    worker::spawn(
        Arc::clone(&registry),
        Arc::clone(&session),
        runner,
        &config.transcript_dir,
    );

    let mut outcome = session.await_turn(true, config.answer_timeout).await;
    loop {
        match outcome {
            TurnOutcome::Question(question) => {
                println!();
                println!("{}", style(&question).cyan());
                let answer: String = Input::new()
                    .with_prompt(">")
                    .interact_text()
                    .context("Failed to read answer")?;
                outcome = session.answer(&answer, config.answer_timeout).await;
            }
            TurnOutcome::Completed { artifact } => {
                println!();
                match artifact {
                    Some(artifact) => {
                        println!("{} {}", style("Interview complete.").green().bold(), artifact);
                    }
                    None => println!("{}", style("Interview complete.").green().bold()),
                }
                return Ok(());
            }
            TurnOutcome::Failed { reason } => {
                bail!(
                    "Interview failed: {}",
                    reason.unwrap_or_else(|| "unknown error".to_string())
                );
            }
            TurnOutcome::TimedOut => {
                bail!(
                    "The interviewer produced no question within {}s; \
                     the session may still be working, retry with --session {}",
                    config.answer_timeout.as_secs(),
                    id
                );
            }
        }
    }
}
