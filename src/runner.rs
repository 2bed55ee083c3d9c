//! Pipeline execution.
//!
//! The runner walks a plan's stages in their fixed order, feeding each
//! stage the concatenated outputs of its declared dependencies plus its
//! instruction payload. Interactive stages generate a question (through the
//! retry policy), publish it on the session broker, and block for the
//! patient's answer; every other stage resolves through the engine. After
//! the final stage the collected fields are rendered into the report
//! document and optionally uploaded.
//!
//! Only infrastructure failures (transcript IO, rendering, a missing
//! dependency output) abort the run; engine trouble degrades into
//! fallbacks inside the retry policy and the pipeline keeps going.

use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::ReasoningEngine;
use crate::errors::PipelineError;
use crate::pipeline::{InterviewPlan, StageSpec};
use crate::report::{ReportFields, ReportRenderer, ReportStore};
use crate::retry::RetryPolicy;
use crate::session::{Session, SessionStatus};

pub struct PipelineRunner {
    plan: InterviewPlan,
    engine: Arc<dyn ReasoningEngine>,
    renderer: Arc<dyn ReportRenderer>,
    store: Option<Arc<dyn ReportStore>>,
    retry: RetryPolicy,
}

impl PipelineRunner {
    pub fn new(
        plan: InterviewPlan,
        engine: Arc<dyn ReasoningEngine>,
        renderer: Arc<dyn ReportRenderer>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            plan,
            engine,
            renderer,
            store: None,
            retry,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ReportStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn plan(&self) -> &InterviewPlan {
        &self.plan
    }

    /// Execute every stage in order, then render the artifact.
    /// Returns the artifact reference (stored location or local path).
    pub async fn run(&self, session: &Session) -> Result<String, PipelineError> {
        let mut outputs: HashMap<String, String> = HashMap::new();

        for stage in self.plan.stages() {
            let context = stage_context(stage, &outputs)?;
            tracing::info!(session_id = %session.id, stage = %stage.name, "stage started");

            let output = if stage.interactive {
                self.run_interactive_stage(session, stage, &context).await?
            } else {
                let output = self
                    .retry
                    .invoke(stage.role, || {
                        self.engine.complete(stage.role, &stage.instruction, &context)
                    })
                    .await;
                session
                    .log_transcript(|log| log.interaction(&stage.name, None, &output))
                    .map_err(PipelineError::Transcript)?;
                output
            };

            tracing::info!(session_id = %session.id, stage = %stage.name, "stage completed");
            outputs.insert(stage.name.clone(), output);
        }

        self.finalize(session, &outputs).await
    }

    /// Ask the patient: generate the question, publish it, block for the
    /// answer. The session is `awaiting_input` for exactly the blocked span.
    async fn run_interactive_stage(
        &self,
        session: &Session,
        stage: &StageSpec,
        context: &str,
    ) -> Result<String, PipelineError> {
        let question = self
            .retry
            .invoke(stage.role, || {
                self.engine.complete(stage.role, &stage.instruction, context)
            })
            .await;

        // Status first: anyone who observes the question must already see
        // awaiting_input.
        session.set_status(SessionStatus::AwaitingInput);
        session.broker.set_question(question.as_str());
        tracing::info!(session_id = %session.id, stage = %stage.name, "question posted, waiting for answer");

        let answer = session.broker.get_message().await;
        session.set_status(SessionStatus::Running);

        session
            .log_transcript(|log| log.interaction(&stage.name, Some(&question), &answer))
            .map_err(PipelineError::Transcript)?;
        Ok(answer)
    }

    async fn finalize(
        &self,
        session: &Session,
        outputs: &HashMap<String, String>,
    ) -> Result<String, PipelineError> {
        let fields = self.collect_fields(outputs);
        let path = self
            .renderer
            .render(&session.id, &fields)
            .await
            .map_err(PipelineError::Render)?;

        let mut artifact = path.display().to_string();
        if let Some(store) = &self.store {
            // Upload failures are reported, never retried; the local
            // artifact remains the result.
            match store.store(&path, &session.id).await {
                Ok(location) => artifact = location,
                Err(e) => {
                    tracing::warn!(session_id = %session.id, error = %e, "report upload failed, keeping local artifact");
                    session
                        .log_transcript(|log| log.error("store", &e.to_string()))
                        .map_err(PipelineError::Transcript)?;
                }
            }
        }
        Ok(artifact)
    }

    /// Map stage outputs onto report fields by position in the plan: the
    /// first interactive output is the chief complaint, later interactive
    /// outputs form the history, the last internal stage before the final
    /// one is the assessment, and the final stage output is the body.
    fn collect_fields(&self, outputs: &HashMap<String, String>) -> ReportFields {
        let stages = self.plan.stages();
        let output_of = |stage: &StageSpec| outputs.get(&stage.name).cloned().unwrap_or_default();

        let mut interactive = stages.iter().filter(|s| s.interactive);
        let chief_complaint = interactive.next().map(&output_of).unwrap_or_default();
        let history_present_illness = interactive
            .map(&output_of)
            .collect::<Vec<_>>()
            .join("\n\n");

        let body = stages.last().map(&output_of).unwrap_or_default();
        let assessment = stages
            .iter()
            .rev()
            .skip(1)
            .find(|s| !s.interactive)
            .map(&output_of)
            .unwrap_or_default();

        ReportFields {
            chief_complaint,
            history_present_illness,
            assessment,
            body,
        }
    }
}

/// Concatenate the outputs of the declared dependencies, in declaration
/// order, as labeled sections.
fn stage_context(
    stage: &StageSpec,
    outputs: &HashMap<String, String>,
) -> Result<String, PipelineError> {
    let mut parts = Vec::with_capacity(stage.depends_on.len());
    for dep in &stage.depends_on {
        let output = outputs
            .get(dep)
            .ok_or_else(|| PipelineError::MissingDependency {
                stage: stage.name.clone(),
                dependency: dep.clone(),
            })?;
        parts.push(format!("### {dep}\n\n{output}"));
    }
    Ok(parts.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::EngineError;
    use crate::pipeline::StageRole;
    use crate::report::MarkdownRenderer;
    use crate::session::SessionRegistry;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Engine that records every call it sees and answers with canned
    /// per-role output.
    struct ScriptedEngine {
        calls: Mutex<Vec<(StageRole, String, String)>>,
    }

    impl ScriptedEngine {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(StageRole, String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ReasoningEngine for ScriptedEngine {
        async fn complete(
            &self,
            role: StageRole,
            instruction: &str,
            context: &str,
        ) -> Result<String, EngineError> {
            self.calls
                .lock()
                .unwrap()
                .push((role, instruction.to_string(), context.to_string()));
            Ok(format!("{} says ok", role.label()))
        }
    }

    struct FailingStore;

    #[async_trait]
    impl ReportStore for FailingStore {
        async fn store(&self, _report_path: &Path, _session_id: &str) -> anyhow::Result<String> {
            anyhow::bail!("storage backend unreachable")
        }
    }

    struct OkStore;

    #[async_trait]
    impl ReportStore for OkStore {
        async fn store(&self, report_path: &Path, session_id: &str) -> anyhow::Result<String> {
            let name = report_path.file_name().unwrap().to_str().unwrap();
            Ok(crate::report::storage_location(session_id, name))
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: 0.0,
        }
    }

    fn non_interactive_plan() -> InterviewPlan {
        InterviewPlan::new(vec![
            StageSpec::new("research", StageRole::Researcher, vec![], "Research."),
            StageSpec::new(
                "assessment",
                StageRole::Assessor,
                vec!["research"],
                "Assess.",
            ),
            StageSpec::new(
                "report",
                StageRole::Reporter,
                vec!["research", "assessment"],
                "Report.",
            ),
        ])
    }

    #[tokio::test]
    async fn test_non_interactive_plan_runs_to_artifact() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(ScriptedEngine::new());
        let runner = PipelineRunner::new(
            non_interactive_plan(),
            Arc::clone(&engine) as Arc<dyn ReasoningEngine>,
            Arc::new(MarkdownRenderer::new(dir.path())),
            fast_retry(),
        );
        let registry = SessionRegistry::new();
        let session = registry.get_or_create("s1");

        let artifact = runner.run(&session).await.unwrap();
        assert!(Path::new(&artifact).exists());

        // Dependency outputs flow into later stage context, in order.
        let calls = engine.calls();
        assert_eq!(calls.len(), 3);
        let (_, _, report_context) = &calls[2];
        let research_pos = report_context.find("### research").unwrap();
        let assessment_pos = report_context.find("### assessment").unwrap();
        assert!(research_pos < assessment_pos);
        assert!(report_context.contains("researcher says ok"));
        assert!(report_context.contains("assessor says ok"));
    }

    #[tokio::test]
    async fn test_interactive_stage_blocks_then_consumes_answer() {
        let dir = TempDir::new().unwrap();
        let plan = InterviewPlan::new(vec![
            StageSpec::new("interview", StageRole::Communicator, vec![], "Ask.").interactive(),
            StageSpec::new("validate", StageRole::Assessor, vec!["interview"], "Validate."),
            StageSpec::new(
                "report",
                StageRole::Reporter,
                vec!["interview", "validate"],
                "Report.",
            ),
        ]);
        let engine = Arc::new(ScriptedEngine::new());
        let runner = Arc::new(PipelineRunner::new(
            plan,
            Arc::clone(&engine) as Arc<dyn ReasoningEngine>,
            Arc::new(MarkdownRenderer::new(dir.path())),
            fast_retry(),
        ));
        let registry = SessionRegistry::new();
        let session = registry.get_or_create("s2");

        let run = {
            let runner = Arc::clone(&runner);
            let session = Arc::clone(&session);
            tokio::spawn(async move { runner.run(&session).await })
        };

        // The worker must post a question and park awaiting input.
        let mut question_rx = session.broker.question_watch();
        if session.broker.get_question().is_none() {
            tokio::time::timeout(Duration::from_secs(2), question_rx.changed())
                .await
                .expect("question must be posted")
                .unwrap();
        }
        assert_eq!(
            session.broker.get_question(),
            Some("communicator says ok".to_string())
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(session.status(), SessionStatus::AwaitingInput);
        assert!(!run.is_finished());

        session.broker.add_message("I have a headache").await;
        let artifact = tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .expect("pipeline must finish after the answer")
            .unwrap()
            .unwrap();
        assert!(Path::new(&artifact).exists());

        // The answer is the interview output and reaches later contexts.
        let calls = engine.calls();
        let (_, _, validate_context) = &calls[1];
        assert!(validate_context.contains("I have a headache"));
        let (_, _, report_context) = &calls[2];
        assert!(report_context.contains("I have a headache"));

        // And the report carries it as the chief complaint.
        let content = std::fs::read_to_string(&artifact).unwrap();
        assert!(content.contains("I have a headache"));
    }

    #[tokio::test]
    async fn test_store_failure_keeps_local_artifact() {
        let dir = TempDir::new().unwrap();
        let runner = PipelineRunner::new(
            non_interactive_plan(),
            Arc::new(ScriptedEngine::new()),
            Arc::new(MarkdownRenderer::new(dir.path())),
            fast_retry(),
        )
        .with_store(Arc::new(FailingStore));
        let registry = SessionRegistry::new();
        let session = registry.get_or_create("s3");

        let artifact = runner.run(&session).await.unwrap();
        assert!(
            Path::new(&artifact).exists(),
            "artifact must fall back to the local path"
        );
    }

    #[tokio::test]
    async fn test_store_success_returns_stored_location() {
        let dir = TempDir::new().unwrap();
        let runner = PipelineRunner::new(
            non_interactive_plan(),
            Arc::new(ScriptedEngine::new()),
            Arc::new(MarkdownRenderer::new(dir.path())),
            fast_retry(),
        )
        .with_store(Arc::new(OkStore));
        let registry = SessionRegistry::new();
        let session = registry.get_or_create("s4");

        let artifact = runner.run(&session).await.unwrap();
        assert!(artifact.starts_with("patients/s4/reports/"));
    }

    #[tokio::test]
    async fn test_render_failure_is_fatal() {
        // A file path where the reports directory should be makes
        // create_dir_all fail.
        let dir = TempDir::new().unwrap();
        let blocked = dir.path().join("not-a-dir");
        std::fs::write(&blocked, "occupied").unwrap();

        let runner = PipelineRunner::new(
            non_interactive_plan(),
            Arc::new(ScriptedEngine::new()),
            Arc::new(MarkdownRenderer::new(&blocked)),
            fast_retry(),
        );
        let registry = SessionRegistry::new();
        let session = registry.get_or_create("s5");

        let err = runner.run(&session).await.expect_err("render must fail");
        assert!(matches!(err, PipelineError::Render(_)));
    }
}
