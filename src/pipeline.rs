//! Stage definitions for the interview pipeline.
//!
//! A plan is a fixed, dependency-consistent sequence of stages. Each stage
//! declares the earlier stages whose outputs it consumes, the role that
//! resolves it, and a fixed instruction payload. Interactive stages route
//! through the session broker (ask the patient, wait for the answer);
//! everything else goes to the reasoning engine through the retry policy.
//!
//! Execution lives in `runner`; this module is pure data.

use serde::{Deserialize, Serialize};

/// Which collaborator resolves a stage, and which fallback it gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageRole {
    /// Talks to the patient. The only role whose fallback is conversational.
    Communicator,
    /// Gathers condition background for the assessment.
    Researcher,
    /// Produces the preliminary diagnostic assessment.
    Assessor,
    /// Writes the clinical report body.
    Reporter,
}

impl StageRole {
    pub fn label(&self) -> &'static str {
        match self {
            StageRole::Communicator => "communicator",
            StageRole::Researcher => "researcher",
            StageRole::Assessor => "assessor",
            StageRole::Reporter => "reporter",
        }
    }
}

/// One unit of work in the interview pipeline.
#[derive(Debug, Clone)]
pub struct StageSpec {
    pub name: String,
    pub role: StageRole,
    /// Names of earlier stages whose outputs feed this one, in the order
    /// they are concatenated into the stage context.
    pub depends_on: Vec<String>,
    /// Fixed instruction payload appended to the dependency context.
    pub instruction: String,
    /// Interactive stages ask the patient instead of the engine.
    pub interactive: bool,
}

impl StageSpec {
    pub fn new(name: &str, role: StageRole, depends_on: Vec<&str>, instruction: &str) -> Self {
        Self {
            name: name.to_string(),
            role,
            depends_on: depends_on.into_iter().map(String::from).collect(),
            instruction: instruction.to_string(),
            interactive: false,
        }
    }

    /// Mark this stage as interactive (question/answer through the broker).
    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }
}

/// An ordered interview plan. The vector order IS the execution order;
/// dependencies must name earlier stages only. That the declaration forms a
/// DAG consistent with this order is a design invariant of plan authors,
/// checked in debug builds only.
#[derive(Debug, Clone)]
pub struct InterviewPlan {
    stages: Vec<StageSpec>,
}

impl InterviewPlan {
    pub fn new(stages: Vec<StageSpec>) -> Self {
        #[cfg(debug_assertions)]
        {
            let mut seen: Vec<&str> = Vec::with_capacity(stages.len());
            for stage in &stages {
                for dep in &stage.depends_on {
                    debug_assert!(
                        seen.contains(&dep.as_str()),
                        "stage {} depends on later stage {}",
                        stage.name,
                        dep
                    );
                }
                seen.push(&stage.name);
            }
        }
        Self { stages }
    }

    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// The production intake interview: two patient-facing turns, then
    /// research, assessment, and the report body.
    pub fn standard() -> Self {
        Self::new(vec![
            StageSpec::new(
                "chief_complaint",
                StageRole::Communicator,
                vec![],
                "Greet the patient and ask one clear opening question about \
                 what symptoms brought them in today. Ask only the question.",
            )
            .interactive(),
            StageSpec::new(
                "history",
                StageRole::Communicator,
                vec!["chief_complaint"],
                "Given the patient's description so far, ask one follow-up \
                 question covering onset, duration, and severity of the main \
                 symptom. Ask only the question.",
            )
            .interactive(),
            StageSpec::new(
                "research",
                StageRole::Researcher,
                vec!["chief_complaint", "history"],
                "Summarize, from trusted medical knowledge, the conditions \
                 most consistent with the reported symptoms. Plain prose, no \
                 diagnosis claims.",
            ),
            StageSpec::new(
                "assessment",
                StageRole::Assessor,
                vec!["chief_complaint", "history", "research"],
                "Write a preliminary diagnostic assessment of the reported \
                 symptoms. Note severity signals and anything that warrants \
                 urgent in-person evaluation.",
            ),
            StageSpec::new(
                "report",
                StageRole::Reporter,
                vec!["chief_complaint", "history", "assessment"],
                "Write the body of a clinical intake report: chief complaint, \
                 history of present illness, detailed symptom review, and \
                 recommendations for further evaluation.",
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_plan_order_and_flags() {
        let plan = InterviewPlan::standard();
        let names: Vec<&str> = plan.stages().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["chief_complaint", "history", "research", "assessment", "report"]
        );

        assert!(plan.stages()[0].interactive);
        assert!(plan.stages()[1].interactive);
        assert!(!plan.stages()[2].interactive);
        assert!(!plan.stages()[3].interactive);
        assert!(!plan.stages()[4].interactive);
    }

    #[test]
    fn test_standard_plan_dependencies_precede_dependents() {
        let plan = InterviewPlan::standard();
        let mut seen: Vec<&str> = Vec::new();
        for stage in plan.stages() {
            for dep in &stage.depends_on {
                assert!(
                    seen.contains(&dep.as_str()),
                    "{} depends on {} which does not precede it",
                    stage.name,
                    dep
                );
            }
            seen.push(&stage.name);
        }
    }

    #[test]
    fn test_stage_spec_builder() {
        let stage = StageSpec::new(
            "validate",
            StageRole::Assessor,
            vec!["interview"],
            "Check the collected answers for consistency.",
        );
        assert_eq!(stage.name, "validate");
        assert_eq!(stage.role, StageRole::Assessor);
        assert_eq!(stage.depends_on, vec!["interview"]);
        assert!(!stage.interactive);

        let interactive = StageSpec::new("interview", StageRole::Communicator, vec![], "Ask.")
            .interactive();
        assert!(interactive.interactive);
    }

    #[test]
    fn test_role_labels_are_distinct() {
        let labels = [
            StageRole::Communicator.label(),
            StageRole::Researcher.label(),
            StageRole::Assessor.label(),
            StageRole::Reporter.label(),
        ];
        for (i, a) in labels.iter().enumerate() {
            for b in labels.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "depends on later stage")]
    fn test_forward_dependency_is_rejected_in_debug() {
        InterviewPlan::new(vec![
            StageSpec::new("a", StageRole::Researcher, vec!["b"], "x"),
            StageSpec::new("b", StageRole::Researcher, vec![], "y"),
        ]);
    }
}
