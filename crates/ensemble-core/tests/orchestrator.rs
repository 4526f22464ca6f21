//! End-to-end orchestrator tests over the in-memory repositories: phase
//! ordering, parallel batches, the iteration/failure policy, budget
//! enforcement, recovery, and artifact hand-off.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures_util::Stream;
use uuid::Uuid;

use ensemble_core::event::{ApprovalHandler, EventBus};
use ensemble_core::provider::{BoxLlmProvider, LlmProvider, ProviderRegistry};
use ensemble_core::repository::memory::{MemoryArtifactRepo, MemoryBudgetRepo, MemoryWorkflowRepo};
use ensemble_core::repository::workflow::ExecutionUpdate;
use ensemble_core::repository::WorkflowRepository;
use ensemble_core::workflow::{CreateExecution, Orchestrator};
use ensemble_types::artifact::ArtifactType;
use ensemble_types::error::OrchestratorError;
use ensemble_types::event::WorkflowEvent;
use ensemble_types::llm::{
    GenerationRequest, GenerationResult, LlmError, ModelInfo, ProviderConfig, ProviderType,
    StreamEvent, Usage,
};
use ensemble_types::workflow::{
    FailureBehavior, IterationBehavior, PhaseRole, PhaseStatus, WorkflowPhase, WorkflowStatus,
    WorkflowTemplate,
};

// ---------------------------------------------------------------------------
// Scripted provider
// ---------------------------------------------------------------------------

type Script = Vec<Result<StreamEvent, String>>;

/// Plays back a queue of stream scripts, one per `stream` call, and records
/// every prompt it was asked to generate from. The last script is replayed
/// once the queue runs dry.
#[derive(Clone, Default)]
struct SequenceProvider {
    inner: Arc<ProviderState>,
}

#[derive(Default)]
struct ProviderState {
    scripts: Mutex<VecDeque<Script>>,
    prompts: Mutex<Vec<String>>,
}

impl SequenceProvider {
    fn with_scripts(scripts: Vec<Script>) -> Self {
        Self {
            inner: Arc::new(ProviderState {
                scripts: Mutex::new(scripts.into()),
                prompts: Mutex::new(vec![]),
            }),
        }
    }

    fn prompts(&self) -> Vec<String> {
        self.inner.prompts.lock().unwrap().clone()
    }

    fn calls(&self) -> usize {
        self.inner.prompts.lock().unwrap().len()
    }
}

/// Script that streams `text` followed by the completion signal.
fn succeed(text: &str) -> Script {
    vec![
        Ok(StreamEvent::TextDelta {
            text: text.to_string(),
        }),
        Ok(StreamEvent::TextDelta {
            text: " /complete".to_string(),
        }),
        Ok(StreamEvent::Done),
    ]
}

/// Script that ends without ever emitting the completion signal.
fn fail_no_signal() -> Script {
    vec![
        Ok(StreamEvent::TextDelta {
            text: "partial output".to_string(),
        }),
        Ok(StreamEvent::Done),
    ]
}

/// Script that reports usage before completing, so the ledger records a
/// real cost.
fn succeed_with_usage(tokens_input: u64, tokens_output: u64) -> Script {
    vec![
        Ok(StreamEvent::Usage(Usage {
            tokens_input,
            tokens_output,
        })),
        Ok(StreamEvent::TextDelta {
            text: "done /complete".to_string(),
        }),
        Ok(StreamEvent::Done),
    ]
}

impl LlmProvider for SequenceProvider {
    fn name(&self) -> &str {
        "sequence"
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<GenerationResult, LlmError> {
        Ok(GenerationResult::default())
    }

    fn stream(
        &self,
        request: GenerationRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>> {
        self.inner.prompts.lock().unwrap().push(request.prompt);
        let script = {
            let mut scripts = self.inner.scripts.lock().unwrap();
            if scripts.len() > 1 {
                scripts.pop_front().unwrap()
            } else {
                scripts.front().cloned().unwrap_or_else(|| succeed("ok"))
            }
        };
        Box::pin(async_stream::stream! {
            for event in script {
                yield event.map_err(LlmError::Provider);
            }
        })
    }

    async fn check_health(&self) -> bool {
        true
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, LlmError> {
        Ok(vec![])
    }
}

/// Holds its stream open until the test releases the gate, then completes.
#[derive(Clone)]
struct GatedProvider {
    gate: Arc<tokio::sync::Notify>,
}

impl LlmProvider for GatedProvider {
    fn name(&self) -> &str {
        "gated"
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<GenerationResult, LlmError> {
        Ok(GenerationResult::default())
    }

    fn stream(
        &self,
        _request: GenerationRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>> {
        let gate = Arc::clone(&self.gate);
        Box::pin(async_stream::stream! {
            gate.notified().await;
            yield Ok(StreamEvent::TextDelta {
                text: "done /complete".to_string(),
            });
            yield Ok(StreamEvent::Done);
        })
    }

    async fn check_health(&self) -> bool {
        true
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, LlmError> {
        Ok(vec![])
    }
}

// ---------------------------------------------------------------------------
// Approval handlers
// ---------------------------------------------------------------------------

struct FixedAnswer(bool);

impl ApprovalHandler for FixedAnswer {
    fn request(
        &self,
        _execution_id: Uuid,
        _message: String,
    ) -> Pin<Box<dyn std::future::Future<Output = bool> + Send + '_>> {
        let answer = self.0;
        Box::pin(async move { answer })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

type TestOrchestrator = Orchestrator<MemoryWorkflowRepo, MemoryArtifactRepo, MemoryBudgetRepo>;

struct Harness {
    orchestrator: TestOrchestrator,
    repo: Arc<MemoryWorkflowRepo>,
    bus: EventBus,
}

fn harness(providers: &[(ProviderType, SequenceProvider)]) -> Harness {
    let registry = Arc::new(ProviderRegistry::new());
    for (provider_type, provider) in providers {
        registry.register(*provider_type, BoxLlmProvider::new(provider.clone()));
    }
    let repo = Arc::new(MemoryWorkflowRepo::default());
    let bus = EventBus::new(256);
    let orchestrator = Orchestrator::new(
        Arc::clone(&repo),
        Arc::new(MemoryArtifactRepo::default()),
        Arc::new(MemoryBudgetRepo::default()),
        registry,
        bus.clone(),
    );
    Harness {
        orchestrator,
        repo,
        bus,
    }
}

fn phase(name: &str, provider_type: ProviderType, order: u32) -> WorkflowPhase {
    WorkflowPhase {
        id: Uuid::now_v7(),
        name: name.to_string(),
        role: PhaseRole::Custom,
        provider_config: ProviderConfig {
            provider_type,
            model_name: "test-model".to_string(),
            temperature: 0.1,
            context_length: 8192,
            endpoint_url: None,
        },
        prompt_template: format!("{name}: {{task_description}}"),
        output_artifact_type: ArtifactType::Custom,
        success_pattern: "/complete".to_string(),
        can_skip: true,
        can_iterate: false,
        max_retries: 0,
        timeout_secs: 30,
        parallel_with: None,
        order,
    }
}

fn template(phases: Vec<WorkflowPhase>) -> WorkflowTemplate {
    let now = Utc::now();
    WorkflowTemplate {
        id: Uuid::now_v7(),
        name: "test pipeline".to_string(),
        description: String::new(),
        phases,
        max_iterations: 3,
        iteration_behavior: IterationBehavior::AutoIterate,
        failure_behavior: FailureBehavior::PauseNotify,
        budget_limit: None,
        is_default: false,
        is_global: true,
        project_id: None,
        created_at: now,
        updated_at: now,
    }
}

async fn start_execution(h: &Harness, template: WorkflowTemplate) -> Uuid {
    let template_id = h
        .orchestrator
        .template_service()
        .create(template)
        .await
        .unwrap();
    let execution = h
        .orchestrator
        .create_execution(CreateExecution {
            template_id: Some(template_id),
            task_description: "fix the login bug".to_string(),
            project_path: "/work/repo".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    execution.id
}

fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<WorkflowEvent>) -> Vec<WorkflowEvent> {
    let mut events = vec![];
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn phases_run_in_order_and_parallel_batch_joins() {
    let provider = SequenceProvider::with_scripts(vec![succeed("output")]);
    let h = harness(&[(ProviderType::Ollama, provider)]);

    let mut analysis = phase("Analysis", ProviderType::Ollama, 0);
    analysis.prompt_template = "analyze {task_description}".to_string();
    let mut functional = phase("Functional Review", ProviderType::Ollama, 1);
    functional.parallel_with = Some("Style Review".to_string());
    let mut style = phase("Style Review", ProviderType::Ollama, 1);
    style.parallel_with = Some("Functional Review".to_string());
    let verify = phase("Verification", ProviderType::Ollama, 2);

    let id = start_execution(&h, template(vec![analysis, functional, style, verify])).await;
    let execution = h.orchestrator.run(id).await.unwrap();

    assert_eq!(execution.status, WorkflowStatus::Completed);
    assert_eq!(execution.phase_executions.len(), 4);
    assert!(execution
        .phase_executions
        .iter()
        .all(|pe| pe.status == PhaseStatus::Completed));

    // First and last respect the order index; the middle two form one batch
    assert_eq!(execution.phase_executions[0].phase_name, "Analysis");
    assert_eq!(execution.phase_executions[3].phase_name, "Verification");
    let middle: Vec<_> = execution.phase_executions[1..3]
        .iter()
        .map(|pe| pe.phase_name.as_str())
        .collect();
    assert!(middle.contains(&"Functional Review"));
    assert!(middle.contains(&"Style Review"));
    assert_eq!(execution.artifact_ids.len(), 4);
    assert!(execution.completed_at.is_some());
}

#[tokio::test]
async fn artifact_content_flows_into_later_prompts() {
    let provider = SequenceProvider::with_scripts(vec![
        succeed("the root cause is X"),
        succeed("plan accordingly"),
    ]);
    let h = harness(&[(ProviderType::Ollama, provider.clone())]);

    let analysis = phase("Analysis", ProviderType::Ollama, 0);
    let mut plan = phase("Plan", ProviderType::Ollama, 1);
    // Lookup is case-insensitive; the phase is named "Analysis"
    plan.prompt_template = "Based on {artifact:analysis}, write a plan".to_string();

    let id = start_execution(&h, template(vec![analysis, plan])).await;
    let execution = h.orchestrator.run(id).await.unwrap();

    assert_eq!(execution.status, WorkflowStatus::Completed);
    let prompts = provider.prompts();
    assert_eq!(prompts.len(), 2);
    // Signal stripped, content substituted
    assert!(prompts[1].contains("the root cause is X"));
    assert!(!prompts[1].contains("/complete"));
    assert!(!prompts[1].contains("{artifact:"));
}

#[tokio::test]
async fn parallel_failure_applies_policy_to_whole_batch() {
    // Ollama succeeds, LmStudio never emits the signal
    let good = SequenceProvider::with_scripts(vec![succeed("fine")]);
    let bad = SequenceProvider::with_scripts(vec![fail_no_signal()]);
    let h = harness(&[
        (ProviderType::Ollama, good),
        (ProviderType::LmStudio, bad),
    ]);

    let mut r1 = phase("Functional Review", ProviderType::Ollama, 0);
    r1.parallel_with = Some("Style Review".to_string());
    let mut r2 = phase("Style Review", ProviderType::LmStudio, 0);
    r2.parallel_with = Some("Functional Review".to_string());
    let after = phase("Verification", ProviderType::Ollama, 1);

    let h = Harness {
        orchestrator: h.orchestrator.with_approval_handler(Arc::new(FixedAnswer(false))),
        repo: h.repo,
        bus: h.bus,
    };
    let id = start_execution(&h, template(vec![r1, r2, after])).await;
    let execution = h.orchestrator.run(id).await.unwrap();

    // Both batch members ran to completion of their attempt, then the
    // rejected pause failed the execution before Verification
    assert_eq!(execution.status, WorkflowStatus::Failed);
    assert_eq!(execution.phase_executions.len(), 2);
    assert!(!execution
        .phase_executions
        .iter()
        .any(|pe| pe.phase_name == "Verification"));
}

// ---------------------------------------------------------------------------
// Iteration and failure policy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn auto_iterate_reruns_failed_batch_without_approval() {
    let provider = SequenceProvider::with_scripts(vec![fail_no_signal(), succeed("second try")]);
    let h = harness(&[(ProviderType::Ollama, provider.clone())]);
    let mut rx = h.bus.subscribe();

    let mut implementation = phase("Implementation", ProviderType::Ollama, 0);
    implementation.can_iterate = true;

    let id = start_execution(&h, template(vec![implementation])).await;
    let execution = h.orchestrator.run(id).await.unwrap();

    assert_eq!(execution.status, WorkflowStatus::Completed);
    assert_eq!(execution.iteration, 2);
    assert_eq!(execution.phase_executions.len(), 2);
    assert_eq!(execution.phase_executions[0].status, PhaseStatus::Failed);
    assert_eq!(execution.phase_executions[1].status, PhaseStatus::Completed);
    assert_eq!(provider.calls(), 2);

    // Auto-iterate never asks anyone
    let events = drain_events(&mut rx);
    assert!(!events
        .iter()
        .any(|e| matches!(e, WorkflowEvent::ApprovalRequested { .. })));
}

#[tokio::test]
async fn iteration_stops_at_template_ceiling() {
    let provider = SequenceProvider::with_scripts(vec![fail_no_signal()]);
    let h = harness(&[(ProviderType::Ollama, provider.clone())]);

    let mut implementation = phase("Implementation", ProviderType::Ollama, 0);
    implementation.can_iterate = true;
    let mut t = template(vec![implementation]);
    t.max_iterations = 2;

    let h = Harness {
        orchestrator: h.orchestrator.with_approval_handler(Arc::new(FixedAnswer(false))),
        repo: h.repo,
        bus: h.bus,
    };
    let id = start_execution(&h, t).await;
    let execution = h.orchestrator.run(id).await.unwrap();

    // One retry brings the counter to the ceiling, then the failure policy
    // takes over and the rejection ends it
    assert_eq!(execution.status, WorkflowStatus::Failed);
    assert_eq!(execution.iteration, 2);
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn pause_for_approval_asks_before_iterating() {
    let provider = SequenceProvider::with_scripts(vec![fail_no_signal(), succeed("retried")]);
    let h = harness(&[(ProviderType::Ollama, provider.clone())]);
    let mut rx = h.bus.subscribe();

    let mut implementation = phase("Implementation", ProviderType::Ollama, 0);
    implementation.can_iterate = true;
    let mut t = template(vec![implementation]);
    t.iteration_behavior = IterationBehavior::PauseForApproval;

    let h = Harness {
        orchestrator: h.orchestrator.with_approval_handler(Arc::new(FixedAnswer(true))),
        repo: h.repo,
        bus: h.bus,
    };
    let id = start_execution(&h, t).await;
    let execution = h.orchestrator.run(id).await.unwrap();

    assert_eq!(execution.status, WorkflowStatus::Completed);
    assert_eq!(execution.iteration, 2);

    let events = drain_events(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, WorkflowEvent::ApprovalRequested { .. })));
    // The awaiting_approval transition was visible on the bus
    assert!(events.iter().any(|e| matches!(
        e,
        WorkflowEvent::StatusChanged {
            status: WorkflowStatus::AwaitingApproval,
            ..
        }
    )));
}

#[tokio::test]
async fn pause_notify_rejection_fails_and_blocks_later_phases() {
    let bad = SequenceProvider::with_scripts(vec![fail_no_signal()]);
    let good = SequenceProvider::with_scripts(vec![succeed("never reached")]);
    let h = harness(&[
        (ProviderType::LmStudio, bad),
        (ProviderType::Ollama, good.clone()),
    ]);

    let failing = phase("Analysis", ProviderType::LmStudio, 0);
    let downstream = phase("Plan", ProviderType::Ollama, 1);

    let h = Harness {
        orchestrator: h.orchestrator.with_approval_handler(Arc::new(FixedAnswer(false))),
        repo: h.repo,
        bus: h.bus,
    };
    let id = start_execution(&h, template(vec![failing, downstream])).await;
    let execution = h.orchestrator.run(id).await.unwrap();

    assert_eq!(execution.status, WorkflowStatus::Failed);
    assert_eq!(good.calls(), 0);
}

#[tokio::test]
async fn pause_notify_acceptance_retries_without_incrementing_iteration() {
    let provider = SequenceProvider::with_scripts(vec![fail_no_signal(), succeed("recovered")]);
    let h = harness(&[(ProviderType::Ollama, provider.clone())]);

    let analysis = phase("Analysis", ProviderType::Ollama, 0);

    let h = Harness {
        orchestrator: h.orchestrator.with_approval_handler(Arc::new(FixedAnswer(true))),
        repo: h.repo,
        bus: h.bus,
    };
    let id = start_execution(&h, template(vec![analysis])).await;
    let execution = h.orchestrator.run(id).await.unwrap();

    assert_eq!(execution.status, WorkflowStatus::Completed);
    assert_eq!(execution.iteration, 1);
    assert_eq!(execution.phase_executions.len(), 2);
}

#[tokio::test]
async fn pause_notify_without_handler_pauses_instead_of_retrying() {
    let bad = SequenceProvider::with_scripts(vec![fail_no_signal()]);
    let good = SequenceProvider::with_scripts(vec![succeed("never reached")]);
    let h = harness(&[
        (ProviderType::LmStudio, bad.clone()),
        (ProviderType::Ollama, good.clone()),
    ]);
    let mut rx = h.bus.subscribe();

    let failing = phase("Analysis", ProviderType::LmStudio, 0);
    let downstream = phase("Plan", ProviderType::Ollama, 1);

    // No approval handler installed: nobody can answer, so the execution
    // must park as paused rather than retry the failing batch forever
    let id = start_execution(&h, template(vec![failing, downstream])).await;
    let execution = h.orchestrator.run(id).await.unwrap();

    assert_eq!(execution.status, WorkflowStatus::Paused);
    assert_eq!(execution.completed_at, None);
    assert_eq!(bad.calls(), 1);
    assert_eq!(good.calls(), 0);

    // The operator was still notified
    let events = drain_events(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, WorkflowEvent::ApprovalRequested { .. })));
}

#[tokio::test]
async fn skip_phase_policy_advances_past_failed_batch() {
    let bad = SequenceProvider::with_scripts(vec![fail_no_signal()]);
    let good = SequenceProvider::with_scripts(vec![succeed("still runs")]);
    let h = harness(&[
        (ProviderType::LmStudio, bad),
        (ProviderType::Ollama, good.clone()),
    ]);

    let failing = phase("Analysis", ProviderType::LmStudio, 0);
    let downstream = phase("Plan", ProviderType::Ollama, 1);
    let mut t = template(vec![failing, downstream]);
    t.failure_behavior = FailureBehavior::SkipPhase;

    let id = start_execution(&h, t).await;
    let execution = h.orchestrator.run(id).await.unwrap();

    assert_eq!(execution.status, WorkflowStatus::Completed);
    assert_eq!(good.calls(), 1);
    assert_eq!(execution.phase_executions.len(), 2);
    assert_eq!(execution.phase_executions[0].status, PhaseStatus::Failed);
    assert_eq!(execution.phase_executions[1].status, PhaseStatus::Completed);
}

// ---------------------------------------------------------------------------
// Budget enforcement
// ---------------------------------------------------------------------------

#[tokio::test]
async fn execution_over_budget_stops_before_next_batch() {
    // gpt-4o at $2.50/M input and $10/M output: 200k in + 100k out = $1.50
    let provider = SequenceProvider::with_scripts(vec![succeed_with_usage(200_000, 100_000)]);
    let h = harness(&[(ProviderType::Openai, provider.clone())]);
    let mut rx = h.bus.subscribe();

    let mut first = phase("Analysis", ProviderType::Openai, 0);
    first.provider_config.model_name = "gpt-4o".to_string();
    let second = phase("Plan", ProviderType::Openai, 1);

    let template_id = h
        .orchestrator
        .template_service()
        .create(template(vec![first, second]))
        .await
        .unwrap();
    let execution = h
        .orchestrator
        .create_execution(CreateExecution {
            template_id: Some(template_id),
            task_description: "expensive task".to_string(),
            budget_limit: Some(1.0),
            ..Default::default()
        })
        .await
        .unwrap();

    let execution = h.orchestrator.run(execution.id).await.unwrap();

    assert_eq!(execution.status, WorkflowStatus::BudgetExceeded);
    assert_eq!(execution.phase_executions.len(), 1);
    assert!((execution.total_cost_usd - 1.5).abs() < 1e-9);
    assert_eq!(provider.calls(), 1);

    let events = drain_events(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        WorkflowEvent::StatusChanged {
            status: WorkflowStatus::BudgetExceeded,
            ..
        }
    )));
}

#[tokio::test]
async fn local_providers_cost_nothing() {
    let provider = SequenceProvider::with_scripts(vec![succeed_with_usage(500_000, 500_000)]);
    let h = harness(&[(ProviderType::Ollama, provider)]);

    let analysis = phase("Analysis", ProviderType::Ollama, 0);
    let template_id = h
        .orchestrator
        .template_service()
        .create(template(vec![analysis]))
        .await
        .unwrap();
    let execution = h
        .orchestrator
        .create_execution(CreateExecution {
            template_id: Some(template_id),
            task_description: "local task".to_string(),
            budget_limit: Some(0.01),
            ..Default::default()
        })
        .await
        .unwrap();

    let execution = h.orchestrator.run(execution.id).await.unwrap();

    assert_eq!(execution.status, WorkflowStatus::Completed);
    assert_eq!(execution.total_cost_usd, 0.0);
    assert_eq!(execution.total_tokens_input, 500_000);
}

// ---------------------------------------------------------------------------
// External transitions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_is_illegal_on_terminal_executions() {
    let provider = SequenceProvider::with_scripts(vec![succeed("ok")]);
    let h = harness(&[(ProviderType::Ollama, provider)]);

    let id = start_execution(&h, template(vec![phase("A", ProviderType::Ollama, 0)])).await;
    h.orchestrator.run(id).await.unwrap();

    let err = h.orchestrator.cancel(id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::IllegalStatus { .. }));
}

#[tokio::test]
async fn cancel_pending_execution() {
    let provider = SequenceProvider::with_scripts(vec![succeed("ok")]);
    let h = harness(&[(ProviderType::Ollama, provider)]);

    let id = start_execution(&h, template(vec![phase("A", ProviderType::Ollama, 0)])).await;
    h.orchestrator.cancel(id).await.unwrap();

    let execution = h.orchestrator.get_execution(id).await.unwrap().unwrap();
    assert_eq!(execution.status, WorkflowStatus::Cancelled);
    assert!(execution.completed_at.is_some());
}

#[tokio::test]
async fn external_cancel_keeps_its_own_timestamp() {
    let gate = Arc::new(tokio::sync::Notify::new());
    let tail = SequenceProvider::with_scripts(vec![succeed("never reached")]);

    let registry = Arc::new(ProviderRegistry::new());
    registry.register(
        ProviderType::Ollama,
        BoxLlmProvider::new(GatedProvider {
            gate: Arc::clone(&gate),
        }),
    );
    registry.register(ProviderType::LmStudio, BoxLlmProvider::new(tail.clone()));
    let repo = Arc::new(MemoryWorkflowRepo::default());
    let bus = EventBus::new(256);
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&repo),
        Arc::new(MemoryArtifactRepo::default()),
        Arc::new(MemoryBudgetRepo::default()),
        registry,
        bus.clone(),
    ));

    let template_id = orchestrator
        .template_service()
        .create(template(vec![
            phase("Slow", ProviderType::Ollama, 0),
            phase("Tail", ProviderType::LmStudio, 1),
        ]))
        .await
        .unwrap();
    let id = orchestrator
        .create_execution(CreateExecution {
            template_id: Some(template_id),
            task_description: "fix the login bug".to_string(),
            project_path: "/work/repo".to_string(),
            ..Default::default()
        })
        .await
        .unwrap()
        .id;

    let mut rx = bus.subscribe();
    let run = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move { orchestrator.run(id).await.unwrap() }
    });

    // Wait until the first phase is in flight and parked on the gate
    loop {
        if let WorkflowEvent::PhaseStarted { .. } = rx.recv().await.unwrap() {
            break;
        }
    }

    // Another process cancels through the shared store, stamping its own
    // completion time, then the in-flight phase finishes
    let cancelled_at = Utc::now();
    repo.update_execution(
        &id,
        &ExecutionUpdate {
            status: Some(WorkflowStatus::Cancelled),
            completed_at: Some(cancelled_at),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    gate.notify_one();

    let execution = run.await.unwrap();
    assert_eq!(execution.status, WorkflowStatus::Cancelled);
    // The cancel timestamp survives; the loop exit does not restamp it
    assert_eq!(execution.completed_at, Some(cancelled_at));
    assert_eq!(tail.calls(), 0);
}

#[tokio::test]
async fn resume_requires_paused_or_awaiting() {
    let provider = SequenceProvider::with_scripts(vec![succeed("ok")]);
    let h = harness(&[(ProviderType::Ollama, provider)]);

    let id = start_execution(&h, template(vec![phase("A", ProviderType::Ollama, 0)])).await;

    // Pending is not resumable
    let err = h.orchestrator.resume(id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::IllegalStatus { .. }));

    // A paused execution re-runs to completion
    h.repo
        .update_execution(
            &id,
            &ExecutionUpdate {
                status: Some(WorkflowStatus::Paused),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    // Drop the stale cached copy
    h.orchestrator.invalidate_cache(id);
    let execution = h.orchestrator.resume(id).await.unwrap();
    assert_eq!(execution.status, WorkflowStatus::Completed);
}

#[tokio::test]
async fn skip_phase_requires_paused_and_failed_target() {
    let provider = SequenceProvider::with_scripts(vec![fail_no_signal()]);
    let h = harness(&[(ProviderType::Ollama, provider)]);

    let target = phase("Analysis", ProviderType::Ollama, 0);
    let target_id = target.id;

    let h = Harness {
        orchestrator: h.orchestrator.with_approval_handler(Arc::new(FixedAnswer(false))),
        repo: h.repo,
        bus: h.bus,
    };
    let id = start_execution(&h, template(vec![target])).await;
    let execution = h.orchestrator.run(id).await.unwrap();
    assert_eq!(execution.status, WorkflowStatus::Failed);

    // Failed execution (not paused) rejects the operation
    let err = h.orchestrator.skip_phase(id, target_id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::IllegalStatus { .. }));

    // Force paused, then the failed phase execution can be marked skipped
    h.repo
        .update_execution(
            &id,
            &ExecutionUpdate {
                status: Some(WorkflowStatus::Paused),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    h.orchestrator.invalidate_cache(id);
    h.orchestrator.skip_phase(id, target_id).await.unwrap();

    let refreshed = h.orchestrator.get_execution(id).await.unwrap().unwrap();
    assert_eq!(refreshed.phase_executions[0].status, PhaseStatus::Skipped);

    // A phase with no failed record is not skippable
    let err = h
        .orchestrator
        .skip_phase(id, Uuid::now_v7())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::PhaseNotSkippable(_)));
}

#[tokio::test]
async fn resume_does_not_rerun_finished_batches() {
    let first = SequenceProvider::with_scripts(vec![fail_no_signal()]);
    let second = SequenceProvider::with_scripts(vec![succeed("review done")]);
    let h = harness(&[
        (ProviderType::Ollama, first.clone()),
        (ProviderType::LmStudio, second.clone()),
    ]);
    let h = Harness {
        orchestrator: h.orchestrator.with_approval_handler(Arc::new(FixedAnswer(false))),
        repo: h.repo,
        bus: h.bus,
    };

    let analysis = phase("Analysis", ProviderType::Ollama, 0);
    let analysis_id = analysis.id;
    let review = phase("Review", ProviderType::LmStudio, 1);

    let id = start_execution(&h, template(vec![analysis, review])).await;
    let execution = h.orchestrator.run(id).await.unwrap();
    assert_eq!(execution.status, WorkflowStatus::Failed);
    assert_eq!(first.calls(), 1);
    assert_eq!(second.calls(), 0);

    // Operator pauses the execution, writes the first phase off, resumes
    h.repo
        .update_execution(
            &id,
            &ExecutionUpdate {
                status: Some(WorkflowStatus::Paused),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    h.orchestrator.invalidate_cache(id);
    h.orchestrator.skip_phase(id, analysis_id).await.unwrap();

    let execution = h.orchestrator.resume(id).await.unwrap();
    assert_eq!(execution.status, WorkflowStatus::Completed);
    // The skipped first batch is not re-run; the loop picks up at Review
    assert_eq!(first.calls(), 1);
    assert_eq!(second.calls(), 1);
}

// ---------------------------------------------------------------------------
// Recovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn recovery_demotes_running_to_paused() {
    let provider = SequenceProvider::with_scripts(vec![succeed("ok")]);
    let h = harness(&[(ProviderType::Ollama, provider)]);

    let interrupted = start_execution(&h, template(vec![phase("A", ProviderType::Ollama, 0)])).await;
    h.repo
        .update_execution(
            &interrupted,
            &ExecutionUpdate {
                status: Some(WorkflowStatus::Running),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let report = h
        .orchestrator
        .recover_interrupted_executions()
        .await
        .unwrap();
    assert_eq!(report.recovered, 1);
    assert_eq!(report.awaiting_action, 0);

    let execution = h
        .orchestrator
        .get_execution(interrupted)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(execution.status, WorkflowStatus::Paused);

    // Second pass finds nothing running, one already paused
    let report = h
        .orchestrator
        .recover_interrupted_executions()
        .await
        .unwrap();
    assert_eq!(report.recovered, 0);
    assert_eq!(report.awaiting_action, 1);
}

// ---------------------------------------------------------------------------
// Template resolution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_execution_falls_back_to_default_template() {
    let provider = SequenceProvider::with_scripts(vec![succeed("ok")]);
    let h = harness(&[(ProviderType::Ollama, provider)]);

    // No template at all
    let err = h
        .orchestrator
        .create_execution(CreateExecution {
            task_description: "anything".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NoTemplateFound));

    let mut t = template(vec![phase("A", ProviderType::Ollama, 0)]);
    t.is_default = true;
    let template_id = h.orchestrator.template_service().create(t).await.unwrap();

    let execution = h
        .orchestrator
        .create_execution(CreateExecution {
            task_description: "anything".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(execution.template_id, template_id);
    assert_eq!(execution.status, WorkflowStatus::Pending);
    assert_eq!(execution.iteration, 1);
}

#[tokio::test]
async fn execution_inherits_template_budget_limit() {
    let provider = SequenceProvider::with_scripts(vec![succeed("ok")]);
    let h = harness(&[(ProviderType::Ollama, provider)]);

    let mut t = template(vec![phase("A", ProviderType::Ollama, 0)]);
    t.budget_limit = Some(5.0);
    let template_id = h.orchestrator.template_service().create(t).await.unwrap();

    let inherited = h
        .orchestrator
        .create_execution(CreateExecution {
            template_id: Some(template_id),
            task_description: "t".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(inherited.budget_limit, Some(5.0));

    let overridden = h
        .orchestrator
        .create_execution(CreateExecution {
            template_id: Some(template_id),
            task_description: "t".to_string(),
            budget_limit: Some(2.0),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(overridden.budget_limit, Some(2.0));
}
