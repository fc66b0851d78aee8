//! AgentLoop 集成测试：先规划后执行的重新规划流程、重规划上限、死锁终止、各策略端到端

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bee_planner::config::PlannerSection;
use bee_planner::plan::PlanExecutor;
use bee_planner::reasoner::{PlanDraft, StepDraft};
use bee_planner::tools::{FnTool, ToolEngine};
use bee_planner::{
    AgentError, AgentEvent, AgentLoop, PlannerFactory, PlannerStrategy, Reasoner, ScriptedReasoner,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;

/// fetch 返回正文并计数；parse 总是失败；parse_v2 处理 text
fn engine(fetch_calls: Arc<AtomicUsize>) -> Arc<ToolEngine> {
    let engine = ToolEngine::new(Duration::from_secs(5));
    engine
        .register_tool(FnTool::new("fetch", "downloads a page", move |_| {
            let calls = fetch_calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<Value, String>(json!({"body": "raw text"}))
            }
        }))
        .unwrap();
    engine
        .register_tool(FnTool::new("parse", "legacy parser", |_| async {
            Err::<Value, String>("parser crashed".to_string())
        }))
        .unwrap();
    engine
        .register_tool(FnTool::new("parse_v2", "parses text", |input| async move {
            let text = input["text"].as_str().unwrap_or_default().to_string();
            Ok::<Value, String>(json!(format!("parsed: {text}")))
        }))
        .unwrap();
    Arc::new(engine)
}

fn step(id: &str, tool: &str, args: Value, deps: &[&str]) -> StepDraft {
    StepDraft {
        id: id.to_string(),
        description: format!("run {tool}"),
        tool: tool.to_string(),
        args,
        dependencies: deps.iter().map(|d| d.to_string()).collect(),
        parallel: false,
    }
}

fn fetch_then_broken_parse() -> PlanDraft {
    PlanDraft::new(vec![
        step("fetch", "fetch", json!({"url": "https://example.com"}), &[]),
        step("parse", "parse", json!({"text": "{{fetch.body}}"}), &["fetch"]),
    ])
}

fn agent(
    strategy: PlannerStrategy,
    reasoner: Arc<ScriptedReasoner>,
    engine: Arc<ToolEngine>,
) -> AgentLoop {
    let reasoner: Arc<dyn Reasoner> = reasoner;
    let section = PlannerSection {
        branching: 2,
        ..PlannerSection::default()
    };
    let planner = PlannerFactory::create(strategy, Some(reasoner), &section).unwrap();
    let executor = PlanExecutor::new(engine.clone()).with_max_retries(0);
    AgentLoop::new(planner, engine)
        .with_executor(executor)
        .with_max_iterations(6)
}

#[test]
fn test_factory_without_reasoner_fails_for_every_strategy() {
    for strategy in [
        PlannerStrategy::Iterative,
        PlannerStrategy::PlanExecute,
        PlannerStrategy::Reflexion,
        PlannerStrategy::TreeOfThought,
    ] {
        let err = PlannerFactory::create(strategy, None, &PlannerSection::default()).err();
        assert!(matches!(err, Some(AgentError::MissingReasoner)), "{strategy}");
    }
    let section = PlannerSection {
        strategy: "genetic".to_string(),
        ..PlannerSection::default()
    };
    let reasoner: Arc<dyn Reasoner> = Arc::new(ScriptedReasoner::new());
    assert!(matches!(
        PlannerFactory::from_config(Some(reasoner), &section).err(),
        Some(AgentError::ConfigError(_))
    ));
}

#[tokio::test]
async fn test_replan_reuses_successful_steps() {
    let fetch_calls = Arc::new(AtomicUsize::new(0));
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .plan(fetch_then_broken_parse())
            .plan(PlanDraft::new(vec![step(
                "parse2",
                "parse_v2",
                json!({"text": "{{fetch.body}}"}),
                &["fetch"],
            )])),
    );
    let (tx, mut rx) = mpsc::unbounded_channel();
    let agent = agent(PlannerStrategy::PlanExecute, reasoner.clone(), engine(fetch_calls.clone()))
        .with_event_tx(tx);

    let outcome = agent.run("summarize the page").await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.answer.as_deref(), Some("parsed: raw text"));
    assert_eq!(outcome.iterations, 2);
    assert_eq!(fetch_calls.load(Ordering::SeqCst), 1);

    let planning = reasoner.planning_contexts().await;
    assert_eq!(planning.len(), 2);
    assert!(planning[0].previous_execution.is_none());
    assert!(planning[0].tool_schemas.contains("\"parse_v2\""));
    assert!(planning[0].tool_schemas.contains("parses text"));
    let previous = planning[1].previous_execution.as_ref().expect("replan context");
    assert_eq!(previous.preserved_steps.len(), 1);
    assert_eq!(previous.preserved_steps[0].id, "fetch");
    assert_eq!(previous.preserved_steps[0].result, json!({"body": "raw text"}));
    assert!(previous.failure_analysis.contains("parser crashed"));

    let mut replans = 0;
    while let Ok(event) = rx.try_recv() {
        if let AgentEvent::ReplanTriggered { replan, cause } = event {
            assert_eq!(replan, 1);
            assert!(cause.starts_with("parse (parse)"));
            replans += 1;
        }
    }
    assert_eq!(replans, 1);
}

#[tokio::test]
async fn test_replan_limit_reports_partial_results() {
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .plan(fetch_then_broken_parse())
            .plan(PlanDraft::new(vec![step(
                "parse",
                "parse",
                json!({"text": "{{fetch.body}}"}),
                &["fetch"],
            )])),
    );
    let agent = agent(
        PlannerStrategy::PlanExecute,
        reasoner.clone(),
        engine(Arc::new(AtomicUsize::new(0))),
    )
    .with_max_replans(1);

    let outcome = agent.run("summarize the page").await;

    assert!(!outcome.success);
    assert_eq!(outcome.error.as_deref(), Some("Replan limit reached after 1 replans"));
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.partial_results, vec![json!({"body": "raw text"})]);
    assert_eq!(reasoner.planning_contexts().await.len(), 2);
}

#[tokio::test]
async fn test_deadlock_ends_run() {
    let reasoner = Arc::new(
        ScriptedReasoner::new().plan(PlanDraft::new(vec![
            step("parse", "parse", json!({"text": "x"}), &[]),
            step("after", "parse_v2", json!({"text": "{{parse}}"}), &["parse"]),
        ])),
    );
    let agent = agent(
        PlannerStrategy::PlanExecute,
        reasoner.clone(),
        engine(Arc::new(AtomicUsize::new(0))),
    );

    let outcome = agent.run("parse it").await;

    assert!(!outcome.success);
    assert_eq!(outcome.iterations, 1);
    let error = outcome.error.unwrap_or_default();
    assert!(error.contains("plan deadlocked"), "{error}");
    assert!(error.contains("unreachable [after]"), "{error}");
    assert_eq!(reasoner.call_count(), 1);
}

#[tokio::test]
async fn test_reflexion_feeds_critique_into_next_think() {
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .reply(
                "try the parser",
                json!({"type": "tool_call", "call": {"toolName": "parse", "input": {"text": "x"}}}),
            )
            .critique("The legacy parser is broken; use parse_v2.")
            .reply("done", json!({"type": "final_answer", "answer": "parsed with v2"})),
    );
    let agent = agent(
        PlannerStrategy::Reflexion,
        reasoner.clone(),
        engine(Arc::new(AtomicUsize::new(0))),
    );

    let outcome = agent.run("parse it").await;

    assert!(outcome.success);
    assert_eq!(outcome.answer.as_deref(), Some("parsed with v2"));
    assert_eq!(outcome.history[0].observation.feedback, "The legacy parser is broken; use parse_v2.");
    let prompts = reasoner.prompts().await;
    assert_eq!(prompts.len(), 3);
    assert_eq!(prompts[2].reflections, vec!["The legacy parser is broken; use parse_v2."]);
}

#[tokio::test]
async fn test_tree_of_thought_runs_best_candidate() {
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .reply_with_confidence(
                "fetch first",
                json!({"tool": "fetch", "args": {}}),
                0.3,
            )
            .reply_with_confidence("answer now", json!({"answer": "already known"}), 0.8),
    );
    let fetch_calls = Arc::new(AtomicUsize::new(0));
    let agent = agent(PlannerStrategy::TreeOfThought, reasoner.clone(), engine(fetch_calls.clone()));

    let outcome = agent.run("what is it").await;

    assert!(outcome.success);
    assert_eq!(outcome.answer.as_deref(), Some("already known"));
    assert_eq!(fetch_calls.load(Ordering::SeqCst), 0);
    assert_eq!(reasoner.call_count(), 2);
}

#[tokio::test]
async fn test_iterative_parallel_batch_then_answer() {
    let fetch_calls = Arc::new(AtomicUsize::new(0));
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .reply(
                "fetch twice",
                json!({
                    "type": "parallel_tools",
                    "calls": [
                        {"toolName": "fetch", "input": {"url": "a"}},
                        {"toolName": "fetch", "input": {"url": "b"}}
                    ]
                }),
            )
            .reply("done", json!({"answer": "both fetched"})),
    );
    let agent = agent(PlannerStrategy::Iterative, reasoner, engine(fetch_calls.clone()));

    let outcome = agent.run("fetch both").await;

    assert!(outcome.success);
    assert_eq!(outcome.iterations, 2);
    assert_eq!(fetch_calls.load(Ordering::SeqCst), 2);
    assert_eq!(outcome.partial_results.len(), 2);
}
