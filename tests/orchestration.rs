//! End-to-end runs of the answering and extraction loops against the
//! in-memory store, a keyword embedder, and a scripted model.

mod common;

use std::sync::Arc;

use common::{harness, harness_with, tool_use, KeywordEmbedder, ScriptedLlm};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use knowledge_desk::chat::{AskRequest, Orchestrator, OrchestratorSettings};
use knowledge_desk::limits::ConversationLocks;
use knowledge_desk_core::embedding::Embedder;
use knowledge_desk_core::llm::{ContentBlock, LlmClient, LlmResponse, MessageRole};
use knowledge_desk_core::models::{Role, Scope, Turn};
use knowledge_desk_core::store::Store;
use knowledge_desk_core::Error;
use knowledge_desk::extract::ExtractRequest;
use knowledge_desk::knowledge::add_entry;
use knowledge_desk::limits::RunLimits;
use knowledge_desk::prompt::{FALLBACK_ANSWER, NO_ACTIVE_TASKS, NO_INFORMATION};

fn ask(conversation_id: &str, question: &str) -> AskRequest {
    AskRequest {
        conversation_id: conversation_id.to_string(),
        question: question.to_string(),
    }
}

fn last_tool_results(request: &knowledge_desk_core::llm::LlmRequest) -> Vec<(String, bool)> {
    let last = request.messages.last().expect("request has messages");
    assert_eq!(last.role, MessageRole::User);
    last.content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolResult {
                content, is_error, ..
            } => Some((content.clone(), *is_error)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn ask_runs_tools_then_persists_two_turns() {
    let llm = ScriptedLlm::new(vec![
        tool_use(&[(
            "call_1",
            "create_task",
            json!({ "title": "Draft budget", "description": "Q3 numbers" }),
        )]),
        tool_use(&[("call_2", "list_tasks", json!({}))]),
        LlmResponse::text("I created the budget task."),
    ]);
    let h = harness(llm);
    let scope = Scope::project("p1");

    let answer = h
        .orchestrator
        .ask(&scope, &ask("c1", "Plan the budget"), &RunLimits::default())
        .await
        .unwrap();

    assert_eq!(answer.answer, "I created the budget task.");
    assert_eq!(answer.model_calls, 3);
    assert_eq!(answer.actions.len(), 2);
    assert!(answer.actions.iter().all(|a| a.success));
    assert_eq!(answer.actions[0].message, "Created task: Draft budget");

    let tasks = h.store.list_tasks(&scope).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].description, "Q3 numbers");

    let conversation = h.store.get_conversation(&scope, "c1").await.unwrap().unwrap();
    assert_eq!(
        conversation.messages,
        vec![
            Turn::user("Plan the budget"),
            Turn::assistant("I created the budget task.")
        ]
    );
    assert_eq!(conversation.title, "Plan the budget");

    let requests = h.llm.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].tools.len(), 3);
    // question, tool_use, tool_result, tool_use, tool_result
    assert_eq!(requests[2].messages.len(), 5);
    let results = last_tool_results(&requests[1]);
    assert_eq!(results.len(), 1);
    assert!(results[0].0.starts_with("Created task: Draft budget"));
    assert!(!results[0].1);
    let listing = last_tool_results(&requests[2]);
    assert!(listing[0].0.contains("- [pending] Draft budget: Q3 numbers"));
}

#[tokio::test]
async fn unknown_tool_is_reported_and_loop_continues() {
    let llm = ScriptedLlm::new(vec![
        tool_use(&[("call_1", "send_email", json!({ "to": "x" }))]),
        LlmResponse::text("I cannot send email."),
    ]);
    let h = harness(llm);
    let scope = Scope::project("p1");

    let answer = h
        .orchestrator
        .ask(&scope, &ask("c1", "Email the team"), &RunLimits::default())
        .await
        .unwrap();

    assert_eq!(answer.answer, "I cannot send email.");
    assert_eq!(answer.actions.len(), 1);
    assert!(!answer.actions[0].success);
    assert_eq!(answer.actions[0].message, "Action not found");

    let results = last_tool_results(&h.llm.requests()[1]);
    assert_eq!(results, vec![("Action not found".to_string(), true)]);
}

#[tokio::test]
async fn tool_results_follow_call_order_and_ids() {
    let llm = ScriptedLlm::new(vec![
        tool_use(&[
            ("call_a", "create_task", json!({ "title": "Draft budget" })),
            ("call_b", "send_email", json!({ "to": "team" })),
            ("call_c", "list_tasks", json!({})),
        ]),
        LlmResponse::text("Done."),
    ]);
    let h = harness(llm);

    let answer = h
        .orchestrator
        .ask(&Scope::project("p1"), &ask("c1", "Plan and report"), &RunLimits::default())
        .await
        .unwrap();
    assert_eq!(answer.model_calls, 2);
    let names: Vec<&str> = answer.actions.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["create_task", "send_email", "list_tasks"]);

    let second = &h.llm.requests()[1];
    let replayed = &second.messages[second.messages.len() - 2];
    assert_eq!(replayed.role, MessageRole::Assistant);
    assert_eq!(replayed.content.len(), 3);

    let last = second.messages.last().unwrap();
    assert_eq!(last.role, MessageRole::User);
    let blocks: Vec<(&str, &str, bool)> = last
        .content
        .iter()
        .map(|block| match block {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => (tool_use_id.as_str(), content.as_str(), *is_error),
            other => panic!("unexpected block {:?}", other),
        })
        .collect();
    assert_eq!(blocks.len(), 3);
    assert_eq!(
        blocks.iter().map(|b| b.0).collect::<Vec<_>>(),
        vec!["call_a", "call_b", "call_c"]
    );
    assert_eq!(
        blocks.iter().map(|b| b.2).collect::<Vec<_>>(),
        vec![false, true, false]
    );
    assert_eq!(blocks[1].1, "Action not found");
    // Calls run in order, so the listing sees the task created just before.
    assert!(blocks[2].1.contains("- [pending] Draft budget"));
}

#[tokio::test]
async fn empty_knowledge_base_uses_placeholders() {
    let h = harness(ScriptedLlm::new(vec![LlmResponse::text("Nothing yet.")]));
    let scope = Scope::project("p1");

    let answer = h
        .orchestrator
        .ask(&scope, &ask("c1", "What is our deploy process?"), &RunLimits::default())
        .await
        .unwrap();

    assert!(answer.sources.is_empty());
    let system = &h.llm.requests()[0].system;
    assert!(system.contains(NO_INFORMATION));
    assert!(system.contains(NO_ACTIVE_TASKS));
}

#[tokio::test]
async fn retrieved_fragments_reach_the_prompt_and_stay_in_scope() {
    let h = harness(ScriptedLlm::new(vec![LlmResponse::text("Use the script.")]));
    let scope = Scope::project("p1");
    add_entry(
        h.store.as_ref(),
        h.embedder.as_ref(),
        &scope,
        "Deploy guide",
        "To deploy, run the deploy script from main.",
    )
    .await
    .unwrap();
    add_entry(
        h.store.as_ref(),
        h.embedder.as_ref(),
        &Scope::project("p2"),
        "Other deploy",
        "Secret deploy notes for another project.",
    )
    .await
    .unwrap();

    let answer = h
        .orchestrator
        .ask(&scope, &ask("c1", "How do we deploy?"), &RunLimits::default())
        .await
        .unwrap();

    assert_eq!(answer.sources.len(), 1);
    assert_eq!(answer.sources[0].title, "Deploy guide");
    let system = &h.llm.requests()[0].system;
    assert!(system.contains("run the deploy script from main"));
    assert!(!system.contains("Secret deploy notes"));
}

#[tokio::test]
async fn history_is_replayed_on_the_next_question() {
    let h = harness(ScriptedLlm::new(vec![
        LlmResponse::text("Rust is a language."),
        LlmResponse::text("It is fast."),
    ]));
    let scope = Scope::project("p1");

    h.orchestrator
        .ask(&scope, &ask("c1", "What is Rust?"), &RunLimits::default())
        .await
        .unwrap();
    h.orchestrator
        .ask(&scope, &ask("c1", "Is it fast?"), &RunLimits::default())
        .await
        .unwrap();

    let second = &h.llm.requests()[1];
    assert_eq!(second.messages.len(), 3);
    assert_eq!(second.messages[1].role, MessageRole::Assistant);

    let conversation = h.store.get_conversation(&scope, "c1").await.unwrap().unwrap();
    assert_eq!(conversation.messages.len(), 4);
    assert_eq!(conversation.title, "What is Rust?");
    assert_eq!(conversation.messages[3].role, Role::Assistant);
}

#[tokio::test]
async fn missing_text_falls_back() {
    let h = harness(ScriptedLlm::new(vec![LlmResponse {
        content: vec![],
        stop_reason: knowledge_desk_core::llm::StopReason::EndTurn,
    }]));
    let answer = h
        .orchestrator
        .ask(&Scope::project("p1"), &ask("c1", "Hello?"), &RunLimits::default())
        .await
        .unwrap();
    assert_eq!(answer.answer, FALLBACK_ANSWER);
}

#[tokio::test]
async fn iteration_cap_fails_without_persisting() {
    let settings = OrchestratorSettings {
        max_iterations: 2,
        ..Default::default()
    };
    let llm = ScriptedLlm::endless_tool_use("list_tasks", json!({}), 5);
    let h = harness_with(llm, KeywordEmbedder::new(), settings);
    let scope = Scope::project("p1");
    let limits = h.orchestrator.run_limits(CancellationToken::new());

    let err = h
        .orchestrator
        .ask(&scope, &ask("c1", "Loop forever"), &limits)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ToolLoopExceeded { max_iterations: 2 }));
    assert_eq!(h.llm.requests().len(), 2);
    assert!(h.store.get_conversation(&scope, "c1").await.unwrap().is_none());
}

#[tokio::test]
async fn validation_precedes_network_calls() {
    let h = harness(ScriptedLlm::new(vec![]));
    let err = h
        .orchestrator
        .ask(&Scope::project("p1"), &ask("c1", "   "), &RunLimits::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = h
        .orchestrator
        .ask(&Scope::project(""), &ask("c1", "Hi"), &RunLimits::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    assert_eq!(h.embedder.calls(), 0);
    assert!(h.llm.requests().is_empty());
}

#[tokio::test]
async fn upstream_failures_are_classified() {
    let h = harness_with(
        ScriptedLlm::new(vec![]),
        KeywordEmbedder::failing_after(0),
        OrchestratorSettings::default(),
    );
    let err = h
        .orchestrator
        .ask(&Scope::project("p1"), &ask("c1", "Hi"), &RunLimits::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Upstream { service: "embedding", .. }));
    assert!(h.llm.requests().is_empty());

    let h = harness(ScriptedLlm::failing("anthropic API error (HTTP 529)"));
    let scope = Scope::project("p1");
    let err = h
        .orchestrator
        .ask(&scope, &ask("c1", "Hi"), &RunLimits::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Upstream { service: "llm", .. }));
    assert!(h.store.get_conversation(&scope, "c1").await.unwrap().is_none());
}

#[tokio::test]
async fn cancelled_run_stops_before_the_model() {
    let h = harness(ScriptedLlm::new(vec![LlmResponse::text("unused")]));
    let cancel = CancellationToken::new();
    cancel.cancel();
    let limits = h.orchestrator.run_limits(cancel);

    let err = h
        .orchestrator
        .ask(&Scope::project("p1"), &ask("c1", "Hi"), &limits)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert!(h.llm.requests().is_empty());
}

async fn seed_conversation(h: &common::Harness, scope: &Scope, id: &str) {
    h.store
        .append_turns(
            scope,
            id,
            "Release planning",
            &[
                Turn::user("When is the release?"),
                Turn::assistant("The release is on Friday after the budget meeting."),
            ],
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn extraction_creates_entries_and_deletes_conversation() {
    let llm = ScriptedLlm::new(vec![
        tool_use(&[
            (
                "call_1",
                "create_context",
                json!({ "title": "Release date", "content": "The release is on Friday." }),
            ),
            (
                "call_2",
                "create_context",
                json!({ "title": "Budget meeting", "content": "Budget meeting precedes the release." }),
            ),
        ]),
        LlmResponse::text("Saved two entries."),
    ]);
    let h = harness(llm);
    let scope = Scope::project("p1");
    seed_conversation(&h, &scope, "c1").await;

    let report = h
        .orchestrator
        .extract(
            &scope,
            &ExtractRequest {
                conversation_id: "c1".into(),
                delete_after: true,
            },
            &RunLimits::default(),
        )
        .await
        .unwrap();

    assert_eq!(report.created, vec!["Release date", "Budget meeting"]);
    assert!(report.deleted);
    assert_eq!(report.message, "Extracted 2 contexts from conversation");
    assert_eq!(report.summary.as_deref(), Some("Saved two entries."));
    assert_eq!(h.store.fragment_count(), 2);
    assert!(h.store.get_conversation(&scope, "c1").await.unwrap().is_none());

    let first = &h.llm.requests()[0];
    assert_eq!(first.tools.len(), 1);
    assert_eq!(first.tools[0].name, "create_context");
    match &first.messages[0].content[0] {
        ContentBlock::Text { text } => {
            assert!(text.contains("USER: When is the release?"));
            assert!(text.contains("ASSISTANT: The release is on Friday"));
        }
        other => panic!("unexpected block {:?}", other),
    }
}

#[tokio::test]
async fn extraction_keeps_conversation_when_nothing_was_created() {
    let llm = ScriptedLlm::new(vec![
        tool_use(&[("call_1", "create_task", json!({ "title": "Not allowed" }))]),
        LlmResponse::text("Nothing worth saving."),
    ]);
    let h = harness(llm);
    let scope = Scope::project("p1");
    seed_conversation(&h, &scope, "c1").await;

    let report = h
        .orchestrator
        .extract(
            &scope,
            &ExtractRequest {
                conversation_id: "c1".into(),
                delete_after: true,
            },
            &RunLimits::default(),
        )
        .await
        .unwrap();

    assert!(report.created.is_empty());
    assert!(!report.deleted);
    assert_eq!(report.message, "Extracted 0 contexts from conversation");
    assert!(h.store.list_tasks(&scope).await.unwrap().is_empty());
    assert!(h.store.get_conversation(&scope, "c1").await.unwrap().is_some());

    let results = last_tool_results(&h.llm.requests()[1]);
    assert_eq!(results, vec![("Action not found".to_string(), true)]);
}

#[tokio::test]
async fn extraction_of_missing_conversation_is_not_found() {
    let h = harness(ScriptedLlm::new(vec![]));
    let err = h
        .orchestrator
        .extract(
            &Scope::project("p1"),
            &ExtractRequest {
                conversation_id: "missing".into(),
                delete_after: false,
            },
            &RunLimits::default(),
        )
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(h.llm.requests().is_empty());
}

#[tokio::test]
async fn conversation_of_another_owner_is_refused_before_any_work() {
    let h = harness(ScriptedLlm::new(vec![
        tool_use(&[("call_1", "create_task", json!({ "title": "Sneaky" }))]),
        LlmResponse::text("ok"),
    ]));
    let alice = Scope::project("p1").with_owner("alice");
    let bob = Scope::project("p1").with_owner("bob");
    h.store
        .append_turns(&alice, "c1", "Alice's", &[Turn::user("private")])
        .await
        .unwrap();

    let err = h
        .orchestrator
        .ask(&bob, &ask("c1", "Create a task"), &RunLimits::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::NotFound {
            entity: "conversation",
            ..
        }
    ));
    assert!(h.llm.requests().is_empty());
    assert_eq!(h.embedder.calls(), 0);
    assert!(h.store.list_tasks(&bob).await.unwrap().is_empty());
    let kept = h.store.get_conversation(&alice, "c1").await.unwrap().unwrap();
    assert_eq!(kept.messages, vec![Turn::user("private")]);
}

#[tokio::test]
async fn shared_locks_serialize_orchestrators() {
    let h = harness(ScriptedLlm::new(vec![LlmResponse::text("first")]));
    let locks = Arc::new(ConversationLocks::new());
    let first = h.orchestrator.with_locks(locks.clone());
    let second = Orchestrator::new(
        h.store.clone() as Arc<dyn Store>,
        h.embedder.clone() as Arc<dyn Embedder>,
        Arc::new(ScriptedLlm::new(vec![LlmResponse::text("second")])) as Arc<dyn LlmClient>,
        OrchestratorSettings::default(),
    )
    .with_locks(locks.clone());
    let scope = Scope::project("p1");

    let ask_one = ask("c1", "One?");
    let ask_two = ask("c1", "Two?");
    let limits_one = RunLimits::default();
    let limits_two = RunLimits::default();
    let (a, b) = tokio::join!(
        first.ask(&scope, &ask_one, &limits_one),
        second.ask(&scope, &ask_two, &limits_two),
    );
    a.unwrap();
    b.unwrap();

    let conversation = h.store.get_conversation(&scope, "c1").await.unwrap().unwrap();
    let roles: Vec<Role> = conversation.messages.iter().map(|t| t.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
    );
    assert_eq!(locks.tracked(), 1);
}
