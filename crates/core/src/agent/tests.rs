use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use parley_test_model::{PresetEvent, PresetResponse, TestModelProvider};

use crate::conversation::Role;
use crate::directory::AgentDirectory;
use crate::registry::{Permission, ToolRegistry};
use crate::tool::{Tool, ToolCall, ToolResult};
use crate::{AgentBuilder, ConfigError, RunEvent, RunOutcome};

type Events = Arc<Mutex<Vec<RunEvent>>>;

fn event_collector() -> (Events, impl Fn(RunEvent) + Send + Sync + 'static)
{
    let events: Events = Arc::default();
    let sink_events = Arc::clone(&events);
    (events, move |event| sink_events.lock().unwrap().push(event))
}

fn fragments(events: &[RunEvent]) -> String {
    events
        .iter()
        .filter_map(|event| match event {
            RunEvent::Fragment(fragment) => Some(fragment.as_str()),
            _ => None,
        })
        .collect()
}

fn tool_invocations(events: &[RunEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            RunEvent::ToolInvocation(name) => Some(name.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_plain_text_run() {
    let mut provider = TestModelProvider::default();
    provider.add_context_steps(2);
    provider.add_response_step(PresetResponse::with_events([
        PresetEvent::MessageDelta("11".to_owned()),
        PresetEvent::MessageDelta(":03".to_owned()),
    ]));

    let (events, sink) = event_collector();
    let agent = AgentBuilder::with_model_provider(provider.clone())
        .with_name("timekeeper")
        .with_system_prompt("You tell the time.")
        .on_event(sink)
        .build()
        .unwrap();

    let outcome = agent.run("What time is it?").await.unwrap();
    assert_eq!(outcome, RunOutcome::Finished("11:03".to_owned()));
    assert_eq!(provider.request_count(), 1);

    let events = events.lock().unwrap();
    assert_eq!(fragments(&events), "11:03");
    assert_eq!(
        events
            .iter()
            .filter(|event| matches!(event, RunEvent::Fragment(_)))
            .count(),
        2,
    );
    assert!(tool_invocations(&events).is_empty());
}

#[tokio::test]
async fn test_history_starts_with_system_prompt() {
    let agent = AgentBuilder::with_model_provider(TestModelProvider::default())
        .with_name("timekeeper")
        .with_system_prompt("You tell the time.")
        .build()
        .unwrap();

    let history = agent.history().await;
    let turns = history.turns();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].role, Role::System);
    assert!(turns[0].content.starts_with("You tell the time."));
    // The identifier is appended so the model can self-reference it.
    assert!(turns[0].content.contains(agent.id().as_str()));
}

#[tokio::test]
async fn test_tool_call_turn() {
    let mut provider = TestModelProvider::default();
    provider.add_context_steps(2);
    provider
        .add_response_step(PresetResponse::with_text("<get_time></get_time>"));
    provider.add_context_step();
    provider
        .add_response_step(PresetResponse::with_text("The time is 11:03"));

    let registry = ToolRegistry::new();
    registry.register_fn(
        "get_time",
        "Tells the time",
        Permission::Unrestricted,
        |_| Ok("11:03".to_owned()),
    );

    let (events, sink) = event_collector();
    let agent = AgentBuilder::with_model_provider(provider.clone())
        .with_name("timekeeper")
        .with_system_prompt("You tell the time.")
        .with_registry(registry)
        .on_event(sink)
        .build()
        .unwrap();

    let outcome = agent.run("What time is it?").await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Finished("The time is 11:03".to_owned()),
    );
    assert_eq!(provider.request_count(), 2);

    let history = agent.history().await;
    let feedback: Vec<_> = history
        .turns()
        .iter()
        .filter(|turn| turn.role == Role::Feedback)
        .collect();
    assert_eq!(feedback.len(), 1);
    assert_eq!(feedback[0].content, "get_time results: 11:03");

    // A pure tool-call turn leaves an empty assistant entry, and the
    // loop still proceeds to command execution.
    let assistant: Vec<_> = history
        .turns()
        .iter()
        .filter(|turn| turn.role == Role::Assistant)
        .collect();
    assert_eq!(assistant[0].content, "");

    let events = events.lock().unwrap();
    assert_eq!(tool_invocations(&events), vec!["get_time".to_owned()]);
}

#[tokio::test]
async fn test_completion_wins_over_other_commands() {
    let mut provider = TestModelProvider::default();
    provider.add_context_steps(2);
    provider.add_response_step(PresetResponse::with_text(
        "Almost there. <save_log><data>x</data></save_log>\
         <end><report>done</report></end>",
    ));

    let save_log_calls = Arc::new(AtomicUsize::new(0));
    let registry = ToolRegistry::new();
    registry.register_fn(
        "save_log",
        "Stores a log entry",
        Permission::Unrestricted,
        {
            let save_log_calls = Arc::clone(&save_log_calls);
            move |_| {
                save_log_calls.fetch_add(1, Ordering::Relaxed);
                Ok("saved".to_owned())
            }
        },
    );

    let (events, sink) = event_collector();
    let agent = AgentBuilder::with_model_provider(provider)
        .with_name("archivist")
        .with_system_prompt("You archive things.")
        .with_registry(registry)
        .on_event(sink)
        .build()
        .unwrap();

    let outcome = agent.run("Wrap it up").await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed(Some("done".to_owned())));

    // The other command in the same response is never executed.
    assert_eq!(save_log_calls.load(Ordering::Relaxed), 0);

    let events = events.lock().unwrap();
    assert!(tool_invocations(&events).is_empty());
    assert!(events.contains(&RunEvent::Completed(Some("done".to_owned()))));
}

#[tokio::test]
async fn test_unknown_command_feedback() {
    let mut provider = TestModelProvider::default();
    provider.add_context_steps(2);
    provider.add_response_step(PresetResponse::with_text(
        "Let me try <mystery></mystery>",
    ));
    provider.add_context_step();
    provider.add_response_step(PresetResponse::with_text("I cannot do that."));

    let agent = AgentBuilder::with_model_provider(provider.clone())
        .with_name("explorer")
        .with_system_prompt("You explore.")
        .build()
        .unwrap();

    let outcome = agent.run("Surprise me").await.unwrap();
    assert_eq!(outcome, RunOutcome::Finished("I cannot do that.".to_owned()));
    // The unknown command produced feedback and a second request, not
    // a failure.
    assert_eq!(provider.request_count(), 2);

    let history = agent.history().await;
    let feedback: Vec<_> = history
        .turns()
        .iter()
        .filter(|turn| turn.role == Role::Feedback)
        .collect();
    assert_eq!(feedback.len(), 1);
    assert!(feedback[0].content.contains("mystery"));
}

#[tokio::test]
async fn test_routing_between_agents() {
    let directory = AgentDirectory::new();
    let registry = ToolRegistry::new();

    let mut buddy_provider = TestModelProvider::default();
    buddy_provider.add_context_steps(2);
    buddy_provider.add_response_step(PresetResponse::with_text("11:03"));
    let buddy = AgentBuilder::with_model_provider(buddy_provider)
        .with_name("buddy")
        .with_system_prompt("You answer tersely.")
        .with_registry(registry.clone())
        .with_directory(directory.clone())
        .build()
        .unwrap();

    let mut provider = TestModelProvider::default();
    provider.add_context_steps(2);
    provider.add_response_step(PresetResponse::with_text(
        "<ask><target>buddy</target>\
         <message>What time is it?</message></ask>",
    ));
    provider.add_context_step();
    provider.add_response_step(PresetResponse::with_text(
        "Buddy says it is 11:03",
    ));
    let agent = AgentBuilder::with_model_provider(provider)
        .with_name("concierge")
        .with_system_prompt("You delegate.")
        .with_registry(registry)
        .with_directory(directory)
        .build()
        .unwrap();

    let outcome = agent.run("What time is it?").await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Finished("Buddy says it is 11:03".to_owned()),
    );

    let history = agent.history().await;
    let feedback: Vec<_> = history
        .turns()
        .iter()
        .filter(|turn| turn.role == Role::Feedback)
        .collect();
    assert_eq!(feedback[0].content, "ask results: 11:03");

    // The peer ran inside the caller's tool-execution step.
    let buddy_history = buddy.history().await;
    assert!(buddy_history.turns().iter().any(|turn| {
        turn.role == Role::User && turn.content == "What time is it?"
    }));
}

#[tokio::test]
async fn test_routing_by_identifier() {
    let directory = AgentDirectory::new();

    let mut buddy_provider = TestModelProvider::default();
    buddy_provider.add_context_steps(2);
    buddy_provider.add_response_step(PresetResponse::with_text("pong"));
    let buddy = AgentBuilder::with_model_provider(buddy_provider)
        .with_name("pinger")
        .with_system_prompt("You answer pings.")
        .with_directory(directory.clone())
        .build()
        .unwrap();

    let mut provider = TestModelProvider::default();
    provider.add_context_steps(2);
    provider.add_response_step(PresetResponse::with_text(format!(
        "<ask><target>{}</target><message>ping</message></ask>",
        buddy.id(),
    )));
    provider.add_context_step();
    provider.add_response_step(PresetResponse::with_text("It said pong"));
    let agent = AgentBuilder::with_model_provider(provider)
        .with_name("prober")
        .with_system_prompt("You probe.")
        .with_directory(directory)
        .build()
        .unwrap();

    let outcome = agent.run("Ping the pinger").await.unwrap();
    assert_eq!(outcome, RunOutcome::Finished("It said pong".to_owned()));
}

#[tokio::test]
async fn test_routing_to_busy_agent_reports_busy() {
    let directory = AgentDirectory::new();

    let mut provider = TestModelProvider::default();
    provider.add_context_steps(2);
    provider.add_response_step(PresetResponse::with_text(
        "<ask><target>loner</target><message>hi me</message></ask>",
    ));
    provider.add_context_step();
    provider.add_response_step(PresetResponse::with_text("Never mind."));

    // The agent routes to itself: its own state is locked for the
    // whole run, so the routed call must report busy, not deadlock.
    let agent = AgentBuilder::with_model_provider(provider)
        .with_name("loner")
        .with_system_prompt("You talk to yourself.")
        .with_directory(directory)
        .build()
        .unwrap();

    let outcome = agent.run("Talk").await.unwrap();
    assert_eq!(outcome, RunOutcome::Finished("Never mind.".to_owned()));

    let history = agent.history().await;
    let feedback: Vec<_> = history
        .turns()
        .iter()
        .filter(|turn| turn.role == Role::Feedback)
        .collect();
    assert!(feedback[0].content.contains("already handling a run"));
}

#[tokio::test]
async fn test_routing_depth_budget() {
    let directory = AgentDirectory::new();

    let buddy_provider = TestModelProvider::default();
    let _buddy = AgentBuilder::with_model_provider(buddy_provider.clone())
        .with_name("quiet_peer")
        .with_system_prompt("You answer.")
        .with_directory(directory.clone())
        .build()
        .unwrap();

    let mut provider = TestModelProvider::default();
    provider.add_context_steps(2);
    provider.add_response_step(PresetResponse::with_text(
        "<ask><target>quiet_peer</target><message>hi</message></ask>",
    ));
    provider.add_context_step();
    provider.add_response_step(PresetResponse::with_text("Giving up."));
    let agent = AgentBuilder::with_model_provider(provider)
        .with_name("limited")
        .with_system_prompt("You delegate.")
        .with_directory(directory)
        .with_max_routing_depth(0)
        .build()
        .unwrap();

    let outcome = agent.run("Delegate").await.unwrap();
    assert_eq!(outcome, RunOutcome::Finished("Giving up.".to_owned()));

    let history = agent.history().await;
    let feedback: Vec<_> = history
        .turns()
        .iter()
        .filter(|turn| turn.role == Role::Feedback)
        .collect();
    assert!(feedback[0].content.contains("routing depth budget"));
    // The peer was never called.
    assert_eq!(buddy_provider.request_count(), 0);
}

#[tokio::test]
async fn test_missing_field_feedback() {
    let mut provider = TestModelProvider::default();
    provider.add_context_steps(2);
    provider.add_response_step(PresetResponse::with_text(
        "<ask><message>hi</message></ask>",
    ));
    provider.add_context_step();
    provider.add_response_step(PresetResponse::with_text("Sorry."));

    let agent = AgentBuilder::with_model_provider(provider)
        .with_name("forgetful")
        .with_system_prompt("You delegate.")
        .build()
        .unwrap();

    agent.run("Delegate").await.unwrap();
    let history = agent.history().await;
    let feedback: Vec<_> = history
        .turns()
        .iter()
        .filter(|turn| turn.role == Role::Feedback)
        .collect();
    assert!(
        feedback[0].content.contains("missing required field <target>"),
    );
}

#[tokio::test]
async fn test_malformed_command_feedback() {
    let mut provider = TestModelProvider::default();
    provider.add_context_steps(2);
    provider.add_response_step(PresetResponse::with_text(
        "<ask><target>x</ask>",
    ));
    provider.add_context_step();
    provider.add_response_step(PresetResponse::with_text("My mistake."));

    let agent = AgentBuilder::with_model_provider(provider)
        .with_name("clumsy")
        .with_system_prompt("You delegate.")
        .build()
        .unwrap();

    let outcome = agent.run("Delegate").await.unwrap();
    assert_eq!(outcome, RunOutcome::Finished("My mistake.".to_owned()));

    let history = agent.history().await;
    let feedback: Vec<_> = history
        .turns()
        .iter()
        .filter(|turn| turn.role == Role::Feedback)
        .collect();
    assert!(feedback[0].content.starts_with("Malformed command <ask>"));
}

#[tokio::test]
async fn test_turn_budget() {
    let mut provider = TestModelProvider::default();
    provider.add_context_steps(2);
    provider.add_response_step(PresetResponse::with_text("<echo></echo>"));
    provider.add_context_step();
    provider.add_response_step(PresetResponse::with_text("<echo></echo>"));

    let registry = ToolRegistry::new();
    registry.register_fn("echo", "", Permission::Unrestricted, |_| {
        Ok("ok".to_owned())
    });

    let agent = AgentBuilder::with_model_provider(provider.clone())
        .with_name("looper")
        .with_system_prompt("You loop.")
        .with_registry(registry)
        .with_max_turns(2)
        .build()
        .unwrap();

    let outcome = agent.run("Loop forever").await.unwrap();
    assert_eq!(outcome, RunOutcome::BudgetExceeded);
    assert_eq!(provider.request_count(), 2);
}

#[tokio::test]
async fn test_permission_denied_feedback() {
    let mut provider = TestModelProvider::default();
    provider.add_context_steps(2);
    provider.add_response_step(PresetResponse::with_text(
        "<save_log><data>x</data></save_log>",
    ));
    provider.add_context_step();
    provider.add_response_step(PresetResponse::with_text("Understood."));

    let registry = ToolRegistry::new();
    registry.register_fn(
        "save_log",
        "Stores a log entry",
        Permission::agents(["archivist"]),
        |_| Ok("saved".to_owned()),
    );
    registry.register_fn(
        "get_time",
        "Tells the time",
        Permission::Unrestricted,
        |_| Ok("11:03".to_owned()),
    );

    let agent = AgentBuilder::with_model_provider(provider)
        .with_name("visitor")
        .with_system_prompt("You visit.")
        .with_registry(registry)
        .build()
        .unwrap();

    agent.run("Save this").await.unwrap();
    let history = agent.history().await;
    let feedback: Vec<_> = history
        .turns()
        .iter()
        .filter(|turn| turn.role == Role::Feedback)
        .collect();
    assert!(
        feedback[0].content.contains("Permission denied for <save_log>"),
    );
    assert!(feedback[0].content.contains("get_time"));
}

#[tokio::test]
async fn test_permission_granted_through_alias() {
    let mut provider = TestModelProvider::default();
    provider.add_context_steps(2);
    provider.add_response_step(PresetResponse::with_text(
        "<save_log><data>x</data></save_log>",
    ));
    provider.add_context_step();
    provider.add_response_step(PresetResponse::with_text("Archived."));

    // The allow-list names the display name; the engine presents the
    // opaque identifier, which the alias table must resolve.
    let registry = ToolRegistry::new();
    registry.register_fn(
        "save_log",
        "Stores a log entry",
        Permission::agents(["archivist"]),
        |_| Ok("saved".to_owned()),
    );

    let agent = AgentBuilder::with_model_provider(provider)
        .with_name("archivist")
        .with_system_prompt("You archive things.")
        .with_registry(registry)
        .build()
        .unwrap();

    agent.run("Save this").await.unwrap();
    let history = agent.history().await;
    let feedback: Vec<_> = history
        .turns()
        .iter()
        .filter(|turn| turn.role == Role::Feedback)
        .collect();
    assert_eq!(feedback[0].content, "save_log results: saved");
}

#[tokio::test]
async fn test_commands_execute_in_order() {
    let mut provider = TestModelProvider::default();
    provider.add_context_steps(2);
    provider.add_response_step(PresetResponse::with_text(
        "<record><note>first</note></record>\
         <record><note>second</note></record>",
    ));
    provider.add_context_step();
    provider.add_context_step();
    provider.add_response_step(PresetResponse::with_text("Recorded."));

    let notes = Arc::new(Mutex::new(Vec::new()));
    let registry = ToolRegistry::new();
    registry.register_fn("record", "", Permission::Unrestricted, {
        let notes = Arc::clone(&notes);
        move |block| {
            let note = block.field("note").unwrap_or_default().to_owned();
            notes.lock().unwrap().push(note.clone());
            Ok(note)
        }
    });

    let agent = AgentBuilder::with_model_provider(provider)
        .with_name("recorder")
        .with_system_prompt("You record.")
        .with_registry(registry)
        .build()
        .unwrap();

    agent.run("Record both").await.unwrap();
    assert_eq!(
        *notes.lock().unwrap(),
        vec!["first".to_owned(), "second".to_owned()],
    );
}

#[tokio::test]
async fn test_usage_is_emitted_as_side_channel() {
    let mut provider = TestModelProvider::default();
    provider.add_context_steps(2);
    provider.add_response_step(PresetResponse::with_events([
        PresetEvent::MessageDelta("Hi".to_owned()),
        PresetEvent::Usage(parley_model::UsageSummary {
            prompt_tokens: 9,
            completion_tokens: 4,
            total_tokens: 13,
        }),
    ]));

    let (events, sink) = event_collector();
    let agent = AgentBuilder::with_model_provider(provider)
        .with_name("counter")
        .with_system_prompt("You count.")
        .on_event(sink)
        .build()
        .unwrap();

    agent.run("Hello").await.unwrap();
    let events = events.lock().unwrap();
    assert!(events.iter().any(|event| matches!(
        event,
        RunEvent::Usage(usage) if usage.total_tokens == 13
    )));
    // Usage never enters the history.
    assert_eq!(agent.history().await.turns().len(), 3);
}

#[tokio::test]
async fn test_local_tool_dispatch() {
    struct WhoAmI;

    #[async_trait]
    impl Tool for WhoAmI {
        fn name(&self) -> &str {
            "whoami"
        }

        async fn execute(&self, call: ToolCall) -> ToolResult {
            Ok(format!("{} ({})", call.caller_name, call.caller_id))
        }
    }

    let mut provider = TestModelProvider::default();
    provider.add_context_steps(2);
    provider.add_response_step(PresetResponse::with_text(
        "<whoami></whoami>",
    ));
    provider.add_context_step();
    provider.add_response_step(PresetResponse::with_text("Now I know."));

    // No registry entry: the instance-local command must be found on
    // the agent itself.
    let agent = AgentBuilder::with_model_provider(provider)
        .with_name("introspector")
        .with_system_prompt("You introspect.")
        .with_local_tool(WhoAmI)
        .build()
        .unwrap();

    agent.run("Who are you?").await.unwrap();
    let history = agent.history().await;
    let feedback: Vec<_> = history
        .turns()
        .iter()
        .filter(|turn| turn.role == Role::Feedback)
        .collect();
    assert!(feedback[0].content.starts_with("whoami results: introspector"));
}

#[tokio::test]
async fn test_incomplete_configuration_fails_fast() {
    let err = AgentBuilder::with_model_provider(TestModelProvider::default())
        .with_system_prompt("You have no name.")
        .build()
        .unwrap_err();
    assert_eq!(err, ConfigError::MissingName);

    let err = AgentBuilder::with_model_provider(TestModelProvider::default())
        .with_name("nameless")
        .build()
        .unwrap_err();
    assert_eq!(err, ConfigError::MissingSystemPrompt);

    let directory = AgentDirectory::new();
    AgentBuilder::with_model_provider(TestModelProvider::default())
        .with_name("twin")
        .with_system_prompt("First.")
        .with_directory(directory.clone())
        .build()
        .unwrap();
    let err = AgentBuilder::with_model_provider(TestModelProvider::default())
        .with_name("twin")
        .with_system_prompt("Second.")
        .with_directory(directory)
        .build()
        .unwrap_err();
    assert_eq!(err, ConfigError::DuplicateName("twin".to_owned()));
}
