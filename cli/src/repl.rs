//! Interactive loop: read a line, run a command or the pipeline, print,
//! repeat until EOF or `/exit`.

use std::collections::BTreeSet;
use std::io::Write as _;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use arbiter::{
    ApprovalAction, CheckpointKind, CheckpointStore, ChatOpenAI, DebateEngine, Event, EventBus,
    EventType, Orchestrator, PersonaManager, PipelineOutcome, SessionState, SessionStatus,
};

use crate::commands::Command;

/// Cloud model shortcuts accepted by `/model`.
pub const MODEL_SHORTCUTS: &[(&str, &str)] = &[
    ("gemini", "cloud-pm-gemini"),
    ("claude", "cloud-pm-claude"),
    ("gpt4", "cloud-pm-gpt4"),
];

/// Resolves a `/model` argument: shortcut or verbatim model name.
pub fn resolve_model_name(arg: &str) -> String {
    MODEL_SHORTCUTS
        .iter()
        .find(|(short, _)| *short == arg)
        .map(|(_, full)| full.to_string())
        .unwrap_or_else(|| arg.to_string())
}

/// Everything the REPL needs to serve one user.
pub struct ReplContext {
    pub orchestrator: Orchestrator,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub personas: Arc<PersonaManager>,
    pub debate: DebateEngine,
    pub bus: Arc<EventBus>,
    pub base_url: String,
}

fn publish_lifecycle(ctx: &ReplContext, event_type: EventType, session_id: &str) {
    ctx.bus.publish(Event::new(
        event_type,
        "shell",
        serde_json::json!({ "session_id": session_id }),
    ));
}

/// Per-run shell state: the active session plus the last exchange for
/// `/debate`.
struct ShellState {
    state: SessionState,
    known_sessions: BTreeSet<String>,
    last_user_input: Option<String>,
    last_response: Option<String>,
}

fn print_banner(cloud_label: &str) {
    println!("arbiter — hybrid local/cloud agent shell");
    println!("  cloud model: {}", cloud_label);
    println!(
        "  commands: /new /load /list /current /clear /stats /model /persona\n\
         \x20           /checkpoint /rollback /debate /approve /reject /exit"
    );
}

/// Runs the REPL until EOF or `/exit`.
pub async fn run_repl(ctx: ReplContext, session_name: &str) -> Result<(), Box<dyn std::error::Error>> {
    print_banner(&ctx.orchestrator.cloud_label());

    let mut shell = ShellState {
        state: new_session(session_name),
        known_sessions: BTreeSet::from([session_name.to_string()]),
        last_user_input: None,
        last_response: None,
    };
    publish_lifecycle(&ctx, EventType::SessionStart, session_name);

    let mut reader = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = reader.next_line().await? else {
            break;
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        match Command::parse(&line) {
            Ok(Some(Command::Exit)) => break,
            Ok(Some(command)) => {
                if let Err(e) = handle_command(&ctx, &mut shell, command).await {
                    eprintln!("error: {}", e);
                }
            }
            Ok(None) => {
                run_turn(&ctx, &mut shell, &line).await;
            }
            Err(e) => eprintln!("{}", e),
        }
    }

    publish_lifecycle(&ctx, EventType::SessionEnd, &shell.state.session_id);
    println!("bye");
    Ok(())
}

fn new_session(name: &str) -> SessionState {
    let mut state = SessionState::new();
    state.session_id = name.to_string();
    state
}

async fn run_turn(ctx: &ReplContext, shell: &mut ShellState, input: &str) {
    if shell.state.status == SessionStatus::Suspended {
        println!(
            "session is suspended awaiting approval ({}). Use /approve or /reject.",
            shell
                .state
                .hitl_context
                .as_ref()
                .map(|c| c.reason.as_str())
                .unwrap_or("unknown reason")
        );
        return;
    }

    let cancel = CancellationToken::new();
    match ctx.orchestrator.process(&mut shell.state, input, &cancel).await {
        Ok(PipelineOutcome::Response(text)) => {
            println!("{}", text);
            shell.last_user_input = Some(input.to_string());
            shell.last_response = Some(text);
        }
        Ok(PipelineOutcome::Suspended { reason }) => {
            println!(
                "⏸ approval required: {}. Answer with /approve or /reject.",
                reason
            );
        }
        Ok(PipelineOutcome::Cancelled) => {
            println!("cancelled; a checkpoint was written.");
        }
        Err(e) => eprintln!("pipeline error: {}", e),
    }
}

async fn handle_command(
    ctx: &ReplContext,
    shell: &mut ShellState,
    command: Command,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Exit => unreachable!("handled by the loop"),
        Command::New { name } => {
            publish_lifecycle(ctx, EventType::SessionEnd, &shell.state.session_id);
            shell.state = new_session(&name);
            shell.known_sessions.insert(name.clone());
            publish_lifecycle(ctx, EventType::SessionStart, &name);
            println!("session [{}] created", name);
        }
        Command::Load { name } => {
            match ctx.checkpoints.load(&name, None).await {
                Ok(state) => {
                    shell.state = state;
                    println!(
                        "session [{}] loaded at step {} ({:?})",
                        name, shell.state.step, shell.state.status
                    );
                }
                Err(e) => {
                    warn!(error = %e, "load failed, starting fresh");
                    shell.state = new_session(&name);
                    println!("no checkpoints for [{}], new session started", name);
                }
            }
            shell.known_sessions.insert(name);
        }
        Command::List => {
            for name in &shell.known_sessions {
                let marker = if *name == shell.state.session_id { "*" } else { " " };
                println!("{} {}", marker, name);
            }
        }
        Command::Current => {
            let s = &shell.state;
            println!(
                "session {} | status {:?} | step {} | turn {} | persona {} | cloud {}",
                s.session_id,
                s.status,
                s.step,
                s.turn_number,
                ctx.personas.current_id(),
                ctx.orchestrator.cloud_label(),
            );
            if let Some(hitl) = &s.hitl_context {
                println!("pending approval: {}", hitl.reason);
            }
        }
        Command::Clear => {
            shell.state.conversation_history.clear();
            shell.state.internal_summary.clear();
            println!("conversation cleared");
        }
        Command::Stats => {
            let s = &shell.state;
            let checkpoints = ctx.checkpoints.list(&s.session_id).await?;
            println!(
                "messages {} | entities {} | artifacts {} | checkpoints {} | tokens in/out {}/{}",
                s.conversation_history.len(),
                s.entities.len(),
                s.artifacts.len(),
                checkpoints.len(),
                s.metadata.input_tokens,
                s.metadata.output_tokens,
            );
        }
        Command::Model { name } => {
            let model = resolve_model_name(&name);
            ctx.orchestrator.set_cloud(
                Arc::new(ChatOpenAI::for_proxy(ctx.base_url.clone(), model.clone())),
                model.clone(),
            );
            println!("cloud model set to {}", model);
        }
        Command::Persona { id } => {
            let persona = ctx.personas.switch(&id, "user command")?;
            println!("persona switched to {} ({})", id, persona.display_name);
        }
        Command::Checkpoint { label } => {
            let label = label.unwrap_or_default();
            ctx.checkpoints
                .save(&shell.state, CheckpointKind::Milestone, &label)
                .await?;
            println!(
                "checkpoint saved at step {} ({})",
                shell.state.step,
                if label.is_empty() { "manual" } else { &label }
            );
        }
        Command::Rollback { step } => {
            let target = match step {
                Some(step) => step,
                None => ctx
                    .checkpoints
                    .list(&shell.state.session_id)
                    .await?
                    .last()
                    .map(|i| i.step)
                    .ok_or("no checkpoints to roll back to")?,
            };
            shell.state = ctx
                .checkpoints
                .rollback(&shell.state.session_id, target)
                .await?;
            println!("rolled back to step {}", target);
        }
        Command::Debate => {
            let (Some(task), Some(proposal)) =
                (shell.last_user_input.clone(), shell.last_response.clone())
            else {
                println!("nothing to debate yet; ask something first");
                return Ok(());
            };
            let result = ctx.debate.run(&proposal, &task).await?;
            println!("{}", result.report);
            if result.escalated {
                ctx.orchestrator
                    .hitl()
                    .suspend(
                        &mut shell.state,
                        "Adversarial debate escalation",
                        None,
                        Some(serde_json::json!({ "debate_report": result.report })),
                    )
                    .await?;
                println!("debate escalated; /approve or /reject to continue");
            } else if result.approved {
                shell.last_response = Some(result.final_proposal.clone());
                println!("--- verified answer ---\n{}", result.final_proposal);
            }
        }
        Command::Approve => {
            resume(ctx, shell, ApprovalAction::Approve).await?;
        }
        Command::Reject => {
            resume(ctx, shell, ApprovalAction::Reject).await?;
        }
    }
    Ok(())
}

async fn resume(
    ctx: &ReplContext,
    shell: &mut ShellState,
    action: ApprovalAction,
) -> Result<(), Box<dyn std::error::Error>> {
    let session_id = shell.state.session_id.clone();
    if ctx.orchestrator.hitl().pending(&session_id).is_none() {
        println!("no pending approval");
        return Ok(());
    }
    match ctx.orchestrator.hitl().resume(&session_id, action, None).await? {
        Some(state) => {
            shell.state = state;
            println!("approved; session resumed at step {}", shell.state.step);
        }
        None => {
            // Rejected: pick up the failed state so /current reflects it.
            if let Ok(state) = ctx.checkpoints.load(&session_id, None).await {
                shell.state = state;
            }
            println!("rejected; session marked failed");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: shortcuts expand, unknown names pass through verbatim.
    #[test]
    fn model_shortcuts_resolve() {
        assert_eq!(resolve_model_name("gemini"), "cloud-pm-gemini");
        assert_eq!(resolve_model_name("claude"), "cloud-pm-claude");
        assert_eq!(resolve_model_name("gpt4"), "cloud-pm-gpt4");
        assert_eq!(resolve_model_name("my-custom-model"), "my-custom-model");
    }
}
