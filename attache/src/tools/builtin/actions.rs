//! Approval-gated action tools: terminal commands and code execution.
//!
//! Both require the matching permission flag and a resolved-approved consent
//! exchange before anything runs. Denial (or timeout) fails the call without
//! side effects.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;

use super::parse_args;
use crate::approval::{ApprovalDecision, ApprovalKind, ApprovalRequest};
use crate::error::ToolErrorKind;
use crate::tools::{Tool, ToolContext, ToolOutcome, ToolSpec};

const OUTPUT_CAP: usize = 4_000;

fn cap_output(stdout: &[u8], stderr: &[u8]) -> String {
    let mut text = String::from_utf8_lossy(stdout).into_owned();
    let err = String::from_utf8_lossy(stderr);
    if !err.trim().is_empty() {
        text.push_str("\n[stderr]\n");
        text.push_str(&err);
    }
    if text.chars().count() > OUTPUT_CAP {
        let cut: String = text.chars().take(OUTPUT_CAP).collect();
        format!("{cut}\n… (output truncated)")
    } else {
        text
    }
}

fn denial_outcome(decision: ApprovalDecision) -> ToolOutcome {
    match decision {
        ApprovalDecision::TimedOut => ToolOutcome::fail(
            ToolErrorKind::ApprovalTimeout,
            "the approval request expired without an answer",
        ),
        _ => ToolOutcome::fail(
            ToolErrorKind::ApprovalDenied,
            "the user denied this action",
        ),
    }
}

pub struct RunTerminalCommand;

#[derive(Deserialize)]
struct RunTerminalCommandArgs {
    command: String,
}

#[async_trait]
impl Tool for RunTerminalCommand {
    fn name(&self) -> &str {
        "run_terminal_command"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "run_terminal_command".into(),
            description: "Run a shell command on the host (requires user approval).".into(),
            input_schema: json!({
                "type": "object",
                "properties": {"command": {"type": "string"}},
                "required": ["command"]
            }),
            rarely_used: false,
        }
    }

    async fn call(&self, params: Value, ctx: &ToolContext) -> ToolOutcome {
        let args = parse_args!(RunTerminalCommandArgs, params);
        if !ctx.config.read().await.permissions.terminal {
            return ToolOutcome::fail(
                ToolErrorKind::Failed,
                "terminal access is disabled for this agent",
            );
        }

        let request = ApprovalRequest::new(
            ApprovalKind::Terminal,
            "The agent wants to run a terminal command.",
        )
        .with_command(&args.command);
        let decision = ctx.approvals.request(request, ctx.channel.as_ref()).await;
        if decision != ApprovalDecision::Approved {
            return denial_outcome(decision);
        }

        match Command::new("sh").arg("-c").arg(&args.command).output().await {
            Ok(output) => {
                let body = cap_output(&output.stdout, &output.stderr);
                if output.status.success() {
                    ToolOutcome::ok(body)
                } else {
                    ToolOutcome::fail(
                        ToolErrorKind::Failed,
                        format!("exit status {}\n{body}", output.status),
                    )
                }
            }
            Err(e) => ToolOutcome::fail(ToolErrorKind::Failed, e.to_string()),
        }
    }
}

pub struct RunCode;

#[derive(Deserialize)]
struct RunCodeArgs {
    language: String,
    code: String,
}

#[async_trait]
impl Tool for RunCode {
    fn name(&self) -> &str {
        "run_code"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "run_code".into(),
            description: "Execute a code snippet (python or sh; requires user approval).".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "language": {"type": "string", "enum": ["python", "sh"]},
                    "code": {"type": "string"}
                },
                "required": ["language", "code"]
            }),
            rarely_used: false,
        }
    }

    async fn call(&self, params: Value, ctx: &ToolContext) -> ToolOutcome {
        let args = parse_args!(RunCodeArgs, params);
        if !ctx.config.read().await.permissions.code {
            return ToolOutcome::fail(
                ToolErrorKind::Failed,
                "code execution is disabled for this agent",
            );
        }

        let (program, flag) = match args.language.as_str() {
            "python" => ("python3", "-c"),
            "sh" => ("sh", "-c"),
            other => {
                return ToolOutcome::fail(
                    ToolErrorKind::InvalidArgs,
                    format!("unsupported language `{other}`"),
                )
            }
        };

        let request = ApprovalRequest::new(
            ApprovalKind::Code,
            "The agent wants to execute a code snippet.",
        )
        .with_code(&args.code, &args.language);
        let decision = ctx.approvals.request(request, ctx.channel.as_ref()).await;
        if decision != ApprovalDecision::Approved {
            return denial_outcome(decision);
        }

        match Command::new(program).arg(flag).arg(&args.code).output().await {
            Ok(output) => {
                let body = cap_output(&output.stdout, &output.stderr);
                if output.status.success() {
                    ToolOutcome::ok(body)
                } else {
                    ToolOutcome::fail(
                        ToolErrorKind::Failed,
                        format!("exit status {}\n{body}", output.status),
                    )
                }
            }
            Err(e) => ToolOutcome::fail(ToolErrorKind::Failed, e.to_string()),
        }
    }
}
