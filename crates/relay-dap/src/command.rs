//! Named commands of the debug channel.
//!
//! Every command yields exactly one JSON result: `{"ok": ...}` on success,
//! `{"error": {"kind", "message", "detail"}}` otherwise.

use std::error::Error as _;
use std::path::PathBuf;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::breakpoint::BreakpointId;
use crate::error::DebugError;
use crate::launch::LaunchId;
use crate::manager::{DebugManager, LaunchEdit, NewLaunch};
use crate::target::{DebugAction, TargetId};

/// Commands understood by [`CommandRouter::execute`].
pub const COMMANDS: &[&str] = &[
    "debug.breakpoint.add",
    "debug.breakpoint.exception",
    "debug.breakpoint.edit",
    "debug.breakpoint.clearAll",
    "debug.breakpoint.list",
    "debug.launch.create",
    "debug.launch.clone",
    "debug.launch.edit",
    "debug.launch.commit",
    "debug.launch.save",
    "debug.launch.delete",
    "debug.launch.list",
    "debug.run",
    "debug.action",
    "debug.targets",
    "debug.threads",
    "debug.stack",
    "debug.variables",
    "debug.children",
    "debug.evaluate",
];

#[derive(Debug, Deserialize)]
struct AddBreakpointArgs {
    project: String,
    path: PathBuf,
    line: u32,
    #[serde(default)]
    column: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ExceptionArgs {
    #[serde(default)]
    caught: bool,
    #[serde(default)]
    uncaught: bool,
    #[serde(default)]
    project: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PropertyEdit {
    property: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct EditBreakpointArgs {
    id: BreakpointId,
    edits: Vec<PropertyEdit>,
}

#[derive(Debug, Deserialize)]
struct LaunchIdArgs {
    id: LaunchId,
}

#[derive(Debug, Deserialize)]
struct EditLaunchArgs {
    id: LaunchId,
    #[serde(flatten)]
    edit: LaunchEdit,
}

#[derive(Debug, Deserialize)]
struct ActionArgs {
    target: TargetId,
    action: String,
    #[serde(default)]
    thread: Option<i64>,
    #[serde(default)]
    frame: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct TargetArgs {
    target: TargetId,
}

#[derive(Debug, Deserialize)]
struct StackArgs {
    target: TargetId,
    thread: i64,
}

#[derive(Debug, Deserialize)]
struct VariablesArgs {
    target: TargetId,
    thread: i64,
    #[serde(default)]
    frame: usize,
}

#[derive(Debug, Deserialize)]
struct ChildrenArgs {
    target: TargetId,
    reference: i64,
}

#[derive(Debug, Deserialize)]
struct EvaluateArgs {
    #[serde(default)]
    project: Option<String>,
    expression: String,
    #[serde(default)]
    thread: Option<i64>,
    #[serde(default)]
    frame: Option<usize>,
}

/// Routes command names to the debug manager.
#[derive(Debug, Clone)]
pub struct CommandRouter {
    manager: Arc<DebugManager>,
}

impl CommandRouter {
    pub fn new(manager: Arc<DebugManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<DebugManager> {
        &self.manager
    }

    pub fn handles(command: &str) -> bool {
        COMMANDS.contains(&command)
    }

    /// Run `command` and wrap the outcome.
    pub async fn execute(&self, command: &str, args: Value) -> Value {
        match self.dispatch(command, args).await {
            Ok(value) => json!({ "ok": value }),
            Err(e) => {
                tracing::warn!("{} failed: {}", command, e);
                error_value(&e)
            }
        }
    }

    async fn dispatch(&self, command: &str, args: Value) -> Result<Value, DebugError> {
        let manager = &self.manager;
        match command {
            "debug.breakpoint.add" => {
                let a: AddBreakpointArgs = parse(command, args)?;
                let id = manager
                    .add_line_breakpoint(&a.project, &a.path, a.line, a.column)
                    .await?;
                Ok(json!({ "id": id }))
            }
            "debug.breakpoint.exception" => {
                let a: ExceptionArgs = parse(command, args)?;
                let id = manager
                    .set_exception_breakpoint(a.caught, a.uncaught, a.project.as_deref())
                    .await?;
                Ok(json!({ "id": id }))
            }
            "debug.breakpoint.edit" => {
                let a: EditBreakpointArgs = parse(command, args)?;
                let edits: Vec<(String, String)> = a
                    .edits
                    .into_iter()
                    .map(|e| (e.property, e.value))
                    .collect();
                manager.edit_breakpoint(a.id, &edits).await?;
                Ok(Value::Null)
            }
            "debug.breakpoint.clearAll" => {
                let removed = manager.clear_all_breakpoints().await?;
                Ok(json!({ "removed": removed }))
            }
            "debug.breakpoint.list" => to_json(manager.breakpoints()),
            "debug.launch.create" => {
                let new: NewLaunch = parse(command, args)?;
                to_json(manager.create_launch(new)?)
            }
            "debug.launch.clone" => {
                let a: LaunchIdArgs = parse(command, args)?;
                to_json(manager.clone_launch(a.id)?)
            }
            "debug.launch.edit" => {
                let a: EditLaunchArgs = parse(command, args)?;
                to_json(manager.edit_launch(a.id, a.edit)?)
            }
            "debug.launch.commit" => {
                let a: LaunchIdArgs = parse(command, args)?;
                to_json(manager.commit_launch(a.id)?)
            }
            "debug.launch.save" => {
                let a: LaunchIdArgs = parse(command, args)?;
                to_json(manager.save_launch(a.id)?)
            }
            "debug.launch.delete" => {
                let a: LaunchIdArgs = parse(command, args)?;
                manager.delete_launch(a.id)?;
                Ok(Value::Null)
            }
            "debug.launch.list" => to_json(manager.launches()),
            "debug.run" => {
                let a: LaunchIdArgs = parse(command, args)?;
                let target = manager.run(a.id).await?;
                Ok(json!({ "target": target }))
            }
            "debug.action" => {
                let a: ActionArgs = parse(command, args)?;
                let action: DebugAction = a.action.parse()?;
                let performed = manager
                    .debug_action(a.target, action, a.thread, a.frame)
                    .await?;
                Ok(json!({ "performed": performed }))
            }
            "debug.targets" => to_json(manager.targets()),
            "debug.threads" => {
                let a: TargetArgs = parse(command, args)?;
                to_json(manager.threads(a.target).await?)
            }
            "debug.stack" => {
                let a: StackArgs = parse(command, args)?;
                to_json(manager.stack(a.target, a.thread).await?)
            }
            "debug.variables" => {
                let a: VariablesArgs = parse(command, args)?;
                to_json(manager.frame_variables(a.target, a.thread, a.frame).await?)
            }
            "debug.children" => {
                let a: ChildrenArgs = parse(command, args)?;
                to_json(manager.variable_children(a.target, a.reference).await?)
            }
            "debug.evaluate" => {
                let a: EvaluateArgs = parse(command, args)?;
                to_json(
                    manager
                        .evaluate_expression(a.project.as_deref(), &a.expression, a.thread, a.frame)
                        .await?,
                )
            }
            other => Err(DebugError::Configuration(format!("unknown command: {other}"))),
        }
    }
}

/// The error shape returned to the editor. `detail` lists the causes.
pub fn error_value(err: &DebugError) -> Value {
    let mut detail = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
        detail.push(cause.to_string());
        source = cause.source();
    }
    json!({
        "error": {
            "kind": err.kind(),
            "message": err.to_string(),
            "detail": detail,
        }
    })
}

fn parse<T: DeserializeOwned>(command: &str, args: Value) -> Result<T, DebugError> {
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args)
        .map_err(|e| DebugError::Configuration(format!("invalid arguments for {command}: {e}")))
}

fn to_json<T: Serialize>(value: T) -> Result<Value, DebugError> {
    serde_json::to_value(value).map_err(|e| DebugError::Protocol(format!("cannot encode result: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::DebugContext;
    use relay_config::Config;
    use relay_core::{FsResolver, NullEmitter};
    use relay_rpc::RpcError;

    fn router(dir: &std::path::Path) -> CommandRouter {
        let ctx = DebugContext {
            config: Arc::new(Config::default()),
            resolver: Arc::new(FsResolver::new()),
            emitter: Arc::new(NullEmitter),
            state_dir: dir.to_path_buf(),
        };
        CommandRouter::new(DebugManager::new(ctx).unwrap())
    }

    #[test]
    fn every_listed_command_is_handled() {
        assert!(CommandRouter::handles("debug.run"));
        assert!(!CommandRouter::handles("analysis.hover"));
        assert_eq!(COMMANDS.len(), 20);
    }

    #[tokio::test]
    async fn unknown_command_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = router(dir.path()).execute("debug.fly", Value::Null).await;
        assert_eq!(result["error"]["kind"], "ConfigurationError");
        assert_eq!(result["error"]["message"], "unknown command: debug.fly");
    }

    #[tokio::test]
    async fn bad_arguments_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let result = router(dir.path())
            .execute("debug.breakpoint.add", json!({"project": "demo"}))
            .await;
        assert_eq!(result["error"]["kind"], "ConfigurationError");
    }

    #[tokio::test]
    async fn breakpoint_commands_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path());
        let added = router
            .execute(
                "debug.breakpoint.add",
                json!({"project": "demo", "path": "/w/Main.java", "line": 12}),
            )
            .await;
        let id = added["ok"]["id"].as_u64().unwrap();

        let edited = router
            .execute(
                "debug.breakpoint.edit",
                json!({"id": id, "edits": [{"property": "HIT_CONDITION", "value": "3"}]}),
            )
            .await;
        assert!(edited.get("ok").is_some(), "{edited}");

        let list = router.execute("debug.breakpoint.list", Value::Null).await;
        assert_eq!(list["ok"][0]["type"], "line");
        assert_eq!(list["ok"][0]["line"], 12);
        assert_eq!(list["ok"][0]["hit_condition"], "3");

        let cleared = router.execute("debug.breakpoint.clearAll", Value::Null).await;
        assert_eq!(cleared["ok"]["removed"], 1);
    }

    #[tokio::test]
    async fn launch_commands() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path());
        let created = router
            .execute(
                "debug.launch.create",
                json!({
                    "name": "Main",
                    "language": "java",
                    "project": "demo",
                    "attributes": {"program": "/bin/demo"}
                }),
            )
            .await;
        assert_eq!(created["ok"]["attributes"]["program"], "/bin/demo");
        let id = created["ok"]["id"].clone();

        let edited = router
            .execute("debug.launch.edit", json!({"id": id, "name": "Renamed"}))
            .await;
        assert_eq!(edited["ok"]["name"], "Renamed");
        let saved = router.execute("debug.launch.save", json!({"id": id})).await;
        assert_eq!(saved["ok"]["name"], "Renamed");
        let list = router.execute("debug.launch.list", Value::Null).await;
        assert_eq!(list["ok"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn evaluate_without_targets() {
        let dir = tempfile::tempdir().unwrap();
        let result = router(dir.path())
            .execute("debug.evaluate", json!({"expression": "x"}))
            .await;
        assert_eq!(result["error"]["kind"], "SessionStateError");
        assert_eq!(result["error"]["message"], "no evaluation to do");
    }

    #[test]
    fn error_detail_lists_causes() {
        let err = DebugError::Transport(RpcError::Transport(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "pipe closed",
        )));
        let value = error_value(&err);
        assert_eq!(value["error"]["kind"], "TransportError");
        assert!(!value["error"]["detail"].as_array().unwrap().is_empty());
    }
}
