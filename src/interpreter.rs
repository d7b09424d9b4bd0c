//! The tree-walking interpreter.
//!
//! A single recursive evaluator drives the parse tree: sequences fold
//! left-to-right threading the last command's result, `if`/`in` recurse into
//! their branches, `await` and capture statements invoke caller callbacks,
//! and command lines dispatch to the command runner. The working directory
//! is lexically scoped (an `in` body cannot leak its override to siblings);
//! the capture map is shared and mutated in place.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tracing::debug;

use crate::ast::{CaptureTarget, InterpKind, InterpRef, Node, StreamKind};
use crate::config::ShellConfig;
use crate::error::{Error, Result};
use crate::interp::{substitute_values, Callback, Interp, Value};
use crate::runner::{Command, CommandResult, InteractiveHook};
use crate::session::ShellSession;

/// Resolve a value interpolation, cloning it out of the argument list
fn value_of(interps: &[Interp], reference: InterpRef) -> Result<Value> {
    match interps.get(reference.id) {
        Some(Interp::Value(v)) => Ok(v.clone()),
        Some(Interp::Func(_)) => Err(Error::structural(format!(
            "interpolation #{} is a function, not a value",
            reference.id
        ))),
        None => Err(Error::structural(format!(
            "interpolation #{} was not provided",
            reference.id
        ))),
    }
}

/// Resolve a function interpolation for invocation
fn func_of(interps: &mut [Interp], reference: InterpRef) -> Result<&mut Callback> {
    match interps.get_mut(reference.id) {
        Some(Interp::Func(cb)) => Ok(cb),
        Some(Interp::Value(_)) => Err(Error::structural(format!(
            "interpolation #{} is a value, not a function",
            reference.id
        ))),
        None => Err(Error::structural(format!(
            "interpolation #{} was not provided",
            reference.id
        ))),
    }
}

/// Walks a parse tree against one lazily-spawned shell session
pub struct Interpreter<'c> {
    config: &'c ShellConfig,
    session: Option<ShellSession>,
    captures: HashMap<String, String>,
    hook: Option<InteractiveHook>,
}

impl<'c> Interpreter<'c> {
    pub fn new(config: &'c ShellConfig) -> Self {
        Self {
            config,
            session: None,
            captures: HashMap::new(),
            hook: None,
        }
    }

    /// Attach an interactive hook applied to every command in the script
    pub fn with_hook(mut self, hook: Option<InteractiveHook>) -> Self {
        self.hook = hook;
        self
    }

    /// Execute the whole tree and return the last command's result.
    ///
    /// Any session still alive when the script ends is terminated before
    /// returning.
    pub async fn run(
        &mut self,
        interps: &mut [Interp],
        root: &Node,
    ) -> Result<Option<CommandResult>> {
        let cwd = self.config.initial_cwd()?;
        let result = self.execute(interps, root, None, &cwd).await;
        if let Some(mut session) = self.session.take() {
            session.terminate().await;
        }
        result
    }

    /// The captures accumulated across the script
    pub fn into_captures(self) -> HashMap<String, String> {
        self.captures
    }

    fn execute<'a>(
        &'a mut self,
        interps: &'a mut [Interp],
        node: &'a Node,
        last: Option<CommandResult>,
        cwd: &'a Path,
    ) -> BoxFuture<'a, Result<Option<CommandResult>>> {
        async move {
            match node {
                Node::Grammar(children) => {
                    let mut last = last;
                    for child in children {
                        last = self.execute(interps, child, last, cwd).await?;
                    }
                    Ok(last)
                }

                Node::CommandLine { text, forward_logs } => {
                    let cmd_text = substitute_values(text, interps)?;
                    let result = self.run_command(cmd_text, cwd, *forward_logs).await?;
                    Ok(Some(result))
                }

                Node::If {
                    guard,
                    then_branch,
                    else_branch,
                } => {
                    if guard.kind == InterpKind::Function {
                        return Err(Error::structural(
                            "If statements only accept value interpolations, not functions.",
                        ));
                    }
                    let value = value_of(interps, *guard)?;
                    if value.is_truthy() {
                        self.execute(interps, then_branch, last, cwd).await
                    } else if let Some(else_branch) = else_branch {
                        self.execute(interps, else_branch, last, cwd).await
                    } else {
                        Ok(last)
                    }
                }

                Node::In { dir, body } => {
                    if dir.kind == InterpKind::Function {
                        return Err(Error::structural(
                            "IN statements only accept value interpolations, not functions.",
                        ));
                    }
                    let value = value_of(interps, *dir)?;
                    let new_cwd = match value.as_str() {
                        Some(s) if !s.is_empty() => PathBuf::from(s),
                        _ => {
                            return Err(Error::structural(
                                "IN statements need a string value to set as the current working dir",
                            ))
                        }
                    };
                    // A nested scope: siblings after this statement see the
                    // caller's cwd again.
                    self.execute(interps, body, last, &new_cwd).await
                }

                Node::Await(reference) => {
                    if reference.kind == InterpKind::Value {
                        return Err(Error::structural(
                            "await statements only accept function interpolations, not values.",
                        ));
                    }
                    func_of(interps, *reference)?.invoke(None).await;
                    Ok(last)
                }

                Node::Capture { stream, target } => {
                    let captured = match &last {
                        Some(result) => match stream {
                            StreamKind::Stdout => result.stdout.clone(),
                            StreamKind::Stderr => result.stderr.clone(),
                        },
                        None => String::new(),
                    };
                    match target {
                        CaptureTarget::Hook(reference) => {
                            if reference.kind == InterpKind::Value {
                                return Err(Error::structural(
                                    "STDOUT/STDERR statements only accept function interpolations, not values.",
                                ));
                            }
                            func_of(interps, *reference)?.invoke(Some(captured)).await;
                        }
                        CaptureTarget::Variable(name) => {
                            if name == "stdout" || name == "stderr" {
                                return Err(Error::structural(format!(
                                    "capture name `{name}` is reserved for the script result"
                                )));
                            }
                            debug!(name = %name, stream = stream.as_str(), "storing capture");
                            self.captures.insert(name.clone(), captured);
                        }
                    }
                    Ok(last)
                }
            }
        }
        .boxed()
    }

    /// Dispatch one command line to the runner, spawning the session on
    /// first use and clearing it if the command left it dead.
    async fn run_command(
        &mut self,
        cmd_text: String,
        cwd: &Path,
        forward_logs: bool,
    ) -> Result<CommandResult> {
        if self.session.is_none() {
            self.session = Some(ShellSession::spawn(self.config).await?);
        }
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| Error::config("shell session unavailable"))?;

        let command = Command::new(cmd_text, cwd)
            .forward_logs(forward_logs)
            .deadline(Duration::from_secs(self.config.timeout_secs));
        let result = command.run(session, self.hook.as_deref_mut()).await;

        // A command like `exit 0` succeeds but takes the shell with it;
        // clear the slot so a later command respawns.
        if self
            .session
            .as_ref()
            .map(|s| !s.is_alive())
            .unwrap_or(false)
        {
            self.session = None;
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Node;

    fn guard(kind: InterpKind, id: usize) -> InterpRef {
        InterpRef { kind, id }
    }

    #[tokio::test]
    async fn function_guard_is_structural_regardless_of_callback() {
        let config = ShellConfig::default();
        let mut interpreter = Interpreter::new(&config);
        let mut interps = vec![Interp::call(|| {})];
        let tree = Node::If {
            guard: guard(InterpKind::Function, 0),
            then_branch: Box::new(Node::Grammar(vec![])),
            else_branch: None,
        };
        let err = interpreter.run(&mut interps, &tree).await.unwrap_err();
        assert!(matches!(err, Error::Structural(_)));
    }

    #[tokio::test]
    async fn falsy_guard_without_else_is_a_no_op() {
        let config = ShellConfig::default();
        let mut interpreter = Interpreter::new(&config);
        let mut interps = vec![Interp::value(false)];
        let tree = Node::Grammar(vec![Node::If {
            guard: guard(InterpKind::Value, 0),
            then_branch: Box::new(Node::CommandLine {
                text: "echo never".into(),
                forward_logs: false,
            }),
            else_branch: None,
        }]);
        let last = interpreter.run(&mut interps, &tree).await.unwrap();
        assert!(last.is_none());
        assert!(interpreter.into_captures().is_empty());
    }

    #[tokio::test]
    async fn in_statement_requires_a_string_value() {
        let config = ShellConfig::default();
        let mut interpreter = Interpreter::new(&config);
        let mut interps = vec![Interp::value(true)];
        let tree = Node::In {
            dir: guard(InterpKind::Value, 0),
            body: Box::new(Node::Grammar(vec![])),
        };
        let err = interpreter.run(&mut interps, &tree).await.unwrap_err();
        assert!(matches!(err, Error::Structural(_)));
    }

    #[tokio::test]
    async fn empty_string_directory_is_rejected() {
        let config = ShellConfig::default();
        let mut interpreter = Interpreter::new(&config);
        let mut interps = vec![Interp::value("")];
        let tree = Node::In {
            dir: guard(InterpKind::Value, 0),
            body: Box::new(Node::Grammar(vec![])),
        };
        let err = interpreter.run(&mut interps, &tree).await.unwrap_err();
        assert!(matches!(err, Error::Structural(_)));
    }

    #[tokio::test]
    async fn capture_before_any_command_yields_empty_string() {
        let config = ShellConfig::default();
        let mut interpreter = Interpreter::new(&config);
        let mut interps = vec![];
        let tree = Node::Capture {
            stream: StreamKind::Stdout,
            target: CaptureTarget::Variable("first".into()),
        };
        interpreter.run(&mut interps, &tree).await.unwrap();
        assert_eq!(interpreter.into_captures()["first"], "");
    }

    #[tokio::test]
    async fn reserved_capture_names_are_rejected() {
        let config = ShellConfig::default();
        let mut interpreter = Interpreter::new(&config);
        let mut interps = vec![];
        let tree = Node::Capture {
            stream: StreamKind::Stdout,
            target: CaptureTarget::Variable("stdout".into()),
        };
        let err = interpreter.run(&mut interps, &tree).await.unwrap_err();
        assert!(matches!(err, Error::Structural(_)));
    }

    #[tokio::test]
    async fn await_invokes_the_callback() {
        let config = ShellConfig::default();
        let mut interpreter = Interpreter::new(&config);
        let called = std::sync::Arc::new(parking_lot::Mutex::new(false));
        let flag = std::sync::Arc::clone(&called);
        let mut interps = vec![Interp::call(move || *flag.lock() = true)];
        let tree = Node::Await(guard(InterpKind::Function, 0));
        interpreter.run(&mut interps, &tree).await.unwrap();
        assert!(*called.lock());
    }

    #[tokio::test]
    async fn await_of_a_value_is_structural() {
        let config = ShellConfig::default();
        let mut interpreter = Interpreter::new(&config);
        let mut interps = vec![Interp::value("not a function")];
        let tree = Node::Await(guard(InterpKind::Value, 0));
        let err = interpreter.run(&mut interps, &tree).await.unwrap_err();
        assert!(matches!(err, Error::Structural(_)));
    }
}
