//! The script facade: template assembly, translation and result shaping.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::ast::Translate;
use crate::config::ShellConfig;
use crate::error::{Error, Result};
use crate::interp::{Interp, Value};
use crate::interpreter::Interpreter;
use crate::parser::GrammarParser;
use crate::runner::{InteractiveHook, Reply};

/// The assembled outcome of a script run
///
/// `stdout`/`stderr` hold the last executed command's accumulated text
/// (empty if no command ran); named captures accumulated across the whole
/// script are carried alongside. Serialization flattens the captures into
/// the top-level object, so a result serializes as
/// `{ "stdout": ..., "stderr": ..., "<capture>": ... }`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScriptResult {
    pub stdout: String,
    pub stderr: String,
    #[serde(flatten)]
    pub captures: HashMap<String, String>,
}

impl ScriptResult {
    /// Look up a named capture
    pub fn capture(&self, name: &str) -> Option<&str> {
        self.captures.get(name).map(String::as_str)
    }
}

/// A script: literal text segments interleaved with interpolation arguments
///
/// # Examples
///
/// ```rust,no_run
/// # use subsh::{Script, Shell};
/// # #[tokio::main]
/// # async fn main() -> subsh::Result<()> {
/// let script = Script::builder()
///     .text("$ echo ")
///     .value("hello")
///     .text("\nstdout >> greeting")
///     .build();
/// let result = Shell::default().run(script).await?;
/// assert_eq!(result.capture("greeting"), Some("hello\n"));
/// # Ok(())
/// # }
/// ```
pub struct Script {
    segments: Vec<String>,
    interps: Vec<Interp>,
    hook: Option<InteractiveHook>,
}

impl Script {
    /// A script with no interpolation arguments
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            segments: vec![source.into()],
            interps: Vec::new(),
            hook: None,
        }
    }

    pub fn builder() -> ScriptBuilder {
        ScriptBuilder::new()
    }

    /// Render the literal template text, splicing the placeholder token for
    /// each interpolation argument between the adjacent literal segments.
    fn render(&self) -> String {
        let mut text = self.segments[0].clone();
        for (id, interp) in self.interps.iter().enumerate() {
            text.push_str(&interp.placeholder(id));
            text.push_str(&self.segments[id + 1]);
        }
        text
    }
}

/// Fluent builder for [`Script`]
///
/// `text` appends literal script text; `value`, `call`, `call_async`,
/// `capture` and `capture_async` append interpolation arguments between the
/// literal segments, exactly where they are called in the chain.
pub struct ScriptBuilder {
    segments: Vec<String>,
    interps: Vec<Interp>,
    hook: Option<InteractiveHook>,
}

impl Default for ScriptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self {
            segments: vec![String::new()],
            interps: Vec::new(),
            hook: None,
        }
    }

    /// Append literal script text
    pub fn text(mut self, text: impl AsRef<str>) -> Self {
        if let Some(tail) = self.segments.last_mut() {
            tail.push_str(text.as_ref());
        }
        self
    }

    /// Append an interpolation argument
    pub fn bind(mut self, interp: Interp) -> Self {
        self.interps.push(interp);
        self.segments.push(String::new());
        self
    }

    /// Append a plain value interpolation
    pub fn value(self, v: impl Into<Value>) -> Self {
        self.bind(Interp::value(v))
    }

    /// Append a synchronous zero-argument callback (for `await`)
    pub fn call<F>(self, f: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        self.bind(Interp::call(f))
    }

    /// Append an async zero-argument callback (for `await`)
    pub fn call_async<F, Fut>(self, f: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.bind(Interp::call_async(f))
    }

    /// Append a synchronous one-argument callback (for `stdout >>`)
    pub fn capture<F>(self, f: F) -> Self
    where
        F: FnMut(String) + Send + 'static,
    {
        self.bind(Interp::capture(f))
    }

    /// Append an async one-argument callback (for `stdout >>`)
    pub fn capture_async<F, Fut>(self, f: F) -> Self
    where
        F: FnMut(String) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.bind(Interp::capture_async(f))
    }

    /// Attach a per-line interactive hook, invoked with every stdout line
    /// of every command and a write-back handle onto the shell's stdin
    pub fn interactive<F>(mut self, f: F) -> Self
    where
        F: FnMut(&str, &Reply) + Send + 'static,
    {
        self.hook = Some(Box::new(f));
        self
    }

    pub fn build(self) -> Script {
        Script {
            segments: self.segments,
            interps: self.interps,
            hook: self.hook,
        }
    }
}

/// Executes scripts against a persistent shell
///
/// A `Shell` is cheap to clone and holds only configuration; each
/// [`run`](Self::run) spawns its own shell process lazily at the first
/// command and tears it down when the script ends.
///
/// # Examples
///
/// ```rust,no_run
/// # use subsh::{Script, Shell};
/// # #[tokio::main]
/// # async fn main() -> subsh::Result<()> {
/// let shell = Shell::builder()
///     .current_dir("/tmp")
///     .env("GREETING", "hi")
///     .build()?;
/// let result = shell.run(Script::new("$ echo $GREETING")).await?;
/// assert_eq!(result.stdout, "hi\n");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Shell {
    config: Arc<ShellConfig>,
    translator: Arc<dyn Translate>,
}

impl Default for Shell {
    fn default() -> Self {
        Self::new(ShellConfig::default())
    }
}

impl Shell {
    /// Create a shell with the given configuration
    pub fn new(config: ShellConfig) -> Self {
        Self {
            config: Arc::new(config),
            translator: Arc::new(GrammarParser),
        }
    }

    /// Create a shell builder for fluent configuration
    pub fn builder() -> ShellBuilder {
        ShellBuilder::new()
    }

    /// Run a script to completion.
    ///
    /// # Errors
    ///
    /// `Parse` if the rendered text does not conform to the grammar (or the
    /// script is empty), `Structural` for interpolation misuse, and the
    /// command-level failures (`CommandFailure`, `Timeout`,
    /// `SessionClosed`) propagated from the engine.
    pub async fn run(&self, script: Script) -> Result<ScriptResult> {
        let source = script.render();
        if source.trim().is_empty() {
            return Err(Error::parse("Must provide statements"));
        }

        let tree = self
            .translator
            .translate(&source)
            .ok_or_else(|| Error::parse("script text did not match the grammar"))?;
        debug!(statements = source.lines().count(), "script translated");

        let Script {
            mut interps, hook, ..
        } = script;
        let mut interpreter = Interpreter::new(&self.config).with_hook(hook);
        let last = interpreter.run(&mut interps, &tree).await?;
        let captures = interpreter.into_captures();

        let (stdout, stderr) = match last {
            Some(result) => (result.stdout, result.stderr),
            None => (String::new(), String::new()),
        };
        Ok(ScriptResult {
            stdout,
            stderr,
            captures,
        })
    }
}

/// Builder for [`Shell`] instances
pub struct ShellBuilder {
    config: ShellConfig,
    translator: Arc<dyn Translate>,
}

impl Default for ShellBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellBuilder {
    pub fn new() -> Self {
        Self {
            config: ShellConfig::default(),
            translator: Arc::new(GrammarParser),
        }
    }

    /// Set the configuration directly
    pub fn config(mut self, config: ShellConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the directory scripts start in
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.config.set_cwd(dir);
        self
    }

    /// Merge one environment variable into the shell's environment
    /// (last write wins across repeated calls)
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert_env(key, value);
        self
    }

    /// Merge a batch of environment variables (last write wins)
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.config.merge_envs(vars);
        self
    }

    /// Set the per-command sentinel deadline in seconds
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout_secs = secs;
        self
    }

    /// Use a different shell binary
    pub fn shell_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config.shell_path = path.as_ref().to_path_buf();
        self
    }

    /// Substitute an alternative grammar translator
    pub fn translator(mut self, translator: impl Translate + 'static) -> Self {
        self.translator = Arc::new(translator);
        self
    }

    /// Build the shell
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the configuration is invalid.
    pub fn build(self) -> Result<Shell> {
        self.config.validate()?;
        Ok(Shell {
            config: Arc::new(self.config),
            translator: self.translator,
        })
    }
}

/// Run a script with the default shell configuration
pub async fn run(script: Script) -> Result<ScriptResult> {
    Shell::default().run(script).await
}

/// Run a script with the working directory overridden
pub async fn run_in(dir: impl AsRef<Path>, script: Script) -> Result<ScriptResult> {
    Shell::builder().current_dir(dir).build()?.run(script).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_splices_placeholder_tokens() {
        let script = Script::builder()
            .text("$ echo ")
            .value("hi")
            .text("\nif ")
            .value(true)
            .text(" { $ true }\nawait ")
            .call(|| {})
            .build();
        assert_eq!(
            script.render(),
            "$ echo #__VALUE_0__#\nif #__VALUE_1__# { $ true }\nawait #__FUNCTION_2__#"
        );
    }

    #[test]
    fn plain_script_renders_verbatim() {
        assert_eq!(Script::new("$ ls -la").render(), "$ ls -la");
    }

    #[tokio::test]
    async fn empty_script_is_a_parse_error() {
        let err = Shell::default().run(Script::new("   ")).await.unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[tokio::test]
    async fn ungrammatical_script_is_a_parse_error() {
        let err = Shell::default()
            .run(Script::new("definitely not a script"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn result_serializes_with_flattened_captures() {
        let mut captures = HashMap::new();
        captures.insert("branch".to_string(), "main\n".to_string());
        let result = ScriptResult {
            stdout: "ok\n".into(),
            stderr: String::new(),
            captures,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["stdout"], "ok\n");
        assert_eq!(json["branch"], "main\n");
    }
}
