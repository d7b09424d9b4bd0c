//! Structured shell scripting over a persistent subshell.
//!
//! `subsh` lets a caller describe a sequence of shell operations (commands,
//! conditionals, directory scoping, output capture and interleaving with
//! caller-supplied callbacks) as a single structured script, and executes
//! it against one long-lived shell process. Each command's boundary and exit
//! code are detected with a sentinel-line protocol, so the engine can
//! reliably segment the shell's interleaved output stream without any
//! protocol support from the shell itself.
//!
//! # Script syntax
//!
//! ```text
//! $ echo one            // run a command
//! $$ make build         // run and mirror raw output while running
//! stdout >> captured    // capture the last command's stdout by name
//! if <value> { ... } else { ... }
//! in <dir> { ... }      // run a block in another directory
//! await <callback>      // call back into the host between commands
//! ```
//!
//! # Examples
//!
//! ```rust,no_run
//! use subsh::{Script, Shell};
//!
//! # #[tokio::main]
//! # async fn main() -> subsh::Result<()> {
//! let result = Shell::default()
//!     .run(
//!         Script::builder()
//!             .text("$ git branch --show-current\nstdout >> branch\n$ echo ")
//!             .value("done")
//!             .build(),
//!     )
//!     .await?;
//!
//! assert_eq!(result.stdout, "done\n");
//! println!("on branch {}", result.capture("branch").unwrap_or("?"));
//! # Ok(())
//! # }
//! ```
//!
//! Commands within a session are strictly serialized: the engine always
//! awaits a command's completion before issuing the next, so two commands
//! can never interleave their output. A failing command (non-zero exit,
//! timeout, or shell death) dumps a diagnostic, tears the session down and
//! unwinds to the caller.

pub mod ast;
pub mod config;
pub mod error;
pub mod interp;
pub mod interpreter;
pub mod parser;
pub mod runner;
pub mod session;
pub mod shell;

pub use ast::{CaptureTarget, InterpKind, InterpRef, Node, StreamKind, Translate};
pub use config::{ShellConfig, DEFAULT_TIMEOUT_SECS};
pub use error::{Error, Result};
pub use interp::{Interp, Value};
pub use parser::GrammarParser;
pub use runner::{Command, CommandResult, CommandState, HookRef, InteractiveHook, Reply};
pub use session::ShellSession;
pub use shell::{run, run_in, Script, ScriptBuilder, ScriptResult, Shell, ShellBuilder};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
