//! Parse-tree shape consumed by the interpreter, and the translator boundary.
//!
//! The grammar itself lives behind the [`Translate`] trait so an alternative
//! grammar implementation can be substituted without touching the
//! interpreter; [`crate::parser::GrammarParser`] is the default.

/// Which kind of interpolation argument a tree node refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpKind {
    /// A plain substituted value
    Value,
    /// A caller-supplied callback
    Function,
}

/// A positional reference to an interpolation argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterpRef {
    pub kind: InterpKind,
    /// Positional index into the script's interpolation arguments
    pub id: usize,
}

/// Which output stream a capture statement reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Destination of a capture statement
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureTarget {
    /// Invoke a function interpolation with the captured text
    Hook(InterpRef),
    /// Store the captured text into the capture map under this name
    Variable(String),
}

/// A node of the parsed script tree
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Sequential composition: the top-level script body and the bodies of
    /// `if`/`in` branches
    Grammar(Vec<Node>),
    /// Run a literal shell command line. `forward_logs` commands (`$$`)
    /// additionally mirror their raw output to the host process as it
    /// arrives.
    CommandLine { text: String, forward_logs: bool },
    /// Conditional execution gated on a value interpolation
    If {
        guard: InterpRef,
        then_branch: Box<Node>,
        else_branch: Option<Box<Node>>,
    },
    /// Run `body` with the working directory overridden for its duration
    In { dir: InterpRef, body: Box<Node> },
    /// Invoke a function interpolation and wait for it before continuing
    Await(InterpRef),
    /// Capture the last command's named stream
    Capture {
        stream: StreamKind,
        target: CaptureTarget,
    },
}

/// The grammar-to-tree translator boundary.
///
/// Takes the literal template text (with interpolation placeholders already
/// substituted in) and returns the parsed tree, or `None` if the text does
/// not conform to the grammar.
pub trait Translate: Send + Sync {
    fn translate(&self, source: &str) -> Option<Node>;
}

impl<F> Translate for F
where
    F: Fn(&str) -> Option<Node> + Send + Sync,
{
    fn translate(&self, source: &str) -> Option<Node> {
        self(source)
    }
}
