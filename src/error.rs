use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for script execution
///
/// Every failure unwinds to the top-level script invocation; nothing is
/// caught and retried internally. `CommandFailure`, `Timeout` and
/// `SessionClosed` additionally tear down the shell session before they
/// propagate, since the stream framing state is no longer trustworthy after
/// an undetected or failed command boundary.
#[derive(Error, Debug)]
pub enum Error {
    /// The rendered script text did not conform to the grammar
    #[error("parse error: {0}")]
    Parse(String),

    /// A control-flow node referenced an interpolation of the wrong kind or
    /// the wrong resolved type
    #[error("{0}")]
    Structural(String),

    /// A shell command exited with a non-zero code
    #[error("command `{cmd}` exited with code {ret_code}")]
    CommandFailure { cmd: String, ret_code: i32 },

    /// The command's sentinel line was not observed before the deadline
    #[error("command `{cmd}` timed out")]
    Timeout { cmd: String, ret_code: i32 },

    /// The shell process died and no exit status could be recovered
    #[error("shell session closed while running `{cmd}`")]
    SessionClosed { cmd: String },

    /// Invalid shell configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a parse error
    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a structural error
    pub fn structural<S: Into<String>>(msg: S) -> Self {
        Self::Structural(msg.into())
    }

    /// Create a command failure for the given command text and exit code
    pub fn command_failure<S: Into<String>>(cmd: S, ret_code: i32) -> Self {
        Self::CommandFailure {
            cmd: cmd.into(),
            ret_code,
        }
    }

    /// Create a timeout error; the reported code is always -1
    pub fn timeout<S: Into<String>>(cmd: S) -> Self {
        Self::Timeout {
            cmd: cmd.into(),
            ret_code: -1,
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// The exit code associated with this error, if any
    pub fn ret_code(&self) -> Option<i32> {
        match self {
            Self::CommandFailure { ret_code, .. } | Self::Timeout { ret_code, .. } => {
                Some(*ret_code)
            }
            _ => None,
        }
    }
}
