//! Interpolation arguments: plain values and caller-supplied callbacks.

use std::fmt;
use std::future::Future;

use futures::future::{BoxFuture, FutureExt};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::ast::InterpKind;
use crate::error::{Error, Result};

/// Placeholder token pattern rendered into the template text for each
/// interpolation argument: `#__VALUE_i__#` or `#__FUNCTION_i__#`.
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#__(VALUE|FUNCTION)_(\d+)__#").expect("placeholder pattern"));

/// A plain interpolation value
///
/// Truthiness follows the host conventions of the scripting surface: absent
/// values, `false`, numeric zero and the empty string are falsy, everything
/// else is truthy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Str(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    Absent,
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Str(s) => !s.is_empty(),
            Self::Bool(b) => *b,
            Self::Int(n) => *n != 0,
            Self::Float(f) => *f != 0.0,
            Self::Absent => false,
        }
    }

    /// The string this value renders to when substituted into command text
    pub fn render(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Bool(b) => b.to_string(),
            Self::Int(n) => n.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Absent => String::new(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Absent)
    }
}

/// A caller-supplied callback interpolation.
///
/// `await` statements invoke the callback with no argument; capture
/// statements invoke it with the captured text. Both sync and async closures
/// are supported through the constructors on [`Interp`].
pub struct Callback {
    inner: Box<dyn FnMut(Option<String>) -> BoxFuture<'static, ()> + Send>,
}

impl Callback {
    pub(crate) async fn invoke(&mut self, arg: Option<String>) {
        (self.inner)(arg).await;
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback")
    }
}

/// One positional interpolation argument: a plain value or a callback
#[derive(Debug)]
pub enum Interp {
    Value(Value),
    Func(Callback),
}

impl Interp {
    /// A plain value interpolation
    pub fn value(v: impl Into<Value>) -> Self {
        Self::Value(v.into())
    }

    /// An absent value (always falsy)
    pub fn absent() -> Self {
        Self::Value(Value::Absent)
    }

    /// A synchronous zero-argument callback, for `await` statements
    pub fn call<F>(mut f: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        Self::Func(Callback {
            inner: Box::new(move |_| {
                f();
                futures::future::ready(()).boxed()
            }),
        })
    }

    /// An async zero-argument callback, for `await` statements
    pub fn call_async<F, Fut>(mut f: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::Func(Callback {
            inner: Box::new(move |_| f().boxed()),
        })
    }

    /// A synchronous one-argument callback, for `stdout >>` / `stderr >>`
    pub fn capture<F>(mut f: F) -> Self
    where
        F: FnMut(String) + Send + 'static,
    {
        Self::Func(Callback {
            inner: Box::new(move |arg| {
                f(arg.unwrap_or_default());
                futures::future::ready(()).boxed()
            }),
        })
    }

    /// An async one-argument callback, for `stdout >>` / `stderr >>`
    pub fn capture_async<F, Fut>(mut f: F) -> Self
    where
        F: FnMut(String) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::Func(Callback {
            inner: Box::new(move |arg| f(arg.unwrap_or_default()).boxed()),
        })
    }

    /// The placeholder kind this argument renders as
    pub fn kind(&self) -> InterpKind {
        match self {
            Self::Value(_) => InterpKind::Value,
            Self::Func(_) => InterpKind::Function,
        }
    }

    /// The placeholder token for this argument at position `id`
    pub(crate) fn placeholder(&self, id: usize) -> String {
        match self.kind() {
            InterpKind::Value => format!("#__VALUE_{id}__#"),
            InterpKind::Function => format!("#__FUNCTION_{id}__#"),
        }
    }
}

/// Substitute `#__VALUE_i__#` tokens in command text with the rendered
/// interpolation values.
///
/// A `#__FUNCTION_i__#` token inside command text is a structural error, as
/// is an index with no corresponding argument.
pub(crate) fn substitute_values(text: &str, interps: &[Interp]) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(text) {
        let whole = caps.get(0).expect("capture 0 always present");
        out.push_str(&text[last..whole.start()]);
        let id: usize = caps[2]
            .parse()
            .map_err(|_| Error::structural(format!("interpolation index out of range in `{text}`")))?;
        match interps.get(id) {
            Some(Interp::Value(v)) => out.push_str(&v.render()),
            Some(Interp::Func(_)) => {
                return Err(Error::structural(
                    "Command lines only accept value interpolations, not functions.",
                ))
            }
            None => {
                return Err(Error::structural(format!(
                    "interpolation #{id} referenced by `{text}` was not provided"
                )))
            }
        }
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_follows_host_rules() {
        assert!(!Value::Absent.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::Float(0.0).is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());

        assert!(Value::Bool(true).is_truthy());
        assert!(Value::Int(-3).is_truthy());
        assert!(Value::Str("x".into()).is_truthy());
    }

    #[test]
    fn from_option_maps_none_to_absent() {
        assert_eq!(Value::from(None::<&str>), Value::Absent);
        assert_eq!(Value::from(Some("hi")), Value::Str("hi".into()));
    }

    #[test]
    fn substitutes_value_tokens() {
        let interps = vec![Interp::value("world"), Interp::value(2)];
        let out = substitute_values("echo #__VALUE_0__# #__VALUE_1__#", &interps).unwrap();
        assert_eq!(out, "echo world 2");
    }

    #[test]
    fn function_token_in_command_text_is_structural() {
        let interps = vec![Interp::call(|| {})];
        let err = substitute_values("echo #__FUNCTION_0__#", &interps).unwrap_err();
        assert!(matches!(err, Error::Structural(_)));
    }

    #[test]
    fn missing_index_is_structural() {
        let err = substitute_values("echo #__VALUE_4__#", &[]).unwrap_err();
        assert!(matches!(err, Error::Structural(_)));
    }

    #[test]
    fn text_without_tokens_is_unchanged() {
        assert_eq!(substitute_values("ls -la", &[]).unwrap(), "ls -la");
    }
}
