//! Default grammar translator.
//!
//! The surface grammar is line-oriented: `$`/`$$` command lines, `if`/`else`
//! and `in` blocks delimited with braces, `await` statements, `stdout`/
//! `stderr >>` capture statements and `//` comments. Interpolation arguments
//! appear as `#__VALUE_i__#` / `#__FUNCTION_i__#` placeholder tokens spliced
//! into the text by the script facade.

use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take_while1},
    character::complete::{char, digit1, multispace0, multispace1, space0, space1},
    combinator::{map, map_res, opt},
    sequence::preceded,
    IResult, Parser,
};

use crate::ast::{CaptureTarget, InterpKind, InterpRef, Node, StreamKind, Translate};

/// The default [`Translate`] implementation
#[derive(Debug, Default, Clone, Copy)]
pub struct GrammarParser;

impl Translate for GrammarParser {
    fn translate(&self, source: &str) -> Option<Node> {
        let (rest, tree) = script(source.trim()).ok()?;
        if rest.is_empty() {
            Some(tree)
        } else {
            None
        }
    }
}

// ── Low-level parsers ──────────────────────────────────────────────────────

fn interp_ref(input: &str) -> IResult<&str, InterpRef> {
    let (input, _) = tag("#__").parse(input)?;
    let (input, kind) = alt((
        map(tag("VALUE"), |_| InterpKind::Value),
        map(tag("FUNCTION"), |_| InterpKind::Function),
    ))
    .parse(input)?;
    let (input, _) = char('_').parse(input)?;
    let (input, id) = map_res(digit1, |s: &str| s.parse::<usize>()).parse(input)?;
    let (input, _) = tag("__#").parse(input)?;
    Ok((input, InterpRef { kind, id }))
}

fn variable_name(input: &str) -> IResult<&str, String> {
    map(
        take_while1(|c: char| c.is_alphanumeric() || c == '_'),
        |s: &str| s.to_string(),
    )
    .parse(input)
}

/// Skip whitespace and `//` comments. Comments run to end of line.
fn skip_trivia(mut input: &str) -> &str {
    loop {
        let trimmed = input.trim_start();
        if let Some(rest) = trimmed.strip_prefix("//") {
            input = match rest.find('\n') {
                Some(idx) => &rest[idx + 1..],
                None => "",
            };
        } else {
            return trimmed;
        }
    }
}

// ── Statements ─────────────────────────────────────────────────────────────

/// A command line: `$ <text>` runs quietly, `$$ <text>` mirrors raw output
/// to the host process while running.
fn command_line(input: &str) -> IResult<&str, Node> {
    let (input, forward_logs) =
        alt((map(tag("$$"), |_| true), map(tag("$"), |_| false))).parse(input)?;
    let (input, _) = space1(input)?;
    let (input, text) = is_not("\n").parse(input)?;
    Ok((
        input,
        Node::CommandLine {
            text: text.trim_end().to_string(),
            forward_logs,
        },
    ))
}

/// A brace-delimited statement sequence
fn block(input: &str) -> IResult<&str, Node> {
    let (input, _) = char('{').parse(input)?;
    let (input, body) = script(input)?;
    let (input, _) = char('}').parse(input)?;
    Ok((input, body))
}

fn if_statement(input: &str) -> IResult<&str, Node> {
    let (input, _) = tag("if").parse(input)?;
    let (input, _) = multispace1(input)?;
    let (input, guard) = interp_ref(input)?;
    let (input, _) = multispace0(input)?;
    let (input, then_branch) = block(input)?;
    let (input, else_branch) =
        opt(preceded((multispace0, tag("else"), multispace0), block)).parse(input)?;
    Ok((
        input,
        Node::If {
            guard,
            then_branch: Box::new(then_branch),
            else_branch: else_branch.map(Box::new),
        },
    ))
}

fn in_statement(input: &str) -> IResult<&str, Node> {
    let (input, _) = tag("in").parse(input)?;
    let (input, _) = multispace1(input)?;
    let (input, dir) = interp_ref(input)?;
    let (input, _) = multispace0(input)?;
    let (input, body) = block(input)?;
    Ok((
        input,
        Node::In {
            dir,
            body: Box::new(body),
        },
    ))
}

fn await_statement(input: &str) -> IResult<&str, Node> {
    let (input, _) = tag("await").parse(input)?;
    let (input, _) = multispace1(input)?;
    let (input, reference) = interp_ref(input)?;
    Ok((input, Node::Await(reference)))
}

fn capture_statement(input: &str) -> IResult<&str, Node> {
    let (input, stream) = alt((
        map(tag("stdout"), |_| StreamKind::Stdout),
        map(tag("stderr"), |_| StreamKind::Stderr),
    ))
    .parse(input)?;
    let (input, _) = space0(input)?;
    let (input, _) = tag(">>").parse(input)?;
    let (input, _) = space0(input)?;
    let (input, target) = alt((
        map(interp_ref, CaptureTarget::Hook),
        map(variable_name, CaptureTarget::Variable),
    ))
    .parse(input)?;
    Ok((input, Node::Capture { stream, target }))
}

fn statement(input: &str) -> IResult<&str, Node> {
    alt((
        command_line,
        if_statement,
        in_statement,
        await_statement,
        capture_statement,
    ))
    .parse(input)
}

/// Parse a statement sequence into a `Node::Grammar`, consuming as many
/// statements as possible. Never fails; callers decide whether leftover
/// input is an error.
fn script(input: &str) -> IResult<&str, Node> {
    let mut nodes = Vec::new();
    let mut rest = skip_trivia(input);
    while let Ok((after, node)) = statement(rest) {
        nodes.push(node);
        rest = skip_trivia(after);
    }
    Ok((rest, Node::Grammar(nodes)))
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Node {
        GrammarParser
            .translate(src)
            .unwrap_or_else(|| panic!("should parse: {src:?}"))
    }

    fn statements(node: Node) -> Vec<Node> {
        match node {
            Node::Grammar(nodes) => nodes,
            other => panic!("expected grammar node, got {other:?}"),
        }
    }

    #[test]
    fn parses_command_line() {
        let nodes = statements(parse("$ echo hello"));
        assert_eq!(
            nodes,
            vec![Node::CommandLine {
                text: "echo hello".into(),
                forward_logs: false
            }]
        );
    }

    #[test]
    fn parses_forwarding_command_line() {
        let nodes = statements(parse("$$ make build"));
        assert_eq!(
            nodes,
            vec![Node::CommandLine {
                text: "make build".into(),
                forward_logs: true
            }]
        );
    }

    #[test]
    fn parses_multiline_sequence() {
        let nodes = statements(parse("$ echo one\n$ echo two\n$ echo three"));
        assert_eq!(nodes.len(), 3);
    }

    #[test]
    fn parses_if_with_else() {
        let nodes = statements(parse(
            "if #__VALUE_0__# {\n  $ echo yes\n} else {\n  $ echo no\n}",
        ));
        match &nodes[0] {
            Node::If {
                guard,
                then_branch,
                else_branch,
            } => {
                assert_eq!(
                    *guard,
                    InterpRef {
                        kind: InterpKind::Value,
                        id: 0
                    }
                );
                assert_eq!(statements((**then_branch).clone()).len(), 1);
                assert!(else_branch.is_some());
            }
            other => panic!("expected if statement, got {other:?}"),
        }
    }

    #[test]
    fn parses_if_without_else() {
        let nodes = statements(parse("if #__VALUE_1__# {\n  $ true\n}"));
        assert!(matches!(
            &nodes[0],
            Node::If {
                else_branch: None,
                ..
            }
        ));
    }

    #[test]
    fn parses_in_statement() {
        let nodes = statements(parse("in #__VALUE_0__# {\n  $ pwd\n}"));
        match &nodes[0] {
            Node::In { dir, .. } => {
                assert_eq!(dir.kind, InterpKind::Value);
                assert_eq!(dir.id, 0);
            }
            other => panic!("expected in statement, got {other:?}"),
        }
    }

    #[test]
    fn parses_await_statement() {
        let nodes = statements(parse("await #__FUNCTION_2__#"));
        assert_eq!(
            nodes,
            vec![Node::Await(InterpRef {
                kind: InterpKind::Function,
                id: 2
            })]
        );
    }

    #[test]
    fn parses_capture_into_variable() {
        let nodes = statements(parse("$ pwd\nstdout >> here"));
        assert_eq!(
            nodes[1],
            Node::Capture {
                stream: StreamKind::Stdout,
                target: CaptureTarget::Variable("here".into()),
            }
        );
    }

    #[test]
    fn parses_capture_into_hook() {
        let nodes = statements(parse("$ pwd\nstderr >> #__FUNCTION_0__#"));
        assert_eq!(
            nodes[1],
            Node::Capture {
                stream: StreamKind::Stderr,
                target: CaptureTarget::Hook(InterpRef {
                    kind: InterpKind::Function,
                    id: 0
                }),
            }
        );
    }

    #[test]
    fn skips_comments() {
        let nodes = statements(parse("// setup\n$ echo one\n// done\n"));
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn nested_blocks_parse() {
        let src = "if #__VALUE_0__# {\n  in #__VALUE_1__# {\n    $ ls\n  }\n}";
        let nodes = statements(parse(src));
        match &nodes[0] {
            Node::If { then_branch, .. } => {
                let inner = statements((**then_branch).clone());
                assert!(matches!(&inner[0], Node::In { .. }));
            }
            other => panic!("expected if statement, got {other:?}"),
        }
    }

    #[test]
    fn command_text_keeps_placeholder_tokens() {
        let nodes = statements(parse("$ echo #__VALUE_0__#"));
        assert_eq!(
            nodes,
            vec![Node::CommandLine {
                text: "echo #__VALUE_0__#".into(),
                forward_logs: false
            }]
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(GrammarParser.translate("not a script").is_none());
        assert!(GrammarParser.translate("$ echo hi\n???").is_none());
        assert!(GrammarParser.translate("if { $ true }").is_none());
    }

    #[test]
    fn empty_source_is_an_empty_grammar() {
        assert_eq!(GrammarParser.translate(""), Some(Node::Grammar(vec![])));
    }
}
