//! Surface-string utilities shared by the parser and the node renderers.
//!
//! These are pure functions over strings. The splitter understands the
//! full quoting and grouping rules of the DSL surface syntax, so callers
//! can split argument lists without parsing the arguments themselves.

use crate::error::{DslError, Result};

/// Split a comma-separated argument string at top-level commas.
///
/// A comma separates arguments only when every `()`, `[]`, and `{}` group
/// opened so far has been closed and the scanner is not inside a quoted
/// string. Quotes are `'...'` or `"..."`; inside a quoted string a
/// backslash escapes the next character verbatim, including the closing
/// quote. Each returned argument is stripped of surrounding whitespace.
///
/// Errors on unmatched or mismatched closing brackets, unterminated
/// quotes, empty top-level arguments, and trailing separators.
///
/// ```
/// use palaver_dsl::split_top_level;
///
/// let args = split_top_level(r#"v=[1, invert(v=2)], x="a, b""#).unwrap();
/// assert_eq!(args, vec!["v=[1, invert(v=2)]", r#"x="a, b""#]);
/// ```
pub fn split_top_level(input: &str) -> Result<Vec<String>> {
    let mut args: Vec<String> = Vec::new();
    let mut group_stack: Vec<char> = Vec::new();
    let mut current = String::new();
    let mut in_quote: Option<char> = None;

    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if let Some(quote) = in_quote {
            if c == '\\' && i + 1 < chars.len() {
                current.push(c);
                current.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if c == quote {
                in_quote = None;
            }
            current.push(c);
        } else {
            match c {
                '\'' | '"' => {
                    in_quote = Some(c);
                    current.push(c);
                }
                '(' | '[' | '{' => {
                    group_stack.push(c);
                    current.push(c);
                }
                ')' | ']' | '}' => {
                    let Some(opening) = group_stack.pop() else {
                        return Err(DslError::syntax_at(format!("unmatched closing '{c}'"), i));
                    };
                    if !matches!((opening, c), ('(', ')') | ('[', ']') | ('{', '}')) {
                        return Err(DslError::syntax_at(
                            format!("mismatched group: '{opening}' closed by '{c}'"),
                            i,
                        ));
                    }
                    current.push(c);
                }
                ',' if group_stack.is_empty() => {
                    let stripped = current.trim();
                    if stripped.is_empty() {
                        return Err(DslError::syntax_at("empty top-level argument", i));
                    }
                    args.push(stripped.to_string());
                    current.clear();
                }
                _ => current.push(c),
            }
        }

        i += 1;
    }

    if in_quote.is_some() {
        return Err(DslError::Syntax("unterminated string literal".to_string()));
    }

    if !group_stack.is_empty() {
        return Err(DslError::Syntax(
            "unbalanced grouping in DSL expression".to_string(),
        ));
    }

    let trailing = current.trim();
    if !trailing.is_empty() {
        args.push(trailing.to_string());
    } else if input.trim_end().ends_with(',') {
        return Err(DslError::Syntax("trailing top-level argument separator".to_string()));
    }

    Ok(args)
}

/// Return the interior of a string delimited by matching quotes.
///
/// The input must start and end with the same quote character (`'` or
/// `"`) and be at least two characters long. No unescaping is performed.
pub fn strip_quotes(input: &str) -> Result<&str> {
    let trimmed = input.trim();
    let mut chars = trimmed.chars();
    let (first, last) = (chars.next(), chars.next_back());

    match (first, last) {
        (Some(f), Some(l)) if f == l && (f == '\'' || f == '"') => {
            Ok(&trimmed[f.len_utf8()..trimmed.len() - l.len_utf8()])
        }
        _ => Err(DslError::Syntax(format!(
            "expected a quoted string, got '{trimmed}'"
        ))),
    }
}

/// Render a double-quoted DSL string literal, escaping `\` and `"`.
///
/// Used only for rendering; the parser does not undo these escapes.
pub fn quote_and_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 2);
    out.push('"');
    for c in input.chars() {
        if c == '\\' || c == '"' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}
