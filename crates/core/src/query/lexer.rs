//! Tokenizer for the filter language.
//!
//! Grammar, informally: a token is either `field <op> value` — where the
//! field is `[A-Za-z0-9_]+`, the operator is one of `= : < <= > >=`
//! (two-character operators matched first), and the value is a quoted
//! phrase or a run of non-whitespace — or a bare search term (quoted phrase
//! or word). Anything that fails to parse as a filter falls back to a term.

use super::types::{Filter, FilterOp, Token};

/// Split a query string into filter and term tokens.
pub fn tokenize(input: &str) -> Vec<Token> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        if i >= chars.len() {
            break;
        }

        if let Some((filter, next)) = try_filter(&chars, i) {
            tokens.push(Token::Filter(filter));
            i = next;
            continue;
        }

        if chars[i] == '"' {
            let (phrase, next) = read_quoted(&chars, i);
            if !phrase.is_empty() {
                tokens.push(Token::Term(phrase));
            }
            i = next;
        } else {
            let start = i;
            while i < chars.len() && !chars[i].is_whitespace() {
                i += 1;
            }
            tokens.push(Token::Term(chars[start..i].iter().collect()));
        }
    }

    tokens
}

fn try_filter(chars: &[char], start: usize) -> Option<(Filter, usize)> {
    let mut i = start;
    while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
        i += 1;
    }
    if i == start {
        return None;
    }
    let field: String = chars[start..i].iter().collect::<String>().to_lowercase();

    let mut j = i;
    while j < chars.len() && chars[j].is_whitespace() {
        j += 1;
    }
    let (op, after_op) = read_op(chars, j)?;

    let mut k = after_op;
    while k < chars.len() && chars[k].is_whitespace() {
        k += 1;
    }

    if k < chars.len() && chars[k] == '"' {
        let (phrase, next) = read_quoted(chars, k);
        if phrase.is_empty() {
            return None;
        }
        return Some((
            Filter {
                field,
                op,
                value: phrase,
            },
            next,
        ));
    }

    let vstart = k;
    while k < chars.len() && !chars[k].is_whitespace() {
        k += 1;
    }
    if k == vstart {
        return None;
    }
    Some((
        Filter {
            field,
            op,
            value: chars[vstart..k].iter().collect(),
        },
        k,
    ))
}

fn read_op(chars: &[char], i: usize) -> Option<(FilterOp, usize)> {
    if i + 1 < chars.len() {
        match (chars[i], chars[i + 1]) {
            ('<', '=') => return Some((FilterOp::Le, i + 2)),
            ('>', '=') => return Some((FilterOp::Ge, i + 2)),
            _ => {}
        }
    }
    if i < chars.len() {
        match chars[i] {
            '=' => return Some((FilterOp::Eq, i + 1)),
            ':' => return Some((FilterOp::Loose, i + 1)),
            '<' => return Some((FilterOp::Lt, i + 1)),
            '>' => return Some((FilterOp::Gt, i + 1)),
            _ => {}
        }
    }
    None
}

/// Read a double-quoted phrase starting at `i`. Returns the unquoted
/// content and the index after the closing quote; an unterminated quote
/// consumes the rest of the input.
fn read_quoted(chars: &[char], i: usize) -> (String, usize) {
    debug_assert_eq!(chars[i], '"');
    let start = i + 1;
    let mut j = start;
    while j < chars.len() && chars[j] != '"' {
        j += 1;
    }
    let phrase: String = chars[start..j].iter().collect();
    let next = if j < chars.len() { j + 1 } else { j };
    (phrase, next)
}
