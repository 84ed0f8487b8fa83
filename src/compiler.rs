//! Plan DSL → [`Dag`].
//!
//! ```text
//! plan://stmt(;stmt)*
//! stmt      := node_def | edge_def
//! node_def  := id "=" op
//! edge_def  := child "<-" parent ["?" condition]
//! ```
//!
//! Parsing is permissive: fragments that match neither statement form are
//! dropped (and listed in [`CompiledPlan::dropped`]), never rejected.
//! An op that opens with `(` runs to its matching `)`, which lets a node
//! carry a multi-statement sub-plan: `A=(plan://X=tool://a;Y<-X)`. Any other
//! `;` ends the statement, brackets or not.

use tracing::debug;

use crate::dag::Dag;

pub const PLAN_SCHEME: &str = "plan://";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement<'a> {
    Node {
        id: &'a str,
        op: &'a str,
    },
    Edge {
        child: &'a str,
        parent: &'a str,
        condition: Option<&'a str>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct CompiledPlan {
    pub dag: Dag,
    /// Fragments that were neither a node nor an edge definition.
    pub dropped: Vec<String>,
}

/// Compile a plan string (with or without the `plan://` prefix).
pub fn compile(plan: &str) -> CompiledPlan {
    let body = plan.strip_prefix(PLAN_SCHEME).unwrap_or(plan);
    let mut dag = Dag::new();
    let mut dropped = Vec::new();

    for fragment in split_statements(body) {
        match parse_statement(fragment) {
            Some(Statement::Node { id, op }) => dag.define(id, op),
            Some(Statement::Edge {
                child,
                parent,
                condition,
            }) => dag.connect(parent, child, condition),
            None => {
                debug!(fragment, "dropping malformed plan fragment");
                dropped.push(fragment.to_string());
            }
        }
    }

    CompiledPlan { dag, dropped }
}

/// Shorthand for callers that only need the graph.
pub fn compile_dag(plan: &str) -> Dag {
    compile(plan).dag
}

/// Split on `;`, trimming and discarding empty fragments.
///
/// A node whose op starts with `(` keeps everything up to the matching `)`
/// in one fragment. If that `(` is never closed the statement ends at the
/// next `;` like any other.
pub fn split_statements(body: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0usize;
    while start < body.len() {
        let rest = &body[start..];
        let end = grouped_statement_end(rest)
            .or_else(|| rest.find(';'))
            .unwrap_or(rest.len());
        push_fragment(&mut out, &rest[..end]);
        start += end + 1;
    }
    out
}

/// For `id=(...)...`, the offset of the `;` (or end of input) that follows
/// the closing `)`.
fn grouped_statement_end(rest: &str) -> Option<usize> {
    let plain_end = rest.find(';').unwrap_or(rest.len());
    let eq = rest[..plain_end].find('=')?;
    if rest[..eq].contains("<-") {
        return None;
    }
    let after = &rest[eq + 1..];
    let open = eq + 1 + (after.len() - after.trim_start().len());
    if !rest[open..].starts_with('(') {
        return None;
    }
    let close = open + matching_paren(&rest[open..])?;
    let tail = &rest[close + 1..];
    Some(close + 1 + tail.find(';').unwrap_or(tail.len()))
}

/// Index of the `)` closing the `(` that `s` starts with.
fn matching_paren(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (idx, ch) in s.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

fn push_fragment<'a>(out: &mut Vec<&'a str>, raw: &'a str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        out.push(trimmed);
    }
}

/// Classify one trimmed fragment: whichever of `<-` and `=` comes first
/// decides between an edge and a node definition.
pub fn parse_statement(fragment: &str) -> Option<Statement<'_>> {
    let eq = fragment.find('=');
    let arrow = fragment
        .find("<-")
        .filter(|a| eq.map_or(true, |e| *a < e));
    if let Some(idx) = arrow {
        let child = fragment[..idx].trim();
        let rest = fragment[idx + 2..].trim();
        let (parent, condition) = match rest.split_once('?') {
            Some((p, c)) => {
                let c = c.trim();
                (p.trim(), (!c.is_empty()).then_some(c))
            }
            None => (rest, None),
        };
        if child.is_empty() || parent.is_empty() {
            return None;
        }
        return Some(Statement::Edge {
            child,
            parent,
            condition,
        });
    }

    let (id, op) = fragment.split_once('=')?;
    let id = id.trim();
    if id.is_empty() {
        return None;
    }
    Some(Statement::Node {
        id,
        op: strip_group(op.trim()),
    })
}

/// `(inner)` → `inner` when the outer pair wraps the whole op.
fn strip_group(op: &str) -> &str {
    let Some(inner) = op.strip_prefix('(').and_then(|s| s.strip_suffix(')')) else {
        return op;
    };
    let mut depth = 0isize;
    for ch in inner.chars() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    // "(a)(b)": the first ')' closes the outer '(' early.
                    return op;
                }
            }
            _ => {}
        }
    }
    if depth == 0 {
        inner.trim()
    } else {
        op
    }
}
