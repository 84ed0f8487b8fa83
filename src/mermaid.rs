//! Mermaid flowchart rendering for plan graphs.

use std::fmt::Write as _;

use crate::dag::Dag;
use crate::trace::Trace;

const SKIPPED_STYLE: &str = "fill:#333,color:#999,stroke:#999";

/// Plain graph: one labelled box per node, one arrow per edge.
///
/// Conditional edges carry their condition as the arrow label.
pub fn render(dag: &Dag) -> String {
    let mut out = String::from("graph TD\n");
    for node in dag.nodes() {
        let _ = writeln!(out, "  {}[\"{}\"]", node_ref(&node.id), label(&node.id, &node.op));
    }
    for (parent, child) in dag.edges() {
        let cond = dag
            .node(child)
            .and_then(|c| c.conditions.get(parent))
            .map(String::as_str);
        match cond {
            Some(c) => {
                let _ = writeln!(
                    out,
                    "  {} -->|{}| {}",
                    node_ref(parent),
                    escape(c),
                    node_ref(child)
                );
            }
            None => {
                let _ = writeln!(out, "  {} --> {}", node_ref(parent), node_ref(child));
            }
        }
    }
    out
}

/// Graph plus a dimmed style line for every node whose trace entry is a skip.
pub fn render_with_trace(dag: &Dag, trace: &Trace) -> String {
    let mut out = render(dag);
    for id in dag.ids() {
        if trace.is_skipped(id) {
            let _ = writeln!(out, "  style {} {SKIPPED_STYLE}", node_ref(id));
        }
    }
    out
}

/// Standalone HTML page that renders `diagram` client-side.
pub fn html_page(title: &str, diagram: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>{title}</title>
  <script type="module">
    import mermaid from 'https://cdn.jsdelivr.net/npm/mermaid@10/dist/mermaid.esm.min.mjs';
    mermaid.initialize({{ startOnLoad: true, theme: 'dark' }});
  </script>
</head>
<body style="background:black; color:#00d8ff; font-family:sans-serif; text-align:center; padding:2em;">
  <h2>{title}</h2>
  <div class="mermaid">
{diagram}
  </div>
</body>
</html>
"#,
        title = html_escape(title),
        diagram = html_escape(diagram),
    )
}

/// Mermaid ids must be plain words; anything else is hex-encoded.
fn node_ref(id: &str) -> String {
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        id.to_string()
    } else {
        let hex: String = id.bytes().map(|b| format!("{b:02x}")).collect();
        format!("n_{hex}")
    }
}

fn label(id: &str, op: &str) -> String {
    if op.is_empty() {
        escape(id)
    } else {
        format!("{}: {}", escape(id), escape(op))
    }
}

fn escape(s: &str) -> String {
    s.replace('"', "#quot;").replace('|', "#124;")
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
