//! Prompt template rendering.
//!
//! Closed placeholder set: `{task_description}`, `{project_path}`, and
//! `{artifact:<phaseName>}` where the name is the display name of an
//! earlier phase in the same execution. Artifact names match
//! case-insensitively (templates commonly write `{artifact:analysis}` for a
//! phase named "Analysis"). An unresolved artifact placeholder is left
//! literal and logged at warn level rather than failing the phase.

use std::collections::HashMap;

use tracing::warn;

/// Render a phase's prompt template against the task context and the map of
/// prior artifact contents keyed by producing phase name.
pub fn render_prompt(
    template: &str,
    task_description: &str,
    project_path: &str,
    artifacts: &HashMap<String, String>,
) -> String {
    let base = template
        .replace("{task_description}", task_description)
        .replace("{project_path}", project_path);

    const MARKER: &str = "{artifact:";
    let mut out = String::with_capacity(base.len());
    let mut rest = base.as_str();

    while let Some(start) = rest.find(MARKER) {
        out.push_str(&rest[..start]);
        let after = &rest[start + MARKER.len()..];
        let Some(end) = after.find('}') else {
            // No closing brace; not a placeholder
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let name = &after[..end];
        match lookup(artifacts, name) {
            Some(content) => out.push_str(content),
            None => {
                warn!(artifact = name, "unresolved artifact placeholder left literal");
                out.push_str(&rest[start..start + MARKER.len() + end + 1]);
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

/// Exact match first, then case-insensitive.
fn lookup<'a>(artifacts: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    if let Some(content) = artifacts.get(name) {
        return Some(content);
    }
    artifacts
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, content)| content.as_str())
}
