//! Line diff for route change logs.

use similar::{ChangeTag, TextDiff};
use std::time::Duration;

/// Past this the diff falls back to a coarser (still correct) edit script.
const DIFF_TIMEOUT: Duration = Duration::from_millis(500);

/// Deleted lines as `- line`, inserted as `+ line`; blank lines are dropped.
/// Empty when nothing but whitespace changed.
pub fn format_delta(old: &str, new: &str) -> String {
    let diff = TextDiff::configure()
        .timeout(DIFF_TIMEOUT)
        .diff_lines(old, new);

    diff.iter_all_changes()
        .filter_map(|change| {
            let line = change.value().trim();
            if line.is_empty() {
                return None;
            }
            match change.tag() {
                ChangeTag::Delete => Some(format!("- {}", line)),
                ChangeTag::Insert => Some(format!("+ {}", line)),
                ChangeTag::Equal => None,
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
