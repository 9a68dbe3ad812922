//! Markdown bodies posted on flagged items.

use crate::item::{ItemKind, SimilarityResult};
use std::fmt::Write;

/// Summary comment listing similar items.
pub fn duplicate_summary(kind: ItemKind, shown: &[SimilarityResult]) -> String {
    let name = kind.display_name();
    let mut comment = String::from("👋 **Potential Duplicate Detected**\n\n");
    let _ = write!(
        comment,
        "This {name} appears to be similar to existing {name}s:\n\n"
    );

    for result in shown {
        let _ = writeln!(
            comment,
            "- #{}: {} (Similarity: {}%)",
            result.number,
            result.title,
            result.percent()
        );
    }

    comment.push_str("\n---\n");
    let _ = write!(
        comment,
        "Please review these {name}s to see if any of them address your concern. \
         If this is indeed a duplicate, please close this {name} and continue the discussion in the existing one.\n\n"
    );
    comment.push_str(
        "If this is **not** a duplicate, please add more context to help differentiate it.\n\n",
    );
    comment.push_str(
        "*This is an automated message. If you believe this is incorrect, please remove the label and mention a maintainer.*",
    );
    comment
}

/// Comment posted right before an item is closed as a duplicate.
pub fn closing_notice(kind: ItemKind, duplicate_of: u64) -> String {
    format!(
        "🔒 **Closing as Exact Duplicate**\n\n\
         This {} is an exact duplicate of #{}.\n\n\
         Please continue the discussion in #{}.",
        kind.display_name(),
        duplicate_of,
        duplicate_of
    )
}
