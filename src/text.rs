//! Plain-text helpers shared by the chunking pipeline.

/// Splits a document into trimmed, non-empty paragraphs.
///
/// Line endings are normalized first, then the text is split on runs of
/// one-or-more blank lines. Segments that are empty after trimming are
/// dropped, so every returned paragraph carries visible content. Empty
/// input yields an empty sequence.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    for line in normalized.lines() {
        if line.trim().is_empty() {
            push_paragraph(&mut paragraphs, &mut current);
        } else {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
        }
    }
    push_paragraph(&mut paragraphs, &mut current);
    paragraphs
}

fn push_paragraph(paragraphs: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        paragraphs.push(trimmed.to_string());
    }
    current.clear();
}

/// Rough token count used to size chunks against an embedding budget.
///
/// Counts whitespace-separated words. This is a stable, language-agnostic
/// stand-in for a real tokenizer; callers must not assume compatibility
/// with any specific embedding model's token counts.
pub fn estimate_tokens(text: &str) -> usize {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0;
    }
    trimmed.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_blank_line_runs() {
        let text = "first paragraph\nstill first\n\nsecond\n\n\n\nthird";
        let paragraphs = split_paragraphs(text);
        assert_eq!(
            paragraphs,
            vec!["first paragraph\nstill first", "second", "third"]
        );
    }

    #[test]
    fn normalizes_line_endings() {
        let text = "one\r\n\r\ntwo\r\rthree";
        assert_eq!(split_paragraphs(text), vec!["one", "two", "three"]);
    }

    #[test]
    fn whitespace_only_lines_count_as_blank() {
        let text = "alpha\n   \t\nbeta";
        assert_eq!(split_paragraphs(text), vec!["alpha", "beta"]);
    }

    #[test]
    fn empty_input_yields_no_paragraphs() {
        assert!(split_paragraphs("").is_empty());
        assert!(split_paragraphs("\n\n  \n").is_empty());
    }

    #[test]
    fn estimates_word_counts() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("   "), 0);
        assert_eq!(estimate_tokens("one"), 1);
        assert_eq!(estimate_tokens("  spaced   out words "), 3);
    }
}
