//! Token-budgeted windowing over a chapter's paragraph sequence.

use anyhow::Result;

use crate::text::estimate_tokens;

/// Windowing knobs applied to every chapter of a book.
#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    /// Approximate token budget per window.
    pub max_tokens: usize,
    /// Approximate tokens shared between adjacent windows.
    pub overlap_tokens: usize,
}

impl ChunkingConfig {
    /// Rejects invalid budgets before any windowing starts.
    ///
    /// `overlap_tokens` must stay strictly below `max_tokens`; otherwise the
    /// backward-overlap walk could never make room for new content.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.max_tokens > 0, "max-tokens must be positive");
        anyhow::ensure!(
            self.overlap_tokens < self.max_tokens,
            "overlap-tokens ({}) must be smaller than max-tokens ({})",
            self.overlap_tokens,
            self.max_tokens
        );
        Ok(())
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            overlap_tokens: 48,
        }
    }
}

/// One bounded, possibly overlapping slice of a paragraph sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    /// Index of the first paragraph in the window.
    pub start: usize,
    /// Exclusive index one past the last paragraph.
    pub end_exclusive: usize,
    /// Paragraphs `[start, end_exclusive)` joined with a blank line.
    pub text: String,
    /// Token estimate of `text`.
    pub approx_tokens: usize,
}

/// Partitions paragraphs into overlapping windows under the token budget.
///
/// Greedy forward fill: from the cursor, paragraphs accumulate until adding
/// the next one would exceed the budget (or the running estimate already
/// reached it). A window always holds at least one paragraph, so a single
/// paragraph larger than the budget is emitted as-is rather than split.
/// The next cursor comes from [`overlap_start`], which guarantees strict
/// forward progress, so the loop runs at most `paragraphs.len()` times and
/// every paragraph lands in at least one window.
///
/// The caller is expected to have run [`ChunkingConfig::validate`] first.
pub fn build_windows(paragraphs: &[String], config: &ChunkingConfig) -> Vec<Window> {
    let mut windows = Vec::new();
    if paragraphs.is_empty() {
        return windows;
    }

    let costs: Vec<usize> = paragraphs
        .iter()
        .map(|paragraph| estimate_tokens(paragraph))
        .collect();

    let mut start = 0usize;
    loop {
        let mut end = start + 1;
        let mut running = costs[start];
        while end < paragraphs.len() && running < config.max_tokens {
            if running + costs[end] > config.max_tokens {
                break;
            }
            running += costs[end];
            end += 1;
        }

        let text = paragraphs[start..end].join("\n\n");
        let approx_tokens = estimate_tokens(&text);
        windows.push(Window {
            start,
            end_exclusive: end,
            text,
            approx_tokens,
        });

        if end >= paragraphs.len() {
            break;
        }
        start = overlap_start(&costs, start, end, config.overlap_tokens);
    }

    windows
}

/// Computes the next window start by walking backward from `window_end`.
///
/// Paragraph costs accumulate right-to-left until they cover
/// `overlap_tokens` or the walk hits `window_start`. The result is floored
/// at `window_start + 1`: without that floor a paragraph whose cost alone
/// exceeds the overlap target would pin the cursor forever.
pub fn overlap_start(
    costs: &[usize],
    window_start: usize,
    window_end: usize,
    overlap_tokens: usize,
) -> usize {
    let mut next = window_end;
    if overlap_tokens > 0 {
        let mut accumulated = 0usize;
        while next > window_start && accumulated < overlap_tokens {
            next -= 1;
            accumulated += costs[next];
        }
    }
    let next = next.max(window_start + 1);
    debug_assert!(next > window_start);
    next
}
