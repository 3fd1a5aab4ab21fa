//! Token-bounded splitting of long files.
//!
//! Small files come back as a single chunk. Larger files are split by a
//! greedy line accumulator that prefers cutting at top-level declaration
//! boundaries for languages where those are recognizable, and carries a
//! tail overlap of up to the configured token budget into the next chunk.

use crate::tokenizer::Tokenizer;
use crate::types::{Chunk, Language};

/// Whether a line starts a top-level declaration in the given language,
/// the preferred cut points for structure-aware chunking.
fn is_declaration_start(language: Language, line: &str) -> bool {
    let trimmed = line.trim_start();
    // Indented lines are never top-level
    if trimmed.len() != line.len() {
        return false;
    }
    match language {
        Language::Python => {
            trimmed.starts_with("def ")
                || trimmed.starts_with("async def ")
                || trimmed.starts_with("class ")
                || trimmed.starts_with('@')
        }
        Language::JavaScript | Language::TypeScript => {
            trimmed.starts_with("function ")
                || trimmed.starts_with("async function ")
                || trimmed.starts_with("class ")
                || trimmed.starts_with("export ")
                || trimmed.starts_with("const ")
        }
        Language::Kotlin => {
            trimmed.starts_with("fun ")
                || trimmed.starts_with("suspend fun ")
                || trimmed.starts_with("class ")
                || trimmed.starts_with("object ")
        }
        Language::Go => trimmed.starts_with("func ") || trimmed.starts_with("type "),
        Language::Rust => {
            trimmed.starts_with("fn ")
                || trimmed.starts_with("pub fn ")
                || trimmed.starts_with("impl ")
                || trimmed.starts_with("struct ")
                || trimmed.starts_with("pub struct ")
        }
        _ => false,
    }
}

struct Accumulator {
    lines: Vec<String>,
    tokens: usize,
    start_line: usize,
}

/// Split file content into chunks of at most `max_tokens` estimated tokens,
/// carrying up to `overlap_tokens` of trailing context into each successor.
/// Line coordinates are 1-based and inclusive; overlapping chunks satisfy
/// `chunk[i].end_line >= chunk[i+1].start_line`.
pub fn chunk_file(
    content: &str,
    language: Language,
    max_tokens: usize,
    overlap_tokens: usize,
    tokenizer: &dyn Tokenizer,
) -> Vec<Chunk> {
    let total_tokens = tokenizer.count_tokens(content);
    let line_count = content.lines().count().max(1);

    if total_tokens <= max_tokens {
        return vec![Chunk {
            content: content.to_string(),
            index: 0,
            total: 1,
            start_line: 1,
            end_line: line_count,
        }];
    }

    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    let mut chunks: Vec<(String, usize, usize)> = Vec::new();
    let mut acc = Accumulator { lines: Vec::new(), tokens: 0, start_line: 1 };
    // Index into acc.lines of the most recent declaration boundary
    let mut last_boundary: Option<usize> = None;

    for line in lines.iter() {
        let line_tokens = tokenizer.count_tokens(line);

        if acc.tokens + line_tokens > max_tokens && !acc.lines.is_empty() {
            // Prefer splitting at a declaration boundary when one sits in
            // the back half of the accumulated chunk
            let cut = match last_boundary {
                Some(b) if b > acc.lines.len() / 2 => b,
                _ => acc.lines.len(),
            };
            let (kept, carried): (Vec<String>, Vec<String>) = {
                let (k, c) = acc.lines.split_at(cut);
                (k.to_vec(), c.to_vec())
            };

            let end_line = acc.start_line + kept.len() - 1;
            chunks.push((kept.concat(), acc.start_line, end_line));

            // Tail overlap from the emitted chunk, within the token budget
            let mut overlap: Vec<String> = Vec::new();
            let mut overlap_used = 0usize;
            for prev in kept.iter().rev() {
                let t = tokenizer.count_tokens(prev);
                if overlap_used + t > overlap_tokens {
                    break;
                }
                overlap.insert(0, prev.clone());
                overlap_used += t;
            }

            let carried_tokens: usize =
                carried.iter().map(|l| tokenizer.count_tokens(l)).sum();
            let next_start = acc.start_line + cut - overlap.len();
            acc = Accumulator {
                tokens: overlap_used + carried_tokens,
                start_line: next_start,
                lines: overlap.into_iter().chain(carried).collect(),
            };
            last_boundary = None;
        }

        if is_declaration_start(language, line) {
            last_boundary = Some(acc.lines.len());
        }
        acc.lines.push(line.to_string());
        acc.tokens += line_tokens;
    }

    if !acc.lines.is_empty() {
        let end_line = acc.start_line + acc.lines.len() - 1;
        chunks.push((acc.lines.concat(), acc.start_line, end_line));
    }

    let total = chunks.len();
    chunks
        .into_iter()
        .enumerate()
        .map(|(index, (content, start_line, end_line))| Chunk {
            content,
            index,
            total,
            start_line,
            end_line: end_line.min(line_count),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::BytesEstimateTokenizer;

    const MAX: usize = 6000;
    const OVERLAP: usize = 500;

    #[test]
    fn test_small_file_single_chunk() {
        let tok = BytesEstimateTokenizer;
        let content = "def f():\n    return 1\n";
        let chunks = chunk_file(content, Language::Python, MAX, OVERLAP, &tok);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].total, 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 2);
        assert_eq!(chunks[0].content, content);
    }

    #[test]
    fn test_large_file_bounds_and_overlap() {
        let tok = BytesEstimateTokenizer;
        // ~20k tokens: 1000 lines of ~80 bytes
        let line = "x = compute_something_interesting(12345)  # padding padding padding pad\n";
        let content = line.repeat(1000);
        let chunks = chunk_file(&content, Language::Python, MAX, OVERLAP, &tok);

        assert!(chunks.len() >= 3, "expected multiple chunks, got {}", chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert_eq!(chunk.total, chunks.len());
            // Estimated tokens never exceed max + overlap
            assert!(tok.count_tokens(&chunk.content) <= MAX + OVERLAP);
            if i + 1 < chunks.len() {
                // Overlap present between neighbors
                assert!(
                    chunk.end_line >= chunks[i + 1].start_line,
                    "chunk {i} ends {} but next starts {}",
                    chunk.end_line,
                    chunks[i + 1].start_line
                );
            }
        }
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks.last().unwrap().end_line, 1000);
    }

    #[test]
    fn test_prefers_declaration_boundary() {
        let tok = BytesEstimateTokenizer;
        // Functions of ~50 lines each; the splitter should cut at a def
        let mut content = String::new();
        for f in 0..40 {
            content.push_str(&format!("def func_{f}(arg):\n"));
            for l in 0..50 {
                content.push_str(&format!("    value_{l} = arg + {l}  # body line padding\n"));
            }
        }
        let chunks = chunk_file(&content, Language::Python, 2000, 100, &tok);
        assert!(chunks.len() > 1);

        // Most continuation chunks should begin at (or within overlap of) a def
        let def_starts = chunks[1..]
            .iter()
            .filter(|c| {
                c.content
                    .lines()
                    .take(15)
                    .any(|l| l.starts_with("def "))
            })
            .count();
        assert!(def_starts * 2 >= chunks.len() - 1, "{def_starts}/{} chunks cut at defs", chunks.len() - 1);
    }

    #[test]
    fn test_chunk_coverage() {
        let tok = BytesEstimateTokenizer;
        let line = "some line of content that is long enough to matter here ok\n";
        let content = line.repeat(600);
        let chunks = chunk_file(&content, Language::Unknown, 1000, 100, &tok);

        // Every line of the original is covered by some chunk range
        let mut covered = vec![false; 601];
        for chunk in &chunks {
            for entry in covered.iter_mut().take(chunk.end_line + 1).skip(chunk.start_line) {
                *entry = true;
            }
        }
        assert!(covered[1..=600].iter().all(|&c| c));
    }

    #[test]
    fn test_zero_overlap() {
        let tok = BytesEstimateTokenizer;
        let line = "abcdefgh\n";
        let content = line.repeat(100);
        let chunks = chunk_file(&content, Language::Unknown, 50, 0, &tok);
        for window in chunks.windows(2) {
            assert_eq!(window[0].end_line + 1, window[1].start_line);
        }
    }
}
