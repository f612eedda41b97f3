//! Recursive character text splitting
//!
//! Splits on the coarsest separator present (paragraphs, then lines, then
//! words, then characters) and merges the pieces back into chunks of at
//! most `chunk_size` characters, carrying up to `overlap` characters of
//! trailing context into the next chunk.

use std::collections::VecDeque;

/// Separators tried in order; the empty separator splits into characters
pub const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];

fn char_len(s: &str) -> usize {
    s.chars().count()
}

pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if chunk_size == 0 || text.trim().is_empty() {
        return Vec::new();
    }
    split_recursive(text, DEFAULT_SEPARATORS, chunk_size, overlap.min(chunk_size - 1))
}

fn split_recursive(text: &str, separators: &[&str], chunk_size: usize, overlap: usize) -> Vec<String> {
    let position = separators
        .iter()
        .position(|sep| sep.is_empty() || text.contains(sep))
        .unwrap_or(separators.len().saturating_sub(1));
    let separator = separators.get(position).copied().unwrap_or("");
    let remaining = separators.get(position + 1..).unwrap_or(&[]);

    let splits: Vec<&str> = if separator.is_empty() {
        text.char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect()
    } else {
        text.split(separator).filter(|s| !s.is_empty()).collect()
    };

    let mut chunks = Vec::new();
    let mut pending: Vec<&str> = Vec::new();

    for split in splits {
        if char_len(split) < chunk_size {
            pending.push(split);
            continue;
        }

        if !pending.is_empty() {
            chunks.extend(merge_splits(&pending, separator, chunk_size, overlap));
            pending.clear();
        }

        if remaining.is_empty() {
            chunks.push(split.trim().to_string());
        } else {
            chunks.extend(split_recursive(split, remaining, chunk_size, overlap));
        }
    }

    if !pending.is_empty() {
        chunks.extend(merge_splits(&pending, separator, chunk_size, overlap));
    }

    chunks.retain(|c| !c.is_empty());
    chunks
}

fn merge_splits(splits: &[&str], separator: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let separator_len = char_len(separator);
    let mut docs = Vec::new();
    let mut window: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    let joined_len = |window: &VecDeque<&str>| if window.is_empty() { 0 } else { separator_len };

    for split in splits {
        let len = char_len(split);

        if total + len + joined_len(&window) > chunk_size && !window.is_empty() {
            push_joined(&mut docs, &window, separator);

            // Drop from the front until only the overlap remains and the
            // next split fits
            while total > overlap || (total > 0 && total + len + joined_len(&window) > chunk_size) {
                let Some(first) = window.pop_front() else {
                    break;
                };
                total = total.saturating_sub(char_len(first) + joined_len(&window));
            }
        }

        total += len + joined_len(&window);
        window.push_back(split);
    }

    push_joined(&mut docs, &window, separator);
    docs
}

fn push_joined(docs: &mut Vec<String>, window: &VecDeque<&str>, separator: &str) {
    let joined = window.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        docs.push(trimmed.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(count: usize) -> String {
        (0..count).map(|i| format!("word{:04}", i)).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_short_text_is_one_chunk() {
        let chunks = split_text("Community hall and rooftop pool.", 1000, 200);
        assert_eq!(chunks, vec!["Community hall and rooftop pool.".to_string()]);
    }

    #[test]
    fn test_empty_text() {
        assert!(split_text("   \n\n ", 1000, 200).is_empty());
    }

    #[test]
    fn test_chunks_respect_size() {
        let text = words(600);
        let chunks = split_text(&text, 1000, 200);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 1000, "chunk too long: {}", chunk.len());
        }
    }

    #[test]
    fn test_consecutive_chunks_overlap() {
        let text = words(600);
        let chunks = split_text(&text, 1000, 200);
        for pair in chunks.windows(2) {
            let first_word_of_next = pair[1].split(' ').next().unwrap();
            assert!(pair[0].contains(first_word_of_next));
        }
    }

    #[test]
    fn test_paragraphs_preferred() {
        let text = format!("{}\n\n{}", "a".repeat(30), "b".repeat(30));
        let chunks = split_text(&text, 40, 0);
        assert_eq!(chunks, vec!["a".repeat(30), "b".repeat(30)]);
    }

    #[test]
    fn test_unbroken_text_falls_back_to_characters() {
        let text = "x".repeat(25);
        let chunks = split_text(&text, 10, 2);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert!(chunks.len() >= 3);
    }
}
