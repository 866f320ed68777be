//! Paragraph-aware text chunking
//!
//! Paragraphs are packed into chunks up to a target size. Paragraphs that are
//! too large on their own are split on sentence boundaries, and sentences that
//! are still too large are split on whitespace. Each chunk after the first
//! starts with the word-aligned tail of the previous one.

/// Chunking parameters, in characters
#[derive(Debug, Clone, Copy)]
pub struct ChunkConfig {
    /// Target chunk size
    pub target_chars: usize,
    /// Tail of the previous chunk carried into the next
    pub overlap_chars: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            target_chars: 1024,
            overlap_chars: 128,
        }
    }
}

/// Splits documents into overlapping chunks
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    config: ChunkConfig,
}

impl Chunker {
    /// Create a chunker
    ///
    /// A zero target is bumped to one character and the overlap is clamped
    /// below the target.
    #[must_use]
    pub fn new(config: ChunkConfig) -> Self {
        let target_chars = config.target_chars.max(1);
        Self {
            config: ChunkConfig {
                target_chars,
                overlap_chars: config.overlap_chars.min(target_chars - 1),
            },
        }
    }

    /// Split a document into chunks
    #[must_use]
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let target = self.config.target_chars;

        let mut pieces: Vec<String> = Vec::new();
        for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
            if char_len(para) <= target {
                pieces.push(para.to_string());
            } else {
                pieces.extend(split_long(para, target));
            }
        }

        let mut chunks = Vec::new();
        let mut current = String::new();

        for piece in pieces {
            if !current.is_empty() && char_len(&current) + 2 + char_len(&piece) > target {
                let tail = overlap_tail(&current, self.config.overlap_chars);
                chunks.push(std::mem::take(&mut current));
                current = tail;
            }
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(&piece);
        }

        if !current.trim().is_empty() {
            chunks.push(current);
        }

        chunks
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split an oversized paragraph into sentence groups no larger than `target`
fn split_long(para: &str, target: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();

    for sentence in split_sentences(para) {
        let parts = if char_len(sentence) > target {
            hard_split(sentence, target)
        } else {
            vec![sentence.to_string()]
        };

        for part in parts {
            if !current.is_empty() && char_len(&current) + 1 + char_len(&part) > target {
                out.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&part);
        }
    }

    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Split on `.`, `?` or `!` followed by whitespace, keeping the terminator
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if !matches!(c, '.' | '?' | '!') {
            continue;
        }
        if let Some(&(next_i, next_c)) = chars.peek()
            && next_c.is_whitespace()
        {
            let sentence = text[start..next_i].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = next_i;
        }
    }

    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

/// Split a run of text into pieces of at most `target` characters,
/// preferring whitespace boundaries
fn hard_split(text: &str, target: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let word_len = char_len(word);
        if word_len > target {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            let chars: Vec<char> = word.chars().collect();
            for piece in chars.chunks(target) {
                out.push(piece.iter().collect());
            }
            continue;
        }
        if !current.is_empty() && char_len(&current) + 1 + word_len > target {
            out.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }

    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Word-aligned tail of `text` of at most `overlap` characters
///
/// Empty when the text is no longer than the overlap, since carrying it whole
/// would duplicate the entire chunk.
fn overlap_tail(text: &str, overlap: usize) -> String {
    let count = char_len(text);
    if overlap == 0 || count <= overlap {
        return String::new();
    }

    let start = text
        .char_indices()
        .nth(count - overlap)
        .map_or(0, |(i, _)| i);
    let tail = &text[start..];

    match tail.find(char::is_whitespace) {
        Some(ws) => tail[ws..].trim_start().to_string(),
        None => tail.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(target: usize, overlap: usize) -> Chunker {
        Chunker::new(ChunkConfig {
            target_chars: target,
            overlap_chars: overlap,
        })
    }

    #[test]
    fn short_document_is_single_chunk() {
        let chunks = chunker(200, 20).chunk("Hello world.\n\nSecond paragraph.");
        assert_eq!(chunks, vec!["Hello world.\n\nSecond paragraph.".to_string()]);
    }

    #[test]
    fn empty_document_has_no_chunks() {
        assert!(chunker(200, 20).chunk("  \n\n \n").is_empty());
    }

    #[test]
    fn paragraphs_are_packed_up_to_target() {
        let para = "word ".repeat(10).trim().to_string(); // 49 chars
        let text = vec![para.clone(); 4].join("\n\n");
        let chunks = chunker(110, 0).chunk(&text);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], format!("{para}\n\n{para}"));
    }

    #[test]
    fn chunks_respect_size_bound() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(100);
        let target = 120;
        let overlap = 30;
        for chunk in chunker(target, overlap).chunk(&text) {
            assert!(char_len(&chunk) <= target + overlap + 2, "chunk too long: {}", chunk.len());
        }
    }

    #[test]
    fn consecutive_chunks_overlap() {
        let text = (0..40)
            .map(|i| format!("Sentence number {i} is here."))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunker(100, 30).chunk(&text);
        assert!(chunks.len() > 2);
        for pair in chunks.windows(2) {
            let tail = overlap_tail(&pair[0], 30);
            assert!(!tail.is_empty());
            assert!(pair[1].starts_with(&tail));
        }
    }

    #[test]
    fn oversized_word_is_hard_split() {
        let text = "x".repeat(25);
        let chunks = chunker(10, 0).chunk(&text);
        assert_eq!(chunks, vec!["x".repeat(10), "x".repeat(10), "x".repeat(5)]);
    }

    #[test]
    fn multibyte_text_does_not_panic() {
        let text = "こんにちは世界。 ".repeat(200);
        let chunks = chunker(50, 10).chunk(&text);
        assert!(!chunks.is_empty());
    }

    #[test]
    fn sentence_split_keeps_terminators() {
        let sentences = split_sentences("One. Two? Three! Four");
        assert_eq!(sentences, vec!["One.", "Two?", "Three!", "Four"]);
    }

    #[test]
    fn overlap_clamped_below_target() {
        let c = chunker(10, 50);
        assert_eq!(c.config.overlap_chars, 9);
    }
}
