use crate::models::RetrievalOptions;

/// Sentence delimiters, in the order a cut point is searched for.
const SENTENCE_BREAKS: [&str; 4] = [". ", "! ", "? ", "\n"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap: 50,
        }
    }
}

impl From<&RetrievalOptions> for ChunkingConfig {
    fn from(value: &RetrievalOptions) -> Self {
        Self {
            chunk_size: value.chunk_size,
            overlap: value.chunk_overlap,
        }
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Splits `text` into overlapping windows of at most `chunk_size` characters,
/// preferring to cut right after a sentence delimiter.
///
/// Lengths and offsets are counted in characters, not bytes.
pub fn split_text(text: &str, config: ChunkingConfig) -> Vec<String> {
    let normalized = normalize_whitespace(text);
    let chars: Vec<char> = normalized.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }

    let chunk_size = config.chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    loop {
        let mut end = (start + chunk_size).min(chars.len());
        let reaches_end = end == chars.len();

        if !reaches_end {
            if let Some(cut) = sentence_cut(&chars, start + config.overlap, end) {
                end = cut;
            }
        }

        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }

        if reaches_end {
            break;
        }

        // overlap >= window width: drop the overlap rather than stall
        let next = end.saturating_sub(config.overlap);
        start = if next > start { next } else { end };
    }

    chunks
}

/// Position just past the last delimiter that lies fully inside
/// `chars[floor..end]` and begins after `floor`.
///
/// `floor` is the window start plus the overlap, so a cut always leaves the
/// next window starting further along.
fn sentence_cut(chars: &[char], floor: usize, end: usize) -> Option<usize> {
    for delimiter in SENTENCE_BREAKS {
        let pattern: Vec<char> = delimiter.chars().collect();
        if end < floor + pattern.len() {
            continue;
        }

        let last = (floor..=end - pattern.len())
            .rev()
            .find(|&position| chars[position..position + pattern.len()] == pattern[..]);

        if let Some(position) = last.filter(|&position| position > floor) {
            return Some(position + 1);
        }
    }
    None
}
