use serde::{Deserialize, Serialize};

/// Window sizes are counted in chars so multi-byte scripts never split
/// inside a code point.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chars: 1200,
            overlap_chars: 150,
        }
    }
}

pub struct TextChunker {
    config: ChunkConfig,
}

impl TextChunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    /// Splits `text` into overlapping fixed-size windows.
    pub fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return Vec::new();
        }
        let window = self.config.max_chars.max(1);
        let overlap = self.config.overlap_chars.min(window.saturating_sub(1));
        let step = window - overlap;
        let mut start = 0usize;
        let mut windows = Vec::new();
        while start < chars.len() {
            let end = (start + window).min(chars.len());
            windows.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += step;
        }
        windows
    }
}
