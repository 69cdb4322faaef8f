//! 纯文本文档切块

use async_trait::async_trait;

use super::{DocumentPipeline, GenerationError};

/// 文档最大字符数
pub const DEFAULT_MAX_DOCUMENT_CHARS: usize = 500_000;
/// 单个文本块的目标字符数
pub const DEFAULT_CHUNK_CHARS: usize = 4_000;

/// UTF-8 文本切块：按段落（空行）聚合，超长段落按字符硬切
#[derive(Debug, Clone)]
pub struct PlainTextPipeline {
    max_document_chars: usize,
    chunk_chars: usize,
}

impl Default for PlainTextPipeline {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DOCUMENT_CHARS, DEFAULT_CHUNK_CHARS)
    }
}

impl PlainTextPipeline {
    pub fn new(max_document_chars: usize, chunk_chars: usize) -> Self {
        Self {
            max_document_chars,
            chunk_chars: chunk_chars.max(1),
        }
    }

    pub fn chunk_text(&self, text: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current = String::new();

        for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
            let paragraph_chars = paragraph.chars().count();
            if paragraph_chars > self.chunk_chars {
                if !current.is_empty() {
                    chunks.push(std::mem::take(&mut current));
                }
                let chars: Vec<char> = paragraph.chars().collect();
                chunks.extend(chars.chunks(self.chunk_chars).map(|c| c.iter().collect::<String>()));
                continue;
            }

            let current_chars = current.chars().count();
            if !current.is_empty() && current_chars + 2 + paragraph_chars > self.chunk_chars {
                chunks.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(paragraph);
        }

        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }
}

#[async_trait]
impl DocumentPipeline for PlainTextPipeline {
    async fn extract_chunks(&self, filename: &str, bytes: &[u8]) -> Result<Vec<String>, GenerationError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| GenerationError::InvalidDocument(format!("{} is not valid UTF-8 text", filename)))?;
        let text = text.replace("\r\n", "\n");

        let chars = text.chars().count();
        if chars > self.max_document_chars {
            return Err(GenerationError::DocumentTooLarge {
                chars,
                max: self.max_document_chars,
            });
        }

        let chunks = self.chunk_text(&text);
        if chunks.is_empty() {
            return Err(GenerationError::EmptyDocument);
        }
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paragraphs_are_grouped() {
        let pipeline = PlainTextPipeline::new(1_000, 12);
        let chunks = pipeline.chunk_text("aaaa\n\nbbbb\n\ncccc\n\n\n\n");
        assert_eq!(chunks, vec!["aaaa\n\nbbbb".to_string(), "cccc".to_string()]);
    }

    #[test]
    fn test_long_paragraph_is_split() {
        let pipeline = PlainTextPipeline::new(1_000, 4);
        let chunks = pipeline.chunk_text("abcdefghij");
        assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
    }

    #[tokio::test]
    async fn test_rejects_invalid_input() {
        let pipeline = PlainTextPipeline::new(10, 4);
        assert!(matches!(
            pipeline.extract_chunks("a.txt", &[0xff, 0xfe]).await,
            Err(GenerationError::InvalidDocument(_))
        ));
        assert_eq!(
            pipeline.extract_chunks("a.txt", b"   \n\n  ").await,
            Err(GenerationError::EmptyDocument)
        );
        assert_eq!(
            pipeline.extract_chunks("a.txt", b"this is far too long").await,
            Err(GenerationError::DocumentTooLarge { chars: 20, max: 10 })
        );
    }
}
