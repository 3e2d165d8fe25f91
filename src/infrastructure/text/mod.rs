//! Text helpers shared by lexical scoring and offline embeddings

use unicode_segmentation::UnicodeSegmentation;

/// Lowercased Unicode words; CJK ideographs come out one per token
pub fn tokenize(text: &str) -> Vec<String> {
    text.unicode_words().map(|w| w.to_lowercase()).collect()
}

/// Truncates to at most `max_chars` characters on a char boundary
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Splits text into sentences on ASCII and CJK terminators, keeping the terminator
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        current.push(c);
        if matches!(c, '.' | '!' | '?' | '。' | '！' | '？' | '\n') {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }

    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_mixed_scripts() {
        assert_eq!(tokenize("什么是RAG"), vec!["什", "么", "是", "rag"]);
        assert_eq!(tokenize("Hello, World!"), vec!["hello", "world"]);
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("检索增强生成", 2), "检索");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn test_split_sentences() {
        let sentences = split_sentences("RAG 检索文档。然后生成答案！Done. tail");
        assert_eq!(sentences, vec!["RAG 检索文档。", "然后生成答案！", "Done.", "tail"]);
    }
}
