#![forbid(unsafe_code)]

//! Title tokenization used by the search index. Titles in this archive mix
//! Japanese and Latin script, so the segmenter is a swappable capability:
//! the same implementation must run at index time and at query time or
//! token matches silently stop lining up.

/// Splits free text into search tokens.
pub trait Tokenizer: Send + Sync {
    fn segment(&self, text: &str) -> Vec<String>;

    /// Space-joined token form stored alongside the raw title.
    fn tokenize_title(&self, title: &str) -> String {
        self.segment(title).join(" ")
    }
}

/// Dictionary-free segmenter: ASCII alphanumeric runs become lowercase
/// words, every CJK codepoint becomes its own token, everything else
/// separates. Coarser than a morphological analyzer but stable, which is
/// what the index/query symmetry needs.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTokenizer;

impl Tokenizer for DefaultTokenizer {
    fn segment(&self, text: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        let mut word = String::new();
        for ch in text.chars() {
            if ch.is_ascii_alphanumeric() {
                word.push(ch.to_ascii_lowercase());
                continue;
            }
            if !word.is_empty() {
                tokens.push(std::mem::take(&mut word));
            }
            if is_cjk(ch) {
                tokens.push(ch.to_string());
            } else if ch.is_alphabetic() {
                // Non-ASCII alphabetics (accented Latin, Cyrillic) form
                // their own runs.
                word.push(ch);
            }
        }
        if !word.is_empty() {
            tokens.push(word);
        }
        tokens
    }
}

fn is_cjk(ch: char) -> bool {
    matches!(ch,
        '\u{3040}'..='\u{309F}'   // hiragana
        | '\u{30A0}'..='\u{30FF}' // katakana
        | '\u{3400}'..='\u{4DBF}' // CJK extension A
        | '\u{4E00}'..='\u{9FFF}' // CJK unified ideographs
        | '\u{FF66}'..='\u{FF9D}' // halfwidth katakana
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_runs_are_lowercased_words() {
        let tokens = DefaultTokenizer.segment("Karaoke Stream #12 (Archive)");
        assert_eq!(tokens, vec!["karaoke", "stream", "12", "archive"]);
    }

    #[test]
    fn cjk_codepoints_are_single_tokens() {
        let tokens = DefaultTokenizer.segment("歌枠LIVE");
        assert_eq!(tokens, vec!["歌", "枠", "live"]);
    }

    #[test]
    fn kana_splits_per_character() {
        let tokens = DefaultTokenizer.segment("おはよう配信");
        assert_eq!(tokens, vec!["お", "は", "よ", "う", "配", "信"]);
    }

    #[test]
    fn tokenize_title_joins_with_spaces() {
        assert_eq!(
            DefaultTokenizer.tokenize_title("Minecraft 建築"),
            "minecraft 建 築"
        );
    }

    #[test]
    fn empty_and_punctuation_only_yield_nothing() {
        assert!(DefaultTokenizer.segment("").is_empty());
        assert!(DefaultTokenizer.segment("!!【】…").is_empty());
    }
}
