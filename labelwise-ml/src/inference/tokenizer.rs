//! Tokenization with character offsets.
//!
//! Offsets are counted in Unicode scalar values (chars), not bytes, so spans
//! line up with `len(text)` as seen by downstream JSON consumers.

use std::collections::HashMap;

pub const PAD_TOKEN: &str = "[PAD]";
pub const UNK_TOKEN: &str = "[UNK]";
pub const CLS_TOKEN: &str = "[CLS]";
pub const SEP_TOKEN: &str = "[SEP]";
pub const MASK_TOKEN: &str = "[MASK]";

/// Special tokens occupy ids `0..SPECIAL_TOKENS.len()` in this order.
pub const SPECIAL_TOKENS: [&str; 5] = [PAD_TOKEN, UNK_TOKEN, CLS_TOKEN, SEP_TOKEN, MASK_TOKEN];

/// One token with its half-open character range in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub id: u32,
    pub text: String,
    pub start: usize,
    pub end: usize,
    /// Specials (`[CLS]`, `[SEP]`, padding) never become evidence.
    pub special: bool,
}

/// Tokenized input.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Encoding {
    pub tokens: Vec<Token>,
}

impl Encoding {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn ids(&self) -> Vec<u32> {
        self.tokens.iter().map(|t| t.id).collect()
    }

    /// Every token except padding attends.
    pub fn attention_mask(&self) -> Vec<bool> {
        self.tokens
            .iter()
            .map(|t| !(t.special && t.text == PAD_TOKEN))
            .collect()
    }

    /// Indices of non-special tokens overlapping `[start, end)`.
    pub fn tokens_in_range(&self, start: usize, end: usize) -> Vec<usize> {
        self.tokens
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.special && t.start < end && t.end > start)
            .map(|(i, _)| i)
            .collect()
    }

    /// Copy of this encoding with the given token positions replaced by `mask_id`.
    pub fn with_masked(&self, indices: &[usize], mask_id: u32) -> Encoding {
        let mut masked = self.clone();
        for &i in indices {
            if let Some(token) = masked.tokens.get_mut(i) {
                token.id = mask_id;
                token.text = MASK_TOKEN.to_string();
            }
        }
        masked
    }
}

/// Tokenizer collaborator.
pub trait Tokenizer: Send + Sync {
    /// Tokenize `text`, truncating to the tokenizer's maximum length.
    fn encode(&self, text: &str) -> Encoding;

    /// Neutral replacement id used by deletion tests.
    fn mask_token_id(&self) -> u32;

    /// Padding id, used as the integrated-gradients baseline.
    fn pad_token_id(&self) -> u32;
}

/// Lowercasing word/punctuation tokenizer over a fixed vocabulary.
///
/// Words are maximal runs of alphanumeric characters (plus `'`); every other
/// non-whitespace character is its own token. Unknown words map to `[UNK]`.
#[derive(Debug, Clone)]
pub struct WordTokenizer {
    vocab: HashMap<String, u32>,
    max_len: usize,
}

impl WordTokenizer {
    /// Build from the non-special vocabulary; ids start after the specials.
    pub fn new(words: impl IntoIterator<Item = String>, max_len: usize) -> Self {
        let mut vocab: HashMap<String, u32> = SPECIAL_TOKENS
            .iter()
            .enumerate()
            .map(|(i, t)| (t.to_string(), i as u32))
            .collect();
        for word in words {
            let next = vocab.len() as u32;
            vocab.entry(word.to_lowercase()).or_insert(next);
        }
        Self {
            vocab,
            max_len: max_len.max(2),
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    pub fn token_id(&self, token: &str) -> u32 {
        self.vocab
            .get(&token.to_lowercase())
            .copied()
            .unwrap_or(1)
    }

    fn special(&self, name: &str) -> Token {
        Token {
            id: self.vocab[name],
            text: name.to_string(),
            start: 0,
            end: 0,
            special: true,
        }
    }
}

impl Tokenizer for WordTokenizer {
    fn encode(&self, text: &str) -> Encoding {
        let budget = self.max_len - 2;
        let mut tokens = vec![self.special(CLS_TOKEN)];

        let mut word = String::new();
        let mut word_start = 0;
        let flush = |word: &mut String, start: usize, end: usize, tokens: &mut Vec<Token>| {
            if !word.is_empty() {
                tokens.push(Token {
                    id: self.token_id(word),
                    text: std::mem::take(word),
                    start,
                    end,
                    special: false,
                });
            }
        };

        let mut char_count = 0;
        for (pos, ch) in text.chars().enumerate() {
            char_count = pos + 1;
            if ch.is_alphanumeric() || ch == '\'' {
                if word.is_empty() {
                    word_start = pos;
                }
                word.push(ch);
                continue;
            }
            flush(&mut word, word_start, pos, &mut tokens);
            if !ch.is_whitespace() {
                tokens.push(Token {
                    id: self.token_id(&ch.to_string()),
                    text: ch.to_string(),
                    start: pos,
                    end: pos + 1,
                    special: false,
                });
            }
        }
        flush(&mut word, word_start, char_count, &mut tokens);

        tokens.truncate(budget + 1);
        tokens.push(self.special(SEP_TOKEN));
        Encoding::new(tokens)
    }

    fn mask_token_id(&self) -> u32 {
        self.vocab[MASK_TOKEN]
    }

    fn pad_token_id(&self) -> u32 {
        self.vocab[PAD_TOKEN]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenizer() -> WordTokenizer {
        WordTokenizer::new(["hello".to_string(), "world".to_string()], 512)
    }

    #[test]
    fn test_offsets_are_char_based() {
        let enc = tokenizer().encode("héllo world!");
        let words: Vec<_> = enc.tokens.iter().filter(|t| !t.special).collect();
        assert_eq!(words.len(), 3);
        assert_eq!((words[0].start, words[0].end), (0, 5));
        assert_eq!((words[1].start, words[1].end), (6, 11));
        assert_eq!((words[2].start, words[2].end), (11, 12));
    }

    #[test]
    fn test_specials_wrap_sequence() {
        let enc = tokenizer().encode("hello");
        assert_eq!(enc.tokens.first().unwrap().text, CLS_TOKEN);
        assert_eq!(enc.tokens.last().unwrap().text, SEP_TOKEN);
        assert!(enc.tokens[0].special);
        assert_eq!(enc.tokens[1].id, tokenizer().token_id("hello"));
    }

    #[test]
    fn test_unknown_words_map_to_unk() {
        let enc = tokenizer().encode("zebra");
        assert_eq!(enc.tokens[1].id, 1);
    }

    #[test]
    fn test_truncation_keeps_sep() {
        let tok = WordTokenizer::new(Vec::<String>::new(), 4);
        let enc = tok.encode("a b c d e f");
        assert_eq!(enc.len(), 4);
        assert_eq!(enc.tokens.last().unwrap().text, SEP_TOKEN);
    }

    #[test]
    fn test_empty_text() {
        let enc = tokenizer().encode("");
        assert_eq!(enc.len(), 2);
        assert!(enc.tokens.iter().all(|t| t.special));
    }

    #[test]
    fn test_masking_and_range_lookup() {
        let tok = tokenizer();
        let enc = tok.encode("hello world");
        let covered = enc.tokens_in_range(0, 5);
        assert_eq!(covered, vec![1]);
        let masked = enc.with_masked(&covered, tok.mask_token_id());
        assert_eq!(masked.tokens[1].id, tok.mask_token_id());
        assert_eq!(masked.tokens[2], enc.tokens[2]);
    }
}
