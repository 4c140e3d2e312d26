//! # Sentence Chunking
//!
//! Long transcripts are translated in pieces. Pieces are built from whole
//! sentences, so a translation engine never sees half a sentence, and the
//! whitespace between pieces is kept so the joined translation reads like the
//! original.
//!
//! ## Rules:
//! - Text of at most `max_chars` characters is one chunk
//! - Otherwise sentences are packed greedily, in order, into chunks of at most `max_chars`
//! - A single sentence longer than `max_chars` becomes a chunk of its own
//! - Lengths are counted in characters, not bytes

/// One sentence and the whitespace that followed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sentence<'a> {
    pub text: &'a str,
    pub separator: &'a str,
}

/// A run of whole sentences to translate together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    /// Whitespace to re-insert after this chunk's translation
    pub separator: String,
}

impl Chunk {
    fn from_sentence(sentence: &Sentence<'_>) -> Self {
        Self {
            text: sentence.text.to_string(),
            separator: sentence.separator.to_string(),
        }
    }

    fn len_with(&self, sentence: &Sentence<'_>) -> usize {
        self.text.chars().count()
            + self.separator.chars().count()
            + sentence.text.chars().count()
    }

    fn push(&mut self, sentence: &Sentence<'_>) {
        self.text.push_str(&self.separator);
        self.text.push_str(sentence.text);
        self.separator = sentence.separator.to_string();
    }
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '…')
}

fn is_closer(c: char) -> bool {
    matches!(c, '"' | '\'' | ')' | ']' | '»' | '”' | '’')
}

/// Split text after sentence terminators that are followed by whitespace or the end.
pub fn split_sentences(text: &str) -> Vec<Sentence<'_>> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let byte_at = |i: usize| chars.get(i).map_or(text.len(), |&(offset, _)| offset);

    let mut sentences = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < chars.len() {
        if !is_terminator(chars[i].1) {
            i += 1;
            continue;
        }

        let mut end = i + 1;
        while end < chars.len() && is_terminator(chars[end].1) {
            end += 1;
        }
        while end < chars.len() && is_closer(chars[end].1) {
            end += 1;
        }

        if end < chars.len() && !chars[end].1.is_whitespace() {
            i = end;
            continue;
        }

        let mut next = end;
        while next < chars.len() && chars[next].1.is_whitespace() {
            next += 1;
        }

        sentences.push(Sentence {
            text: &text[start..byte_at(end)],
            separator: &text[byte_at(end)..byte_at(next)],
        });
        start = byte_at(next);
        i = next;
    }

    let rest = &text[start..];
    let body = rest.trim_end();
    if !body.is_empty() {
        sentences.push(Sentence {
            text: body,
            separator: &rest[body.len()..],
        });
    }

    sentences
}

/// Group `text` into chunks of whole sentences, each at most `max_chars` long.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<Chunk> {
    if text.chars().count() <= max_chars {
        return vec![Chunk {
            text: text.to_string(),
            separator: String::new(),
        }];
    }

    let mut chunks = Vec::new();
    let mut current: Option<Chunk> = None;

    for sentence in split_sentences(text) {
        match current.as_mut() {
            Some(chunk) if chunk.len_with(&sentence) <= max_chars => chunk.push(&sentence),
            _ => {
                if let Some(done) = current.replace(Chunk::from_sentence(&sentence)) {
                    chunks.push(done);
                }
            }
        }
    }

    if let Some(done) = current {
        chunks.push(done);
    }

    chunks
}
