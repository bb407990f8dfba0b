//! Boundary-aware splitting on top of `text-splitter`
//!
//! `TextSplitter` picks the coarsest semantic level (line breaks, sentences,
//! words, graphemes) whose sections fit the budget and packs neighbouring
//! sections greedily. Trimming is disabled so the chunks keep their
//! separators and the spans tile the input exactly.

use super::{ChunkError, TokenCounter};
use std::cell::RefCell;
use text_splitter::{ChunkConfig, ChunkSizer, TextSplitter};

/// A byte range of the source text and its token count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub tokens: usize,
}

/// Tokens `text` occupies inside a model input, special tokens excluded
pub(crate) fn content_tokens(counter: &dyn TokenCounter, text: &str) -> Result<usize, ChunkError> {
    Ok(counter
        .count_tokens(text)?
        .saturating_sub(counter.special_tokens()))
}

/// Sizes chunks with a `TokenCounter`
///
/// `ChunkSizer` cannot fail, so the first tokenizer error is parked in
/// `failure` and the section is sized as empty.
struct CounterSizer<'a> {
    counter: &'a dyn TokenCounter,
    failure: &'a RefCell<Option<ChunkError>>,
}

impl ChunkSizer for CounterSizer<'_> {
    fn size(&self, chunk: &str) -> usize {
        match content_tokens(self.counter, chunk) {
            Ok(tokens) => tokens,
            Err(e) => {
                self.failure.borrow_mut().get_or_insert(e);
                0
            }
        }
    }
}

/// Split `text` into spans of at most `budget` tokens
///
/// Spans are contiguous, in order and cover all of `text`. A span never
/// consists of whitespace alone: such a piece is folded into a neighbour.
/// Empty and whitespace-only input produce no spans.
pub fn split(text: &str, budget: usize, counter: &dyn TokenCounter) -> Result<Vec<Span>, ChunkError> {
    if budget == 0 {
        return Err(ChunkError::InvalidChunkSize);
    }
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let failure = RefCell::new(None);
    let sizer = CounterSizer {
        counter,
        failure: &failure,
    };
    let splitter = TextSplitter::new(ChunkConfig::new(budget).with_sizer(sizer).with_trim(false));

    // Each chunk runs to the start of the next one so the spans tile the text
    let mut starts: Vec<usize> = splitter.chunk_indices(text).map(|(offset, _)| offset).collect();
    drop(splitter);
    if let Some(e) = failure.into_inner() {
        return Err(e);
    }
    if starts.first() != Some(&0) {
        starts.insert(0, 0);
    }
    starts.dedup();

    let mut spans = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(text.len());
        spans.push(Span {
            start,
            end,
            tokens: content_tokens(counter, &text[start..end])?,
        });
    }

    let spans = fold_blank_spans(text, spans, budget, counter)?;

    if let Some(span) = spans.iter().find(|s| s.tokens > budget) {
        return Err(ChunkError::Unsplittable {
            text: text[span.start..span.end].to_string(),
            budget,
        });
    }
    Ok(spans)
}

fn is_blank(text: &str, span: &Span) -> bool {
    span.tokens == 0 || text[span.start..span.end].trim().is_empty()
}

/// Merge blank spans into the following span, or the preceding one at the end
fn fold_blank_spans(
    text: &str,
    spans: Vec<Span>,
    budget: usize,
    counter: &dyn TokenCounter,
) -> Result<Vec<Span>, ChunkError> {
    let mut out: Vec<Span> = Vec::with_capacity(spans.len());
    let mut carry: Option<usize> = None;

    for span in spans {
        let start = carry.take().unwrap_or(span.start);
        let merged = if start == span.start {
            span
        } else {
            Span {
                start,
                end: span.end,
                tokens: content_tokens(counter, &text[start..span.end])?,
            }
        };

        if is_blank(text, &merged) {
            carry = Some(merged.start);
        } else if merged.tokens > budget && merged.start != span.start {
            // Folding forward would overflow; the blank piece goes back
            match out.last_mut() {
                Some(previous) => {
                    previous.end = span.start;
                    previous.tokens = content_tokens(counter, &text[previous.start..previous.end])?;
                }
                None => out.push(Span {
                    start: merged.start,
                    end: span.start,
                    tokens: 0,
                }),
            }
            out.push(span);
        } else {
            out.push(merged);
        }
    }

    if let Some(start) = carry {
        match out.last_mut() {
            Some(previous) => {
                previous.end = text.len();
                previous.tokens = content_tokens(counter, &text[previous.start..previous.end])?;
            }
            None => out.push(Span {
                start,
                end: text.len(),
                tokens: content_tokens(counter, &text[start..])?,
            }),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One token per whitespace-separated word
    struct Words;

    impl TokenCounter for Words {
        fn count_tokens(&self, text: &str) -> Result<usize, ChunkError> {
            Ok(text.split_whitespace().count())
        }
    }

    /// One token per non-whitespace character
    struct Chars;

    impl TokenCounter for Chars {
        fn count_tokens(&self, text: &str) -> Result<usize, ChunkError> {
            Ok(text.chars().filter(|c| !c.is_whitespace()).count())
        }
    }

    /// Words plus a leading and trailing marker on every input
    struct Marked;

    impl TokenCounter for Marked {
        fn count_tokens(&self, text: &str) -> Result<usize, ChunkError> {
            Ok(text.split_whitespace().count() + 2)
        }

        fn special_tokens(&self) -> usize {
            2
        }
    }

    fn texts<'a>(text: &'a str, spans: &[Span]) -> Vec<&'a str> {
        spans.iter().map(|s| &text[s.start..s.end]).collect()
    }

    fn assert_tiles(text: &str, spans: &[Span]) {
        let mut pos = 0;
        for span in spans {
            assert_eq!(span.start, pos, "gap or overlap at {}", pos);
            pos = span.end;
        }
        assert_eq!(pos, text.len());
    }

    fn assert_no_blank(text: &str, spans: &[Span]) {
        for span in spans {
            let piece = &text[span.start..span.end];
            assert!(!piece.trim().is_empty(), "blank span {:?}", piece);
            assert!(span.tokens > 0);
        }
    }

    #[test]
    fn test_fits_in_one_span() {
        let text = "A short provision.";
        let spans = split(text, 10, &Words).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(texts(text, &spans), vec![text]);
        assert_eq!(spans[0].tokens, 3);
    }

    #[test]
    fn test_empty_and_blank() {
        assert!(split("", 5, &Words).unwrap().is_empty());
        assert!(split("  \n\t ", 5, &Words).unwrap().is_empty());
    }

    #[test]
    fn test_zero_budget() {
        assert!(matches!(
            split("text", 0, &Words),
            Err(ChunkError::InvalidChunkSize)
        ));
    }

    #[test]
    fn test_prefers_paragraph_boundaries() {
        let text = "one two three\nfour\n\nfive six seven\neight";
        let spans = split(text, 5, &Words).unwrap();
        assert_eq!(spans.len(), 2);
        assert_tiles(text, &spans);
        assert!(texts(text, &spans)[0].trim_end().ends_with("four"));
        assert!(texts(text, &spans)[1].trim_start().starts_with("five"));
    }

    #[test]
    fn test_packs_words_greedily() {
        let text = "alpha beta gamma delta epsilon";
        let spans = split(text, 2, &Words).unwrap();
        assert_eq!(spans.len(), 3);
        assert_tiles(text, &spans);
        assert_eq!(
            spans.iter().map(|s| s.tokens).collect::<Vec<_>>(),
            vec![2, 2, 1]
        );
    }

    #[test]
    fn test_multibyte_characters_are_not_cut() {
        let text = "ééééé";
        let spans = split(text, 2, &Chars).unwrap();
        assert_tiles(text, &spans);
        assert!(spans.iter().all(|s| s.tokens <= 2));
        assert_eq!(spans.len(), 3);
    }

    #[test]
    fn test_unsplittable_character() {
        struct Heavy;
        impl TokenCounter for Heavy {
            fn count_tokens(&self, text: &str) -> Result<usize, ChunkError> {
                Ok(text.chars().count() * 3)
            }
        }

        let result = split("ab", 2, &Heavy);
        assert!(matches!(result, Err(ChunkError::Unsplittable { .. })));
    }

    #[test]
    fn test_tokenizer_error_is_reported() {
        struct Broken;
        impl TokenCounter for Broken {
            fn count_tokens(&self, _text: &str) -> Result<usize, ChunkError> {
                Err(ChunkError::Tokenizer("boom".to_string()))
            }
        }

        let result = split("some text", 4, &Broken);
        assert!(matches!(result, Err(ChunkError::Tokenizer(_))));
    }

    #[test]
    fn test_leading_blank_lines_are_not_a_chunk() {
        let text = "\n\n\n\nalpha beta gamma";
        let spans = split(text, 2, &Words).unwrap();
        assert_tiles(text, &spans);
        assert_no_blank(text, &spans);
        assert_eq!(spans[0].start, 0);
        assert!(spans.iter().all(|s| s.tokens <= 2));
    }

    #[test]
    fn test_trailing_blank_lines_join_the_last_chunk() {
        let text = "alpha beta\n\ngamma delta\n\n\n\n";
        let spans = split(text, 2, &Words).unwrap();
        assert_tiles(text, &spans);
        assert_no_blank(text, &spans);
        assert_eq!(spans.last().unwrap().end, text.len());
    }

    #[test]
    fn test_fold_blank_spans() {
        let text = "\n\nab cd\n\n";
        let spans = vec![
            Span { start: 0, end: 2, tokens: 0 },
            Span { start: 2, end: 7, tokens: 2 },
            Span { start: 7, end: 9, tokens: 0 },
        ];
        let folded = fold_blank_spans(text, spans, 2, &Words).unwrap();
        assert_eq!(folded, vec![Span { start: 0, end: 9, tokens: 2 }]);
    }

    #[test]
    fn test_special_tokens_are_not_part_of_the_budget() {
        let text = "alpha beta gamma delta";
        let spans = split(text, 2, &Marked).unwrap();
        assert_eq!(spans.len(), 2);
        assert!(spans.iter().all(|s| s.tokens == 2));
    }

    #[test]
    fn test_tiles_and_respects_budget() {
        let paragraph = "Section 4. The Minister may, by legislative instrument, \
                         make rules; those rules must be tabled. See also s 5!\n";
        let text = format!("\n{}\n{}\n\n{}\n\n", paragraph, paragraph.repeat(3), paragraph);

        for budget in [1, 2, 3, 5, 8, 13, 40, 1000] {
            let spans = split(&text, budget, &Words).unwrap();
            assert_tiles(&text, &spans);
            assert_no_blank(&text, &spans);
            for span in &spans {
                assert!(span.tokens <= budget);
                assert_eq!(
                    span.tokens,
                    Words.count_tokens(&text[span.start..span.end]).unwrap()
                );
            }
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "a b c. d e f; g h\n\ni j k l m n o p";
        let first = split(text, 3, &Words).unwrap();
        let second = split(text, 3, &Words).unwrap();
        assert_eq!(first, second);
    }
}
