//! Text Chunking Module
//!
//! 문서 텍스트를 최대 크기 이하, 이웃 청크와 일정 길이 이상 겹치는
//! 청크로 나눕니다. 분할 지점은 문단 > 문장 > 줄 > 단어 경계 순으로
//! 선호하며, 윈도우 안에 경계가 없을 때만 글자 단위로 자릅니다.
//!
//! 길이 단위는 바이트가 아니라 문자(char)입니다.

use super::document::{Chunk, Document};

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// 최대 청크 크기 (문자 수)
    pub max_characters: usize,
    /// 인접 청크 최소 오버랩 (문자 수), `max_characters`보다 작아야 함
    pub overlap_characters: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_characters: 1000,
            overlap_characters: 200,
        }
    }
}

// ============================================================================
// TextChunker
// ============================================================================

/// 경계 인식 텍스트 청커
#[derive(Debug, Clone)]
pub struct TextChunker {
    config: ChunkConfig,
}

impl TextChunker {
    /// 설정으로 생성
    ///
    /// 오버랩이 최대 크기 이상이면 `max_characters - 1`로 낮춥니다.
    /// (설정 단계에서 이미 검증되므로 라이브러리 직접 사용 시에만 해당)
    pub fn new(config: ChunkConfig) -> Self {
        let max_characters = config.max_characters.max(1);
        let overlap_characters = config.overlap_characters.min(max_characters - 1);
        Self {
            config: ChunkConfig {
                max_characters,
                overlap_characters,
            },
        }
    }

    /// 기본 설정(1000 / 200)으로 생성
    pub fn with_defaults() -> Self {
        Self::new(ChunkConfig::default())
    }

    pub fn config(&self) -> ChunkConfig {
        self.config
    }

    /// 텍스트를 청크 구간으로 분할하는 지연 이터레이터
    ///
    /// 같은 텍스트로 다시 호출하면 처음부터 같은 결과를 냅니다.
    /// 공백만 있는 텍스트는 빈 시퀀스입니다.
    pub fn spans<'a>(&self, text: &'a str) -> Spans<'a> {
        Spans::new(text, self.config)
    }

    /// 문서를 청크로 분할 (출처/페이지 메타데이터 상속)
    ///
    /// 공백만 있는 구간은 임베딩할 내용이 없으므로 건너뜁니다.
    pub fn chunk_document<'a>(&self, doc: &'a Document) -> impl Iterator<Item = Chunk> + 'a {
        let source = doc.source_display();
        self.spans(&doc.text)
            .filter(|span| !span.text.trim().is_empty())
            .enumerate()
            .map(move |(i, span)| Chunk {
                id: uuid::Uuid::new_v4().to_string(),
                text: span.text.to_string(),
                source: source.clone(),
                page: doc.page,
                chunk_index: i as u32,
                start: span.start,
            })
    }
}

/// 기본 청커 생성
pub fn default_chunker() -> TextChunker {
    TextChunker::with_defaults()
}

// ============================================================================
// Spans Iterator
// ============================================================================

/// 원문 내 청크 구간 (문자 오프셋, 끝은 미포함)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSpan<'a> {
    pub text: &'a str,
    pub start: usize,
    pub end: usize,
}

/// 분할 경계 우선순위
#[derive(Debug, Clone, Copy)]
enum Boundary {
    Paragraph,
    Sentence,
    Line,
    Word,
}

const BOUNDARY_PRIORITY: [Boundary; 4] = [
    Boundary::Paragraph,
    Boundary::Sentence,
    Boundary::Line,
    Boundary::Word,
];

/// 청크 구간 이터레이터 ([`TextChunker::spans`])
#[derive(Debug, Clone)]
pub struct Spans<'a> {
    text: &'a str,
    chars: Vec<char>,
    /// 문자 인덱스 -> 바이트 오프셋 (길이 = 문자 수 + 1)
    offsets: Vec<usize>,
    config: ChunkConfig,
    start: usize,
    done: bool,
}

impl<'a> Spans<'a> {
    fn new(text: &'a str, config: ChunkConfig) -> Self {
        let mut chars = Vec::with_capacity(text.len());
        let mut offsets = Vec::with_capacity(text.len() + 1);
        for (byte_idx, c) in text.char_indices() {
            chars.push(c);
            offsets.push(byte_idx);
        }
        offsets.push(text.len());

        Self {
            text,
            chars,
            offsets,
            config,
            start: 0,
            done: text.trim().is_empty(),
        }
    }

    /// 위치 `p` 직전이 해당 경계인지 (`p`는 분할 후 다음 구간의 시작)
    fn is_boundary(&self, p: usize, boundary: Boundary) -> bool {
        let c = &self.chars;
        match boundary {
            Boundary::Paragraph => p >= 2 && c[p - 1] == '\n' && c[p - 2] == '\n',
            Boundary::Sentence => {
                p >= 2 && c[p - 1].is_whitespace() && matches!(c[p - 2], '.' | '!' | '?')
            }
            Boundary::Line => p >= 1 && c[p - 1] == '\n',
            Boundary::Word => p >= 1 && c[p - 1].is_whitespace(),
        }
    }

    /// `[start, window_end)` 안에서 분할 지점 선택
    ///
    /// 다음 청크가 앞으로 나아가려면 분할 지점이 `start + overlap`보다 뒤여야 합니다.
    fn find_split(&self, start: usize, window_end: usize) -> usize {
        let min_split = start + self.config.overlap_characters + 1;

        for boundary in BOUNDARY_PRIORITY {
            if let Some(p) = (min_split..=window_end)
                .rev()
                .find(|&p| self.is_boundary(p, boundary))
            {
                return p;
            }
        }

        // 경계 없음 - 하드 컷
        window_end
    }

    /// 다음 청크 시작 위치 선택 (`split - overlap` 이하의 단어 시작 선호)
    ///
    /// 단어 시작을 찾는 범위는 오버랩 길이만큼이라 실제 오버랩은 최대 두 배입니다.
    fn next_start(&self, start: usize, split: usize) -> usize {
        let target = split - self.config.overlap_characters;
        let lower = (start + 1).max(target.saturating_sub(self.config.overlap_characters));

        (lower..=target)
            .rev()
            .find(|&q| self.chars[q - 1].is_whitespace() && !self.chars[q].is_whitespace())
            .unwrap_or(target)
    }
}

impl<'a> Iterator for Spans<'a> {
    type Item = TextSpan<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let len = self.chars.len();
        let start = self.start;
        let window_end = (start + self.config.max_characters).min(len);

        let end = if window_end == len {
            len
        } else {
            self.find_split(start, window_end)
        };

        if end == len {
            self.done = true;
        } else {
            self.start = self.next_start(start, end);
        }

        Some(TextSpan {
            text: &self.text[self.offsets[start]..self.offsets[end]],
            start,
            end,
        })
    }
}

impl std::iter::FusedIterator for Spans<'_> {}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_contract() -> String {
        let mut text = String::new();
        for section in 1..=12 {
            text.push_str(&format!("Section {}. ", section));
            for sentence in 1..=6 {
                text.push_str(&format!(
                    "The party of the {} part shall perform obligation {} in good faith. ",
                    section, sentence
                ));
            }
            text.push_str("\n\n");
        }
        text
    }

    fn check_invariants(text: &str, config: ChunkConfig) {
        let chunker = TextChunker::new(config);
        let spans: Vec<_> = chunker.spans(text).collect();
        let total = text.chars().count();

        assert!(!spans.is_empty());
        assert_eq!(spans[0].start, 0, "coverage must start at 0");
        assert_eq!(spans.last().unwrap().end, total, "coverage must reach the end");

        for span in &spans {
            assert!(span.end - span.start <= config.max_characters);
            assert_eq!(span.text.chars().count(), span.end - span.start);
        }

        for pair in spans.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            assert!(b.start > a.start, "must make progress");
            assert!(b.start <= a.end, "no gap between chunks");
            assert!(
                a.end - b.start >= config.overlap_characters,
                "overlap {} < {}",
                a.end - b.start,
                config.overlap_characters
            );
        }
    }

    #[test]
    fn test_empty_text() {
        let chunker = TextChunker::with_defaults();
        assert_eq!(chunker.spans("").count(), 0);
        assert_eq!(chunker.spans("  \n\n\t ").count(), 0);
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunker = TextChunker::with_defaults();
        let text = "The term of this agreement is 12 months.";
        let spans: Vec<_> = chunker.spans(text).collect();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, text);
    }

    #[test]
    fn test_invariants_default_config() {
        check_invariants(&sample_contract(), ChunkConfig::default());
    }

    #[test]
    fn test_invariants_small_windows() {
        let text = sample_contract();
        for (max, overlap) in [(120, 30), (80, 0), (50, 49), (300, 100)] {
            check_invariants(
                &text,
                ChunkConfig {
                    max_characters: max,
                    overlap_characters: overlap,
                },
            );
        }
    }

    #[test]
    fn test_hard_cut_without_whitespace() {
        let text = "x".repeat(2500);
        check_invariants(&text, ChunkConfig::default());

        let chunker = TextChunker::with_defaults();
        let first = chunker.spans(&text).next().unwrap();
        assert_eq!(first.end, 1000);
    }

    #[test]
    fn test_multibyte_text() {
        let text = "계약 기간은 12개월이다. 당사자는 성실히 의무를 이행한다. ".repeat(60);
        check_invariants(
            &text,
            ChunkConfig {
                max_characters: 100,
                overlap_characters: 20,
            },
        );
    }

    #[test]
    fn test_prefers_paragraph_boundary() {
        let chunker = TextChunker::new(ChunkConfig {
            max_characters: 50,
            overlap_characters: 10,
        });
        let text = "First paragraph is here.\n\nSecond paragraph goes on and on and on for a while longer.";
        let first = chunker.spans(text).next().unwrap();
        assert_eq!(first.text, "First paragraph is here.\n\n");
    }

    #[test]
    fn test_prefers_sentence_over_word() {
        let chunker = TextChunker::new(ChunkConfig {
            max_characters: 30,
            overlap_characters: 5,
        });
        let text = "One two three. Four five six seven eight nine ten eleven";
        let first = chunker.spans(text).next().unwrap();
        assert_eq!(first.text, "One two three. ");
    }

    #[test]
    fn test_does_not_split_mid_word() {
        let chunker = TextChunker::new(ChunkConfig {
            max_characters: 40,
            overlap_characters: 10,
        });
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu";
        for span in chunker.spans(text) {
            let first = span.text.split_whitespace().next().unwrap();
            assert!(text.split_whitespace().any(|w| w == first), "cut word: {:?}", first);
        }
    }

    #[test]
    fn test_restartable() {
        let chunker = TextChunker::new(ChunkConfig {
            max_characters: 100,
            overlap_characters: 20,
        });
        let text = sample_contract();

        let first: Vec<_> = chunker.spans(&text).collect();
        let second: Vec<_> = chunker.spans(&text).collect();
        assert_eq!(first, second);

        let mut iter = chunker.spans(&text);
        iter.next();
        let resumed: Vec<_> = iter.clone().collect();
        assert_eq!(resumed, first[1..].to_vec());
    }

    #[test]
    fn test_chunk_document_inherits_metadata() {
        let chunker = TextChunker::new(ChunkConfig {
            max_characters: 200,
            overlap_characters: 40,
        });
        let doc = Document::new(sample_contract(), "data/contract.pdf", Some(3));
        let chunks: Vec<_> = chunker.chunk_document(&doc).collect();

        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.source, "data/contract.pdf");
            assert_eq!(chunk.page, Some(3));
            assert_eq!(chunk.chunk_index, i as u32);
        }
        assert_ne!(chunks[0].id, chunks[1].id);
    }

    #[test]
    fn test_overlap_clamped() {
        let chunker = TextChunker::new(ChunkConfig {
            max_characters: 10,
            overlap_characters: 50,
        });
        assert_eq!(chunker.config().overlap_characters, 9);
    }
}
