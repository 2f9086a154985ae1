//! Splits an utterance into sentence-sized chunks and synthesizes them with
//! bounded concurrency.
//!
//! Chunks are rendered by a small set of workers that claim the next index
//! from a shared cursor, so at most `concurrency` engine requests are in
//! flight for one utterance. Each chunk's audio is stored by index and the
//! buffers are concatenated in original order once every worker finishes.
//! A chunk that fails contributes nothing; the others still play.

use crate::error::VoiceError;
use crate::trim::trim_silence;
use async_trait::async_trait;
use std::borrow::Cow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};
use yomiage_types::{GroupLimits, QueueItem};

/// Appended to text cut at the group's length limit.
pub const TRUNCATION_MARKER: &str = "以下省略";

/// Chunk buffers shorter than this are dropped as noise before concatenation.
pub const MIN_AUDIBLE_BYTES: usize = 100;

/// Who and what a chunk is spoken for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisContext {
    pub group_id: String,
    pub speaker_id: u32,
    /// User whose profile should be preferred over the group's.
    pub origin_ref: Option<String>,
}

impl From<&QueueItem> for SynthesisContext {
    fn from(item: &QueueItem) -> Self {
        Self {
            group_id: item.group_id.clone(),
            speaker_id: item.speaker_id,
            origin_ref: item.origin_ref.clone(),
        }
    }
}

/// Renders one chunk of text to 16-bit PCM.
#[async_trait]
pub trait ChunkSynthesizer: Send + Sync {
    async fn synthesize_chunk(
        &self,
        text: &str,
        context: &SynthesisContext,
    ) -> Result<Vec<u8>, VoiceError>;
}

fn is_boundary(c: char) -> bool {
    matches!(c, '。' | '、' | ',' | '.' | '?' | '\n')
}

fn is_punctuation_only(chunk: &str) -> bool {
    chunk
        .chars()
        .all(|c| matches!(c, '。' | '、' | ',' | '.' | '?' | '？' | '!' | '！' | '\n'))
}

/// Cuts `text` to `limit` characters and appends [`TRUNCATION_MARKER`].
///
/// Text within the limit is returned unchanged.
pub fn truncate_text(text: &str, limit: usize) -> Cow<'_, str> {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => Cow::Owned(format!("{}{}", &text[..cut], TRUNCATION_MARKER)),
        None => Cow::Borrowed(text),
    }
}

/// Splits `text` after each run of sentence punctuation.
///
/// Chunks are trimmed. Empty chunks and chunks made only of punctuation are
/// discarded.
pub fn split_text(text: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if !is_boundary(c) {
            continue;
        }
        let run_continues = chars.peek().is_some_and(|&(_, next)| is_boundary(next));
        if !run_continues {
            let end = i + c.len_utf8();
            pieces.push(&text[start..end]);
            start = end;
        }
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }

    pieces
        .into_iter()
        .map(str::trim)
        .filter(|piece| !piece.is_empty() && !is_punctuation_only(piece))
        .map(String::from)
        .collect()
}

/// Synthesizes every chunk with at most `concurrency` requests in flight.
///
/// The result has one buffer per chunk, in chunk order. A chunk whose
/// synthesis failed has an empty buffer.
pub async fn synthesize_chunks(
    synthesizer: Arc<dyn ChunkSynthesizer>,
    chunks: Vec<String>,
    context: SynthesisContext,
    concurrency: usize,
) -> Vec<Vec<u8>> {
    let total = chunks.len();
    let mut buffers = vec![Vec::new(); total];
    if total == 0 {
        return buffers;
    }

    let chunks = Arc::new(chunks);
    let context = Arc::new(context);
    let cursor = Arc::new(AtomicUsize::new(0));
    let workers = concurrency.clamp(1, total);

    let mut set = JoinSet::new();
    for _ in 0..workers {
        let synthesizer = Arc::clone(&synthesizer);
        let chunks = Arc::clone(&chunks);
        let context = Arc::clone(&context);
        let cursor = Arc::clone(&cursor);
        set.spawn(async move {
            let mut rendered = Vec::new();
            loop {
                let index = cursor.fetch_add(1, Ordering::SeqCst);
                let Some(chunk) = chunks.get(index) else {
                    break;
                };
                match synthesizer.synthesize_chunk(chunk, &context).await {
                    Ok(pcm) => rendered.push((index, pcm)),
                    Err(e) => {
                        warn!(
                            group_id = %context.group_id,
                            chunk = index,
                            error = %e,
                            "chunk synthesis failed; skipping"
                        );
                    }
                }
            }
            rendered
        });
    }

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(rendered) => {
                for (index, pcm) in rendered {
                    buffers[index] = pcm;
                }
            }
            Err(e) => error!(error = %e, "chunk synthesis worker panicked"),
        }
    }
    buffers
}

/// Concatenates chunk buffers in order, dropping those shorter than
/// [`MIN_AUDIBLE_BYTES`].
pub fn concat_audible(buffers: Vec<Vec<u8>>) -> Vec<u8> {
    let mut out = Vec::with_capacity(buffers.iter().map(Vec::len).sum());
    for buffer in buffers {
        if buffer.len() >= MIN_AUDIBLE_BYTES {
            out.extend_from_slice(&buffer);
        }
    }
    out
}

/// Renders one queue item to a single trimmed PCM buffer.
///
/// Applies the group's length limit, splits the text, synthesizes the chunks
/// within the group's concurrency limit, concatenates the audible ones and
/// trims silence from the ends of the result. Pauses between chunks are
/// kept. An empty result means there is nothing to play.
pub async fn render_utterance(
    synthesizer: Arc<dyn ChunkSynthesizer>,
    item: &QueueItem,
    limits: GroupLimits,
    silence_run: usize,
) -> Vec<u8> {
    let text = truncate_text(&item.text, limits.max_text_length);
    let chunks = split_text(&text);
    debug!(
        group_id = %item.group_id,
        chunks = chunks.len(),
        concurrency = limits.synthesis_concurrency,
        "rendering utterance"
    );

    let buffers = synthesize_chunks(
        synthesizer,
        chunks,
        SynthesisContext::from(item),
        limits.synthesis_concurrency,
    )
    .await;

    let joined = concat_audible(buffers);
    trim_silence(&joined, silence_run).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use yomiage_types::{Priority, Tier};

    #[test]
    fn splits_after_punctuation() {
        assert_eq!(split_text("こんにちは。元気、です"), vec!["こんにちは。", "元気、", "です"]);
        assert_eq!(split_text("a.b?c"), vec!["a.", "b?", "c"]);
    }

    #[test]
    fn punctuation_runs_stay_together() {
        assert_eq!(split_text("本当?。。次"), vec!["本当?。。", "次"]);
    }

    #[test]
    fn drops_empty_and_punctuation_only_chunks() {
        assert!(split_text("").is_empty());
        assert!(split_text("、、、").is_empty());
        assert_eq!(split_text("はい。\n\n。いいえ"), vec!["はい。\n\n。", "いいえ"]);
        assert_eq!(split_text("  空白  "), vec!["空白"]);
    }

    #[test]
    fn truncates_by_characters() {
        assert_eq!(truncate_text("あいうえお", 3), "あいう以下省略");
        assert_eq!(truncate_text("あいう", 3), "あいう");
        assert!(matches!(truncate_text("short", 200), Cow::Borrowed(_)));
    }

    #[test]
    fn concat_skips_short_buffers() {
        let out = concat_audible(vec![vec![1; 120], vec![2; 99], vec![], vec![3; 100]]);
        assert_eq!(out.len(), 220);
        assert_eq!(out[0], 1);
        assert_eq!(out[219], 3);
    }

    /// Returns a 200-byte buffer filled with the chunk's first byte, failing
    /// for chunks that start with `!fail`. Records peak concurrency.
    struct FakeSynthesizer {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FakeSynthesizer {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ChunkSynthesizer for FakeSynthesizer {
        async fn synthesize_chunk(
            &self,
            text: &str,
            _context: &SynthesisContext,
        ) -> Result<Vec<u8>, VoiceError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if text.starts_with("!fail") {
                return Err(VoiceError::EngineStatus {
                    status: 500,
                    message: "boom".into(),
                });
            }
            Ok(vec![text.as_bytes()[0]; 200])
        }
    }

    fn context() -> SynthesisContext {
        SynthesisContext {
            group_id: "g".into(),
            speaker_id: 1,
            origin_ref: None,
        }
    }

    #[tokio::test]
    async fn results_keep_chunk_order_and_failures_are_empty() {
        let synth = FakeSynthesizer::new();
        let chunks = vec!["a".into(), "!fail".into(), "c".into(), "d".into()];
        let buffers = synthesize_chunks(synth.clone(), chunks, context(), 3).await;

        assert_eq!(buffers.len(), 4);
        assert_eq!(buffers[0][0], b'a');
        assert!(buffers[1].is_empty());
        assert_eq!(buffers[2][0], b'c');
        assert_eq!(buffers[3][0], b'd');

        let joined = concat_audible(buffers);
        assert_eq!(joined.len(), 600);
        assert_eq!(joined[199], b'a');
        assert_eq!(joined[200], b'c');
        assert_eq!(joined[400], b'd');
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let synth = FakeSynthesizer::new();
        let chunks = (0..12).map(|i| format!("c{i}")).collect();
        synthesize_chunks(synth.clone(), chunks, context(), 2).await;
        assert!(synth.peak.load(Ordering::SeqCst) <= 2);

        let synth = FakeSynthesizer::new();
        let chunks = (0..3).map(|i| format!("c{i}")).collect();
        synthesize_chunks(synth.clone(), chunks, context(), 0).await;
        assert_eq!(synth.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn render_truncates_and_splits() {
        let synth = FakeSynthesizer::new();
        let text = format!("x{}", "y".repeat(300));
        let item = QueueItem::new("g", text, 1, Priority::Normal);
        let pcm = render_utterance(synth, &item, Tier::Free.limits(), 8).await;
        // One chunk: nothing in the text splits it.
        assert_eq!(pcm.len(), 200);
        assert_eq!(pcm[0], b'x');
    }

    /// Answers with fixed PCM per chunk text.
    struct ScriptedSynthesizer;

    #[async_trait]
    impl ChunkSynthesizer for ScriptedSynthesizer {
        async fn synthesize_chunk(
            &self,
            text: &str,
            _context: &SynthesisContext,
        ) -> Result<Vec<u8>, VoiceError> {
            let mut pcm = Vec::new();
            if text.starts_with("short") {
                // 30 samples of speech followed by a 200-sample pause.
                pcm.extend(vec![7u8; 60]);
                pcm.extend(vec![0u8; 400]);
            } else {
                pcm.extend(vec![9u8; 200]);
            }
            Ok(pcm)
        }
    }

    #[tokio::test]
    async fn trimming_happens_after_concatenation() {
        let item = QueueItem::new("g", "short。long", 1, Priority::Normal);
        let pcm = render_utterance(Arc::new(ScriptedSynthesizer), &item, Tier::Pro.limits(), 8).await;

        // Short speech survives and the pause between chunks is kept.
        assert_eq!(pcm.len(), 660);
        assert_eq!(&pcm[..60], &[7u8; 60][..]);
        assert!(pcm[60..460].iter().all(|&b| b == 0));
        assert_eq!(pcm[460], 9);
    }

    #[tokio::test]
    async fn trailing_silence_of_the_utterance_is_trimmed() {
        let item = QueueItem::new("g", "long。short", 1, Priority::Normal);
        let pcm = render_utterance(Arc::new(ScriptedSynthesizer), &item, Tier::Pro.limits(), 8).await;
        // 200 bytes of speech, 60 bytes of speech, then 7 padding samples.
        assert_eq!(pcm.len(), 200 + 60 + 14);
    }

    #[tokio::test]
    async fn render_of_punctuation_is_empty() {
        let synth = FakeSynthesizer::new();
        let item = QueueItem::new("g", "。。。", 1, Priority::Normal);
        let pcm = render_utterance(synth.clone(), &item, Tier::Pro.limits(), 8).await;
        assert!(pcm.is_empty());
        assert_eq!(synth.peak.load(Ordering::SeqCst), 0);
    }
}
