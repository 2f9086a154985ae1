//! Leading and trailing silence removal for 16-bit PCM.

/// Window length, in samples, used when no other threshold is configured.
pub const DEFAULT_SILENCE_RUN: usize = 8;

/// Returns the sub-slice of `pcm` with leading and trailing silence removed.
///
/// `pcm` is interpreted as little-endian 16-bit samples; an odd trailing byte
/// is dropped. The head boundary is the first window of `run` samples that is
/// not all zero, and the tail boundary is found the same way from the end, so
/// up to `run - 1` zero samples are kept around the audible region. An
/// all-zero input trims to an empty slice. Trimming is idempotent.
pub fn trim_silence(pcm: &[u8], run: usize) -> &[u8] {
    let run = run.max(1);
    let samples = pcm.len() / 2;
    let is_zero = |i: usize| pcm[2 * i] == 0 && pcm[2 * i + 1] == 0;

    let Some(first) = (0..samples).find(|&i| !is_zero(i)) else {
        return &pcm[..0];
    };
    let Some(last) = (0..samples).rev().find(|&i| !is_zero(i)) else {
        return &pcm[..0];
    };

    let start = first.saturating_sub(run - 1);
    let end = (last + run).min(samples);
    &pcm[start * 2..end * 2]
}
