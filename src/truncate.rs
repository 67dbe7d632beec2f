//! Output Truncator (§4.6): a pure function over a UTF-8 byte buffer.
//!
//! Never slices through the middle of a multi-byte UTF-8 sequence — every
//! boundary is walked back (or forward) to the nearest char boundary before
//! the cut is taken.

use crate::config::{OutputOptions, TruncationStrategy};

/// Truncate `bytes` to `opts.max_output_bytes`, inserting `opts.truncation_message`
/// (with `{0}` replaced by the omitted byte count) at the cut point. Returns
/// `bytes` unchanged if it already fits.
pub fn truncate(bytes: &[u8], opts: &OutputOptions) -> Vec<u8> {
    if bytes.len() <= opts.max_output_bytes {
        return bytes.to_vec();
    }

    match opts.strategy {
        TruncationStrategy::Head => truncate_head(bytes, opts),
        TruncationStrategy::Tail => truncate_tail(bytes, opts),
        TruncationStrategy::HeadAndTail => truncate_head_and_tail(bytes, opts),
    }
}

fn render_message(opts: &OutputOptions, omitted: usize) -> Vec<u8> {
    opts.truncation_message
        .replace("{0}", &omitted.to_string())
        .into_bytes()
}

fn truncate_head(bytes: &[u8], opts: &OutputOptions) -> Vec<u8> {
    // Message length eats into the kept budget, so the initial omitted
    // estimate (ignoring the message) is only used to size that message;
    // the reported count is recomputed from where the cut actually lands.
    let approx_message = render_message(opts, bytes.len() - opts.max_output_bytes);
    let budget = opts.max_output_bytes.saturating_sub(approx_message.len());
    let cut = floor_char_boundary(bytes, budget.min(bytes.len()));
    let message = render_message(opts, bytes.len() - cut);

    let mut out = Vec::with_capacity(cut + message.len());
    out.extend_from_slice(&bytes[..cut]);
    out.extend_from_slice(&message);
    out
}

fn truncate_tail(bytes: &[u8], opts: &OutputOptions) -> Vec<u8> {
    let approx_message = render_message(opts, bytes.len() - opts.max_output_bytes);
    let budget = opts.max_output_bytes.saturating_sub(approx_message.len());
    let start = bytes.len().saturating_sub(budget);
    let start = ceil_char_boundary(bytes, start);
    let message = render_message(opts, start);

    let mut out = Vec::with_capacity(message.len() + (bytes.len() - start));
    out.extend_from_slice(&message);
    out.extend_from_slice(&bytes[start..]);
    out
}

fn truncate_head_and_tail(bytes: &[u8], opts: &OutputOptions) -> Vec<u8> {
    let approx_message = render_message(opts, bytes.len() - opts.max_output_bytes);
    let budget = opts.max_output_bytes.saturating_sub(approx_message.len());
    let head_budget = budget / 2;
    let tail_budget = budget - head_budget;

    let head_end = floor_char_boundary(bytes, head_budget.min(bytes.len()));
    let tail_start_target = bytes.len().saturating_sub(tail_budget);
    let tail_start = ceil_char_boundary(bytes, tail_start_target.max(head_end));
    let message = render_message(opts, tail_start - head_end);

    let mut out = Vec::with_capacity(head_end + message.len() + (bytes.len() - tail_start));
    out.extend_from_slice(&bytes[..head_end]);
    out.extend_from_slice(&message);
    out.extend_from_slice(&bytes[tail_start..]);
    out
}

/// Largest index `<= index` that lies on a UTF-8 char boundary.
fn floor_char_boundary(bytes: &[u8], index: usize) -> usize {
    let mut i = index.min(bytes.len());
    while i > 0 && is_continuation_byte(bytes[i]) {
        i -= 1;
    }
    i
}

/// Smallest index `>= index` that lies on a UTF-8 char boundary.
fn ceil_char_boundary(bytes: &[u8], index: usize) -> usize {
    let mut i = index.min(bytes.len());
    while i < bytes.len() && is_continuation_byte(bytes[i]) {
        i += 1;
    }
    i
}

fn is_continuation_byte(b: u8) -> bool {
    b & 0b1100_0000 == 0b1000_0000
}
