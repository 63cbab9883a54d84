use std::num::NonZeroUsize;

use crate::job::Chunk;

/// Sizes of the chunks `len` items are split into.
///
/// The effective fan-out is `min(fan_out, len)`, so no chunk is ever empty and
/// an empty input yields no chunks at all. The first `len % n` chunks carry
/// one extra item.
pub fn chunk_sizes(len: usize, fan_out: NonZeroUsize) -> Vec<usize> {
    let n = fan_out.get().min(len);
    if n == 0 {
        return Vec::new();
    }
    let base = len / n;
    let remainder = len % n;
    (0..n).map(|index| base + usize::from(index < remainder)).collect()
}

/// Splits `items` into contiguous chunks sized by [`chunk_sizes`]. Keys inside
/// each chunk restart at zero.
pub fn partition(items: Vec<String>, fan_out: NonZeroUsize) -> Vec<Chunk> {
    let sizes = chunk_sizes(items.len(), fan_out);
    let mut items = items.into_iter();
    sizes
        .into_iter()
        .enumerate()
        .map(|(id, size)| Chunk {
            id,
            texts: items.by_ref().take(size).enumerate().collect(),
        })
        .collect()
}
