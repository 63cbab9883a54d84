use crate::error::ReassemblyError;
use crate::job::ChunkResult;

/// Flattens chunk results back into one ordered sequence.
///
/// `results` may arrive in any order; they are placed by `chunk_id`.
/// `expected_lens[i]` is the item count of chunk `i`, and each result must
/// carry exactly the keys `0..expected_lens[i]`.
pub fn reassemble(
    results: Vec<ChunkResult>,
    expected_lens: &[usize],
) -> Result<Vec<String>, ReassemblyError> {
    if results.len() != expected_lens.len() {
        return Err(ReassemblyError::ChunkCount {
            expected: expected_lens.len(),
            got: results.len(),
        });
    }

    let mut slots: Vec<Option<ChunkResult>> = vec![None; expected_lens.len()];
    for result in results {
        let id = result.chunk_id;
        let Some(slot) = slots.get_mut(id) else {
            return Err(ReassemblyError::ChunkCount {
                expected: expected_lens.len(),
                got: id + 1,
            });
        };
        // a duplicate id necessarily leaves another slot empty
        *slot = Some(result);
    }

    let total = expected_lens.iter().sum();
    let mut output = Vec::with_capacity(total);
    for (id, (slot, &expected)) in slots.into_iter().zip(expected_lens).enumerate() {
        let result = slot.ok_or(ReassemblyError::MissingChunk(id))?;
        if !result.translations.keys().copied().eq(0..expected) {
            return Err(ReassemblyError::KeyMismatch {
                chunk_id: id,
                expected,
                got: result.translations.keys().copied().collect(),
            });
        }
        output.extend(result.translations.into_values());
    }
    Ok(output)
}
