use crate::result::{BatchError, Result};

/// Flattens the sequences, alternating their items:
/// `interleave(vec![a, b, c])` yields `[a[0], b[0], c[0], a[1], b[1], c[1], ...]`.
///
/// All sequences must have the length of the first one.
pub fn interleave<T>(sequences: Vec<Vec<T>>) -> Result<Vec<T>> {
    let Some(expected) = sequences.first().map(Vec::len) else {
        return Ok(Vec::new());
    };

    if let Some(other) = sequences.iter().find(|s| s.len() != expected) {
        return Err(BatchError::SequenceLengthMismatch {
            expected,
            actual: other.len(),
        });
    }

    let width = sequences.len();
    let mut iters: Vec<_> = sequences.into_iter().map(Vec::into_iter).collect();
    let mut flat = Vec::with_capacity(expected * width);
    for _ in 0..expected {
        for iter in iters.iter_mut() {
            flat.extend(iter.next());
        }
    }

    Ok(flat)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alternates_positionally() {
        let flat = interleave(vec![vec![1, 2, 3], vec![10, 20, 30], vec![100, 200, 300]]).unwrap();
        assert_eq!(flat, vec![1, 10, 100, 2, 20, 200, 3, 30, 300]);

        for (k, chunk) in flat.chunks(3).enumerate() {
            assert_eq!(chunk, &[k as i32 + 1, (k as i32 + 1) * 10, (k as i32 + 1) * 100]);
        }
    }

    #[test]
    fn single_and_empty_inputs() {
        assert_eq!(interleave(vec![vec!["a", "b"]]).unwrap(), vec!["a", "b"]);
        assert!(interleave::<u8>(vec![]).unwrap().is_empty());
        assert!(interleave::<u8>(vec![vec![], vec![]]).unwrap().is_empty());
    }

    #[test]
    fn mismatched_lengths_fail() {
        let err = interleave(vec![vec![1, 2], vec![1], vec![1, 2]]).unwrap_err();
        assert!(matches!(
            err,
            BatchError::SequenceLengthMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }
}
