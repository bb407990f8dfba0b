/// Iterator adaptor grouping items into batches of at most `size`
///
/// Pulls items lazily: only the batch being built is held in memory.
pub struct Batches<I> {
    inner: I,
    size: usize,
}

impl<I: Iterator> Iterator for Batches<I> {
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut batch = Vec::with_capacity(self.size.min(1024));
        for item in self.inner.by_ref() {
            batch.push(item);
            if batch.len() == self.size {
                break;
            }
        }

        if batch.is_empty() {
            None
        } else {
            Some(batch)
        }
    }
}

pub trait BatchExt: Iterator + Sized {
    /// Group items into batches; a size of 0 is treated as 1
    fn batches(self, size: usize) -> Batches<Self> {
        Batches {
            inner: self,
            size: size.max(1),
        }
    }
}

impl<I: Iterator> BatchExt for I {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batches_preserve_order() {
        let batches: Vec<Vec<u32>> = (1..=5).batches(2).collect();
        assert_eq!(batches, vec![vec![1, 2], vec![3, 4], vec![5]]);
    }

    #[test]
    fn test_exact_multiple() {
        let batches: Vec<Vec<u32>> = (0..4).batches(2).collect();
        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn test_empty_input() {
        let batches: Vec<Vec<u32>> = std::iter::empty().batches(3).collect();
        assert!(batches.is_empty());
    }

    #[test]
    fn test_zero_size_is_one() {
        let batches: Vec<Vec<u32>> = (0..3).batches(0).collect();
        assert_eq!(batches, vec![vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn test_lazy_consumption() {
        let mut pulled = 0;
        let source = std::iter::repeat_with(|| {
            pulled += 1;
            pulled
        });
        let first = source.batches(3).next().unwrap();
        assert_eq!(first, vec![1, 2, 3]);
    }
}
