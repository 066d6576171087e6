use crate::errors::{ConfigError, Result};
use crate::record::{Batch, Record};

/// A contiguous slice of a batch, transferred as one bulk request.
#[derive(Debug, Clone, Copy)]
pub struct Chunk<'a> {
    pub index: usize,
    /// Position of the first record of this chunk inside its batch.
    pub offset: usize,
    pub records: &'a [Record],
}

impl Chunk<'_> {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(ConfigError::Invalid {
                message: "chunk_size must be greater than zero".to_string(),
            }
            .into());
        }
        Ok(Self { chunk_size })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Lazily splits `batch` into chunks. The iterator is `Clone`, so a split can
    /// be replayed from the start.
    pub fn split<'a>(&self, batch: &'a Batch) -> Chunks<'a> {
        Chunks {
            inner: batch.records().chunks(self.chunk_size).enumerate(),
            chunk_size: self.chunk_size,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    inner: std::iter::Enumerate<std::slice::Chunks<'a, Record>>,
    chunk_size: usize,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(index, records)| Chunk {
            index,
            offset: index * self.chunk_size,
            records,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Chunks<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Value;

    fn batch_of(n: i64) -> Batch {
        (0..n)
            .map(|i| [("id", Value::Integer(i))].into_iter().collect::<Record>())
            .collect()
    }

    #[test]
    fn test_zero_chunk_size_is_invalid_config() {
        let err = Chunker::new(0).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::InvalidConfig);
        assert!(err.to_string().contains("chunk_size"));
    }

    #[test]
    fn test_chunks_reconstruct_batch() {
        for (len, size) in [(1, 1), (7, 3), (9, 3), (5, 10), (1000, 7)] {
            let batch = batch_of(len);
            let chunker = Chunker::new(size).unwrap();

            let chunks: Vec<Chunk> = chunker.split(&batch).collect();
            assert!(chunks.iter().all(|c| !c.is_empty() && c.len() <= size));
            assert_eq!(chunks.len(), (len as usize).div_ceil(size));

            let rebuilt: Vec<Record> = chunks
                .iter()
                .flat_map(|c| c.records.iter().cloned())
                .collect();
            assert_eq!(rebuilt, batch.records());
        }
    }

    #[test]
    fn test_chunk_offsets_and_restart() {
        let batch = batch_of(7);
        let chunks = Chunker::new(3).unwrap().split(&batch);

        let offsets: Vec<(usize, usize, usize)> = chunks
            .clone()
            .map(|c| (c.index, c.offset, c.len()))
            .collect();
        assert_eq!(offsets, vec![(0, 0, 3), (1, 3, 3), (2, 6, 1)]);

        // a cloned split starts over
        assert_eq!(chunks.count(), 3);
    }
}
