//! src/remap.rs
//!
//! In-place column permutation of quantized weight rows.
//!
//! A matrix is a row-major run of 32-bit words. Two layouts are supported:
//!
//! - plain words: column `c` of a row is word `c`
//! - packed nibbles: each word holds eight 4-bit fields, lowest nibble first,
//!   so column `c` is nibble `c % 8` of word `c / 8`
//!
//! Both remaps gather a row into an O(row width) scratch buffer and scatter
//! it back with `row[c] = scratch[index[c]]`. Inputs are validated before any
//! row is touched, so a rejected call leaves the matrix unchanged.

use crate::error::{LoadError, Result};

/// Nibbles per packed word.
pub const NIBBLES_PER_WORD: usize = 8;

/// Mutable view of a row-major matrix of 32-bit words.
#[derive(Debug)]
pub struct RowMatrix<'a> {
    data: &'a mut [u32],
    cols: usize,
}

impl<'a> RowMatrix<'a> {
    /// Wraps `data` as rows of `cols` words.
    pub fn new(data: &'a mut [u32], cols: usize) -> Result<Self> {
        if cols == 0 {
            return Err(LoadError::shape_mismatch("matrix must have at least one column"));
        }
        if data.len() % cols != 0 {
            return Err(LoadError::shape_mismatch(format!(
                "{} values do not form whole rows of {} columns",
                data.len(),
                cols
            )));
        }
        Ok(Self { data, cols })
    }

    /// Views raw bytes as a matrix of `value_width`-byte values.
    ///
    /// Only 4-byte values are supported; the bytes must be 4-byte aligned.
    pub fn from_bytes(bytes: &'a mut [u8], cols: usize, value_width: usize) -> Result<Self> {
        if value_width != std::mem::size_of::<u32>() {
            return Err(LoadError::shape_mismatch(format!(
                "values must be 32-bit, got {}-byte values",
                value_width
            )));
        }
        let words = bytemuck::try_cast_slice_mut::<u8, u32>(bytes).map_err(|e| {
            LoadError::shape_mismatch(format!("bytes cannot be viewed as 32-bit words: {}", e))
        })?;
        Self::new(words, cols)
    }

    pub fn rows(&self) -> usize {
        self.data.len() / self.cols
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.data[..]
    }

    /// Permutes whole-word columns: `row[c] = old_row[index[c]]`.
    pub fn remap(&mut self, index: &[u32]) -> Result<()> {
        if index.len() != self.cols {
            return Err(LoadError::shape_mismatch(format!(
                "permutation has {} entries, matrix has {} columns",
                index.len(),
                self.cols
            )));
        }
        check_bounds(index, self.cols)?;

        let mut temp = vec![0u32; self.cols];
        for row in self.data.chunks_exact_mut(self.cols) {
            temp.copy_from_slice(row);
            for (value, &i) in row.iter_mut().zip(index) {
                *value = temp[i as usize];
            }
        }
        Ok(())
    }

    /// Permutes packed 4-bit columns: nibble `c` of each row becomes nibble
    /// `index[c]` of the old row. `index` has eight entries per word.
    pub fn remap_4bit(&mut self, index: &[u32]) -> Result<()> {
        let nibbles = self.cols * NIBBLES_PER_WORD;
        if index.len() != nibbles {
            return Err(LoadError::shape_mismatch(format!(
                "permutation has {} entries, packed rows hold {} nibbles ({} words x {})",
                index.len(),
                nibbles,
                self.cols,
                NIBBLES_PER_WORD
            )));
        }
        check_bounds(index, nibbles)?;

        let mut temp = vec![0u32; self.cols];
        for row in self.data.chunks_exact_mut(self.cols) {
            temp.copy_from_slice(row);
            for (word, fields) in row.iter_mut().zip(index.chunks_exact(NIBBLES_PER_WORD)) {
                *word = fields
                    .iter()
                    .enumerate()
                    .fold(0u32, |packed, (b, &i)| {
                        packed | nibble(&temp, i as usize) << (b * 4)
                    });
            }
        }
        Ok(())
    }
}

fn nibble(words: &[u32], i: usize) -> u32 {
    (words[i / NIBBLES_PER_WORD] >> ((i % NIBBLES_PER_WORD) * 4)) & 0x0f
}

fn check_bounds(index: &[u32], limit: usize) -> Result<()> {
    match index.iter().position(|&i| i as usize >= limit) {
        Some(pos) => Err(LoadError::shape_mismatch(format!(
            "permutation entry {} is {}, must be < {}",
            pos, index[pos], limit
        ))),
        None => Ok(()),
    }
}

/// Permutes the columns of a row-major `[rows, cols]` matrix in place.
pub fn remap_rows(data: &mut [u32], cols: usize, index: &[u32]) -> Result<()> {
    RowMatrix::new(data, cols)?.remap(index)
}

/// Permutes the 4-bit columns of a packed `[rows, words_per_row]` matrix in place.
pub fn remap_rows_4bit(data: &mut [u32], words_per_row: usize, index: &[u32]) -> Result<()> {
    RowMatrix::new(data, words_per_row)?.remap_4bit(index)
}

/// Inverse of a permutation, or an error if `index` is not one.
pub fn invert_permutation(index: &[u32]) -> Result<Vec<u32>> {
    let mut inverse = vec![u32::MAX; index.len()];
    for (pos, &i) in index.iter().enumerate() {
        let slot = inverse.get_mut(i as usize).ok_or_else(|| {
            LoadError::shape_mismatch(format!("entry {} is out of range", i))
        })?;
        if *slot != u32::MAX {
            return Err(LoadError::shape_mismatch(format!("entry {} appears twice", i)));
        }
        *slot = pos as u32;
    }
    Ok(inverse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    const TEST_SEED: u64 = 42;

    fn random_permutation(rng: &mut StdRng, len: usize) -> Vec<u32> {
        let mut perm: Vec<u32> = (0..len as u32).collect();
        perm.shuffle(rng);
        perm
    }

    mod element_remap {
        use super::*;

        #[test]
        fn applies_gather_per_row() -> Result<()> {
            let mut data = vec![10, 11, 12, 20, 21, 22];
            remap_rows(&mut data, 3, &[2, 0, 1])?;
            assert_eq!(data, vec![12, 10, 11, 22, 20, 21]);
            Ok(())
        }

        #[test]
        fn permutation_then_inverse_restores_rows() -> Result<()> {
            let mut rng = StdRng::seed_from_u64(TEST_SEED);
            for cols in [1, 2, 7, 64, 129] {
                let rows = rng.random_range(1..6);
                let original: Vec<u32> = (0..rows * cols).map(|_| rng.random()).collect();
                let perm = random_permutation(&mut rng, cols);
                let inverse = invert_permutation(&perm)?;

                let mut data = original.clone();
                remap_rows(&mut data, cols, &perm)?;
                remap_rows(&mut data, cols, &inverse)?;
                assert_eq!(data, original);
            }
            Ok(())
        }

        #[test]
        fn rejects_length_mismatch() {
            let mut data = vec![0u32; 6];
            assert!(matches!(
                remap_rows(&mut data, 3, &[0, 1]),
                Err(LoadError::ShapeMismatch { .. })
            ));
            assert!(remap_rows(&mut data, 4, &[0, 1, 2, 3]).is_err());
            assert!(remap_rows(&mut data, 0, &[]).is_err());
        }

        #[test]
        fn rejects_out_of_range_entries_without_mutating() {
            let mut data = vec![1, 2, 3];
            assert!(remap_rows(&mut data, 3, &[0, 1, 3]).is_err());
            assert_eq!(data, vec![1, 2, 3]);
        }
    }

    mod nibble_remap {
        use super::*;

        #[test]
        fn reversing_eight_nibbles() -> Result<()> {
            // nibbles 0x1..0x8, lowest first
            let mut data = vec![0x8765_4321];
            remap_rows_4bit(&mut data, 1, &[7, 6, 5, 4, 3, 2, 1, 0])?;
            assert_eq!(data, vec![0x1234_5678]);
            Ok(())
        }

        #[test]
        fn moves_nibbles_across_words() -> Result<()> {
            let mut data = vec![0x0000_000a, 0xb000_0000];
            let mut index: Vec<u32> = (0..16).collect();
            index.swap(0, 15);
            remap_rows_4bit(&mut data, 2, &index)?;
            assert_eq!(data, vec![0x0000_000b, 0xa000_0000]);
            Ok(())
        }

        #[test]
        fn permutation_then_inverse_restores_rows() -> Result<()> {
            let mut rng = StdRng::seed_from_u64(TEST_SEED);
            for words in [1, 3, 16] {
                let original: Vec<u32> = (0..4 * words).map(|_| rng.random()).collect();
                let perm = random_permutation(&mut rng, words * NIBBLES_PER_WORD);
                let inverse = invert_permutation(&perm)?;

                let mut data = original.clone();
                remap_rows_4bit(&mut data, words, &perm)?;
                remap_rows_4bit(&mut data, words, &inverse)?;
                assert_eq!(data, original);
            }
            Ok(())
        }

        #[test]
        fn requires_eight_entries_per_word() {
            let mut data = vec![0u32; 4];
            let index: Vec<u32> = (0..8).collect();
            assert!(remap_rows_4bit(&mut data, 2, &index).is_err());
            let index: Vec<u32> = (0..16).collect();
            assert!(remap_rows_4bit(&mut data, 2, &index).is_ok());
        }
    }

    mod byte_views {
        use super::*;

        #[test]
        fn rejects_wrong_value_width() {
            let mut bytes = vec![0u8; 16];
            assert!(matches!(
                RowMatrix::from_bytes(&mut bytes, 2, 2),
                Err(LoadError::ShapeMismatch { .. })
            ));
        }

        #[test]
        fn remaps_through_byte_view() -> Result<()> {
            let mut words = vec![1u32, 2, 3, 4];
            let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut words[..]);
            let mut matrix = RowMatrix::from_bytes(bytes, 2, 4)?;
            assert_eq!(matrix.rows(), 2);
            matrix.remap(&[1, 0])?;
            assert_eq!(matrix.as_slice(), &[2, 1, 4, 3]);
            Ok(())
        }

        #[test]
        fn invert_rejects_non_permutations() {
            assert!(invert_permutation(&[0, 0]).is_err());
            assert!(invert_permutation(&[0, 2]).is_err());
            assert_eq!(invert_permutation(&[2, 0, 1]).unwrap(), vec![1, 2, 0]);
        }
    }
}
