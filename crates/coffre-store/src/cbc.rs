//! CBC type-length-value field codec.
//!
//! Every header and record field is serialized as a little block run:
//! the first block packs a 4-byte little-endian length and a 1-byte
//! type, followed by as many whole blocks as the payload needs. Unused
//! space in any block is random fill, so field boundaries leak nothing.
//! The run is CBC-chained across the whole stream: one IV at the top of
//! the file, chaining state carried from field to field.
//!
//! With 16-byte blocks the length block also carries the first 11
//! payload bytes. With legacy 8-byte blocks it carries none, and even a
//! zero-length payload is followed by one (entirely random) data block —
//! old writers did this and old readers expect it.

use crate::error::StoreError;
use crate::field::RawField;
use coffre_crypto_core::{trash, BlockCipher, RandomSource, LEGACY_BLOCK_SIZE};
use std::io::{Read, Write};

/// Largest block size any supported cipher uses.
pub const MAX_BLOCK_SIZE: usize = 16;

/// Payload bytes carried inside a 16-byte length block.
const EMBEDDED_LEN: usize = MAX_BLOCK_SIZE - 5;

/// Outcome of reading one field from the stream.
#[derive(Debug)]
pub enum FieldRead {
    /// A complete decrypted field.
    Field(RawField),
    /// The terminal sentinel block; no more fields follow.
    Terminal,
    /// The stream ended (cleanly or truncated mid-block).
    EndOfStream,
}

/// CBC codec over a block cipher, holding the chaining state.
pub struct CbcCodec<C: BlockCipher> {
    cipher: C,
    chain: [u8; MAX_BLOCK_SIZE],
    bs: usize,
}

impl<C: BlockCipher> CbcCodec<C> {
    /// Start a codec with the given cipher and IV.
    ///
    /// `iv` must be exactly one cipher block; extra bytes are ignored,
    /// missing bytes would be a caller bug and are caught by the slice
    /// index below.
    #[must_use]
    pub fn new(cipher: C, iv: &[u8]) -> Self {
        let bs = cipher.block_size();
        debug_assert!(bs == LEGACY_BLOCK_SIZE || bs == MAX_BLOCK_SIZE);
        let mut chain = [0u8; MAX_BLOCK_SIZE];
        chain[..bs].copy_from_slice(&iv[..bs]);
        Self { cipher, chain, bs }
    }

    /// Cipher block size in bytes.
    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.bs
    }

    /// Serialize one field. Returns the number of ciphertext bytes
    /// written.
    ///
    /// # Errors
    ///
    /// `WriteFailure` on any I/O error or a payload longer than
    /// `u32::MAX`; `Crypto` if the random fill cannot be generated.
    // Offsets below are bounded by the block size.
    #[allow(clippy::arithmetic_side_effects)]
    pub fn write_field<W: Write>(
        &mut self,
        w: &mut W,
        rng: &mut RandomSource,
        ftype: u8,
        data: &[u8],
    ) -> Result<usize, StoreError> {
        let bs = self.bs;
        let length = u32::try_from(data.len())
            .map_err(|_| StoreError::WriteFailure("field payload too long".into()))?;

        let mut block = [0u8; MAX_BLOCK_SIZE];
        rng.fill(&mut block[..bs])?;
        block[..4].copy_from_slice(&length.to_le_bytes());
        block[4] = ftype;
        let mut rest = data;
        if bs == MAX_BLOCK_SIZE {
            let take = rest.len().min(EMBEDDED_LEN);
            block[5..5 + take].copy_from_slice(&rest[..take]);
            rest = &rest[take..];
        }
        let mut written = self.encrypt_chained_out(w, &mut block[..bs])?;

        if rest.is_empty() {
            if bs == LEGACY_BLOCK_SIZE {
                // Empty legacy field still emits one random data block.
                rng.fill(&mut block[..bs])?;
                written += self.encrypt_chained_out(w, &mut block[..bs])?;
            }
        } else {
            for chunk in rest.chunks(bs) {
                rng.fill(&mut block[..bs])?;
                block[..chunk.len()].copy_from_slice(chunk);
                written += self.encrypt_chained_out(w, &mut block[..bs])?;
            }
        }
        trash(&mut block);
        Ok(written)
    }

    /// Read and decrypt one field.
    ///
    /// `terminal`, when given, is compared against the raw ciphertext of
    /// the first block before any decryption; a match means the data
    /// stream is over. `file_len`, when non-zero, bounds the decoded
    /// field length — a decrypted length at or beyond the file size can
    /// only mean corruption (or a wrong chaining state) and is rejected
    /// before any allocation.
    ///
    /// # Errors
    ///
    /// `Corrupt` when the decoded length fails the bound check; `Io` on
    /// read errors other than end-of-stream.
    #[allow(clippy::arithmetic_side_effects)]
    pub fn read_field<R: Read>(
        &mut self,
        r: &mut R,
        terminal: Option<&[u8]>,
        file_len: u64,
    ) -> Result<FieldRead, StoreError> {
        let bs = self.bs;
        let mut block = [0u8; MAX_BLOCK_SIZE];
        if !read_exact_or_eof(r, &mut block[..bs])? {
            return Ok(FieldRead::EndOfStream);
        }
        if let Some(t) = terminal {
            if &block[..bs] == t {
                return Ok(FieldRead::Terminal);
            }
        }
        self.decrypt_chained(&mut block[..bs]);
        let length = u32::from_le_bytes([block[0], block[1], block[2], block[3]]) as usize;
        let ftype = block[4];
        if file_len != 0 && length as u64 >= file_len {
            trash(&mut block);
            return Err(StoreError::Corrupt(format!(
                "field length {length} exceeds file size {file_len}"
            )));
        }

        let mut data = vec![0u8; length];
        let embedded = if bs == MAX_BLOCK_SIZE {
            length.min(EMBEDDED_LEN)
        } else {
            0
        };
        data[..embedded].copy_from_slice(&block[5..5 + embedded]);
        trash(&mut block);

        let remaining = length - embedded;
        let nblocks = if remaining > 0 {
            remaining.div_ceil(bs)
        } else {
            // Consume the mandatory random block of an empty legacy field.
            usize::from(bs == LEGACY_BLOCK_SIZE)
        };
        let mut buf = vec![0u8; nblocks * bs];
        if !read_exact_or_eof(r, &mut buf)? {
            trash(&mut data);
            trash(&mut buf);
            return Ok(FieldRead::EndOfStream);
        }
        for chunk in buf.chunks_mut(bs) {
            self.decrypt_chained(chunk);
        }
        data[embedded..].copy_from_slice(&buf[..remaining]);
        trash(&mut buf);
        Ok(FieldRead::Field(RawField::new(ftype, data)))
    }

    fn encrypt_chained_out<W: Write>(
        &mut self,
        w: &mut W,
        block: &mut [u8],
    ) -> Result<usize, StoreError> {
        for (b, c) in block.iter_mut().zip(&self.chain[..self.bs]) {
            *b ^= *c;
        }
        self.cipher.encrypt_block(block);
        self.chain[..self.bs].copy_from_slice(block);
        w.write_all(block)
            .map_err(|e| StoreError::WriteFailure(e.to_string()))?;
        Ok(self.bs)
    }

    fn decrypt_chained(&mut self, block: &mut [u8]) {
        let mut saved = [0u8; MAX_BLOCK_SIZE];
        saved[..self.bs].copy_from_slice(block);
        self.cipher.decrypt_block(block);
        for (b, c) in block.iter_mut().zip(&self.chain[..self.bs]) {
            *b ^= *c;
        }
        self.chain[..self.bs].copy_from_slice(&saved[..self.bs]);
        trash(&mut saved);
    }
}

/// Read exactly `buf.len()` bytes, or report end-of-stream.
///
/// A partial read (stream ends mid-block) also counts as end-of-stream,
/// the same way a short `fread` of a block would.
fn read_exact_or_eof<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<bool, StoreError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = r.read(&mut buf[filled..])?;
        if n == 0 {
            return Ok(false);
        }
        filled = filled.saturating_add(n);
    }
    Ok(true)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
