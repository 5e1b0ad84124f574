//! Chunked authenticated encryption of byte streams and files.
//!
//! A stream is cut into chunks of at most `chunk_size` bytes and every chunk
//! is sealed on its own with XChaCha20-Poly1305 under a fresh random nonce.
//! The resulting tokens (see [`crate::format::v1`]) are written back to back.
//! The chunk index goes into each tag's associated data, so reordered,
//! dropped or duplicated tokens fail authentication. A final-chunk flag does
//! the same for a truncated stream.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use chacha20poly1305::{
    Key, XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::crypto::{DerivedKey, generate_nonce};
use crate::error::CryptoError;
use crate::format::{self, TokenHeader, read_byte, read_exact};
use crate::storage::Storage;

/// Default chunk size: 1 MiB
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Minimum chunk size: 1 KiB
pub const MIN_CHUNK_SIZE: usize = 1024;

/// Maximum chunk size: 16 MiB
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Observer called after each chunk with `(bytes_processed, total_bytes)`.
pub type Progress<'a> = Option<&'a mut dyn FnMut(u64, u64)>;

/// Counters for one pass over a stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub chunks: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// Per-chunk AEAD over a stream.
pub struct ChunkCipher {
    cipher: XChaCha20Poly1305,
    chunk_size: usize,
}

impl ChunkCipher {
    pub fn new(key: &DerivedKey) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(key.as_bytes())),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(key: &DerivedKey, chunk_size: usize) -> Result<Self, CryptoError> {
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&chunk_size) {
            return Err(CryptoError::Input(format!(
                "chunk size {chunk_size} is out of range [{MIN_CHUNK_SIZE}, {MAX_CHUNK_SIZE}]"
            )));
        }
        let mut cipher = Self::new(key);
        cipher.chunk_size = chunk_size;
        Ok(cipher)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Seals one chunk into a complete token.
    pub fn seal_chunk(
        &self,
        index: u64,
        is_final: bool,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let header = TokenHeader::new(is_final, plaintext.len(), generate_nonce()?)?;
        let aad = header.aad(index);

        let body = self
            .cipher
            .encrypt(
                XNonce::from_slice(header.nonce()),
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| CryptoError::Encryption)?;

        let mut token = Vec::with_capacity(header.token_len());
        token.extend_from_slice(&header.to_bytes());
        token.extend_from_slice(&body);
        Ok(token)
    }

    /// Opens the body of one token whose header was already read.
    fn open_body(
        &self,
        index: u64,
        header: &TokenHeader,
        body: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let aad = header.aad(index);
        let plaintext = self
            .cipher
            .decrypt(XNonce::from_slice(header.nonce()), Payload { msg: body, aad: &aad })
            .map_err(|_| CryptoError::Authentication("chunk failed authentication"))?;
        Ok(Zeroizing::new(plaintext))
    }

    /// Iterator yielding one token per plaintext chunk of `reader`.
    pub fn encrypt_chunks<R: Read>(&self, reader: R) -> EncryptChunks<'_, R> {
        EncryptChunks {
            cipher: self,
            reader,
            index: 0,
            lookahead: None,
            done: false,
        }
    }

    /// Iterator yielding the plaintext of each token in `reader`.
    pub fn decrypt_chunks<R: Read>(&self, reader: R) -> DecryptChunks<'_, R> {
        DecryptChunks {
            cipher: self,
            reader,
            index: 0,
            state: DecryptState::Reading,
        }
    }

    /// Encrypts `reader` into `writer`, reporting progress against `total`
    /// plaintext bytes.
    pub fn encrypt_stream<R: Read, W: Write + ?Sized>(
        &self,
        reader: R,
        writer: &mut W,
        total: u64,
        mut progress: Progress<'_>,
    ) -> Result<StreamStats, CryptoError> {
        let mut stats = StreamStats::default();
        for token in self.encrypt_chunks(reader) {
            let token = token?;
            writer.write_all(&token)?;

            stats.chunks += 1;
            stats.bytes_in += (token.len() - format::v1::OVERHEAD) as u64;
            stats.bytes_out += token.len() as u64;
            if let Some(report) = progress.as_deref_mut() {
                report(stats.bytes_in, total);
            }
        }
        Ok(stats)
    }

    /// Decrypts `reader` into `writer`, reporting progress against `total`
    /// container bytes.
    ///
    /// Plaintext already written before a failing chunk must be discarded by
    /// the caller.
    pub fn decrypt_stream<R: Read, W: Write + ?Sized>(
        &self,
        reader: R,
        writer: &mut W,
        total: u64,
        mut progress: Progress<'_>,
    ) -> Result<StreamStats, CryptoError> {
        let mut stats = StreamStats::default();
        for chunk in self.decrypt_chunks(reader) {
            let chunk = chunk?;
            writer.write_all(&chunk)?;

            stats.chunks += 1;
            stats.bytes_in += (chunk.len() + format::v1::OVERHEAD) as u64;
            stats.bytes_out += chunk.len() as u64;
            if let Some(report) = progress.as_deref_mut() {
                report(stats.bytes_in, total);
            }
        }
        Ok(stats)
    }

    /// Encrypts the file at `path` in place.
    ///
    /// Tokens are written to a temporary sibling which replaces the original
    /// only after the whole file has been encrypted.
    pub fn encrypt_file(
        &self,
        path: &Path,
        progress: Progress<'_>,
    ) -> Result<StreamStats, CryptoError> {
        let (source, total) = open_input(path)?;
        debug!(path = %path.display(), total, chunk_size = self.chunk_size, "encrypting file");

        let mut stats = StreamStats::default();
        Storage::new(path).save_with(|w| {
            stats = self.encrypt_stream(source, w, total, progress)?;
            Ok::<(), CryptoError>(())
        })?;

        info!(
            path = %path.display(),
            chunks = stats.chunks,
            bytes = stats.bytes_out,
            "file encrypted"
        );
        Ok(stats)
    }

    /// Decrypts the file at `path` in place.
    ///
    /// Plaintext is staged in a temporary sibling, so a failure on any chunk
    /// leaves the encrypted file exactly as it was.
    pub fn decrypt_file(
        &self,
        path: &Path,
        progress: Progress<'_>,
    ) -> Result<StreamStats, CryptoError> {
        let (source, total) = open_input(path)?;
        debug!(path = %path.display(), total, "decrypting file");

        let mut stats = StreamStats::default();
        Storage::new(path).save_with(|w| {
            stats = self.decrypt_stream(source, w, total, progress)?;
            Ok::<(), CryptoError>(())
        })?;

        info!(
            path = %path.display(),
            chunks = stats.chunks,
            bytes = stats.bytes_out,
            "file decrypted"
        );
        Ok(stats)
    }
}

fn open_input(path: &Path) -> Result<(BufReader<File>, u64), CryptoError> {
    let file = File::open(path)
        .map_err(|e| CryptoError::Input(format!("cannot open {}: {e}", path.display())))?;
    let total = file.metadata()?.len();
    Ok((BufReader::new(file), total))
}

/// Reads up to `limit` bytes, retrying short reads until the limit or EOF.
fn read_chunk<R: Read>(reader: &mut R, limit: usize) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(limit);
    reader.take(limit as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

/// See [`ChunkCipher::encrypt_chunks`].
///
/// Reads one chunk ahead so the last token can carry the final flag.
pub struct EncryptChunks<'a, R> {
    cipher: &'a ChunkCipher,
    reader: R,
    index: u64,
    lookahead: Option<Vec<u8>>,
    done: bool,
}

impl<R: Read> EncryptChunks<'_, R> {
    fn next_token(&mut self) -> Result<Vec<u8>, CryptoError> {
        let chunk_size = self.cipher.chunk_size;
        let current = match self.lookahead.take() {
            Some(chunk) => chunk,
            None => read_chunk(&mut self.reader, chunk_size)?,
        };

        let is_final = if current.len() < chunk_size {
            true
        } else {
            let next = read_chunk(&mut self.reader, chunk_size)?;
            let is_final = next.is_empty();
            if !is_final {
                self.lookahead = Some(next);
            }
            is_final
        };

        let token = self.cipher.seal_chunk(self.index, is_final, &current)?;
        self.index += 1;
        self.done = is_final;
        Ok(token)
    }
}

impl<R: Read> Iterator for EncryptChunks<'_, R> {
    type Item = Result<Vec<u8>, CryptoError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let token = self.next_token();
        if token.is_err() {
            self.done = true;
        }
        Some(token)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecryptState {
    Reading,
    AfterFinal,
    Done,
}

/// See [`ChunkCipher::decrypt_chunks`].
pub struct DecryptChunks<'a, R> {
    cipher: &'a ChunkCipher,
    reader: R,
    index: u64,
    state: DecryptState,
}

impl<R: Read> DecryptChunks<'_, R> {
    fn next_chunk(&mut self) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let header = format::read_header(&mut self.reader)?
            .ok_or(CryptoError::Authentication("missing final chunk"))?;

        let mut body = vec![0u8; header.body_len()];
        read_exact(&mut self.reader, &mut body)?;

        let plaintext = self.cipher.open_body(self.index, &header, &body)?;
        self.index += 1;
        if header.is_final() {
            self.state = DecryptState::AfterFinal;
        }
        Ok(plaintext)
    }
}

impl<R: Read> Iterator for DecryptChunks<'_, R> {
    type Item = Result<Zeroizing<Vec<u8>>, CryptoError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.state {
            DecryptState::Done => None,
            DecryptState::AfterFinal => {
                self.state = DecryptState::Done;
                match read_byte(&mut self.reader) {
                    Ok(None) => None,
                    Ok(Some(_)) => Some(Err(CryptoError::Authentication("data after final chunk"))),
                    Err(e) => Some(Err(e)),
                }
            }
            DecryptState::Reading => {
                let chunk = self.next_chunk();
                if chunk.is_err() {
                    self.state = DecryptState::Done;
                }
                Some(chunk)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::v1::OVERHEAD;
    use proptest::prelude::*;
    use std::fs;
    use tempfile::tempdir;

    fn key(byte: u8) -> DerivedKey {
        DerivedKey::from_bytes([byte; 32])
    }

    fn small_cipher(byte: u8) -> ChunkCipher {
        ChunkCipher::with_chunk_size(&key(byte), MIN_CHUNK_SIZE).unwrap()
    }

    fn encrypt(cipher: &ChunkCipher, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        cipher.encrypt_stream(data, &mut out, data.len() as u64, None).unwrap();
        out
    }

    fn decrypt(cipher: &ChunkCipher, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut out = Vec::new();
        cipher.decrypt_stream(data, &mut out, data.len() as u64, None)?;
        Ok(out)
    }

    #[test]
    fn chunk_size_out_of_range_fails() {
        assert!(ChunkCipher::with_chunk_size(&key(1), MIN_CHUNK_SIZE - 1).is_err());
        assert!(ChunkCipher::with_chunk_size(&key(1), MAX_CHUNK_SIZE + 1).is_err());
        assert_eq!(ChunkCipher::new(&key(1)).chunk_size(), DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn empty_input_produces_single_final_token() {
        let cipher = small_cipher(1);
        let tokens: Vec<_> = cipher.encrypt_chunks(&b""[..]).collect::<Result<_, _>>().unwrap();

        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].len(), OVERHEAD);
        assert_eq!(decrypt(&cipher, &tokens[0]).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn exact_multiple_of_chunk_size_has_no_empty_tail() {
        let cipher = small_cipher(1);
        let data = vec![5u8; MIN_CHUNK_SIZE * 2];

        let tokens: Vec<_> = cipher.encrypt_chunks(&data[..]).collect::<Result<_, _>>().unwrap();

        assert_eq!(tokens.len(), 2);
        assert!(tokens.iter().all(|t| t.len() == MIN_CHUNK_SIZE + OVERHEAD));
    }

    #[test]
    fn token_sizes_sum_to_container_size() {
        let cipher = small_cipher(1);
        let data = vec![9u8; MIN_CHUNK_SIZE * 2 + MIN_CHUNK_SIZE / 2];

        let out = encrypt(&cipher, &data);

        assert_eq!(out.len(), data.len() + 3 * OVERHEAD);
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let data = b"attack at dawn".to_vec();
        let out = encrypt(&small_cipher(1), &data);

        let err = decrypt(&small_cipher(2), &out).unwrap_err();
        assert!(matches!(err, CryptoError::Authentication(_)));
    }

    #[test]
    fn every_flipped_byte_is_detected() {
        let cipher = small_cipher(3);
        let data = vec![0x5Au8; 100];
        let out = encrypt(&cipher, &data);

        for i in 0..out.len() {
            let mut corrupted = out.clone();
            corrupted[i] ^= 0x01;
            assert!(decrypt(&cipher, &corrupted).is_err(), "flip at {i} went unnoticed");
        }
    }

    #[test]
    fn reordered_tokens_fail() {
        let cipher = small_cipher(4);
        let mut data = vec![1u8; MIN_CHUNK_SIZE];
        data.extend(vec![2u8; MIN_CHUNK_SIZE]);
        data.extend(vec![3u8; 10]);

        let tokens: Vec<_> = cipher.encrypt_chunks(&data[..]).collect::<Result<_, _>>().unwrap();
        let swapped = [tokens[1].clone(), tokens[0].clone(), tokens[2].clone()].concat();

        assert!(matches!(
            decrypt(&cipher, &swapped),
            Err(CryptoError::Authentication(_))
        ));
    }

    #[test]
    fn dropped_final_token_fails() {
        let cipher = small_cipher(5);
        let data = vec![7u8; MIN_CHUNK_SIZE + 1];

        let tokens: Vec<_> = cipher.encrypt_chunks(&data[..]).collect::<Result<_, _>>().unwrap();

        assert!(matches!(
            decrypt(&cipher, &tokens[0]),
            Err(CryptoError::Authentication("missing final chunk"))
        ));
    }

    #[test]
    fn truncated_container_fails() {
        let cipher = small_cipher(5);
        let out = encrypt(&cipher, b"hello");

        assert!(decrypt(&cipher, &out[..out.len() - 1]).is_err());
        assert!(decrypt(&cipher, &[]).is_err());
    }

    #[test]
    fn trailing_data_fails() {
        let cipher = small_cipher(6);
        let mut out = encrypt(&cipher, b"hello");
        out.push(0);

        assert!(matches!(
            decrypt(&cipher, &out),
            Err(CryptoError::Authentication("data after final chunk"))
        ));
    }

    #[test]
    fn progress_reports_every_chunk() {
        let cipher = small_cipher(7);
        let data = vec![1u8; MIN_CHUNK_SIZE * 3 - 1];
        let mut seen = Vec::new();
        let mut record = |done: u64, total: u64| seen.push((done, total));

        let mut out = Vec::new();
        cipher
            .encrypt_stream(&data[..], &mut out, data.len() as u64, Some(&mut record))
            .unwrap();

        let total = data.len() as u64;
        assert_eq!(
            seen,
            vec![
                (MIN_CHUNK_SIZE as u64, total),
                (2 * MIN_CHUNK_SIZE as u64, total),
                (total, total)
            ]
        );
    }

    #[test]
    fn file_roundtrip_in_place() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &data).unwrap();

        let cipher = small_cipher(8);
        let stats = cipher.encrypt_file(&path, None).unwrap();
        assert_eq!(stats.chunks, 5);
        assert_eq!(fs::metadata(&path).unwrap().len(), stats.bytes_out);
        assert_ne!(fs::read(&path).unwrap(), data);

        cipher.decrypt_file(&path, None).unwrap();
        assert_eq!(fs::read(&path).unwrap(), data);
    }

    #[test]
    fn failed_decrypt_leaves_file_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        fs::write(&path, vec![3u8; 3000]).unwrap();

        small_cipher(1).encrypt_file(&path, None).unwrap();
        let encrypted = fs::read(&path).unwrap();

        assert!(small_cipher(2).decrypt_file(&path, None).is_err());
        assert_eq!(fs::read(&path).unwrap(), encrypted);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn missing_file_is_input_error() {
        let dir = tempdir().unwrap();
        let err = small_cipher(1)
            .encrypt_file(&dir.path().join("nope"), None)
            .unwrap_err();
        assert!(matches!(err, CryptoError::Input(_)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn stream_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..4 * MIN_CHUNK_SIZE)) {
            let cipher = small_cipher(9);
            let out = encrypt(&cipher, &data);
            let chunks = data.len().div_ceil(MIN_CHUNK_SIZE).max(1);

            prop_assert_eq!(out.len(), data.len() + chunks * OVERHEAD);
            prop_assert_eq!(decrypt(&cipher, &out).unwrap(), data);
        }
    }
}
