// Copyright (c) 2026 VeriML Contributors
// SPDX-License-Identifier: Apache-2.0

//! Streaming artifact codec.
//!
//! Encrypted artifacts are framed so that blobs of arbitrary size stream
//! through without full buffering: a fixed header (magic, version, algorithm,
//! base nonce) followed by length-prefixed AES-256-GCM frames. Each frame
//! seals at most [`CHUNK_LEN`] plaintext bytes under a nonce derived from the
//! base nonce and the frame counter, so reordering or truncating frames fails
//! authentication.

use std::io::{Read, Write};

use rand::rngs::OsRng;
use rand::RngCore;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey};
use thiserror::Error;

const ARTIFACT_MAGIC: [u8; 4] = *b"VMA1";
const ARTIFACT_VERSION: u8 = 1;
const ARTIFACT_ALG_AES_256_GCM: u8 = 1;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Plaintext bytes per frame.
pub const CHUNK_LEN: usize = 64 * 1024;

const HEADER_LEN: usize = 4 + 1 + 1 + NONCE_LEN;
const MAX_FRAME_LEN: usize = CHUNK_LEN + TAG_LEN;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact header is malformed or unsupported")]
    BadHeader,
    #[error("artifact nonce does not match the registered model nonce")]
    NonceMismatch,
    #[error("artifact is truncated mid-frame")]
    Truncated,
    #[error("artifact frame length {0} exceeds the maximum")]
    FrameTooLarge(u32),
    #[error("artifact authentication failed")]
    AuthFailed,
    #[error("invalid artifact key material")]
    InvalidKey,
    #[error("artifact io: {0}")]
    Io(#[from] std::io::Error),
}

/// Generates a fresh per-model key and base nonce from the OS CSPRNG.
pub fn generate_key() -> ([u8; KEY_LEN], [u8; NONCE_LEN]) {
    let mut key = [0u8; KEY_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut key);
    OsRng.fill_bytes(&mut nonce);
    (key, nonce)
}

fn make_cipher(key: &[u8; KEY_LEN]) -> Result<LessSafeKey, ArtifactError> {
    let unbound =
        UnboundKey::new(&aead::AES_256_GCM, key).map_err(|_| ArtifactError::InvalidKey)?;
    Ok(LessSafeKey::new(unbound))
}

// Frame nonce: base nonce with the counter XORed into the trailing 8 bytes.
fn frame_nonce(base: &[u8; NONCE_LEN], counter: u64) -> Nonce {
    let mut bytes = *base;
    let ctr = counter.to_be_bytes();
    for (dst, src) in bytes[NONCE_LEN - 8..].iter_mut().zip(ctr.iter()) {
        *dst ^= *src;
    }
    Nonce::assume_unique_for_key(bytes)
}

/// Encrypts `reader` into `writer` as a framed artifact stream.
pub fn encrypt_stream<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    key: &[u8; KEY_LEN],
    base_nonce: &[u8; NONCE_LEN],
) -> Result<(), ArtifactError> {
    let cipher = make_cipher(key)?;

    writer.write_all(&ARTIFACT_MAGIC)?;
    writer.write_all(&[ARTIFACT_VERSION, ARTIFACT_ALG_AES_256_GCM])?;
    writer.write_all(base_nonce)?;

    let mut chunk = vec![0u8; CHUNK_LEN];
    let mut counter = 0u64;
    loop {
        let filled = read_chunk(reader, &mut chunk)?;
        if filled == 0 {
            break;
        }
        let mut in_out = chunk[..filled].to_vec();
        in_out.reserve(TAG_LEN);
        cipher
            .seal_in_place_append_tag(frame_nonce(base_nonce, counter), Aad::empty(), &mut in_out)
            .map_err(|_| ArtifactError::InvalidKey)?;
        let frame_len = in_out.len() as u32;
        writer.write_all(&frame_len.to_be_bytes())?;
        writer.write_all(&in_out)?;
        counter += 1;
        if filled < CHUNK_LEN {
            break;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Decrypts a framed artifact stream from `reader` into `writer`.
///
/// `expected_nonce` is the base nonce stored in the model record; a header
/// carrying a different nonce is rejected before any frame is opened, so
/// decrypting with mismatched key material fails deterministically.
pub fn decrypt_stream<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    key: &[u8; KEY_LEN],
    expected_nonce: &[u8; NONCE_LEN],
) -> Result<u64, ArtifactError> {
    let cipher = make_cipher(key)?;

    let mut header = [0u8; HEADER_LEN];
    read_exact_or(reader, &mut header, ArtifactError::BadHeader)?;
    if header[0..4] != ARTIFACT_MAGIC
        || header[4] != ARTIFACT_VERSION
        || header[5] != ARTIFACT_ALG_AES_256_GCM
    {
        return Err(ArtifactError::BadHeader);
    }
    if header[6..] != expected_nonce[..] {
        return Err(ArtifactError::NonceMismatch);
    }

    let mut total = 0u64;
    let mut counter = 0u64;
    loop {
        let mut len_bytes = [0u8; 4];
        match read_exact_or_eof(reader, &mut len_bytes)? {
            FrameHeader::Eof => break,
            FrameHeader::Present => {}
        }
        let frame_len = u32::from_be_bytes(len_bytes);
        if frame_len as usize > MAX_FRAME_LEN || (frame_len as usize) < TAG_LEN {
            return Err(ArtifactError::FrameTooLarge(frame_len));
        }
        let mut in_out = vec![0u8; frame_len as usize];
        read_exact_or(reader, &mut in_out, ArtifactError::Truncated)?;
        let plain = cipher
            .open_in_place(frame_nonce(expected_nonce, counter), Aad::empty(), &mut in_out)
            .map_err(|_| ArtifactError::AuthFailed)?;
        writer.write_all(plain)?;
        total += plain.len() as u64;
        counter += 1;
    }
    writer.flush()?;
    Ok(total)
}

/// One-shot convenience wrapper over [`encrypt_stream`].
pub fn encrypt(
    plaintext: &[u8],
    key: &[u8; KEY_LEN],
    base_nonce: &[u8; NONCE_LEN],
) -> Result<Vec<u8>, ArtifactError> {
    let mut out = Vec::with_capacity(HEADER_LEN + plaintext.len() + TAG_LEN);
    encrypt_stream(&mut &plaintext[..], &mut out, key, base_nonce)?;
    Ok(out)
}

/// One-shot convenience wrapper over [`decrypt_stream`].
pub fn decrypt(
    ciphertext: &[u8],
    key: &[u8; KEY_LEN],
    base_nonce: &[u8; NONCE_LEN],
) -> Result<Vec<u8>, ArtifactError> {
    let mut out = Vec::with_capacity(ciphertext.len().saturating_sub(HEADER_LEN));
    decrypt_stream(&mut &ciphertext[..], &mut out, key, base_nonce)?;
    Ok(out)
}

enum FrameHeader {
    Present,
    Eof,
}

fn read_chunk<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, ArtifactError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn read_exact_or<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    on_eof: ArtifactError,
) -> Result<(), ArtifactError> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => Err(on_eof),
        Err(err) => Err(ArtifactError::Io(err)),
    }
}

// Distinguishes a clean end-of-stream from a torn frame length prefix.
fn read_exact_or_eof<R: Read>(
    reader: &mut R,
    buf: &mut [u8; 4],
) -> Result<FrameHeader, ArtifactError> {
    let first = reader.read(&mut buf[..1])?;
    if first == 0 {
        return Ok(FrameHeader::Eof);
    }
    read_exact_or(reader, &mut buf[1..], ArtifactError::Truncated)?;
    Ok(FrameHeader::Present)
}
