//! Track decryption for Deezer's protected media content.
//!
//! This module decrypts Deezer tracks while they stream in:
//! * Processes data in windows of three 2KB blocks
//! * Decrypts the first block of every window
//! * Strips the synchronization pad that precedes the payload
//!
//! # Encryption Format
//!
//! Deezer uses a striped encryption pattern:
//! * Content is divided into 2KB blocks
//! * Every third block is encrypted, starting with the first
//! * Encryption uses Blowfish in CBC mode
//! * A fixed IV is used, and the cipher is reset for every block
//! * A trailing block shorter than 2KB is never encrypted
//!
//! # Leading Pad
//!
//! Some deliveries start with a run of zero bytes. These are stripped from
//! the very first window only. MP4 payloads are left untouched because
//! their first box header legitimately starts with zero bytes.
//!
//! # Back-pressure
//!
//! [`decrypt`] is pull-based: it reads from its source only when its
//! consumer asks for the next window, and holds at most one window.
//!
//! # Examples
//!
//! ```rust
//! use dzdl::decrypt::{self, ChunkCipher};
//!
//! let cipher = ChunkCipher::new(track.id, true);
//! let mut windows = decrypt::decrypt(response.body, cipher);
//! while let Some(window) = windows.try_next().await? {
//!     sink.write_all(&window.data).await?;
//! }
//! ```

use std::ops::Deref;

use blowfish::{
    cipher::{BlockDecryptMut, KeyIvInit},
    Blowfish,
};
use bytes::{Bytes, BytesMut};
use cbc::cipher::block_padding::NoPadding;
use futures_util::{
    stream::{self, Stream},
    StreamExt,
};
use md5::{Digest, Md5};

use crate::{
    error::{DownloadError, Error, Result},
    track::TrackId,
};

/// Length of decryption keys in bytes.
pub const KEY_LENGTH: usize = 16;

/// Raw key bytes.
pub type RawKey = [u8; KEY_LENGTH];

/// Embedded secret mixed into every track key.
pub const SECRET: &RawKey = b"g4el58wc0zvf9na1";

/// Fixed IV for CBC decryption.
pub const CBC_BF_IV: &[u8; 8] = b"\x00\x01\x02\x03\x04\x05\x06\x07";

/// Size of each block in bytes (2KB).
pub const CBC_BLOCK_SIZE: usize = 2 * 1024;

/// Number of blocks in a stripe (3).
///
/// The first block of every stripe is encrypted.
pub const CBC_STRIPE_COUNT: usize = 3;

/// Size of a window: one full stripe.
pub const WINDOW_SIZE: usize = CBC_BLOCK_SIZE * CBC_STRIPE_COUNT;

/// Box type found at bytes 4..8 of MP4 files.
const MP4_FTYP: &[u8; 4] = b"ftyp";

/// Validated decryption key.
///
/// Ensures keys are the correct length for use with Blowfish.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Key(RawKey);

impl Deref for Key {
    type Target = RawKey;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Calculates track-specific decryption key.
///
/// The key is derived using:
/// 1. MD5 hash of track ID, as lowercase hex
/// 2. XOR of both halves of the hash with the embedded secret
#[must_use]
pub fn key_for_track_id(track_id: TrackId) -> Key {
    let track_hash = format!("{:x}", Md5::digest(track_id.to_string()));
    let track_hash = track_hash.as_bytes();

    let mut key = RawKey::default();
    for i in 0..KEY_LENGTH {
        key[i] = track_hash[i] ^ track_hash[i + KEY_LENGTH] ^ SECRET[i];
    }
    Key(key)
}

/// One processed window.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Window {
    /// Number of source bytes this window was made of.
    pub source_len: usize,

    /// Decrypted bytes, without any leading pad.
    pub data: Bytes,
}

/// Per-download decryption state.
#[derive(Clone, Debug)]
pub struct ChunkCipher {
    /// `None` for plain deliveries.
    key: Option<Key>,

    /// Whether the leading pad has been dealt with.
    stripped: bool,
}

impl ChunkCipher {
    /// Creates the cipher for a track. When `encrypted` is false, windows
    /// pass through undecrypted but the pad is still stripped.
    #[must_use]
    pub fn new(track_id: TrackId, encrypted: bool) -> Self {
        Self {
            key: encrypted.then(|| key_for_track_id(track_id)),
            stripped: false,
        }
    }

    /// Marks the stream as resumed mid-way: no pad is stripped anymore.
    #[must_use]
    pub fn resumed(mut self) -> Self {
        self.stripped = true;
        self
    }

    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.key.is_some()
    }

    /// Processes one window of source bytes in place.
    ///
    /// `window` must be at most [`WINDOW_SIZE`] long. Only a full first
    /// block is decrypted.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::DecryptionFailed`] when the cipher fails and
    /// [`DownloadError::LeadingPad`] when the first window holds nothing but
    /// zero bytes.
    pub fn process(&mut self, mut window: BytesMut) -> Result<Window> {
        debug_assert!(window.len() <= WINDOW_SIZE);
        let source_len = window.len();

        if let Some(key) = self.key {
            if window.len() >= CBC_BLOCK_SIZE {
                // The state of the cipher is reset on each window.
                let cipher = cbc::Decryptor::<Blowfish>::new_from_slices(&*key, CBC_BF_IV)?;

                // Decrypt the block in-place. The block size is a multiple of
                // the Blowfish block size, so no padding is necessary.
                cipher
                    .decrypt_padded_mut::<NoPadding>(&mut window[..CBC_BLOCK_SIZE])
                    .map_err(|e| DownloadError::DecryptionFailed(e.to_string()))?;
            }
        }

        if !self.stripped {
            self.stripped = true;

            let is_mp4 = window.get(4..8) == Some(MP4_FTYP.as_slice());
            if !is_mp4 {
                let pad = window.iter().take_while(|byte| **byte == 0).count();
                if pad > 0 && pad == window.len() {
                    return Err(DownloadError::LeadingPad(pad).into());
                }
                if pad > 0 {
                    trace!("stripping {pad} bytes of leading pad");
                    let _ = window.split_to(pad);
                }
            }
        }

        Ok(Window {
            source_len,
            data: window.freeze(),
        })
    }
}

/// Decrypts a byte stream window by window.
///
/// The source may deliver chunks of any size; they are regrouped into
/// windows of [`WINDOW_SIZE`] bytes. Errors from the source are passed on
/// after all complete windows before them have been yielded.
pub fn decrypt<S>(source: S, cipher: ChunkCipher) -> impl Stream<Item = Result<Window>>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    let state = (source, cipher, BytesMut::with_capacity(WINDOW_SIZE), false);

    stream::try_unfold(
        state,
        |(mut source, mut cipher, mut buffer, mut done)| async move {
            while !done && buffer.len() < WINDOW_SIZE {
                match source.next().await {
                    Some(chunk) => buffer.extend_from_slice(&chunk?),
                    None => done = true,
                }
            }

            if buffer.is_empty() {
                return Ok(None);
            }

            let len = usize::min(buffer.len(), WINDOW_SIZE);
            let window = cipher.process(buffer.split_to(len))?;
            Ok::<_, Error>(Some((window, (source, cipher, buffer, done))))
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use blowfish::cipher::BlockEncryptMut;
    use futures_util::TryStreamExt;

    const TRACK: TrackId = TrackId(3_135_556);

    /// Encrypts the first block of every full window, as the CDN does.
    fn encrypt(plain: &[u8], track_id: TrackId) -> Vec<u8> {
        let key = key_for_track_id(track_id);
        let mut data = plain.to_vec();
        for window in data.chunks_mut(WINDOW_SIZE) {
            if window.len() >= CBC_BLOCK_SIZE {
                let cipher = cbc::Encryptor::<Blowfish>::new_from_slices(&*key, CBC_BF_IV).unwrap();
                cipher
                    .encrypt_padded_mut::<NoPadding>(&mut window[..CBC_BLOCK_SIZE], CBC_BLOCK_SIZE)
                    .unwrap();
            }
        }
        data
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8 + 1).collect()
    }

    fn chunked(data: &[u8], size: usize) -> impl Stream<Item = Result<Bytes>> + Unpin {
        let chunks: Vec<Result<Bytes>> = data
            .chunks(size)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        stream::iter(chunks)
    }

    async fn collect(source: &[u8], chunk_size: usize, cipher: ChunkCipher) -> Result<Vec<u8>> {
        let windows: Vec<Window> = decrypt(chunked(source, chunk_size), cipher)
            .try_collect()
            .await?;
        Ok(windows.iter().flat_map(|w| w.data.iter().copied()).collect())
    }

    #[test]
    fn key_mixes_hash_halves_with_secret() {
        let hash = format!("{:x}", Md5::digest(b"3135556"));
        let hash = hash.as_bytes();
        let key = key_for_track_id(TRACK);
        for i in 0..KEY_LENGTH {
            assert_eq!(key[i], hash[i] ^ hash[i + 16] ^ SECRET[i]);
        }
    }

    #[tokio::test]
    async fn decrypts_first_block_of_each_window() {
        // two full windows and a tail that still holds a full block
        let plain = payload(2 * WINDOW_SIZE + CBC_BLOCK_SIZE + 100);
        let encrypted = encrypt(&plain, TRACK);
        assert_ne!(plain[..CBC_BLOCK_SIZE], encrypted[..CBC_BLOCK_SIZE]);
        assert_eq!(plain[CBC_BLOCK_SIZE..WINDOW_SIZE], encrypted[CBC_BLOCK_SIZE..WINDOW_SIZE]);

        for chunk_size in [1000, WINDOW_SIZE, 10_000] {
            let out = collect(&encrypted, chunk_size, ChunkCipher::new(TRACK, true))
                .await
                .unwrap();
            assert_eq!(out, plain, "chunk size {chunk_size}");
        }
    }

    #[tokio::test]
    async fn short_final_window_passes_through() {
        let plain = payload(WINDOW_SIZE + 500);
        let mut source = encrypt(&plain[..WINDOW_SIZE], TRACK);
        source.extend_from_slice(&plain[WINDOW_SIZE..]);

        let out = collect(&source, 4096, ChunkCipher::new(TRACK, true))
            .await
            .unwrap();
        assert_eq!(out, plain);
    }

    #[tokio::test]
    async fn strips_leading_pad_from_first_window_only() {
        let mut plain = vec![0; 10];
        plain.extend(payload(WINDOW_SIZE - 10));
        // zero bytes at the start of the second window are payload
        plain.extend(vec![0; 20]);
        plain.extend(payload(100));

        let out = collect(&plain, 512, ChunkCipher::new(TRACK, false))
            .await
            .unwrap();
        assert_eq!(out, plain[10..]);

        let resumed = collect(&plain, 512, ChunkCipher::new(TRACK, false).resumed())
            .await
            .unwrap();
        assert_eq!(resumed, plain);
    }

    #[tokio::test]
    async fn mp4_header_is_not_stripped() {
        let mut plain = vec![0, 0, 0, 0x20];
        plain.extend_from_slice(b"ftypisom");
        plain.extend(payload(300));

        let out = collect(&plain, 64, ChunkCipher::new(TRACK, false))
            .await
            .unwrap();
        assert_eq!(out, plain);
    }

    #[tokio::test]
    async fn all_zero_first_window_is_a_fault() {
        let err = collect(&[0; 100], 64, ChunkCipher::new(TRACK, false))
            .await
            .unwrap_err();
        assert_eq!(err.download_error(), Some(&DownloadError::LeadingPad(100)));
    }

    #[tokio::test]
    async fn reports_source_lengths() {
        let plain = payload(WINDOW_SIZE + 7);
        let windows: Vec<Window> = decrypt(chunked(&plain, 4000), ChunkCipher::new(TRACK, false))
            .try_collect()
            .await
            .unwrap();
        let lengths: Vec<usize> = windows.iter().map(|w| w.source_len).collect();
        assert_eq!(lengths, [WINDOW_SIZE, 7]);
    }
}
