//! Derivation of obfuscated content delivery URLs.
//!
//! Deezer's CDN addresses a track at a given format by a path that is the
//! AES-128-ECB encryption of the track's content hash, format, id and media
//! version. This module derives such paths and decodes them again.
//!
//! # Layout
//!
//! With `¤` being the single byte `0xA4`:
//!
//! ```text
//! part  = md5 ¤ format ¤ id ¤ media_version
//! plain = md5_hex(part) ¤ part ¤ ...
//! ```
//!
//! `plain` is right-padded with `.` to the next multiple of 16 bytes, a full
//! block of padding being added when it is already aligned. The path is the
//! lowercase hex encoding of the ciphertext.
//!
//! Both directions are pure functions.

use aes::{
    cipher::{BlockDecrypt, BlockEncrypt, KeyInit},
    Aes128, Block,
};
use md5::{Digest, Md5};
use url::Url;

use crate::{
    error::{DownloadError, Result},
    protocol::media::Format,
    track::{Track, TrackId},
};

/// Fixed key of the path cipher.
pub const URL_KEY: &[u8; 16] = b"jo6aey6haid2Teih";

/// Field separator, `¤` in Latin-1.
const SEPARATOR: u8 = 0xA4;

const PAD: u8 = b'.';

const BLOCK_SIZE: usize = 16;

/// Path marker of encrypted deliveries.
const ENCRYPTED_MARKERS: [&str; 2] = ["/mobile/", "/media/"];

/// The fields encoded in a stream path.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct StreamPath {
    pub id: TrackId,
    pub md5_origin: String,
    pub media_version: u32,
    pub format: Format,
}

fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", Md5::digest(data))
}

/// Derives the obfuscated path for a track at a format.
#[must_use]
pub fn derive(id: TrackId, md5_origin: &str, media_version: u32, format: Format) -> String {
    let mut part = Vec::with_capacity(64);
    part.extend_from_slice(md5_origin.as_bytes());
    part.push(SEPARATOR);
    part.extend_from_slice(format.id().to_string().as_bytes());
    part.push(SEPARATOR);
    part.extend_from_slice(id.to_string().as_bytes());
    part.push(SEPARATOR);
    part.extend_from_slice(media_version.to_string().as_bytes());

    let mut plain = Vec::with_capacity(part.len() + 64);
    plain.extend_from_slice(md5_hex(&part).as_bytes());
    plain.push(SEPARATOR);
    plain.extend_from_slice(&part);
    plain.push(SEPARATOR);

    let padding = BLOCK_SIZE - plain.len() % BLOCK_SIZE;
    plain.resize(plain.len() + padding, PAD);

    let cipher = Aes128::new(URL_KEY.into());
    for block in plain.chunks_exact_mut(BLOCK_SIZE) {
        cipher.encrypt_block(Block::from_mut_slice(block));
    }

    hex::encode(plain)
}

/// Decodes a path produced by [`derive`].
///
/// # Errors
///
/// Returns [`DownloadError::MalformedStreamUrl`] when the path is not
/// aligned hex, does not split into the expected fields, or its digest does
/// not match.
pub fn reverse(path: &str) -> Result<StreamPath> {
    let malformed = |reason: &str| DownloadError::MalformedStreamUrl(reason.to_string());

    let mut plain = hex::decode(path)?;
    if plain.is_empty() || plain.len() % BLOCK_SIZE != 0 {
        return Err(malformed("path is not block aligned").into());
    }

    let cipher = Aes128::new(URL_KEY.into());
    for block in plain.chunks_exact_mut(BLOCK_SIZE) {
        cipher.decrypt_block(Block::from_mut_slice(block));
    }

    let fields: Vec<&[u8]> = plain.split(|byte| *byte == SEPARATOR).collect();
    let &[digest, md5_origin, format, id, media_version, pad] = fields.as_slice() else {
        return Err(malformed(&format!("expected 6 fields, got {}", fields.len())).into());
    };

    if pad.is_empty() || pad.iter().any(|byte| *byte != PAD) {
        return Err(malformed("invalid padding").into());
    }

    // part spans from after the digest separator up to the final separator
    let start = digest.len() + 1;
    let end = plain.len() - pad.len() - 1;
    if digest != md5_hex(&plain[start..end]).as_bytes() {
        return Err(malformed("digest mismatch").into());
    }

    let text = |field: &[u8]| {
        std::str::from_utf8(field)
            .map(str::to_owned)
            .map_err(|_| malformed("field is not utf-8"))
    };

    let format = text(format)?
        .parse::<u8>()
        .ok()
        .and_then(Format::from_id)
        .ok_or_else(|| malformed("unknown format"))?;
    let id = text(id)?
        .parse::<TrackId>()
        .map_err(|_| malformed("invalid track id"))?;
    let media_version = text(media_version)?
        .parse::<u32>()
        .map_err(|_| malformed("invalid media version"))?;

    Ok(StreamPath {
        id,
        md5_origin: text(md5_origin)?,
        media_version,
        format,
    })
}

/// Derives the full CDN url of a track at a format.
///
/// # Errors
///
/// Returns [`DownloadError::NotEncoded`] when the track has no content hash.
pub fn url_for(track: &Track, format: Format) -> Result<Url> {
    let Some(shard) = track.md5_origin.chars().next() else {
        return Err(DownloadError::NotEncoded.into());
    };

    let path = derive(track.id, &track.md5_origin, track.media_version, format);
    let url = format!("https://e-cdns-proxy-{shard}.dzcdn.net/mobile/1/{path}");
    Ok(url.parse()?)
}

/// Whether the delivery behind a url is Blowfish encrypted.
#[must_use]
pub fn is_encrypted(url: &Url) -> bool {
    let path = url.path();
    ENCRYPTED_MARKERS.iter().any(|marker| path.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MD5: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn reverse_recovers_derived_fields() {
        for format in [Format::MP3_128, Format::FLAC, Format::MP4_RA3] {
            let path = derive(TrackId(3135556), MD5, 7, format);
            assert_eq!(path.len() % 32, 0);
            assert!(path.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));

            let decoded = reverse(&path).unwrap();
            assert_eq!(decoded.id, TrackId(3135556));
            assert_eq!(decoded.md5_origin, MD5);
            assert_eq!(decoded.media_version, 7);
            assert_eq!(decoded.format, format);
        }
    }

    #[test]
    fn aligned_plaintext_gets_a_full_pad_block() {
        // 71 bytes plus the id digits before padding
        let unaligned = derive(TrackId(12_345_678), MD5, 1, Format::MP3_128);
        assert_eq!(unaligned.len(), 2 * 80);

        let aligned = derive(TrackId(123_456_789), MD5, 1, Format::MP3_128);
        assert_eq!(aligned.len(), 2 * 96);
        assert_eq!(reverse(&aligned).unwrap().id, TrackId(123_456_789));
    }

    #[test]
    fn rejects_malformed_paths() {
        let reason = |path: &str| {
            reverse(path)
                .unwrap_err()
                .download_error()
                .map(DownloadError::reason)
        };

        assert_eq!(reason("zz"), Some("decodeFailed"));
        assert_eq!(reason("abcd"), Some("decodeFailed"));
        assert_eq!(reason(&"00".repeat(32)), Some("decodeFailed"));

        let mut path = derive(TrackId(42), MD5, 1, Format::MP3_320).into_bytes();
        path[0] = if path[0] == b'0' { b'1' } else { b'0' };
        let path = String::from_utf8(path).unwrap();
        assert_eq!(reason(&path), Some("decodeFailed"));
    }

    #[test]
    fn builds_sharded_cdn_urls() {
        let track = Track {
            id: TrackId(42),
            md5_origin: MD5.into(),
            media_version: 2,
            ..Default::default()
        };

        let url = url_for(&track, Format::FLAC).unwrap();
        assert_eq!(url.host_str(), Some("e-cdns-proxy-0.dzcdn.net"));
        assert!(is_encrypted(&url));

        let path = url.path().rsplit('/').next().unwrap();
        assert_eq!(reverse(path).unwrap().format, Format::FLAC);

        let plain: Url = "https://e-cdns-proxy-0.dzcdn.net/api/1/abc".parse().unwrap();
        assert!(!is_encrypted(&plain));
    }

    #[test]
    fn unencoded_tracks_have_no_url() {
        let track = Track::default();
        let err = url_for(&track, Format::MP3_128).unwrap_err();
        assert_eq!(err.download_error(), Some(&DownloadError::NotEncoded));
    }
}
