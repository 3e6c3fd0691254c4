mod common;

use http::StatusCode;
use tokio::fs::File;
use tokio_util::sync::CancellationToken;

use common::{config, payload, track, Asset, FakeTransport};
use dzdl::{
    decrypt::{ChunkCipher, WINDOW_SIZE},
    error::DownloadError,
    protocol::media::Format,
    stream_url,
    transfer::{Transfer, TransferStream},
};

const LEN: usize = 20_000;

/// Serves an encrypted payload that breaks off once at `cut_at` bytes.
fn faulty(transport: &FakeTransport, cut_at: usize) -> (url::Url, Vec<u8>) {
    let item = track(1, &[]);
    let plain = payload(LEN);
    let url = transport.serve(&item, Format::MP3_320, &plain);
    transport.insert(
        url.clone(),
        Asset::Bytes {
            data: common::encrypt(&plain, item.id).into(),
            faults: 1,
            cut_at,
        },
    );
    (url, plain)
}

fn cipher(url: &url::Url) -> ChunkCipher {
    ChunkCipher::new(track(1, &[]).id, stream_url::is_encrypted(url))
}

#[tokio::test]
async fn resumes_at_a_window_boundary_after_a_fault() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("track.mp3");
    let config = config(dir.path());

    let transport = FakeTransport::new();
    let (url, plain) = faulty(&transport, 10_000);

    let mut reported = Vec::new();
    let mut progress = |done: u64, total: u64| reported.push((done, total));

    let mut sink = File::create(&path).await.unwrap();
    let transfer = TransferStream::new(&transport, &config)
        .run(
            &url,
            &mut sink,
            0,
            cipher(&url),
            &CancellationToken::new(),
            &mut progress,
        )
        .await
        .unwrap();
    drop(sink);

    assert_eq!(transfer, Transfer::Complete { bytes: LEN as u64 });
    assert_eq!(std::fs::read(&path).unwrap(), plain);

    // the partial window of the broken attempt is fetched again
    assert_eq!(
        *transport.fetches.lock().unwrap(),
        [0, WINDOW_SIZE as u64]
    );

    assert_eq!(reported.last(), Some(&(LEN as u64, LEN as u64)));
    assert!(reported.windows(2).all(|pair| pair[0].0 <= pair[1].0));
}

#[tokio::test]
async fn body_ending_early_resumes_at_a_window_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("track.mp3");
    let config = config(dir.path());

    let mut transport = FakeTransport::new();
    transport.clean_cuts = true;
    let (url, plain) = faulty(&transport, 10_000);

    let mut sink = File::create(&path).await.unwrap();
    let transfer = TransferStream::new(&transport, &config)
        .run(
            &url,
            &mut sink,
            0,
            cipher(&url),
            &CancellationToken::new(),
            &mut |_, _| {},
        )
        .await
        .unwrap();
    drop(sink);

    assert_eq!(transfer, Transfer::Complete { bytes: LEN as u64 });
    assert_eq!(std::fs::read(&path).unwrap(), plain);
    // the partial window before the clean end is dropped, not written
    assert_eq!(
        *transport.fetches.lock().unwrap(),
        [0, WINDOW_SIZE as u64]
    );
}

#[tokio::test]
async fn restarts_when_the_server_ignores_ranges() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("track.mp3");
    let config = config(dir.path());

    let mut transport = FakeTransport::new();
    transport.ignore_ranges = true;
    let (url, plain) = faulty(&transport, 10_000);

    let mut sink = File::create(&path).await.unwrap();
    let transfer = TransferStream::new(&transport, &config)
        .run(
            &url,
            &mut sink,
            0,
            cipher(&url),
            &CancellationToken::new(),
            &mut |_, _| {},
        )
        .await
        .unwrap();
    drop(sink);

    assert_eq!(transfer, Transfer::Complete { bytes: LEN as u64 });
    assert_eq!(std::fs::read(&path).unwrap(), plain);
}

#[tokio::test]
async fn persistent_faults_exhaust_the_retries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("track.mp3");
    let config = config(dir.path());

    let transport = FakeTransport::new();
    let item = track(1, &[]);
    let url = stream_url::url_for(&item, Format::MP3_320).unwrap();
    transport.insert(
        url.clone(),
        Asset::Bytes {
            data: common::encrypt(&payload(LEN), item.id).into(),
            faults: usize::MAX,
            cut_at: 0,
        },
    );

    let mut sink = File::create(&path).await.unwrap();
    let err = TransferStream::new(&transport, &config)
        .run(
            &url,
            &mut sink,
            0,
            cipher(&url),
            &CancellationToken::new(),
            &mut |_, _| {},
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err.download_error(),
        Some(DownloadError::NotAvailable(_))
    ));
    // retried from the start, since no window was ever confirmed
    let fetches = transport.fetches.lock().unwrap();
    assert!(fetches.len() > 1);
    assert!(fetches.iter().all(|offset| *offset == 0));
}

#[tokio::test]
async fn refused_assets_are_not_available() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("track.mp3");
    let config = config(dir.path());

    let transport = FakeTransport::new();
    let item = track(1, &[]);
    transport.refuse(&item, Format::MP3_320, StatusCode::NOT_FOUND);
    let url = stream_url::url_for(&item, Format::MP3_320).unwrap();

    let mut sink = File::create(&path).await.unwrap();
    let err = TransferStream::new(&transport, &config)
        .run(
            &url,
            &mut sink,
            0,
            cipher(&url),
            &CancellationToken::new(),
            &mut |_, _| {},
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err.download_error(),
        Some(DownloadError::NotAvailable(_))
    ));
    // refusals are not retried
    assert_eq!(transport.fetches.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn cancellation_stops_at_a_window() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("track.mp3");
    let config = config(dir.path());

    let transport = FakeTransport::new();
    let item = track(1, &[]);
    let url = transport.serve(&item, Format::MP3_320, &payload(LEN));

    let cancel = CancellationToken::new();
    let mut progress = |done: u64, _total: u64| {
        if done >= WINDOW_SIZE as u64 {
            cancel.cancel();
        }
    };

    let mut sink = File::create(&path).await.unwrap();
    let transfer = TransferStream::new(&transport, &config)
        .run(&url, &mut sink, 0, cipher(&url), &cancel, &mut progress)
        .await
        .unwrap();

    assert_eq!(
        transfer,
        Transfer::Cancelled {
            bytes: WINDOW_SIZE as u64
        }
    );
}
