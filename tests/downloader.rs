mod common;

use std::{collections::HashSet, sync::Arc};

use tokio_util::sync::CancellationToken;

use common::{config, payload, track, Asset, FakeCatalog, FakeTransport, Recorder};
use dzdl::{
    downloader::Downloader,
    events::{Event, ItemState, Listener, Remedy},
    item::{BatchState, DownloadObject, Kind},
    protocol::media::Format,
    resolver::License,
    tagger::NoopTagger,
    track::TrackId,
};

fn downloader(
    transport: FakeTransport,
    catalog: FakeCatalog,
    recorder: &Arc<Recorder>,
    config: dzdl::config::Config,
) -> Downloader<FakeTransport, FakeCatalog, NoopTagger> {
    let listener: Arc<dyn Listener> = Arc::clone(recorder) as Arc<dyn Listener>;
    Downloader::new(
        transport,
        catalog,
        NoopTagger,
        listener,
        Arc::new(config),
        License::default(),
    )
}

fn ids(range: std::ops::RangeInclusive<i64>) -> Vec<TrackId> {
    range.map(TrackId).collect()
}

#[tokio::test]
async fn collection_isolates_failures() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.max_concurrent = 3;

    let transport = FakeTransport::new();
    let catalog = FakeCatalog::new();
    let mut expected = Vec::new();

    for id in 1..=10 {
        let mut item = track(id, &[]);
        let plain = payload(5_000 * usize::try_from(id).unwrap());
        match id {
            // not in the catalog at all
            4 | 7 => {
                expected.push(None);
                continue;
            }
            // not encoded, and nothing to substitute it with
            9 => {
                item.md5_origin.clear();
                expected.push(None);
            }
            _ => {
                transport.serve(&item, Format::MP3_320, &plain);
                expected.push(Some(plain));
            }
        }
        catalog.insert(item);
    }

    let recorder = Arc::new(Recorder::default());
    let downloader = downloader(transport, catalog, &recorder, config);
    let object = DownloadObject::collection(Kind::Album, "42", Format::MP3_320, ids(1..=10));
    let summary = downloader.download(&object).await.unwrap();

    assert_eq!(summary.state, BatchState::Completed);
    assert_eq!(summary.downloaded, 7);
    assert_eq!(summary.failed, 3);
    assert_eq!(summary.canceled, 0);
    assert!(!summary.is_complete());

    let mut failed: Vec<_> = summary.errors.iter().map(|record| record.track.id).collect();
    failed.sort();
    assert_eq!(failed, [TrackId(4), TrackId(7), TrackId(9)]);
    assert!(summary
        .errors
        .iter()
        .any(|record| record.reason == "notEncoded"));

    for (file, plain) in summary.files.iter().zip(&expected) {
        match (file, plain) {
            (Some(path), Some(plain)) => assert_eq!(&std::fs::read(path).unwrap(), plain),
            (None, None) => {}
            (file, _) => panic!("unexpected file {file:?}"),
        }
    }

    assert_eq!(recorder.count(|e| matches!(e, Event::Started { .. })), 1);
    assert_eq!(recorder.count(|e| matches!(e, Event::Finished { .. })), 1);
    assert_eq!(recorder.count(|e| matches!(e, Event::Failed { .. })), 3);
    assert_eq!(recorder.count(|e| matches!(e, Event::Saved { .. })), 7);

    let progress: Vec<_> = recorder
        .events()
        .into_iter()
        .filter_map(|event| match event {
            Event::Progress { progress, .. } => Some(progress),
            _ => None,
        })
        .collect();
    assert!(progress.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(progress.last(), Some(&100));
}

#[tokio::test]
async fn existing_files_are_not_downloaded_again() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());

    let transport = FakeTransport::new();
    let catalog = FakeCatalog::new();
    let item = track(1, &[]);
    transport.serve(&item, Format::MP3_320, &payload(9_000));
    catalog.insert(item);

    let recorder = Arc::new(Recorder::default());
    let downloader = downloader(transport, catalog, &recorder, config);

    let first = downloader
        .download(&DownloadObject::single(TrackId(1), Format::MP3_320))
        .await
        .unwrap();
    let second = downloader
        .download(&DownloadObject::single(TrackId(1), Format::MP3_320))
        .await
        .unwrap();

    assert!(first.is_complete());
    assert!(second.is_complete());
    assert_eq!(second.downloaded, 1);
    assert_eq!(first.files, second.files);
    assert_eq!(recorder.count(|e| matches!(e, Event::Saved { .. })), 1);
    assert_eq!(
        recorder.count(|e| matches!(
            e,
            Event::State {
                state: ItemState::AlreadyDownloaded,
                ..
            }
        )),
        1
    );
}

#[tokio::test]
async fn failed_transfers_retry_with_the_fallback_recording() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());

    let transport = FakeTransport::new();
    let catalog = FakeCatalog::new();

    // probes fine, but every transfer breaks off
    let mut item = track(1, &[]);
    item.fallback_id = Some(TrackId(2));
    let url = transport.serve(&item, Format::MP3_320, &payload(9_000));
    transport.insert(
        url,
        Asset::Bytes {
            data: common::encrypt(&payload(9_000), item.id).into(),
            faults: usize::MAX,
            cut_at: 0,
        },
    );
    catalog.insert(item);

    let substitute = track(2, &[]);
    let plain = payload(7_000);
    transport.serve(&substitute, Format::MP3_320, &plain);
    catalog.insert(substitute);

    let recorder = Arc::new(Recorder::default());
    let downloader = downloader(transport, catalog, &recorder, config);
    let summary = downloader
        .download(&DownloadObject::single(TrackId(1), Format::MP3_320))
        .await
        .unwrap();

    assert!(summary.is_complete());
    let path = summary.files[0].as_ref().unwrap();
    assert!(path.ends_with("Artist - Title 1.mp3"));
    assert_eq!(std::fs::read(path).unwrap(), plain);

    let warnings: Vec<_> = recorder
        .events()
        .into_iter()
        .filter_map(|event| match event {
            Event::Warning { reason, remedy, .. } => Some((reason, remedy)),
            _ => None,
        })
        .collect();
    assert_eq!(warnings, [("notAvailable", Remedy::Fallback)]);
}

#[tokio::test]
async fn cancellation_removes_partial_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.max_concurrent = 1;

    let transport = FakeTransport::new();
    let catalog = FakeCatalog::new();
    for id in 1..=3 {
        let item = track(id, &[]);
        transport.serve(&item, Format::MP3_320, &payload(20_000));
        catalog.insert(item);
    }

    let cancel = CancellationToken::new();
    let recorder = Arc::new(Recorder {
        cancel_on_download: Some(cancel.clone()),
        ..Default::default()
    });
    let downloader = downloader(transport, catalog, &recorder, config);

    let object = DownloadObject::collection(Kind::Playlist, "7", Format::MP3_320, ids(1..=3))
        .with_cancellation(cancel);
    let summary = downloader.download(&object).await.unwrap();

    assert_eq!(summary.state, BatchState::Canceled);
    assert_eq!(summary.downloaded, 0);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.canceled, 3);
    assert!(summary.files.iter().all(Option::is_none));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

    assert_eq!(recorder.count(|e| matches!(e, Event::Cancelled { .. })), 1);
    assert_eq!(recorder.count(|e| matches!(e, Event::Finished { .. })), 0);
    assert_eq!(recorder.count(|e| matches!(e, Event::Failed { .. })), 0);
}

#[tokio::test]
async fn interrupted_reads_fail_unless_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());

    let transport = FakeTransport::new();
    let catalog = FakeCatalog::new();
    let item = track(1, &[]);
    let url = transport.serve(&item, Format::MP3_320, &payload(9_000));
    transport.insert(url, Asset::Interrupted(9_000));
    catalog.insert(item);

    let recorder = Arc::new(Recorder::default());
    let downloader = downloader(transport, catalog, &recorder, config);
    let summary = downloader
        .download(&DownloadObject::single(TrackId(1), Format::MP3_320))
        .await
        .unwrap();

    assert_eq!(summary.state, BatchState::Completed);
    assert_eq!(summary.downloaded, 0);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.canceled, 0);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].track.id, TrackId(1));
    assert_eq!(recorder.count(|e| matches!(e, Event::Failed { .. })), 1);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn same_titles_in_a_collection_get_their_own_files() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());

    let transport = FakeTransport::new();
    let catalog = FakeCatalog::new();
    let mut expected = Vec::new();
    for id in 1..=2 {
        let mut item = track(id, &[]);
        item.title = String::from("Intro");
        let plain = payload(6_000 + 1_000 * usize::try_from(id).unwrap());
        transport.serve(&item, Format::MP3_320, &plain);
        catalog.insert(item);
        expected.push(plain);
    }

    let recorder = Arc::new(Recorder::default());
    let downloader = downloader(transport, catalog, &recorder, config);
    let object = DownloadObject::collection(Kind::Album, "11", Format::MP3_320, ids(1..=2));
    let summary = downloader.download(&object).await.unwrap();

    assert!(summary.is_complete());
    assert_eq!(summary.downloaded, 2);

    let paths: Vec<_> = summary.files.iter().map(|file| file.clone().unwrap()).collect();
    assert!(paths[0].ends_with("01 - Artist - Intro.mp3"));
    assert!(paths[1].ends_with("02 - Artist - Intro.mp3"));
    assert_eq!(paths.iter().collect::<HashSet<_>>().len(), 2);
    for (path, plain) in paths.iter().zip(&expected) {
        assert_eq!(&std::fs::read(path).unwrap(), plain);
    }
}
