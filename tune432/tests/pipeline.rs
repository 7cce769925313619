mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::*;
use tune432::{Error, ErrorKind, FetchProfile, Role};

#[tokio::test]
async fn test_convert_publishes_only_converted_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(StubFetcher::new(Fetch::Audio { seconds: 1 }));
    let pipeline = pipeline(config(dir.path()), fetcher, Arc::new(CopyTranscoder));

    let conversion = pipeline.convert(TEST_URL).await.unwrap();

    assert_eq!(conversion.title, "Test Song");
    assert_eq!(conversion.artifact.role, Role::Converted);
    assert!(!conversion.artwork_embedded);

    let published = conversion
        .job_id
        .artifact_path(dir.path(), Role::Converted);
    assert_eq!(files_in(dir.path()), vec![published.clone()]);
    assert!(std::fs::metadata(&published).unwrap().len() > 44);
}

#[tokio::test]
async fn test_missing_title_defaults_to_unknown() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(StubFetcher::new(Fetch::Audio { seconds: 1 }).title(Some("   ")));
    let pipeline = pipeline(config(dir.path()), fetcher, Arc::new(CopyTranscoder));

    let conversion = pipeline.convert(TEST_URL).await.unwrap();
    assert_eq!(conversion.title, "unknown");
}

#[tokio::test]
async fn test_disallowed_host_never_reaches_fetcher() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(StubFetcher::new(Fetch::Audio { seconds: 1 }));
    let pipeline = pipeline(
        config(dir.path()),
        Arc::clone(&fetcher),
        Arc::new(CopyTranscoder),
    );

    for url in ["", "ftp://video.example/a", "https://evil.example/watch?v=1"] {
        let report = pipeline.convert(url).await.unwrap_err();
        assert_eq!(report.kind, ErrorKind::InvalidInput, "url {url:?}");
    }
    assert!(fetcher.profiles().is_empty());
}

#[tokio::test]
async fn test_fetch_errors_are_classified() {
    let cases: [(fn() -> Error, ErrorKind); 4] = [
        (
            || Error::Download("ERROR: Sign in to confirm you're not a bot".into()),
            ErrorKind::AuthRequired,
        ),
        (
            || Error::Download("HTTP Error 403: Forbidden".into()),
            ErrorKind::Forbidden,
        ),
        (
            || Error::Download("ERROR: Video unavailable".into()),
            ErrorKind::NotFound,
        ),
        (
            || Error::Download("something odd happened".into()),
            ErrorKind::DownloadError,
        ),
    ];

    for (make, expected) in cases {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(StubFetcher::new(Fetch::Fail(make)));
        let pipeline = pipeline(config(dir.path()), fetcher, Arc::new(CopyTranscoder));

        let report = pipeline.convert(TEST_URL).await.unwrap_err();
        assert_eq!(report.kind, expected);
        assert!(files_in(dir.path()).is_empty());
    }
}

#[tokio::test]
async fn test_fetch_timeout_fires_within_budget() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(StubFetcher::new(Fetch::Hang));
    let budget = Duration::from_millis(200);
    let pipeline = pipeline(
        config(dir.path()).fetch_timeout(budget),
        Arc::clone(&fetcher),
        Arc::new(CopyTranscoder),
    );

    let started = Instant::now();
    let report = pipeline.convert(TEST_URL).await.unwrap_err();
    let elapsed = started.elapsed();

    assert_eq!(report.kind, ErrorKind::Timeout);
    assert!(elapsed >= budget);
    assert!(elapsed < budget + Duration::from_secs(2), "took {elapsed:?}");

    // The abandoned attempt is torn down, not left running.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fetcher.dropped.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_fetch_timeout_retries_once_with_reduced_profile() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(StubFetcher::new(Fetch::HangUnlessReduced { seconds: 1 }));
    let pipeline = pipeline(
        config(dir.path())
            .fetch_timeout(Duration::from_millis(200))
            .fetch_fallback(true),
        Arc::clone(&fetcher),
        Arc::new(CopyTranscoder),
    );

    let conversion = pipeline.convert(TEST_URL).await.unwrap();

    assert_eq!(
        fetcher.profiles(),
        vec![FetchProfile::Full, FetchProfile::Reduced]
    );
    let published = conversion
        .job_id
        .artifact_path(dir.path(), Role::Converted);
    assert_eq!(files_in(dir.path()), vec![published]);
}

#[tokio::test]
async fn test_fallback_gives_up_after_second_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(StubFetcher::new(Fetch::Hang));
    let pipeline = pipeline(
        config(dir.path())
            .fetch_timeout(Duration::from_millis(100))
            .fetch_fallback(true),
        Arc::clone(&fetcher),
        Arc::new(CopyTranscoder),
    );

    let report = pipeline.convert(TEST_URL).await.unwrap_err();
    assert_eq!(report.kind, ErrorKind::Timeout);
    assert_eq!(fetcher.profiles().len(), 2);
}

#[tokio::test]
async fn test_transcode_failure_removes_original() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(StubFetcher::new(Fetch::Audio { seconds: 1 }));
    let pipeline = pipeline(config(dir.path()), fetcher, Arc::new(FailingTranscoder));

    let report = pipeline.convert(TEST_URL).await.unwrap_err();
    assert_eq!(report.kind, ErrorKind::TranscodeError);
    assert!(files_in(dir.path()).is_empty());
}

#[tokio::test]
async fn test_empty_transcode_output_is_transcode_error() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(StubFetcher::new(Fetch::Audio { seconds: 1 }));
    let pipeline = pipeline(config(dir.path()), fetcher, Arc::new(EmptyTranscoder));

    let report = pipeline.convert(TEST_URL).await.unwrap_err();
    assert_eq!(report.kind, ErrorKind::TranscodeError);
    assert!(files_in(dir.path()).is_empty());
}

#[tokio::test]
async fn test_transcode_timeout_is_transcode_error() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(StubFetcher::new(Fetch::Audio { seconds: 1 }));
    let pipeline = pipeline(
        config(dir.path()).transcode_timeout(Duration::from_millis(100)),
        fetcher,
        Arc::new(SlowTranscoder),
    );

    let report = pipeline.convert(TEST_URL).await.unwrap_err();
    assert_eq!(report.kind, ErrorKind::TranscodeError);
    assert!(files_in(dir.path()).is_empty());
}

#[tokio::test]
async fn test_embed_failure_still_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let cover = serve_image(512).await;
    let fetcher = Arc::new(StubFetcher::new(Fetch::Audio { seconds: 1 }).thumbnail(&cover));
    let pipeline = pipeline(config(dir.path()), fetcher, Arc::new(CopyTranscoder))
        .artwork_embedder(Some(Arc::new(FailingEmbedder)))
        .http_client(local_client());

    let conversion = pipeline.convert(TEST_URL).await.unwrap();

    assert!(!conversion.artwork_embedded);
    let published = conversion
        .job_id
        .artifact_path(dir.path(), Role::Converted);
    assert_eq!(files_in(dir.path()), vec![published.clone()]);
    assert_ne!(std::fs::read(&published).unwrap(), b"partial");
}

#[tokio::test]
async fn test_cover_download_failure_still_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    // Nothing listens on the discard port, so the image download fails.
    let fetcher = Arc::new(
        StubFetcher::new(Fetch::Audio { seconds: 1 }).thumbnail("http://127.0.0.1:9/cover.jpg"),
    );
    let pipeline = pipeline(config(dir.path()), fetcher, Arc::new(CopyTranscoder))
        .artwork_embedder(Some(Arc::new(FailingEmbedder)));

    let conversion = pipeline.convert(TEST_URL).await.unwrap();

    assert!(!conversion.artwork_embedded);
    let published = conversion
        .job_id
        .artifact_path(dir.path(), Role::Converted);
    assert_eq!(files_in(dir.path()), vec![published]);
}

#[tokio::test]
async fn test_size_limit_rejects_large_download() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(StubFetcher::new(Fetch::Audio { seconds: 2 }));
    let pipeline = pipeline(
        config(dir.path()).max_filesize(Some(1024)),
        fetcher,
        Arc::new(CopyTranscoder),
    );

    let report = pipeline.convert(TEST_URL).await.unwrap_err();
    assert_eq!(report.kind, ErrorKind::SizeLimitExceeded);
    assert!(files_in(dir.path()).is_empty());
}

#[tokio::test]
async fn test_duration_limit_rejects_long_source() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(StubFetcher::new(Fetch::Audio { seconds: 3 }));
    let pipeline = pipeline(
        config(dir.path()).max_duration(Some(Duration::from_secs(2))),
        fetcher,
        Arc::new(CopyTranscoder),
    );

    let report = pipeline.convert(TEST_URL).await.unwrap_err();
    assert_eq!(report.kind, ErrorKind::SizeLimitExceeded);
}

#[tokio::test]
async fn test_release_after_conversion_clears_job() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(StubFetcher::new(Fetch::Audio { seconds: 1 }));
    let pipeline = pipeline(config(dir.path()), fetcher, Arc::new(CopyTranscoder));

    let conversion = pipeline.convert(TEST_URL).await.unwrap();
    let removed = pipeline.store().release(conversion.job_id).await.unwrap();

    assert_eq!(removed, 1);
    assert!(files_in(dir.path()).is_empty());
    assert!(matches!(
        pipeline.store().locate(conversion.artifact).await,
        Err(Error::ArtifactNotFound(_))
    ));
}

#[tokio::test]
async fn test_concurrent_conversions_keep_separate_files() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(StubFetcher::new(Fetch::Audio { seconds: 1 }));
    let pipeline = pipeline(config(dir.path()), fetcher, Arc::new(CopyTranscoder));

    let (a, b) = tokio::join!(pipeline.convert(TEST_URL), pipeline.convert(TEST_URL));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_ne!(a.job_id, b.job_id);
    assert_eq!(files_in(dir.path()).len(), 2);
}

#[tokio::test]
async fn test_info_uses_probe() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(StubFetcher::new(Fetch::Audio { seconds: 1 }));
    let pipeline = pipeline(config(dir.path()), fetcher, Arc::new(CopyTranscoder));

    let info = pipeline.info(TEST_URL).await.unwrap();
    assert_eq!(info.title.as_deref(), Some("Test Song"));

    let report = pipeline.info("https://other.example/x").await.unwrap_err();
    assert_eq!(report.kind, ErrorKind::InvalidInput);
}
