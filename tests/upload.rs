//! Upload scenarios against a simulated server.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{form_field, source_file, Event, MockTransport, Reply};
use gfile::{ChunkRetryPolicy, GfileError, Session, TransferConfig, TransferProgress, UploadOutcome};

const MIB: usize = 1024 * 1024;
const SHARE_URL: &str = "https://46.gigafile.nu/1020-abcdef";

fn config(chunk_size: u64, workers: usize) -> TransferConfig {
    TransferConfig {
        chunk_size,
        chunk_copy_size: 64 * 1024,
        chunk_retry: ChunkRetryPolicy::bounded(5, Duration::from_millis(1)),
        ..TransferConfig::default()
    }
    .with_workers(workers)
}

fn position(events: &[Event], event: &Event) -> usize {
    events
        .iter()
        .position(|e| e == event)
        .unwrap_or_else(|| panic!("missing {event:?}"))
}

#[tokio::test]
async fn test_upload_three_chunks_first_alone() {
    let source = source_file(25 * MIB);
    let bodies = Arc::new(Mutex::new(Vec::new()));
    let seen = bodies.clone();
    let transport = MockTransport::new(move |call| {
        seen.lock().unwrap().push(call.clone());
        if call.index == 2 {
            Reply::url(SHARE_URL)
        } else {
            Reply::ok()
        }
    });

    let session = Session::with_transport(transport, config(10 * MIB as u64, 4)).unwrap();
    let outcome = session.upload(source.path()).await.unwrap();

    let UploadOutcome::Completed(result) = outcome else {
        panic!("upload was cancelled");
    };
    assert_eq!(result.url, SHARE_URL);
    assert_eq!(result.chunks, 3);
    assert_eq!(result.size, 25 * MIB as u64);

    let events = session.transport().events();
    let first_reply = position(&events, &Event::Replied(0));
    assert!(position(&events, &Event::Started(1)) > first_reply);
    assert!(position(&events, &Event::Started(2)) > first_reply);

    let calls = bodies.lock().unwrap();
    assert_eq!(calls.len(), 3);
    let file_name = source.path().file_name().unwrap().to_string_lossy().into_owned();
    for call in calls.iter() {
        assert_eq!(form_field(&call.body, "id").as_deref(), Some(result.token.as_str()));
        assert_eq!(form_field(&call.body, "name"), Some(file_name.clone()));
        assert_eq!(form_field(&call.body, "chunks").as_deref(), Some("3"));
        assert_eq!(form_field(&call.body, "lifetime").as_deref(), Some("100"));
        assert_eq!(form_field(&call.body, "chunk"), Some(call.index.to_string()));
    }
    let last = calls.iter().find(|call| call.index == 2).unwrap();
    assert!(last.body.len() > 5 * MIB && last.body.len() < 5 * MIB + 2048);
}

#[tokio::test]
async fn test_bodies_complete_in_index_order_under_random_latency() {
    let source = source_file(40 * 1024);
    let transport = MockTransport::accepting(SHARE_URL).with_latency(Duration::from_millis(25));

    let session = Session::with_transport(transport, config(1024, 8)).unwrap();
    let outcome = session.upload(source.path()).await.unwrap();
    assert!(matches!(outcome, UploadOutcome::Completed(ref r) if r.chunks == 40));

    let events = session.transport().events();
    let sent: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            Event::Sent(index) => Some(*index),
            _ => None,
        })
        .collect();
    let replied: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            Event::Replied(index) => Some(*index),
            _ => None,
        })
        .collect();
    assert_eq!(sent, (0..40).collect::<Vec<_>>());
    assert_eq!(replied, (0..40).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_cursor_advances_in_index_order_when_replies_come_early() {
    let source = source_file(40 * 1024);
    let transport = MockTransport::accepting(SHARE_URL)
        .with_latency(Duration::from_millis(25))
        .with_early_reply();

    let session = Session::with_transport(transport, config(1024, 8)).unwrap();
    let outcome = session.upload(source.path()).await.unwrap();
    assert!(matches!(outcome, UploadOutcome::Completed(ref r) if r.chunks == 40));

    // The gate of chunk i opens once the cursor reaches i, which must not
    // happen before chunk i - 1 has its reply.
    let events = session.transport().events();
    for (at, event) in events.iter().enumerate() {
        if let Event::Sent(index) = *event {
            if index > 0 {
                let reply = position(&events, &Event::Replied(index - 1));
                assert!(reply < at, "chunk {index} released before chunk {} replied: {events:?}", index - 1);
            }
        }
    }
}

#[tokio::test]
async fn test_first_chunk_transport_failure_is_not_retried() {
    let source = source_file(3 * 1024);
    let transport = MockTransport::new(|call| {
        if call.index == 0 {
            Reply::Error(GfileError::HttpError(502))
        } else {
            Reply::ok()
        }
    });

    let session = Session::with_transport(transport, config(1024, 4)).unwrap();
    let err = session.upload(source.path()).await.unwrap_err();
    assert!(matches!(err, GfileError::HttpError(502)));
    assert_eq!(session.transport().events(), vec![Event::Started(0), Event::Sent(0)]);
}

#[tokio::test]
async fn test_first_chunk_failure_ends_upload_with_default_policy() {
    let source = source_file(3 * 1024);
    let transport = MockTransport::new(|_| Reply::Error(GfileError::HttpError(502)));
    let config = TransferConfig {
        chunk_size: 1024,
        ..TransferConfig::default()
    };

    let session = Session::with_transport(transport, config).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), session.upload(source.path()))
        .await
        .expect("upload kept retrying chunk 0");
    assert!(matches!(result, Err(GfileError::HttpError(502))));
}

#[tokio::test]
async fn test_unanswered_chunk_times_out_and_is_retried() {
    let source = source_file(3 * 1024);
    let transport = MockTransport::new(|call| match (call.index, call.attempt) {
        (1, 1) => Reply::Hang,
        (2, _) => Reply::url(SHARE_URL),
        _ => Reply::ok(),
    });
    let mut config = config(1024, 2);
    config.timeout = Duration::from_millis(100);

    let session = Session::with_transport(transport, config).unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(5), session.upload(source.path()))
        .await
        .expect("upload waited on a silent server")
        .unwrap();
    assert!(matches!(outcome, UploadOutcome::Completed(ref r) if r.url == SHARE_URL));

    let events = session.transport().events();
    assert_eq!(events.iter().filter(|e| **e == Event::Started(1)).count(), 2);
}

#[tokio::test]
async fn test_unanswered_first_chunk_fails() {
    let source = source_file(2 * 1024);
    let transport = MockTransport::new(|_| Reply::Hang);
    let mut config = config(1024, 2);
    config.timeout = Duration::from_millis(100);

    let session = Session::with_transport(transport, config).unwrap();
    let err = tokio::time::timeout(Duration::from_secs(5), session.upload(source.path()))
        .await
        .expect("upload waited on a silent server")
        .unwrap_err();
    assert!(matches!(err, GfileError::Timeout(_)));
}

#[tokio::test]
async fn test_no_chunk_starts_after_rejection() {
    let source = source_file(20 * 1024);
    let transport = MockTransport::new(|call| {
        if call.index == 3 {
            Reply::Json(r#"{"status":1,"message":"bad chunk"}"#.to_string())
        } else {
            Reply::ok()
        }
    })
    .with_latency(Duration::from_millis(5));

    let session = Session::with_transport(transport, config(1024, 2)).unwrap();
    let err = session.upload(source.path()).await.unwrap_err();
    match err {
        GfileError::Rejected { chunk, reason } => {
            assert_eq!(chunk, 3);
            assert!(reason.contains("bad chunk"));
        }
        other => panic!("unexpected {other:?}"),
    }

    let events = session.transport().events();
    let rejected = position(&events, &Event::Replied(3));
    assert!(
        events[rejected..]
            .iter()
            .all(|e| !matches!(e, Event::Started(_))),
        "chunk started after rejection: {events:?}"
    );
    let started = events.iter().filter(|e| matches!(e, Event::Started(_))).count();
    assert!(started < 20);
}

#[tokio::test]
async fn test_malformed_response_fails_upload() {
    let source = source_file(3 * 1024);
    let transport = MockTransport::new(|call| {
        if call.index == 1 {
            Reply::Json("<html>Bad Gateway</html>".to_string())
        } else {
            Reply::ok()
        }
    });

    let session = Session::with_transport(transport, config(1024, 4)).unwrap();
    let err = session.upload(source.path()).await.unwrap_err();
    assert!(matches!(err, GfileError::MalformedResponse { chunk: 1, .. }));
}

#[tokio::test]
async fn test_first_chunk_rejection_is_fatal() {
    let source = source_file(3 * 1024);
    let transport = MockTransport::new(|_| Reply::Json(r#"{"status":1}"#.to_string()));

    let session = Session::with_transport(transport, config(1024, 4)).unwrap();
    let err = session.upload(source.path()).await.unwrap_err();
    assert!(matches!(err, GfileError::Rejected { chunk: 0, .. }));

    let events = session.transport().events();
    assert_eq!(events.iter().filter(|e| matches!(e, Event::Started(_))).count(), 1);
}

#[tokio::test]
async fn test_transport_errors_are_retried() {
    let source = source_file(3 * 1024);
    let transport = MockTransport::new(|call| match (call.index, call.attempt) {
        (1, 1) | (1, 2) => Reply::Error(GfileError::HttpError(502)),
        (2, _) => Reply::url(SHARE_URL),
        _ => Reply::ok(),
    });

    let session = Session::with_transport(transport, config(1024, 4)).unwrap();
    let outcome = session.upload(source.path()).await.unwrap();
    assert!(matches!(outcome, UploadOutcome::Completed(ref r) if r.url == SHARE_URL));

    let events = session.transport().events();
    assert_eq!(events.iter().filter(|e| **e == Event::Started(1)).count(), 3);
}

#[tokio::test]
async fn test_bounded_retries_give_up() {
    let source = source_file(2 * 1024);
    let transport = MockTransport::new(|call| {
        if call.index == 1 {
            Reply::Error(GfileError::HttpError(503))
        } else {
            Reply::ok()
        }
    });

    let mut config = config(1024, 2);
    config.chunk_retry = ChunkRetryPolicy::bounded(3, Duration::from_millis(1));
    let session = Session::with_transport(transport, config).unwrap();
    let err = session.upload(source.path()).await.unwrap_err();
    assert!(matches!(err, GfileError::RetriesExhausted { attempts: 3, .. }));
}

#[tokio::test]
async fn test_missing_url_is_an_error() {
    let source = source_file(2 * 1024);
    let transport = MockTransport::new(|_| Reply::ok());

    let session = Session::with_transport(transport, config(1024, 2)).unwrap();
    let err = session.upload(source.path()).await.unwrap_err();
    assert!(matches!(err, GfileError::MissingDownloadUrl));
}

#[tokio::test]
async fn test_server_resolution_failure() {
    let source = source_file(1024);
    let mut transport = MockTransport::accepting(SHARE_URL);
    transport.service_page = "<html>maintenance</html>".to_string();

    let session = Session::with_transport(transport, config(1024, 2)).unwrap();
    let err = session.upload(source.path()).await.unwrap_err();
    assert!(matches!(err, GfileError::ServerResolutionFailed));
    assert!(session.transport().events().is_empty());
}

#[tokio::test]
async fn test_cancellation_token_stops_upload() {
    let source = source_file(10 * 1024);
    let cancel = Arc::new(Mutex::new(None::<tokio_util::sync::CancellationToken>));
    let trigger = cancel.clone();
    let transport = MockTransport::new(move |call| {
        if call.index == 4 {
            if let Some(token) = trigger.lock().unwrap().as_ref() {
                token.cancel();
            }
            Reply::Hang
        } else {
            Reply::ok()
        }
    });

    let session = Session::with_transport(transport, config(1024, 3)).unwrap();
    *cancel.lock().unwrap() = Some(session.cancellation_token());

    let outcome = tokio::time::timeout(Duration::from_secs(5), session.upload(source.path()))
        .await
        .expect("upload did not stop")
        .unwrap();
    assert_eq!(outcome, UploadOutcome::Cancelled);

    // A cancelled session stays cancelled.
    let again = session.upload(source.path()).await.unwrap();
    assert_eq!(again, UploadOutcome::Cancelled);
}

#[tokio::test]
async fn test_progress_callback_can_cancel() {
    let source = source_file(6 * 1024);
    let transport = MockTransport::accepting(SHARE_URL);
    let mut session = Session::with_transport(transport, config(1024, 2)).unwrap();

    let reports = Arc::new(AtomicU32::new(0));
    let counter = reports.clone();
    session.watch_status(Arc::new(move |progress: &TransferProgress| {
        counter.fetch_add(1, Ordering::SeqCst);
        !progress.label.starts_with("chunk 3/")
    }));

    let outcome = session.upload(source.path()).await.unwrap();
    assert_eq!(outcome, UploadOutcome::Cancelled);
    assert!(reports.load(Ordering::SeqCst) > 0);
}

#[tokio::test]
async fn test_progress_labels_per_chunk() {
    let source = source_file(3 * 1024);
    let transport = MockTransport::accepting(SHARE_URL);
    let mut session = Session::with_transport(transport, config(1024, 2)).unwrap();

    let labels = Arc::new(Mutex::new(Vec::new()));
    let seen = labels.clone();
    session.watch_status(Arc::new(move |progress: &TransferProgress| {
        let mut seen = seen.lock().unwrap();
        if !seen.contains(&progress.label) {
            seen.push(progress.label.clone());
        }
        true
    }));

    let outcome = session.upload(source.path()).await.unwrap();
    assert!(matches!(outcome, UploadOutcome::Completed(_)));
    let mut labels = labels.lock().unwrap().clone();
    labels.sort();
    assert_eq!(labels, vec!["chunk 1/3", "chunk 2/3", "chunk 3/3"]);
}

#[tokio::test]
async fn test_invalid_sources() {
    let session = Session::with_transport(MockTransport::accepting(SHARE_URL), config(1024, 2)).unwrap();

    let missing = session.upload("/nonexistent/gfile-missing.bin").await.unwrap_err();
    assert!(matches!(missing, GfileError::SourceNotFound(_)));

    let empty = source_file(0);
    let err = session.upload(empty.path()).await.unwrap_err();
    assert!(matches!(err, GfileError::EmptySource(_)));
}
