#![cfg(unix)]

use syncarr_application::{ExtractOutput, ExtractTarget, ExtractorError, MediaExtractor, YtDlpExtractor};
use syncarr_config::ExtractorConfig;

fn shell(script: &str) -> YtDlpExtractor {
    YtDlpExtractor::new(ExtractorConfig {
        command: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string(), "extractor".to_string()],
        extra_args: Vec::new(),
    })
}

#[tokio::test]
async fn index_parses_listing_from_stdout() {
    let extractor = shell(
        r#"printf '%s\n' '{"id":"x1","title":"One"}' '{"id":"x2","title":"Two"}'"#,
    );
    let output = extractor
        .fetch_or_download(&ExtractTarget::Index {
            url: "https://example.com/channel".into(),
        })
        .await
        .expect("index succeeds");

    match output {
        ExtractOutput::Listing(items) => {
            let keys: Vec<_> = items.iter().map(|i| i.key.as_str()).collect();
            assert_eq!(keys, vec!["x1", "x2"]);
        }
        other => panic!("expected listing, got {other:?}"),
    }
}

#[tokio::test]
async fn download_reports_file_and_size() {
    let dir = tempfile::tempdir().unwrap();
    let output_dir = dir.path().join("show");
    let file = output_dir.join("x1.mkv");
    let script = format!("printf 'data' > '{0}'; echo '{0}'", file.display());

    let output = shell(&script)
        .fetch_or_download(&ExtractTarget::Download {
            url: "https://example.com/watch?v=x1".into(),
            output_dir: output_dir.clone(),
        })
        .await
        .expect("download succeeds");

    assert_eq!(
        output,
        ExtractOutput::Downloaded {
            path: file,
            filesize: Some(4)
        }
    );
}

#[tokio::test]
async fn unavailable_content_is_permanent() {
    let err = shell("echo 'ERROR: [youtube] x1: Private video' >&2; exit 1")
        .fetch_or_download(&ExtractTarget::Index { url: "u".into() })
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractorError::RemoteContent(_)));
    assert!(err.is_permanent());
}

#[tokio::test]
async fn other_tool_failures_are_retryable() {
    let err = shell("echo 'network is unreachable' >&2; exit 2")
        .fetch_or_download(&ExtractTarget::Index { url: "u".into() })
        .await
        .unwrap_err();
    match &err {
        ExtractorError::ToolFailed { status, stderr } => {
            assert_eq!(*status, Some(2));
            assert!(stderr.contains("unreachable"));
        }
        other => panic!("expected ToolFailed, got {other:?}"),
    }
    assert!(!err.is_permanent());
}

#[tokio::test]
async fn missing_binary_is_a_launch_error() {
    let extractor = YtDlpExtractor::new(ExtractorConfig {
        command: "/nonexistent/yt-dlp".to_string(),
        args: Vec::new(),
        extra_args: Vec::new(),
    });
    let err = extractor
        .fetch_or_download(&ExtractTarget::Index { url: "u".into() })
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractorError::Launch { .. }));
}

#[tokio::test]
async fn metadata_reads_a_single_item() {
    let extractor = shell(
        r#"echo '{"id":"x1","title":"Fresh","thumbnail":"https://i.example.com/x1.jpg","duration":12}'"#,
    );
    let output = extractor
        .fetch_or_download(&ExtractTarget::Metadata {
            url: "https://example.com/watch?v=x1".into(),
        })
        .await
        .expect("metadata succeeds");

    match output {
        ExtractOutput::Metadata(info) => {
            assert_eq!(info.key, "x1");
            assert_eq!(info.title, "Fresh");
            assert_eq!(info.thumbnail_url.as_deref(), Some("https://i.example.com/x1.jpg"));
        }
        other => panic!("expected metadata, got {other:?}"),
    }
}
