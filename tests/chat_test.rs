mod common;

use common::{Reply, ScriptedGateway};
use journal_coach::chat::run_chat;
use journal_coach::constants::{EXPORT_ASSISTANT_LABEL, FALLBACK_REPLY};
use journal_coach::Message;

fn journal() -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("journal.txt");
    std::fs::write(&path, "目標: 毎日30分読書する。").unwrap();
    (dir, path)
}

#[tokio::test]
async fn test_broken_reply_puts_fallback_on_its_own_line() {
    let gateway = ScriptedGateway::new([
        Reply::text("opening"),
        Reply::BreakAfter(vec!["途中まで".to_string()]),
    ]);
    let (_dir, path) = journal();
    let mut out = Vec::new();

    let session = run_chat(&gateway, &path, None, &b"hello\n"[..], &mut out)
        .await
        .unwrap();

    let printed = String::from_utf8(out).unwrap();
    assert!(printed.contains(&format!(
        "[{EXPORT_ASSISTANT_LABEL}] 途中まで\n[{EXPORT_ASSISTANT_LABEL}] {FALLBACK_REPLY}\n"
    )));
    assert_eq!(
        session.messages().last(),
        Some(&Message::assistant(FALLBACK_REPLY))
    );
}

#[tokio::test]
async fn test_failed_reply_is_printed_once() {
    let gateway = ScriptedGateway::new([Reply::text("opening"), Reply::Fail]);
    let (_dir, path) = journal();
    let mut out = Vec::new();

    run_chat(&gateway, &path, None, &b"hello\n"[..], &mut out)
        .await
        .unwrap();

    let printed = String::from_utf8(out).unwrap();
    assert!(printed.contains(&format!("[{EXPORT_ASSISTANT_LABEL}] {FALLBACK_REPLY}\n")));
    assert_eq!(printed.matches(FALLBACK_REPLY).count(), 1);
}

#[tokio::test]
async fn test_blank_lines_are_skipped() {
    let gateway = ScriptedGateway::default();
    let (_dir, path) = journal();
    let mut out = Vec::new();

    let session = run_chat(&gateway, &path, None, &b"\n   \nhello\n"[..], &mut out)
        .await
        .unwrap();

    assert_eq!(session.messages().len(), 3);
    assert_eq!(gateway.stream_calls().len(), 1);
}
