// User-facing strings and fixed limits shared by the web and terminal shells.

/// Ceiling on stored messages per session, opening question included.
pub const MAX_MESSAGES: usize = 10;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-preview-05-20";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";

pub const PAGE_TITLE: &str = "💬 チャットボットと学びを振り返ろう！";
pub const PAGE_INTRO: &str =
    "記入済みの学習日記フォーマットをDOCS形式でアップロードすると、その内容に関する対話ができます！";
pub const UPLOAD_LABEL: &str = "ドキュメントをアップロードしてください";
pub const CHAT_PLACEHOLDER: &str = "ドキュメントについて質問してください";
pub const THINKING: &str = "思考中です...";

pub const UPLOAD_SUCCESS: &str = "ドキュメントが正常にアップロードされました。";
pub const UPLOAD_READY: &str = "これで、ドキュメントの内容について質問できます。";
pub const UPLOAD_REQUIRED: &str =
    "チャットを開始するには、まずドキュメントをアップロードしてください。";
pub const UNSUPPORTED_FORMAT: &str = "サポートされていないファイル形式です。";
pub const READ_FAILED_PREFIX: &str = "ファイルの読み込み中にエラーが発生しました";

/// Shown once the turn limiter has closed the conversation.
pub const CLOSING_NOTICE: &str =
    "今日の振り返りはこれで終わりにしましょう。また明日も頑張ってくださいね！";

/// Stored as the assistant turn whenever a model call fails.
pub const FALLBACK_REPLY: &str = "申し訳ありません、応答の生成中にエラーが発生しました。";
pub const SERVICE_ERROR_NOTICE: &str = "エラーが発生しました。詳細はコンソールを確認してください。";
pub const BUSY_NOTICE: &str = "前の応答を生成中です。完了するまでお待ちください。";

pub const EXPORT_HEADING: &str = "今日の振り返り";
pub const EXPORT_USER_LABEL: &str = "ユーザー";
pub const EXPORT_ASSISTANT_LABEL: &str = "チャットボット";
pub const EXPORT_FILE_NAME: &str = "振り返り.docx";
pub const EXPORT_BUTTON_LABEL: &str = "振り返りドキュメントをダウンロード";

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Appended to partial replies while a stream is still open.
pub const STREAM_CURSOR: &str = "▌";

pub const SESSION_COOKIE: &str = "coach_session";

/// Sessions untouched for this long are discarded.
pub const SESSION_IDLE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2 * 60 * 60);
