pub mod hex;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Serializer;

/// Replaces everything outside printable ASCII with `.` for terminal output.
pub fn sanitize_text(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            ' '..='~' => c,
            _ => '.',
        })
        .collect()
}

/// Current wall-clock time as RFC 3339 with millisecond precision.
pub fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// `serialize_with` helper writing bytes as standard padded base64.
pub fn serialize_base64<S, B>(bytes: B, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    B: AsRef<[u8]>,
{
    serializer.serialize_str(&STANDARD.encode(bytes.as_ref()))
}
