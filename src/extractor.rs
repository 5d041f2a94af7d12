use crate::models::JobReturnData;

/// Field that anchors a completion record inside a log line.
const MARKER: &str = "\"userEmail\"";

/// Scan one line of container output for an embedded result payload.
///
/// Container stdout mixes free-form chatter with at most one structured
/// completion record per run. The record may carry a log prefix on the same
/// line, so we anchor on the marker field, back up to the opening brace and
/// parse from there to end-of-line. Anything that does not parse is ordinary
/// noise, not an error.
pub fn extract_result(line: &str) -> Option<JobReturnData> {
    let marker = line.find(MARKER)?;
    let start = line[..marker].rfind('{')?;
    serde_json::from_str(line[start..].trim_end()).ok()
}
