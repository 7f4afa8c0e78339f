use crate::models::{AnalysisResult, RawAnalysis};
use crate::vision::claude::VisionError;

/// Pulls the JSON object out of a model reply.
///
/// The first ```` ``` ```` fence whose body (after an optional `json` tag) is
/// an object wins. Otherwise the span from the first `{` to the last `}`.
pub fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    let mut rest = trimmed;
    while let Some(start) = rest.find("```") {
        let after = &rest[start + 3..];
        let end = after.find("```");
        let body = end.map_or(after, |end| &after[..end]).trim_start();
        let body = body.strip_prefix("json").unwrap_or(body).trim();
        if body.starts_with('{')
            && let Some(close) = body.rfind('}')
        {
            return Some(&body[..=close]);
        }
        match end {
            Some(end) => rest = &after[end + 3..],
            None => break,
        }
    }

    let open = trimmed.find('{')?;
    let close = trimmed.rfind('}')?;
    (close > open).then(|| &trimmed[open..=close])
}

pub fn parse_analysis(text: &str) -> Result<AnalysisResult, VisionError> {
    let json = extract_json(text)
        .ok_or_else(|| VisionError::InvalidJson("no JSON object in response".into()))?;
    let raw: RawAnalysis =
        serde_json::from_str(json).map_err(|err| VisionError::InvalidJson(err.to_string()))?;
    Ok(AnalysisResult::try_from(raw)?)
}
