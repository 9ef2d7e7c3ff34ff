use serde_json::{Map, Value};

pub const NAME_NOT_FOUND: &str = "name not found";

/// Candidate fields as returned by the model, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateRecord {
    pub first_name: String,
    pub prefix: Option<String>,
    pub last_name: String,
    pub date_of_birth: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub education: Option<String>,
    pub current_company: Option<String>,
    pub current_role: Option<String>,
    pub skills: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedResponse {
    Candidate(CandidateRecord),
    /// The model answered but could not identify the candidate.
    NotFound(String),
    Malformed,
}

/// Remove a surrounding markdown code fence, if any.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```JSON"))
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .trim()
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

pub fn parse_response(text: &str) -> ParsedResponse {
    let body = strip_code_fence(text);
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) else {
        return ParsedResponse::Malformed;
    };

    if let Some(reason) = map.get("error").filter(|reason| !reason.is_null()) {
        let reason = match reason {
            Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
            _ => NAME_NOT_FOUND.to_string(),
        };
        return ParsedResponse::NotFound(reason);
    }

    let (Some(first_name), Some(last_name)) =
        (text_field(&map, "first_name"), text_field(&map, "last_name"))
    else {
        return ParsedResponse::NotFound(NAME_NOT_FOUND.to_string());
    };

    ParsedResponse::Candidate(CandidateRecord {
        first_name,
        prefix: text_field(&map, "prefix"),
        last_name,
        date_of_birth: text_field(&map, "date_of_birth"),
        email: text_field(&map, "email"),
        phone: text_field(&map, "phone"),
        location: text_field(&map, "location"),
        education: text_field(&map, "education"),
        current_company: text_field(&map, "current_company"),
        current_role: text_field(&map, "current_role"),
        skills: text_field(&map, "skills"),
    })
}

/// Read a field as trimmed text. Numbers are accepted (phone numbers), arrays of
/// strings are joined (skills lists), blanks and nulls are treated as absent.
fn text_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    let value = match map.get(key)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        _ => return None,
    };

    (!value.is_empty()).then_some(value)
}
