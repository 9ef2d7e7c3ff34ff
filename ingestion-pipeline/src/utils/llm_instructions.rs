use serde_json::json;

/// Value the model must return when it cannot determine both name fields.
pub const NOT_FOUND_SENTINEL: &str = r#"{"error": "name not found"}"#;

pub static CV_EXTRACTION_SYSTEM_MESSAGE: &str = r#"You are a résumé parser. Analyse the résumé text supplied by the user and extract the candidate's details.

Return a JSON object with ONLY these fields:
- first_name: given name (REQUIRED)
- prefix: surname prefix such as "van", "de", "van der" (optional, only when present)
- last_name: family name (REQUIRED)
- date_of_birth: date of birth formatted as YYYY-MM-DD (optional)
- email: email address (optional)
- phone: phone number (optional)
- location: place of residence or city (optional)
- education: highest completed education level, exactly one of "MBO", "HBO" or "UNI" (optional)
- current_company: current or most recent employer (optional)
- current_role: current or most recent job title (optional)
- skills: relevant skills, comma separated (optional)

IMPORTANT:
- Return ONLY valid JSON, no other text
- Omit any field you cannot find
- first_name and last_name are REQUIRED; if you cannot determine them return exactly: {"error": "name not found"}
- Parse Dutch names correctly, e.g. "Jan van der Berg" is first_name "Jan", prefix "van der", last_name "Berg""#;

/// Prefix placed before the document text in the user message.
pub const CV_TEXT_HEADER: &str = "RÉSUMÉ TEXT:";

pub fn build_user_message(document_text: &str) -> String {
    format!("{CV_TEXT_HEADER}\n{document_text}")
}

pub fn get_candidate_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "first_name": { "type": "string" },
            "prefix": { "type": "string" },
            "last_name": { "type": "string" },
            "date_of_birth": { "type": "string", "description": "YYYY-MM-DD" },
            "email": { "type": "string" },
            "phone": { "type": "string" },
            "location": { "type": "string" },
            "education": { "type": "string", "enum": ["MBO", "HBO", "UNI"] },
            "current_company": { "type": "string" },
            "current_role": { "type": "string" },
            "skills": { "type": "string" },
            "error": { "type": "string" }
        },
        "additionalProperties": false
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::candidate_record::{parse_response, ParsedResponse};

    #[test]
    fn sentinel_is_recognised_by_the_parser() {
        assert!(CV_EXTRACTION_SYSTEM_MESSAGE.contains(NOT_FOUND_SENTINEL));
        assert!(matches!(
            parse_response(NOT_FOUND_SENTINEL),
            ParsedResponse::NotFound(_)
        ));
    }

    #[test]
    fn schema_lists_every_prompt_field() {
        let schema = get_candidate_schema();
        let properties = schema["properties"].as_object().expect("properties");
        for field in [
            "first_name",
            "prefix",
            "last_name",
            "date_of_birth",
            "email",
            "phone",
            "location",
            "education",
            "current_company",
            "current_role",
            "skills",
        ] {
            assert!(properties.contains_key(field), "missing {field}");
            assert!(CV_EXTRACTION_SYSTEM_MESSAGE.contains(field));
        }
    }
}
