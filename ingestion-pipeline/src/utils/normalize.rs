use chrono::NaiveDate;
use common::storage::types::contact::{Education, NewContact};

use crate::types::candidate_record::CandidateRecord;

/// Title-case a name that arrived entirely upper- or lowercase. Mixed-case names are
/// returned trimmed but otherwise untouched. Each hyphen segment and each word is
/// capitalised on its own, so "JEAN-PIERRE" becomes "Jean-Pierre".
pub fn normalize_name(raw: &str) -> String {
    let name = raw.trim();
    let is_single_case = name == name.to_uppercase() || name == name.to_lowercase();
    if !is_single_case {
        return name.to_string();
    }

    let mut out = String::with_capacity(name.len());
    let mut at_segment_start = true;
    for ch in name.chars() {
        if at_segment_start {
            out.extend(ch.to_uppercase());
        } else {
            out.extend(ch.to_lowercase());
        }
        at_segment_start = ch == '-' || ch.is_whitespace();
    }
    out
}

/// Surname prefixes ("van der") are stored lowercase.
pub fn normalize_prefix(raw: Option<&str>) -> Option<String> {
    raw.map(|p| p.trim().to_lowercase()).filter(|p| !p.is_empty())
}

pub fn parse_date_of_birth(raw: Option<&str>) -> Option<NaiveDate> {
    raw.and_then(|value| NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok())
}

/// Turn a parsed record into contact fields.
pub fn to_new_contact(record: CandidateRecord) -> NewContact {
    NewContact {
        first_name: normalize_name(&record.first_name),
        prefix: normalize_prefix(record.prefix.as_deref()),
        last_name: normalize_name(&record.last_name),
        date_of_birth: parse_date_of_birth(record.date_of_birth.as_deref()),
        email: record.email,
        phone: record.phone,
        location: record.location,
        education: record.education.as_deref().and_then(Education::from_free_text),
        current_company: record.current_company,
        company_role: record.current_role,
        notes: record.skills.map(|skills| format!("Skills: {skills}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_case_names_are_title_cased() {
        assert_eq!(normalize_name("JEAN-PIERRE"), "Jean-Pierre");
        assert_eq!(normalize_name("anna"), "Anna");
        assert_eq!(normalize_name("  MARIA JOSÉ "), "Maria José");
        assert_eq!(normalize_name("ÖZTÜRK"), "Öztürk");
    }

    #[test]
    fn mixed_case_names_are_kept() {
        assert_eq!(normalize_name("Jan"), "Jan");
        assert_eq!(normalize_name("McDonald"), "McDonald");
        assert_eq!(normalize_name("de Vries-Van Dam"), "de Vries-Van Dam");
    }

    #[test]
    fn prefix_and_birth_date() {
        assert_eq!(normalize_prefix(Some(" Van Der ")), Some("van der".into()));
        assert_eq!(normalize_prefix(Some("  ")), None);
        assert_eq!(
            parse_date_of_birth(Some("1990-04-21")),
            NaiveDate::from_ymd_opt(1990, 4, 21)
        );
        assert_eq!(parse_date_of_birth(Some("21-04-1990")), None);
    }

    #[test]
    fn record_maps_onto_contact_fields() {
        let record = CandidateRecord {
            first_name: "PIET".into(),
            prefix: Some("De".into()),
            last_name: "jong".into(),
            education: Some("universiteit".into()),
            current_role: Some("Data engineer".into()),
            skills: Some("Python, Spark".into()),
            date_of_birth: Some("unknown".into()),
            ..Default::default()
        };

        let contact = to_new_contact(record);
        assert_eq!(contact.first_name, "Piet");
        assert_eq!(contact.last_name, "Jong");
        assert_eq!(contact.prefix.as_deref(), Some("de"));
        assert_eq!(contact.education, Some(Education::Uni));
        assert_eq!(contact.company_role.as_deref(), Some("Data engineer"));
        assert_eq!(contact.notes.as_deref(), Some("Skills: Python, Spark"));
        assert!(contact.date_of_birth.is_none());
    }

    #[test]
    fn unknown_education_is_dropped() {
        let record = CandidateRecord {
            first_name: "A".into(),
            last_name: "B".into(),
            education: Some("bootcamp".into()),
            ..Default::default()
        };
        assert!(to_new_contact(record).education.is_none());
    }
}
