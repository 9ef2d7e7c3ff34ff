use std::{
    io::{Cursor, Read},
    sync::OnceLock,
};

use common::error::AppError;
use regex::Regex;
use tracing::debug;
use zip::ZipArchive;

const BODY_PART: &str = "word/document.xml";
const HEADER_FOOTER_SLOTS: u8 = 3;
const MIN_BINARY_RUN: usize = 4;

fn paragraph_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<w:p[ >].*?</w:p>|<w:p/>").expect("static regex should compile"))
}

fn run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<w:t(?:\s[^>]*)?>(.*?)</w:t>|<w:tab/>|<w:br/>")
            .expect("static regex should compile")
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("static regex should compile"))
}

fn entity_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"&(#x[0-9a-fA-F]+|#[0-9]+|amp|lt|gt|quot|apos);").expect("static regex should compile")
    })
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static regex should compile"))
}

/// Extract text from a `.docx` package.
///
/// The package is read paragraph by paragraph with headers first and footers
/// last. If that yields nothing the raw markup of the same parts is stripped
/// instead. Bytes that are not a zip package are an extraction error.
pub fn extract_docx_text(bytes: &[u8]) -> Result<String, AppError> {
    let package = ZipArchive::new(Cursor::new(bytes)).map_err(|err| {
        AppError::Extraction(format!("word document is not a valid docx package: {err}"))
    })?;
    read_package(package)
}

/// Extract text from a legacy `.doc`. Files that turn out to be `.docx` packages
/// are read as such; anything else is scanned for printable text runs.
pub fn extract_doc_text(bytes: &[u8]) -> Result<String, AppError> {
    match ZipArchive::new(Cursor::new(bytes)) {
        Ok(package) => read_package(package),
        Err(_) => {
            debug!("legacy word document, scanning binary text runs");
            Ok(extract_binary_runs(bytes))
        }
    }
}

fn read_package(mut package: ZipArchive<Cursor<&[u8]>>) -> Result<String, AppError> {
    let parts = read_parts(&mut package)?;
    let structured = parts
        .iter()
        .map(|part| structured_text(part))
        .filter(|text| !text.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    if !structured.trim().is_empty() {
        return Ok(structured.trim().to_string());
    }

    debug!("structured word extraction was empty, falling back to markup stripping");
    let raw = parts
        .iter()
        .map(|part| stripped_text(part))
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    Ok(raw)
}

/// Headers, body, then footers, in document order. Missing parts are skipped; a
/// package without a body is an error.
fn read_parts(package: &mut ZipArchive<Cursor<&[u8]>>) -> Result<Vec<String>, AppError> {
    let mut parts = Vec::new();

    for slot in 1..=HEADER_FOOTER_SLOTS {
        if let Some(header) = read_part(package, &format!("word/header{slot}.xml"))? {
            parts.push(header);
        }
    }

    let body = read_part(package, BODY_PART)?
        .ok_or_else(|| AppError::Extraction("word document has no body part".into()))?;
    parts.push(body);

    for slot in 1..=HEADER_FOOTER_SLOTS {
        if let Some(footer) = read_part(package, &format!("word/footer{slot}.xml"))? {
            parts.push(footer);
        }
    }

    Ok(parts)
}

fn read_part(
    package: &mut ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<Option<String>, AppError> {
    let mut entry = match package.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(err) => {
            return Err(AppError::Extraction(format!(
                "failed to open {name} in word document: {err}"
            )))
        }
    };

    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .map_err(|err| AppError::Extraction(format!("failed to read {name}: {err}")))?;
    Ok(Some(xml))
}

fn structured_text(xml: &str) -> String {
    paragraph_re()
        .find_iter(xml)
        .map(|paragraph| {
            run_re()
                .captures_iter(paragraph.as_str())
                .map(|caps| match caps.get(1) {
                    Some(text) => decode_entities(text.as_str()),
                    None if caps.get(0).is_some_and(|m| m.as_str() == "<w:tab/>") => {
                        "\t".to_string()
                    }
                    None => "\n".to_string(),
                })
                .collect::<String>()
        })
        .map(|line| line.trim_end().to_string())
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn stripped_text(xml: &str) -> String {
    let without_tags = tag_re().replace_all(xml, " ");
    let decoded = decode_entities(&without_tags);
    whitespace_re().replace_all(&decoded, " ").trim().to_string()
}

fn decode_entities(text: &str) -> String {
    entity_re()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let entity = caps.get(1).map_or("", |m| m.as_str());
            match entity {
                "amp" => "&".to_string(),
                "lt" => "<".to_string(),
                "gt" => ">".to_string(),
                "quot" => "\"".to_string(),
                "apos" => "'".to_string(),
                numeric => {
                    let code = numeric
                        .strip_prefix("#x")
                        .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                        .or_else(|| numeric.strip_prefix('#').and_then(|dec| dec.parse().ok()));
                    code.and_then(char::from_u32)
                        .map(String::from)
                        .unwrap_or_default()
                }
            }
        })
        .into_owned()
}

/// Pull readable text out of a legacy binary `.doc`. Word stores body text either
/// as single-byte or UTF-16LE runs, so both are scanned and the longer result wins.
fn extract_binary_runs(bytes: &[u8]) -> String {
    let single_byte = collect_runs(bytes.iter().map(|b| char::from(*b)));
    let wide = collect_runs(
        bytes
            .chunks_exact(2)
            .filter_map(|pair| match pair {
                [lo, hi] => char::from_u32(u32::from(u16::from_le_bytes([*lo, *hi]))),
                _ => None,
            }),
    );

    if wide.len() > single_byte.len() {
        wide
    } else {
        single_byte
    }
}

fn collect_runs(chars: impl Iterator<Item = char>) -> String {
    let mut runs: Vec<String> = Vec::new();
    let mut current = String::new();

    for ch in chars {
        if is_text_char(ch) {
            current.push(ch);
        } else {
            if current.trim().chars().count() >= MIN_BINARY_RUN {
                runs.push(current.trim().to_string());
            }
            current.clear();
        }
    }
    if current.trim().chars().count() >= MIN_BINARY_RUN {
        runs.push(current.trim().to_string());
    }

    runs.join("\n")
}

fn is_text_char(ch: char) -> bool {
    ch == ' '
        || ch == '\t'
        || ch.is_ascii_graphic()
        || (ch.is_alphabetic() && !ch.is_control() && u32::from(ch) < 0x0250)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn docx(parts: &[(&str, &str)]) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            for (name, body) in parts {
                writer
                    .start_file(*name, SimpleFileOptions::default())
                    .expect("start file");
                writer.write_all(body.as_bytes()).expect("write part");
            }
            writer.finish().expect("finish");
        }
        buffer.into_inner()
    }

    const BODY: &str = r#"<w:document><w:body>
        <w:p><w:r><w:t>Software engineer</w:t></w:r></w:p>
        <w:p><w:r><w:t xml:space="preserve">Skills: Rust &amp; SQL</w:t></w:r></w:p>
    </w:body></w:document>"#;

    #[test]
    fn headers_come_before_body_and_footers_after() {
        let bytes = docx(&[
            (BODY_PART, BODY),
            ("word/header1.xml", "<w:hdr><w:p><w:r><w:t>Jan Jansen</w:t></w:r></w:p></w:hdr>"),
            ("word/footer1.xml", "<w:ftr><w:p><w:r><w:t>jan@example.com</w:t></w:r></w:p></w:ftr>"),
        ]);

        let text = extract_docx_text(&bytes).expect("extract");
        assert_eq!(
            text,
            "Jan Jansen\nSoftware engineer\nSkills: Rust & SQL\njan@example.com"
        );
    }

    #[test]
    fn unstructured_markup_falls_back_to_tag_stripping() {
        let bytes = docx(&[(
            BODY_PART,
            "<root><para>Pieter de Vries</para><para>Amsterdam</para></root>",
        )]);

        let text = extract_docx_text(&bytes).expect("extract");
        assert_eq!(text, "Pieter de Vries Amsterdam");
    }

    #[test]
    fn package_without_body_is_an_error() {
        let bytes = docx(&[("word/styles.xml", "<w:styles/>")]);
        assert!(matches!(
            extract_docx_text(&bytes),
            Err(AppError::Extraction(_))
        ));
    }

    #[test]
    fn legacy_binary_yields_printable_runs() {
        let mut bytes = vec![0xD0, 0xCF, 0x11, 0xE0, 0x00, 0x01];
        bytes.extend_from_slice(b"Curriculum Vitae Maria Bakker");
        bytes.extend_from_slice(&[0x00, 0x02, 0x03]);

        let text = extract_doc_text(&bytes).expect("extract");
        assert!(text.contains("Curriculum Vitae Maria Bakker"));
    }

    #[test]
    fn docx_that_is_not_a_package_is_an_error() {
        let result = extract_docx_text(b"PK but not really a zip, just some text");
        assert!(matches!(result, Err(AppError::Extraction(msg)) if msg.contains("docx")));
    }

    #[test]
    fn doc_containing_a_docx_package_is_read_structurally() {
        let bytes = docx(&[(BODY_PART, BODY)]);
        let text = extract_doc_text(&bytes).expect("extract");
        assert_eq!(text, "Software engineer\nSkills: Rust & SQL");
    }

    #[test]
    fn numeric_entities_are_decoded() {
        assert_eq!(decode_entities("Jos&#233; &#x26; co"), "José & co");
    }
}
