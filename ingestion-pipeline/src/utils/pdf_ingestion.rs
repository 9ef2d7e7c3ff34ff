use common::error::AppError;
use lopdf::Document;
use tracing::debug;

/// Extract the text layer of a PDF.
///
/// `pdf-extract` is tried first; when it fails or yields only whitespace the page
/// text extractor from `lopdf` is used instead. Scanned PDFs without a text layer
/// come back empty, which callers treat as "no usable text".
pub fn extract_pdf_text(bytes: &[u8]) -> Result<String, AppError> {
    let primary = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes));

    match primary {
        Ok(Ok(text)) if !text.trim().is_empty() => return Ok(normalize_whitespace(&text)),
        Ok(Ok(_)) => debug!("pdf-extract returned no text, trying page extraction"),
        Ok(Err(err)) => debug!(error = %err, "pdf-extract failed, trying page extraction"),
        Err(_) => debug!("pdf-extract panicked, trying page extraction"),
    }

    extract_with_lopdf(bytes).map(|text| normalize_whitespace(&text))
}

fn extract_with_lopdf(bytes: &[u8]) -> Result<String, AppError> {
    let document = Document::load_mem(bytes)
        .map_err(|err| AppError::Extraction(format!("failed to parse PDF: {err}")))?;

    let mut page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
    if page_numbers.is_empty() {
        return Err(AppError::Extraction("PDF has no pages".into()));
    }
    page_numbers.sort_unstable();

    document
        .extract_text(&page_numbers)
        .map_err(|err| AppError::Extraction(format!("failed to read PDF text: {err}")))
}

/// Collapse runs of blank lines and trailing spaces left by the PDF text layer.
fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0_usize;

    for line in text.replace('\r', "").lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            blank_run = blank_run.saturating_add(1);
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }

    out.trim().to_string()
}

/// Single-page PDF with one Courier text line per entry of `lines`.
#[cfg(test)]
pub(crate) fn sample_pdf(lines: &[&str]) -> Vec<u8> {
    use lopdf::{
        content::{Content, Operation},
        dictionary, Object, Stream,
    };

    let mut document = Document::with_version("1.5");
    let pages_id = document.new_object_id();
    let font_id = document.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = document.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut operations = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), 12.into()]),
        Operation::new("Td", vec![72.into(), 760.into()]),
    ];
    for (n, line) in lines.iter().enumerate() {
        if n > 0 {
            operations.push(Operation::new("Td", vec![0.into(), (-16).into()]));
        }
        operations.push(Operation::new("Tj", vec![Object::string_literal(*line)]));
    }
    operations.push(Operation::new("ET", vec![]));

    let content = Content { operations }.encode().expect("encode content");
    let content_id = document.add_object(Stream::new(dictionary! {}, content));
    let page_id = document.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    document.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = document.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    document.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    document.save_to(&mut bytes).expect("save pdf");
    bytes
}
