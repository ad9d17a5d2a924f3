use crate::error::ExtractionError;
use crate::models::FileType;
use lopdf::Document;
use regex::Regex;
use serde_json::Value;
use std::io::{Cursor, Read};
use tracing::debug;
use zip::ZipArchive;

/// Converts raw document bytes to plain text according to the declared type.
///
/// Fails when the content cannot be decoded or yields no text at all, so an
/// empty document never reaches the index.
pub fn extract_text(bytes: &[u8], file_type: FileType) -> Result<String, ExtractionError> {
    let text = match file_type {
        FileType::Text => decode_utf8(bytes, file_type)?.to_string(),
        FileType::Markdown => strip_markdown(decode_utf8(bytes, file_type)?)?,
        FileType::Csv => csv_to_text(decode_utf8(bytes, file_type)?),
        FileType::Json => json_to_text(bytes)?,
        FileType::Pdf => pdf_to_text(bytes)?,
        FileType::Docx => docx_to_text(bytes)?,
    };

    if text.trim().is_empty() {
        return Err(ExtractionError::new(file_type, "no extractable text"));
    }

    Ok(text)
}

fn decode_utf8(bytes: &[u8], file_type: FileType) -> Result<&str, ExtractionError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|error| ExtractionError::new(file_type, format!("invalid utf-8: {error}")))?;
    Ok(text.strip_prefix('\u{feff}').unwrap_or(text))
}

/// Removes Markdown syntax and keeps the prose: code is dropped, link text is
/// kept, images disappear entirely.
pub fn strip_markdown(content: &str) -> Result<String, ExtractionError> {
    // images go before links, `![alt](src)` would otherwise match as a link
    let rules: [(&str, &str); 6] = [
        (r"```[\s\S]*?```", ""),
        (r"`[^`\n]+`", ""),
        (r"!\[[^\]]*\]\([^)]*\)", ""),
        (r"\[([^\]]+)\]\([^)]*\)", "$1"),
        (r"(?m)^[ \t]*#+[ \t]*", ""),
        (r"\*+([^*\n]+)\*+", "$1"),
    ];

    let mut text = content.to_string();
    for (pattern, replacement) in rules {
        let re = Regex::new(pattern)
            .map_err(|error| ExtractionError::new(FileType::Markdown, error.to_string()))?;
        text = re.replace_all(&text, replacement).into_owned();
    }

    Ok(text)
}

/// One line per data row, `header: value` pairs joined by commas. Empty
/// values are left out.
pub fn csv_to_text(content: &str) -> String {
    let mut rows = parse_csv(content).into_iter();
    let headers = rows.next().unwrap_or_default();

    let mut text = String::new();
    for row in rows {
        let line = headers
            .iter()
            .zip(row.iter())
            .filter(|(_, value)| !value.is_empty())
            .map(|(header, value)| format!("{header}: {value}"))
            .collect::<Vec<_>>()
            .join(", ");

        if !line.is_empty() {
            text.push_str(&line);
            text.push('\n');
        }
    }
    text
}

fn parse_csv(content: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(ch),
            }
            continue;
        }

        match ch {
            '"' => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(ch),
        }
    }

    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }

    rows
}

/// Flattens a JSON document into `key: value` lines. Nested keys accumulate
/// as a prefix and array elements are written as `[i]`.
pub fn json_to_text(bytes: &[u8]) -> Result<String, ExtractionError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|error| ExtractionError::new(FileType::Json, error.to_string()))?;

    let mut text = String::new();
    flatten_json(&value, "", &mut text);
    Ok(text)
}

fn flatten_json(value: &Value, prefix: &str, out: &mut String) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                flatten_json(nested, &format!("{prefix}{key}: "), out);
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                flatten_json(item, &format!("{prefix}[{index}] "), out);
            }
        }
        Value::String(text) => {
            out.push_str(prefix);
            out.push_str(text);
            out.push('\n');
        }
        scalar => {
            out.push_str(prefix);
            out.push_str(&scalar.to_string());
            out.push('\n');
        }
    }
}

/// Text of every page joined by newlines. Pages that fail to decode or carry
/// no text are skipped.
pub fn pdf_to_text(bytes: &[u8]) -> Result<String, ExtractionError> {
    let document = Document::load_mem(bytes)
        .map_err(|error| ExtractionError::new(FileType::Pdf, error.to_string()))?;

    let mut pages = Vec::new();
    for page_no in document.get_pages().keys().copied() {
        match document.extract_text(&[page_no]) {
            Ok(text) if !text.trim().is_empty() => pages.push(text),
            Ok(_) => debug!(page = page_no, "pdf page has no text"),
            Err(error) => debug!(page = page_no, %error, "skipping unreadable pdf page"),
        }
    }

    Ok(pages.join("\n"))
}

/// Visible paragraph text from `word/document.xml`, one paragraph per line.
pub fn docx_to_text(bytes: &[u8]) -> Result<String, ExtractionError> {
    let fail = |reason: String| ExtractionError::new(FileType::Docx, reason);

    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|error| fail(error.to_string()))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|error| fail(format!("word/document.xml: {error}")))?
        .read_to_string(&mut xml)
        .map_err(|error| fail(error.to_string()))?;

    let paragraph_re = Regex::new(r"(?s)<w:p\b[^>]*?(?:/>|>(.*?)</w:p>)")
        .map_err(|error| fail(error.to_string()))?;
    let run_re =
        Regex::new(r"<w:t(?:\s[^>]*)?>([^<]*)</w:t>").map_err(|error| fail(error.to_string()))?;

    let mut paragraphs = Vec::new();
    for paragraph in paragraph_re.captures_iter(&xml) {
        let Some(body) = paragraph.get(1) else {
            continue;
        };
        let text: String = run_re
            .captures_iter(body.as_str())
            .filter_map(|run| run.get(1))
            .map(|run| unescape_xml(run.as_str()))
            .collect();

        if !text.trim().is_empty() {
            paragraphs.push(text);
        }
    }

    Ok(paragraphs.join("\n"))
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    #[test]
    fn markdown_keeps_prose_only() -> Result<(), ExtractionError> {
        let source = "# Title\n\nSome **bold** and *italic* text with a [link](http://x.y).\n\n\
                      ![diagram](img.png)\n\n```rust\nfn main() {}\n```\nRun `cargo` now.";
        let text = strip_markdown(source)?;

        assert!(text.starts_with("Title"));
        assert!(text.contains("Some bold and italic text with a link."));
        assert!(!text.contains("diagram"));
        assert!(!text.contains("img.png"));
        assert!(!text.contains("fn main"));
        assert!(!text.contains("cargo"));
        assert!(!text.contains('#'));
        Ok(())
    }

    #[test]
    fn csv_rows_become_header_value_lines() {
        let text = csv_to_text("name,role,team\nAda,engineer,\n\"Lovelace, A\",\"says \"\"hi\"\"\",core\n");
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "name: Ada, role: engineer");
        assert_eq!(lines[1], "name: Lovelace, A, role: says \"hi\", team: core");
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn csv_with_only_headers_is_rejected() {
        let result = extract_text(b"a,b,c\n", FileType::Csv);
        assert!(result.is_err());
    }

    #[test]
    fn json_is_flattened_in_document_order() -> Result<(), ExtractionError> {
        let text = json_to_text(br#"{"zeta": 1, "alpha": {"name": "pump", "tags": ["a", "b"]}, "ok": true}"#)?;
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines,
            vec![
                "zeta: 1",
                "alpha: name: pump",
                "alpha: tags: [0] a",
                "alpha: tags: [1] b",
                "ok: true",
            ]
        );
        Ok(())
    }

    #[test]
    fn malformed_json_is_an_extraction_error() {
        let error = extract_text(b"{not json", FileType::Json).unwrap_err();
        assert_eq!(error.file_type, FileType::Json);
    }

    #[test]
    fn docx_paragraphs_are_joined_with_newlines() -> Result<(), Box<dyn std::error::Error>> {
        let xml = r#"<?xml version="1.0"?><w:document xmlns:w="x"><w:body>
            <w:p w:rsidR="1"><w:pPr><w:jc w:val="left"/></w:pPr><w:r><w:t>Hello</w:t></w:r><w:r><w:t xml:space="preserve"> world</w:t></w:r></w:p>
            <w:p/>
            <w:p><w:r><w:tab/><w:t>Fish &amp; chips</w:t></w:r></w:p>
            </w:body></w:document>"#;

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer.start_file("word/document.xml", SimpleFileOptions::default())?;
        writer.write_all(xml.as_bytes())?;
        let bytes = writer.finish()?.into_inner();

        let text = extract_text(&bytes, FileType::Docx)?;
        assert_eq!(text, "Hello world\nFish & chips");
        Ok(())
    }

    #[test]
    fn corrupt_binary_formats_fail_cleanly() {
        assert!(extract_text(b"%PDF-1.4\n%broken", FileType::Pdf).is_err());
        assert!(extract_text(b"not a zip", FileType::Docx).is_err());
    }

    #[test]
    fn blank_and_undecodable_text_is_rejected() {
        assert!(extract_text(b"  \n\t", FileType::Text).is_err());
        assert!(extract_text(&[0xff, 0xfe, 0x00], FileType::Text).is_err());
        assert_eq!(
            extract_text(b"plain words", FileType::Text).ok().as_deref(),
            Some("plain words")
        );
    }
}
