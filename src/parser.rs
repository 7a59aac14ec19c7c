//! Parser Set: decode raw bytes of each supported artifact type into
//! normalized UTF-8 text, dispatched by extension.

use crate::error::{Error, ParseError, Result};
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use regex::Regex;
use std::io::Cursor;
use std::time::Duration;

/// Extensions the Parser Set accepts (§6.4).
pub const ALLOWED_EXTENSIONS: &[&str] = &["txt", "md", "pdf", "xlsx", "xls", "csv"];

pub fn is_allowed_extension(ext: &str) -> bool {
    ALLOWED_EXTENSIONS.contains(&ext.to_lowercase().as_str())
}

/// Decode raw bytes to normalized UTF-8 text, dispatching on `extension`.
///
/// `use_rich_pdf` selects the richer structured-extraction variant for PDFs
/// when set; since no structured-extraction service is vendored, the plain
/// extractor is used either way and the flag is accepted as a hint.
///
/// Blank decoded text (an empty upload, a spreadsheet with no rows, ...) is
/// returned as-is rather than rejected; the publish pipeline treats it as a
/// zero-chunk document and publishes it immediately (§8).
pub fn parse_bytes(extension: &str, bytes: &[u8], use_rich_pdf: bool) -> Result<String> {
    let ext = extension.to_lowercase();
    let text = match ext.as_str() {
        "txt" | "md" => String::from_utf8_lossy(bytes).into_owned(),
        "pdf" => parse_pdf(bytes, use_rich_pdf)?,
        "xlsx" | "xls" => parse_spreadsheet(bytes)?,
        "csv" => parse_csv(bytes)?,
        other => return Err(Error::Parse(ParseError::UnsupportedExtension(other.to_string()))),
    };
    Ok(text)
}

/// Fetch a URL with a 10-second timeout and depth-1 recursion (fetch only
/// the given page, do not follow links), then extract visible text.
pub async fn parse_url(url: &str) -> Result<String> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(Error::BadInput(format!("not a valid URL: {url}")));
    }
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .map_err(Error::Http)?;
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| Error::Parse(ParseError::FetchFailed(e.to_string())))?;
    let html = response
        .text()
        .await
        .map_err(|e| Error::Parse(ParseError::FetchFailed(e.to_string())))?;
    let text = extract_text_from_html(&html);
    if text.trim().is_empty() {
        return Err(Error::Parse(ParseError::EmptyOutput));
    }
    Ok(text)
}

/// Strip HTML tags and collapse consecutive blank lines.
pub fn extract_text_from_html(html: &str) -> String {
    let tag_re = Regex::new(r"(?s)<script.*?</script>|<style.*?</style>|<[^>]*>").unwrap();
    let stripped = tag_re.replace_all(html, " ");

    let blank_re = Regex::new(r"\n{3,}").unwrap();
    let lines: Vec<&str> = stripped
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect();
    let joined = lines.join("\n");
    blank_re.replace_all(&joined, "\n\n").into_owned()
}

fn parse_pdf(bytes: &[u8], use_rich_pdf: bool) -> Result<String> {
    if use_rich_pdf {
        tracing::warn!("rich PDF extraction requested but not available; falling back to plain extraction");
    }
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| Error::Parse(ParseError::DecodeFailed { detail: e.to_string() }))?;
    Ok(clean_pdf_spaces(&text))
}

/// Collapse runs of ≥3 newlines to exactly two; collapse runs of ≥2
/// whitespace in a line to one; join sentence-incomplete lines to the next
/// non-blank line with a single space; preserve paragraph breaks.
fn clean_pdf_spaces(text: &str) -> String {
    let multi_newline = Regex::new(r"\n{3,}").unwrap();
    let collapsed_newlines = multi_newline.replace_all(text, "\n\n");

    let inline_ws = Regex::new(r"[ \t]{2,}").unwrap();
    let cleaned_lines: Vec<String> = collapsed_newlines
        .lines()
        .map(|line| {
            if line.trim().is_empty() {
                String::new()
            } else {
                inline_ws.replace_all(line.trim(), " ").into_owned()
            }
        })
        .collect();

    let mut out = String::new();
    let mut prev_ends_sentence = true;
    for (i, line) in cleaned_lines.iter().enumerate() {
        if line.is_empty() {
            out.push('\n');
            prev_ends_sentence = true;
            continue;
        }
        if i > 0 && !prev_ends_sentence && !out.ends_with('\n') {
            out.push(' ');
        } else if i > 0 && !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(line);
        prev_ends_sentence = line.ends_with('.') || line.ends_with('!') || line.ends_with('?');
    }
    out.trim().to_string()
}

fn parse_spreadsheet(bytes: &[u8]) -> Result<String> {
    let cursor = Cursor::new(bytes.to_vec());
    let mut workbook = open_workbook_auto_from_rs(cursor)
        .map_err(|e| Error::Parse(ParseError::DecodeFailed { detail: e.to_string() }))?;
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| Error::Parse(ParseError::DecodeFailed { detail: "no sheets".into() }))?;
    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| Error::Parse(ParseError::DecodeFailed { detail: e.to_string() }))?;

    let rows: Vec<Vec<Data>> = range.rows().map(|r| r.to_vec()).collect();
    Ok(rows_to_tsv(&rows))
}

fn parse_csv(bytes: &[u8]) -> Result<String> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);
    let mut rows: Vec<Vec<Data>> = Vec::new();
    if let Ok(headers) = reader.headers() {
        rows.push(headers.iter().map(|h| Data::String(h.to_string())).collect());
    }
    for record in reader.records().flatten() {
        rows.push(record.iter().map(|f| cell_from_str(f)).collect());
    }
    Ok(rows_to_tsv(&rows))
}

fn cell_from_str(s: &str) -> Data {
    if let Ok(f) = s.parse::<f64>() {
        Data::Float(f)
    } else {
        Data::String(s.to_string())
    }
}

/// Drop fully empty rows and columns, round numeric cells to 2 decimal
/// places, and serialize to tab-separated text with empty cells as "".
fn rows_to_tsv(rows: &[Vec<Data>]) -> String {
    let width = rows.iter().map(|r| r.len()).max().unwrap_or(0);

    let mut keep_col = vec![false; width];
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if !cell_is_empty(cell) {
                keep_col[i] = true;
            }
        }
    }

    rows.iter()
        .filter(|row| row.iter().any(|c| !cell_is_empty(c)))
        .map(|row| {
            (0..width)
                .filter(|&i| keep_col[i])
                .map(|i| row.get(i).map(format_cell).unwrap_or_default())
                .collect::<Vec<_>>()
                .join("\t")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn cell_is_empty(cell: &Data) -> bool {
    matches!(cell, Data::Empty) || matches!(cell, Data::String(s) if s.trim().is_empty())
}

fn format_cell(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::Float(f) => format!("{:.2}", f),
        Data::Int(i) => i.to_string(),
        Data::String(s) => s.clone(),
        Data::Bool(b) => b.to_string(),
        other => format!("{other:?}"),
    }
}
