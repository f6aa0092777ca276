use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use gridline_core::actions::ExportFormat;
use gridline_core::grid::TableView;
use gridline_core::value::{CellValue, NULL_TEXT};
use gridline_core::workspace::GridWorkspace;
use serde_json::{Map, Number, Value};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write export file at {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize JSON export: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn encode(format: ExportFormat, view: &TableView) -> Result<String, ExportError> {
    Ok(match format {
        ExportFormat::Csv => to_csv(view),
        ExportFormat::Json => to_json(view)?,
        ExportFormat::Xml => to_xml(view),
        ExportFormat::Html => to_html(view, "Query results"),
        ExportFormat::Markdown => to_markdown(view),
        ExportFormat::Clipboard => to_clipboard(view),
    })
}

/// Writes the encoded view and returns the number of data rows written.
pub fn export_to_file(path: &Path, format: ExportFormat, view: &TableView) -> Result<usize, ExportError> {
    let content = encode(format, view)?;
    fs::write(path, content).map_err(|source| ExportError::Write {
        path: path.display().to_string(),
        source,
    })?;
    info!(path = %path.display(), format = format.label(), rows = view.rows.len(), "exported results");
    Ok(view.rows.len())
}

/// Clipboard text for the workspace's current selection.
#[must_use]
pub fn copy_selection_text(workspace: &GridWorkspace) -> Option<String> {
    workspace.selection_view().map(|view| to_clipboard(&view))
}

fn cell<'a>(row: &'a [CellValue], column_index: usize) -> &'a CellValue {
    const NULL: &CellValue = &CellValue::Null;
    row.get(column_index).unwrap_or(NULL)
}

#[must_use]
pub fn to_csv(view: &TableView) -> String {
    let mut content = String::new();
    content.push_str(
        &view
            .headers()
            .into_iter()
            .map(csv_escape)
            .collect::<Vec<_>>()
            .join(","),
    );
    content.push('\n');

    for row in &view.rows {
        let values = (0..view.columns.len())
            .map(|column_index| match cell(row, column_index) {
                CellValue::Null => String::new(),
                value => csv_escape(&value.display_text()),
            })
            .collect::<Vec<_>>();
        content.push_str(&values.join(","));
        content.push('\n');
    }
    content
}

fn csv_escape(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn to_json(view: &TableView) -> Result<String, ExportError> {
    let headers = view.headers();
    let mut records = Vec::with_capacity(view.rows.len());
    for row in &view.rows {
        let mut object = Map::with_capacity(headers.len());
        for (column_index, header) in headers.iter().enumerate() {
            object.insert((*header).to_string(), json_value(cell(row, column_index)));
        }
        records.push(Value::Object(object));
    }
    Ok(serde_json::to_string_pretty(&records)?)
}

fn json_value(value: &CellValue) -> Value {
    match value {
        CellValue::Null => Value::Null,
        CellValue::Bool(flag) => Value::Bool(*flag),
        CellValue::Int(number) => Value::Number((*number).into()),
        CellValue::Float(number) => Number::from_f64(*number).map_or(Value::Null, Value::Number),
        CellValue::Text(text) => Value::String(text.clone()),
    }
}

#[must_use]
pub fn to_xml(view: &TableView) -> String {
    let names = view
        .headers()
        .into_iter()
        .map(xml_element_name)
        .collect::<Vec<_>>();
    let mut content = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<results>\n");
    for row in &view.rows {
        content.push_str("  <row>\n");
        for (column_index, name) in names.iter().enumerate() {
            let text = match cell(row, column_index) {
                CellValue::Null => String::new(),
                value => escape_markup(&value.display_text()),
            };
            let _ = writeln!(content, "    <{name}>{text}</{name}>");
        }
        content.push_str("  </row>\n");
    }
    content.push_str("</results>\n");
    content
}

/// Keeps `[A-Za-z0-9_-]`, replacing anything else with `_`, and prefixes `_`
/// when the name would not start with a letter or underscore.
#[must_use]
pub fn xml_element_name(header: &str) -> String {
    let mut name = header
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
                ch
            } else {
                '_'
            }
        })
        .collect::<String>();
    if !name
        .chars()
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
    {
        name.insert(0, '_');
    }
    name
}

fn escape_markup(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[must_use]
pub fn to_html(view: &TableView, title: &str) -> String {
    let mut content = String::new();
    content.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    let _ = writeln!(content, "<title>{}</title>", escape_markup(title));
    content.push_str(
        "<style>\ntable { border-collapse: collapse; font-family: monospace; }\n\
         th, td { border: 1px solid #ccc; padding: 2px 6px; }\n\
         td.null { color: #999; font-style: italic; }\n</style>\n</head>\n<body>\n<table>\n<thead>\n<tr>",
    );
    for header in view.headers() {
        let _ = write!(content, "<th>{}</th>", escape_markup(header));
    }
    content.push_str("</tr>\n</thead>\n<tbody>\n");
    for row in &view.rows {
        content.push_str("<tr>");
        for column_index in 0..view.columns.len() {
            match cell(row, column_index) {
                CellValue::Null => {
                    let _ = write!(content, "<td class=\"null\">{NULL_TEXT}</td>");
                }
                value => {
                    let _ = write!(content, "<td>{}</td>", escape_markup(&value.display_text()));
                }
            }
        }
        content.push_str("</tr>\n");
    }
    content.push_str("</tbody>\n</table>\n");
    let _ = writeln!(
        content,
        "<p class=\"summary\">{} rows, {} columns</p>",
        view.rows.len(),
        view.columns.len()
    );
    content.push_str("</body>\n</html>\n");
    content
}

#[must_use]
pub fn to_markdown(view: &TableView) -> String {
    let mut content = String::new();
    let headers = view.headers();
    content.push_str("| ");
    content.push_str(
        &headers
            .iter()
            .map(|header| markdown_escape(header))
            .collect::<Vec<_>>()
            .join(" | "),
    );
    content.push_str(" |\n|");
    content.push_str(&" --- |".repeat(headers.len()));
    content.push('\n');

    for row in &view.rows {
        let values = (0..view.columns.len())
            .map(|column_index| markdown_escape(&cell(row, column_index).display_text()))
            .collect::<Vec<_>>();
        content.push_str("| ");
        content.push_str(&values.join(" | "));
        content.push_str(" |\n");
    }
    content
}

fn markdown_escape(value: &str) -> String {
    value
        .replace('|', "\\|")
        .replace("\r\n", "<br>")
        .replace(['\n', '\r'], "<br>")
}

/// Tab-separated text with a header line; tabs and line breaks inside
/// values become spaces.
#[must_use]
pub fn to_clipboard(view: &TableView) -> String {
    let mut content = view
        .headers()
        .into_iter()
        .map(clipboard_clean)
        .collect::<Vec<_>>()
        .join("\t");
    content.push('\n');
    for row in &view.rows {
        let values = (0..view.columns.len())
            .map(|column_index| clipboard_clean(&cell(row, column_index).display_text()))
            .collect::<Vec<_>>();
        content.push_str(&values.join("\t"));
        content.push('\n');
    }
    content
}

fn clipboard_clean(value: &str) -> String {
    value.replace(['\t', '\n', '\r'], " ")
}
