//! Dataset export to CSV, Excel (.xlsx) and JSON.
//!
//! Files land in `<data_dir>/exports/<subject_key>_master.<ext>` and are
//! written atomically (temp file, then rename).

use std::path::{Path, PathBuf};

use rust_xlsxwriter::{Color, Format, Workbook};
use serde::Serialize;
use tracing::{info, instrument};

use subjectscan_shared::{ContentItem, Result, ScanError, SubjectKey};

/// Column headers shared by the tabular formats.
pub const EXPORT_COLUMNS: [&str; 9] = [
    "Title",
    "URL",
    "Snippet",
    "Domain",
    "Confidence",
    "Risk Score",
    "Discovery Date",
    "Last Checked",
    "DMCA Status",
];

const SHEET_NAME: &str = "Content Leaks";
const HEADER_FILL: u32 = 0xD3D3D3;

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Excel,
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Excel => "xlsx",
            Self::Json => "json",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = ScanError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "excel" | "xlsx" => Ok(Self::Excel),
            "json" => Ok(Self::Json),
            other => Err(ScanError::validation(format!(
                "unsupported export format: {other} (expected csv, excel or json)"
            ))),
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Csv => "csv",
            Self::Excel => "excel",
            Self::Json => "json",
        })
    }
}

/// A written export file.
#[derive(Debug, Clone, Serialize)]
pub struct ExportedFile {
    pub path: PathBuf,
    pub format: ExportFormat,
    pub rows: usize,
}

/// Export `items` for `subject` into `exports_dir`.
///
/// Returns `Ok(None)` when there is nothing to export; no file is created.
#[instrument(skip_all, fields(subject = %subject, format = %format, items = items.len()))]
pub fn export_items(
    items: &[ContentItem],
    subject: &SubjectKey,
    exports_dir: &Path,
    format: ExportFormat,
) -> Result<Option<ExportedFile>> {
    if items.is_empty() {
        info!("no data to export");
        return Ok(None);
    }

    let bytes = match format {
        ExportFormat::Csv => render_csv(items)?,
        ExportFormat::Excel => render_xlsx(items)?,
        ExportFormat::Json => serde_json::to_vec_pretty(items)
            .map_err(|e| ScanError::Export(format!("JSON encoding failed: {e}")))?,
    };

    std::fs::create_dir_all(exports_dir).map_err(|e| ScanError::io(exports_dir, e))?;
    let filename = format!("{subject}_master.{}", format.extension());
    let path = exports_dir.join(&filename);
    write_atomic(&path, &bytes)?;

    info!(path = %path.display(), rows = items.len(), "dataset exported");

    Ok(Some(ExportedFile {
        path,
        format,
        rows: items.len(),
    }))
}

/// Write to a hidden temp file next to `target`, then rename over it.
fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = dir.join(format!(".{name}.tmp"));

    std::fs::write(&temp, bytes).map_err(|e| ScanError::io(&temp, e))?;
    std::fs::rename(&temp, target).map_err(|e| ScanError::io(target, e))?;
    Ok(())
}

fn row_fields(item: &ContentItem) -> [String; 9] {
    [
        item.result.title.clone(),
        item.result.url.clone(),
        item.result.snippet.clone(),
        item.domain.clone(),
        item.confidence.to_string(),
        item.risk_score.to_string(),
        item.discovered_date.to_string(),
        item.last_checked.to_string(),
        item.dmca_status.as_str().to_string(),
    ]
}

fn render_csv(items: &[ContentItem]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(EXPORT_COLUMNS)
        .map_err(|e| ScanError::Export(e.to_string()))?;
    for item in items {
        writer
            .write_record(row_fields(item))
            .map_err(|e| ScanError::Export(e.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|e| ScanError::Export(format!("CSV flush failed: {e}")))
}

fn render_xlsx(items: &[ContentItem]) -> Result<Vec<u8>> {
    let xlsx_err = |e: rust_xlsxwriter::XlsxError| ScanError::Export(e.to_string());

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(SHEET_NAME).map_err(xlsx_err)?;

    let header = Format::new()
        .set_bold()
        .set_background_color(Color::RGB(HEADER_FILL));
    for (col, title) in EXPORT_COLUMNS.iter().enumerate() {
        let col = col as u16;
        sheet
            .write_string_with_format(0, col, *title, &header)
            .map_err(xlsx_err)?;
        sheet.set_column_width(col, 20).map_err(xlsx_err)?;
    }

    for (idx, item) in items.iter().enumerate() {
        let row = idx as u32 + 1;
        let fields = row_fields(item);
        for (col, value) in fields.iter().enumerate() {
            let col = col as u16;
            match col {
                4 => sheet.write_number(row, col, item.confidence),
                5 => sheet.write_number(row, col, item.risk_score),
                _ => sheet.write_string(row, col, value.as_str()),
            }
            .map_err(xlsx_err)?;
        }
    }

    workbook.save_to_buffer().map_err(xlsx_err)
}
