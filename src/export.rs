//! Scheduling spreadsheet for published pins.
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use crate::model::{PinItem, PinStatus};

pub const HEADER: [&str; 8] = [
    "Title",
    "Media URL",
    "Pinterest board",
    "Thumbnail",
    "Description",
    "Link",
    "Publish date",
    "Keywords",
];

/// One CSV line; field order matches [`HEADER`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportRow {
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "Media URL")]
    pub media_url: String,
    #[serde(rename = "Pinterest board")]
    pub board: String,
    #[serde(rename = "Thumbnail")]
    pub thumbnail: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Link")]
    pub link: String,
    #[serde(rename = "Publish date")]
    pub publish_date: String,
    #[serde(rename = "Keywords")]
    pub keywords: String,
}

impl ExportRow {
    /// `None` unless the item is `done`.
    pub fn from_item(item: &PinItem) -> Option<Self> {
        if item.status() != PinStatus::Done {
            return None;
        }
        let analysis = item.analysis()?;
        let publication = item.publication()?;
        Some(Self {
            title: analysis.title.clone(),
            media_url: publication.published_url.clone(),
            board: String::new(),
            thumbnail: String::new(),
            description: analysis.description.clone(),
            link: item.source_link().to_string(),
            publish_date: format_publish_date(publication.scheduled_publish_time),
            keywords: analysis.seo_keywords.clone(),
        })
    }
}

/// ISO-8601 in UTC with milliseconds, e.g. `2026-03-01T09:30:00.000Z`.
pub fn format_publish_date(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn export_rows(items: &[PinItem]) -> Vec<ExportRow> {
    items.iter().filter_map(ExportRow::from_item).collect()
}

/// Writes the header and one line per row. Fields are quoted only when
/// needed; embedded quotes are doubled.
pub fn write_csv<W: Write>(rows: &[ExportRow], writer: W) -> Result<()> {
    let mut out = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(writer);
    out.write_record(HEADER).context("failed to write CSV header")?;
    for row in rows {
        out.serialize(row).context("failed to write CSV row")?;
    }
    out.flush().context("failed to flush CSV output")?;
    Ok(())
}

pub fn to_csv_string(rows: &[ExportRow]) -> Result<String> {
    let mut buf = Vec::new();
    write_csv(rows, &mut buf)?;
    String::from_utf8(buf).context("CSV output is not UTF-8")
}

pub fn read_csv<R: Read>(reader: R) -> Result<Vec<ExportRow>> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(reader)
        .deserialize()
        .collect::<Result<Vec<ExportRow>, _>>()
        .context("failed to parse CSV export")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Analysis, ImagePair, Publication};
    use bytes::Bytes;
    use chrono::TimeZone;

    fn row(title: &str) -> ExportRow {
        ExportRow {
            title: title.into(),
            media_url: "https://cdn.example/a.jpg".into(),
            board: String::new(),
            thumbnail: String::new(),
            description: "Sweet, tangy, easy".into(),
            link: "https://example.com/a".into(),
            publish_date: "2026-03-01T09:30:00.000Z".into(),
            keywords: "lemon".into(),
        }
    }

    #[test]
    fn header_line_is_exact() {
        let csv = to_csv_string(&[]).unwrap();
        assert_eq!(
            csv,
            "Title,Media URL,Pinterest board,Thumbnail,Description,Link,Publish date,Keywords\n"
        );
    }

    #[test]
    fn embedded_quotes_are_doubled_and_round_trip() {
        let rows = vec![row(r#"He said "hi""#)];
        let csv = to_csv_string(&rows).unwrap();
        let line = csv.lines().nth(1).unwrap();
        assert!(line.starts_with(r#""He said ""hi""","#));
        assert!(line.contains(r#","Sweet, tangy, easy","#));
        assert_eq!(read_csv(csv.as_bytes()).unwrap(), rows);
    }

    #[test]
    fn only_done_items_are_exported() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();
        let analysis = Analysis {
            keyword: "Lemon Bars".into(),
            title: "Lemon Bars".into(),
            description: "Bright".into(),
            seo_keywords: "lemon, bars".into(),
        };
        let ready = PinItem::new("https://example.com/ready")
            .start_analysis()
            .unwrap()
            .analyzed(analysis.clone())
            .unwrap()
            .illustrated(ImagePair {
                top: Bytes::from_static(b"t"),
                bottom: Bytes::from_static(b"b"),
            })
            .unwrap()
            .composed(Bytes::from_static(b"f"))
            .unwrap();
        let done = ready
            .start_upload()
            .unwrap()
            .published(Publication {
                published_url: "https://cdn.example/lemon.jpg".into(),
                scheduled_publish_time: at,
            })
            .unwrap();

        let rows = export_rows(&[ready, done]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].media_url, "https://cdn.example/lemon.jpg");
        assert_eq!(rows[0].publish_date, "2026-03-01T09:30:00.000Z");
        assert_eq!(rows[0].keywords, "lemon, bars");
        assert!(rows[0].board.is_empty() && rows[0].thumbnail.is_empty());
    }
}
