use std::path::Path;

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OpenFlags};

use crate::model::TrainingRecord;

const SUBMISSIONS_QUERY: &str = "
    SELECT id, market_name, ai_gen_seg, segments
    FROM rd_submissions
    ORDER BY id
";

pub(crate) fn open_corpus_connection(db_path: &Path) -> Result<Connection> {
    if !db_path.is_file() {
        bail!("submission database not found: {}", db_path.display());
    }

    Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("failed to open submission database: {}", db_path.display()))
}

/// Reads every reviewed submission in id order.
pub(crate) fn load_training_records(connection: &Connection) -> Result<Vec<TrainingRecord>> {
    let mut statement = connection
        .prepare(SUBMISSIONS_QUERY)
        .context("failed to prepare rd_submissions query")?;
    let mut rows = statement.query([])?;

    let mut records = Vec::<TrainingRecord>::new();
    while let Some(row) = rows.next()? {
        let id = row.get::<_, i64>(0)?;
        let market_name = row.get::<_, Option<String>>(1)?.unwrap_or_default();
        let ai_segments = decode_segment_list(row.get::<_, Option<String>>(2)?, id, "ai_gen_seg")?;
        let corrected_segments =
            decode_segment_list(row.get::<_, Option<String>>(3)?, id, "segments")?;

        records.push(TrainingRecord::new(
            market_name.trim(),
            ai_segments,
            corrected_segments,
        ));
    }

    Ok(records)
}

fn decode_segment_list(raw: Option<String>, id: i64, column: &str) -> Result<Vec<String>> {
    let Some(raw) = raw.filter(|value| !value.trim().is_empty()) else {
        return Ok(Vec::new());
    };

    serde_json::from_str::<Vec<String>>(&raw)
        .with_context(|| format!("rd_submissions id={id}: {column} is not a JSON string array"))
}
