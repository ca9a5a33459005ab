use std::fs;
use std::io::{self, Write};

use anyhow::{Context, Result, bail};
use serde_json::Value;
use tracing::info;

use crate::cli::{CorrectArgs, resolve_artifact_dir};
use crate::engine::corrector::SegmentCorrector;
use crate::engine::outline::flatten_nested;
use crate::model::CorrectionResult;

pub fn run(args: CorrectArgs) -> Result<()> {
    let artifact_dir = resolve_artifact_dir(&args.cache_root, args.artifact_dir.as_ref());
    let raw = fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let segments = parse_outline_input(&raw)
        .with_context(|| format!("failed to parse outline in {}", args.input.display()))?;

    let corrector = SegmentCorrector::shared(&artifact_dir)?;
    let result = corrector.correct(&args.market, &segments, args.confidence)?;

    info!(
        market = %args.market,
        input_segments = segments.len(),
        output_segments = result.corrected_segments.len(),
        changes = result.changes.len(),
        confidence = args.confidence,
        "outline corrected"
    );

    if args.json {
        write_json_result(&result)
    } else {
        write_text_result(&args.market, &result)
    }
}

/// Accepts a JSON string array, the generator's nested JSON, or one segment per line.
pub(crate) fn parse_outline_input(raw: &str) -> Result<Vec<String>> {
    let trimmed = raw.trim_start();
    if !(trimmed.starts_with('[') || trimmed.starts_with('{')) {
        return Ok(raw
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect());
    }

    let value: Value = serde_json::from_str(trimmed).context("input is not valid JSON")?;
    if let Value::Array(items) = &value {
        if items.iter().all(Value::is_string) {
            return Ok(items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect());
        }
    }

    let lines = flatten_nested(&value);
    if lines.is_empty() {
        bail!("JSON input holds neither segment strings nor nested segments");
    }
    Ok(lines)
}

fn write_json_result(result: &CorrectionResult) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    serde_json::to_writer_pretty(&mut output, result)
        .context("failed to serialize correction json output")?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}

fn write_text_result(market: &str, result: &CorrectionResult) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());

    writeln!(output, "Market: {market}")?;
    for line in &result.corrected_segments {
        writeln!(output, "{line}")?;
    }

    writeln!(output)?;
    writeln!(output, "Changes: {}", result.changes.len())?;
    for change in &result.changes {
        writeln!(
            output,
            "  [{}] {} (parent: {}) {}",
            change.kind.as_str(),
            change.segment,
            change.parent.as_deref().unwrap_or("-"),
            change.reason
        )?;
    }

    if !result.similar_markets.is_empty() {
        writeln!(output, "Similar markets:")?;
        for market in &result.similar_markets {
            writeln!(output, "  {} ({:.3})", market.market, market.similarity)?;
        }
    }

    output.flush()?;
    Ok(())
}
