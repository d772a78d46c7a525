//! Rendering of item outcomes.
use std::io::Write;
use std::str::FromStr;

use varanno_core::models::AnnotationPayload;

use crate::batch::ItemOutcome;
use crate::error::{PipelineError, Result};

/// Header line of the TSV rendering.
pub const TSV_HEADER: &str = "#variant\tstatus\tdetail";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// `variant  status  detail`, one line per input item.
    #[default]
    Tsv,
    /// One JSON object per line.
    Json,
}

impl FromStr for OutputFormat {
    type Err = PipelineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tsv" => Ok(OutputFormat::Tsv),
            "json" | "jsonl" => Ok(OutputFormat::Json),
            other => Err(PipelineError::Config(format!("unknown output format '{}'", other))),
        }
    }
}

/// `source.field=value` pairs joined with `;`, sources and fields in name order.
fn render_annotations<'a>(annotations: impl Iterator<Item = (&'a String, &'a AnnotationPayload)>) -> String {
    let mut parts = Vec::new();
    for (source, payload) in annotations {
        for (field, value) in payload {
            parts.push(format!("{}.{}={}", source, field, value));
        }
    }
    parts.join(";")
}

///
/// Render one outcome as a TSV line (without the trailing newline).
///
pub fn tsv_line(outcome: &ItemOutcome) -> String {
    match outcome {
        ItemOutcome::Annotated { key, annotations } => {
            format!("{}\tannotated\t{}", key, render_annotations(annotations.iter()))
        }
        ItemOutcome::Unannotated { key } => format!("{}\tunannotated\t.", key),
        ItemOutcome::Rejected { input, reason } => {
            format!("{}\trejected\t{}", input.replace('\t', " "), reason)
        }
    }
}

///
/// Write outcomes in the requested format.
///
/// # Arguments
/// - writer: destination
/// - outcomes: item outcomes in the order they should appear
/// - format: TSV or JSON lines
pub fn write_outcomes<'a, W: Write>(
    writer: &mut W,
    outcomes: impl IntoIterator<Item = &'a ItemOutcome>,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Tsv => {
            writeln!(writer, "{}", TSV_HEADER)?;
            for outcome in outcomes {
                writeln!(writer, "{}", tsv_line(outcome))?;
            }
        }
        OutputFormat::Json => {
            for outcome in outcomes {
                serde_json::to_writer(&mut *writer, outcome).map_err(std::io::Error::other)?;
                writeln!(writer)?;
            }
        }
    }
    writer.flush()?;
    Ok(())
}
