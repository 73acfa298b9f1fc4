use std::path::PathBuf;

use attrition_insight::{
    init_logging, load_records_csv, logging_config_from_env, parse_date, today_utc,
    PreprocessingPipeline, DEFAULT_PIPELINE_PATH,
};

const USAGE: &str = "usage: fit_pipeline <training.csv> [artifact.json] [reference-date YYYY-MM-DD]";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;

    let mut args = std::env::args().skip(1);
    let input = args.next().map(PathBuf::from).ok_or(USAGE)?;
    let output = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PIPELINE_PATH));
    let reference_date = match args.next() {
        Some(raw) => parse_date(&raw).ok_or_else(|| format!("invalid reference date '{raw}'"))?,
        None => today_utc(),
    };

    let batch = load_records_csv(&input)?;
    let mut pipeline = PreprocessingPipeline::new();
    let features = pipeline.fit_transform_at(&batch, reference_date)?;
    pipeline.save(&output)?;

    println!(
        "fitted {} rows into {} features (fingerprint {}) -> {}",
        features.len(),
        features.width,
        features.fingerprint,
        output.display()
    );

    Ok(())
}
