use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use attrition_insight::{
    init_logging, load_records_csv, logging_config_from_env, score_batch, server_config_from_env,
    summarize, write_scored_csv, Classifier, LogisticModel, PreprocessingPipeline, ReportScope,
};

const USAGE: &str = "usage: score_report <employees.csv> <report.csv> [--high-risk-only]";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;

    let mut args = std::env::args().skip(1);
    let input = args.next().map(PathBuf::from).ok_or(USAGE)?;
    let output = args.next().map(PathBuf::from).ok_or(USAGE)?;
    let scope = match args.next().as_deref() {
        Some("--high-risk-only") => ReportScope::HighRiskOnly,
        Some(other) => return Err(format!("unknown flag '{other}'\n{USAGE}").into()),
        None => ReportScope::FullOrganization,
    };

    let cfg = server_config_from_env();
    let pipeline = PreprocessingPipeline::from_artifact(&cfg.pipeline_path)?;
    let model = LogisticModel::load(&cfg.model_path)?;
    if let Some(schema) = pipeline.schema() {
        model.ensure_compatible(schema)?;
    }

    let batch = load_records_csv(&input)?;
    let scored = score_batch(&pipeline, &model, &batch)?;
    let written = write_scored_csv(BufWriter::new(File::create(&output)?), &scored, scope)?;
    let summary = summarize(&scored);

    println!(
        "scored {} employees, {} at risk; wrote {} rows to {}",
        summary.total_employees,
        summary.at_risk_employees,
        written,
        output.display()
    );
    for department in &summary.departments {
        println!(
            "  {:<20} employees={:<5} mean_risk={:.3}",
            department.department, department.employees, department.mean_risk
        );
    }

    Ok(())
}
