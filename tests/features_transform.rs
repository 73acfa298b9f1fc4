use attrition_insight::{
    assert_schema_compatible, build_feature_schema, derive_row, load_records_csv, parse_date,
    score_batch_at, years_between, Classifier, EmployeeRecord, LogisticModel,
    PreprocessingPipeline, RecordBatch, RiskLabel, SchemaError, ScoringError,
    FEATURE_SCHEMA_VERSION, NUMERIC_FEATURE_COUNT,
};
use chrono::NaiveDate;
use tempfile::NamedTempFile;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn categories(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| (*name).to_string()).collect()
}

fn employee(department: &str, salary: f64, hire_date: &str) -> EmployeeRecord {
    EmployeeRecord {
        hire_date: Some(hire_date.to_string()),
        last_promotion_date: Some("2024-06-30".to_string()),
        salary: Some(salary),
        tenure: Some(3.0),
        engagement_score: Some(3.0),
        working_hours_per_month: Some(160.0),
        kpi_score: Some(0.8),
        work_life_balance_score: Some(3.0),
        overtime_hours: Some(4.0),
        job_satisfaction: Some(4.0),
        number_of_projects: Some(2.0),
        distance_from_home: Some(7.0),
        trainings_and_certifications: Some(1.0),
        department: Some(department.to_string()),
        ..EmployeeRecord::default()
    }
}

#[test]
fn schema_order_and_fingerprint_are_deterministic() {
    let schema_a = build_feature_schema(&categories(&["Engineering", "HR", "Sales"]));
    let schema_b = build_feature_schema(&categories(&["Engineering", "HR", "Sales"]));

    assert_eq!(schema_a.version, FEATURE_SCHEMA_VERSION);
    assert_eq!(schema_a.width(), 16);
    assert_eq!(schema_a.columns[0].name, "salary");
    assert_eq!(schema_a.columns[10].name, "trainings_and_certifications");
    assert_eq!(schema_a.columns[11].name, "years_since_last_promotion");
    assert_eq!(schema_a.columns[12].name, "employment_age");
    assert_eq!(schema_a.columns[13].name, "department_Engineering");
    assert_eq!(schema_a.columns[15].name, "department_Sales");
    assert_eq!(schema_a, schema_b);
    assert_eq!(schema_a.fingerprint.len(), 64);
}

#[test]
fn vocabulary_changes_the_fingerprint() {
    let base = build_feature_schema(&categories(&["HR", "Sales"]));
    let wider = build_feature_schema(&categories(&["HR", "Marketing", "Sales"]));

    assert_ne!(base.fingerprint, wider.fingerprint);
    assert!(assert_schema_compatible(FEATURE_SCHEMA_VERSION, &base.fingerprint, &base).is_ok());
    assert!(matches!(
        assert_schema_compatible(FEATURE_SCHEMA_VERSION, &base.fingerprint, &wider),
        Err(SchemaError::FingerprintMismatch { .. })
    ));
    assert!(matches!(
        assert_schema_compatible(FEATURE_SCHEMA_VERSION + 1, &base.fingerprint, &base),
        Err(SchemaError::VersionMismatch { .. })
    ));
}

#[test]
fn date_features_use_days_over_365() {
    let reference = date(2025, 6, 30);
    let row = derive_row(&employee("HR", 1.0, "2020-06-30"), reference);

    let expected_age = (reference - date(2020, 6, 30)).num_days() as f64 / 365.0;
    assert_eq!(row.numeric[12], Some(expected_age));
    assert_eq!(row.numeric[11], Some(1.0));
    assert_eq!(years_between(reference, date(2025, 6, 30)), 0.0);
    assert_eq!(parse_date("2025/06/30"), Some(reference));
    assert_eq!(parse_date("06/30/2025"), Some(reference));
    assert_eq!(parse_date("yesterday"), None);
}

#[test]
fn future_dates_yield_negative_durations() {
    let row = derive_row(&employee("HR", 1.0, "2026-06-30"), date(2025, 6, 30));
    assert_eq!(row.numeric[12], Some(-1.0));
}

#[test]
fn model_compatibility_is_checked_against_pipeline_layout() {
    let batch = RecordBatch::new(vec![
        employee("Sales", 40_000.0, "2019-01-01"),
        employee("HR", 60_000.0, "2021-01-01"),
    ]);
    let mut pipeline = PreprocessingPipeline::new();
    pipeline.fit_at(&batch, date(2025, 6, 30)).expect("fit");
    let schema = pipeline.schema().expect("schema").clone();

    let matching = LogisticModel {
        intercept: 0.0,
        coefficients: vec![0.0; schema.width()],
        feature_columns: Some(schema.column_names()),
        feature_fingerprint: Some(schema.fingerprint.clone()),
    };
    assert!(matching.ensure_compatible(&schema).is_ok());

    let narrow = LogisticModel {
        coefficients: vec![0.0; NUMERIC_FEATURE_COUNT],
        ..matching.clone()
    };
    assert!(matches!(
        narrow.ensure_compatible(&schema),
        Err(ScoringError::WidthMismatch { .. })
    ));

    let mut renamed_columns = schema.column_names();
    renamed_columns.swap(13, 14);
    let reordered = LogisticModel {
        feature_columns: Some(renamed_columns),
        feature_fingerprint: None,
        ..matching
    };
    assert!(matches!(
        reordered.ensure_compatible(&schema),
        Err(ScoringError::ColumnMismatch { position: 13, .. })
    ));
}

#[test]
fn model_file_scores_batches_loaded_from_csv() {
    let csv = "EmployeeID,hire_date,last_promotion_date,salary,tenure,engagement_score,working_hours_per_month,kpi_score,work_life_balance_score,overtime_hours,job_satisfaction,number_of_projects,distance_from_home,trainings_and_certifications,department\n\
A1,2019-01-01,2024-01-01,40000,6,1,200,0.4,1,30,1,8,40,0,Sales\n\
A2,2022-01-01,2024-06-01,90000,3,5,150,0.9,5,0,5,2,5,3,HR\n";
    let csv_file = NamedTempFile::new().expect("temp csv");
    std::fs::write(csv_file.path(), csv).expect("write csv");
    let batch = load_records_csv(csv_file.path()).expect("load csv");

    let reference = date(2025, 6, 30);
    let mut pipeline = PreprocessingPipeline::new();
    pipeline.fit_at(&batch, reference).expect("fit");

    // Weight only on engagement_score: the low-engagement employee scores high.
    let mut coefficients = vec![0.0; pipeline.schema().expect("schema").width()];
    coefficients[2] = -3.0;
    let model_file = NamedTempFile::new().expect("temp model");
    std::fs::write(
        model_file.path(),
        serde_json::json!({ "intercept": 0.0, "coefficients": coefficients }).to_string(),
    )
    .expect("write model");
    let model = LogisticModel::load(model_file.path()).expect("load model");

    let scored = score_batch_at(&pipeline, &model, &batch, reference).expect("score");
    assert_eq!(scored.len(), 2);
    assert_eq!(scored[0].employee_id, "A1");
    assert_eq!(scored[0].risk_label, RiskLabel::High);
    assert_eq!(scored[1].risk_label, RiskLabel::Low);
    assert!((scored[0].attrition_probability + scored[1].attrition_probability - 1.0).abs() < 1e-12);
}
