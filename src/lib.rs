//! Attrition insight core crate.
//!
//! Current implemented scope:
//! - raw employee records and CSV loading
//! - feature derivation and the fitted preprocessing pipeline with durable artifacts
//! - classifier scoring, organization summaries and CSV export
//! - narrative retention insights and the HTTP surface

mod config;
mod features;
mod insights;
mod observability;
mod pipeline;
mod record;
mod scoring;
mod server;
mod summary;
mod transform;

pub use config::{
    insight_config_from_env, server_config_from_env, InsightConfig, ServerConfig,
    DEFAULT_ADDR, DEFAULT_LLM_BASE_URL, DEFAULT_LLM_MODEL, DEFAULT_LLM_TIMEOUT_MS, DEFAULT_MODEL_PATH,
    DEFAULT_PIPELINE_PATH,
};
pub use features::{
    assert_schema_compatible, build_feature_schema, derive_features, derive_row,
    input_schema_fingerprint, parse_date, today_utc, years_between, DerivedRow, FeatureColumn,
    FeatureDType, FeatureSchema, SchemaError, DAYS_PER_YEAR, EMPLOYMENT_AGE,
    FEATURE_SCHEMA_VERSION, NUMERIC_FEATURES, NUMERIC_FEATURE_COUNT, YEARS_SINCE_LAST_PROMOTION,
};
pub use insights::{
    build_profile, build_prompt, parse_insights, service_failure_insights,
    ChatCompletionsClient, DisabledInsightGenerator, EmployeeProfile, InsightError,
    InsightGenerator, RetentionInsights, SECTION_TITLES,
};
pub use observability::{
    init_logging, log_app_bind, log_app_start, log_artifacts_loaded, log_insights_mode,
    logging_config_from_env,
    LogFormat, LoggingConfig, LoggingInitError,
};
pub use pipeline::{
    FeatureMatrix, FittedState, PipelineError, PreprocessingPipeline, ARTIFACT_FORMAT_VERSION,
};
pub use record::{
    load_records_csv, read_records_csv, DataShapeError, EmployeeRecord, RecordBatch, RecordError,
    DEPARTMENT_COLUMN, EMPLOYEE_ID_COLUMN, HIRE_DATE_COLUMN, LAST_PROMOTION_DATE_COLUMN,
    RAW_NUMERIC_COLUMNS, REQUIRED_COLUMNS,
};
pub use scoring::{
    score_batch, score_batch_at, write_scored_csv, Classifier, LogisticModel, ReportScope,
    RiskLabel, ScoredEmployee, ScoringError, HIGH_RISK_THRESHOLD, PROBABILITY_COLUMN,
    RISK_FLAG_COLUMN, RISK_LABEL_COLUMN,
};
pub use server::{
    attrition_router, AppState, InsightRequest, ScoreQuery, ScoreResponse, API_ROUTES,
};
pub use summary::{
    summarize, DepartmentRisk, OrganizationSummary, RiskDistribution, TenureBin,
    UNKNOWN_DEPARTMENT,
};
pub use transform::{
    CategoricalImputeEncode, ColumnTransformState, NumericColumnStats, NumericImputeScale,
    TransformError,
};
