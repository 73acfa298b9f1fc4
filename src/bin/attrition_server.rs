use std::sync::Arc;

use attrition_insight::{
    attrition_router, init_logging, insight_config_from_env, log_app_bind, log_app_start,
    log_artifacts_loaded, log_insights_mode, logging_config_from_env, server_config_from_env,
    AppState, ChatCompletionsClient, Classifier, InsightGenerator, LogisticModel,
    PreprocessingPipeline,
};

// The blocking HTTP client must be created and dropped outside the async runtime.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(&logging_cfg);

    let cfg = server_config_from_env();
    let pipeline = PreprocessingPipeline::from_artifact(&cfg.pipeline_path)?;
    let model = LogisticModel::load(&cfg.model_path)?;
    let schema = pipeline
        .schema()
        .ok_or("pipeline artifact did not produce a fitted pipeline")?;
    model.ensure_compatible(schema)?;
    log_artifacts_loaded(&cfg.pipeline_path, &cfg.model_path, schema.width());

    let insight_cfg = insight_config_from_env();
    log_insights_mode(&insight_cfg);
    let insights: Arc<dyn InsightGenerator> =
        Arc::from(ChatCompletionsClient::from_config(&insight_cfg)?);
    let classifier: Arc<dyn Classifier> = Arc::new(model);
    let state = AppState::new(pipeline, classifier, insights);
    let app = attrition_router(state.clone());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(cfg.addr).await?;
        let bound_addr = listener.local_addr()?;

        log_app_bind(bound_addr);
        axum::serve(listener, app).await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;

    drop(state);
    Ok(())
}
