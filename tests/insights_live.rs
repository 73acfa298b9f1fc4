#![cfg(feature = "live-llm-tests")]

use attrition_insight::{
    build_profile, insight_config_from_env, ChatCompletionsClient, EmployeeRecord,
    InsightGenerator,
};

#[test]
fn live_completion_yields_three_sections() {
    let cfg = insight_config_from_env();
    let api_key = cfg
        .api_key
        .clone()
        .expect("ATTRITION_LLM_API_KEY or DEEPSEEK_API_KEY must be set for live tests");
    let client = ChatCompletionsClient::new(&api_key, &cfg).expect("client should build");

    let record = EmployeeRecord {
        department: Some("Sales".to_string()),
        engagement_score: Some(1.5),
        job_satisfaction: Some(2.0),
        overtime_hours: Some(38.0),
        tenure: Some(2.0),
        ..EmployeeRecord::default()
    };
    let raw = client
        .complete(&attrition_insight::build_prompt(&build_profile(&record, 0.83)))
        .expect("live completion should succeed");
    assert!(!raw.trim().is_empty());

    let insights = client.generate(&build_profile(&record, 0.83));
    for section in [&insights.diagnostic, &insights.prescriptive, &insights.preventive] {
        assert!(!section.is_empty());
        assert!(!section.starts_with("**API Error**"));
    }
}
