//! Narrative retention insights from a chat-completions service.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::InsightConfig;
use crate::record::{
    EmployeeRecord, DEPARTMENT_COLUMN, EMPLOYEE_ID_COLUMN, HIRE_DATE_COLUMN,
    LAST_PROMOTION_DATE_COLUMN, RAW_NUMERIC_COLUMNS,
};
use crate::scoring::{RiskLabel, PROBABILITY_COLUMN, RISK_FLAG_COLUMN, RISK_LABEL_COLUMN};

pub const DIAGNOSTIC_TITLE: &str = "Diagnostic Insight";
pub const PRESCRIPTIVE_TITLE: &str = "Prescriptive Actions";
pub const PREVENTIVE_TITLE: &str = "Preventive Strategy";
pub const SECTION_TITLES: [&str; 3] = [DIAGNOSTIC_TITLE, PRESCRIPTIVE_TITLE, PREVENTIVE_TITLE];

const TEMPERATURE: f64 = 0.3;
const MAX_TOKENS: u32 = 500;
const TOP_P: f64 = 0.9;
const MISSING_VALUE: &str = "Unknown";
/// Identity and score-output columns; a re-uploaded report carries them as extras.
const PROFILE_EXCLUDED_COLUMNS: [&str; 4] = [
    EMPLOYEE_ID_COLUMN,
    PROBABILITY_COLUMN,
    RISK_FLAG_COLUMN,
    RISK_LABEL_COLUMN,
];

#[derive(Debug, Error)]
pub enum InsightError {
    #[error("insight service is not configured")]
    Disabled,
    #[error("failed to build HTTP client: {0}")]
    HttpClientBuild(String),
    #[error("request to {url} failed: {message}")]
    HttpRequest { url: String, message: String },
    #[error("malformed completion response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionInsights {
    pub diagnostic: String,
    pub prescriptive: String,
    pub preventive: String,
}

/// The fields shown to the insight service, in display order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployeeProfile {
    pub risk_label: RiskLabel,
    pub fields: Vec<(String, String)>,
}

pub fn build_profile(record: &EmployeeRecord, attrition_probability: f64) -> EmployeeProfile {
    let text = |value: &Option<String>| value.clone().unwrap_or_else(|| MISSING_VALUE.to_string());

    let mut fields = vec![
        (title_case(HIRE_DATE_COLUMN), text(&record.hire_date)),
        (
            title_case(LAST_PROMOTION_DATE_COLUMN),
            text(&record.last_promotion_date),
        ),
    ];
    for (column, value) in RAW_NUMERIC_COLUMNS.iter().zip(record.raw_numeric_values()) {
        let shown = value.map_or_else(|| MISSING_VALUE.to_string(), |v| v.to_string());
        fields.push((title_case(column), shown));
    }
    fields.push((title_case(DEPARTMENT_COLUMN), text(&record.department)));
    for (column, value) in &record.extra {
        if PROFILE_EXCLUDED_COLUMNS.contains(&column.as_str()) {
            continue;
        }
        fields.push((title_case(column), value.clone()));
    }
    fields.push((
        title_case(PROBABILITY_COLUMN),
        attrition_probability.to_string(),
    ));

    EmployeeProfile {
        risk_label: RiskLabel::from_probability(attrition_probability),
        fields,
    }
}

pub fn build_prompt(profile: &EmployeeProfile) -> String {
    let bullets: Vec<String> = profile
        .fields
        .iter()
        .map(|(name, value)| format!("- **{name}**: {value}"))
        .collect();

    format!(
        "## Role\n\
You are an HR analytics specialist analyzing employee retention risks.\n\
Generate data-driven insights for this employee classified as **{risk}**.\n\
\n\
## Employee Profile\n\
{profile}\n\
\n\
## Task\n\
Provide three insights in markdown format:\n\
1. **DIAGNOSTIC**: Identify key retention factors based on specific data points\n\
2. **PRESCRIPTIVE**: Recommend personalized retention actions in bullet points\n\
3. **PREVENTIVE**: Suggest one scalable policy for similar employees\n\
\n\
## Rules\n\
- For low risk employees: focus on strengthening retention factors\n\
- For high risk employees: focus on mitigating attrition risks\n\
- Reference actual metrics from the profile (e.g. \"Job Satisfaction: 3\")\n\
- Use **bold** for metric references\n\
- Output must contain exactly 3 sections with headers\n\
\n\
## Output Format\n\
### {diagnostic}\n\
[Concise analysis with data references]\n\
\n\
### {prescriptive}\n\
- [Action 1]\n\
- [Action 2]\n\
- [Action 3]\n\
\n\
### {preventive}\n\
[One policy suggestion]\n",
        risk = profile.risk_label.as_str(),
        profile = bullets.join("\n"),
        diagnostic = DIAGNOSTIC_TITLE,
        prescriptive = PRESCRIPTIVE_TITLE,
        preventive = PREVENTIVE_TITLE,
    )
}

fn section_patterns() -> &'static [Regex; 3] {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let bounded = |title: &str, next: &str| {
            Regex::new(&format!(r"(?is)### {title}\n+(.*?)(?:\n### {next}|\z)"))
        };
        [
            bounded(DIAGNOSTIC_TITLE, PRESCRIPTIVE_TITLE),
            bounded(PRESCRIPTIVE_TITLE, PREVENTIVE_TITLE),
            Regex::new(&format!(r"(?is)### {PREVENTIVE_TITLE}\n+(.*)")),
        ]
        .map(|pattern| pattern.expect("section pattern is valid"))
    })
}

/// Splits a completion into its three sections.
pub fn parse_insights(raw: &str) -> RetentionInsights {
    let raw = raw.trim();
    let mut sections: [String; 3] = Default::default();

    for (idx, pattern) in section_patterns().iter().enumerate() {
        let matched = pattern
            .captures(raw)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|text| !text.is_empty());
        sections[idx] = matched
            .or_else(|| split_section(raw, idx))
            .unwrap_or_else(|| format!("Insight generation failed for {}", SECTION_TITLES[idx]));
    }

    let [diagnostic, prescriptive, preventive] = sections;
    RetentionInsights {
        diagnostic,
        prescriptive,
        preventive,
    }
}

/// Plain-text fallback for completions that drop the markdown headers.
fn split_section(raw: &str, idx: usize) -> Option<String> {
    let (_, after) = raw.split_once(SECTION_TITLES[idx])?;
    let body = match SECTION_TITLES.get(idx + 1) {
        Some(next) => after.split(next).next().unwrap_or(after),
        None => after,
    };
    let body = body
        .trim_matches(|c: char| c == ':' || c == ' ' || c == '\n')
        .trim_end_matches('#')
        .trim();
    (!body.is_empty()).then(|| body.to_string())
}

pub fn service_failure_insights(err: &InsightError) -> RetentionInsights {
    RetentionInsights {
        diagnostic: format!("**API Error**: {err}"),
        prescriptive: "Please try again later".to_string(),
        preventive: "System maintenance in progress".to_string(),
    }
}

pub trait InsightGenerator: Send + Sync {
    fn complete(&self, prompt: &str) -> Result<String, InsightError>;

    /// Never fails; service errors become placeholder sections.
    fn generate(&self, profile: &EmployeeProfile) -> RetentionInsights {
        match self.complete(&build_prompt(profile)) {
            Ok(raw) => parse_insights(&raw),
            Err(err) => {
                warn!(
                    component = "insights",
                    event = "insights.request.error",
                    error = %err
                );
                service_failure_insights(&err)
            }
        }
    }
}

/// Used when no API key is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledInsightGenerator;

impl InsightGenerator for DisabledInsightGenerator {
    fn complete(&self, _prompt: &str) -> Result<String, InsightError> {
        Err(InsightError::Disabled)
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

pub struct ChatCompletionsClient {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl ChatCompletionsClient {
    pub fn new(api_key: &str, config: &InsightConfig) -> Result<Self, InsightError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|err| InsightError::HttpClientBuild(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
            model: config.model.clone(),
        })
    }

    /// Builds a client when a key is configured, otherwise the disabled generator.
    pub fn from_config(config: &InsightConfig) -> Result<Box<dyn InsightGenerator>, InsightError> {
        match config.api_key.as_deref() {
            Some(key) => Ok(Box::new(Self::new(key, config)?)),
            None => {
                warn!(
                    component = "insights",
                    event = "insights.disabled",
                    reason = "no api key configured"
                );
                Ok(Box::new(DisabledInsightGenerator))
            }
        }
    }

    fn request_error(&self, message: String) -> InsightError {
        InsightError::HttpRequest {
            url: self.endpoint.clone(),
            message,
        }
    }
}

impl InsightGenerator for ChatCompletionsClient {
    fn complete(&self, prompt: &str) -> Result<String, InsightError> {
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": TEMPERATURE,
            "max_tokens": MAX_TOKENS,
            "top_p": TOP_P,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .map_err(|err| self.request_error(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.request_error(format!("unexpected HTTP status {status}")));
        }

        let bytes = response
            .bytes()
            .map_err(|err| self.request_error(err.to_string()))?;
        let parsed: CompletionResponse = serde_json::from_slice(&bytes)
            .map_err(|err| InsightError::MalformedResponse(err.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| InsightError::MalformedResponse("no completion choices".to_string()))?;

        info!(
            component = "insights",
            event = "insights.request.finish",
            model = %self.model,
            chars = content.len()
        );
        Ok(content)
    }
}

fn title_case(column: &str) -> String {
    column
        .split(['_', ' '])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canned(Result<&'static str, ()>);

    impl InsightGenerator for Canned {
        fn complete(&self, _prompt: &str) -> Result<String, InsightError> {
            self.0
                .map(str::to_string)
                .map_err(|_| InsightError::MalformedResponse("boom".to_string()))
        }
    }

    #[test]
    fn title_case_matches_display_names() {
        assert_eq!(title_case("work_life_balance_score"), "Work Life Balance Score");
        assert_eq!(title_case("kpi_score"), "Kpi Score");
        assert_eq!(title_case("Attrition_Probability"), "Attrition Probability");
    }

    #[test]
    fn profile_lists_record_fields_and_probability() {
        let record = EmployeeRecord {
            employee_id: Some("42".to_string()),
            job_satisfaction: Some(3.0),
            department: Some("Sales".to_string()),
            ..EmployeeRecord::default()
        };
        let profile = build_profile(&record, 0.75);

        assert_eq!(profile.risk_label, RiskLabel::High);
        assert!(profile
            .fields
            .contains(&("Job Satisfaction".to_string(), "3".to_string())));
        assert!(profile
            .fields
            .contains(&("Hire Date".to_string(), "Unknown".to_string())));
        assert_eq!(
            profile.fields.last(),
            Some(&("Attrition Probability".to_string(), "0.75".to_string()))
        );
        assert!(profile.fields.iter().all(|(name, _)| name != "Employeeid"));

        let prompt = build_prompt(&profile);
        assert!(prompt.contains("classified as **High Risk**"));
        assert!(prompt.contains("- **Department**: Sales"));
        assert!(prompt.contains("### Preventive Strategy"));
    }

    #[test]
    fn profile_skips_identity_and_score_extras() {
        let mut record = EmployeeRecord {
            department: Some("HR".to_string()),
            ..EmployeeRecord::default()
        };
        for (column, value) in [
            ("EmployeeID", "E9"),
            ("Attrition_Probability", "0.91"),
            ("Risk_Flag", "🔴 High Risk"),
            ("Risk_Label", "High Risk"),
            ("office_floor", "3"),
        ] {
            record.extra.insert(column.to_string(), value.to_string());
        }
        let profile = build_profile(&record, 0.2);
        let names: Vec<&str> = profile.fields.iter().map(|(name, _)| name.as_str()).collect();

        assert!(names.contains(&"Office Floor"));
        for excluded in ["Employeeid", "Risk Flag", "Risk Label"] {
            assert!(!names.contains(&excluded), "{excluded} leaked into the profile");
        }
        assert_eq!(
            names.iter().filter(|name| **name == "Attrition Probability").count(),
            1
        );
        assert_eq!(
            profile.fields.last(),
            Some(&("Attrition Probability".to_string(), "0.2".to_string()))
        );
        assert!(!build_prompt(&profile).contains("High Risk"));
    }

    #[test]
    fn section_patterns_match_their_own_headers() {
        let patterns = section_patterns();
        assert_eq!(patterns.len(), SECTION_TITLES.len());
        for (pattern, title) in patterns.iter().zip(SECTION_TITLES) {
            let text = format!("### {title}\nbody");
            let captured = pattern.captures(&text).and_then(|caps| caps.get(1));
            assert_eq!(captured.map(|m| m.as_str()), Some("body"), "{title}");
        }
    }

    #[test]
    fn parses_all_three_sections() {
        let raw = "### Diagnostic Insight\nLow **Engagement Score**.\n\n\
### Prescriptive Actions\n- Raise pay\n- Mentor\n\n\
### Preventive Strategy\nQuarterly reviews.";
        let insights = parse_insights(raw);

        assert_eq!(insights.diagnostic, "Low **Engagement Score**.");
        assert_eq!(insights.prescriptive, "- Raise pay\n- Mentor");
        assert_eq!(insights.preventive, "Quarterly reviews.");
    }

    #[test]
    fn header_match_is_case_insensitive() {
        let raw = "### diagnostic insight\nA\n### PRESCRIPTIVE ACTIONS\nB\n### Preventive strategy\nC";
        let insights = parse_insights(raw);
        assert_eq!(insights.diagnostic, "A");
        assert_eq!(insights.prescriptive, "B");
        assert_eq!(insights.preventive, "C");
    }

    #[test]
    fn falls_back_to_plain_split_then_placeholder() {
        let raw = "Diagnostic Insight: workload is high\nPrescriptive Actions: hire help";
        let insights = parse_insights(raw);

        assert_eq!(insights.diagnostic, "workload is high");
        assert_eq!(insights.prescriptive, "hire help");
        assert_eq!(
            insights.preventive,
            "Insight generation failed for Preventive Strategy"
        );
    }

    #[test]
    fn service_errors_become_placeholders() {
        let profile = build_profile(&EmployeeRecord::default(), 0.1);
        let insights = Canned(Err(())).generate(&profile);

        assert!(insights.diagnostic.starts_with("**API Error**: "));
        assert_eq!(insights.prescriptive, "Please try again later");
        assert_eq!(insights.preventive, "System maintenance in progress");

        let disabled = DisabledInsightGenerator.generate(&profile);
        assert_eq!(
            disabled.diagnostic,
            "**API Error**: insight service is not configured"
        );
    }

    #[test]
    fn successful_completion_is_parsed() {
        let profile = build_profile(&EmployeeRecord::default(), 0.1);
        let insights = Canned(Ok("### Diagnostic Insight\nok")).generate(&profile);
        assert_eq!(insights.diagnostic, "ok");
        assert_eq!(insights.preventive, "Insight generation failed for Preventive Strategy");
    }
}
