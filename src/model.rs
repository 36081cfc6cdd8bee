use std::fmt;

use serde::{Deserialize, Serialize};

/// Handle returned by the submission endpoint, used to poll a queued test.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestReference {
    pub test_id: String,
    pub poll_state_url: String,
    pub credits_left: i64,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "empty_as_none")]
    pub error: Option<String>,
}

impl TestReference {
    /// Build a reference from a known test id, e.g. one printed by an earlier run.
    pub fn from_test_id(test_id: impl Into<String>) -> Self {
        Self {
            test_id: test_id.into(),
            ..Self::default()
        }
    }

    pub fn remote_error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Point-in-time status of a test as reported by the remote service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultSnapshot {
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "empty_as_none")]
    pub error: Option<String>,
    pub results: MetricsBlock,
    pub resources: ResourcesBlock,
}

impl ResultSnapshot {
    pub fn test_state(&self) -> TestState {
        TestState::from(self.state.as_str())
    }

    pub fn is_terminal(&self) -> bool {
        self.test_state().is_terminal()
    }

    /// Metrics and resources, only when the test finished successfully.
    pub fn completed_results(&self) -> Option<(&MetricsBlock, &ResourcesBlock)> {
        match self.test_state() {
            TestState::Completed => Some((&self.results, &self.resources)),
            _ => None,
        }
    }
}

/// Numeric measurements of a finished test. Times are milliseconds, sizes are bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsBlock {
    pub report_url: String,
    pub pagespeed_score: i64,
    pub yslow_score: i64,
    pub html_bytes: i64,
    pub html_load_time: i64,
    pub page_bytes: i64,
    pub page_load_time: i64,
    pub page_elements: i64,
    pub redirect_duration: i64,
    pub connect_duration: i64,
    pub backend_duration: i64,
    pub first_paint_time: i64,
    pub first_contentful_paint_time: i64,
    pub dom_interactive_time: i64,
    pub dom_content_loaded_time: i64,
    pub dom_content_loaded_duration: i64,
    pub onload_time: i64,
    pub onload_duration: i64,
    pub fully_loaded_time: i64,
    pub rum_speed_index: i64,
}

/// Links to artifacts generated for a finished test.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcesBlock {
    pub screenshot: String,
    pub har: String,
    pub pagespeed: String,
    pub pagespeed_files: String,
    pub yslow: String,
    pub report_pdf: String,
    pub report_pdf_full: String,
    pub video: String,
    pub filmstrip: String,
}

impl ResourcesBlock {
    /// Non-empty resource links paired with their field names.
    pub fn links(&self) -> Vec<(&'static str, &str)> {
        [
            ("screenshot", self.screenshot.as_str()),
            ("har", self.har.as_str()),
            ("pagespeed", self.pagespeed.as_str()),
            ("pagespeed_files", self.pagespeed_files.as_str()),
            ("yslow", self.yslow.as_str()),
            ("report_pdf", self.report_pdf.as_str()),
            ("report_pdf_full", self.report_pdf_full.as_str()),
            ("video", self.video.as_str()),
            ("filmstrip", self.filmstrip.as_str()),
        ]
        .into_iter()
        .filter(|(_, url)| !url.is_empty())
        .collect()
    }
}

/// Typed view over the remote state string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestState {
    Queued,
    Started,
    Processing,
    Completed,
    Error,
    /// Anything the service reports that we do not recognise, including "".
    Other(String),
}

impl TestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TestState::Completed | TestState::Error)
    }
}

impl From<&str> for TestState {
    fn from(value: &str) -> Self {
        match value {
            "queued" => TestState::Queued,
            "started" => TestState::Started,
            "processing" => TestState::Processing,
            "completed" => TestState::Completed,
            "error" => TestState::Error,
            other => TestState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestState::Queued => write!(f, "queued"),
            TestState::Started => write!(f, "started"),
            TestState::Processing => write!(f, "processing"),
            TestState::Completed => write!(f, "completed"),
            TestState::Error => write!(f, "error"),
            TestState::Other(raw) if raw.is_empty() => write!(f, "(unknown)"),
            TestState::Other(raw) => write!(f, "{raw}"),
        }
    }
}

// The API sends `"error": ""` or `null` when nothing went wrong; any other text is an error.
fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.filter(|value| !value.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reference_treats_blank_error_as_absent() {
        let reference: TestReference = serde_json::from_value(json!({
            "test_id": "abc123",
            "poll_state_url": "https://gtmetrix.com/api/0.1/test/abc123",
            "credits_left": 19,
            "error": ""
        }))
        .unwrap();
        assert_eq!(reference.test_id, "abc123");
        assert_eq!(reference.credits_left, 19);
        assert!(reference.remote_error().is_none());
    }

    #[test]
    fn whitespace_error_is_still_an_error() {
        let reference: TestReference =
            serde_json::from_value(json!({"test_id": "", "credits_left": 0, "error": " "}))
                .unwrap();
        assert_eq!(reference.remote_error(), Some(" "));
    }

    #[test]
    fn reference_keeps_remote_error() {
        let reference: TestReference = serde_json::from_value(json!({
            "credits_left": 0,
            "error": "Insufficient credits"
        }))
        .unwrap();
        assert_eq!(reference.remote_error(), Some("Insufficient credits"));
        assert!(reference.test_id.is_empty());
    }

    #[test]
    fn missing_fields_decode_to_zero_values() {
        let snapshot: ResultSnapshot = serde_json::from_value(json!({"state": "queued"})).unwrap();
        assert_eq!(snapshot.test_state(), TestState::Queued);
        assert_eq!(snapshot.results, MetricsBlock::default());
        assert_eq!(snapshot.resources, ResourcesBlock::default());
        assert!(snapshot.error.is_none());
    }

    #[test]
    fn completed_results_only_for_completed_state() {
        let mut snapshot = ResultSnapshot {
            state: "processing".into(),
            ..ResultSnapshot::default()
        };
        snapshot.results.page_load_time = 1200;
        assert!(snapshot.completed_results().is_none());

        snapshot.state = "error".into();
        assert!(snapshot.is_terminal());
        assert!(snapshot.completed_results().is_none());

        snapshot.state = "completed".into();
        let (metrics, _) = snapshot.completed_results().unwrap();
        assert_eq!(metrics.page_load_time, 1200);
    }

    #[test]
    fn terminal_states_are_completed_and_error() {
        for state in ["queued", "started", "processing", "", "paused"] {
            assert!(!TestState::from(state).is_terminal(), "{state} should not be terminal");
        }
        assert!(TestState::from("completed").is_terminal());
        assert!(TestState::from("error").is_terminal());
        assert_eq!(TestState::from("").to_string(), "(unknown)");
    }

    #[test]
    fn snapshot_json_round_trip_is_exact() {
        let mut snapshot = ResultSnapshot {
            state: "completed".into(),
            error: None,
            ..ResultSnapshot::default()
        };
        snapshot.results.report_url = "https://gtmetrix.com/reports/example.com/abc".into();
        snapshot.results.page_bytes = i64::MAX;
        snapshot.results.fully_loaded_time = -1;
        snapshot.results.rum_speed_index = 9_007_199_254_740_993;
        snapshot.resources.video = "https://gtmetrix.com/api/0.1/test/abc/video".into();

        let encoded = serde_json::to_string(&snapshot).unwrap();
        let decoded: ResultSnapshot = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn resource_links_skip_empty_urls() {
        let resources = ResourcesBlock {
            screenshot: "https://example.test/shot.jpg".into(),
            report_pdf: "https://example.test/report.pdf".into(),
            ..ResourcesBlock::default()
        };
        let links = resources.links();
        assert_eq!(
            links,
            vec![
                ("screenshot", "https://example.test/shot.jpg"),
                ("report_pdf", "https://example.test/report.pdf"),
            ]
        );
    }
}
