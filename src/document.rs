use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::builder::MockBuilder;
use crate::error::RegistrationError;
use crate::expectation::{ExpectationRegistry, ToolCallDefinition, ToolExecutionStep};

/// Expectations declared in YAML:
///
/// ```yaml
/// expectations:
///   - when: What is the weather in london?
///     reply: It is sunny.
///     steps:
///       - - tool: FindsTheLatitudeAndLongitudeOfAGivenCity
///           arguments: { name: London }
///       - - tool: ForecastsTheWeatherForTheGivenLatitudeAndLongitude
///           arguments: { latitude: "51.5", longitude: "-0.13" }
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExpectationDocument {
    #[serde(default)]
    pub expectations: Vec<ExpectationEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectationEntry {
    pub when: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    /// Sequential steps; each inner list is issued in one assistant turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Vec<ToolCallEntry>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallEntry {
    pub tool: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub arguments: Map<String, Value>,
}

impl ExpectationDocument {
    pub fn from_yaml_str(input: &str) -> Result<Self, RegistrationError> {
        Ok(serde_yaml::from_str(input)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RegistrationError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    pub fn to_yaml_string(&self) -> Result<String, RegistrationError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Registers every entry on `builder`, in document order.
    pub fn register(&self, mut builder: MockBuilder) -> MockBuilder {
        for entry in &self.expectations {
            let mut expectation = builder.when(entry.when.clone());
            if let Some(reply) = &entry.reply {
                expectation = expectation.reply_with(reply.clone());
            }
            for calls in &entry.steps {
                expectation = expectation.with_step(step_from_entries(calls));
            }
            builder = expectation.end();
        }
        builder
    }

    pub fn to_registry(&self) -> Result<ExpectationRegistry, RegistrationError> {
        self.register(MockBuilder::new()).build()
    }
}

fn step_from_entries(calls: &[ToolCallEntry]) -> ToolExecutionStep {
    let mut step = ToolExecutionStep::new();
    for call in calls {
        let mut definition = ToolCallDefinition::new(call.tool.clone());
        for (key, value) in &call.arguments {
            definition.insert_argument(key.clone(), value.clone());
        }
        step.push(definition);
    }
    step
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expectation::ResponsePlan;
    use serde_json::json;

    const WEATHER: &str = r#"
expectations:
  - when: What is the weather in london?
    steps:
      - - tool: FindsTheLatitudeAndLongitudeOfAGivenCity
          arguments:
            name: London
      - - tool: ForecastsTheWeatherForTheGivenLatitudeAndLongitude
          arguments:
            latitude: "51.50758961965397"
            longitude: "-0.13388057363742217"
        - tool: CurrentTime
  - when: another sentence
    reply: hello World
"#;

    #[test]
    fn builds_registry_from_yaml() {
        let document = ExpectationDocument::from_yaml_str(WEATHER).unwrap();
        let registry = document.to_registry().unwrap();
        assert_eq!(registry.len(), 2);

        let weather = registry.find("What is the weather in london?").unwrap();
        let sequence = weather.tool_sequence();
        assert_eq!(sequence.len(), 2);
        assert_eq!(
            sequence.steps()[0].calls()[0].arguments().get("name"),
            Some(&json!("London"))
        );
        assert_eq!(sequence.steps()[1].len(), 2);
        assert_eq!(sequence.steps()[1].calls()[1].name(), "CurrentTime");

        let text = registry.find("another sentence").unwrap();
        assert!(matches!(text.plan(), ResponsePlan::PlainText));
        assert_eq!(text.reply(), Some("hello World"));
    }

    #[test]
    fn yaml_roundtrip() {
        let document = ExpectationDocument::from_yaml_str(WEATHER).unwrap();
        let yaml = document.to_yaml_string().unwrap();
        assert_eq!(ExpectationDocument::from_yaml_str(&yaml).unwrap(), document);
    }

    #[test]
    fn empty_step_is_a_registration_error() {
        let document = ExpectationDocument::from_yaml_str(
            "expectations:\n  - when: q\n    steps:\n      - []\n",
        )
        .unwrap();
        assert!(matches!(
            document.to_registry(),
            Err(RegistrationError::EmptyStep { step: 0, .. })
        ));
    }

    #[test]
    fn missing_trigger_fails_to_parse() {
        let result = ExpectationDocument::from_yaml_str("expectations:\n  - reply: hi\n");
        assert!(matches!(result, Err(RegistrationError::Parse(_))));
    }
}
