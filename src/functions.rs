use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: Value,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// Tool call as it appears on the wire: `function.arguments` is a JSON-encoded string.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub kind: ToolCallType,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, function: FunctionCall) -> Self {
        Self {
            id: id.into(),
            kind: ToolCallType::Function,
            function,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallType {
    Function,
}

impl Serialize for ToolCall {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("ToolCall", 3)?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("type", &self.kind)?;
        state.serialize_field("function", &SerializableFunctionCall(&self.function))?;
        state.end()
    }
}

impl Serialize for ToolCallType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            ToolCallType::Function => serializer.serialize_str("function"),
        }
    }
}

impl<'de> Deserialize<'de> for ToolCall {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawFunctionCall {
            name: String,
            arguments: String,
        }

        #[derive(Deserialize)]
        struct RawToolCall {
            id: String,
            #[serde(rename = "type")]
            kind: ToolCallType,
            function: RawFunctionCall,
        }

        let raw = RawToolCall::deserialize(deserializer)?;
        let arguments: Value = serde_json::from_str(&raw.function.arguments).map_err(|error| {
            serde::de::Error::custom(format!("failed to parse function arguments: {error}"))
        })?;

        Ok(Self {
            id: raw.id,
            kind: raw.kind,
            function: FunctionCall::new(raw.function.name, arguments),
        })
    }
}

impl<'de> Deserialize<'de> for ToolCallType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        match value.as_str() {
            "function" => Ok(ToolCallType::Function),
            other => Err(serde::de::Error::custom(format!(
                "unsupported tool call type '{other}'"
            ))),
        }
    }
}

struct SerializableFunctionCall<'a>(&'a FunctionCall);

impl<'a> Serialize for SerializableFunctionCall<'a> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("function", 2)?;
        state.serialize_field("name", &self.0.name)?;
        let arguments = serde_json::to_string(&self.0.arguments)
            .map_err(|error| serde::ser::Error::custom(error.to_string()))?;
        state.serialize_field("arguments", &arguments)?;
        state.end()
    }
}
