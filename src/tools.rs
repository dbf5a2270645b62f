//! Local tools the model may call, and the dispatcher that answers them.
//!
//! The set of tools is closed: each is a [`Tool`] variant with a
//! declaration and a handler. Handlers return placeholder data that marks
//! where a real integration would plug in. Any call that cannot be handled
//! (unknown name, missing argument) still yields exactly one result carrying
//! an `error` field, so the model always gets an answer per call id.

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

/// A function call requested by the model
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Correlation id echoed back in the result
    pub id: String,
    pub name: String,
    pub args: Map<String, Value>,
}

/// Answer to a [`ToolCall`], sent back on the session
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub id: String,
    pub name: String,
    pub response: Value,
}

impl ToolResult {
    pub fn is_error(&self) -> bool {
        self.response.get("error").is_some()
    }
}

/// Request for the UI to open a virtual application window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenAppRequest {
    pub app_name: String,
    pub content: Option<String>,
}

/// Outcome of dispatching one call
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub result: ToolResult,
    /// Side effect the caller must forward to the UI, if any
    pub open_app: Option<OpenAppRequest>,
}

/// One parameter of a tool declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolParameter {
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
}

/// Static description of a tool, sent once at connect time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDeclaration {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Vec<ToolParameter>,
}

impl ToolDeclaration {
    pub fn required(&self) -> Vec<&'static str> {
        self.parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name)
            .collect()
    }

    /// Function declaration in the schema dialect the endpoint expects.
    pub fn to_json(&self) -> Value {
        let properties: Map<String, Value> = self
            .parameters
            .iter()
            .map(|p| {
                (
                    p.name.to_string(),
                    json!({ "type": "STRING", "description": p.description }),
                )
            })
            .collect();

        let mut decl = json!({
            "name": self.name,
            "description": self.description,
        });
        if !self.parameters.is_empty() {
            decl["parameters"] = json!({
                "type": "OBJECT",
                "properties": properties,
                "required": self.required(),
            });
        }
        decl
    }
}

/// Tools supported by this client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Weather,
    SystemStatus,
    SearchPublicData,
    News,
    OpenApp,
}

impl Tool {
    pub const ALL: [Tool; 5] = [
        Tool::Weather,
        Tool::SystemStatus,
        Tool::SearchPublicData,
        Tool::News,
        Tool::OpenApp,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Tool::Weather => "getWeather",
            Tool::SystemStatus => "getSystemStatus",
            Tool::SearchPublicData => "searchPublicData",
            Tool::News => "getNews",
            Tool::OpenApp => "openApp",
        }
    }

    pub fn from_name(name: &str) -> Option<Tool> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    pub fn declaration(&self) -> ToolDeclaration {
        let (description, parameters) = match self {
            Tool::Weather => (
                "Get the current weather for a location.",
                vec![ToolParameter {
                    name: "location",
                    description: "City or place name",
                    required: true,
                }],
            ),
            Tool::SystemStatus => (
                "Report the status of the local system (CPU, memory, network).",
                vec![],
            ),
            Tool::SearchPublicData => (
                "Search public data sources for information.",
                vec![ToolParameter {
                    name: "query",
                    description: "What to search for",
                    required: true,
                }],
            ),
            Tool::News => (
                "Fetch the latest news headlines for a category.",
                vec![ToolParameter {
                    name: "category",
                    description: "News category, e.g. technology, sports, business",
                    required: true,
                }],
            ),
            Tool::OpenApp => (
                "Open a virtual application window, optionally pre-filled with content.",
                vec![
                    ToolParameter {
                        name: "appName",
                        description: "Application to open, e.g. notepad, browser, terminal",
                        required: true,
                    },
                    ToolParameter {
                        name: "content",
                        description: "Initial content to show in the application",
                        required: false,
                    },
                ],
            ),
        };
        ToolDeclaration {
            name: self.name(),
            description,
            parameters,
        }
    }
}

/// Declarations for every supported tool.
pub fn declarations() -> Vec<ToolDeclaration> {
    Tool::ALL.iter().map(Tool::declaration).collect()
}

/// Maps incoming calls to their handlers
#[derive(Debug, Default, Clone, Copy)]
pub struct ToolDispatcher;

impl ToolDispatcher {
    pub fn new() -> Self {
        Self
    }

    /// Execute one call. Never fails: problems become error results.
    pub fn dispatch(&self, call: &ToolCall) -> Dispatched {
        let Some(tool) = Tool::from_name(&call.name) else {
            warn!("Model called unknown tool '{}' (id {})", call.name, call.id);
            return Dispatched {
                result: self.result(call, json!({ "error": format!("Unknown tool: {}", call.name) })),
                open_app: None,
            };
        };

        debug!("Dispatching tool {} (id {})", call.name, call.id);
        if let Some(missing) = tool
            .declaration()
            .required()
            .into_iter()
            .find(|name| string_arg(&call.args, name).is_none())
        {
            warn!("Tool {} called without required argument '{}'", call.name, missing);
            return Dispatched {
                result: self.result(
                    call,
                    json!({ "error": format!("Missing required argument: {}", missing) }),
                ),
                open_app: None,
            };
        }

        let mut open_app = None;
        let response = match tool {
            Tool::Weather => weather(&call.args),
            Tool::SystemStatus => system_status(),
            Tool::SearchPublicData => search_public_data(&call.args),
            Tool::News => news(&call.args),
            Tool::OpenApp => {
                let request = OpenAppRequest {
                    app_name: string_arg(&call.args, "appName").unwrap_or_default().to_string(),
                    content: string_arg(&call.args, "content").map(str::to_string),
                };
                let response = json!({ "status": "opened", "app": request.app_name });
                open_app = Some(request);
                response
            }
        };

        Dispatched {
            result: self.result(call, response),
            open_app,
        }
    }

    fn result(&self, call: &ToolCall, response: Value) -> ToolResult {
        ToolResult {
            id: call.id.clone(),
            name: call.name.clone(),
            response,
        }
    }
}

fn string_arg<'a>(args: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}

// Placeholder handlers. Real integrations replace the bodies below.

fn weather(args: &Map<String, Value>) -> Value {
    json!({
        "location": string_arg(args, "location"),
        "temperatureC": 22,
        "condition": "Partly cloudy",
        "humidityPercent": 48,
        "windKph": 11,
    })
}

fn system_status() -> Value {
    json!({
        "status": "operational",
        "cpuLoadPercent": 23,
        "memoryUsedPercent": 41,
        "network": "online",
        "security": "nominal",
    })
}

fn search_public_data(args: &Map<String, Value>) -> Value {
    let query = string_arg(args, "query").unwrap_or_default();
    json!({
        "query": query,
        "results": [
            { "title": format!("Overview of {}", query), "source": "public-encyclopedia" },
            { "title": format!("Recent data on {}", query), "source": "open-data-portal" },
        ],
    })
}

fn news(args: &Map<String, Value>) -> Value {
    let category = string_arg(args, "category").unwrap_or_default();
    json!({
        "category": category,
        "headlines": [
            format!("Top {} story of the day", category),
            format!("Analysts weigh in on {} developments", category),
            format!("What to watch next in {}", category),
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str, name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            args: args.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_open_app_result_and_side_effect() {
        let out = ToolDispatcher::new().dispatch(&call(
            "c1",
            "openApp",
            json!({ "appName": "notepad", "content": "hello" }),
        ));
        assert_eq!(out.result.id, "c1");
        assert_eq!(out.result.name, "openApp");
        assert_eq!(out.result.response, json!({ "status": "opened", "app": "notepad" }));
        assert_eq!(
            out.open_app,
            Some(OpenAppRequest {
                app_name: "notepad".to_string(),
                content: Some("hello".to_string()),
            })
        );
    }

    #[test]
    fn test_open_app_without_content() {
        let out = ToolDispatcher::new().dispatch(&call("c2", "openApp", json!({ "appName": "terminal" })));
        assert_eq!(out.open_app.unwrap().content, None);
    }

    #[test]
    fn test_unknown_tool_yields_error_result() {
        let out = ToolDispatcher::new().dispatch(&call("x9", "launchRockets", json!({})));
        assert_eq!(out.result.id, "x9");
        assert_eq!(out.result.name, "launchRockets");
        assert!(out.result.is_error());
        assert_eq!(out.result.response["error"], "Unknown tool: launchRockets");
        assert!(out.open_app.is_none());
    }

    #[test]
    fn test_missing_required_argument() {
        let out = ToolDispatcher::new().dispatch(&call("w1", "getWeather", json!({})));
        assert!(out.result.is_error());
        assert_eq!(out.result.response["error"], "Missing required argument: location");
    }

    #[test]
    fn test_every_call_gets_exactly_one_matching_result() {
        let dispatcher = ToolDispatcher::new();
        let calls = vec![
            call("1", "getWeather", json!({ "location": "Lahore" })),
            call("2", "getSystemStatus", json!({})),
            call("3", "searchPublicData", json!({ "query": "monsoon" })),
            call("4", "getNews", json!({ "category": "technology" })),
            call("5", "openApp", json!({ "appName": "notepad" })),
            call("6", "nope", json!({})),
        ];
        let results: Vec<ToolResult> = calls.iter().map(|c| dispatcher.dispatch(c).result).collect();
        assert_eq!(results.len(), calls.len());
        for (c, r) in calls.iter().zip(&results) {
            assert_eq!(c.id, r.id);
            assert_eq!(c.name, r.name);
        }
        assert_eq!(results.iter().filter(|r| r.is_error()).count(), 1);
        assert_eq!(results[0].response["location"], "Lahore");
    }

    #[test]
    fn test_declarations() {
        let decls = declarations();
        assert_eq!(decls.len(), 5);

        let weather = Tool::Weather.declaration().to_json();
        assert_eq!(weather["name"], "getWeather");
        assert_eq!(weather["parameters"]["required"], json!(["location"]));

        let status = Tool::SystemStatus.declaration().to_json();
        assert!(status.get("parameters").is_none());

        let open_app = Tool::OpenApp.declaration();
        assert_eq!(open_app.required(), vec!["appName"]);
        assert!(open_app.to_json()["parameters"]["properties"].get("content").is_some());
    }

    #[test]
    fn test_name_round_trip() {
        for tool in Tool::ALL {
            assert_eq!(Tool::from_name(tool.name()), Some(tool));
        }
        assert_eq!(Tool::from_name("getweather"), None);
    }
}
