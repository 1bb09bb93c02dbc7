//! The decision-making service: given a query and a short list of candidate
//! tools, choose to call one, answer directly, or decline.

use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;

use agent_primitives::{ToolCall, ToolDescriptor};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::traits::{AdapterError, AdapterResult, InferenceRequest, MessageRole, ModelAdapter, PromptMessage};

/// What the decision service wants to do with a query.
#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    /// Invoke one tool.
    Call(ToolCall),
    /// Answer without a tool.
    Answer(String),
    /// Refuse, e.g. because the request would modify data.
    Decline(String),
}

/// Chooses an action for a query and turns tool output into an answer.
///
/// Implementations are treated as nondeterministic; callers must not assume
/// repeated calls agree.
#[async_trait]
pub trait DecisionService: Send + Sync {
    /// Picks an action given the query and the retrieved candidates.
    async fn decide(&self, query: &str, candidates: &[Arc<ToolDescriptor>]) -> AdapterResult<Decision>;

    /// Formats the final answer from a successful tool result.
    async fn compose_answer(&self, query: &str, call: &ToolCall, value: &Value) -> AdapterResult<String>;
}

/// Default system prompt: read-only assistant, tools only.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a helpful assistant that answers questions by calling tools.
You can only reach data through the tools listed in each request; never invent facts a tool would provide.
You have READ-ONLY access. You cannot create, update or delete anything.
If the user asks to modify data, decline politely and explain that you only have read access.
If none of the listed tools fits the question, answer directly only when no data lookup is needed; otherwise decline and say what you cannot do.";

const DECISION_FORMAT: &str = "\
Reply with exactly one JSON object and nothing else, in one of these forms:
{\"action\": \"call\", \"tool\": \"<tool name>\", \"arguments\": {<parameter>: <value>}}
{\"action\": \"answer\", \"answer\": \"<text>\"}
{\"action\": \"decline\", \"reason\": \"<text>\"}";

/// [`DecisionService`] backed by a chat model.
pub struct ModelDecisionService {
    adapter: Arc<dyn ModelAdapter>,
    system_prompt: String,
    temperature: Option<f32>,
}

impl fmt::Debug for ModelDecisionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDecisionService")
            .field("provider", &self.adapter.metadata().provider())
            .field("model", &self.adapter.metadata().model())
            .field("temperature", &self.temperature)
            .finish_non_exhaustive()
    }
}

impl ModelDecisionService {
    /// Wraps a model adapter using [`DEFAULT_SYSTEM_PROMPT`].
    #[must_use]
    pub fn new(adapter: Arc<dyn ModelAdapter>) -> Self {
        Self {
            adapter,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            temperature: None,
        }
    }

    /// Replaces the system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Sets the sampling temperature for both requests.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    fn request(&self, system: String, user: String) -> AdapterResult<InferenceRequest> {
        let request = InferenceRequest::new(vec![PromptMessage::new(MessageRole::User, user)])?
            .with_system_prompt(system);
        Ok(match self.temperature {
            Some(temperature) => request.with_temperature(temperature),
            None => request,
        })
    }
}

#[async_trait]
impl DecisionService for ModelDecisionService {
    async fn decide(&self, query: &str, candidates: &[Arc<ToolDescriptor>]) -> AdapterResult<Decision> {
        let system = format!("{}\n\n{DECISION_FORMAT}", self.system_prompt);
        let user = format!("Available tools:\n{}\nQuestion: {query}", render_candidates(candidates));
        let request = self.request(system, user)?.with_json_output();
        let reply = self.adapter.complete(request).await?;
        let decision = parse_decision(&reply, candidates)?;
        debug!(
            model = self.adapter.metadata().model(),
            decision = decision_label(&decision),
            "decision received"
        );
        Ok(decision)
    }

    async fn compose_answer(&self, query: &str, call: &ToolCall, value: &Value) -> AdapterResult<String> {
        let arguments = Value::Object(call.arguments().clone());
        let user = format!(
            "Question: {query}\nTool called: {} with arguments {arguments}\nTool result: {value}\n\n\
             Answer the question using only the tool result. Be concise.",
            call.tool_name()
        );
        let answer = self.adapter.complete(self.request(self.system_prompt.clone(), user)?).await?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(AdapterError::response("model returned an empty answer"));
        }
        Ok(answer.to_owned())
    }
}

fn decision_label(decision: &Decision) -> &'static str {
    match decision {
        Decision::Call(_) => "call",
        Decision::Answer(_) => "answer",
        Decision::Decline(_) => "decline",
    }
}

/// Renders candidates as the tool list shown to the model.
#[must_use]
pub fn render_candidates(candidates: &[Arc<ToolDescriptor>]) -> String {
    if candidates.is_empty() {
        return "(no tools matched this question)\n".to_owned();
    }
    let mut out = String::new();
    for tool in candidates {
        let _ = write!(out, "- {}: {}", tool.name(), tool.description());
        if tool.parameters().is_empty() {
            out.push_str(" (no parameters)");
        } else {
            let params: Vec<String> = tool
                .parameters()
                .iter()
                .map(|param| {
                    let flag = if param.is_required() { "required" } else { "optional" };
                    format!("{}: {} ({flag})", param.name(), param.ty())
                })
                .collect();
            let _ = write!(out, " [parameters: {}]", params.join(", "));
        }
        out.push('\n');
    }
    out
}

#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum RawDecision {
    Call {
        #[serde(alias = "name", alias = "tool_name")]
        tool: String,
        #[serde(default)]
        arguments: Value,
    },
    Answer {
        #[serde(alias = "text")]
        answer: String,
    },
    Decline {
        #[serde(default, alias = "message")]
        reason: String,
    },
}

/// Parses a model reply into a [`Decision`].
///
/// The first `{` through the last `}` is read as the decision object, which
/// tolerates code fences and chatter around it. A reply with no object at all
/// is taken as a direct answer. Non-object arguments are bound through the
/// candidate's schema when the tool is known.
///
/// # Errors
///
/// Returns [`AdapterError::Response`] for empty replies and malformed
/// decision objects.
pub fn parse_decision(reply: &str, candidates: &[Arc<ToolDescriptor>]) -> AdapterResult<Decision> {
    let reply = reply.trim();
    if reply.is_empty() {
        return Err(AdapterError::response("model returned an empty decision"));
    }
    let object = match (reply.find('{'), reply.rfind('}')) {
        (Some(start), Some(end)) if start < end => &reply[start..=end],
        _ => return Ok(Decision::Answer(reply.to_owned())),
    };
    let raw: RawDecision = serde_json::from_str(object).map_err(|err| {
        warn!(error = %err, "unparsable decision");
        AdapterError::response(format!("malformed decision: {err}"))
    })?;

    Ok(match raw {
        RawDecision::Call { tool, arguments } => {
            let arguments = match arguments {
                Value::Object(map) => map,
                other => candidates
                    .iter()
                    .find(|candidate| candidate.name() == tool)
                    .map_or_else(Map::new, |candidate| candidate.bind_arguments(other)),
            };
            Decision::Call(ToolCall::new(tool, arguments))
        }
        RawDecision::Answer { answer } => Decision::Answer(answer),
        RawDecision::Decline { reason } => Decision::Decline(reason),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use agent_primitives::{ParamType, ParameterSpec};
    use serde_json::json;

    use super::*;
    use crate::traits::AdapterMetadata;

    fn advisor_tool() -> Arc<ToolDescriptor> {
        Arc::new(
            ToolDescriptor::builder("get_advisor", "Finds a student's academic advisor")
                .parameter(ParameterSpec::required("student_name", ParamType::String))
                .build()
                .unwrap(),
        )
    }

    /// Replays canned completions and records the requests it saw.
    struct Scripted {
        metadata: AdapterMetadata,
        replies: Mutex<Vec<String>>,
        seen: Mutex<Vec<InferenceRequest>>,
    }

    impl Scripted {
        fn new(replies: &[&str]) -> Self {
            Self {
                metadata: AdapterMetadata::new("scripted", "test"),
                replies: Mutex::new(replies.iter().rev().map(|reply| (*reply).to_owned()).collect()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ModelAdapter for Scripted {
        fn metadata(&self) -> &AdapterMetadata {
            &self.metadata
        }

        async fn complete(&self, request: InferenceRequest) -> AdapterResult<String> {
            self.seen.lock().unwrap().push(request);
            self.replies
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| AdapterError::transport("script exhausted"))
        }
    }

    #[test]
    fn parses_each_action() {
        let tools = [advisor_tool()];
        let call = parse_decision(
            r#"{"action": "call", "tool": "get_advisor", "arguments": {"student_name": "Budi"}}"#,
            &tools,
        )
        .unwrap();
        let mut arguments = Map::new();
        arguments.insert("student_name".into(), json!("Budi"));
        assert_eq!(call, Decision::Call(ToolCall::new("get_advisor", arguments)));

        let answer = parse_decision(r#"{"action": "answer", "answer": "Hello!"}"#, &tools).unwrap();
        assert_eq!(answer, Decision::Answer("Hello!".into()));

        let decline = parse_decision(r#"{"action": "decline", "reason": "read-only"}"#, &tools).unwrap();
        assert_eq!(decline, Decision::Decline("read-only".into()));
    }

    #[test]
    fn scalar_arguments_bind_to_the_required_parameter() {
        let tools = [advisor_tool()];
        let reply = "```json\n{\"action\": \"call\", \"tool\": \"get_advisor\", \"arguments\": \"Siti\"}\n```";
        let Decision::Call(call) = parse_decision(reply, &tools).unwrap() else {
            panic!("expected a call");
        };
        assert_eq!(call.arguments().get("student_name"), Some(&json!("Siti")));
    }

    #[test]
    fn plain_text_is_an_answer_and_garbage_is_an_error() {
        assert_eq!(
            parse_decision("Hi there", &[]).unwrap(),
            Decision::Answer("Hi there".into())
        );
        assert!(parse_decision("", &[]).is_err());
        assert!(parse_decision(r#"{"action": "explode"}"#, &[]).is_err());
    }

    #[test]
    fn candidate_rendering_lists_parameters() {
        let rendered = render_candidates(&[advisor_tool()]);
        assert!(rendered.contains("get_advisor"));
        assert!(rendered.contains("student_name: string (required)"));
        assert!(render_candidates(&[]).contains("no tools"));
    }

    #[tokio::test]
    async fn model_service_requests_json_and_composes_answers() {
        let adapter = Arc::new(Scripted::new(&[
            r#"{"action": "call", "tool": "get_advisor", "arguments": {"student_name": "Budi"}}"#,
            "  Budi's advisor is Dr. Rina.  ",
        ]));
        let service = ModelDecisionService::new(adapter.clone()).with_temperature(0.0);
        let tools = [advisor_tool()];

        let Decision::Call(call) = service.decide("who advises Budi?", &tools).await.unwrap() else {
            panic!("expected a call");
        };
        let answer = service
            .compose_answer("who advises Budi?", &call, &json!({"advisor": "Dr. Rina"}))
            .await
            .unwrap();
        assert_eq!(answer, "Budi's advisor is Dr. Rina.");

        let seen = adapter.seen.lock().unwrap();
        assert!(seen[0].json_output());
        assert!(seen[0].system_prompt().unwrap().contains("READ-ONLY"));
        assert!(seen[0].messages()[0].content().contains("get_advisor"));
        assert!(!seen[1].json_output());
        assert_eq!(seen[1].temperature(), Some(0.0));
    }
}
