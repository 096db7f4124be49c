//! Tool registry and dispatcher.
//!
//! Maps tool names to handlers, renders prompt descriptions and native
//! definitions, classifies parallel safety, and routes qualified
//! `ext_…__…` names to the extension manager. The per-turn loop guard lives
//! in the engine (it is turn-scoped state); the registry only executes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::{Tool, ToolCall, ToolContext, ToolOutcome, ToolSpec};
use crate::error::ToolErrorKind;
use crate::extension::ExtensionManager;
use crate::llm::NativeToolDef;

/// Literal prefix of qualified extension tool names. Built-in names never
/// start with it.
pub const EXTENSION_TOOL_PREFIX: &str = "ext_";

/// Options for [`ToolRegistry::describe_all`].
#[derive(Clone, Copy, Debug, Default)]
pub struct DescribeOptions {
    /// Short-form prompt: names and one-line purposes only.
    pub compact: bool,
    /// Omit rarely-used tools.
    pub fast: bool,
    /// Clamp on the number of extension tools included.
    pub max_extension_tools: usize,
}

/// Registry of built-in tools plus the extension dispatch route.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
    extensions: Arc<ExtensionManager>,
}

impl ToolRegistry {
    pub fn new(extensions: Arc<ExtensionManager>) -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
            extensions,
        }
    }

    /// Registers a built-in. Names starting with the extension prefix are
    /// rejected to keep the namespaces disjoint.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        debug_assert!(
            !name.starts_with(EXTENSION_TOOL_PREFIX),
            "built-in tool name collides with extension prefix"
        );
        if let Some(&i) = self.index.get(&name) {
            self.tools[i] = tool;
        } else {
            self.index.insert(name, self.tools.len());
            self.tools.push(tool);
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Built-in tool names eligible for concurrent execution.
    pub fn parallel_safe_names(&self) -> Vec<&str> {
        self.tools
            .iter()
            .filter(|t| t.parallel_safe())
            .map(|t| t.name())
            .collect()
    }

    /// Extension tools are always serialised; built-ins follow their flag;
    /// unknown names are serialised defensively.
    pub fn is_parallel_safe(&self, name: &str) -> bool {
        if name.starts_with(EXTENSION_TOOL_PREFIX) {
            return false;
        }
        self.index
            .get(name)
            .map(|&i| self.tools[i].parallel_safe())
            .unwrap_or(false)
    }

    /// Prompt-ready description of every available tool.
    pub async fn describe_all(&self, language: &str, options: DescribeOptions) -> String {
        let header = if language == "es" {
            "Herramientas disponibles (responde con tool_call para usarlas):"
        } else {
            "Available tools (reply with a tool_call to use one):"
        };
        let mut out = String::from(header);
        out.push('\n');

        for tool in &self.tools {
            let spec = tool.spec();
            if options.fast && spec.rarely_used {
                continue;
            }
            push_spec(&mut out, &spec, options.compact);
        }

        let mut ext_specs = self.extensions.tool_specs().await;
        if options.max_extension_tools > 0 && ext_specs.len() > options.max_extension_tools {
            ext_specs.truncate(options.max_extension_tools);
        }
        if !ext_specs.is_empty() {
            out.push_str(if language == "es" {
                "\nHerramientas de extensión:\n"
            } else {
                "\nExtension tools:\n"
            });
            for spec in &ext_specs {
                push_spec(&mut out, spec, options.compact);
            }
        }
        out
    }

    /// JSON-schema definitions for providers with native tool calling.
    pub async fn native_definitions(&self) -> Vec<NativeToolDef> {
        let mut defs: Vec<NativeToolDef> = self
            .tools
            .iter()
            .map(|t| {
                let spec = t.spec();
                NativeToolDef {
                    name: spec.name,
                    description: spec.description,
                    parameters: spec.input_schema,
                }
            })
            .collect();
        for spec in self.extensions.tool_specs().await {
            defs.push(NativeToolDef {
                name: spec.name,
                description: spec.description,
                parameters: spec.input_schema,
            });
        }
        defs
    }

    /// Dispatches one call: extension prefix routes to the manager, anything
    /// else to the built-in handler; unknown names fail without side effects.
    pub async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutcome {
        // Arguments may carry credentials; every logged copy goes through
        // the redaction helper.
        tracing::debug!(
            tool = %call.name,
            params = %crate::redact::redact_credentials(&call.params.to_string()),
            "executing tool"
        );
        let timeout = Duration::from_millis(ctx.config.read().await.options.tool_timeout_ms());
        if call.name.starts_with(EXTENSION_TOOL_PREFIX) {
            return self
                .extensions
                .call(&call.name, call.params.clone(), timeout)
                .await;
        }
        let Some(&i) = self.index.get(&call.name) else {
            return ToolOutcome::fail(
                ToolErrorKind::UnknownTool,
                format!("no tool named `{}`", call.name),
            );
        };
        let tool = Arc::clone(&self.tools[i]);
        let params = normalize_params(call.params.clone());
        match tokio::time::timeout(timeout, tool.call(params, ctx)).await {
            Ok(outcome) => outcome,
            Err(_) => ToolOutcome::fail(
                ToolErrorKind::Timeout,
                format!("tool `{}` timed out after {timeout:?}", call.name),
            ),
        }
    }
}

fn push_spec(out: &mut String, spec: &ToolSpec, compact: bool) {
    if compact {
        out.push_str(&format!("- {}: {}\n", spec.name, spec.description));
    } else {
        out.push_str(&format!(
            "- {}: {}\n  args: {}\n",
            spec.name, spec.description, spec.input_schema
        ));
    }
}

/// Tools accept an object; null becomes an empty object so argument-free
/// calls parse uniformly.
fn normalize_params(params: Value) -> Value {
    match params {
        Value::Null => Value::Object(serde_json::Map::new()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolSpec;
    use async_trait::async_trait;

    struct FakeTool {
        name: &'static str,
        safe: bool,
    }

    #[async_trait]
    impl Tool for FakeTool {
        fn name(&self) -> &str {
            self.name
        }
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: self.name.into(),
                description: "a fake tool".into(),
                input_schema: serde_json::json!({"type": "object"}),
                rarely_used: false,
            }
        }
        fn parallel_safe(&self) -> bool {
            self.safe
        }
        async fn call(&self, _params: Value, _ctx: &ToolContext) -> ToolOutcome {
            ToolOutcome::ok("done")
        }
    }

    fn registry() -> ToolRegistry {
        let mut r = ToolRegistry::new(ExtensionManager::new());
        r.register(Arc::new(FakeTool {
            name: "get_notes",
            safe: true,
        }));
        r.register(Arc::new(FakeTool {
            name: "create_note",
            safe: false,
        }));
        r
    }

    #[test]
    fn parallel_safety_classification() {
        let r = registry();
        assert!(r.is_parallel_safe("get_notes"));
        assert!(!r.is_parallel_safe("create_note"));
        assert!(!r.is_parallel_safe("ext_files__read"));
        assert!(!r.is_parallel_safe("nonexistent"));
        assert_eq!(r.parallel_safe_names(), vec!["get_notes"]);
    }

    #[tokio::test]
    async fn describe_lists_tools_in_both_forms() {
        let r = registry();
        let full = r.describe_all("en", DescribeOptions::default()).await;
        assert!(full.contains("get_notes"));
        assert!(full.contains("args:"));
        let compact = r
            .describe_all(
                "es",
                DescribeOptions {
                    compact: true,
                    ..Default::default()
                },
            )
            .await;
        assert!(compact.contains("Herramientas"));
        assert!(!compact.contains("args:"));
    }

    #[tokio::test]
    async fn native_definitions_cover_builtins() {
        let r = registry();
        let defs = r.native_definitions().await;
        assert_eq!(defs.len(), 2);
        assert!(defs.iter().any(|d| d.name == "create_note"));
    }
}
