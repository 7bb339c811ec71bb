//! Request forwarding in the compiler-service protocol, shared by the bridged
//! and spawned tsserver transports.
//!
//! The transports differ only in how a command reaches tsserver and whether
//! pass-through commands carry the plugin namespace; argument construction
//! and body parsing live here.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tsbridge_types::{
    ComponentQuery, DocumentHighlights, EncodedClassifications, JsDocTag, ProjectInfo, QuickInfo,
    TextSpan,
};

use crate::documents::{DocumentStore, read_text};
use crate::position::LineIndex;

/// Namespace of commands answered by the component plugin.
pub(crate) const PLUGIN_PREFIX: &str = "_vue:";

/// Carries one compiler-protocol command to a backend.
#[async_trait]
pub(crate) trait CommandSender: Send + Sync {
    /// `file` is the document the command refers to, so the sender can bring
    /// it up to date first.
    async fn request(&self, file: &Path, command: &str, arguments: Value) -> Option<Value>;
}

pub(crate) struct TsForwarder<S> {
    sender: S,
    /// Prepended to pass-through commands (`projectInfo`, `quickinfo`, ...).
    prefix: &'static str,
    documents: Arc<dyn DocumentStore>,
}

impl<S: CommandSender> TsForwarder<S> {
    pub fn new(sender: S, prefix: &'static str, documents: Arc<dyn DocumentStore>) -> Self {
        Self {
            sender,
            prefix,
            documents,
        }
    }

    pub fn sender(&self) -> &S {
        &self.sender
    }

    async fn pass_through(&self, file: &Path, command: &str, arguments: Value) -> Option<Value> {
        let command = format!("{}{command}", self.prefix);
        self.sender.request(file, &command, arguments).await
    }

    async fn line_index(&self, file: &Path) -> Option<LineIndex> {
        let text = read_text(self.documents.as_ref(), file).await?;
        Some(LineIndex::new(&text))
    }

    pub async fn project_info(&self, file: &Path) -> Option<ProjectInfo> {
        let args = json!({ "file": file, "needFileNameList": false });
        let body = self.pass_through(file, "projectInfo", args).await?;
        parse_body(body, "projectInfo")
    }

    pub async fn quick_info(&self, file: &Path, offset: u32) -> Option<QuickInfo> {
        let index = self.line_index(file).await?;
        let (line, column) = index.ts_location(offset);
        let args = json!({ "file": file, "line": line, "offset": column });
        let body = self.pass_through(file, "quickinfo", args).await?;
        let raw: RawQuickInfo = parse_body(body, "quickinfo")?;
        Some(raw.into_quick_info(&index))
    }

    pub async fn document_highlights(
        &self,
        file: &Path,
        offset: u32,
    ) -> Option<Vec<DocumentHighlights>> {
        let index = self.line_index(file).await?;
        let (line, column) = index.ts_location(offset);
        let args = json!({
            "file": file,
            "line": line,
            "offset": column,
            "filesToSearch": [file],
        });
        let body = self.pass_through(file, "documentHighlights-full", args).await?;
        let highlights: Vec<DocumentHighlights> = parse_body(body, "documentHighlights-full")?;
        (!highlights.is_empty()).then_some(highlights)
    }

    pub async fn semantic_classifications(
        &self,
        file: &Path,
        span: TextSpan,
    ) -> Option<EncodedClassifications> {
        let args = json!({
            "file": file,
            "start": span.start,
            "length": span.length,
            "format": "2020",
        });
        let body = self
            .pass_through(file, "encodedSemanticClassifications-full", args)
            .await?;
        parse_body(body, "encodedSemanticClassifications-full")
    }

    pub async fn resolve_module_name(&self, file: &Path, module_name: &str) -> Option<String> {
        let command = format!("{PLUGIN_PREFIX}resolveModuleName");
        let body = self
            .sender
            .request(file, &command, json!([file, module_name]))
            .await?;
        match body {
            Value::String(name) => Some(name),
            Value::Object(map) => map.get("name")?.as_str().map(String::from),
            _ => None,
        }
    }

    pub async fn component_query(&self, file: &Path, query: ComponentQuery) -> Option<Value> {
        let command = format!("{PLUGIN_PREFIX}{}", query.command_name());
        let args = component_arguments(file, &query);
        self.sender
            .request(file, &command, args)
            .await
            .filter(|body| !body.is_null())
    }
}

/// Plugin commands take positional arguments, the file first.
fn component_arguments(file: &Path, query: &ComponentQuery) -> Value {
    match query {
        ComponentQuery::CollectExtractProps {
            template_code_range,
        } => json!([file, template_code_range]),
        ComponentQuery::ComponentProps { tag }
        | ComponentQuery::ComponentEvents { tag }
        | ComponentQuery::ElementAttrs { tag } => json!([file, tag]),
        ComponentQuery::AutoImportSuggestions { offset }
        | ComponentQuery::RefAtPosition { offset } => json!([file, offset]),
        ComponentQuery::ComponentNames
        | ComponentQuery::ComponentDirectives
        | ComponentQuery::ComponentSlots
        | ComponentQuery::ElementNames => json!([file]),
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(body: Value, command: &str) -> Option<T> {
    match serde_json::from_value(body) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::debug!(command, "unexpected response body: {e}");
            None
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawLocation {
    line: u32,
    offset: u32,
}

/// `quickinfo` body. Documentation and tag text arrive either as plain
/// strings or as display-part arrays depending on the server version.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQuickInfo {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    kind_modifiers: String,
    start: RawLocation,
    end: RawLocation,
    #[serde(default)]
    display_string: String,
    #[serde(default)]
    documentation: Value,
    #[serde(default)]
    tags: Vec<RawTag>,
}

#[derive(Debug, Deserialize)]
struct RawTag {
    name: String,
    #[serde(default)]
    text: Value,
}

impl RawQuickInfo {
    fn into_quick_info(self, index: &LineIndex) -> QuickInfo {
        let start = index.offset_at_ts_location(self.start.line, self.start.offset);
        let end = index.offset_at_ts_location(self.end.line, self.end.offset);
        QuickInfo {
            kind: self.kind,
            kind_modifiers: self.kind_modifiers,
            text_span: TextSpan::from_bounds(start, end),
            display_string: self.display_string,
            documentation: display_text(&self.documentation),
            tags: self
                .tags
                .into_iter()
                .map(|tag| {
                    let text = display_text(&tag.text);
                    JsDocTag {
                        name: tag.name,
                        text: (!text.is_empty()).then_some(text),
                    }
                })
                .collect(),
        }
    }
}

/// Plain string, or the concatenated `text` of a display-part array.
fn display_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use tsbridge_types::HighlightSpanKind;

    use super::*;
    use crate::documents::InMemoryDocuments;

    /// Records every command and answers from a fixed table.
    #[derive(Default)]
    struct Scripted {
        sent: Mutex<Vec<(String, Value)>>,
        answers: Vec<(&'static str, Value)>,
    }

    #[async_trait]
    impl CommandSender for Scripted {
        async fn request(&self, _file: &Path, command: &str, arguments: Value) -> Option<Value> {
            self.sent
                .lock()
                .unwrap()
                .push((command.to_string(), arguments));
            self.answers
                .iter()
                .find(|(name, _)| *name == command)
                .map(|(_, body)| body.clone())
        }
    }

    fn stub_forwarder(
        prefix: &'static str,
        answers: Vec<(&'static str, Value)>,
    ) -> (TsForwarder<Scripted>, PathBuf) {
        let docs = Arc::new(InMemoryDocuments::new());
        let file = PathBuf::from("/w/src/App.vue");
        docs.upsert(&file, 1, "const count = 1;\ncount;\n");
        let sender = Scripted {
            sent: Mutex::default(),
            answers,
        };
        (TsForwarder::new(sender, prefix, docs), file)
    }

    fn sent(forwarder: &TsForwarder<Scripted>) -> Vec<(String, Value)> {
        forwarder.sender().sent.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn quick_info_converts_positions_both_ways() {
        let body = json!({
            "kind": "const",
            "kindModifiers": "",
            "start": { "line": 2, "offset": 1 },
            "end": { "line": 2, "offset": 6 },
            "displayString": "const count: 1",
            "documentation": [{ "text": "The count.", "kind": "text" }],
            "tags": [{ "name": "since", "text": "1.0" }, { "name": "internal" }]
        });
        let (forwarder, file) = stub_forwarder("", vec![("quickinfo", body)]);

        let info = forwarder.quick_info(&file, 19).await.unwrap();
        assert_eq!(info.text_span, TextSpan::new(17, 5));
        assert_eq!(info.display_string, "const count: 1");
        assert_eq!(info.documentation, "The count.");
        assert_eq!(info.tags[0].text.as_deref(), Some("1.0"));
        assert_eq!(info.tags[1].text, None);

        let (command, args) = &sent(&forwarder)[0];
        assert_eq!(command, "quickinfo");
        assert_eq!(args["line"], 2);
        assert_eq!(args["offset"], 3);
    }

    #[tokio::test]
    async fn bridged_prefix_applies_to_pass_through_commands() {
        let (forwarder, file) = stub_forwarder(
            PLUGIN_PREFIX,
            vec![(
                "_vue:projectInfo",
                json!({ "configFileName": "/w/tsconfig.json", "languageServiceDisabled": false }),
            )],
        );
        let info = forwarder.project_info(&file).await.unwrap();
        assert_eq!(info.config_file_name, PathBuf::from("/w/tsconfig.json"));
        assert_eq!(sent(&forwarder)[0].0, "_vue:projectInfo");
    }

    #[tokio::test]
    async fn document_highlights_parse_and_empty_is_none() {
        let body = json!([{
            "fileName": "/w/src/App.vue",
            "highlightSpans": [
                { "textSpan": { "start": 6, "length": 5 }, "kind": "writtenReference" },
                { "textSpan": { "start": 17, "length": 5 }, "kind": "reference" }
            ]
        }]);
        let (forwarder, file) = stub_forwarder("", vec![("documentHighlights-full", body)]);
        let highlights = forwarder.document_highlights(&file, 6).await.unwrap();
        assert_eq!(highlights[0].highlight_spans.len(), 2);
        assert_eq!(
            highlights[0].highlight_spans[0].kind,
            HighlightSpanKind::WrittenReference
        );
        assert_eq!(sent(&forwarder)[0].1["filesToSearch"], json!([file]));

        let (empty, file) = stub_forwarder("", vec![("documentHighlights-full", json!([]))]);
        assert!(empty.document_highlights(&file, 6).await.is_none());
    }

    #[tokio::test]
    async fn classifications_request_2020_format() {
        let body = json!({ "spans": [6, 5, 2049], "endOfLineState": 0 });
        let (forwarder, file) =
            stub_forwarder("", vec![("encodedSemanticClassifications-full", body)]);
        let result = forwarder
            .semantic_classifications(&file, TextSpan::new(0, 24))
            .await
            .unwrap();
        assert_eq!(result.spans, vec![6, 5, 2049]);
        let args = &sent(&forwarder)[0].1;
        assert_eq!(args["format"], "2020");
        assert_eq!(args["length"], 24);
    }

    #[tokio::test]
    async fn plugin_commands_are_always_namespaced() {
        let (forwarder, file) = stub_forwarder(
            "",
            vec![
                ("_vue:getComponentProps", json!([{ "name": "title" }])),
                ("_vue:resolveModuleName", json!({ "name": "/w/src/util.ts" })),
            ],
        );
        let props = forwarder
            .component_query(
                &file,
                ComponentQuery::ComponentProps {
                    tag: "MyButton".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(props[0]["name"], "title");
        assert_eq!(
            forwarder
                .resolve_module_name(&file, "./util")
                .await
                .as_deref(),
            Some("/w/src/util.ts")
        );

        let sent = sent(&forwarder);
        assert_eq!(sent[0].1, json!(["/w/src/App.vue", "MyButton"]));
        assert_eq!(sent[1].1, json!(["/w/src/App.vue", "./util"]));
    }

    #[tokio::test]
    async fn missing_or_malformed_body_is_none() {
        let (forwarder, file) = stub_forwarder("", vec![("quickinfo", json!({ "kind": 3 }))]);
        assert!(forwarder.quick_info(&file, 0).await.is_none());
        assert!(forwarder.project_info(&file).await.is_none());
        assert!(
            forwarder
                .component_query(&file, ComponentQuery::ElementNames)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn unreadable_file_skips_position_requests() {
        let (forwarder, _) = stub_forwarder("", Vec::new());
        let missing = Path::new("/nonexistent/Missing.vue");
        assert!(forwarder.quick_info(missing, 0).await.is_none());
        assert!(sent(&forwarder).is_empty());
    }
}
