//! Server capability model
//!
//! Immutable view over what a server advertised in its `initialize`
//! response. LSP encodes most providers as "boolean or options object";
//! a provider counts as available when it is `true` or any object.
//! An absent capabilities payload answers "unsupported" everywhere.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::protocol::{InitializeResult, ServerCapabilities, ServerInfo};

/// Capability flags surfaced to editor features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Feature {
    Hover,
    References,
    DocumentHighlight,
    FoldingRange,
    CodeAction,
    Rename,
    DocumentSymbol,
    DocumentFormatting,
    DocumentRangeFormatting,
}

impl Feature {
    pub const ALL: [Feature; 9] = [
        Feature::Hover,
        Feature::References,
        Feature::DocumentHighlight,
        Feature::FoldingRange,
        Feature::CodeAction,
        Feature::Rename,
        Feature::DocumentSymbol,
        Feature::DocumentFormatting,
        Feature::DocumentRangeFormatting,
    ];

    /// Key used in JSON output
    pub fn name(self) -> &'static str {
        match self {
            Feature::Hover => "hover",
            Feature::References => "references",
            Feature::DocumentHighlight => "documentHighlight",
            Feature::FoldingRange => "foldingRange",
            Feature::CodeAction => "codeAction",
            Feature::Rename => "rename",
            Feature::DocumentSymbol => "documentSymbol",
            Feature::DocumentFormatting => "documentFormatting",
            Feature::DocumentRangeFormatting => "documentRangeFormatting",
        }
    }

    pub fn method(self) -> &'static str {
        match self {
            Feature::Hover => "textDocument/hover",
            Feature::References => "textDocument/references",
            Feature::DocumentHighlight => "textDocument/documentHighlight",
            Feature::FoldingRange => "textDocument/foldingRange",
            Feature::CodeAction => "textDocument/codeAction",
            Feature::Rename => "textDocument/rename",
            Feature::DocumentSymbol => "textDocument/documentSymbol",
            Feature::DocumentFormatting => "textDocument/formatting",
            Feature::DocumentRangeFormatting => "textDocument/rangeFormatting",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionOptions {
    #[serde(default)]
    pub resolve_provider: Option<bool>,
    #[serde(default)]
    pub trigger_characters: Option<Vec<String>>,
    #[serde(default)]
    pub all_commit_characters: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureHelpOptions {
    #[serde(default)]
    pub trigger_characters: Option<Vec<String>>,
    #[serde(default)]
    pub retrigger_characters: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticTokensLegend {
    #[serde(default)]
    pub token_types: Vec<String>,
    #[serde(default)]
    pub token_modifiers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticTokensOptions {
    #[serde(default)]
    pub legend: SemanticTokensLegend,
    /// `true` or `{}`
    #[serde(default)]
    pub range: Option<Value>,
    /// `true` or `{ "delta": bool }`
    #[serde(default)]
    pub full: Option<Value>,
}

/// Negotiated capabilities of one session. Never mutated after the handshake.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    raw: Option<ServerCapabilities>,
    server_info: Option<ServerInfo>,
}

impl Capabilities {
    pub fn new(raw: Option<ServerCapabilities>) -> Self {
        Self {
            raw,
            server_info: None,
        }
    }

    /// Capabilities of a server that never answered usefully.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_initialize(result: InitializeResult) -> Self {
        Self {
            raw: result.capabilities,
            server_info: result.server_info,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_none()
    }

    pub fn raw(&self) -> Option<&ServerCapabilities> {
        self.raw.as_ref()
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    pub fn supports(&self, feature: Feature) -> bool {
        let Some(raw) = &self.raw else {
            return false;
        };
        let provider = match feature {
            Feature::Hover => &raw.hover_provider,
            Feature::References => &raw.references_provider,
            Feature::DocumentHighlight => &raw.document_highlight_provider,
            Feature::FoldingRange => &raw.folding_range_provider,
            Feature::CodeAction => &raw.code_action_provider,
            Feature::Rename => &raw.rename_provider,
            Feature::DocumentSymbol => &raw.document_symbol_provider,
            Feature::DocumentFormatting => &raw.document_formatting_provider,
            Feature::DocumentRangeFormatting => &raw.document_range_formatting_provider,
        };
        is_available(provider.as_ref())
    }

    pub fn has_hover_support(&self) -> bool {
        self.supports(Feature::Hover)
    }

    pub fn has_reference_support(&self) -> bool {
        self.supports(Feature::References)
    }

    pub fn has_document_highlight_support(&self) -> bool {
        self.supports(Feature::DocumentHighlight)
    }

    pub fn has_folding_range_support(&self) -> bool {
        self.supports(Feature::FoldingRange)
    }

    pub fn has_code_action_support(&self) -> bool {
        self.supports(Feature::CodeAction)
    }

    pub fn has_rename_support(&self) -> bool {
        self.supports(Feature::Rename)
    }

    pub fn has_document_symbol_support(&self) -> bool {
        self.supports(Feature::DocumentSymbol)
    }

    pub fn has_document_formatting_support(&self) -> bool {
        self.supports(Feature::DocumentFormatting)
    }

    pub fn has_document_range_formatting_support(&self) -> bool {
        self.supports(Feature::DocumentRangeFormatting)
    }

    pub fn completion_options(&self) -> Option<CompletionOptions> {
        self.options(|raw| raw.completion_provider.as_ref())
    }

    pub fn signature_help_options(&self) -> Option<SignatureHelpOptions> {
        self.options(|raw| raw.signature_help_provider.as_ref())
    }

    pub fn semantic_tokens_options(&self) -> Option<SemanticTokensOptions> {
        self.options(|raw| raw.semantic_tokens_provider.as_ref())
    }

    /// Hover options object, when the server sent one instead of a boolean.
    pub fn hover_options(&self) -> Option<Value> {
        self.raw
            .as_ref()
            .and_then(|raw| raw.hover_provider.as_ref())
            .filter(|v| v.is_object())
            .cloned()
    }

    /// Raw `textDocumentSync` value: a sync kind number or an options object.
    pub fn text_document_sync(&self) -> Option<&Value> {
        self.raw.as_ref().and_then(|raw| raw.text_document_sync.as_ref())
    }

    /// Flag map for every surfaced feature, in declaration order.
    pub fn summary(&self) -> Vec<(Feature, bool)> {
        Feature::ALL.iter().map(|f| (*f, self.supports(*f))).collect()
    }

    fn options<T, F>(&self, field: F) -> Option<T>
    where
        T: DeserializeOwned,
        F: FnOnce(&ServerCapabilities) -> Option<&Value>,
    {
        let value = field(self.raw.as_ref()?)?;
        if !value.is_object() {
            return None;
        }
        match serde_json::from_value(value.clone()) {
            Ok(options) => Some(options),
            Err(e) => {
                tracing::debug!("Ignoring malformed capability options: {}", e);
                None
            }
        }
    }
}

/// "boolean or options" availability
fn is_available(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Object(_)) => true,
        _ => false,
    }
}
