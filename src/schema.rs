//! Tool schema registry.
//!
//! Declares every tool the worker knows how to execute: its parameter
//! schema (for request validation) and its target capability (for
//! routing). The registry is built once at startup; the executor's
//! routing table is cross-checked against it for exhaustiveness.
//!
//! # Capabilities
//!
//! Tools are partitioned by the downstream surface that executes them:
//!
//! | Capability | Surface |
//! |------------|---------|
//! | [`Capability::Data`] | Resource-addressed document commands |
//! | [`Capability::Interactive`] | Cross-frame plugin commands |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use rustc_hash::FxHashMap;

// ============================================================================
// Capability
// ============================================================================

/// Downstream command surface a tool is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Resource-addressed document command surface.
    Data,
    /// Cross-frame plugin command surface.
    Interactive,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data => f.write_str("data"),
            Self::Interactive => f.write_str("interactive"),
        }
    }
}

// ============================================================================
// ParamKind
// ============================================================================

/// Expected JSON type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// JSON string.
    String,
    /// JSON number.
    Number,
    /// JSON boolean.
    Boolean,
    /// JSON object.
    Object,
    /// JSON array.
    Array,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => f.write_str("string"),
            Self::Number => f.write_str("number"),
            Self::Boolean => f.write_str("boolean"),
            Self::Object => f.write_str("object"),
            Self::Array => f.write_str("array"),
        }
    }
}

// ============================================================================
// ParamSchema
// ============================================================================

/// Declared schema of one tool parameter.
#[derive(Debug, Clone)]
pub struct ParamSchema {
    /// Parameter name as it appears in `args`.
    pub name: &'static str,
    /// Expected JSON type.
    pub kind: ParamKind,
    /// Whether the parameter must be present.
    pub required: bool,
    /// Allowed values for string enums, if restricted.
    pub allowed: Option<&'static [&'static str]>,
}

impl ParamSchema {
    /// Creates a required parameter.
    #[inline]
    #[must_use]
    pub const fn required(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            required: true,
            allowed: None,
        }
    }

    /// Creates an optional parameter.
    #[inline]
    #[must_use]
    pub const fn optional(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            required: false,
            allowed: None,
        }
    }

    /// Restricts a string parameter to an allowed value set.
    #[inline]
    #[must_use]
    pub const fn with_allowed(mut self, allowed: &'static [&'static str]) -> Self {
        self.allowed = Some(allowed);
        self
    }
}

// ============================================================================
// ToolSchema
// ============================================================================

/// Declared schema of one tool.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    /// Tool name as sent by the relay.
    pub name: &'static str,
    /// Capability that executes this tool.
    pub capability: Capability,
    /// Parameter schemas.
    pub params: Vec<ParamSchema>,
}

impl ToolSchema {
    /// Creates a tool schema.
    #[must_use]
    pub fn new(name: &'static str, capability: Capability, params: Vec<ParamSchema>) -> Self {
        Self {
            name,
            capability,
            params,
        }
    }

    /// Looks up a parameter schema by name.
    #[inline]
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&ParamSchema> {
        self.params.iter().find(|p| p.name == name)
    }
}

// ============================================================================
// SchemaRegistry
// ============================================================================

/// Registry of every tool the worker accepts.
///
/// Built once at startup. The parser consults it for validation; the
/// executor's routing table is validated against it in tests.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    tools: FxHashMap<&'static str, ToolSchema>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            tools: FxHashMap::default(),
        }
    }

    /// Creates the built-in registry covering the data-interactive
    /// tool set.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::empty();

        // Data capability: document resources addressed by path.
        registry.register(ToolSchema::new(
            "create_data_context",
            Capability::Data,
            vec![
                ParamSchema::required("name", ParamKind::String),
                ParamSchema::optional("title", ParamKind::String),
                ParamSchema::optional("collections", ParamKind::Array),
            ],
        ));
        registry.register(ToolSchema::new(
            "get_data_contexts",
            Capability::Data,
            vec![],
        ));
        registry.register(ToolSchema::new(
            "create_items",
            Capability::Data,
            vec![
                ParamSchema::required("data_context", ParamKind::String),
                ParamSchema::required("items", ParamKind::Array),
            ],
        ));
        registry.register(ToolSchema::new(
            "get_items",
            Capability::Data,
            vec![
                ParamSchema::required("data_context", ParamKind::String),
                ParamSchema::optional("limit", ParamKind::Number),
            ],
        ));
        registry.register(ToolSchema::new(
            "select_cases",
            Capability::Data,
            vec![
                ParamSchema::required("data_context", ParamKind::String),
                ParamSchema::required("case_ids", ParamKind::Array),
            ],
        ));
        registry.register(ToolSchema::new(
            "create_table",
            Capability::Data,
            vec![
                ParamSchema::required("data_context", ParamKind::String),
                ParamSchema::optional("name", ParamKind::String),
            ],
        ));

        // Interactive capability: cross-frame plugin surface.
        registry.register(ToolSchema::new(
            "update_interactive_state",
            Capability::Interactive,
            vec![ParamSchema::required("state", ParamKind::Object)],
        ));
        registry.register(ToolSchema::new(
            "resize_plugin",
            Capability::Interactive,
            vec![
                ParamSchema::required("width", ParamKind::Number),
                ParamSchema::required("height", ParamKind::Number),
            ],
        ));
        registry.register(ToolSchema::new(
            "notify_user",
            Capability::Interactive,
            vec![
                ParamSchema::required("message", ParamKind::String),
                ParamSchema::optional("level", ParamKind::String)
                    .with_allowed(&["info", "warn", "error"]),
            ],
        ));

        registry
    }

    /// Adds or replaces a tool schema.
    pub fn register(&mut self, schema: ToolSchema) {
        self.tools.insert(schema.name, schema);
    }

    /// Looks up a tool schema by name.
    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolSchema> {
        self.tools.get(name)
    }

    /// Returns `true` if the tool is registered.
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Returns the number of registered tools.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns `true` if the registry is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Iterates over registered tool names.
    pub fn tool_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.tools.keys().copied()
    }

    /// Iterates over registered schemas.
    pub fn iter(&self) -> impl Iterator<Item = &ToolSchema> {
        self.tools.values()
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

// ============================================================================
// Tests
// ============================================================================
