//! # quarry-runtime
//!
//! Turns a [`ToolboxConfig`](quarry_core::ToolboxConfig) into running tools.
//!
//! ## Architecture
//!
//! ```text
//!  adapters ──register──▶ Registry (kind → factory)
//!                             │
//!  config ──────────────▶ Toolbox::build
//!                             │  1. build sources
//!                             │  2. build tools, binding each to a
//!                             │     source capability (binder)
//!                             ▼
//!  caller ──input+auth──▶ Toolbox::invoke
//!                             │  authorize → template → params
//!                             │  → connect (client cache) → prepare
//!                             │  → execute → rows
//!                             ▼
//!                         ToolOutput
//! ```

pub mod binder;
pub mod client_cache;
pub mod pipeline;
pub mod placeholders;
pub mod registry;
pub mod source;
pub mod tool;
pub mod toolbox;

pub use binder::{bind_source, Capability, Statements};
pub use client_cache::{ClientCache, ClientFactory, DEFAULT_CLIENT_TTL, DEFAULT_SWEEP_INTERVAL};
pub use pipeline::{InvocationContext, ToolOutput, NO_CONTENT_MESSAGE, NO_ROWS_MESSAGE};
pub use placeholders::{rewrite_named, PlaceholderStyle, PositionalStatement};
pub use registry::{KindRegistry, Registry, SourceFactory, ToolFactory};
pub use source::{
    PreparedStatement, Row, RowStream, Source, SourceMap, StatementConnection, StatementSource,
};
pub use tool::{
    ExecuteSqlTool, ExecuteSqlToolFactory, StatementTool, StatementToolConfig,
    StatementToolFactory, Tool,
};
pub use toolbox::{Toolbox, ToolsetManifest};
