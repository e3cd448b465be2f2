//! # quarry-core
//!
//! Backend-agnostic building blocks for quarry tools:
//!
//! - **Parameters**: typed declarations and per-invocation values ([`params`])
//! - **Auth**: verified services, claims and tool-level authorization ([`auth`])
//! - **Templates**: identifier substitution into statement text ([`template`])
//! - **Manifests**: discovery and tool-protocol schemas ([`manifest`])
//! - **Errors**: the shared error taxonomy ([`error`])
//! - **Config**: the toolbox YAML document ([`config`])

pub mod auth;
pub mod config;
pub mod error;
pub mod manifest;
pub mod params;
pub mod template;

pub use auth::{is_authorized, Claims, ClientCredential, VerifiedAuth};
pub use config::{decode_entry, ToolboxConfig};
pub use error::{BackendError, ConfigError, ErrorClass, InvocationError, ParameterError};
pub use manifest::{build_manifests, Manifest, ParameterManifest, ProtocolManifest};
pub use params::{parse_params, AuthBinding, ParamValue, ParamValues, Parameter, ParameterType};
pub use template::resolve_template_params;
