//! Error taxonomy shared by every quarry crate.
//!
//! Errors fall into four families:
//!
//! - [`ConfigError`]: detected while registering kinds or building sources and
//!   tools. Fatal for the configuration being loaded.
//! - [`ParameterError`]: caller input (or claims) that does not satisfy a
//!   tool's declared parameters.
//! - [`BackendError`]: preparation, execution or client construction failures
//!   reported by a data store.
//! - [`InvocationError`]: what a caller of a tool sees. Wraps the above with
//!   the tool name and exposes an [`ErrorClass`] for transports.

use thiserror::Error;

/// Errors raised while assembling sources and tools from configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No factory is registered for the kind.
    #[error("unknown {role} kind {kind:?}")]
    UnknownKind { role: &'static str, kind: String },

    /// A factory was already registered under the kind.
    #[error("{role} kind {kind:?} already registered")]
    DuplicateKindRegistration { role: &'static str, kind: String },

    /// A tool references a source that was not configured.
    #[error("no source named {source_name:?} configured (tool {tool:?})")]
    UnknownSource { tool: String, source_name: String },

    /// The referenced source lacks the capability the tool kind needs.
    #[error(
        "invalid source for {tool:?} tool: source {source_name:?} does not provide the {capability} capability"
    )]
    IncompatibleSource {
        tool: String,
        source_name: String,
        capability: &'static str,
    },

    /// A parameter name is declared twice across template and bound parameters.
    #[error("tool {tool:?} declares parameter {name:?} more than once")]
    DuplicateParameter { tool: String, name: String },

    /// A toolset references a tool that was not configured.
    #[error("toolset {toolset:?} references unknown tool {tool:?}")]
    UnknownTool { toolset: String, tool: String },

    /// A `${VAR}` reference names an unset environment variable.
    #[error("environment variable {0:?} is not set")]
    MissingEnvVar(String),

    /// The entry is well-formed YAML but semantically invalid.
    #[error("invalid configuration for {name:?}: {reason}")]
    Invalid { name: String, reason: String },

    /// The entry could not be decoded into its kind's config struct.
    #[error("failed to decode {name:?}: {source}")]
    Decode {
        name: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// The document itself is not valid YAML.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// A source could not establish its backend connection.
    #[error("failed to initialize source {name:?}: {source}")]
    SourceInit {
        name: String,
        #[source]
        source: BackendError,
    },
}

impl ConfigError {
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Caller input that does not match a tool's parameter declarations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParameterError {
    #[error("parameter {name:?} is required")]
    MissingParameter { name: String },

    #[error("parameter {name:?} expects {expected}, got {got}")]
    TypeMismatch {
        name: String,
        expected: String,
        got: String,
    },

    #[error("template parameter {name:?} is required")]
    MissingTemplateParameter { name: String },

    #[error("parameter {name:?} requires one of the auth services {services:?} to be verified")]
    AuthParameterUnresolved { name: String, services: Vec<String> },

    #[error("claims of auth service {service:?} have no field {field:?} for parameter {name:?}")]
    MissingClaimField {
        name: String,
        service: String,
        field: String,
    },
}

/// A failure reported by a data store or while constructing a client for one.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("unable to prepare statement: {0}")]
    Prepare(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("unable to execute statement: {0}")]
    Execute(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("unable to read row: {0}")]
    Row(String),

    #[error("unable to bind parameter {name:?}: {reason}")]
    Bind { name: String, reason: String },

    #[error("unable to create client: {0}")]
    ClientConstruction(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("unable to connect: {0}")]
    Connect(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("a client credential is required")]
    MissingCredential,
}

impl BackendError {
    pub fn prepare(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Prepare(Box::new(err))
    }

    pub fn execute(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Execute(Box::new(err))
    }

    pub fn connect(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Connect(Box::new(err))
    }

    pub fn client_construction(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::ClientConstruction(Box::new(err))
    }

    pub fn bind(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Bind {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Coarse classification a transport maps onto its own status codes.
///
/// Configuration failures surface at startup as [`ConfigError`], never here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Missing or insufficient verified identity.
    Unauthorized,
    /// The caller sent input the tool cannot accept.
    InvalidInput,
    /// The data store failed.
    Backend,
    /// The caller gave up before the invocation finished.
    Cancelled,
}

impl ErrorClass {
    /// HTTP-style status code for the class.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorClass::Unauthorized => 401,
            ErrorClass::InvalidInput => 400,
            ErrorClass::Backend => 502,
            ErrorClass::Cancelled => 499,
        }
    }
}

/// Terminal error of a single tool invocation.
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("tool {0:?} not found")]
    ToolNotFound(String),

    #[error("tool {tool:?} requires auth services {required:?} to be verified")]
    ToolNotAuthorized { tool: String, required: Vec<String> },

    #[error("tool {tool:?} requires a client credential")]
    ClientCredentialRequired { tool: String },

    #[error("invalid input for tool {tool:?}: {source}")]
    Parameter {
        tool: String,
        #[source]
        source: ParameterError,
    },

    #[error("tool {tool:?} failed: {source}")]
    Backend {
        tool: String,
        #[source]
        source: BackendError,
    },

    #[error("invocation of tool {tool:?} was cancelled")]
    Cancelled { tool: String },
}

impl InvocationError {
    pub fn parameter(tool: &str, source: ParameterError) -> Self {
        Self::Parameter {
            tool: tool.to_string(),
            source,
        }
    }

    pub fn backend(tool: &str, source: BackendError) -> Self {
        match source {
            BackendError::MissingCredential => Self::ClientCredentialRequired {
                tool: tool.to_string(),
            },
            source => Self::Backend {
                tool: tool.to_string(),
                source,
            },
        }
    }

    pub fn cancelled(tool: &str) -> Self {
        Self::Cancelled {
            tool: tool.to_string(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            InvocationError::ToolNotFound(_) | InvocationError::Parameter { .. } => {
                ErrorClass::InvalidInput
            }
            InvocationError::ToolNotAuthorized { .. }
            | InvocationError::ClientCredentialRequired { .. } => ErrorClass::Unauthorized,
            InvocationError::Backend { .. } => ErrorClass::Backend,
            InvocationError::Cancelled { .. } => ErrorClass::Cancelled,
        }
    }

    /// Status code a transport should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            InvocationError::ToolNotFound(_) => 404,
            InvocationError::ToolNotAuthorized { .. } => 403,
            other => other.class().status_code(),
        }
    }
}
