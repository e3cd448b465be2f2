//! `quarry invoke`: run one tool invocation and print its result as JSON.

use anyhow::{bail, Context, Result};
use quarry_core::{Claims, ClientCredential, ErrorClass, InvocationError, VerifiedAuth};
use quarry_runtime::{InvocationContext, ToolOutput};
use serde_json::{Map, Value};
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Parse `--auth <service>=<claims-json>`.
pub fn parse_auth(raw: &str) -> Result<(String, Claims), String> {
    let (service, claims) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected <service>=<claims-json>, got {raw:?}"))?;
    if service.is_empty() {
        return Err("service name must not be empty".to_string());
    }
    match serde_json::from_str::<Value>(claims) {
        Ok(Value::Object(claims)) => Ok((service.to_string(), claims)),
        Ok(_) => Err(format!("claims for {service:?} must be a JSON object")),
        Err(e) => Err(format!("claims for {service:?} are not valid JSON: {e}")),
    }
}

/// Parse `--params` into the invocation input object.
pub fn parse_params(raw: Option<&str>) -> Result<Map<String, Value>> {
    let Some(raw) = raw else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<Value>(raw).context("--params is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("--params must be a JSON object, got {}", other),
    }
}

/// Process exit code for a failed invocation.
pub fn exit_code(err: &InvocationError) -> u8 {
    match err.class() {
        ErrorClass::InvalidInput => 65,
        ErrorClass::Unauthorized => 77,
        ErrorClass::Backend => 69,
        ErrorClass::Cancelled => 130,
    }
}

pub struct InvokeArgs<'a> {
    pub tool: &'a str,
    pub params: Option<&'a str>,
    pub auth: Vec<(String, Claims)>,
    pub credential: Option<&'a str>,
}

/// Returns the process exit status: 0 on success, else [`exit_code`].
pub async fn run(config_path: &Path, args: InvokeArgs<'_>) -> Result<u8> {
    let input = parse_params(args.params)?;
    let toolbox = super::load_toolbox(config_path).await?;

    let cancel = CancellationToken::new();
    let ctx = context(&args, cancel.clone());
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling invocation");
            cancel.cancel();
        }
    });

    let result = toolbox.invoke(args.tool, &input, &ctx).await;
    watcher.abort();
    toolbox.shutdown().await;

    match result {
        Ok(output) => {
            println!("{}", render(&output)?);
            Ok(0)
        }
        Err(err) => {
            eprintln!("error ({}): {}", err.status_code(), err);
            Ok(exit_code(&err))
        }
    }
}

fn context(args: &InvokeArgs<'_>, cancel: CancellationToken) -> InvocationContext {
    let mut auth = VerifiedAuth::new();
    for (service, claims) in &args.auth {
        auth.insert(service.clone(), claims.clone());
    }
    let mut ctx = InvocationContext::new().with_auth(auth).with_cancel(cancel);
    if let Some(credential) = args
        .credential
        .and_then(ClientCredential::from_authorization_header)
    {
        ctx = ctx.with_credential(credential);
    }
    ctx
}

fn render(output: &ToolOutput) -> Result<String> {
    Ok(serde_json::to_string_pretty(output)?)
}
