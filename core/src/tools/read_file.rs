//! The `read_file` tool. Reads are not confined by the sandbox policy (the
//! whole disk is readable by design), only capped in size.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use foreman_protocol::models::FunctionCallOutputPayload;
use serde::Deserialize;
use tokio::fs;

use crate::session::Session;
use crate::tools::invalid_arguments;

#[derive(Debug, Deserialize)]
pub(crate) struct ReadFileParams {
    pub path: PathBuf,
    /// Overrides the session output cap, but never raises it.
    pub max_bytes: Option<usize>,
}

pub(crate) async fn handle_read_file(
    session: &Arc<Session>,
    arguments: &str,
) -> FunctionCallOutputPayload {
    let params: ReadFileParams = match serde_json::from_str(arguments) {
        Ok(params) => params,
        Err(err) => return invalid_arguments("read_file", &err),
    };

    let config = &session.config;
    let path = if params.path.is_absolute() {
        params.path
    } else {
        config.cwd.join(&params.path)
    };
    let cap = params
        .max_bytes
        .map_or(config.max_output_bytes, |requested| {
            requested.min(config.max_output_bytes)
        });

    match read_capped(&path, cap).await {
        Ok((content, truncated)) => {
            if truncated {
                FunctionCallOutputPayload::success(format!("{content}\n[output truncated]"))
            } else {
                FunctionCallOutputPayload::success(content)
            }
        }
        Err(err) => {
            FunctionCallOutputPayload::failure(format!("failed to read {}: {err}", path.display()))
        }
    }
}

async fn read_capped(path: &Path, cap: usize) -> std::io::Result<(String, bool)> {
    let bytes = fs::read(path).await?;
    let truncated = bytes.len() > cap;
    let kept = if truncated { &bytes[..cap] } else { &bytes[..] };
    Ok((String::from_utf8_lossy(kept).into_owned(), truncated))
}
