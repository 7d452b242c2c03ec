use actix_web::{get, web, HttpResponse};
use serde_json::json;
use slog as log;
use std::time::Duration;

use xerror::api::ApiError;

use crate::WebContext;

/// Liveness of the service. Node details are included when the node answers in time.
#[get("/health")]
pub async fn health(context: WebContext) -> Result<HttpResponse, ApiError> {
    let timeout = Duration::from_secs(context.settings.node_timeout_secs);
    let lightning = match tokio::time::timeout(timeout, context.lightning.node_info()).await {
        Ok(Ok(info)) => Some(info),
        Ok(Err(err)) => {
            log::warn!(context.logger, "Health check could not reach the lightning node: {}", err);
            None
        }
        Err(_) => {
            log::warn!(context.logger, "Health check timed out waiting for the lightning node");
            None
        }
    };

    let chain = context.chain.clone();
    let block_height = match tokio::time::timeout(timeout, web::block(move || chain.block_count())).await {
        Ok(Ok(Ok(height))) => Some(height),
        Ok(Ok(Err(err))) => {
            log::warn!(context.logger, "Health check could not reach bitcoind: {}", err);
            None
        }
        Ok(Err(err)) => {
            log::warn!(context.logger, "Health check could not run the bitcoind call: {}", err);
            None
        }
        Err(_) => {
            log::warn!(context.logger, "Health check timed out waiting for bitcoind");
            None
        }
    };

    let status = if lightning.is_some() && block_height.is_some() {
        "ok"
    } else {
        "degraded"
    };

    Ok(HttpResponse::Ok().json(json!({
        "status": status,
        "lightning": lightning,
        "block_height": block_height,
    })))
}
