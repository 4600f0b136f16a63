use axum::Json;
use tracing::instrument;

use crate::context::RequestContext;
use crate::error::AppResult;
use crate::models::{ApiResponse, Item, ItemPath};

/// Get an item by its positive integer id.
#[instrument(skip(ctx), fields(path = %ctx.path))]
pub async fn get_item(ctx: RequestContext) -> AppResult<Json<ApiResponse<Item>>> {
    let ItemPath { id } = ctx.params_as()?;

    Ok(Json(ApiResponse::ok(Item {
        id,
        name: format!("Item {id}"),
    })))
}
