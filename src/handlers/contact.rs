use axum::Json;
use axum::http::StatusCode;
use chrono::Utc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::AppResult;
use crate::models::{ApiResponse, ContactReceipt, ContactRequest};

/// Accept a contact form submission (JSON or URL-encoded).
///
/// Nothing is stored; the receipt carries a ticket id for follow-up.
#[instrument(skip(ctx))]
pub async fn submit_contact(
    ctx: RequestContext,
) -> AppResult<(StatusCode, Json<ApiResponse<ContactReceipt>>)> {
    let request: ContactRequest = ctx.body_as()?;
    let ticket_id = Uuid::new_v4();

    info!(
        ticket_id = %ticket_id,
        message_len = request.message.len(),
        "Contact form received"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::ok(ContactReceipt {
            ticket_id,
            name: request.name,
            reply_to: request.email,
            received_at: Utc::now(),
            subject: request.subject,
        })),
    ))
}
