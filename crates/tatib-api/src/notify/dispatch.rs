use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use tracing::{info, warn};

use tatib_db::{Database, now};
use tatib_types::api::{
    Claims, MarkSentRequest, SendWhatsAppRequest, SendWhatsAppResponse, WhatsAppPreview,
};
use tatib_types::models::Violation;

use crate::error::{AppError, AppResult};
use crate::notify::compose::Composer;
use crate::notify::gateway::normalize_phone;
use crate::state::{AppState, blocking};

/// Store-side half of notification delivery: what to send, and recording
/// that it went out. The gateway call itself lives in [`send`].
pub struct Dispatcher<'a> {
    db: &'a Database,
    composer: &'a Composer,
}

impl<'a> Dispatcher<'a> {
    pub fn new(db: &'a Database, composer: &'a Composer) -> Self {
        Self { db, composer }
    }

    /// What would be sent, and to whom. No side effects.
    pub fn preview(&self, violation_id: i64) -> AppResult<WhatsAppPreview> {
        let (message, student, violation) = self.composer.compose_by_id(self.db, violation_id)?;
        Ok(WhatsAppPreview {
            message,
            recipient: normalize_phone(&student.parent_whatsapp),
            student_name: student.name,
            violation_type: violation.violation_type,
        })
    }

    pub fn has_violation(&self, violation_id: i64) -> AppResult<bool> {
        Ok(self.db.get_violation(violation_id)?.is_some())
    }

    /// Record a delivery the gateway already accepted. The message is out,
    /// so a failure to mark the violation is logged and the send still
    /// reports success.
    pub fn record_delivery(&self, violation_id: i64, message_id: String) -> SendWhatsAppResponse {
        if let Err(e) = self.mark_sent(violation_id, &message_id) {
            warn!(
                "Message {} delivered but violation {} not marked sent: {}",
                message_id, violation_id, e
            );
        }
        SendWhatsAppResponse::sent(message_id)
    }

    /// Record a delivery. Always stamps the current time, so marking an
    /// already-sent violation moves `whatsapp_sent_at` forward.
    pub fn mark_sent(&self, violation_id: i64, message_id: &str) -> AppResult<Violation> {
        if !self.db.mark_whatsapp_sent(violation_id, &now())? {
            return Err(AppError::NotFound(format!("Violation not found: {}", violation_id)));
        }
        info!("Violation {} notified (message {})", violation_id, message_id);
        self.db
            .get_violation(violation_id)?
            .map(Violation::from)
            .ok_or_else(|| AppError::NotFound(format!("Violation not found: {}", violation_id)))
    }
}

/// Send a notification through the configured gateway. Precondition and
/// gateway failures come back as `success: false`; only a broken store is
/// an `Err`. Store access runs off the async runtime.
pub async fn send(state: &AppState, input: SendWhatsAppRequest) -> AppResult<SendWhatsAppResponse> {
    let SendWhatsAppRequest { violation_id, phone_number, message } = input;

    let exists = blocking(state, move |s| {
        Dispatcher::new(&s.db, &s.composer).has_violation(violation_id)
    })
    .await?;
    if !exists {
        return Ok(SendWhatsAppResponse::failed("Violation not found"));
    }

    let phone = normalize_phone(&phone_number);
    if phone.is_empty() {
        return Ok(SendWhatsAppResponse::failed("Invalid phone number"));
    }
    if message.trim().is_empty() {
        return Ok(SendWhatsAppResponse::failed("Message is empty"));
    }

    let message_id = match state.gateway.send(&phone, &message).await {
        Ok(id) => id,
        Err(e) => {
            warn!(
                "{} gateway failed for violation {}: {:#}",
                state.gateway.provider_tag(),
                violation_id,
                e
            );
            return Ok(SendWhatsAppResponse::failed(format!(
                "Failed to send WhatsApp message: {}",
                e
            )));
        }
    };

    blocking(state, move |s| {
        Ok(Dispatcher::new(&s.db, &s.composer).record_delivery(violation_id, message_id))
    })
    .await
}

// -- Handlers --

pub async fn preview_whatsapp(
    State(state): State<AppState>,
    Path(violation_id): Path<i64>,
    Extension(_claims): Extension<Claims>,
) -> AppResult<impl IntoResponse> {
    let preview = blocking(&state, move |s| {
        Dispatcher::new(&s.db, &s.composer).preview(violation_id)
    })
    .await?;
    Ok(Json(preview))
}

pub async fn send_whatsapp(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendWhatsAppRequest>,
) -> AppResult<impl IntoResponse> {
    let violation_id = req.violation_id;
    let response = send(&state, req).await?;
    if response.success {
        info!("{} sent notification for violation {}", claims.username, violation_id);
    }
    Ok(Json(response))
}

pub async fn mark_whatsapp_sent(
    State(state): State<AppState>,
    Path(violation_id): Path<i64>,
    Extension(_claims): Extension<Claims>,
    Json(req): Json<MarkSentRequest>,
) -> AppResult<impl IntoResponse> {
    let message_id = req.message_id.unwrap_or_else(|| "manual".to_string());
    let violation = blocking(&state, move |s| {
        Dispatcher::new(&s.db, &s.composer).mark_sent(violation_id, &message_id)
    })
    .await?;
    Ok(Json(violation))
}
