//! Logging handlers for every hook and event category

use taibai_net::HubClient;
use tracing::{debug, error, info, warn};

pub fn install(client: &HubClient) {
    let id = client.id();

    client.on_connect(move || info!(client_id = %id, "Connected"));
    client.on_disconnect(move |cause| warn!(client_id = %id, cause = %cause, "Disconnected"));
    client.on_error(move |e| {
        if e.is_terminal() {
            error!(client_id = %id, error = %e, "Hub client gave up");
        } else {
            warn!(client_id = %id, error = %e, "Hub client error");
        }
    });

    client.on_user_message(|msg| {
        info!(
            user = %msg.user_name,
            channel = %msg.channel_id,
            kind = %msg.message_type,
            "{}",
            msg.content
        );
    });
    client.on_card_callback(|cb| {
        info!(card = %cb.card_id, action = %cb.action, user = %cb.user_id, "Card callback");
    });
    client.on_approval_change(|change| {
        info!(
            approval = %change.approval_id,
            status = ?change.status,
            approver = %change.approver_name,
            "Approval changed"
        );
    });
    client.on_system(|event, payload| debug!(event = %event, payload = %payload, "System event"));
}
