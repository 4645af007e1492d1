//! A2A protocol translator — legacy dialect ↔ modern dialect.
//!
//! Legacy: `tasks/send`, `tasks/sendSubscribe`, `Part.type`, `mimeType`.
//! Modern: `message/send`, `message/stream`, `Part.kind`, `mime_type`,
//! explicit `MessageSendConfiguration`/`MessageSendParams`.
//!
//! Translation is total for the supported methods; anything else raises
//! [`A2AError::Translation`], which the caller maps to a JSON-RPC
//! `InvalidRequest` response and a mesh nack.

use serde_json::{json, Map, Value};
use tracing::warn;
use uuid::Uuid;

use crate::error::{A2AError, A2AResult};

/// The modern JSON-RPC method a legacy method translates to.
pub fn modern_method_for(legacy_method: &str) -> A2AResult<&'static str> {
    match legacy_method {
        "tasks/send" => Ok("message/send"),
        "tasks/sendSubscribe" => Ok("message/stream"),
        // Compatible as-is — passed through with direct validation.
        "tasks/cancel" => Ok("tasks/cancel"),
        other => Err(A2AError::Translation(format!(
            "unsupported legacy method: {other}"
        ))),
    }
}

/// Rewrites a single part for the inbound direction: legacy `type` -> modern
/// `kind`, legacy `mimeType` -> modern `mime_type`.
fn rewrite_part_inbound(part: &mut Value) {
    if let Value::Object(obj) = part {
        if let Some(t) = obj.remove("type") {
            obj.insert("kind".to_string(), t);
        }
        rewrite_mime_type_inbound(obj);
    }
}

fn rewrite_mime_type_inbound(obj: &mut Map<String, Value>) {
    if let Some(mt) = obj.remove("mimeType") {
        obj.insert("mime_type".to_string(), mt);
    }
    if let Some(Value::Object(file)) = obj.get_mut("file") {
        if let Some(mt) = file.remove("mimeType") {
            file.insert("mime_type".to_string(), mt);
        }
    }
}

/// Translates a legacy `tasks/send` / `tasks/sendSubscribe` envelope into a
/// modern JSON-RPC request, preserving the envelope `id`.
///
/// `is_new_task` controls whether `message.taskId` is copied from the legacy
/// params or left `null` — a legacy request is treated as the first
/// submission for a task unless the caller already knows its id.
pub fn translate_inbound_send(
    envelope_id: Value,
    legacy_method: &str,
    mut legacy_params: Value,
    existing_task_id: Option<&str>,
) -> A2AResult<Value> {
    let modern_method = modern_method_for(legacy_method)?;
    if modern_method != "message/send" && modern_method != "message/stream" {
        return Err(A2AError::Translation(format!(
            "{legacy_method} is not a send-family method"
        )));
    }

    let obj = legacy_params
        .as_object_mut()
        .ok_or_else(|| A2AError::Translation("legacy params must be an object".to_string()))?;

    let mut message = obj
        .remove("message")
        .ok_or_else(|| A2AError::Translation("legacy params missing 'message'".to_string()))?;

    let message_obj = message
        .as_object_mut()
        .ok_or_else(|| A2AError::Translation("legacy message must be an object".to_string()))?;

    // Fresh messageId — the legacy dialect does not require the client to
    // supply one.
    message_obj.insert(
        "messageId".to_string(),
        Value::String(Uuid::new_v4().to_string()),
    );

    if let Some(session_id) = message_obj.remove("sessionId") {
        message_obj.insert("contextId".to_string(), session_id);
    } else if let Some(session_id) = obj.remove("sessionId") {
        message_obj.insert("contextId".to_string(), session_id);
    }

    message_obj.insert(
        "taskId".to_string(),
        existing_task_id
            .map(|id| Value::String(id.to_string()))
            .unwrap_or(Value::Null),
    );

    if let Some(Value::Array(parts)) = message_obj.get_mut("parts") {
        for part in parts.iter_mut() {
            rewrite_part_inbound(part);
        }
    }

    let mut configuration = Map::new();
    if let Some(push) = obj.remove("pushNotification") {
        configuration.insert("pushNotificationConfig".to_string(), push);
    }
    if let Some(history_length) = obj.remove("historyLength") {
        configuration.insert("historyLength".to_string(), history_length);
    }
    // Legacy semantics: always blocking.
    configuration.insert("blocking".to_string(), Value::Bool(true));

    let mut modern_params = Map::new();
    modern_params.insert("message".to_string(), message);
    modern_params.insert("configuration".to_string(), Value::Object(configuration));
    if let Some(metadata) = obj.remove("metadata") {
        modern_params.insert("metadata".to_string(), metadata);
    }

    Ok(json!({
        "jsonrpc": "2.0",
        "id": envelope_id,
        "method": modern_method,
        "params": Value::Object(modern_params),
    }))
}

/// Validates and passes through a `tasks/cancel` request — the method is
/// compatible across both dialects, so only structural validation happens
/// here.
pub fn translate_inbound_cancel(envelope_id: Value, params: Value) -> A2AResult<Value> {
    let id = params
        .as_object()
        .and_then(|o| o.get("id"))
        .and_then(|v| v.as_str());
    if id.is_none() {
        return Err(A2AError::Translation(
            "tasks/cancel params missing 'id'".to_string(),
        ));
    }
    Ok(json!({
        "jsonrpc": "2.0",
        "id": envelope_id,
        "method": "tasks/cancel",
        "params": params,
    }))
}

/// Recursively rewrites one part object for the outbound (modern -> legacy)
/// direction: `kind` -> `type`, `mime_type` -> `mimeType`.
fn rewrite_part_outbound(part: &mut Value) {
    if let Value::Object(obj) = part {
        if let Some(k) = obj.remove("kind") {
            obj.insert("type".to_string(), k);
        }
        if let Some(mt) = obj.remove("mime_type") {
            obj.insert("mimeType".to_string(), mt);
        }
        if let Some(Value::Object(file)) = obj.get_mut("file") {
            if let Some(mt) = file.remove("mime_type") {
                file.insert("mimeType".to_string(), mt);
            }
        }
    }
}

fn rewrite_parts_in_message(message: &mut Value) {
    if let Value::Object(obj) = message {
        if let Some(Value::Array(parts)) = obj.get_mut("parts") {
            for part in parts.iter_mut() {
                rewrite_part_outbound(part);
            }
        }
    }
}

/// Translates a modern `Task` snapshot into its legacy wire shape: renames
/// `context_id`/`contextId` to `sessionId` and rewrites parts in
/// `status.message` and every history message.
pub fn translate_outbound_task(mut task: Value) -> A2AResult<Value> {
    let obj = task
        .as_object_mut()
        .ok_or_else(|| A2AError::Translation("task must be an object".to_string()))?;

    if let Some(context_id) = obj.remove("contextId").or_else(|| obj.remove("context_id")) {
        obj.insert("sessionId".to_string(), context_id);
    }

    if let Some(Value::Object(status)) = obj.get_mut("status") {
        if let Some(message) = status.get_mut("message") {
            rewrite_parts_in_message(message);
        }
    }

    if let Some(Value::Array(history)) = obj.get_mut("history") {
        for message in history.iter_mut() {
            rewrite_parts_in_message(message);
        }
    }

    Ok(task)
}

/// Translates a modern `TaskStatusUpdateEvent` to legacy shape: `task_id`/
/// `taskId` -> `id`, drops `context_id`/`contextId`, rewrites
/// `status.message.parts`.
pub fn translate_outbound_status_update(mut event: Value) -> A2AResult<Value> {
    let obj = event
        .as_object_mut()
        .ok_or_else(|| A2AError::Translation("status event must be an object".to_string()))?;

    if let Some(task_id) = obj.remove("taskId").or_else(|| obj.remove("task_id")) {
        obj.insert("id".to_string(), task_id);
    }
    obj.remove("contextId");
    obj.remove("context_id");

    if let Some(Value::Object(status)) = obj.get_mut("status") {
        if let Some(message) = status.get_mut("message") {
            rewrite_parts_in_message(message);
        }
    }

    Ok(event)
}

/// Translates a modern `TaskArtifactUpdateEvent` to legacy shape: `task_id`/
/// `taskId` -> `id`, drops the context id, rewrites parts inside the
/// artifact.
pub fn translate_outbound_artifact_update(mut event: Value) -> A2AResult<Value> {
    let obj = event
        .as_object_mut()
        .ok_or_else(|| A2AError::Translation("artifact event must be an object".to_string()))?;

    if let Some(task_id) = obj.remove("taskId").or_else(|| obj.remove("task_id")) {
        obj.insert("id".to_string(), task_id);
    }
    obj.remove("contextId");
    obj.remove("context_id");

    if let Some(Value::Object(artifact)) = obj.get_mut("artifact") {
        if let Some(Value::Array(parts)) = artifact.get_mut("parts") {
            for part in parts.iter_mut() {
                rewrite_part_outbound(part);
            }
        }
    }

    Ok(event)
}

/// Translates a modern AgentCard to the legacy dialect: copies `name` into
/// `display_name` (legacy carries both), copies capability flags across
/// field-by-field under their legacy names (each defaulting to `false` when
/// absent upstream), and drops fields with no legacy equivalent
/// (`security_schemes`, `protocol_version`). Skills and provider are
/// field-compatible and carried verbatim.
pub fn translate_outbound_card(mut card: Value) -> A2AResult<Value> {
    let obj = card
        .as_object_mut()
        .ok_or_else(|| A2AError::Translation("agent card must be an object".to_string()))?;

    if let Some(name) = obj.get("name").cloned() {
        obj.insert("display_name".to_string(), name);
    }

    if let Some(Value::Object(capabilities)) = obj.get_mut("capabilities") {
        let streaming = capabilities.get("streaming").cloned().unwrap_or(json!(false));
        let push_notifications = capabilities.remove("pushNotifications").unwrap_or(json!(false));
        let state_transition_history =
            capabilities.remove("stateTransitionHistory").unwrap_or(json!(false));
        capabilities.insert("streaming".to_string(), streaming);
        capabilities.insert("pushNotifications".to_string(), push_notifications);
        capabilities.insert("stateTransitionHistory".to_string(), state_transition_history);
    }

    obj.remove("securitySchemes");
    obj.remove("protocolVersion");

    Ok(card)
}

/// Dispatches an outbound event by its `kind` discriminator. Unknown kinds
/// are passed through unchanged with a warning.
pub fn translate_outbound_event(kind: &str, event: Value) -> A2AResult<Value> {
    match kind {
        "task" => translate_outbound_task(event),
        "status-update" => translate_outbound_status_update(event),
        "artifact-update" => translate_outbound_artifact_update(event),
        other => {
            warn!(kind = %other, "unknown outbound event kind passed through untranslated");
            Ok(event)
        }
    }
}
