//! Message Assembler — client-side accumulation of a streamed response into
//! one coherent result.
//!
//! A client consuming [`crate::types::StreamResponse`] events off an SSE
//! stream (see [`crate::client::sse`]) needs somewhere to fold them into a
//! single answer: concatenated text, the artifacts produced along the way,
//! and a final success/failure verdict. [`MessageAssembler`] is that fold,
//! kept as plain synchronous state so it can sit behind either the async
//! client or a TUI.

use std::collections::HashMap;

use crate::types::{Artifact, JsonRpcError, StreamResponse, TaskState};
use crate::utils::parts::get_text_parts;

/// Final, fully-assembled result of one task's stream.
#[derive(Debug, Clone, Default)]
pub struct AssembledResponse {
    pub task_id: Option<String>,
    pub context_id: Option<String>,
    pub text: String,
    pub artifacts: Vec<Artifact>,
    pub complete: bool,
    pub errored: bool,
    pub error_message: Option<String>,
}

/// Accumulates a stream of [`StreamResponse`] events into an
/// [`AssembledResponse`].
///
/// Artifacts are merged by name: a later `artifact-update` event naming the
/// same artifact replaces the parts/metadata held for that name rather than
/// appending a duplicate entry, so an agent that streams an artifact in
/// pieces (`append: true`) still ends up as one artifact in the assembled
/// result. An artifact-update whose artifact has no `name` is kept under a
/// key derived from its `artifactId` instead of being dropped — every
/// artifact the backend sends, named or not, must show up in the final
/// result.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    response: AssembledResponse,
    artifacts_by_key: HashMap<String, usize>,
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one event from the stream into the assembler.
    pub fn push(&mut self, event: StreamResponse) {
        match event {
            StreamResponse::Task(task) => self.apply_task(task),
            StreamResponse::Message(message) => self.apply_message(message),
            StreamResponse::StatusUpdate(update) => self.apply_status_update(update),
            StreamResponse::ArtifactUpdate(update) => self.apply_artifact_update(update),
        }
    }

    /// Marks the assembly as failed from a JSON-RPC error object — used when
    /// the stream itself surfaces an `error` member instead of a `result`.
    pub fn push_error(&mut self, error: &JsonRpcError) {
        self.response.errored = true;
        self.response.complete = true;
        self.response.error_message = Some(error.message.clone());
    }

    /// Consumes the assembler, returning the final assembled response.
    pub fn finish(self) -> AssembledResponse {
        self.response
    }

    /// Current assembled state without consuming the assembler, for callers
    /// that want to render partial progress as it streams in.
    pub fn snapshot(&self) -> AssembledResponse {
        self.response.clone()
    }

    fn apply_task(&mut self, task: crate::types::Task) {
        self.response.task_id = Some(task.id.clone());
        self.response.context_id = Some(task.context_id.clone());

        if let Some(message) = &task.status.message {
            self.append_text(&get_text_parts(&message.parts).join(""));
        }
        if let Some(artifacts) = task.artifacts {
            for artifact in artifacts {
                self.merge_artifact(artifact, false);
            }
        }

        if matches!(task.status.state, TaskState::Completed | TaskState::Canceled) {
            self.response.complete = true;
        } else if task.status.state == TaskState::Failed {
            self.response.complete = true;
            self.response.errored = true;
            if let Some(message) = &task.status.message {
                let text = get_text_parts(&message.parts).join("");
                if !text.is_empty() {
                    self.response.error_message = Some(text);
                }
            }
        }
    }

    fn apply_message(&mut self, message: crate::types::Message) {
        if self.response.task_id.is_none() {
            self.response.task_id = message.task_id.clone();
        }
        if self.response.context_id.is_none() {
            self.response.context_id = message.context_id.clone();
        }
        self.append_text(&get_text_parts(&message.parts).join(""));
        // A bare Message with no further events is itself the terminal
        // response — the gateway/proxy synthesize a completed Task around
        // it when relaying downstream, but a direct client sees only
        // the Message and must treat it as done.
        self.response.complete = true;
    }

    fn apply_status_update(&mut self, update: crate::types::TaskStatusUpdateEvent) {
        self.response.task_id = Some(update.task_id.clone());
        self.response.context_id = Some(update.context_id.clone());

        if let Some(message) = &update.status.message {
            self.append_text(&get_text_parts(&message.parts).join(""));
        }

        if update.status.state == TaskState::Failed {
            self.response.errored = true;
            if let Some(message) = &update.status.message {
                let text = get_text_parts(&message.parts).join("");
                if !text.is_empty() {
                    self.response.error_message = Some(text);
                }
            }
        }

        if update.r#final {
            self.response.complete = true;
        }
    }

    fn apply_artifact_update(&mut self, update: crate::types::TaskArtifactUpdateEvent) {
        self.response.task_id = Some(update.task_id.clone());
        self.response.context_id = Some(update.context_id.clone());
        self.merge_artifact(update.artifact, update.append.unwrap_or(false));
    }

    fn append_text(&mut self, text: &str) {
        if !text.is_empty() {
            self.response.text.push_str(text);
        }
    }

    fn artifact_key(artifact: &Artifact) -> String {
        artifact
            .name
            .clone()
            .unwrap_or_else(|| format!("id:{}", artifact.artifact_id))
    }

    fn merge_artifact(&mut self, artifact: Artifact, append: bool) {
        let key = Self::artifact_key(&artifact);
        if let Some(&index) = self.artifacts_by_key.get(&key) {
            let existing = &mut self.response.artifacts[index];
            if append {
                existing.parts.extend(artifact.parts);
            } else {
                existing.parts = artifact.parts;
            }
            existing.description = artifact.description.or(existing.description.take());
            existing.metadata = artifact.metadata.or(existing.metadata.take());
        } else {
            let index = self.response.artifacts.len();
            self.artifacts_by_key.insert(key, index);
            self.response.artifacts.push(artifact);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FileContent, FileWithUri, Part, Role, Task, TaskStatus};
    use crate::utils::message::new_agent_text_message;

    fn status_update(task_id: &str, text: &str, is_final: bool) -> StreamResponse {
        StreamResponse::StatusUpdate(crate::types::TaskStatusUpdateEvent {
            task_id: task_id.to_string(),
            context_id: "ctx-1".to_string(),
            kind: "status-update".to_string(),
            status: TaskStatus {
                state: TaskState::Working,
                message: Some(new_agent_text_message(text, Some("ctx-1".into()), Some(task_id.into()))),
                timestamp: None,
            },
            r#final: is_final,
            metadata: None,
        })
    }

    fn artifact_update(task_id: &str, name: Option<&str>, text: &str, append: bool) -> StreamResponse {
        StreamResponse::ArtifactUpdate(crate::types::TaskArtifactUpdateEvent {
            task_id: task_id.to_string(),
            context_id: "ctx-1".to_string(),
            kind: "artifact-update".to_string(),
            artifact: Artifact {
                artifact_id: "art-1".to_string(),
                name: name.map(|n| n.to_string()),
                description: None,
                parts: vec![Part::Text {
                    text: text.to_string(),
                    metadata: None,
                }],
                metadata: None,
                extensions: None,
            },
            append: Some(append),
            last_chunk: None,
            metadata: None,
        })
    }

    #[test]
    fn accumulates_text_across_status_updates_and_marks_final() {
        let mut assembler = MessageAssembler::new();
        assembler.push(status_update("t1", "Hello, ", false));
        assembler.push(status_update("t1", "world!", true));
        let result = assembler.finish();
        assert_eq!(result.text, "Hello, world!");
        assert!(result.complete);
        assert!(!result.errored);
        assert_eq!(result.task_id.as_deref(), Some("t1"));
    }

    #[test]
    fn merges_artifact_updates_by_name_with_append() {
        let mut assembler = MessageAssembler::new();
        assembler.push(artifact_update("t1", Some("report.md"), "# Report\n", false));
        assembler.push(artifact_update("t1", Some("report.md"), "more content", true));
        let result = assembler.finish();
        assert_eq!(result.artifacts.len(), 1);
        let parts = &result.artifacts[0].parts;
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn nameless_artifact_updates_are_kept_under_their_artifact_id() {
        let mut assembler = MessageAssembler::new();
        assembler.push(artifact_update("t1", None, "unnamed content", false));
        let result = assembler.finish();
        assert_eq!(result.artifacts.len(), 1);
        assert!(result.artifacts[0].name.is_none());
    }

    #[test]
    fn terminal_task_with_failed_state_captures_error_text() {
        let mut assembler = MessageAssembler::new();
        let task = Task {
            id: "t1".to_string(),
            context_id: "ctx-1".to_string(),
            kind: "task".to_string(),
            status: TaskStatus {
                state: TaskState::Failed,
                message: Some(new_agent_text_message(
                    "backend exploded",
                    Some("ctx-1".into()),
                    Some("t1".into()),
                )),
                timestamp: None,
            },
            artifacts: None,
            history: None,
            metadata: None,
        };
        assembler.push(StreamResponse::Task(task));
        let result = assembler.finish();
        assert!(result.complete);
        assert!(result.errored);
        assert_eq!(result.error_message.as_deref(), Some("backend exploded"));
    }

    #[test]
    fn rpc_error_object_marks_errored_and_complete() {
        let mut assembler = MessageAssembler::new();
        assembler.push_error(&JsonRpcError {
            code: -32000,
            message: "downstream timeout".to_string(),
            data: None,
        });
        let result = assembler.finish();
        assert!(result.errored);
        assert!(result.complete);
        assert_eq!(result.error_message.as_deref(), Some("downstream timeout"));
    }

    #[test]
    fn bare_message_event_is_treated_as_terminal() {
        let mut assembler = MessageAssembler::new();
        let message = crate::types::Message {
            message_id: "m1".to_string(),
            role: Role::Agent,
            kind: "message".to_string(),
            parts: vec![Part::Text {
                text: "just an answer".to_string(),
                metadata: None,
            }],
            context_id: Some("ctx-1".to_string()),
            task_id: None,
            metadata: None,
            extensions: None,
            reference_task_ids: None,
        };
        assembler.push(StreamResponse::Message(message));
        let result = assembler.finish();
        assert!(result.complete);
        assert_eq!(result.text, "just an answer");
    }

    #[test]
    fn file_parts_do_not_contribute_to_assembled_text() {
        let mut assembler = MessageAssembler::new();
        assembler.push(artifact_update("t1", Some("report.md"), "text body", false));
        let mut response = assembler.snapshot();
        response.artifacts[0].parts.push(Part::File {
            file: FileContent::Uri(FileWithUri {
                uri: "artifact://app/user/session/report.md?version=1".to_string(),
                mime_type: Some("text/markdown".to_string()),
                name: Some("report.md".to_string()),
            }),
            metadata: None,
        });
        assert_eq!(response.text, "");
    }
}
