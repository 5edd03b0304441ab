use crate::registry::{SnippetId, Status};
use kulla_engine::ExceptionInfo;

/// One status change reported by `eval` or `drop`.
#[derive(Debug, Clone, PartialEq)]
pub struct SnippetEvent {
    pub snippet: SnippetId,
    pub previous_status: Status,
    pub status: Status,
    pub is_signature_change: bool,
    /// Submitted or dropped snippet that caused this change; `None` on the
    /// event of that snippet itself.
    pub cause_snippet: Option<SnippetId>,
    /// Rendered value of a variable or expression.
    pub value: Option<String>,
    pub exception: Option<ExceptionInfo>,
}

impl SnippetEvent {
    pub(crate) fn new(snippet: SnippetId, previous_status: Status, status: Status) -> Self {
        Self {
            snippet,
            previous_status,
            status,
            is_signature_change: false,
            cause_snippet: None,
            value: None,
            exception: None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.cause_snippet.is_none()
    }
}

/// Events of one unit in delivery order: the root, the snippet it
/// overwrote, then cascaded updates by creation sequence.
#[derive(Debug, Default)]
pub(crate) struct EventBatch {
    root: Option<SnippetEvent>,
    overwritten: Vec<SnippetEvent>,
    cascade: Vec<(usize, SnippetEvent)>,
}

impl EventBatch {
    pub(crate) fn root(&mut self, event: SnippetEvent) {
        self.root = Some(event);
    }

    pub(crate) fn overwritten(&mut self, event: SnippetEvent) {
        self.overwritten.push(event);
    }

    pub(crate) fn cascaded(&mut self, seq: usize, event: SnippetEvent) {
        self.cascade.push((seq, event));
    }

    pub(crate) fn finish(mut self) -> Vec<SnippetEvent> {
        let cause = self.root.as_ref().map(|e| e.snippet.clone());
        self.cascade.sort_by_key(|(seq, _)| *seq);
        let mut out: Vec<SnippetEvent> = self.root.into_iter().collect();
        out.extend(
            self.overwritten
                .into_iter()
                .chain(self.cascade.into_iter().map(|(_, e)| e))
                .map(|mut e| {
                    e.cause_snippet = cause.clone();
                    e
                }),
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::{EventBatch, SnippetEvent};
    use crate::registry::{SnippetId, Status};

    fn event(id: &str, from: Status, to: Status) -> SnippetEvent {
        SnippetEvent::new(SnippetId::new(id), from, to)
    }

    #[test]
    fn root_then_overwritten_then_cascade_by_sequence() {
        let mut batch = EventBatch::default();
        batch.cascaded(7, event("7", Status::Valid, Status::RecoverableDefined));
        batch.cascaded(2, event("2", Status::Valid, Status::RecoverableNotDefined));
        batch.overwritten(event("1", Status::Valid, Status::Overwritten));
        batch.root(event("9", Status::Valid, Status::Valid));
        let events = batch.finish();
        let ids: Vec<&str> = events.iter().map(|e| e.snippet.as_str()).collect();
        assert_eq!(ids, ["9", "1", "2", "7"]);
        assert!(events[0].is_root());
        assert!(
            events[1..]
                .iter()
                .all(|e| e.cause_snippet.as_ref().map(SnippetId::as_str) == Some("9"))
        );
    }

    #[test]
    fn sequence_not_id_text_decides_order() {
        let mut batch = EventBatch::default();
        batch.cascaded(10, event("10", Status::Valid, Status::RecoverableDefined));
        batch.cascaded(3, event("s3", Status::Valid, Status::RecoverableDefined));
        batch.root(event("11", Status::Valid, Status::Dropped));
        let ids: Vec<String> = batch.finish().into_iter().map(|e| e.snippet.to_string()).collect();
        assert_eq!(ids, ["11", "s3", "10"]);
    }
}
