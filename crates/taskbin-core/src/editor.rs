//! Create, edit and delete as pure transforms of a whole collection.
//!
//! Nothing here consults the access gate. Writability is checked by the
//! caller that exposes these operations (see [`crate::board::Board`]); the
//! functions themselves trust whoever invokes them.

use chrono::NaiveDate;
use thiserror::Error;
use tracing::{debug, warn};

use crate::task::{DATE_FORMAT, Deploy, Project, Status, TaskKey, TaskRecord};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("{0} is required")]
    Required(&'static str),

    #[error("deadline must be a YYYY-MM-DD date, got {0:?}")]
    MalformedDeadline(String),

    #[error("{field} must be one of {allowed}, got {value:?}")]
    UnknownOption {
        field: &'static str,
        value: String,
        allowed: String,
    },
}

impl FieldError {
    pub fn field(&self) -> &'static str {
        match self {
            Self::Required(field) => field,
            Self::MalformedDeadline(_) => "deadline",
            Self::UnknownOption { field, .. } => field,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid task: {}", describe(.fields))]
pub struct ValidationError {
    pub fields: Vec<FieldError>,
}

fn describe(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Raw form input. `None` means the field was left empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskForm {
    pub name: Option<String>,
    pub description: Option<String>,
    pub project: Option<String>,
    pub deploy: Option<String>,
    pub deadline: Option<String>,
    pub status: Option<String>,
    pub note: Option<String>,
}

impl TaskForm {
    /// Blank create form; status starts at "not started".
    pub fn blank() -> Self {
        Self {
            status: Some(Status::default().as_str().to_string()),
            ..Self::default()
        }
    }

    /// Edit form prefilled from an existing record.
    pub fn from_record(record: &TaskRecord) -> Self {
        Self {
            name: Some(record.name.clone()),
            description: Some(record.description.clone()),
            project: record.project.as_ref().map(ToString::to_string),
            deploy: record.deploy.as_ref().map(ToString::to_string),
            deadline: record
                .deadline_date()
                .map(|date| date.format(DATE_FORMAT).to_string())
                .or_else(|| record.deadline.clone()),
            status: record.status.as_ref().map(ToString::to_string),
            note: record.note.clone(),
        }
    }

    /// Overwrites every field that `changes` supplies.
    pub fn merge(self, changes: TaskForm) -> Self {
        Self {
            name: changes.name.or(self.name),
            description: changes.description.or(self.description),
            project: changes.project.or(self.project),
            deploy: changes.deploy.or(self.deploy),
            deadline: changes.deadline.or(self.deadline),
            status: changes.status.or(self.status),
            note: changes.note.or(self.note),
        }
    }

    pub fn validate(&self) -> Result<TaskDraft, ValidationError> {
        let mut errors = Vec::new();

        let name = required(&self.name, "name", &mut errors);
        let description = required(&self.description, "description", &mut errors);
        let project = required(&self.project, "project", &mut errors)
            .and_then(|value| known_option::<Project>(value, "project", Project::KNOWN, &mut errors));
        let deploy = required(&self.deploy, "deploy", &mut errors)
            .and_then(|value| known_option::<Deploy>(value, "deploy", Deploy::KNOWN, &mut errors));
        let deadline = required(&self.deadline, "deadline", &mut errors).and_then(|value| {
            match NaiveDate::parse_from_str(value.trim(), DATE_FORMAT) {
                Ok(date) => Some(date),
                Err(_) => {
                    errors.push(FieldError::MalformedDeadline(value));
                    None
                }
            }
        });
        let status = required(&self.status, "status", &mut errors).and_then(|value| {
            Status::from_choice(&value).or_else(|| {
                errors.push(FieldError::UnknownOption {
                    field: "status",
                    value,
                    allowed: Status::KNOWN.join(", "),
                });
                None
            })
        });
        let note = self
            .note
            .as_deref()
            .map(str::trim)
            .filter(|note| !note.is_empty())
            .map(str::to_string);

        match (name, description, project, deploy, deadline, status) {
            (Some(name), Some(description), Some(project), Some(deploy), Some(deadline), Some(status))
                if errors.is_empty() =>
            {
                Ok(TaskDraft {
                    name,
                    description,
                    project,
                    deploy,
                    deadline,
                    status,
                    note,
                })
            }
            _ => Err(ValidationError { fields: errors }),
        }
    }
}

fn required(value: &Option<String>, field: &'static str, errors: &mut Vec<FieldError>) -> Option<String> {
    match value.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => Some(text.to_string()),
        _ => {
            errors.push(FieldError::Required(field));
            None
        }
    }
}

fn known_option<T>(
    value: String,
    field: &'static str,
    allowed: &[&str],
    errors: &mut Vec<FieldError>,
) -> Option<T>
where
    T: From<String>,
{
    if allowed.contains(&value.as_str()) {
        Some(T::from(value))
    } else {
        errors.push(FieldError::UnknownOption {
            field,
            value,
            allowed: allowed.join(", "),
        });
        None
    }
}

/// A validated form, ready to become a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDraft {
    pub name: String,
    pub description: String,
    pub project: Project,
    pub deploy: Deploy,
    pub deadline: NaiveDate,
    pub status: Status,
    pub note: Option<String>,
}

impl TaskDraft {
    fn into_record(self, key: TaskKey, previous: Option<&TaskRecord>) -> TaskRecord {
        TaskRecord {
            key,
            name: self.name,
            description: self.description,
            project: Some(self.project),
            deploy: Some(self.deploy),
            deadline: Some(self.deadline.format(DATE_FORMAT).to_string()),
            status: Some(self.status),
            note: self.note,
            extra: previous.map(|record| record.extra.clone()).unwrap_or_default(),
        }
    }
}

/// Result of a local transform: the next full collection to commit.
#[derive(Debug, Clone, PartialEq)]
pub struct Edit {
    pub collection: Vec<TaskRecord>,
    pub key: TaskKey,
    /// False when the target key was absent and nothing changed.
    pub target_found: bool,
}

/// Appends a new record under a freshly generated key.
pub fn create(collection: &[TaskRecord], draft: TaskDraft) -> Edit {
    let key = loop {
        let candidate = TaskKey::generate();
        if !collection.iter().any(|record| record.key == candidate) {
            break candidate;
        }
    };

    let mut next = collection.to_vec();
    next.push(draft.into_record(key.clone(), None));
    debug!(key = %key, count = next.len(), "created task locally");

    Edit {
        collection: next,
        key,
        target_found: true,
    }
}

/// Replaces the record with `key` in place, keeping order and every other
/// record. An absent key leaves the collection as it was.
pub fn update(collection: &[TaskRecord], key: &TaskKey, draft: TaskDraft) -> Edit {
    let Some(idx) = collection.iter().position(|record| &record.key == key) else {
        warn!(key = %key, "update target missing from collection; nothing changed");
        return Edit {
            collection: collection.to_vec(),
            key: key.clone(),
            target_found: false,
        };
    };

    let mut next = collection.to_vec();
    next[idx] = draft.into_record(key.clone(), collection.get(idx));
    debug!(key = %key, position = idx, "updated task locally");

    Edit {
        collection: next,
        key: key.clone(),
        target_found: true,
    }
}

/// Drops the record with `key`. An absent key leaves the collection as it was.
pub fn remove(collection: &[TaskRecord], key: &TaskKey) -> Edit {
    let next: Vec<TaskRecord> = collection
        .iter()
        .filter(|record| &record.key != key)
        .cloned()
        .collect();
    let target_found = next.len() != collection.len();
    if !target_found {
        warn!(key = %key, "remove target missing from collection; nothing changed");
    }

    Edit {
        collection: next,
        key: key.clone(),
        target_found,
    }
}

/// First phase of a deletion. Only [`DeleteRequest::confirm`] removes
/// anything; dropping or cancelling the request leaves the collection alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequest {
    key: TaskKey,
    name: String,
}

impl DeleteRequest {
    pub fn new(record: &TaskRecord) -> Self {
        Self {
            key: record.key.clone(),
            name: record.name.clone(),
        }
    }

    pub fn key(&self) -> &TaskKey {
        &self.key
    }

    pub fn prompt(&self) -> String {
        format!("Delete task \"{}\"?", self.name)
    }

    pub fn confirm(self, collection: &[TaskRecord]) -> Edit {
        remove(collection, &self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(name: &str, status: &str) -> TaskForm {
        TaskForm {
            name: Some(name.to_string()),
            description: Some("desc".to_string()),
            project: Some("OM".to_string()),
            deploy: Some("Dev".to_string()),
            deadline: Some("2024-01-01".to_string()),
            status: Some(status.to_string()),
            note: None,
        }
    }

    #[test]
    fn blank_form_reports_every_required_field() {
        let err = TaskForm::default().validate().unwrap_err();
        let fields: Vec<&str> = err.fields.iter().map(FieldError::field).collect();
        assert_eq!(
            fields,
            vec!["name", "description", "project", "deploy", "deadline", "status"]
        );
    }

    #[test]
    fn blank_form_defaults_to_not_started() {
        assert_eq!(TaskForm::blank().status.as_deref(), Some("not started"));
    }

    #[test]
    fn malformed_values_are_field_errors() {
        let mut bad = form("A", "pending");
        bad.deadline = Some("01/02/2024".to_string());
        bad.project = Some("Billing".to_string());
        let err = bad.validate().unwrap_err();
        assert!(err.fields.contains(&FieldError::MalformedDeadline("01/02/2024".to_string())));
        assert!(err.fields.iter().any(|f| f.field() == "project"));
        assert_eq!(err.fields.len(), 2);
    }

    #[test]
    fn status_accepts_label_or_value() {
        assert_eq!(form("A", "In Progress").validate().unwrap().status, Status::InProgress);
        assert_eq!(form("A", "in progress").validate().unwrap().status, Status::InProgress);
        assert!(form("A", "IN PROGRESS").validate().is_err());
    }

    #[test]
    fn whitespace_note_is_dropped() {
        let mut with_note = form("A", "pending");
        with_note.note = Some("   ".to_string());
        assert_eq!(with_note.validate().unwrap().note, None);
    }

    #[test]
    fn create_assigns_fresh_key_and_appends() {
        let first = create(&[], form("A", "pending").validate().unwrap());
        let second = create(&first.collection, form("B", "pending").validate().unwrap());

        assert_eq!(second.collection.len(), 2);
        assert_eq!(second.collection[0].name, "A");
        assert_eq!(second.collection[1].name, "B");
        assert_ne!(first.key, second.key);
        assert_eq!(second.collection[1].deadline.as_deref(), Some("2024-01-01"));
    }

    #[test]
    fn update_replaces_in_place() {
        let a = create(&[], form("A", "pending").validate().unwrap());
        let b = create(&a.collection, form("B", "pending").validate().unwrap());
        let c = create(&b.collection, form("C", "pending").validate().unwrap());

        let edited = update(&c.collection, &b.key, form("B2", "completed").validate().unwrap());
        assert!(edited.target_found);
        let names: Vec<&str> = edited.collection.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B2", "C"]);
        assert_eq!(edited.collection[1].key, b.key);
        assert_eq!(edited.collection[1].status, Some(Status::Completed));
    }

    #[test]
    fn update_keeps_unknown_fields_of_the_record() {
        let mut record: TaskRecord = serde_json::from_value(serde_json::json!({
            "key": "k1", "name": "A", "description": "d", "owner": "ops"
        }))
        .unwrap();
        record.status = Some(Status::Pending);

        let edited = update(&[record], &TaskKey::from("k1"), form("A", "pending").validate().unwrap());
        assert_eq!(edited.collection[0].extra.get("owner"), Some(&serde_json::json!("ops")));
    }

    #[test]
    fn update_of_missing_key_is_flagged_no_op() {
        let a = create(&[], form("A", "pending").validate().unwrap());
        let edited = update(
            &a.collection,
            &TaskKey::from("ghost"),
            form("X", "pending").validate().unwrap(),
        );
        assert!(!edited.target_found);
        assert_eq!(edited.collection, a.collection);
    }

    #[test]
    fn remove_of_missing_key_is_flagged_no_op() {
        let a = create(&[], form("A", "pending").validate().unwrap());
        let removed = remove(&a.collection, &TaskKey::from("ghost"));
        assert!(!removed.target_found);
        assert_eq!(removed.collection.len(), 1);
    }

    #[test]
    fn create_update_remove_same_key_ends_empty() {
        let created = create(&[], form("A", "pending").validate().unwrap());
        let updated = update(&created.collection, &created.key, form("A2", "completed").validate().unwrap());
        let removed = remove(&updated.collection, &created.key);
        assert!(removed.collection.is_empty());
    }

    #[test]
    fn removing_another_key_keeps_the_rest() {
        let a = create(&[], form("A", "pending").validate().unwrap());
        let b = create(&a.collection, form("B", "pending").validate().unwrap());
        let updated = update(&b.collection, &a.key, form("A2", "pending").validate().unwrap());
        let removed = remove(&updated.collection, &b.key);
        assert_eq!(removed.collection.len(), 1);
        assert!(removed.collection.iter().all(|r| r.key != b.key));
    }

    #[test]
    fn editor_functions_do_not_consult_access_state() {
        // No gate exists anywhere in this test; the transforms still run.
        let created = create(&[], form("A", "pending").validate().unwrap());
        assert_eq!(created.collection.len(), 1);
        assert!(remove(&created.collection, &created.key).collection.is_empty());
    }

    #[test]
    fn prefilled_form_merges_changes() {
        let created = create(&[], form("A", "pending").validate().unwrap());
        let record = &created.collection[0];
        let merged = TaskForm::from_record(record).merge(TaskForm {
            status: Some("completed".to_string()),
            ..TaskForm::default()
        });
        assert_eq!(merged.name.as_deref(), Some("A"));
        assert_eq!(merged.status.as_deref(), Some("completed"));
        assert_eq!(merged.deadline.as_deref(), Some("2024-01-01"));
    }

    #[test]
    fn delete_request_confirms_or_does_nothing() {
        let created = create(&[], form("Ship it", "pending").validate().unwrap());
        let request = DeleteRequest::new(&created.collection[0]);
        assert_eq!(request.prompt(), "Delete task \"Ship it\"?");

        let cancelled = request.clone();
        drop(cancelled);
        assert_eq!(created.collection.len(), 1);

        let confirmed = request.confirm(&created.collection);
        assert!(confirmed.target_found);
        assert!(confirmed.collection.is_empty());
    }
}
