use std::collections::BTreeSet;
use std::num::NonZeroUsize;

use chrono::NaiveDate;
use tracing::trace;

use crate::task::{Deploy, Project, Status};

pub const DEFAULT_PAGE_SIZE: NonZeroUsize = NonZeroUsize::MIN.saturating_add(9);

pub const PAGE_SIZE_PRESETS: [usize; 4] = [5, 10, 20, 50];

/// The filter, pagination and search state that decides which records are
/// visible. Only the first five fields travel in the address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Criteria {
    pub search_text: String,
    pub statuses: BTreeSet<Status>,
    pub project: Option<Project>,
    pub deploy: Option<Deploy>,
    pub deadline: Option<NaiveDate>,
    pub page_size: NonZeroUsize,
    pub page_index: NonZeroUsize,
}

impl Default for Criteria {
    fn default() -> Self {
        Self {
            search_text: String::new(),
            statuses: BTreeSet::new(),
            project: None,
            deploy: None,
            deadline: None,
            page_size: DEFAULT_PAGE_SIZE,
            page_index: NonZeroUsize::MIN,
        }
    }
}

impl Criteria {
    /// Copies the address-carried fields from `other`, keeping this value's
    /// page size and page index.
    pub fn with_address_fields_of(&self, other: &Criteria) -> Criteria {
        Criteria {
            search_text: other.search_text.clone(),
            statuses: other.statuses.clone(),
            project: other.project.clone(),
            deploy: other.deploy.clone(),
            deadline: other.deadline,
            page_size: self.page_size,
            page_index: self.page_index,
        }
    }
}

/// Holds the current criteria. Every setter replaces exactly one field; none
/// of them resets the page index.
#[derive(Debug, Clone, Default)]
pub struct CriteriaStore {
    current: Criteria,
}

impl CriteriaStore {
    pub fn new(initial: Criteria) -> Self {
        Self { current: initial }
    }

    pub fn current(&self) -> &Criteria {
        &self.current
    }

    pub fn set_search_text(&mut self, text: impl Into<String>) {
        self.current.search_text = text.into();
        trace!(search = %self.current.search_text, "criteria search updated");
    }

    /// Replaces the status filter. Empty statuses are dropped; the address
    /// has no way to carry them.
    pub fn set_statuses<I>(&mut self, statuses: I)
    where
        I: IntoIterator<Item = Status>,
    {
        self.current.statuses = statuses
            .into_iter()
            .filter(|status| !status.as_str().is_empty())
            .collect();
        trace!(statuses = ?self.current.statuses, "criteria statuses updated");
    }

    pub fn set_project(&mut self, project: Option<Project>) {
        self.current.project = project;
    }

    pub fn set_deploy(&mut self, deploy: Option<Deploy>) {
        self.current.deploy = deploy;
    }

    pub fn set_deadline(&mut self, deadline: Option<NaiveDate>) {
        self.current.deadline = deadline;
    }

    pub fn set_page_size(&mut self, page_size: NonZeroUsize) {
        self.current.page_size = page_size;
    }

    pub fn set_page_index(&mut self, page_index: NonZeroUsize) {
        self.current.page_index = page_index;
    }

    pub(crate) fn replace(&mut self, criteria: Criteria) {
        self.current = criteria;
    }
}
