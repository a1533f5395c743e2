use std::num::NonZeroUsize;

use tracing::trace;

use crate::criteria::Criteria;
use crate::task::TaskRecord;

#[derive(Debug, Clone, Copy)]
enum Pred {
  Text,
  Status,
  Project,
  Deploy,
  Date
}

const PREDICATES: [Pred; 5] = [
  Pred::Text,
  Pred::Status,
  Pred::Project,
  Pred::Deploy,
  Pred::Date
];

/// True when `record` passes every criteria predicate.
pub fn matches(
  record: &TaskRecord,
  criteria: &Criteria
) -> bool {
  let search =
    criteria.search_text.to_lowercase();
  PREDICATES.iter().all(|pred| {
    eval_pred(
      *pred, record, criteria, &search
    )
  })
}

/// Stable filter: the visible subset in collection order.
#[tracing::instrument(skip_all, fields(total = records.len()))]
pub fn select<'a>(
  records: &'a [TaskRecord],
  criteria: &Criteria
) -> Vec<&'a TaskRecord> {
  records
    .iter()
    .filter(|record| {
      matches(record, criteria)
    })
    .collect()
}

fn eval_pred(
  pred: Pred,
  record: &TaskRecord,
  criteria: &Criteria,
  search_lower: &str
) -> bool {
  let ok = match pred {
    | Pred::Text => {
      search_lower.is_empty()
        || record.text_fields().any(
          |field| {
            field
              .to_lowercase()
              .contains(search_lower)
          }
        )
    }
    | Pred::Status => {
      criteria.statuses.is_empty()
        || record
          .status
          .as_ref()
          .is_some_and(|status| {
            criteria
              .statuses
              .contains(status)
          })
    }
    | Pred::Project => {
      match criteria.project.as_ref() {
        | None => true,
        | Some(project) => {
          record.project.as_ref()
            == Some(project)
        }
      }
    }
    | Pred::Deploy => {
      match criteria.deploy.as_ref() {
        | None => true,
        | Some(deploy) => {
          record.deploy.as_ref()
            == Some(deploy)
        }
      }
    }
    | Pred::Date => {
      match criteria.deadline {
        | None => true,
        | Some(day) => {
          record.deadline_date()
            == Some(day)
        }
      }
    }
  };

  trace!(pred = ?pred, key = %record.key, ok, "filter predicate evaluation");
  ok
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumberedRow<T> {
  /// 1-based position across all pages.
  pub number: usize,
  pub item:   T
}

/// One page of an already filtered list.
#[derive(Debug, Clone, PartialEq)]
pub struct PageWindow<T> {
  pub rows:       Vec<NumberedRow<T>>,
  pub total:      usize,
  pub page_size:  NonZeroUsize,
  pub page_index: NonZeroUsize
}

impl<T> PageWindow<T> {
  pub fn is_empty(&self) -> bool {
    self.rows.is_empty()
  }

  pub fn page_count(&self) -> usize {
    page_count(
      self.total,
      self.page_size
    )
  }

  /// First and last row numbers on this page.
  pub fn range(
    &self
  ) -> Option<(usize, usize)> {
    let first = self.rows.first()?;
    let last = self.rows.last()?;
    Some((first.number, last.number))
  }

  pub fn summary(&self) -> String {
    match self.range() {
      | Some((first, last)) => {
        format!(
          "{first}-{last} of {} items",
          self.total
        )
      }
      | None => {
        format!(
          "0 of {} items",
          self.total
        )
      }
    }
  }
}

pub fn page_count(
  total: usize,
  page_size: NonZeroUsize
) -> usize {
  total.div_ceil(page_size.get())
}

/// Slices `items` into the requested page. An index past the last page
/// yields an empty window; it is not clamped.
pub fn paginate<T: Clone>(
  items: &[T],
  page_size: NonZeroUsize,
  page_index: NonZeroUsize
) -> PageWindow<T> {
  let size = page_size.get();
  let start = (page_index.get() - 1)
    .saturating_mul(size);

  let rows = items
    .iter()
    .enumerate()
    .skip(start)
    .take(size)
    .map(|(idx, item)| {
      NumberedRow {
        number: idx + 1,
        item:   item.clone()
      }
    })
    .collect();

  PageWindow {
    rows,
    total: items.len(),
    page_size,
    page_index
  }
}
