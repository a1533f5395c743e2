use std::collections::BTreeSet;

use tracing::{
  debug,
  warn
};
use url::form_urlencoded;

use crate::criteria::Criteria;
use crate::task::{
  DATE_FORMAT,
  Deploy,
  Project,
  Status,
  parse_calendar_date
};

pub const SEARCH_KEY: &str = "search";
pub const STATUS_KEY: &str = "status";
pub const PROJECT_KEY: &str = "project";
pub const DEPLOY_KEY: &str = "deploy";
pub const DATE_KEY: &str = "date";

/// Renders the address-carried criteria fields as a query string without the
/// leading `?`. Empty or unset fields are left out entirely; page size and
/// page index never appear.
pub fn encode(
  criteria: &Criteria
) -> String {
  let mut out =
    form_urlencoded::Serializer::new(
      String::new()
    );

  if !criteria.search_text.is_empty() {
    out.append_pair(
      SEARCH_KEY,
      &criteria.search_text
    );
  }

  let statuses = criteria
    .statuses
    .iter()
    .map(Status::as_str)
    .filter(|status| !status.is_empty())
    .map(escape_status)
    .collect::<Vec<_>>();
  if !statuses.is_empty() {
    out.append_pair(
      STATUS_KEY,
      &statuses.join(",")
    );
  }

  if let Some(project) =
    criteria.project.as_ref()
    && !project.as_str().is_empty()
  {
    out.append_pair(
      PROJECT_KEY,
      project.as_str()
    );
  }

  if let Some(deploy) =
    criteria.deploy.as_ref()
    && !deploy.as_str().is_empty()
  {
    out.append_pair(
      DEPLOY_KEY,
      deploy.as_str()
    );
  }

  if let Some(date) = criteria.deadline
  {
    out.append_pair(
      DATE_KEY,
      &date
        .format(DATE_FORMAT)
        .to_string()
    );
  }

  out.finish()
}

/// Reads criteria back from a query string. Absent keys mean "no filter on
/// that field"; page size and page index come back as defaults. The first
/// occurrence of a repeated key wins.
pub fn decode(address: &str) -> Criteria {
  let query = address
    .trim()
    .trim_start_matches('?');
  let mut criteria = Criteria::default();

  let mut seen = BTreeSet::new();
  for (key, value) in
    form_urlencoded::parse(
      query.as_bytes()
    )
  {
    if !seen.insert(key.to_string()) {
      continue;
    }

    match key.as_ref() {
      | SEARCH_KEY => {
        criteria.search_text =
          value.into_owned();
      }
      | STATUS_KEY => {
        criteria.statuses = value
          .split(',')
          .filter(|part| {
            !part.is_empty()
          })
          .map(unescape_status)
          .map(Status::from)
          .collect();
      }
      | PROJECT_KEY => {
        criteria.project =
          non_empty(&value)
            .map(Project::from);
      }
      | DEPLOY_KEY => {
        criteria.deploy =
          non_empty(&value)
            .map(Deploy::from);
      }
      | DATE_KEY => {
        criteria.deadline =
          parse_calendar_date(&value);
        if criteria.deadline.is_none()
          && !value.is_empty()
        {
          warn!(value = %value, "ignoring unparseable date in address");
        }
      }
      | other => {
        debug!(key = other, "ignoring unknown address key");
      }
    }
  }

  criteria
}

/// Statuses are comma-joined inside one value, so a literal `,` or `%`
/// in a status is written as `%2C` or `%25`.
fn escape_status(
  status: &str
) -> String {
  let mut out =
    String::with_capacity(status.len());
  for ch in status.chars() {
    match ch {
      | '%' => out.push_str("%25"),
      | ',' => out.push_str("%2C"),
      | other => out.push(other)
    }
  }
  out
}

fn unescape_status(
  part: &str
) -> String {
  let mut out =
    String::with_capacity(part.len());
  let mut rest = part;
  while let Some(at) = rest.find('%') {
    out.push_str(&rest[..at]);
    let tail = &rest[at..];
    let code = tail.get(1..3);
    match code {
      | Some("25") => out.push('%'),
      | Some("2C" | "2c") => {
        out.push(',')
      }
      | _ => {
        out.push('%');
        rest = &tail[1..];
        continue;
      }
    }
    rest = &tail[3..];
  }
  out.push_str(rest);
  out
}

fn non_empty(value: &str) -> Option<&str> {
  if value.is_empty() {
    None
  } else {
    Some(value)
  }
}

/// Keeps a shareable address in step with the criteria. Every criteria
/// change is pushed out through [`AddressSync::push`]; an address arriving
/// from outside (startup, back/forward) is pulled in through
/// [`AddressSync::navigate`].
#[derive(Debug, Clone, Default)]
pub struct AddressSync {
  address: String
}

impl AddressSync {
  pub fn seed(
    address: &str
  ) -> (Self, Criteria) {
    let criteria = decode(address);
    let sync = Self {
      address: encode(&criteria)
    };
    (sync, criteria)
  }

  pub fn address(&self) -> &str {
    &self.address
  }

  /// Re-encodes after a criteria change. Returns true when the address moved.
  pub fn push(
    &mut self,
    criteria: &Criteria
  ) -> bool {
    let next = encode(criteria);
    if next == self.address {
      return false;
    }
    debug!(from = %self.address, to = %next, "address updated");
    self.address = next;
    true
  }

  /// Applies an externally changed address on top of `current`, keeping its
  /// session-local page size and page index.
  pub fn navigate(
    &mut self,
    address: &str,
    current: &Criteria
  ) -> Criteria {
    let decoded = decode(address);
    let next = current
      .with_address_fields_of(&decoded);
    self.address = encode(&next);
    next
  }
}

#[cfg(test)]
mod tests {
  use std::num::NonZeroUsize;

  use chrono::NaiveDate;

  use super::*;

  fn sample() -> Criteria {
    let mut criteria =
      Criteria::default();
    criteria.search_text =
      "api gateway".to_string();
    criteria.statuses = [
      Status::Pending,
      Status::InProgress
    ]
    .into_iter()
    .collect();
    criteria.project = Some(Project::Om);
    criteria.deploy = Some(Deploy::Dev);
    criteria.deadline =
      NaiveDate::from_ymd_opt(
        2024, 1, 1
      );
    criteria
  }

  #[test]
  fn default_criteria_encode_to_nothing()
  {
    assert_eq!(
      encode(&Criteria::default()),
      ""
    );
  }

  #[test]
  fn encode_omits_empty_fields() {
    let mut criteria =
      Criteria::default();
    criteria.project =
      Some(Project::LrtSumsel);
    assert_eq!(
      encode(&criteria),
      "project=LRT_Sumsel"
    );
  }

  #[test]
  fn decode_reads_every_carried_field()
  {
    let criteria = decode(
      "?search=api+gateway&status=\
       pending%2Cin+progress&project=\
       OM&deploy=Dev&date=2024-01-01"
    );
    assert_eq!(
      criteria.search_text,
      "api gateway"
    );
    assert!(
      criteria
        .statuses
        .contains(&Status::InProgress)
    );
    assert!(
      criteria
        .statuses
        .contains(&Status::Pending)
    );
    assert_eq!(
      criteria.project,
      Some(Project::Om)
    );
    assert_eq!(
      criteria.deploy,
      Some(Deploy::Dev)
    );
    assert_eq!(
      criteria.deadline,
      NaiveDate::from_ymd_opt(
        2024, 1, 1
      )
    );
  }

  #[test]
  fn absent_status_key_means_empty_set()
  {
    let criteria =
      decode("search=x");
    assert!(
      criteria.statuses.is_empty()
    );
    assert!(
      decode("status=")
        .statuses
        .is_empty()
    );
  }

  #[test]
  fn round_trip_preserves_carried_fields()
  {
    let original = sample();
    assert_eq!(
      decode(&encode(&original)),
      original
    );

    let with_unknown = {
      let mut c = Criteria::default();
      c.statuses = [Status::from(
        "blocked"
      )]
      .into_iter()
      .collect();
      c.project =
        Some(Project::from("Billing"));
      c
    };
    assert_eq!(
      decode(&encode(&with_unknown)),
      with_unknown
    );
  }

  #[test]
  fn statuses_with_separators_round_trip()
  {
    let mut criteria =
      Criteria::default();
    criteria.statuses = [
      Status::from("blocked, waiting"),
      Status::from("50%,done"),
      Status::from("%2C"),
      Status::Pending
    ]
    .into_iter()
    .collect();

    let encoded = encode(&criteria);
    assert_eq!(
      decode(&encoded),
      criteria
    );
    assert_eq!(
      decode(&encoded).statuses.len(),
      4
    );
  }

  #[test]
  fn empty_status_never_reaches_the_address()
  {
    let mut criteria =
      Criteria::default();
    criteria.statuses = [
      Status::from(""),
      Status::Completed
    ]
    .into_iter()
    .collect();
    assert_eq!(
      encode(&criteria),
      "status=completed"
    );

    criteria.statuses =
      [Status::from("")]
        .into_iter()
        .collect();
    assert_eq!(encode(&criteria), "");
  }

  #[test]
  fn stray_percent_in_status_is_kept()
  {
    let criteria =
      decode("status=100%25%2Ca%25zz");
    let statuses: Vec<&str> = criteria
      .statuses
      .iter()
      .map(Status::as_str)
      .collect();
    assert_eq!(
      statuses,
      vec!["100%", "a%zz"]
    );
  }

  #[test]
  fn encode_after_decode_is_idempotent()
  {
    let first = encode(&sample());
    let second =
      encode(&decode(&first));
    assert_eq!(first, second);
  }

  #[test]
  fn pagination_never_enters_the_address()
  {
    let mut criteria = sample();
    criteria.page_size =
      NonZeroUsize::new(50).unwrap();
    criteria.page_index =
      NonZeroUsize::new(3).unwrap();
    let encoded = encode(&criteria);
    assert!(!encoded.contains("50"));
    let decoded = decode(&encoded);
    assert_eq!(
      decoded.page_size.get(),
      10
    );
    assert_eq!(
      decoded.page_index.get(),
      1
    );
  }

  #[test]
  fn bad_date_is_dropped() {
    assert!(
      decode("date=someday")
        .deadline
        .is_none()
    );
  }

  #[test]
  fn sync_push_reports_changes_only()
  {
    let (mut sync, criteria) =
      AddressSync::seed("");
    assert!(!sync.push(&criteria));

    let mut next = criteria.clone();
    next.search_text =
      "report".to_string();
    assert!(sync.push(&next));
    assert_eq!(
      sync.address(),
      "search=report"
    );
  }

  #[test]
  fn navigate_keeps_session_pagination()
  {
    let (mut sync, mut criteria) =
      AddressSync::seed(
        "status=pending"
      );
    criteria.page_index =
      NonZeroUsize::new(2).unwrap();

    let next = sync.navigate(
      "?project=OM",
      &criteria
    );
    assert!(next.statuses.is_empty());
    assert_eq!(
      next.project,
      Some(Project::Om)
    );
    assert_eq!(
      next.page_index.get(),
      2
    );
    assert_eq!(
      sync.address(),
      "project=OM"
    );
  }
}
