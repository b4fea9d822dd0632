//! Domain models: problems, the session status machine states, and the session snapshot.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Every problem carries exactly this many choices.
pub const OPTION_COUNT: usize = 3;

/// Locally synthesized identifier, unique within a session.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProblemId(pub String);

impl ProblemId {
  /// `stamp` is shared by one generation batch, `ordinal` is the position inside it.
  pub fn synthesize(stamp: u128, ordinal: usize) -> Self {
    ProblemId(format!("p{stamp}-{ordinal}"))
  }

  #[cfg(test)]
  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for ProblemId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for ProblemId {
  fn from(s: &str) -> Self { ProblemId(s.to_string()) }
}

/// One multiple-choice variant. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
  pub id: ProblemId,
  pub question: String,
  pub options: Vec<String>,
  pub answer_index: usize,
}

impl Problem {
  pub fn is_correct(&self, choice: usize) -> bool { choice == self.answer_index }

  /// Shape check used when restoring a snapshot.
  pub fn is_well_formed(&self) -> bool {
    self.options.len() == OPTION_COUNT && self.answer_index < OPTION_COUNT
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
  #[default]
  Idle,
  Loading,
  Playing,
  Feedback,
  RetrySummary,
  Finished,
}

/// The single source of truth, persisted and restored wholesale.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
  pub problems: Vec<Problem>,
  pub current_index: usize,
  pub wrong_problem_ids: Vec<ProblemId>,
  pub status: Status,
  #[serde(default)]
  pub is_correct: Option<bool>,
}

impl SessionState {
  /// Canonical empty IDLE state.
  pub fn fresh() -> Self { Self::default() }

  pub fn current_problem(&self) -> Option<&Problem> {
    self.problems.get(self.current_index)
  }

  /// Structural invariants a restored snapshot must satisfy.
  pub fn is_consistent(&self) -> bool {
    self.current_index <= self.problems.len()
      && self.problems.iter().all(Problem::is_well_formed)
      && self
        .wrong_problem_ids
        .iter()
        .all(|id| self.problems.iter().any(|p| &p.id == id))
  }

  /// Snapshot as it should look right after a reload: status forced to IDLE.
  pub fn into_restored(mut self) -> Self {
    self.status = Status::Idle;
    self.is_correct = None;
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn problem(id: &str, answer: usize) -> Problem {
    Problem {
      id: id.into(),
      question: "1+1?".into(),
      options: vec!["1".into(), "2".into(), "3".into()],
      answer_index: answer,
    }
  }

  #[test]
  fn snapshot_uses_camel_case_and_screaming_status() {
    let s = SessionState {
      problems: vec![problem("a", 1)],
      current_index: 0,
      wrong_problem_ids: vec!["a".into()],
      status: Status::RetrySummary,
      is_correct: None,
    };
    let json = serde_json::to_value(&s).unwrap();
    assert_eq!(json["status"], "RETRY_SUMMARY");
    assert_eq!(json["currentIndex"], 0);
    assert_eq!(json["wrongProblemIds"][0], "a");
    assert_eq!(json["problems"][0]["answerIndex"], 1);
  }

  #[test]
  fn restored_snapshot_keeps_progress_but_forces_idle() {
    let s = SessionState {
      problems: vec![problem("a", 1), problem("b", 0)],
      current_index: 1,
      wrong_problem_ids: vec!["a".into()],
      status: Status::Feedback,
      is_correct: Some(false),
    };
    let json = serde_json::to_string(&s).unwrap();
    let back: SessionState = serde_json::from_str::<SessionState>(&json).unwrap().into_restored();
    assert_eq!(back.status, Status::Idle);
    assert_eq!(back.is_correct, None);
    assert_eq!(back.problems, s.problems);
    assert_eq!(back.current_index, s.current_index);
    assert_eq!(back.wrong_problem_ids, s.wrong_problem_ids);
  }

  #[test]
  fn consistency_rejects_dangling_index_and_foreign_ids() {
    let mut s = SessionState { problems: vec![problem("a", 0)], ..SessionState::fresh() };
    assert!(s.is_consistent());
    s.current_index = 2;
    assert!(!s.is_consistent());
    s.current_index = 1;
    s.wrong_problem_ids.push("zzz".into());
    assert!(!s.is_consistent());
  }

  #[test]
  fn synthesized_ids_differ_by_ordinal() {
    assert_ne!(ProblemId::synthesize(42, 0), ProblemId::synthesize(42, 1));
    assert_eq!(ProblemId::synthesize(42, 3).as_str(), "p42-3");
  }
}
