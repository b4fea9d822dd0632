//! Quiz status machine over `SessionState`.
//!
//! ```text
//! IDLE --submit image--> LOADING --ok--> PLAYING --answer--> FEEDBACK
//! FEEDBACK --delay--> PLAYING | RETRY_SUMMARY
//! RETRY_SUMMARY --retry wrong--> PLAYING | FINISHED
//! RETRY_SUMMARY (no wrong) --replay--> IDLE
//! any --reset--> IDLE
//! ```
//!
//! Transitions are synchronous. The asynchronous edges (generation result,
//! feedback delay) are split into an issuing call that returns a ticket and a
//! completing call that takes it back. Each ticket carries the round epoch it
//! was issued in; reset and every new round bump the epoch, so a late ticket
//! is refused instead of resurrecting an abandoned round.

use tracing::debug;

use crate::domain::{Problem, SessionState, Status};
use crate::generator::GenerationError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadTicket {
  epoch: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdvanceTicket {
  epoch: u64,
  index: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Judgment {
  pub correct: bool,
  pub ticket: AdvanceTicket,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
  Started { count: usize },
  Failed(GenerationError),
  /// The session moved on while the call was in flight; nothing changed.
  Stale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdvanceOutcome {
  NextProblem { index: usize },
  RoundComplete { wrong: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryOutcome {
  Started { count: usize },
  Finished,
}

#[derive(Debug, Default)]
pub struct QuizSession {
  state: SessionState,
  epoch: u64,
}

impl QuizSession {
  pub fn new(state: SessionState) -> Self { Self { state, epoch: 0 } }

  pub fn state(&self) -> &SessionState { &self.state }

  #[cfg(test)]
  pub fn status(&self) -> Status { self.state.status }

  /// IDLE -> LOADING. Refused in any other status.
  pub fn begin_loading(&mut self) -> Option<LoadTicket> {
    if self.state.status != Status::Idle {
      return None;
    }
    self.epoch += 1;
    self.state.status = Status::Loading;
    self.state.is_correct = None;
    Some(LoadTicket { epoch: self.epoch })
  }

  pub fn finish_loading(&mut self, ticket: LoadTicket, result: Result<Vec<Problem>, GenerationError>) -> LoadOutcome {
    if ticket.epoch != self.epoch || self.state.status != Status::Loading {
      debug!(target: "session", "Dropping stale generation result");
      return LoadOutcome::Stale;
    }
    match result {
      Ok(problems) if problems.is_empty() => {
        self.state.status = Status::Idle;
        LoadOutcome::Failed(GenerationError::NoProblems)
      }
      Ok(problems) => {
        let count = problems.len();
        self.start_round(problems);
        LoadOutcome::Started { count }
      }
      Err(e) => {
        self.state.status = Status::Idle;
        LoadOutcome::Failed(e)
      }
    }
  }

  /// PLAYING -> FEEDBACK. A no-op outside PLAYING or for an out-of-range choice.
  pub fn submit_answer(&mut self, choice: usize) -> Option<Judgment> {
    if self.state.status != Status::Playing {
      return None;
    }
    let problem = self.state.current_problem()?;
    if choice >= problem.options.len() {
      return None;
    }
    let correct = problem.is_correct(choice);
    let id = problem.id.clone();
    if !correct && !self.state.wrong_problem_ids.contains(&id) {
      self.state.wrong_problem_ids.push(id);
    }
    self.state.status = Status::Feedback;
    self.state.is_correct = Some(correct);
    Some(Judgment { correct, ticket: AdvanceTicket { epoch: self.epoch, index: self.state.current_index } })
  }

  /// FEEDBACK -> PLAYING | RETRY_SUMMARY, for the judgment the ticket came from.
  pub fn advance(&mut self, ticket: AdvanceTicket) -> Option<AdvanceOutcome> {
    if ticket.epoch != self.epoch
      || ticket.index != self.state.current_index
      || self.state.status != Status::Feedback
    {
      debug!(target: "session", "Dropping stale feedback advance");
      return None;
    }
    let next = self.state.current_index + 1;
    self.state.current_index = next.min(self.state.problems.len());
    self.state.is_correct = None;
    if next >= self.state.problems.len() {
      self.state.status = Status::RetrySummary;
      Some(AdvanceOutcome::RoundComplete { wrong: self.state.wrong_problem_ids.len() })
    } else {
      self.state.status = Status::Playing;
      Some(AdvanceOutcome::NextProblem { index: next })
    }
  }

  /// RETRY_SUMMARY -> PLAYING over the wrong problems, or FINISHED if there are none.
  pub fn start_retry_round(&mut self) -> Option<RetryOutcome> {
    if self.state.status != Status::RetrySummary {
      return None;
    }
    let wrong = &self.state.wrong_problem_ids;
    let next: Vec<Problem> = self
      .state
      .problems
      .iter()
      .filter(|p| wrong.contains(&p.id))
      .cloned()
      .collect();
    if next.is_empty() {
      self.epoch += 1;
      self.state.status = Status::Finished;
      self.state.is_correct = None;
      return Some(RetryOutcome::Finished);
    }
    let count = next.len();
    self.start_round(next);
    Some(RetryOutcome::Started { count })
  }

  /// RETRY_SUMMARY with nothing wrong -> IDLE.
  pub fn replay(&mut self) -> bool {
    if self.state.status != Status::RetrySummary || !self.state.wrong_problem_ids.is_empty() {
      return false;
    }
    self.reset();
    true
  }

  /// Unconditional return to the canonical empty IDLE state.
  pub fn reset(&mut self) {
    self.epoch += 1;
    self.state = SessionState::fresh();
  }

  fn start_round(&mut self, problems: Vec<Problem>) {
    self.epoch += 1;
    self.state = SessionState {
      problems,
      current_index: 0,
      wrong_problem_ids: Vec::new(),
      status: Status::Playing,
      is_correct: None,
    };
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::ProblemId;

  fn problem(id: &str, answer: usize) -> Problem {
    Problem {
      id: ProblemId::from(id),
      question: format!("{id}?"),
      options: vec!["0".into(), "1".into(), "2".into()],
      answer_index: answer,
    }
  }

  fn playing(problems: Vec<Problem>) -> QuizSession {
    let mut s = QuizSession::default();
    let t = s.begin_loading().unwrap();
    assert_eq!(s.finish_loading(t, Ok(problems.clone())), LoadOutcome::Started { count: problems.len() });
    s
  }

  fn assert_index_bound(s: &QuizSession) {
    assert!(s.state().current_index <= s.state().problems.len());
  }

  #[test]
  fn correct_answer_then_delay_reaches_summary() {
    let mut s = playing(vec![problem("a", 1)]);
    let j = s.submit_answer(1).unwrap();
    assert!(j.correct);
    assert_eq!(s.status(), Status::Feedback);
    assert_eq!(s.state().is_correct, Some(true));
    assert!(s.state().wrong_problem_ids.is_empty());

    assert_eq!(s.advance(j.ticket), Some(AdvanceOutcome::RoundComplete { wrong: 0 }));
    assert_eq!(s.status(), Status::RetrySummary);
    assert_eq!(s.state().current_index, 1);
    assert_eq!(s.state().is_correct, None);
    assert_index_bound(&s);
  }

  #[test]
  fn wrong_answer_is_recorded_and_retried() {
    let mut s = playing(vec![problem("a", 1)]);
    let j = s.submit_answer(0).unwrap();
    assert!(!j.correct);
    assert_eq!(s.state().wrong_problem_ids, vec![ProblemId::from("a")]);
    s.advance(j.ticket).unwrap();
    assert_eq!(s.status(), Status::RetrySummary);
    assert_eq!(s.state().wrong_problem_ids, vec![ProblemId::from("a")]);

    assert_eq!(s.start_retry_round(), Some(RetryOutcome::Started { count: 1 }));
    assert_eq!(s.status(), Status::Playing);
    assert_eq!(s.state().problems, vec![problem("a", 1)]);
    assert_eq!(s.state().current_index, 0);
    assert!(s.state().wrong_problem_ids.is_empty());
  }

  #[test]
  fn replay_after_clean_round_resets() {
    let mut s = playing(vec![problem("a", 1)]);
    let j = s.submit_answer(1).unwrap();
    s.advance(j.ticket);
    assert!(s.replay());
    assert_eq!(*s.state(), SessionState::fresh());
  }

  #[test]
  fn replay_is_refused_while_wrong_answers_remain() {
    let mut s = playing(vec![problem("a", 1)]);
    let j = s.submit_answer(2).unwrap();
    s.advance(j.ticket);
    assert!(!s.replay());
    assert_eq!(s.status(), Status::RetrySummary);
  }

  #[test]
  fn retry_with_nothing_wrong_finishes_instead_of_playing_nothing() {
    let mut s = playing(vec![problem("a", 0)]);
    let j = s.submit_answer(0).unwrap();
    s.advance(j.ticket);
    assert_eq!(s.start_retry_round(), Some(RetryOutcome::Finished));
    assert_eq!(s.status(), Status::Finished);
    s.reset();
    assert_eq!(s.status(), Status::Idle);
  }

  #[test]
  fn retry_keeps_order_and_narrows_to_wrong_ids() {
    let all = vec![problem("a", 0), problem("b", 0), problem("c", 0), problem("d", 0)];
    let mut s = playing(all.clone());
    for choice in [1, 0, 2, 1] {
      let j = s.submit_answer(choice).unwrap();
      s.advance(j.ticket).unwrap();
      assert_index_bound(&s);
    }
    assert_eq!(s.state().wrong_problem_ids.len(), 3);
    s.start_retry_round().unwrap();
    let ids: Vec<&str> = s.state().problems.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "c", "d"]);
    assert!(s.state().problems.iter().all(|p| all.contains(p)));
  }

  #[test]
  fn answers_outside_playing_are_ignored() {
    let mut s = QuizSession::default();
    assert_eq!(s.submit_answer(0), None);

    let mut s = playing(vec![problem("a", 1), problem("b", 1)]);
    let j = s.submit_answer(0).unwrap();
    assert_eq!(s.submit_answer(1), None);
    assert_eq!(s.state().wrong_problem_ids.len(), 1);
    assert_eq!(s.state().is_correct, Some(false));
    assert_eq!(s.advance(j.ticket), Some(AdvanceOutcome::NextProblem { index: 1 }));
    assert_eq!(s.submit_answer(3), None);
    assert_eq!(s.status(), Status::Playing);
  }

  #[test]
  fn judgment_matches_answer_index() {
    for choice in 0..3 {
      let mut s = playing(vec![problem("a", 2)]);
      let before = s.state().wrong_problem_ids.len();
      let j = s.submit_answer(choice).unwrap();
      assert_eq!(j.correct, choice == 2);
      let grew = s.state().wrong_problem_ids.len() - before;
      assert_eq!(grew, usize::from(!j.correct));
    }
  }

  #[test]
  fn failed_or_empty_generation_returns_to_idle() {
    let mut s = QuizSession::default();
    let t = s.begin_loading().unwrap();
    assert_eq!(s.begin_loading(), None);
    let err = GenerationError::CredentialInvalid("not found".into());
    assert_eq!(s.finish_loading(t, Err(err.clone())), LoadOutcome::Failed(err));
    assert_eq!(s.status(), Status::Idle);

    let t = s.begin_loading().unwrap();
    assert_eq!(s.finish_loading(t, Ok(vec![])), LoadOutcome::Failed(GenerationError::NoProblems));
    assert_eq!(s.status(), Status::Idle);
  }

  #[test]
  fn reset_invalidates_in_flight_tickets() {
    let mut s = QuizSession::default();
    let t = s.begin_loading().unwrap();
    s.reset();
    assert_eq!(s.finish_loading(t, Ok(vec![problem("a", 0)])), LoadOutcome::Stale);
    assert_eq!(*s.state(), SessionState::fresh());

    let mut s = playing(vec![problem("a", 0), problem("b", 0)]);
    let j = s.submit_answer(0).unwrap();
    s.reset();
    assert_eq!(s.advance(j.ticket), None);
    assert_eq!(*s.state(), SessionState::fresh());
  }

  #[test]
  fn ticket_from_previous_round_cannot_advance_the_retry_round() {
    let mut s = playing(vec![problem("a", 0)]);
    let j = s.submit_answer(1).unwrap();
    s.advance(j.ticket).unwrap();
    s.start_retry_round().unwrap();
    let _ = s.submit_answer(1).unwrap();
    assert_eq!(s.advance(j.ticket), None);
    assert_eq!(s.status(), Status::Feedback);
  }

  #[test]
  fn restored_idle_state_can_start_a_new_upload() {
    let restored = SessionState { problems: vec![problem("a", 0)], current_index: 1, ..SessionState::fresh() };
    let mut s = QuizSession::new(restored);
    let t = s.begin_loading().unwrap();
    s.finish_loading(t, Ok(vec![problem("x", 1)]));
    assert_eq!(s.state().problems[0].id, ProblemId::from("x"));
    assert_eq!(s.state().current_index, 0);
  }
}
