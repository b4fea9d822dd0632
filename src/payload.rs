//! Generation payload schema and the repair policy applied to it.
//!
//! The model is asked for `{"problems": [{question, options, answerIndex}, ...]}`.
//! Items are parsed leniently (every field optional, any JSON type) and then
//! repaired into well-formed `Problem`s:
//!   - missing/blank `question`      -> `DEFAULT_QUESTION`
//!   - `options` not an array        -> `PLACEHOLDER_OPTIONS`
//!   - `options` with != 3 entries   -> truncated, or padded with `PLACEHOLDER_OPTION`
//!   - `answerIndex` missing, non-integer or outside 0..=2 -> 0
//!
//! Only the first `max_problems` items are kept.

use serde::Deserialize;
use serde_json::Value;

use crate::domain::{Problem, ProblemId, OPTION_COUNT};

pub const DEFAULT_QUESTION: &str = "(question could not be read)";
pub const PLACEHOLDER_OPTION: &str = "?";
pub const PLACEHOLDER_OPTIONS: [&str; OPTION_COUNT] = ["A", "B", "C"];

#[derive(Debug, Deserialize, Default)]
struct RawPayload {
  #[serde(default)]
  problems: Vec<Value>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct RawProblem {
  #[serde(default)]
  pub question: Option<Value>,
  #[serde(default)]
  pub options: Option<Value>,
  #[serde(default, alias = "answer_index")]
  #[serde(rename = "answerIndex")]
  pub answer_index: Option<Value>,
}

#[cfg(test)]
impl RawProblem {
  pub fn new(question: &str, options: &[&str], answer_index: i64) -> Self {
    Self {
      question: Some(Value::from(question)),
      options: Some(Value::from(options.iter().map(|o| Value::from(*o)).collect::<Vec<_>>())),
      answer_index: Some(Value::from(answer_index)),
    }
  }
}

/// Parse the model's text output. Accepts either the wrapped object or a bare array.
/// Only a payload that is not a list of items at all is an error; odd items are kept
/// for repair.
pub fn parse_payload(text: &str) -> Result<Vec<RawProblem>, serde_json::Error> {
  let trimmed = strip_code_fence(text.trim());
  let items = match serde_json::from_str::<RawPayload>(trimmed) {
    Ok(p) => p.problems,
    Err(e) => serde_json::from_str::<Vec<Value>>(trimmed).map_err(|_| e)?,
  };
  Ok(items.into_iter().map(raw_item).collect())
}

/// A bare string is taken as the question text; other non-objects become an empty item.
fn raw_item(item: Value) -> RawProblem {
  match item {
    Value::Object(_) => serde_json::from_value(item).unwrap_or_default(),
    Value::String(question) => RawProblem { question: Some(Value::String(question)), ..RawProblem::default() },
    _ => RawProblem::default(),
  }
}

fn strip_code_fence(s: &str) -> &str {
  let Some(rest) = s.strip_prefix("```") else { return s };
  let rest = rest.strip_prefix("json").unwrap_or(rest);
  rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Repair raw items into a playable round. `stamp` seeds the synthesized ids.
pub fn build_problems(raw: Vec<RawProblem>, stamp: u128, max_problems: usize) -> Vec<Problem> {
  raw
    .into_iter()
    .take(max_problems)
    .enumerate()
    .map(|(ordinal, item)| Problem {
      id: ProblemId::synthesize(stamp, ordinal),
      question: repair_question(item.question.as_ref()),
      options: repair_options(item.options.as_ref()),
      answer_index: repair_answer_index(item.answer_index.as_ref()),
    })
    .collect()
}

fn value_text(v: &Value) -> Option<String> {
  match v {
    Value::String(s) => Some(s.trim().to_string()),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    _ => None,
  }
}

fn repair_question(v: Option<&Value>) -> String {
  v.and_then(value_text)
    .filter(|s| !s.is_empty())
    .unwrap_or_else(|| DEFAULT_QUESTION.to_string())
}

fn repair_options(v: Option<&Value>) -> Vec<String> {
  let Some(Value::Array(items)) = v else {
    return PLACEHOLDER_OPTIONS.iter().map(|s| s.to_string()).collect();
  };
  let mut out: Vec<String> = items
    .iter()
    .take(OPTION_COUNT)
    .map(|item| value_text(item).unwrap_or_else(|| PLACEHOLDER_OPTION.to_string()))
    .collect();
  out.resize(OPTION_COUNT, PLACEHOLDER_OPTION.to_string());
  out
}

fn repair_answer_index(v: Option<&Value>) -> usize {
  let idx = match v {
    Some(Value::Number(n)) => n.as_u64().or_else(|| {
      n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64)
    }),
    Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
    _ => None,
  };
  match idx {
    Some(i) if i < OPTION_COUNT as u64 => i as usize,
    _ => 0,
  }
}
