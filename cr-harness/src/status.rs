//! Typed comparison of build status objects.

use serde_json::{Map, Value};

use crate::error::{HarnessError, HarnessResult};

/// What to do with keys present in the actual status but not expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownKeys {
    Ignore,
    Reject,
}

/// One key whose expected and actual values differ. `None` means absent.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusDiscrepancy {
    pub key: String,
    pub expected: Option<Value>,
    pub actual: Option<Value>,
}

impl std::fmt::Display for StatusDiscrepancy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let render = |value: &Option<Value>| match value {
            Some(value) => value.to_string(),
            None => "<absent>".to_string(),
        };
        write!(
            f,
            "'{}' expected {} but was {}",
            self.key,
            render(&self.expected),
            render(&self.actual)
        )
    }
}

/// Compare two status maps key by key.
///
/// Every expected key must be present with an equal value; numbers compare
/// by value, so `7` equals `7.0`. Keys only in
/// `actual` are reported when `unknown` is [`UnknownKeys::Reject`].
/// Discrepancies come back in key order.
pub fn diff_status(
    expected: &Map<String, Value>,
    actual: &Map<String, Value>,
    unknown: UnknownKeys,
) -> Vec<StatusDiscrepancy> {
    let mut discrepancies: Vec<StatusDiscrepancy> = expected
        .iter()
        .filter(|(key, value)| !actual.get(*key).is_some_and(|found| values_equal(value, found)))
        .map(|(key, value)| StatusDiscrepancy {
            key: key.clone(),
            expected: Some(value.clone()),
            actual: actual.get(key).cloned(),
        })
        .collect();

    if unknown == UnknownKeys::Reject {
        discrepancies.extend(
            actual
                .iter()
                .filter(|(key, _)| !expected.contains_key(*key))
                .map(|(key, value)| StatusDiscrepancy {
                    key: key.clone(),
                    expected: None,
                    actual: Some(value.clone()),
                }),
        );
        discrepancies.sort_by(|a, b| a.key.cmp(&b.key));
    }

    discrepancies
}

fn values_equal(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Number(a), Value::Number(b)) => {
            a == b || matches!((a.as_f64(), b.as_f64()), (Some(x), Some(y)) if x == y)
        }
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter().all(|(key, x)| b.get(key).is_some_and(|y| values_equal(x, y)))
        }
        _ => expected == actual,
    }
}

/// Canonical end states of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedOutcome {
    /// `NO_FAILURES` / `FINISHED`
    Succeeded,
    /// `FAILURE` / `FINISHED`
    Failed,
    /// `FAILURE` / `CANCELED`
    Canceled,
}

impl ExpectedOutcome {
    pub fn result(&self) -> &'static str {
        match self {
            Self::Succeeded => "NO_FAILURES",
            Self::Failed | Self::Canceled => "FAILURE",
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Succeeded | Self::Failed => "FINISHED",
            Self::Canceled => "CANCELED",
        }
    }

    /// Status subset this outcome requires.
    pub fn fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("result".to_string(), Value::from(self.result()));
        fields.insert("status".to_string(), Value::from(self.status()));
        fields
    }
}

/// Check that the `build` object of a status response contains `expected`.
pub fn check_status_subset(
    build_id: u64,
    expected: &Map<String, Value>,
    response: &Value,
) -> HarnessResult<()> {
    let Some(build) = response.get("build").and_then(Value::as_object) else {
        return Err(HarnessError::AssertionFailed(format!(
            "Build status API request should return an object for build {build_id}, got {response}"
        )));
    };

    let discrepancies = diff_status(expected, build, UnknownKeys::Ignore);
    if discrepancies.is_empty() {
        return Ok(());
    }
    Err(HarnessError::StatusMismatch {
        build_id,
        expected: Value::Object(expected.clone()),
        actual: Value::Object(build.clone()),
        discrepancies,
    })
}
