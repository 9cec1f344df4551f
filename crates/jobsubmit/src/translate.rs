use std::fmt::{Display, Formatter};

use serde::Serialize;

use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::value::Value;

pub const SUBMIT_ENTRY_POINT: &str = "slurm_job_submit";
pub const MODIFY_ENTRY_POINT: &str = "slurm_job_modify";

/// Entry points that every policy script has to define.
pub const REQUIRED_ENTRY_POINTS: &[&str] = &[SUBMIT_ENTRY_POINT, MODIFY_ENTRY_POINT];

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HookKind {
    Submit,
    Modify,
}

impl HookKind {
    pub fn entry_point(&self) -> &'static str {
        match self {
            HookKind::Submit => SUBMIT_ENTRY_POINT,
            HookKind::Modify => MODIFY_ENTRY_POINT,
        }
    }
}

impl Display for HookKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            HookKind::Submit => "submit",
            HookKind::Modify => "modify",
        })
    }
}

fn saturate(value: i64) -> i32 {
    value.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// Reads a status code the way Lua coerces values to numbers.
fn status_code(value: &Value) -> Option<i32> {
    match value {
        Value::Integer(v) => Some(saturate(*v)),
        Value::Number(v) if v.is_finite() => Some(v.trunc() as i32),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .map(saturate)
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|v| v.is_finite()).map(|v| v.trunc() as i32))
        }
        _ => None,
    }
}

/// Converts the value returned by an entry point into a status code and
/// decides what happens with the messages addressed to the user.
pub fn translate(
    kind: HookKind,
    returned: &Value,
    user_message: Option<String>,
    sink: &dyn DiagnosticSink,
) -> (i32, Option<String>) {
    let status = status_code(returned).unwrap_or_else(|| {
        sink.report(Diagnostic::NonNumericReturn {
            entry_point: kind.entry_point().to_string(),
            kind: returned.type_name(),
        });
        ctld::status::SUCCESS
    });
    (status, route_user_message(kind, user_message, sink))
}

/// Messages reach the user only on submission. Modification requests have no
/// channel back to the user, so the message is logged instead.
pub fn route_user_message(
    kind: HookKind,
    user_message: Option<String>,
    sink: &dyn DiagnosticSink,
) -> Option<String> {
    match kind {
        HookKind::Submit => user_message,
        HookKind::Modify => {
            if let Some(message) = user_message {
                sink.report(Diagnostic::UserMessageDiscarded { message });
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::diagnostics::{Diagnostic, RecordingSink};
    use crate::translate::{HookKind, translate};
    use crate::value::{Table, Value};

    #[test]
    fn test_numeric_values() {
        let sink = RecordingSink::new();
        for (value, expected) in [
            (Value::Integer(2002), 2002),
            (Value::Integer(-1), -1),
            (Value::Number(7.9), 7),
            (Value::String(" 12 ".into()), 12),
            (Value::String("3.5".into()), 3),
        ] {
            assert_eq!(translate(HookKind::Submit, &value, None, &sink).0, expected);
        }
        assert!(sink.diagnostics().is_empty());
    }

    #[test]
    fn test_non_numeric_is_success() {
        let sink = RecordingSink::new();
        for value in [
            Value::Nil,
            Value::Boolean(false),
            Value::String("deny".into()),
            Value::Table(Table::new()),
        ] {
            assert_eq!(translate(HookKind::Submit, &value, None, &sink).0, 0);
        }
        let diagnostics = sink.take();
        assert_eq!(diagnostics.len(), 4);
        assert!(matches!(
            &diagnostics[0],
            Diagnostic::NonNumericReturn { kind: "nil", .. }
        ));
    }

    #[test]
    fn test_submit_keeps_message() {
        let sink = RecordingSink::new();
        let (status, message) = translate(
            HookKind::Submit,
            &Value::Integer(1),
            Some("no".into()),
            &sink,
        );
        assert_eq!(status, 1);
        assert_eq!(message.as_deref(), Some("no"));
    }

    #[test]
    fn test_modify_discards_message() {
        let sink = RecordingSink::new();
        let (status, message) = translate(
            HookKind::Modify,
            &Value::Integer(0),
            Some("hello".into()),
            &sink,
        );
        assert_eq!(status, 0);
        assert_eq!(message, None);
        assert_eq!(
            sink.diagnostics(),
            vec![Diagnostic::UserMessageDiscarded {
                message: "hello".into()
            }]
        );
    }
}
