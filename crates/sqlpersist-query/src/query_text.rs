//! Literal query text for logging.
//!
//! [`query_text`] splices the literal rendering of each bound parameter into
//! the command text at its recorded location. The result is for diagnostics
//! only and is never executed.

use crate::dialect::{SqlDialect, SyntaxSymbol};
use crate::format::FormatResult;
use sqlpersist_core::Value;
use sqlpersist_core::value::format_uuid;

/// Rebuild `result` as a single SQL string with parameters inlined.
pub fn query_text(dialect: &dyn SqlDialect, result: &FormatResult) -> String {
    if result.parameter_values.is_empty() {
        return result.command_text.clone();
    }

    let text = &result.command_text;
    let mut out = String::with_capacity(text.len() * 2);
    let mut index = 0;

    for located in &result.parameter_values {
        let start = located.offset.min(text.len());
        if start >= index {
            out.push_str(&text[index..start]);
        }
        out.push_str(&literal(dialect, &located.value));
        index = (located.offset + located.length).min(text.len());
    }
    out.push_str(&text[index..]);
    out
}

/// Literal SQL rendering of a value.
pub fn literal(dialect: &dyn SqlDialect, value: &Value) -> String {
    match value {
        Value::Null => dialect.syntax_symbol(SyntaxSymbol::Null).to_string(),
        Value::Bool(true) => dialect.syntax_symbol(SyntaxSymbol::True).to_string(),
        Value::Bool(false) => dialect.syntax_symbol(SyntaxSymbol::False).to_string(),
        Value::SmallInt(v) => v.to_string(),
        Value::Int(v) => v.to_string(),
        Value::BigInt(v) => v.to_string(),
        Value::Double(v) => v.to_string(),
        Value::Decimal(v) => v.clone(),
        Value::Text(s) => quote_string(dialect, s),
        Value::Json(j) => quote_string(dialect, &j.to_string()),
        Value::Uuid(u) => quote_string(dialect, &format_uuid(u)),
        Value::Date(days) => quote_string(dialect, &format_date(*days)),
        Value::Timestamp(micros) => quote_string(dialect, &format_timestamp(*micros)),
        Value::Bytes(bytes) => {
            let hex: String = bytes.iter().map(|b| format!("{b:02X}")).collect();
            format!("X'{hex}'")
        }
    }
}

fn quote_string(dialect: &dyn SqlDialect, s: &str) -> String {
    let quote = dialect.syntax_symbol(SyntaxSymbol::StringQuote);
    let escape = dialect.syntax_symbol(SyntaxSymbol::StringEscape);
    format!("{quote}{}{quote}", s.replace(quote, escape))
}

/// Proleptic Gregorian date for a day count since 1970-01-01.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

fn format_date(days: i32) -> String {
    let (y, m, d) = civil_from_days(i64::from(days));
    format!("{y:04}-{m:02}-{d:02}")
}

fn format_timestamp(micros: i64) -> String {
    let days = micros.div_euclid(86_400_000_000);
    let rem = micros.rem_euclid(86_400_000_000);
    let (y, m, d) = civil_from_days(days);
    let secs = rem / 1_000_000;
    let frac = rem % 1_000_000;
    format!(
        "{y:04}-{m:02}-{d:02} {:02}:{:02}:{:02}.{frac:06}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{AnsiDialect, PostgresDialect, SqliteDialect};
    use crate::format::LocatedValue;
    use std::collections::HashMap;

    fn result(text: &str, params: Vec<(usize, usize, Value)>) -> FormatResult {
        FormatResult {
            command_text: text.to_string(),
            parameter_to_placeholder: vec![None; params.len()],
            parameter_values: params
                .into_iter()
                .map(|(offset, length, value)| LocatedValue {
                    offset,
                    length,
                    value,
                })
                .collect(),
            placeholder_to_parameter: HashMap::new(),
            cacheable: true,
        }
    }

    #[test]
    fn test_inlines_parameters_at_their_offsets() {
        let r = result(
            "SELECT * FROM \"t\" WHERE ((\"a\" = $1) AND (\"b\" = $2))",
            vec![(32, 2, Value::BigInt(10)), (47, 2, Value::Text("it's".into()))],
        );
        assert_eq!(
            query_text(&PostgresDialect, &r),
            "SELECT * FROM \"t\" WHERE ((\"a\" = 10) AND (\"b\" = 'it''s'))"
        );
    }

    #[test]
    fn test_multi_character_markers_advance_correctly() {
        let r = result(
            "VALUES (@p0, @p1, @p2)",
            vec![
                (8, 3, Value::Int(1)),
                (13, 3, Value::Null),
                (18, 3, Value::Bool(true)),
            ],
        );
        assert_eq!(query_text(&AnsiDialect, &r), "VALUES (1, NULL, TRUE)");
    }

    #[test]
    fn test_no_parameters_returns_text() {
        let r = result("DELETE FROM \"t\";", Vec::new());
        assert_eq!(query_text(&AnsiDialect, &r), "DELETE FROM \"t\";");
    }

    #[test]
    fn test_literals() {
        assert_eq!(literal(&SqliteDialect, &Value::Bool(false)), "0");
        assert_eq!(literal(&AnsiDialect, &Value::Date(0)), "'1970-01-01'");
        assert_eq!(literal(&AnsiDialect, &Value::Date(19_723)), "'2024-01-01'");
        assert_eq!(
            literal(&AnsiDialect, &Value::Timestamp(86_400_000_000 + 3_723_000_001)),
            "'1970-01-02 01:02:03.000001'"
        );
        assert_eq!(
            literal(&AnsiDialect, &Value::Uuid([0xab; 16])),
            "'abababab-abab-abab-abab-abababababab'"
        );
        assert_eq!(literal(&AnsiDialect, &Value::Bytes(vec![0x0f, 0xa0])), "X'0FA0'");
    }
}
