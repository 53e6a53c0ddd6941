//! Per-competitor credit records: a nickname plus one additive bonus column
//! per round.

use crate::{CreditInfo, MAX_ROUNDS};
use itertools::Itertools;
use log::warn;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::BTreeMap;

/// Column name for a round's credit. Rounds are 0-based in the API and
/// 1-based in the schema.
fn credit_column(round: u32) -> &'static str {
    assert!(round < MAX_ROUNDS, "round {round} outside schema range");
    match round {
        0 => "round1",
        1 => "round2",
        2 => "round3",
        3 => "round4",
        4 => "round5",
        5 => "round6",
        6 => "round7",
        7 => "round8",
        8 => "round9",
        _ => "round10",
    }
}

/// Read one competitor's record. Competitors without a row (or with unset
/// columns) come back with an empty nickname and zero credits.
pub fn get_credits(conn: &Connection, competitor: u32) -> rusqlite::Result<CreditInfo> {
    let record = conn
        .query_row(
            "select round1, round2, round3, round4, round5, round6, round7, round8,
             round9, round10, nickname from credits where competitor=?1",
            params![competitor],
            |row| {
                let mut credits = Vec::with_capacity(MAX_ROUNDS as usize);
                for index in 0..MAX_ROUNDS as usize {
                    credits.push(row.get::<_, Option<f64>>(index)?.unwrap_or(0.0));
                }
                let nickname: Option<String> = row.get(MAX_ROUNDS as usize)?;
                Ok(CreditInfo {
                    nickname: nickname.unwrap_or_default(),
                    credits,
                })
            },
        )
        .optional()?;
    Ok(record.unwrap_or_else(|| CreditInfo {
        nickname: String::new(),
        credits: vec![0.0; MAX_ROUNDS as usize],
    }))
}

/// Merge nickname and per-round values into a competitor's record, creating
/// it on first contact. Rounds absent from the map are left untouched.
pub fn merge_credits(
    conn: &Connection,
    competitor: u32,
    nickname: Option<&str>,
    rounds: &BTreeMap<u32, f64>,
) -> rusqlite::Result<()> {
    let mut columns: Vec<&'static str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    if let Some(nickname) = nickname {
        columns.push("nickname");
        values.push(Value::Text(nickname.to_string()));
    }
    for (&round, &credit) in rounds {
        if round >= MAX_ROUNDS {
            warn!("ignoring credit for round {round}: beyond the schema");
            continue;
        }
        columns.push(credit_column(round));
        values.push(Value::Real(credit));
    }
    if columns.is_empty() {
        return Ok(());
    }

    let exists: bool = conn.query_row(
        "select exists(select 1 from credits where competitor=?1)",
        params![competitor],
        |row| row.get(0),
    )?;

    if exists {
        let assignments = columns
            .iter()
            .enumerate()
            .map(|(index, column)| format!("{column}=?{}", index + 1))
            .join(", ");
        values.push(Value::Integer(i64::from(competitor)));
        conn.execute(
            &format!(
                "update credits set {assignments} where competitor=?{}",
                columns.len() + 1
            ),
            params_from_iter(values),
        )?;
    } else {
        values.insert(0, Value::Integer(i64::from(competitor)));
        let names = std::iter::once("competitor").chain(columns).join(", ");
        let placeholders = (1..=values.len()).map(|index| format!("?{index}")).join(", ");
        conn.execute(
            &format!("insert into credits ({names}) values ({placeholders})"),
            params_from_iter(values),
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_util::{create_schema, open_in_memory};

    fn store() -> Connection {
        let conn = open_in_memory().unwrap();
        create_schema(&conn).unwrap();
        conn
    }

    #[test_log::test]
    fn test_defaults_for_unknown_competitor() {
        let conn = store();
        let info = get_credits(&conn, 7).unwrap();
        assert_eq!(info.nickname, "");
        assert_eq!(info.credits, vec![0.0; MAX_ROUNDS as usize]);
    }

    #[test_log::test]
    fn test_merge_leaves_omitted_rounds_untouched() {
        let conn = store();
        merge_credits(
            &conn,
            1,
            Some("test"),
            &BTreeMap::from([(0, 1.0), (4, 2.0), (8, 3.0)]),
        )
        .unwrap();

        let info = get_credits(&conn, 1).unwrap();
        assert_eq!(info.nickname, "test");
        assert_eq!(info.credits[0], 1.0);
        assert_eq!(info.credits[4], 2.0);
        assert_eq!(info.credits[8], 3.0);
        assert_eq!(info.credits[1], 0.0);

        // a second merge touches only what it names
        merge_credits(&conn, 1, None, &BTreeMap::from([(0, 0.0)])).unwrap();
        let info = get_credits(&conn, 1).unwrap();
        assert_eq!(info.credits[0], 0.0);
        assert_eq!(info.credits[4], 2.0);
        assert_eq!(info.nickname, "test");
    }

    #[test_log::test]
    fn test_merge_creates_then_updates() {
        let conn = store();
        merge_credits(&conn, 2, None, &BTreeMap::from([(0, 0.0)])).unwrap();
        assert_eq!(get_credits(&conn, 2).unwrap().credits[0], 0.0);

        merge_credits(&conn, 2, Some("test"), &BTreeMap::from([(0, 1.0)])).unwrap();
        let info = get_credits(&conn, 2).unwrap();
        assert_eq!(info.credits[0], 1.0);
        assert_eq!(info.nickname, "test");
    }

    #[test_log::test]
    fn test_merge_ignores_rounds_beyond_schema() {
        let conn = store();
        merge_credits(&conn, 3, None, &BTreeMap::from([(MAX_ROUNDS, 9.0), (1, 1.5)])).unwrap();
        let info = get_credits(&conn, 3).unwrap();
        assert_eq!(info.credits[1], 1.5);
        assert_eq!(info.credits.len(), MAX_ROUNDS as usize);
    }

    #[test_log::test]
    fn test_empty_merge_is_a_noop() {
        let conn = store();
        merge_credits(&conn, 4, None, &BTreeMap::new()).unwrap();
        let exists: bool = conn
            .query_row(
                "select exists(select 1 from credits where competitor=4)",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(!exists);
    }
}
