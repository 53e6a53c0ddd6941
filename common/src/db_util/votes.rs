//! The vote ledger: one row per (round, competitor), one write-once column
//! per judge slot.

use crate::MAX_JUDGE_SLOTS;
use itertools::Itertools;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;

/// Column name for a judge slot. Slots are 1-based; anything outside the
/// schema range here is a caller bug, not a runtime condition.
fn vote_column(slot: u32) -> &'static str {
    assert!(
        (1..=MAX_JUDGE_SLOTS).contains(&slot),
        "judge slot {slot} outside schema range"
    );
    match slot {
        1 => "vote1",
        2 => "vote2",
        3 => "vote3",
        4 => "vote4",
        5 => "vote5",
        _ => "vote6",
    }
}

/// Write a vote into its slot, creating the (round, competitor) record on
/// first contact. Returns `false` without writing when the slot already
/// holds a value; populated slots are immutable until explicitly cleared.
pub fn record_vote(
    conn: &Connection,
    round: u32,
    competitor: u32,
    slot: u32,
    value: f64,
) -> rusqlite::Result<bool> {
    let column = vote_column(slot);
    let existing: Option<(i64, Option<f64>)> = conn
        .query_row(
            &format!("select id, {column} from votes where round=?1 and competitor=?2"),
            params![round, competitor],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match existing {
        None => {
            conn.execute(
                &format!("insert into votes (round, competitor, {column}) values (?1, ?2, ?3)"),
                params![round, competitor, value],
            )?;
            Ok(true)
        }
        Some((_, Some(_))) => Ok(false),
        Some((row_id, None)) => {
            conn.execute(
                &format!("update votes set {column}=?1 where id=?2"),
                params![value, row_id],
            )?;
            Ok(true)
        }
    }
}

/// All judge slots for one competitor, indexed `[round][slot - 1]`. Rounds
/// without a ledger record come back as all-empty.
pub fn votes_for_competitor(
    conn: &Connection,
    competitor: u32,
    n_rounds: u32,
    n_judges: u32,
) -> rusqlite::Result<Vec<Vec<Option<f64>>>> {
    debug_assert!(n_judges >= 1 && n_judges <= MAX_JUDGE_SLOTS);
    let mut rounds = vec![vec![None; n_judges as usize]; n_rounds as usize];

    let mut stmt = conn.prepare(
        "select round, vote1, vote2, vote3, vote4, vote5, vote6
         from votes where competitor=?1 and round<?2",
    )?;
    let rows = stmt.query_map(params![competitor, n_rounds], |row| {
        let round: u32 = row.get(0)?;
        let mut slots = Vec::with_capacity(n_judges as usize);
        for index in 0..n_judges as usize {
            slots.push(row.get::<_, Option<f64>>(1 + index)?);
        }
        Ok((round, slots))
    })?;
    for row in rows {
        let (round, slots) = row?;
        rounds[round as usize] = slots;
    }
    Ok(rounds)
}

/// Null out the given slots for one (round, competitor) record. This is the
/// only path that un-sets a populated slot.
pub fn clear_slots(
    conn: &Connection,
    round: u32,
    competitor: u32,
    slots: &BTreeSet<u32>,
) -> rusqlite::Result<()> {
    if slots.is_empty() {
        return Ok(());
    }
    let assignments = slots
        .iter()
        .map(|slot| format!("{}=null", vote_column(*slot)))
        .join(", ");
    conn.execute(
        &format!("update votes set {assignments} where round=?1 and competitor=?2"),
        params![round, competitor],
    )?;
    Ok(())
}

/// Drop the whole (round, competitor) record.
pub fn delete_record(conn: &Connection, round: u32, competitor: u32) -> rusqlite::Result<()> {
    conn.execute(
        "delete from votes where round=?1 and competitor=?2",
        params![round, competitor],
    )?;
    Ok(())
}

/// Competitors whose record for `round` has every judge slot set.
pub fn count_fully_judged(conn: &Connection, round: u32, n_judges: u32) -> rusqlite::Result<u32> {
    let filter = (1..=n_judges)
        .map(|slot| format!("{} is not null", vote_column(slot)))
        .join(" and ");
    conn.query_row(
        &format!("select count(*) from votes where round=?1 and {filter}"),
        params![round],
        |row| row.get(0),
    )
}

/// Competitors with at least one vote for `round`.
pub fn count_with_votes(conn: &Connection, round: u32, n_judges: u32) -> rusqlite::Result<u32> {
    let filter = (1..=n_judges)
        .map(|slot| format!("{} is not null", vote_column(slot)))
        .join(" or ");
    conn.query_row(
        &format!("select count(*) from votes where round=?1 and ({filter})"),
        params![round],
        |row| row.get(0),
    )
}

/// The sorted competitors with at least one vote but not all of them for
/// `round`: the "still waiting on a judge" list.
pub fn partially_judged(
    conn: &Connection,
    round: u32,
    n_judges: u32,
) -> rusqlite::Result<Vec<u32>> {
    let any_missing = (1..=n_judges)
        .map(|slot| format!("{} is null", vote_column(slot)))
        .join(" or ");
    let any_set = (1..=n_judges)
        .map(|slot| format!("{} is not null", vote_column(slot)))
        .join(" or ");
    let mut stmt = conn.prepare(&format!(
        "select competitor from votes
         where round=?1 and ({any_missing}) and ({any_set})
         order by competitor asc"
    ))?;
    let rows = stmt.query_map(params![round], |row| row.get(0))?;
    rows.collect()
}

/// Whether the ledger holds any record for `round`. Once true it stays true
/// through slot clears; only a record delete can reverse it.
pub fn round_has_votes(conn: &Connection, round: u32) -> rusqlite::Result<bool> {
    conn.query_row(
        "select exists(select 1 from votes where round=?1)",
        params![round],
        |row| row.get(0),
    )
}

/// Sorted distinct competitors appearing anywhere in the ledger.
pub fn competitors_with_votes(conn: &Connection) -> rusqlite::Result<Vec<u32>> {
    let mut stmt =
        conn.prepare("select distinct competitor from votes order by competitor asc")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_util::{create_schema, open_in_memory};

    fn ledger() -> Connection {
        let conn = open_in_memory().unwrap();
        create_schema(&conn).unwrap();
        conn
    }

    #[test_log::test]
    fn test_record_vote_once_per_slot() {
        let conn = ledger();
        assert!(record_vote(&conn, 0, 1, 1, 6.5).unwrap());
        // same slot again, any value
        assert!(!record_vote(&conn, 0, 1, 1, 9.0).unwrap());
        // other slots on the same record still fill
        assert!(record_vote(&conn, 0, 1, 2, 7.0).unwrap());

        let votes = votes_for_competitor(&conn, 1, 1, 6).unwrap();
        assert_eq!(votes[0][0], Some(6.5));
        assert_eq!(votes[0][1], Some(7.0));
        assert_eq!(votes[0][2], None);
    }

    #[test_log::test]
    fn test_votes_for_competitor_fills_missing_rounds() {
        let conn = ledger();
        record_vote(&conn, 2, 4, 3, 5.0).unwrap();
        let votes = votes_for_competitor(&conn, 4, 3, 6).unwrap();
        assert_eq!(votes[0], vec![None; 6]);
        assert_eq!(votes[1], vec![None; 6]);
        assert_eq!(votes[2][2], Some(5.0));
    }

    #[test_log::test]
    fn test_clear_slots_then_rerecord() {
        let conn = ledger();
        record_vote(&conn, 0, 1, 1, 6.5).unwrap();
        record_vote(&conn, 0, 1, 2, 7.5).unwrap();

        clear_slots(&conn, 0, 1, &BTreeSet::from([1])).unwrap();
        let votes = votes_for_competitor(&conn, 1, 1, 6).unwrap();
        assert_eq!(votes[0][0], None);
        assert_eq!(votes[0][1], Some(7.5));

        // a cleared slot accepts a fresh vote
        assert!(record_vote(&conn, 0, 1, 1, 8.0).unwrap());
    }

    #[test_log::test]
    fn test_round_progress_counts() {
        let conn = ledger();
        let n_judges = 2;
        // competitor 1 fully judged, competitor 2 partial, competitor 3 untouched
        record_vote(&conn, 0, 1, 1, 5.0).unwrap();
        record_vote(&conn, 0, 1, 2, 6.0).unwrap();
        record_vote(&conn, 0, 2, 1, 7.0).unwrap();

        assert_eq!(count_fully_judged(&conn, 0, n_judges).unwrap(), 1);
        assert_eq!(count_with_votes(&conn, 0, n_judges).unwrap(), 2);
        assert_eq!(partially_judged(&conn, 0, n_judges).unwrap(), vec![2]);
        assert_eq!(competitors_with_votes(&conn).unwrap(), vec![1, 2]);

        // a different round is untouched
        assert_eq!(count_with_votes(&conn, 1, n_judges).unwrap(), 0);
    }

    #[test_log::test]
    fn test_round_has_votes_survives_clearing() {
        let conn = ledger();
        assert!(!round_has_votes(&conn, 0).unwrap());
        record_vote(&conn, 0, 1, 1, 5.0).unwrap();
        assert!(round_has_votes(&conn, 0).unwrap());

        // clearing the slot leaves the record in place
        clear_slots(&conn, 0, 1, &BTreeSet::from([1])).unwrap();
        assert!(round_has_votes(&conn, 0).unwrap());

        // deleting the record reverses it
        delete_record(&conn, 0, 1).unwrap();
        assert!(!round_has_votes(&conn, 0).unwrap());
    }
}
