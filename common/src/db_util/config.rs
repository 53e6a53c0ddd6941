//! The single-row configuration relation.

use crate::{Config, CompetitionState};
use rusqlite::{params, Connection, OptionalExtension};

/// Insert the one configuration row. Called exactly once, at instance creation.
pub fn insert_config(conn: &Connection, config: &Config) -> rusqlite::Result<()> {
    conn.execute(
        "insert into config (id, description, date, n_judges, n_competitors, n_rounds,
         current_round, average, state, uuid, max_vote)
         values (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            config.description,
            config.date,
            config.judges,
            config.competitors,
            config.rounds,
            config.current_round,
            config.mode,
            config.state,
            config.id,
            config.max_vote,
        ],
    )?;
    Ok(())
}

pub fn get_config(conn: &Connection) -> rusqlite::Result<Option<Config>> {
    conn.query_row(
        "select description, date, n_judges, n_competitors, n_rounds, current_round,
         average, state, uuid, max_vote from config limit 1",
        [],
        |row| {
            Ok(Config {
                description: row.get(0)?,
                date: row.get(1)?,
                judges: row.get(2)?,
                competitors: row.get(3)?,
                rounds: row.get(4)?,
                current_round: row.get(5)?,
                mode: row.get(6)?,
                state: row.get(7)?,
                id: row.get(8)?,
                max_vote: row.get(9)?,
            })
        },
    )
    .optional()
}

pub fn set_current_round(conn: &Connection, round: u32) -> rusqlite::Result<()> {
    conn.execute("update config set current_round=?1 where id=1", params![round])?;
    Ok(())
}

pub fn set_round_count(conn: &Connection, rounds: u32) -> rusqlite::Result<()> {
    conn.execute("update config set n_rounds=?1 where id=1", params![rounds])?;
    Ok(())
}

pub fn set_state(conn: &Connection, state: CompetitionState) -> rusqlite::Result<()> {
    conn.execute("update config set state=?1 where id=1", params![state])?;
    Ok(())
}
