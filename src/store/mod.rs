//! Persistent store: accounts, tracked matches, bets, and the transaction
//! ledger.
//!
//! Every balance mutation happens inside an IMMEDIATE transaction that
//! reads the account row before writing it; that read-modify-write under
//! the database write lock is the row-lock point for money invariants.
//! Placement is the only operation that debits; settlement only ever
//! credits or refunds, so balances cannot go negative through settlement.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, TransactionBehavior};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::models::{
    Account, Bet, BetStatus, BetType, InstanceBet, MatchStatus, MatchType, TrackedMatch,
};

/// Result of a placement attempt; insufficient balance is an expected
/// outcome, not an error.
#[derive(Debug)]
pub enum PlacementOutcome<T> {
    Placed(T),
    InsufficientFunds,
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub user_id: i64,
    pub amount: f64,
    pub kind: String,
    pub reference: String,
    pub balance_after: f64,
    pub created_at: DateTime<Utc>,
}

pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database at {}", db_path))?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT UNIQUE NOT NULL,
                balance REAL DEFAULT 0.0,
                exposure REAL DEFAULT 0.0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS matches (
                match_id TEXT PRIMARY KEY,
                external_id TEXT NOT NULL,
                sport TEXT DEFAULT 'cricket',
                home_team TEXT NOT NULL,
                away_team TEXT NOT NULL,
                match_type TEXT NOT NULL,
                status TEXT DEFAULT 'UPCOMING'
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS instance_bets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                match_id TEXT NOT NULL,
                market_id TEXT NOT NULL,
                outcome_name TEXT NOT NULL,
                stake REAL NOT NULL,
                potential_profit REAL NOT NULL,
                status TEXT DEFAULT 'OPEN',
                winning_outcome TEXT,
                created_at TEXT NOT NULL,
                settled_at TEXT,
                FOREIGN KEY (user_id) REFERENCES accounts(id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS bets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                match_id TEXT NOT NULL,
                market_id TEXT NOT NULL,
                runner_id TEXT NOT NULL,
                runner_name TEXT NOT NULL,
                bet_type TEXT NOT NULL,
                odds REAL NOT NULL,
                stake REAL NOT NULL,
                potential_profit REAL NOT NULL,
                status TEXT DEFAULT 'OPEN',
                created_at TEXT NOT NULL,
                settled_at TEXT,
                FOREIGN KEY (user_id) REFERENCES accounts(id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                amount REAL NOT NULL,
                kind TEXT NOT NULL,
                reference TEXT NOT NULL,
                balance_after REAL NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES accounts(id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_instance_bets_market ON instance_bets(market_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_instance_bets_status ON instance_bets(status)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_bets_match ON bets(match_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_transactions_user ON transactions(user_id)",
            [],
        )?;

        Ok(())
    }

    // ===== Accounts =====

    pub async fn get_or_create_account(&self, username: &str) -> Result<Account> {
        let conn = self.conn.lock().await;
        let now = Utc::now().to_rfc3339();

        let existing = conn.query_row(
            "SELECT id, username, balance, exposure, created_at, updated_at
             FROM accounts WHERE username = ?",
            [username],
            map_account,
        );
        match existing {
            Ok(account) => Ok(account),
            Err(_) => {
                conn.execute(
                    "INSERT INTO accounts (username, created_at, updated_at) VALUES (?, ?, ?)",
                    params![username, &now, &now],
                )?;
                let id = conn.last_insert_rowid();
                Ok(Account {
                    id,
                    username: username.to_string(),
                    balance: 0.0,
                    exposure: 0.0,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                })
            }
        }
    }

    pub async fn account(&self, user_id: i64) -> Result<Account> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, username, balance, exposure, created_at, updated_at
             FROM accounts WHERE id = ?",
            [user_id],
            map_account,
        )
        .with_context(|| format!("account {} not found", user_id))
    }

    pub async fn deposit(&self, user_id: i64, amount: f64) -> Result<f64> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now().to_rfc3339();

        let balance: f64 = tx
            .query_row("SELECT balance FROM accounts WHERE id = ?", [user_id], |r| {
                r.get(0)
            })
            .with_context(|| format!("account {} not found", user_id))?;
        let new_balance = balance + amount;
        tx.execute(
            "UPDATE accounts SET balance = ?, updated_at = ? WHERE id = ?",
            params![new_balance, &now, user_id],
        )?;
        tx.execute(
            "INSERT INTO transactions (user_id, amount, kind, reference, balance_after, created_at)
             VALUES (?, ?, 'deposit', '', ?, ?)",
            params![user_id, amount, new_balance, &now],
        )?;
        tx.commit()?;
        Ok(new_balance)
    }

    // ===== Matches =====

    pub async fn upsert_match(&self, m: &TrackedMatch) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO matches (match_id, external_id, sport, home_team, away_team, match_type, status)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(match_id) DO UPDATE SET
                external_id = excluded.external_id,
                status = excluded.status",
            params![
                m.match_id,
                m.external_id,
                m.sport,
                m.home_team,
                m.away_team,
                format!("{:?}", m.match_type).to_lowercase(),
                m.status.as_str(),
            ],
        )?;
        Ok(())
    }

    pub async fn set_match_status(&self, match_id: &str, status: MatchStatus) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE matches SET status = ? WHERE match_id = ?",
            params![status.as_str(), match_id],
        )?;
        Ok(())
    }

    /// Matches still worth polling: everything not FINISHED.
    pub async fn tracked_matches(&self) -> Result<Vec<TrackedMatch>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT match_id, external_id, sport, home_team, away_team, match_type, status
             FROM matches WHERE status != 'FINISHED'",
        )?;
        let rows = stmt
            .query_map([], map_tracked_match)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ===== Instance bets =====

    pub async fn place_instance_bet(
        &self,
        user_id: i64,
        match_id: &str,
        market_id: &str,
        outcome_name: &str,
        stake: f64,
        potential_profit: f64,
    ) -> Result<PlacementOutcome<InstanceBet>> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now();
        let now_text = now.to_rfc3339();

        let (balance, exposure): (f64, f64) = tx
            .query_row(
                "SELECT balance, exposure FROM accounts WHERE id = ?",
                [user_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .with_context(|| format!("account {} not found", user_id))?;
        if balance < stake {
            return Ok(PlacementOutcome::InsufficientFunds);
        }

        let new_balance = balance - stake;
        tx.execute(
            "UPDATE accounts SET balance = ?, exposure = ?, updated_at = ? WHERE id = ?",
            params![new_balance, exposure + stake, &now_text, user_id],
        )?;
        tx.execute(
            "INSERT INTO instance_bets
                (user_id, match_id, market_id, outcome_name, stake, potential_profit, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, 'OPEN', ?)",
            params![
                user_id,
                match_id,
                market_id,
                outcome_name,
                stake,
                potential_profit,
                &now_text
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO transactions (user_id, amount, kind, reference, balance_after, created_at)
             VALUES (?, ?, 'instance_stake', ?, ?, ?)",
            params![user_id, -stake, market_id, new_balance, &now_text],
        )?;
        tx.commit()?;

        Ok(PlacementOutcome::Placed(InstanceBet {
            id,
            user_id,
            match_id: match_id.to_string(),
            market_id: market_id.to_string(),
            outcome_name: outcome_name.to_string(),
            stake,
            potential_profit,
            status: BetStatus::Open,
            winning_outcome: None,
            created_at: now,
            settled_at: None,
        }))
    }

    pub async fn open_instance_bets(&self, market_id: &str) -> Result<Vec<InstanceBet>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, match_id, market_id, outcome_name, stake, potential_profit,
                    status, winning_outcome, created_at, settled_at
             FROM instance_bets WHERE market_id = ? AND status = 'OPEN'",
        )?;
        let rows = stmt
            .query_map([market_id], map_instance_bet)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Settle one instance bet atomically. Returns the bettor's new balance,
    /// or None if the bet was no longer OPEN (already settled elsewhere).
    pub async fn settle_instance_bet(
        &self,
        bet_id: i64,
        status: BetStatus,
        payout: f64,
        winning_outcome: Option<&str>,
    ) -> Result<Option<(i64, f64)>> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now_text = Utc::now().to_rfc3339();

        let row: Option<(i64, f64, String)> = tx
            .query_row(
                "SELECT user_id, stake, status FROM instance_bets WHERE id = ?",
                [bet_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .map(Some)
            .or_else(ignore_missing)?;
        let Some((user_id, stake, bet_status)) = row else {
            return Ok(None);
        };
        if bet_status != "OPEN" {
            return Ok(None);
        }

        tx.execute(
            "UPDATE instance_bets SET status = ?, winning_outcome = ?, settled_at = ? WHERE id = ?",
            params![status.as_str(), winning_outcome, &now_text, bet_id],
        )?;

        let (balance, exposure): (f64, f64) = tx.query_row(
            "SELECT balance, exposure FROM accounts WHERE id = ?",
            [user_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        let new_balance = balance + payout;
        tx.execute(
            "UPDATE accounts SET balance = ?, exposure = ?, updated_at = ? WHERE id = ?",
            params![
                new_balance,
                (exposure - stake).max(0.0),
                &now_text,
                user_id
            ],
        )?;
        tx.execute(
            "INSERT INTO transactions (user_id, amount, kind, reference, balance_after, created_at)
             VALUES (?, ?, 'instance_settlement', ?, ?, ?)",
            params![user_id, payout, bet_id.to_string(), new_balance, &now_text],
        )?;
        tx.commit()?;
        Ok(Some((user_id, new_balance)))
    }

    // ===== Match-winner bets =====

    pub async fn place_bet(
        &self,
        user_id: i64,
        match_id: &str,
        market_id: &str,
        runner_id: &str,
        runner_name: &str,
        bet_type: BetType,
        odds: f64,
        stake: f64,
    ) -> Result<PlacementOutcome<Bet>> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now();
        let now_text = now.to_rfc3339();

        // BACK risks the stake; LAY risks stake plus liability.
        let liability = stake * (odds - 1.0);
        let (debit, potential_profit) = match bet_type {
            BetType::Back => (stake, stake * (odds - 1.0)),
            BetType::Lay => (stake + liability, stake),
        };

        let (balance, exposure): (f64, f64) = tx
            .query_row(
                "SELECT balance, exposure FROM accounts WHERE id = ?",
                [user_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .with_context(|| format!("account {} not found", user_id))?;
        if balance < debit {
            return Ok(PlacementOutcome::InsufficientFunds);
        }

        let new_balance = balance - debit;
        tx.execute(
            "UPDATE accounts SET balance = ?, exposure = ?, updated_at = ? WHERE id = ?",
            params![new_balance, exposure + debit, &now_text, user_id],
        )?;
        tx.execute(
            "INSERT INTO bets
                (user_id, match_id, market_id, runner_id, runner_name, bet_type, odds, stake,
                 potential_profit, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'OPEN', ?)",
            params![
                user_id,
                match_id,
                market_id,
                runner_id,
                runner_name,
                bet_type.as_str(),
                odds,
                stake,
                potential_profit,
                &now_text
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO transactions (user_id, amount, kind, reference, balance_after, created_at)
             VALUES (?, ?, 'bet_stake', ?, ?, ?)",
            params![user_id, -debit, market_id, new_balance, &now_text],
        )?;
        tx.commit()?;

        Ok(PlacementOutcome::Placed(Bet {
            id,
            user_id,
            match_id: match_id.to_string(),
            market_id: market_id.to_string(),
            runner_id: runner_id.to_string(),
            runner_name: runner_name.to_string(),
            bet_type,
            odds,
            stake,
            potential_profit,
            status: BetStatus::Open,
            created_at: now,
            settled_at: None,
        }))
    }

    pub async fn open_bets_for_match(&self, match_id: &str) -> Result<Vec<Bet>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, match_id, market_id, runner_id, runner_name, bet_type, odds,
                    stake, potential_profit, status, created_at, settled_at
             FROM bets WHERE match_id = ? AND status = 'OPEN'",
        )?;
        let rows = stmt
            .query_map([match_id], map_bet)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Matches that still have open match-winner bets to settle.
    pub async fn matches_with_open_bets(&self) -> Result<Vec<TrackedMatch>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT m.match_id, m.external_id, m.sport, m.home_team, m.away_team,
                    m.match_type, m.status
             FROM matches m JOIN bets b ON b.match_id = m.match_id
             WHERE b.status = 'OPEN'",
        )?;
        let rows = stmt
            .query_map([], map_tracked_match)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Settle one match-winner bet atomically; None if no longer OPEN.
    pub async fn settle_bet(
        &self,
        bet_id: i64,
        status: BetStatus,
        payout: f64,
    ) -> Result<Option<(i64, f64)>> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now_text = Utc::now().to_rfc3339();

        let row: Option<(i64, f64, f64, String, String)> = tx
            .query_row(
                "SELECT user_id, stake, odds, bet_type, status FROM bets WHERE id = ?",
                [bet_id],
                |r| {
                    Ok((
                        r.get(0)?,
                        r.get(1)?,
                        r.get(2)?,
                        r.get(3)?,
                        r.get(4)?,
                    ))
                },
            )
            .map(Some)
            .or_else(ignore_missing)?;
        let Some((user_id, stake, odds, bet_type, bet_status)) = row else {
            return Ok(None);
        };
        if bet_status != "OPEN" {
            return Ok(None);
        }

        tx.execute(
            "UPDATE bets SET status = ?, settled_at = ? WHERE id = ?",
            params![status.as_str(), &now_text, bet_id],
        )?;

        // Release what placement reserved.
        let reserved = match bet_type.as_str() {
            "LAY" => stake + stake * (odds - 1.0),
            _ => stake,
        };
        let (balance, exposure): (f64, f64) = tx.query_row(
            "SELECT balance, exposure FROM accounts WHERE id = ?",
            [user_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        let new_balance = balance + payout;
        tx.execute(
            "UPDATE accounts SET balance = ?, exposure = ?, updated_at = ? WHERE id = ?",
            params![
                new_balance,
                (exposure - reserved).max(0.0),
                &now_text,
                user_id
            ],
        )?;
        tx.execute(
            "INSERT INTO transactions (user_id, amount, kind, reference, balance_after, created_at)
             VALUES (?, ?, 'bet_settlement', ?, ?, ?)",
            params![user_id, payout, bet_id.to_string(), new_balance, &now_text],
        )?;
        tx.commit()?;
        Ok(Some((user_id, new_balance)))
    }

    // ===== Ledger =====

    pub async fn ledger_for_user(&self, user_id: i64) -> Result<Vec<LedgerEntry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, amount, kind, reference, balance_after, created_at
             FROM transactions WHERE user_id = ? ORDER BY id",
        )?;
        let rows = stmt
            .query_map([user_id], |row| {
                Ok(LedgerEntry {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    amount: row.get(2)?,
                    kind: row.get(3)?,
                    reference: row.get(4)?,
                    balance_after: row.get(5)?,
                    created_at: parse_ts(row.get::<_, String>(6)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn ignore_missing<T>(e: rusqlite::Error) -> Result<Option<T>, rusqlite::Error> {
    match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other),
    }
}

fn parse_ts(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn map_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        username: row.get(1)?,
        balance: row.get(2)?,
        exposure: row.get(3)?,
        created_at: parse_ts(row.get::<_, String>(4)?),
        updated_at: parse_ts(row.get::<_, String>(5)?),
    })
}

fn map_tracked_match(row: &rusqlite::Row<'_>) -> rusqlite::Result<TrackedMatch> {
    let match_type: String = row.get(5)?;
    let status: String = row.get(6)?;
    Ok(TrackedMatch {
        match_id: row.get(0)?,
        external_id: row.get(1)?,
        sport: row.get(2)?,
        home_team: row.get(3)?,
        away_team: row.get(4)?,
        match_type: MatchType::from_str(&match_type),
        status: match status.as_str() {
            "LIVE" => MatchStatus::Live,
            "FINISHED" => MatchStatus::Finished,
            _ => MatchStatus::Upcoming,
        },
    })
}

fn map_instance_bet(row: &rusqlite::Row<'_>) -> rusqlite::Result<InstanceBet> {
    let status: String = row.get(7)?;
    Ok(InstanceBet {
        id: row.get(0)?,
        user_id: row.get(1)?,
        match_id: row.get(2)?,
        market_id: row.get(3)?,
        outcome_name: row.get(4)?,
        stake: row.get(5)?,
        potential_profit: row.get(6)?,
        status: BetStatus::from_str(&status).unwrap_or(BetStatus::Open),
        winning_outcome: row.get(8)?,
        created_at: parse_ts(row.get::<_, String>(9)?),
        settled_at: row
            .get::<_, Option<String>>(10)?
            .map(|s| parse_ts(s)),
    })
}

fn map_bet(row: &rusqlite::Row<'_>) -> rusqlite::Result<Bet> {
    let bet_type: String = row.get(6)?;
    let status: String = row.get(10)?;
    Ok(Bet {
        id: row.get(0)?,
        user_id: row.get(1)?,
        match_id: row.get(2)?,
        market_id: row.get(3)?,
        runner_id: row.get(4)?,
        runner_name: row.get(5)?,
        bet_type: BetType::from_str(&bet_type).unwrap_or(BetType::Back),
        odds: row.get(7)?,
        stake: row.get(8)?,
        potential_profit: row.get(9)?,
        status: BetStatus::from_str(&status).unwrap_or(BetStatus::Open),
        created_at: parse_ts(row.get::<_, String>(11)?),
        settled_at: row
            .get::<_, Option<String>>(12)?
            .map(|s| parse_ts(s)),
    })
}
