//! Local ledger database schema.

pub const LEDGER_DB_NAME: &str = "ledger.db";

pub const LEDGER_DB_SCHEMA_ATOMICS: &str = "
    CREATE TABLE IF NOT EXISTS atomics (
        id TEXT PRIMARY KEY,
        spec_pointer TEXT NOT NULL,
        creator TEXT NOT NULL,
        score INTEGER NOT NULL,
        strike_count INTEGER NOT NULL DEFAULT 0,
        obsolete INTEGER NOT NULL DEFAULT 0,
        registered_at TEXT NOT NULL
    )
";

pub const LEDGER_DB_SCHEMA_ACCOUNTS: &str = "
    CREATE TABLE IF NOT EXISTS accounts (
        address TEXT PRIMARY KEY,
        nonce INTEGER NOT NULL DEFAULT 0,
        balance INTEGER NOT NULL DEFAULT 0,
        allowance INTEGER NOT NULL DEFAULT 0
    )
";

pub const LEDGER_DB_SCHEMA_TRANSACTIONS: &str = "
    CREATE TABLE IF NOT EXISTS transactions (
        tx_hash TEXT PRIMARY KEY,
        account TEXT NOT NULL,
        nonce INTEGER NOT NULL,
        op TEXT NOT NULL,
        atomic_id TEXT,
        ts TEXT NOT NULL,
        UNIQUE(account, nonce),
        FOREIGN KEY(account) REFERENCES accounts(address)
    )
";

pub const LEDGER_DB_SCHEMA_PULSES: &str = "
    CREATE TABLE IF NOT EXISTS pulses (
        tx_hash TEXT PRIMARY KEY,
        atomic_id TEXT NOT NULL,
        score INTEGER NOT NULL,
        certification_hash TEXT NOT NULL,
        ts TEXT NOT NULL,
        UNIQUE(atomic_id, certification_hash),
        FOREIGN KEY(atomic_id) REFERENCES atomics(id),
        FOREIGN KEY(tx_hash) REFERENCES transactions(tx_hash)
    )
";

pub const LEDGER_DB_INDEX_PULSES_ATOMIC: &str =
    "CREATE INDEX IF NOT EXISTS idx_pulses_atomic ON pulses(atomic_id, ts)";

pub fn ledger_schema_statements() -> [&'static str; 5] {
    [
        LEDGER_DB_SCHEMA_ATOMICS,
        LEDGER_DB_SCHEMA_ACCOUNTS,
        LEDGER_DB_SCHEMA_TRANSACTIONS,
        LEDGER_DB_SCHEMA_PULSES,
        LEDGER_DB_INDEX_PULSES_ATOMIC,
    ]
}
