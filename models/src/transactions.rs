use crate::error::ModelError;
use crate::schema::transactions;
use crate::users::User;

use chrono::{DateTime, Utc};
use core_types::{sats_to_msats, Direction, TransactionId, UserId};
use diesel::prelude::*;
use serde::Serialize;

#[derive(Queryable, Identifiable, Associations, Debug, Clone, Serialize)]
#[belongs_to(User, foreign_key = "uid")]
pub struct Transaction {
    pub id: TransactionId,
    pub uid: UserId,
    pub address: String,
    pub txid: Option<String>,
    pub vout: Option<i32>,
    pub direction: Direction,
    pub amount_sat: Option<i64>,
    pub description: Option<String>,
    pub confirmed_at_block: Option<i64>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone)]
#[table_name = "transactions"]
pub struct InsertableTransaction {
    pub uid: UserId,
    pub address: String,
    pub txid: Option<String>,
    pub vout: Option<i32>,
    pub direction: Direction,
    pub amount_sat: Option<i64>,
    pub description: Option<String>,
}

/// Outcome of matching a transaction output against deposit addresses.
#[derive(Debug, Clone)]
pub enum DepositMatch {
    /// The output was attached to the user's unused deposit row.
    Attached(Transaction),
    /// The address was used before, a new row was recorded for this output.
    Recorded(Transaction),
    /// This (txid, vout) pair is already known.
    Duplicate,
    /// No user owns the address.
    UnknownAddress,
}

impl Transaction {
    pub fn get_by_id_for_user(conn: &PgConnection, uid: UserId, id: TransactionId) -> Result<Self, ModelError> {
        Ok(transactions::dsl::transactions
            .filter(transactions::id.eq(id))
            .filter(transactions::uid.eq(uid))
            .first::<Self>(conn)?)
    }

    pub fn list_for_user(conn: &PgConnection, uid: UserId, limit: i64, offset: i64) -> Result<Vec<Self>, ModelError> {
        Ok(transactions::dsl::transactions
            .filter(transactions::uid.eq(uid))
            .order((transactions::created_at.desc(), transactions::id.desc()))
            .limit(limit)
            .offset(offset)
            .load::<Self>(conn)?)
    }

    /// Latest deposit address of the user that has not received funds yet.
    pub fn unused_deposit_for_user(conn: &PgConnection, uid: UserId) -> Result<Option<Self>, ModelError> {
        Ok(transactions::dsl::transactions
            .filter(transactions::uid.eq(uid))
            .filter(transactions::direction.eq(Direction::Inbound))
            .filter(transactions::txid.is_null())
            .order(transactions::id.desc())
            .first::<Self>(conn)
            .optional()?)
    }

    /// Rows that have been seen on chain but have not reached the confirmation target.
    pub fn unconfirmed(conn: &PgConnection) -> Result<Vec<Self>, ModelError> {
        Ok(transactions::dsl::transactions
            .filter(transactions::txid.is_not_null())
            .filter(transactions::confirmed_at.is_null())
            .order(transactions::id.asc())
            .load::<Self>(conn)?)
    }

    /// Matches one transaction output paying `address` against the deposit rows.
    pub fn record_deposit_output(
        conn: &PgConnection,
        address: &str,
        txid: &str,
        vout: i32,
        amount_sat: i64,
    ) -> Result<DepositMatch, ModelError> {
        if amount_sat < 0 {
            return Err(ModelError::InvalidAmount);
        }

        conn.transaction::<_, ModelError, _>(|| {
            let known = transactions::dsl::transactions
                .filter(transactions::txid.eq(txid))
                .filter(transactions::vout.eq(vout))
                .select(transactions::id)
                .first::<TransactionId>(conn)
                .optional()?;
            if known.is_some() {
                return Ok(DepositMatch::Duplicate);
            }

            let deposits = transactions::dsl::transactions
                .filter(transactions::address.eq(address))
                .filter(transactions::direction.eq(Direction::Inbound))
                .order(transactions::id.asc())
                .for_update()
                .load::<Self>(conn)?;

            let owner = match deposits.first() {
                Some(row) => row.uid,
                None => return Ok(DepositMatch::UnknownAddress),
            };

            let now = Utc::now();
            if let Some(unused) = deposits.iter().find(|row| row.txid.is_none()) {
                let attached = diesel::update(transactions::dsl::transactions.find(unused.id))
                    .set((
                        transactions::txid.eq(Some(txid)),
                        transactions::vout.eq(Some(vout)),
                        transactions::amount_sat.eq(Some(amount_sat)),
                        transactions::updated_at.eq(now),
                    ))
                    .get_result::<Self>(conn)?;
                return Ok(DepositMatch::Attached(attached));
            }

            let reused = InsertableTransaction {
                uid: owner,
                address: address.to_string(),
                txid: Some(txid.to_string()),
                vout: Some(vout),
                direction: Direction::Inbound,
                amount_sat: Some(amount_sat),
                description: None,
            }
            .insert(conn)?;
            Ok(DepositMatch::Recorded(reused))
        })
    }

    /// Marks the row confirmed at `block_height`. Inbound rows are settled and credited in the
    /// same transaction. Returns `None` when the row was already confirmed.
    pub fn confirm(conn: &PgConnection, id: TransactionId, block_height: i64) -> Result<Option<Self>, ModelError> {
        conn.transaction::<_, ModelError, _>(|| {
            let row = transactions::dsl::transactions
                .find(id)
                .for_update()
                .first::<Self>(conn)?;
            if row.confirmed_at.is_some() {
                return Ok(None);
            }

            let now = Utc::now();
            let confirmed = match row.direction {
                Direction::Inbound => {
                    let amount_msat = sats_to_msats(row.amount_sat.unwrap_or(0)).ok_or(ModelError::InvalidAmount)?;
                    let confirmed = diesel::update(transactions::dsl::transactions.find(id))
                        .set((
                            transactions::confirmed_at.eq(Some(now)),
                            transactions::confirmed_at_block.eq(Some(block_height)),
                            transactions::settled_at.eq(Some(now)),
                            transactions::updated_at.eq(now),
                        ))
                        .get_result::<Self>(conn)?;
                    User::credit(conn, row.uid, amount_msat)?;
                    confirmed
                }
                Direction::Outbound => diesel::update(transactions::dsl::transactions.find(id))
                    .set((
                        transactions::confirmed_at.eq(Some(now)),
                        transactions::confirmed_at_block.eq(Some(block_height)),
                        transactions::updated_at.eq(now),
                    ))
                    .get_result::<Self>(conn)?,
            };

            Ok(Some(confirmed))
        })
    }

    /// Debits the user and records a pending withdrawal in one transaction. The row has no txid
    /// until `record_broadcast` attaches one.
    pub fn reserve_withdrawal(
        conn: &PgConnection,
        uid: UserId,
        address: &str,
        amount_sat: i64,
        description: Option<String>,
    ) -> Result<Self, ModelError> {
        let amount_msat = match sats_to_msats(amount_sat) {
            Some(amount) if amount > 0 => amount,
            _ => return Err(ModelError::InvalidAmount),
        };

        conn.transaction::<_, ModelError, _>(|| {
            User::debit(conn, uid, amount_msat)?;
            InsertableTransaction {
                uid,
                address: address.to_string(),
                txid: None,
                vout: None,
                direction: Direction::Outbound,
                amount_sat: Some(amount_sat),
                description,
            }
            .insert(conn)
        })
    }

    /// Attaches the txid of a broadcast withdrawal.
    pub fn record_broadcast(conn: &PgConnection, id: TransactionId, txid: &str) -> Result<Self, ModelError> {
        let now = Utc::now();
        Ok(diesel::update(
            transactions::dsl::transactions
                .find(id)
                .filter(transactions::direction.eq(Direction::Outbound))
                .filter(transactions::txid.is_null()),
        )
        .set((
            transactions::txid.eq(Some(txid)),
            transactions::settled_at.eq(Some(now)),
            transactions::updated_at.eq(now),
        ))
        .get_result::<Self>(conn)?)
    }

    /// Compensates a withdrawal that never left the node: the pending row is removed and the
    /// amount goes back to the user. Returns `false` when there was nothing to refund.
    pub fn refund_withdrawal(conn: &PgConnection, id: TransactionId) -> Result<bool, ModelError> {
        conn.transaction::<_, ModelError, _>(|| {
            let row = transactions::dsl::transactions
                .find(id)
                .for_update()
                .first::<Self>(conn)
                .optional()?;
            let row = match row {
                Some(row) if row.direction == Direction::Outbound && row.txid.is_none() => row,
                _ => return Ok(false),
            };

            let amount_msat = sats_to_msats(row.amount_sat.unwrap_or(0)).ok_or(ModelError::InvalidAmount)?;
            diesel::delete(transactions::dsl::transactions.find(row.id)).execute(conn)?;
            User::credit(conn, row.uid, amount_msat)?;
            Ok(true)
        })
    }
}

impl InsertableTransaction {
    pub fn insert(&self, conn: &PgConnection) -> Result<Transaction, ModelError> {
        Ok(diesel::insert_into(transactions::table)
            .values(self)
            .get_result::<Transaction>(conn)?)
    }

    /// New deposit row waiting for funds on `address`.
    pub fn deposit(uid: UserId, address: String) -> Self {
        Self {
            uid,
            address,
            txid: None,
            vout: None,
            direction: Direction::Inbound,
            amount_sat: None,
            description: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{connection, create_user};

    #[test]
    fn deposit_rows_start_empty() {
        let row = InsertableTransaction::deposit(7, "bcrt1qexample".to_string());
        assert_eq!(row.direction, Direction::Inbound);
        assert!(row.txid.is_none());
        assert!(row.amount_sat.is_none());
    }

    #[test]
    #[ignore]
    fn deposit_output_attaches_then_records_reuse() {
        let conn = connection();
        conn.test_transaction::<_, ModelError, _>(|| {
            let user = create_user(&conn, "deposit@example.com");
            InsertableTransaction::deposit(user.uid, "bcrt1qdeposit".to_string()).insert(&conn)?;

            let first = Transaction::record_deposit_output(&conn, "bcrt1qdeposit", "t1", 0, 1_500)?;
            assert!(matches!(first, DepositMatch::Attached(_)));
            let again = Transaction::record_deposit_output(&conn, "bcrt1qdeposit", "t1", 0, 1_500)?;
            assert!(matches!(again, DepositMatch::Duplicate));
            let reuse = Transaction::record_deposit_output(&conn, "bcrt1qdeposit", "t2", 1, 700)?;
            assert!(matches!(reuse, DepositMatch::Recorded(ref row) if row.uid == user.uid));
            let unknown = Transaction::record_deposit_output(&conn, "bcrt1qnobody", "t3", 0, 10)?;
            assert!(matches!(unknown, DepositMatch::UnknownAddress));
            Ok(())
        });
    }

    #[test]
    #[ignore]
    fn confirmation_credits_inbound_once() {
        let conn = connection();
        conn.test_transaction::<_, ModelError, _>(|| {
            let user = create_user(&conn, "confirm@example.com");
            InsertableTransaction::deposit(user.uid, "bcrt1qconfirm".to_string()).insert(&conn)?;
            let row = match Transaction::record_deposit_output(&conn, "bcrt1qconfirm", "t4", 0, 2_000)? {
                DepositMatch::Attached(row) => row,
                other => panic!("unexpected {:?}", other),
            };

            assert!(Transaction::confirm(&conn, row.id, 101)?.is_some());
            assert!(Transaction::confirm(&conn, row.id, 102)?.is_none());
            assert_eq!(User::get_by_id(&conn, user.uid)?.balance_msat, 2_000_000);
            assert!(Transaction::unconfirmed(&conn)?.iter().all(|tx| tx.id != row.id));
            Ok(())
        });
    }

    #[test]
    #[ignore]
    fn withdrawal_is_reserved_then_broadcast_or_refunded() {
        let conn = connection();
        conn.test_transaction::<_, ModelError, _>(|| {
            let user = create_user(&conn, "withdraw@example.com");
            User::credit(&conn, user.uid, 5_000_000)?;

            let too_much = Transaction::reserve_withdrawal(&conn, user.uid, "bcrt1qout", 6_000, None);
            assert!(matches!(too_much, Err(ModelError::InsufficientFunds)));
            assert_eq!(User::get_by_id(&conn, user.uid)?.balance_msat, 5_000_000);

            let pending = Transaction::reserve_withdrawal(&conn, user.uid, "bcrt1qout", 1_000, None)?;
            assert!(pending.txid.is_none());
            assert_eq!(User::get_by_id(&conn, user.uid)?.balance_msat, 4_000_000);
            assert!(Transaction::unconfirmed(&conn)?.iter().all(|tx| tx.id != pending.id));

            // broadcast failed
            assert!(Transaction::refund_withdrawal(&conn, pending.id)?);
            assert!(!Transaction::refund_withdrawal(&conn, pending.id)?);
            assert_eq!(User::get_by_id(&conn, user.uid)?.balance_msat, 5_000_000);

            let sent = Transaction::reserve_withdrawal(&conn, user.uid, "bcrt1qout", 1_000, None)?;
            let sent = Transaction::record_broadcast(&conn, sent.id, "t5")?;
            assert_eq!(sent.txid.as_deref(), Some("t5"));
            assert!(sent.settled_at.is_some());
            assert!(!Transaction::refund_withdrawal(&conn, sent.id)?);
            assert_eq!(User::get_by_id(&conn, user.uid)?.balance_msat, 4_000_000);
            Ok(())
        });
    }
}
