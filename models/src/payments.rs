use crate::error::ModelError;
use crate::schema::payments;
use crate::users::User;

use chrono::{DateTime, Utc};
use core_types::{Direction, PaymentId, PaymentStatus, UserId};
use diesel::prelude::*;
use serde::Serialize;

#[derive(Queryable, Identifiable, Associations, Debug, Clone, Serialize)]
#[belongs_to(User, foreign_key = "uid")]
pub struct Payment {
    pub id: PaymentId,
    pub uid: UserId,
    pub payment_request: String,
    pub payment_hash: String,
    pub preimage: Option<String>,
    pub status: PaymentStatus,
    pub direction: Direction,
    pub amount_msat: i64,
    /// While an outbound payment is open this holds the reserved routing fee, afterwards the fee paid.
    pub fee_msat: i64,
    pub memo: Option<String>,
    pub description: Option<String>,
    pub callback_url: Option<String>,
    pub expiry_secs: i64,
    pub settled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Node settle index of a settled inbound invoice.
    pub settle_index: Option<i64>,
}

#[derive(Insertable, Debug, Clone)]
#[table_name = "payments"]
pub struct InsertablePayment {
    pub uid: UserId,
    pub payment_request: String,
    pub payment_hash: String,
    pub preimage: Option<String>,
    pub status: PaymentStatus,
    pub direction: Direction,
    pub amount_msat: i64,
    pub fee_msat: i64,
    pub memo: Option<String>,
    pub description: Option<String>,
    pub callback_url: Option<String>,
    pub expiry_secs: i64,
}

/// What happened to a payment when a final state was applied to it.
#[derive(Debug, Clone)]
pub enum Transition {
    /// The payment moved out of `Open` with this call.
    Applied(Payment),
    /// The payment was already final, nothing changed.
    AlreadyFinal(Payment),
}

impl Transition {
    pub fn payment(&self) -> &Payment {
        match self {
            Transition::Applied(payment) | Transition::AlreadyFinal(payment) => payment,
        }
    }

    pub fn applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }
}

impl Payment {
    pub fn get_by_id_for_user(conn: &PgConnection, uid: UserId, id: PaymentId) -> Result<Self, ModelError> {
        Ok(payments::dsl::payments
            .filter(payments::id.eq(id))
            .filter(payments::uid.eq(uid))
            .first::<Self>(conn)?)
    }

    /// Outbound payments still waiting for a final answer from the node, oldest first.
    pub fn open_outbound(conn: &PgConnection) -> Result<Vec<Self>, ModelError> {
        Ok(payments::dsl::payments
            .filter(payments::status.eq(PaymentStatus::Open))
            .filter(payments::direction.eq(Direction::Outbound))
            .order(payments::id.asc())
            .load::<Self>(conn)?)
    }

    /// Highest node settle index recorded so far, zero when nothing was settled yet.
    pub fn last_settle_index(conn: &PgConnection) -> Result<u64, ModelError> {
        let last = payments::dsl::payments
            .select(diesel::dsl::max(payments::settle_index))
            .first::<Option<i64>>(conn)?;
        Ok(last.and_then(|index| u64::try_from(index).ok()).unwrap_or(0))
    }

    pub fn list_for_user(conn: &PgConnection, uid: UserId, limit: i64, offset: i64) -> Result<Vec<Self>, ModelError> {
        Ok(payments::dsl::payments
            .filter(payments::uid.eq(uid))
            .order((payments::created_at.desc(), payments::id.desc()))
            .limit(limit)
            .offset(offset)
            .load::<Self>(conn)?)
    }

    fn lock_by_hash(conn: &PgConnection, payment_hash: &str) -> Result<Self, ModelError> {
        Ok(payments::dsl::payments
            .filter(payments::payment_hash.eq(payment_hash))
            .for_update()
            .first::<Self>(conn)?)
    }

    fn lock_by_id(conn: &PgConnection, id: PaymentId) -> Result<Self, ModelError> {
        Ok(payments::dsl::payments.find(id).for_update().first::<Self>(conn)?)
    }

    /// Applies a settlement notification for an inbound invoice. The row is locked for the
    /// duration of the transaction, so the status flip and the balance credit happen together
    /// and a repeated notification changes nothing.
    pub fn settle_inbound(
        conn: &PgConnection,
        payment_hash: &str,
        preimage: Option<&str>,
        amount_paid_msat: i64,
        settle_index: Option<i64>,
    ) -> Result<Transition, ModelError> {
        conn.transaction::<_, ModelError, _>(|| {
            let payment = Self::lock_by_hash(conn, payment_hash)?;
            if payment.status != PaymentStatus::Open || payment.direction != Direction::Inbound {
                return Ok(Transition::AlreadyFinal(payment));
            }

            // amountless invoices are credited with whatever the payer sent
            let credited = if amount_paid_msat > 0 {
                amount_paid_msat
            } else {
                payment.amount_msat
            };
            let now = Utc::now();
            let settled = diesel::update(payments::dsl::payments.find(payment.id))
                .set((
                    payments::status.eq(PaymentStatus::Settled),
                    payments::preimage.eq(preimage),
                    payments::amount_msat.eq(credited),
                    payments::settle_index.eq(settle_index),
                    payments::settled_at.eq(Some(now)),
                    payments::updated_at.eq(now),
                ))
                .get_result::<Self>(conn)?;
            User::credit(conn, settled.uid, credited)?;

            Ok(Transition::Applied(settled))
        })
    }

    /// Marks an open payment as failed without touching balances.
    pub fn fail_open_by_hash(conn: &PgConnection, payment_hash: &str) -> Result<Transition, ModelError> {
        conn.transaction::<_, ModelError, _>(|| {
            let payment = Self::lock_by_hash(conn, payment_hash)?;
            if payment.status != PaymentStatus::Open {
                return Ok(Transition::AlreadyFinal(payment));
            }

            let failed = Self::set_status(conn, payment.id, PaymentStatus::Failed)?;
            Ok(Transition::Applied(failed))
        })
    }

    fn set_status(conn: &PgConnection, id: PaymentId, status: PaymentStatus) -> Result<Self, ModelError> {
        Ok(diesel::update(payments::dsl::payments.find(id))
            .set((payments::status.eq(status), payments::updated_at.eq(Utc::now())))
            .get_result::<Self>(conn)?)
    }

    /// Completes an outbound payment and refunds the part of the reserved fee that was not used.
    pub fn complete_outbound(
        conn: &PgConnection,
        id: PaymentId,
        preimage: &str,
        fee_paid_msat: i64,
    ) -> Result<Transition, ModelError> {
        conn.transaction::<_, ModelError, _>(|| {
            let payment = Self::lock_by_id(conn, id)?;
            if payment.status != PaymentStatus::Open {
                return Ok(Transition::AlreadyFinal(payment));
            }

            let fee_paid_msat = fee_paid_msat.max(0);
            let refund = payment.fee_msat - fee_paid_msat;
            let now = Utc::now();
            let settled = diesel::update(payments::dsl::payments.find(payment.id))
                .set((
                    payments::status.eq(PaymentStatus::Settled),
                    payments::preimage.eq(Some(preimage)),
                    payments::fee_msat.eq(fee_paid_msat),
                    payments::settled_at.eq(Some(now)),
                    payments::updated_at.eq(now),
                ))
                .get_result::<Self>(conn)?;
            if refund > 0 {
                User::credit(conn, settled.uid, refund)?;
            }

            Ok(Transition::Applied(settled))
        })
    }

    /// Compensates a failed outbound payment: the row becomes FAILED and the reserved amount
    /// plus fee goes back to the user.
    pub fn fail_outbound_and_refund(conn: &PgConnection, id: PaymentId) -> Result<Transition, ModelError> {
        conn.transaction::<_, ModelError, _>(|| {
            let payment = Self::lock_by_id(conn, id)?;
            if payment.status != PaymentStatus::Open {
                return Ok(Transition::AlreadyFinal(payment));
            }

            let failed = Self::set_status(conn, payment.id, PaymentStatus::Failed)?;
            User::credit(conn, failed.uid, failed.amount_msat + failed.fee_msat)?;
            Ok(Transition::Applied(failed))
        })
    }
}

impl InsertablePayment {
    pub fn insert(&self, conn: &PgConnection) -> Result<Payment, ModelError> {
        Ok(diesel::insert_into(payments::table).values(self).get_result::<Payment>(conn)?)
    }

    /// Debits `amount_msat + fee_msat` and records the open outbound payment in one transaction.
    pub fn reserve_outbound(&self, conn: &PgConnection) -> Result<Payment, ModelError> {
        conn.transaction::<_, ModelError, _>(|| {
            let reserved = self
                .amount_msat
                .checked_add(self.fee_msat)
                .ok_or(ModelError::InvalidAmount)?;
            User::debit(conn, self.uid, reserved)?;
            self.insert(conn)
        })
    }
}
