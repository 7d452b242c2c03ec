#[macro_use]
extern crate diesel;

use diesel::deserialize::{self, FromSql};
use diesel::pg::Pg;
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use diesel::{r2d2::ConnectionManager, PgConnection};
use serde::{Deserialize, Serialize};

use std::fmt;
use std::io::Write;
use std::str::FromStr;

pub const MSATS_IN_SAT: i64 = 1000;
pub const SATS_IN_BITCOIN: i64 = 100_000_000;

pub type UserId = i32;
pub type PaymentId = i32;
pub type TransactionId = i32;
pub type DbPool = r2d2::Pool<ConnectionManager<PgConnection>>;

/// Lifecycle of a lightning payment. A payment leaves `Open` exactly once.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash, AsExpression, FromSqlRow)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sql_type = "Text"]
pub enum PaymentStatus {
    Open,
    Settled,
    Failed,
}

impl PaymentStatus {
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Open)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            Self::Open => "OPEN",
            Self::Settled => "SETTLED",
            Self::Failed => "FAILED",
        };

        write!(f, "{status}")
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(status: &str) -> Result<PaymentStatus, Self::Err> {
        match status {
            "OPEN" => Ok(PaymentStatus::Open),
            "SETTLED" => Ok(PaymentStatus::Settled),
            "FAILED" => Ok(PaymentStatus::Failed),
            _ => Err(format!("unknown payment status {status}")),
        }
    }
}

/// Direction of funds relative to the custodial user.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash, AsExpression, FromSqlRow)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sql_type = "Text"]
pub enum Direction {
    Inbound,
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = match self {
            Self::Inbound => "INBOUND",
            Self::Outbound => "OUTBOUND",
        };

        write!(f, "{direction}")
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(direction: &str) -> Result<Direction, Self::Err> {
        match direction {
            "INBOUND" => Ok(Direction::Inbound),
            "OUTBOUND" => Ok(Direction::Outbound),
            _ => Err(format!("unknown direction {direction}")),
        }
    }
}

/// Stores an enum as its upper case text form.
macro_rules! text_column {
    ($ty:ty) => {
        impl ToSql<Text, Pg> for $ty {
            fn to_sql<W: Write>(&self, out: &mut Output<W, Pg>) -> serialize::Result {
                out.write_all(self.to_string().as_bytes())?;
                Ok(IsNull::No)
            }
        }

        impl FromSql<Text, Pg> for $ty {
            fn from_sql(bytes: Option<&[u8]>) -> deserialize::Result<Self> {
                let raw = not_none!(bytes);
                let text = std::str::from_utf8(raw)?;
                text.parse::<$ty>().map_err(|err| err.into())
            }
        }
    };
}

text_column!(PaymentStatus);
text_column!(Direction);

/// Converts satoshis into millisatoshis, `None` on overflow.
#[inline]
pub fn sats_to_msats(sats: i64) -> Option<i64> {
    sats.checked_mul(MSATS_IN_SAT)
}

/// Converts millisatoshis into whole satoshis, rounding down.
#[inline]
pub fn msats_to_sats(msats: i64) -> i64 {
    msats / MSATS_IN_SAT
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct LndNodeInfo {
    pub identity_pubkey: String,
    pub alias: String,
    pub uris: Vec<String>,
    pub num_active_channels: u64,
    pub num_pending_channels: u64,
    pub num_peers: u64,
    pub block_height: u64,
    pub synced_to_chain: bool,
    pub testnet: bool,
}
