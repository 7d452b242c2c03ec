pub mod api_keys;
pub mod health;
pub mod onchain;
pub mod payments;
pub mod two_factor;
pub mod users;
