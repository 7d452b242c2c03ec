pub mod config;
pub mod shutdown;
pub mod xlogging;
pub mod xzmq;

pub mod time {
    use std::time::SystemTime;

    pub fn time_now() -> u64 {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|duration| duration.as_millis() as u64)
            .unwrap_or(0)
    }

    pub fn time_now_secs() -> i64 {
        (time_now() / 1000) as i64
    }
}
