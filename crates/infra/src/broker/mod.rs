//! Broker transports.

pub mod redis_streams;

pub use redis_streams::{
    DEFAULT_CONSUMER_GROUP, DEFAULT_JOBS_STREAM, DEFAULT_STATUS_STREAM, RedisStreamsBus,
    RedisStreamsError,
};
