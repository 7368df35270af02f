//! External stores the service talks to.

pub mod redis_repo;

pub use redis_repo::RedisRepository;
