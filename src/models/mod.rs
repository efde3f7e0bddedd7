pub mod detection;
pub mod job;
pub mod record;
pub mod responses;
