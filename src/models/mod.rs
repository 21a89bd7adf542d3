pub mod emergency;
pub mod realtime;
pub mod user;
