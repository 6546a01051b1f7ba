pub mod cli;
pub mod errors;
pub mod guard;
pub mod journal;
pub mod lifecycle;
pub mod models;
pub mod notify;
pub mod storage;
