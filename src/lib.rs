pub mod accounts;
pub mod app;
pub mod config;
pub mod db;
pub mod media;
pub mod notify;
pub mod state;
pub mod storage;

#[cfg(test)]
mod test_support;
