pub mod auth;
pub mod cli;
pub mod konfirmi;
pub mod provider;
pub mod users;
