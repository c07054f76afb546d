pub mod actor;
pub mod app;
pub mod audit;
pub mod certificate;
pub mod config;
pub mod database;
pub mod error;
pub mod ledger;
pub mod pagination;
pub mod ratelimit;
pub mod requests;
pub mod server;
pub mod verification;

pub use app::CertLedger;
pub use error::CertLedgerError;
