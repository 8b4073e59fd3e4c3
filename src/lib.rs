pub mod api;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod http;
pub mod ledger;
pub mod metrics;
pub mod model;
pub mod purchase_fsm;
pub mod service;
pub mod session;

pub use error::{PaymentError, Service};
