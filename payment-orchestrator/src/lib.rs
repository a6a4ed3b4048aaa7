pub mod config;
pub mod dtos;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod providers;
pub mod services;
pub mod startup;
pub mod stores;

pub use error::{PaymentError, PaymentResult};
pub use startup::{router, AppState, Application};
