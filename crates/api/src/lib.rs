#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! YogVaidya API Library
//!
//! HTTP surface over the billing core: billing history, subscription
//! lifecycle, admin analytics and invariant checks, and the Razorpay
//! webhook receiver.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
