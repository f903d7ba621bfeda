//! # chat-client-rest
//!
//! The REST side of the client: route-to-bucket mapping, per-bucket
//! serialized request queues, response-driven rate-limit bookkeeping,
//! and the captcha / second-factor retry loops.

pub mod error;
pub mod events;
pub mod handler;
pub mod limits;
pub mod manager;
pub mod request;
pub mod routes;
pub mod solver;

pub use error::{ApiError, HttpError, RateLimitError, RestError};
pub use events::{RateLimitInfo, RestEvent, RestEvents};
pub use manager::{RejectPolicy, RestManager};
pub use request::{FileAttachment, RequestOptions, ResponseBody};
pub use routes::Route;
pub use solver::{CaptchaChallenge, CaptchaSolution, CaptchaSolver};
