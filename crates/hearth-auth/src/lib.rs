#![doc = include_str!("../README.md")]

pub mod forms;
pub mod handshake;
pub mod login_step;
mod otp;
mod session_manager;

pub use login_step::{FailureReason, LoginStep};
pub use otp::{OtpProvider, StaticOtp};
pub use session_manager::SessionManager;
