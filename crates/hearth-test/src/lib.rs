#![doc = include_str!("../README.md")]

mod pages;
mod portal;

pub use pages::{
    captcha_page, dashboard_page, otp_page, signin_page, unrecognized_page,
};
pub use portal::start_portal_mock;
