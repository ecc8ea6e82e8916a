pub mod auth;
pub mod cache;
pub mod certificate;
pub mod exam;
pub mod gate;
pub mod progress;
pub mod review;
