pub mod accounts;
pub mod admin;
pub mod fallback;
pub mod matches;
pub mod status;
