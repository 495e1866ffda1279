pub mod filter;
pub mod moderation;
pub mod review;
pub mod room;
pub mod session;
pub mod user;
