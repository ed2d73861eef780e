pub mod condition;
pub mod course;
pub mod instance;
pub mod schedule;
pub mod template;
pub mod user;
