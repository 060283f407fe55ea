pub mod conversation;
pub mod history;
