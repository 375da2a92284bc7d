pub mod count_tokens;
pub mod health;
pub mod messages;
