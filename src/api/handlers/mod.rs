pub mod health;
pub mod mfa;
pub mod phone;
