pub mod user;

pub use user::{Account, NewAccount, Principal, UserProfile};
