pub mod address;
pub mod auth;
pub mod card;
pub mod constants;
pub mod error;
pub mod path;
pub mod transport;
pub mod verify;
