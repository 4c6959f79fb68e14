//! Built-in services

mod hello;
mod validator;

pub use hello::{GameService, GAME_SERVICE};
pub use validator::TokenValidator;
