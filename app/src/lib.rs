pub mod commands;
pub mod render;

pub use commands::{run, Command};
pub use render::ReplyPrinter;
