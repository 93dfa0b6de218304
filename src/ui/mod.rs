pub mod console;
pub mod markdown;

pub use console::Console;
