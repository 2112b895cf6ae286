pub mod health;
pub mod history;
pub mod stream;

pub use health::*;
pub use history::*;
pub use stream::*;
