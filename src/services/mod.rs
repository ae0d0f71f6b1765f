pub mod aggregator;
pub mod credentials;
pub mod reveal;
pub mod scanner;
