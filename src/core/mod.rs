pub mod access;
pub mod catalog;
pub mod features;
pub mod record;
pub mod similarity;
pub mod thumbnail;
