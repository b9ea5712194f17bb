pub mod artifacts;
pub mod response;
