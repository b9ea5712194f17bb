pub mod executor;
pub mod transcoder;
pub mod workdir;
