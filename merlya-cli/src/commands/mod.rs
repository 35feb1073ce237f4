pub mod exec;
pub mod hosts;
pub mod secrets;
pub mod sources;
pub mod vars;
