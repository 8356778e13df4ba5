pub(crate) mod bootstrap;
pub(crate) mod buildport;
pub(crate) mod loop_runner;
