pub mod fixtures;
pub mod logging;

pub use fixtures::StubCluster;
pub use logging::init_test_logging;
