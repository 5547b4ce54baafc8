pub fn init_test_logging() {
    cr_harness::logging::init_test_logging();
}

#[macro_export]
macro_rules! test_log {
    ($($arg:tt)*) => {
        tracing::info!(target: cr_harness::logging::TEST_LOG_TARGET, $($arg)*);
    };
}
