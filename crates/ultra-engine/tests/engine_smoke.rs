#![cfg(not(any(feature = "bundled", feature = "system")))]

use ultra_engine::{EngineError, NativeEngine, install_android_log_sink};

#[test]
fn stub_build_reports_unavailable() {
    install_android_log_sink();
    assert!(matches!(NativeEngine::new(), Err(EngineError::Unavailable)));
}
