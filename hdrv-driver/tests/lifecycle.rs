use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

use hdrv_common::{DriverError, ErrorTag};
use hdrv_driver::{finish, init, is_initialized, Driver, DriverConfig, EventSource, Notification, Port, Readiness};

struct NoSource;

impl EventSource for NoSource {
    fn select(&mut self, _fd: RawFd, _kind: Readiness, _on: bool) -> io::Result<()> {
        Ok(())
    }

    fn set_timer(&mut self, _after: Option<Duration>) {}
}

// The init count is process-wide, so the whole sequence lives in one test.
#[test]
fn init_gates_instances_and_balances_with_finish() {
    let config = Arc::new(DriverConfig::default());
    assert!(!is_initialized());
    assert!(matches!(
        Port::start(config.clone(), NoSource, Vec::<Notification>::new()),
        Err(DriverError::NotInitialized)
    ));
    assert!(matches!(finish(), Err(DriverError::AlreadyFinished)));

    let taxonomy = init();
    assert_eq!(taxonomy.error(ErrorTag::Timeout).ident, "timeout");
    let driver = Driver::init(DriverConfig::default());
    assert!(is_initialized());

    let port = driver.start(NoSource, Vec::new()).unwrap();
    port.stop();

    finish().unwrap();
    assert!(is_initialized());
    let clone = driver.clone();
    drop(driver);
    assert!(is_initialized());
    drop(clone);
    assert!(!is_initialized());
    assert!(matches!(finish(), Err(DriverError::AlreadyFinished)));
}
